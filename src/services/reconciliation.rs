//! Turns a request/response event pair into a usage record.
//!
//! Either side may be missing: a response whose request expired from the
//! cache becomes a `response-only` record, and a swept request with no
//! response becomes `request-only`. Only complete records feed the realtime
//! counters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{RealtimeCounters, SideEffect};
use crate::{
    clock::Clock,
    db::{DbError, DbPool},
    models::{
        RequestEvent, RequestMetrics, ResponseEvent, ResponseMetrics, UsageRecord, UsageStatus,
    },
    observability::metrics,
    pricing::PricingTable,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Nothing to reconcile: neither a request nor a response event was given")]
    NoEvents,

    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub record: UsageRecord,
    /// `false` when a record for this request id already existed.
    pub inserted: bool,
    pub counters: SideEffect,
}

pub struct ReconciliationService {
    db: Arc<DbPool>,
    pricing: Arc<PricingTable>,
    realtime: Arc<RealtimeCounters>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DbPool>,
        pricing: Arc<PricingTable>,
        realtime: Arc<RealtimeCounters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            pricing,
            realtime,
            clock,
        }
    }

    /// Build, price and persist the usage record for one request.
    ///
    /// Persisting is insert-once: replaying the same pair reports
    /// `inserted = false` and leaves the counters alone.
    pub async fn reconcile(
        &self,
        request: Option<&RequestEvent>,
        response: Option<&ResponseEvent>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let record = build_record(request, response, &self.pricing, self.clock.now())
            .ok_or(ReconcileError::NoEvents)?;

        let inserted = self.db.usage().insert_once(&record).await?;
        metrics::record_usage_record(
            record.status.as_str(),
            if inserted { "inserted" } else { "duplicate" },
            record.total_tokens,
        );

        if !inserted {
            tracing::debug!(request_id = %record.request_id, "Usage record already processed");
            return Ok(ReconcileOutcome {
                record,
                inserted,
                counters: SideEffect::Skipped,
            });
        }

        tracing::debug!(
            request_id = %record.request_id,
            org_id = %record.org_id,
            status = %record.status,
            total_tokens = record.total_tokens,
            cost = record.cost_microcents,
            "Usage record stored"
        );

        let counters = if counts_toward_realtime(&record) {
            let result = self
                .realtime
                .increment(&record.org_id, &record.user_id, record.total_tokens)
                .await;
            if let Err(e) = &result {
                tracing::warn!(
                    request_id = %record.request_id,
                    error = %e,
                    "Failed to update realtime counters"
                );
            }
            SideEffect::from_result(result)
        } else {
            SideEffect::Skipped
        };

        Ok(ReconcileOutcome {
            record,
            inserted,
            counters,
        })
    }
}

fn counts_toward_realtime(record: &UsageRecord) -> bool {
    record.status == UsageStatus::Complete
        && !record.org_id.is_empty()
        && !record.user_id.is_empty()
        && record.total_tokens > 0
}

/// Merge the two sides of a request into a priced record.
///
/// Returns `None` when both sides are missing.
pub fn build_record(
    request: Option<&RequestEvent>,
    response: Option<&ResponseEvent>,
    pricing: &PricingTable,
    now: DateTime<Utc>,
) -> Option<UsageRecord> {
    let status = match (request, response) {
        (Some(_), Some(_)) => UsageStatus::Complete,
        (None, Some(_)) => UsageStatus::ResponseOnly,
        (Some(_), None) => UsageStatus::RequestOnly,
        (None, None) => return None,
    };

    let request_id = response
        .map(|r| r.request_id.clone())
        .or_else(|| request.map(|r| r.request_id.clone()))?;

    let pick = |resp: Option<&str>, req: Option<&str>| -> String {
        resp.filter(|s| !s.is_empty())
            .or(req.filter(|s| !s.is_empty()))
            .unwrap_or_default()
            .to_string()
    };

    let org_id = pick(
        response.map(|r| r.organization_id.as_str()),
        request.map(|r| r.organization_id.as_str()),
    );
    let user_id = pick(
        response.map(|r| r.user_id.as_str()),
        request.map(|r| r.user_id.as_str()),
    );
    let model = pick(
        response.map(|r| r.model.as_str()),
        request.map(|r| r.model.as_str()),
    );
    let assistant_type = pick(
        response.and_then(|r| r.assistant_type.as_deref()),
        request.and_then(|r| r.assistant_type.as_deref()),
    );
    let document_id = pick(
        response.and_then(|r| r.document_id.as_deref()),
        request.and_then(|r| r.document_id.as_deref()),
    );
    let conversation_id = pick(
        response.and_then(|r| r.conversation_id.as_deref()),
        request.and_then(|r| r.conversation_id.as_deref()),
    );
    let project_id = if document_id.is_empty() {
        conversation_id.clone()
    } else {
        document_id.clone()
    };

    let timestamp = response
        .map(|r| r.timestamp)
        .or_else(|| request.map(|r| r.timestamp))
        .unwrap_or(now);

    let (prompt_tokens, completion_tokens, total_tokens) = resolve_tokens(request, response);
    if !pricing.is_known(&model) {
        tracing::debug!(model = %model, "Unknown model, using default pricing");
    }
    let cost_microcents = pricing.cost(&model, prompt_tokens, completion_tokens);

    Some(UsageRecord {
        request_id,
        timestamp,
        user_id,
        org_id,
        assistant_type,
        document_id,
        conversation_id,
        project_id,
        model,
        request: request.map(|r| RequestMetrics {
            timestamp: r.timestamp,
            character_count: r.character_count,
            estimated_tokens: r.token_count,
            request_type: r.request_type.clone(),
            tool_count: r.tool_count,
            message_count: r.message_count,
        }),
        response: response.map(|r| ResponseMetrics {
            timestamp: r.timestamp,
            character_count: r.character_count,
            estimated_tokens: r.token_count,
            finish_reason: r.finish_reason.clone(),
            response_time_ms: r.response_time_ms,
            has_tool_calls: r.has_tool_calls,
            tool_call_count: r.tool_call_count,
        }),
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cost_microcents,
        status,
        created_at: now,
    })
}

/// (prompt, completion, total). Provider-reported usage wins over estimates.
fn resolve_tokens(
    request: Option<&RequestEvent>,
    response: Option<&ResponseEvent>,
) -> (i64, i64, i64) {
    if let Some(usage) = response.and_then(|r| r.usage) {
        if usage.total_tokens > 0 {
            return (
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
            );
        }
        let sum = usage.prompt_tokens.saturating_add(usage.completion_tokens);
        if sum > 0 {
            return (usage.prompt_tokens, usage.completion_tokens, sum);
        }
    }

    let prompt = request.map(|r| r.token_count).unwrap_or(0);
    let completion = response.map(|r| r.token_count).unwrap_or(0);
    (prompt, completion, prompt.saturating_add(completion))
}
