use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::IngestResult;
use crate::{
    db::DbPool,
    models::RequestEvent,
    services::ReconciliationService,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepResult {
    /// Request-only records written.
    pub reconciled: usize,
    /// Pending rows whose request id already had a record.
    pub already_present: usize,
    /// Pending rows with an unreadable payload, removed.
    pub dropped: usize,
    /// Rows left in place after an error; retried on the next sweep.
    pub errors: usize,
}

/// Reconciles requests whose response never arrived.
pub struct RequestSweeper {
    db: Arc<DbPool>,
    reconciliation: Arc<ReconciliationService>,
    batch_size: u32,
}

impl RequestSweeper {
    pub fn new(db: Arc<DbPool>, reconciliation: Arc<ReconciliationService>, batch_size: u32) -> Self {
        Self {
            db,
            reconciliation,
            batch_size,
        }
    }

    #[tracing::instrument(name = "ingest.sweep", skip(self), fields(as_of = %as_of))]
    pub async fn sweep_expired(&self, as_of: DateTime<Utc>) -> IngestResult<SweepResult> {
        let pending = self.db.pending_requests();
        let expired = pending.list_expired(as_of, self.batch_size).await?;
        let mut result = SweepResult::default();

        for row in expired {
            let request: RequestEvent = match serde_json::from_str(&row.payload) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(request_id = %row.request_id, error = %e, "Dropping unreadable pending request");
                    pending.delete(&row.request_id).await?;
                    result.dropped += 1;
                    continue;
                }
            };

            match self.reconciliation.reconcile(Some(&request), None).await {
                Ok(outcome) if outcome.inserted => result.reconciled += 1,
                Ok(_) => result.already_present += 1,
                Err(e) => {
                    tracing::error!(request_id = %row.request_id, error = %e, "Failed to reconcile expired request");
                    result.errors += 1;
                    continue;
                }
            }
            pending.delete(&row.request_id).await?;
        }

        if result != SweepResult::default() {
            tracing::info!(
                reconciled = result.reconciled,
                already_present = result.already_present,
                dropped = result.dropped,
                errors = result.errors,
                "Swept expired requests"
            );
        }
        Ok(result)
    }
}
