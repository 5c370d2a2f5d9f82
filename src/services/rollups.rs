//! Daily and monthly consumption rollups.
//!
//! Rollups are derived data: each run recomputes the window from usage
//! records and replaces the stored row, so re-running a day after late
//! events arrive simply corrects it.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

use crate::{
    clock::Clock,
    db::{DbError, DbPool, DbResult, TimeRange},
    models::{DailyRollup, MonthlyRollup, ProjectUsage, RollupBreakdown, UsageGroup},
};

const UNKNOWN_ASSISTANT: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupRunResult {
    /// Organizations whose rollup was written.
    pub organizations: usize,
    /// Organizations whose write failed, with the error.
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct OrgTotals {
    total_tokens: i64,
    total_cost: i64,
    request_count: i64,
    breakdown: RollupBreakdown,
}

pub struct RollupService {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
}

impl RollupService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Recompute the daily rollup of every organization with usage on `date`.
    #[tracing::instrument(name = "rollups.daily", skip(self), fields(date = %date))]
    pub async fn aggregate_daily(&self, date: NaiveDate) -> DbResult<RollupRunResult> {
        let range = day_range(date);
        let groups = self.db.usage().usage_groups(range, false).await?;
        let totals = aggregate(&groups, false);
        let now = self.clock.now();
        let repo = self.db.rollups();

        let mut result = RollupRunResult::default();
        for (org_id, t) in totals {
            let rollup = DailyRollup {
                org_id: org_id.clone(),
                date,
                total_tokens: t.total_tokens,
                total_cost: t.total_cost,
                request_count: t.request_count,
                breakdown: t.breakdown,
                created_at: now,
                updated_at: now,
            };
            match repo.upsert_daily(&rollup).await {
                Ok(()) => result.organizations += 1,
                Err(e) => {
                    tracing::error!(org_id = %org_id, error = %e, "Failed to write daily rollup");
                    result.errors.push((org_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            organizations = result.organizations,
            errors = result.errors.len(),
            "Daily rollup complete"
        );
        Ok(result)
    }

    /// Recompute the monthly rollup of every organization with usage in
    /// `year`-`month`, including the per-project breakdown.
    #[tracing::instrument(name = "rollups.monthly", skip(self))]
    pub async fn aggregate_monthly(&self, year: i32, month: u32) -> DbResult<RollupRunResult> {
        let range = month_range(year, month)?;
        let label = format!("{year:04}-{month:02}");
        let groups = self.db.usage().usage_groups(range, false).await?;
        let totals = aggregate(&groups, true);
        let now = self.clock.now();
        let repo = self.db.rollups();

        let mut result = RollupRunResult::default();
        for (org_id, t) in totals {
            let rollup = MonthlyRollup {
                org_id: org_id.clone(),
                month: label.clone(),
                total_tokens: t.total_tokens,
                total_cost: t.total_cost,
                request_count: t.request_count,
                breakdown: t.breakdown,
                created_at: now,
                updated_at: now,
            };
            match repo.upsert_monthly(&rollup).await {
                Ok(()) => result.organizations += 1,
                Err(e) => {
                    tracing::error!(org_id = %org_id, error = %e, "Failed to write monthly rollup");
                    result.errors.push((org_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            month = %label,
            organizations = result.organizations,
            errors = result.errors.len(),
            "Monthly rollup complete"
        );
        Ok(result)
    }
}

pub fn day_range(date: NaiveDate) -> TimeRange {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    TimeRange::new(start, start + Duration::days(1))
}

pub fn month_range(year: i32, month: u32) -> DbResult<TimeRange> {
    let invalid = || DbError::Validation(format!("invalid month {year}-{month}"));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    Ok(TimeRange::new(
        first.and_time(NaiveTime::MIN).and_utc(),
        next.and_time(NaiveTime::MIN).and_utc(),
    ))
}

/// The calendar month before the one containing `as_of`.
pub fn previous_month(as_of: DateTime<Utc>) -> (i32, u32) {
    let date = as_of.date_naive();
    if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    }
}

fn aggregate(groups: &[UsageGroup], with_projects: bool) -> BTreeMap<String, OrgTotals> {
    let mut orgs: BTreeMap<String, OrgTotals> = BTreeMap::new();
    for g in groups {
        let t = orgs.entry(g.org_id.clone()).or_default();
        t.total_tokens = t.total_tokens.saturating_add(g.total_tokens);
        t.total_cost = t.total_cost.saturating_add(g.cost_microcents);
        t.request_count += g.request_count;

        let assistant = if g.assistant_type.is_empty() {
            UNKNOWN_ASSISTANT
        } else {
            &g.assistant_type
        };
        t.breakdown
            .by_assistant
            .entry(assistant.to_string())
            .or_default()
            .add(g.total_tokens, g.cost_microcents);

        if !g.user_id.is_empty() {
            t.breakdown
                .by_user
                .entry(g.user_id.clone())
                .or_default()
                .add(g.total_tokens, g.cost_microcents);
        }

        if with_projects && !g.project_id.is_empty() {
            let p: &mut ProjectUsage = t.breakdown.by_project.entry(g.project_id.clone()).or_default();
            p.tokens = p.tokens.saturating_add(g.total_tokens);
            p.cost = p.cost.saturating_add(g.cost_microcents);
            p.requests += g.request_count;
        }
    }
    orgs
}
