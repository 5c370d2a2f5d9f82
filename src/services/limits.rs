//! Advisory consumption limit checks.
//!
//! Totals are summed live from durable usage records rather than the
//! realtime counters, so a check reflects everything reconciled so far.
//! Nothing in the ingestion path calls this; callers that want enforcement
//! ask before admitting a request.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clock,
    config::LimitsConfig,
    db::{DbError, DbPool, DbResult, TimeRange},
    notifications::{LimitWarning, Notifier},
    observability::metrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Monthly,
    Daily,
    PerUser,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Monthly => "monthly",
            LimitKind::Daily => "daily",
            LimitKind::PerUser => "per_user",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allow,
    /// The first limit that `current + delta` would exceed.
    Deny {
        kind: LimitKind,
        current: i64,
        limit: i64,
    },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allow)
    }
}

pub struct LimitsGuard {
    db: Arc<DbPool>,
    notifier: Arc<dyn Notifier>,
    notify_on_violation: bool,
}

impl LimitsGuard {
    pub fn new(db: Arc<DbPool>, notifier: Arc<dyn Notifier>, config: &LimitsConfig) -> Self {
        Self {
            db,
            notifier,
            notify_on_violation: config.notify_on_violation,
        }
    }

    /// Would `delta` more tokens push the organization or user past a cap?
    ///
    /// Caps of 0 are unlimited. Checked in order monthly, daily, per-user.
    #[tracing::instrument(name = "limits.check", skip(self), fields(org_id = %org_id, user_id = %user_id))]
    pub async fn check_limits(
        &self,
        org_id: &str,
        user_id: &str,
        delta: i64,
        as_of: DateTime<Utc>,
    ) -> DbResult<LimitDecision> {
        let org = self
            .db
            .organizations()
            .get(org_id)
            .await?
            .ok_or(DbError::NotFound)?;
        let limits = org.consumption_limits;
        let usage = self.db.usage();

        // Whole calendar periods; records stamped after `as_of` still count
        let month = TimeRange::new(
            clock::start_of_month(as_of),
            clock::start_of_next_month(as_of),
        );
        let today = clock::start_of_day(as_of);
        let day = TimeRange::new(today, today + chrono::Duration::days(1));

        let checks = [
            (LimitKind::Monthly, limits.monthly, None, month),
            (LimitKind::Daily, limits.daily, None, day),
            (LimitKind::PerUser, limits.per_user, Some(user_id), month),
        ];

        let mut decision = LimitDecision::Allow;
        for (kind, limit, user, range) in checks {
            if limit <= 0 {
                continue;
            }
            let current = usage.sum_tokens(org_id, user, range).await?;
            if current.saturating_add(delta) > limit {
                decision = LimitDecision::Deny {
                    kind,
                    current,
                    limit,
                };
                break;
            }
        }

        match decision {
            LimitDecision::Allow => metrics::record_limit_check("allow"),
            LimitDecision::Deny {
                kind,
                current,
                limit,
            } => {
                metrics::record_limit_check(kind.as_str());
                tracing::info!(
                    kind = %kind,
                    current = current,
                    delta = delta,
                    limit = limit,
                    "Consumption limit exceeded"
                );
                if self.notify_on_violation {
                    let warning = LimitWarning {
                        org_id: org.org_id.clone(),
                        org_name: org.name.clone(),
                        email: org.billing_email.clone(),
                        user_id: user_id.to_string(),
                        kind,
                        current,
                        limit,
                    };
                    if let Err(e) = self.notifier.consumption_limit_warning(warning).await {
                        tracing::warn!(error = %e, "Failed to send limit warning");
                    }
                }
            }
        }

        Ok(decision)
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use super::*;
    use crate::{
        db::tests::{
            fixtures::{org_input, ts, usage_record},
            harness::sqlite_db,
        },
        models::{ConsumptionLimits, CreateOrganization},
        notifications::testing::RecordingNotifier,
    };

    async fn setup(
        limits: ConsumptionLimits,
        notify_on_violation: bool,
    ) -> (Arc<DbPool>, Arc<RecordingNotifier>, LimitsGuard) {
        let db = Arc::new(sqlite_db().await);
        db.organizations()
            .create(CreateOrganization {
                consumption_limits: limits,
                ..org_input("acme", 0)
            })
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let guard = LimitsGuard::new(
            db.clone(),
            notifier.clone(),
            &LimitsConfig {
                notify_on_violation,
            },
        );
        (db, notifier, guard)
    }

    #[tokio::test]
    async fn test_monthly_limit_boundary() {
        let (db, _, guard) = setup(
            ConsumptionLimits {
                monthly: 1000,
                ..Default::default()
            },
            false,
        )
        .await;
        db.usage()
            .insert_once(&usage_record("r1", "acme", "u1", ts(2025, 3, 2, 10, 0), 950, 1))
            .await
            .unwrap();
        let as_of = ts(2025, 3, 10, 12, 0);

        let denied = guard.check_limits("acme", "u1", 100, as_of).await.unwrap();
        assert_eq!(
            denied,
            LimitDecision::Deny {
                kind: LimitKind::Monthly,
                current: 950,
                limit: 1000
            }
        );
        let allowed = guard.check_limits("acme", "u1", 50, as_of).await.unwrap();
        assert!(allowed.is_allowed());
    }

    #[tokio::test]
    async fn test_daily_and_per_user_windows() {
        let (db, _, guard) = setup(
            ConsumptionLimits {
                monthly: 0,
                daily: 500,
                per_user: 700,
            },
            false,
        )
        .await;
        let usage = db.usage();
        // Last month, outside every window
        usage
            .insert_once(&usage_record("r0", "acme", "u1", ts(2025, 2, 28, 23, 0), 5000, 1))
            .await
            .unwrap();
        usage
            .insert_once(&usage_record("r1", "acme", "u1", ts(2025, 3, 9, 10, 0), 400, 1))
            .await
            .unwrap();
        usage
            .insert_once(&usage_record("r2", "acme", "u1", ts(2025, 3, 10, 9, 0), 200, 1))
            .await
            .unwrap();
        usage
            .insert_once(&usage_record("r3", "acme", "u2", ts(2025, 3, 10, 9, 30), 250, 1))
            .await
            .unwrap();
        let as_of = ts(2025, 3, 10, 12, 0);

        // Daily: 450 today
        let decision = guard.check_limits("acme", "u2", 100, as_of).await.unwrap();
        assert_eq!(
            decision,
            LimitDecision::Deny {
                kind: LimitKind::Daily,
                current: 450,
                limit: 500
            }
        );

        // u1 has 600 this month; daily still has room for 40
        let decision = guard.check_limits("acme", "u1", 40, as_of).await.unwrap();
        assert!(decision.is_allowed());
        let decision = guard
            .check_limits("acme", "u1", 40, ts(2025, 3, 11, 0, 0))
            .await
            .unwrap();
        assert!(decision.is_allowed());
        let decision = guard
            .check_limits("acme", "u1", 150, ts(2025, 3, 11, 0, 0))
            .await
            .unwrap();
        assert_eq!(
            decision,
            LimitDecision::Deny {
                kind: LimitKind::PerUser,
                current: 600,
                limit: 700
            }
        );
    }

    #[tokio::test]
    async fn test_records_after_as_of_count_within_period() {
        let (db, _, guard) = setup(
            ConsumptionLimits {
                monthly: 1000,
                daily: 0,
                per_user: 0,
            },
            false,
        )
        .await;
        let as_of = ts(2025, 3, 10, 12, 0);
        db.usage()
            .insert_once(&usage_record(
                "r1",
                "acme",
                "u1",
                as_of + chrono::Duration::seconds(5),
                950,
                1,
            ))
            .await
            .unwrap();
        // Next month's usage stays outside
        db.usage()
            .insert_once(&usage_record("r2", "acme", "u1", ts(2025, 4, 1, 0, 0), 5000, 1))
            .await
            .unwrap();

        let decision = guard.check_limits("acme", "u1", 100, as_of).await.unwrap();
        assert_eq!(
            decision,
            LimitDecision::Deny {
                kind: LimitKind::Monthly,
                current: 950,
                limit: 1000
            }
        );
    }

    #[tokio::test]
    async fn test_zero_limits_are_unlimited() {
        let (db, _, guard) = setup(ConsumptionLimits::default(), true).await;
        db.usage()
            .insert_once(&usage_record("r1", "acme", "u1", ts(2025, 3, 1, 1, 0), 1_000_000, 1))
            .await
            .unwrap();
        let decision = guard
            .check_limits("acme", "u1", i64::MAX, ts(2025, 3, 1, 2, 0))
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_denial_sends_warning_when_enabled() {
        let (_, notifier, guard) = setup(
            ConsumptionLimits {
                daily: 10,
                ..Default::default()
            },
            true,
        )
        .await;
        let decision = guard
            .check_limits("acme", "u1", 11, ts(2025, 3, 1, 2, 0))
            .await
            .unwrap();
        assert!(!decision.is_allowed());
        assert_eq!(notifier.kinds(), vec!["consumption_limit_warning"]);
    }

    #[tokio::test]
    async fn test_unknown_org() {
        let (_, _, guard) = setup(ConsumptionLimits::default(), false).await;
        let err = guard
            .check_limits("ghost", "u1", 1, ts(2025, 3, 1, 2, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}
