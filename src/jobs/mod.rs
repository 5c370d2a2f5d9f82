//! Scheduled batch jobs.
//!
//! - **Billing**: settles the previous UTC day against wallets.
//! - **Daily / monthly rollup**: recompute consumption summaries for the
//!   previous day or month.
//! - **Auto-top-up**: charges organizations whose balance fell below their
//!   threshold.
//! - **Sweep**: reconciles request events whose response never arrived
//!   (only with `ingest.sweep.enabled`).
//!
//! Every job derives its target from the scheduled fire time, so a job can
//! also be run once from the CLI for any instant with `run <job> --as-of`.
//! Daily and monthly jobs also replay their most recent fire at startup.
//!
//! # Example
//!
//! ```toml
//! [jobs.billing]
//! schedule = { kind = "daily", hour = 0, minute = 0 }
//!
//! [jobs.auto_top_up]
//! schedule = { kind = "interval", every_secs = 21600, run_immediately = true }
//! ```

mod schedule;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
pub use schedule::{Schedule, run_scheduled};

use crate::{
    clock,
    db::DbError,
    ingest::{IngestError, RequestSweeper},
    services::{Services, rollups::previous_month},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum JobKind {
    Billing,
    DailyRollup,
    MonthlyRollup,
    AutoTopUp,
    Sweep,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Billing,
        JobKind::DailyRollup,
        JobKind::MonthlyRollup,
        JobKind::AutoTopUp,
        JobKind::Sweep,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Billing => "billing",
            JobKind::DailyRollup => "daily_rollup",
            JobKind::MonthlyRollup => "monthly_rollup",
            JobKind::AutoTopUp => "auto_top_up",
            JobKind::Sweep => "sweep",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Request sweep is disabled (set ingest.sweep.enabled)")]
    SweepDisabled,
}

/// Runs a job for a given fire time.
pub struct JobRunner {
    services: Services,
    sweeper: Option<Arc<RequestSweeper>>,
}

impl JobRunner {
    pub fn new(services: Services, sweeper: Option<Arc<RequestSweeper>>) -> Self {
        Self { services, sweeper }
    }

    #[tracing::instrument(name = "job.run", skip(self), fields(job = kind.name(), fire_at = %fire_at))]
    pub async fn run(&self, kind: JobKind, fire_at: DateTime<Utc>) -> Result<(), JobError> {
        match kind {
            JobKind::Billing => {
                let result = self.services.billing.run_daily_billing(fire_at).await?;
                if result.failed() > 0 {
                    tracing::warn!(failed = result.failed(), "Some organizations were not billed");
                }
            }
            JobKind::DailyRollup => {
                let day = (clock::start_of_day(fire_at) - Duration::days(1)).date_naive();
                self.services.rollups.aggregate_daily(day).await?;
            }
            JobKind::MonthlyRollup => {
                let (year, month) = previous_month(fire_at);
                self.services.rollups.aggregate_monthly(year, month).await?;
            }
            JobKind::AutoTopUp => {
                self.services.auto_top_up.check_and_process(fire_at).await?;
            }
            JobKind::Sweep => {
                let sweeper = self.sweeper.as_ref().ok_or(JobError::SweepDisabled)?;
                sweeper.sweep_expired(fire_at).await?;
            }
        }
        Ok(())
    }
}

/// Spawn every enabled job onto `tracker`. Each stops when `cancel` fires.
#[cfg(feature = "server")]
pub fn spawn_scheduled_jobs(
    runner: Arc<JobRunner>,
    config: &crate::config::JobsConfig,
    clock: Arc<dyn clock::Clock>,
    tracker: &tokio_util::task::TaskTracker,
    cancel: tokio_util::sync::CancellationToken,
) {
    for kind in JobKind::ALL {
        let job = match kind {
            JobKind::Billing => &config.billing,
            JobKind::DailyRollup => &config.daily_rollup,
            JobKind::MonthlyRollup => &config.monthly_rollup,
            JobKind::AutoTopUp => &config.auto_top_up,
            JobKind::Sweep => &config.sweep,
        };
        if !job.enabled || (kind == JobKind::Sweep && runner.sweeper.is_none()) {
            tracing::info!(job = kind.name(), "Scheduled job disabled");
            continue;
        }

        let runner = runner.clone();
        tracker.spawn(run_scheduled(
            kind.name(),
            job.schedule.clone(),
            clock.clone(),
            cancel.clone(),
            move |fire_at| {
                let runner = runner.clone();
                async move { runner.run(kind, fire_at).await }
            },
        ));
    }
}
