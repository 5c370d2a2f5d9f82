use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::jobs::Schedule;

/// Schedules for the batch jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    #[serde(default = "default_billing")]
    pub billing: JobConfig,

    #[serde(default = "default_daily_rollup")]
    pub daily_rollup: JobConfig,

    #[serde(default = "default_monthly_rollup")]
    pub monthly_rollup: JobConfig,

    #[serde(default = "default_auto_top_up")]
    pub auto_top_up: JobConfig,

    /// Only runs when `ingest.sweep.enabled` is set.
    #[serde(default = "default_sweep")]
    pub sweep: JobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            billing: default_billing(),
            daily_rollup: default_daily_rollup(),
            monthly_rollup: default_monthly_rollup(),
            auto_top_up: default_auto_top_up(),
            sweep: default_sweep(),
        }
    }
}

impl JobsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, job) in [
            ("billing", &self.billing),
            ("daily_rollup", &self.daily_rollup),
            ("monthly_rollup", &self.monthly_rollup),
            ("auto_top_up", &self.auto_top_up),
            ("sweep", &self.sweep),
        ] {
            job.schedule
                .validate()
                .map_err(|e| ConfigError::Validation(format!("jobs.{name}: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub schedule: Schedule,
}

fn default_true() -> bool {
    true
}

fn default_billing() -> JobConfig {
    JobConfig {
        enabled: true,
        schedule: Schedule::Daily { hour: 0, minute: 0 },
    }
}

fn default_daily_rollup() -> JobConfig {
    JobConfig {
        enabled: true,
        schedule: Schedule::Daily { hour: 1, minute: 0 },
    }
}

fn default_monthly_rollup() -> JobConfig {
    JobConfig {
        enabled: true,
        schedule: Schedule::Monthly {
            day: 1,
            hour: 2,
            minute: 0,
        },
    }
}

fn default_auto_top_up() -> JobConfig {
    JobConfig {
        enabled: true,
        schedule: Schedule::Interval {
            every_secs: 6 * 3600,
            run_immediately: true,
        },
    }
}

fn default_sweep() -> JobConfig {
    JobConfig {
        enabled: true,
        schedule: Schedule::Interval {
            every_secs: 300,
            run_immediately: false,
        },
    }
}
