//! When batch jobs fire, and the loop that fires them.

use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{clock::Clock, observability::metrics};

/// Firing policy for a scheduled job. All times are UTC.
///
/// ```toml
/// schedule = { kind = "daily", hour = 0, minute = 0 }
/// schedule = { kind = "monthly", day = 1, hour = 2, minute = 0 }
/// schedule = { kind = "interval", every_secs = 21600, run_immediately = true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Schedule {
    Daily {
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    /// `day` past the end of a short month fires on its last day.
    Monthly {
        day: u32,
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    Interval {
        every_secs: u64,
        #[serde(default)]
        run_immediately: bool,
    },
}

impl Schedule {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Schedule::Daily { hour, minute } => check_time(hour, minute),
            Schedule::Monthly { day, hour, minute } => {
                if !(1..=31).contains(&day) {
                    return Err(format!("day must be between 1 and 31, got {day}"));
                }
                check_time(hour, minute)
            }
            Schedule::Interval { every_secs, .. } => {
                if every_secs == 0 {
                    return Err("every_secs must be greater than 0".into());
                }
                Ok(())
            }
        }
    }

    /// Whether the job should also run once at startup.
    pub fn runs_immediately(&self) -> bool {
        matches!(
            self,
            Schedule::Interval {
                run_immediately: true,
                ..
            }
        )
    }

    /// The latest fire time at or before `now`. Calendar schedules only;
    /// intervals have no fixed phase.
    pub fn last_fire_at_or_before(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Schedule::Daily { hour, minute } => {
                let today = now
                    .date_naive()
                    .and_time(time_of_day(hour, minute))
                    .and_utc();
                Some(if today <= now {
                    today
                } else {
                    today - chrono::Duration::days(1)
                })
            }
            Schedule::Monthly { day, hour, minute } => {
                let time = time_of_day(hour, minute);
                let this_month =
                    Utc.from_utc_datetime(&clamped_date(now.year(), now.month(), day).and_time(time));
                if this_month <= now {
                    return Some(this_month);
                }
                let (year, month) = if now.month() == 1 {
                    (now.year() - 1, 12)
                } else {
                    (now.year(), now.month() - 1)
                };
                Some(Utc.from_utc_datetime(&clamped_date(year, month, day).and_time(time)))
            }
            Schedule::Interval { .. } => None,
        }
    }

    /// The first fire time strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Daily { hour, minute } => {
                let time = time_of_day(hour, minute);
                let today = now.date_naive().and_time(time).and_utc();
                if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            }
            Schedule::Monthly { day, hour, minute } => {
                let time = time_of_day(hour, minute);
                let (mut year, mut month) = (now.year(), now.month());
                // Two iterations always suffice; the bound keeps this total
                for _ in 0..3 {
                    let candidate = Utc
                        .from_utc_datetime(&clamped_date(year, month, day).and_time(time));
                    if candidate > now {
                        return candidate;
                    }
                    (year, month) = if month == 12 {
                        (year + 1, 1)
                    } else {
                        (year, month + 1)
                    };
                }
                now + chrono::Duration::days(1)
            }
            Schedule::Interval { every_secs, .. } => {
                let every = i64::try_from(every_secs.max(1)).unwrap_or(i64::MAX);
                now + chrono::Duration::try_seconds(every).unwrap_or(chrono::Duration::days(1))
            }
        }
    }
}

fn check_time(hour: u32, minute: u32) -> Result<(), String> {
    if hour > 23 {
        return Err(format!("hour must be between 0 and 23, got {hour}"));
    }
    if minute > 59 {
        return Err(format!("minute must be between 0 and 59, got {minute}"));
    }
    Ok(())
}

fn time_of_day(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or(NaiveTime::MIN)
}

/// `day` of the given month, pulled back to the month's last day if needed.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let mut day = day.clamp(1, 31);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return date;
        }
        if day <= 28 {
            return NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default();
        }
        day -= 1;
    }
}

/// Run `job` on `schedule` until `cancel` fires.
///
/// The job receives its scheduled fire time, not the wall time at which it
/// actually started, so catch-up runs compute the same targets. A failing run
/// is logged and the loop carries on to the next fire time.
///
/// Calendar schedules run once at startup for their most recent fire time,
/// covering a fire missed while the process was down. Their jobs settle or
/// recompute a whole period, so repeating an already-completed fire is a no-op.
pub async fn run_scheduled<F, Fut, E>(
    name: &'static str,
    schedule: Schedule,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    mut job: F,
) where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    tracing::info!(job = name, schedule = ?schedule, "Starting scheduled job");

    let mut cursor = clock.now();

    if cancel.is_cancelled() {
        return;
    }
    if schedule.runs_immediately() {
        run_once(name, cursor, &mut job).await;
    } else if let Some(last) = schedule.last_fire_at_or_before(cursor) {
        tracing::info!(job = name, fire_at = %last, "Catching up on most recent scheduled run");
        run_once(name, last, &mut job).await;
    }

    loop {
        let fire_at = schedule.next_fire_after(cursor.max(clock.now()));
        let delay = (fire_at - clock.now()).to_std().unwrap_or(Duration::ZERO);

        tracing::debug!(job = name, next_run = %fire_at, "Job sleeping until next run");

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job = name, "Scheduled job stopped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        run_once(name, fire_at, &mut job).await;
        cursor = fire_at;
    }
}

async fn run_once<F, Fut, E>(name: &'static str, fire_at: DateTime<Utc>, job: &mut F)
where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let start = std::time::Instant::now();
    let result = job(fire_at).await;
    metrics::record_job_duration(name, start.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            tracing::debug!(
                job = name,
                fire_at = %fire_at,
                duration_ms = start.elapsed().as_millis() as u64,
                "Scheduled job run complete"
            );
            metrics::record_job_run(name, "success");
        }
        Err(e) => {
            tracing::error!(job = name, fire_at = %fire_at, error = %e, "Scheduled job run failed");
            metrics::record_job_run(name, "error");
        }
    }
}
