//! Prometheus metrics for the ledger.
//!
//! Every `record_*` function compiles to a no-op without the `prometheus`
//! feature, so call sites never need their own cfg gates.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0],
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install_recorder()
        .map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::debug!("Metrics enabled in config but the 'prometheus' feature is not compiled");
    }
    Ok(())
}

#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording
// ─────────────────────────────────────────────────────────────────────────────

/// A stream message finished processing.
///
/// `outcome` is one of `acked`, `dropped` (undecodable), `retried`.
pub fn record_stream_message(stream: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "ledger_stream_messages_total",
            "stream" => stream.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (stream, outcome);
    }
}

/// A usage record was persisted (`inserted`) or found already present
/// (`duplicate`).
pub fn record_usage_record(status: &str, result: &str, total_tokens: i64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "ledger_usage_records_total",
            "status" => status.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
        if result == "inserted" {
            counter!("ledger_tokens_total", "status" => status.to_string())
                .increment(total_tokens.max(0) as u64);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (status, result, total_tokens);
    }
}

/// Outcome of settling one organization's daily cost.
pub fn record_billing_settlement(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("ledger_billing_settlements_total", "outcome" => outcome.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// A wallet update lost its version check and had to be retried.
pub fn record_wallet_conflict(operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("ledger_wallet_conflicts_total", "operation" => operation.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = operation;
    }
}

pub fn record_top_up(source: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "ledger_top_ups_total",
            "source" => source.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (source, outcome);
    }
}

pub fn record_notification(kind: &str, success: bool) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "ledger_notifications_total",
            "kind" => kind.to_string(),
            "result" => if success { "sent" } else { "failed" }
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, success);
    }
}

/// Result of a consumption-limit check: `allow` or the denying limit kind.
pub fn record_limit_check(result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("ledger_limit_checks_total", "result" => result.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = result;
    }
}

pub fn record_job_run(job: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "ledger_job_runs_total",
            "job" => job.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (job, outcome);
    }
}

pub fn record_job_duration(job: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("ledger_job_duration_seconds", "job" => job.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (job, duration_secs);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
