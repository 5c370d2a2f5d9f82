//! Tracing subscriber setup.

use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global tracing subscriber. Call once, from `main`.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TracingError> {
    let filter = build_env_filter(config);

    tracing_subscriber::registry()
        .with(fmt_layer(config))
        .with(filter)
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))
}

fn fmt_layer(config: &LoggingConfig) -> BoxedLayer {
    let base = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(config.file_line)
        .with_line_number(config.file_line);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Json, true) => base.json().flatten_event(true).boxed(),
        (LogFormat::Json, false) => base.json().flatten_event(true).without_time().boxed(),
    }
}

/// `RUST_LOG` wins; otherwise the configured level plus any configured
/// directives; otherwise the level with noisy dependencies turned down.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = config.level.as_str();

    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        EnvFilter::try_new(format!("{},{}", base_level, filter))
            .unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        EnvFilter::new(format!(
            "{},hyper=warn,h2=warn,tower=info,sqlx=warn,reqwest=warn,redis=warn",
            base_level
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}
