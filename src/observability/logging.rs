//! Structured logging setup.
//!
//! `RUST_LOG` wins over the configured level; JSON output for production,
//! plain fmt for development.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. A second call is a no-op that returns an error.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "resilient_gateway={level},tower_http={level}",
            level = config.log_level
        ))
    });

    let layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().with_target(true).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry().with(layer.with_filter(filter)).try_init()
}
