//! Structured logging initialization.
//!
//! Environment-aware tracing setup: `RECORDFLOW_LOG` controls the filter
//! (default `info`), `RECORDFLOW_LOG_FORMAT=json` switches to JSON output
//! for log shippers.

use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber. Safe to call more than once;
/// an already-installed subscriber is left in place.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env("RECORDFLOW_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let json = std::env::var("RECORDFLOW_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }
    });
}
