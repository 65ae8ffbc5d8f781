// Logging setup shared by the binaries and integration tests
use crate::{HeraldError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,herald_core=info,herald_audio=info";

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG`; falls back to `default_filter` (or [`DEFAULT_FILTER`]).
/// Fails if a global subscriber was already installed.
pub fn init_tracing(default_filter: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER)))
        .map_err(|e| HeraldError::TelemetryError(e.to_string()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| HeraldError::TelemetryError(e.to_string()))
}
