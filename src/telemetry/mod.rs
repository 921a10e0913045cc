//! Telemetry for the plugin subsystem.
//!
//! Structured logging, install spans and metric counters. Metrics go through
//! the `metrics` facade; installing a recorder is left to the embedding
//! application.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    describe_metrics, record_active_installs, record_catalog_refresh, record_install_outcome,
    record_profitability_update, record_remove_outcome,
};
pub use spans::{InstallSpan, SpanExt};
