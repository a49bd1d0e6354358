//! # Observability Infrastructure
//!
//! Structured logging and metric counters for keywarden.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::register_metrics;

use crate::config::ObservabilityConfig;
use ::tracing::info;

/// Initialize logging and describe metrics.
pub fn init_observability(config: &ObservabilityConfig) {
    let installed = init_logging(config);
    register_metrics();

    info!(
        log_level = %config.log_level,
        log_format = ?config.log_format,
        subscriber_installed = installed,
        "Observability initialized"
    );
}
