//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. The filter comes from
//! `RUST_LOG` when set, otherwise from the configured log level. Output is
//! either compact text or one JSON object per line.

use crate::config::{LogFormat, ObservabilityConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already set (integration tests
/// running in one process); that case is not an error.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init(),
        LogFormat::Text => {
            tracing_subscriber::registry().with(filter).with(fmt::layer().compact()).try_init()
        }
    };

    result.is_ok()
}

/// Create a tracing span for a security-sensitive operation.
///
/// ```rust,ignore
/// let span = security_span!("rotate", key_type = "signing");
/// ```
#[macro_export]
macro_rules! security_span {
    ($operation:expr) => {
        tracing::info_span!(
            "security_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "security_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = ObservabilityConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);
        // Only one install can win in a shared test process.
        assert!(!(first && second));
    }

    #[test]
    fn test_security_span_macro() {
        let span = security_span!("rotate", key_type = "signing");
        let _guard = span.enter();
    }
}
