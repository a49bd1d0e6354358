//! Integration tests for environment-driven configuration.

use keywarden::config::{AppConfig, LogFormat, SecretsBackend};
use keywarden::Result;
use std::env;
use std::sync::Mutex;

// Serializes tests that modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
    let saved: Vec<(String, Option<String>)> =
        vars.iter().map(|(k, _)| (k.to_string(), env::var(k).ok())).collect();
    for (key, value) in vars {
        env::set_var(key, value);
    }

    let result = f();

    for (key, original) in saved {
        match original {
            Some(value) => env::set_var(&key, value),
            None => env::remove_var(&key),
        }
    }
    result
}

#[test]
fn test_config_environment_integration() -> Result<()> {
    let config = with_env(
        &[
            ("KEYWARDEN_PORT", "18080"),
            ("KEYWARDEN_LOG_FORMAT", "json"),
            ("KEYWARDEN_SECRETS_BACKEND", "env"),
            ("KEYWARDEN_WEBHOOK_RATE_LIMIT_PER_HOUR", "10"),
        ],
        AppConfig::from_env,
    )?;

    assert_eq!(config.server.port, 18080);
    assert_eq!(config.observability.log_format, LogFormat::Json);
    assert_eq!(config.secrets.backend, SecretsBackend::Env);
    assert_eq!(config.webhook.rate_limit_per_hour, 10);
    Ok(())
}

#[test]
fn test_unparseable_numbers_fall_back_to_defaults() -> Result<()> {
    let config = with_env(&[("KEYWARDEN_PORT", "invalid")], AppConfig::from_env)?;
    assert_eq!(config.server.port, 8080);
    Ok(())
}

#[test]
fn test_inconsistent_settings_are_rejected() {
    let result = with_env(
        &[("KEYWARDEN_WEBHOOK_TOLERANCE_SECONDS", "600"), ("KEYWARDEN_WEBHOOK_REPLAY_TTL_SECONDS", "60")],
        AppConfig::from_env,
    );
    assert!(result.is_err());

    let result = with_env(&[("KEYWARDEN_CLOCK_SKEW_SECONDS", "300")], AppConfig::from_env);
    assert!(result.is_err());
}

#[test]
fn test_unknown_log_format_is_rejected() {
    let result = with_env(&[("KEYWARDEN_LOG_FORMAT", "yaml")], AppConfig::from_env);
    assert!(result.is_err());
}
