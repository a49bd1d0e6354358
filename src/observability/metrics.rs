//! # Metrics Collection
//!
//! Counters emitted through the `metrics` facade. No exporter is installed
//! here; a host process that wants Prometheus output installs its own
//! recorder before calling [`register_metrics`].

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};

/// Describe every keywarden metric so exporters list them before first use.
pub fn register_metrics() {
    describe_counter!(
        "keywarden_security_events_total",
        Unit::Count,
        "Security events recorded, by kind and severity"
    );
    describe_counter!(
        "keywarden_secrets_cache_hits_total",
        Unit::Count,
        "Secret reads answered from a fresh cache entry"
    );
    describe_counter!(
        "keywarden_secrets_cache_misses_total",
        Unit::Count,
        "Secret reads that needed the external store"
    );
    describe_counter!(
        "keywarden_secrets_cache_stale_served_total",
        Unit::Count,
        "Secret reads answered from an expired entry while the store was unavailable"
    );
    describe_counter!(
        "keywarden_key_rotations_total",
        Unit::Count,
        "Key rotation attempts, by key type and outcome"
    );
    describe_counter!("keywarden_tokens_issued_total", Unit::Count, "Tokens issued, by class");
    describe_counter!(
        "keywarden_token_validations_total",
        Unit::Count,
        "Token validations, by outcome"
    );
    describe_counter!(
        "keywarden_webhook_rejections_total",
        Unit::Count,
        "Rejected rotation webhooks, by reason"
    );
    describe_gauge!(
        "keywarden_secrets_breaker_open",
        Unit::Count,
        "1 while the secrets circuit breaker is open"
    );
}

pub fn record_security_event(kind: &str, severity: &str) {
    let labels = [("kind", kind.to_string()), ("severity", severity.to_string())];
    counter!("keywarden_security_events_total", &labels).increment(1);
}

pub fn record_cache_hit() {
    counter!("keywarden_secrets_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("keywarden_secrets_cache_misses_total").increment(1);
}

pub fn record_stale_served() {
    counter!("keywarden_secrets_cache_stale_served_total").increment(1);
}

pub fn set_breaker_open(open: bool) {
    gauge!("keywarden_secrets_breaker_open").set(if open { 1.0 } else { 0.0 });
}

pub fn record_rotation(key_type: &str, outcome: &str) {
    let labels = [("key_type", key_type.to_string()), ("outcome", outcome.to_string())];
    counter!("keywarden_key_rotations_total", &labels).increment(1);
}

pub fn record_token_issued(class: &str) {
    let labels = [("class", class.to_string())];
    counter!("keywarden_tokens_issued_total", &labels).increment(1);
}

pub fn record_token_validation(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!("keywarden_token_validations_total", &labels).increment(1);
}

pub fn record_webhook_rejection(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!("keywarden_webhook_rejections_total", &labels).increment(1);
}
