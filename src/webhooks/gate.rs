//! Authentication of inbound key-rotation webhooks.
//!
//! A delivery must pass, in order: the transport bearer token, the payload
//! size limit, the timestamp skew check, the HMAC over timestamp and body,
//! the nonce replay cache and the per-source rate limit. Every rejection is
//! recorded as a security event; only an accepted delivery may reach the
//! key rotation service.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::rate_limit::SlidingWindowLimiter;
use super::replay::NonceCache;
use super::signature::verify_signature;
use crate::clock::SharedClock;
use crate::config::{SecretsConfig, WebhookConfig};
use crate::crypto;
use crate::errors::Result;
use crate::monitor::{SecurityEventKind, SecurityLog};
use crate::observability::metrics;
use crate::secrets::SecretsClient;

pub const SIGNATURE_HEADER: &str = "x-keywarden-signature";
pub const TIMESTAMP_HEADER: &str = "x-keywarden-timestamp";

const MAX_NONCE_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub max_payload_bytes: usize,
    pub tolerance: Duration,
    pub replay_ttl: Duration,
    pub rate_limit_per_hour: u32,
    pub default_source: String,
    pub hmac_path: String,
    pub bearer_path: String,
}

impl WebhookSettings {
    pub fn from_config(webhook: &WebhookConfig, secrets: &SecretsConfig) -> Self {
        Self {
            max_payload_bytes: webhook.max_payload_bytes,
            tolerance: webhook.tolerance(),
            // a nonce must outlive every timestamp that could still pass the skew check
            replay_ttl: webhook.replay_ttl().max(webhook.tolerance() * 2),
            rate_limit_per_hour: webhook.rate_limit_per_hour,
            default_source: webhook.default_source.clone(),
            hmac_path: secrets.webhook_hmac_path.clone(),
            bearer_path: secrets.webhook_bearer_path.clone(),
        }
    }
}

/// Raw delivery as received on the wire.
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    pub bearer: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub payload: &'a [u8],
}

/// JSON body of a rotation notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    pub nonce: String,
    #[serde(default)]
    pub source: Option<String>,
    /// Secret path that changed, when the store reports it
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// A delivery that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedWebhook {
    pub notification: WebhookNotification,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload_hash: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    Unauthorized,
    PayloadTooLarge,
    StalePayload,
    InvalidSignature,
    ReplayDetected,
    RateLimited,
    Malformed,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Unauthorized => "unauthorized",
            RejectionReason::PayloadTooLarge => "payload_too_large",
            RejectionReason::StalePayload => "stale_payload",
            RejectionReason::InvalidSignature => "invalid_signature",
            RejectionReason::ReplayDetected => "replay_detected",
            RejectionReason::RateLimited => "rate_limited",
            RejectionReason::Malformed => "malformed",
        }
    }

    pub fn event_kind(&self) -> SecurityEventKind {
        match self {
            RejectionReason::Unauthorized => SecurityEventKind::WebhookUnauthorized,
            RejectionReason::PayloadTooLarge => SecurityEventKind::PayloadTooLarge,
            RejectionReason::StalePayload => SecurityEventKind::StalePayload,
            RejectionReason::InvalidSignature => SecurityEventKind::InvalidSignature,
            RejectionReason::ReplayDetected => SecurityEventKind::ReplayDetected,
            RejectionReason::RateLimited => SecurityEventKind::RateLimited,
            RejectionReason::Malformed => SecurityEventKind::MalformedWebhook,
        }
    }
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: RejectionReason,
    /// Id of the security event describing the rejection
    pub incident_id: Uuid,
    pub retry_after_secs: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum GateOutcome {
    Accepted(VerifiedWebhook),
    Rejected(Rejection),
}

impl GateOutcome {
    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            GateOutcome::Accepted(_) => None,
            GateOutcome::Rejected(r) => Some(r.reason),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, GateOutcome::Accepted(_))
    }
}

pub struct WebhookSecurityGate {
    secrets: Arc<SecretsClient>,
    replay: NonceCache,
    limiter: SlidingWindowLimiter,
    clock: SharedClock,
    events: SecurityLog,
    settings: WebhookSettings,
}

impl std::fmt::Debug for WebhookSecurityGate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSecurityGate").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl WebhookSecurityGate {
    pub fn new(
        secrets: Arc<SecretsClient>,
        clock: SharedClock,
        events: SecurityLog,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            secrets,
            replay: NonceCache::new(settings.replay_ttl),
            limiter: SlidingWindowLimiter::per_hour(settings.rate_limit_per_hour),
            clock,
            events,
            settings,
        }
    }

    /// Run every check against one delivery.
    ///
    /// `Err` is reserved for failures on our side, such as the secret store
    /// being unreachable with nothing cached; the delivery itself is then
    /// neither accepted nor counted as hostile.
    #[instrument(skip(self, request), fields(payload_bytes = request.payload.len()))]
    pub async fn verify(&self, request: WebhookRequest<'_>) -> Result<GateOutcome> {
        let now = self.clock.now();

        let expected_bearer = self.secrets.get(&self.settings.bearer_path).await?;
        let bearer_ok = request.bearer.is_some_and(|presented| {
            crypto::constant_time_eq(presented.as_bytes(), expected_bearer.expose_secret().as_bytes())
        });
        if !bearer_ok {
            return Ok(self.reject(RejectionReason::Unauthorized, "bearer token missing or wrong", None, None));
        }

        if request.payload.len() > self.settings.max_payload_bytes {
            let detail = format!("{} bytes exceeds {}", request.payload.len(), self.settings.max_payload_bytes);
            return Ok(self.reject(RejectionReason::PayloadTooLarge, &detail, None, None));
        }

        let Some((raw_timestamp, timestamp)) = request.timestamp.and_then(|raw| {
            let raw = raw.trim();
            raw.parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single()).map(|t| (raw, t))
        }) else {
            return Ok(self.reject(RejectionReason::StalePayload, "timestamp missing or unparseable", None, None));
        };
        if (now - timestamp).abs() > self.settings.tolerance {
            let detail = format!("skew of {}s", (now - timestamp).num_seconds());
            return Ok(self.reject(RejectionReason::StalePayload, &detail, None, None));
        }

        let key = self.secrets.get(&self.settings.hmac_path).await?;
        let signature_ok = request.signature.is_some_and(|signature| {
            verify_signature(key.expose_secret().as_bytes(), raw_timestamp, request.payload, signature)
        });
        if !signature_ok {
            return Ok(self.reject(RejectionReason::InvalidSignature, "hmac mismatch", None, None));
        }

        let notification = match serde_json::from_slice::<WebhookNotification>(request.payload) {
            Ok(n) if !n.nonce.is_empty() && n.nonce.len() <= MAX_NONCE_LEN => n,
            Ok(_) => return Ok(self.reject(RejectionReason::Malformed, "nonce missing or too long", None, None)),
            Err(e) => return Ok(self.reject(RejectionReason::Malformed, &e.to_string(), None, None)),
        };
        let source = notification
            .source
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_source.clone());

        if !self.replay.insert(&notification.nonce, now) {
            return Ok(self.reject(
                RejectionReason::ReplayDetected,
                "nonce already seen",
                Some(&source),
                None,
            ));
        }

        if let Err(retry_after) = self.limiter.check(&source, now) {
            // The sender may retry this delivery after `Retry-After`.
            self.replay.release(&notification.nonce);
            return Ok(self.reject(
                RejectionReason::RateLimited,
                "hourly budget exhausted",
                Some(&source),
                Some(retry_after),
            ));
        }

        let payload_hash = crypto::sha256_hex(request.payload);
        info!(source = %source, payload_hash = %payload_hash, "Webhook accepted");
        Ok(GateOutcome::Accepted(VerifiedWebhook {
            notification,
            source,
            timestamp,
            payload_hash,
            processed_at: now,
        }))
    }

    fn reject(
        &self,
        reason: RejectionReason,
        detail: &str,
        source: Option<&str>,
        retry_after_secs: Option<u32>,
    ) -> GateOutcome {
        let mut event = self.events.event(reason.event_kind()).with("detail", detail);
        if let Some(source) = source {
            event = event.with("source", source);
        }
        let incident_id = self.events.record(event);
        metrics::record_webhook_rejection(reason.as_str());
        warn!(reason = %reason, incident_id = %incident_id, "Webhook rejected");
        GateOutcome::Rejected(Rejection { reason, incident_id, retry_after_secs })
    }

    /// Drop expired nonces and idle rate-limit windows.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.replay.purge_expired(now) + self.limiter.prune(now)
    }

    pub fn settings(&self) -> &WebhookSettings {
        &self.settings
    }
}
