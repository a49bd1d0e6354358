//! # Webhooks
//!
//! Verification of rotation notifications pushed by the external secret
//! store before they may trigger a key reload.

pub mod gate;
pub mod rate_limit;
pub mod replay;
pub mod signature;

pub use gate::{
    GateOutcome, Rejection, RejectionReason, VerifiedWebhook, WebhookNotification, WebhookRequest,
    WebhookSecurityGate, WebhookSettings, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
pub use rate_limit::SlidingWindowLimiter;
pub use replay::NonceCache;
pub use signature::{compute_signature, verify_signature};
