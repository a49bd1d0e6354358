//! # Security Monitoring
//!
//! The append-only security event log, its persistence writer, and the
//! monitor that reports health and exposes incident-response controls.

pub mod events;
pub mod log;
pub mod service;
pub mod writer;

pub use events::{EventParseError, SecurityEvent, SecurityEventKind, Severity};
pub use log::SecurityLog;
pub use service::{
    CacheScope, InvalidationReport, MonitorStatus, SecretsStatus, SecurityMonitor, REASON_CONTAINMENT,
};
pub use writer::{SecurityEventRepository, SecurityEventWriter};
