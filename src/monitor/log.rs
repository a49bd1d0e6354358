//! Append-only security event log.
//!
//! Every component writes through a cloned [`SecurityLog`] handle. Each
//! event is emitted as a tracing event at a level matching its severity,
//! counted in metrics, kept in a bounded in-memory ring for status reports
//! and, when a writer is attached, queued for persistence.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::{SecurityEvent, SecurityEventKind, Severity};
use crate::clock::SharedClock;
use crate::observability::metrics;

struct Inner {
    clock: SharedClock,
    capacity: usize,
    recent: Mutex<VecDeque<SecurityEvent>>,
    totals: DashMap<SecurityEventKind, u64>,
    sink: OnceLock<mpsc::Sender<SecurityEvent>>,
}

#[derive(Clone)]
pub struct SecurityLog {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SecurityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLog")
            .field("capacity", &self.inner.capacity)
            .field("persisting", &self.inner.sink.get().is_some())
            .finish()
    }
}

impl SecurityLog {
    pub fn new(clock: SharedClock, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                capacity: capacity.max(1),
                recent: Mutex::new(VecDeque::new()),
                totals: DashMap::new(),
                sink: OnceLock::new(),
            }),
        }
    }

    /// Attach the persistence queue. Only the first call takes effect.
    pub fn attach_sink(&self, sink: mpsc::Sender<SecurityEvent>) {
        if self.inner.sink.set(sink).is_err() {
            tracing::warn!("Security event sink already attached; ignoring second sink");
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Start an event stamped with the log's clock.
    pub fn event(&self, kind: SecurityEventKind) -> SecurityEvent {
        SecurityEvent::new(kind, self.now())
    }

    /// Record an event and return its id, which doubles as the incident id
    /// handed back to clients.
    pub fn record(&self, event: SecurityEvent) -> Uuid {
        let id = event.id;
        emit_trace(&event);
        metrics::record_security_event(event.kind.as_str(), event.severity.as_str());
        *self.inner.totals.entry(event.kind).or_insert(0) += 1;

        if let Some(sink) = self.inner.sink.get() {
            if let Err(e) = sink.try_send(event.clone()) {
                tracing::warn!(event_id = %id, error = %e, "Security event not queued for persistence");
            }
        }

        let mut recent = self.inner.recent.lock().unwrap_or_else(|p| p.into_inner());
        if recent.len() == self.inner.capacity {
            recent.pop_front();
        }
        recent.push_back(event);
        id
    }

    /// Shorthand for an event with default severity and the given metadata.
    pub fn record_kind<'a>(
        &self,
        kind: SecurityEventKind,
        metadata: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Uuid {
        let mut event = self.event(kind);
        for (key, value) in metadata {
            event.metadata.insert(key.to_string(), value);
        }
        self.record(event)
    }

    /// Total events of `kind` recorded since start.
    pub fn count(&self, kind: SecurityEventKind) -> u64 {
        self.inner.totals.get(&kind).map(|v| *v).unwrap_or(0)
    }

    /// Counts by severity among buffered events at or after `since`.
    pub fn counts_by_severity(&self, since: DateTime<Utc>) -> BTreeMap<Severity, u64> {
        let mut counts: BTreeMap<Severity, u64> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
        let recent = self.inner.recent.lock().unwrap_or_else(|p| p.into_inner());
        for event in recent.iter().filter(|e| e.timestamp >= since) {
            *counts.entry(event.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let recent = self.inner.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent.iter().rev().take(limit).cloned().collect()
    }
}

fn emit_trace(event: &SecurityEvent) {
    let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
    match event.severity {
        Severity::Low => tracing::info!(
            event_id = %event.id,
            kind = %event.kind,
            severity = %event.severity,
            metadata = %metadata,
            "security event"
        ),
        Severity::Medium => tracing::warn!(
            event_id = %event.id,
            kind = %event.kind,
            severity = %event.severity,
            metadata = %metadata,
            "security event"
        ),
        Severity::High | Severity::Critical => tracing::error!(
            event_id = %event.id,
            kind = %event.kind,
            severity = %event.severity,
            metadata = %metadata,
            "security event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration;

    #[test]
    fn test_counts_and_ring_capacity() {
        let clock = ManualClock::starting_now();
        let log = SecurityLog::new(clock.clone(), 2);

        log.record_kind(SecurityEventKind::ReplayDetected, []);
        log.record_kind(SecurityEventKind::ReplayDetected, [("source", "vault".to_string())]);
        log.record_kind(SecurityEventKind::CircuitOpened, []);

        assert_eq!(log.count(SecurityEventKind::ReplayDetected), 2);
        assert_eq!(log.recent(10).len(), 2);
        assert_eq!(log.recent(10)[0].kind, SecurityEventKind::CircuitOpened);
    }

    #[test]
    fn test_counts_by_severity_window() {
        let clock = ManualClock::starting_now();
        let log = SecurityLog::new(clock.clone(), 16);

        log.record_kind(SecurityEventKind::RefreshTokenReuse, []);
        clock.advance(Duration::hours(2));
        let cutoff = clock.now() - Duration::hours(1);
        log.record_kind(SecurityEventKind::CircuitOpened, []);

        let counts = log.counts_by_severity(cutoff);
        assert_eq!(counts[&Severity::Critical], 0);
        assert_eq!(counts[&Severity::Medium], 1);
        assert_eq!(counts[&Severity::Low], 0);
    }

    #[tokio::test]
    async fn test_events_are_forwarded_to_sink() {
        let log = SecurityLog::new(ManualClock::starting_now(), 16);
        let (tx, mut rx) = mpsc::channel(4);
        log.attach_sink(tx);

        let id = log.record_kind(SecurityEventKind::KeyRotated, []);
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.id, id);
    }
}
