//! Circuit breaker guarding the external secret store.
//!
//! `Closed` lets every call through and counts consecutive failures inside a
//! sliding window. Reaching the threshold opens the breaker. While `Open` no
//! call is attempted until the cool-down elapses; the next caller then
//! becomes the single half-open trial. A successful trial closes the
//! breaker, a failed one re-opens it for another cool-down.
//!
//! A trial whose caller was cancelled never reports an outcome. Dropping its
//! [`CallPermit`] frees the trial slot, and a trial older than the cool-down
//! is considered abandoned.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// State change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened { from: BreakerState, failures: usize },
    Closed,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    trial_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: usize,
    window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window: std::time::Duration, cooldown: std::time::Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
                trial_started_at: None,
            }),
            threshold: threshold.max(1) as usize,
            window: Duration::from_std(window).unwrap_or(Duration::seconds(60)),
            cooldown: Duration::from_std(cooldown).unwrap_or(Duration::seconds(30)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a network call may be attempted now. In the half-open state
    /// only one caller gets `true` until its outcome is recorded or its
    /// permit is dropped; a trial older than the cool-down is replaced.
    pub fn allow_request(&self, now: DateTime<Utc>) -> bool {
        self.admit(now).is_some()
    }

    /// Like [`allow_request`](Self::allow_request), returning a permit that
    /// releases a half-open trial slot if dropped without an outcome.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Option<CallPermit<'_>> {
        self.admit(now).map(|trial| CallPermit { breaker: self, trial, settled: false })
    }

    /// `Some(is_trial)` when a call may go out.
    fn admit(&self, now: DateTime<Utc>) -> Option<bool> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Some(false),
            BreakerState::Open => {
                let cooled = inner.opened_at.map(|at| now - at >= self.cooldown).unwrap_or(true);
                if !cooled {
                    return None;
                }
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                inner.trial_started_at = Some(now);
                Some(true)
            }
            BreakerState::HalfOpen => {
                let abandoned = inner.trial_started_at.map(|at| now - at >= self.cooldown).unwrap_or(true);
                if inner.trial_in_flight && !abandoned {
                    return None;
                }
                inner.trial_in_flight = true;
                inner.trial_started_at = Some(now);
                Some(true)
            }
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
            inner.trial_started_at = None;
        }
    }

    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.lock();
        inner.failures.clear();
        inner.trial_in_flight = false;
        inner.trial_started_at = None;
        if inner.state == BreakerState::Closed {
            return None;
        }
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        Some(Transition::Closed)
    }

    pub fn record_failure(&self, now: DateTime<Utc>) -> Option<Transition> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                inner.trial_started_at = None;
                Some(Transition::Opened { from: BreakerState::HalfOpen, failures: 1 })
            }
            BreakerState::Open => None,
            BreakerState::Closed => {
                let window_start = now - self.window;
                while inner.failures.front().is_some_and(|at| *at < window_start) {
                    inner.failures.pop_front();
                }
                inner.failures.push_back(now);
                if inner.failures.len() >= self.threshold {
                    let failures = inner.failures.len();
                    inner.failures.clear();
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    Some(Transition::Opened { from: BreakerState::Closed, failures })
                } else {
                    None
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// When the breaker last opened, if it is not closed.
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.lock().opened_at
    }
}

/// One admitted store call. Settle it with [`succeeded`](Self::succeeded) or
/// [`failed`](Self::failed).
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn succeeded(mut self) -> Option<Transition> {
        self.settled = true;
        self.breaker.record_success()
    }

    pub fn failed(mut self, now: DateTime<Utc>) -> Option<Transition> {
        self.settled = true;
        self.breaker.record_failure(now)
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, StdDuration::from_secs(60), StdDuration::from_secs(30))
    }

    #[test]
    fn test_opens_after_threshold_within_window() {
        let b = breaker();
        let t0 = Utc::now();
        assert_eq!(b.record_failure(t0), None);
        assert_eq!(b.record_failure(t0 + Duration::seconds(1)), None);
        assert_eq!(
            b.record_failure(t0 + Duration::seconds(2)),
            Some(Transition::Opened { from: BreakerState::Closed, failures: 3 })
        );
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow_request(t0 + Duration::seconds(10)));
    }

    #[test]
    fn test_failures_outside_window_do_not_count() {
        let b = breaker();
        let t0 = Utc::now();
        b.record_failure(t0);
        b.record_failure(t0 + Duration::seconds(1));
        assert_eq!(b.record_failure(t0 + Duration::seconds(120)), None);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let b = breaker();
        let t0 = Utc::now();
        b.record_failure(t0);
        b.record_failure(t0);
        assert_eq!(b.record_success(), None);
        assert_eq!(b.record_failure(t0), None);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_single_half_open_trial_call() {
        let b = breaker();
        let t0 = Utc::now();
        for _ in 0..3 {
            b.record_failure(t0);
        }

        let after = t0 + Duration::seconds(31);
        assert!(b.allow_request(after));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.allow_request(after));

        assert_eq!(b.record_success(), Some(Transition::Closed));
        assert!(b.allow_request(after));
    }

    #[test]
    fn test_failed_trial_call_reopens() {
        let b = breaker();
        let t0 = Utc::now();
        for _ in 0..3 {
            b.record_failure(t0);
        }
        let trial_at = t0 + Duration::seconds(31);
        assert!(b.allow_request(trial_at));
        assert!(matches!(
            b.record_failure(trial_at),
            Some(Transition::Opened { from: BreakerState::HalfOpen, .. })
        ));
        assert!(!b.allow_request(trial_at + Duration::seconds(5)));
        assert!(b.allow_request(trial_at + Duration::seconds(30)));
    }

    fn opened(b: &CircuitBreaker, at: DateTime<Utc>) {
        for _ in 0..3 {
            b.record_failure(at);
        }
    }

    #[test]
    fn test_dropped_trial_permit_frees_the_slot() {
        let b = breaker();
        let t0 = Utc::now();
        opened(&b, t0);

        let after = t0 + Duration::seconds(31);
        let permit = b.try_acquire(after).unwrap();
        assert!(b.try_acquire(after).is_none());
        drop(permit);

        assert_eq!(b.state(), BreakerState::HalfOpen);
        let trial = b.try_acquire(after).unwrap();
        assert_eq!(trial.succeeded(), Some(Transition::Closed));
    }

    #[test]
    fn test_abandoned_trial_call_expires_after_cooldown() {
        let b = breaker();
        let t0 = Utc::now();
        opened(&b, t0);

        let trial_at = t0 + Duration::seconds(31);
        assert!(b.allow_request(trial_at));
        assert!(!b.allow_request(trial_at + Duration::seconds(29)));
        assert!(b.allow_request(trial_at + Duration::seconds(30)));
        assert!(b.allow_request(trial_at + Duration::days(1)));
    }

    #[test]
    fn test_closed_permit_drop_is_neutral() {
        let b = breaker();
        let t0 = Utc::now();
        drop(b.try_acquire(t0).unwrap());
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.record_failure(t0), None);
        assert_eq!(b.record_failure(t0), None);
    }
}
