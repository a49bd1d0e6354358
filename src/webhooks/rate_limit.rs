//! Sliding-window rate limiting per webhook source.
//!
//! Each source keeps the timestamps of its accepted requests inside the
//! window. A request is allowed while fewer than `limit` remain; otherwise
//! the caller learns how long until the oldest one leaves the window.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    limit: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// `limit` requests per `window` for every key.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { windows: Mutex::new(HashMap::new()), limit, window }
    }

    pub fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::hours(1))
    }

    /// Record a request from `key` at `now` if the budget allows it.
    ///
    /// Returns `Err(retry_after_secs)` when the window is full.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> Result<(), u32> {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let hits = windows.entry(key.to_string()).or_default();
        while hits.front().is_some_and(|at| *at <= now - self.window) {
            hits.pop_front();
        }

        if hits.len() < self.limit as usize {
            hits.push_back(now);
            debug!(key = %key, used = hits.len(), limit = self.limit, "Rate limit check passed");
            return Ok(());
        }

        let retry_after = hits
            .front()
            .map(|oldest| (*oldest + self.window - now).num_seconds().max(1))
            .unwrap_or(1);
        warn!(key = %key, retry_after_seconds = retry_after, "Rate limit exceeded");
        Err(retry_after as u32)
    }

    /// Forget keys with no request inside the window.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let before = windows.len();
        windows.retain(|_, hits| hits.back().is_some_and(|at| *at > now - self.window));
        before - windows.len()
    }
}
