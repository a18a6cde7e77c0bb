//! Sliding-window request accounting per chat identity.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Point-in-time view of one identity's budget, used for throttle notices
/// and the `stats` command.
#[derive(Debug, Clone, Copy)]
pub struct RateStats {
    pub used: usize,
    pub limit: usize,
    pub window: Duration,
}

/// Per-identity rate limiter.
///
/// Keeps the timestamps of recent allowed requests in a sliding window.
/// Entries are created lazily on first use and trimmed on every check, so
/// idle identities cost nothing. Denial is an outcome, not an error.
#[derive(Clone)]
pub struct RateLimiter {
    requests: DashMap<String, Vec<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        RateLimiter {
            requests: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Whether `identity` may act right now. Records the action when
    /// allowed. A timestamp exactly one window old has expired: the
    /// boundary belongs to the new window.
    pub fn allow(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.requests.entry(identity.to_string()).or_default();

        entry.retain(|&time| now.duration_since(time) < self.window);

        if entry.len() >= self.max_requests {
            false
        } else {
            entry.push(now);
            true
        }
    }

    /// Current usage for one identity.
    pub fn stats(&self, identity: &str) -> RateStats {
        let now = Instant::now();
        let used = self
            .requests
            .get(identity)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|&&time| now.duration_since(time) < self.window)
                    .count()
            })
            .unwrap_or(0);
        RateStats {
            used,
            limit: self.max_requests,
            window: self.window,
        }
    }

    /// Operator action: forget one identity's history.
    pub fn reset(&self, identity: &str) {
        self.requests.remove(identity);
    }

    /// Operator action: forget everything.
    pub fn reset_all(&self) {
        self.requests.clear();
    }

    /// Drop identities whose whole window has expired, so the map does not
    /// grow with every sender ever seen. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.requests.len();
        self.requests
            .retain(|_, times| times.iter().any(|&time| now.duration_since(time) < self.window));
        before - self.requests.len()
    }
}
