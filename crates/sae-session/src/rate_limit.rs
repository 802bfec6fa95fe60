use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded for {endpoint}: more than {max} requests per {window:?}")]
pub struct RateLimitExceeded {
    pub endpoint: String,
    pub max: usize,
    pub window: Duration,
}

/// Sliding-window limiter keyed by endpoint (method + path).
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request to `method path`, or refuse it if the window is full.
    pub fn check(&self, method: &str, path: &str) -> Result<(), RateLimitExceeded> {
        let endpoint = format!("{} {}", method.to_ascii_uppercase(), path);
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());

        let window = hits.entry(endpoint.clone()).or_default();
        while window.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            window.pop_front();
        }

        if window.len() >= self.max_requests {
            let count = window.len();
            warn!("throttling {}: {} requests in the last {:?}", endpoint, count, self.window);
            return Err(RateLimitExceeded {
                endpoint,
                max: self.max_requests,
                window: self.window,
            });
        }

        window.push_back(now);
        self.prune(&mut hits, now);
        Ok(())
    }

    /// Number of endpoints with requests still inside the window.
    pub fn tracked_endpoints(&self) -> usize {
        self.hits.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Forget endpoints whose windows have emptied.
    fn prune(&self, hits: &mut HashMap<String, VecDeque<Instant>>, now: Instant) {
        hits.retain(|_, window| {
            window.back().is_some_and(|t| now.duration_since(*t) < self.window)
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}
