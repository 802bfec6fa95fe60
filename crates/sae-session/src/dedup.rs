use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::debug;

use crate::rate_limit::{RateLimitExceeded, RateLimiter};

/// A request future that every identical caller awaits.
pub type SharedRequest<T> = Shared<BoxFuture<'static, T>>;

/// Identity of a request: method, full URL and serialized body.
///
/// `scope` separates otherwise identical requests made with different
/// credentials or headers. It is empty unless set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
    pub body: String,
    pub scope: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &str, body: Option<&str>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            body: body.unwrap_or_default().to_string(),
            scope: String::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// URL path without scheme, host or query. Rate limiting is per path.
    pub fn path(&self) -> &str {
        let without_query = self.url.split(['?', '#']).next().unwrap_or_default();
        match without_query.find("://") {
            Some(idx) => {
                let rest = &without_query[idx + 3..];
                rest.find('/').map(|slash| &rest[slash..]).unwrap_or("/")
            }
            None => without_query,
        }
    }
}

struct Entry<T> {
    generation: u64,
    request: SharedRequest<T>,
}

type Inflight<T> = Arc<Mutex<HashMap<RequestKey, Entry<T>>>>;

/// Collapses identical concurrent requests into one.
///
/// Completed requests stay cached for `eviction_delay` so callers arriving
/// right after completion reuse the result. A zero delay only joins requests
/// that are still in flight.
pub struct Deduplicator<T> {
    inflight: Inflight<T>,
    limiter: RateLimiter,
    eviction_delay: Duration,
    next_generation: AtomicU64,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(limiter: RateLimiter, eviction_delay: Duration) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            limiter,
            eviction_delay,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Join the matching in-flight request, or start one with `make`.
    ///
    /// `make` only runs (and the rate limiter is only consulted) when no
    /// identical request is cached.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run<F, Fut>(
        &self,
        key: RequestKey,
        make: F,
    ) -> Result<SharedRequest<T>, RateLimitExceeded>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut inflight = lock(&self.inflight);

        if let Some(entry) = inflight.get(&key) {
            debug!("joining in-flight {} {}", key.method, key.url);
            return Ok(entry.request.clone());
        }

        self.limiter.check(&key.method, key.path())?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let request = make();
        let cache = self.inflight.clone();
        let evict_key = key.clone();
        let delay = self.eviction_delay;

        // The request runs in its own task so it completes and gets evicted
        // even when every caller stops waiting.
        let task = tokio::spawn(async move {
            let output = request.await;
            let evict = move || {
                let mut inflight = lock(&cache);
                if inflight.get(&evict_key).is_some_and(|e| e.generation == generation) {
                    inflight.remove(&evict_key);
                }
            };
            if delay.is_zero() {
                evict();
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    evict();
                });
            }
            output
        });

        let shared = async move {
            match task.await {
                Ok(output) => output,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => panic!("deduplicated request cancelled: {}", e),
            }
        }
        .boxed()
        .shared();

        inflight.insert(
            key,
            Entry {
                generation,
                request: shared.clone(),
            },
        );
        Ok(shared)
    }

    /// Number of cached (in-flight or recently completed) requests.
    pub fn len(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.inflight).clear();
    }

    /// Drop cached entries matching `predicate`, e.g. reads of a table that
    /// was just written. Callers already holding the future are unaffected.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&RequestKey) -> bool,
    {
        let mut inflight = lock(&self.inflight);
        let before = inflight.len();
        inflight.retain(|key, _| !predicate(key));
        before - inflight.len()
    }
}

impl<T> Default for Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(RateLimiter::default(), Duration::from_secs(5))
    }
}

type InflightGuard<'a, T> = std::sync::MutexGuard<'a, HashMap<RequestKey, Entry<T>>>;

fn lock<T>(inflight: &Inflight<T>) -> InflightGuard<'_, T> {
    inflight.lock().unwrap_or_else(|e| e.into_inner())
}
