//! Client-side session layer.
//!
//! - [`token_store::TokenStore`]: named auth keys over a shared storage backend,
//!   with cross-tab change notification through [`bus::StorageBus`].
//! - [`breaker::CircuitBreaker`]: stops calling a flaky auth dependency for a
//!   cooldown after repeated failures.
//! - [`dedup::Deduplicator`] and [`rate_limit::RateLimiter`]: one network call per
//!   identical in-flight request, bounded per endpoint.
//! - [`token`]: bearer token inspection.
//! - [`manager::SessionManager`]: valid → refreshing → valid | failed.
//!
//! Nothing here is a global. Build the pieces and hand them to whoever needs them.

pub mod breaker;
pub mod bus;
pub mod dedup;
pub mod manager;
pub mod rate_limit;
pub mod token;
pub mod token_store;

pub use breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use bus::StorageBus;
pub use dedup::{Deduplicator, RequestKey};
pub use manager::{BootstrapOutcome, SessionError, SessionManager, SessionState, TokenRefresher};
pub use rate_limit::{RateLimitExceeded, RateLimiter};
pub use token_store::TokenStore;
