//! Internal HTTP endpoints that sit beside the hosted database: deep-link bot
//! login, per-user password derivation, diagnostics and the dev fake login.

pub mod config;
pub mod dev;
pub mod diagnostics;
pub mod login;
pub mod password;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use sae_client::{ClientError, RestClient};
use sae_session::{Deduplicator, RateLimiter};

use crate::config::ServerConfig;

/// Upstream calls per endpoint per second, shared by every browser.
const UPSTREAM_REQUESTS_PER_SECOND: usize = 200;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub client: RestClient,
    pub config: ServerConfig,
}

impl AppStateInner {
    /// Completed reads are never reused here since login status is polled.
    pub fn new(config: ServerConfig) -> anyhow::Result<AppState> {
        let dedup = Deduplicator::new(
            RateLimiter::new(UPSTREAM_REQUESTS_PER_SECOND, Duration::from_secs(1)),
            Duration::ZERO,
        );
        let client = RestClient::with_deduplicator(config.client.clone(), dedup)?;
        Ok(Arc::new(Self { client, config }))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/create-login-token", post(login::create_login_token))
        .route("/api/check-login", get(login::check_login_query).post(login::check_login_body))
        .route("/api/get-user-password", post(password::get_user_password))
        .route("/api/diagnostics", get(diagnostics::diagnostics))
        .route("/api/fake-login", post(dev::fake_login))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Status for a failed call to the hosted database.
pub(crate) fn upstream_status(context: &str, e: ClientError) -> StatusCode {
    error!("{}: {}", context, e);
    match e {
        ClientError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ClientError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ClientError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::BAD_GATEWAY,
    }
}
