use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use sae_types::api::LoginTokens;
use sae_types::models::Session;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::token::is_token_expired;
use crate::token_store::{ACCESS_TOKEN_KEY, ListenerId, RELOAD_PENDING_KEY, TokenStore};

/// Default page-level deadline for resolving the initial session.
pub const BOOTSTRAP_DEADLINE: Duration = Duration::from_secs(15);

pub type RefreshError = Box<dyn std::error::Error + Send + Sync>;

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<LoginTokens, RefreshError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stored session.
    Anonymous,
    Valid,
    Refreshing,
    /// Refresh failed. The user has to log in again.
    Failed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no stored session")]
    NoSession,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("auth service unavailable, retry in {0:?}")]
    CircuitOpen(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Authenticated(String),
    Anonymous,
    Failed(String),
    /// The deadline passed. The resolution keeps running in the background.
    TimedOut,
}

/// Keeps one tab's access token usable.
///
/// `get_valid_token` returns the stored token while it is fresh, otherwise
/// refreshes it once through the circuit breaker. Concurrent callers wait
/// for the same refresh.
pub struct SessionManager {
    store: TokenStore,
    refresher: Arc<dyn TokenRefresher>,
    breaker: CircuitBreaker,
    state: Arc<watch::Sender<SessionState>>,
    refresh_lock: Mutex<()>,
    tab_listener: ListenerId,
}

impl SessionManager {
    pub fn new(store: TokenStore, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_breaker(store, refresher, CircuitBreaker::default())
    }

    pub fn with_breaker(
        store: TokenStore,
        refresher: Arc<dyn TokenRefresher>,
        breaker: CircuitBreaker,
    ) -> Self {
        let initial = match store.load_session() {
            Some(s) if !is_token_expired(&s.access_token) => SessionState::Valid,
            Some(s) if s.reload_pending => SessionState::Failed,
            Some(_) => SessionState::Valid,
            None => SessionState::Anonymous,
        };
        let state = Arc::new(watch::Sender::new(initial));

        // Follow logins and logouts performed in other tabs.
        let tab_state = state.clone();
        let tab_listener = store.add_listener(ACCESS_TOKEN_KEY, move |event| {
            let next = match &event.new_value {
                Some(token) if !is_token_expired(token) => SessionState::Valid,
                Some(_) => return,
                None => SessionState::Anonymous,
            };
            debug!("session state from tab {}: {:?}", event.origin, next);
            tab_state.send_replace(next);
        });

        Self {
            store,
            refresher,
            breaker,
            state,
            refresh_lock: Mutex::new(()),
            tab_listener,
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Persist a fresh login and mark the bot flow complete.
    pub fn complete_login(&self, tokens: LoginTokens) {
        self.store.save_session(&Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            login_complete: true,
            reload_pending: false,
        });
        self.set_state(SessionState::Valid);
        info!("login complete for tab {}", self.store.tab_id());
    }

    pub fn logout(&self) {
        self.store.clear_auth_storage();
        self.set_state(SessionState::Anonymous);
    }

    /// A usable access token, refreshing it if it has expired.
    pub async fn get_valid_token(&self) -> Result<String, SessionError> {
        let Some(session) = self.store.load_session() else {
            self.set_state(SessionState::Anonymous);
            return Err(SessionError::NoSession);
        };

        if !is_token_expired(&session.access_token) {
            if self.state() != SessionState::Valid {
                self.set_state(SessionState::Valid);
            }
            return Ok(session.access_token);
        }

        self.refresh().await
    }

    /// Refresh the stored session if its access token has expired. Callers
    /// queued behind a running refresh get the token it stored.
    pub async fn refresh(&self) -> Result<String, SessionError> {
        let _guard = self.refresh_lock.lock().await;

        let Some(session) = self.store.load_session() else {
            self.set_state(SessionState::Anonymous);
            return Err(SessionError::NoSession);
        };
        if !is_token_expired(&session.access_token) {
            self.set_state(SessionState::Valid);
            return Ok(session.access_token);
        }

        self.set_state(SessionState::Refreshing);
        let refresher = self.refresher.clone();
        let refresh_token = session.refresh_token.clone();

        let result = self
            .breaker
            .execute("token-refresh", || async move { refresher.refresh(&refresh_token).await })
            .await;

        match result {
            Ok(tokens) => {
                self.store.save_session(&Session {
                    access_token: tokens.access_token.clone(),
                    refresh_token: tokens.refresh_token,
                    login_complete: session.login_complete,
                    reload_pending: false,
                });
                self.set_state(SessionState::Valid);
                debug!("access token refreshed");
                Ok(tokens.access_token)
            }
            Err(e) => {
                warn!("token refresh failed: {}", e);
                self.store.set_flag(RELOAD_PENDING_KEY, true);
                self.set_state(SessionState::Failed);
                Err(match e {
                    BreakerError::Open { retry_in, .. } => SessionError::CircuitOpen(retry_in),
                    other => SessionError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    /// Resolve the initial session, giving up after `deadline`.
    ///
    /// Work still running at the deadline is left to finish in the
    /// background so its result still lands in storage.
    pub async fn bootstrap(self: &Arc<Self>, deadline: Duration) -> BootstrapOutcome {
        let manager = self.clone();
        let work = tokio::spawn(async move { manager.get_valid_token().await });

        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(Ok(token))) => BootstrapOutcome::Authenticated(token),
            Ok(Ok(Err(SessionError::NoSession))) => BootstrapOutcome::Anonymous,
            Ok(Ok(Err(e))) => BootstrapOutcome::Failed(e.to_string()),
            Ok(Err(join)) => BootstrapOutcome::Failed(join.to_string()),
            Err(_) => {
                warn!("session bootstrap exceeded {:?}, continuing without it", deadline);
                BootstrapOutcome::TimedOut
            }
        }
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("session state {:?} -> {:?}", prev, next);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.store.remove_listener(self.tab_listener);
    }
}
