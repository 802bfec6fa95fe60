//! Bot login, token refresh and the service-side login token table

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use tracing::{error, info, warn};

use sae_session::manager::RefreshError;
use sae_session::TokenRefresher;
use sae_types::api::{LoginTokenRow, LoginTokens, ProbeResult, TelegramAuthPayload};

use crate::auth::Auth;
use crate::client::{ApiRequest, RestClient, eq};
use crate::error::{ClientError, ClientResult};

pub const LOGIN_TOKENS_TABLE: &str = "telegram_login_tokens";

/// Telegram id used by the forged-login probe.
pub const FORGED_TELEGRAM_ID: i64 = 999_999_999;

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct MarkUsed {
    used: bool,
}

impl RestClient {
    /// Exchange a signed widget payload for a session. The edge function
    /// checks the hash; anything but 2xx is [`ClientError::LoginRejected`].
    pub async fn login_with_telegram(
        &self,
        payload: &TelegramAuthPayload,
    ) -> ClientResult<LoginTokens> {
        let url = self.function_url()?;
        let request = ApiRequest::new(Method::POST, url, Auth::Anon).json(payload)?;
        let raw = self.execute_raw(request).await?;

        if !raw.is_success() {
            warn!("telegram login for {} rejected with {}", payload.id, raw.status);
            return Err(ClientError::LoginRejected {
                status: raw.status,
                body: raw.body,
            });
        }
        let tokens: LoginTokens = serde_json::from_str(&raw.body)?;
        info!("telegram login for {} accepted", payload.id);
        Ok(tokens)
    }

    /// `POST /auth/v1/token?grant_type=refresh_token`. A rejected refresh
    /// token is [`ClientError::AuthExpired`].
    pub async fn refresh_session(&self, refresh_token: &str) -> ClientResult<LoginTokens> {
        if refresh_token.trim().is_empty() {
            return Err(ClientError::Validation("missing refresh token".into()));
        }

        let url = self.auth_url("token", &[("grant_type", "refresh_token")])?;
        let grant = RefreshGrant { refresh_token };
        let request = ApiRequest::new(Method::POST, url, Auth::Anon).json(&grant)?;
        let raw = self.execute_raw(request).await?;

        match raw.status {
            200..=299 => Ok(serde_json::from_str(&raw.body)?),
            400 | 401 => {
                let err = match ClientError::from_response(raw.status, &raw.body) {
                    ClientError::AuthExpired(m) | ClientError::Validation(m) => {
                        ClientError::AuthExpired(m)
                    }
                    other => other,
                };
                error!("token refresh rejected: {}", err);
                Err(err)
            }
            status => {
                let err = ClientError::from_response(status, &raw.body);
                error!("token refresh failed: {}", err);
                Err(err)
            }
        }
    }

    /// Insert a deep-link login token row. Needs the service key.
    pub async fn create_login_token_row(&self, row: &LoginTokenRow) -> ClientResult<LoginTokenRow> {
        let url = self.table_url(LOGIN_TOKENS_TABLE, &[])?;
        let request = ApiRequest::write(Method::POST, url, Auth::Service, row)?;
        let saved = self.execute(request).await?.first_row()?;
        Ok(saved.unwrap_or_else(|| row.clone()))
    }

    pub async fn get_login_token_row(&self, token: &str) -> ClientResult<Option<LoginTokenRow>> {
        let url = self.table_url(LOGIN_TOKENS_TABLE, &[("token", &eq(token)), ("select", "*")])?;
        self.execute(ApiRequest::get(url, Auth::Service)).await?.first_row()
    }

    /// Flag a login token as redeemed. Only an unused row is updated, so of
    /// two concurrent claims exactly one gets `true`.
    pub async fn mark_login_token_used(&self, token: &str) -> ClientResult<bool> {
        let (token_filter, unused) = (eq(token), eq(false));
        let url =
            self.table_url(LOGIN_TOKENS_TABLE, &[("token", &token_filter), ("used", &unused)])?;
        let patch = MarkUsed { used: true };
        let request = ApiRequest::write(Method::PATCH, url, Auth::Service, &patch)?;
        let claimed: Vec<LoginTokenRow> = self.execute(request).await?.rows()?;
        Ok(!claimed.is_empty())
    }

    /// Whether the REST API answers with the anon key.
    pub async fn health_check(&self) -> ProbeResult {
        let url = match self.table_url("", &[]) {
            Ok(url) => url,
            Err(e) => return probe_error(e),
        };
        match self.execute_raw(ApiRequest::get(url, Auth::Anon)).await {
            Ok(raw) => ProbeResult {
                ok: raw.is_success(),
                status: Some(raw.status),
                detail: if raw.is_success() {
                    "REST API reachable".into()
                } else {
                    ClientError::from_response(raw.status, &raw.body).to_string()
                },
            },
            Err(e) => probe_error(e),
        }
    }

    /// Send a payload with a bogus hash. A correctly configured login
    /// function answers 401.
    pub async fn probe_forged_login(&self) -> ProbeResult {
        let forged = TelegramAuthPayload {
            id: FORGED_TELEGRAM_ID,
            first_name: "Debug".into(),
            last_name: None,
            username: None,
            photo_url: None,
            auth_date: chrono::Utc::now().timestamp(),
            hash: "invalid".into(),
        };
        match self.login_with_telegram(&forged).await {
            Err(ClientError::LoginRejected { status: 401, .. }) => ProbeResult {
                ok: true,
                status: Some(401),
                detail: "forged payload rejected".into(),
            },
            Err(ClientError::LoginRejected { status, body }) => ProbeResult {
                ok: false,
                status: Some(status),
                detail: format!("expected 401, got {}: {}", status, body.trim()),
            },
            Ok(_) => ProbeResult {
                ok: false,
                status: Some(200),
                detail: "forged payload was accepted".into(),
            },
            Err(e) => probe_error(e),
        }
    }
}

fn probe_error(e: ClientError) -> ProbeResult {
    ProbeResult {
        ok: false,
        status: e.status(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl TokenRefresher for RestClient {
    async fn refresh(&self, refresh_token: &str) -> Result<LoginTokens, RefreshError> {
        Ok(self.refresh_session(refresh_token).await?)
    }
}
