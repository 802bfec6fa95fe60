use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use tracing::warn;

use sae_types::api::{CheckLoginResponse, CreateLoginTokenResponse, LoginTokenRow};

use crate::{AppState, upstream_status};

const TOKEN_TTL_MINUTES: i64 = 10;
const TOKEN_LEN: usize = 32;

#[derive(Debug, Default, Deserialize)]
pub struct TokenParam {
    #[serde(default)]
    pub token: Option<String>,
}

fn new_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn bot_url(bot_username: &str, token: &str) -> String {
    format!("https://t.me/{}?start={}", bot_username, token)
}

/// Issue a deep-link token the bot completes when the user presses start.
pub async fn create_login_token(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(bot) = state.config.bot_username.as_deref() else {
        warn!("create-login-token called without TELEGRAM_BOT_USERNAME");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let now = Utc::now();
    let row = LoginTokenRow {
        token: new_token(),
        created_at: now,
        expires_at: now + Duration::minutes(TOKEN_TTL_MINUTES),
        telegram_id: None,
        user_id: None,
        used: false,
    };
    let saved = state
        .client
        .create_login_token_row(&row)
        .await
        .map_err(|e| upstream_status("create login token", e))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLoginTokenResponse {
            bot_url: bot_url(bot, &saved.token),
            token: saved.token,
            expires_at: saved.expires_at,
        }),
    ))
}

pub async fn check_login_query(
    State(state): State<AppState>,
    Query(param): Query<TokenParam>,
) -> Result<Json<CheckLoginResponse>, StatusCode> {
    check_login(&state, param.token).await.map(Json)
}

pub async fn check_login_body(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CheckLoginResponse>, StatusCode> {
    // an empty or malformed body is the same as a missing token
    let token = serde_json::from_slice::<TokenParam>(&body).ok().and_then(|b| b.token);
    check_login(&state, token).await.map(Json)
}

/// Status of a deep-link token. A completed token stays complete until its
/// password is claimed, after which it reads as expired.
async fn check_login(
    state: &AppState,
    token: Option<String>,
) -> Result<CheckLoginResponse, StatusCode> {
    let token = normalize_token(token).ok_or(StatusCode::BAD_REQUEST)?;
    let row = fetch_row(state, &token).await?.ok_or(StatusCode::NOT_FOUND)?;
    Ok(login_status(&row, Utc::now()))
}

pub(crate) fn normalize_token(token: Option<String>) -> Option<String> {
    token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

pub(crate) async fn fetch_row(
    state: &AppState,
    token: &str,
) -> Result<Option<LoginTokenRow>, StatusCode> {
    state
        .client
        .get_login_token_row(token)
        .await
        .map_err(|e| upstream_status("read login token", e))
}

pub fn login_status(row: &LoginTokenRow, now: chrono::DateTime<Utc>) -> CheckLoginResponse {
    if row.used || row.expires_at <= now {
        return CheckLoginResponse::Expired;
    }
    match row.telegram_id {
        Some(telegram_id) => CheckLoginResponse::Complete {
            telegram_id,
            user_id: row.user_id,
        },
        None => CheckLoginResponse::Pending,
    }
}
