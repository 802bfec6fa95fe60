use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use sae_types::api::{CheckLoginResponse, GetUserPasswordRequest, GetUserPasswordResponse};

use crate::login::{fetch_row, login_status, normalize_token};
use crate::{AppState, upstream_status};

type HmacSha256 = Hmac<Sha256>;

/// `hex(HMAC-SHA256(secret, "telegram:<id>"))`. Stable for a given secret, so
/// a Telegram account always maps to the same auth password.
pub fn derive_password(secret: &str, telegram_id: i64) -> Result<String, StatusCode> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    mac.update(format!("telegram:{}", telegram_id).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Redeem a completed deep-link login for the account's password.
///
/// The token must be known (401), completed by the bot for this very
/// `telegram_id` and not yet redeemed (403). A token is redeemed once.
pub async fn get_user_password(
    State(state): State<AppState>,
    Json(req): Json<GetUserPasswordRequest>,
) -> Result<Json<GetUserPasswordResponse>, StatusCode> {
    if req.telegram_id <= 0 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let token = normalize_token(req.token).ok_or(StatusCode::UNAUTHORIZED)?;
    let row = fetch_row(&state, &token).await?.ok_or(StatusCode::UNAUTHORIZED)?;

    match login_status(&row, Utc::now()) {
        CheckLoginResponse::Complete { telegram_id, .. } if telegram_id == req.telegram_id => {}
        status => {
            warn!("password refused for telegram user {}: token is {:?}", req.telegram_id, status);
            return Err(StatusCode::FORBIDDEN);
        }
    }

    let claimed = state
        .client
        .mark_login_token_used(&token)
        .await
        .map_err(|e| upstream_status("claim login token", e))?;
    if !claimed {
        warn!("login token for telegram user {} was already redeemed", req.telegram_id);
        return Err(StatusCode::FORBIDDEN);
    }

    info!("deep-link login redeemed for telegram user {}", req.telegram_id);
    let password = derive_password(&state.config.password_secret, req.telegram_id)?;
    Ok(Json(GetUserPasswordResponse { password }))
}
