use axum::{Json, extract::State, http::StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use sae_types::api::FakeLoginResponse;

use crate::AppState;

const FAKE_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
struct FakeClaims {
    sub: Uuid,
    aud: &'static str,
    role: &'static str,
    iat: i64,
    exp: i64,
    user_metadata: serde_json::Value,
}

pub fn mint_access_token(secret: &str, user_id: Uuid, now: i64) -> anyhow::Result<(String, i64)> {
    let exp = now + FAKE_TOKEN_TTL_SECS;
    let claims = FakeClaims {
        sub: user_id,
        aud: "authenticated",
        role: "authenticated",
        iat: now,
        exp,
        user_metadata: json!({"username": "dev", "first_name": "Dev"}),
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;
    Ok((token, exp))
}

/// Development-only login as the configured user. 404 everywhere else.
pub async fn fake_login(
    State(state): State<AppState>,
) -> Result<Json<FakeLoginResponse>, StatusCode> {
    let fake = state.config.fake_login().ok_or(StatusCode::NOT_FOUND)?;

    warn!("issuing fake login token for {}", fake.user_id);
    let now = chrono::Utc::now().timestamp();
    let (access_token, expires_at) = mint_access_token(&fake.jwt_secret, fake.user_id, now)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(FakeLoginResponse {
        access_token,
        user_id: fake.user_id,
        expires_at,
    }))
}
