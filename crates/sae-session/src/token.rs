//! Bearer token inspection.
//!
//! Tokens are only decoded here, never verified: the hosted database checks
//! signatures. Anything that fails to decode is treated as expired.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE_NO_PAD, STANDARD_NO_PAD};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message fragments that indicate an auth failure when all we have is text.
pub const AUTH_ERROR_MARKERS: [&str; 6] = [
    "timeout",
    "forbidden",
    "unauthorized",
    "jwt",
    "auth",
    "row-level security",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl TokenClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        self.sub.as_deref().and_then(|s| s.parse().ok())
    }

    /// String field from `user_metadata`, e.g. `username` or `avatar_url`.
    pub fn metadata_str(&self, field: &str) -> Option<String> {
        self.user_metadata
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Decode the payload segment of a `header.payload.signature` token.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut parts = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub fn is_token_expired(token: &str) -> bool {
    is_token_expired_at(token, chrono::Utc::now().timestamp())
}

/// Expired means `exp <= now`. Undecodable tokens and tokens without `exp`
/// count as expired.
pub fn is_token_expired_at(token: &str, now: i64) -> bool {
    match decode_claims(token).and_then(|c| c.exp) {
        Some(exp) => exp <= now,
        None => true,
    }
}

/// Seconds until expiry, negative once expired.
pub fn seconds_until_expiry(token: &str) -> Option<i64> {
    let exp = decode_claims(token)?.exp?;
    Some(exp - chrono::Utc::now().timestamp())
}

/// Text classifier for errors that reach us untyped (server error bodies).
pub fn looks_like_auth_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    AUTH_ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn mint(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
    }

    #[test]
    fn past_exp_is_expired_and_future_exp_is_not() {
        let now = chrono::Utc::now().timestamp();
        assert!(is_token_expired(&mint(json!({ "sub": "u", "exp": now - 60 }))));
        assert!(!is_token_expired(&mint(json!({ "sub": "u", "exp": now + 3600 }))));
    }

    #[test]
    fn exp_equal_to_now_is_expired() {
        let token = mint(json!({ "exp": 1_700_000_000 }));
        assert!(is_token_expired_at(&token, 1_700_000_000));
        assert!(!is_token_expired_at(&token, 1_699_999_999));
    }

    #[test]
    fn malformed_tokens_are_expired() {
        assert!(is_token_expired(""));
        assert!(is_token_expired("not-a-token"));
        assert!(is_token_expired("a.b"));
        assert!(is_token_expired("a.b.c.d"));
        assert!(is_token_expired("header.!!!notbase64!!!.sig"));

        // valid base64, but not JSON
        let garbage = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(is_token_expired(&format!("h.{}.s", garbage)));

        // JSON without exp
        assert!(is_token_expired(&mint(json!({ "sub": "u" }))));
    }

    #[test]
    fn padded_payload_decodes() {
        let claims = br#"{"exp":4102444800,"sub":"x"}"#;
        let payload = base64::engine::general_purpose::URL_SAFE.encode(claims);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_claims(&token).unwrap().exp, Some(4_102_444_800));
    }

    #[test]
    fn claims_expose_user_and_metadata() {
        let id = Uuid::new_v4();
        let token = mint(json!({
            "sub": id.to_string(),
            "exp": 4_102_444_800i64,
            "role": "authenticated",
            "user_metadata": { "username": "founder", "telegram_id": 42 }
        }));

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.user_id(), Some(id));
        assert_eq!(claims.metadata_str("username").as_deref(), Some("founder"));
        assert_eq!(claims.metadata_str("telegram_id"), None);
        assert!(seconds_until_expiry(&token).unwrap() > 0);
    }

    #[test]
    fn auth_markers_match_case_insensitively() {
        assert!(looks_like_auth_failure("JWT expired"));
        assert!(looks_like_auth_failure("new row violates row-level security policy"));
        assert!(looks_like_auth_failure("403 Forbidden"));
        assert!(!looks_like_auth_failure("duplicate key value violates unique constraint"));
    }
}
