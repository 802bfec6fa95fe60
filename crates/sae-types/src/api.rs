use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Auth --

/// Payload produced by the Telegram login widget. The edge function checks
/// `hash` against the bot token; the client only forwards it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramAuthPayload {
    pub id: i64,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub auth_date: i64,
    pub hash: String,
}

/// Token pair returned by bot login and by refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleLikeResult {
    pub liked: bool,
    #[serde(rename = "likesCount")]
    pub likes_count: u64,
}

// -- Bot deep-link login --

/// Row of `telegram_login_tokens`. The bot fills `telegram_id`/`user_id`
/// once the user presses start in the chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginTokenRow {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub telegram_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub used: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLoginTokenResponse {
    pub token: String,
    pub bot_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckLoginResponse {
    Pending,
    Expired,
    Complete {
        telegram_id: i64,
        user_id: Option<Uuid>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetUserPasswordRequest {
    pub telegram_id: i64,
    /// Deep-link token whose completed login is being redeemed.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetUserPasswordResponse {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FakeLoginResponse {
    pub access_token: String,
    pub user_id: Uuid,
    pub expires_at: i64,
}

// -- Diagnostics --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub supabase_url_set: bool,
    pub anon_key_set: bool,
    pub service_key_set: bool,
    pub telegram_function_url: String,
    pub rest_api: ProbeResult,
    /// Forged bot-login payload; a healthy deployment answers 401.
    pub forged_login: ProbeResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub status: Option<u16>,
    pub detail: String,
}
