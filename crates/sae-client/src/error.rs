//! Error types for the REST client

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use sae_session::RateLimitExceeded;
use sae_session::token::looks_like_auth_failure;

/// Errors surfaced by every client operation.
///
/// Recovery code dispatches on the variant; see [`ClientError::is_auth_error`].
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("session expired: {0}")]
    AuthExpired(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("login rejected with status {status}: {body}")]
    LoginRejected { status: u16, body: String },

    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Error body returned by the REST API and the auth service.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl ApiErrorBody {
    fn describe(&self) -> Option<String> {
        let main = self
            .message
            .as_ref()
            .or(self.msg.as_ref())
            .or(self.error_description.as_ref())
            .or(self.error.as_ref())?;
        Some(match &self.details {
            Some(details) if !details.is_empty() => format!("{} ({})", main, details),
            _ => main.clone(),
        })
    }
}

impl ClientError {
    /// Map a non-2xx response to a typed error.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed.describe().unwrap_or_else(|| body.trim().to_string());

        match (status, parsed.code.as_deref()) {
            (401, _) | (_, Some("PGRST301" | "PGRST302" | "PGRST303")) => {
                Self::AuthExpired(message)
            }
            (403, _) | (_, Some("42501")) => Self::PermissionDenied(message),
            (409, _) | (_, Some("23505")) => Self::Conflict(message),
            (404, _) => Self::NotFound(message),
            (429, _) => Self::RateLimited(message),
            (400..=499, _) if looks_like_auth_failure(&message) => Self::AuthExpired(message),
            (400 | 422, _) => Self::Validation(message),
            _ => Self::Http { status, message },
        }
    }

    /// Errors that call for re-authentication rather than a retry.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthExpired(_) | Self::PermissionDenied(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the rendered message contains `needle`, e.g. a constraint name.
    pub fn mentions(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::LoginRejected { status, .. } => Some(*status),
            Self::AuthExpired(_) => Some(401),
            Self::PermissionDenied(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::RateLimited(_) => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not report the configured duration
            Self::Timeout(Duration::ZERO)
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::UnexpectedResponse(e.to_string())
    }
}

impl From<RateLimitExceeded> for ClientError {
    fn from(e: RateLimitExceeded) -> Self {
        Self::RateLimited(e.to_string())
    }
}
