//! Credentials attached to each request

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Who a request is made as.
#[derive(Debug, Clone)]
pub enum Auth {
    /// Shared anonymous key: public reads, bot login.
    Anon,
    /// Service-role key, server side only.
    Service,
    /// A signed-in user's access token. Row-level security applies.
    User(String),
}

impl Auth {
    pub fn user(token: impl Into<String>) -> Self {
        Self::User(token.into())
    }

    /// `apikey` and `Authorization` headers for this identity.
    pub fn headers(&self, config: &ClientConfig) -> ClientResult<HeaderMap> {
        let (apikey, bearer) = match self {
            Auth::Anon => (config.anon_key.as_str(), config.anon_key.as_str()),
            Auth::Service => {
                let key = config
                    .service_key
                    .as_deref()
                    .ok_or_else(|| {
                        ClientError::Config("service role key is not configured".into())
                    })?;
                (key, key)
            }
            Auth::User(token) => {
                if token.trim().is_empty() {
                    return Err(ClientError::Validation("missing access token".into()));
                }
                (config.anon_key.as_str(), token.as_str())
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("apikey"), header_value(apikey)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", bearer))?);
        Ok(headers)
    }

    /// Identity folded into the dedup key so different users never share a response.
    pub(crate) fn scope(&self) -> String {
        match self {
            Auth::Anon => "anon".to_string(),
            Auth::Service => "service".to_string(),
            Auth::User(token) => format!("user:{}", token),
        }
    }
}

fn header_value(value: &str) -> ClientResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ClientError::Config(format!("invalid header value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new("http://localhost:54321", "anon-key").with_service_key("service-key")
    }

    #[test]
    fn anon_uses_the_key_twice() {
        let headers = Auth::Anon.headers(&config()).unwrap();
        assert_eq!(headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer anon-key");
    }

    #[test]
    fn user_token_goes_in_authorization() {
        let headers = Auth::user("jwt").headers(&config()).unwrap();
        assert_eq!(headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer jwt");
    }

    #[test]
    fn empty_user_token_is_rejected() {
        let err = Auth::user("  ").headers(&config()).unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn service_requires_configured_key() {
        let headers = Auth::Service.headers(&config()).unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer service-key");

        let bare = ClientConfig::new("http://localhost:54321", "anon-key");
        assert!(matches!(Auth::Service.headers(&bare), Err(ClientError::Config(_))));
    }
}
