use std::time::Duration;

use crate::error::{ClientError, ClientResult};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the hosted database lives and which keys to present.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project URL without trailing slash, e.g. `https://abc.supabase.co`.
    pub supabase_url: String,
    pub anon_key: String,
    pub service_key: Option<String>,
    pub telegram_function_url: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(supabase_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let supabase_url = supabase_url.into().trim_end_matches('/').to_string();
        let telegram_function_url = default_telegram_function_url(&supabase_url);
        Self {
            supabase_url,
            anon_key: anon_key.into(),
            service_key: None,
            telegram_function_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    pub fn with_telegram_function_url(mut self, url: impl Into<String>) -> Self {
        self.telegram_function_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read `SUPABASE_URL`, `SUPABASE_ANON_KEY`, `SUPABASE_SERVICE_ROLE_KEY`,
    /// `TELEGRAM_FUNCTION_URL` and `SAE_REQUEST_TIMEOUT_SECS`. The
    /// `NEXT_PUBLIC_` spellings of the public values are accepted too.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let url = var(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"])
            .ok_or_else(|| ClientError::Config("SUPABASE_URL is not set".into()))?;
        let anon_key = var(&["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"])
            .ok_or_else(|| ClientError::Config("SUPABASE_ANON_KEY is not set".into()))?;

        let mut config = Self::new(url, anon_key);
        if let Some(key) = var(&["SUPABASE_SERVICE_ROLE_KEY"]) {
            config = config.with_service_key(key);
        }
        if let Some(url) = var(&["TELEGRAM_FUNCTION_URL", "NEXT_PUBLIC_TELEGRAM_FUNCTION_URL"]) {
            config = config.with_telegram_function_url(url);
        }
        if let Some(secs) = var(&["SAE_REQUEST_TIMEOUT_SECS"]).and_then(|v| v.parse().ok()) {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn rest_base(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    pub fn auth_base(&self) -> String {
        format!("{}/auth/v1", self.supabase_url)
    }
}

fn default_telegram_function_url(supabase_url: &str) -> String {
    format!("{}/functions/v1/telegram-auth", supabase_url)
}
