use anyhow::{Context, bail};
use uuid::Uuid;

use sae_client::ClientConfig;

/// Secrets that ship in example env files and must never reach production.
const PLACEHOLDER_SECRETS: [&str; 5] =
    ["change-me", "changeme", "dev-secret", "your-secret", "placeholder"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Credentials for the dev-only fake login.
#[derive(Debug, Clone)]
pub struct FakeLogin {
    pub user_id: Uuid,
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub client: ClientConfig,
    pub bot_username: Option<String>,
    pub password_secret: String,
    pub environment: Environment,
    pub fake_login: Option<FakeLogin>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let client = ClientConfig::from_lookup(&lookup).context("database client configuration")?;

        let password_secret = var("SAE_PASSWORD_SECRET").context("SAE_PASSWORD_SECRET is not set")?;
        if is_placeholder(&password_secret) {
            bail!("SAE_PASSWORD_SECRET is a placeholder value, set a real secret");
        }

        let port = var("SAE_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("SAE_PORT is not a valid port")?;

        let environment = match var("SAE_ENV").as_deref() {
            Some("development" | "dev") => Environment::Development,
            _ => Environment::Production,
        };

        let fake_login = match (var("SAE_FAKE_LOGIN_USER_ID"), var("SAE_JWT_SECRET")) {
            (Some(user_id), Some(jwt_secret)) => Some(FakeLogin {
                user_id: user_id.parse().context("SAE_FAKE_LOGIN_USER_ID is not a uuid")?,
                jwt_secret,
            }),
            _ => None,
        };

        Ok(Self {
            host: var("SAE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            client,
            bot_username: var("TELEGRAM_BOT_USERNAME")
                .map(|u| u.trim_start_matches('@').to_string()),
            password_secret,
            environment,
            fake_login,
        })
    }

    /// Fake login is served only in development with credentials configured.
    pub fn fake_login(&self) -> Option<&FakeLogin> {
        match self.environment {
            Environment::Development => self.fake_login.as_ref(),
            Environment::Production => None,
        }
    }
}

fn is_placeholder(secret: &str) -> bool {
    let lower = secret.to_ascii_lowercase();
    PLACEHOLDER_SECRETS.iter().any(|p| lower.contains(p))
}
