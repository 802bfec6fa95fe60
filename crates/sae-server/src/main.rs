use std::net::SocketAddr;

use tracing::info;

use sae_server::config::{Environment, ServerConfig};
use sae_server::{AppStateInner, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sae_server=debug,sae_client=debug,sae_session=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if let Some(fake) = config.fake_login() {
        info!("fake login enabled for {}", fake.user_id);
    } else if config.environment == Environment::Development {
        info!("development mode without fake login credentials");
    }
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let app = router(AppStateInner::new(config)?);

    info!("StartupsAreEasy server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
