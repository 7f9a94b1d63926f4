use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use akleao_gateway::config::Config;
use akleao_gateway::crypto::KeyCipher;
use akleao_gateway::db::{PgStore, Store};
use akleao_gateway::server::{AppState, RateLimiter, start_server};
use akleao_gateway::upstream::{BackendClient, MarketClient, OpenAiClient};
use akleao_gateway::{Error, Result};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,akleao_gateway=debug"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::from_env()?;

    // A missing or malformed key is a startup error. Running with an
    // improvised key would silently orphan every stored credential.
    let cipher = KeyCipher::from_hex(&config.encryption.key_hex)?;

    let store = Arc::new(PgStore::new(&config.database, cipher)?);
    store.run_migrations().await?;
    tracing::info!("database migrations applied");

    let backend = BackendClient::new(&config.upstream.backend_url)?;
    let market = MarketClient::new(
        &config.upstream.market_data_url,
        config.upstream.market_data_api_key.clone(),
    )?;
    let openai = OpenAiClient::new(&config.upstream.openai_url)?;

    let state = Arc::new(AppState {
        store: store.clone(),
        backend,
        market,
        openai,
        explain_model: config.upstream.explain_model.clone(),
        explain_rate_limiter: RateLimiter::new(config.server.explain_rate_limit, 60),
        shutdown_tx: tokio::sync::RwLock::new(None),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| Error::Server(format!("invalid listen address: {e}")))?;

    let bound = start_server(addr, state.clone(), &config.server.cors_origins).await?;
    tracing::info!(%bound, "gateway listening");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Server(format!("failed to listen for shutdown signal: {e}")))?;
    tracing::info!("shutdown signal received");

    if let Some(tx) = state.shutdown_tx.write().await.take() {
        let _ = tx.send(());
    }

    Ok(())
}
