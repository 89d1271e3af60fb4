mod api;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use epistat_storage::PgStore;

use crate::state::AppState;

fn load_config() -> epistat_core::Config {
    epistat_core::config::load_dotenv();
    epistat_core::Config::from_env()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config();
    config.log_summary();

    let store = Arc::new(
        PgStore::connect(&config.postgres)
            .await
            .context("failed to connect to PostgreSQL")?,
    );
    let state = Arc::new(AppState { store: store.clone() });
    let app = router::build_router(state, &config.server.cors_origin);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    Ok(())
}
