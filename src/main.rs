//! Binary entrypoint for the Chatloom server.

use chatloom::chat::config::ChatConfig;
use chatloom::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Chatloom v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ChatConfig::default();
    if let Ok(path) = std::env::var("CHATLOOM_DB") {
        config.storage.sqlite_path = path.into();
    }
    if let Ok(model) = std::env::var("CHATLOOM_MODEL") {
        config.llm.model = model;
    }
    if let Ok(url) = std::env::var("CHATLOOM_OLLAMA_URL") {
        config.llm.base_url = Some(url);
    }

    let state = AppState::new(&config).await?;

    let port = std::env::var("CHATLOOM_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT);

    server::run_server_with_shutdown(state, port, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
    .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
