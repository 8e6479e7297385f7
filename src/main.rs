use std::sync::Arc;

use anyhow::Result;
use chapterwise::config::Config;
use chapterwise::routes::{AppState, router};
use chapterwise::services::extractor::PdfTextExtractor;
use chapterwise::services::llm::LLMClient;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chapterwise=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    if config.allowed_emails.is_empty() {
        tracing::warn!("ALLOWED_EMAILS is empty; nobody can sign in");
    }

    // Create the LLM client
    let llm_client = Arc::new(LLMClient::new(config.llm.clone())?);

    let app_state = AppState::new(
        llm_client,
        Arc::new(PdfTextExtractor),
        config.allowed_emails.clone(),
    );
    let app = router(app_state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
