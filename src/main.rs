mod config;
mod gemini;
mod generator;
mod models;
mod orchestrator;
mod pdf;
mod routes;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::gemini::GeminiClient;
use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    if config.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; generation requests will fail until it is configured");
    }
    tracing::info!(text_model = %config.text_model, image_model = %config.image_model, "Using Gemini at {}", config.api_base);

    let gemini = Arc::new(GeminiClient::new(&config));
    let state = AppState::new(gemini.clone(), gemini);
    spawn_session_sweeper(state.clone(), chrono::Duration::minutes(config.session_ttl_minutes));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async { tokio::signal::ctrl_c().await.ok(); })
        .await
        .context("server error")?;
    Ok(())
}

fn spawn_session_sweeper(state: AppState, ttl: chrono::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let evicted = state.evict_idle_sessions(ttl);
            if evicted > 0 {
                tracing::info!("🧹 Evicted {} idle sessions", evicted);
            }
        }
    });
}
