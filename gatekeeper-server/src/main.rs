use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper_server::gateway::run_gateway;
use gatekeeper_server::interactions::interactions_router;
use gatekeeper_server::{get_bot_version, AppState, Config, DiscordClient, RecordingLogger};

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "gatekeeper",
        "version": get_bot_version()
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in production
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting gatekeeper {}", get_bot_version());

    let config = Config::from_env().context("Failed to load configuration")?;

    let recording_logger = if config.recording_enabled {
        match RecordingLogger::new(PathBuf::from(&config.recording_log_path)) {
            Ok(logger) => {
                info!(
                    "Recording enabled, logging to: {}",
                    config.recording_log_path
                );
                Some(logger)
            }
            Err(e) => {
                error!("Failed to initialize recording logger: {}", e);
                None
            }
        }
    } else {
        None
    };

    let discord_client = DiscordClient::new_with_recording(
        config.bot_token.clone(),
        config.api_base.clone(),
        recording_logger
            .as_ref()
            .map(|l: &RecordingLogger| l.clone_for_middleware()),
    );

    if config.discord_public_key.is_none() {
        warn!("DISCORD_PUBLIC_KEY not set, interactions are only received over the gateway");
    }

    let port = config.port;
    let app_state = Arc::new(AppState::new(
        config,
        Arc::new(discord_client),
        recording_logger,
    ));

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(interactions_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    let gateway_state = app_state.clone();
    tokio::spawn(async move {
        run_gateway(gateway_state).await;
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server listening on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
