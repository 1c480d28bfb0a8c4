// main.rs
// Loads configuration, connects to MongoDB, and serves the JSON API.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method, header};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pharmaledger::{config::AppConfig, routes, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env();
    let state = Arc::new(
        state::init_state_with(&config)
            .await
            .context("failed to initialize MongoDB state")?,
    );

    let app = routes::router(state)
        .layer(cors_layer(&config)?)
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// A configured origin gets credentialed CORS (the session cookie); otherwise any origin
/// may call, without cookies.
fn cors_layer(config: &AppConfig) -> Result<CorsLayer> {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let layer = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS_ORIGIN: {origin}"))?,
            )
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
            .allow_credentials(true),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any),
    };
    Ok(layer)
}
