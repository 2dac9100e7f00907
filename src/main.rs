//! x402 gateway HTTP entrypoint.
//!
//! Launches an Axum-based HTTP server that gates configured upstream APIs
//! behind x402 payments.
//!
//! Endpoints:
//! - `GET /healthz` – Liveness
//! - `GET /supported` – Supported networks and payment kinds
//! - `GET /route` – Cross-chain route plan and cost estimate
//! - `POST /probe` – Endpoint health probing
//! - `<configured routes>` – Gated passthrough to upstream resources
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `CONFIG` names the JSON configuration file
//! - `FACILITATOR_URL` overrides the facilitator
//! - `OTEL_*` variables enable OTLP trace/metric export

use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_gateway::config::Config;
use x402_gateway::handlers::{GatewayState, router};
use x402_gateway::sig_down::SigDown;
use x402_gateway::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let _telemetry = Telemetry::init();

    let config = Config::load()?;
    let state = Arc::new(GatewayState::from_config(&config)?);

    let http_endpoints = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting gateway at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
