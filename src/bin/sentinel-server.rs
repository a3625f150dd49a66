/// Sentinel Inspector ingestion service.
///
/// Accepts every outbound prompt/attachment forwarded by the endpoint
/// agent, runs it through the inspection pipeline, and returns a policy
/// decision plus (if applicable) a redacted prompt and attachment.
use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sentinel_inspector::config::Config;
use sentinel_inspector::error::AppError;
use sentinel_inspector::handler::{self, AppState};
use sentinel_inspector::models::{InspectRequest, InspectResponse};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

/// Operability endpoint (ambient, not part of the inspection pipeline;
/// an on-prem ingestion service still needs a liveness probe).
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { ok: true })
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InspectRequest>, JsonRejection>,
) -> Result<Json<InspectResponse>, AppError> {
    let Json(req) = payload.map_err(|err| AppError::Validation(err.to_string()))?;

    let response = handler::inspect(&state, req).await?;
    Ok(Json(response))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).init();

    info!("Starting Sentinel Inspector");

    let config = Config::from_env();
    config.log_config();

    let state = Arc::new(AppState::new(&config).await?);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/logs", post(ingest))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.ingest_port);
    info!("Sentinel Inspector listening on {addr}");
    info!("  GET  /healthz   - liveness probe");
    info!("  POST /api/logs  - inspection pipeline");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
