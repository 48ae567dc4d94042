//! Banner, health, readiness, model info and metrics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::error::ApiError;
use crate::health::{
    self, DetailedHealthResponse, HealthResponse, ModelStatus, ReadyResponse,
};
use crate::metrics;
use crate::server::AppState;

/// `GET /` body.
#[derive(Debug, Serialize)]
pub struct RootResponse {
    /// Service title.
    pub message: String,
    /// Service version.
    pub version: String,
    /// Path of the liveness endpoint.
    pub health: &'static str,
}

/// `GET /api/v1/models/info` body.
#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    /// Configured model identifier.
    pub model_name: String,
    /// `"cpu"` or `"cuda"` once loaded, otherwise the configured preference.
    pub device: &'static str,
    /// Accepted upload extensions.
    pub supported_formats: Vec<String>,
    /// Per-file upload limit in megabytes.
    pub max_file_size_mb: f64,
}

/// GET /
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: state.settings.api.title.clone(),
        version: state.settings.api.version.clone(),
        health: "/api/v1/health",
    })
}

/// GET /api/v1/health
pub async fn liveness(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(&state.settings.api.title))
}

/// GET /api/v1/health/detailed
pub async fn health_detailed(
    State(state): State<AppState>,
) -> Result<Json<DetailedHealthResponse>, ApiError> {
    let system = Arc::clone(&state.system);
    let manager = Arc::clone(&state.manager);
    // both queries block: sysinfo sampling and the GPU driver
    let (snapshot, accelerator) = tokio::task::spawn_blocking(move || {
        let mut sys = system.lock();
        (health::collect_system_metrics(&mut sys), manager.accelerator())
    })
    .await
    .map_err(|e| ApiError::internal(format!("system metrics unavailable: {e}")))?;

    let model = ModelStatus {
        name: state.manager.model_name().to_string(),
        state: state.manager.state(),
    };
    Ok(Json(health::detailed_health(
        snapshot,
        accelerator,
        model,
    )))
}

/// GET /api/v1/ready
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let body = health::readiness(state.manager.state());
    let status = if body.model_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// GET /api/v1/models/info
pub async fn model_info(State(state): State<AppState>) -> Json<ModelInfoResponse> {
    let upload = &state.settings.upload;
    Json(ModelInfoResponse {
        model_name: state.manager.model_name().to_string(),
        device: state.manager.device_label(),
        supported_formats: upload.allowed_extensions.clone(),
        max_file_size_mb: upload.max_file_size_mb(),
    })
}

/// GET /metrics
pub async fn prometheus(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&state.metrics),
    )
}
