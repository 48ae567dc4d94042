//! `POST /api/v1/inference` and `POST /api/v1/batch-inference`.

use std::time::Instant;

use axum::Json;
use axum::extract::{Multipart, State};
use muse_classifier::PredictionResult;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::metrics;
use crate::server::AppState;
use crate::upload::{self, UploadError, UploadedFile};

const SINGLE: &str = "inference";
const BATCH: &str = "batch_inference";

/// Successful single-file response.
#[derive(Debug, Serialize)]
pub struct InferenceResponse {
    /// Always `"success"`.
    pub status: &'static str,
    /// Uploaded filename.
    pub filename: String,
    /// Upload size in bytes.
    pub file_size: usize,
    /// Model output.
    pub results: PredictionResult,
}

/// One entry of a batch response.
#[derive(Debug, Serialize)]
pub struct BatchItem {
    /// Uploaded filename, empty if the client sent none.
    pub filename: String,
    /// `"success"` or `"error"`.
    pub status: &'static str,
    /// Model output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<PredictionResult>,
    /// Failure reason otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    fn success(filename: String, results: PredictionResult) -> Self {
        Self {
            filename,
            status: "success",
            results: Some(results),
            error: None,
        }
    }

    fn failure(filename: String, error: String) -> Self {
        Self {
            filename,
            status: "error",
            results: None,
            error: Some(error),
        }
    }
}

/// Batch response.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    /// Always `"success"`; per-file outcomes live in `results`.
    pub status: &'static str,
    /// Number of files received.
    pub batch_size: usize,
    /// Per-file outcomes in upload order.
    pub results: Vec<BatchItem>,
}

/// Classify a single uploaded file from field `file`.
pub async fn single(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<InferenceResponse>, ApiError> {
    metrics::record_request(SINGLE);
    match classify_single(&state, multipart).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e) => {
            metrics::record_error(SINGLE, e.kind());
            warn!(status = e.status.as_u16(), error = %e.message, "inference request failed");
            Err(e)
        }
    }
}

async fn classify_single(state: &AppState, mut multipart: Multipart) -> Result<InferenceResponse, ApiError> {
    if !state.manager.is_ready() {
        return Err(ApiError::not_ready());
    }

    let upload_settings = &state.settings.upload;
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(&e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        file = Some(
            upload::read_file(field, upload_settings)
                .await
                .map_err(UploadError::into_api_error)?,
        );
        break;
    }
    let file = file.ok_or_else(upload::no_file)?;

    let file_size = file.bytes.len();
    let results = predict(state, SINGLE, file.bytes, &file.extension)
        .await
        .map_err(|e| ApiError::from_prediction(&e))?;
    info!(
        filename = %file.filename,
        file_size,
        top = results.predictions.first().map_or("", |p| p.label.as_str()),
        "classified upload"
    );

    Ok(InferenceResponse {
        status: "success",
        filename: file.filename,
        file_size,
        results,
    })
}

/// Classify every file in field `files`, reporting each outcome separately.
pub async fn batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>, ApiError> {
    metrics::record_request(BATCH);
    match classify_batch(&state, multipart).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e) => {
            metrics::record_error(BATCH, e.kind());
            warn!(status = e.status.as_u16(), error = %e.message, "batch request failed");
            Err(e)
        }
    }
}

async fn classify_batch(state: &AppState, mut multipart: Multipart) -> Result<BatchResponse, ApiError> {
    if !state.manager.is_ready() {
        return Err(ApiError::not_ready());
    }

    let upload_settings = &state.settings.upload;
    let max_files = upload_settings.max_batch_files;
    let mut received: Vec<Result<UploadedFile, (String, ApiError)>> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(&e))?
    {
        if field.name() != Some("files") {
            continue;
        }
        if received.len() == max_files {
            return Err(ApiError::bad_request(format!(
                "Maximum {max_files} files per batch"
            )));
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        match upload::read_file(field, upload_settings).await {
            Ok(file) => received.push(Ok(file)),
            Err(UploadError::Rejected(e)) => received.push(Err((filename, e))),
            Err(UploadError::Stream(e)) => return Err(e),
        }
    }
    if received.is_empty() {
        return Err(upload::no_file());
    }

    let batch_size = received.len();
    let mut results = Vec::with_capacity(batch_size);
    for entry in received {
        let item = match entry {
            Ok(file) => match predict(state, BATCH, file.bytes, &file.extension).await {
                Ok(prediction) => BatchItem::success(file.filename, prediction),
                Err(e) => {
                    metrics::record_error(BATCH, "processing");
                    warn!(filename = %file.filename, error = %e, "batch item failed");
                    BatchItem::failure(file.filename, e.to_string())
                }
            },
            Err((filename, e)) => {
                metrics::record_error(BATCH, e.kind());
                BatchItem::failure(filename, e.message)
            }
        };
        results.push(item);
    }

    let succeeded = results.iter().filter(|r| r.status == "success").count();
    info!(batch_size, succeeded, "classified batch");

    Ok(BatchResponse {
        status: "success",
        batch_size,
        results,
    })
}

async fn predict(
    state: &AppState,
    endpoint: &'static str,
    bytes: Vec<u8>,
    extension: &str,
) -> muse_classifier::Result<PredictionResult> {
    metrics::record_upload(bytes.len());
    let started = Instant::now();
    let result = state.manager.predict(bytes, Some(extension)).await;
    metrics::record_duration(endpoint, started.elapsed());
    result
}
