//! API error type and its JSON rendering.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use muse_classifier::ClassifierError;
use serde_json::json;

/// Error returned from handlers; renders as `{"status":"error","detail":...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Human readable reason.
    pub message: String,
}

impl ApiError {
    /// 400: client sent something unusable.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    /// 413: upload over the size limit.
    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: msg.into(),
        }
    }

    /// 503: model not ready.
    pub fn not_ready() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "Model not loaded".into(),
        }
    }

    /// 500: processing failure.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    /// Map a failed prediction. Not-ready stays 503, everything else is 500.
    pub fn from_prediction(err: &ClassifierError) -> Self {
        match err {
            ClassifierError::NotLoaded => Self::not_ready(),
            other => Self::internal(format!("Error processing file: {other}")),
        }
    }

    /// Map a multipart stream error, keeping its own status (400, 413, ...).
    pub fn from_multipart(err: &MultipartError) -> Self {
        let status = err.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::payload_too_large(format!("Request body too large: {}", err.body_text()));
        }
        Self {
            status,
            message: format!("Invalid multipart body: {}", err.body_text()),
        }
    }

    /// Label for the `kind` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST => "validation",
            StatusCode::PAYLOAD_TOO_LARGE => "too_large",
            StatusCode::SERVICE_UNAVAILABLE => "not_ready",
            s if s.is_client_error() => "client",
            _ => "processing",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "detail": self.message,
        }));
        (self.status, body).into_response()
    }
}
