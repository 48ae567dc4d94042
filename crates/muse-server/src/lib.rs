//! # muse-server
//!
//! Axum HTTP surface for genre inference.
//!
//! - Inference endpoints: single file and batch multipart uploads
//! - Health, readiness and model info endpoints, plus host metrics
//! - Prometheus exposition on `/metrics`
//! - Graceful stop: drain in-flight requests, then release the model

#![deny(unsafe_code)]

pub mod error;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod upload;

pub use error::ApiError;
pub use server::{AppState, MuseServer, StopOutcome};
