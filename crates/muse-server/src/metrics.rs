//! Prometheus metrics recorder and `/metrics` rendering.

use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Inference requests total (counter, labels: endpoint).
pub const INFERENCE_REQUESTS_TOTAL: &str = "inference_requests_total";
/// Failed inference requests or batch items (counter, labels: endpoint, kind).
pub const INFERENCE_ERRORS_TOTAL: &str = "inference_errors_total";
/// Time spent in `predict` per file (histogram, labels: endpoint).
pub const INFERENCE_DURATION_SECONDS: &str = "inference_duration_seconds";
/// Bytes received per uploaded file (histogram).
pub const UPLOAD_BYTES: &str = "upload_bytes";

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup. Fails if another recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Handle backed by a recorder that is not installed globally.
///
/// Renders an empty exposition; used in tests and when metrics are off.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Count one request to `endpoint`.
pub fn record_request(endpoint: &'static str) {
    metrics::counter!(INFERENCE_REQUESTS_TOTAL, "endpoint" => endpoint).increment(1);
}

/// Count one failure on `endpoint`.
pub fn record_error(endpoint: &'static str, kind: &'static str) {
    metrics::counter!(INFERENCE_ERRORS_TOTAL, "endpoint" => endpoint, "kind" => kind).increment(1);
}

/// Observe one `predict` call.
pub fn record_duration(endpoint: &'static str, elapsed: Duration) {
    metrics::histogram!(INFERENCE_DURATION_SECONDS, "endpoint" => endpoint)
        .record(elapsed.as_secs_f64());
}

/// Observe an upload size.
#[allow(clippy::cast_precision_loss)]
pub fn record_upload(bytes: usize) {
    metrics::histogram!(UPLOAD_BYTES).record(bytes as f64);
}
