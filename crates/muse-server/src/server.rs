//! `MuseServer`: Axum router, shared state and listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use muse_classifier::ModelManager;
use muse_settings::MuseSettings;
use parking_lot::Mutex;
use sysinfo::System;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::routes::{inference, system};

/// Room for multipart boundaries and headers on top of the file payloads.
const MULTIPART_SLACK: usize = 1024 * 1024;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Effective settings.
    pub settings: Arc<MuseSettings>,
    /// The process-wide model.
    pub manager: Arc<ModelManager>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// Host sampler, reused so CPU deltas stay meaningful.
    pub system: Arc<Mutex<System>>,
}

/// How [`MuseServer::stop`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every in-flight request finished inside the grace period.
    Drained,
    /// The grace period ran out; remaining connections were dropped.
    Aborted,
}

/// The HTTP server.
pub struct MuseServer {
    settings: Arc<MuseSettings>,
    manager: Arc<ModelManager>,
    metrics: PrometheusHandle,
    system: Arc<Mutex<System>>,
    stopping: CancellationToken,
}

impl MuseServer {
    /// Create a server around an already constructed model manager.
    pub fn new(settings: MuseSettings, manager: Arc<ModelManager>, metrics: PrometheusHandle) -> Self {
        Self {
            settings: Arc::new(settings),
            manager,
            metrics,
            system: Arc::new(Mutex::new(System::new())),
            stopping: CancellationToken::new(),
        }
    }

    /// Whole-request body limit: every batch slot at the per-file maximum.
    pub fn body_limit(&self) -> usize {
        let upload = &self.settings.upload;
        usize::try_from(upload.max_file_size)
            .unwrap_or(usize::MAX)
            .saturating_mul(upload.max_batch_files.max(1))
            .saturating_add(MULTIPART_SLACK)
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            settings: Arc::clone(&self.settings),
            manager: Arc::clone(&self.manager),
            metrics: self.metrics.clone(),
            system: Arc::clone(&self.system),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(system::root))
            .route("/api/v1/health", get(system::liveness))
            .route("/api/v1/health/detailed", get(system::health_detailed))
            .route("/api/v1/ready", get(system::ready))
            .route("/api/v1/models/info", get(system::model_info))
            .route("/api/v1/inference", post(inference::single))
            .route("/api/v1/batch-inference", post(inference::batch))
            .route("/metrics", get(system::prometheus))
            .layer(DefaultBodyLimit::max(self.body_limit()))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state)
    }

    /// Bind `host:port` from the settings and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let bind = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening");

        let app = self.router();
        let token = self.stopping.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Stop accepting connections, let in-flight requests finish within
    /// `server.shutdown_timeout_secs`, then release the model.
    ///
    /// `serve` is the task returned by [`listen`](Self::listen); it is
    /// aborted if it outlives the grace period. The model is released on
    /// both outcomes, after which the manager refuses to load again.
    pub async fn stop(&self, serve: JoinHandle<()>) -> StopOutcome {
        let grace = Duration::from_secs(self.settings.server.shutdown_timeout_secs);
        self.stopping.cancel();
        info!(grace_secs = grace.as_secs(), "draining in-flight requests");

        let abort = serve.abort_handle();
        let outcome = if tokio::time::timeout(grace, serve).await.is_ok() {
            StopOutcome::Drained
        } else {
            warn!(grace_secs = grace.as_secs(), "grace period elapsed, dropping open connections");
            abort.abort();
            StopOutcome::Aborted
        };

        self.manager.cleanup();
        outcome
    }

    /// Get the effective settings.
    pub fn settings(&self) -> &MuseSettings {
        &self.settings
    }

    /// Get the model manager.
    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }
}
