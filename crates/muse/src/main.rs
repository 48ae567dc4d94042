//! # muse
//!
//! Muse server binary: loads settings, loads the genre model once, then
//! serves the HTTP API until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use muse_classifier::{ModelManager, ModelSpec, OnnxModelLoader};
use muse_logging::LogFormat;
use muse_server::{MuseServer, StopOutcome};
use muse_settings::MuseSettings;

/// Music genre inference server.
#[derive(Parser, Debug)]
#[command(name = "muse", about = "Music genre inference server", version)]
struct Cli {
    /// Settings file (defaults to `$MUSE_SETTINGS_FILE` or `./muse.json`).
    #[arg(long, short = 'c')]
    settings: Option<PathBuf>,

    /// Host to bind, overriding settings.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign), overriding settings.
    #[arg(long)]
    port: Option<u16>,

    /// Default log filter when `RUST_LOG` is unset, overriding settings.
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: `compact` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Settings with command-line overrides applied on top.
    fn resolve_settings(&self) -> Result<MuseSettings> {
        let mut settings = match &self.settings {
            Some(path) => muse_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => muse_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.json = format == LogFormat::Json;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;

    muse_logging::init_subscriber(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    if settings.server.workers > 1 {
        tracing::warn!(
            workers = settings.server.workers,
            "multiple workers requested; serving from one process with a shared model"
        );
    }

    let loader = Arc::new(OnnxModelLoader::new());
    let manager = Arc::new(
        ModelManager::new(ModelSpec::from(&settings.model), loader)
            .with_top_k(settings.model.top_k)
            .with_inference_timeout(Some(Duration::from_secs(
                settings.server.inference_timeout_secs,
            ))),
    );
    manager
        .load()
        .await
        .with_context(|| format!("Failed to load model {}", settings.model.name))?;

    let metrics_handle =
        muse_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let title = settings.api.title.clone();
    let server = MuseServer::new(settings, Arc::clone(&manager), metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        model = manager.model_name(),
        device = manager.device_label(),
        "{title} listening on http://{addr}"
    );

    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    if server.stop(handle).await == StopOutcome::Aborted {
        tracing::warn!("in-flight requests were aborted");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_no_overrides() {
        let cli = Cli::parse_from(["muse"]);
        assert!(cli.settings.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.log_format.is_none());
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::parse_from([
            "muse",
            "--settings",
            "/etc/muse.json",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.settings, Some(PathBuf::from("/etc/muse.json")));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["muse", "--port", "70000"]).is_err());
    }

    #[test]
    fn overrides_apply_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muse.json");
        std::fs::write(&path, r#"{"server": {"host": "0.0.0.0", "port": 8000}}"#).unwrap();

        let cli = Cli::parse_from([
            "muse",
            "--settings",
            path.to_str().unwrap(),
            "--port",
            "0",
            "--log-format",
            "json",
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 0);
        assert!(settings.logging.json);
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "muse",
            "--settings",
            dir.path().join("absent.json").to_str().unwrap(),
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.server.port, 8000);
    }
}
