//! Settings type definitions.
//!
//! Every section implements [`Default`] with production values and is
//! marked `#[serde(default)]`, so a settings file only needs the keys it
//! wants to change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the inference server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuseSettings {
    /// Which model to serve and where to run it.
    pub model: ModelSettings,
    /// Upload validation limits.
    pub upload: UploadSettings,
    /// Network binding and request handling.
    pub server: ServerSettings,
    /// Service banner metadata.
    pub api: ApiSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl MuseSettings {
    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(SettingsError::invalid("model.name", "is empty"));
        }
        if self.model.top_k == 0 {
            return Err(SettingsError::invalid("model.top_k", "must be > 0"));
        }
        if self.upload.max_file_size == 0 {
            return Err(SettingsError::invalid("upload.max_file_size", "must be > 0"));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(SettingsError::invalid(
                "upload.allowed_extensions",
                "must list at least one extension",
            ));
        }
        if self.upload.max_batch_files == 0 {
            return Err(SettingsError::invalid("upload.max_batch_files", "must be > 0"));
        }
        Ok(())
    }
}

/// Compute device selector for the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Use the accelerator when one is available, otherwise the CPU.
    #[default]
    Auto,
    /// Always run on the CPU.
    Cpu,
    /// Require a CUDA accelerator.
    Cuda,
}

impl Device {
    /// Lowercase name as used in settings and API responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            _ => Err(SettingsError::UnknownDevice(s.trim().to_string())),
        }
    }
}

/// Model identity, placement and inference knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Hugging Face repository id of the audio classification model.
    pub name: String,
    /// Path of the ONNX export inside the repository.
    pub onnx_file: String,
    /// Compute device.
    pub device: Device,
    /// Local download cache for model files.
    pub cache_dir: String,
    /// Number of labels returned per prediction.
    pub top_k: usize,
    /// Intra-op thread count for the ONNX session.
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "marsyas/gtzan-ft-music-speech-moods-fma-gtzan".to_string(),
            onnx_file: "onnx/model.onnx".to_string(),
            device: Device::Auto,
            cache_dir: "./model_cache".to_string(),
            top_k: 5,
            intra_threads: 4,
        }
    }
}

/// Upload validation limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Maximum size of a single uploaded file in bytes.
    pub max_file_size: u64,
    /// Accepted file extensions, lowercase with a leading dot.
    pub allowed_extensions: Vec<String>,
    /// Maximum number of files in one batch request.
    pub max_batch_files: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            allowed_extensions: [".mp3", ".wav", ".flac", ".m4a"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_batch_files: 10,
        }
    }
}

impl UploadSettings {
    /// Whether `extension` (any case, with or without the dot) is allowed.
    pub fn is_allowed(&self, extension: &str) -> bool {
        let wanted = normalize_extension(extension);
        self.allowed_extensions
            .iter()
            .any(|e| normalize_extension(e) == wanted)
    }

    /// Size limit expressed in megabytes, as reported by the API.
    #[allow(clippy::cast_precision_loss)]
    pub fn max_file_size_mb(&self) -> f64 {
        self.max_file_size as f64 / 1024.0 / 1024.0
    }
}

/// Lowercase an extension and make sure it starts with a dot.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// Network binding and request handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Requested worker process count. One process serves one model.
    pub workers: usize,
    /// Per-prediction timeout in seconds; `0` disables it.
    pub inference_timeout_secs: u64,
    /// How long graceful shutdown waits for in-flight requests.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: 1,
            inference_timeout_secs: 0,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Service banner metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Human readable service name.
    pub title: String,
    /// Service version string.
    pub version: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            title: "Music Genre Inference API".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
