//! Model file resolution: local directories or `HuggingFace` downloads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use muse_settings::{Device, ModelSettings};
use serde::Deserialize;
use tracing::{debug, info};

use crate::features::FeatureConfig;
use crate::types::{ClassifierError, Result, ResultExt};

/// Architecture description reported for AST checkpoints.
pub const AST_MODEL_TYPE: &str = "Audio Spectrogram Transformer (AST)";

const CONFIG_FILE: &str = "config.json";
const PREPROCESSOR_FILE: &str = "preprocessor_config.json";

/// Everything needed to instantiate a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    /// `HuggingFace` repo id, or a local directory holding the same layout.
    pub name: String,
    /// Path of the ONNX graph relative to the repo root.
    pub onnx_file: String,
    /// Requested compute device.
    pub device: Device,
    /// Download cache.
    pub cache_dir: PathBuf,
    /// Intra-op threads for the ONNX session.
    pub intra_threads: usize,
}

impl From<&ModelSettings> for ModelSpec {
    fn from(s: &ModelSettings) -> Self {
        Self {
            name: s.name.clone(),
            onnx_file: s.onnx_file.clone(),
            device: s.device,
            cache_dir: PathBuf::from(&s.cache_dir),
            intra_threads: s.intra_threads,
        }
    }
}

/// Resolved on-disk model files.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelFiles {
    /// ONNX graph.
    pub onnx: PathBuf,
    /// `config.json` with `id2label`.
    pub config: PathBuf,
    /// `preprocessor_config.json`, when the repo ships one.
    pub preprocessor: Option<PathBuf>,
}

/// Subset of the model `config.json` this crate reads.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelConfig {
    /// Class index (as a string key) to label.
    #[serde(default)]
    pub id2label: BTreeMap<String, String>,
    /// Architecture identifier, e.g. `audio-spectrogram-transformer`.
    #[serde(default)]
    pub model_type: Option<String>,
}

impl ModelConfig {
    /// Parse a `config.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).model_load("parse config.json")
    }

    /// Label for class `index`, `LABEL_<index>` when unmapped.
    pub fn label(&self, index: usize) -> String {
        self.id2label
            .get(&index.to_string())
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{index}"))
    }

    /// Human readable architecture description.
    pub fn describe(&self) -> String {
        match self.model_type.as_deref() {
            Some("audio-spectrogram-transformer") | None => AST_MODEL_TYPE.to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// Read feature parameters, defaulting when the file is absent.
pub fn load_feature_config(path: Option<&Path>) -> Result<FeatureConfig> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)?;
            serde_json::from_str(&content).model_load("parse preprocessor_config.json")
        }
        None => Ok(FeatureConfig::default()),
    }
}

/// Appended to missing-graph errors.
const EXPORT_HINT: &str =
    "export with `optimum-cli export onnx --task audio-classification` and set model.onnx_file";

/// Resolve model files for `spec`, downloading them if needed.
///
/// Blocking: performs network and disk I/O. Call from `spawn_blocking`.
pub fn resolve_model_files(spec: &ModelSpec) -> Result<ModelFiles> {
    let local = Path::new(&spec.name);
    if local.is_dir() {
        return local_model_files(local, &spec.onnx_file);
    }
    download_model_files(spec)
}

/// Model files from a local directory with the repository layout.
pub fn local_model_files(dir: &Path, onnx_file: &str) -> Result<ModelFiles> {
    debug!(dir = %dir.display(), "using local model directory");
    let onnx = dir.join(onnx_file);
    let config = dir.join(CONFIG_FILE);
    if !config.is_file() {
        return Err(ClassifierError::ModelLoad(format!(
            "missing model file: {}",
            config.display()
        )));
    }
    if !onnx.is_file() {
        return Err(ClassifierError::ModelLoad(format!(
            "missing model file: {} ({EXPORT_HINT})",
            onnx.display()
        )));
    }
    let preprocessor = Some(dir.join(PREPROCESSOR_FILE)).filter(|p| p.is_file());
    Ok(ModelFiles {
        onnx,
        config,
        preprocessor,
    })
}

fn download_model_files(spec: &ModelSpec) -> Result<ModelFiles> {
    std::fs::create_dir_all(&spec.cache_dir)?;
    debug!(cache_dir = %spec.cache_dir.display(), model = %spec.name, "resolving model via hf-hub");

    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_cache_dir(spec.cache_dir.clone())
        .build()
        .model_load("hf-hub api")?;
    let repo = api.model(spec.name.clone());

    let onnx = repo.get(&spec.onnx_file).model_load(&format!(
        "download {} (repo has no ONNX export? {EXPORT_HINT})",
        spec.onnx_file
    ))?;
    let config = repo.get(CONFIG_FILE).model_load("download config.json")?;
    let preprocessor = match repo.get(PREPROCESSOR_FILE) {
        Ok(p) => Some(p),
        Err(e) => {
            debug!(error = %e, "no preprocessor config, using defaults");
            None
        }
    };

    info!(model = %onnx.display(), "model files ready");
    Ok(ModelFiles {
        onnx,
        config,
        preprocessor,
    })
}
