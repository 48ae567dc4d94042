//! Model loading seam and the ONNX Runtime classifier.
//!
//! [`ModelLoader`] and [`ModelHandle`] are the boundary between the model
//! manager and the inference backend. Both are blocking and are always
//! driven from `spawn_blocking`.

use std::sync::Arc;

use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::TARGET_SAMPLE_RATE;
use crate::device::{AcceleratorInfo, ResolvedDevice, probe_accelerator, resolve_device};
use crate::features::FilterbankExtractor;
use crate::model::{self, ModelConfig, ModelSpec};
use crate::types::{ClassifierError, Prediction, Result, ResultExt};

/// A loaded model plus its feature extractor.
pub trait ModelHandle: Send + Sync {
    /// Score 16kHz mono `samples` against every class, highest first.
    fn classify(&self, samples: &[f32]) -> Result<Vec<Prediction>>;

    /// Architecture description for API responses.
    fn model_type(&self) -> &str;

    /// Device the model runs on.
    fn device(&self) -> ResolvedDevice;
}

/// Instantiates [`ModelHandle`]s.
pub trait ModelLoader: Send + Sync {
    /// Fetch and instantiate the model described by `spec`.
    fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelHandle>>;

    /// Accelerator visible to this loader, with current device stats.
    /// May block on a driver query.
    fn accelerator(&self) -> AcceleratorInfo;
}

/// Loads ONNX exports of audio classification checkpoints.
#[derive(Debug)]
pub struct OnnxModelLoader {
    accelerator: AcceleratorInfo,
}

impl OnnxModelLoader {
    /// Create a loader, probing for an accelerator once.
    pub fn new() -> Self {
        let accelerator = probe_accelerator();
        debug!(?accelerator, "probed execution providers");
        Self { accelerator }
    }
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelHandle>> {
        let device = resolve_device(spec.device, &self.accelerator)?;
        info!(model = %spec.name, device = device.as_str(), "loading model");

        let files = model::resolve_model_files(spec)?;
        let config = ModelConfig::from_file(&files.config)?;
        let feature_config = model::load_feature_config(files.preprocessor.as_deref())?;
        if feature_config.sampling_rate != TARGET_SAMPLE_RATE {
            warn!(
                expected = feature_config.sampling_rate,
                actual = TARGET_SAMPLE_RATE,
                "model expects a different sample rate"
            );
        }

        let session = build_session(&files.onnx, spec.intra_threads, device)?;

        info!(
            labels = config.id2label.len(),
            mel_bins = feature_config.num_mel_bins,
            frames = feature_config.max_length,
            "model ready"
        );

        Ok(Arc::new(OnnxModel {
            session: Mutex::new(session),
            extractor: FilterbankExtractor::new(feature_config),
            model_type: config.describe(),
            config,
            device,
        }))
    }

    fn accelerator(&self) -> AcceleratorInfo {
        self.accelerator.clone().with_device_stats()
    }
}

fn build_session(
    path: &std::path::Path,
    intra_threads: usize,
    device: ResolvedDevice,
) -> Result<Session> {
    let builder = Session::builder()
        .model_load("session builder")?
        .with_intra_threads(intra_threads)
        .model_load("set threads")?
        .with_log_level(ort::logging::LogLevel::Warning)
        .model_load("log level")?;

    #[cfg(feature = "cuda")]
    let builder = if device == ResolvedDevice::Cuda {
        use ort::execution_providers::CUDAExecutionProvider;
        builder
            .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])
            .model_load("register CUDA execution provider")?
    } else {
        builder
    };
    #[cfg(not(feature = "cuda"))]
    let _ = device;

    builder
        .commit_from_file(path)
        .model_load(&format!("load {}", path.display()))
}

/// The logits output: the first one the graph declares.
fn first_output<T>(mut outputs: impl Iterator<Item = T>) -> Result<T> {
    outputs
        .next()
        .ok_or_else(|| ClassifierError::Inference("model graph produced no outputs".into()))
}

/// ONNX Runtime session with filterbank preprocessing.
///
/// The session sits behind a mutex since `Session::run` needs `&mut self`.
pub struct OnnxModel {
    session: Mutex<Session>,
    extractor: FilterbankExtractor,
    config: ModelConfig,
    model_type: String,
    device: ResolvedDevice,
}

impl OnnxModel {
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn logits(&self, samples: &[f32]) -> Result<Vec<f32>> {
        let features = self.extractor.extract(samples);
        let cfg = self.extractor.config();
        let input = Tensor::from_array((
            [1i64, cfg.max_length as i64, cfg.num_mel_bins as i64],
            features,
        ))
        .inference("input tensor")?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![input]).inference("session run")?;

        let logits = first_output(outputs.values())?;
        let (shape, data) = logits
            .try_extract_tensor::<f32>()
            .inference("extract logits")?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 2 || dims[0] != 1 || dims[1] == 0 || data.len() != dims[1] {
            return Err(ClassifierError::Inference(format!(
                "unexpected logits shape: {dims:?}"
            )));
        }
        Ok(data.to_vec())
    }
}

impl ModelHandle for OnnxModel {
    fn classify(&self, samples: &[f32]) -> Result<Vec<Prediction>> {
        let logits = self.logits(samples)?;
        Ok(rank(&softmax(&logits), |i| self.config.label(i)))
    }

    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn device(&self) -> ResolvedDevice {
        self.device
    }
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Pair scores with labels and sort highest first. Ties keep index order.
pub fn rank(scores: &[f32], label: impl Fn(usize) -> String) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| Prediction {
            label: label(i),
            score,
        })
        .collect();
    predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
    predictions
}
