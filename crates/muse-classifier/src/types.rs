//! Core types for the genre classifier.

use serde::Serialize;

/// One scored label.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    /// Class label, e.g. `"rock"`.
    pub label: String,
    /// Softmax probability in `[0, 1]`.
    pub score: f32,
}

/// Outcome of classifying one audio clip.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictionResult {
    /// Top-k labels, highest score first.
    pub predictions: Vec<Prediction>,
    /// Model identifier the handle was loaded from.
    pub model_name: String,
    /// Sample rate of the waveform fed to the model.
    pub sample_rate: u32,
    /// Seconds of audio after zero padding.
    pub audio_duration: f64,
    /// Architecture description of the loaded model.
    pub model_type: String,
}

/// Lifecycle of the process-wide model handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    /// No handle exists.
    Unloaded,
    /// `load()` is in flight.
    Loading,
    /// A handle exists and accepts predictions.
    Ready,
}

impl ModelState {
    /// Lowercase name for logs and health output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
        }
    }
}

/// Errors that can occur while loading or running the classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Model files unresolvable, corrupt, or device unavailable.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// A prediction was requested before `load()` completed.
    #[error("model not loaded")]
    NotLoaded,

    /// Bytes are not parseable audio.
    #[error("audio decode error: {0}")]
    Decode(String),

    /// Resampling to the model rate failed.
    #[error("resample error: {0}")]
    Resample(String),

    /// Failure inside feature extraction or the ONNX session.
    #[error("inference error: {0}")]
    Inference(String),

    /// I/O error (file read/write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassifierError {
    /// Stable snake_case label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelLoad(_) => "model_load",
            Self::NotLoaded => "not_loaded",
            Self::Decode(_) => "decode",
            Self::Resample(_) => "resample",
            Self::Inference(_) => "inference",
            Self::Io(_) => "io",
        }
    }
}

/// Result alias for classifier operations.
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Attach context to foreign errors while converting them.
pub trait ResultExt<T> {
    /// Map the error to [`ClassifierError::Inference`].
    fn inference(self, context: &str) -> Result<T>;
    /// Map the error to [`ClassifierError::ModelLoad`].
    fn model_load(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn inference(self, context: &str) -> Result<T> {
        self.map_err(|e| ClassifierError::Inference(format!("{context}: {e}")))
    }

    fn model_load(self, context: &str) -> Result<T> {
        self.map_err(|e| ClassifierError::ModelLoad(format!("{context}: {e}")))
    }
}
