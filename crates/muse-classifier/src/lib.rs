//! Genre classification for uploaded audio.
//!
//! # Architecture
//!
//! ```text
//! audio bytes → symphonia decode → mono mix → rubato resample to 16kHz
//! → zero-pad to 1s → Kaldi fbank [1024, 128] → ONNX classifier → softmax
//! → top-k labels from config.json id2label
//! ```
//!
//! [`ModelManager`] owns the single model handle of the process and runs
//! all blocking work on tokio's blocking pool. The backend sits behind the
//! [`ModelLoader`]/[`ModelHandle`] traits; [`OnnxModelLoader`] is the
//! production implementation and [`testing::StaticLoader`] a fixed-score
//! stand-in.
//!
//! # Model files
//!
//! `model.name` is either a Hugging Face repo id or a local directory. Both
//! must have this layout:
//!
//! ```text
//! config.json               id2label, model_type      (required)
//! preprocessor_config.json  fbank parameters          (optional, AST defaults)
//! onnx/model.onnx           the graph, `model.onnx_file` (required)
//! ```
//!
//! Checkpoints published for PyTorch only (such as the default
//! `marsyas/gtzan-ft-music-speech-moods-fma-gtzan`) ship `config.json` but no
//! graph. Export one with Hugging Face Optimum and point `model.name` at the
//! output directory:
//!
//! ```text
//! pip install "optimum[exporters]"
//! optimum-cli export onnx --model <repo-id> --task audio-classification ./genre-model
//! MUSE_MODEL_NAME=./genre-model muse
//! ```
//!
//! The exporter writes `model.onnx` at the top level; set
//! `MUSE_MODEL_ONNX_FILE=model.onnx` or move it under `onnx/`. The graph
//! must take `input_values` shaped `[1, max_length, num_mel_bins]` and
//! return logits shaped `[1, num_labels]`.

#![deny(unsafe_code)]

pub mod audio;
pub mod device;
pub mod engine;
pub mod features;
pub mod manager;
pub mod model;
pub mod testing;
pub mod types;

pub use device::{AcceleratorInfo, ResolvedDevice};
pub use engine::{ModelHandle, ModelLoader, OnnxModelLoader};
pub use manager::ModelManager;
pub use model::ModelSpec;
pub use types::{ClassifierError, ModelState, Prediction, PredictionResult, Result};
