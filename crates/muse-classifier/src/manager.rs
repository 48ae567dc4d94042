//! Process-wide model lifecycle: load once, predict many, release at exit.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::audio::{MIN_SAMPLES, TARGET_SAMPLE_RATE, decode_audio, pad_to_min_length};
use crate::device::AcceleratorInfo;
use crate::engine::{ModelHandle, ModelLoader};
use crate::model::ModelSpec;
use crate::types::{ClassifierError, ModelState, PredictionResult, Result, ResultExt};

enum Slot {
    Unloaded,
    Loading,
    Ready(Arc<dyn ModelHandle>),
    /// After `cleanup()`: reports `Unloaded` but never loads again.
    Released,
}

impl Slot {
    fn state(&self) -> ModelState {
        match self {
            Self::Unloaded | Self::Released => ModelState::Unloaded,
            Self::Loading => ModelState::Loading,
            Self::Ready(_) => ModelState::Ready,
        }
    }
}

/// Owns the single model handle of the process.
///
/// Construct once at startup, call [`load`](Self::load), share as
/// `Arc<ModelManager>`. Decoding and inference run on the blocking pool so
/// the async runtime keeps accepting connections.
pub struct ModelManager {
    spec: ModelSpec,
    loader: Arc<dyn ModelLoader>,
    top_k: usize,
    inference_timeout: Option<Duration>,
    slot: RwLock<Slot>,
}

impl fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelManager")
            .field("model", &self.spec.name)
            .field("state", &self.state())
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    /// Create an unloaded manager.
    pub fn new(spec: ModelSpec, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            spec,
            loader,
            top_k: 5,
            inference_timeout: None,
            slot: RwLock::new(Slot::Unloaded),
        }
    }

    /// Number of labels returned per prediction (at least one).
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Bound each inference call. `None` or zero disables the bound.
    #[must_use]
    pub fn with_inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inference_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModelState {
        self.slot.read().state()
    }

    /// Whether predictions are accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == ModelState::Ready
    }

    /// Model identifier being served.
    pub fn model_name(&self) -> &str {
        &self.spec.name
    }

    /// Device in use when loaded, otherwise the requested device.
    pub fn device_label(&self) -> &'static str {
        match &*self.slot.read() {
            Slot::Ready(handle) => handle.device().as_str(),
            _ => self.spec.device.as_str(),
        }
    }

    /// Accelerator visible to the loader.
    pub fn accelerator(&self) -> AcceleratorInfo {
        self.loader.accelerator()
    }

    /// Fetch and instantiate the model.
    ///
    /// Valid only from `Unloaded`. The loader runs on the blocking pool; on
    /// failure the manager returns to `Unloaded` and the error is
    /// [`ClassifierError::ModelLoad`]. Once [`cleanup`](Self::cleanup) has
    /// run the manager never loads again: one handle per process.
    pub async fn load(&self) -> Result<()> {
        {
            let mut slot = self.slot.write();
            match *slot {
                Slot::Unloaded => *slot = Slot::Loading,
                Slot::Loading => {
                    return Err(ClassifierError::ModelLoad("load already in progress".into()));
                }
                Slot::Ready(_) => {
                    return Err(ClassifierError::ModelLoad("model already loaded".into()));
                }
                Slot::Released => {
                    return Err(ClassifierError::ModelLoad("model already released".into()));
                }
            }
        }

        let started = Instant::now();
        let loader = Arc::clone(&self.loader);
        let spec = self.spec.clone();
        let result = tokio::task::spawn_blocking(move || loader.load(&spec))
            .await
            .model_load("load task join")
            .and_then(|r| r);

        let mut slot = self.slot.write();
        if matches!(*slot, Slot::Released) {
            // cleanup() ran while the loader was busy
            return Err(ClassifierError::ModelLoad("model released during load".into()));
        }
        match result {
            Ok(handle) => {
                info!(
                    model = %self.spec.name,
                    device = handle.device().as_str(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "model loaded"
                );
                *slot = Slot::Ready(handle);
                Ok(())
            }
            Err(e) => {
                *slot = Slot::Unloaded;
                let e = match e {
                    ClassifierError::ModelLoad(_) => e,
                    other => ClassifierError::ModelLoad(other.to_string()),
                };
                error!(model = %self.spec.name, error = %e, "model load failed");
                Err(e)
            }
        }
    }

    fn handle(&self) -> Result<Arc<dyn ModelHandle>> {
        match &*self.slot.read() {
            Slot::Ready(handle) => Ok(Arc::clone(handle)),
            _ => Err(ClassifierError::NotLoaded),
        }
    }

    /// Classify one encoded audio clip.
    ///
    /// `extension` is a decoder hint such as `".mp3"`. The waveform is
    /// resampled to 16kHz mono and zero-padded to one second before
    /// inference. Failures are reported, never retried.
    pub async fn predict(&self, audio: Vec<u8>, extension: Option<&str>) -> Result<PredictionResult> {
        let handle = self.handle()?;
        let started = Instant::now();

        let hint = extension.map(str::to_owned);
        let samples = tokio::task::spawn_blocking(move || decode_audio(audio, hint.as_deref()))
            .await
            .inference("decode task join")??;
        let samples = pad_to_min_length(samples, MIN_SAMPLES);
        #[allow(clippy::cast_precision_loss)]
        let audio_duration = samples.len() as f64 / f64::from(TARGET_SAMPLE_RATE);

        let model = Arc::clone(&handle);
        let task = tokio::task::spawn_blocking(move || model.classify(&samples));
        let joined = match self.inference_timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                ClassifierError::Inference(format!("timed out after {}s", limit.as_secs_f64()))
            })?,
            None => task.await,
        };
        let mut predictions = joined.inference("inference task join")??;
        predictions.truncate(self.top_k);

        debug!(
            audio_duration,
            elapsed_ms = started.elapsed().as_millis(),
            top = predictions.first().map_or("", |p| p.label.as_str()),
            "prediction complete"
        );

        Ok(PredictionResult {
            predictions,
            model_name: self.spec.name.clone(),
            sample_rate: TARGET_SAMPLE_RATE,
            audio_duration,
            model_type: handle.model_type().to_string(),
        })
    }

    /// Release the model handle for good. The state reads `Unloaded`
    /// afterwards and [`load`](Self::load) is refused. Safe to call
    /// repeatedly.
    ///
    /// Predictions already running keep their own reference and finish.
    pub fn cleanup(&self) {
        let previous = std::mem::replace(&mut *self.slot.write(), Slot::Released);
        if let Slot::Ready(handle) = previous {
            drop(handle);
            info!(model = %self.spec.name, "model released");
        }
    }
}
