//! In-memory [`ModelLoader`] for tests that should not touch ONNX Runtime.
//!
//! [`StaticLoader`] hands out a handle that returns fixed scores, optionally
//! after a delay or with an injected failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::device::{AcceleratorInfo, ResolvedDevice};
use crate::engine::{ModelHandle, ModelLoader, rank};
use crate::model::{AST_MODEL_TYPE, ModelSpec};
use crate::types::{ClassifierError, Prediction, Result};

/// Shared counter readable after the loader has been moved.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    /// Current value.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, value: usize) {
        self.0.store(value, Ordering::SeqCst);
    }

    fn incr(&self) {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader producing [`StaticModel`] handles.
#[derive(Clone, Debug)]
pub struct StaticLoader {
    scores: Vec<(String, f32)>,
    load_error: Option<String>,
    load_delay: Option<Duration>,
    classify_error: Option<String>,
    classify_delay: Option<Duration>,
    accelerator: AcceleratorInfo,
    loads: Counter,
    samples_seen: Counter,
}

impl StaticLoader {
    /// Loader whose model scores the given labels.
    pub fn new<S: Into<String>>(scores: impl IntoIterator<Item = (S, f32)>) -> Self {
        Self {
            scores: scores.into_iter().map(|(l, s)| (l.into(), s)).collect(),
            load_error: None,
            load_delay: None,
            classify_error: None,
            classify_delay: None,
            accelerator: AcceleratorInfo::none(),
            loads: Counter::default(),
            samples_seen: Counter::default(),
        }
    }

    /// Six genre labels with fixed scores, `jazz` on top.
    pub fn genres() -> Self {
        Self::new([
            ("rock", 0.05),
            ("jazz", 0.40),
            ("blues", 0.25),
            ("classical", 0.20),
            ("pop", 0.07),
            ("metal", 0.03),
        ])
    }

    /// Make `load` fail with `message`.
    #[must_use]
    pub fn failing_load(mut self, message: &str) -> Self {
        self.load_error = Some(message.to_string());
        self
    }

    /// Make every `classify` fail with `message`.
    #[must_use]
    pub fn failing_classify(mut self, message: &str) -> Self {
        self.classify_error = Some(message.to_string());
        self
    }

    /// Sleep inside `load` (on the blocking pool), holding the manager in
    /// `Loading`.
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Sleep inside `classify` (on the blocking pool).
    #[must_use]
    pub fn with_classify_delay(mut self, delay: Duration) -> Self {
        self.classify_delay = Some(delay);
        self
    }

    /// Report `accelerator` from [`ModelLoader::accelerator`].
    #[must_use]
    pub fn with_accelerator(mut self, accelerator: AcceleratorInfo) -> Self {
        self.accelerator = accelerator;
        self
    }

    /// Number of `load` calls.
    pub fn load_counter(&self) -> Counter {
        self.loads.clone()
    }

    /// Sample count of the most recent `classify` input.
    pub fn sample_counter(&self) -> Counter {
        self.samples_seen.clone()
    }
}

impl ModelLoader for StaticLoader {
    fn load(&self, _spec: &ModelSpec) -> Result<Arc<dyn ModelHandle>> {
        self.loads.incr();
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.load_error {
            return Err(ClassifierError::ModelLoad(message.clone()));
        }
        Ok(Arc::new(StaticModel {
            scores: self.scores.clone(),
            error: self.classify_error.clone(),
            delay: self.classify_delay,
            samples_seen: self.samples_seen.clone(),
        }))
    }

    fn accelerator(&self) -> AcceleratorInfo {
        self.accelerator.clone()
    }
}

/// Handle returning the loader's fixed scores.
#[derive(Debug)]
pub struct StaticModel {
    scores: Vec<(String, f32)>,
    error: Option<String>,
    delay: Option<Duration>,
    samples_seen: Counter,
}

impl ModelHandle for StaticModel {
    fn classify(&self, samples: &[f32]) -> Result<Vec<Prediction>> {
        self.samples_seen.set(samples.len());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.error {
            return Err(ClassifierError::Inference(message.clone()));
        }
        let scores: Vec<f32> = self.scores.iter().map(|(_, s)| *s).collect();
        Ok(rank(&scores, |i| self.scores[i].0.clone()))
    }

    fn model_type(&self) -> &str {
        AST_MODEL_TYPE
    }

    fn device(&self) -> ResolvedDevice {
        ResolvedDevice::Cpu
    }
}
