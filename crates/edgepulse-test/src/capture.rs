//! Capturing render target and fixed-output model

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use edgepulse_core::{EdgeError, EdgeResult, EventLabel};
use edgepulse_runtime::{Model, ModelLoader, RenderTarget};

/// Keeps every rendered document. Clones share the buffer.
#[derive(Clone, Debug, Default)]
pub struct CaptureTarget {
    frames: Arc<Mutex<Vec<String>>>,
}

impl CaptureTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn documents(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }
}

impl RenderTarget for CaptureTarget {
    fn render(&mut self, text: &str) -> EdgeResult<()> {
        self.frames.lock().push(text.to_string());
        Ok(())
    }
}

/// Shared counters for `FixedModel`
#[derive(Debug, Default)]
pub struct ModelUsage {
    pub predictions: AtomicU64,
    pub released: AtomicBool,
}

/// Model that always returns the same scores
pub struct FixedModel {
    scores: Vec<f64>,
    usage: Arc<ModelUsage>,
}

impl Model for FixedModel {
    fn predict(&mut self, _features: &[f64]) -> EdgeResult<Vec<f64>> {
        self.usage.predictions.fetch_add(1, Ordering::Relaxed);
        Ok(self.scores.clone())
    }

    fn release(&mut self) {
        self.usage.released.store(true, Ordering::SeqCst);
    }
}

/// Loader for `FixedModel`, or a load failure
#[derive(Clone, Debug)]
pub struct FixedLoader {
    scores: Option<Vec<f64>>,
    usage: Arc<ModelUsage>,
}

impl FixedLoader {
    pub fn new(scores: Vec<f64>) -> Self {
        FixedLoader {
            scores: Some(scores),
            usage: Arc::new(ModelUsage::default()),
        }
    }

    /// Scores peaked on `label`
    pub fn peaked(label: EventLabel) -> Self {
        let scores = EventLabel::ALL
            .iter()
            .map(|l| if *l == label { 0.7 } else { 0.05 })
            .collect();
        Self::new(scores)
    }

    /// A loader whose every load fails
    pub fn failing() -> Self {
        FixedLoader {
            scores: None,
            usage: Arc::new(ModelUsage::default()),
        }
    }

    pub fn usage(&self) -> Arc<ModelUsage> {
        self.usage.clone()
    }
}

impl ModelLoader for FixedLoader {
    fn load(&self, path: &Path) -> EdgeResult<Box<dyn Model>> {
        match &self.scores {
            Some(scores) => Ok(Box::new(FixedModel {
                scores: scores.clone(),
                usage: self.usage.clone(),
            })),
            None => Err(EdgeError::ModelLoad(format!(
                "{}: no such model",
                path.display()
            ))),
        }
    }
}
