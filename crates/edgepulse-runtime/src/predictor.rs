//! Event predictor
//!
//! The predictor loads a model once at startup, then each cycle scores
//! the current readings and, in Prediction mode, writes a probability
//! per event label into the shared document. A load failure ends this
//! worker only; the rest of the device keeps running.
//!
//! The default model is a JSON linear classifier:
//!
//! ```json
//! { "labels": ["Cold", "Warm", "Hot", "Dry", "Wet", "Normal", "Unknown"],
//!   "weights": [[...6 values...], ...7 rows...],
//!   "bias": [...7 values...] }
//! ```
//!
//! Rows may be listed in any label order; scores are always produced in
//! `EventLabel::ALL` order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use edgepulse_core::{
    prediction_from_scores, EdgeError, EdgeResult, EventLabel, Mode, Readings, SharedControl,
    SharedTelemetry, StopSignal, READING_MAX,
};

use crate::DutyStats;

/// A loaded scoring model
pub trait Model: Send {
    /// One score per label, in `EventLabel::ALL` order
    fn predict(&mut self, features: &[f64]) -> EdgeResult<Vec<f64>>;

    /// Free model resources. Called once when the predictor stops.
    fn release(&mut self) {}
}

/// Opens model artifacts
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> EdgeResult<Box<dyn Model>>;
}

/// Model inputs: readings scaled to `[0, 1)`
pub fn features(readings: &Readings) -> [f64; Readings::CHANNELS] {
    readings.to_array().map(|value| value / READING_MAX)
}

#[derive(Debug, Deserialize)]
struct ModelArtifact {
    labels: Vec<String>,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

/// Linear layer followed by softmax
#[derive(Clone, Debug, PartialEq)]
pub struct LinearModel {
    weights: [[f64; Readings::CHANNELS]; EventLabel::COUNT],
    bias: [f64; EventLabel::COUNT],
}

impl LinearModel {
    pub fn new(
        weights: [[f64; Readings::CHANNELS]; EventLabel::COUNT],
        bias: [f64; EventLabel::COUNT],
    ) -> Self {
        LinearModel { weights, bias }
    }

    /// Parse and validate a JSON artifact
    pub fn from_json(text: &str) -> EdgeResult<Self> {
        let artifact: ModelArtifact =
            serde_json::from_str(text).map_err(|e| EdgeError::ModelLoad(e.to_string()))?;

        if artifact.labels.len() != EventLabel::COUNT
            || artifact.weights.len() != EventLabel::COUNT
            || artifact.bias.len() != EventLabel::COUNT
        {
            return Err(EdgeError::ModelLoad(format!(
                "expected {} labels, weight rows and biases",
                EventLabel::COUNT
            )));
        }

        let mut weights = [[0.0; Readings::CHANNELS]; EventLabel::COUNT];
        let mut bias = [0.0; EventLabel::COUNT];
        let mut seen = [false; EventLabel::COUNT];

        for (row, name) in artifact.labels.iter().enumerate() {
            let label = EventLabel::from_name(name)
                .ok_or_else(|| EdgeError::ModelLoad(format!("unknown label {:?}", name)))?;
            let slot = label as usize;
            if seen[slot] {
                return Err(EdgeError::ModelLoad(format!("duplicate label {}", label)));
            }
            seen[slot] = true;

            let source = &artifact.weights[row];
            if source.len() != Readings::CHANNELS {
                return Err(EdgeError::ModelLoad(format!(
                    "row {} has {} weights, expected {}",
                    label,
                    source.len(),
                    Readings::CHANNELS
                )));
            }
            weights[slot].copy_from_slice(source);
            bias[slot] = artifact.bias[row];
        }

        if weights.iter().flatten().chain(bias.iter()).any(|v| !v.is_finite()) {
            return Err(EdgeError::ModelLoad("non-finite parameter".to_string()));
        }

        Ok(LinearModel { weights, bias })
    }
}

impl Model for LinearModel {
    fn predict(&mut self, features: &[f64]) -> EdgeResult<Vec<f64>> {
        if features.len() != Readings::CHANNELS {
            return Err(EdgeError::Prediction(format!(
                "expected {} features, got {}",
                Readings::CHANNELS,
                features.len()
            )));
        }

        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(self.bias.iter())
            .map(|(row, b)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();

        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(EdgeError::Prediction("degenerate scores".to_string()));
        }
        Ok(exps.into_iter().map(|e| e / total).collect())
    }
}

/// Loads `LinearModel` artifacts from disk
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonModelLoader;

impl ModelLoader for JsonModelLoader {
    fn load(&self, path: &Path) -> EdgeResult<Box<dyn Model>> {
        let text = fs::read_to_string(path)
            .map_err(|e| EdgeError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        Ok(Box::new(LinearModel::from_json(&text)?))
    }
}

/// Predictor duty cycle
pub struct Predictor {
    loader: Arc<dyn ModelLoader>,
    path: PathBuf,
    telemetry: SharedTelemetry,
    control: SharedControl,
}

impl Predictor {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        path: PathBuf,
        telemetry: SharedTelemetry,
        control: SharedControl,
    ) -> Self {
        Predictor {
            loader,
            path,
            telemetry,
            control,
        }
    }

    /// Score the current readings once. Writes only in Prediction mode.
    /// Returns whether a prediction was written.
    pub fn cycle(&self, model: &mut dyn Model) -> bool {
        if self.control.mode() != Mode::Prediction {
            return false;
        }

        let readings = self.telemetry.snapshot().document.readings;
        let scores = match model.predict(&features(&readings)) {
            Ok(scores) => scores,
            Err(e) => {
                warn!("Prediction failed: {}", e);
                return false;
            }
        };
        match prediction_from_scores(&scores) {
            Ok(prediction) => {
                self.telemetry.update(|doc| doc.prediction = Some(prediction));
                true
            }
            Err(e) => {
                warn!("Prediction discarded: {}", e);
                false
            }
        }
    }

    /// Load the model, then run until stopped
    pub async fn run(self, stop: StopSignal) -> EdgeResult<DutyStats> {
        let mut model = match self.loader.load(&self.path) {
            Ok(model) => model,
            Err(e) => {
                error!(path = %self.path.display(), "Model load failed, predictor disabled: {}", e);
                return Err(e);
            }
        };
        info!(path = %self.path.display(), "Model loaded");

        let mut stats = DutyStats::default();
        while !stop.is_stopped() {
            if self.cycle(model.as_mut()) {
                stats.writes += 1;
            }
            stats.iterations += 1;
            if !stop.sleep(self.control.speed().cadence()).await {
                break;
            }
        }

        model.release();
        debug!("Model released");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgepulse_core::Speed;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const ARTIFACT: &str = r#"{
        "labels": ["Unknown", "Cold", "Warm", "Hot", "Dry", "Wet", "Normal"],
        "weights": [
            [0, 0, 0, 0, 0, 0],
            [0, 0, 0, -4, 0, 0],
            [0, 0, 0, 1, 0, 0],
            [0, 0, 0, 4, 0, 0],
            [0, 0, 0, 0, -4, 0],
            [0, 0, 0, 0, 4, 0],
            [1, 1, 1, 0, 0, 1]
        ],
        "bias": [-1, 0, 0, 0, 0, 0, 0.5]
    }"#;

    #[test]
    fn test_features_scaled() {
        let readings = Readings::from_array([0.0, 50.0, 99.0, 10.0, 25.0, 75.0]);
        assert_eq!(features(&readings), [0.0, 0.5, 0.99, 0.1, 0.25, 0.75]);
    }

    #[test]
    fn test_linear_model_reorders_rows() {
        let mut model = LinearModel::from_json(ARTIFACT).unwrap();
        let hot = model.predict(&[0.0, 0.0, 0.0, 1.0, 0.5, 0.0]).unwrap();
        assert_eq!(hot.len(), EventLabel::COUNT);
        let sum: f64 = hot.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);

        let best = hot
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| EventLabel::from_index(i).unwrap())
            .unwrap();
        assert_eq!(best, EventLabel::Hot);
    }

    #[test]
    fn test_invalid_artifacts() {
        assert!(LinearModel::from_json("{}").is_err());
        assert!(LinearModel::from_json(&ARTIFACT.replace("\"Unknown\"", "\"Cold\"")).is_err());
        assert!(LinearModel::from_json(&ARTIFACT.replace("\"Unknown\"", "\"Foggy\"")).is_err());
        assert!(LinearModel::from_json(&ARTIFACT.replace("[0, 0, 0, 1, 0, 0]", "[0, 1]")).is_err());
    }

    #[test]
    fn test_bundled_model_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../models/event-linear.json");
        let mut model = JsonModelLoader.load(&path).unwrap();
        let readings = Readings::from_array([40.0, 40.0, 40.0, 95.0, 50.0, 50.0]);
        let scores = model.predict(&features(&readings)).unwrap();
        assert_eq!(scores.len(), EventLabel::COUNT);
        assert!(prediction_from_scores(&scores).is_ok());
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = JsonModelLoader
            .load(Path::new("/nonexistent/edgepulse/model.json"))
            .err()
            .unwrap();
        assert!(matches!(err, EdgeError::ModelLoad(_)));
    }

    struct Uniform {
        released: Arc<AtomicBool>,
    }

    impl Model for Uniform {
        fn predict(&mut self, _features: &[f64]) -> EdgeResult<Vec<f64>> {
            Ok(vec![1.0 / 7.0; 7])
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct UniformLoader {
        released: Arc<AtomicBool>,
    }

    impl ModelLoader for UniformLoader {
        fn load(&self, _path: &Path) -> EdgeResult<Box<dyn Model>> {
            Ok(Box::new(Uniform {
                released: self.released.clone(),
            }))
        }
    }

    fn predictor(loader: Arc<dyn ModelLoader>) -> (Predictor, SharedTelemetry, SharedControl) {
        let telemetry = SharedTelemetry::new();
        let control = SharedControl::new();
        let predictor = Predictor::new(
            loader,
            PathBuf::from("uniform"),
            telemetry.clone(),
            control.clone(),
        );
        (predictor, telemetry, control)
    }

    #[test]
    fn test_safe_mode_writes_nothing() {
        let released = Arc::new(AtomicBool::new(false));
        let (predictor, telemetry, control) = predictor(Arc::new(UniformLoader { released }));
        let mut model = Uniform {
            released: Arc::new(AtomicBool::new(false)),
        };

        assert!(!predictor.cycle(&mut model));
        assert!(telemetry.snapshot().document.prediction.is_none());

        control.apply(Mode::Prediction, Speed::Slow);
        assert!(predictor.cycle(&mut model));
        let prediction = telemetry.snapshot().document.prediction.unwrap();
        assert_eq!(prediction.len(), EventLabel::COUNT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_releases_model_on_stop() {
        let released = Arc::new(AtomicBool::new(false));
        let (predictor, telemetry, control) = predictor(Arc::new(UniformLoader {
            released: released.clone(),
        }));
        control.apply(Mode::Prediction, Speed::Fast);
        let stop = StopSignal::new();
        let handle = tokio::spawn(predictor.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(350)).await;
        stop.trigger();
        let stats = handle.await.unwrap().unwrap();
        assert!(stats.writes >= 3);
        assert!(released.load(Ordering::SeqCst));
        assert!(telemetry.snapshot().document.prediction.is_some());
    }

    #[tokio::test]
    async fn test_load_failure_ends_worker() {
        let (predictor, _, _) = predictor(Arc::new(JsonModelLoader));
        let result = predictor.run(StopSignal::new()).await;
        assert!(matches!(result, Err(EdgeError::ModelLoad(_))));
    }
}
