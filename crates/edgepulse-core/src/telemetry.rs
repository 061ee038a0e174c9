//! Telemetry document definitions
//!
//! The telemetry document is the single record the device produces.
//! It is regenerated by the generator, annotated by the predictor,
//! rendered by the local sink, and streamed by the transport.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{EdgeError, EdgeResult, Mode, UNKNOWN_DEVICE};

/// Wall-clock format used for `TimeStamp`
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%y %H:%M:%S";

/// Upper bound (exclusive) of every reading channel
pub const READING_MAX: f64 = 100.0;

/// Format a wall-clock instant the way the document carries it
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Categorical event label
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventLabel {
    Cold,
    Warm,
    Hot,
    Dry,
    Wet,
    Normal,
    Unknown,
}

impl EventLabel {
    /// The closed label set, in scoring order
    pub const ALL: [EventLabel; 7] = [
        EventLabel::Cold,
        EventLabel::Warm,
        EventLabel::Hot,
        EventLabel::Dry,
        EventLabel::Wet,
        EventLabel::Normal,
        EventLabel::Unknown,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn name(self) -> &'static str {
        match self {
            EventLabel::Cold => "Cold",
            EventLabel::Warm => "Warm",
            EventLabel::Hot => "Hot",
            EventLabel::Dry => "Dry",
            EventLabel::Wet => "Wet",
            EventLabel::Normal => "Normal",
            EventLabel::Unknown => "Unknown",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.name().eq_ignore_ascii_case(name.trim()))
    }

    #[inline]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for EventLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Six continuous sensor channels, each in [0, 100)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    #[serde(rename = "CO2")]
    pub co2: f64,
    #[serde(rename = "VOC")]
    pub voc: f64,
    #[serde(rename = "RA")]
    pub radiation: f64,
    #[serde(rename = "TEMP")]
    pub temperature: f64,
    #[serde(rename = "HUMID")]
    pub humidity: f64,
    #[serde(rename = "PRESSURE")]
    pub pressure: f64,
}

impl Readings {
    pub const CHANNELS: usize = 6;

    /// Channel values in fixed order (CO2, VOC, RA, TEMP, HUMID, PRESSURE)
    pub fn to_array(&self) -> [f64; Self::CHANNELS] {
        [
            self.co2,
            self.voc,
            self.radiation,
            self.temperature,
            self.humidity,
            self.pressure,
        ]
    }

    pub fn from_array(values: [f64; Self::CHANNELS]) -> Self {
        Readings {
            co2: values[0],
            voc: values[1],
            radiation: values[2],
            temperature: values[3],
            humidity: values[4],
            pressure: values[5],
        }
    }

    /// Whether every channel lies in [0, 100)
    pub fn in_range(&self) -> bool {
        self.to_array()
            .iter()
            .all(|v| (0.0..READING_MAX).contains(v))
    }
}

/// Per-label classification scores, each in [0, 1]
pub type Prediction = BTreeMap<EventLabel, f64>;

/// Build a prediction map from scores in `EventLabel::ALL` order.
/// Scores are clamped into [0, 1]; a wrong count is rejected.
pub fn prediction_from_scores(scores: &[f64]) -> EdgeResult<Prediction> {
    if scores.len() != EventLabel::COUNT {
        return Err(EdgeError::Prediction(format!(
            "expected {} scores, got {}",
            EventLabel::COUNT,
            scores.len()
        )));
    }

    Ok(EventLabel::ALL
        .iter()
        .zip(scores)
        .map(|(label, score)| {
            let score = if score.is_finite() { *score } else { 0.0 };
            (*label, score.clamp(0.0, 1.0))
        })
        .collect())
}

/// The shared telemetry record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDocument {
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,
    #[serde(rename = "HardwareID")]
    pub device_id: String,
    #[serde(rename = "Event")]
    pub event: EventLabel,
    #[serde(rename = "Mode")]
    pub mode_label: String,
    #[serde(rename = "Data")]
    pub readings: Readings,
    #[serde(rename = "Prediction", default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
}

impl TelemetryDocument {
    /// Create an initial document stamped with the current time
    pub fn new() -> Self {
        TelemetryDocument {
            timestamp: format_timestamp(Local::now()),
            device_id: UNKNOWN_DEVICE.to_string(),
            event: EventLabel::Unknown,
            mode_label: Mode::Safe.label().to_string(),
            readings: Readings::default(),
            prediction: None,
        }
    }

    /// Copy suitable for rendering or transmission under `mode`.
    /// Safe mode never exposes the prediction map.
    pub fn visible(&self, mode: Mode) -> TelemetryDocument {
        let mut doc = self.clone();
        if mode == Mode::Safe {
            doc.prediction = None;
        }
        doc
    }

    /// Compact JSON, one message per document
    pub fn to_json(&self) -> EdgeResult<String> {
        serde_json::to_string(self).map_err(|e| EdgeError::Encode(e.to_string()))
    }

    /// Indented JSON for the console
    pub fn to_pretty_json(&self) -> EdgeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EdgeError::Encode(e.to_string()))
    }
}

impl Default for TelemetryDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> TelemetryDocument {
        TelemetryDocument {
            timestamp: "18/11/24 08:06:59".to_string(),
            device_id: "EF-001".to_string(),
            event: EventLabel::Cold,
            mode_label: "Prediction".to_string(),
            readings: Readings::from_array([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            prediction: Some(prediction_from_scores(&[0.1; 7]).unwrap()),
        }
    }

    #[test]
    fn test_wire_keys() {
        let value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(value["TimeStamp"], "18/11/24 08:06:59");
        assert_eq!(value["HardwareID"], "EF-001");
        assert_eq!(value["Event"], "Cold");
        assert_eq!(value["Mode"], "Prediction");
        assert_eq!(value["Data"]["RA"], 3.0);
        assert_eq!(value["Data"]["PRESSURE"], 6.0);
        assert_eq!(value["Prediction"].as_object().unwrap().len(), 7);
    }

    #[test]
    fn test_safe_mode_hides_prediction() {
        let doc = sample();
        let json = doc.visible(Mode::Safe).to_json().unwrap();
        assert!(!json.contains("Prediction\":{"));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("Prediction").is_none());

        let whole = doc.visible(Mode::Prediction);
        assert!(whole.prediction.is_some());
    }

    #[test]
    fn test_prediction_scores_clamped() {
        let scores = [1.5, -0.2, 0.5, f64::NAN, 0.0, 1.0, 0.3];
        let prediction = prediction_from_scores(&scores).unwrap();
        assert_eq!(prediction[&EventLabel::Cold], 1.0);
        assert_eq!(prediction[&EventLabel::Warm], 0.0);
        assert_eq!(prediction[&EventLabel::Dry], 0.0);
        assert!(prediction.values().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_prediction_wrong_arity() {
        assert!(prediction_from_scores(&[0.5; 6]).is_err());
    }

    #[test]
    fn test_timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 11, 18, 8, 6, 59).unwrap();
        assert_eq!(format_timestamp(at), "18/11/24 08:06:59");
    }

    #[test]
    fn test_label_lookup() {
        assert_eq!(EventLabel::from_name("wet"), Some(EventLabel::Wet));
        assert_eq!(EventLabel::from_name("Fog"), None);
        assert_eq!(EventLabel::from_index(6), Some(EventLabel::Unknown));
        assert_eq!(EventLabel::from_index(7), None);
    }

    #[test]
    fn test_readings_range() {
        assert!(Readings::from_array([0.0, 99.9, 50.0, 1.0, 2.0, 3.0]).in_range());
        assert!(!Readings::from_array([100.0, 0.0, 0.0, 0.0, 0.0, 0.0]).in_range());
    }
}
