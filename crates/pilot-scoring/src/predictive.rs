//! Learned utility model.
//!
//! A small logistic model over candidate features, updated online from
//! verified index outcomes (kept after verification = positive, rolled
//! back = negative). Until enough outcomes accumulate the model reports a
//! neutral 0.5 and the heuristic path carries the decision alone.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Outcomes required before the model reports itself trained.
const MIN_TRAINING_SAMPLES: u64 = 20;
/// Online learning rate.
const LEARNING_RATE: f64 = 0.05;

/// Feature vector for one candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UtilityFeatures {
    /// Queries per hour hitting the field, log-scaled.
    pub log_query_rate: f64,
    /// Resolved selectivity.
    pub selectivity: f64,
    /// Table size, log-scaled rows.
    pub log_table_rows: f64,
    /// Write share of the table's traffic.
    pub write_ratio: f64,
    /// Heuristic benefit over cost, squashed.
    pub benefit_ratio: f64,
}

impl UtilityFeatures {
    fn as_array(&self) -> [f64; 5] {
        [
            self.log_query_rate,
            self.selectivity,
            self.log_table_rows,
            self.write_ratio,
            self.benefit_ratio,
        ]
    }

    /// Build features from raw candidate numbers.
    #[must_use]
    pub fn from_raw(
        query_rate_per_hour: f64,
        selectivity: f64,
        table_rows: f64,
        write_ratio: f64,
        benefit_ratio: f64,
    ) -> Self {
        Self {
            log_query_rate: (1.0 + query_rate_per_hour.max(0.0)).ln(),
            selectivity: selectivity.clamp(0.0, 1.0),
            log_table_rows: (1.0 + table_rows.max(0.0)).ln(),
            write_ratio: write_ratio.clamp(0.0, 1.0),
            benefit_ratio: benefit_ratio.max(0.0).tanh(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelState {
    weights: [f64; 5],
    bias: f64,
    samples: u64,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            weights: [0.0; 5],
            bias: 0.0,
            samples: 0,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// The online utility model.
#[derive(Debug, Default)]
pub struct UtilityModel {
    state: RwLock<ModelState>,
}

impl UtilityModel {
    /// Create an untrained model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a serialized state, as lifecycle retraining does.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        let state: ModelState = serde_json::from_value(json.clone()).unwrap_or_default();
        Self {
            state: RwLock::new(state),
        }
    }

    /// Serialize for persistence.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&*self.state.read()).unwrap_or(serde_json::Value::Null)
    }

    /// Whether enough outcomes were observed for the score to matter.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.state.read().samples >= MIN_TRAINING_SAMPLES
    }

    /// Outcomes observed so far.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.state.read().samples
    }

    /// Utility score in `[0, 1]`; 0.5 while untrained.
    #[must_use]
    pub fn score(&self, features: &UtilityFeatures) -> f64 {
        let state = self.state.read();
        if state.samples < MIN_TRAINING_SAMPLES {
            return 0.5;
        }
        let x = features.as_array();
        let z: f64 = state
            .weights
            .iter()
            .zip(x.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + state.bias;
        sigmoid(z)
    }

    /// One online gradient step from a verified outcome.
    pub fn update(&self, features: &UtilityFeatures, kept: bool) {
        let mut state = self.state.write();
        let x = features.as_array();
        let z: f64 = state
            .weights
            .iter()
            .zip(x.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + state.bias;
        let predicted = sigmoid(z);
        let target = if kept { 1.0 } else { 0.0 };
        let error = target - predicted;

        for (weight, value) in state.weights.iter_mut().zip(x.iter()) {
            *weight += LEARNING_RATE * error * value;
        }
        state.bias += LEARNING_RATE * error;
        state.samples += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_features() -> UtilityFeatures {
        UtilityFeatures::from_raw(500.0, 0.9, 100_000.0, 0.1, 5.0)
    }

    fn bad_features() -> UtilityFeatures {
        UtilityFeatures::from_raw(2.0, 0.0001, 1_000.0, 0.9, 0.01)
    }

    #[test]
    fn test_untrained_model_is_neutral() {
        let model = UtilityModel::new();
        assert!(!model.is_trained());
        assert!((model.score(&good_features()) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_model_learns_separation() {
        let model = UtilityModel::new();
        for _ in 0..200 {
            model.update(&good_features(), true);
            model.update(&bad_features(), false);
        }
        assert!(model.is_trained());
        let good = model.score(&good_features());
        let bad = model.score(&bad_features());
        assert!(good > 0.7, "good candidate scored {good}");
        assert!(bad < 0.3, "bad candidate scored {bad}");
    }

    #[test]
    fn test_serialization_round_trip() {
        let model = UtilityModel::new();
        for _ in 0..30 {
            model.update(&good_features(), true);
        }
        let restored = UtilityModel::from_json(&model.to_json());
        assert_eq!(restored.sample_count(), 30);
        assert!(restored.is_trained());
        assert!(
            (restored.score(&good_features()) - model.score(&good_features())).abs() < 1e-12
        );
    }

    #[test]
    fn test_features_are_bounded() {
        let features = UtilityFeatures::from_raw(1e12, 5.0, 1e12, -3.0, 1e9);
        assert!(features.selectivity <= 1.0);
        assert!(features.write_ratio >= 0.0);
        assert!(features.benefit_ratio <= 1.0);
    }
}
