use serde::{Deserialize, Serialize};

use crate::classify::Classification;

/// Where a [`PredictionResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[display("cache")]
    Cache,
    #[display("inference")]
    Inference,
}

/// The answer to a prediction request, as sent over the wire:
///
/// ```json
/// {"source": "inference", "class": 3, "confidence": 0.9125, "class_probabilities": [..]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub source: Source,
    #[serde(rename = "class")]
    pub predicted_class: usize,
    pub confidence: f32,
    pub class_probabilities: Vec<f32>,
}

impl PredictionResult {
    /// Wraps a fresh classification. The confidence is kept at the 4 decimal
    /// digits the cache stores, so a later cache hit reports the same value.
    pub fn from_classification(classification: Classification) -> Self {
        let confidence = round_confidence(classification.confidence());
        Self {
            source: Source::Inference,
            predicted_class: classification.predicted_class,
            confidence,
            class_probabilities: classification.probabilities,
        }
    }

    /// The `n` most likely classes, most likely first.
    pub fn top(&self, n: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> =
            self.class_probabilities.iter().copied().enumerate().collect();
        // stable: equal probabilities keep index order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

/// Rounds to 4 decimal digits. The quotient of two exactly representable
/// values is correctly rounded, which makes the result identical to parsing
/// its own `{:.4}` rendering.
pub(crate) fn round_confidence(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result() -> PredictionResult {
        PredictionResult {
            source: Source::Cache,
            predicted_class: 1,
            confidence: 0.5,
            class_probabilities: vec![0.25, 0.5, 0.25],
        }
    }

    #[test]
    fn serializes_to_wire_shape() {
        assert_eq!(
            serde_json::to_value(result()).unwrap(),
            json!({
                "source": "cache",
                "class": 1,
                "confidence": 0.5,
                "class_probabilities": [0.25, 0.5, 0.25],
            })
        );
        let back: PredictionResult = serde_json::from_value(serde_json::to_value(result()).unwrap()).unwrap();
        assert_eq!(back, result());
    }

    #[test]
    fn source_names() {
        assert_eq!(Source::Cache.to_string(), "cache");
        assert_eq!(Source::Inference.to_string(), "inference");
    }

    #[test]
    fn rounded_confidence_survives_text_round_trip() {
        for value in [0.123_456_79f32, 0.999_95, 0.5, 1.0 / 3.0, 0.000_04, 1.0] {
            let rounded = round_confidence(value);
            let parsed: f32 = format!("{rounded:.4}").parse().unwrap();
            assert_eq!(parsed, rounded, "{value}");
        }
    }

    #[test]
    fn from_classification_reports_inference() {
        let result = PredictionResult::from_classification(Classification {
            predicted_class: 0,
            probabilities: vec![0.666_666_7, 0.333_333_3],
        });
        assert_eq!(result.source, Source::Inference);
        assert_eq!(result.confidence, 0.6667);
        assert_eq!(result.class_probabilities, vec![0.666_666_7, 0.333_333_3]);
    }

    #[test]
    fn top_orders_by_probability() {
        assert_eq!(result().top(2), vec![(1, 0.5), (0, 0.25)]);
        assert_eq!(result().top(10).len(), 3);
    }
}
