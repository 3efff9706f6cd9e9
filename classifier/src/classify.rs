//! Turns raw model scores into a probability distribution and a predicted
//! class.

use std::sync::Arc;

use crate::{error::PipelineError, model::Model, preprocess::ImageTensor};

/// Output of a successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub predicted_class: usize,
    pub probabilities: Vec<f32>,
}

impl Classification {
    /// Probability of the predicted class.
    pub fn confidence(&self) -> f32 {
        self.probabilities[self.predicted_class]
    }
}

#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn Model>,
    num_classes: Option<usize>,
}

impl Classifier {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            num_classes: None,
        }
    }

    /// Rejects model outputs that do not have exactly `num_classes` scores.
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = Some(num_classes);
        self
    }

    pub fn classify(&self, input: &ImageTensor) -> Result<Classification, PipelineError> {
        let logits = self
            .model
            .infer(input)
            .map_err(|e| PipelineError::ModelInference(format!("{e:#}")))?;

        // batch of one: the output has to be `(1, N)`
        let n = match logits.shape.as_slice() {
            [1, n] if *n > 0 && *n == logits.values.len() => *n,
            shape => {
                return Err(PipelineError::ModelInference(format!(
                    "unexpected output shape {shape:?}"
                )));
            }
        };
        if let Some(expected) = self.num_classes {
            if n != expected {
                return Err(PipelineError::ModelInference(format!(
                    "model returned {n} scores, expected {expected}"
                )));
            }
        }
        if logits.values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::ModelInference(
                "model returned non-finite scores".into(),
            ));
        }

        let probabilities = softmax(&logits.values);
        let predicted_class = argmax(&probabilities).ok_or_else(|| {
            PipelineError::ModelInference("model returned no scores".into())
        })?;
        Ok(Classification {
            predicted_class,
            probabilities,
        })
    }
}

/// Numerically stable softmax: scores are shifted by their maximum before
/// exponentiation.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, |acc, x| acc.max(f64::from(x)));
    let exps: Vec<f64> = logits.iter().map(|&x| (f64::from(x) - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| (e / sum) as f32).collect()
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
