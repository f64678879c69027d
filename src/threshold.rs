//! Cost-sensitive choice of the probability cut.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ThresholdError;
use crate::metrics::ConfusionMatrix;

const FIRST_CANDIDATE: f64 = 0.10;
const CANDIDATE_STEP: f64 = 0.01;
const CANDIDATE_COUNT: usize = 80;

/// Monetary cost of each error type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Cost of a missed fraud
    pub false_negative: f64,
    /// Cost of blocking a legitimate payment
    pub false_positive: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            false_negative: 5000.0,
            false_positive: 200.0,
        }
    }
}

impl CostModel {
    pub fn loss(&self, matrix: &ConfusionMatrix) -> f64 {
        self.false_negative * matrix.fn_ as f64 + self.false_positive * matrix.fp as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdChoice {
    pub threshold: f64,
    pub expected_loss: f64,
}

/// 0.10, 0.11, ..., 0.89
pub fn candidate_thresholds() -> impl Iterator<Item = f64> {
    (0..CANDIDATE_COUNT).map(|i| FIRST_CANDIDATE + i as f64 * CANDIDATE_STEP)
}

/// Loss at every candidate threshold, in ascending threshold order.
pub fn loss_curve(
    probabilities: &[f64],
    labels: &[u8],
    costs: &CostModel,
) -> Result<Vec<ThresholdChoice>, ThresholdError> {
    if probabilities.len() != labels.len() {
        return Err(ThresholdError::LengthMismatch {
            probabilities: probabilities.len(),
            labels: labels.len(),
        });
    }
    Ok(candidate_thresholds()
        .map(|threshold| ThresholdChoice {
            threshold,
            expected_loss: costs.loss(&ConfusionMatrix::from_scores(probabilities, labels, threshold)),
        })
        .collect())
}

/// The candidate with the lowest loss. Only a strict improvement replaces the
/// current best, so ties resolve to the lower threshold.
pub fn select_threshold(
    probabilities: &[f64],
    labels: &[u8],
    costs: &CostModel,
) -> Result<ThresholdChoice, ThresholdError> {
    let mut best = ThresholdChoice {
        threshold: 0.0,
        expected_loss: f64::INFINITY,
    };
    for candidate in loss_curve(probabilities, labels, costs)? {
        if candidate.expected_loss < best.expected_loss {
            best = candidate;
        }
    }
    debug!(
        threshold = best.threshold,
        expected_loss = best.expected_loss,
        "selected threshold"
    );
    Ok(best)
}
