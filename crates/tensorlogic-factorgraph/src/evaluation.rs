//! Prediction accuracy and its aggregation across cross-validation folds.

use serde::{Deserialize, Serialize};

use crate::error::{FactorGraphError, Result};
use crate::observation::FactorGraphObservation;

/// Fraction of variables whose predicted state matches the truth, pooled
/// over all pairs.
///
/// Returns 0 when there are no variables at all.
pub fn per_variable_accuracy(
    predicted: &[FactorGraphObservation],
    truth: &[FactorGraphObservation],
) -> Result<f64> {
    if predicted.len() != truth.len() {
        return Err(FactorGraphError::DimensionMismatch {
            context: "predicted observations".to_string(),
            expected: truth.len(),
            got: predicted.len(),
        });
    }

    let mut correct = 0;
    let mut total = 0;
    for (p, t) in predicted.iter().zip(truth) {
        if p.len() != t.len() {
            return Err(FactorGraphError::DimensionMismatch {
                context: "predicted states".to_string(),
                expected: t.len(),
                got: p.len(),
            });
        }
        correct += p.agreement(t);
        total += t.len();
    }

    if total == 0 {
        return Ok(0.0);
    }
    Ok(correct as f64 / total as f64)
}

/// Mean and population standard deviation of per-fold accuracies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracySummary {
    /// Mean accuracy over folds.
    pub mean: f64,
    /// Population standard deviation over folds.
    pub std_dev: f64,
    /// Number of folds.
    pub folds: usize,
}

impl AccuracySummary {
    /// Summarize one accuracy per fold; at least one fold is required.
    pub fn from_fold_accuracies(accuracies: &[f64]) -> Result<Self> {
        if accuracies.is_empty() {
            return Err(FactorGraphError::InvalidParameter(
                "no fold accuracies to summarize".to_string(),
            ));
        }
        let n = accuracies.len() as f64;
        let mean = accuracies.iter().sum::<f64>() / n;
        let mean_sq = accuracies.iter().map(|a| a * a).sum::<f64>() / n;
        Ok(Self {
            mean,
            // Rounding can push E[a²] − mean² slightly below zero.
            std_dev: (mean_sq - mean * mean).max(0.0).sqrt(),
            folds: accuracies.len(),
        })
    }
}
