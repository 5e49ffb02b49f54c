//! Priors over factor type weights.
//!
//! A prior contributes a penalty (its negative log-density up to a constant)
//! and the penalty's gradient to the training objective of one factor type:
//! - Normal: quadratic penalty, gradient linear in the weights
//! - Laplace: absolute-value penalty, sign sub-gradient (zero at zero)
//! - Student-t: heavy-tailed penalty whose gradient vanishes for large weights

use ndarray::{ArrayView1, ArrayViewMut1};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::{FactorGraphError, Result};

/// Penalty on a weight vector, added to the negative log-likelihood.
pub trait Prior: Debug + Send + Sync {
    /// Penalty for the given weights.
    fn compute_penalty(&self, weights: ArrayView1<'_, f64>) -> f64;

    /// Add the penalty gradient to `gradient`.
    fn accumulate_gradient(&self, weights: ArrayView1<'_, f64>, gradient: ArrayViewMut1<'_, f64>);

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

fn check_positive(what: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(FactorGraphError::InvalidParameter(format!(
            "{} must be positive and finite, got {}",
            what, value
        )))
    }
}

/// Gaussian prior `w ~ N(0, σ²)`.
///
/// Penalty: `Σ w² / (2σ²)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalPrior {
    /// Standard deviation σ.
    pub sigma: f64,
}

impl NormalPrior {
    /// Create a Gaussian prior with standard deviation `sigma`.
    pub fn new(sigma: f64) -> Result<Self> {
        check_positive("normal prior sigma", sigma)?;
        Ok(Self { sigma })
    }
}

impl Prior for NormalPrior {
    fn compute_penalty(&self, weights: ArrayView1<'_, f64>) -> f64 {
        weights.dot(&weights) / (2.0 * self.sigma * self.sigma)
    }

    fn accumulate_gradient(&self, weights: ArrayView1<'_, f64>, mut gradient: ArrayViewMut1<'_, f64>) {
        gradient.scaled_add(1.0 / (self.sigma * self.sigma), &weights);
    }

    fn name(&self) -> &'static str {
        "normal"
    }
}

/// Laplace prior with scale `b`.
///
/// Penalty: `Σ |w| / b`. Encourages sparse weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaplacePrior {
    /// Scale b.
    pub scale: f64,
}

impl LaplacePrior {
    /// Create a Laplace prior with scale `scale`.
    pub fn new(scale: f64) -> Result<Self> {
        check_positive("laplace prior scale", scale)?;
        Ok(Self { scale })
    }
}

impl Prior for LaplacePrior {
    fn compute_penalty(&self, weights: ArrayView1<'_, f64>) -> f64 {
        weights.iter().map(|w| w.abs()).sum::<f64>() / self.scale
    }

    fn accumulate_gradient(&self, weights: ArrayView1<'_, f64>, mut gradient: ArrayViewMut1<'_, f64>) {
        // f64::signum maps 0.0 to 1.0; the sub-gradient at zero is 0.
        let inv = 1.0 / self.scale;
        for (g, &w) in gradient.iter_mut().zip(weights.iter()) {
            if w > 0.0 {
                *g += inv;
            } else if w < 0.0 {
                *g -= inv;
            }
        }
    }

    fn name(&self) -> &'static str {
        "laplace"
    }
}

/// Student-t prior with scale σ and `ν` degrees of freedom.
///
/// Penalty: `(ν + 1)/2 · Σ ln(1 + w² / (ν σ²))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StudentTPrior {
    /// Scale σ.
    pub sigma: f64,
    /// Degrees of freedom ν.
    pub dof: f64,
}

impl StudentTPrior {
    /// Create a Student-t prior.
    pub fn new(sigma: f64, dof: f64) -> Result<Self> {
        check_positive("student-t prior sigma", sigma)?;
        check_positive("student-t prior degrees of freedom", dof)?;
        Ok(Self { sigma, dof })
    }
}

impl Prior for StudentTPrior {
    fn compute_penalty(&self, weights: ArrayView1<'_, f64>) -> f64 {
        let denom = self.dof * self.sigma * self.sigma;
        let sum: f64 = weights.iter().map(|&w| (w * w / denom).ln_1p()).sum();
        0.5 * (self.dof + 1.0) * sum
    }

    fn accumulate_gradient(&self, weights: ArrayView1<'_, f64>, mut gradient: ArrayViewMut1<'_, f64>) {
        let denom = self.dof * self.sigma * self.sigma;
        for (g, &w) in gradient.iter_mut().zip(weights.iter()) {
            *g += (self.dof + 1.0) * w / (denom + w * w);
        }
    }

    fn name(&self) -> &'static str {
        "student-t"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn gradient_of(prior: &dyn Prior, weights: &Array1<f64>) -> Array1<f64> {
        let mut grad = Array1::zeros(weights.len());
        prior.accumulate_gradient(weights.view(), grad.view_mut());
        grad
    }

    fn check_finite_difference(prior: &dyn Prior, weights: Array1<f64>) {
        let grad = gradient_of(prior, &weights);
        let h = 1e-6;
        for i in 0..weights.len() {
            let mut plus = weights.clone();
            let mut minus = weights.clone();
            plus[i] += h;
            minus[i] -= h;
            let numeric =
                (prior.compute_penalty(plus.view()) - prior.compute_penalty(minus.view())) / (2.0 * h);
            assert_abs_diff_eq!(grad[i], numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_normal_penalty() {
        let prior = NormalPrior::new(2.0).unwrap();
        let w = array![1.0, -2.0, 0.5];
        assert_abs_diff_eq!(prior.compute_penalty(w.view()), 5.25 / 8.0, epsilon = 1e-12);
        check_finite_difference(&prior, w);
    }

    #[test]
    fn test_laplace_penalty_and_subgradient() {
        let prior = LaplacePrior::new(0.5).unwrap();
        let w = array![1.5, -0.25, 3.0];
        assert_abs_diff_eq!(prior.compute_penalty(w.view()), 9.5, epsilon = 1e-12);
        check_finite_difference(&prior, w);

        // At zero the central difference is 0, matching the chosen sub-gradient.
        let zero = array![0.0, 0.0];
        assert_eq!(gradient_of(&prior, &zero), array![0.0, 0.0]);
        let h = 1e-6;
        let central = (prior.compute_penalty(array![h, 0.0].view())
            - prior.compute_penalty(array![-h, 0.0].view()))
            / (2.0 * h);
        assert_abs_diff_eq!(central, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_student_t_gradient_flattens() {
        let prior = StudentTPrior::new(1.0, 3.0).unwrap();
        check_finite_difference(&prior, array![0.3, -1.7, 4.0]);

        let small = gradient_of(&prior, &array![2.0])[0];
        let large = gradient_of(&prior, &array![200.0])[0];
        assert!(large < small);
    }

    #[test]
    fn test_invalid_hyperparameters() {
        assert!(NormalPrior::new(0.0).is_err());
        assert!(LaplacePrior::new(-1.0).is_err());
        assert!(StudentTPrior::new(1.0, f64::NAN).is_err());
    }
}
