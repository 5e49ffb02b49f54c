//! Factor types: reusable energy-function families with shared weights.
//!
//! A factor type fixes the cardinalities of the variable tuple it scores and
//! owns the weight vector shared by every factor instantiated from it. Two
//! parameterizations are available:
//!
//! - **Linear**: one weight block per joint configuration. Without feature
//!   data the energy is the weight itself; with a feature vector `x` of
//!   length `D` the energy is `E(c) = Σ_d w[c·D + d] · x[d]`.
//! - **Radial basis**: `B` Gaussian basis functions with trainable centers
//!   `μ_b` and per-configuration coefficients `a[c, b]`,
//!   `E(c) = Σ_b a[c, b] · exp(-β ‖x - μ_b‖²)`. Centers must be fitted to
//!   training features (see [`FactorType::initialize_from_data`]) before the
//!   type can be evaluated.

use ndarray::{s, Array1, ArrayView1, ArrayViewMut1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{FactorGraphError, Result};
use crate::numeric::num_configurations;

/// Lloyd iterations used when fitting radial basis centers.
const KMEANS_ITERATIONS: usize = 25;

/// Parameterization of a factor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FactorTypeKind {
    /// One weight block per configuration, dotted with the feature vector.
    Linear,
    /// Weighted sum of Gaussian radial basis responses.
    RadialBasis(RadialBasisParams),
}

/// Hyperparameters and state of a radial basis factor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadialBasisParams {
    /// Number of basis functions.
    pub basis_count: usize,
    /// Natural log of the basis precision β.
    pub log_beta: f64,
    /// Whether the centers have been fitted to data.
    pub initialized: bool,
}

impl RadialBasisParams {
    /// Basis precision β.
    pub fn beta(&self) -> f64 {
        self.log_beta.exp()
    }
}

/// A named energy-function family over a fixed tuple of cardinalities.
///
/// The weight vector length is fixed at construction; training mutates the
/// values in place but never resizes the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorType {
    name: String,
    cardinalities: Vec<usize>,
    data_size: usize,
    weights: Array1<f64>,
    kind: FactorTypeKind,
}

impl FactorType {
    /// Create a linear factor type.
    ///
    /// The per-configuration feature block size is inferred as
    /// `weights.len() / Π cardinalities`, which must divide exactly.
    pub fn linear(
        name: impl Into<String>,
        cardinalities: Vec<usize>,
        weights: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        validate_cardinalities(&name, &cardinalities)?;

        let configs = num_configurations(&cardinalities);
        if weights.is_empty() || weights.len() % configs != 0 {
            return Err(FactorGraphError::InvalidParameter(format!(
                "factor type '{}': weight length {} is not a positive multiple of {} configurations",
                name,
                weights.len(),
                configs
            )));
        }

        Ok(Self {
            data_size: weights.len() / configs,
            name,
            cardinalities,
            weights: Array1::from(weights),
            kind: FactorTypeKind::Linear,
        })
    }

    /// Create a radial basis factor type with all weights zero.
    ///
    /// The type is unusable until [`initialize_from_data`](Self::initialize_from_data)
    /// has fitted its basis centers.
    pub fn radial_basis(
        name: impl Into<String>,
        cardinalities: Vec<usize>,
        data_size: usize,
        basis_count: usize,
        log_beta: f64,
    ) -> Result<Self> {
        let name = name.into();
        validate_cardinalities(&name, &cardinalities)?;
        if data_size == 0 || basis_count == 0 {
            return Err(FactorGraphError::InvalidParameter(format!(
                "factor type '{}': radial basis types need data_size > 0 and basis_count > 0",
                name
            )));
        }
        if !log_beta.is_finite() {
            return Err(FactorGraphError::InvalidParameter(format!(
                "factor type '{}': log_beta must be finite",
                name
            )));
        }

        let configs = num_configurations(&cardinalities);
        let num_weights = basis_count * data_size + configs * basis_count;
        Ok(Self {
            name,
            cardinalities,
            data_size,
            weights: Array1::zeros(num_weights),
            kind: FactorTypeKind::RadialBasis(RadialBasisParams {
                basis_count,
                log_beta,
                initialized: false,
            }),
        })
    }

    /// Factor type name, unique within a model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cardinalities of the variable tuple this type scores.
    pub fn cardinalities(&self) -> &[usize] {
        &self.cardinalities
    }

    /// Number of variables a factor of this type connects.
    pub fn arity(&self) -> usize {
        self.cardinalities.len()
    }

    /// Number of joint configurations.
    pub fn num_configurations(&self) -> usize {
        num_configurations(&self.cardinalities)
    }

    /// Length of the feature vector expected per factor.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Parameterization.
    pub fn kind(&self) -> &FactorTypeKind {
        &self.kind
    }

    /// Current weights.
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// Mutable view of the weights. The length cannot change through a view.
    pub fn weights_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.weights.view_mut()
    }

    /// Overwrite all weights.
    pub fn set_weights(&mut self, weights: ArrayView1<'_, f64>) -> Result<()> {
        if weights.len() != self.weights.len() {
            return Err(FactorGraphError::DimensionMismatch {
                context: format!("weights of factor type '{}'", self.name),
                expected: self.weights.len(),
                got: weights.len(),
            });
        }
        self.weights.assign(&weights);
        Ok(())
    }

    /// Number of trainable parameters.
    pub fn num_parameters(&self) -> usize {
        self.weights.len()
    }

    /// Whether the type can be evaluated. Linear types always can.
    pub fn is_initialized(&self) -> bool {
        match &self.kind {
            FactorTypeKind::Linear => true,
            FactorTypeKind::RadialBasis(params) => params.initialized,
        }
    }

    /// Whether a factor may carry a feature vector of the given length.
    pub fn accepts_data_len(&self, len: usize) -> bool {
        match self.kind {
            FactorTypeKind::Linear => len == self.data_size || (len == 0 && self.data_size == 1),
            FactorTypeKind::RadialBasis(_) => len == self.data_size,
        }
    }

    /// Compute the energy of every configuration into `energies`.
    pub fn compute_energies(
        &self,
        data: ArrayView1<'_, f64>,
        mut energies: ArrayViewMut1<'_, f64>,
    ) -> Result<()> {
        self.check_evaluation(data.len(), energies.len())?;

        match &self.kind {
            FactorTypeKind::Linear => {
                if data.is_empty() {
                    energies.assign(&self.weights);
                } else {
                    let d = self.data_size;
                    for (c, energy) in energies.iter_mut().enumerate() {
                        *energy = self.weights.slice(s![c * d..(c + 1) * d]).dot(&data);
                    }
                }
            }
            FactorTypeKind::RadialBasis(params) => {
                let responses = self.basis_responses(params, data);
                let b = params.basis_count;
                let offset = b * self.data_size;
                for (c, energy) in energies.iter_mut().enumerate() {
                    let start = offset + c * b;
                    *energy = self.weights.slice(s![start..start + b]).dot(&responses);
                }
            }
        }
        Ok(())
    }

    /// Accumulate `Σ_c scales[c] · ∂E(c)/∂w` into `gradient`.
    ///
    /// This is the backward counterpart of [`compute_energies`](Self::compute_energies):
    /// with `scales` set to configuration marginals it yields the expected
    /// energy gradient under those marginals.
    pub fn accumulate_gradient(
        &self,
        data: ArrayView1<'_, f64>,
        scales: ArrayView1<'_, f64>,
        mut gradient: ArrayViewMut1<'_, f64>,
    ) -> Result<()> {
        self.check_evaluation(data.len(), scales.len())?;
        self.check_gradient_len(gradient.len())?;

        match &self.kind {
            FactorTypeKind::Linear => {
                if data.is_empty() {
                    gradient.scaled_add(1.0, &scales);
                } else {
                    let d = self.data_size;
                    for (c, &scale) in scales.iter().enumerate() {
                        if scale != 0.0 {
                            gradient
                                .slice_mut(s![c * d..(c + 1) * d])
                                .scaled_add(scale, &data);
                        }
                    }
                }
            }
            FactorTypeKind::RadialBasis(params) => {
                let responses = self.basis_responses(params, data);
                let b = params.basis_count;
                let d = self.data_size;
                let offset = b * d;

                // Per-basis sum of scale · coefficient drives the center gradient.
                let mut basis_scale = Array1::<f64>::zeros(b);
                for (c, &scale) in scales.iter().enumerate() {
                    if scale == 0.0 {
                        continue;
                    }
                    let start = offset + c * b;
                    gradient
                        .slice_mut(s![start..start + b])
                        .scaled_add(scale, &responses);
                    basis_scale.scaled_add(scale, &self.weights.slice(s![start..start + b]));
                }
                self.accumulate_center_gradient(params, data, &responses, &basis_scale, gradient);
            }
        }
        Ok(())
    }

    /// Accumulate `scale · ∂E(configuration)/∂w` into `gradient`.
    pub fn accumulate_configuration_gradient(
        &self,
        data: ArrayView1<'_, f64>,
        configuration: usize,
        scale: f64,
        mut gradient: ArrayViewMut1<'_, f64>,
    ) -> Result<()> {
        let configs = self.num_configurations();
        if configuration >= configs {
            return Err(FactorGraphError::VariableOutOfRange {
                what: "configuration",
                index: configuration,
                limit: configs,
            });
        }
        self.check_evaluation(data.len(), configs)?;
        self.check_gradient_len(gradient.len())?;

        match &self.kind {
            FactorTypeKind::Linear => {
                if data.is_empty() {
                    gradient[configuration] += scale;
                } else {
                    let d = self.data_size;
                    gradient
                        .slice_mut(s![configuration * d..(configuration + 1) * d])
                        .scaled_add(scale, &data);
                }
            }
            FactorTypeKind::RadialBasis(params) => {
                let responses = self.basis_responses(params, data);
                let b = params.basis_count;
                let start = b * self.data_size + configuration * b;
                gradient
                    .slice_mut(s![start..start + b])
                    .scaled_add(scale, &responses);
                let basis_scale = self.weights.slice(s![start..start + b]).mapv(|a| a * scale);
                self.accumulate_center_gradient(params, data, &responses, &basis_scale, gradient);
            }
        }
        Ok(())
    }

    /// Fit radial basis centers to observed feature vectors.
    ///
    /// Centers are seeded with k-means++ and refined by Lloyd iterations;
    /// coefficients are reset to zero. Calling this on a linear type is an error.
    pub fn initialize_from_data(&mut self, samples: &[ArrayView1<'_, f64>], seed: u64) -> Result<()> {
        let (basis_count, d) = match &self.kind {
            FactorTypeKind::RadialBasis(params) => (params.basis_count, self.data_size),
            FactorTypeKind::Linear => {
                return Err(FactorGraphError::InvalidParameter(format!(
                    "factor type '{}' is linear and needs no data initialization",
                    self.name
                )))
            }
        };
        if samples.is_empty() {
            return Err(FactorGraphError::InvalidParameter(format!(
                "factor type '{}': no feature vectors to initialize from",
                self.name
            )));
        }
        if let Some(bad) = samples.iter().find(|x| x.len() != d) {
            return Err(FactorGraphError::DimensionMismatch {
                context: format!("initialization data for factor type '{}'", self.name),
                expected: d,
                got: bad.len(),
            });
        }

        let centers = kmeans(samples, basis_count, seed);
        self.weights.fill(0.0);
        for (b, center) in centers.iter().enumerate() {
            self.weights.slice_mut(s![b * d..(b + 1) * d]).assign(center);
        }
        if let FactorTypeKind::RadialBasis(params) = &mut self.kind {
            params.initialized = true;
        }

        log::debug!(
            "Initialized radial basis factor type '{}' with {} centers from {} samples",
            self.name,
            basis_count,
            samples.len()
        );
        Ok(())
    }

    fn check_evaluation(&self, data_len: usize, table_len: usize) -> Result<()> {
        if !self.is_initialized() {
            return Err(FactorGraphError::UninitializedModel(self.name.clone()));
        }
        if !self.accepts_data_len(data_len) {
            return Err(FactorGraphError::DimensionMismatch {
                context: format!("feature data for factor type '{}'", self.name),
                expected: self.data_size,
                got: data_len,
            });
        }
        let configs = self.num_configurations();
        if table_len != configs {
            return Err(FactorGraphError::DimensionMismatch {
                context: format!("configuration table for factor type '{}'", self.name),
                expected: configs,
                got: table_len,
            });
        }
        Ok(())
    }

    fn check_gradient_len(&self, len: usize) -> Result<()> {
        if len != self.weights.len() {
            return Err(FactorGraphError::DimensionMismatch {
                context: format!("gradient of factor type '{}'", self.name),
                expected: self.weights.len(),
                got: len,
            });
        }
        Ok(())
    }

    /// `φ_b(x) = exp(-β ‖x - μ_b‖²)` for every basis.
    fn basis_responses(&self, params: &RadialBasisParams, data: ArrayView1<'_, f64>) -> Array1<f64> {
        let d = self.data_size;
        let beta = params.beta();
        Array1::from_shape_fn(params.basis_count, |b| {
            let center = self.weights.slice(s![b * d..(b + 1) * d]);
            let dist_sq: f64 = center
                .iter()
                .zip(data.iter())
                .map(|(&m, &x)| (x - m) * (x - m))
                .sum();
            (-beta * dist_sq).exp()
        })
    }

    /// `∂φ_b/∂μ_b = 2β (x - μ_b) φ_b`, weighted by `basis_scale[b]`.
    fn accumulate_center_gradient(
        &self,
        params: &RadialBasisParams,
        data: ArrayView1<'_, f64>,
        responses: &Array1<f64>,
        basis_scale: &Array1<f64>,
        mut gradient: ArrayViewMut1<'_, f64>,
    ) {
        let d = self.data_size;
        let two_beta = 2.0 * params.beta();
        for b in 0..params.basis_count {
            let factor = basis_scale[b] * responses[b] * two_beta;
            if factor == 0.0 {
                continue;
            }
            let center = self.weights.slice(s![b * d..(b + 1) * d]);
            let mut grad = gradient.slice_mut(s![b * d..(b + 1) * d]);
            for ((g, &m), &x) in grad.iter_mut().zip(center.iter()).zip(data.iter()) {
                *g += factor * (x - m);
            }
        }
    }
}

fn validate_cardinalities(name: &str, cardinalities: &[usize]) -> Result<()> {
    if cardinalities.is_empty() || cardinalities.contains(&0) {
        return Err(FactorGraphError::InvalidParameter(format!(
            "factor type '{}': cardinalities must be non-empty and >= 1, got {:?}",
            name, cardinalities
        )));
    }
    Ok(())
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| (x - y) * (x - y)).sum()
}

/// Seeded k-means++ followed by Lloyd refinement.
fn kmeans(samples: &[ArrayView1<'_, f64>], k: usize, seed: u64) -> Vec<Array1<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = samples.len();

    let mut centers: Vec<Array1<f64>> = Vec::with_capacity(k);
    centers.push(samples[rng.random_range(0..n)].to_owned());
    let mut nearest: Vec<f64> = samples
        .iter()
        .map(|x| squared_distance(*x, centers[0].view()))
        .collect();

    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        let pick = if total > 0.0 {
            let mut u = rng.random::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &dist) in nearest.iter().enumerate() {
                if u < dist {
                    chosen = i;
                    break;
                }
                u -= dist;
            }
            chosen
        } else {
            // Fewer distinct samples than centers.
            rng.random_range(0..n)
        };
        let center = samples[pick].to_owned();
        for (dist, x) in nearest.iter_mut().zip(samples) {
            *dist = dist.min(squared_distance(*x, center.view()));
        }
        centers.push(center);
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (slot, x) in assignment.iter_mut().zip(samples) {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (b, center) in centers.iter().enumerate() {
                let dist = squared_distance(*x, center.view());
                if dist < best_dist {
                    best_dist = dist;
                    best = b;
                }
            }
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }

        let dim = centers[0].len();
        let mut sums = vec![Array1::<f64>::zeros(dim); k];
        let mut counts = vec![0usize; k];
        for (&b, x) in assignment.iter().zip(samples) {
            sums[b] += x;
            counts[b] += 1;
        }
        for ((center, sum), count) in centers.iter_mut().zip(sums).zip(counts) {
            if count > 0 {
                *center = sum / count as f64;
            }
        }

        if !changed {
            break;
        }
    }

    centers
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_linear_without_data() {
        let ft = FactorType::linear("pairwise", vec![2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(ft.data_size(), 1);
        assert!(ft.accepts_data_len(0));

        let mut energies = Array1::zeros(4);
        ft.compute_energies(Array1::zeros(0).view(), energies.view_mut())
            .unwrap();
        assert_eq!(energies, array![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_linear_with_data() {
        // Two states, three features.
        let w = vec![1.0, 0.0, -1.0, 0.5, 0.5, 0.5];
        let ft = FactorType::linear("unary", vec![2], w).unwrap();
        assert_eq!(ft.data_size(), 3);
        assert!(!ft.accepts_data_len(0));

        let x = array![2.0, 1.0, 1.0];
        let mut energies = Array1::zeros(2);
        ft.compute_energies(x.view(), energies.view_mut()).unwrap();
        assert_abs_diff_eq!(energies[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(energies[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_rejects_bad_weight_length() {
        let result = FactorType::linear("bad", vec![3], vec![0.0; 4]);
        assert!(matches!(result, Err(FactorGraphError::InvalidParameter(_))));
    }

    #[test]
    fn test_rbf_uninitialized_is_error() {
        let ft = FactorType::radial_basis("rbf", vec![2], 2, 3, 0.0).unwrap();
        assert_eq!(ft.num_parameters(), 3 * 2 + 2 * 3);

        let mut energies = Array1::zeros(2);
        let err = ft
            .compute_energies(array![0.0, 1.0].view(), energies.view_mut())
            .unwrap_err();
        assert_eq!(err, FactorGraphError::UninitializedModel("rbf".to_string()));
    }

    #[test]
    fn test_rbf_initialization_places_centers_on_clusters() {
        let mut ft = FactorType::radial_basis("rbf", vec![2], 1, 2, 0.0).unwrap();
        let data = [array![0.0], array![0.1], array![10.0], array![10.1]];
        let views: Vec<_> = data.iter().map(|x| x.view()).collect();
        ft.initialize_from_data(&views, 7).unwrap();
        assert!(ft.is_initialized());

        let mut centers = vec![ft.weights()[0], ft.weights()[1]];
        centers.sort_by(|a, b| a.total_cmp(b));
        assert_abs_diff_eq!(centers[0], 0.05, epsilon = 1e-9);
        assert_abs_diff_eq!(centers[1], 10.05, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_gradient_matches_finite_difference() {
        let mut ft = FactorType::linear("unary", vec![2], vec![0.3, -0.2, 0.1, 0.4]).unwrap();
        let x = array![1.5, -0.5];
        let scales = array![0.25, 0.75];

        let mut grad = Array1::zeros(4);
        ft.accumulate_gradient(x.view(), scales.view(), grad.view_mut())
            .unwrap();

        let eps = 1e-6;
        for i in 0..4 {
            let mut e_plus = Array1::zeros(2);
            let mut e_minus = Array1::zeros(2);
            ft.weights_mut()[i] += eps;
            ft.compute_energies(x.view(), e_plus.view_mut()).unwrap();
            ft.weights_mut()[i] -= 2.0 * eps;
            ft.compute_energies(x.view(), e_minus.view_mut()).unwrap();
            ft.weights_mut()[i] += eps;
            let numeric = (scales.dot(&e_plus) - scales.dot(&e_minus)) / (2.0 * eps);
            assert_abs_diff_eq!(grad[i], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rbf_gradient_matches_finite_difference() {
        let mut ft = FactorType::radial_basis("rbf", vec![3], 2, 2, (0.5f64).ln()).unwrap();
        let data = [array![0.0, 0.0], array![1.0, 1.0], array![0.2, 0.9]];
        let views: Vec<_> = data.iter().map(|x| x.view()).collect();
        ft.initialize_from_data(&views, 3).unwrap();
        // Non-zero coefficients so center gradients are exercised.
        let n = ft.num_parameters();
        for i in 4..n {
            ft.weights_mut()[i] = 0.1 * (i as f64) - 0.5;
        }

        let x = array![0.4, 0.3];
        let scales = array![0.2, 0.5, 0.3];
        let mut grad = Array1::zeros(n);
        ft.accumulate_gradient(x.view(), scales.view(), grad.view_mut())
            .unwrap();

        let eps = 1e-6;
        for i in 0..n {
            let mut e_plus = Array1::zeros(3);
            let mut e_minus = Array1::zeros(3);
            ft.weights_mut()[i] += eps;
            ft.compute_energies(x.view(), e_plus.view_mut()).unwrap();
            ft.weights_mut()[i] -= 2.0 * eps;
            ft.compute_energies(x.view(), e_minus.view_mut()).unwrap();
            ft.weights_mut()[i] += eps;
            let numeric = (scales.dot(&e_plus) - scales.dot(&e_minus)) / (2.0 * eps);
            assert_abs_diff_eq!(grad[i], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_configuration_gradient_is_one_hot_dense_gradient() {
        let ft = FactorType::linear("pairwise", vec![2, 3], (0..6).map(f64::from).collect()).unwrap();
        let empty = Array1::<f64>::zeros(0);

        let mut sparse = Array1::zeros(6);
        ft.accumulate_configuration_gradient(empty.view(), 4, 2.0, sparse.view_mut())
            .unwrap();

        let mut scales = Array1::zeros(6);
        scales[4] = 2.0;
        let mut dense = Array1::zeros(6);
        ft.accumulate_gradient(empty.view(), scales.view(), dense.view_mut())
            .unwrap();

        assert_eq!(sparse, dense);
    }
}
