//! Numerically stable reductions and configuration indexing.
//!
//! Joint configurations of a variable tuple are enumerated row-major: the
//! last variable varies fastest, so for cardinalities `[c0, c1, c2]` the
//! configuration `(s0, s1, s2)` has index `s0 * c1 * c2 + s1 * c2 + s2`.

/// `ln Σ exp(x)` computed without overflow or underflow.
///
/// Returns `-inf` for an empty slice or when every entry is `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Soft minimum of energies: `-ln Σ exp(-e)`.
pub fn soft_min(energies: &[f64]) -> f64 {
    let max_neg = energies
        .iter()
        .map(|&e| -e)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_neg.is_finite() {
        return -max_neg;
    }
    let sum: f64 = energies.iter().map(|&e| (-e - max_neg).exp()).sum();
    -(max_neg + sum.ln())
}

/// Converts energies into a normalized distribution `p ∝ exp(-e)`.
pub fn boltzmann(energies: &[f64]) -> Vec<f64> {
    let min = energies.iter().copied().fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        let uniform = 1.0 / energies.len().max(1) as f64;
        return vec![uniform; energies.len()];
    }
    let mut probs: Vec<f64> = energies.iter().map(|&e| (min - e).exp()).collect();
    let sum: f64 = probs.iter().sum();
    for p in &mut probs {
        *p /= sum;
    }
    probs
}

/// Online accumulator for `-ln Σ exp(-e)` over a stream of energies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SoftMinAccumulator {
    min: f64,
    scaled_sum: f64,
}

impl SoftMinAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            min: f64::INFINITY,
            scaled_sum: 0.0,
        }
    }

    pub(crate) fn push(&mut self, energy: f64) {
        if energy == f64::INFINITY {
            return;
        }
        if energy < self.min {
            self.scaled_sum = self.scaled_sum * (energy - self.min).exp() + 1.0;
            self.min = energy;
        } else {
            self.scaled_sum += (self.min - energy).exp();
        }
    }

    pub(crate) fn value(&self) -> f64 {
        if self.scaled_sum == 0.0 {
            f64::INFINITY
        } else {
            self.min - self.scaled_sum.ln()
        }
    }
}

/// Number of joint configurations of a cardinality tuple.
pub fn num_configurations(cardinalities: &[usize]) -> usize {
    cardinalities.iter().product()
}

/// Row-major configuration index of `states` under `cardinalities`.
pub fn configuration_index(cardinalities: &[usize], states: &[usize]) -> usize {
    debug_assert_eq!(cardinalities.len(), states.len());
    cardinalities
        .iter()
        .zip(states)
        .fold(0, |index, (&card, &state)| index * card + state)
}

/// Decodes a row-major configuration index into per-variable states.
pub fn decode_configuration(cardinalities: &[usize], mut index: usize, states: &mut [usize]) {
    debug_assert_eq!(cardinalities.len(), states.len());
    for (state, &card) in states.iter_mut().zip(cardinalities).rev() {
        *state = index % card;
        index /= card;
    }
}

/// Row-major strides: the index step taken when one variable's state grows by one.
pub fn strides(cardinalities: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; cardinalities.len()];
    for i in (0..cardinalities.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * cardinalities[i + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_log_sum_exp_large_values() {
        let lse = log_sum_exp(&[1000.0, 1000.0]);
        assert_abs_diff_eq!(lse, 1000.0 + 2.0_f64.ln(), epsilon = 1e-9);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_soft_min_matches_accumulator() {
        let energies = [3.0, -2.0, 0.5, 700.0, -650.0];
        let mut acc = SoftMinAccumulator::new();
        for &e in &energies {
            acc.push(e);
        }
        assert_abs_diff_eq!(acc.value(), soft_min(&energies), epsilon = 1e-9);
        assert!(soft_min(&energies) <= -650.0);
    }

    #[test]
    fn test_boltzmann_normalized() {
        let p = boltzmann(&[0.0, 1.0, 2.0]);
        assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(p[0] > p[1] && p[1] > p[2]);
    }

    #[test]
    fn test_configuration_index_roundtrip() {
        let cards = [2, 3, 4];
        let mut states = [0; 3];
        for index in 0..num_configurations(&cards) {
            decode_configuration(&cards, index, &mut states);
            assert_eq!(configuration_index(&cards, &states), index);
        }
        assert_eq!(configuration_index(&cards, &[1, 0, 0]), 12);
        assert_eq!(strides(&cards), vec![12, 4, 1]);
    }
}
