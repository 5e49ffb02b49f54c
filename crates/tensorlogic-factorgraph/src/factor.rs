//! Factor representation: a factor type bound to a variable tuple.

use ndarray::{Array1, ArrayView1, ArrayViewMut1};
use serde::{Deserialize, Serialize};

use crate::error::{FactorGraphError, Result};
use crate::factor_type::FactorType;
use crate::model::{FactorGraphModel, FactorTypeId};
use crate::numeric::{configuration_index, num_configurations};

/// A factor scoring the joint configurations of an ordered variable tuple.
///
/// The energy table is a cache: it holds one energy per configuration
/// (row-major, last variable fastest) and is only refreshed by
/// [`forward_map`](Self::forward_map).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    factor_type: FactorTypeId,
    variables: Vec<usize>,
    cardinalities: Vec<usize>,
    data: Array1<f64>,
    energies: Array1<f64>,
}

impl Factor {
    /// Create a factor of the given type over `variables` with optional
    /// observed feature data (pass an empty vector when the type needs none).
    pub fn new(
        model: &FactorGraphModel,
        factor_type: FactorTypeId,
        variables: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self> {
        let ft = model.get(factor_type)?;
        if variables.len() != ft.arity() {
            return Err(FactorGraphError::DimensionMismatch {
                context: format!("variable tuple of factor type '{}'", ft.name()),
                expected: ft.arity(),
                got: variables.len(),
            });
        }
        if !ft.accepts_data_len(data.len()) {
            return Err(FactorGraphError::DimensionMismatch {
                context: format!("feature data of factor type '{}'", ft.name()),
                expected: ft.data_size(),
                got: data.len(),
            });
        }

        let cardinalities = ft.cardinalities().to_vec();
        Ok(Self {
            factor_type,
            energies: Array1::zeros(num_configurations(&cardinalities)),
            variables,
            cardinalities,
            data: Array1::from(data),
        })
    }

    /// Handle of this factor's type.
    pub fn factor_type(&self) -> FactorTypeId {
        self.factor_type
    }

    /// Indices of the connected variables.
    pub fn variables(&self) -> &[usize] {
        &self.variables
    }

    /// Cardinalities of the connected variables, in tuple order.
    pub fn cardinalities(&self) -> &[usize] {
        &self.cardinalities
    }

    /// Observed feature data.
    pub fn data(&self) -> ArrayView1<'_, f64> {
        self.data.view()
    }

    /// Replace the observed feature data. The length may not change.
    pub fn set_data(&mut self, data: ArrayView1<'_, f64>) -> Result<()> {
        if data.len() != self.data.len() {
            return Err(FactorGraphError::DimensionMismatch {
                context: "factor feature data".to_string(),
                expected: self.data.len(),
                got: data.len(),
            });
        }
        self.data.assign(&data);
        Ok(())
    }

    /// Cached energy table.
    pub fn energies(&self) -> ArrayView1<'_, f64> {
        self.energies.view()
    }

    /// Mutable access to the cached energy table, for callers that set
    /// energies directly instead of deriving them from a factor type.
    pub fn energies_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.energies.view_mut()
    }

    /// Number of joint configurations.
    pub fn num_configurations(&self) -> usize {
        self.energies.len()
    }

    /// Configuration index selected by a full graph assignment.
    pub fn configuration_of(&self, states: &[usize]) -> usize {
        self.variables
            .iter()
            .zip(&self.cardinalities)
            .fold(0, |index, (&var, &card)| index * card + states[var])
    }

    /// Cached energy of the configuration selected by a full graph assignment.
    pub fn energy_of(&self, states: &[usize]) -> f64 {
        self.energies[self.configuration_of(states)]
    }

    /// Cached energy of an explicit local configuration.
    pub fn energy_at(&self, local_states: &[usize]) -> f64 {
        self.energies[configuration_index(&self.cardinalities, local_states)]
    }

    /// Recompute the energy table from the type's current weights.
    pub fn forward_map(&mut self, ft: &FactorType) -> Result<()> {
        self.check_type(ft)?;
        ft.compute_energies(self.data.view(), self.energies.view_mut())
    }

    /// Accumulate `Σ_c scales[c] · ∂E(c)/∂w` into the type's gradient slice.
    pub fn accumulate_gradient(
        &self,
        ft: &FactorType,
        scales: ArrayView1<'_, f64>,
        gradient: ArrayViewMut1<'_, f64>,
    ) -> Result<()> {
        self.check_type(ft)?;
        ft.accumulate_gradient(self.data.view(), scales, gradient)
    }

    /// Accumulate `scale · ∂E(configuration)/∂w` into the type's gradient slice.
    pub fn accumulate_configuration_gradient(
        &self,
        ft: &FactorType,
        configuration: usize,
        scale: f64,
        gradient: ArrayViewMut1<'_, f64>,
    ) -> Result<()> {
        self.check_type(ft)?;
        ft.accumulate_configuration_gradient(self.data.view(), configuration, scale, gradient)
    }

    fn check_type(&self, ft: &FactorType) -> Result<()> {
        if ft.cardinalities() != self.cardinalities.as_slice() {
            return Err(FactorGraphError::CardinalityMismatch {
                context: format!("factor of type '{}'", ft.name()),
                expected: ft.cardinalities().to_vec(),
                got: self.cardinalities.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn model() -> (FactorGraphModel, FactorTypeId, FactorTypeId) {
        let mut model = FactorGraphModel::new();
        let unary = model
            .add_factor_type(
                FactorType::linear("unary", vec![2], vec![1.0, 0.0, 0.0, 1.0]).unwrap(),
            )
            .unwrap();
        let pairwise = model
            .add_factor_type(
                FactorType::linear("pairwise", vec![2, 3], (0..6).map(f64::from).collect())
                    .unwrap(),
            )
            .unwrap();
        (model, unary, pairwise)
    }

    #[test]
    fn test_factor_validates_arity_and_data() {
        let (model, unary, pairwise) = model();
        assert!(Factor::new(&model, unary, vec![0], vec![1.0, 2.0]).is_ok());
        assert!(Factor::new(&model, unary, vec![0], vec![]).is_err());
        assert!(Factor::new(&model, pairwise, vec![0], vec![]).is_err());
        assert!(Factor::new(&model, pairwise, vec![0, 1], vec![]).is_ok());
    }

    #[test]
    fn test_forward_map_and_lookup() {
        let (model, _, pairwise) = model();
        let mut factor = Factor::new(&model, pairwise, vec![2, 0], vec![]).unwrap();
        factor.forward_map(model.factor_type(pairwise)).unwrap();

        // Global states: var0 = 2, var2 = 1 → local (1, 2) → index 5.
        let states = [2, 9, 1];
        assert_eq!(factor.configuration_of(&states), 5);
        assert_eq!(factor.energy_of(&states), 5.0);
        assert_eq!(factor.energy_at(&[0, 1]), 1.0);
    }

    #[test]
    fn test_forward_map_with_data() {
        let (model, unary, _) = model();
        let mut factor = Factor::new(&model, unary, vec![0], vec![3.0, 5.0]).unwrap();
        factor.forward_map(model.factor_type(unary)).unwrap();
        assert_eq!(factor.energies(), array![3.0, 5.0]);

        factor.set_data(array![1.0, 1.0].view()).unwrap();
        factor.forward_map(model.factor_type(unary)).unwrap();
        assert_eq!(factor.energies(), array![1.0, 1.0]);
    }

    #[test]
    fn test_forward_map_rejects_foreign_type() {
        let (model, unary, pairwise) = model();
        let mut factor = Factor::new(&model, unary, vec![0], vec![1.0, 1.0]).unwrap();
        let err = factor.forward_map(model.factor_type(pairwise)).unwrap_err();
        assert!(matches!(err, FactorGraphError::CardinalityMismatch { .. }));
    }
}
