//! Factor graph model: the arena owning every factor type.
//!
//! Factors refer to their type through a [`FactorTypeId`] handle rather than a
//! reference, so training can mutate weights in place while many factor
//! graphs built from the model stay alive.

use ndarray::{s, Array1, ArrayView1, ArrayViewMut1};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::ops::Range;

use crate::error::{FactorGraphError, Result};
use crate::factor_type::{FactorType, FactorTypeKind};
use crate::parameter_estimation::TrainingInstance;

/// Index handle for a factor type registered in a [`FactorGraphModel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactorTypeId(pub(crate) usize);

impl FactorTypeId {
    /// Position of the type in registration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Set of factor types shared by all factor graphs of one model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorGraphModel {
    factor_types: Vec<FactorType>,
    by_name: HashMap<String, FactorTypeId>,
}

impl FactorGraphModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factor type. Names must be unique.
    pub fn add_factor_type(&mut self, factor_type: FactorType) -> Result<FactorTypeId> {
        if self.by_name.contains_key(factor_type.name()) {
            return Err(FactorGraphError::DuplicateName(
                factor_type.name().to_string(),
            ));
        }
        let id = FactorTypeId(self.factor_types.len());
        self.by_name.insert(factor_type.name().to_string(), id);
        self.factor_types.push(factor_type);
        Ok(id)
    }

    /// Look up a factor type handle by name.
    pub fn find_factor_type(&self, name: &str) -> Option<FactorTypeId> {
        self.by_name.get(name).copied()
    }

    /// Look up a factor type by name, failing with `NotFound`.
    pub fn factor_type_by_name(&self, name: &str) -> Result<&FactorType> {
        self.find_factor_type(name)
            .map(|id| &self.factor_types[id.0])
            .ok_or_else(|| FactorGraphError::NotFound(name.to_string()))
    }

    /// Get a factor type by handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle was issued by a different model.
    pub fn factor_type(&self, id: FactorTypeId) -> &FactorType {
        &self.factor_types[id.0]
    }

    /// Get a factor type mutably by handle.
    pub fn factor_type_mut(&mut self, id: FactorTypeId) -> &mut FactorType {
        &mut self.factor_types[id.0]
    }

    /// Checked handle lookup.
    pub fn get(&self, id: FactorTypeId) -> Result<&FactorType> {
        self.factor_types
            .get(id.0)
            .ok_or_else(|| FactorGraphError::NotFound(format!("factor type #{}", id.0)))
    }

    /// All factor types in registration order.
    pub fn factor_types(&self) -> impl Iterator<Item = (FactorTypeId, &FactorType)> {
        self.factor_types
            .iter()
            .enumerate()
            .map(|(i, ft)| (FactorTypeId(i), ft))
    }

    /// Number of registered factor types.
    pub fn num_factor_types(&self) -> usize {
        self.factor_types.len()
    }

    /// Total number of weights across all types.
    pub fn num_parameters(&self) -> usize {
        self.factor_types.iter().map(FactorType::num_parameters).sum()
    }

    /// Range of each type's weights inside the flattened parameter vector.
    pub fn parameter_offsets(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.factor_types
            .iter()
            .map(|ft| {
                let range = start..start + ft.num_parameters();
                start = range.end;
                range
            })
            .collect()
    }

    /// Concatenate all weight vectors in registration order.
    pub fn parameters(&self) -> Array1<f64> {
        let mut params = Array1::zeros(self.num_parameters());
        for (ft, range) in self.factor_types.iter().zip(self.parameter_offsets()) {
            params.slice_mut(s![range]).assign(&ft.weights());
        }
        params
    }

    /// Scatter a flattened parameter vector back into the factor types.
    pub fn set_parameters(&mut self, params: ArrayView1<'_, f64>) -> Result<()> {
        let expected = self.num_parameters();
        if params.len() != expected {
            return Err(FactorGraphError::DimensionMismatch {
                context: "model parameter vector".to_string(),
                expected,
                got: params.len(),
            });
        }
        let offsets = self.parameter_offsets();
        for (ft, range) in self.factor_types.iter_mut().zip(offsets) {
            ft.set_weights(params.slice(s![range]))?;
        }
        Ok(())
    }

    /// Slice of a flattened vector belonging to one factor type.
    pub(crate) fn type_slice_mut<'a>(
        offsets: &[Range<usize>],
        flat: &'a mut Array1<f64>,
        id: FactorTypeId,
    ) -> ArrayViewMut1<'a, f64> {
        flat.slice_mut(s![offsets[id.0].clone()])
    }

    /// Fit every radial basis factor type to the feature vectors of the
    /// factors that use it across the given training instances.
    ///
    /// Linear types are left untouched. A radial basis type with no factors in
    /// the instances is an error, since it would remain unusable.
    pub fn initialize_from_instances<I>(&mut self, instances: &[I], seed: u64) -> Result<()>
    where
        I: Borrow<TrainingInstance>,
    {
        for index in 0..self.factor_types.len() {
            if !matches!(self.factor_types[index].kind(), FactorTypeKind::RadialBasis(_)) {
                continue;
            }
            let id = FactorTypeId(index);
            let samples: Vec<ArrayView1<'_, f64>> = instances
                .iter()
                .map(<I as Borrow<TrainingInstance>>::borrow)
                .flat_map(|instance| instance.graph.factors())
                .filter(|factor| factor.factor_type() == id)
                .map(|factor| factor.data())
                .collect();
            let seed = seed.wrapping_add(index as u64);
            self.factor_types[index].initialize_from_data(&samples, seed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_type_model() -> FactorGraphModel {
        let mut model = FactorGraphModel::new();
        model
            .add_factor_type(FactorType::linear("unary", vec![2], vec![1.0, 2.0]).unwrap())
            .unwrap();
        model
            .add_factor_type(
                FactorType::linear("pairwise", vec![2, 2], vec![3.0, 4.0, 5.0, 6.0]).unwrap(),
            )
            .unwrap();
        model
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut model = two_type_model();
        let err = model
            .add_factor_type(FactorType::linear("unary", vec![3], vec![0.0; 3]).unwrap())
            .unwrap_err();
        assert_eq!(err, FactorGraphError::DuplicateName("unary".to_string()));
        assert_eq!(model.num_factor_types(), 2);
    }

    #[test]
    fn test_find_factor_type() {
        let model = two_type_model();
        let id = model.find_factor_type("pairwise").unwrap();
        assert_eq!(model.factor_type(id).arity(), 2);
        assert!(model.find_factor_type("missing").is_none());
        assert!(matches!(
            model.factor_type_by_name("missing"),
            Err(FactorGraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_parameters_flatten_and_scatter() {
        let mut model = two_type_model();
        assert_eq!(model.num_parameters(), 6);
        assert_eq!(model.parameters(), array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(model.parameter_offsets(), vec![0..2, 2..6]);

        model
            .set_parameters(array![0.0, 0.5, 1.0, 1.5, 2.0, 2.5].view())
            .unwrap();
        let unary = model.factor_type_by_name("unary").unwrap();
        assert_eq!(unary.weights(), array![0.0, 0.5]);

        assert!(model.set_parameters(array![1.0].view()).is_err());
    }

    #[test]
    fn test_model_serializes_weights() {
        let model = two_type_model();
        let json = serde_json::to_string(&model).unwrap();
        let restored: FactorGraphModel = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, model);
    }
}
