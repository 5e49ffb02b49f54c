//! Regularized maximum pseudolikelihood estimation.
//!
//! Replaces the joint likelihood by the product of per-variable conditionals
//! given the observed states of all other variables:
//!
//! ```text
//! ℓ = Σ_v [ E_v(y_v | y_−v) + ln Σ_s exp(−E_v(s | y_−v)) ]
//! ```
//!
//! Each conditional only touches the factors incident to one variable, so no
//! graph-wide inference is needed and cyclic graphs are handled directly.

use ndarray::Array1;
use std::borrow::BorrowMut;
use std::ops::Range;

use crate::error::Result;
use crate::model::FactorGraphModel;
use crate::numeric::{boltzmann, soft_min, strides};
use crate::parameter_estimation::{
    accumulate_factor_scales, train_with, InstanceContribution, InstanceObjective, PriorSet,
    TrainingConfig, TrainingInstance, TrainingReport,
};
use crate::prior::Prior;

/// Maximum pseudolikelihood trainer. Ignores the instances' inference methods.
#[derive(Debug, Default)]
pub struct MaximumPseudolikelihood {
    config: TrainingConfig,
    priors: PriorSet,
}

impl MaximumPseudolikelihood {
    /// Create a trainer with the given configuration.
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            priors: PriorSet::default(),
        }
    }

    /// Training configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Attach a prior to the factor type called `factor_type`.
    pub fn add_prior<P: Prior + 'static>(&mut self, factor_type: &str, prior: P) -> Result<()> {
        self.priors.add(factor_type, Box::new(prior))
    }

    /// Fit the model's weights to the instances.
    pub fn train<I>(&self, model: &mut FactorGraphModel, instances: &mut [I]) -> Result<TrainingReport>
    where
        I: BorrowMut<TrainingInstance> + Send,
    {
        train_with(self, model, instances, &self.priors, &self.config)
    }
}

impl InstanceObjective for MaximumPseudolikelihood {
    fn name(&self) -> &'static str {
        "maximum-pseudolikelihood"
    }

    fn check(&self, _instances: &[&TrainingInstance], _config: &TrainingConfig) -> Result<()> {
        Ok(())
    }

    fn evaluate(
        &self,
        model: &FactorGraphModel,
        offsets: &[Range<usize>],
        instance: &TrainingInstance,
    ) -> Result<InstanceContribution> {
        let graph = &instance.graph;
        let labels = instance.observation.states();

        let mut scales: Vec<Array1<f64>> = graph
            .factors()
            .iter()
            .map(|f| Array1::zeros(f.num_configurations()))
            .collect();
        let factor_strides: Vec<Vec<usize>> = graph
            .factors()
            .iter()
            .map(|f| strides(f.cardinalities()))
            .collect();

        let mut objective = 0.0;
        for (var, &label) in labels.iter().enumerate() {
            let conditional = graph.conditional_energies(var, labels);
            objective += conditional[label] - soft_min(&conditional);
            let probs = boltzmann(&conditional);

            for inc in graph.incidence(var) {
                let stride = factor_strides[inc.factor][inc.position];
                let observed = graph.factor(inc.factor).configuration_of(labels);
                let base = observed - label * stride;
                let scale = &mut scales[inc.factor];
                scale[observed] += 1.0;
                for (s, p) in probs.iter().enumerate() {
                    scale[base + s * stride] -= p;
                }
            }
        }

        let mut contribution = InstanceContribution::zeros(model.num_parameters());
        contribution.objective = objective;
        accumulate_factor_scales(model, offsets, graph, &scales, &mut contribution.gradient)?;
        Ok(contribution)
    }
}
