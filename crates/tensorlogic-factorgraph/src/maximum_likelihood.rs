//! Regularized maximum likelihood estimation.
//!
//! Per-instance loss is the negative log-likelihood of the observed labeling,
//! `ℓ = E(y) + ln Z`, whose gradient is the observed energy gradient minus its
//! expectation under the model's factor marginals.

use ndarray::Array1;
use std::borrow::BorrowMut;
use std::ops::Range;

use crate::error::{FactorGraphError, Result};
use crate::model::FactorGraphModel;
use crate::parameter_estimation::{
    accumulate_factor_scales, train_with, InstanceContribution, InstanceObjective, PriorSet,
    TrainingConfig, TrainingInstance, TrainingReport,
};
use crate::prior::Prior;

/// Maximum likelihood trainer.
///
/// Every instance must carry an inference method. Exact (tree) inference
/// gives the exact objective and works with any optimizer. Gibbs inference
/// only yields sampled marginals, so it must be paired with gradient descent;
/// the reported objective is then the energy gap `E(y) − E_q[E]` rather than
/// the negative log-likelihood.
#[derive(Debug, Default)]
pub struct MaximumLikelihood {
    config: TrainingConfig,
    priors: PriorSet,
}

impl MaximumLikelihood {
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
    ///
    /// Fails with `DuplicateName` if that type already has a prior. Unknown
    /// type names are reported when training starts.
    pub fn add_prior<P: Prior + 'static>(&mut self, factor_type: &str, prior: P) -> Result<()> {
        self.priors.add(factor_type, Box::new(prior))
    }

    /// Fit the model's weights to the instances.
    ///
    /// On return the model holds the best weights found and every instance
    /// graph has been forward-mapped with them.
    pub fn train<I>(&self, model: &mut FactorGraphModel, instances: &mut [I]) -> Result<TrainingReport>
    where
        I: BorrowMut<TrainingInstance> + Send,
    {
        train_with(self, model, instances, &self.priors, &self.config)
    }
}

impl InstanceObjective for MaximumLikelihood {
    fn name(&self) -> &'static str {
        "maximum-likelihood"
    }

    fn check(&self, instances: &[&TrainingInstance], config: &TrainingConfig) -> Result<()> {
        for (index, instance) in instances.iter().enumerate() {
            let inference = instance.inference.as_ref().ok_or_else(|| {
                FactorGraphError::InvalidParameter(format!(
                    "training instance {} has no inference method",
                    index
                ))
            })?;
            if config.optimizer.requires_exact_objective() && !inference.is_exact() {
                return Err(FactorGraphError::InvalidParameter(format!(
                    "training instance {} uses {} inference, which cannot supply the exact \
                     objective required by {:?}",
                    index,
                    inference.name(),
                    config.optimizer
                )));
            }
        }
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
        let inference = instance.inference.as_ref().ok_or_else(|| {
            FactorGraphError::InvalidParameter("training instance has no inference method".into())
        })?;
        let marginals = inference.marginals(graph)?;

        let data_energy = graph.energy(labels);
        let objective = match marginals.log_partition {
            Some(log_partition) => data_energy + log_partition,
            None => {
                let expected: f64 = graph
                    .factors()
                    .iter()
                    .zip(&marginals.factors)
                    .map(|(factor, q)| factor.energies().dot(q))
                    .sum();
                data_energy - expected
            }
        };

        // Observed minus expected sufficient statistics, per factor.
        let scales: Vec<Array1<f64>> = graph
            .factors()
            .iter()
            .zip(marginals.factors)
            .map(|(factor, q)| {
                let mut scale = -q;
                scale[factor.configuration_of(labels)] += 1.0;
                scale
            })
            .collect();

        let mut contribution = InstanceContribution::zeros(model.num_parameters());
        contribution.objective = objective;
        accumulate_factor_scales(model, offsets, graph, &scales, &mut contribution.gradient)?;
        Ok(contribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::Factor;
    use crate::factor_type::FactorType;
    use crate::gibbs::GibbsConfig;
    use crate::graph::FactorGraph;
    use crate::inference::InferenceMethod;
    use crate::observation::FactorGraphObservation;
    use crate::optimizer::OptimizerKind;
    use crate::prior::NormalPrior;
    use approx::assert_abs_diff_eq;

    fn unary_instance(model: &FactorGraphModel, label: usize) -> TrainingInstance {
        let unary = model.find_factor_type("unary").unwrap();
        let mut graph = FactorGraph::new(vec![2]).unwrap();
        graph
            .add_factor(Factor::new(model, unary, vec![0], vec![]).unwrap())
            .unwrap();
        TrainingInstance::new(graph, FactorGraphObservation::new(vec![label]))
            .unwrap()
            .with_tree_inference()
            .unwrap()
    }

    fn unary_model() -> FactorGraphModel {
        let mut model = FactorGraphModel::new();
        model
            .add_factor_type(FactorType::linear("unary", vec![2], vec![0.0, 0.0]).unwrap())
            .unwrap();
        model
    }

    #[test]
    fn test_recovers_empirical_frequencies() {
        // Three of four labels are 0: the fitted distribution must give p(0) = 3/4,
        // i.e. w1 - w0 = ln 3.
        let mut model = unary_model();
        let mut instances: Vec<_> = [0, 0, 0, 1]
            .iter()
            .map(|&l| unary_instance(&model, l))
            .collect();

        let trainer = MaximumLikelihood::new(TrainingConfig::default().with_tolerance(1e-8));
        let report = trainer.train(&mut model, &mut instances).unwrap();
        assert!(report.converged);
        assert!(report.warning.is_none());

        let w = model.factor_type_by_name("unary").unwrap().weights();
        assert_abs_diff_eq!(w[1] - w[0], 3.0_f64.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_prior_shrinks_weights() {
        let mut free = unary_model();
        let mut shrunk = unary_model();
        let mut a: Vec<_> = [0, 0, 0, 1].iter().map(|&l| unary_instance(&free, l)).collect();
        let mut b = a.clone();

        MaximumLikelihood::new(TrainingConfig::default())
            .train(&mut free, &mut a)
            .unwrap();
        let mut regularized = MaximumLikelihood::new(TrainingConfig::default());
        regularized
            .add_prior("unary", NormalPrior::new(0.5).unwrap())
            .unwrap();
        regularized.train(&mut shrunk, &mut b).unwrap();

        let gap = |m: &FactorGraphModel| {
            let w = m.factor_type_by_name("unary").unwrap().weights();
            (w[1] - w[0]).abs()
        };
        assert!(gap(&shrunk) < gap(&free));
    }

    #[test]
    fn test_missing_inference_rejected() {
        let mut model = unary_model();
        let mut instance = unary_instance(&model, 0);
        instance.inference = None;
        let err = MaximumLikelihood::default()
            .train(&mut model, &mut [instance])
            .unwrap_err();
        assert!(matches!(err, FactorGraphError::InvalidParameter(_)));
    }

    #[test]
    fn test_lbfgs_with_gibbs_rejected() {
        let mut model = unary_model();
        let instance = unary_instance(&model, 0)
            .with_inference(InferenceMethod::gibbs(GibbsConfig::default()));
        let err = MaximumLikelihood::default()
            .train(&mut model, &mut [instance])
            .unwrap_err();
        assert!(matches!(err, FactorGraphError::InvalidParameter(_)));
    }

    #[test]
    fn test_gibbs_with_gradient_descent_moves_toward_labels() {
        let mut model = unary_model();
        let mut instances: Vec<_> = (0..4)
            .map(|_| {
                unary_instance(&model, 1).with_inference(InferenceMethod::gibbs(
                    GibbsConfig::default()
                        .with_burn_in_sweeps(10)
                        .with_sampling_sweeps(200),
                ))
            })
            .collect();
        let config = TrainingConfig::default()
            .with_max_iterations(20)
            .with_optimizer(OptimizerKind::GradientDescent { learning_rate: 0.5 });
        MaximumLikelihood::new(config)
            .train(&mut model, &mut instances)
            .unwrap();

        let w = model.factor_type_by_name("unary").unwrap().weights();
        assert!(w[1] < w[0]);
    }

    #[test]
    fn test_overshooting_step_keeps_best_weights() {
        let mut model = unary_model();
        let mut instances: Vec<_> = [0, 0, 0, 1]
            .iter()
            .map(|&l| unary_instance(&model, l))
            .collect();
        let config = TrainingConfig::default()
            .with_max_iterations(1)
            .with_optimizer(OptimizerKind::GradientDescent {
                learning_rate: 1000.0,
            });
        let report = MaximumLikelihood::new(config)
            .train(&mut model, &mut instances)
            .unwrap();

        assert!(!report.converged);
        assert!(report.warning.is_some());
        assert_eq!(report.iterations, 1);
        assert_abs_diff_eq!(report.objective, 2.0_f64.ln(), epsilon = 1e-12);

        let w = model.factor_type_by_name("unary").unwrap().weights();
        assert_eq!(w.to_vec(), vec![0.0, 0.0]);
        for instance in &instances {
            assert_eq!(instance.graph.factor(0).energies().to_vec(), vec![0.0, 0.0]);
        }
    }

    #[test]
    fn test_unknown_prior_name_rejected_at_train_time() {
        let mut model = unary_model();
        let mut trainer = MaximumLikelihood::default();
        trainer
            .add_prior("missing", NormalPrior::new(1.0).unwrap())
            .unwrap();
        let instance = unary_instance(&model, 0);
        let err = trainer.train(&mut model, &mut [instance]).unwrap_err();
        assert_eq!(err, FactorGraphError::NotFound("missing".to_string()));
    }
}
