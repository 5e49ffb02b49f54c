//! Shared machinery for estimating factor type weights from labeled graphs.
//!
//! Both estimators minimize the averaged regularized objective
//!
//! ```text
//! f(w) = (1/N) [ Σ_n ℓ_n(w) + Σ_t penalty_t(w_t) ]
//! ```
//!
//! and differ only in the per-instance loss `ℓ_n` (see
//! [`MaximumLikelihood`] and [`MaximumPseudolikelihood`]). Instance losses are
//! independent given the weights, so each evaluation computes them in
//! parallel and merges per-worker partial sums; the weight update happens
//! only after every instance has been evaluated.

use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, BorrowMut};
use std::fmt;
use std::ops::Range;

use crate::error::{FactorGraphError, Result};
use crate::graph::FactorGraph;
use crate::inference::InferenceMethod;
use crate::maximum_likelihood::MaximumLikelihood;
use crate::model::{FactorGraphModel, FactorTypeId};
use crate::observation::FactorGraphObservation;
use crate::optimizer::{minimize, Evaluation, LineSearchConfig, OptimizerKind};
use crate::prior::Prior;
use crate::pseudolikelihood::MaximumPseudolikelihood;

/// A labeled factor graph used for training.
#[derive(Debug, Clone)]
pub struct TrainingInstance {
    /// Graph whose factors reference the model being trained.
    pub graph: FactorGraph,
    /// Ground-truth labeling.
    pub observation: FactorGraphObservation,
    /// Inference method bound to `graph`; required by maximum likelihood.
    pub inference: Option<InferenceMethod>,
}

impl TrainingInstance {
    /// Pair a graph with its labeling.
    pub fn new(graph: FactorGraph, observation: FactorGraphObservation) -> Result<Self> {
        observation.validate(&graph)?;
        Ok(Self {
            graph,
            observation,
            inference: None,
        })
    }

    /// Attach an inference method.
    pub fn with_inference(mut self, inference: InferenceMethod) -> Self {
        self.inference = Some(inference);
        self
    }

    /// Attach exact tree inference built for this instance's graph.
    pub fn with_tree_inference(self) -> Result<Self> {
        let tree = InferenceMethod::tree(&self.graph)?;
        Ok(self.with_inference(tree))
    }
}

/// Configuration for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Stop once the gradient norm of the averaged objective is at most this
    pub tolerance: f64,
    /// Maximum number of optimizer iterations
    pub max_iterations: usize,
    /// Optimizer used for the weight updates
    pub optimizer: OptimizerKind,
    /// Line search used by L-BFGS
    pub line_search: LineSearchConfig,
    /// Evaluate instances on the rayon thread pool
    pub parallel: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            max_iterations: 500,
            optimizer: OptimizerKind::default(),
            line_search: LineSearchConfig::default(),
            parallel: true,
        }
    }
}

impl TrainingConfig {
    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the optimizer.
    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the line search.
    pub fn with_line_search(mut self, line_search: LineSearchConfig) -> Self {
        self.line_search = line_search;
        self
    }

    /// Enable or disable parallel instance evaluation.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(FactorGraphError::InvalidParameter(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        self.optimizer.validate()?;
        self.line_search.validate()
    }
}

/// Per-iteration optimizer state, threaded explicitly through training.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingContext {
    /// Number of accepted optimizer steps.
    pub iteration: usize,
    /// Current flattened weights.
    pub parameters: Array1<f64>,
    /// Objective gradient at `parameters`.
    pub gradient: Array1<f64>,
    /// Objective value at `parameters`.
    pub objective: f64,
}

impl TrainingContext {
    pub(crate) fn new(parameters: Array1<f64>, evaluation: Evaluation) -> Self {
        Self {
            iteration: 0,
            parameters,
            gradient: evaluation.gradient,
            objective: evaluation.objective,
        }
    }

    /// Move to an evaluated point and count the step.
    pub(crate) fn accept(&mut self, parameters: Array1<f64>, evaluation: Evaluation) {
        self.parameters = parameters;
        self.gradient = evaluation.gradient;
        self.objective = evaluation.objective;
        self.iteration += 1;
    }

    /// L2 norm of the gradient.
    pub fn gradient_norm(&self) -> f64 {
        self.gradient.dot(&self.gradient).sqrt()
    }
}

/// Loss and gradient contributed by a set of instances.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceContribution {
    /// Summed loss.
    pub objective: f64,
    /// Summed gradient over the flattened weights.
    pub gradient: Array1<f64>,
}

impl InstanceContribution {
    /// Empty contribution for `num_parameters` weights.
    pub fn zeros(num_parameters: usize) -> Self {
        Self {
            objective: 0.0,
            gradient: Array1::zeros(num_parameters),
        }
    }

    /// Combine two partial sums.
    pub fn merge(mut self, other: Self) -> Self {
        self.objective += other.objective;
        self.gradient += &other.gradient;
        self
    }
}

/// Reported when training stops before meeting its tolerance.
///
/// Not an error: the model keeps the best weights found and the caller
/// decides whether to use them.
#[derive(Debug, Clone, PartialEq)]
pub struct NonConvergenceWarning {
    /// Iterations performed.
    pub iterations: usize,
    /// Gradient norm at the final weights.
    pub gradient_norm: f64,
    /// Requested tolerance.
    pub tolerance: f64,
}

impl fmt::Display for NonConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "training did not converge after {} iterations: gradient norm {:.3e} > tolerance {:.3e}",
            self.iterations, self.gradient_norm, self.tolerance
        )
    }
}

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Optimizer iterations performed.
    pub iterations: usize,
    /// Final objective value.
    pub objective: f64,
    /// Final gradient norm.
    pub gradient_norm: f64,
    /// Whether the tolerance was met.
    pub converged: bool,
    /// Present when `converged` is false.
    pub warning: Option<NonConvergenceWarning>,
}

/// Per-instance loss used by an estimator.
pub(crate) trait InstanceObjective: Sync {
    /// Estimator name for logs.
    fn name(&self) -> &'static str;

    /// Reject instances or settings the loss cannot handle.
    fn check(&self, instances: &[&TrainingInstance], config: &TrainingConfig) -> Result<()>;

    /// Loss and gradient of one instance whose energies are current.
    fn evaluate(
        &self,
        model: &FactorGraphModel,
        offsets: &[Range<usize>],
        instance: &TrainingInstance,
    ) -> Result<InstanceContribution>;
}

/// Accumulate `Σ_f Σ_c scales[f][c] · ∂E_f(c)/∂w` into a flat gradient.
pub(crate) fn accumulate_factor_scales(
    model: &FactorGraphModel,
    offsets: &[Range<usize>],
    graph: &FactorGraph,
    scales: &[Array1<f64>],
    gradient: &mut Array1<f64>,
) -> Result<()> {
    for (factor, scale) in graph.factors().iter().zip(scales) {
        let id = factor.factor_type();
        let ft = model.get(id)?;
        factor.accumulate_gradient(
            ft,
            scale.view(),
            FactorGraphModel::type_slice_mut(offsets, gradient, id),
        )?;
    }
    Ok(())
}

/// Priors attached to factor types by name.
#[derive(Debug, Default)]
pub(crate) struct PriorSet {
    priors: Vec<(String, Box<dyn Prior>)>,
}

impl PriorSet {
    pub(crate) fn add(&mut self, factor_type: &str, prior: Box<dyn Prior>) -> Result<()> {
        if self.priors.iter().any(|(name, _)| name == factor_type) {
            return Err(FactorGraphError::DuplicateName(format!(
                "prior for factor type '{}'",
                factor_type
            )));
        }
        self.priors.push((factor_type.to_string(), prior));
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.priors.len()
    }

    /// Bind every prior to its factor type.
    fn resolve(&self, model: &FactorGraphModel) -> Result<Vec<(FactorTypeId, &dyn Prior)>> {
        self.priors
            .iter()
            .map(|(name, prior)| {
                model
                    .find_factor_type(name)
                    .map(|id| (id, prior.as_ref()))
                    .ok_or_else(|| FactorGraphError::NotFound(name.clone()))
            })
            .collect()
    }
}

/// Run an estimator: minimize the averaged regularized objective over
/// `instances` and leave the best weights in `model`.
pub(crate) fn train_with<O, I>(
    objective: &O,
    model: &mut FactorGraphModel,
    instances: &mut [I],
    priors: &PriorSet,
    config: &TrainingConfig,
) -> Result<TrainingReport>
where
    O: InstanceObjective,
    I: BorrowMut<TrainingInstance> + Send,
{
    config.validate()?;
    if instances.is_empty() {
        return Err(FactorGraphError::InvalidParameter(
            "no training instances".to_string(),
        ));
    }
    for instance in instances.iter() {
        let instance = <I as Borrow<TrainingInstance>>::borrow(instance);
        instance.observation.validate(&instance.graph)?;
    }
    {
        let views: Vec<&TrainingInstance> = instances
            .iter()
            .map(<I as Borrow<TrainingInstance>>::borrow)
            .collect();
        objective.check(&views, config)?;
    }
    let resolved = priors.resolve(model)?;
    let offsets = model.parameter_offsets();
    let scale = 1.0 / instances.len() as f64;

    log::info!(
        "{}: training {} parameters on {} instances with {} priors",
        objective.name(),
        model.num_parameters(),
        instances.len(),
        resolved.len()
    );

    let initial = model.parameters();
    let mut evaluate = |params: ArrayView1<'_, f64>| -> Result<Evaluation> {
        model.set_parameters(params)?;
        let model: &FactorGraphModel = model;
        let num_parameters = model.num_parameters();

        let evaluate_one = |instance: &mut I| -> Result<InstanceContribution> {
            let instance = <I as BorrowMut<TrainingInstance>>::borrow_mut(instance);
            instance.graph.forward_map(model)?;
            objective.evaluate(model, &offsets, instance)
        };

        let mut total = if config.parallel {
            instances
                .par_iter_mut()
                .map(evaluate_one)
                .try_fold(
                    || InstanceContribution::zeros(num_parameters),
                    |acc, part| part.map(|part| acc.merge(part)),
                )
                .try_reduce(
                    || InstanceContribution::zeros(num_parameters),
                    |a, b| Ok(a.merge(b)),
                )?
        } else {
            let mut acc = InstanceContribution::zeros(num_parameters);
            for instance in instances.iter_mut() {
                acc = acc.merge(evaluate_one(instance)?);
            }
            acc
        };

        for &(id, prior) in &resolved {
            let weights = model.factor_type(id).weights();
            total.objective += prior.compute_penalty(weights);
            prior.accumulate_gradient(
                weights,
                FactorGraphModel::type_slice_mut(&offsets, &mut total.gradient, id),
            );
        }

        total.gradient *= scale;
        Ok(Evaluation {
            objective: total.objective * scale,
            gradient: total.gradient,
        })
    };

    let result = minimize(initial, config, &mut evaluate)?;
    let context = result.context;

    // The last evaluation may have been a rejected line search trial, and
    // on non-convergence `minimize` has rolled back to the best point seen.
    model.set_parameters(context.parameters.view())?;
    for instance in instances.iter_mut() {
        <I as BorrowMut<TrainingInstance>>::borrow_mut(instance)
            .graph
            .forward_map(model)?;
    }

    let gradient_norm = context.gradient_norm();
    let warning = (!result.converged).then(|| NonConvergenceWarning {
        iterations: context.iteration,
        gradient_norm,
        tolerance: config.tolerance,
    });
    match &warning {
        Some(warning) => log::warn!("{}: {}", objective.name(), warning),
        None => log::info!(
            "{}: converged after {} iterations, objective {:.6}",
            objective.name(),
            context.iteration,
            context.objective
        ),
    }

    Ok(TrainingReport {
        iterations: context.iteration,
        objective: context.objective,
        gradient_norm,
        converged: result.converged,
        warning,
    })
}

/// Weight estimator selection.
#[derive(Debug)]
pub enum ParameterEstimationMethod {
    /// Regularized maximum likelihood using each instance's inference method.
    MaximumLikelihood(MaximumLikelihood),
    /// Regularized maximum pseudolikelihood; needs no joint inference.
    MaximumPseudolikelihood(MaximumPseudolikelihood),
}

impl ParameterEstimationMethod {
    /// Attach a prior to the factor type called `factor_type`.
    pub fn add_prior<P: Prior + 'static>(&mut self, factor_type: &str, prior: P) -> Result<()> {
        match self {
            Self::MaximumLikelihood(m) => m.add_prior(factor_type, prior),
            Self::MaximumPseudolikelihood(m) => m.add_prior(factor_type, prior),
        }
    }

    /// Fit the model's weights to the instances.
    pub fn train<I>(&self, model: &mut FactorGraphModel, instances: &mut [I]) -> Result<TrainingReport>
    where
        I: BorrowMut<TrainingInstance> + Send,
    {
        match self {
            Self::MaximumLikelihood(m) => m.train(model, instances),
            Self::MaximumPseudolikelihood(m) => m.train(model, instances),
        }
    }

    /// Training configuration.
    pub fn config(&self) -> &TrainingConfig {
        match self {
            Self::MaximumLikelihood(m) => m.config(),
            Self::MaximumPseudolikelihood(m) => m.config(),
        }
    }
}

impl From<MaximumLikelihood> for ParameterEstimationMethod {
    fn from(method: MaximumLikelihood) -> Self {
        Self::MaximumLikelihood(method)
    }
}

impl From<MaximumPseudolikelihood> for ParameterEstimationMethod {
    fn from(method: MaximumPseudolikelihood) -> Self {
        Self::MaximumPseudolikelihood(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::NormalPrior;
    use ndarray::array;

    #[test]
    fn test_contribution_merge() {
        let a = InstanceContribution {
            objective: 1.0,
            gradient: array![1.0, 2.0],
        };
        let b = InstanceContribution {
            objective: 0.5,
            gradient: array![-1.0, 1.0],
        };
        let merged = InstanceContribution::zeros(2).merge(a).merge(b);
        assert_eq!(merged.objective, 1.5);
        assert_eq!(merged.gradient, array![0.0, 3.0]);
    }

    #[test]
    fn test_prior_set_rejects_duplicates_and_unknown_names() {
        let mut priors = PriorSet::default();
        priors
            .add("pairwise", Box::new(NormalPrior::new(1.0).unwrap()))
            .unwrap();
        assert!(matches!(
            priors.add("pairwise", Box::new(NormalPrior::new(2.0).unwrap())),
            Err(FactorGraphError::DuplicateName(_))
        ));
        assert_eq!(priors.len(), 1);

        let model = FactorGraphModel::new();
        assert!(matches!(
            priors.resolve(&model),
            Err(FactorGraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());
        assert!(TrainingConfig::default()
            .with_tolerance(-1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_warning_display() {
        let warning = NonConvergenceWarning {
            iterations: 5,
            gradient_norm: 0.5,
            tolerance: 1e-4,
        };
        assert!(warning.to_string().contains("5 iterations"));
    }
}
