//! Discrete factor graphs with trainable factor types.
//!
//! This crate models structured prediction problems as energy-based factor
//! graphs: discrete variables joined by factors whose energies come from
//! shared, trainable factor types.
//!
//! # Core Concepts
//!
//! - **Factor types**: linear or radial basis energy families, owned by a
//!   [`FactorGraphModel`] and shared by every factor built from them
//! - **Factor graphs**: per-example variables and factors with cached energy
//!   tables, refreshed by [`FactorGraph::forward_map`]
//! - **Inference**: exact min-sum / sum-product on trees, Gibbs sampling on
//!   anything
//! - **Training**: regularized maximum likelihood or pseudolikelihood over
//!   many labeled graphs, evaluated in parallel
//!
//! # Architecture
//!
//! ```text
//! FactorGraphModel → FactorGraph::forward_map → InferenceMethod → MapEstimate / Marginals
//!        ↑                                                              ↓
//!        └──────────── MaximumLikelihood / MaximumPseudolikelihood ←────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tensorlogic_factorgraph::{
//!     Factor, FactorGraph, FactorGraphModel, FactorType, InferenceMethod,
//! };
//!
//! let mut model = FactorGraphModel::new();
//! let unary = model.add_factor_type(FactorType::linear("unary", vec![2], vec![0.0, 1.0])?)?;
//! let pair = model.add_factor_type(FactorType::linear(
//!     "pair",
//!     vec![2, 2],
//!     vec![0.0, 1.0, 1.0, 0.0],
//! )?)?;
//!
//! let mut graph = FactorGraph::new(vec![2, 2])?;
//! graph.add_factor(Factor::new(&model, unary, vec![0], vec![])?)?;
//! graph.add_factor(Factor::new(&model, unary, vec![1], vec![])?)?;
//! graph.add_factor(Factor::new(&model, pair, vec![0, 1], vec![])?)?;
//! graph.forward_map(&model)?;
//!
//! let map = InferenceMethod::tree(&graph)?.minimize_energy(&graph)?;
//! assert_eq!(map.states, vec![0, 0]);
//! # Ok::<(), tensorlogic_factorgraph::FactorGraphError>(())
//! ```

mod error;
mod factor;
mod factor_type;
mod gibbs;
mod graph;
mod inference;
mod maximum_likelihood;
mod model;
mod observation;
mod optimizer;
mod parameter_estimation;
mod prior;
mod pseudolikelihood;
mod tree_inference;

pub mod crossval;
pub mod evaluation;
pub mod numeric;
#[cfg(feature = "structured-logging")]
pub mod structured_logging;

pub use error::{FactorGraphError, Result};
pub use factor::Factor;
pub use factor_type::{FactorType, FactorTypeKind, RadialBasisParams};
pub use gibbs::{GibbsConfig, GibbsInference, ScanOrder};
pub use graph::{FactorGraph, Incidence};
pub use inference::{InferenceMethod, MapEstimate, Marginals};
pub use maximum_likelihood::MaximumLikelihood;
pub use model::{FactorGraphModel, FactorTypeId};
pub use observation::FactorGraphObservation;
pub use optimizer::{
    Evaluation, GradientDescent, Lbfgs, LineSearchConfig, ObjectiveFn, Optimizer, OptimizerKind,
    StepOutcome,
};
pub use parameter_estimation::{
    InstanceContribution, NonConvergenceWarning, ParameterEstimationMethod, TrainingConfig,
    TrainingContext, TrainingInstance, TrainingReport,
};
pub use prior::{LaplacePrior, NormalPrior, Prior, StudentTPrior};
pub use pseudolikelihood::MaximumPseudolikelihood;
pub use tree_inference::TreeInference;
