//! Inference methods over factor graphs.
//!
//! [`InferenceMethod`] is a closed set of algorithms selected per graph:
//! exact min-sum / sum-product message passing on cycle-free graphs, or Gibbs
//! sampling on arbitrary graphs. Both answer the same two queries:
//! the minimum-energy joint state and the marginal statistics needed for
//! training.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gibbs::{GibbsConfig, GibbsInference};
use crate::graph::FactorGraph;
use crate::observation::FactorGraphObservation;
use crate::tree_inference::TreeInference;

/// Minimum-energy joint state found by an inference method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEstimate {
    /// One state per variable.
    pub states: Vec<usize>,
    /// Total energy of `states`.
    pub energy: f64,
}

impl MapEstimate {
    /// Convert the state vector into an observation.
    pub fn into_observation(self) -> FactorGraphObservation {
        FactorGraphObservation::new(self.states)
    }
}

/// Marginal statistics of a factor graph's distribution `p(x) ∝ exp(-E(x))`.
#[derive(Clone, Debug, PartialEq)]
pub struct Marginals {
    /// Per-variable state probabilities.
    pub variables: Vec<Array1<f64>>,
    /// Per-factor configuration probabilities, indexed like the factor's
    /// energy table.
    pub factors: Vec<Array1<f64>>,
    /// `ln Σ_x exp(-E(x))`, when the method computes it exactly.
    pub log_partition: Option<f64>,
}

/// Inference algorithm bound to one factor graph.
#[derive(Clone, Debug)]
pub enum InferenceMethod {
    /// Exact message passing on a tree or forest.
    Tree(TreeInference),
    /// Approximate Markov chain Monte Carlo.
    Gibbs(GibbsInference),
}

impl InferenceMethod {
    /// Exact tree inference for `graph`; fails with `NotATree` on cyclic graphs.
    pub fn tree(graph: &FactorGraph) -> Result<Self> {
        TreeInference::new(graph).map(Self::Tree)
    }

    /// Gibbs sampling with the given chain configuration.
    pub fn gibbs(config: GibbsConfig) -> Self {
        Self::Gibbs(GibbsInference::new(config))
    }

    /// Find a minimum-energy joint state.
    ///
    /// Exact for tree inference; the best visited state for Gibbs sampling.
    pub fn minimize_energy(&self, graph: &FactorGraph) -> Result<MapEstimate> {
        match self {
            Self::Tree(tree) => tree.minimize_energy(graph),
            Self::Gibbs(gibbs) => gibbs.minimize_energy(graph),
        }
    }

    /// Compute variable and factor marginals.
    pub fn marginals(&self, graph: &FactorGraph) -> Result<Marginals> {
        match self {
            Self::Tree(tree) => tree.marginals(graph),
            Self::Gibbs(gibbs) => gibbs.marginals(graph),
        }
    }

    /// Whether marginals and the log-partition function are exact.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// Short algorithm name for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tree(_) => "tree",
            Self::Gibbs(_) => "gibbs",
        }
    }
}

impl From<TreeInference> for InferenceMethod {
    fn from(tree: TreeInference) -> Self {
        Self::Tree(tree)
    }
}

impl From<GibbsInference> for InferenceMethod {
    fn from(gibbs: GibbsInference) -> Self {
        Self::Gibbs(gibbs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::Factor;
    use crate::factor_type::FactorType;
    use crate::model::FactorGraphModel;

    #[test]
    fn test_dispatch_agrees_on_small_chain() {
        let mut model = FactorGraphModel::new();
        let unary = model
            .add_factor_type(FactorType::linear("unary", vec![3], vec![0.5, 0.0, 1.0]).unwrap())
            .unwrap();
        let mut graph = FactorGraph::new(vec![3, 3]).unwrap();
        for v in 0..2 {
            graph
                .add_factor(Factor::new(&model, unary, vec![v], vec![]).unwrap())
                .unwrap();
        }
        graph.forward_map(&model).unwrap();

        let tree = InferenceMethod::tree(&graph).unwrap();
        let gibbs = InferenceMethod::gibbs(GibbsConfig::default().with_seed(1));
        assert!(tree.is_exact());
        assert!(!gibbs.is_exact());

        let exact = tree.minimize_energy(&graph).unwrap();
        let sampled = gibbs.minimize_energy(&graph).unwrap();
        assert_eq!(exact.states, vec![1, 1]);
        assert_eq!(sampled.states, exact.states);
        assert_eq!(exact.into_observation().states(), &[1, 1]);
    }
}
