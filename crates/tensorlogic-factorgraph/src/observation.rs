//! Observed or predicted joint states of a factor graph.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::FactorGraph;

/// One state per variable.
///
/// Used both for ground-truth labelings during training and for predictions
/// returned by inference; the structure is the same, only the provenance
/// differs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactorGraphObservation {
    states: Vec<usize>,
}

impl FactorGraphObservation {
    /// Create an observation from a state vector.
    pub fn new(states: Vec<usize>) -> Self {
        Self { states }
    }

    /// Create an observation after checking it against a graph.
    pub fn for_graph(graph: &FactorGraph, states: Vec<usize>) -> Result<Self> {
        graph.check_assignment(&states)?;
        Ok(Self { states })
    }

    /// Per-variable states.
    pub fn states(&self) -> &[usize] {
        &self.states
    }

    /// Number of variables covered.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the observation covers no variables.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Check that every state is within its variable's cardinality.
    pub fn validate(&self, graph: &FactorGraph) -> Result<()> {
        graph.check_assignment(&self.states)
    }

    /// Number of variables on which two observations agree.
    pub fn agreement(&self, other: &FactorGraphObservation) -> usize {
        self.states
            .iter()
            .zip(&other.states)
            .filter(|(a, b)| a == b)
            .count()
    }
}

impl From<Vec<usize>> for FactorGraphObservation {
    fn from(states: Vec<usize>) -> Self {
        Self::new(states)
    }
}
