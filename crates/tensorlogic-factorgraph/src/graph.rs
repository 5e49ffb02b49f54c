//! Factor graph representation.

use serde::{Deserialize, Serialize};

use crate::error::{FactorGraphError, Result};
use crate::factor::Factor;
use crate::model::FactorGraphModel;
use crate::numeric::strides;

/// Edge between a variable and a factor: the factor index and the position
/// of the variable inside the factor's tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incidence {
    /// Index of the factor in the graph.
    pub factor: usize,
    /// Position of the variable in the factor's variable tuple.
    pub position: usize,
}

/// Discrete factor graph: variables with finite cardinalities and the
/// factors connecting them.
///
/// The graph does not own its factor types; energies are refreshed from a
/// [`FactorGraphModel`] by [`forward_map`](Self::forward_map), which must be
/// called after every weight or feature change before inference reads the
/// energy tables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorGraph {
    cardinalities: Vec<usize>,
    factors: Vec<Factor>,
    /// Adjacency: variable -> incident factors
    incidence: Vec<Vec<Incidence>>,
}

impl FactorGraph {
    /// Create a graph with one variable per cardinality entry.
    pub fn new(cardinalities: Vec<usize>) -> Result<Self> {
        if let Some(var) = cardinalities.iter().position(|&c| c == 0) {
            return Err(FactorGraphError::InvalidParameter(format!(
                "variable {} has cardinality 0",
                var
            )));
        }
        Ok(Self {
            incidence: vec![Vec::new(); cardinalities.len()],
            cardinalities,
            factors: Vec::new(),
        })
    }

    /// Add a factor, checking its variable indices and cardinalities.
    ///
    /// Returns the index of the new factor.
    pub fn add_factor(&mut self, factor: Factor) -> Result<usize> {
        let index = self.factors.len();

        for (pos, &var) in factor.variables().iter().enumerate() {
            if var >= self.cardinalities.len() {
                return Err(FactorGraphError::VariableOutOfRange {
                    what: "variable",
                    index: var,
                    limit: self.cardinalities.len(),
                });
            }
            if factor.variables()[..pos].contains(&var) {
                return Err(FactorGraphError::InvalidParameter(format!(
                    "factor {} references variable {} more than once",
                    index, var
                )));
            }
        }

        let graph_cards: Vec<usize> = factor
            .variables()
            .iter()
            .map(|&v| self.cardinalities[v])
            .collect();
        if graph_cards != factor.cardinalities() {
            return Err(FactorGraphError::CardinalityMismatch {
                context: format!("factor {} over variables {:?}", index, factor.variables()),
                expected: factor.cardinalities().to_vec(),
                got: graph_cards,
            });
        }

        // Update adjacency lists
        for (position, &var) in factor.variables().iter().enumerate() {
            self.incidence[var].push(Incidence {
                factor: index,
                position,
            });
        }
        self.factors.push(factor);
        Ok(index)
    }

    /// Recompute every factor's energy table from the model's current weights.
    pub fn forward_map(&mut self, model: &FactorGraphModel) -> Result<()> {
        for factor in &mut self.factors {
            let ft = model.get(factor.factor_type())?;
            factor.forward_map(ft)?;
        }
        Ok(())
    }

    /// Number of variables.
    pub fn num_variables(&self) -> usize {
        self.cardinalities.len()
    }

    /// Number of factors.
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    /// Cardinality of one variable.
    pub fn cardinality(&self, var: usize) -> usize {
        self.cardinalities[var]
    }

    /// Cardinalities of all variables.
    pub fn cardinalities(&self) -> &[usize] {
        &self.cardinalities
    }

    /// All factors in insertion order.
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// Get a factor by index.
    pub fn factor(&self, index: usize) -> &Factor {
        &self.factors[index]
    }

    /// Get a factor mutably by index.
    pub fn factor_mut(&mut self, index: usize) -> &mut Factor {
        &mut self.factors[index]
    }

    /// Factors incident to a variable.
    pub fn incidence(&self, var: usize) -> &[Incidence] {
        &self.incidence[var]
    }

    /// Indices of the factors incident to a variable.
    pub fn adjacent_factors(&self, var: usize) -> impl Iterator<Item = usize> + '_ {
        self.incidence[var].iter().map(|inc| inc.factor)
    }

    /// Check that `states` is a complete, in-range assignment.
    pub fn check_assignment(&self, states: &[usize]) -> Result<()> {
        if states.len() != self.cardinalities.len() {
            return Err(FactorGraphError::DimensionMismatch {
                context: "graph assignment".to_string(),
                expected: self.cardinalities.len(),
                got: states.len(),
            });
        }
        for (&state, &card) in states.iter().zip(&self.cardinalities) {
            if state >= card {
                return Err(FactorGraphError::VariableOutOfRange {
                    what: "state",
                    index: state,
                    limit: card,
                });
            }
        }
        Ok(())
    }

    /// Total energy of a full assignment, from the cached energy tables.
    pub fn energy(&self, states: &[usize]) -> f64 {
        self.factors.iter().map(|f| f.energy_of(states)).sum()
    }

    /// Energy contribution of each state of `var` with every other variable
    /// held at `states`. Only factors incident to `var` contribute.
    pub fn conditional_energies(&self, var: usize, states: &[usize]) -> Vec<f64> {
        let mut energies = vec![0.0; self.cardinalities[var]];
        self.add_conditional_energies(var, states, &mut energies);
        energies
    }

    pub(crate) fn add_conditional_energies(&self, var: usize, states: &[usize], out: &mut [f64]) {
        for inc in &self.incidence[var] {
            let factor = &self.factors[inc.factor];
            let stride = strides(factor.cardinalities())[inc.position];
            let base = factor.configuration_of(states) - states[var] * stride;
            let table = factor.energies();
            for (s, e) in out.iter_mut().enumerate() {
                *e += table[base + s * stride];
            }
        }
    }

    /// Whether the variable–factor graph is cycle-free (a forest).
    pub fn is_forest(&self) -> bool {
        let n = self.cardinalities.len();
        let mut sets = DisjointSets::new(n + self.factors.len());
        for (f, factor) in self.factors.iter().enumerate() {
            for &var in factor.variables() {
                if !sets.union(var, n + f) {
                    return false;
                }
            }
        }
        true
    }
}

/// Union-find over graph nodes.
struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`; false if they were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor_type::FactorType;
    use crate::model::FactorTypeId;

    fn pairwise_model() -> (FactorGraphModel, FactorTypeId) {
        let mut model = FactorGraphModel::new();
        let id = model
            .add_factor_type(
                FactorType::linear("pairwise", vec![2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap(),
            )
            .unwrap();
        (model, id)
    }

    #[test]
    fn test_graph_creation() {
        let graph = FactorGraph::new(vec![2, 3]).unwrap();
        assert_eq!(graph.num_variables(), 2);
        assert_eq!(graph.num_factors(), 0);
        assert!(FactorGraph::new(vec![2, 0]).is_err());
    }

    #[test]
    fn test_add_factor_validates() {
        let (model, pw) = pairwise_model();
        let mut graph = FactorGraph::new(vec![2, 2, 3]).unwrap();

        let out_of_range = Factor::new(&model, pw, vec![0, 5], vec![]).unwrap();
        assert!(matches!(
            graph.add_factor(out_of_range),
            Err(FactorGraphError::VariableOutOfRange { .. })
        ));

        let wrong_card = Factor::new(&model, pw, vec![0, 2], vec![]).unwrap();
        assert!(matches!(
            graph.add_factor(wrong_card),
            Err(FactorGraphError::CardinalityMismatch { .. })
        ));

        let repeated = Factor::new(&model, pw, vec![1, 1], vec![]).unwrap();
        assert!(graph.add_factor(repeated).is_err());

        let ok = Factor::new(&model, pw, vec![0, 1], vec![]).unwrap();
        assert_eq!(graph.add_factor(ok).unwrap(), 0);
        assert_eq!(graph.num_factors(), 1);
    }

    #[test]
    fn test_adjacency() {
        let (model, pw) = pairwise_model();
        let mut graph = FactorGraph::new(vec![2, 2, 2]).unwrap();
        graph
            .add_factor(Factor::new(&model, pw, vec![0, 1], vec![]).unwrap())
            .unwrap();
        graph
            .add_factor(Factor::new(&model, pw, vec![1, 2], vec![]).unwrap())
            .unwrap();

        assert_eq!(graph.adjacent_factors(1).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(
            graph.incidence(1),
            &[
                Incidence {
                    factor: 0,
                    position: 1
                },
                Incidence {
                    factor: 1,
                    position: 0
                }
            ]
        );
    }

    #[test]
    fn test_energy_and_conditionals() {
        let (model, pw) = pairwise_model();
        let mut graph = FactorGraph::new(vec![2, 2, 2]).unwrap();
        graph
            .add_factor(Factor::new(&model, pw, vec![0, 1], vec![]).unwrap())
            .unwrap();
        graph
            .add_factor(Factor::new(&model, pw, vec![1, 2], vec![]).unwrap())
            .unwrap();
        graph.forward_map(&model).unwrap();

        // E(1,0,1) = w[(1,0)] + w[(0,1)] = 2 + 1
        assert_eq!(graph.energy(&[1, 0, 1]), 3.0);

        // Vary x1 with x0 = 1, x2 = 1: E(x1=0) = 2 + 1, E(x1=1) = 3 + 3
        assert_eq!(graph.conditional_energies(1, &[1, 0, 1]), vec![3.0, 6.0]);
    }

    #[test]
    fn test_is_forest() {
        let (model, pw) = pairwise_model();
        let mut chain = FactorGraph::new(vec![2, 2, 2]).unwrap();
        for (a, b) in [(0, 1), (1, 2)] {
            chain
                .add_factor(Factor::new(&model, pw, vec![a, b], vec![]).unwrap())
                .unwrap();
        }
        assert!(chain.is_forest());

        let mut cycle = chain.clone();
        cycle
            .add_factor(Factor::new(&model, pw, vec![2, 0], vec![]).unwrap())
            .unwrap();
        assert!(!cycle.is_forest());

        // Two parallel factors over the same pair also form a cycle.
        let mut parallel = chain.clone();
        parallel
            .add_factor(Factor::new(&model, pw, vec![1, 0], vec![]).unwrap())
            .unwrap();
        assert!(!parallel.is_forest());
    }

    #[test]
    fn test_check_assignment() {
        let graph = FactorGraph::new(vec![2, 3]).unwrap();
        assert!(graph.check_assignment(&[1, 2]).is_ok());
        assert!(graph.check_assignment(&[1, 3]).is_err());
        assert!(graph.check_assignment(&[1]).is_err());
    }
}
