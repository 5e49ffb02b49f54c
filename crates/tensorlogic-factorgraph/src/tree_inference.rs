//! Exact inference on tree-structured factor graphs.
//!
//! Messages live in the energy domain. Minimizing energy uses min-sum
//! messages; marginals use soft-min (`-ln Σ exp(-·)`) messages, which is
//! sum-product carried out in log space so long chains never underflow.

use ndarray::Array1;

use crate::error::{FactorGraphError, Result};
use crate::graph::{FactorGraph, Incidence};
use crate::inference::{MapEstimate, Marginals};
use crate::numeric::{boltzmann, decode_configuration, soft_min, SoftMinAccumulator};

/// Node of the bipartite variable–factor graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    Variable(usize),
    Factor(usize),
}

/// How a factor-to-variable message reduces over configurations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reduction {
    /// Min-sum, for the minimum-energy state.
    Min,
    /// Soft-min, for marginals and the partition function.
    SoftMin,
}

/// Energy-domain messages indexed by `[factor][position]`.
#[derive(Clone, Debug)]
struct MessageStore {
    /// Messages from variables to factors
    var_to_factor: Vec<Vec<Vec<f64>>>,
    /// Messages from factors to variables
    factor_to_var: Vec<Vec<Vec<f64>>>,
}

impl MessageStore {
    fn new(graph: &FactorGraph) -> Self {
        let zeros: Vec<Vec<Vec<f64>>> = graph
            .factors()
            .iter()
            .map(|f| f.cardinalities().iter().map(|&c| vec![0.0; c]).collect())
            .collect();
        Self {
            var_to_factor: zeros.clone(),
            factor_to_var: zeros,
        }
    }

    /// Sum of the factor messages arriving at `var`, optionally skipping one edge.
    fn incoming(&self, graph: &FactorGraph, var: usize, skip: Option<Incidence>) -> Vec<f64> {
        let mut total = vec![0.0; graph.cardinality(var)];
        for inc in graph.incidence(var) {
            if Some(*inc) == skip {
                continue;
            }
            for (t, m) in total.iter_mut().zip(&self.factor_to_var[inc.factor][inc.position]) {
                *t += m;
            }
        }
        total
    }

    /// Cost of one factor configuration: its energy plus the variable
    /// messages entering the factor, except at position `skip`.
    fn configuration_cost(
        &self,
        graph: &FactorGraph,
        factor: usize,
        config: usize,
        states: &[usize],
        skip: Option<usize>,
    ) -> f64 {
        let incoming = &self.var_to_factor[factor];
        states
            .iter()
            .enumerate()
            .filter(|&(pos, _)| Some(pos) != skip)
            .fold(graph.factor(factor).energies()[config], |acc, (pos, &s)| {
                acc + incoming[pos][s]
            })
    }

    /// Compute the message from `factor` to the variable at `target`.
    fn factor_message(
        &self,
        graph: &FactorGraph,
        factor: usize,
        target: usize,
        reduction: Reduction,
    ) -> Vec<f64> {
        let f = graph.factor(factor);
        let cards = f.cardinalities();
        let mut states = vec![0; cards.len()];

        match reduction {
            Reduction::Min => {
                let mut message = vec![f64::INFINITY; cards[target]];
                for config in 0..f.num_configurations() {
                    decode_configuration(cards, config, &mut states);
                    let cost = self.configuration_cost(graph, factor, config, &states, Some(target));
                    let slot = &mut message[states[target]];
                    if cost < *slot {
                        *slot = cost;
                    }
                }
                message
            }
            Reduction::SoftMin => {
                let mut acc = vec![SoftMinAccumulator::new(); cards[target]];
                for config in 0..f.num_configurations() {
                    decode_configuration(cards, config, &mut states);
                    let cost = self.configuration_cost(graph, factor, config, &states, Some(target));
                    acc[states[target]].push(cost);
                }
                acc.iter().map(SoftMinAccumulator::value).collect()
            }
        }
    }
}

/// Exact min-sum and sum-product inference on a tree or forest.
///
/// The message schedule is derived once from the graph structure: each
/// connected component is rooted at its lowest-indexed variable and
/// traversed breadth-first. Energies may change between calls (for example
/// after a [`FactorGraph::forward_map`]); the structure may not.
#[derive(Clone, Debug)]
pub struct TreeInference {
    num_variables: usize,
    num_factors: usize,
    /// Breadth-first order over all components
    order: Vec<Node>,
    /// Position of each factor's parent variable in its tuple
    factor_parent: Vec<usize>,
    /// Edge to each variable's parent factor; `None` for component roots
    variable_parent: Vec<Option<Incidence>>,
    roots: Vec<usize>,
}

impl TreeInference {
    /// Build the message schedule for `graph`.
    ///
    /// Fails with [`FactorGraphError::NotATree`] if the graph contains a cycle.
    pub fn new(graph: &FactorGraph) -> Result<Self> {
        if !graph.is_forest() {
            return Err(FactorGraphError::NotATree(format!(
                "graph with {} variables and {} factors contains a cycle",
                graph.num_variables(),
                graph.num_factors()
            )));
        }

        let n = graph.num_variables();
        let m = graph.num_factors();
        let mut order = Vec::with_capacity(n + m);
        let mut factor_parent = vec![0; m];
        let mut variable_parent = vec![None; n];
        let mut seen_var = vec![false; n];
        let mut seen_factor = vec![false; m];
        let mut roots = Vec::new();
        let mut queue = std::collections::VecDeque::new();

        for root in 0..n {
            if seen_var[root] {
                continue;
            }
            seen_var[root] = true;
            roots.push(root);
            queue.push_back(Node::Variable(root));

            while let Some(node) = queue.pop_front() {
                order.push(node);
                match node {
                    Node::Variable(v) => {
                        for inc in graph.incidence(v) {
                            if !seen_factor[inc.factor] {
                                seen_factor[inc.factor] = true;
                                factor_parent[inc.factor] = inc.position;
                                queue.push_back(Node::Factor(inc.factor));
                            }
                        }
                    }
                    Node::Factor(f) => {
                        for (position, &u) in graph.factor(f).variables().iter().enumerate() {
                            if !seen_var[u] {
                                seen_var[u] = true;
                                variable_parent[u] = Some(Incidence {
                                    factor: f,
                                    position,
                                });
                                queue.push_back(Node::Variable(u));
                            }
                        }
                    }
                }
            }
        }

        Ok(Self {
            num_variables: n,
            num_factors: m,
            order,
            factor_parent,
            variable_parent,
            roots,
        })
    }

    /// Number of connected components.
    pub fn num_components(&self) -> usize {
        self.roots.len()
    }

    /// Compute the exact minimum-energy joint state.
    ///
    /// Ties are broken locally during the top-down decode: each root takes
    /// its lowest minimizing state, then each factor, in breadth-first
    /// order, takes its first minimizing configuration consistent with its
    /// parent variable. When breadth-first order differs from variable
    /// index order this need not be the first global minimizer in
    /// row-major order.
    pub fn minimize_energy(&self, graph: &FactorGraph) -> Result<MapEstimate> {
        self.check_structure(graph)?;
        let messages = self.collect(graph, Reduction::Min);

        let mut states = vec![0; self.num_variables];
        let mut local = Vec::new();
        for &node in &self.order {
            match node {
                Node::Variable(v) => {
                    if self.variable_parent[v].is_none() {
                        states[v] = first_argmin(&messages.incoming(graph, v, None));
                    }
                }
                Node::Factor(f) => {
                    // Parent variable is decoded already; pick the best
                    // configuration consistent with it.
                    let factor = graph.factor(f);
                    let parent = self.factor_parent[f];
                    let parent_state = states[factor.variables()[parent]];
                    local.resize(factor.cardinalities().len(), 0);

                    let mut best = (f64::INFINITY, None);
                    for config in 0..factor.num_configurations() {
                        decode_configuration(factor.cardinalities(), config, &mut local);
                        if local[parent] != parent_state {
                            continue;
                        }
                        let cost = messages.configuration_cost(graph, f, config, &local, Some(parent));
                        if best.1.is_none() || cost < best.0 {
                            best = (cost, Some(config));
                        }
                    }
                    if let Some(config) = best.1 {
                        decode_configuration(factor.cardinalities(), config, &mut local);
                        for (pos, &var) in factor.variables().iter().enumerate() {
                            if pos != parent {
                                states[var] = local[pos];
                            }
                        }
                    }
                }
            }
        }

        let energy = graph.energy(&states);
        Ok(MapEstimate { states, energy })
    }

    /// Compute exact variable marginals, factor marginals and `ln Z`.
    pub fn marginals(&self, graph: &FactorGraph) -> Result<Marginals> {
        self.check_structure(graph)?;
        let mut messages = self.collect(graph, Reduction::SoftMin);
        self.distribute(graph, &mut messages);

        let log_partition = self
            .roots
            .iter()
            .map(|&root| -soft_min(&messages.incoming(graph, root, None)))
            .sum();

        let variables = (0..self.num_variables)
            .map(|v| Array1::from(boltzmann(&messages.incoming(graph, v, None))))
            .collect();

        let mut local = Vec::new();
        let factors = (0..self.num_factors)
            .map(|f| {
                let factor = graph.factor(f);
                local.resize(factor.cardinalities().len(), 0);
                let beliefs: Vec<f64> = (0..factor.num_configurations())
                    .map(|config| {
                        decode_configuration(factor.cardinalities(), config, &mut local);
                        messages.configuration_cost(graph, f, config, &local, None)
                    })
                    .collect();
                Array1::from(boltzmann(&beliefs))
            })
            .collect();

        Ok(Marginals {
            variables,
            factors,
            log_partition: Some(log_partition),
        })
    }

    /// Exact `ln Z = ln Σ_x exp(-E(x))`.
    pub fn log_partition(&self, graph: &FactorGraph) -> Result<f64> {
        self.check_structure(graph)?;
        let messages = self.collect(graph, Reduction::SoftMin);
        Ok(self
            .roots
            .iter()
            .map(|&root| -soft_min(&messages.incoming(graph, root, None)))
            .sum())
    }

    /// Leaves-to-root pass.
    fn collect(&self, graph: &FactorGraph, reduction: Reduction) -> MessageStore {
        let mut messages = MessageStore::new(graph);
        for &node in self.order.iter().rev() {
            match node {
                Node::Variable(v) => {
                    if let Some(parent) = self.variable_parent[v] {
                        let message = messages.incoming(graph, v, Some(parent));
                        messages.var_to_factor[parent.factor][parent.position] = message;
                    }
                }
                Node::Factor(f) => {
                    let target = self.factor_parent[f];
                    let message = messages.factor_message(graph, f, target, reduction);
                    messages.factor_to_var[f][target] = message;
                }
            }
        }
        messages
    }

    /// Root-to-leaves pass; run after [`collect`](Self::collect).
    fn distribute(&self, graph: &FactorGraph, messages: &mut MessageStore) {
        for &node in &self.order {
            match node {
                Node::Variable(v) => {
                    for inc in graph.incidence(v) {
                        if Some(*inc) == self.variable_parent[v] {
                            continue;
                        }
                        let message = messages.incoming(graph, v, Some(*inc));
                        messages.var_to_factor[inc.factor][inc.position] = message;
                    }
                }
                Node::Factor(f) => {
                    for pos in 0..graph.factor(f).variables().len() {
                        if pos == self.factor_parent[f] {
                            continue;
                        }
                        let message = messages.factor_message(graph, f, pos, Reduction::SoftMin);
                        messages.factor_to_var[f][pos] = message;
                    }
                }
            }
        }
    }

    fn check_structure(&self, graph: &FactorGraph) -> Result<()> {
        if graph.num_variables() != self.num_variables || graph.num_factors() != self.num_factors {
            return Err(FactorGraphError::InvalidParameter(format!(
                "tree schedule built for {} variables and {} factors, graph has {} and {}",
                self.num_variables,
                self.num_factors,
                graph.num_variables(),
                graph.num_factors()
            )));
        }
        Ok(())
    }
}

/// Index of the first minimum.
fn first_argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v < values[best] {
            best = i;
        }
    }
    best
}
