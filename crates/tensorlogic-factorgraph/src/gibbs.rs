//! Gibbs sampling for approximate inference on arbitrary factor graphs.
//!
//! A single Markov chain resamples one variable at a time from its
//! conditional distribution given the current states of all other
//! variables. The chain is sequential by nature; independent chains (one per
//! training instance) may run in parallel.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{FactorGraphError, Result};
use crate::graph::FactorGraph;
use crate::inference::{MapEstimate, Marginals};
use crate::numeric::boltzmann;

/// Order in which a sweep visits the variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanOrder {
    /// Variables `0..n` in index order.
    #[default]
    Sequential,
    /// `n` uniformly random picks with replacement.
    Random,
}

/// Configuration for a Gibbs chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GibbsConfig {
    /// Sweeps discarded before any statistic is recorded
    pub burn_in_sweeps: usize,
    /// Sweeps run after burn-in
    pub sampling_sweeps: usize,
    /// Record one sample every `spacing` sampling sweeps
    pub spacing: usize,
    /// Seed of the chain's random number generator
    pub seed: u64,
    /// Variable visiting order within a sweep
    pub scan_order: ScanOrder,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self {
            burn_in_sweeps: 100,
            sampling_sweeps: 1000,
            spacing: 1,
            seed: 0,
            scan_order: ScanOrder::Sequential,
        }
    }
}

impl GibbsConfig {
    /// Set the number of burn-in sweeps.
    pub fn with_burn_in_sweeps(mut self, sweeps: usize) -> Self {
        self.burn_in_sweeps = sweeps;
        self
    }

    /// Set the number of sampling sweeps.
    pub fn with_sampling_sweeps(mut self, sweeps: usize) -> Self {
        self.sampling_sweeps = sweeps;
        self
    }

    /// Set the sample spacing.
    pub fn with_spacing(mut self, spacing: usize) -> Self {
        self.spacing = spacing;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the scan order.
    pub fn with_scan_order(mut self, scan_order: ScanOrder) -> Self {
        self.scan_order = scan_order;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.spacing == 0 {
            return Err(FactorGraphError::InvalidParameter(
                "gibbs spacing must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of samples a run records.
    pub fn num_samples(&self) -> usize {
        if self.spacing == 0 {
            0
        } else {
            self.sampling_sweeps / self.spacing
        }
    }
}

/// Mutable state of one chain.
struct ChainState {
    rng: StdRng,
    states: Vec<usize>,
    /// Running energy of `states`, updated incrementally
    energy: f64,
    conditional: Vec<f64>,
}

impl ChainState {
    fn new(graph: &FactorGraph, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let states: Vec<usize> = graph
            .cardinalities()
            .iter()
            .map(|&card| rng.random_range(0..card))
            .collect();
        Self {
            energy: graph.energy(&states),
            rng,
            states,
            conditional: Vec::new(),
        }
    }

    /// Resample one variable from its conditional distribution.
    fn update(&mut self, graph: &FactorGraph, var: usize) {
        self.conditional.clear();
        self.conditional.resize(graph.cardinality(var), 0.0);
        graph.add_conditional_energies(var, &self.states, &mut self.conditional);

        let probs = boltzmann(&self.conditional);
        let next = sample_categorical(&probs, &mut self.rng);
        let prev = self.states[var];
        self.energy += self.conditional[next] - self.conditional[prev];
        self.states[var] = next;
    }

    fn sweep<F>(&mut self, graph: &FactorGraph, order: ScanOrder, mut after_update: F)
    where
        F: FnMut(&[usize], f64),
    {
        let n = graph.num_variables();
        for i in 0..n {
            let var = match order {
                ScanOrder::Sequential => i,
                ScanOrder::Random => self.rng.random_range(0..n),
            };
            self.update(graph, var);
            after_update(&self.states, self.energy);
        }
    }
}

/// Draw an index from a normalized distribution.
fn sample_categorical(probs: &[f64], rng: &mut StdRng) -> usize {
    let u: f64 = rng.random();
    let mut cumsum = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumsum += p;
        if u < cumsum {
            return i;
        }
    }
    probs.len().saturating_sub(1)
}

/// Result of one chain run.
struct ChainRun {
    best_states: Vec<usize>,
    /// Best running energy after each sampling sweep
    trace: Vec<f64>,
}

/// Gibbs sampling inference.
///
/// Every call reseeds the chain from [`GibbsConfig::seed`], so repeated calls
/// on the same graph give identical results.
#[derive(Debug, Clone, Default)]
pub struct GibbsInference {
    config: GibbsConfig,
}

impl GibbsInference {
    /// Create a sampler with the given configuration.
    pub fn new(config: GibbsConfig) -> Self {
        Self { config }
    }

    /// Chain configuration.
    pub fn config(&self) -> &GibbsConfig {
        &self.config
    }

    /// Lowest-energy state visited after burn-in.
    ///
    /// Approximate: there is no guarantee the global minimum was visited.
    pub fn minimize_energy(&self, graph: &FactorGraph) -> Result<MapEstimate> {
        let run = self.run(graph, |_| {})?;
        let energy = graph.energy(&run.best_states);
        Ok(MapEstimate {
            states: run.best_states,
            energy,
        })
    }

    /// Best energy seen so far, recorded after each sampling sweep.
    ///
    /// The sequence is non-increasing.
    pub fn best_energy_trace(&self, graph: &FactorGraph) -> Result<Vec<f64>> {
        self.run(graph, |_| {}).map(|run| run.trace)
    }

    /// Empirical variable and factor marginals over the recorded samples.
    pub fn marginals(&self, graph: &FactorGraph) -> Result<Marginals> {
        if self.config.num_samples() == 0 {
            return Err(FactorGraphError::InvalidParameter(format!(
                "gibbs chain records no samples ({} sampling sweeps, spacing {})",
                self.config.sampling_sweeps, self.config.spacing
            )));
        }

        let mut variables: Vec<Array1<f64>> = graph
            .cardinalities()
            .iter()
            .map(|&c| Array1::zeros(c))
            .collect();
        let mut factors: Vec<Array1<f64>> = graph
            .factors()
            .iter()
            .map(|f| Array1::zeros(f.num_configurations()))
            .collect();
        let mut count = 0usize;

        self.run(graph, |states| {
            count += 1;
            for (counts, &s) in variables.iter_mut().zip(states) {
                counts[s] += 1.0;
            }
            for (counts, factor) in factors.iter_mut().zip(graph.factors()) {
                counts[factor.configuration_of(states)] += 1.0;
            }
        })?;

        let scale = 1.0 / count as f64;
        for table in variables.iter_mut().chain(factors.iter_mut()) {
            table.mapv_inplace(|c| c * scale);
        }
        Ok(Marginals {
            variables,
            factors,
            log_partition: None,
        })
    }

    /// Run the chain, passing every recorded sample to `on_sample`.
    fn run<F>(&self, graph: &FactorGraph, mut on_sample: F) -> Result<ChainRun>
    where
        F: FnMut(&[usize]),
    {
        self.config.validate()?;
        let order = self.config.scan_order;
        let mut chain = ChainState::new(graph, self.config.seed);

        for _ in 0..self.config.burn_in_sweeps {
            chain.sweep(graph, order, |_, _| {});
        }

        let mut best_states = chain.states.clone();
        let mut best_energy = chain.energy;
        let mut trace = Vec::with_capacity(self.config.sampling_sweeps);

        for sweep in 0..self.config.sampling_sweeps {
            chain.sweep(graph, order, |states, energy| {
                if energy < best_energy {
                    best_energy = energy;
                    best_states.copy_from_slice(states);
                }
            });
            trace.push(best_energy);
            if (sweep + 1) % self.config.spacing == 0 {
                on_sample(&chain.states);
            }
        }

        log::trace!(
            "gibbs: {} burn-in + {} sampling sweeps over {} variables, best energy {:.6}",
            self.config.burn_in_sweeps,
            self.config.sampling_sweeps,
            graph.num_variables(),
            best_energy
        );
        Ok(ChainRun { best_states, trace })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::Factor;
    use crate::factor_type::FactorType;
    use crate::model::FactorGraphModel;
    use crate::tree_inference::TreeInference;
    use approx::assert_abs_diff_eq;

    fn chain_graph(length: usize) -> FactorGraph {
        let mut model = FactorGraphModel::new();
        let unary = model
            .add_factor_type(FactorType::linear("unary", vec![3], vec![0.4, -0.3, 0.1]).unwrap())
            .unwrap();
        let pair = model
            .add_factor_type(
                FactorType::linear(
                    "pair",
                    vec![3, 3],
                    vec![-1.0, 0.5, 0.5, 0.5, -1.0, 0.5, 0.5, 0.5, -1.0],
                )
                .unwrap(),
            )
            .unwrap();
        let mut graph = FactorGraph::new(vec![3; length]).unwrap();
        for v in 0..length {
            graph
                .add_factor(Factor::new(&model, unary, vec![v], vec![]).unwrap())
                .unwrap();
            if v + 1 < length {
                graph
                    .add_factor(Factor::new(&model, pair, vec![v, v + 1], vec![]).unwrap())
                    .unwrap();
            }
        }
        graph.forward_map(&model).unwrap();
        graph
    }

    #[test]
    fn test_deterministic_given_seed() {
        let graph = chain_graph(5);
        let gibbs = GibbsInference::new(GibbsConfig::default().with_seed(42));
        let a = gibbs.minimize_energy(&graph).unwrap();
        let b = gibbs.minimize_energy(&graph).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_best_energy_trace_non_increasing() {
        let graph = chain_graph(6);
        let gibbs = GibbsInference::new(
            GibbsConfig::default()
                .with_burn_in_sweeps(0)
                .with_sampling_sweeps(200)
                .with_seed(7),
        );
        let trace = gibbs.best_energy_trace(&graph).unwrap();
        assert_eq!(trace.len(), 200);
        assert!(trace.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_finds_tree_optimum() {
        let graph = chain_graph(4);
        let exact = TreeInference::new(&graph)
            .unwrap()
            .minimize_energy(&graph)
            .unwrap();
        let sampled = GibbsInference::new(GibbsConfig::default().with_seed(3))
            .minimize_energy(&graph)
            .unwrap();
        assert_abs_diff_eq!(sampled.energy, exact.energy, epsilon = 1e-9);
    }

    #[test]
    fn test_marginals_approximate_exact() {
        let graph = chain_graph(3);
        let exact = TreeInference::new(&graph).unwrap().marginals(&graph).unwrap();
        let sampled = GibbsInference::new(
            GibbsConfig::default()
                .with_sampling_sweeps(20_000)
                .with_scan_order(ScanOrder::Random)
                .with_seed(11),
        )
        .marginals(&graph)
        .unwrap();

        assert!(sampled.log_partition.is_none());
        for (got, want) in sampled.variables.iter().zip(&exact.variables) {
            assert_abs_diff_eq!(got.sum(), 1.0, epsilon = 1e-9);
            for (g, w) in got.iter().zip(want.iter()) {
                assert_abs_diff_eq!(*g, *w, epsilon = 0.05);
            }
        }
    }

    #[test]
    fn test_spacing_validation() {
        let graph = chain_graph(2);
        let zero = GibbsInference::new(GibbsConfig::default().with_spacing(0));
        assert!(zero.minimize_energy(&graph).is_err());

        let no_samples = GibbsInference::new(
            GibbsConfig::default()
                .with_sampling_sweeps(3)
                .with_spacing(5),
        );
        assert!(no_samples.marginals(&graph).is_err());
        assert!(no_samples.minimize_energy(&graph).is_ok());
    }
}
