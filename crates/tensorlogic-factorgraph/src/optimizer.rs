//! Gradient-based minimizers for the training objective.
//!
//! Optimizers only see a flat parameter vector and a callback that evaluates
//! the objective and its gradient there; everything model-specific lives in
//! the trainers.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{FactorGraphError, Result};
use crate::parameter_estimation::{TrainingConfig, TrainingContext};

/// Objective value and gradient at one parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Objective value.
    pub objective: f64,
    /// Gradient of the objective.
    pub gradient: Array1<f64>,
}

/// Callback evaluating the objective at a parameter vector.
pub type ObjectiveFn<'a> = dyn FnMut(ArrayView1<'_, f64>) -> Result<Evaluation> + 'a;

/// Optimizer selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Fixed-step steepest descent. Never reads the objective value, so it
    /// also works with sampled (approximate) gradients.
    GradientDescent {
        /// Step size.
        learning_rate: f64,
    },
    /// Limited-memory BFGS with a backtracking line search.
    Lbfgs {
        /// Number of correction pairs kept.
        memory: usize,
    },
}

impl Default for OptimizerKind {
    fn default() -> Self {
        Self::Lbfgs { memory: 10 }
    }
}

impl OptimizerKind {
    /// Whether the optimizer compares objective values and therefore needs
    /// them to be exact.
    pub fn requires_exact_objective(&self) -> bool {
        matches!(self, Self::Lbfgs { .. })
    }

    /// Check the hyperparameters.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::GradientDescent { learning_rate } => {
                if !(learning_rate > 0.0 && learning_rate.is_finite()) {
                    return Err(FactorGraphError::InvalidParameter(format!(
                        "learning rate must be positive, got {}",
                        learning_rate
                    )));
                }
            }
            Self::Lbfgs { memory } => {
                if memory == 0 {
                    return Err(FactorGraphError::InvalidParameter(
                        "L-BFGS memory must be at least 1".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn build(&self, line_search: &LineSearchConfig) -> Box<dyn Optimizer> {
        match *self {
            Self::GradientDescent { learning_rate } => Box::new(GradientDescent { learning_rate }),
            Self::Lbfgs { memory } => Box::new(Lbfgs::new(memory, line_search.clone())),
        }
    }
}

/// Backtracking (Armijo) line search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSearchConfig {
    /// First step length tried along a quasi-Newton direction
    pub initial_step: f64,
    /// Factor applied to the step after each rejected trial
    pub shrink: f64,
    /// Armijo constant c in `f(x + αd) ≤ f(x) + c·α·∇f·d`
    pub sufficient_decrease: f64,
    /// Trials before the search gives up
    pub max_steps: usize,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            initial_step: 1.0,
            shrink: 0.5,
            sufficient_decrease: 1e-4,
            max_steps: 40,
        }
    }
}

impl LineSearchConfig {
    /// Set the initial step length.
    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.initial_step = step;
        self
    }

    /// Set the shrink factor.
    pub fn with_shrink(mut self, shrink: f64) -> Self {
        self.shrink = shrink;
        self
    }

    /// Set the maximum number of trials.
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    /// Check the settings.
    pub fn validate(&self) -> Result<()> {
        let ok = self.initial_step > 0.0
            && self.shrink > 0.0
            && self.shrink < 1.0
            && self.sufficient_decrease > 0.0
            && self.sufficient_decrease < 1.0
            && self.max_steps > 0;
        if !ok {
            return Err(FactorGraphError::InvalidParameter(format!(
                "invalid line search settings: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Result of one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The context moved to a new point.
    Accepted,
    /// No acceptable point was found; the context is unchanged.
    Stalled,
}

/// One iteration of an iterative minimizer.
pub trait Optimizer: Send {
    /// Move `context` to a better point, evaluating the objective as needed.
    fn step(
        &mut self,
        context: &mut TrainingContext,
        evaluate: &mut ObjectiveFn<'_>,
    ) -> Result<StepOutcome>;

    /// Optimizer name for logs.
    fn name(&self) -> &'static str;
}

/// Fixed-step gradient descent.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f64,
}

impl Optimizer for GradientDescent {
    fn step(
        &mut self,
        context: &mut TrainingContext,
        evaluate: &mut ObjectiveFn<'_>,
    ) -> Result<StepOutcome> {
        let mut trial = context.parameters.clone();
        trial.scaled_add(-self.learning_rate, &context.gradient);
        let evaluation = evaluate(trial.view())?;
        context.accept(trial, evaluation);
        Ok(StepOutcome::Accepted)
    }

    fn name(&self) -> &'static str {
        "gradient-descent"
    }
}

/// Limited-memory BFGS.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    memory: usize,
    line_search: LineSearchConfig,
    /// Correction pairs (s, y), oldest first
    history: VecDeque<(Array1<f64>, Array1<f64>)>,
}

impl Lbfgs {
    fn new(memory: usize, line_search: LineSearchConfig) -> Self {
        Self {
            memory,
            line_search,
            history: VecDeque::with_capacity(memory),
        }
    }

    /// Two-loop recursion: approximate `-H⁻¹ g`.
    fn direction(&self, gradient: &Array1<f64>) -> Array1<f64> {
        let mut q = gradient.clone();
        let mut alphas = Vec::with_capacity(self.history.len());
        for (s, y) in self.history.iter().rev() {
            let rho = 1.0 / y.dot(s);
            let alpha = rho * s.dot(&q);
            q.scaled_add(-alpha, y);
            alphas.push((rho, alpha));
        }
        if let Some((s, y)) = self.history.back() {
            q *= s.dot(y) / y.dot(y);
        }
        for ((s, y), &(rho, alpha)) in self.history.iter().zip(alphas.iter().rev()) {
            let beta = rho * y.dot(&q);
            q.scaled_add(alpha - beta, s);
        }
        q.mapv_inplace(|v| -v);
        q
    }
}

impl Optimizer for Lbfgs {
    fn step(
        &mut self,
        context: &mut TrainingContext,
        evaluate: &mut ObjectiveFn<'_>,
    ) -> Result<StepOutcome> {
        let mut direction = self.direction(&context.gradient);
        let mut slope = direction.dot(&context.gradient);
        if !(slope < 0.0) {
            // Curvature information went stale; restart from steepest descent.
            self.history.clear();
            direction = context.gradient.mapv(|g| -g);
            slope = direction.dot(&context.gradient);
        }

        let mut step = if self.history.is_empty() {
            self.line_search.initial_step / context.gradient_norm().max(1.0)
        } else {
            self.line_search.initial_step
        };

        for _ in 0..self.line_search.max_steps {
            let mut trial = context.parameters.clone();
            trial.scaled_add(step, &direction);
            let evaluation = evaluate(trial.view())?;

            let bound = context.objective + self.line_search.sufficient_decrease * step * slope;
            if evaluation.objective.is_finite() && evaluation.objective <= bound {
                let s = &trial - &context.parameters;
                let y = &evaluation.gradient - &context.gradient;
                if s.dot(&y) > 1e-10 {
                    if self.history.len() == self.memory {
                        self.history.pop_front();
                    }
                    self.history.push_back((s, y));
                }
                context.accept(trial, evaluation);
                return Ok(StepOutcome::Accepted);
            }
            step *= self.line_search.shrink;
        }

        log::warn!(
            "line search found no sufficient decrease after {} trials at iteration {}",
            self.line_search.max_steps,
            context.iteration
        );
        Ok(StepOutcome::Stalled)
    }

    fn name(&self) -> &'static str {
        "lbfgs"
    }
}

/// Outcome of [`minimize`].
#[derive(Debug, Clone)]
pub(crate) struct Minimization {
    pub context: TrainingContext,
    pub converged: bool,
}

/// Iterate the configured optimizer until the gradient norm drops to the
/// tolerance, the iteration cap is reached, or the line search stalls.
///
/// Without convergence the returned context is the lowest-objective point
/// evaluated at an accepted step (or the start), with the iteration count of
/// the last step. For sampled objectives "lowest" compares noisy estimates,
/// so the point kept is the best one observed, not a certified minimum.
pub(crate) fn minimize(
    initial: Array1<f64>,
    config: &TrainingConfig,
    evaluate: &mut ObjectiveFn<'_>,
) -> Result<Minimization> {
    let first = evaluate(initial.view())?;
    let mut context = TrainingContext::new(initial, first);
    let mut best = context.clone();
    let mut optimizer = config.optimizer.build(&config.line_search);

    loop {
        let norm = context.gradient_norm();
        log::debug!(
            "{} iteration {}: objective={:.6} gradient_norm={:.3e}",
            optimizer.name(),
            context.iteration,
            context.objective,
            norm
        );
        if norm <= config.tolerance {
            return Ok(Minimization {
                context,
                converged: true,
            });
        }
        if context.iteration >= config.max_iterations {
            break;
        }
        if optimizer.step(&mut context, evaluate)? == StepOutcome::Stalled {
            break;
        }
        if context.objective < best.objective {
            best = context.clone();
        }
    }

    if best.objective < context.objective {
        log::warn!(
            "{} stopped at objective {:.6}; restoring best point with objective {:.6}",
            optimizer.name(),
            context.objective,
            best.objective
        );
        best.iteration = context.iteration;
        context = best;
    }
    Ok(Minimization {
        context,
        converged: false,
    })
}
