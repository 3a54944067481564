//! Outer inversion loop: evaluates misfit and gradient, drives the line
//! search trial by trial, and applies the restart-and-retry policy when a
//! line search fails.

use ndarray::Array1;

use crate::writer::{MemoryLog, RunLogger};
use crate::{OptimizeError, Optimizer, SearchState, norm2};

/// The expensive part of an inversion: misfit and gradient of a model.
pub trait Evaluator {
    /// Misfit only; used for line search trials.
    fn misfit(&mut self, model: &Array1<f64>) -> f64;

    /// Misfit and gradient; used once per outer iteration.
    fn misfit_and_gradient(&mut self, model: &Array1<f64>) -> (f64, Array1<f64>);
}

impl<F> Evaluator for F
where
    F: FnMut(&Array1<f64>) -> (f64, Array1<f64>),
{
    fn misfit(&mut self, model: &Array1<f64>) -> f64 {
        self(model).0
    }

    fn misfit_and_gradient(&mut self, model: &Array1<f64>) -> (f64, Array1<f64>) {
        self(model)
    }
}

/// Outcome of [`Inversion::run`].
#[derive(Debug, Clone)]
pub struct InversionSummary {
    pub final_model: Array1<f64>,
    pub final_misfit: f64,
    /// Outer iterations that completed a line search.
    pub iterations: usize,
    /// Total evaluator calls, gradient evaluations included.
    pub evaluations: usize,
    pub restart_count: usize,
    /// True when the loop stopped on the gradient tolerance rather than
    /// running through the last iteration.
    pub converged: bool,
}

/// Drives an [`Optimizer`] with an [`Evaluator`] over a range of iterations.
pub struct Inversion<E: Evaluator, L: RunLogger = MemoryLog> {
    optimizer: Optimizer<L>,
    evaluator: E,
    begin: usize,
    end: usize,
    tolerance: f64,
    evaluations: usize,
}

impl<E: Evaluator, L: RunLogger> Inversion<E, L> {
    /// Default gradient-norm tolerance below which the loop stops early.
    pub const DEFAULT_TOLERANCE: f64 = 1e-10;

    pub fn new(optimizer: Optimizer<L>, evaluator: E) -> Self {
        Self {
            optimizer,
            evaluator,
            begin: 1,
            end: 1,
            tolerance: Self::DEFAULT_TOLERANCE,
            evaluations: 0,
        }
    }

    /// Runs iterations `begin..=end` (default: `1..=1`).
    pub fn with_iterations(mut self, begin: usize, end: usize) -> Self {
        self.begin = begin;
        self.end = end;
        self
    }

    /// Stops once `||g||₂` at the current model is at or below `tolerance`.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn optimizer(&self) -> &Optimizer<L> {
        &self.optimizer
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn into_optimizer(self) -> Optimizer<L> {
        self.optimizer
    }

    pub fn run(&mut self) -> Result<InversionSummary, OptimizeError> {
        if self.begin == 0 || self.begin > self.end {
            return Err(OptimizeError::InvalidParameter {
                name: "BEGIN",
                reason: "iterations must form a non-empty range starting at 1 or later",
            });
        }
        let mut iterations = 0;
        let mut converged = false;
        for iteration in self.begin..=self.end {
            self.optimizer.set_iteration(iteration)?;
            let (misfit, gradient) = self
                .evaluator
                .misfit_and_gradient(self.optimizer.model()?);
            self.evaluations += 1;
            self.optimizer.set_objective(misfit)?;
            let gradient_norm = norm2(&gradient);
            self.optimizer.set_gradient(gradient)?;
            log::info!(
                "[Optimize] Iteration {iteration}: misfit {misfit:.6e}, |g| {gradient_norm:.3e}."
            );
            if gradient_norm <= self.tolerance {
                log::info!("[Optimize] Gradient norm below tolerance; stopping.");
                converged = true;
                break;
            }

            self.optimizer.compute_direction()?;
            self.line_search()?;
            self.optimizer.finalize_search()?;
            iterations += 1;
        }

        Ok(InversionSummary {
            final_model: self.optimizer.model()?.clone(),
            final_misfit: self.optimizer.objective()?,
            iterations,
            evaluations: self.evaluations,
            restart_count: self.optimizer.restart_count(),
            converged,
        })
    }

    /// Runs one line search to completion. A failed search is retried once
    /// from steepest descent unless the direction already was steepest
    /// descent.
    fn line_search(&mut self) -> Result<(), OptimizeError> {
        let mut trial = self.optimizer.initialize_search()?.clone();
        loop {
            let misfit = self.evaluator.misfit(&trial);
            self.evaluations += 1;
            let status = self.optimizer.search_status(misfit)?;
            let failure = match status.state {
                SearchState::Converged => return Ok(()),
                SearchState::Searching => match self.optimizer.compute_step() {
                    Ok(next) => {
                        trial = next.clone();
                        continue;
                    }
                    Err(e) if !e.is_fatal() => e,
                    Err(e) => return Err(e),
                },
                SearchState::Failed | SearchState::Idle => OptimizeError::SearchExhausted {
                    step_count: self.optimizer.step_count(),
                },
            };

            if !self.optimizer.retry_status()? {
                log::warn!("[Optimize] Line search failed along steepest descent; aborting.");
                return Err(failure);
            }
            log::info!("[Optimize] Line search failed ({failure}); restarting from steepest descent.");
            self.optimizer.restart()?;
            trial = self.optimizer.initialize_search()?.clone();
        }
    }
}
