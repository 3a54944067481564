//! Line-search and search-direction driver for iterative model inversion.
//!
//! The crate computes search directions (steepest descent, nonlinear conjugate
//! gradient, L-BFGS) and runs a line search along them, one trial at a time.
//! Objective evaluations happen outside: the [`Optimizer`] proposes a trial
//! model, the caller evaluates it and reports the misfit back. This keeps
//! expensive forward solvers (minutes to hours per evaluation) in charge of
//! their own scheduling.
//!
//! # Features
//! - Three step-length controls: a fixed linear schedule, bracketing with a
//!   parabolic fit once the minimum is enclosed, and safeguarded quadratic
//!   backtracking.
//! - Backtracking falls back to bracketing on the first iteration and after
//!   every direction restart, where the direction carries no curvature
//!   information. The fixed schedule is never replaced.
//! - Restart bookkeeping for NLCG and L-BFGS, with an optional diagonal
//!   preconditioner.
//! - Checkpointing of every tracked quantity through a [`VectorStore`].
//! - Summary and trial records through a [`RunLogger`].
//!
//! ## Defaults (key settings)
//! - `STEPMAX = 10`, `STEPINIT = 0.05`, `STEPFACTOR = 0.5`, `LBFGSMEM = 5`.
//! - Line search: Backtrack for L-BFGS, Bracket otherwise.
//!
//! # Example
//!
//! Drive a steepest-descent inversion of a quadratic misfit with the
//! bundled outer loop.
//!
//! ```
//! use inversion_optimize::{Inversion, OptimizeConfig, Optimizer, Scheme};
//! use ndarray::{array, Array1};
//!
//! let quadratic = |m: &Array1<f64>| -> (f64, Array1<f64>) { (m.dot(m), 2.0 * m) };
//!
//! let optimizer = Optimizer::new(OptimizeConfig::new(Scheme::SteepestDescent), array![3.0, -4.0])
//!     .expect("valid configuration");
//! let mut inversion = Inversion::new(optimizer, quadratic).with_iterations(1, 5);
//! let summary = inversion.run().expect("inversion failed");
//!
//! assert!(summary.final_misfit < 1e-12);
//! ```

mod config;
mod direction;
mod inversion;
mod state;
pub mod step;
mod store;
mod writer;

pub use config::{LineSearch, OptimizeConfig, Parameters, ResolvedParameters, Scheme};
pub use direction::{Direction, DirectionAlgorithm, Lbfgs, NonlinearCg, SteepestDescent};
pub use inversion::{Evaluator, Inversion, InversionSummary};
pub use state::{Iterate, LineSearchHistory, Tracked, names};
pub use store::{DirectoryStore, MemoryStore, VectorStore};
pub use writer::{FileLog, MemoryLog, RunLogger, STEP_TABLE};

use ndarray::Array1;

use state::require;

/// Errors raised by the optimizer, its stores and the outer driver.
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("Required value `{name}` has not been supplied.")]
    Configuration { name: String },
    #[error("Parameter {name} is invalid: {reason}.")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    #[error(
        "The misfit at step length {step_length} is NaN. The evaluator returned an invalid objective."
    )]
    InvalidObjective { step_length: f64 },
    #[error("Step-length fit is degenerate ({reason}: {value}). The line search cannot continue.")]
    DegenerateFit { reason: &'static str, value: f64 },
    #[error(
        "The line search failed after {step_count} trials and the direction is already steepest descent."
    )]
    SearchExhausted { step_count: usize },
    #[error("The search direction is not a descent direction (slope {slope}).")]
    NonDescentDirection { slope: f64 },
    #[error("`{name}` has length {found}, expected {expected}.")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("`{operation}` is not allowed while the line search is {state:?}.")]
    InvalidState {
        operation: &'static str,
        state: SearchState,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to parse parameters: {0}")]
    Parameters(#[from] serde_json::Error),
}

impl OptimizeError {
    /// False only for failures a restart may recover from.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OptimizeError::DegenerateFit { .. } | OptimizeError::SearchExhausted { .. }
        )
    }
}

/// Angle between two vectors in radians; NaN when either is zero.
pub fn angle(x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let cos = x.dot(y) / (x.dot(x) * y.dot(y)).sqrt();
    cos.clamp(-1.0, 1.0).acos()
}

pub fn max_abs(x: &Array1<f64>) -> f64 {
    x.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
}

pub fn norm1(x: &Array1<f64>) -> f64 {
    x.iter().map(|v| v.abs()).sum()
}

pub fn norm2(x: &Array1<f64>) -> f64 {
    x.dot(x).sqrt()
}

/// Lifecycle of one line search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Searching,
    Converged,
    Failed,
}

impl SearchState {
    /// Numeric status: 0 continue, 1 converged, -1 failed.
    pub fn flag(self) -> i8 {
        match self {
            SearchState::Idle | SearchState::Searching => 0,
            SearchState::Converged => 1,
            SearchState::Failed => -1,
        }
    }
}

/// Result of [`Optimizer::search_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchStatus {
    pub state: SearchState,
    /// The trial just reported is strictly better than every earlier one.
    pub is_best: bool,
}

/// Result of [`Optimizer::finalize_search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSummary {
    pub step_length: f64,
    pub misfit: f64,
    pub step_count: usize,
}

#[derive(Debug, Clone)]
struct ActiveSearch {
    history: LineSearchHistory,
    step_count: usize,
    p_ratio: f64,
    is_best: bool,
    is_bracketed: bool,
}

/// Angle (radians) below which a direction counts as steepest descent.
const RETRY_ANGLE: f64 = 1e-3;

/// The direction dispatcher and line search controller.
///
/// One outer iteration is: [`set_objective`](Self::set_objective) and
/// [`set_gradient`](Self::set_gradient) at the current model,
/// [`compute_direction`](Self::compute_direction),
/// [`initialize_search`](Self::initialize_search), then alternate
/// [`search_status`](Self::search_status) and
/// [`compute_step`](Self::compute_step) until the status is no longer
/// `Searching`, and finally [`finalize_search`](Self::finalize_search).
pub struct Optimizer<L: RunLogger = MemoryLog> {
    config: OptimizeConfig,
    direction: Box<dyn DirectionAlgorithm>,
    logger: L,
    iterate: Iterate,
    dimension: usize,
    iteration: usize,
    restart_flag: bool,
    restart_count: usize,
    state: SearchState,
    search: Option<ActiveSearch>,
}

impl Optimizer<MemoryLog> {
    /// Validates `config` and starts at `model` on iteration 1.
    pub fn new(config: OptimizeConfig, model: Array1<f64>) -> Result<Self, OptimizeError> {
        config.validate()?;
        if model.is_empty() {
            return Err(OptimizeError::InvalidParameter {
                name: names::M_NEW,
                reason: "the model must have at least one entry",
            });
        }
        if let Some(diagonal) = config.preconditioner()
            && diagonal.len() != model.len()
        {
            return Err(OptimizeError::DimensionMismatch {
                name: "PRECOND",
                expected: model.len(),
                found: diagonal.len(),
            });
        }
        let direction = direction::for_config(&config);
        log::info!(
            "[Optimize] {} with {:?} line search on {} parameters.",
            direction.name(),
            config.line_search(),
            model.len()
        );
        let mut iterate = Iterate::default();
        let dimension = model.len();
        iterate.model.set_current(model);
        Ok(Self {
            config,
            direction,
            logger: MemoryLog::new(),
            iterate,
            dimension,
            iteration: 1,
            restart_flag: false,
            restart_count: 0,
            state: SearchState::Idle,
            search: None,
        })
    }

    /// Restores an optimizer checkpointed with [`Optimizer::save`].
    ///
    /// Only `m_new` is required. Direction-algorithm history is not part of
    /// the checkpoint, so NLCG and L-BFGS start over from steepest descent.
    pub fn load<S: VectorStore + ?Sized>(
        config: OptimizeConfig,
        store: &S,
    ) -> Result<Self, OptimizeError> {
        let mut optimizer = Self::new(config, store.read_vector(names::M_NEW)?)?;
        let read_vector = |name: &'static str| -> Result<Option<Array1<f64>>, OptimizeError> {
            if !store.contains(name) {
                return Ok(None);
            }
            let v = store.read_vector(name)?;
            if v.len() != optimizer.dimension {
                return Err(OptimizeError::DimensionMismatch {
                    name,
                    expected: optimizer.dimension,
                    found: v.len(),
                });
            }
            Ok(Some(v))
        };
        let m_old = read_vector(names::M_OLD)?;
        let m_try = read_vector(names::M_TRY)?;
        let g_new = read_vector(names::G_NEW)?;
        let g_old = read_vector(names::G_OLD)?;
        let p_new = read_vector(names::P_NEW)?;
        let p_old = read_vector(names::P_OLD)?;

        let read_scalar = |name: &'static str| -> Result<Option<f64>, OptimizeError> {
            if store.contains(name) {
                store.read_scalar(name).map(Some)
            } else {
                Ok(None)
            }
        };
        let iterate = &mut optimizer.iterate;
        restore(&mut iterate.model, None, m_old, m_try);
        restore(&mut iterate.gradient, g_new, g_old, None);
        restore(&mut iterate.direction, p_new, p_old, None);
        restore(
            &mut iterate.objective,
            read_scalar(names::F_NEW)?,
            read_scalar(names::F_OLD)?,
            read_scalar(names::F_TRY)?,
        );
        restore(
            &mut iterate.slope,
            read_scalar(names::S_NEW)?,
            read_scalar(names::S_OLD)?,
            None,
        );
        iterate.alpha = read_scalar(names::ALPHA)?;

        if let Some(iteration) = read_scalar(names::ITERATION)? {
            optimizer.set_iteration(iteration as usize)?;
        }
        optimizer.restart_count = read_scalar(names::RESTART_COUNT)?.unwrap_or(0.0) as usize;
        optimizer.restart_flag = read_scalar(names::RESTART)?.is_some_and(|v| v != 0.0);
        log::info!(
            "[Optimize] Restored checkpoint at iteration {} ({} restarts so far).",
            optimizer.iteration,
            optimizer.restart_count
        );
        Ok(optimizer)
    }
}

fn restore<T>(slot: &mut Tracked<T>, current: Option<T>, previous: Option<T>, trial: Option<T>) {
    if let Some(v) = current {
        slot.set_current(v);
    }
    if let Some(v) = previous {
        slot.set_previous(v);
    }
    if let Some(v) = trial {
        slot.set_trial(v);
    }
}

impl<L: RunLogger> Optimizer<L> {
    /// Replaces the run logger (default: [`MemoryLog`]).
    pub fn with_logger<M: RunLogger>(self, logger: M) -> Optimizer<M> {
        Optimizer {
            config: self.config,
            direction: self.direction,
            logger,
            iterate: self.iterate,
            dimension: self.dimension,
            iteration: self.iteration,
            restart_flag: self.restart_flag,
            restart_count: self.restart_count,
            state: self.state,
            search: self.search,
        }
    }

    /// Replaces the direction algorithm chosen from the configured scheme.
    pub fn with_direction_algorithm(mut self, algorithm: Box<dyn DirectionAlgorithm>) -> Self {
        self.direction = algorithm;
        self
    }

    // --- Inputs ---

    /// Supplies `g_new`, the gradient at the current model.
    pub fn set_gradient(&mut self, gradient: Array1<f64>) -> Result<(), OptimizeError> {
        self.check_dimension(names::G_NEW, &gradient)?;
        self.iterate.gradient.set_current(gradient);
        Ok(())
    }

    /// Supplies `f_new`, the misfit at the current model.
    pub fn set_objective(&mut self, objective: f64) -> Result<(), OptimizeError> {
        if objective.is_nan() {
            return Err(OptimizeError::InvalidObjective { step_length: 0.0 });
        }
        self.iterate.objective.set_current(objective);
        Ok(())
    }

    /// Sets the outer iteration number (1-based).
    pub fn set_iteration(&mut self, iteration: usize) -> Result<(), OptimizeError> {
        if iteration == 0 {
            return Err(OptimizeError::InvalidParameter {
                name: names::ITERATION,
                reason: "iterations are numbered from 1",
            });
        }
        self.iteration = iteration;
        Ok(())
    }

    // --- Accessors ---

    pub fn config(&self) -> &OptimizeConfig {
        &self.config
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn logger_mut(&mut self) -> &mut L {
        &mut self.logger
    }

    pub fn iterate(&self) -> &Iterate {
        &self.iterate
    }

    /// `m_new`.
    pub fn model(&self) -> Result<&Array1<f64>, OptimizeError> {
        require(self.iterate.model.current(), names::M_NEW)
    }

    /// `m_try`.
    pub fn trial_model(&self) -> Result<&Array1<f64>, OptimizeError> {
        require(self.iterate.model.trial(), names::M_TRY)
    }

    /// `f_new`.
    pub fn objective(&self) -> Result<f64, OptimizeError> {
        require(self.iterate.objective.current(), names::F_NEW).copied()
    }

    /// `alpha`: the pending trial step, or the step accepted by the last finalize.
    pub fn alpha(&self) -> Option<f64> {
        self.iterate.alpha
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn restart_flag(&self) -> bool {
        self.restart_flag
    }

    pub fn restart_count(&self) -> usize {
        self.restart_count
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// History of the line search in progress, or of the most recent one.
    pub fn history(&self) -> Option<&LineSearchHistory> {
        self.search.as_ref().map(|s| &s.history)
    }

    /// Trials evaluated in the current (or most recent) line search.
    pub fn step_count(&self) -> usize {
        self.search.as_ref().map_or(0, |s| s.step_count)
    }

    /// `max|m_new| / max|p_new|` of the current (or most recent) line search.
    pub fn p_ratio(&self) -> Option<f64> {
        self.search.as_ref().map(|s| s.p_ratio)
    }

    pub fn is_bracketed(&self) -> bool {
        self.search.as_ref().is_some_and(|s| s.is_bracketed)
    }

    /// Step control actually in effect. Fixed always keeps its schedule;
    /// the other controls bracket on the first iteration and after a restart.
    pub fn effective_line_search(&self) -> LineSearch {
        match self.config.line_search() {
            LineSearch::Fixed => LineSearch::Fixed,
            _ if self.iteration == 1 || self.restart_flag => LineSearch::Bracket,
            configured => configured,
        }
    }

    // --- Direction dispatcher ---

    /// Computes `p_new` and `s_new = g_new · p_new` from the configured scheme.
    pub fn compute_direction(&mut self) -> Result<(), OptimizeError> {
        self.ensure_not_searching("compute_direction")?;
        let model = require(self.iterate.model.current(), names::M_NEW)?;
        let gradient = require(self.iterate.gradient.current(), names::G_NEW)?;
        let Direction { vector, restart } = self.direction.compute(model, gradient);
        self.check_dimension(names::P_NEW, &vector)?;
        let slope = gradient.dot(&vector);
        if !(slope < 0.0) {
            log::warn!("[Optimize] Direction has slope {slope:.6e}, which is not a descent direction.");
            return Err(OptimizeError::NonDescentDirection { slope });
        }

        self.restart_flag = restart;
        if restart {
            self.restart_count += 1;
            log::info!(
                "[Optimize] {} restarted at iteration {} (restart #{}).",
                self.direction.name(),
                self.iteration,
                self.restart_count
            );
        }
        self.iterate.direction.set_current(vector);
        self.iterate.slope.set_current(slope);
        Ok(())
    }

    // --- Line search controller ---

    /// Starts a line search along `p_new` and returns the first trial model.
    pub fn initialize_search(&mut self) -> Result<&Array1<f64>, OptimizeError> {
        self.ensure_not_searching("initialize_search")?;
        let model = require(self.iterate.model.current(), names::M_NEW)?;
        let direction = require(self.iterate.direction.current(), names::P_NEW)?;
        let f0 = *require(self.iterate.objective.current(), names::F_NEW)?;

        let p_max = max_abs(direction);
        if !(p_max > 0.0 && p_max.is_finite()) {
            return Err(OptimizeError::NonDescentDirection {
                slope: self.iterate.slope.current().copied().unwrap_or(0.0),
            });
        }
        let m_max = max_abs(model);
        let p_ratio = if m_max > 0.0 { m_max / p_max } else { 1.0 / p_max };

        let mut alpha = if self.iteration == 1 || self.restart_flag {
            p_ratio * self.config.step_init()
        } else if self.config.line_search() == LineSearch::Backtrack {
            1.0
        } else {
            let s_new = *require(self.iterate.slope.current(), names::S_NEW)?;
            let s_old = *require(self.iterate.slope.previous(), names::S_OLD)?;
            let alpha_prev = *require(self.iterate.alpha.as_ref(), names::ALPHA)?;
            step::initial_step_from_slopes(s_new, s_old, alpha_prev)
        };
        if let Some(overshoot) = self.config.step_overshoot() {
            alpha *= overshoot;
        }
        if let Some(thresh) = self.config.step_thresh()
            && self.iteration > 1
        {
            alpha = alpha.min(p_ratio * thresh);
        }

        self.logger.begin_search(f0)?;
        log::info!(
            "[Line search] Iteration {}: {:?} search, initial step {alpha:.6e} (p_ratio {p_ratio:.3e}).",
            self.iteration,
            self.effective_line_search()
        );
        self.search = Some(ActiveSearch {
            history: LineSearchHistory::new(f0),
            step_count: 0,
            p_ratio,
            is_best: false,
            is_bracketed: false,
        });
        self.state = SearchState::Searching;
        self.iterate.objective.clear_trial();
        self.place_trial(alpha)
    }

    /// Records the misfit of the pending trial and decides whether the search
    /// is done.
    pub fn search_status(&mut self, f_try: f64) -> Result<SearchStatus, OptimizeError> {
        self.ensure_searching("search_status")?;
        let alpha = *require(self.iterate.alpha.as_ref(), names::ALPHA)?;
        if f_try.is_nan() {
            return Err(OptimizeError::InvalidObjective { step_length: alpha });
        }
        self.logger.log_trial(alpha, f_try)?;
        self.iterate.objective.set_trial(f_try);

        let line_search = self.effective_line_search();
        let step_max = self.config.step_max();
        let state = self.state;
        let search = self.search.as_mut().ok_or(OptimizeError::InvalidState {
            operation: "search_status",
            state,
        })?;
        search.history.push(alpha, f_try);
        search.step_count += 1;
        search.is_best = search.history.latest_is_best();

        let f = search.history.objectives(true);
        let done = match line_search {
            LineSearch::Fixed => step::bracket_closed(&f),
            LineSearch::Bracket => {
                if search.is_bracketed {
                    true
                } else {
                    search.is_bracketed = step::bracket_closed(&f);
                    false
                }
            }
            LineSearch::Backtrack => step::improved(&f),
        };
        log::debug!(
            "[Line search] trial {}: step {alpha:.6e}, misfit {f_try:.6e}{}",
            search.step_count,
            if search.is_best { " (best)" } else { "" }
        );

        self.state = if search.step_count >= step_max {
            log::warn!(
                "[Line search] Reached STEPMAX = {step_max} trials at iteration {}.",
                self.iteration
            );
            SearchState::Failed
        } else if done {
            SearchState::Converged
        } else {
            SearchState::Searching
        };
        Ok(SearchStatus {
            state: self.state,
            is_best: search.is_best,
        })
    }

    /// Proposes the next trial step and returns the trial model.
    ///
    /// A degenerate fit marks the search as failed and is returned as a
    /// non-fatal [`OptimizeError::DegenerateFit`].
    pub fn compute_step(&mut self) -> Result<&Array1<f64>, OptimizeError> {
        self.ensure_searching("compute_step")?;
        let search = self.search.as_ref().ok_or(OptimizeError::InvalidState {
            operation: "compute_step",
            state: self.state,
        })?;
        let alpha = *require(self.iterate.alpha.as_ref(), names::ALPHA)?;
        let x = search.history.step_lengths(true);
        let f = search.history.objectives(true);

        let next = match self.effective_line_search() {
            LineSearch::Fixed => Ok(step::fixed_step(
                search.p_ratio,
                search.step_count,
                self.config.step_init(),
            )),
            LineSearch::Bracket => step::bracket_step(&x, &f, alpha, self.config.step_factor()),
            LineSearch::Backtrack => {
                let slope = *require(self.iterate.slope.current(), names::S_NEW)?;
                match (x.get(1), f.get(1)) {
                    (Some(&x1), Some(&f1)) => step::backtrack(
                        f[0],
                        slope,
                        x1,
                        f1,
                        step::BACKTRACK_B1,
                        step::BACKTRACK_B2,
                    ),
                    _ => Err(OptimizeError::DegenerateFit {
                        reason: "no trial to backtrack from",
                        value: alpha,
                    }),
                }
            }
        };
        match next {
            Ok(next_alpha) => self.place_trial(next_alpha),
            Err(e) => {
                if !e.is_fatal() {
                    log::warn!("[Line search] {e}");
                    self.state = SearchState::Failed;
                }
                Err(e)
            }
        }
    }

    /// Accepts the best trial of the line search and advances the iterate.
    pub fn finalize_search(&mut self) -> Result<StepSummary, OptimizeError> {
        let search = match (&self.search, self.state) {
            (Some(search), state) if state != SearchState::Idle => search,
            (_, state) => {
                return Err(OptimizeError::InvalidState {
                    operation: "finalize_search",
                    state,
                });
            }
        };
        let model = require(self.iterate.model.current(), names::M_NEW)?;
        let gradient = require(self.iterate.gradient.current(), names::G_NEW)?;
        let direction = require(self.iterate.direction.current(), names::P_NEW)?;
        let slope = *require(self.iterate.slope.current(), names::S_NEW)?;

        let (step_length, misfit) = search.history.best();
        let x = search.history.step_lengths(true);
        let f = search.history.objectives(true);
        let secant = match (x.get(1), f.get(1)) {
            (Some(&x1), Some(&f1)) => (f1 - f[0]) / (x1 - x[0]),
            _ => slope,
        };
        let records = [
            ("adhoc", norm2(direction) / slope * secant),
            ("gradient_norm_L1", norm1(gradient)),
            ("gradient_norm_L2", norm2(gradient)),
            ("misfit", f[0]),
            ("restart_count", self.restart_count as f64),
            ("slope", secant),
            ("step_count", search.step_count as f64),
            ("step_length", step_length),
            ("theta", angle(gradient, direction).to_degrees()),
        ];
        let mut next_model = model.clone();
        next_model.scaled_add(step_length, direction);
        let step_count = search.step_count;

        for (key, value) in records {
            self.logger.log_summary(key, value)?;
        }
        self.iterate.commit(next_model, misfit, step_length);
        self.state = SearchState::Idle;
        log::info!(
            "[Line search] Iteration {}: accepted step {step_length:.6e} after {step_count} trials, misfit {misfit:.6e}.",
            self.iteration
        );
        Ok(StepSummary {
            step_length,
            misfit,
            step_count,
        })
    }

    /// True when `p_new` is far enough from steepest descent that restarting
    /// the direction algorithm could rescue a failed line search.
    pub fn retry_status(&self) -> Result<bool, OptimizeError> {
        let gradient = require(self.iterate.gradient.current(), names::G_NEW)?;
        let direction = require(self.iterate.direction.current(), names::P_NEW)?;
        Ok(angle(direction, &-gradient) >= RETRY_ANGLE)
    }

    /// Discards direction history and falls back to `p_new = -g_new`.
    pub fn restart(&mut self) -> Result<(), OptimizeError> {
        self.ensure_not_searching("restart")?;
        let gradient = require(self.iterate.gradient.current(), names::G_NEW)?;
        let direction = -gradient;
        let slope = -gradient.dot(gradient);
        self.direction.restart();
        self.iterate.direction.set_current(direction);
        self.iterate.slope.set_current(slope);
        self.restart_flag = true;
        self.restart_count += 1;
        self.state = SearchState::Idle;
        log::info!(
            "[Optimize] Forced restart at iteration {} (restart #{}).",
            self.iteration,
            self.restart_count
        );
        Ok(())
    }

    // --- Checkpointing ---

    /// Writes every tracked value under its conventional name. Names whose
    /// slot is empty are deleted from the store.
    pub fn save<S: VectorStore + ?Sized>(&self, store: &mut S) -> Result<(), OptimizeError> {
        let it = &self.iterate;
        let vectors = [
            (names::M_NEW, it.model.current()),
            (names::M_OLD, it.model.previous()),
            (names::M_TRY, it.model.trial()),
            (names::G_NEW, it.gradient.current()),
            (names::G_OLD, it.gradient.previous()),
            (names::P_NEW, it.direction.current()),
            (names::P_OLD, it.direction.previous()),
        ];
        for (name, value) in vectors {
            match value {
                Some(v) => store.write_vector(name, v)?,
                None => store.delete(name)?,
            }
        }
        let scalars = [
            (names::F_NEW, it.objective.current().copied()),
            (names::F_OLD, it.objective.previous().copied()),
            (names::F_TRY, it.objective.trial().copied()),
            (names::S_NEW, it.slope.current().copied()),
            (names::S_OLD, it.slope.previous().copied()),
            (names::ALPHA, it.alpha),
            (names::ITERATION, Some(self.iteration as f64)),
            (names::RESTART, Some(if self.restart_flag { 1.0 } else { 0.0 })),
            (names::RESTART_COUNT, Some(self.restart_count as f64)),
        ];
        for (name, value) in scalars {
            match value {
                Some(v) => store.write_scalar(name, v)?,
                None => store.delete(name)?,
            }
        }
        Ok(())
    }

    // --- Internals ---

    fn place_trial(&mut self, alpha: f64) -> Result<&Array1<f64>, OptimizeError> {
        let model = require(self.iterate.model.current(), names::M_NEW)?;
        let direction = require(self.iterate.direction.current(), names::P_NEW)?;
        let mut trial = model.clone();
        trial.scaled_add(alpha, direction);
        self.iterate.alpha = Some(alpha);
        self.iterate.model.set_trial(trial);
        require(self.iterate.model.trial(), names::M_TRY)
    }

    fn check_dimension(&self, name: &'static str, v: &Array1<f64>) -> Result<(), OptimizeError> {
        if v.len() != self.dimension {
            return Err(OptimizeError::DimensionMismatch {
                name,
                expected: self.dimension,
                found: v.len(),
            });
        }
        Ok(())
    }

    fn ensure_searching(&self, operation: &'static str) -> Result<(), OptimizeError> {
        if self.state != SearchState::Searching {
            return Err(OptimizeError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn ensure_not_searching(&self, operation: &'static str) -> Result<(), OptimizeError> {
        if self.state == SearchState::Searching {
            return Err(OptimizeError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    // f = m·m along p = -g from m = [1, 1]: g = [2, 2], s_new = -8.
    fn quadratic_optimizer(config: OptimizeConfig) -> Optimizer {
        let mut opt = Optimizer::new(config, array![1.0, 1.0]).unwrap();
        opt.set_objective(10.0).unwrap();
        opt.set_gradient(array![2.0, 2.0]).unwrap();
        opt.compute_direction().unwrap();
        opt
    }

    /// Replays a fixed sequence of restart flags, always returning `-g`.
    struct Scripted {
        flags: Vec<bool>,
        calls: usize,
    }

    impl DirectionAlgorithm for Scripted {
        fn compute(&mut self, _model: &Array1<f64>, gradient: &Array1<f64>) -> Direction {
            let restart = self.flags[self.calls % self.flags.len()];
            self.calls += 1;
            Direction {
                vector: -gradient,
                restart,
            }
        }

        fn restart(&mut self) {}

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Returns `+g`, an ascent direction.
    struct Uphill {
        restart: bool,
    }

    impl DirectionAlgorithm for Uphill {
        fn compute(&mut self, _model: &Array1<f64>, gradient: &Array1<f64>) -> Direction {
            Direction {
                vector: gradient.clone(),
                restart: self.restart,
            }
        }

        fn restart(&mut self) {}

        fn name(&self) -> &'static str {
            "uphill"
        }
    }

    #[test]
    fn test_single_worse_trial_leaves_model_unchanged() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::SteepestDescent));
        opt.initialize_search().unwrap();
        let status = opt.search_status(15.0).unwrap();
        assert!(!status.is_best);
        assert_eq!(status.state, SearchState::Searching);

        let summary = opt.finalize_search().unwrap();
        assert_that!(&summary.step_length).is_equal_to(0.0);
        assert_eq!(opt.model().unwrap(), &array![1.0, 1.0]);
        assert_that!(&opt.objective().unwrap()).is_equal_to(10.0);
        assert_eq!(opt.iterate().model.previous(), Some(&array![1.0, 1.0]));
    }

    #[test]
    fn test_zero_step_trials_stay_in_their_search_block() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::SteepestDescent));
        opt.initialize_search().unwrap();
        opt.search_status(15.0).unwrap();
        opt.finalize_search().unwrap();

        // The accepted step was zero, so the secant guess is zero as well.
        opt.set_iteration(2).unwrap();
        opt.set_objective(10.0).unwrap();
        opt.set_gradient(array![2.0, 2.0]).unwrap();
        opt.compute_direction().unwrap();
        opt.initialize_search().unwrap();
        assert_that!(&opt.alpha().unwrap()).is_equal_to(0.0);
        opt.search_status(10.0).unwrap();

        let blocks = opt.logger().trial_blocks();
        assert_that!(&blocks.len()).is_equal_to(2);
        assert_eq!(blocks[1], vec![(0.0, 10.0), (0.0, 10.0)]);
    }

    #[test]
    fn test_bracket_flag_then_done_regardless_of_value() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::NonlinearCg));
        opt.initialize_search().unwrap();
        let first = opt.alpha().unwrap();

        let status = opt.search_status(8.0).unwrap();
        assert_eq!(status.state, SearchState::Searching);
        assert!(status.is_best);
        assert!(!opt.is_bracketed());
        opt.compute_step().unwrap();
        assert_that!(&opt.alpha().unwrap()).is_close_to(2.0 * first, 1e-15);

        let status = opt.search_status(9.0).unwrap();
        assert_eq!(status.state, SearchState::Searching);
        assert!(opt.is_bracketed());
        opt.compute_step().unwrap();

        let status = opt.search_status(1e6).unwrap();
        assert_eq!(status.state, SearchState::Converged);
        assert_that!(&status.state.flag()).is_equal_to(1);
        assert!(!status.is_best);
    }

    #[test]
    fn test_backtracking_shrinks_within_safeguards() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::Lbfgs));
        opt.set_iteration(2).unwrap();
        assert_eq!(opt.effective_line_search(), LineSearch::Backtrack);
        opt.initialize_search().unwrap();
        assert_that!(&opt.alpha().unwrap()).is_equal_to(1.0);

        let misfits = [50.0, 40.0, 30.0, 11.0, 10.5];
        let mut previous = 1.0;
        for f in misfits {
            let status = opt.search_status(f).unwrap();
            assert_eq!(status.state, SearchState::Searching);
            opt.compute_step().unwrap();
            let alpha = opt.alpha().unwrap();
            assert_that!(&alpha).is_less_than_or_equal_to(previous);
            let ratio = alpha / previous;
            assert_that!(&ratio).is_greater_than_or_equal_to(step::BACKTRACK_B1 - 1e-12);
            assert_that!(&ratio).is_less_than_or_equal_to(step::BACKTRACK_B2 + 1e-12);
            previous = alpha;
        }
    }

    #[test]
    fn test_restart_count_follows_reported_restarts() {
        let flags = vec![false, true, true, false, true];
        let mut opt = Optimizer::new(OptimizeConfig::new(Scheme::NonlinearCg), array![1.0, -1.0])
            .unwrap()
            .with_direction_algorithm(Box::new(Scripted {
                flags: flags.clone(),
                calls: 0,
            }));
        let mut expected = 0;
        for restart in flags {
            opt.set_gradient(array![0.5, -0.5]).unwrap();
            let before = opt.restart_count();
            opt.compute_direction().unwrap();
            if restart {
                expected += 1;
            }
            assert_that!(&opt.restart_count()).is_greater_than_or_equal_to(before);
            assert_that!(&opt.restart_count()).is_equal_to(expected);
            assert_eq!(opt.restart_flag(), restart);
        }
    }

    #[test]
    fn test_finalize_picks_minimum_of_full_history() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::SteepestDescent));
        opt.initialize_search().unwrap();
        let best_alpha = opt.alpha().unwrap();
        opt.search_status(6.0).unwrap();
        opt.compute_step().unwrap();
        opt.search_status(9.0).unwrap();
        opt.compute_step().unwrap();
        let status = opt.search_status(7.0).unwrap();
        assert_eq!(status.state, SearchState::Converged);

        let summary = opt.finalize_search().unwrap();
        assert_that!(&summary.step_length).is_equal_to(best_alpha);
        assert_that!(&summary.misfit).is_equal_to(6.0);
        assert_that!(&summary.step_count).is_equal_to(3);

        let logged_min = opt.logger().trial_blocks()[0]
            .iter()
            .map(|&(_, f)| f)
            .fold(f64::INFINITY, f64::min);
        assert_that!(&opt.objective().unwrap()).is_equal_to(logged_min);
        let expected = array![1.0 - 2.0 * best_alpha, 1.0 - 2.0 * best_alpha];
        for (a, b) in opt.model().unwrap().iter().zip(expected.iter()) {
            assert_that!(*a).is_close_to(*b, 1e-15);
        }
    }

    #[test]
    fn test_step_max_marks_search_failed() {
        let config = OptimizeConfig::new(Scheme::SteepestDescent).with_step_max(3);
        let mut opt = quadratic_optimizer(config);
        opt.initialize_search().unwrap();
        for _ in 0..2 {
            let status = opt.search_status(20.0).unwrap();
            assert_eq!(status.state, SearchState::Searching);
            opt.compute_step().unwrap();
        }
        let status = opt.search_status(20.0).unwrap();
        assert_eq!(status.state, SearchState::Failed);
        assert_that!(&status.state.flag()).is_equal_to(-1);
        assert!(matches!(
            opt.compute_step(),
            Err(OptimizeError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_backtracking_reference_scenario() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::Lbfgs));
        opt.set_iteration(2).unwrap();
        assert_that!(&opt.iterate().slope.current().copied().unwrap()).is_equal_to(-8.0);

        let trial = opt.initialize_search().unwrap().clone();
        assert_eq!(trial, array![-1.0, -1.0]);
        let status = opt.search_status(12.0).unwrap();
        assert_eq!(status.state, SearchState::Searching);
        assert!(!status.is_best);

        opt.compute_step().unwrap();
        assert_that!(&opt.alpha().unwrap()).is_close_to(0.4, 1e-15);
        let status = opt.search_status(8.0).unwrap();
        assert_eq!(status.state, SearchState::Converged);
        assert!(status.is_best);

        let summary = opt.finalize_search().unwrap();
        assert_that!(&summary.step_length).is_close_to(0.4, 1e-15);
        assert_that!(&opt.objective().unwrap()).is_equal_to(8.0);
        let model = opt.model().unwrap();
        assert_that!(&model[0]).is_close_to(0.2, 1e-15);
        assert_that!(&model[1]).is_close_to(0.2, 1e-15);
        assert_that!(&opt.alpha().unwrap()).is_close_to(0.4, 1e-15);
    }

    #[test]
    fn test_nan_objective_is_rejected_without_touching_history() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::SteepestDescent));
        opt.initialize_search().unwrap();
        opt.search_status(9.0).unwrap();
        opt.compute_step().unwrap();
        let before = opt.history().unwrap().clone();

        assert!(matches!(
            opt.search_status(f64::NAN),
            Err(OptimizeError::InvalidObjective { .. })
        ));
        assert_eq!(opt.history().unwrap(), &before);
        assert_that!(&opt.step_count()).is_equal_to(1);
    }

    #[test]
    fn test_finalize_emits_summary_records() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::Lbfgs));
        opt.set_iteration(2).unwrap();
        opt.initialize_search().unwrap();
        opt.search_status(12.0).unwrap();
        opt.compute_step().unwrap();
        opt.search_status(8.0).unwrap();
        opt.finalize_search().unwrap();

        let log = opt.logger();
        let keys: Vec<&str> = log.keys().collect();
        assert_eq!(
            keys,
            vec![
                "adhoc",
                "gradient_norm_L1",
                "gradient_norm_L2",
                "misfit",
                "restart_count",
                "slope",
                "step_count",
                "step_length",
                "theta",
            ]
        );
        assert_that!(&log.last("misfit").unwrap()).is_equal_to(10.0);
        assert_that!(&log.last("gradient_norm_L1").unwrap()).is_close_to(4.0, 1e-15);
        assert_that!(&log.last("theta").unwrap()).is_close_to(180.0, 1e-6);
        // Sorted history is [0, 0.4, 1]: the secant runs from the baseline to 0.4.
        assert_that!(&log.last("slope").unwrap()).is_close_to(-5.0, 1e-12);
        assert_that!(&log.last("step_count").unwrap()).is_equal_to(2.0);
    }

    #[test]
    fn test_secant_initial_step_on_later_iterations() {
        let config = OptimizeConfig::new(Scheme::SteepestDescent).with_step_overshoot(2.0);
        let mut opt = quadratic_optimizer(config);
        opt.initialize_search().unwrap();
        opt.search_status(8.0).unwrap();
        let accepted = opt.finalize_search().unwrap().step_length;

        // Half the gradient: s_new / s_old = 1 / 4.
        opt.set_iteration(2).unwrap();
        opt.set_objective(8.0).unwrap();
        opt.set_gradient(array![1.0, 1.0]).unwrap();
        opt.compute_direction().unwrap();
        opt.initialize_search().unwrap();
        let expected = 2.0 * 0.25 * accepted * 2.0;
        assert_that!(&opt.alpha().unwrap()).is_close_to(expected, 1e-15);
    }

    #[test]
    fn test_step_thresh_caps_later_initial_steps() {
        let config = OptimizeConfig::new(Scheme::Lbfgs).with_step_thresh(0.01);
        let mut opt = quadratic_optimizer(config);
        opt.set_iteration(2).unwrap();
        opt.initialize_search().unwrap();
        // p_ratio = max|m| / max|p| = 0.5
        assert_that!(&opt.p_ratio().unwrap()).is_close_to(0.5, 1e-15);
        assert_that!(&opt.alpha().unwrap()).is_close_to(0.005, 1e-15);
    }

    #[test]
    fn test_fixed_schedule_on_every_iteration() {
        let config = OptimizeConfig::new(Scheme::SteepestDescent).with_line_search(LineSearch::Fixed);
        let mut opt = quadratic_optimizer(config);
        assert_eq!(opt.effective_line_search(), LineSearch::Fixed);
        opt.initialize_search().unwrap();
        let p_ratio = opt.p_ratio().unwrap();
        // A single improvement does not close a fixed search.
        let status = opt.search_status(8.0).unwrap();
        assert_eq!(status.state, SearchState::Searching);
        opt.compute_step().unwrap();
        assert_that!(&opt.alpha().unwrap()).is_close_to(p_ratio * 2.0 * 0.05, 1e-15);
        opt.finalize_search().unwrap();

        opt.set_iteration(2).unwrap();
        opt.set_objective(8.0).unwrap();
        opt.set_gradient(array![1.0, 1.0]).unwrap();
        opt.compute_direction().unwrap();
        assert_eq!(opt.effective_line_search(), LineSearch::Fixed);
        opt.initialize_search().unwrap();
        let p_ratio = opt.p_ratio().unwrap();
        assert!(!opt.restart_flag());

        let status = opt.search_status(7.0).unwrap();
        assert_eq!(status.state, SearchState::Searching);
        opt.compute_step().unwrap();
        assert_that!(&opt.alpha().unwrap()).is_close_to(p_ratio * 2.0 * 0.05, 1e-15);
        // Improvement followed by a rise closes the search.
        let status = opt.search_status(7.5).unwrap();
        assert_eq!(status.state, SearchState::Converged);
    }

    #[test]
    fn test_fixed_keeps_schedule_after_restart() {
        let config = OptimizeConfig::new(Scheme::NonlinearCg).with_line_search(LineSearch::Fixed);
        let mut opt = quadratic_optimizer(config);
        opt.set_iteration(4).unwrap();
        opt.restart().unwrap();
        assert!(opt.restart_flag());
        assert_eq!(opt.effective_line_search(), LineSearch::Fixed);
    }

    #[test]
    fn test_degenerate_fit_fails_search_but_keeps_best_trial() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::SteepestDescent));
        opt.initialize_search().unwrap();
        let first = opt.alpha().unwrap();
        let status = opt.search_status(f64::INFINITY).unwrap();
        assert_eq!(status.state, SearchState::Searching);
        opt.compute_step().unwrap();
        assert_that!(&opt.alpha().unwrap()).is_close_to(0.5 * first, 1e-15);

        opt.search_status(8.0).unwrap();
        assert!(opt.is_bracketed());
        match opt.compute_step() {
            Err(e @ OptimizeError::DegenerateFit { .. }) => assert!(!e.is_fatal()),
            other => panic!("Expected DegenerateFit, got {:?}", other),
        }
        assert_eq!(opt.state(), SearchState::Failed);

        let summary = opt.finalize_search().unwrap();
        assert_that!(&summary.step_length).is_close_to(0.5 * first, 1e-15);
        assert_that!(&summary.misfit).is_equal_to(8.0);
        assert_that!(&summary.step_count).is_equal_to(2);
        let model = opt.model().unwrap();
        assert_that!(&model[0]).is_close_to(1.0 - first, 1e-15);
        assert_eq!(opt.state(), SearchState::Idle);
    }

    #[test]
    fn test_non_descent_direction_is_fatal() {
        let mut opt = Optimizer::new(OptimizeConfig::new(Scheme::SteepestDescent), array![1.0])
            .unwrap()
            .with_direction_algorithm(Box::new(Uphill { restart: false }));
        opt.set_gradient(array![3.0]).unwrap();
        match opt.compute_direction() {
            Err(e @ OptimizeError::NonDescentDirection { .. }) => assert!(e.is_fatal()),
            other => panic!("Expected NonDescentDirection, got {:?}", other),
        }
    }

    #[test]
    fn test_rejected_direction_leaves_restart_bookkeeping() {
        let mut opt = Optimizer::new(OptimizeConfig::new(Scheme::NonlinearCg), array![1.0])
            .unwrap()
            .with_direction_algorithm(Box::new(Uphill { restart: true }));
        opt.set_gradient(array![3.0]).unwrap();
        assert!(matches!(
            opt.compute_direction(),
            Err(OptimizeError::NonDescentDirection { .. })
        ));
        assert!(!opt.restart_flag());
        assert_that!(&opt.restart_count()).is_equal_to(0);
        assert!(opt.iterate().direction.current().is_none());
    }

    #[test]
    fn test_missing_inputs_and_wrong_dimensions() {
        let mut opt =
            Optimizer::new(OptimizeConfig::new(Scheme::SteepestDescent), array![1.0, 2.0]).unwrap();
        match opt.compute_direction() {
            Err(OptimizeError::Configuration { name }) => assert_eq!(name, "g_new"),
            other => panic!("Expected missing g_new, got {:?}", other),
        }
        assert!(matches!(
            opt.set_gradient(array![1.0, 2.0, 3.0]),
            Err(OptimizeError::DimensionMismatch {
                expected: 2,
                found: 3,
                ..
            })
        ));
        assert!(matches!(
            opt.search_status(1.0),
            Err(OptimizeError::InvalidState {
                state: SearchState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn test_forced_restart_switches_to_steepest_descent() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::Lbfgs));
        opt.set_iteration(3).unwrap();
        opt.set_gradient(array![2.0, 4.0]).unwrap();
        opt.iterate.direction.set_current(array![-1.0, 0.0]);
        assert!(opt.retry_status().unwrap());

        opt.restart().unwrap();
        assert_eq!(opt.iterate().direction.current(), Some(&array![-2.0, -4.0]));
        assert_eq!(opt.iterate().slope.current(), Some(&-20.0));
        assert!(opt.restart_flag());
        assert_that!(&opt.restart_count()).is_equal_to(1);
        assert_eq!(opt.effective_line_search(), LineSearch::Bracket);
        assert!(!opt.retry_status().unwrap());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::Lbfgs));
        opt.set_iteration(2).unwrap();
        opt.initialize_search().unwrap();
        opt.search_status(12.0).unwrap();
        opt.compute_step().unwrap();
        opt.search_status(8.0).unwrap();
        opt.finalize_search().unwrap();

        let mut store = MemoryStore::new();
        store.write_vector(names::G_NEW, &array![9.0, 9.0]).unwrap();
        opt.save(&mut store).unwrap();
        assert!(!store.contains(names::G_NEW));
        assert!(!store.contains(names::M_TRY));

        let restored = Optimizer::load(OptimizeConfig::new(Scheme::Lbfgs), &store).unwrap();
        assert_eq!(restored.model().unwrap(), opt.model().unwrap());
        assert_eq!(restored.iterate().model.previous(), Some(&array![1.0, 1.0]));
        assert_eq!(restored.iterate().gradient.previous(), Some(&array![2.0, 2.0]));
        assert_eq!(restored.iterate().slope.previous(), Some(&-8.0));
        assert_eq!(restored.alpha(), opt.alpha());
        assert_that!(&restored.iteration()).is_equal_to(2);
        assert_that!(&restored.objective().unwrap()).is_equal_to(8.0);
    }

    #[test]
    fn test_load_requires_model() {
        let store = MemoryStore::new();
        match Optimizer::load(OptimizeConfig::new(Scheme::Lbfgs), &store) {
            Err(OptimizeError::Configuration { name }) => assert_eq!(name, "m_new"),
            Err(e) => panic!("Expected missing m_new, got {e}"),
            Ok(_) => panic!("Expected missing m_new"),
        }
    }

    fn scratch_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "inversion_optimize_lib_{label}_{}",
            std::process::id()
        ));
        if dir.exists() {
            std::fs::remove_dir_all(&dir).unwrap();
        }
        dir
    }

    #[test]
    fn test_file_logger_receives_trials_and_summary() {
        let dir = scratch_dir("filelog");
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::Lbfgs))
            .with_logger(FileLog::open(&dir).unwrap());
        opt.set_iteration(2).unwrap();
        opt.initialize_search().unwrap();
        opt.search_status(12.0).unwrap();
        opt.compute_step().unwrap();
        opt.search_status(8.0).unwrap();
        opt.finalize_search().unwrap();

        let step_length = std::fs::read_to_string(dir.join("step_length")).unwrap();
        let value: f64 = step_length.trim().parse().unwrap();
        assert_that!(&value).is_close_to(0.4, 1e-6);
        let table = std::fs::read_to_string(dir.join(STEP_TABLE)).unwrap();
        // Header, separator, blank line, baseline and two trials.
        assert_that!(&table.lines().count()).is_equal_to(6);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_checkpoint_through_directory_store() {
        let dir = scratch_dir("checkpoint");
        let mut store = DirectoryStore::open(&dir).unwrap();
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::SteepestDescent));
        opt.initialize_search().unwrap();
        opt.save(&mut store).unwrap();

        let restored = Optimizer::load(OptimizeConfig::new(Scheme::SteepestDescent), &store).unwrap();
        assert_eq!(restored.trial_model().unwrap(), opt.trial_model().unwrap());
        assert_eq!(restored.alpha(), opt.alpha());
        assert_eq!(restored.iterate().slope.current(), Some(&-8.0));
        assert_eq!(restored.iterate().direction.current(), Some(&array![-2.0, -2.0]));
        assert_that!(&restored.restart_count()).is_equal_to(0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_directory_checkpoint_keeps_infinite_trial_misfit() {
        let dir = scratch_dir("infinite");
        let mut store = DirectoryStore::open(&dir).unwrap();
        let mut opt = quadratic_optimizer(OptimizeConfig::new(Scheme::SteepestDescent));
        opt.initialize_search().unwrap();
        opt.search_status(f64::INFINITY).unwrap();
        opt.save(&mut store).unwrap();

        let restored = Optimizer::load(OptimizeConfig::new(Scheme::SteepestDescent), &store).unwrap();
        assert_eq!(restored.iterate().objective.trial(), Some(&f64::INFINITY));
        assert_eq!(
            restored.alpha().map(f64::to_bits),
            opt.alpha().map(f64::to_bits)
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_angle_and_norms() {
        let x = array![3.0, -4.0];
        assert_that!(&norm1(&x)).is_close_to(7.0, 1e-15);
        assert_that!(&norm2(&x)).is_close_to(5.0, 1e-15);
        assert_that!(&max_abs(&x)).is_close_to(4.0, 1e-15);
        assert_that!(&angle(&x, &(-&x))).is_close_to(std::f64::consts::PI, 1e-12);
        assert_that!(&angle(&array![1.0, 0.0], &array![0.0, 2.0]))
            .is_close_to(std::f64::consts::FRAC_PI_2, 1e-15);
        assert!(angle(&x, &array![0.0, 0.0]).is_nan());
    }
}
