//! Run configuration: search-direction scheme, step-length control and the
//! numerical knobs that tune them.
//!
//! [`OptimizeConfig`] is an immutable value handed to [`crate::Optimizer`] at
//! construction. It can be built in code with the `with_*` methods or
//! resolved from a parameter file through [`Parameters`], which mirrors the
//! uppercase parameter names (`SCHEME`, `LINESEARCH`, `STEPMAX`, ...) used by
//! inversion workflows.

use std::path::Path;

use ndarray::Array1;
use serde::Deserialize;

use crate::OptimizeError;

/// Search-direction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Scheme {
    #[serde(rename = "SD", alias = "SteepestDescent")]
    SteepestDescent,
    #[serde(rename = "NLCG", alias = "NonlinearCG")]
    NonlinearCg,
    #[serde(rename = "LBFGS", alias = "LimitedMemoryQuasiNewton")]
    Lbfgs,
}

/// Step-length control used by the line search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LineSearch {
    /// Linear schedule `p_ratio * k * STEPINIT`.
    Fixed,
    /// Expand/contract until the minimum is bracketed, then fit a parabola.
    Bracket,
    /// Shrink from a unit step until the objective decreases.
    Backtrack,
}

impl LineSearch {
    /// Default step control for a scheme: quasi-Newton directions are
    /// well scaled and get backtracking, everything else brackets.
    pub fn default_for(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Lbfgs => LineSearch::Backtrack,
            Scheme::SteepestDescent | Scheme::NonlinearCg => LineSearch::Bracket,
        }
    }
}

/// Immutable optimizer configuration.
#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    scheme: Scheme,
    line_search: LineSearch,
    step_max: usize,
    step_init: f64,
    step_factor: f64,
    step_thresh: Option<f64>,
    step_overshoot: Option<f64>,
    nlcg_max: usize,
    nlcg_thresh: f64,
    lbfgs_mem: usize,
    lbfgs_max: usize,
    lbfgs_thresh: f64,
    precond: bool,
    preconditioner: Option<Array1<f64>>,
}

impl OptimizeConfig {
    /// Default number of trial evaluations per line search.
    pub const DEFAULT_STEP_MAX: usize = 10;
    /// Default initial step, relative to the model/direction size ratio.
    pub const DEFAULT_STEP_INIT: f64 = 0.05;
    /// Default contraction factor of the bracketing search.
    pub const DEFAULT_STEP_FACTOR: f64 = 0.5;
    /// Default number of stored L-BFGS correction pairs.
    pub const DEFAULT_LBFGS_MEM: usize = 5;

    /// Creates a configuration with the default step control for `scheme`.
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme,
            line_search: LineSearch::default_for(scheme),
            step_max: Self::DEFAULT_STEP_MAX,
            step_init: Self::DEFAULT_STEP_INIT,
            step_factor: Self::DEFAULT_STEP_FACTOR,
            step_thresh: None,
            step_overshoot: None,
            nlcg_max: usize::MAX,
            nlcg_thresh: f64::INFINITY,
            lbfgs_mem: Self::DEFAULT_LBFGS_MEM,
            lbfgs_max: usize::MAX,
            lbfgs_thresh: 0.0,
            precond: false,
            preconditioner: None,
        }
    }

    /// Overrides the step control (default: Backtrack for L-BFGS, Bracket otherwise).
    pub fn with_line_search(mut self, line_search: LineSearch) -> Self {
        self.line_search = line_search;
        self
    }

    /// Sets the maximum number of trial evaluations per line search (default: 10).
    pub fn with_step_max(mut self, step_max: usize) -> Self {
        self.step_max = step_max;
        self
    }

    /// Sets the initial step length relative to `max|m| / max|p|` (default: 0.05).
    pub fn with_step_init(mut self, step_init: f64) -> Self {
        self.step_init = step_init;
        self
    }

    /// Sets the bracketing contraction factor (default: 0.5). Expansion uses its inverse.
    pub fn with_step_factor(mut self, step_factor: f64) -> Self {
        self.step_factor = step_factor;
        self
    }

    /// Caps the initial step of every iteration after the first at
    /// `p_ratio * thresh`.
    pub fn with_step_thresh(mut self, thresh: f64) -> Self {
        self.step_thresh = Some(thresh);
        self
    }

    /// Multiplies every initial step by `overshoot`.
    pub fn with_step_overshoot(mut self, overshoot: f64) -> Self {
        self.step_overshoot = Some(overshoot);
        self
    }

    /// Nonlinear CG restart controls: periodic restart after `max_iterations`
    /// and restart when `|g·g_old| / |g|²` exceeds `thresh`.
    pub fn with_nlcg_restarts(mut self, max_iterations: usize, thresh: f64) -> Self {
        self.nlcg_max = max_iterations;
        self.nlcg_thresh = thresh;
        self
    }

    /// L-BFGS controls: number of stored pairs, periodic restart after
    /// `max_iterations`, and the angle safeguard `thresh` in degrees.
    pub fn with_lbfgs(mut self, memory: usize, max_iterations: usize, thresh: f64) -> Self {
        self.lbfgs_mem = memory;
        self.lbfgs_max = max_iterations;
        self.lbfgs_thresh = thresh;
        self
    }

    /// Attaches a diagonal preconditioner and enables preconditioning.
    pub fn with_preconditioner(mut self, diagonal: Array1<f64>) -> Self {
        self.precond = true;
        self.preconditioner = Some(diagonal);
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn line_search(&self) -> LineSearch {
        self.line_search
    }

    pub fn step_max(&self) -> usize {
        self.step_max
    }

    pub fn step_init(&self) -> f64 {
        self.step_init
    }

    pub fn step_factor(&self) -> f64 {
        self.step_factor
    }

    pub fn step_thresh(&self) -> Option<f64> {
        self.step_thresh
    }

    pub fn step_overshoot(&self) -> Option<f64> {
        self.step_overshoot
    }

    pub fn nlcg_max(&self) -> usize {
        self.nlcg_max
    }

    pub fn nlcg_thresh(&self) -> f64 {
        self.nlcg_thresh
    }

    pub fn lbfgs_mem(&self) -> usize {
        self.lbfgs_mem
    }

    pub fn lbfgs_max(&self) -> usize {
        self.lbfgs_max
    }

    pub fn lbfgs_thresh(&self) -> f64 {
        self.lbfgs_thresh
    }

    pub fn preconditioner(&self) -> Option<&Array1<f64>> {
        self.preconditioner.as_ref()
    }

    /// Checks every knob. Called by [`crate::Optimizer::new`] so that a bad
    /// configuration surfaces before the first iteration.
    pub fn validate(&self) -> Result<(), OptimizeError> {
        if self.step_max == 0 {
            return Err(invalid("STEPMAX", "must be at least 1"));
        }
        if !(self.step_init.is_finite() && self.step_init > 0.0) {
            return Err(invalid("STEPINIT", "must be finite and positive"));
        }
        if !(self.step_factor > 0.0 && self.step_factor < 1.0) {
            return Err(invalid("STEPFACTOR", "must lie strictly between 0 and 1"));
        }
        if let Some(thresh) = self.step_thresh
            && !(thresh.is_finite() && thresh > 0.0)
        {
            return Err(invalid("STEPTHRESH", "must be finite and positive"));
        }
        if let Some(overshoot) = self.step_overshoot
            && !(overshoot.is_finite() && overshoot > 0.0)
        {
            return Err(invalid("STEPOVERSHOOT", "must be finite and positive"));
        }
        if self.nlcg_max == 0 {
            return Err(invalid("NLCGMAX", "must be at least 1"));
        }
        if self.nlcg_thresh.is_nan() || self.nlcg_thresh < 0.0 {
            return Err(invalid("NLCGTHRESH", "must be non-negative"));
        }
        if self.lbfgs_mem == 0 {
            return Err(invalid("LBFGSMEM", "must be at least 1"));
        }
        if self.lbfgs_max == 0 {
            return Err(invalid("LBFGSMAX", "must be at least 1"));
        }
        if !(self.lbfgs_thresh.is_finite() && (0.0..90.0).contains(&self.lbfgs_thresh)) {
            return Err(invalid("LBFGSTHRESH", "must lie in [0, 90) degrees"));
        }
        match (&self.preconditioner, self.precond) {
            (None, true) => {
                return Err(OptimizeError::Configuration {
                    name: "PRECOND".to_string(),
                });
            }
            (Some(diagonal), _) => {
                if diagonal.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                    return Err(invalid(
                        "PRECOND",
                        "diagonal entries must be finite and positive",
                    ));
                }
            }
            (None, false) => {}
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &'static str) -> OptimizeError {
    OptimizeError::InvalidParameter { name, reason }
}

/// Parameter-file view of the configuration.
///
/// Every field is optional in the file; [`Parameters::resolve`] fills in
/// defaults and reports the required ones (`BEGIN`, `END`) as
/// [`OptimizeError::Configuration`]. Unknown keys are ignored so a shared
/// workflow parameter file can be passed as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Parameters {
    pub begin: Option<usize>,
    pub end: Option<usize>,
    pub scheme: Option<Scheme>,
    pub linesearch: Option<LineSearch>,
    pub precond: Option<bool>,
    pub stepmax: Option<usize>,
    pub stepinit: Option<f64>,
    pub stepfactor: Option<f64>,
    pub stepthresh: Option<f64>,
    pub stepovershoot: Option<f64>,
    pub nlcgmax: Option<usize>,
    pub nlcgthresh: Option<f64>,
    pub lbfgsmem: Option<usize>,
    pub lbfgsmax: Option<usize>,
    pub lbfgsthresh: Option<f64>,
}

/// Output of [`Parameters::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedParameters {
    pub config: OptimizeConfig,
    /// First outer iteration of the run.
    pub begin: usize,
    /// Last outer iteration of the run (inclusive).
    pub end: usize,
}

impl Parameters {
    pub fn from_json_str(text: &str) -> Result<Self, OptimizeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OptimizeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Applies defaults and validates.
    ///
    /// `PRECOND = true` leaves the configuration without a preconditioner;
    /// attach one with [`OptimizeConfig::with_preconditioner`] before
    /// constructing the optimizer, otherwise construction fails.
    pub fn resolve(&self) -> Result<ResolvedParameters, OptimizeError> {
        let begin = self.begin.ok_or_else(|| OptimizeError::Configuration {
            name: "BEGIN".to_string(),
        })?;
        let end = self.end.ok_or_else(|| OptimizeError::Configuration {
            name: "END".to_string(),
        })?;
        if begin == 0 {
            return Err(invalid("BEGIN", "iterations are numbered from 1"));
        }
        if begin > end {
            return Err(invalid("END", "must not precede BEGIN"));
        }

        let scheme = self.scheme.unwrap_or(Scheme::Lbfgs);
        let mut config = OptimizeConfig::new(scheme);
        if let Some(line_search) = self.linesearch {
            config = config.with_line_search(line_search);
        }
        if let Some(step_max) = self.stepmax {
            config = config.with_step_max(step_max);
        }
        if let Some(step_init) = self.stepinit {
            config = config.with_step_init(step_init);
        }
        if let Some(step_factor) = self.stepfactor {
            config = config.with_step_factor(step_factor);
        }
        if let Some(thresh) = self.stepthresh {
            config = config.with_step_thresh(thresh);
        }
        // Zero means "no overshoot scaling" in parameter files.
        if let Some(overshoot) = self.stepovershoot.filter(|v| *v != 0.0) {
            config = config.with_step_overshoot(overshoot);
        }
        config = config.with_nlcg_restarts(
            self.nlcgmax.unwrap_or(usize::MAX),
            self.nlcgthresh.unwrap_or(f64::INFINITY),
        );
        config = config.with_lbfgs(
            self.lbfgsmem.unwrap_or(OptimizeConfig::DEFAULT_LBFGS_MEM),
            self.lbfgsmax.unwrap_or(usize::MAX),
            self.lbfgsthresh.unwrap_or(0.0),
        );
        config.precond = self.precond.unwrap_or(false);

        if config.precond {
            log::info!("[Optimize] PRECOND enabled; a preconditioner must be attached before setup.");
        } else {
            config.validate()?;
        }
        Ok(ResolvedParameters { config, begin, end })
    }
}
