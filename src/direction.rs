//! Search-direction algorithms.
//!
//! Every algorithm owns whatever history it needs (previous gradient,
//! previous direction, L-BFGS correction pairs) and reports through
//! [`Direction::restart`] whenever it fell back to the (preconditioned)
//! steepest-descent direction because its approximation became unreliable.

use std::collections::VecDeque;

use ndarray::Array1;

use crate::angle;
use crate::config::{OptimizeConfig, Scheme};

/// Output of one direction computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Direction {
    pub vector: Array1<f64>,
    /// True when the algorithm discarded its history on this call.
    pub restart: bool,
}

impl Direction {
    fn new(vector: Array1<f64>, restart: bool) -> Self {
        Self { vector, restart }
    }
}

/// A stateful search-direction producer.
pub trait DirectionAlgorithm {
    /// Computes the direction at `model` from `gradient`.
    fn compute(&mut self, model: &Array1<f64>, gradient: &Array1<f64>) -> Direction;

    /// Discards all history; the next call starts from steepest descent.
    fn restart(&mut self);

    fn name(&self) -> &'static str;
}

/// Algorithm for the configured scheme, with the configured preconditioner.
pub(crate) fn for_config(config: &OptimizeConfig) -> Box<dyn DirectionAlgorithm> {
    let precond = config.preconditioner().cloned();
    match config.scheme() {
        Scheme::SteepestDescent => Box::new(SteepestDescent),
        Scheme::NonlinearCg => Box::new(NonlinearCg::new(
            config.nlcg_max(),
            config.nlcg_thresh(),
            precond,
        )),
        Scheme::Lbfgs => Box::new(Lbfgs::new(
            config.lbfgs_mem(),
            config.lbfgs_max(),
            config.lbfgs_thresh(),
            precond,
        )),
    }
}

fn apply_preconditioner(precond: Option<&Array1<f64>>, v: &Array1<f64>) -> Array1<f64> {
    match precond {
        Some(diagonal) => v * diagonal,
        None => v.clone(),
    }
}

/// `p = -g`.
#[derive(Debug, Clone, Default)]
pub struct SteepestDescent;

impl DirectionAlgorithm for SteepestDescent {
    fn compute(&mut self, _model: &Array1<f64>, gradient: &Array1<f64>) -> Direction {
        Direction::new(-gradient, false)
    }

    fn restart(&mut self) {}

    fn name(&self) -> &'static str {
        "SD"
    }
}

/// Polak–Ribière nonlinear conjugate gradient with periodic, conjugacy and
/// descent restarts.
#[derive(Debug, Clone)]
pub struct NonlinearCg {
    max_iterations: usize,
    thresh: f64,
    precond: Option<Array1<f64>>,
    iteration: usize,
    g_old: Option<Array1<f64>>,
    p_old: Option<Array1<f64>>,
}

impl NonlinearCg {
    /// `max_iterations`: restart after this many calls since the last restart.
    /// `thresh`: restart when `|g·g_old| / g·g` exceeds it.
    pub fn new(max_iterations: usize, thresh: f64, precond: Option<Array1<f64>>) -> Self {
        Self {
            max_iterations,
            thresh,
            precond,
            iteration: 0,
            g_old: None,
            p_old: None,
        }
    }

    /// Calls since the last restart, counting the current one.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    fn steepest(&mut self, gradient: &Array1<f64>, restart: bool) -> Direction {
        let p = -apply_preconditioner(self.precond.as_ref(), gradient);
        self.g_old = Some(gradient.clone());
        self.p_old = Some(p.clone());
        Direction::new(p, restart)
    }

    fn restart_from(&mut self, gradient: &Array1<f64>, reason: &str) -> Direction {
        log::info!("[NLCG] restarting NLCG... [{reason}]");
        self.iteration = 1;
        self.steepest(gradient, true)
    }
}

impl DirectionAlgorithm for NonlinearCg {
    fn compute(&mut self, _model: &Array1<f64>, gradient: &Array1<f64>) -> Direction {
        self.iteration += 1;
        let (g_old, p_old) = match (self.g_old.take(), self.p_old.take()) {
            (Some(g_old), Some(p_old)) if self.iteration > 1 => (g_old, p_old),
            _ => {
                self.iteration = 1;
                return self.steepest(gradient, false);
            }
        };
        if self.iteration > self.max_iterations {
            return self.restart_from(gradient, "periodic restart");
        }

        let pg = apply_preconditioner(self.precond.as_ref(), gradient);
        let denominator = g_old.dot(&apply_preconditioner(self.precond.as_ref(), &g_old));
        if !(denominator > 0.0) {
            return self.restart_from(gradient, "vanishing previous gradient");
        }
        let beta = pg.dot(&(gradient - &g_old)) / denominator;
        let p = -&pg + beta * &p_old;

        let gg = gradient.dot(gradient);
        let conjugacy = (gradient.dot(&g_old) / gg).abs();
        if conjugacy > self.thresh {
            return self.restart_from(gradient, "loss of conjugacy");
        }
        if p.dot(gradient) / gg > 0.0 {
            return self.restart_from(gradient, "not a descent direction");
        }
        log::debug!("[NLCG] beta = {beta:.6e}, conjugacy = {conjugacy:.3e}");
        self.g_old = Some(gradient.clone());
        self.p_old = Some(p.clone());
        Direction::new(p, false)
    }

    fn restart(&mut self) {
        self.iteration = 0;
        self.g_old = None;
        self.p_old = None;
    }

    fn name(&self) -> &'static str {
        "NLCG"
    }
}

/// A stored L-BFGS correction pair.
#[derive(Debug, Clone)]
struct CorrectionPair {
    s: Array1<f64>,
    y: Array1<f64>,
    rho: f64,
}

/// Limited-memory BFGS using the two-loop recursion.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    memory: usize,
    max_iterations: usize,
    thresh: f64,
    precond: Option<Array1<f64>>,
    iteration: usize,
    // Newest pair at the front.
    pairs: VecDeque<CorrectionPair>,
    m_old: Option<Array1<f64>>,
    g_old: Option<Array1<f64>>,
}

impl Lbfgs {
    /// `memory`: number of correction pairs kept.
    /// `max_iterations`: restart after this many calls since the last restart.
    /// `thresh`: restart when the angle between `g` and `H g` exceeds `90 - thresh` degrees.
    pub fn new(
        memory: usize,
        max_iterations: usize,
        thresh: f64,
        precond: Option<Array1<f64>>,
    ) -> Self {
        Self {
            memory: memory.max(1),
            max_iterations,
            thresh,
            precond,
            iteration: 0,
            pairs: VecDeque::with_capacity(memory.max(1)),
            m_old: None,
            g_old: None,
        }
    }

    /// Number of correction pairs currently stored.
    pub fn memory_used(&self) -> usize {
        self.pairs.len()
    }

    fn update(&mut self, model: &Array1<f64>, gradient: &Array1<f64>) {
        if let (Some(m_old), Some(g_old)) = (&self.m_old, &self.g_old) {
            let s = model - m_old;
            let y = gradient - g_old;
            let sy = s.dot(&y);
            if sy > 0.0 {
                if self.pairs.len() == self.memory {
                    self.pairs.pop_back();
                }
                self.pairs.push_front(CorrectionPair { s, y, rho: 1.0 / sy });
            } else {
                log::debug!("[L-BFGS] skipping pair with non-positive curvature sᵀy = {sy:.3e}");
            }
        }
        self.m_old = Some(model.clone());
        self.g_old = Some(gradient.clone());
    }

    /// Two-loop recursion: approximates `H g` from the stored pairs.
    fn apply(&self, gradient: &Array1<f64>) -> Array1<f64> {
        let mut q = gradient.clone();
        let mut alphas = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            let a = pair.rho * pair.s.dot(&q);
            q.scaled_add(-a, &pair.y);
            alphas.push(a);
        }
        let mut r = apply_preconditioner(self.precond.as_ref(), &q);
        if let Some(newest) = self.pairs.front() {
            let yy = newest.y.dot(&newest.y);
            r *= (1.0 / newest.rho) / yy;
        }
        for (pair, a) in self.pairs.iter().zip(alphas).rev() {
            let b = pair.rho * pair.y.dot(&r);
            r.scaled_add(a - b, &pair.s);
        }
        r
    }

    fn restart_from(&mut self, model: &Array1<f64>, gradient: &Array1<f64>, reason: &str) -> Direction {
        log::info!("[L-BFGS] restarting LBFGS... [{reason}]");
        self.iteration = 1;
        self.pairs.clear();
        self.m_old = Some(model.clone());
        self.g_old = Some(gradient.clone());
        Direction::new(-apply_preconditioner(self.precond.as_ref(), gradient), true)
    }
}

impl DirectionAlgorithm for Lbfgs {
    fn compute(&mut self, model: &Array1<f64>, gradient: &Array1<f64>) -> Direction {
        self.iteration += 1;
        if self.iteration == 1 || self.g_old.is_none() {
            self.iteration = 1;
            self.update(model, gradient);
            return Direction::new(-apply_preconditioner(self.precond.as_ref(), gradient), false);
        }
        if self.iteration > self.max_iterations {
            return self.restart_from(model, gradient, "periodic restart");
        }

        self.update(model, gradient);
        let r = self.apply(gradient);
        let theta = angle(gradient, &r).to_degrees();
        if !(r.dot(gradient) > 0.0 && theta < 90.0) {
            return self.restart_from(model, gradient, "not a descent direction");
        }
        if theta > 90.0 - self.thresh {
            return self.restart_from(model, gradient, "practical safeguard");
        }
        Direction::new(-r, false)
    }

    fn restart(&mut self) {
        self.iteration = 0;
        self.pairs.clear();
        self.m_old = None;
        self.g_old = None;
    }

    fn name(&self) -> &'static str {
        "LBFGS"
    }
}
