//! Iterate bookkeeping: `{current, previous, trial}` slots for every tracked
//! quantity and the per-iteration line search history.

use ndarray::Array1;

use crate::OptimizeError;

/// Conventional names of the tracked quantities, used in error messages and
/// as keys when an optimizer is checkpointed to a [`crate::VectorStore`].
pub mod names {
    pub const M_NEW: &str = "m_new";
    pub const M_OLD: &str = "m_old";
    pub const M_TRY: &str = "m_try";
    pub const G_NEW: &str = "g_new";
    pub const G_OLD: &str = "g_old";
    pub const P_NEW: &str = "p_new";
    pub const P_OLD: &str = "p_old";
    pub const F_NEW: &str = "f_new";
    pub const F_OLD: &str = "f_old";
    pub const F_TRY: &str = "f_try";
    pub const S_NEW: &str = "s_new";
    pub const S_OLD: &str = "s_old";
    pub const ALPHA: &str = "alpha";
    pub const ITERATION: &str = "iteration";
    pub const RESTART: &str = "restart";
    pub const RESTART_COUNT: &str = "restart_count";
}

/// One tracked quantity across the current iterate, the previous
/// (committed) iterate, and the pending trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    current: Option<T>,
    previous: Option<T>,
    trial: Option<T>,
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Self {
            current: None,
            previous: None,
            trial: None,
        }
    }
}

impl<T> Tracked<T> {
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&T> {
        self.previous.as_ref()
    }

    pub fn trial(&self) -> Option<&T> {
        self.trial.as_ref()
    }

    pub fn set_current(&mut self, value: T) {
        self.current = Some(value);
    }

    pub fn set_previous(&mut self, value: T) {
        self.previous = Some(value);
    }

    pub fn set_trial(&mut self, value: T) {
        self.trial = Some(value);
    }

    pub fn clear_trial(&mut self) {
        self.trial = None;
    }

    /// Drops the trial and moves `current` into `previous`, discarding the
    /// old previous value. `current` is left empty.
    pub fn rotate(&mut self) {
        self.trial = None;
        self.previous = self.current.take();
    }

    /// [`Tracked::rotate`] followed by installing `next` as the current value.
    pub fn commit(&mut self, next: T) {
        self.rotate();
        self.current = Some(next);
    }
}

/// Returns the value or a configuration error naming it.
pub(crate) fn require<'a, T>(value: Option<&'a T>, name: &str) -> Result<&'a T, OptimizeError> {
    value.ok_or_else(|| OptimizeError::Configuration {
        name: name.to_string(),
    })
}

/// Every quantity the optimizer carries between calls.
#[derive(Debug, Clone, Default)]
pub struct Iterate {
    pub model: Tracked<Array1<f64>>,
    pub gradient: Tracked<Array1<f64>>,
    pub direction: Tracked<Array1<f64>>,
    pub slope: Tracked<f64>,
    pub objective: Tracked<f64>,
    /// Current trial step length; after a committed search, the accepted one.
    pub alpha: Option<f64>,
}

impl Iterate {
    /// Commits an accepted step: the model advances to `model`, the objective
    /// to `objective`, and gradient, direction and slope move to their
    /// previous slots awaiting the next iteration.
    pub fn commit(&mut self, model: Array1<f64>, objective: f64, step_length: f64) {
        self.model.commit(model);
        self.objective.commit(objective);
        self.gradient.rotate();
        self.direction.rotate();
        self.slope.rotate();
        self.alpha = Some(step_length);
    }
}

/// Chronological record of `(step_length, objective)` trials for one line
/// search. Entry 0 is always the baseline `(0, f_new)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSearchHistory {
    entries: Vec<(f64, f64)>,
}

impl LineSearchHistory {
    pub fn new(baseline_objective: f64) -> Self {
        Self {
            entries: vec![(0.0, baseline_objective)],
        }
    }

    pub fn push(&mut self, step_length: f64, objective: f64) {
        self.entries.push((step_length, objective));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the baseline entry cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn baseline(&self) -> (f64, f64) {
        self.entries[0]
    }

    /// Trials in the order they were attempted.
    pub fn chronological(&self) -> &[(f64, f64)] {
        &self.entries
    }

    /// Trials ordered by `|step_length|`; equal magnitudes keep their
    /// insertion order.
    pub fn sorted(&self) -> Vec<(f64, f64)> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| a.0.abs().total_cmp(&b.0.abs()));
        sorted
    }

    pub fn step_lengths(&self, sort: bool) -> Vec<f64> {
        if sort {
            self.sorted().into_iter().map(|(x, _)| x).collect()
        } else {
            self.entries.iter().map(|(x, _)| *x).collect()
        }
    }

    pub fn objectives(&self, sort: bool) -> Vec<f64> {
        if sort {
            self.sorted().into_iter().map(|(_, f)| f).collect()
        } else {
            self.entries.iter().map(|(_, f)| *f).collect()
        }
    }

    /// True when the most recent trial is strictly below every earlier one.
    pub fn latest_is_best(&self) -> bool {
        match self.entries.split_last() {
            Some((&(_, latest), earlier)) if !earlier.is_empty() => {
                earlier.iter().all(|&(_, f)| latest < f)
            }
            _ => false,
        }
    }

    /// Lowest-objective entry of the sorted view; the first one wins a tie.
    pub fn best(&self) -> (f64, f64) {
        let sorted = self.sorted();
        let mut best = sorted[0];
        for &(x, f) in &sorted[1..] {
            if f < best.1 {
                best = (x, f);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::{Iterate, LineSearchHistory, Tracked};
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_commit_rotates_current_into_previous() {
        let mut slot = Tracked::default();
        slot.set_current(1.0);
        slot.set_trial(3.0);
        slot.commit(2.0);
        assert_eq!(slot.current(), Some(&2.0));
        assert_eq!(slot.previous(), Some(&1.0));
        assert!(slot.trial().is_none());
    }

    #[test]
    fn test_rotate_leaves_current_empty() {
        let mut slot = Tracked::default();
        slot.set_previous(0.5);
        slot.set_current(1.5);
        slot.rotate();
        assert!(slot.current().is_none());
        assert_eq!(slot.previous(), Some(&1.5));
    }

    #[test]
    fn test_iterate_commit_moves_every_quantity() {
        let mut iterate = Iterate::default();
        iterate.model.set_current(array![1.0, 2.0]);
        iterate.gradient.set_current(array![0.5, 0.5]);
        iterate.direction.set_current(array![-0.5, -0.5]);
        iterate.slope.set_current(-0.5);
        iterate.objective.set_current(4.0);
        iterate.commit(array![0.9, 1.9], 3.0, 0.2);

        assert_eq!(iterate.model.current(), Some(&array![0.9, 1.9]));
        assert_eq!(iterate.model.previous(), Some(&array![1.0, 2.0]));
        assert_eq!(iterate.objective.current(), Some(&3.0));
        assert_eq!(iterate.objective.previous(), Some(&4.0));
        assert!(iterate.gradient.current().is_none());
        assert_eq!(iterate.gradient.previous(), Some(&array![0.5, 0.5]));
        assert!(iterate.direction.current().is_none());
        assert_eq!(iterate.slope.previous(), Some(&-0.5));
        assert_eq!(iterate.alpha, Some(0.2));
    }

    #[test]
    fn test_sorted_view_orders_by_magnitude_and_keeps_ties_stable() {
        let mut history = LineSearchHistory::new(10.0);
        history.push(0.4, 7.0);
        history.push(-0.1, 9.0);
        history.push(0.1, 8.0);
        history.push(0.2, 6.0);

        assert_eq!(history.step_lengths(true), vec![0.0, -0.1, 0.1, 0.2, 0.4]);
        assert_eq!(history.objectives(true), vec![10.0, 9.0, 8.0, 6.0, 7.0]);
        assert_eq!(history.step_lengths(false), vec![0.0, 0.4, -0.1, 0.1, 0.2]);
    }

    #[test]
    fn test_latest_is_best_requires_strict_improvement() {
        let mut history = LineSearchHistory::new(10.0);
        assert!(!history.latest_is_best());
        history.push(1.0, 10.0);
        assert!(!history.latest_is_best());
        history.push(0.5, 9.0);
        assert!(history.latest_is_best());
        history.push(0.25, 9.5);
        assert!(!history.latest_is_best());
    }

    #[test]
    fn test_best_includes_baseline() {
        let mut history = LineSearchHistory::new(1.0);
        history.push(0.3, 2.0);
        history.push(0.6, 3.0);
        assert_eq!(history.best(), (0.0, 1.0));
        assert_that!(&history.len()).is_equal_to(3);
    }
}
