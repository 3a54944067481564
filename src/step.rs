//! Step-length rules.
//!
//! Everything here is a pure function of the line search history (as
//! `|step|`-sorted slices `x`, `f` with the baseline at index 0) and a few
//! scalars, so each rule can be tested without an optimizer.

use crate::OptimizeError;

/// Lower safeguard of the backtracking rule: never shrink below `b1 * x`.
pub const BACKTRACK_B1: f64 = 0.1;
/// Upper safeguard of the backtracking rule: always shrink to at most `b2 * x`.
pub const BACKTRACK_B2: f64 = 0.5;

/// Some non-baseline trial beat the baseline.
pub fn improved(f: &[f64]) -> bool {
    f.iter().skip(1).any(|&v| v < f[0])
}

/// Some non-baseline trial matched or beat the baseline.
pub fn improved_or_equal(f: &[f64]) -> bool {
    f.iter().skip(1).any(|&v| v <= f[0])
}

/// The longest trial is worse than the one before it.
pub fn rising_tail(f: &[f64]) -> bool {
    match f {
        [.., before, last] => before < last,
        _ => false,
    }
}

/// A minimum lies between the baseline and the longest trial.
pub fn bracket_closed(f: &[f64]) -> bool {
    improved(f) && rising_tail(f)
}

/// Linear schedule of the fixed step control.
pub fn fixed_step(p_ratio: f64, step_count: usize, step_init: f64) -> f64 {
    p_ratio * (step_count + 1) as f64 * step_init
}

/// Secant-style initial step: assumes the curvature seen along the previous
/// direction still holds, `2 * (s_new / s_old) * alpha_prev`.
pub fn initial_step_from_slopes(s_new: f64, s_old: f64, alpha_prev: f64) -> f64 {
    2.0 * (s_new / s_old) * alpha_prev
}

/// Next trial of the bracketing step control.
///
/// Once the minimum is bracketed the next step is the vertex of a parabola
/// fitted around the best trial. Otherwise the last step `alpha` is expanded
/// by `1 / step_factor` if anything has matched the baseline so far, and
/// contracted by `step_factor` if not.
pub fn bracket_step(
    x: &[f64],
    f: &[f64],
    alpha: f64,
    step_factor: f64,
) -> Result<f64, OptimizeError> {
    if bracket_closed(f) {
        quadratic_fit_minimum(x, f)
    } else if improved_or_equal(f) {
        Ok(alpha / step_factor)
    } else {
        Ok(alpha * step_factor)
    }
}

/// Vertex of the parabola through the best trial and its two neighbours in
/// the sorted history.
///
/// Fails with [`OptimizeError::DegenerateFit`] when the best trial has no
/// neighbour on either side, when step lengths coincide, or when the
/// parabola is not convex enough to have a finite minimum.
pub fn quadratic_fit_minimum(x: &[f64], f: &[f64]) -> Result<f64, OptimizeError> {
    if x.len() != f.len() || x.len() < 3 {
        return Err(OptimizeError::DegenerateFit {
            reason: "fewer than three trials",
            value: x.len() as f64,
        });
    }
    let mut i = 0;
    for (j, &v) in f.iter().enumerate() {
        if v < f[i] {
            i = j;
        }
    }
    if i == 0 || i + 1 >= f.len() {
        return Err(OptimizeError::DegenerateFit {
            reason: "best trial is not interior",
            value: x[i],
        });
    }

    let (x0, x1, x2) = (x[i - 1], x[i], x[i + 1]);
    let (f0, f1, f2) = (f[i - 1], f[i], f[i + 1]);
    let span = (x2 - x0).abs();
    let spacing_floor = f64::EPSILON * x0.abs().max(x1.abs()).max(x2.abs());
    if (x1 - x0).abs() <= spacing_floor || (x2 - x1).abs() <= spacing_floor || span <= spacing_floor
    {
        return Err(OptimizeError::DegenerateFit {
            reason: "coincident step lengths",
            value: span,
        });
    }

    // Newton divided differences: f = f0 + d1 (t - x0) + a (t - x0)(t - x1).
    let d1 = (f1 - f0) / (x1 - x0);
    let d2 = (f2 - f1) / (x2 - x1);
    let a = (d2 - d1) / (x2 - x0);
    let curvature_floor = f64::EPSILON * (d1.abs() + d2.abs()) / span;
    if !(a > curvature_floor) {
        return Err(OptimizeError::DegenerateFit {
            reason: "non-positive curvature",
            value: a,
        });
    }
    let b = d1 - a * (x0 + x1);
    let vertex = -b / (2.0 * a);
    if !vertex.is_finite() {
        return Err(OptimizeError::DegenerateFit {
            reason: "non-finite vertex",
            value: vertex,
        });
    }
    Ok(vertex)
}

/// Safeguarded quadratic backtrack.
///
/// Fits `phi(t) = f0 + g0 t + c t²` through the baseline value `f0`, the
/// initial slope `g0`, and the trial `(x1, f1)`, and returns its minimizer
/// clamped to `[b1 * x1, b2 * x1]`.
pub fn backtrack(f0: f64, g0: f64, x1: f64, f1: f64, b1: f64, b2: f64) -> Result<f64, OptimizeError> {
    let denominator = 2.0 * (f1 - f0 - g0 * x1);
    let x2 = -g0 * x1 * x1 / denominator;
    if x2.is_nan() {
        return Err(OptimizeError::DegenerateFit {
            reason: "backtracking parabola is undefined",
            value: denominator,
        });
    }
    if x2 > b2 * x1 {
        Ok(b2 * x1)
    } else if x2 < b1 * x1 {
        Ok(b1 * x1)
    } else {
        Ok(x2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn test_predicates_on_sorted_history() {
        assert!(improved(&[10.0, 12.0, 8.0]));
        assert!(!improved(&[10.0, 12.0, 10.0]));
        assert!(improved_or_equal(&[10.0, 12.0, 10.0]));
        assert!(rising_tail(&[10.0, 8.0, 9.0]));
        assert!(!rising_tail(&[10.0]));
        assert!(bracket_closed(&[10.0, 8.0, 9.0]));
        assert!(!bracket_closed(&[10.0, 11.0, 12.0]));
    }

    #[test]
    fn test_fixed_schedule_is_linear() {
        assert_that!(&fixed_step(2.0, 0, 0.05)).is_close_to(0.1, 1e-15);
        assert_that!(&fixed_step(2.0, 3, 0.05)).is_close_to(0.4, 1e-15);
    }

    #[test]
    fn test_initial_step_from_slopes() {
        assert_that!(&initial_step_from_slopes(-2.0, -4.0, 0.3)).is_close_to(0.3, 1e-15);
    }

    #[test]
    fn test_quadratic_fit_recovers_exact_parabola() {
        // f(t) = (t - 0.5)^2 + 1 sampled around the minimum.
        let x = [0.0, 0.2, 0.4, 0.8];
        let f: Vec<f64> = x.iter().map(|t| (t - 0.5) * (t - 0.5) + 1.0).collect();
        let vertex = quadratic_fit_minimum(&x, &f).unwrap();
        assert_that!(&vertex).is_close_to(0.5, 1e-12);
    }

    #[test]
    fn test_quadratic_fit_uses_points_around_best() {
        // The fit runs through x = 1, 2, 4; the first point is far off the parabola.
        let x = [0.0, 1.0, 2.0, 4.0, 8.0];
        let f = [50.0, 40.0, 1.0, 1.0, 26.0];
        let vertex = quadratic_fit_minimum(&x, &f).unwrap();
        assert_that!(&vertex).is_close_to(3.0, 1e-12);
    }

    #[test]
    fn test_quadratic_fit_rejects_infinite_neighbour() {
        let x = [0.0, 1.0, 2.0];
        let f = [f64::INFINITY, 1.0, 2.0];
        assert!(matches!(
            quadratic_fit_minimum(&x, &f),
            Err(OptimizeError::DegenerateFit { .. })
        ));
    }

    #[test]
    fn test_quadratic_fit_rejects_coincident_steps() {
        let x = [0.0, 0.5, 0.5, 1.0];
        let f = [2.0, 1.5, 1.0, 3.0];
        assert!(matches!(
            quadratic_fit_minimum(&x, &f),
            Err(OptimizeError::DegenerateFit { .. })
        ));
    }

    #[test]
    fn test_quadratic_fit_rejects_boundary_minimum() {
        let x = [0.0, 1.0, 2.0];
        let f = [1.0, 2.0, 3.0];
        assert!(matches!(
            quadratic_fit_minimum(&x, &f),
            Err(OptimizeError::DegenerateFit { .. })
        ));
    }

    #[test]
    fn test_bracket_step_expands_contracts_and_fits() {
        // Improvement without a bracket: expand.
        let step = bracket_step(&[0.0, 0.1], &[10.0, 9.0], 0.1, 0.5).unwrap();
        assert_that!(&step).is_close_to(0.2, 1e-15);
        // Tie with the baseline still counts for expansion.
        let step = bracket_step(&[0.0, 0.1], &[10.0, 10.0], 0.1, 0.5).unwrap();
        assert_that!(&step).is_close_to(0.2, 1e-15);
        // No improvement: contract.
        let step = bracket_step(&[0.0, 0.1], &[10.0, 11.0], 0.1, 0.5).unwrap();
        assert_that!(&step).is_close_to(0.05, 1e-15);
        // Bracketed: parabola vertex.
        let x = [0.0, 0.2, 0.4, 0.8];
        let f = [25.0, 9.0, 1.0, 9.0];
        let step = bracket_step(&x, &f, 0.8, 0.5).unwrap();
        assert_that!(&step).is_close_to(0.5, 1e-12);
    }

    #[test]
    fn test_backtrack_reference_value() {
        // f0 = 10, slope -8, f(1) = 12  =>  8 / (2 * 10) = 0.4
        let step = backtrack(10.0, -8.0, 1.0, 12.0, BACKTRACK_B1, BACKTRACK_B2).unwrap();
        assert_that!(&step).is_close_to(0.4, 1e-15);
    }

    #[test]
    fn test_backtrack_ratio_is_clamped_to_safeguards() {
        // Tiny slope: the parabola minimizer is far below b1 * x.
        let step = backtrack(10.0, -1e-6, 1.0, 100.0, BACKTRACK_B1, BACKTRACK_B2).unwrap();
        assert_that!(&step).is_close_to(0.1, 1e-15);
        // Nearly linear: minimizer far beyond b2 * x.
        let step = backtrack(10.0, -8.0, 1.0, 2.0 + 1e-9, BACKTRACK_B1, BACKTRACK_B2).unwrap();
        assert_that!(&step).is_close_to(0.5, 1e-15);
        // Better than linear prediction (negative curvature): lower safeguard.
        let step = backtrack(10.0, -1.0, 1.0, 5.0, BACKTRACK_B1, BACKTRACK_B2).unwrap();
        assert_that!(&step).is_close_to(0.1, 1e-15);
    }

    #[test]
    fn test_backtrack_undefined_parabola_is_degenerate() {
        assert!(matches!(
            backtrack(10.0, 0.0, 1.0, 10.0, BACKTRACK_B1, BACKTRACK_B2),
            Err(OptimizeError::DegenerateFit { .. })
        ));
    }
}
