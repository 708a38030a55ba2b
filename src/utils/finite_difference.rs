//! Finite-difference Jacobians that respect parameter bounds.

use ndarray::{Array1, Array2};

use crate::error::{ForecastError, Result};
use crate::parameters::BoundsSet;
use crate::problem::Problem;

/// Step for parameter `x` with relative size `rel` inside `[min, max]`.
///
/// The step points forward unless that would leave the box, in which case it
/// points backward. A degenerate interval gives a zero step.
pub fn bounded_step(x: f64, min: f64, max: f64, rel: f64) -> f64 {
    let h = rel * x.abs().max(1.0);
    if x + h <= max {
        h
    } else if x - h >= min {
        -h
    } else if max - x >= x - min {
        max - x
    } else {
        min - x
    }
}

/// Jacobian of `problem` at `params` by one-sided differences.
///
/// Columns for parameters pinned to a zero-width interval are left at zero.
pub fn jacobian(
    problem: &dyn Problem,
    params: &Array1<f64>,
    bounds: &BoundsSet,
    rel_step: f64,
) -> Result<Array2<f64>> {
    let n_params = params.len();
    if bounds.len() != n_params {
        return Err(ForecastError::DimensionMismatch(format!(
            "{} bounds for {} parameters",
            bounds.len(),
            n_params
        )));
    }

    let residuals = problem.eval(params)?;
    let n_residuals = residuals.len();
    if n_residuals != problem.residual_count() {
        return Err(ForecastError::DimensionMismatch(format!(
            "expected {} residuals, got {}",
            problem.residual_count(),
            n_residuals
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));
    for (j, b) in bounds.iter().enumerate() {
        let h = bounded_step(params[j], b.min, b.max, rel_step);
        if h == 0.0 {
            continue;
        }

        let mut shifted = params.clone();
        shifted[j] += h;
        let perturbed = problem.eval(&shifted)?;
        for i in 0..n_residuals {
            jac[[i, j]] = (perturbed[i] - residuals[i]) / h;
        }
    }

    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Bounds;
    use approx::assert_relative_eq;
    use ndarray::array;

    struct Quadratic;

    impl Problem for Quadratic {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![p[0] * p[0], p[0] * p[1], 3.0 * p[1]])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            3
        }
    }

    #[test]
    fn test_step_direction() {
        assert!(bounded_step(0.5, 0.0, 1.0, 1e-6) > 0.0);
        assert!(bounded_step(1.0, 0.0, 1.0, 1e-6) < 0.0);
        assert_eq!(bounded_step(2.0, 2.0, 2.0, 1e-6), 0.0);
        // Interval narrower than the step: move to the far end.
        assert_relative_eq!(bounded_step(1.0, 1.0, 1.0 + 1e-9, 1e-6), 1e-9, epsilon = 1e-15);
    }

    #[test]
    fn test_jacobian_stays_in_box() {
        let bounds = BoundsSet::new(vec![Bounds::from((0.0, 2.0)), Bounds::from((1.0, 1.0))]).unwrap();
        // p[0] sits on its upper bound and p[1] is pinned.
        let jac = jacobian(&Quadratic, &array![2.0, 1.0], &bounds, 1e-7).unwrap();
        assert_relative_eq!(jac[[0, 0]], 4.0, epsilon = 1e-5);
        assert_relative_eq!(jac[[1, 0]], 1.0, epsilon = 1e-5);
        assert_eq!(jac[[2, 1]], 0.0);
    }

    #[test]
    fn test_bounds_length_mismatch() {
        let bounds = BoundsSet::new(vec![Bounds::from((0.0, 2.0))]).unwrap();
        assert!(jacobian(&Quadratic, &array![1.0, 1.0], &bounds, 1e-7).is_err());
    }
}
