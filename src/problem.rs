//! Least-squares problem definition.
//!
//! The fitting engine and the optimizers meet at the [`Problem`] trait: a
//! problem turns a parameter vector into a residual vector, and the solvers
//! only ever look at residuals and their Jacobian.

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::parameters::BoundsSet;

/// A nonlinear least-squares problem.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Number of parameters.
    fn parameter_count(&self) -> usize;

    /// Number of residuals.
    fn residual_count(&self) -> usize;

    /// Jacobian of the residuals at `params`.
    ///
    /// The default uses forward differences that step away from the nearest
    /// bound, so every evaluation stays inside `bounds`.
    fn jacobian(&self, params: &Array1<f64>, bounds: &BoundsSet, step: f64) -> Result<Array2<f64>>
    where
        Self: Sized,
    {
        crate::utils::finite_difference::jacobian(self, params, bounds, step)
    }

    /// Sum of squared residuals.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;
    use crate::parameters::Bounds;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// y = a * exp(-b * t)
    struct Decay {
        t: Array1<f64>,
        y: Array1<f64>,
    }

    impl Problem for Decay {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            if params.len() != 2 {
                return Err(ForecastError::DimensionMismatch(format!(
                    "expected 2 parameters, got {}",
                    params.len()
                )));
            }
            Ok(Array1::from_iter(
                self.t
                    .iter()
                    .zip(self.y.iter())
                    .map(|(t, y)| params[0] * (-params[1] * t).exp() - y),
            ))
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.t.len()
        }
    }

    fn decay() -> Decay {
        let t = array![0.0, 1.0, 2.0, 3.0];
        let y = t.mapv(|t: f64| 4.0 * (-0.5 * t).exp());
        Decay { t, y }
    }

    #[test]
    fn test_eval_cost() {
        let problem = decay();
        assert_relative_eq!(problem.eval_cost(&array![4.0, 0.5]).unwrap(), 0.0, epsilon = 1e-20);
        // Shifting the amplitude by one moves every residual by exp(-0.5 t).
        let expected: f64 = problem.t.iter().map(|t| (-*t).exp()).sum();
        assert_relative_eq!(problem.eval_cost(&array![5.0, 0.5]).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_default_jacobian_matches_analytic() {
        let problem = decay();
        let bounds = BoundsSet::new(vec![Bounds::from((0.0, 10.0)), Bounds::from((0.0, 2.0))]).unwrap();
        let p = array![3.0, 0.4];
        let jac = problem.jacobian(&p, &bounds, 1e-7).unwrap();
        for (i, &t) in problem.t.iter().enumerate() {
            assert_relative_eq!(jac[[i, 0]], (-0.4 * t).exp(), epsilon = 1e-5);
            assert_relative_eq!(jac[[i, 1]], -3.0 * t * (-0.4 * t).exp(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(decay().eval(&array![1.0]).is_err());
    }
}
