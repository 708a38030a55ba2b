//! Projected Levenberg-Marquardt iteration.
//!
//! Each trial step solves the damped normal equations `(J^T J + λI) δ = -J^T r`
//! and is then projected onto the parameter box, so every evaluated point
//! respects the bounds. Convergence on the gradient uses the projected gradient:
//! components pushing against an active bound do not count.

use faer::{Col, Mat};
use log::trace;
use ndarray::Array1;
use std::fmt;

use crate::error::{ForecastError, Result};
use crate::parameters::BoundsSet;
use crate::problem::Problem;
use crate::utils::matrix_convert::{faer_vec_to_ndarray, ndarray_to_faer, ndarray_vec_to_faer};

use super::config::{DampingStrategy, LmConfig};
use super::trust_region::TrustRegion;

/// Outcome of a bounded least-squares solve.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Final point, inside the bounds
    pub params: Array1<f64>,

    /// Weighted residuals at `params`
    pub residuals: Array1<f64>,

    /// `sum(residuals^2)`
    pub cost: f64,

    pub iterations: usize,
    pub func_evals: usize,

    /// A convergence test fired before the iteration cap
    pub success: bool,

    pub message: String,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cost {:.4e} after {} iterations / {} evaluations: {}",
            self.cost, self.iterations, self.func_evals, self.message
        )
    }
}

/// Status of the iteration.
enum IterationStatus {
    Continue,
    Converged(String),
    Failed(String),
}

/// Damping state for either schedule.
enum Damping {
    Multiplicative { lambda: f64 },
    GainRatio(TrustRegion),
}

impl Damping {
    fn lambda(&self) -> f64 {
        match self {
            Damping::Multiplicative { lambda } => *lambda,
            Damping::GainRatio(tr) => tr.lambda,
        }
    }
}

/// The bounded Levenberg-Marquardt optimizer.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl LevenbergMarquardt {
    /// Create an optimizer with default configuration.
    pub fn new() -> Self {
        Self {
            config: LmConfig::default(),
        }
    }

    /// Create an optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the damping schedule.
    pub fn with_damping(mut self, damping: DampingStrategy) -> Self {
        self.config.damping = damping;
        self
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Minimize the sum of squared residuals of `problem` inside `bounds`.
    ///
    /// The starting point is projected onto the box first.
    ///
    /// # Errors
    ///
    /// * `DimensionMismatch` if the start or the bounds do not match the problem
    /// * any error raised by the problem's own evaluation
    pub fn minimize<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        bounds: &BoundsSet,
    ) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params || bounds.len() != n_params {
            return Err(ForecastError::DimensionMismatch(format!(
                "expected {} parameters and bounds, got {} and {}",
                n_params,
                initial_params.len(),
                bounds.len()
            )));
        }

        let cfg = &self.config;
        let mut damping = match cfg.damping {
            DampingStrategy::Multiplicative => Damping::Multiplicative {
                lambda: cfg.initial_lambda,
            },
            DampingStrategy::GainRatio => Damping::GainRatio(TrustRegion::from_config(cfg)),
        };

        let mut params = bounds.project(&initial_params);
        let mut residuals = problem.eval(&params)?;
        let mut cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();
        let mut func_evals = 1;
        let mut iterations = 0;

        loop {
            if iterations >= cfg.max_iterations {
                return Ok(self.finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    IterationStatus::Failed(format!(
                        "Maximum iterations ({}) reached",
                        cfg.max_iterations
                    )),
                ));
            }

            let jac = problem.jacobian(&params, bounds, cfg.diff_step)?;
            func_evals += n_params;
            let j = ndarray_to_faer(&jac);
            let r = ndarray_vec_to_faer(&residuals);

            // g = J^T r, the half-gradient of the cost
            let g: Col<f64> = j.transpose() * &r;
            let jtj: Mat<f64> = j.transpose() * &j;

            let pg_norm = projected_gradient_norm(&g, &params, bounds);
            if pg_norm < cfg.gtol {
                return Ok(self.finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    IterationStatus::Converged(format!(
                        "Gradient convergence: ||g|| = {:.2e} < {:.2e}",
                        pg_norm, cfg.gtol
                    )),
                ));
            }

            // Inner loop: raise damping until a step is accepted.
            let status = loop {
                let lambda = damping.lambda();
                let delta = match solve_damped(&jtj, &g, lambda) {
                    Some(d) => faer_vec_to_ndarray(&d),
                    None => {
                        if !raise(&mut damping, cfg) {
                            break IterationStatus::Failed(
                                "Damped system singular and lambda reached maximum".to_string(),
                            );
                        }
                        continue;
                    }
                };

                let new_params = bounds.project(&(&params + &delta));
                let step = &new_params - &params;
                let step_norm = step.iter().map(|s| s * s).sum::<f64>().sqrt();
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();

                if step_norm <= cfg.xtol * (cfg.xtol + param_norm) {
                    break IterationStatus::Converged(format!(
                        "Parameter convergence: |dx| = {:.2e}",
                        step_norm
                    ));
                }

                let new_residuals = problem.eval(&new_params)?;
                func_evals += 1;
                let new_cost: f64 = new_residuals.iter().map(|r| r.powi(2)).sum();

                let accepted = match &mut damping {
                    Damping::Multiplicative { lambda } => {
                        if new_cost < cost {
                            *lambda = (*lambda * cfg.lambda_down_factor).max(cfg.min_lambda);
                            true
                        } else {
                            *lambda = (*lambda * cfg.lambda_up_factor).min(cfg.max_lambda);
                            false
                        }
                    }
                    Damping::GainRatio(tr) => {
                        let s = ndarray_vec_to_faer(&step);
                        let predicted = TrustRegion::predicted_reduction(&g, &jtj, &s);
                        let gain = TrustRegion::gain_ratio(cost, new_cost, predicted);
                        tr.update_lambda(gain) && new_cost <= cost
                    }
                };

                trace!(
                    "lm iteration {}: cost {:.6e} -> {:.6e}, lambda {:.1e}, accepted {}",
                    iterations,
                    cost,
                    new_cost,
                    lambda,
                    accepted
                );

                if accepted {
                    let cost_change = (cost - new_cost) / cost.max(1e-300);
                    params = new_params;
                    residuals = new_residuals;
                    cost = new_cost;
                    iterations += 1;

                    break if cost_change < cfg.ftol {
                        IterationStatus::Converged(format!(
                            "Cost convergence: |df|/|f| = {:.2e} < {:.2e}",
                            cost_change, cfg.ftol
                        ))
                    } else {
                        IterationStatus::Continue
                    };
                }

                let exhausted = match &damping {
                    Damping::Multiplicative { lambda } => *lambda >= cfg.max_lambda,
                    Damping::GainRatio(tr) => tr.exhausted(),
                };
                if exhausted {
                    break IterationStatus::Failed(
                        "Failed to decrease cost, and lambda reached maximum".to_string(),
                    );
                }
            };

            match status {
                IterationStatus::Continue => {}
                other => {
                    return Ok(self.finish(params, residuals, cost, iterations, func_evals, other));
                }
            }
        }
    }

    fn finish(
        &self,
        params: Array1<f64>,
        residuals: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        status: IterationStatus,
    ) -> LmResult {
        let (success, message) = match status {
            IterationStatus::Converged(m) => (true, m),
            IterationStatus::Failed(m) => (false, m),
            IterationStatus::Continue => (false, "Stopped".to_string()),
        };
        LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success,
            message,
        }
    }
}

/// Multiply lambda up; false once it cannot grow any further.
fn raise(damping: &mut Damping, cfg: &LmConfig) -> bool {
    match damping {
        Damping::Multiplicative { lambda } => {
            if *lambda >= cfg.max_lambda {
                return false;
            }
            *lambda = (*lambda * cfg.lambda_up_factor).min(cfg.max_lambda);
            true
        }
        Damping::GainRatio(tr) => {
            if tr.exhausted() {
                return false;
            }
            tr.update_lambda(0.0);
            true
        }
    }
}

/// Norm of the gradient after zeroing components blocked by an active bound.
fn projected_gradient_norm(g: &Col<f64>, params: &Array1<f64>, bounds: &BoundsSet) -> f64 {
    bounds
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let gi = g[i];
            // Descent moves along -g.
            let blocked = (gi > 0.0 && params[i] <= b.min) || (gi < 0.0 && params[i] >= b.max);
            if blocked {
                0.0
            } else {
                gi * gi
            }
        })
        .sum::<f64>()
        .sqrt()
}

/// Solve `(J^T J + λI) δ = -g` by Cholesky. `None` if the matrix is not
/// positive definite.
fn solve_damped(jtj: &Mat<f64>, g: &Col<f64>, lambda: f64) -> Option<Col<f64>> {
    let n = jtj.nrows();
    let mut l = Mat::from_fn(n, n, |i, j| {
        if i == j {
            jtj[(i, j)] + lambda
        } else {
            jtj[(i, j)]
        }
    });

    for k in 0..n {
        let mut diag = l[(k, k)];
        for j in 0..k {
            diag -= l[(k, j)] * l[(k, j)];
        }
        if !(diag > 0.0) {
            return None;
        }
        let diag = diag.sqrt();
        l[(k, k)] = diag;

        for i in k + 1..n {
            let mut v = l[(i, k)];
            for j in 0..k {
                v -= l[(i, j)] * l[(k, j)];
            }
            l[(i, k)] = v / diag;
        }
    }

    // L y = -g
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut v = -g[i];
        for j in 0..i {
            v -= l[(i, j)] * y[j];
        }
        y[i] = v / l[(i, i)];
    }

    // L^T x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut v = y[i];
        for j in i + 1..n {
            v -= l[(j, i)] * x[j];
        }
        x[i] = v / l[(i, i)];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(Col::from_fn(n, |i| x[i]))
    } else {
        None
    }
}
