//! Simulated annealing with a Cauchy visiting distribution.
//!
//! Candidates are drawn around the current point with heavy-tailed Cauchy
//! steps scaled to each parameter's range and projected back into the box.
//! Worse candidates are accepted with the Metropolis probability
//! `exp(-Δ / (T·|f|))`, so the temperature is measured relative to the current
//! cost and the schedule does not depend on the objective's magnitude.

use log::debug;
use ndarray::Array1;
use rand::Rng;
use rand_distr::{Cauchy, Distribution};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::fitting::PENALTY_COST;
use crate::global_opt::{calculate_cost, GlobalOptResult};
use crate::lm::LevenbergMarquardt;
use crate::parameters::BoundsSet;
use crate::problem::Problem;

/// Simulated annealing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedAnnealing {
    /// Initial temperature, relative to the current cost
    pub initial_temp: f64,

    /// Geometric cooling factor per iteration
    pub cooling_rate: f64,

    /// Cauchy scale as a fraction of each parameter's range
    pub step_size: f64,

    /// Maximum number of annealing iterations
    pub max_iterations: usize,

    /// Stop after this many iterations without a new best point
    pub max_no_improvement: usize,

    /// Evaluation budget; running into it counts as failure
    pub max_func_evals: usize,

    /// Costs at this value (to within a relative 1e-9) or above mark points
    /// the objective could not evaluate
    pub infeasible_cost: f64,

    /// Run the bounded local solver from the best point
    pub polish: bool,
}

impl Default for SimulatedAnnealing {
    fn default() -> Self {
        Self {
            initial_temp: 1.0,
            cooling_rate: 0.95,
            step_size: 0.1,
            max_iterations: 1000,
            max_no_improvement: 200,
            max_func_evals: 10_000,
            infeasible_cost: PENALTY_COST,
            polish: true,
        }
    }
}

impl SimulatedAnnealing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an optimizer with a custom schedule.
    pub fn with_params(initial_temp: f64, cooling_rate: f64, step_size: f64) -> Self {
        Self {
            initial_temp,
            cooling_rate,
            step_size,
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_func_evals(mut self, max_func_evals: usize) -> Self {
        self.max_func_evals = max_func_evals;
        self
    }

    pub fn with_polish(mut self, polish: bool) -> Self {
        self.polish = polish;
        self
    }

    /// Whether `cost` belongs to a point the objective could evaluate.
    ///
    /// A penalty spread evenly over m residuals sums back to the penalty only
    /// up to rounding, so the comparison leaves a relative margin.
    pub fn is_feasible(&self, cost: f64) -> bool {
        cost.is_finite() && cost < self.infeasible_cost * (1.0 - 1e-9)
    }

    /// Anneal from `initial_params` inside `bounds`, then polish with `local`.
    ///
    /// # Errors
    ///
    /// * `DimensionMismatch` if the start does not match the bounds
    /// * any error raised by the problem's evaluation
    pub fn optimize_with_rng<P: Problem, R: Rng + ?Sized>(
        &self,
        problem: &P,
        initial_params: &Array1<f64>,
        bounds: &BoundsSet,
        local: &LevenbergMarquardt,
        rng: &mut R,
    ) -> Result<GlobalOptResult> {
        if initial_params.len() != bounds.len() {
            return Err(ForecastError::DimensionMismatch(format!(
                "expected {} bounds for parameters, got {}",
                initial_params.len(),
                bounds.len()
            )));
        }

        let mut current = bounds.project(initial_params);
        let mut current_cost = calculate_cost(problem, &current)?;
        let mut best = current.clone();
        let mut best_cost = current_cost;

        let mut temperature = self.initial_temp;
        let mut iterations = 0;
        let mut no_improvement = 0;
        let mut func_evals = 1;

        while iterations < self.max_iterations
            && no_improvement < self.max_no_improvement
            && func_evals < self.max_func_evals
        {
            let candidate = self.visit(&current, bounds, rng);
            let candidate_cost = calculate_cost(problem, &candidate)?;
            func_evals += 1;

            let cost_diff = candidate_cost - current_cost;
            let accept = if cost_diff <= 0.0 {
                true
            } else if temperature > 0.0 && candidate_cost.is_finite() {
                let scale = current_cost.abs().max(f64::MIN_POSITIVE);
                rng.gen::<f64>() < (-cost_diff / (temperature * scale)).exp()
            } else {
                false
            };

            if accept {
                current = candidate;
                current_cost = candidate_cost;
            }

            if current_cost < best_cost {
                best = current.clone();
                best_cost = current_cost;
                no_improvement = 0;
            } else {
                no_improvement += 1;
            }

            temperature *= self.cooling_rate;
            iterations += 1;
        }

        let budget_exhausted = func_evals >= self.max_func_evals;
        let feasible = self.is_feasible(best_cost);
        debug!(
            "annealing finished after {} iterations ({} evaluations), best cost {:.6e}",
            iterations, func_evals, best_cost
        );

        let local_result = if self.polish && feasible {
            let polished = local.minimize(problem, best.clone(), bounds)?;
            func_evals += polished.func_evals;
            if polished.cost < best_cost {
                best = polished.params.clone();
                best_cost = polished.cost;
            }
            Some(polished)
        } else {
            None
        };

        let (success, message) = if budget_exhausted {
            (
                false,
                format!("Evaluation budget of {} exhausted", self.max_func_evals),
            )
        } else if !feasible {
            (false, "No candidate could be evaluated".to_string())
        } else if no_improvement >= self.max_no_improvement {
            (
                true,
                format!(
                    "Stopped after {} iterations without improvement",
                    self.max_no_improvement
                ),
            )
        } else {
            (
                true,
                format!("Reached maximum number of iterations: {}", self.max_iterations),
            )
        };

        Ok(GlobalOptResult {
            params: best,
            cost: best_cost,
            iterations,
            func_evals,
            success,
            message,
            local_result,
        })
    }

    /// Cauchy step around `solution`, projected onto the box.
    fn visit<R: Rng + ?Sized>(
        &self,
        solution: &Array1<f64>,
        bounds: &BoundsSet,
        rng: &mut R,
    ) -> Array1<f64> {
        let mut candidate = solution.clone();

        for (i, b) in bounds.iter().enumerate() {
            let range = if b.width().is_finite() { b.width() } else { 10.0 };
            let scale = range * self.step_size;
            // Cauchy::new rejects a zero scale; pinned parameters stay put.
            if let Ok(cauchy) = Cauchy::new(0.0, scale) {
                candidate[i] += cauchy.sample(rng);
            }
        }

        bounds.project(&candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Bounds;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Two residuals whose cost is flat far from x = 3 and vanishes there.
    struct DoubleWell;

    impl Problem for DoubleWell {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            let x = p[0];
            Ok(array![(x - 3.0) * (x + 2.0) * 0.1, 0.3 * (x - 3.0)])
        }

        fn parameter_count(&self) -> usize {
            1
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    /// Every point is unintegrable: the residuals are the objective's penalty
    /// spread over 26 entries, whose squares sum to just under 1e12.
    struct Unintegrable;

    impl Problem for Unintegrable {
        fn eval(&self, _p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(Array1::from_elem(26, (PENALTY_COST / 26.0).sqrt()))
        }

        fn parameter_count(&self) -> usize {
            1
        }

        fn residual_count(&self) -> usize {
            26
        }
    }

    fn bounds() -> BoundsSet {
        BoundsSet::new(vec![Bounds::from((-10.0, 10.0))]).unwrap()
    }

    #[test]
    fn test_finds_global_well() {
        let mut rng = StdRng::seed_from_u64(11);
        let result = SimulatedAnnealing::new()
            .optimize_with_rng(&DoubleWell, &array![-2.0], &bounds(), &LevenbergMarquardt::new(), &mut rng)
            .unwrap();
        assert!(result.success, "{}", result);
        assert!((result.params[0] - 3.0).abs() < 1e-3, "{}", result);
        assert!(result.local_result.is_some());
    }

    #[test]
    fn test_budget_exhaustion_is_failure() {
        let mut rng = StdRng::seed_from_u64(3);
        let result = SimulatedAnnealing::new()
            .with_max_func_evals(5)
            .optimize_with_rng(&DoubleWell, &array![0.0], &bounds(), &LevenbergMarquardt::new(), &mut rng)
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("budget"));
    }

    #[test]
    fn test_all_candidates_infeasible_is_failure() {
        let mut rng = StdRng::seed_from_u64(17);
        let result = SimulatedAnnealing::with_params(2.0, 0.9, 0.2)
            .with_max_iterations(40)
            .optimize_with_rng(&Unintegrable, &array![1.0], &bounds(), &LevenbergMarquardt::new(), &mut rng)
            .unwrap();
        assert!(!result.success, "{}", result);
        assert!(result.local_result.is_none());
        assert_eq!(result.func_evals, 41);
    }

    #[test]
    fn test_feasibility_margin() {
        let sa = SimulatedAnnealing::new();
        let spread: f64 = (0..26).map(|_| (PENALTY_COST / 26.0).sqrt().powi(2)).sum();
        assert!(!sa.is_feasible(spread));
        assert!(!sa.is_feasible(PENALTY_COST));
        assert!(!sa.is_feasible(f64::NAN));
        assert!(sa.is_feasible(PENALTY_COST * 0.99));
    }

    #[test]
    fn test_same_seed_same_result() {
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            SimulatedAnnealing::new()
                .with_polish(false)
                .optimize_with_rng(&DoubleWell, &array![-5.0], &bounds(), &LevenbergMarquardt::new(), &mut rng)
                .unwrap()
        };
        assert_eq!(run(42).params, run(42).params);
    }

    #[test]
    fn test_pinned_parameter_does_not_move() {
        let pinned = BoundsSet::new(vec![Bounds::from((1.5, 1.5))]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let result = SimulatedAnnealing::new()
            .with_max_iterations(50)
            .optimize_with_rng(&DoubleWell, &array![0.0], &pinned, &LevenbergMarquardt::new(), &mut rng)
            .unwrap();
        assert_eq!(result.params[0], 1.5);
    }

    #[test]
    fn test_settings_from_json() {
        let sa: SimulatedAnnealing = serde_json::from_str(r#"{"max_iterations": 50, "polish": false}"#).unwrap();
        assert_eq!(sa.max_iterations, 50);
        assert!(!sa.polish);
        assert_eq!(sa.cooling_rate, 0.95);
    }
}
