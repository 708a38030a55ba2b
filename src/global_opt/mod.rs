//! Global search.
//!
//! The global back-end explores the whole parameter box with a stochastic
//! search and hands its best point to the bounded local solver for a final
//! polish. Unlike the local back-ends it reports whether the search actually
//! succeeded, and callers drop the result when it did not.

use ndarray::Array1;
use std::fmt;

use crate::error::Result;
use crate::lm::LmResult;
use crate::problem::Problem;

mod simulated_annealing;

pub use simulated_annealing::SimulatedAnnealing;

/// Outcome of an annealing run, after the optional polish.
#[derive(Debug, Clone)]
pub struct GlobalOptResult {
    pub params: Array1<f64>,

    /// Lowest cost seen, polish included
    pub cost: f64,

    pub iterations: usize,

    /// Objective evaluations across the search and the polish
    pub func_evals: usize,

    /// A feasible point was found before the evaluation budget ran out
    pub success: bool,

    pub message: String,

    /// The polish step's own result, when polishing is enabled
    pub local_result: Option<LmResult>,
}

impl fmt::Display for GlobalOptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "annealing {} after {} iterations / {} evaluations, cost {:.4e} ({})",
            if self.success { "succeeded" } else { "failed" },
            self.iterations,
            self.func_evals,
            self.cost,
            self.message
        )?;
        if let Some(polish) = &self.local_result {
            write!(f, "; polish cost {:.4e} in {} iterations", polish.cost, polish.iterations)?;
        }
        Ok(())
    }
}

/// Sum of squared residuals at `point`.
fn calculate_cost<P: Problem>(problem: &P, point: &Array1<f64>) -> Result<f64> {
    let residuals = problem.eval(point)?;
    Ok(residuals.iter().map(|r| r.powi(2)).sum())
}
