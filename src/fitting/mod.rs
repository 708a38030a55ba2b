//! Fitting engine: runs the selected back-end against a region's objective.
//!
//! Local back-ends always return their best iterate. The global back-end must
//! report success; otherwise the fit is rejected with
//! [`ForecastError::OptimizationFailure`] and the region produces no result.

use log::{debug, info};
use rand::Rng;

use crate::config::{OptimizerFamily, OptimizerKind, RunConfig};
use crate::error::{ForecastError, Result};
use crate::global_opt::SimulatedAnnealing;
use crate::lm::{LevenbergMarquardt, LmConfig};
use crate::metrics::mape;
use crate::model::ModelVariant;
use crate::parameters::{BoundsSet, ModelParams};

pub mod objective;

pub use objective::{ForecastObjective, INCREMENT_LAG, PENALTY_COST};

/// Observations covered by the "recent" MAPE that gets logged.
pub const RECENT_MAPE_DAYS: usize = 15;

/// Outcome of one region's fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Fitted, floor-clamped parameters
    pub params: ModelParams,

    /// Final objective value
    pub cost: f64,

    /// In-sample MAPE over the whole window, averaged over cases and deaths
    pub mape: f64,

    /// Solver success flag
    pub success: bool,

    pub iterations: usize,
    pub func_evals: usize,
    pub optimizer: OptimizerKind,
    pub variant: ModelVariant,
    pub message: String,
}

/// In-sample MAPE of `params` on the objective's window, optionally limited to
/// the last `last` observations.
pub fn in_sample_mape(
    objective: &ForecastObjective<'_>,
    params: &ModelParams,
    last: Option<usize>,
) -> Result<f64> {
    let (cases, deaths) = objective.simulate(params)?;
    let w = objective.window();
    let from = last.map(|k| w.len().saturating_sub(k)).unwrap_or(0);
    Ok((mape(&w.cases[from..], &cases[from..]) + mape(&w.deaths[from..], &deaths[from..])) / 2.0)
}

/// Runs one back-end per the run configuration.
#[derive(Debug, Clone)]
pub struct FittingEngine {
    optimizer: OptimizerKind,
    lm: LmConfig,
    annealing: SimulatedAnnealing,
}

impl FittingEngine {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            optimizer: config.optimizer,
            lm: config.local_solver_config(),
            annealing: config.annealing.clone(),
        }
    }

    pub fn optimizer(&self) -> OptimizerKind {
        self.optimizer
    }

    /// Whether objectives for this engine carry the increment residuals.
    pub fn uses_increments(&self) -> bool {
        self.optimizer.family() == OptimizerFamily::Global
    }

    /// Fit `objective` from `start` inside `bounds`.
    ///
    /// # Errors
    ///
    /// * `OptimizationFailure` if the global search reports failure
    /// * errors from the objective that are not converted to a penalty
    pub fn fit<R: Rng + ?Sized>(
        &self,
        objective: &ForecastObjective<'_>,
        start: &ModelParams,
        bounds: &BoundsSet,
        rng: &mut R,
    ) -> Result<FitOutcome> {
        let variant = objective.variant();
        let x0 = start.to_array(variant);
        let local = LevenbergMarquardt::with_config(self.lm.clone());

        let (x, cost, success, iterations, func_evals, message) = match self.optimizer.family() {
            OptimizerFamily::Local => {
                let result = local.minimize(objective, x0, bounds)?;
                debug!("local fit: {}", result);
                (
                    result.params,
                    result.cost,
                    result.success,
                    result.iterations,
                    result.func_evals,
                    result.message,
                )
            }
            OptimizerFamily::Global => {
                let result = self
                    .annealing
                    .optimize_with_rng(objective, &x0, bounds, &local, rng)?;
                debug!("{}", result);
                if !result.success {
                    return Err(ForecastError::OptimizationFailure(result.message));
                }
                (
                    result.params,
                    result.cost,
                    result.success,
                    result.iterations,
                    result.func_evals,
                    result.message,
                )
            }
        };

        let params = objective.params_from(&x)?;
        let mape = in_sample_mape(objective, &params, None)?;
        let recent = in_sample_mape(objective, &params, Some(RECENT_MAPE_DAYS))?;
        info!(
            "in-sample MAPE {:.3} %, last {} days {:.3} %",
            mape, RECENT_MAPE_DAYS, recent
        );
        debug!("best fitted parameters: {:?}", params);

        Ok(FitOutcome {
            params,
            cost,
            mape,
            success,
            iterations,
            func_evals,
            optimizer: self.optimizer,
            variant,
            message,
        })
    }
}
