//! Weighted residual objective for one region.
//!
//! The residual vector has the layout
//!
//! | block | length | entry |
//! |-------|--------|-------|
//! | cases | n | `sqrt(w_i) (DT_i - cases_i)` |
//! | deaths | n | `balance sqrt(w_i) (DD_i - deaths_i)` |
//! | weekly cases | n - 7 | same, on 7-day increments (global search only) |
//! | weekly deaths | n - 7 | same, on 7-day increments (global search only) |
//!
//! with `w_i = (i / n)^2` for the 1-based position `i` in the window, so its
//! sum of squares is the loss both optimizer families minimize.

use ndarray::Array1;

use crate::config::ClinicalRates;
use crate::error::{ForecastError, Result};
use crate::model::{CompartmentalModel, Compartment, InitialConditions, ModelVariant};
use crate::ode::DormandPrince;
use crate::parameters::ModelParams;
use crate::problem::Problem;
use crate::series::FittingWindow;

/// Cost reported for candidates the model cannot integrate.
pub const PENALTY_COST: f64 = 1e12;

/// Lag of the increment residuals, in observations.
pub const INCREMENT_LAG: usize = 7;

/// Objective of one region's fit.
#[derive(Debug, Clone)]
pub struct ForecastObjective<'a> {
    window: &'a FittingWindow,
    initial: InitialConditions,
    clinical: ClinicalRates,
    variant: ModelVariant,
    with_increments: bool,
    weights: Vec<f64>,
    balance: f64,
    solver: DormandPrince,
}

impl<'a> ForecastObjective<'a> {
    pub fn new(
        window: &'a FittingWindow,
        initial: InitialConditions,
        clinical: ClinicalRates,
        variant: ModelVariant,
        with_increments: bool,
    ) -> Self {
        let n = window.len() as f64;
        let weights = (1..=window.len()).map(|i| (i as f64 / n).powi(2)).collect();
        Self {
            window,
            initial,
            clinical,
            variant,
            with_increments,
            weights,
            balance: window.balance(),
            solver: DormandPrince::new(),
        }
    }

    /// Integrate with `solver` instead of the default tolerances.
    pub fn with_solver(mut self, solver: DormandPrince) -> Self {
        self.solver = solver;
        self
    }

    pub fn window(&self) -> &FittingWindow {
        self.window
    }

    pub fn initial(&self) -> &InitialConditions {
        &self.initial
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Clamped model parameters for an optimizer vector.
    pub fn params_from(&self, x: &Array1<f64>) -> Result<ModelParams> {
        let values = x.to_vec();
        let params = ModelParams::from_slice(&values)?;
        Ok(params.clamped())
    }

    /// Predicted cumulative detected cases and deaths on the window's dates.
    ///
    /// # Errors
    ///
    /// Initial-state errors and integration failures are returned as is.
    pub fn simulate(&self, params: &ModelParams) -> Result<(Vec<f64>, Vec<f64>)> {
        let x0 = self.initial.build(params)?;
        let model = CompartmentalModel::new(self.initial.population(), &self.clinical, *params);
        let solution = self.solver.solve(&model, &x0, &self.window.t)?;
        Ok((
            solution
                .component(Compartment::DetectedCases.index())
                .to_vec(),
            solution
                .component(Compartment::DetectedDeaths.index())
                .to_vec(),
        ))
    }

    fn residuals_for(&self, cases: &[f64], deaths: &[f64]) -> Array1<f64> {
        let w = &self.window;
        let mut r = Vec::with_capacity(self.residual_count());

        for i in 0..w.len() {
            r.push(self.weights[i].sqrt() * (cases[i] - w.cases[i]));
        }
        for i in 0..w.len() {
            r.push(self.balance * self.weights[i].sqrt() * (deaths[i] - w.deaths[i]));
        }

        if self.with_increments {
            for i in INCREMENT_LAG..w.len() {
                let predicted = cases[i] - cases[i - INCREMENT_LAG];
                let observed = w.cases[i] - w.cases[i - INCREMENT_LAG];
                r.push(self.weights[i].sqrt() * (predicted - observed));
            }
            for i in INCREMENT_LAG..w.len() {
                let predicted = deaths[i] - deaths[i - INCREMENT_LAG];
                let observed = w.deaths[i] - w.deaths[i - INCREMENT_LAG];
                r.push(self.balance * self.weights[i].sqrt() * (predicted - observed));
            }
        }

        Array1::from(r)
    }

    fn penalty(&self) -> Array1<f64> {
        let m = self.residual_count();
        Array1::from_elem(m, (PENALTY_COST / m as f64).sqrt())
    }
}

impl Problem for ForecastObjective<'_> {
    fn eval(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        let params = self.params_from(x)?;
        match self.simulate(&params) {
            Ok((cases, deaths)) => {
                let r = self.residuals_for(&cases, &deaths);
                if r.iter().all(|v| v.is_finite()) {
                    Ok(r)
                } else {
                    Ok(self.penalty())
                }
            }
            Err(ForecastError::Integration(_)) | Err(ForecastError::NegativeSusceptible(_)) => {
                Ok(self.penalty())
            }
            Err(e) => Err(e),
        }
    }

    fn parameter_count(&self) -> usize {
        self.variant.parameter_count()
    }

    fn residual_count(&self) -> usize {
        let n = self.window.len();
        if self.with_increments {
            2 * n + 2 * n.saturating_sub(INCREMENT_LAG)
        } else {
            2 * n
        }
    }
}
