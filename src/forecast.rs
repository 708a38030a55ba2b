//! Forward integration and reduction to the published series.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::ClinicalRates;
use crate::error::{ForecastError, Result};
use crate::model::{CompartmentalModel, Compartment, InitialConditions, STATE_LEN};
use crate::ode::{DormandPrince, Solution};
use crate::parameters::ModelParams;
use crate::region::RegionKey;
use crate::series::ObservedSeries;

/// One published forecast row.
///
/// Point values are rounded to whole people. `true_*` columns are only filled
/// in the full table, and the band columns only when bands were computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    #[serde(flatten)]
    pub region: RegionKey,
    #[serde(rename = "Day")]
    pub date: NaiveDate,
    #[serde(rename = "Total Detected")]
    pub total_detected: f64,
    #[serde(rename = "Active")]
    pub active: f64,
    #[serde(rename = "Active Hospitalized")]
    pub active_hospitalized: f64,
    #[serde(rename = "Cumulative Hospitalized")]
    pub cumulative_hospitalized: f64,
    #[serde(rename = "Total Detected Deaths")]
    pub total_detected_deaths: f64,
    #[serde(rename = "Active Ventilated")]
    pub active_ventilated: f64,
    #[serde(rename = "Total Detected True", default, skip_serializing_if = "Option::is_none")]
    pub true_cases: Option<f64>,
    #[serde(rename = "Total Detected Deaths True", default, skip_serializing_if = "Option::is_none")]
    pub true_deaths: Option<f64>,
    #[serde(rename = "Total Detected LB", default, skip_serializing_if = "Option::is_none")]
    pub cases_lb: Option<f64>,
    #[serde(rename = "Total Detected UB", default, skip_serializing_if = "Option::is_none")]
    pub cases_ub: Option<f64>,
    #[serde(rename = "Total Detected Deaths LB", default, skip_serializing_if = "Option::is_none")]
    pub deaths_lb: Option<f64>,
    #[serde(rename = "Total Detected Deaths UB", default, skip_serializing_if = "Option::is_none")]
    pub deaths_ub: Option<f64>,
}

impl ForecastRow {
    /// Reduce one 16-entry state to the published columns.
    pub fn from_state(region: RegionKey, date: NaiveDate, x: &[f64]) -> Self {
        let at = |c: Compartment| x[c.index()];
        Self {
            region,
            date,
            total_detected: at(Compartment::DetectedCases).round(),
            active: (at(Compartment::HospitalizedRecovering)
                + at(Compartment::QuarantinedRecovering)
                + at(Compartment::HospitalizedDying)
                + at(Compartment::QuarantinedDying))
            .round(),
            active_hospitalized: (at(Compartment::HospitalizedRecovering)
                + at(Compartment::HospitalizedDying))
            .round(),
            cumulative_hospitalized: at(Compartment::TotalHospitalized).round(),
            total_detected_deaths: at(Compartment::DetectedDeaths).round(),
            active_ventilated: (at(Compartment::VentilatedRecovering)
                + at(Compartment::VentilatedDying))
            .round(),
            true_cases: None,
            true_deaths: None,
            cases_lb: None,
            cases_ub: None,
            deaths_lb: None,
            deaths_ub: None,
        }
    }

    pub fn has_band(&self) -> bool {
        self.cases_lb.is_some()
    }
}

/// The two tables produced per region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastTables {
    /// Rows from `today` onward.
    pub since_today: Vec<ForecastRow>,
    /// Rows from day 0, with observed values where available.
    pub full: Vec<ForecastRow>,
}

/// Integrates fitted parameters forward on a daily grid.
#[derive(Debug, Clone)]
pub struct ForecastGenerator {
    clinical: ClinicalRates,
    solver: DormandPrince,
}

impl ForecastGenerator {
    pub fn new(clinical: ClinicalRates) -> Self {
        Self {
            clinical,
            solver: DormandPrince::new(),
        }
    }

    /// Daily trajectory over `grid_len` days starting at day 0.
    ///
    /// # Errors
    ///
    /// Initial-state errors and integration failures.
    pub fn integrate(
        &self,
        initial: &InitialConditions,
        params: &ModelParams,
        grid_len: usize,
    ) -> Result<Solution> {
        let params = params.clamped();
        let x0 = initial.build(&params)?;
        let model = CompartmentalModel::new(initial.population(), &self.clinical, params);
        let grid: Vec<f64> = (0..grid_len.max(1)).map(|d| d as f64).collect();
        Ok(self.solver.solve(&model, &x0, &grid)?)
    }

    /// State vector on `date` of a fit anchored at `anchor`.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` if `date` precedes `anchor`
    /// * initial-state and integration errors
    pub fn project_state(
        &self,
        initial: &InitialConditions,
        params: &ModelParams,
        anchor: NaiveDate,
        date: NaiveDate,
    ) -> Result<[f64; STATE_LEN]> {
        let offset = (date - anchor).num_days();
        if offset < 0 {
            return Err(ForecastError::InvalidInput(format!(
                "cannot project to {} before the anchor {}",
                date, anchor
            )));
        }
        let solution = self.integrate(initial, params, offset as usize + 1)?;
        let mut state = [0.0; STATE_LEN];
        for (s, v) in state.iter_mut().zip(solution.state(solution.len() - 1).iter()) {
            *s = *v;
        }
        Ok(state)
    }

    /// Reduce a trajectory anchored at `anchor` to the two published tables.
    pub fn tables(
        &self,
        region: &RegionKey,
        anchor: NaiveDate,
        today: NaiveDate,
        solution: &Solution,
        observed: Option<&ObservedSeries>,
    ) -> ForecastTables {
        let full: Vec<ForecastRow> = (0..solution.len())
            .map(|d| {
                let date = anchor + Duration::days(d as i64);
                let state = solution.state(d);
                let x: Vec<f64> = state.iter().copied().collect();
                let mut row = ForecastRow::from_state(region.clone(), date, &x);
                if let Some(obs) = observed.and_then(|s| s.on(date)) {
                    row.true_cases = Some(obs.cases);
                    row.true_deaths = Some(obs.deaths);
                }
                row
            })
            .collect();

        let offset = (today - anchor).num_days().max(0) as usize;
        let since_today = full
            .iter()
            .skip(offset)
            .map(|row| ForecastRow {
                true_cases: None,
                true_deaths: None,
                ..row.clone()
            })
            .collect();

        ForecastTables { since_today, full }
    }
}

/// Position of `today` in a table anchored at `anchor`, never negative.
pub fn today_offset(anchor: NaiveDate, today: NaiveDate) -> usize {
    (today - anchor).num_days().max(0) as usize
}
