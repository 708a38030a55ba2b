//! The 16-state compartmental epidemic model.
//!
//! Newly infectious people are split into undetected / detected, hospitalized /
//! quarantined and recovering / dying branches using the fixed clinical
//! proportions and the time-varying mortality fraction. The first eleven
//! compartments partition the population; the last five are cumulative
//! read-outs.
//!
//! One [`CompartmentalModel`] serves both fitting waves. The
//! [`ModelVariant`] only changes how many parameters are optimized and how the
//! initial state is built; the flow equations are shared.

use serde::{Deserialize, Serialize};

use crate::config::{ClinicalRates, TransitionRates};
use crate::ode::OdeSystem;
use crate::parameters::{ModelParams, BASE_PARAMETER_COUNT};

pub mod forcing;
pub mod initial;

pub use forcing::{mortality_fraction, response_factor, MORTALITY_FLOOR};
pub use initial::{recovered_heuristic, InitialConditions, SeedSource};

/// Length of the state vector.
pub const STATE_LEN: usize = 16;

/// Compartments that sum to the population.
pub const CONSERVED_LEN: usize = 11;

/// Position of each compartment in the state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compartment {
    Susceptible = 0,
    Exposed = 1,
    Infectious = 2,
    UndetectedRecovering = 3,
    HospitalizedRecovering = 4,
    QuarantinedRecovering = 5,
    UndetectedDying = 6,
    HospitalizedDying = 7,
    QuarantinedDying = 8,
    Recovered = 9,
    Dead = 10,
    TotalHospitalized = 11,
    VentilatedRecovering = 12,
    VentilatedDying = 13,
    DetectedDeaths = 14,
    DetectedCases = 15,
}

impl Compartment {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Which parameterization is being fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
    /// Initial state built from observed counts; 11 parameters.
    Base,

    /// Initial state rescaled by an estimated `k3`; 12 parameters. Used when
    /// a new wave is estimated from a previously projected state.
    InitialStateCorrection,
}

impl ModelVariant {
    pub fn parameter_count(self) -> usize {
        match self {
            ModelVariant::Base => BASE_PARAMETER_COUNT,
            ModelVariant::InitialStateCorrection => BASE_PARAMETER_COUNT + 1,
        }
    }
}

/// Right-hand side of the model for one region and one parameter vector.
#[derive(Debug, Clone)]
pub struct CompartmentalModel {
    population: f64,
    rates: TransitionRates,
    p_d: f64,
    p_h: f64,
    p_v: f64,
    params: ModelParams,
}

impl CompartmentalModel {
    pub fn new(population: f64, clinical: &ClinicalRates, params: ModelParams) -> Self {
        Self {
            population,
            rates: clinical.transition_rates(),
            p_d: clinical.p_detected,
            p_h: clinical.p_hospitalized,
            p_v: clinical.p_ventilated,
            params,
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn population(&self) -> f64 {
        self.population
    }

    /// Governmental response factor at day `t`.
    pub fn response(&self, t: f64) -> f64 {
        let p = &self.params;
        response_factor(t, p.days, p.r_s, p.jump, p.t_jump, p.std_normal)
    }

    /// Mortality fraction at day `t`.
    pub fn mortality(&self, t: f64) -> f64 {
        mortality_fraction(t, self.params.p_dth, self.params.r_dthdecay)
    }

    /// Time derivatives of all 16 compartments.
    ///
    /// # Panics
    ///
    /// If `x` or `dx` does not hold exactly 16 entries.
    pub fn derivatives(&self, t: f64, x: &[f64], dx: &mut [f64]) {
        assert_eq!(
            x.len(),
            STATE_LEN,
            "state vector has {} entries, expected {}",
            x.len(),
            STATE_LEN
        );
        assert_eq!(dx.len(), STATE_LEN);

        let TransitionRates {
            r_i,
            r_d,
            r_ri,
            r_rh,
            r_rv,
        } = self.rates;
        let (p_d, p_h, p_v) = (self.p_d, self.p_h, self.p_v);
        let alpha = self.params.alpha;
        let r_dth = self.params.r_dth;
        let gamma = self.response(t);
        let p = self.mortality(t);

        let s = x[Compartment::Susceptible.index()];
        let e = x[Compartment::Exposed.index()];
        let i = x[Compartment::Infectious.index()];
        let ar = x[Compartment::UndetectedRecovering.index()];
        let dhr = x[Compartment::HospitalizedRecovering.index()];
        let dqr = x[Compartment::QuarantinedRecovering.index()];
        let ad = x[Compartment::UndetectedDying.index()];
        let dhd = x[Compartment::HospitalizedDying.index()];
        let dqd = x[Compartment::QuarantinedDying.index()];
        let dvr = x[Compartment::VentilatedRecovering.index()];
        let dvd = x[Compartment::VentilatedDying.index()];

        let infections = alpha * gamma * s * i / self.population;
        let detected = r_d * i;

        dx[0] = -infections;
        dx[1] = infections - r_i * e;
        dx[2] = r_i * e - detected;
        dx[3] = detected * (1.0 - p) * (1.0 - p_d) - r_ri * ar;
        dx[4] = detected * (1.0 - p) * p_d * p_h - r_rh * dhr;
        dx[5] = detected * (1.0 - p) * p_d * (1.0 - p_h) - r_ri * dqr;
        dx[6] = detected * p * (1.0 - p_d) - r_dth * ad;
        dx[7] = detected * p * p_d * p_h - r_dth * dhd;
        dx[8] = detected * p * p_d * (1.0 - p_h) - r_dth * dqd;
        dx[9] = r_ri * (ar + dqr) + r_rh * dhr;
        dx[10] = r_dth * (ad + dqd + dhd);
        dx[11] = detected * p_d * p_h;
        dx[12] = detected * (1.0 - p) * p_d * p_h * p_v - r_rv * dvr;
        dx[13] = detected * p * p_d * p_h * p_v - r_dth * dvd;
        dx[14] = r_dth * (dhd + dqd);
        dx[15] = detected * p_d;
    }
}

impl OdeSystem for CompartmentalModel {
    fn dimension(&self) -> usize {
        STATE_LEN
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        self.derivatives(t, y, dydt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> CompartmentalModel {
        CompartmentalModel::new(1_000_000.0, &ClinicalRates::default(), ModelParams::default())
    }

    fn state() -> Vec<f64> {
        vec![
            990_000.0, 3000.0, 2000.0, 800.0, 30.0, 900.0, 50.0, 5.0, 60.0, 3000.0, 155.0, 40.0, 8.0,
            2.0, 70.0, 1500.0,
        ]
    }

    #[test]
    fn test_conserved_derivatives_cancel() {
        let m = model();
        let x = state();
        let mut dx = vec![0.0; STATE_LEN];
        for t in [0.0, 10.0, 55.5, 200.0] {
            m.derivatives(t, &x, &mut dx);
            let total: f64 = dx[..CONSERVED_LEN].iter().sum();
            assert_relative_eq!(total, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_cumulative_readouts_never_decrease() {
        let m = model();
        let mut dx = vec![0.0; STATE_LEN];
        m.derivatives(3.0, &state(), &mut dx);
        assert!(dx[Compartment::TotalHospitalized.index()] >= 0.0);
        assert!(dx[Compartment::DetectedDeaths.index()] >= 0.0);
        assert!(dx[Compartment::DetectedCases.index()] >= 0.0);
        assert!(dx[Compartment::Susceptible.index()] <= 0.0);
    }

    #[test]
    fn test_no_infections_without_infectious() {
        let m = model();
        let mut x = state();
        x[Compartment::Infectious.index()] = 0.0;
        let mut dx = vec![0.0; STATE_LEN];
        m.derivatives(0.0, &x, &mut dx);
        assert_eq!(dx[0], 0.0);
        assert_eq!(dx[Compartment::DetectedCases.index()], 0.0);
    }

    #[test]
    #[should_panic(expected = "state vector has 15 entries")]
    fn test_wrong_state_length_panics() {
        let m = model();
        let mut dx = vec![0.0; STATE_LEN];
        m.derivatives(0.0, &[1.0; 15], &mut dx);
    }

    #[test]
    fn test_variant_parameter_counts() {
        assert_eq!(ModelVariant::Base.parameter_count(), 11);
        assert_eq!(ModelVariant::InitialStateCorrection.parameter_count(), 12);
    }
}
