//! Initial-state construction.
//!
//! The currently infected population is split into exposed and infectious
//! pools in proportion to `k1` and `k2`; the already detected population is
//! split into recovering and dying, hospitalized and quarantined branches using
//! the hospitalization share and the initial mortality fraction.

use log::error;

use super::{Compartment, STATE_LEN};
use crate::config::ClinicalRates;
use crate::error::{ForecastError, Result};
use crate::parameters::ModelParams;

/// Recovered seed from counts alone: five times the deaths, when the gap
/// between cases and deaths allows it, otherwise zero.
pub fn recovered_heuristic(cases: f64, deaths: f64) -> f64 {
    if cases - deaths > 5.0 * deaths {
        5.0 * deaths
    } else {
        0.0
    }
}

/// Where the recovered seed comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeedSource {
    /// First wave: the recovered seed is fixed from observed counts.
    Observed { recovered: f64 },

    /// Re-estimated wave: the recovered seed is derived from a prior state and
    /// lagged counts, and rescaled by `k3`.
    NewWave {
        /// Cases minus deaths on the first day of the wave
        recovered_upper: f64,
        /// Cases 14 days before the wave minus deaths 9 days before it
        recovered_lagged: f64,
        /// Recovered compartment of the prior state
        recovered_prior: f64,
    },
}

/// Fixed inputs of the initial state for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialConditions {
    population: f64,
    cases: f64,
    deaths: f64,
    source: SeedSource,
    p_d: f64,
    p_h: f64,
    p_v: f64,
}

impl InitialConditions {
    /// First-wave construction from the first observed row.
    pub fn from_observed(population: f64, cases: f64, deaths: f64, clinical: &ClinicalRates) -> Self {
        Self {
            population,
            cases,
            deaths,
            source: SeedSource::Observed {
                recovered: recovered_heuristic(cases, deaths),
            },
            p_d: clinical.p_detected,
            p_h: clinical.p_hospitalized,
            p_v: clinical.p_ventilated,
        }
    }

    /// New-wave construction.
    ///
    /// `lagged_cases` and `lagged_deaths` are the counts 14 and 9 days before
    /// the wave start. `prior_recovered` is the recovered compartment of the
    /// projected prior state; without it the count heuristic stands in.
    ///
    /// When both the prior estimate and the lagged estimate exceed the upper
    /// bound, the inputs are inconsistent; this is logged and the upper bound
    /// then caps the seed.
    pub fn for_new_wave(
        population: f64,
        cases: f64,
        deaths: f64,
        lagged_cases: f64,
        lagged_deaths: f64,
        prior_recovered: Option<f64>,
        clinical: &ClinicalRates,
    ) -> Self {
        let recovered_upper = cases - deaths;
        let recovered_lagged = lagged_cases - lagged_deaths;
        let recovered_prior = prior_recovered.unwrap_or_else(|| recovered_heuristic(cases, deaths));

        if (recovered_prior * clinical.p_detected).floor() >= recovered_upper
            && recovered_lagged >= recovered_upper
        {
            error!(
                "initial recovered population too high: prior {:.1} and lagged {:.1} both reach the bound {:.1}",
                recovered_prior * clinical.p_detected,
                recovered_lagged,
                recovered_upper
            );
        }

        Self {
            population,
            cases,
            deaths,
            source: SeedSource::NewWave {
                recovered_upper,
                recovered_lagged,
                recovered_prior,
            },
            p_d: clinical.p_detected,
            p_h: clinical.p_hospitalized,
            p_v: clinical.p_ventilated,
        }
    }

    pub fn population(&self) -> f64 {
        self.population
    }

    pub fn source(&self) -> SeedSource {
        self.source
    }

    /// Currently infected and recovered seeds for a given `k3`.
    pub fn seeds(&self, k3: f64) -> (f64, f64) {
        match self.source {
            SeedSource::Observed { recovered } => {
                (self.cases - self.deaths - recovered, recovered)
            }
            SeedSource::NewWave {
                recovered_upper,
                recovered_lagged,
                recovered_prior,
            } => {
                let recovered = (recovered_upper - 1.0)
                    .min(k3 * (recovered_prior * self.p_d).max(recovered_lagged));
                ((self.cases - self.deaths - recovered) * k3, recovered)
            }
        }
    }

    /// Build the 16-entry initial state for `params`.
    ///
    /// # Errors
    ///
    /// * `NonPositiveInfected` if the currently infected seed is not positive
    /// * `NegativeSusceptible` if the seeds exceed the population
    pub fn build(&self, params: &ModelParams) -> Result<[f64; STATE_LEN]> {
        let (ci, recovered) = self.seeds(params.k3);
        if !(ci > 0.0) {
            return Err(ForecastError::NonPositiveInfected(ci));
        }

        let (p_d, p_h, p_v) = (self.p_d, self.p_h, self.p_v);
        let p_dth = params.p_dth;
        let d = self.deaths;
        let undetected = ci / p_d - ci;

        let s0 = self.population
            - ci / p_d
            - ci / p_d * (params.k1 + params.k2)
            - recovered / p_d
            - d / p_d;
        if s0 < 0.0 {
            return Err(ForecastError::NegativeSusceptible(s0));
        }

        let mut x = [0.0; STATE_LEN];
        x[Compartment::Susceptible.index()] = s0;
        x[Compartment::Exposed.index()] = ci / p_d * params.k1;
        x[Compartment::Infectious.index()] = ci / p_d * params.k2;
        x[Compartment::UndetectedRecovering.index()] = undetected * (1.0 - p_dth);
        x[Compartment::HospitalizedRecovering.index()] = ci * p_h * (1.0 - p_dth);
        x[Compartment::QuarantinedRecovering.index()] = ci * (1.0 - p_h) * (1.0 - p_dth);
        x[Compartment::UndetectedDying.index()] = undetected * p_dth;
        x[Compartment::HospitalizedDying.index()] = ci * p_h * p_dth;
        x[Compartment::QuarantinedDying.index()] = ci * (1.0 - p_h) * p_dth;
        x[Compartment::Recovered.index()] = recovered / p_d;
        x[Compartment::Dead.index()] = d / p_d;
        x[Compartment::TotalHospitalized.index()] = ci * p_h;
        x[Compartment::VentilatedRecovering.index()] = ci * p_h * p_v * (1.0 - p_dth);
        x[Compartment::VentilatedDying.index()] = ci * p_h * p_v * p_dth;
        x[Compartment::DetectedDeaths.index()] = d;
        x[Compartment::DetectedCases.index()] = self.cases;
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CONSERVED_LEN;
    use approx::assert_relative_eq;

    #[test]
    fn test_recovered_heuristic() {
        assert_eq!(recovered_heuristic(1000.0, 10.0), 50.0);
        // 60 - 10 = 50 is not more than 5 * 10.
        assert_eq!(recovered_heuristic(60.0, 10.0), 0.0);
    }

    #[test]
    fn test_observed_state_sums_to_population() {
        let ic = InitialConditions::from_observed(5_000_000.0, 1200.0, 30.0, &ClinicalRates::default());
        let x = ic.build(&ModelParams::default()).unwrap();
        let total: f64 = x[..CONSERVED_LEN].iter().sum();
        assert_relative_eq!(total, 5_000_000.0, max_relative = 1e-12);

        // CI = 1200 - 30 - 150
        assert_relative_eq!(x[Compartment::TotalHospitalized.index()], 1020.0 * 0.03);
        assert_eq!(x[Compartment::DetectedCases.index()], 1200.0);
        assert_eq!(x[Compartment::DetectedDeaths.index()], 30.0);
        assert!(x.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_non_positive_infected_is_fatal() {
        // Deaths equal to cases leave nobody currently infected.
        let ic = InitialConditions::from_observed(1e6, 100.0, 100.0, &ClinicalRates::default());
        assert!(matches!(
            ic.build(&ModelParams::default()),
            Err(ForecastError::NonPositiveInfected(_))
        ));
    }

    #[test]
    fn test_negative_susceptible() {
        let ic = InitialConditions::from_observed(1000.0, 900.0, 1.0, &ClinicalRates::default());
        assert!(matches!(
            ic.build(&ModelParams::default()),
            Err(ForecastError::NegativeSusceptible(_))
        ));
    }

    #[test]
    fn test_new_wave_caps_recovered() {
        let clinical = ClinicalRates::default();
        // Prior recovered 1e6 * p_d = 2e5 far exceeds cases - deaths.
        let ic = InitialConditions::for_new_wave(
            1e8, 50_000.0, 1000.0, 30_000.0, 800.0, Some(1e6), &clinical,
        );
        let (ci, recovered) = ic.seeds(1.0);
        assert_relative_eq!(recovered, 49_000.0 - 1.0);
        assert_relative_eq!(ci, 1.0);

        let x = ic.build(&ModelParams::default()).unwrap();
        let total: f64 = x[..CONSERVED_LEN].iter().sum();
        assert_relative_eq!(total, 1e8, max_relative = 1e-12);
    }

    #[test]
    fn test_new_wave_k3_scaling() {
        let clinical = ClinicalRates::default();
        let ic = InitialConditions::for_new_wave(
            1e8, 50_000.0, 1000.0, 20_000.0, 500.0, Some(10_000.0), &clinical,
        );
        // max(10_000 * 0.2, 19_500) = 19_500
        let (ci, recovered) = ic.seeds(1.0);
        assert_relative_eq!(recovered, 19_500.0);
        assert_relative_eq!(ci, 50_000.0 - 1000.0 - 19_500.0);

        let (ci_half, recovered_half) = ic.seeds(0.5);
        assert_relative_eq!(recovered_half, 9_750.0);
        assert_relative_eq!(ci_half, (50_000.0 - 1000.0 - 9_750.0) * 0.5);
    }

    #[test]
    fn test_new_wave_without_prior_uses_heuristic() {
        let ic = InitialConditions::for_new_wave(
            1e7, 5000.0, 100.0, 0.0, 0.0, None, &ClinicalRates::default(),
        );
        match ic.source() {
            SeedSource::NewWave { recovered_prior, .. } => assert_eq!(recovered_prior, 500.0),
            other => panic!("unexpected source {:?}", other),
        }
    }
}
