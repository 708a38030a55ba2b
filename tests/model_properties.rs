//! Properties of the compartmental model over whole trajectories.

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate};
use epiforecast::config::ClinicalRates;
use epiforecast::forecast::ForecastGenerator;
use epiforecast::model::{Compartment, CompartmentalModel, InitialConditions, CONSERVED_LEN};
use epiforecast::ode::DormandPrince;
use epiforecast::parameters::ModelParams;
use epiforecast::region::RegionKey;
use epiforecast::series::{Observation, ObservedSeries};

fn params(alpha: f64, days: f64, r_s: f64, jump: f64) -> ModelParams {
    let mut p = ModelParams::default();
    p.alpha = alpha;
    p.days = days;
    p.r_s = r_s;
    p.jump = jump;
    p
}

#[test]
fn test_population_is_conserved() {
    let clinical = ClinicalRates::default();
    let population = 4.2e6;
    let initial = InitialConditions::from_observed(population, 800.0, 25.0, &clinical);

    for p in [
        params(0.4, 20.0, 2.0, 0.0),
        params(1.5, 60.0, 0.5, 2.0),
        params(3.0, -50.0, 8.0, 0.5),
    ] {
        let x0 = initial.build(&p).unwrap();
        let total0: f64 = x0[..CONSERVED_LEN].iter().sum();
        assert_relative_eq!(total0, population, max_relative = 1e-12);

        let model = CompartmentalModel::new(population, &clinical, p);
        let grid: Vec<f64> = (0..=250).map(|d| d as f64).collect();
        let solution = DormandPrince::new().solve(&model, &x0, &grid).unwrap();

        for row in 0..solution.len() {
            let total: f64 = solution.state(row).iter().take(CONSERVED_LEN).sum();
            assert_relative_eq!(total, population, max_relative = 1e-8);
        }
    }
}

#[test]
fn test_cumulative_series_never_decrease() {
    let clinical = ClinicalRates::default();
    let initial = InitialConditions::from_observed(1e6, 300.0, 5.0, &clinical);
    let generator = ForecastGenerator::new(clinical);
    let solution = generator
        .integrate(&initial, &params(1.2, 40.0, 1.0, 1.0), 200)
        .unwrap();

    for c in [
        Compartment::DetectedCases,
        Compartment::DetectedDeaths,
        Compartment::TotalHospitalized,
        Compartment::Recovered,
        Compartment::Dead,
    ] {
        let series = solution.component(c.index()).to_vec();
        for pair in series.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-9, "{:?} decreased", c);
        }
    }
}

#[test]
fn test_active_cases_decline_once_response_is_locked_in() {
    let clinical = ClinicalRates::default();
    let initial = InitialConditions::from_observed(5e6, 2000.0, 40.0, &clinical);
    let generator = ForecastGenerator::new(clinical);
    // Response fully in effect well before day 0 and no resurgence.
    let solution = generator
        .integrate(&initial, &params(1.0, -150.0, 15.0, 0.0), 240)
        .unwrap();

    let active: Vec<f64> = (0..solution.len())
        .map(|d| {
            let x = solution.state(d);
            x[Compartment::HospitalizedRecovering.index()]
                + x[Compartment::QuarantinedRecovering.index()]
                + x[Compartment::HospitalizedDying.index()]
                + x[Compartment::QuarantinedDying.index()]
        })
        .collect();

    for d in 40..active.len() - 1 {
        assert!(
            active[d + 1] <= active[d] * (1.0 + 1e-9),
            "active cases rose on day {}: {} -> {}",
            d + 1,
            active[d],
            active[d + 1]
        );
    }
}

#[test]
fn test_day_indices_around_threshold() {
    let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
    let rows = [80.0, 95.0, 110.0, 130.0, 150.0]
        .iter()
        .zip([2.0, 3.0, 4.0, 5.0, 6.0])
        .enumerate()
        .map(|(i, (&c, d))| Observation::new(start + Duration::days(i as i64), c, d))
        .collect();
    let series = ObservedSeries::new(rows).unwrap();

    assert_eq!(series.day_indices(100.0), Some(vec![-2, -1, 0, 1, 2]));
    assert_eq!(series.day_zero(100.0), Some(start + Duration::days(2)));

    let window = series
        .fitting_window(
            &RegionKey::country("Europe", "France"),
            100.0,
            None,
            start + Duration::days(10),
            2,
        )
        .unwrap();
    assert_eq!(window.t, vec![0.0, 1.0, 2.0]);
    assert_eq!(window.cases, vec![110.0, 130.0, 150.0]);
}
