//! Train/test performance rows for backtesting runs.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::metrics::{mae, mape, mape_daily_delta, mse, sign_mpe};
use crate::region::{RegionKey, NO_SUBDIVISION};

/// Number of averaged metric columns.
const METRIC_COLUMNS: usize = 14;

/// Errors of one fit on its training window and on the days that followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRow {
    pub continent: String,
    pub country: String,
    pub province: String,
    pub train_start_date: Option<NaiveDate>,
    pub train_end_date: Option<NaiveDate>,
    pub train_mape_cases: f64,
    pub train_mape_deaths: f64,
    pub train_sign_mpe_cases: Option<f64>,
    pub train_sign_mpe_deaths: Option<f64>,
    pub train_mae_cases: f64,
    pub train_mae_deaths: f64,
    pub train_mse_cases: f64,
    pub train_mse_deaths: f64,
    pub test_start_date: Option<NaiveDate>,
    pub test_end_date: Option<NaiveDate>,
    pub test_mape_cases: f64,
    pub test_mape_deaths: f64,
    pub test_sign_mpe_cases: Option<f64>,
    pub test_sign_mpe_deaths: Option<f64>,
    pub test_mae_cases: f64,
    pub test_mae_deaths: f64,
    pub test_mse_cases: f64,
    pub test_mse_deaths: f64,
    pub mape_daily_delta_cases: f64,
    pub mape_daily_delta_deaths: f64,
}

/// Observed values on the training and test windows.
#[derive(Debug, Clone, Copy)]
pub struct BacktestTruth<'a> {
    pub train_cases: &'a [f64],
    pub train_deaths: &'a [f64],
    pub test_cases: &'a [f64],
    pub test_deaths: &'a [f64],
}

impl BacktestRow {
    /// Score a trajectory starting on `train_start` against `truth`.
    ///
    /// `pred_cases` and `pred_deaths` are daily values from `train_start`; the
    /// test window is the `test` days directly after the training window.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` if the training or test window is empty
    /// * `DimensionMismatch` if the trajectory is shorter than both windows
    pub fn evaluate(
        region: &RegionKey,
        train_start: NaiveDate,
        truth: BacktestTruth<'_>,
        pred_cases: &[f64],
        pred_deaths: &[f64],
    ) -> Result<Self> {
        let n_train = truth.train_cases.len();
        let n_test = truth.test_cases.len();
        if n_train == 0 || n_test == 0 {
            return Err(ForecastError::InvalidInput(
                "backtest needs non-empty training and test windows".to_string(),
            ));
        }
        if truth.train_deaths.len() != n_train || truth.test_deaths.len() != n_test {
            return Err(ForecastError::DimensionMismatch(
                "case and death windows differ in length".to_string(),
            ));
        }
        let needed = n_train + n_test;
        if pred_cases.len() < needed || pred_deaths.len() < needed {
            return Err(ForecastError::DimensionMismatch(format!(
                "trajectory covers {} days, {} needed",
                pred_cases.len().min(pred_deaths.len()),
                needed
            )));
        }

        let (fit_c, test_c) = (&pred_cases[..n_train], &pred_cases[n_train..needed]);
        let (fit_d, test_d) = (&pred_deaths[..n_train], &pred_deaths[n_train..needed]);

        Ok(Self {
            continent: region.continent.clone(),
            country: region.country.clone(),
            province: region.province.clone(),
            train_start_date: Some(train_start),
            train_end_date: Some(train_start + Duration::days(n_train as i64 - 1)),
            train_mape_cases: mape(truth.train_cases, fit_c),
            train_mape_deaths: mape(truth.train_deaths, fit_d),
            train_sign_mpe_cases: Some(sign_mpe(truth.train_cases, fit_c)),
            train_sign_mpe_deaths: Some(sign_mpe(truth.train_deaths, fit_d)),
            train_mae_cases: mae(truth.train_cases, fit_c),
            train_mae_deaths: mae(truth.train_deaths, fit_d),
            train_mse_cases: mse(truth.train_cases, fit_c),
            train_mse_deaths: mse(truth.train_deaths, fit_d),
            test_start_date: Some(train_start + Duration::days(n_train as i64)),
            test_end_date: Some(train_start + Duration::days(needed as i64 - 1)),
            test_mape_cases: mape(truth.test_cases, test_c),
            test_mape_deaths: mape(truth.test_deaths, test_d),
            test_sign_mpe_cases: Some(sign_mpe(truth.test_cases, test_c)),
            test_sign_mpe_deaths: Some(sign_mpe(truth.test_deaths, test_d)),
            test_mae_cases: mae(truth.test_cases, test_c),
            test_mae_deaths: mae(truth.test_deaths, test_d),
            test_mse_cases: mse(truth.test_cases, test_c),
            test_mse_deaths: mse(truth.test_deaths, test_d),
            mape_daily_delta_cases: mape_daily_delta(
                truth.train_cases[n_train - 1],
                fit_c[n_train - 1],
                truth.test_cases,
                test_c,
            ),
            mape_daily_delta_deaths: mape_daily_delta(
                truth.train_deaths[n_train - 1],
                fit_d[n_train - 1],
                truth.test_deaths,
                test_d,
            ),
        })
    }

    pub fn region(&self) -> RegionKey {
        RegionKey::new(
            self.continent.clone(),
            self.country.clone(),
            self.province.clone(),
        )
    }

    fn metrics(&self) -> [f64; METRIC_COLUMNS] {
        [
            self.train_mape_cases,
            self.train_mape_deaths,
            self.train_mae_cases,
            self.train_mae_deaths,
            self.train_mse_cases,
            self.train_mse_deaths,
            self.test_mape_cases,
            self.test_mape_deaths,
            self.test_mae_cases,
            self.test_mae_deaths,
            self.test_mse_cases,
            self.test_mse_deaths,
            self.mape_daily_delta_cases,
            self.mape_daily_delta_deaths,
        ]
    }

    fn metrics_mut(&mut self) -> [&mut f64; METRIC_COLUMNS] {
        [
            &mut self.train_mape_cases,
            &mut self.train_mape_deaths,
            &mut self.train_mae_cases,
            &mut self.train_mae_deaths,
            &mut self.train_mse_cases,
            &mut self.train_mse_deaths,
            &mut self.test_mape_cases,
            &mut self.test_mape_deaths,
            &mut self.test_mae_cases,
            &mut self.test_mae_deaths,
            &mut self.test_mse_cases,
            &mut self.test_mse_deaths,
            &mut self.mape_daily_delta_cases,
            &mut self.mape_daily_delta_deaths,
        ]
    }

    /// Aggregate row for `key` with the given averaged metrics.
    fn aggregate(key: &RegionKey, metrics: [f64; METRIC_COLUMNS]) -> Self {
        let mut row = Self {
            continent: key.continent.clone(),
            country: key.country.clone(),
            province: key.province.clone(),
            train_start_date: None,
            train_end_date: None,
            train_mape_cases: 0.0,
            train_mape_deaths: 0.0,
            train_sign_mpe_cases: None,
            train_sign_mpe_deaths: None,
            train_mae_cases: 0.0,
            train_mae_deaths: 0.0,
            train_mse_cases: 0.0,
            train_mse_deaths: 0.0,
            test_start_date: None,
            test_end_date: None,
            test_mape_cases: 0.0,
            test_mape_deaths: 0.0,
            test_sign_mpe_cases: None,
            test_sign_mpe_deaths: None,
            test_mae_cases: 0.0,
            test_mae_deaths: 0.0,
            test_mse_cases: 0.0,
            test_mse_deaths: 0.0,
            mape_daily_delta_cases: 0.0,
            mape_daily_delta_deaths: 0.0,
        };
        for (slot, value) in row.metrics_mut().into_iter().zip(metrics) {
            *slot = value;
        }
        row
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Column-wise means ignoring NaN entries.
fn mean_metrics<'a>(rows: impl Iterator<Item = &'a BacktestRow>) -> [f64; METRIC_COLUMNS] {
    let mut sums = [0.0; METRIC_COLUMNS];
    let mut counts = [0usize; METRIC_COLUMNS];
    for row in rows {
        for (i, v) in row.metrics().into_iter().enumerate() {
            if !v.is_nan() {
                sums[i] += v;
                counts[i] += 1;
            }
        }
    }
    let mut means = [f64::NAN; METRIC_COLUMNS];
    for i in 0..METRIC_COLUMNS {
        if counts[i] > 0 {
            means[i] = sums[i] / counts[i] as f64;
        }
    }
    means
}

/// Append continent and country averages to region backtest rows.
///
/// The result is sorted by key, metrics are rounded to three decimals and
/// only the first row per key is kept, so a region row wins over an
/// aggregate with the same key.
pub fn with_aggregates(rows: &[BacktestRow]) -> Vec<BacktestRow> {
    let mut continents: BTreeMap<String, Vec<&BacktestRow>> = BTreeMap::new();
    let mut countries: BTreeMap<(String, String), Vec<&BacktestRow>> = BTreeMap::new();
    for row in rows {
        continents.entry(row.continent.clone()).or_default().push(row);
        countries
            .entry((row.continent.clone(), row.country.clone()))
            .or_default()
            .push(row);
    }

    let mut all: Vec<BacktestRow> = rows.to_vec();
    for (continent, members) in &continents {
        let key = RegionKey::new(continent.clone(), NO_SUBDIVISION, NO_SUBDIVISION);
        all.push(BacktestRow::aggregate(&key, mean_metrics(members.iter().copied())));
    }
    for ((continent, country), members) in &countries {
        let key = RegionKey::country(continent.clone(), country.clone());
        all.push(BacktestRow::aggregate(&key, mean_metrics(members.iter().copied())));
    }

    all.sort_by(|a, b| {
        (&a.continent, &a.country, &a.province).cmp(&(&b.continent, &b.country, &b.province))
    });
    all.dedup_by(|b, a| {
        a.continent == b.continent && a.country == b.country && a.province == b.province
    });
    for row in &mut all {
        for slot in row.metrics_mut() {
            *slot = round3(*slot);
        }
    }
    all
}
