//! Residual-based confidence bands.
//!
//! The band width grows with the square root of the number of days past
//! `today`:
//!
//! ```text
//! bound_c = max(round(v_c + z · rmse · sqrt(max(c - c_today, 0))), 0)
//! ```
//!
//! where `z` is the standard normal quantile at `0.5 ∓ q/2` and `rmse` is the
//! error of a previously published forecast against what was later observed.

use chrono::NaiveDate;
use log::{debug, warn};
use statrs::distribution::{ContinuousCDF, Normal};

use super::{ReferenceForecast, ReferencePoint};
use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastRow, ForecastTables};
use crate::region::RegionKey;

/// Clamp a sequence forward so no entry is below its predecessor.
pub fn make_increasing(values: &mut [f64]) {
    for i in 1..values.len() {
        if values[i] < values[i - 1] {
            values[i] = values[i - 1];
        }
    }
}

/// Root-mean-square error of the reference forecast, per series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualScale {
    pub cases: f64,
    pub deaths: f64,
}

impl ResidualScale {
    /// Compare `reference` against the observed values carried by `rows`.
    ///
    /// Points are joined on date. Returns `None` when no date is shared.
    pub fn from_reference(rows: &[ForecastRow], reference: &[&ReferencePoint]) -> Option<Self> {
        let truth = |date: NaiveDate| -> Option<&ForecastRow> {
            rows.binary_search_by_key(&date, |r| r.date)
                .ok()
                .map(|i| &rows[i])
        };

        let mut cases = Vec::new();
        let mut deaths = Vec::new();
        for point in reference {
            if let Some(row) = truth(point.date) {
                if let Some(t) = row.true_cases {
                    cases.push(t - point.total_detected);
                }
                if let Some(t) = row.true_deaths {
                    deaths.push(t - point.total_detected_deaths);
                }
            }
        }

        if cases.is_empty() || deaths.is_empty() {
            return None;
        }
        Some(Self {
            cases: rms(&cases),
            deaths: rms(&deaths),
        })
    }
}

fn rms(values: &[f64]) -> f64 {
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Turns a residual scale into lower and upper bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandEstimator {
    q: f64,
    lower: f64,
    upper: f64,
}

impl BandEstimator {
    /// Estimator for a central coverage of `q`.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` unless `0 < q < 1`
    pub fn new(q: f64) -> Result<Self> {
        if !(q > 0.0 && q < 1.0) {
            return Err(ForecastError::InvalidInput(format!(
                "band coverage must lie in (0, 1), got {}",
                q
            )));
        }
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ForecastError::InvalidInput(format!("standard normal: {}", e)))?;
        Ok(Self {
            q,
            lower: normal.inverse_cdf(0.5 - q / 2.0),
            upper: normal.inverse_cdf(0.5 + q / 2.0),
        })
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    /// Quantile multipliers `(lower, upper)`; the lower one is negative.
    pub fn multipliers(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Fill the band columns of `rows`, whose row `today_index` is today.
    ///
    /// With no scale the band columns are cleared.
    pub fn apply(&self, rows: &mut [ForecastRow], today_index: usize, scale: Option<ResidualScale>) {
        let Some(scale) = scale else {
            for row in rows.iter_mut() {
                row.cases_lb = None;
                row.cases_ub = None;
                row.deaths_lb = None;
                row.deaths_ub = None;
            }
            return;
        };

        let bound = |v: f64, z: f64, rmse: f64, c: usize| -> f64 {
            let horizon = c.saturating_sub(today_index) as f64;
            (v + z * rmse * horizon.sqrt()).round().max(0.0)
        };

        let mut cases_lb: Vec<f64> = Vec::with_capacity(rows.len());
        let mut cases_ub: Vec<f64> = Vec::with_capacity(rows.len());
        let mut deaths_lb: Vec<f64> = Vec::with_capacity(rows.len());
        let mut deaths_ub: Vec<f64> = Vec::with_capacity(rows.len());
        for (c, row) in rows.iter().enumerate() {
            cases_lb.push(bound(row.total_detected, self.lower, scale.cases, c));
            cases_ub.push(bound(row.total_detected, self.upper, scale.cases, c));
            deaths_lb.push(bound(row.total_detected_deaths, self.lower, scale.deaths, c));
            deaths_ub.push(bound(row.total_detected_deaths, self.upper, scale.deaths, c));
        }
        make_increasing(&mut cases_lb);
        make_increasing(&mut cases_ub);
        make_increasing(&mut deaths_lb);
        make_increasing(&mut deaths_ub);

        for (i, row) in rows.iter_mut().enumerate() {
            row.cases_lb = Some(cases_lb[i]);
            row.cases_ub = Some(cases_ub[i]);
            row.deaths_lb = Some(deaths_lb[i]);
            row.deaths_ub = Some(deaths_ub[i]);
        }
    }

    /// Band both tables of one region against `reference`.
    ///
    /// `today_index` is the position of today in the full table. Returns
    /// whether bands were produced; without reference rows for the region
    /// both tables keep missing bands.
    pub fn annotate(
        &self,
        region: &RegionKey,
        tables: &mut ForecastTables,
        today_index: usize,
        reference: &ReferenceForecast,
    ) -> bool {
        let points = reference.after_cutoff(region);
        let scale = if points.is_empty() {
            warn!(
                "no reference forecast for {} after {}, bands left missing",
                region, reference.cutoff
            );
            None
        } else {
            let scale = ResidualScale::from_reference(&tables.full, &points);
            if scale.is_none() {
                warn!("reference forecast for {} shares no date with the observations", region);
            }
            scale
        };
        if let Some(s) = scale {
            debug!("{}: residual scale cases {:.1}, deaths {:.1}", region, s.cases, s.deaths);
        }

        self.apply(&mut tables.full, today_index, scale);
        self.apply(&mut tables.since_today, 0, scale);
        scale.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 7, day).unwrap()
    }

    fn rows(n: usize) -> Vec<ForecastRow> {
        (0..n)
            .map(|i| {
                let mut x = [0.0; crate::model::STATE_LEN];
                x[15] = 1000.0 + 50.0 * i as f64;
                x[14] = 20.0 + i as f64;
                let mut row = ForecastRow::from_state(RegionKey::country("Europe", "France"), date(1 + i as u32), &x);
                if i < 6 {
                    row.true_cases = Some(row.total_detected + 30.0);
                    row.true_deaths = Some(row.total_detected_deaths - 2.0);
                }
                row
            })
            .collect()
    }

    fn reference(rows: &[ForecastRow]) -> ReferenceForecast {
        ReferenceForecast::new(date(2), rows.iter().map(ReferencePoint::from).collect())
    }

    #[test]
    fn test_make_increasing() {
        let mut v = vec![3.0, 2.0, 5.0, 4.0, 6.0];
        make_increasing(&mut v);
        assert_eq!(v, vec![3.0, 3.0, 5.0, 5.0, 6.0]);
    }

    #[test]
    fn test_multipliers_are_symmetric() {
        let est = BandEstimator::new(0.5).unwrap();
        let (lo, hi) = est.multipliers();
        assert_relative_eq!(lo, -hi, epsilon = 1e-9);
        assert_relative_eq!(hi, 0.6744897501960817, epsilon = 1e-6);
        assert!(BandEstimator::new(0.0).is_err());
        assert!(BandEstimator::new(1.0).is_err());
    }

    #[test]
    fn test_residual_scale_joins_on_date() {
        let r = rows(10);
        let reference = reference(&r);
        let points = reference.after_cutoff(&RegionKey::country("Europe", "France"));
        let scale = ResidualScale::from_reference(&r, &points).unwrap();
        assert_relative_eq!(scale.cases, 30.0);
        assert_relative_eq!(scale.deaths, 2.0);
    }

    #[test]
    fn test_bands_contain_point_and_increase() {
        let mut r = rows(12);
        let est = BandEstimator::new(0.9).unwrap();
        est.apply(&mut r, 4, Some(ResidualScale { cases: 30.0, deaths: 2.0 }));

        for (c, row) in r.iter().enumerate() {
            let (lb, ub) = (row.cases_lb.unwrap(), row.cases_ub.unwrap());
            assert!(lb <= row.total_detected && row.total_detected <= ub);
            assert!(row.deaths_lb.unwrap() <= row.total_detected_deaths);
            assert!(row.total_detected_deaths <= row.deaths_ub.unwrap());
            if c <= 4 {
                assert_eq!(lb, row.total_detected);
                assert_eq!(ub, row.total_detected);
            }
        }
        for pair in r.windows(2) {
            assert!(pair[1].cases_lb >= pair[0].cases_lb);
            assert!(pair[1].cases_ub >= pair[0].cases_ub);
            assert!(pair[1].deaths_lb >= pair[0].deaths_lb);
            assert!(pair[1].deaths_ub >= pair[0].deaths_ub);
        }
    }

    #[test]
    fn test_lower_band_is_floored_at_zero() {
        let mut r = rows(8);
        let est = BandEstimator::new(0.95).unwrap();
        est.apply(&mut r, 0, Some(ResidualScale { cases: 1e6, deaths: 1e6 }));
        assert!(r.iter().all(|row| row.cases_lb == Some(0.0)));
    }

    #[test]
    fn test_missing_reference_leaves_bands_missing() {
        let region = RegionKey::country("Europe", "France");
        let mut tables = ForecastTables {
            since_today: rows(4),
            full: rows(10),
        };
        let empty = ReferenceForecast::new(date(2), Vec::new());
        let est = BandEstimator::new(0.5).unwrap();
        assert!(!est.annotate(&region, &mut tables, 6, &empty));
        assert!(tables.full.iter().all(|r| !r.has_band()));

        let reference = reference(&tables.full.clone());
        assert!(est.annotate(&region, &mut tables, 6, &reference));
        assert!(tables.full.iter().all(|r| r.has_band()));
        assert!(tables.since_today.iter().all(|r| r.has_band()));
    }
}
