//! Observed case and death series.
//!
//! A region's history is a date-ordered list of cumulative counts. Day-index 0
//! is the first date on which cumulative cases reached the threshold; earlier
//! rows get negative indices and later rows count up contiguously.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::region::RegionKey;

/// Cumulative counts observed on one date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    #[serde(rename = "case_cnt")]
    pub cases: f64,
    #[serde(rename = "death_cnt")]
    pub deaths: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, cases: f64, deaths: f64) -> Self {
        Self {
            date,
            cases,
            deaths,
        }
    }
}

/// A region's observed history, sorted by date with no duplicate dates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedSeries {
    rows: Vec<Observation>,
}

impl ObservedSeries {
    /// Build a series, sorting rows by date.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` if two rows share a date or a count is negative or not finite
    pub fn new(mut rows: Vec<Observation>) -> Result<Self> {
        rows.sort_by_key(|r| r.date);
        for pair in rows.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(ForecastError::InvalidInput(format!(
                    "duplicate observation for {}",
                    pair[0].date
                )));
            }
        }
        if let Some(bad) = rows
            .iter()
            .find(|r| !(r.cases.is_finite() && r.deaths.is_finite()) || r.cases < 0.0 || r.deaths < 0.0)
        {
            return Err(ForecastError::InvalidInput(format!(
                "invalid counts on {}: cases={}, deaths={}",
                bad.date, bad.cases, bad.deaths
            )));
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first row whose cumulative cases reach `threshold`.
    pub fn threshold_position(&self, threshold: f64) -> Option<usize> {
        self.rows.iter().position(|r| r.cases >= threshold)
    }

    /// Day index of every row, counted in calendar days from day zero, or
    /// `None` if the threshold is never reached.
    pub fn day_indices(&self, threshold: f64) -> Option<Vec<i64>> {
        let zero = self.day_zero(threshold)?;
        Some(self.rows.iter().map(|r| (r.date - zero).num_days()).collect())
    }

    /// Date of day-index 0.
    pub fn day_zero(&self, threshold: f64) -> Option<NaiveDate> {
        self.threshold_position(threshold).map(|i| self.rows[i].date)
    }

    /// First observation dated on or after `date`.
    pub fn first_on_or_after(&self, date: NaiveDate) -> Option<&Observation> {
        self.rows.iter().find(|r| r.date >= date)
    }

    /// Observation on exactly `date`.
    pub fn on(&self, date: NaiveDate) -> Option<&Observation> {
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Select the rows used for fitting.
    ///
    /// Rows start at day-index 0, or at `start` when a wave start date is given,
    /// and end at `today` inclusive.
    ///
    /// # Errors
    ///
    /// * `ThresholdNotReached` if cases never reach `threshold`
    /// * `InsufficientHistory` if the window holds `min_history` rows or fewer
    pub fn fitting_window(
        &self,
        region: &RegionKey,
        threshold: f64,
        start: Option<NaiveDate>,
        today: NaiveDate,
        min_history: usize,
    ) -> Result<FittingWindow> {
        let first = self
            .threshold_position(threshold)
            .ok_or_else(|| ForecastError::ThresholdNotReached {
                region: region.to_string(),
                threshold,
            })?;

        let selected: Vec<&Observation> = match start {
            Some(start) => self
                .rows
                .iter()
                .filter(|r| r.date >= start && r.date <= today)
                .collect(),
            None => self.rows[first..]
                .iter()
                .filter(|r| r.date <= today)
                .collect(),
        };

        if selected.len() <= min_history {
            return Err(ForecastError::InsufficientHistory {
                region: region.to_string(),
                rows: selected.len(),
                required: min_history,
            });
        }

        let anchor = selected[0].date;
        Ok(FittingWindow {
            anchor,
            t: selected
                .iter()
                .map(|r| (r.date - anchor).num_days() as f64)
                .collect(),
            dates: selected.iter().map(|r| r.date).collect(),
            cases: selected.iter().map(|r| r.cases).collect(),
            deaths: selected.iter().map(|r| r.deaths).collect(),
        })
    }
}

/// The observed rows a fit is calibrated on.
#[derive(Debug, Clone, PartialEq)]
pub struct FittingWindow {
    /// Date of integration time 0
    pub anchor: NaiveDate,
    /// Days since `anchor`
    pub t: Vec<f64>,
    pub dates: Vec<NaiveDate>,
    pub cases: Vec<f64>,
    pub deaths: Vec<f64>,
}

impl FittingWindow {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Ratio equalizing the scale of case and death residuals.
    pub fn balance(&self) -> f64 {
        let last_cases = self.cases.last().copied().unwrap_or(0.0);
        let last_deaths = self.deaths.last().copied().unwrap_or(0.0);
        last_cases / last_deaths.max(10.0) / 3.0
    }

    pub fn first(&self) -> (f64, f64) {
        (
            self.cases.first().copied().unwrap_or(0.0),
            self.deaths.first().copied().unwrap_or(0.0),
        )
    }

    /// Number of integer days the grid must cover, starting at 0.
    pub fn grid_len(&self) -> usize {
        self.t.last().map(|&t| t as usize + 1).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(cases: &[f64], deaths: &[f64]) -> ObservedSeries {
        let start = date(2020, 3, 1);
        ObservedSeries::new(
            cases
                .iter()
                .zip(deaths)
                .enumerate()
                .map(|(i, (&c, &d))| Observation::new(start + chrono::Duration::days(i as i64), c, d))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_day_indices() {
        let s = series(&[80.0, 95.0, 110.0, 130.0, 150.0], &[2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(s.day_indices(100.0).unwrap(), vec![-2, -1, 0, 1, 2]);
        assert_eq!(s.day_zero(100.0), Some(date(2020, 3, 3)));
    }

    #[test]
    fn test_day_indices_follow_calendar_gaps() {
        let rows = vec![
            Observation::new(date(2020, 3, 1), 90.0, 1.0),
            Observation::new(date(2020, 3, 2), 120.0, 2.0),
            // 3 March is missing.
            Observation::new(date(2020, 3, 4), 160.0, 3.0),
            Observation::new(date(2020, 3, 5), 200.0, 4.0),
        ];
        let s = ObservedSeries::new(rows).unwrap();
        let indices = s.day_indices(100.0).unwrap();
        assert_eq!(indices, vec![-1, 0, 2, 3]);

        let key = RegionKey::country("Europe", "Malta");
        let window = s.fitting_window(&key, 100.0, None, date(2020, 3, 5), 2).unwrap();
        let from_indices: Vec<f64> = indices[1..].iter().map(|&i| i as f64).collect();
        assert_eq!(window.t, from_indices);
    }

    #[test]
    fn test_threshold_never_reached() {
        let s = series(&[10.0, 20.0, 30.0], &[0.0, 0.0, 1.0]);
        assert!(s.day_indices(100.0).is_none());
        let key = RegionKey::country("Europe", "Andorra");
        let err = s
            .fitting_window(&key, 100.0, None, date(2020, 4, 1), 7)
            .unwrap_err();
        assert!(matches!(err, ForecastError::ThresholdNotReached { .. }));
        assert!(err.is_skip());
    }

    #[test]
    fn test_fitting_window_selection() {
        let cases: Vec<f64> = (0..20).map(|i| 50.0 + 25.0 * i as f64).collect();
        let deaths: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let s = series(&cases, &deaths);
        let key = RegionKey::country("Europe", "Italy");

        // Threshold reached on index 2 (100 cases), today cuts at index 14.
        let w = s
            .fitting_window(&key, 100.0, None, date(2020, 3, 15), 7)
            .unwrap();
        assert_eq!(w.anchor, date(2020, 3, 3));
        assert_eq!(w.len(), 13);
        assert_eq!(w.t[0], 0.0);
        assert_eq!(*w.t.last().unwrap(), 12.0);
        assert_eq!(w.grid_len(), 13);

        // Explicit start date overrides day-index 0.
        let w = s
            .fitting_window(&key, 100.0, Some(date(2020, 3, 5)), date(2020, 3, 20), 7)
            .unwrap();
        assert_eq!(w.anchor, date(2020, 3, 5));
        assert_eq!(w.cases[0], 150.0);
    }

    #[test]
    fn test_insufficient_history() {
        let s = series(
            &[100.0, 120.0, 140.0, 160.0, 180.0, 200.0, 220.0, 240.0],
            &[1.0; 8],
        );
        let key = RegionKey::country("Asia", "Laos");
        // Exactly seven rows is not enough.
        let err = s
            .fitting_window(&key, 100.0, None, date(2020, 3, 7), 7)
            .unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientHistory { rows: 7, .. }));
        assert!(s.fitting_window(&key, 100.0, None, date(2020, 3, 8), 7).is_ok());
    }

    #[test]
    fn test_balance_floors_deaths() {
        let s = series(&[100.0; 9], &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 3.0]);
        let w = s
            .fitting_window(&RegionKey::world(), 100.0, None, date(2020, 4, 1), 7)
            .unwrap();
        assert_relative_eq!(w.balance(), 100.0 / 10.0 / 3.0);
    }

    #[test]
    fn test_rejects_duplicates_and_negative_counts() {
        let d = date(2020, 3, 1);
        assert!(ObservedSeries::new(vec![Observation::new(d, 1.0, 0.0), Observation::new(d, 2.0, 0.0)]).is_err());
        assert!(ObservedSeries::new(vec![Observation::new(d, -1.0, 0.0)]).is_err());
    }
}
