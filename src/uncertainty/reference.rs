//! Previously published forecasts used to calibrate bands.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::forecast::ForecastRow;
use crate::region::RegionKey;

/// One row of a published forecast, reduced to the two banded series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    #[serde(flatten)]
    pub region: RegionKey,
    #[serde(rename = "Day")]
    pub date: NaiveDate,
    #[serde(rename = "Total Detected")]
    pub total_detected: f64,
    #[serde(rename = "Total Detected Deaths")]
    pub total_detected_deaths: f64,
}

impl From<&ForecastRow> for ReferencePoint {
    fn from(row: &ForecastRow) -> Self {
        Self {
            region: row.region.clone(),
            date: row.date,
            total_detected: row.total_detected,
            total_detected_deaths: row.total_detected_deaths,
        }
    }
}

/// A published forecast together with the date it was cut at.
///
/// Aggregate levels are looked up by their sentinel keys, so a reference file
/// that carries country, continent and world rows calibrates those levels too.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceForecast {
    pub cutoff: NaiveDate,
    pub rows: Vec<ReferencePoint>,
}

impl ReferenceForecast {
    pub fn new(cutoff: NaiveDate, rows: Vec<ReferencePoint>) -> Self {
        Self { cutoff, rows }
    }

    /// Rows for `region` dated strictly after the cutoff, sorted by date.
    pub fn after_cutoff(&self, region: &RegionKey) -> Vec<&ReferencePoint> {
        let mut rows: Vec<&ReferencePoint> = self
            .rows
            .iter()
            .filter(|r| r.date > self.cutoff && &r.region == region)
            .collect();
        rows.sort_by_key(|r| r.date);
        rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(country: &str, day: u32, cases: f64) -> ReferencePoint {
        ReferencePoint {
            region: RegionKey::country("Europe", country),
            date: NaiveDate::from_ymd_opt(2020, 7, day).unwrap(),
            total_detected: cases,
            total_detected_deaths: cases / 10.0,
        }
    }

    #[test]
    fn test_after_cutoff_filters_region_and_date() {
        let reference = ReferenceForecast::new(
            NaiveDate::from_ymd_opt(2020, 7, 4).unwrap(),
            vec![
                point("France", 6, 30.0),
                point("France", 4, 10.0),
                point("France", 5, 20.0),
                point("Spain", 5, 99.0),
            ],
        );
        let rows = reference.after_cutoff(&RegionKey::country("Europe", "France"));
        let cases: Vec<f64> = rows.iter().map(|r| r.total_detected).collect();
        assert_eq!(cases, vec![20.0, 30.0]);
        assert!(reference
            .after_cutoff(&RegionKey::country("Europe", "Italy"))
            .is_empty());
    }

    #[test]
    fn test_reads_published_columns() {
        let json = r#"{"Continent":"Europe","Country":"France","Province":"None",
            "Day":"2020-07-05","Total Detected":100.0,"Total Detected Deaths":4.0}"#;
        let p: ReferencePoint = serde_json::from_str(json).unwrap();
        assert_eq!(p.region, RegionKey::country("Europe", "France"));
        assert_eq!(p.total_detected_deaths, 4.0);
    }
}
