//! Roll-up of region forecasts to country, continent and world.
//!
//! Point series are summed per group and date. Observed columns are summed
//! over the members that have them and stay missing only when no member does.
//! Bands are never summed: when a reference forecast is attached, each
//! aggregate gets bands computed from its own residual against the
//! reference rows carrying its sentinel key.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::debug;

use crate::forecast::{today_offset, ForecastRow};
use crate::region::{RegionKey, RegionLevel};
use crate::uncertainty::{BandEstimator, ReferenceForecast, ResidualScale};

/// Key of the group `key` rolls into at `level`, if any.
///
/// Country totals only take rows with a province, so a country published both
/// as a whole and by province is not counted twice.
pub fn group_key(key: &RegionKey, level: RegionLevel) -> Option<RegionKey> {
    match level {
        RegionLevel::Province => Some(key.clone()),
        RegionLevel::Country => key
            .has_province()
            .then(|| RegionKey::country(key.continent.clone(), key.country.clone())),
        RegionLevel::Continent => Some(RegionKey::continent(key.continent.clone())),
        RegionLevel::World => Some(RegionKey::world()),
    }
}

fn add_opt(acc: Option<f64>, v: Option<f64>) -> Option<f64> {
    match (acc, v) {
        (Some(a), Some(b)) => Some(a + b),
        (None, b) => b,
        (a, None) => a,
    }
}

/// Sum `rows` per group at `level` and date. Band columns are dropped.
pub fn sum_rows(rows: &[ForecastRow], level: RegionLevel) -> Vec<ForecastRow> {
    let mut groups: BTreeMap<(RegionKey, NaiveDate), ForecastRow> = BTreeMap::new();

    for row in rows {
        let Some(key) = group_key(&row.region, level) else {
            continue;
        };
        groups
            .entry((key.clone(), row.date))
            .and_modify(|acc| {
                acc.total_detected += row.total_detected;
                acc.active += row.active;
                acc.active_hospitalized += row.active_hospitalized;
                acc.cumulative_hospitalized += row.cumulative_hospitalized;
                acc.total_detected_deaths += row.total_detected_deaths;
                acc.active_ventilated += row.active_ventilated;
                acc.true_cases = add_opt(acc.true_cases, row.true_cases);
                acc.true_deaths = add_opt(acc.true_deaths, row.true_deaths);
            })
            .or_insert_with(|| ForecastRow {
                region: key,
                cases_lb: None,
                cases_ub: None,
                deaths_lb: None,
                deaths_ub: None,
                ..row.clone()
            });
    }

    groups.into_values().collect()
}

/// The four levels of a run's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchicalForecast {
    pub regions: Vec<ForecastRow>,
    pub countries: Vec<ForecastRow>,
    pub continents: Vec<ForecastRow>,
    pub world: Vec<ForecastRow>,
}

impl HierarchicalForecast {
    /// All rows, regions first, then countries, continents and world.
    pub fn rows(&self) -> impl Iterator<Item = &ForecastRow> {
        self.regions
            .iter()
            .chain(&self.countries)
            .chain(&self.continents)
            .chain(&self.world)
    }

    pub fn len(&self) -> usize {
        self.regions.len() + self.countries.len() + self.continents.len() + self.world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds aggregate levels, optionally with recomputed bands.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    today: NaiveDate,
    bands: Option<(BandEstimator, ReferenceForecast)>,
}

impl AggregationEngine {
    /// Engine producing sums only.
    pub fn new(today: NaiveDate) -> Self {
        Self { today, bands: None }
    }

    /// Recompute bands on every aggregate against `reference`.
    pub fn with_bands(mut self, estimator: BandEstimator, reference: ReferenceForecast) -> Self {
        self.bands = Some((estimator, reference));
        self
    }

    /// Aggregate full-range `rows` to `level`.
    pub fn aggregate(&self, rows: &[ForecastRow], level: RegionLevel) -> Vec<ForecastRow> {
        let mut summed = sum_rows(rows, level);
        if let Some((estimator, reference)) = &self.bands {
            // `summed` is ordered by key then date, so each group is contiguous.
            let mut start = 0;
            while start < summed.len() {
                let key = summed[start].region.clone();
                let end = summed[start..]
                    .iter()
                    .position(|r| r.region != key)
                    .map_or(summed.len(), |p| start + p);
                let group = &mut summed[start..end];

                let points = reference.after_cutoff(&key);
                let scale = ResidualScale::from_reference(group, &points);
                if scale.is_none() {
                    debug!("no usable reference rows for aggregate {}", key);
                }
                let today_index = today_offset(group[0].date, self.today);
                estimator.apply(group, today_index, scale);
                start = end;
            }
        }
        debug!("{} aggregated rows at {:?} level", summed.len(), level);
        summed
    }

    /// Region rows plus the country, continent and world aggregates.
    pub fn hierarchy(&self, rows: &[ForecastRow]) -> HierarchicalForecast {
        HierarchicalForecast {
            regions: rows.to_vec(),
            countries: self.aggregate(rows, RegionLevel::Country),
            continents: self.aggregate(rows, RegionLevel::Continent),
            world: self.aggregate(rows, RegionLevel::World),
        }
    }
}

/// Sums-only hierarchy, used for the forward-looking tables.
pub fn hierarchy_without_bands(rows: &[ForecastRow]) -> HierarchicalForecast {
    HierarchicalForecast {
        regions: rows.to_vec(),
        countries: sum_rows(rows, RegionLevel::Country),
        continents: sum_rows(rows, RegionLevel::Continent),
        world: sum_rows(rows, RegionLevel::World),
    }
}
