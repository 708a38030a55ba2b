//! Warm-starting a fit from the previous run's parameters.
//!
//! Resolution has three outcomes, each with its own source for the starting
//! vector and the bounds:
//!
//! * no prior table at all: default start, default bounds
//! * a row for this region: the row's values, drift bounds around them
//! * a table without this region: default start, default bounds

use log::debug;

use super::{BoundsSet, ModelParams, ParameterFitRow};
use crate::config::OptimizerFamily;
use crate::model::ModelVariant;
use crate::region::RegionKey;

/// A prior fit used as a warm start.
pub type PriorFit = ParameterFitRow;

/// Outcome of looking a region up in the prior-fit table.
#[derive(Debug, Clone, PartialEq)]
pub enum WarmStart {
    /// No prior table was supplied.
    NoPriorFits,

    /// The table holds a row for this region.
    PriorFit(PriorFit),

    /// The table exists but has no row for this region.
    NoMatchingRow,
}

impl WarmStart {
    /// Look `region` up in `table`. Rows match on country and province; the
    /// last matching row wins.
    pub fn resolve(table: Option<&[PriorFit]>, region: &RegionKey) -> Self {
        match table {
            None => WarmStart::NoPriorFits,
            Some(rows) => rows
                .iter()
                .rev()
                .find(|row| {
                    row.region.country == region.country && row.region.province == region.province
                })
                .map(|row| WarmStart::PriorFit(row.clone()))
                .unwrap_or(WarmStart::NoMatchingRow),
        }
    }

    /// Starting vector and bounds for the optimizer.
    ///
    /// The returned start always lies inside the returned bounds.
    pub fn start_and_bounds(
        &self,
        variant: ModelVariant,
        family: OptimizerFamily,
    ) -> (ModelParams, BoundsSet) {
        match self {
            WarmStart::NoPriorFits | WarmStart::NoMatchingRow => {
                debug!("warm start: {}, using default start and bounds", self.label());
                (ModelParams::default(), BoundsSet::defaults(variant))
            }
            WarmStart::PriorFit(row) => {
                let prior = row.params();
                let bounds = BoundsSet::from_prior(&prior, variant, family);
                let start = bounds.project(&prior.to_array(variant));
                let mut values = start.to_vec();
                if values.len() == 11 {
                    values.push(1.0);
                }
                // Length is 11 or 12 by construction.
                let start = ModelParams::from_slice(&values).unwrap_or(prior);
                (start, bounds)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WarmStart::NoPriorFits => "no prior fits",
            WarmStart::PriorFit(_) => "prior fit found",
            WarmStart::NoMatchingRow => "no matching prior row",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(country: &str, province: &str, alpha: f64) -> PriorFit {
        let mut params = ModelParams::default();
        params.alpha = alpha;
        ParameterFitRow::new(
            RegionKey::new("Europe", country, province),
            NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
            5.0,
            &params,
            ModelVariant::Base,
        )
    }

    #[test]
    fn test_three_states() {
        let key = RegionKey::country("Europe", "Spain");
        assert_eq!(WarmStart::resolve(None, &key), WarmStart::NoPriorFits);

        let table = vec![row("France", "None", 1.0)];
        assert_eq!(
            WarmStart::resolve(Some(table.as_slice()), &key),
            WarmStart::NoMatchingRow
        );

        let table = vec![row("Spain", "None", 1.0), row("Spain", "None", 2.5)];
        match WarmStart::resolve(Some(table.as_slice()), &key) {
            WarmStart::PriorFit(found) => assert_eq!(found.infection_rate, 2.5),
            other => panic!("expected a prior fit, got {:?}", other),
        }
    }

    #[test]
    fn test_match_ignores_continent() {
        // Only country and province are compared.
        let key = RegionKey::new("North America", "US", "Texas");
        let mut other_continent = row("US", "Texas", 1.7);
        other_continent.region.continent = "Americas".to_string();
        let table = vec![other_continent, row("US", "Ohio", 0.9)];

        match WarmStart::resolve(Some(table.as_slice()), &key) {
            WarmStart::PriorFit(found) => assert_eq!(found.infection_rate, 1.7),
            other => panic!("expected a prior fit, got {:?}", other),
        }
        let elsewhere = RegionKey::new("North America", "Canada", "Texas");
        assert_eq!(
            WarmStart::resolve(Some(table.as_slice()), &elsewhere),
            WarmStart::NoMatchingRow
        );
    }

    #[test]
    fn test_defaults_without_prior() {
        let (start, bounds) =
            WarmStart::NoMatchingRow.start_and_bounds(ModelVariant::Base, OptimizerFamily::Local);
        assert_eq!(start, ModelParams::default());
        assert_eq!(bounds, BoundsSet::defaults(ModelVariant::Base));
    }

    #[test]
    fn test_prior_start_inside_bounds() {
        let warm = WarmStart::PriorFit(row("Spain", "None", 3.0));
        for variant in [ModelVariant::Base, ModelVariant::InitialStateCorrection] {
            for family in [OptimizerFamily::Local, OptimizerFamily::Global] {
                let (start, bounds) = warm.start_and_bounds(variant, family);
                assert_eq!(start.alpha, 3.0);
                assert_eq!(start.k3, 1.0);
                assert!(bounds.contains(&start.to_array(variant)));
            }
        }
    }
}
