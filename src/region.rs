//! Region identity.
//!
//! Regions are exchanged as plain `(continent, country, province)` string
//! triples. The reserved string [`NO_SUBDIVISION`] stands for "whole country",
//! "whole continent" or "whole world" depending on which levels carry it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel used in place of a province, country or continent name.
pub const NO_SUBDIVISION: &str = "None";

/// Level of the region hierarchy a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionLevel {
    Province,
    Country,
    Continent,
    World,
}

/// Identifies one time series and one fit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
    #[serde(rename = "Continent")]
    pub continent: String,
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Province")]
    pub province: String,
}

impl RegionKey {
    pub fn new(
        continent: impl Into<String>,
        country: impl Into<String>,
        province: impl Into<String>,
    ) -> Self {
        Self {
            continent: continent.into(),
            country: country.into(),
            province: province.into(),
        }
    }

    /// Key for a whole country.
    pub fn country(continent: impl Into<String>, country: impl Into<String>) -> Self {
        Self::new(continent, country, NO_SUBDIVISION)
    }

    /// Key for a whole continent.
    pub fn continent(continent: impl Into<String>) -> Self {
        Self::new(continent, NO_SUBDIVISION, NO_SUBDIVISION)
    }

    /// Key for the whole world.
    pub fn world() -> Self {
        Self::new(NO_SUBDIVISION, NO_SUBDIVISION, NO_SUBDIVISION)
    }

    pub fn has_province(&self) -> bool {
        self.province != NO_SUBDIVISION
    }

    pub fn level(&self) -> RegionLevel {
        if self.continent == NO_SUBDIVISION {
            RegionLevel::World
        } else if self.country == NO_SUBDIVISION {
            RegionLevel::Continent
        } else if self.province == NO_SUBDIVISION {
            RegionLevel::Country
        } else {
            RegionLevel::Province
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.continent, self.country, self.province)
    }
}
