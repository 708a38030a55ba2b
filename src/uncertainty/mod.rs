//! # Forecast Uncertainty
//!
//! Bands around the cumulative case and death forecasts, calibrated on how
//! far a previously published forecast ended up from the observations.
//!
//! - [`ReferenceForecast`] holds the published rows and their cutoff date
//! - [`ResidualScale`] is the per-series RMSE after the cutoff
//! - [`BandEstimator`] turns that scale into monotone lower and upper bands

mod confidence;
mod reference;

pub use confidence::{make_increasing, BandEstimator, ResidualScale};
pub use reference::{ReferenceForecast, ReferencePoint};
