//! # epiforecast
//!
//! `epiforecast` fits a 16-compartment epidemic model to cumulative case and
//! death counts and projects it forward, region by region.
//!
//! The library provides:
//! - The compartmental ODE model with its response and mortality forcing
//! - Bounded Levenberg-Marquardt and simulated annealing fitting back-ends
//! - Warm starts and drift bounds from a previous run's parameters
//! - Forecast tables with residual-based confidence bands
//! - Aggregation of region forecasts to country, continent and world
//! - A parallel per-region pipeline and backtest metrics
//!
//! ## Basic Usage
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use epiforecast::{ForecastPipeline, ObservedSeries, RegionKey, RegionTask, RunConfig};
//!
//! # fn main() -> epiforecast::Result<()> {
//! let today = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap();
//! let series = ObservedSeries::new(Vec::new())?;
//! let task = RegionTask::new(RegionKey::country("Europe", "France"), series, 6.7e7);
//!
//! let pipeline = ForecastPipeline::new(RunConfig::new(today).with_seed(1))?;
//! let output = pipeline.run(&[task], None)?;
//! println!("{} regions fitted", output.results.len());
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod error;
pub mod config;
pub mod region;
pub mod series;
pub mod metrics;

// Parameter system
pub mod parameters;

// Numerics
pub mod utils;
pub mod ode;
pub mod problem;
pub mod lm;
pub mod global_opt;

// Model, fitting and outputs
pub mod model;
pub mod fitting;
pub mod forecast;
pub mod uncertainty;
pub mod aggregation;
pub mod backtest;
pub mod pipeline;

// Re-exports for convenience
pub use config::{ClinicalRates, Horizon, OptimizerKind, RunConfig};
pub use error::{ForecastError, Result};
pub use forecast::{ForecastGenerator, ForecastRow, ForecastTables};
pub use lm::LevenbergMarquardt;
pub use model::{CompartmentalModel, ModelVariant};
pub use parameters::{BoundsSet, ModelParams, ParameterFitRow};
pub use pipeline::{ForecastPipeline, RegionOutcome, RegionTask, RunOutput};
pub use problem::Problem;
pub use region::RegionKey;
pub use series::{Observation, ObservedSeries};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
