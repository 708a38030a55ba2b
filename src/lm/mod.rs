//! Bounded Levenberg-Marquardt solvers.
//!
//! Both local back-ends share one projected LM iteration and differ only in how
//! the damping parameter reacts to a trial step; see [`DampingStrategy`].

pub mod algorithm;
pub mod config;
pub mod trust_region;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::{DampingStrategy, LmConfig};
pub use trust_region::TrustRegion;
