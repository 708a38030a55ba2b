//! # Model Parameters
//!
//! The fitted parameter vector of the compartmental model, in a fixed order:
//!
//! | index | name         | meaning                                  |
//! |-------|--------------|------------------------------------------|
//! | 0     | `alpha`      | infection rate                           |
//! | 1     | `days`       | median day of governmental action        |
//! | 2     | `r_s`        | rate of action                           |
//! | 3     | `r_dth`      | rate of death                            |
//! | 4     | `p_dth`      | initial mortality fraction               |
//! | 5     | `r_dthdecay` | rate of mortality decay                  |
//! | 6     | `k1`         | exposed seeding coefficient              |
//! | 7     | `k2`         | infectious seeding coefficient           |
//! | 8     | `jump`       | resurgence amplitude                     |
//! | 9     | `t_jump`     | resurgence peak time                     |
//! | 10    | `std_normal` | resurgence width                         |
//! | 11    | `k3`         | initial-state correction (second variant)|
//!
//! Optimizers see plain `Array1<f64>` vectors; [`ModelParams`] gives them names.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::{INFINITY, NEG_INFINITY};

use crate::error::{ForecastError, Result};
use crate::model::ModelVariant;

pub mod bounds;
pub mod fit_row;
pub mod warm_start;

pub use bounds::{Bounds, BoundsError, BoundsSet, DriftPolicy};
pub use fit_row::ParameterFitRow;
pub use warm_start::{PriorFit, WarmStart};

/// Number of parameters shared by both model variants.
pub const BASE_PARAMETER_COUNT: usize = 11;

/// Parameter names in vector order.
pub const PARAMETER_NAMES: [&str; 12] = [
    "alpha",
    "days",
    "r_s",
    "r_dth",
    "p_dth",
    "r_dthdecay",
    "k1",
    "k2",
    "jump",
    "t_jump",
    "std_normal",
    "k3",
];

/// Starting point when no prior fit exists.
pub const DEFAULT_START: [f64; 12] = [1.0, 0.0, 2.0, 0.2, 0.05, 0.2, 3.0, 3.0, 0.1, 3.0, 1.0, 1.0];

/// Re-initialization floor and ceiling per parameter.
///
/// Candidates are clamped into these ranges inside the objective and before
/// fitted values are reported.
pub const REINIT_LIMITS: [(f64, f64); 12] = [
    (0.0, INFINITY),
    (NEG_INFINITY, INFINITY),
    (0.0, INFINITY),
    (0.02, 1.0),
    (0.0, 1.0),
    (0.0, INFINITY),
    (0.0, INFINITY),
    (0.0, INFINITY),
    (0.0, INFINITY),
    (-100.0, INFINITY),
    (1.0, INFINITY),
    (NEG_INFINITY, INFINITY),
];

/// Named view of a parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub alpha: f64,
    pub days: f64,
    pub r_s: f64,
    pub r_dth: f64,
    pub p_dth: f64,
    pub r_dthdecay: f64,
    pub k1: f64,
    pub k2: f64,
    pub jump: f64,
    pub t_jump: f64,
    pub std_normal: f64,
    /// 1.0 unless the second model variant estimates it
    pub k3: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::from_array(DEFAULT_START)
    }
}

impl ModelParams {
    fn from_array(v: [f64; 12]) -> Self {
        Self {
            alpha: v[0],
            days: v[1],
            r_s: v[2],
            r_dth: v[3],
            p_dth: v[4],
            r_dthdecay: v[5],
            k1: v[6],
            k2: v[7],
            jump: v[8],
            t_jump: v[9],
            std_normal: v[10],
            k3: v[11],
        }
    }

    /// Build from 11 or 12 values; a missing `k3` defaults to 1.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != BASE_PARAMETER_COUNT && values.len() != BASE_PARAMETER_COUNT + 1 {
            return Err(ForecastError::DimensionMismatch(format!(
                "Expected {} or {} parameters, got {}",
                BASE_PARAMETER_COUNT,
                BASE_PARAMETER_COUNT + 1,
                values.len()
            )));
        }
        let mut v = DEFAULT_START;
        v[..values.len()].copy_from_slice(values);
        Ok(Self::from_array(v))
    }

    pub fn to_array12(&self) -> [f64; 12] {
        [
            self.alpha,
            self.days,
            self.r_s,
            self.r_dth,
            self.p_dth,
            self.r_dthdecay,
            self.k1,
            self.k2,
            self.jump,
            self.t_jump,
            self.std_normal,
            self.k3,
        ]
    }

    /// The values the given variant optimizes over.
    pub fn to_vec(&self, variant: ModelVariant) -> Vec<f64> {
        self.to_array12()[..variant.parameter_count()].to_vec()
    }

    pub fn to_array(&self, variant: ModelVariant) -> Array1<f64> {
        Array1::from(self.to_vec(variant))
    }

    /// Clamp every parameter into its re-initialization range.
    pub fn clamped(&self) -> Self {
        let mut v = self.to_array12();
        for (value, &(floor, ceiling)) in v.iter_mut().zip(REINIT_LIMITS.iter()) {
            *value = value.min(ceiling).max(floor);
        }
        Self::from_array(v)
    }
}
