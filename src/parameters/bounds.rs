//! Parameter bounds.
//!
//! Two flavours of bounds feed the optimizers: a static default table, and
//! drift bounds built around a previously fitted value. Drift bounds are
//! additionally clamped by the re-initialization table so the search never
//! wanders into degenerate ranges. Every derived pair is well formed and
//! contains the value it was derived from.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ModelParams, REINIT_LIMITS};
use crate::config::OptimizerFamily;
use crate::model::ModelVariant;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must be less than max ({max})")]
    InvalidBounds { min: f64, max: f64 },
}

/// Static default search range per parameter, in vector order.
pub const DEFAULT_BOUNDS: [(f64, f64); 12] = [
    (0.1, 10.0),
    (-200.0, 100.0),
    (1.0, 15.0),
    (0.05, 0.5),
    (0.01, 0.25),
    (0.0, 5.0),
    (0.001, 5.0),
    (0.001, 5.0),
    (0.0, 5.0),
    (0.0, 100.0),
    (0.1, 100.0),
    (0.2, 2.0),
];

/// Parameters whose natural scale is a day offset; they drift additively.
const ADDITIVE: [usize; 2] = [1, 9];

const JUMP: usize = 8;
const STD_NORMAL: usize = 10;
const K3: usize = 11;

/// Closed interval constraint on one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Bounds {
    /// Create a new bounds constraint.
    ///
    /// # Returns
    ///
    /// A new `Bounds` object if min <= max, or an error otherwise
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if !(min <= max) {
            return Err(BoundsError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// Check if a value is within the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp a value to be within the bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Smallest interval containing both `self` and `value`.
    fn widened_to(self, value: f64) -> Self {
        Self {
            min: self.min.min(value),
            max: self.max.max(value),
        }
    }
}

impl From<(f64, f64)> for Bounds {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

/// How far a warm-started search may move away from the prior fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftPolicy {
    /// Relative drift below the prior value
    pub lower_pct: f64,
    /// Relative drift above the prior value
    pub upper_pct: f64,
    /// Minimum absolute drift below the prior value
    pub lower_abs: f64,
    /// Minimum absolute drift above the prior value
    pub upper_abs: f64,
    /// Drift in days for day-offset parameters, both directions
    pub day_shift: f64,
    /// Fixed ranges for the resurgence amplitude and width, ignoring the prior
    pub pinned_jump: Option<(Bounds, Bounds)>,
}

impl DriftPolicy {
    pub fn for_family(family: OptimizerFamily) -> Self {
        match family {
            OptimizerFamily::Local => Self {
                lower_pct: 0.2,
                upper_pct: 0.2,
                lower_abs: 0.2,
                upper_abs: 0.2,
                day_shift: 10.0,
                pinned_jump: None,
            },
            OptimizerFamily::Global => Self {
                lower_pct: 0.5,
                upper_pct: 1.0,
                lower_abs: 0.5,
                upper_abs: 1.5,
                day_shift: 20.0,
                pinned_jump: Some((
                    Bounds { min: 0.0, max: 5.0 },
                    Bounds { min: 1.0, max: 100.0 },
                )),
            },
        }
    }

    /// Drift bounds for parameter `index` around `prior`.
    fn bounds_for(&self, index: usize, prior: f64) -> Bounds {
        let table = Bounds::from(DEFAULT_BOUNDS[index]);
        let (floor, ceiling) = REINIT_LIMITS[index];
        let lo = table.min.max(floor);
        let hi = table.max.min(ceiling).max(lo);

        // A prior outside the table (or NaN) is pulled back into it first.
        let x = if prior.is_finite() {
            table.clamp(prior)
        } else {
            table.clamp(super::DEFAULT_START[index])
        };

        let pinned = match self.pinned_jump {
            Some((jump, _)) if index == JUMP => Some(jump),
            Some((_, std_normal)) if index == STD_NORMAL => Some(std_normal),
            _ => None,
        };

        let derived = if index == K3 {
            table
        } else if let Some(pinned) = pinned {
            pinned
        } else if ADDITIVE.contains(&index) {
            Bounds {
                min: (x - self.day_shift).max(lo),
                max: (x + self.day_shift).min(hi),
            }
        } else {
            let down = (self.lower_pct * x.abs()).max(self.lower_abs);
            let up = (self.upper_pct * x.abs()).max(self.upper_abs);
            Bounds {
                min: (x - down).max(lo),
                max: (x + up).min(hi),
            }
        };

        derived.widened_to(x)
    }
}

/// One `Bounds` per optimized parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundsSet {
    bounds: Vec<Bounds>,
}

impl BoundsSet {
    /// Build from explicit pairs.
    pub fn new(bounds: Vec<Bounds>) -> Result<Self, BoundsError> {
        for b in &bounds {
            Bounds::new(b.min, b.max)?;
        }
        Ok(Self { bounds })
    }

    /// The static default table for a model variant.
    pub fn defaults(variant: ModelVariant) -> Self {
        Self {
            bounds: DEFAULT_BOUNDS[..variant.parameter_count()]
                .iter()
                .map(|&pair| Bounds::from(pair))
                .collect(),
        }
    }

    /// Drift bounds around a prior fit for the given optimizer family.
    pub fn from_prior(prior: &ModelParams, variant: ModelVariant, family: OptimizerFamily) -> Self {
        let policy = DriftPolicy::for_family(family);
        let values = prior.to_array12();
        Self {
            bounds: (0..variant.parameter_count())
                .map(|i| policy.bounds_for(i, values[i]))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Bounds> {
        self.bounds.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bounds> {
        self.bounds.iter()
    }

    /// Project a parameter vector onto the box.
    pub fn project(&self, params: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(
            params
                .iter()
                .zip(self.bounds.iter())
                .map(|(&p, b)| b.clamp(p)),
        )
    }

    pub fn contains(&self, params: &Array1<f64>) -> bool {
        params.len() == self.bounds.len()
            && params
                .iter()
                .zip(self.bounds.iter())
                .all(|(&p, b)| b.contains(p))
    }

    pub fn is_well_formed(&self) -> bool {
        self.bounds
            .iter()
            .all(|b| b.min.is_finite() && b.max.is_finite() && b.min <= b.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounds_new() {
        assert!(Bounds::new(0.0, 10.0).is_ok());
        assert!(Bounds::new(1.0, 1.0).is_ok());
        assert_eq!(
            Bounds::new(2.0, 1.0),
            Err(BoundsError::InvalidBounds { min: 2.0, max: 1.0 })
        );
        assert!(Bounds::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_bounds_clamp() {
        let b = Bounds::new(0.0, 10.0).unwrap();
        assert_eq!(b.clamp(-5.0), 0.0);
        assert_eq!(b.clamp(15.0), 10.0);
        assert_eq!(b.clamp(3.0), 3.0);
        assert!(b.contains(10.0));
        assert!(!b.contains(10.1));
    }

    #[test]
    fn test_default_table_sizes() {
        assert_eq!(BoundsSet::defaults(ModelVariant::Base).len(), 11);
        let with_k3 = BoundsSet::defaults(ModelVariant::InitialStateCorrection);
        assert_eq!(with_k3.len(), 12);
        assert_eq!(with_k3.get(11), Some(Bounds { min: 0.2, max: 2.0 }));
    }

    #[test]
    fn test_local_multiplicative_drift() {
        let prior = ModelParams::default();
        let set = BoundsSet::from_prior(&prior, ModelVariant::Base, OptimizerFamily::Local);

        // alpha = 1: 20% drift is below the 0.2 fallback, so both apply equally.
        let alpha = set.get(0).unwrap();
        assert_relative_eq!(alpha.min, 0.8);
        assert_relative_eq!(alpha.max, 1.2);

        // r_s = 2: 20% drift gives 0.4 either way, floor of the table is 1.
        let r_s = set.get(2).unwrap();
        assert_relative_eq!(r_s.min, 1.6);
        assert_relative_eq!(r_s.max, 2.4);

        // r_dth = 0.2: the absolute fallback would reach 0, the table stops it at 0.05.
        let r_dth = set.get(3).unwrap();
        assert_relative_eq!(r_dth.min, 0.05);
        assert_relative_eq!(r_dth.max, 0.4);
    }

    #[test]
    fn test_days_drift_additively() {
        let mut prior = ModelParams::default();
        prior.days = -50.0;
        let local = BoundsSet::from_prior(&prior, ModelVariant::Base, OptimizerFamily::Local);
        assert_eq!(local.get(1), Some(Bounds { min: -60.0, max: -40.0 }));

        let global = BoundsSet::from_prior(&prior, ModelVariant::Base, OptimizerFamily::Global);
        assert_eq!(global.get(1), Some(Bounds { min: -70.0, max: -30.0 }));
    }

    #[test]
    fn test_global_family_pins_jump_terms() {
        let mut prior = ModelParams::default();
        prior.jump = 0.3;
        prior.std_normal = 40.0;
        let set = BoundsSet::from_prior(&prior, ModelVariant::Base, OptimizerFamily::Global);
        assert_eq!(set.get(8), Some(Bounds { min: 0.0, max: 5.0 }));
        assert_eq!(set.get(10), Some(Bounds { min: 1.0, max: 100.0 }));
    }

    #[test]
    fn test_prior_outside_table_is_pulled_in() {
        let mut prior = ModelParams::default();
        prior.alpha = 50.0;
        prior.p_dth = f64::NAN;
        let set = BoundsSet::from_prior(&prior, ModelVariant::Base, OptimizerFamily::Local);
        let alpha = set.get(0).unwrap();
        assert_eq!(alpha.max, 10.0);
        assert!(alpha.min <= alpha.max);
        assert!(set.get(4).unwrap().contains(0.05));
        assert!(set.is_well_formed());
    }

    #[test]
    fn test_k3_keeps_static_range() {
        let mut prior = ModelParams::default();
        prior.k3 = 1.9;
        let set = BoundsSet::from_prior(
            &prior,
            ModelVariant::InitialStateCorrection,
            OptimizerFamily::Local,
        );
        assert_eq!(set.get(11), Some(Bounds { min: 0.2, max: 2.0 }));
    }

    #[test]
    fn test_project() {
        let set = BoundsSet::defaults(ModelVariant::Base);
        let wild = Array1::from(vec![100.0, -500.0, 0.0, 1.0, 0.0, 9.0, 0.0, 0.0, -1.0, 200.0, 0.0]);
        let projected = set.project(&wild);
        assert!(set.contains(&projected));
        assert_eq!(projected[0], 10.0);
        assert_eq!(projected[1], -200.0);
    }
}
