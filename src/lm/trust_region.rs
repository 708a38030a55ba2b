//! Gain-ratio damping control.
//!
//! The damping parameter follows the agreement between the cost reduction a
//! linearized step predicts and the reduction it actually achieves.

use faer::{Col, Mat};

use super::config::LmConfig;

/// Damping state for the gain-ratio schedule.
#[derive(Debug, Clone)]
pub struct TrustRegion {
    /// Current value of the damping parameter
    pub lambda: f64,

    /// Minimum allowed value for the damping parameter
    pub lambda_min: f64,

    /// Maximum allowed value for the damping parameter
    pub lambda_max: f64,

    /// Factor to increase lambda by when a step is rejected
    pub lambda_increase_factor: f64,

    /// Factor to decrease lambda by after a good step
    pub lambda_decrease_factor: f64,

    /// Minimum gain ratio required to accept a step
    pub min_gain_ratio: f64,

    /// Gain ratio above which lambda is decreased
    pub good_gain_ratio: f64,
}

impl Default for TrustRegion {
    fn default() -> Self {
        Self::from_config(&LmConfig::default())
    }
}

impl TrustRegion {
    /// Damping limits and factors taken from an LM configuration.
    pub fn from_config(config: &LmConfig) -> Self {
        Self {
            lambda: config.initial_lambda,
            lambda_min: config.min_lambda,
            lambda_max: config.max_lambda,
            lambda_increase_factor: config.lambda_up_factor,
            lambda_decrease_factor: config.lambda_down_factor,
            min_gain_ratio: 1e-3,
            good_gain_ratio: 0.75,
        }
    }

    /// Update lambda from a gain ratio. Returns whether the step is accepted.
    pub fn update_lambda(&mut self, gain_ratio: f64) -> bool {
        if gain_ratio > self.min_gain_ratio {
            if gain_ratio > self.good_gain_ratio {
                self.lambda = (self.lambda * self.lambda_decrease_factor).max(self.lambda_min);
            }
            true
        } else {
            self.lambda = (self.lambda * self.lambda_increase_factor).min(self.lambda_max);
            false
        }
    }

    /// Whether lambda has been driven to its ceiling.
    pub fn exhausted(&self) -> bool {
        self.lambda >= self.lambda_max
    }

    /// Ratio of actual to predicted cost reduction.
    pub fn gain_ratio(current_cost: f64, new_cost: f64, predicted_reduction: f64) -> f64 {
        let actual_reduction = current_cost - new_cost;

        if !actual_reduction.is_finite() {
            return 0.0;
        }
        if predicted_reduction.abs() < 1e-10 {
            if actual_reduction.abs() < 1e-10 {
                1.0
            } else {
                0.0
            }
        } else {
            actual_reduction / predicted_reduction
        }
    }

    /// Reduction of the sum of squares predicted by the linearization.
    ///
    /// With gradient `g = J^T r` and `jtj = J^T J`, the linear model gives
    /// `-(2 g.s + s^T J^T J s)` for a step `s`.
    pub fn predicted_reduction(g: &Col<f64>, jtj: &Mat<f64>, step: &Col<f64>) -> f64 {
        let n = step.nrows();
        let mut gs = 0.0;
        let mut quad = 0.0;
        for i in 0..n {
            gs += g[i] * step[i];
            for j in 0..n {
                quad += step[i] * jtj[(i, j)] * step[j];
            }
        }
        -(2.0 * gs + quad)
    }
}
