//! Configuration options for the bounded Levenberg-Marquardt solvers.
//!
//! One configuration type drives both local back-ends: the classic
//! multiplicative damping schedule and the gain-ratio trust region.

use serde::{Deserialize, Serialize};

/// How the damping parameter reacts to a trial step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DampingStrategy {
    /// Accept any step that lowers the cost; shrink or grow lambda by fixed factors.
    Multiplicative,

    /// Compare the actual and predicted reduction and adapt lambda from that ratio.
    GainRatio,
}

impl Default for DampingStrategy {
    fn default() -> Self {
        DampingStrategy::Multiplicative
    }
}

/// Configuration options for the Levenberg-Marquardt algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of iterations. Default: 500
    pub max_iterations: usize,

    /// Tolerance for relative change in cost. Default: 1e-8
    pub ftol: f64,

    /// Tolerance for change in parameter values. Default: 1e-8
    pub xtol: f64,

    /// Tolerance for the projected gradient norm. Default: 1e-8
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-10
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e10
    pub max_lambda: f64,

    /// Relative step used by the finite-difference Jacobian. Default: 1e-6
    pub diff_step: f64,

    /// Damping schedule. Default: Multiplicative
    pub damping: DampingStrategy,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-10,
            max_lambda: 1e10,
            diff_step: 1e-6,
            damping: DampingStrategy::default(),
        }
    }
}

impl LmConfig {
    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for change in cost.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    /// Set the tolerance for change in parameter values.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }

    /// Set the damping schedule.
    pub fn with_damping(mut self, damping: DampingStrategy) -> Self {
        self.damping = damping;
        self
    }
}
