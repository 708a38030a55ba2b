//! Time-varying forcing terms of the model.

use std::f64::consts::PI;

/// Floor the mortality fraction decays toward.
pub const MORTALITY_FLOOR: f64 = 0.001;

/// Governmental response factor at day `t`.
///
/// An arctangent step centred on `days` moves the factor from about 2 down to
/// about 0 at a speed set by `r_s`; a Gaussian bump of height `jump` centred on
/// `t_jump` with width `std_normal` models a resurgence on top of it.
pub fn response_factor(t: f64, days: f64, r_s: f64, jump: f64, t_jump: f64, std_normal: f64) -> f64 {
    (2.0 / PI) * (-(t - days) / 20.0 * r_s).atan()
        + 1.0
        + jump * (-(t - t_jump).powi(2) / (2.0 * std_normal.powi(2))).exp()
}

/// Mortality fraction at day `t`, decaying from `p_dth` toward [`MORTALITY_FLOOR`].
pub fn mortality_fraction(t: f64, p_dth: f64, r_dthdecay: f64) -> f64 {
    (2.0 / PI) * (p_dth - MORTALITY_FLOOR) * ((-t / 20.0 * r_dthdecay).atan() + PI / 2.0)
        + MORTALITY_FLOOR
}
