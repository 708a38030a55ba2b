//! Run configuration.
//!
//! Everything that used to be process-wide state (which optimizer runs, whether
//! confidence bands are produced, the forecast horizon, today's date) is carried
//! by a [`RunConfig`] value that callers thread into each component.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

use crate::error::{ForecastError, Result};
use crate::global_opt::SimulatedAnnealing;
use crate::lm::{DampingStrategy, LmConfig};

/// Cumulative case count that defines day-index 0.
pub const CASE_THRESHOLD: f64 = 100.0;

/// A fitting window needs strictly more rows than this.
pub const MIN_HISTORY_DAYS: usize = 7;

/// Fitting back-end selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    /// Projected Levenberg-Marquardt with multiplicative damping.
    BoundedLm,

    /// Projected Levenberg-Marquardt driven by the gain ratio.
    TrustRegion,

    /// Simulated annealing followed by a bounded polish.
    Annealing,
}

/// Optimizer families differ in drift bounds and in how failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerFamily {
    Local,
    Global,
}

impl OptimizerKind {
    pub fn family(self) -> OptimizerFamily {
        match self {
            OptimizerKind::BoundedLm | OptimizerKind::TrustRegion => OptimizerFamily::Local,
            OptimizerKind::Annealing => OptimizerFamily::Global,
        }
    }

    /// Damping schedule used by the local solver this kind maps to.
    pub fn damping(self) -> DampingStrategy {
        match self {
            OptimizerKind::TrustRegion => DampingStrategy::GainRatio,
            _ => DampingStrategy::Multiplicative,
        }
    }
}

impl Default for OptimizerKind {
    fn default() -> Self {
        OptimizerKind::BoundedLm
    }
}

/// Fixed clinical figures from meta-analyses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicalRates {
    /// Median incubation time (days)
    pub incubation_days: f64,
    /// Median time to detection (days)
    pub detection_days: f64,
    /// Median recovery time outside hospital (days)
    pub recovery_days: f64,
    /// Median recovery time in hospital (days)
    pub hospital_recovery_days: f64,
    /// Median time on a ventilator (days)
    pub ventilated_days: f64,
    /// Fraction of true cases that get detected
    pub p_detected: f64,
    /// Fraction of detected cases that get hospitalized
    pub p_hospitalized: f64,
    /// Fraction of hospitalized cases that get ventilated
    pub p_ventilated: f64,
}

impl Default for ClinicalRates {
    fn default() -> Self {
        Self {
            incubation_days: 5.0,
            detection_days: 2.0,
            recovery_days: 10.0,
            hospital_recovery_days: 15.0,
            ventilated_days: 10.0,
            p_detected: 0.2,
            p_hospitalized: 0.03,
            p_ventilated: 0.25,
        }
    }
}

/// Exit rates derived from [`ClinicalRates`] half-lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRates {
    /// Leaving incubation
    pub r_i: f64,
    /// Detection
    pub r_d: f64,
    /// Recovery outside hospital
    pub r_ri: f64,
    /// Recovery in hospital
    pub r_rh: f64,
    /// Recovery on a ventilator
    pub r_rv: f64,
}

impl ClinicalRates {
    pub fn transition_rates(&self) -> TransitionRates {
        TransitionRates {
            r_i: LN_2 / self.incubation_days,
            r_d: LN_2 / self.detection_days,
            r_ri: LN_2 / self.recovery_days,
            r_rh: LN_2 / self.hospital_recovery_days,
            r_rv: LN_2 / self.ventilated_days,
        }
    }
}

/// How far forward the forecast runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Horizon {
    /// Last forecast date, inclusive.
    EndDate(NaiveDate),

    /// Number of days after the region's day-0 date, inclusive.
    DaysAfterStart(u32),
}

impl Horizon {
    /// Number of daily grid points starting at `anchor`. Never less than one.
    pub fn grid_len(&self, anchor: NaiveDate) -> usize {
        match *self {
            Horizon::EndDate(end) => ((end - anchor).num_days() + 1).max(1) as usize,
            Horizon::DaysAfterStart(days) => days as usize + 1,
        }
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Horizon::DaysAfterStart(365)
    }
}

/// Settings for the residual-based confidence bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Produce bands at all.
    pub enabled: bool,

    /// Central coverage of the band, in (0, 1).
    pub q: f64,

    /// Cutoff date of the reference forecast. Only dates strictly after it are
    /// compared against the truth.
    pub reference_cutoff: Option<NaiveDate>,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            q: 0.5,
            reference_cutoff: None,
        }
    }
}

/// Complete configuration for one forecasting run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Fitting back-end
    pub optimizer: OptimizerKind,

    /// Last date included in the fitting window; the forward-only table starts here.
    pub today: NaiveDate,

    /// Forecast horizon
    pub horizon: Horizon,

    /// Clinical constants
    pub clinical: ClinicalRates,

    /// Cumulative cases defining day-index 0
    pub case_threshold: f64,

    /// A fitting window needs strictly more rows than this
    pub min_history: usize,

    /// Local solver settings
    pub lm: LmConfig,

    /// Global solver settings
    pub annealing: SimulatedAnnealing,

    /// Confidence band settings
    pub confidence: ConfidenceConfig,

    /// Seed for the annealing RNG; each region mixes in its own key.
    pub seed: Option<u64>,

    /// Worker threads; defaults to the core count minus two.
    pub workers: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::default(),
            today: Local::now().date_naive(),
            horizon: Horizon::default(),
            clinical: ClinicalRates::default(),
            case_threshold: CASE_THRESHOLD,
            min_history: MIN_HISTORY_DAYS,
            lm: LmConfig::default(),
            annealing: SimulatedAnnealing::default(),
            confidence: ConfidenceConfig::default(),
            seed: None,
            workers: None,
        }
    }
}

impl RunConfig {
    /// Create a configuration for the given date with defaults elsewhere.
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_horizon(mut self, horizon: Horizon) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_confidence(mut self, q: f64, reference_cutoff: NaiveDate) -> Self {
        self.confidence = ConfidenceConfig {
            enabled: true,
            q,
            reference_cutoff: Some(reference_cutoff),
        };
        self
    }

    pub fn with_lm(mut self, lm: LmConfig) -> Self {
        self.lm = lm;
        self
    }

    pub fn with_annealing(mut self, annealing: SimulatedAnnealing) -> Self {
        self.annealing = annealing;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// LM settings with the damping schedule implied by the optimizer kind.
    pub fn local_solver_config(&self) -> LmConfig {
        self.lm.clone().with_damping(self.optimizer.damping())
    }

    /// Worker count: explicit, or cores minus two, never below one.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(2))
                .unwrap_or(1)
                .max(1),
        }
    }

    /// Check values that would otherwise fail deep inside a region run.
    pub fn validate(&self) -> Result<()> {
        if !(self.confidence.q > 0.0 && self.confidence.q < 1.0) {
            return Err(ForecastError::InvalidInput(format!(
                "confidence coverage must lie in (0, 1), got {}",
                self.confidence.q
            )));
        }
        if self.confidence.enabled && self.confidence.reference_cutoff.is_none() {
            return Err(ForecastError::InvalidInput(
                "confidence bands need a reference cutoff date".to_string(),
            ));
        }
        let c = &self.clinical;
        for (name, p) in [
            ("p_detected", c.p_detected),
            ("p_hospitalized", c.p_hospitalized),
            ("p_ventilated", c.p_ventilated),
        ] {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ForecastError::InvalidInput(format!(
                    "{} must lie in (0, 1], got {}",
                    name, p
                )));
            }
        }
        Ok(())
    }
}
