use thiserror::Error;

/// Reasons the ODE integrator can abort a solve.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    /// The state became NaN or infinite.
    #[error("non-finite state at t = {t}")]
    NonFinite { t: f64 },

    /// The adaptive step fell below the representable minimum.
    #[error("step size {h:.3e} underflowed at t = {t}")]
    StepSizeUnderflow { t: f64, h: f64 },

    /// The step budget was spent before the last evaluation time.
    #[error("exceeded {max_steps} steps before reaching t = {t_end}")]
    TooManySteps { max_steps: usize, t_end: f64 },

    /// Evaluation times must be non-decreasing and start at the initial time.
    #[error("invalid evaluation grid: {0}")]
    InvalidGrid(String),
}

/// Error types for the epiforecast library.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// Error indicating a mismatch in vector or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The derived currently-infected population is not positive.
    ///
    /// This signals corrupted upstream counts and aborts the region.
    #[error("currently infected population is non-positive ({0})")]
    NonPositiveInfected(f64),

    /// The constructed initial susceptible population is negative.
    #[error("initial susceptible population is negative ({0})")]
    NegativeSusceptible(f64),

    /// The observed series never reached the day-index threshold.
    #[error("{region} never reached {threshold} cumulative cases")]
    ThresholdNotReached { region: String, threshold: f64 },

    /// Too few observed days in the fitting window.
    #[error("{region} has {rows} usable days, more than {required} are needed")]
    InsufficientHistory {
        region: String,
        rows: usize,
        required: usize,
    },

    /// No population figure was supplied for the region.
    #[error("no population for {0}")]
    MissingPopulation(String),

    /// The ODE integrator aborted.
    #[error("Integration failed: {0}")]
    Integration(#[from] IntegrationError),

    /// The global search found no usable point.
    #[error("Optimization failed: {0}")]
    OptimizationFailure(String),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

impl ForecastError {
    /// Whether the region should be dropped with a warning rather than an error.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ForecastError::ThresholdNotReached { .. } | ForecastError::InsufficientHistory { .. }
        )
    }
}

/// Result type alias for epiforecast operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<String> for ForecastError {
    fn from(s: String) -> Self {
        ForecastError::Other(s)
    }
}

impl From<&str> for ForecastError {
    fn from(s: &str) -> Self {
        ForecastError::Other(s.to_string())
    }
}
