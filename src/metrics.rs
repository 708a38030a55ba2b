//! Error metrics between observed and predicted cumulative series.
//!
//! Percentage metrics only count points whose observed value is positive and
//! are reported in percent. When no point qualifies they return NaN.

/// Mean absolute error.
pub fn mae(truth: &[f64], pred: &[f64]) -> f64 {
    mean(truth.iter().zip(pred).map(|(t, p)| (t - p).abs()))
}

/// Mean squared error.
pub fn mse(truth: &[f64], pred: &[f64]) -> f64 {
    mean(truth.iter().zip(pred).map(|(t, p)| (t - p).powi(2)))
}

/// Mean absolute percentage error over points with positive truth.
pub fn mape(truth: &[f64], pred: &[f64]) -> f64 {
    mean(
        truth
            .iter()
            .zip(pred)
            .filter(|(t, _)| **t > 0.0)
            .map(|(t, p)| ((t - p) / t).abs()),
    ) * 100.0
}

/// Sign of the mean percentage error: 1 when the model under-predicts on
/// average, -1 when it over-predicts.
pub fn sign_mpe(truth: &[f64], pred: &[f64]) -> f64 {
    let mpe = mean(
        truth
            .iter()
            .zip(pred)
            .filter(|(t, _)| **t > 0.0)
            .map(|(t, p)| (t - p) / t),
    );
    if mpe.is_nan() || mpe == 0.0 {
        mpe
    } else {
        mpe.signum()
    }
}

/// MAPE of the increments accumulated since the last training day.
pub fn mape_daily_delta(
    truth_last_train: f64,
    pred_last_train: f64,
    truth: &[f64],
    pred: &[f64],
) -> f64 {
    let delta_truth: Vec<f64> = truth.iter().map(|t| t - truth_last_train).collect();
    let delta_pred: Vec<f64> = pred.iter().map(|p| p - pred_last_train).collect();
    mape(&delta_truth, &delta_pred)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}
