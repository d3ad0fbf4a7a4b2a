mod mean_reversion;
mod momentum;

pub use mean_reversion::MeanReversionEvaluator;
pub use momentum::MomentumEvaluator;

use common::PricePoint;

/// Closes of the last `n` points, or `None` when history is shorter.
pub(crate) fn trailing_closes(history: &[PricePoint], n: usize) -> Option<Vec<f64>> {
    if n == 0 || history.len() < n {
        return None;
    }
    Some(history[history.len() - n..].iter().map(|p| p.close).collect())
}

/// How far `value` has travelled towards `threshold`, saturating at twice
/// the threshold.
pub(crate) fn trigger_confidence(value: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return 1.0;
    }
    (value.abs() / (2.0 * threshold.abs())).min(1.0)
}
