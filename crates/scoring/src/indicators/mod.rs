pub mod rsi;

pub use rsi::RsiIndicator;

/// Simple moving average of the last `period` values.
/// Returns `None` if fewer than `period` values are available.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Fractional return from the value `periods` steps back to the last value.
/// Falls back to the first value when the series is shorter.
pub fn trailing_return(values: &[f64], periods: usize) -> Option<f64> {
    let last = *values.last()?;
    let base = if values.len() > periods {
        values[values.len() - 1 - periods]
    } else {
        values[0]
    };
    if base == 0.0 {
        return None;
    }
    Some((last - base) / base)
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}
