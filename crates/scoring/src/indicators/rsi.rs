/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average.
/// Returns `None` until at least `period + 1` closes are available.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self { period }
    }

    /// Compute RSI from a slice of close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let initial = &changes[..self.period];

        let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / self.period as f64;
        let mut avg_loss = initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>()
            / self.period as f64;

        for &change in &changes[self.period..] {
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            avg_gain = (avg_gain * (self.period - 1) as f64 + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period - 1) as f64 + loss) / self.period as f64;
        }

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    /// Map an RSI reading to a 0-100 momentum score: readings near 50 score
    /// highest, oversold readings keep a mild premium, overbought ones decay.
    pub fn score(rsi: f64) -> f64 {
        let score = if (30.0..=70.0).contains(&rsi) {
            100.0 - (rsi - 50.0).abs() * 2.0
        } else if rsi < 30.0 {
            60.0 + (30.0 - rsi)
        } else {
            60.0 - (rsi - 70.0)
        };
        score.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_returns_none_when_insufficient_data() {
        let rsi = RsiIndicator::new(14);
        assert!(rsi.compute(&[100.0; 14]).is_none());
    }

    #[test]
    fn rsi_all_gains_returns_100() {
        let rsi = RsiIndicator::new(3);
        let value = rsi.compute(&[10.0, 11.0, 12.0, 13.0, 14.0]).unwrap();
        assert!((value - 100.0).abs() < 1e-6, "Expected ~100, got {value}");
    }

    #[test]
    fn rsi_all_losses_returns_0() {
        let rsi = RsiIndicator::new(3);
        let value = rsi.compute(&[14.0, 13.0, 12.0, 11.0, 10.0]).unwrap();
        assert!(value.abs() < 1e-6, "Expected ~0, got {value}");
    }

    #[test]
    fn score_peaks_at_neutral_reading() {
        assert_eq!(RsiIndicator::score(50.0), 100.0);
        assert_eq!(RsiIndicator::score(70.0), 60.0);
        assert_eq!(RsiIndicator::score(20.0), 70.0);
        assert_eq!(RsiIndicator::score(100.0), 30.0);
    }
}
