use common::PricePoint;

use super::{round2, FactorCalculator, FactorInputs, FactorKind};
use crate::indicators::{sma, trailing_return, RsiIndicator};

/// Minimum daily points before the full price-history method is used.
pub const KLINE_MIN_POINTS: usize = 20;

/// Trend strength from moving-average alignment, RSI, multi-horizon returns
/// and volume expansion. Falls back to the daily change and turnover rate when
/// history is short.
#[derive(Debug, Clone)]
pub struct MomentumFactor {
    short_period: usize,
    medium_period: usize,
    long_period: usize,
    rsi: RsiIndicator,
}

impl Default for MomentumFactor {
    fn default() -> Self {
        Self {
            short_period: 5,
            medium_period: 20,
            long_period: 60,
            rsi: RsiIndicator::new(14),
        }
    }
}

impl MomentumFactor {
    fn history_score(&self, history: &[PricePoint]) -> f64 {
        let closes: Vec<f64> = history.iter().map(|p| p.close).collect();
        let score = self.ma_score(&closes) * 0.30
            + self.rsi_score(&closes) * 0.25
            + price_momentum_score(&closes) * 0.25
            + volume_momentum_score(history) * 0.20;
        round2(score.clamp(0.0, 100.0))
    }

    fn ma_score(&self, closes: &[f64]) -> f64 {
        if closes.len() < self.long_period {
            return 50.0;
        }
        let (Some(short), Some(medium), Some(long)) = (
            sma(closes, self.short_period),
            sma(closes, self.medium_period),
            sma(closes, self.long_period),
        ) else {
            return 50.0;
        };
        let price = closes[closes.len() - 1];

        if price > short && short > medium && medium > long {
            if long > 0.0 && short / long > 1.05 {
                95.0
            } else {
                85.0
            }
        } else if price > short && short > medium {
            70.0
        } else if price > medium {
            55.0
        } else if price > long {
            45.0
        } else if short < medium && medium < long {
            20.0
        } else {
            35.0
        }
    }

    fn rsi_score(&self, closes: &[f64]) -> f64 {
        self.rsi.compute(closes).map_or(50.0, RsiIndicator::score)
    }

    fn simple_score(change_pct: Option<f64>, turnover_rate: Option<f64>) -> Option<f64> {
        if change_pct.is_none() && turnover_rate.is_none() {
            return None;
        }
        let price_score = change_pct.map_or(50.0, |c| {
            if c > 5.0 {
                90.0
            } else if c > 2.0 {
                75.0
            } else if c > 0.0 {
                60.0
            } else if c > -2.0 {
                45.0
            } else if c > -5.0 {
                30.0
            } else {
                15.0
            }
        });
        let volume_score = turnover_rate.map_or(50.0, |t| {
            if (1.0..=5.0).contains(&t) {
                80.0
            } else if (0.5..1.0).contains(&t) || (t > 5.0 && t <= 10.0) {
                65.0
            } else {
                40.0
            }
        });
        Some(round2(price_score * 0.7 + volume_score * 0.3))
    }
}

impl FactorCalculator for MomentumFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Momentum
    }

    fn calculate(&self, inputs: &FactorInputs<'_>) -> Option<f64> {
        let snapshot = inputs.snapshot;
        if snapshot.history.len() >= KLINE_MIN_POINTS {
            return Some(self.history_score(&snapshot.history));
        }
        Self::simple_score(snapshot.change_pct, snapshot.turnover_rate)
    }
}

fn price_momentum_score(closes: &[f64]) -> f64 {
    let horizon = |periods: usize, scale: f64| {
        trailing_return(closes, periods)
            .map_or(50.0, |r| (50.0 + r * 100.0 * scale).clamp(0.0, 100.0))
    };
    horizon(5, 10.0) * 0.5 + horizon(10, 8.0) * 0.3 + horizon(20, 5.0) * 0.2
}

fn volume_momentum_score(history: &[PricePoint]) -> f64 {
    if history.len() < 10 {
        return 50.0;
    }
    let window = &history[history.len() - 10..];
    let volume = ratio_score(window.iter().map(|p| p.volume).collect());
    let turnover = ratio_score(window.iter().map(|p| p.turnover).collect());
    volume * 0.6 + turnover * 0.4
}

/// Score the last value against the mean of the ones before it.
fn ratio_score(series: Vec<Option<f64>>) -> f64 {
    let Some((last, prior)) = series.split_last() else {
        return 50.0;
    };
    let (Some(last), Some(prior)) = (*last, prior.iter().copied().collect::<Option<Vec<f64>>>())
    else {
        return 50.0;
    };
    let avg = prior.iter().sum::<f64>() / prior.len().max(1) as f64;
    let ratio = if avg > 0.0 { last / avg } else { 1.0 };

    if (0.8..=3.0).contains(&ratio) {
        80.0
    } else if (0.5..0.8).contains(&ratio) || (ratio > 3.0 && ratio <= 5.0) {
        65.0
    } else {
        40.0
    }
}
