use common::{RiskLevel, SignalType, StrategyParams, StrategyType};
use scoring::indicators::sma;
use tracing::debug;

use super::trigger_confidence;
use crate::{EvaluationInput, PositionChange, RuleEvaluator, SignalDecision};

/// Buys when the price sits far enough below its trailing mean and sells when
/// it sits far enough above. Stateless.
#[derive(Debug, Clone, Default)]
pub struct MeanReversionEvaluator;

impl RuleEvaluator for MeanReversionEvaluator {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::MeanReversion
    }

    fn evaluate(&self, input: &EvaluationInput<'_>) -> Option<SignalDecision> {
        let StrategyParams::MeanReversion(params) = &input.strategy.params else {
            return None;
        };
        if input.history.len() < params.lookback_period {
            debug!(
                strategy_id = %input.strategy.id,
                code = input.code,
                have = input.history.len(),
                need = params.lookback_period,
                "Insufficient history for mean reversion"
            );
            return None;
        }

        let closes: Vec<f64> = input.history.iter().map(|p| p.close).collect();
        let mean = sma(&closes, params.lookback_period)?;
        if mean <= 0.0 || !mean.is_finite() {
            return None;
        }
        let price = input.quote.price;
        let deviation = (price - mean) / mean;

        let (signal_type, threshold) = if deviation <= params.buy_threshold {
            (SignalType::Buy, params.buy_threshold)
        } else if deviation >= params.sell_threshold {
            (SignalType::Sell, params.sell_threshold)
        } else if input.report_hold {
            let nearest = if deviation < 0.0 {
                params.buy_threshold
            } else {
                params.sell_threshold
            };
            return Some(SignalDecision {
                signal_type: SignalType::Hold,
                confidence: (1.0 - deviation.abs() / nearest.abs()).clamp(0.0, 1.0),
                price: Some(price),
                reason: format!(
                    "Price {price:.2} is {:.2}% from its {}-day mean {mean:.2}, inside the trading band",
                    deviation * 100.0,
                    params.lookback_period
                ),
                expected_return: None,
                risk_level: Some(RiskLevel::Low),
                position: PositionChange::Unchanged,
            });
        } else {
            return None;
        };

        let risk_level = if deviation.abs() >= 2.0 * threshold.abs() {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };
        let direction = if signal_type == SignalType::Buy { "below" } else { "above" };

        Some(SignalDecision {
            signal_type,
            confidence: trigger_confidence(deviation, threshold),
            price: Some(price),
            reason: format!(
                "Price {price:.2} is {:.2}% {direction} its {}-day mean {mean:.2} (threshold {:.2}%)",
                deviation.abs() * 100.0,
                params.lookback_period,
                threshold * 100.0
            ),
            expected_return: Some(deviation.abs()),
            risk_level: Some(risk_level),
            position: PositionChange::Unchanged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::fixtures::*;
    use common::MeanReversionParams;

    fn params() -> StrategyParams {
        StrategyParams::MeanReversion(MeanReversionParams {
            lookback_period: 20,
            buy_threshold: -0.08,
            sell_threshold: 0.02,
        })
    }

    fn run(closes: &[f64], price: f64, report_hold: bool) -> Option<SignalDecision> {
        let strategy = strategy(params());
        let history = history(closes);
        let quote = quote(price);
        MeanReversionEvaluator.evaluate(&EvaluationInput {
            strategy: &strategy,
            code: "000001",
            history: &history,
            quote: &quote,
            position: None,
            as_of: now(),
            report_hold,
        })
    }

    #[test]
    fn ten_percent_below_mean_buys() {
        let d = run(&[10.0; 20], 9.0, false).unwrap();
        assert_eq!(d.signal_type, SignalType::Buy);
        assert!(d.confidence > 0.0);
        assert!((d.confidence - 0.625).abs() < 1e-9);
        assert_eq!(d.risk_level, Some(RiskLevel::Medium));
        assert!((d.expected_return.unwrap() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn one_percent_above_mean_is_silent() {
        assert!(run(&[10.0; 20], 10.1, false).is_none());
    }

    #[test]
    fn inside_band_reports_hold_on_request() {
        let d = run(&[10.0; 20], 10.1, true).unwrap();
        assert_eq!(d.signal_type, SignalType::Hold);
        assert_eq!(d.position, PositionChange::Unchanged);
    }

    #[test]
    fn threshold_tie_is_inclusive() {
        // (51 - 50) / 50 is exactly the 0.02 threshold
        let d = run(&[50.0; 20], 51.0, false).unwrap();
        assert_eq!(d.signal_type, SignalType::Sell);
    }

    #[test]
    fn far_above_mean_is_high_risk_sell() {
        let d = run(&[10.0; 20], 11.0, false).unwrap();
        assert_eq!(d.signal_type, SignalType::Sell);
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn short_history_yields_nothing() {
        assert!(run(&[10.0; 19], 5.0, true).is_none());
    }
}
