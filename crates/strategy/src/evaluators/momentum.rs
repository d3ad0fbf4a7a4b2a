use common::{OpenPosition, RiskLevel, SignalType, StrategyParams, StrategyType};
use tracing::debug;

use super::{trailing_closes, trigger_confidence};
use crate::{EvaluationInput, PositionChange, RuleEvaluator, SignalDecision};

/// Trend follower: opens a position on a strong trailing return and closes it
/// on reversal, on reaching the profit target or after the holding limit.
///
/// The evaluator itself is stateless; the open position for an instrument is
/// passed in and changes to it are returned as a [`PositionChange`].
#[derive(Debug, Clone, Default)]
pub struct MomentumEvaluator;

impl RuleEvaluator for MomentumEvaluator {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Momentum
    }

    fn evaluate(&self, input: &EvaluationInput<'_>) -> Option<SignalDecision> {
        let StrategyParams::Momentum(params) = &input.strategy.params else {
            return None;
        };
        let Some(window) = trailing_closes(input.history, params.momentum_period) else {
            debug!(
                strategy_id = %input.strategy.id,
                code = input.code,
                have = input.history.len(),
                need = params.momentum_period,
                "Insufficient history for momentum"
            );
            return None;
        };
        let base = window[0];
        if base <= 0.0 || !base.is_finite() {
            return None;
        }
        let price = input.quote.price;
        let ret = (price - base) / base;

        match input.position {
            None if ret >= params.buy_threshold => Some(SignalDecision {
                signal_type: SignalType::Buy,
                confidence: trigger_confidence(ret, params.buy_threshold),
                price: Some(price),
                reason: format!(
                    "{}-day return {:.2}% reached the entry threshold {:.2}%",
                    params.momentum_period,
                    ret * 100.0,
                    params.buy_threshold * 100.0
                ),
                expected_return: Some(params.profit_target),
                risk_level: Some(if ret >= 2.0 * params.buy_threshold {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                }),
                position: PositionChange::Open(OpenPosition {
                    entry_price: price,
                    opened_at: input.as_of,
                }),
            }),
            None => hold(input, price, format!(
                "{}-day return {:.2}% is below the entry threshold",
                params.momentum_period,
                ret * 100.0
            )),
            Some(position) => {
                let gain = if position.entry_price > 0.0 {
                    (price - position.entry_price) / position.entry_price
                } else {
                    0.0
                };
                let held_days = (input.as_of.date_naive() - position.opened_at.date_naive())
                    .num_days()
                    .max(0);

                let exit = if ret <= params.sell_threshold {
                    Some((
                        trigger_confidence(ret, params.sell_threshold),
                        RiskLevel::High,
                        format!(
                            "Momentum reversed: {}-day return {:.2}% at or below {:.2}%",
                            params.momentum_period,
                            ret * 100.0,
                            params.sell_threshold * 100.0
                        ),
                    ))
                } else if gain >= params.profit_target {
                    Some((
                        1.0,
                        RiskLevel::Low,
                        format!(
                            "Profit target reached: {:.2}% gain since entry at {:.2}",
                            gain * 100.0,
                            position.entry_price
                        ),
                    ))
                } else if held_days >= i64::from(params.max_hold_days) {
                    Some((
                        0.6,
                        RiskLevel::Medium,
                        format!(
                            "Holding limit reached: held {held_days} days (max {})",
                            params.max_hold_days
                        ),
                    ))
                } else {
                    None
                };

                match exit {
                    Some((confidence, risk, reason)) => Some(SignalDecision {
                        signal_type: SignalType::Sell,
                        confidence,
                        price: Some(price),
                        reason,
                        expected_return: Some(gain),
                        risk_level: Some(risk),
                        position: PositionChange::Close,
                    }),
                    None => hold(input, price, format!(
                        "Holding since {}: {:.2}% gain, {held_days} days held",
                        position.opened_at.date_naive(),
                        gain * 100.0
                    )),
                }
            }
        }
    }
}

fn hold(input: &EvaluationInput<'_>, price: f64, reason: String) -> Option<SignalDecision> {
    input.report_hold.then(|| SignalDecision {
        signal_type: SignalType::Hold,
        confidence: 0.5,
        price: Some(price),
        reason,
        expected_return: None,
        risk_level: Some(RiskLevel::Low),
        position: PositionChange::Unchanged,
    })
}
