//! Non-blocking parameter advice based on the optimizer's tested grids.

use serde::Serialize;
use serde_json::Value;

use common::{MeanReversionParams, MomentumParams, StrategyParams, StrategyType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDifference {
    pub field: String,
    pub value: f64,
    pub best: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterAdvice {
    /// Fields whose value was never covered by an optimization run.
    pub warnings: Vec<String>,
    pub differences: Vec<ParameterDifference>,
}

impl ParameterAdvice {
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.differences.is_empty()
    }
}

/// Best parameters found by the most recent optimization for each type.
pub fn best_parameters(strategy_type: StrategyType) -> StrategyParams {
    match strategy_type {
        StrategyType::MeanReversion => StrategyParams::MeanReversion(MeanReversionParams {
            lookback_period: 20,
            buy_threshold: -0.08,
            sell_threshold: 0.02,
        }),
        StrategyType::Momentum => StrategyParams::Momentum(MomentumParams {
            momentum_period: 10,
            buy_threshold: 0.05,
            sell_threshold: -0.03,
            profit_target: 0.08,
            max_hold_days: 20,
        }),
    }
}

fn tested_grid(strategy_type: StrategyType, field: &str) -> &'static [f64] {
    match (strategy_type, field) {
        (StrategyType::MeanReversion, "lookback_period") => &[5.0, 10.0, 15.0, 20.0],
        (StrategyType::MeanReversion, "buy_threshold") => &[-0.03, -0.05, -0.08, -0.10],
        (StrategyType::MeanReversion, "sell_threshold") => &[0.02, 0.03, 0.05, 0.06],
        (StrategyType::Momentum, "momentum_period") => &[5.0, 10.0, 15.0, 20.0],
        (StrategyType::Momentum, "buy_threshold") => &[0.03, 0.05, 0.08, 0.10],
        (StrategyType::Momentum, "sell_threshold") => &[-0.02, -0.03, -0.05, -0.08],
        (StrategyType::Momentum, "profit_target") => &[0.05, 0.08, 0.10, 0.15],
        (StrategyType::Momentum, "max_hold_days") => &[10.0, 15.0, 20.0, 25.0],
        _ => &[],
    }
}

fn same(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Compare `params` with the tested grids and the best known parameters.
/// Advice never blocks creation or update.
pub fn advise_parameters(params: &StrategyParams) -> ParameterAdvice {
    let strategy_type = params.strategy_type();
    let best = best_parameters(strategy_type).to_map();
    let mut advice = ParameterAdvice::default();

    for (field, value) in params.to_map() {
        let Some(value) = value.as_f64() else {
            continue;
        };
        let grid = tested_grid(strategy_type, &field);
        if !grid.is_empty() && !grid.iter().any(|&g| same(g, value)) {
            advice.warnings.push(format!(
                "{field}={value} is outside the optimizer-tested values {grid:?}"
            ));
        }
        if let Some(best) = best.get(&field).and_then(Value::as_f64) {
            if !same(best, value) {
                advice.differences.push(ParameterDifference { field, value, best });
            }
        }
    }
    advice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_parameters_need_no_advice() {
        for t in [StrategyType::MeanReversion, StrategyType::Momentum] {
            assert!(advise_parameters(&best_parameters(t)).is_empty());
        }
    }

    #[test]
    fn untested_values_are_flagged() {
        let params = StrategyParams::MeanReversion(MeanReversionParams {
            lookback_period: 30,
            buy_threshold: -0.05,
            sell_threshold: 0.02,
        });
        let advice = advise_parameters(&params);
        assert_eq!(advice.warnings.len(), 1);
        assert!(advice.warnings[0].starts_with("lookback_period=30"));
        let fields: Vec<_> = advice.differences.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["buy_threshold", "lookback_period"]);
    }
}
