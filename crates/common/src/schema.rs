//! Published parameter schemas for each strategy type.
//!
//! The field specs below are the public contract for strategy parameters and
//! also drive `StrategyParams::validate`, so the published ranges and the
//! enforced ranges cannot drift apart. Bump `PARAMS_SCHEMA_VERSION` whenever
//! a field, range or default changes.

use serde::Serialize;

use crate::{Error, Result, StrategyType};

pub const PARAMS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Number,
}

/// One parameter of a strategy type. Bounds are inclusive.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub description: &'static str,
}

impl FieldSpec {
    pub fn check(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::validation(self.name, "must be a finite number"));
        }
        if self.kind == FieldKind::Integer && value.fract() != 0.0 {
            return Err(Error::validation(self.name, "must be an integer"));
        }
        if value < self.min || value > self.max {
            return Err(Error::validation(
                self.name,
                format!("must be within [{}, {}], got {value}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSchema {
    pub version: u32,
    pub strategy_type: StrategyType,
    pub fields: &'static [FieldSpec],
}

const MEAN_REVERSION_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "lookback_period",
        kind: FieldKind::Integer,
        min: 2.0,
        max: 250.0,
        default: 20.0,
        description: "Trading days averaged to form the reference mean price",
    },
    FieldSpec {
        name: "buy_threshold",
        kind: FieldKind::Number,
        min: -1.0,
        max: -0.001,
        default: -0.08,
        description: "BUY when the deviation from the mean is at or below this value",
    },
    FieldSpec {
        name: "sell_threshold",
        kind: FieldKind::Number,
        min: 0.001,
        max: 1.0,
        default: 0.02,
        description: "SELL when the deviation from the mean is at or above this value",
    },
];

const MOMENTUM_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "momentum_period",
        kind: FieldKind::Integer,
        min: 2.0,
        max: 250.0,
        default: 10.0,
        description: "Trading days spanned by the trailing return",
    },
    FieldSpec {
        name: "buy_threshold",
        kind: FieldKind::Number,
        min: 0.001,
        max: 1.0,
        default: 0.05,
        description: "Open a position when the trailing return is at or above this value",
    },
    FieldSpec {
        name: "sell_threshold",
        kind: FieldKind::Number,
        min: -1.0,
        max: -0.001,
        default: -0.03,
        description: "Exit when the trailing return reverses to or below this value",
    },
    FieldSpec {
        name: "profit_target",
        kind: FieldKind::Number,
        min: 0.001,
        max: 5.0,
        default: 0.08,
        description: "Exit when the unrealized gain reaches this fraction",
    },
    FieldSpec {
        name: "max_hold_days",
        kind: FieldKind::Integer,
        min: 1.0,
        max: 365.0,
        default: 20.0,
        description: "Exit when the position has been held this many days",
    },
];

pub fn parameter_schema(strategy_type: StrategyType) -> ParamSchema {
    ParamSchema {
        version: PARAMS_SCHEMA_VERSION,
        strategy_type,
        fields: fields_for(strategy_type),
    }
}

pub(crate) fn fields_for(strategy_type: StrategyType) -> &'static [FieldSpec] {
    match strategy_type {
        StrategyType::MeanReversion => MEAN_REVERSION_FIELDS,
        StrategyType::Momentum => MOMENTUM_FIELDS,
    }
}

pub(crate) fn check_field(strategy_type: StrategyType, name: &str, value: f64) -> Result<()> {
    match fields_for(strategy_type).iter().find(|f| f.name == name) {
        Some(spec) => spec.check(value),
        None => Err(Error::validation(
            name,
            format!("unknown parameter for strategy type '{strategy_type}'"),
        )),
    }
}
