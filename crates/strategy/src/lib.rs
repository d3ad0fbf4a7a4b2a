pub mod advisory;
pub mod evaluators;
pub mod presets;
pub mod registry;

pub use advisory::{advise_parameters, best_parameters, ParameterAdvice, ParameterDifference};
pub use evaluators::{MeanReversionEvaluator, MomentumEvaluator};
pub use presets::{Preset, PresetBook, PresetFileConfig};
pub use registry::EvaluatorRegistry;

use chrono::{DateTime, Utc};
use common::{OpenPosition, PricePoint, Quote, RiskLevel, SignalType, Strategy, StrategyType};

/// Everything a rule evaluator may consult for one (strategy, instrument) pair.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub strategy: &'a Strategy,
    pub code: &'a str,
    /// Daily closes, oldest first.
    pub history: &'a [PricePoint],
    pub quote: &'a Quote,
    pub position: Option<&'a OpenPosition>,
    pub as_of: DateTime<Utc>,
    /// Emit HOLD decisions instead of staying silent between thresholds.
    pub report_hold: bool,
}

/// Position bookkeeping requested alongside a decision. The engine applies it
/// to the owning strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    Unchanged,
    Open(OpenPosition),
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecision {
    pub signal_type: SignalType,
    pub confidence: f64,
    pub price: Option<f64>,
    pub reason: String,
    pub expected_return: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub position: PositionChange,
}

/// All rule evaluators must satisfy this trait.
///
/// Evaluation is pure: it reads the input and returns a decision, leaving
/// every side effect to the caller. `None` means "nothing to report",
/// including when history is too short.
pub trait RuleEvaluator: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    fn evaluate(&self, input: &EvaluationInput<'_>) -> Option<SignalDecision>;
}
