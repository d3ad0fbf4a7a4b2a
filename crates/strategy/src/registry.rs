use std::collections::HashMap;
use std::sync::Arc;

use common::StrategyType;
use tracing::info;

use crate::evaluators::{MeanReversionEvaluator, MomentumEvaluator};
use crate::RuleEvaluator;

/// Maps each strategy type to the evaluator that runs it.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<StrategyType, Arc<dyn RuleEvaluator>>,
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("types", &self.evaluators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EvaluatorRegistry {
    /// Registry with a built-in evaluator for every known strategy type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        for strategy_type in [StrategyType::MeanReversion, StrategyType::Momentum] {
            registry.register(build_evaluator(strategy_type));
        }
        registry
    }

    /// Add or replace the evaluator for the type it reports.
    pub fn register(&mut self, evaluator: Arc<dyn RuleEvaluator>) {
        let strategy_type = evaluator.strategy_type();
        info!(%strategy_type, "Registered rule evaluator");
        self.evaluators.insert(strategy_type, evaluator);
    }

    pub fn get(&self, strategy_type: StrategyType) -> Option<Arc<dyn RuleEvaluator>> {
        self.evaluators.get(&strategy_type).cloned()
    }

    pub fn supports(&self, strategy_type: StrategyType) -> bool {
        self.evaluators.contains_key(&strategy_type)
    }
}

// ─── Evaluator builders ───────────────────────────────────────────────────────

fn build_evaluator(strategy_type: StrategyType) -> Arc<dyn RuleEvaluator> {
    match strategy_type {
        StrategyType::MeanReversion => Arc::new(MeanReversionEvaluator),
        StrategyType::Momentum => Arc::new(MomentumEvaluator),
    }
}
