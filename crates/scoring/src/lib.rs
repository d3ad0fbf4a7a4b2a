pub mod engine;
pub mod factors;
pub mod indicators;
pub mod pool;

pub use engine::{composite_total, ScoringEngine, NEUTRAL_SCORE};
pub use factors::{FactorCalculator, FactorInputs, FactorKind};
pub use pool::{explain_factor, PoolAction, PoolAdvisor, PoolSuggestion};
