mod clock;
mod engine;
mod generation;
mod scheduler;
mod signal_cache;
mod working_set;

pub use engine::{
    PoolReview, ResyncReport, ScoredInstrument, StrategyEngine, StrategyEngineBuilder,
    StrategyPerformance, StrategyUpdate, DEFAULT_MARKET_TIMEOUT, DEFAULT_MAX_CONCURRENT_FETCHES,
    DEFAULT_PERSISTENCE_TIMEOUT, DEFAULT_SIGNAL_CACHE_CAPACITY,
};
pub use scheduler::{Scheduler, SchedulerCommand, SchedulerHandle, SchedulerState};
