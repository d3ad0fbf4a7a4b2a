use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    NewsItem, Page, PricePoint, Quote, Result, SignalFilter, Strategy, StrategyFilter,
    TradingSignal,
};

/// Source of quotes and daily price history.
///
/// `SimulatedFeed` and `SnapshotFeed` in `crates/feeds` implement this. The
/// engine wraps every call in a timeout and treats any error as
/// "no data for this instrument".
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn latest_quote(&self, code: &str) -> Result<Quote>;

    /// Up to `lookback` most recent daily points, oldest first.
    async fn price_history(&self, code: &str, lookback: usize) -> Result<Vec<PricePoint>>;
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn recent_news(&self, code: &str) -> Result<Vec<NewsItem>>;
}

/// Durable, authoritative record of strategies and signals.
///
/// Implementations report transient failures as
/// `Error::PersistenceUnavailable` (or `Error::Database`); the engine decides
/// how to degrade.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<()>;

    async fn get_strategy(&self, id: &str) -> Result<Option<Strategy>>;

    /// Ordered by `created_at DESC, id ASC`.
    async fn list_strategies(&self, filter: &StrategyFilter, page: Page) -> Result<Vec<Strategy>>;

    /// Returns `true` if a row was removed.
    async fn delete_strategy(&self, id: &str) -> Result<bool>;

    /// Idempotent on signal id. Returns the number of newly stored signals.
    async fn save_signals(&self, signals: &[TradingSignal]) -> Result<usize>;

    /// Ordered by `timestamp DESC, id ASC`.
    async fn list_signals(&self, filter: &SignalFilter, page: Page) -> Result<Vec<TradingSignal>>;

    /// Advance the stored `last_signal_time`; never moves it backwards.
    async fn touch_last_signal_time(&self, id: &str, ts: DateTime<Utc>) -> Result<()>;
}
