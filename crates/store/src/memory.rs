use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use common::{
    page, Error, Page, PersistenceGateway, Result, SignalFilter, Strategy, StrategyFilter,
    TradingSignal,
};

/// In-process gateway for running without a database and for tests.
///
/// Can be switched offline (every call fails with
/// `PersistenceUnavailable`) or given an artificial latency to exercise the
/// engine's fallback and timeout paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    strategies: Arc<RwLock<HashMap<String, Strategy>>>,
    signals: Arc<RwLock<HashMap<String, TradingSignal>>>,
    offline: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated unavailability. Shared by every clone.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay applied before every call. Shared by every clone.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn signal_count(&self) -> usize {
        self.signals.read().await.len()
    }

    async fn gate(&self, op: &str) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            debug!(op, "MemoryGateway offline");
            return Err(Error::PersistenceUnavailable(format!(
                "memory gateway offline during {op}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<()> {
        self.gate("upsert_strategy").await?;
        let mut strategies = self.strategies.write().await;
        let mut incoming = strategy.clone();
        if let Some(existing) = strategies.get(&strategy.id) {
            incoming.last_signal_time = match (existing.last_signal_time, incoming.last_signal_time) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        strategies.insert(incoming.id.clone(), incoming);
        Ok(())
    }

    async fn get_strategy(&self, id: &str) -> Result<Option<Strategy>> {
        self.gate("get_strategy").await?;
        Ok(self.strategies.read().await.get(id).cloned())
    }

    async fn list_strategies(&self, filter: &StrategyFilter, page: Page) -> Result<Vec<Strategy>> {
        self.gate("list_strategies").await?;
        let mut items: Vec<Strategy> = self
            .strategies
            .read()
            .await
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        page::sort_strategies(&mut items);
        Ok(page.slice(items))
    }

    async fn delete_strategy(&self, id: &str) -> Result<bool> {
        self.gate("delete_strategy").await?;
        Ok(self.strategies.write().await.remove(id).is_some())
    }

    async fn save_signals(&self, signals: &[TradingSignal]) -> Result<usize> {
        self.gate("save_signals").await?;
        let mut stored = self.signals.write().await;
        let mut inserted = 0;
        for signal in signals {
            if !stored.contains_key(&signal.id) {
                stored.insert(signal.id.clone(), signal.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_signals(&self, filter: &SignalFilter, page: Page) -> Result<Vec<TradingSignal>> {
        self.gate("list_signals").await?;
        let mut items: Vec<TradingSignal> = self
            .signals
            .read()
            .await
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        page::sort_signals(&mut items);
        Ok(page.slice(items))
    }

    async fn touch_last_signal_time(&self, id: &str, ts: DateTime<Utc>) -> Result<()> {
        self.gate("touch_last_signal_time").await?;
        if let Some(strategy) = self.strategies.write().await.get_mut(id) {
            strategy.touch_last_signal(ts);
        }
        Ok(())
    }
}
