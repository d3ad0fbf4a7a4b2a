use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use common::{Error, MarketDataSource, NewsItem, NewsSource, PricePoint, Quote, Result};

/// In-memory market data and news, updated by the caller.
///
/// Nothing is fetched from a real vendor. Instruments without a quote report
/// `UpstreamDataUnavailable`; instruments can also be marked as failing or the
/// whole feed slowed down to exercise timeout handling.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFeed {
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    /// Daily history per instrument, oldest first.
    history: Arc<RwLock<HashMap<String, Vec<PricePoint>>>>,
    news: Arc<RwLock<HashMap<String, Vec<NewsItem>>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    latency: Arc<RwLock<Option<Duration>>>,
}

impl SimulatedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_quote(&self, quote: Quote) {
        self.quotes.write().await.insert(quote.code.clone(), quote);
    }

    /// Replace the history for `code`. Points are sorted oldest first.
    pub async fn set_history(&self, code: &str, mut points: Vec<PricePoint>) {
        points.sort_by_key(|p| p.date);
        self.history.write().await.insert(code.to_string(), points);
    }

    /// Append one daily point, replacing an existing point for the same date.
    pub async fn push_price(&self, code: &str, point: PricePoint) {
        let mut history = self.history.write().await;
        let series = history.entry(code.to_string()).or_default();
        match series.binary_search_by_key(&point.date, |p| p.date) {
            Ok(idx) => series[idx] = point,
            Err(idx) => series.insert(idx, point),
        }
    }

    pub async fn set_news(&self, code: &str, items: Vec<NewsItem>) {
        self.news.write().await.insert(code.to_string(), items);
    }

    /// Make every call for `code` fail until cleared.
    pub async fn set_failing(&self, code: &str, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(code.to_string());
        } else {
            set.remove(code);
        }
    }

    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    async fn gate(&self, code: &str) -> Result<()> {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.read().await.contains(code) {
            debug!(code, "Simulated upstream failure");
            return Err(Error::upstream(code, "simulated upstream failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for SimulatedFeed {
    async fn latest_quote(&self, code: &str) -> Result<Quote> {
        self.gate(code).await?;
        self.quotes
            .read()
            .await
            .get(code)
            .cloned()
            .ok_or_else(|| Error::upstream(code, "no quote available"))
    }

    async fn price_history(&self, code: &str, lookback: usize) -> Result<Vec<PricePoint>> {
        self.gate(code).await?;
        let history = self.history.read().await;
        let series = history.get(code).map(Vec::as_slice).unwrap_or_default();
        let start = series.len().saturating_sub(lookback);
        Ok(series[start..].to_vec())
    }
}

#[async_trait]
impl NewsSource for SimulatedFeed {
    async fn recent_news(&self, code: &str) -> Result<Vec<NewsItem>> {
        self.gate(code).await?;
        Ok(self.news.read().await.get(code).cloned().unwrap_or_default())
    }
}
