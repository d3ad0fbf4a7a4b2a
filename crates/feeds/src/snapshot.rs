use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use common::{MarketDataSource, NewsItem, NewsSource, PricePoint, Quote, Result};

use crate::SimulatedFeed;

/// On-disk market snapshot (JSON).
///
/// ```json
/// {
///   "instruments": {
///     "600519": {
///       "quote": { "code": "600519", "price": 1500.0, "timestamp": "2024-06-03T07:00:00Z" },
///       "history": [ { "date": "2024-05-31", "close": 1490.0 } ],
///       "news": [ { "sentiment_label": "positive" } ]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SnapshotFile {
    #[serde(default)]
    pub instruments: BTreeMap<String, InstrumentData>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentData {
    pub quote: Quote,
    #[serde(default)]
    pub history: Vec<PricePoint>,
    #[serde(default)]
    pub news: Vec<NewsItem>,
}

/// Market data served from a JSON snapshot file. `reload` re-reads the file.
#[derive(Debug, Clone)]
pub struct SnapshotFeed {
    path: PathBuf,
    inner: SimulatedFeed,
}

impl SnapshotFeed {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let feed = Self {
            path: path.as_ref().to_path_buf(),
            inner: SimulatedFeed::new(),
        };
        feed.reload().await?;
        Ok(feed)
    }

    /// Re-read the snapshot file. Instruments absent from the file keep their
    /// previous data.
    pub async fn reload(&self) -> Result<usize> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let file: SnapshotFile = serde_json::from_str(&content)?;
        let count = file.instruments.len();
        for (code, data) in file.instruments {
            let mut quote = data.quote;
            quote.code = code.clone();
            self.inner.set_quote(quote).await;
            self.inner.set_history(&code, data.history).await;
            self.inner.set_news(&code, data.news).await;
        }
        info!(path = %self.path.display(), instruments = count, "Market snapshot loaded");
        Ok(count)
    }
}

#[async_trait]
impl MarketDataSource for SnapshotFeed {
    async fn latest_quote(&self, code: &str) -> Result<Quote> {
        self.inner.latest_quote(code).await
    }

    async fn price_history(&self, code: &str, lookback: usize) -> Result<Vec<PricePoint>> {
        self.inner.price_history(code, lookback).await
    }
}

#[async_trait]
impl NewsSource for SnapshotFeed {
    async fn recent_news(&self, code: &str) -> Result<Vec<NewsItem>> {
        self.inner.recent_news(code).await
    }
}
