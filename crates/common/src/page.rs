use serde::{Deserialize, Serialize};

use crate::{Error, Result, Strategy, TradingSignal};

pub const MAX_PAGE_LIMIT: u32 = 1000;

/// A validated `limit`/`offset` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    limit: u32,
    offset: u64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Result<Self> {
        if limit < 1 || limit > MAX_PAGE_LIMIT as i64 {
            return Err(Error::validation(
                "limit",
                format!("must be within [1, {MAX_PAGE_LIMIT}], got {limit}"),
            ));
        }
        if offset < 0 {
            return Err(Error::validation("offset", format!("must be >= 0, got {offset}")));
        }
        Ok(Self {
            limit: limit as u32,
            offset: offset as u64,
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Apply the window to an already ordered sequence.
    pub fn slice<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

/// `created_at DESC, id ASC`
pub fn sort_strategies(items: &mut [Strategy]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// `timestamp DESC, id ASC`
pub fn sort_signals(items: &mut [TradingSignal]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}
