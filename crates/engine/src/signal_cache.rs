use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::warn;

use common::{page, Page, SignalFilter, TradingSignal};

#[derive(Debug, Clone)]
struct Cached {
    signal: TradingSignal,
    persisted: bool,
}

/// Bounded, insertion-ordered cache of recently emitted signals.
///
/// When full, the oldest persisted entry is evicted. Only when every entry is
/// still unpersisted does the oldest one go, which loses that signal.
#[derive(Debug)]
pub struct SignalCache {
    capacity: usize,
    entries: VecDeque<Cached>,
}

impl SignalCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    pub fn push(&mut self, signal: TradingSignal) {
        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.push_back(Cached {
            signal,
            persisted: false,
        });
    }

    fn evict_one(&mut self) {
        if let Some(idx) = self.entries.iter().position(|c| c.persisted) {
            self.entries.remove(idx);
            return;
        }
        if let Some(lost) = self.entries.pop_front() {
            warn!(
                signal_id = %lost.signal.id,
                strategy_id = %lost.signal.strategy_id,
                capacity = self.capacity,
                "Signal cache full of unpersisted signals, dropping oldest"
            );
        }
    }

    pub fn mark_persisted<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        let ids: HashSet<&str> = ids.into_iter().collect();
        for cached in self.entries.iter_mut() {
            if ids.contains(cached.signal.id.as_str()) {
                cached.persisted = true;
            }
        }
    }

    pub fn unpersisted(&self) -> Vec<TradingSignal> {
        self.entries
            .iter()
            .filter(|c| !c.persisted)
            .map(|c| c.signal.clone())
            .collect()
    }

    pub fn has_unpersisted(&self, filter: &SignalFilter) -> bool {
        self.entries
            .iter()
            .any(|c| !c.persisted && filter.matches(&c.signal))
    }

    pub fn has_unpersisted_for(&self, strategy_id: &str) -> bool {
        self.entries
            .iter()
            .any(|c| !c.persisted && c.signal.strategy_id == strategy_id)
    }

    /// Matching signals ordered `timestamp DESC, id ASC`, then windowed.
    pub fn list(&self, filter: &SignalFilter, page: Page) -> Vec<TradingSignal> {
        let mut items: Vec<TradingSignal> = self
            .entries
            .iter()
            .filter(|c| filter.matches(&c.signal))
            .map(|c| c.signal.clone())
            .collect();
        page::sort_signals(&mut items);
        page.slice(items)
    }

    /// Drop persisted signals older than `cutoff`. Unpersisted signals stay
    /// until they are saved.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|c| !c.persisted || c.signal.timestamp >= cutoff);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{MeanReversionParams, SignalType, StrategyParams};

    fn signal(id: &str, strategy_id: &str, ts: DateTime<Utc>) -> TradingSignal {
        TradingSignal {
            id: id.into(),
            strategy_id: strategy_id.into(),
            stock_code: "000001".into(),
            signal_type: SignalType::Buy,
            confidence: 0.6,
            price: Some(10.0),
            timestamp: ts,
            reason: "test".into(),
            expected_return: None,
            risk_level: None,
            parameters: StrategyParams::MeanReversion(MeanReversionParams {
                lookback_period: 20,
                buy_threshold: -0.08,
                sell_threshold: 0.02,
            }),
        }
    }

    fn ids(items: &[TradingSignal]) -> Vec<&str> {
        items.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn lists_newest_first() {
        let t0 = Utc::now();
        let mut cache = SignalCache::new(10);
        cache.push(signal("a", "s", t0));
        cache.push(signal("b", "s", t0 + Duration::seconds(1)));
        cache.push(signal("c", "s", t0 + Duration::seconds(2)));
        let listed = cache.list(&SignalFilter::default(), Page::default());
        assert_eq!(ids(&listed), ["c", "b", "a"]);
    }

    #[test]
    fn evicts_oldest_persisted_before_unpersisted() {
        let t0 = Utc::now();
        let mut cache = SignalCache::new(3);
        cache.push(signal("a", "s", t0));
        cache.push(signal("b", "s", t0 + Duration::seconds(1)));
        cache.push(signal("c", "s", t0 + Duration::seconds(2)));
        cache.mark_persisted(["b"]);

        cache.push(signal("d", "s", t0 + Duration::seconds(3)));
        let listed = cache.list(&SignalFilter::default(), Page::default());
        assert_eq!(ids(&listed), ["d", "c", "a"]);
    }

    #[test]
    fn evicts_oldest_unpersisted_when_nothing_is_persisted() {
        let t0 = Utc::now();
        let mut cache = SignalCache::new(2);
        cache.push(signal("a", "s", t0));
        cache.push(signal("b", "s", t0 + Duration::seconds(1)));
        cache.push(signal("c", "s", t0 + Duration::seconds(2)));
        assert_eq!(cache.len(), 2);
        assert_eq!(ids(&cache.unpersisted()), ["b", "c"]);
    }

    #[test]
    fn prune_keeps_unpersisted_signals() {
        let t0 = Utc::now();
        let mut cache = SignalCache::new(10);
        cache.push(signal("old-saved", "s", t0 - Duration::days(10)));
        cache.push(signal("old-pending", "s", t0 - Duration::days(10)));
        cache.push(signal("new", "s", t0));
        cache.mark_persisted(["old-saved", "new"]);

        assert_eq!(cache.prune(t0 - Duration::days(1)), 1);
        assert_eq!(ids(&cache.unpersisted()), ["old-pending"]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unpersisted_tracking_respects_filter() {
        let t0 = Utc::now();
        let mut cache = SignalCache::new(10);
        cache.push(signal("a", "s1", t0));
        cache.push(signal("b", "s2", t0));
        cache.mark_persisted(["a"]);
        assert!(!cache.has_unpersisted_for("s1"));
        assert!(cache.has_unpersisted_for("s2"));
        assert!(cache.has_unpersisted(&SignalFilter::default()));
        assert!(!cache.has_unpersisted(&SignalFilter {
            strategy_id: Some("s1".into())
        }));
    }
}
