//! The strategy engine handle.
//!
//! `StrategyEngine` owns the working set of strategies, the bounded signal
//! cache and the injected ports. The store is written through on every
//! mutation; when it is slow or down the engine keeps serving from the working
//! set and `resync()` retries whatever is still pending.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::page::MAX_PAGE_LIMIT;
use common::{
    normalize_universe, Error, FactorScore, MarketDataSource, MarketSnapshot, NewStrategy,
    NewsSource, Page, PersistenceGateway, Result, SignalFilter, SignalType, Strategy,
    StrategyFilter, StrategyStatus, TradingSignal,
};
use scoring::{explain_factor, FactorKind, PoolAdvisor, PoolSuggestion, ScoringEngine};
use strategy::{advise_parameters, EvaluatorRegistry, PresetBook};

use crate::clock::MonotonicClock;
use crate::signal_cache::SignalCache;
use crate::working_set::WorkingSet;

pub const DEFAULT_PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MARKET_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;
pub const DEFAULT_SIGNAL_CACHE_CAPACITY: usize = 10_000;

const SIGNAL_BROADCAST_CAPACITY: usize = 1024;
/// Daily history fetched for on-demand scoring.
const SCORE_HISTORY_DAYS: usize = 120;

// ─── Requests & reports ───────────────────────────────────────────────────────

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyUpdate {
    #[serde(default)]
    pub name: Option<String>,
    /// Parameter patch merged over the current parameters.
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub stock_universe: Option<Vec<String>>,
    #[serde(default)]
    pub rebalance_frequency: Option<u32>,
    #[serde(default)]
    pub status: Option<StrategyStatus>,
}

impl StrategyUpdate {
    /// Produce the updated strategy, validating every provided field.
    pub fn apply(&self, current: &Strategy, now: DateTime<Utc>) -> Result<Strategy> {
        let mut next = current.clone();

        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::validation("name", "must not be empty"));
            }
            next.name = name.to_string();
        }
        if let Some(patch) = &self.parameters {
            next.params = current.params.merge(patch)?;
        }
        if let Some(codes) = &self.stock_universe {
            let universe = normalize_universe(codes.clone())?;
            next.positions.retain(|code, _| universe.contains(code));
            next.stock_universe = universe;
        }
        if let Some(frequency) = self.rebalance_frequency {
            if frequency == 0 {
                return Err(Error::validation("rebalance_frequency", "must be > 0"));
            }
            next.rebalance_frequency = frequency;
        }
        if let Some(status) = self.status {
            next.status = current.status.transition_to(status)?;
        }

        next.updated_at = now.max(current.updated_at);
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyPerformance {
    pub strategy_id: String,
    pub name: String,
    pub status: StrategyStatus,
    /// Counted over the most recent signals, at most one page.
    pub total_signals: usize,
    pub buy_signals: usize,
    pub sell_signals: usize,
    pub hold_signals: usize,
    pub avg_confidence: Option<f64>,
    pub last_signal_time: Option<DateTime<Utc>>,
    pub open_positions: usize,
    pub performance_metrics: BTreeMap<String, f64>,
}

/// One instrument's composite score with a reading of each present factor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredInstrument {
    pub stock_code: String,
    pub total: f64,
    pub explanations: BTreeMap<&'static str, &'static str>,
}

impl ScoredInstrument {
    fn from_score(score: &FactorScore) -> Self {
        let factors = [
            (FactorKind::Momentum, score.momentum),
            (FactorKind::Sentiment, score.sentiment),
            (FactorKind::Value, score.value),
            (FactorKind::Quality, score.quality),
        ];
        let explanations = factors
            .into_iter()
            .filter_map(|(kind, value)| value.map(|v| (kind.name(), explain_factor(kind.name(), v))))
            .collect();
        Self {
            stock_code: score.code.clone(),
            total: score.total,
            explanations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolReview {
    /// Ordered by code.
    pub scored: Vec<ScoredInstrument>,
    pub suggestions: Vec<PoolSuggestion>,
}

/// What one `resync()` pass managed to push to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub upserts: usize,
    pub deletes: usize,
    pub signals: usize,
    pub signal_times: usize,
    pub failures: usize,
}

impl ResyncReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub persistence_timeout: Duration,
    pub market_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub report_hold: bool,
}

pub(crate) struct Inner {
    pub store: Arc<dyn PersistenceGateway>,
    pub market: Arc<dyn MarketDataSource>,
    pub news: Option<Arc<dyn NewsSource>>,
    pub registry: EvaluatorRegistry,
    pub scoring: ScoringEngine,
    pub presets: PresetBook,
    pub pool_advisor: PoolAdvisor,
    /// Scores from the previous pool reviews, by code.
    pub pool_scores: Mutex<BTreeMap<String, FactorScore>>,
    pub working: WorkingSet,
    pub signals: Mutex<SignalCache>,
    pub clock: MonotonicClock,
    pub signal_tx: broadcast::Sender<TradingSignal>,
    pub settings: Settings,
}

/// Cloneable handle to the engine. Every clone shares the same state.
#[derive(Clone)]
pub struct StrategyEngine {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyEngine")
            .field("strategies", &self.inner.working.len())
            .field("cached_signals", &self.cache().len())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

pub struct StrategyEngineBuilder {
    store: Arc<dyn PersistenceGateway>,
    market: Arc<dyn MarketDataSource>,
    news: Option<Arc<dyn NewsSource>>,
    registry: EvaluatorRegistry,
    scoring: ScoringEngine,
    presets: PresetBook,
    pool_advisor: PoolAdvisor,
    signal_cache_capacity: usize,
    settings: Settings,
}

impl StrategyEngineBuilder {
    pub fn news(mut self, news: Arc<dyn NewsSource>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn registry(mut self, registry: EvaluatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn scoring(mut self, scoring: ScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn presets(mut self, presets: PresetBook) -> Self {
        self.presets = presets;
        self
    }

    pub fn pool_advisor(mut self, advisor: PoolAdvisor) -> Self {
        self.pool_advisor = advisor;
        self
    }

    pub fn persistence_timeout(mut self, timeout: Duration) -> Self {
        self.settings.persistence_timeout = timeout;
        self
    }

    pub fn market_timeout(mut self, timeout: Duration) -> Self {
        self.settings.market_timeout = timeout;
        self
    }

    pub fn max_concurrent_fetches(mut self, n: usize) -> Self {
        self.settings.max_concurrent_fetches = n.max(1);
        self
    }

    pub fn signal_cache_capacity(mut self, capacity: usize) -> Self {
        self.signal_cache_capacity = capacity;
        self
    }

    /// Emit HOLD signals for instruments sitting between thresholds.
    pub fn report_hold(mut self, report_hold: bool) -> Self {
        self.settings.report_hold = report_hold;
        self
    }

    pub fn build(self) -> StrategyEngine {
        let (signal_tx, _) = broadcast::channel(SIGNAL_BROADCAST_CAPACITY);
        StrategyEngine {
            inner: Arc::new(Inner {
                store: self.store,
                market: self.market,
                news: self.news,
                registry: self.registry,
                scoring: self.scoring,
                presets: self.presets,
                pool_advisor: self.pool_advisor,
                pool_scores: Mutex::new(BTreeMap::new()),
                working: WorkingSet::default(),
                signals: Mutex::new(SignalCache::new(self.signal_cache_capacity)),
                clock: MonotonicClock::default(),
                signal_tx,
                settings: self.settings,
            }),
        }
    }
}

impl StrategyEngine {
    pub fn builder(
        store: Arc<dyn PersistenceGateway>,
        market: Arc<dyn MarketDataSource>,
    ) -> StrategyEngineBuilder {
        StrategyEngineBuilder {
            store,
            market,
            news: None,
            registry: EvaluatorRegistry::with_defaults(),
            scoring: ScoringEngine::default(),
            presets: PresetBook::builtin(),
            pool_advisor: PoolAdvisor::default(),
            signal_cache_capacity: DEFAULT_SIGNAL_CACHE_CAPACITY,
            settings: Settings {
                persistence_timeout: DEFAULT_PERSISTENCE_TIMEOUT,
                market_timeout: DEFAULT_MARKET_TIMEOUT,
                max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
                report_hold: false,
            },
        }
    }

    /// Receive every newly emitted signal. Lagging receivers lose the oldest.
    pub fn subscribe(&self) -> broadcast::Receiver<TradingSignal> {
        self.inner.signal_tx.subscribe()
    }

    pub fn cached_signal_count(&self) -> usize {
        self.cache().len()
    }

    pub fn working_set_len(&self) -> usize {
        self.inner.working.len()
    }

    // ─── Strategy CRUD ────────────────────────────────────────────────────────

    pub async fn create_strategy(&self, request: NewStrategy) -> Result<String> {
        let strategy_type = request.params.strategy_type();
        if !self.inner.registry.supports(strategy_type) {
            return Err(Error::validation(
                "strategy_type",
                format!("no evaluator registered for '{strategy_type}'"),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let strategy = request.into_strategy(id.clone(), now_micros())?;

        let advice = advise_parameters(&strategy.params);
        for warning in &advice.warnings {
            info!(strategy_id = %id, %warning, "Parameter outside tested range");
        }

        let _guard = self.inner.working.lock(&id).await;

        info!(
            strategy_id = %id,
            name = %strategy.name,
            %strategy_type,
            instruments = strategy.stock_universe.len(),
            "Strategy created"
        );
        self.inner.working.put(strategy, true);
        self.write_through(&id).await;
        Ok(id)
    }

    pub async fn create_from_preset(&self, preset: &str, name: Option<String>) -> Result<String> {
        let request = self
            .inner
            .presets
            .get(preset)
            .ok_or_else(|| Error::NotFound(format!("preset '{preset}'")))?
            .to_new_strategy(name);
        self.create_strategy(request).await
    }

    /// `Ok(false)` for an unknown id. Validation failures leave the strategy
    /// untouched.
    pub async fn update_strategy(&self, id: &str, update: StrategyUpdate) -> Result<bool> {
        let _guard = self.inner.working.lock(id).await;

        let Some(current) = self.load_for_mutation(id).await else {
            return Ok(false);
        };
        let updated = update.apply(&current, now_micros())?;

        if updated.status != current.status {
            info!(strategy_id = %id, from = %current.status, to = %updated.status, "Strategy status changed");
        }
        info!(strategy_id = %id, "Strategy updated");
        self.inner.working.put(updated, true);
        self.write_through(id).await;
        Ok(true)
    }

    /// Returns whether a strategy was removed. Unknown ids give `false`.
    pub async fn delete_strategy(&self, id: &str) -> bool {
        let ws = &self.inner.working;
        let _guard = ws.lock(id).await;

        if ws.is_pending_delete(id) {
            return false;
        }
        let local = ws.remove(id).is_some();

        match self
            .store_call("delete_strategy", self.inner.store.delete_strategy(id))
            .await
        {
            Ok(stored) => {
                let found = local || stored;
                if found {
                    info!(strategy_id = %id, "Strategy deleted");
                }
                found
            }
            Err(e) => {
                if local {
                    ws.mark_pending_delete(id);
                    warn!(strategy_id = %id, error = %e, "Store delete failed, will retry on resync");
                } else {
                    warn!(strategy_id = %id, error = %e, "Store unavailable, delete of uncached strategy skipped");
                }
                local
            }
        }
    }

    pub async fn get_strategy(&self, id: &str) -> Option<Strategy> {
        let ws = &self.inner.working;
        if ws.is_pending_delete(id) {
            return None;
        }
        if ws.is_dirty(id) {
            return ws.get(id);
        }

        match self
            .store_call("get_strategy", self.inner.store.get_strategy(id))
            .await
        {
            Ok(found) => found.map(|s| {
                ws.put_clean_if_absent(s.clone());
                s
            }),
            Err(e) => {
                warn!(strategy_id = %id, error = %e, "Store read failed, serving working set");
                ws.get(id)
            }
        }
    }

    /// Strategies ordered `created_at DESC, id ASC`.
    pub async fn list_strategies(
        &self,
        status: Option<StrategyStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Strategy>> {
        let page = Page::new(limit, offset)?;
        let filter = StrategyFilter { status };
        let ws = &self.inner.working;

        if ws.has_pending() {
            debug!("Working set has unsynced changes, listing from it");
            return Ok(page.slice(ws.list(&filter)));
        }

        match self
            .store_call("list_strategies", self.inner.store.list_strategies(&filter, page))
            .await
        {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!(error = %e, "Store list failed, serving working set");
                Ok(page.slice(ws.list(&filter)))
            }
        }
    }

    // ─── Signals ──────────────────────────────────────────────────────────────

    /// Signals ordered `timestamp DESC, id ASC`.
    pub async fn get_signals(
        &self,
        strategy_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TradingSignal>> {
        let page = Page::new(limit, offset)?;
        let filter = SignalFilter {
            strategy_id: strategy_id.map(str::to_string),
        };
        Ok(self.signals_page(&filter, page).await)
    }

    async fn signals_page(&self, filter: &SignalFilter, page: Page) -> Vec<TradingSignal> {
        if self.cache().has_unpersisted(filter) {
            debug!("Unsaved signals in cache, listing from it");
            return self.cache().list(filter, page);
        }

        match self
            .store_call("list_signals", self.inner.store.list_signals(filter, page))
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Store signal list failed, serving cache");
                self.cache().list(filter, page)
            }
        }
    }

    /// Drop persisted cached signals older than `older_than`.
    pub fn prune_signal_cache(&self, older_than: DateTime<Utc>) -> usize {
        let removed = self.cache().prune(older_than);
        if removed > 0 {
            info!(removed, cutoff = %older_than, "Pruned signal cache");
        }
        removed
    }

    pub async fn strategy_performance(&self, id: &str) -> Option<StrategyPerformance> {
        let strategy = self.get_strategy(id).await?;
        let filter = SignalFilter {
            strategy_id: Some(id.to_string()),
        };
        let page = Page::new(MAX_PAGE_LIMIT as i64, 0).ok()?;
        let signals = self.signals_page(&filter, page).await;

        let count = |t: SignalType| signals.iter().filter(|s| s.signal_type == t).count();
        let avg_confidence = (!signals.is_empty())
            .then(|| signals.iter().map(|s| s.confidence).sum::<f64>() / signals.len() as f64);

        Some(StrategyPerformance {
            strategy_id: strategy.id,
            name: strategy.name,
            status: strategy.status,
            total_signals: signals.len(),
            buy_signals: count(SignalType::Buy),
            sell_signals: count(SignalType::Sell),
            hold_signals: count(SignalType::Hold),
            avg_confidence,
            last_signal_time: strategy.last_signal_time,
            open_positions: strategy.positions.len(),
            performance_metrics: strategy.performance_metrics,
        })
    }

    // ─── Scoring ──────────────────────────────────────────────────────────────

    /// Fetch current inputs for `code` and score it. Missing inputs score
    /// neutral instead of failing the call.
    pub async fn score_instrument(&self, code: &str) -> Result<FactorScore> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::validation("code", "must not be empty"));
        }
        let timeout = self.inner.settings.market_timeout;
        let market = &self.inner.market;

        let news_fut = async {
            match &self.inner.news {
                Some(news) => Some(upstream_timeout(timeout, code, news.recent_news(code)).await),
                None => None,
            }
        };
        let (quote, history, news) = tokio::join!(
            upstream_timeout(timeout, code, market.latest_quote(code)),
            upstream_timeout(timeout, code, market.price_history(code, SCORE_HISTORY_DAYS)),
            news_fut,
        );

        let history = history.unwrap_or_else(|e| {
            warn!(code, error = %e, "History unavailable, scoring without it");
            Vec::new()
        });
        let snapshot = match quote {
            Ok(quote) => MarketSnapshot::from_quote(&quote, history),
            Err(e) => {
                warn!(code, error = %e, "Quote unavailable, scoring without it");
                MarketSnapshot {
                    history,
                    ..MarketSnapshot::default()
                }
            }
        };
        let news = match news {
            Some(Ok(items)) => Some(items),
            Some(Err(e)) => {
                warn!(code, error = %e, "News unavailable, sentiment uses market inputs only");
                None
            }
            None => None,
        };

        let score = self.inner.scoring.compute_composite_score(
            code,
            &snapshot,
            news.as_deref(),
            Utc::now().date_naive(),
        );
        debug!(code, total = score.total, "Instrument scored");
        Ok(score)
    }

    /// Score every pool member and candidate, then compare with the scores
    /// kept from earlier reviews to suggest additions and removals.
    /// Instruments that fail to score are left out of both.
    pub async fn review_pool(&self, pool: Vec<String>, candidates: Vec<String>) -> Result<PoolReview> {
        let pool = if pool.is_empty() {
            Vec::new()
        } else {
            normalize_universe(pool)?
        };
        let codes = normalize_universe(pool.iter().cloned().chain(candidates).collect())?;

        let mut tasks = JoinSet::new();
        for code in codes {
            let engine = self.clone();
            tasks.spawn(async move { engine.score_instrument(&code).await });
        }
        let mut current = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(score)) => {
                    current.insert(score.code.clone(), score);
                }
                Ok(Err(e)) => warn!(error = %e, "Instrument not scored"),
                Err(e) => warn!(error = %e, "Scoring task failed"),
            }
        }

        let suggestions = {
            let mut kept = self
                .inner
                .pool_scores
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let suggestions = self.inner.pool_advisor.suggest(&current, &kept, &pool);
            kept.extend(current.iter().map(|(code, score)| (code.clone(), score.clone())));
            suggestions
        };

        info!(
            scored = current.len(),
            suggestions = suggestions.len(),
            "Pool reviewed"
        );
        Ok(PoolReview {
            scored: current.values().map(ScoredInstrument::from_score).collect(),
            suggestions,
        })
    }

    // ─── Sync ─────────────────────────────────────────────────────────────────

    /// Load every stored strategy into the working set. Local copies win.
    pub async fn hydrate(&self) -> Result<usize> {
        let loaded = self.load_from_store(&StrategyFilter::default()).await?;
        info!(loaded, "Working set hydrated from store");
        Ok(loaded)
    }

    /// Page through the stored strategies matching `filter` and add the ones
    /// the working set does not hold yet. Returns how many were added.
    pub(crate) async fn load_from_store(&self, filter: &StrategyFilter) -> Result<usize> {
        let limit = MAX_PAGE_LIMIT as i64;
        let mut offset = 0;
        let mut loaded = 0;
        loop {
            let page = Page::new(limit, offset)?;
            let batch = self
                .store_call("list_strategies", self.inner.store.list_strategies(filter, page))
                .await?;
            let fetched = batch.len();
            for strategy in batch {
                if self.inner.working.put_clean_if_absent(strategy) {
                    loaded += 1;
                }
            }
            if fetched < limit as usize {
                return Ok(loaded);
            }
            offset += fetched as i64;
        }
    }

    /// Retry every write the store has not acknowledged yet.
    pub async fn resync(&self) -> ResyncReport {
        let ws = &self.inner.working;
        let store = &self.inner.store;
        let mut report = ResyncReport::default();

        for id in ws.pending_deletes() {
            let _guard = ws.lock(&id).await;
            if !ws.is_pending_delete(&id) {
                continue;
            }
            match self.store_call("delete_strategy", store.delete_strategy(&id)).await {
                Ok(_) => {
                    ws.clear_pending_delete(&id);
                    report.deletes += 1;
                }
                Err(e) => {
                    debug!(strategy_id = %id, error = %e, "Pending delete still failing");
                    report.failures += 1;
                }
            }
        }

        for id in ws.dirty_ids() {
            let _guard = ws.lock(&id).await;
            if !ws.is_dirty(&id) {
                continue;
            }
            if self.write_through(&id).await {
                report.upserts += 1;
            } else {
                report.failures += 1;
            }
        }

        let pending = self.cache().unpersisted();
        if !pending.is_empty() {
            match self.store_call("save_signals", store.save_signals(&pending)).await {
                Ok(_) => {
                    self.cache().mark_persisted(pending.iter().map(|s| s.id.as_str()));
                    report.signals = pending.len();
                }
                Err(e) => {
                    debug!(count = pending.len(), error = %e, "Pending signals still unsaved");
                    report.failures += 1;
                }
            }
        }

        for (id, ts) in ws.signal_time_lagging() {
            if self.cache().has_unpersisted_for(&id) {
                continue;
            }
            let _guard = ws.lock(&id).await;
            match self
                .store_call("touch_last_signal_time", store.touch_last_signal_time(&id, ts))
                .await
            {
                Ok(()) => {
                    ws.set_durable_signal_time(&id, ts);
                    report.signal_times += 1;
                }
                Err(_) => report.failures += 1,
            }
        }

        if !report.is_empty() {
            info!(
                upserts = report.upserts,
                deletes = report.deletes,
                signals = report.signals,
                signal_times = report.signal_times,
                failures = report.failures,
                "Resync pass finished"
            );
        }
        report
    }

    /// Forget every cached strategy and its pending state. Later reads go to
    /// the store.
    pub fn clear_working_set(&self) {
        let dropped = self.inner.working.len();
        self.inner.working.clear();
        info!(dropped, "Working set cleared");
    }

    // ─── Internals ────────────────────────────────────────────────────────────

    pub(crate) fn cache(&self) -> MutexGuard<'_, SignalCache> {
        self.inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a gateway call under the persistence timeout.
    pub(crate) async fn store_call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = self.inner.settings.persistence_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::PersistenceUnavailable(format!(
                "{op} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Upsert the working copy of `id`. Caller holds the strategy lock.
    pub(crate) async fn write_through(&self, id: &str) -> bool {
        let Some(snapshot) = self.inner.working.persistable(id) else {
            return false;
        };
        match self
            .store_call("upsert_strategy", self.inner.store.upsert_strategy(&snapshot))
            .await
        {
            Ok(()) => {
                self.inner.working.mark_clean(id);
                true
            }
            Err(e) => {
                warn!(strategy_id = %id, error = %e, "Strategy write-through failed, will retry on resync");
                false
            }
        }
    }

    /// Working copy of `id`, falling back to the store when it is not cached.
    /// Caller holds the strategy lock.
    async fn load_for_mutation(&self, id: &str) -> Option<Strategy> {
        let ws = &self.inner.working;
        if ws.is_pending_delete(id) {
            return None;
        }
        if let Some(strategy) = ws.get(id) {
            return Some(strategy);
        }
        match self
            .store_call("get_strategy", self.inner.store.get_strategy(id))
            .await
        {
            Ok(Some(strategy)) => {
                ws.put_clean_if_absent(strategy.clone());
                Some(strategy)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(strategy_id = %id, error = %e, "Store read failed, strategy treated as unknown");
                None
            }
        }
    }
}

/// Wall-clock time at the store's microsecond precision.
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Run a market or news call under `timeout`.
pub(crate) async fn upstream_timeout<T>(
    timeout: Duration,
    code: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::upstream(
            code,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use store::MemoryGateway;

    use crate::tests_support::{engine_with, mean_reversion_request};
    use crate::StrategyUpdate;

    #[tokio::test]
    async fn lock_table_does_not_grow_with_unknown_ids() {
        let (engine, _, _) = engine_with(MemoryGateway::new());
        for i in 0..10_000 {
            assert!(!engine.delete_strategy(&format!("nope-{i}")).await);
        }
        for i in 0..100 {
            let updated = engine
                .update_strategy(&format!("missing-{i}"), StrategyUpdate::default())
                .await
                .unwrap();
            assert!(!updated);
        }
        assert_eq!(engine.inner.working.lock_count(), 0);
    }

    #[tokio::test]
    async fn lock_table_is_empty_after_a_strategy_lifecycle() {
        let (engine, _, _) = engine_with(MemoryGateway::new());
        let id = engine
            .create_strategy(mean_reversion_request(&["000001"]))
            .await
            .unwrap();
        engine.generate_signals().await;
        engine.resync().await;
        assert!(engine.delete_strategy(&id).await);
        assert_eq!(engine.inner.working.lock_count(), 0);
    }
}
