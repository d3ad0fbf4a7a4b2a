use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{
    MarketDataSource, OpenPosition, Strategy, StrategyFilter, StrategyParams, StrategyStatus,
    TradingSignal,
};
use strategy::{EvaluationInput, PositionChange, RuleEvaluator, SignalDecision};

use crate::engine::{now_micros, upstream_timeout, StrategyEngine};

/// One (strategy, instrument) evaluation, run on its own task.
struct EvaluationJob {
    market: Arc<dyn MarketDataSource>,
    evaluator: Arc<dyn RuleEvaluator>,
    strategy: Arc<Strategy>,
    code: String,
    timeout: Duration,
    report_hold: bool,
    permits: Arc<Semaphore>,
}

/// A decision waiting to be recorded, with the position it was based on.
struct Evaluated {
    strategy_id: String,
    code: String,
    params: StrategyParams,
    position_before: Option<OpenPosition>,
    decision: SignalDecision,
}

impl EvaluationJob {
    async fn run(self) -> Option<Evaluated> {
        let _permit = self.permits.clone().acquire_owned().await.ok()?;
        let code = self.code.as_str();
        let strategy_id = self.strategy.id.as_str();
        let lookback = self.strategy.params.required_history();

        let (quote, history) = tokio::join!(
            upstream_timeout(self.timeout, code, self.market.latest_quote(code)),
            upstream_timeout(self.timeout, code, self.market.price_history(code, lookback)),
        );
        let quote = match quote {
            Ok(q) => q,
            Err(e) => {
                warn!(strategy_id, code, error = %e, "Quote unavailable, instrument skipped");
                return None;
            }
        };
        let history = match history {
            Ok(h) => h,
            Err(e) => {
                warn!(strategy_id, code, error = %e, "History unavailable, instrument skipped");
                return None;
            }
        };

        let position = self.strategy.positions.get(code);
        let input = EvaluationInput {
            strategy: &self.strategy,
            code,
            history: &history,
            quote: &quote,
            position,
            as_of: now_micros(),
            report_hold: self.report_hold,
        };
        let decision = self.evaluator.evaluate(&input);
        debug!(
            strategy_id,
            code,
            points = history.len(),
            decision = ?decision.as_ref().map(|d| d.signal_type),
            "Instrument evaluated"
        );

        Some(Evaluated {
            strategy_id: self.strategy.id.clone(),
            code: self.code.clone(),
            params: self.strategy.params.clone(),
            position_before: position.cloned(),
            decision: decision?,
        })
    }
}

impl StrategyEngine {
    /// Evaluate every active strategy against its universe.
    ///
    /// Active strategies the store holds but the working set has not seen
    /// are loaded first. Instruments run in parallel, bounded by the fetch
    /// limit, and each decision is recorded in memory as soon as it completes.
    /// The store is written once per pass: one batch of signals, then one
    /// signal-time update per strategy. Dropping this future keeps every
    /// signal already recorded; `resync()` persists whatever the pass did not.
    pub async fn generate_signals(&self) -> Vec<TradingSignal> {
        let active_filter = StrategyFilter {
            status: Some(StrategyStatus::Active),
        };
        match self.load_from_store(&active_filter).await {
            Ok(0) => {}
            Ok(loaded) => info!(loaded, "Active strategies loaded from store"),
            Err(e) => warn!(error = %e, "Store unavailable, generating from working set"),
        }

        let active = self.inner.working.list(&active_filter);
        if active.is_empty() {
            debug!("No active strategies, nothing to generate");
            return Vec::new();
        }

        let settings = self.inner.settings;
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_fetches));
        let mut tasks = JoinSet::new();

        for strategy in active {
            let Some(evaluator) = self.inner.registry.get(strategy.strategy_type()) else {
                warn!(strategy_id = %strategy.id, strategy_type = %strategy.strategy_type(), "No evaluator registered, strategy skipped");
                continue;
            };
            let strategy = Arc::new(strategy);
            for code in &strategy.stock_universe {
                let job = EvaluationJob {
                    market: self.inner.market.clone(),
                    evaluator: evaluator.clone(),
                    strategy: strategy.clone(),
                    code: code.clone(),
                    timeout: settings.market_timeout,
                    report_hold: settings.report_hold,
                    permits: permits.clone(),
                };
                tasks.spawn(job.run());
            }
        }

        let jobs = tasks.len();
        let mut emitted = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(evaluated)) => {
                    if let Some(signal) = self.record(evaluated).await {
                        emitted.push(signal);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Evaluation task failed"),
            }
        }

        self.persist_pass(&emitted).await;
        info!(jobs, signals = emitted.len(), "Signal generation finished");
        emitted
    }

    /// Record one decision under the strategy lock, in memory only.
    ///
    /// The signal reaches the cache, the position and `last_signal_time`
    /// before any store call.
    async fn record(&self, evaluated: Evaluated) -> Option<TradingSignal> {
        let Evaluated {
            strategy_id,
            code,
            params,
            position_before,
            decision,
        } = evaluated;
        let ws = &self.inner.working;
        let _guard = ws.lock(&strategy_id).await;

        let current = ws.get(&strategy_id)?;
        if !current.is_active() || current.positions.get(&code) != position_before.as_ref() {
            debug!(strategy_id = %strategy_id, code = %code, "Strategy changed during evaluation, decision dropped");
            return None;
        }

        let timestamp = self.inner.clock.next();
        let position_changed = decision.position != PositionChange::Unchanged;
        let signal = TradingSignal {
            id: Uuid::new_v4().to_string(),
            strategy_id: strategy_id.clone(),
            stock_code: code.clone(),
            signal_type: decision.signal_type,
            confidence: decision.confidence.clamp(0.0, 1.0),
            price: decision.price,
            timestamp,
            reason: decision.reason,
            expected_return: decision.expected_return,
            risk_level: decision.risk_level,
            parameters: params,
        };

        self.cache().push(signal.clone());
        let position = decision.position;
        ws.update(&strategy_id, position_changed, |s| {
            match position {
                PositionChange::Open(p) => {
                    s.positions.insert(code.clone(), p);
                }
                PositionChange::Close => {
                    s.positions.remove(&code);
                }
                PositionChange::Unchanged => {}
            }
            s.touch_last_signal(timestamp);
        });
        // No subscribers is not an error.
        let _ = self.inner.signal_tx.send(signal.clone());

        info!(
            strategy_id = %strategy_id,
            code = %code,
            signal_type = %signal.signal_type,
            confidence = signal.confidence,
            "Signal emitted"
        );
        Some(signal)
    }

    /// Save the pass's signals in one batch, then settle each touched
    /// strategy concurrently.
    async fn persist_pass(&self, emitted: &[TradingSignal]) {
        if emitted.is_empty() {
            return;
        }
        let saved = match self
            .store_call("save_signals", self.inner.store.save_signals(emitted))
            .await
        {
            Ok(_) => {
                self.cache().mark_persisted(emitted.iter().map(|s| s.id.as_str()));
                true
            }
            Err(e) => {
                warn!(count = emitted.len(), error = %e, "Signal save failed, kept in cache for resync");
                false
            }
        };

        let mut latest: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
        for signal in emitted {
            let ts = latest.entry(signal.strategy_id.as_str()).or_insert(signal.timestamp);
            *ts = (*ts).max(signal.timestamp);
        }

        let mut tasks = JoinSet::new();
        for (strategy_id, ts) in latest {
            let engine = self.clone();
            let strategy_id = strategy_id.to_string();
            tasks.spawn(async move { engine.settle(&strategy_id, ts, saved).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Strategy settle task failed");
            }
        }
    }

    /// Move the store's `last_signal_time` to `latest` once its signals are
    /// saved, and write through any position change. Holds the strategy lock.
    async fn settle(&self, strategy_id: &str, latest: DateTime<Utc>, signals_saved: bool) {
        let ws = &self.inner.working;
        let _guard = ws.lock(strategy_id).await;
        if ws.get(strategy_id).is_none() {
            return;
        }

        if signals_saved {
            match self
                .store_call(
                    "touch_last_signal_time",
                    self.inner.store.touch_last_signal_time(strategy_id, latest),
                )
                .await
            {
                Ok(()) => ws.set_durable_signal_time(strategy_id, latest),
                Err(e) => {
                    warn!(strategy_id, error = %e, "Signal time not persisted, will retry on resync")
                }
            }
        }
        if ws.is_dirty(strategy_id) {
            self.write_through(strategy_id).await;
        }
    }
}
