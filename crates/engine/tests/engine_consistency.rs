//! End-to-end behaviour of the engine against the in-memory gateway and the
//! simulated feed: fallback reads, write-through, resync and generation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};

use common::{
    Error, MeanReversionParams, MomentumParams, NewStrategy, PersistenceGateway, PricePoint,
    Quote, SignalType, StrategyParams, StrategyStatus,
};
use engine::{StrategyEngine, StrategyUpdate};
use feeds::SimulatedFeed;
use scoring::{PoolAction, PoolAdvisor};
use store::MemoryGateway;

// ─── Fixtures ─────────────────────────────────────────────────────────────────

fn setup() -> (StrategyEngine, MemoryGateway, SimulatedFeed) {
    let store = MemoryGateway::new();
    let feed = SimulatedFeed::new();
    let engine = StrategyEngine::builder(Arc::new(store.clone()), Arc::new(feed.clone()))
        .news(Arc::new(feed.clone()))
        .persistence_timeout(Duration::from_millis(200))
        .market_timeout(Duration::from_millis(200))
        .build();
    (engine, store, feed)
}

fn reversion(codes: &[&str]) -> NewStrategy {
    NewStrategy {
        name: "reversion".into(),
        params: StrategyParams::MeanReversion(MeanReversionParams {
            lookback_period: 20,
            buy_threshold: -0.08,
            sell_threshold: 0.02,
        }),
        stock_universe: codes.iter().map(|c| c.to_string()).collect(),
        rebalance_frequency: 10,
    }
}

fn momentum(codes: &[&str]) -> NewStrategy {
    NewStrategy {
        name: "momentum".into(),
        params: StrategyParams::Momentum(MomentumParams {
            momentum_period: 10,
            buy_threshold: 0.05,
            sell_threshold: -0.03,
            profit_target: 0.5,
            max_hold_days: 20,
        }),
        stock_universe: codes.iter().map(|c| c.to_string()).collect(),
        rebalance_frequency: 10,
    }
}

fn quote(code: &str, price: f64) -> Quote {
    Quote {
        code: code.into(),
        price,
        change_pct: None,
        turnover_rate: None,
        money_flow: None,
        volume: None,
        fundamentals: Default::default(),
        timestamp: Utc::now(),
    }
}

fn flat_history(n: usize, close: f64) -> Vec<PricePoint> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..n)
        .map(|i| PricePoint {
            date: start + chrono::Duration::days(i as i64),
            close,
            volume: None,
            turnover: None,
        })
        .collect()
}

/// Mean 10.0 with price 9.0: a -10% deviation, well past the BUY threshold.
async fn seed_dip(feed: &SimulatedFeed, code: &str) {
    feed.set_history(code, flat_history(30, 10.0)).await;
    feed.set_quote(quote(code, 9.0)).await;
}

// ─── Strategy CRUD ────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_served_by_working_set_while_store_is_down() {
    let (engine, store, _) = setup();
    store.set_offline(true);

    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();
    let fetched = engine.get_strategy(&id).await.expect("strategy from working set");
    assert_eq!(fetched.name, "reversion");
    assert_eq!(fetched.status, StrategyStatus::Active);
    assert!(fetched.performance_metrics.is_empty());
}

#[tokio::test]
async fn create_then_get_served_by_store_after_clearing_working_set() {
    let (engine, store, _) = setup();
    let id = engine.create_strategy(reversion(&["000001", "600519"])).await.unwrap();

    engine.clear_working_set();
    assert_eq!(engine.working_set_len(), 0);

    let fetched = engine.get_strategy(&id).await.expect("strategy from store");
    assert_eq!(fetched.stock_universe, vec!["000001", "600519"]);
    assert!(store.get_strategy(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn invalid_create_fails_before_any_write() {
    let (engine, store, _) = setup();
    let mut request = reversion(&["000001"]);
    request.params = StrategyParams::MeanReversion(MeanReversionParams {
        lookback_period: 1,
        buy_threshold: -0.08,
        sell_threshold: 0.02,
    });

    let err = engine.create_strategy(request).await.unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "lookback_period"));
    assert_eq!(engine.working_set_len(), 0);
    let page = common::Page::new(10, 0).unwrap();
    assert!(store
        .list_strategies(&Default::default(), page)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deleting_unknown_id_returns_false() {
    let (engine, _, _) = setup();
    assert!(!engine.delete_strategy("no-such-id").await);
}

#[tokio::test]
async fn delete_removes_from_both_sources() {
    let (engine, store, _) = setup();
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();

    assert!(engine.delete_strategy(&id).await);
    assert!(engine.get_strategy(&id).await.is_none());
    assert!(store.get_strategy(&id).await.unwrap().is_none());
    assert!(!engine.delete_strategy(&id).await);
}

#[tokio::test]
async fn delete_while_store_is_down_is_retried_by_resync() {
    let (engine, store, _) = setup();
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();

    store.set_offline(true);
    assert!(engine.delete_strategy(&id).await);
    assert!(engine.get_strategy(&id).await.is_none());

    store.set_offline(false);
    let report = engine.resync().await;
    assert_eq!(report.deletes, 1);
    assert!(store.get_strategy(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn update_of_unknown_id_is_false_without_side_effects() {
    let (engine, _, _) = setup();
    let updated = engine
        .update_strategy("missing", StrategyUpdate::default())
        .await
        .unwrap();
    assert!(!updated);
    assert_eq!(engine.working_set_len(), 0);
}

#[tokio::test]
async fn update_merges_parameters_and_revalidates() {
    let (engine, _, _) = setup();
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();

    let mut patch = serde_json::Map::new();
    patch.insert("buy_threshold".into(), serde_json::json!(-0.12));
    let update = StrategyUpdate {
        parameters: Some(patch),
        ..Default::default()
    };
    assert!(engine.update_strategy(&id, update).await.unwrap());

    let strategy = engine.get_strategy(&id).await.unwrap();
    let StrategyParams::MeanReversion(params) = strategy.params else {
        panic!("strategy type changed");
    };
    assert_eq!(params.buy_threshold, -0.12);
    assert_eq!(params.lookback_period, 20);
    assert!(strategy.updated_at >= strategy.created_at);

    let mut bad = serde_json::Map::new();
    bad.insert("sell_threshold".into(), serde_json::json!(-0.5));
    let err = engine
        .update_strategy(&id, StrategyUpdate { parameters: Some(bad), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "sell_threshold"));
}

#[tokio::test]
async fn stopped_is_terminal() {
    let (engine, _, _) = setup();
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();

    let stop = StrategyUpdate {
        status: Some(StrategyStatus::Stopped),
        ..Default::default()
    };
    assert!(engine.update_strategy(&id, stop).await.unwrap());

    let restart = StrategyUpdate {
        status: Some(StrategyStatus::Active),
        ..Default::default()
    };
    let err = engine.update_strategy(&id, restart).await.unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "status"));

    let stopped = engine
        .list_strategies(Some(StrategyStatus::Stopped), 10, 0)
        .await
        .unwrap();
    assert_eq!(stopped.len(), 1);
}

#[tokio::test]
async fn list_rejects_bad_page_before_store_access() {
    let (engine, store, _) = setup();
    store.set_offline(true);
    assert!(matches!(
        engine.list_strategies(None, 0, 0).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        engine.get_signals(None, 10, -1).await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn slow_store_falls_back_to_working_set() {
    let (engine, store, _) = setup();
    engine.create_strategy(reversion(&["000001"])).await.unwrap();
    store.set_latency(Duration::from_secs(2));

    let started = std::time::Instant::now();
    let listed = engine.list_strategies(None, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn cold_start_with_unreachable_store_lists_nothing() {
    let (engine, store, _) = setup();
    store.set_offline(true);
    assert!(engine.list_strategies(None, 10, 0).await.unwrap().is_empty());
    assert!(engine.get_signals(None, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn hydrate_loads_strategies_written_by_an_earlier_engine() {
    let (first, store, feed) = setup();
    first.create_strategy(reversion(&["000001"])).await.unwrap();

    let second = StrategyEngine::builder(Arc::new(store.clone()), Arc::new(feed)).build();
    assert_eq!(second.hydrate().await.unwrap(), 1);
    assert_eq!(second.working_set_len(), 1);
}

#[tokio::test]
async fn created_and_updated_times_keep_store_precision() {
    let (engine, _, _) = setup();
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();
    let rename = StrategyUpdate {
        name: Some("renamed".into()),
        ..Default::default()
    };
    engine.update_strategy(&id, rename).await.unwrap();

    let strategy = engine.get_strategy(&id).await.unwrap();
    assert_eq!(strategy.created_at.timestamp_subsec_nanos() % 1_000, 0);
    assert_eq!(strategy.updated_at.timestamp_subsec_nanos() % 1_000, 0);
}

#[tokio::test]
async fn concurrent_updates_of_one_strategy_all_apply() {
    let (engine, store, _) = setup();
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();
    store.set_latency(Duration::from_millis(20));

    let mut patch = serde_json::Map::new();
    patch.insert("buy_threshold".into(), serde_json::json!(-0.12));
    let rename = StrategyUpdate {
        name: Some("renamed".into()),
        ..Default::default()
    };
    let slower = StrategyUpdate {
        rebalance_frequency: Some(30),
        ..Default::default()
    };
    let retuned = StrategyUpdate {
        parameters: Some(patch),
        ..Default::default()
    };
    let (a, b, c) = tokio::join!(
        engine.update_strategy(&id, rename),
        engine.update_strategy(&id, slower),
        engine.update_strategy(&id, retuned),
    );
    assert!(a.unwrap() && b.unwrap() && c.unwrap());

    for strategy in [
        engine.get_strategy(&id).await.unwrap(),
        store.get_strategy(&id).await.unwrap().unwrap(),
    ] {
        assert_eq!(strategy.name, "renamed");
        assert_eq!(strategy.rebalance_frequency, 30);
        let StrategyParams::MeanReversion(params) = strategy.params else {
            panic!("strategy type changed");
        };
        assert_eq!(params.buy_threshold, -0.12);
    }
}

#[tokio::test]
async fn updates_racing_generation_never_move_signal_time_backwards() {
    let (engine, store, feed) = setup();
    let codes = ["000001", "000002", "600036", "600519", "601318"];
    for code in codes {
        seed_dip(&feed, code).await;
    }
    let id = engine.create_strategy(reversion(&codes)).await.unwrap();
    store.set_latency(Duration::from_millis(5));

    let mut previous = None;
    for round in 0..4 {
        let rename = StrategyUpdate {
            name: Some(format!("round {round}")),
            ..Default::default()
        };
        let (emitted, updated) = tokio::join!(
            engine.generate_signals(),
            engine.update_strategy(&id, rename),
        );
        assert!(updated.unwrap());
        assert_eq!(emitted.len(), codes.len());

        let stored = store.get_strategy(&id).await.unwrap().unwrap();
        assert!(stored.last_signal_time >= previous);
        previous = stored.last_signal_time;
    }

    let newest = engine.get_signals(Some(&id), 100, 0).await.unwrap()[0].timestamp;
    let stored = store.get_strategy(&id).await.unwrap().unwrap();
    assert_eq!(stored.name, "round 3");
    assert_eq!(stored.last_signal_time, Some(newest));
    assert_eq!(engine.get_strategy(&id).await.unwrap().last_signal_time, Some(newest));
}

#[tokio::test]
async fn unknown_preset_is_not_found() {
    let (engine, _, _) = setup();
    let err = engine.create_from_preset("nope", None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let id = engine
        .create_from_preset("balanced", Some("mine".into()))
        .await
        .unwrap();
    assert_eq!(engine.get_strategy(&id).await.unwrap().name, "mine");
}

// ─── Signals ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_signals_are_listed_newest_first() {
    let (engine, _, feed) = setup();
    for code in ["000001", "000002", "600036"] {
        seed_dip(&feed, code).await;
    }
    let id = engine
        .create_strategy(reversion(&["000001", "000002", "600036"]))
        .await
        .unwrap();

    let emitted = engine.generate_signals().await;
    assert_eq!(emitted.len(), 3);
    assert!(emitted.iter().all(|s| s.signal_type == SignalType::Buy && s.confidence > 0.0));

    let listed = engine.get_signals(Some(&id), 10, 0).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|w| w[0].timestamp > w[1].timestamp));

    let strategy = engine.get_strategy(&id).await.unwrap();
    assert_eq!(strategy.last_signal_time, Some(listed[0].timestamp));
}

#[tokio::test]
async fn generation_picks_up_active_strategies_missed_at_startup() {
    let (first, store, feed) = setup();
    seed_dip(&feed, "000001").await;
    first.create_strategy(reversion(&["000001"])).await.unwrap();

    let second = StrategyEngine::builder(Arc::new(store.clone()), Arc::new(feed))
        .persistence_timeout(Duration::from_millis(200))
        .build();
    store.set_offline(true);
    assert!(second.hydrate().await.is_err());
    store.set_offline(false);

    assert_eq!(second.list_strategies(Some(StrategyStatus::Active), 10, 0).await.unwrap().len(), 1);
    assert_eq!(second.generate_signals().await.len(), 1);

    second.clear_working_set();
    assert_eq!(second.generate_signals().await.len(), 1);
}

#[tokio::test]
async fn store_writes_are_batched_per_generation_pass() {
    let (engine, store, feed) = setup();
    let codes: Vec<String> = (0..20).map(|i| format!("{:06}", 300_000 + i)).collect();
    for code in &codes {
        seed_dip(&feed, code).await;
    }
    let refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let id = engine.create_strategy(reversion(&refs)).await.unwrap();
    store.set_latency(Duration::from_millis(50));

    let started = std::time::Instant::now();
    let emitted = engine.generate_signals().await;
    let elapsed = started.elapsed();
    assert_eq!(emitted.len(), 20);
    // One listing, one batch save and one signal-time update.
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");

    store.set_latency(Duration::ZERO);
    assert_eq!(store.signal_count().await, 20);
    let newest = emitted.iter().map(|s| s.timestamp).max();
    assert_eq!(store.get_strategy(&id).await.unwrap().unwrap().last_signal_time, newest);
}

#[tokio::test]
async fn failing_store_lists_signals_from_cache() {
    let (engine, store, feed) = setup();
    seed_dip(&feed, "000001").await;
    engine.create_strategy(reversion(&["000001"])).await.unwrap();

    store.set_offline(true);
    let emitted = engine.generate_signals().await;
    assert_eq!(emitted.len(), 1);

    let listed = engine.get_signals(None, 10, 0).await.unwrap();
    assert_eq!(listed, emitted);
}

#[tokio::test]
async fn unsaved_signals_and_signal_time_are_resynced() {
    let (engine, store, feed) = setup();
    seed_dip(&feed, "000001").await;
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();

    store.set_offline(true);
    let emitted = engine.generate_signals().await;
    store.set_offline(false);

    // Nothing durable may point past the signals the store holds.
    let stored = store.get_strategy(&id).await.unwrap().unwrap();
    assert_eq!(stored.last_signal_time, None);
    assert_eq!(store.signal_count().await, 0);

    let report = engine.resync().await;
    assert_eq!(report.signals, 1);
    assert_eq!(report.signal_times, 1);
    assert_eq!(store.signal_count().await, 1);
    let stored = store.get_strategy(&id).await.unwrap().unwrap();
    assert_eq!(stored.last_signal_time, Some(emitted[0].timestamp));
}

#[tokio::test]
async fn paused_strategies_are_skipped() {
    let (engine, _, feed) = setup();
    seed_dip(&feed, "000001").await;
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();
    let pause = StrategyUpdate {
        status: Some(StrategyStatus::Paused),
        ..Default::default()
    };
    engine.update_strategy(&id, pause).await.unwrap();

    assert!(engine.generate_signals().await.is_empty());
}

#[tokio::test]
async fn slow_market_data_is_skipped_not_awaited() {
    let (engine, _, feed) = setup();
    seed_dip(&feed, "000001").await;
    engine.create_strategy(reversion(&["000001"])).await.unwrap();
    feed.set_latency(Some(Duration::from_secs(2))).await;

    let started = std::time::Instant::now();
    assert!(engine.generate_signals().await.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn cancelled_generation_leaves_no_dangling_signal_time() {
    let (engine, _, feed) = setup();
    seed_dip(&feed, "000001").await;
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();
    feed.set_latency(Some(Duration::from_millis(150))).await;

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), engine.generate_signals()).await;
    assert!(cancelled.is_err());
    assert_eq!(engine.cached_signal_count(), 0);
    assert_eq!(engine.get_strategy(&id).await.unwrap().last_signal_time, None);

    feed.set_latency(None).await;
    assert_eq!(engine.generate_signals().await.len(), 1);
}

#[tokio::test]
async fn momentum_position_blocks_repeat_entries_and_is_dropped_with_universe() {
    let (engine, _, feed) = setup();
    feed.set_history("000001", flat_history(30, 10.0)).await;
    feed.set_quote(quote("000001", 11.0)).await;
    let id = engine.create_strategy(momentum(&["000001", "600519"])).await.unwrap();

    let first = engine.generate_signals().await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].signal_type, SignalType::Buy);
    let strategy = engine.get_strategy(&id).await.unwrap();
    assert_eq!(strategy.positions["000001"].entry_price, 11.0);

    // Still above the entry threshold but already holding: no second BUY.
    assert!(engine.generate_signals().await.is_empty());

    let shrink = StrategyUpdate {
        stock_universe: Some(vec!["600519".into()]),
        ..Default::default()
    };
    engine.update_strategy(&id, shrink).await.unwrap();
    assert!(engine.get_strategy(&id).await.unwrap().positions.is_empty());
}

#[tokio::test]
async fn subscribers_receive_new_signals() {
    let (engine, _, feed) = setup();
    seed_dip(&feed, "000001").await;
    engine.create_strategy(reversion(&["000001"])).await.unwrap();
    let mut rx = engine.subscribe();

    let emitted = engine.generate_signals().await;
    assert_eq!(rx.recv().await.unwrap(), emitted[0]);
}

#[tokio::test]
async fn performance_counts_signals_by_type() {
    let (engine, _, feed) = setup();
    seed_dip(&feed, "000001").await;
    let id = engine.create_strategy(reversion(&["000001"])).await.unwrap();
    engine.generate_signals().await;
    engine.generate_signals().await;

    let perf = engine.strategy_performance(&id).await.unwrap();
    assert_eq!(perf.total_signals, 2);
    assert_eq!(perf.buy_signals, 2);
    assert!(perf.avg_confidence.unwrap() > 0.0);
    assert!(engine.strategy_performance("missing").await.is_none());
}

#[tokio::test]
async fn prune_only_drops_persisted_signals() {
    let (engine, store, feed) = setup();
    seed_dip(&feed, "000001").await;
    engine.create_strategy(reversion(&["000001"])).await.unwrap();
    engine.generate_signals().await;
    store.set_offline(true);
    engine.generate_signals().await;

    let removed = engine.prune_signal_cache(Utc::now() + chrono::Duration::seconds(1));
    assert_eq!(removed, 1);
    assert_eq!(engine.cached_signal_count(), 1);
}

// ─── Scoring ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scoring_unknown_instrument_is_neutral() {
    let (engine, _, _) = setup();
    let score = engine.score_instrument("999999").await.unwrap();
    assert_eq!(score.total, 50.0);
    assert!(score.momentum.is_none());

    assert!(matches!(
        engine.score_instrument("  ").await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn scoring_uses_feed_inputs() {
    let (engine, _, feed) = setup();
    let mut q = quote("600519", 1800.0);
    q.change_pct = Some(3.0);
    q.turnover_rate = Some(2.0);
    feed.set_quote(q).await;

    let score = engine.score_instrument("600519").await.unwrap();
    assert!(score.momentum.is_some());
    assert!((0.0..=100.0).contains(&score.total));
}

#[tokio::test]
async fn pool_review_remembers_the_previous_run() {
    let advisor = PoolAdvisor {
        entry_threshold: 40.0,
        ..PoolAdvisor::default()
    };
    let engine = StrategyEngine::builder(Arc::new(MemoryGateway::new()), Arc::new(SimulatedFeed::new()))
        .pool_advisor(advisor)
        .build();
    let pool = vec!["000001".to_string()];
    let candidates = vec!["000002".to_string()];

    let first = engine.review_pool(pool.clone(), candidates.clone()).await.unwrap();
    let codes: Vec<_> = first.scored.iter().map(|s| s.stock_code.as_str()).collect();
    assert_eq!(codes, vec!["000001", "000002"]);
    let actions: Vec<_> = first
        .suggestions
        .iter()
        .map(|s| (s.stock_code.as_str(), s.action))
        .collect();
    assert!(actions.contains(&("000002", PoolAction::Add)));
    assert!(actions.contains(&("000001", PoolAction::Remove)));

    // Same scores again: no rise, so the candidate is no longer proposed.
    let second = engine.review_pool(pool, candidates).await.unwrap();
    assert!(second.suggestions.iter().all(|s| s.stock_code != "000002"));

    assert!(matches!(
        engine.review_pool(Vec::new(), Vec::new()).await,
        Err(Error::Validation { .. })
    ));
}
