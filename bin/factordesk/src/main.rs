use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, MarketDataSource, NewsSource, PersistenceGateway};
use engine::{Scheduler, SchedulerCommand, StrategyEngine};
use feeds::{SimulatedFeed, SnapshotFeed};
use scoring::ScoringEngine;
use store::{MemoryGateway, SqliteGateway};
use strategy::PresetBook;

/// Persisted signals older than this leave the in-process cache.
const SIGNAL_RETENTION_DAYS: i64 = 30;
const PRUNE_EVERY: Duration = Duration::from_secs(3600);
const SNAPSHOT_RELOAD_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(port = cfg.api_port, "factordesk starting");

    // ── Persistence ───────────────────────────────────────────────────────────
    let store: Arc<dyn PersistenceGateway> = match &cfg.database_url {
        Some(url) => {
            let gateway = SqliteGateway::connect(url)
                .await
                .with_context(|| format!("failed to open database at {url}"))?;
            info!("Database ready");
            Arc::new(gateway)
        }
        None => {
            warn!("DATABASE_URL not set, strategies and signals live in memory only");
            Arc::new(MemoryGateway::new())
        }
    };

    // ── Market data ───────────────────────────────────────────────────────────
    let snapshot = match &cfg.market_snapshot_path {
        Some(path) => Some(Arc::new(
            SnapshotFeed::load(path)
                .await
                .with_context(|| format!("failed to load market snapshot {path}"))?,
        )),
        None => {
            warn!("MARKET_SNAPSHOT_PATH not set, using an empty simulated feed");
            None
        }
    };
    let (market, news): (Arc<dyn MarketDataSource>, Arc<dyn NewsSource>) = match &snapshot {
        Some(feed) => (
            feed.clone() as Arc<dyn MarketDataSource>,
            feed.clone() as Arc<dyn NewsSource>,
        ),
        None => {
            let feed = SimulatedFeed::new();
            (
                Arc::new(feed.clone()) as Arc<dyn MarketDataSource>,
                Arc::new(feed) as Arc<dyn NewsSource>,
            )
        }
    };

    // ── Engine ────────────────────────────────────────────────────────────────
    let presets = match &cfg.presets_path {
        Some(path) => PresetBook::load(path).with_context(|| format!("failed to load presets {path}"))?,
        None => PresetBook::builtin(),
    };
    let scoring = ScoringEngine::new(cfg.factor_weights).context("invalid factor weights")?;

    let engine = StrategyEngine::builder(store, market)
        .news(news)
        .scoring(scoring)
        .presets(presets)
        .persistence_timeout(cfg.persistence_timeout)
        .market_timeout(cfg.market_timeout)
        .max_concurrent_fetches(cfg.max_concurrent_fetches)
        .signal_cache_capacity(cfg.signal_cache_capacity)
        .build();

    match engine.hydrate().await {
        Ok(n) => info!(strategies = n, "Strategies loaded"),
        Err(e) => warn!(error = %e, "Store unavailable at startup, active strategies load on the next generation pass"),
    }

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let scheduler = match cfg.generation_interval {
        Some(interval) => {
            let (scheduler, handle) = Scheduler::new(engine.clone(), interval);
            tokio::spawn(scheduler.run());
            handle.send(SchedulerCommand::Start).await;
            Some(handle)
        }
        None => {
            info!("GENERATION_INTERVAL_SECS is 0, signals are generated on request only");
            None
        }
    };

    // ── Housekeeping ──────────────────────────────────────────────────────────
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_EVERY);
            loop {
                ticker.tick().await;
                let cutoff = chrono::Utc::now() - chrono::Duration::days(SIGNAL_RETENTION_DAYS);
                engine.prune_signal_cache(cutoff);
            }
        });
    }
    if let Some(feed) = snapshot {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SNAPSHOT_RELOAD_EVERY);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = feed.reload().await {
                    warn!(error = %e, "Market snapshot reload failed, keeping previous data");
                }
            }
        });
    }

    // ── API ───────────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        engine: engine.clone(),
        scheduler: scheduler.clone(),
        api_token: cfg.api_token.clone(),
    };
    let port = cfg.api_port;
    let server = tokio::spawn(api::serve(api_state, port));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
        joined = server => {
            joined.context("API task panicked")?.context("API server failed")?;
        }
    }

    if let Some(handle) = scheduler {
        handle.send(SchedulerCommand::Stop).await;
    }
    let report = engine.resync().await;
    if report.failures > 0 {
        warn!(failures = report.failures, "Some writes were still pending at shutdown");
    }
    info!("Exiting.");
    Ok(())
}
