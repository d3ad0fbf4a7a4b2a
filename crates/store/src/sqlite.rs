use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use common::{
    Error, OpenPosition, Page, PersistenceGateway, Result, RiskLevel, SignalFilter, SignalType,
    Strategy, StrategyFilter, StrategyParams, StrategyStatus, StrategyType, TradingSignal,
};

use crate::{format_ts, parse_ts};

/// SQLite-backed gateway. Schema lives in the workspace `migrations/`.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating the file if needed) and migrate.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let gateway = Self::new(pool);
        gateway.migrate().await?;
        info!(url, "SQLite gateway ready");
        Ok(gateway)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Config(format!("database migration failed: {e}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct StrategyRow {
    id: String,
    name: String,
    strategy_type: String,
    parameters: String,
    stock_universe: String,
    rebalance_frequency: i64,
    status: String,
    performance_metrics: String,
    positions: String,
    created_at: String,
    updated_at: String,
    last_signal_time: Option<String>,
}

impl TryFrom<StrategyRow> for Strategy {
    type Error = Error;

    fn try_from(row: StrategyRow) -> Result<Self> {
        let strategy_type = StrategyType::from_str(&row.strategy_type)?;
        let parameters: serde_json::Value = serde_json::from_str(&row.parameters)?;
        let positions: BTreeMap<String, OpenPosition> = serde_json::from_str(&row.positions)?;
        Ok(Strategy {
            params: StrategyParams::from_parts(strategy_type, &parameters)?,
            stock_universe: serde_json::from_str(&row.stock_universe)?,
            rebalance_frequency: u32::try_from(row.rebalance_frequency).map_err(|_| {
                Error::Other(format!("stored rebalance_frequency out of range for '{}'", row.id))
            })?,
            status: StrategyStatus::from_str(&row.status)?,
            performance_metrics: serde_json::from_str(&row.performance_metrics)?,
            positions,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            last_signal_time: row.last_signal_time.as_deref().map(parse_ts).transpose()?,
            id: row.id,
            name: row.name,
        })
    }
}

#[derive(Debug, FromRow)]
struct SignalRow {
    id: String,
    strategy_id: String,
    stock_code: String,
    signal_type: String,
    confidence: f64,
    price: Option<f64>,
    timestamp: String,
    reason: String,
    expected_return: Option<f64>,
    risk_level: Option<String>,
    strategy_type: String,
    parameters: String,
}

impl TryFrom<SignalRow> for TradingSignal {
    type Error = Error;

    fn try_from(row: SignalRow) -> Result<Self> {
        let strategy_type = StrategyType::from_str(&row.strategy_type)?;
        let parameters: serde_json::Value = serde_json::from_str(&row.parameters)?;
        Ok(TradingSignal {
            id: row.id,
            strategy_id: row.strategy_id,
            stock_code: row.stock_code,
            signal_type: SignalType::from_str(&row.signal_type)?,
            confidence: row.confidence,
            price: row.price,
            timestamp: parse_ts(&row.timestamp)?,
            reason: row.reason,
            expected_return: row.expected_return,
            risk_level: row.risk_level.as_deref().map(RiskLevel::from_str).transpose()?,
            parameters: StrategyParams::from_parts(strategy_type, &parameters)?,
        })
    }
}

fn params_json(params: &StrategyParams) -> Result<String> {
    Ok(serde_json::to_string(&params.to_map())?)
}

const STRATEGY_COLUMNS: &str = "id, name, strategy_type, parameters, stock_universe, \
     rebalance_frequency, status, performance_metrics, positions, created_at, updated_at, \
     last_signal_time";

const SIGNAL_COLUMNS: &str = "id, strategy_id, stock_code, signal_type, confidence, price, \
     timestamp, reason, expected_return, risk_level, strategy_type, parameters";

// ─── Gateway ──────────────────────────────────────────────────────────────────

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategies (id, name, strategy_type, parameters, stock_universe,
                rebalance_frequency, status, performance_metrics, positions,
                created_at, updated_at, last_signal_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                strategy_type = excluded.strategy_type,
                parameters = excluded.parameters,
                stock_universe = excluded.stock_universe,
                rebalance_frequency = excluded.rebalance_frequency,
                status = excluded.status,
                performance_metrics = excluded.performance_metrics,
                positions = excluded.positions,
                updated_at = excluded.updated_at,
                last_signal_time = CASE
                    WHEN strategies.last_signal_time IS NULL THEN excluded.last_signal_time
                    WHEN excluded.last_signal_time IS NULL THEN strategies.last_signal_time
                    WHEN excluded.last_signal_time > strategies.last_signal_time
                        THEN excluded.last_signal_time
                    ELSE strategies.last_signal_time
                END
            "#,
        )
        .bind(&strategy.id)
        .bind(&strategy.name)
        .bind(strategy.strategy_type().to_string())
        .bind(params_json(&strategy.params)?)
        .bind(serde_json::to_string(&strategy.stock_universe)?)
        .bind(i64::from(strategy.rebalance_frequency))
        .bind(strategy.status.to_string())
        .bind(serde_json::to_string(&strategy.performance_metrics)?)
        .bind(serde_json::to_string(&strategy.positions)?)
        .bind(format_ts(&strategy.created_at))
        .bind(format_ts(&strategy.updated_at))
        .bind(strategy.last_signal_time.as_ref().map(format_ts))
        .execute(&self.pool)
        .await?;

        debug!(strategy_id = %strategy.id, "Strategy upserted");
        Ok(())
    }

    async fn get_strategy(&self, id: &str) -> Result<Option<Strategy>> {
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?1");
        let row: Option<StrategyRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Strategy::try_from).transpose()
    }

    async fn list_strategies(&self, filter: &StrategyFilter, page: Page) -> Result<Vec<Strategy>> {
        let sql = format!(
            "SELECT {STRATEGY_COLUMNS} FROM strategies \
             WHERE (?1 IS NULL OR status = ?1) \
             ORDER BY created_at DESC, id ASC LIMIT ?2 OFFSET ?3"
        );
        let rows: Vec<StrategyRow> = sqlx::query_as(&sql)
            .bind(filter.status.map(|s| s.to_string()))
            .bind(i64::from(page.limit()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Strategy::try_from).collect()
    }

    async fn delete_strategy(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM strategies WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_signals(&self, signals: &[TradingSignal]) -> Result<usize> {
        if signals.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for signal in signals {
            let result = sqlx::query(
                r#"
                INSERT INTO trading_signals (id, strategy_id, stock_code, signal_type, confidence,
                    price, timestamp, reason, expected_return, risk_level, strategy_type, parameters)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&signal.id)
            .bind(&signal.strategy_id)
            .bind(&signal.stock_code)
            .bind(signal.signal_type.to_string())
            .bind(signal.confidence)
            .bind(signal.price)
            .bind(format_ts(&signal.timestamp))
            .bind(&signal.reason)
            .bind(signal.expected_return)
            .bind(signal.risk_level.map(|r| r.to_string()))
            .bind(signal.parameters.strategy_type().to_string())
            .bind(params_json(&signal.parameters)?)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted as usize)
    }

    async fn list_signals(&self, filter: &SignalFilter, page: Page) -> Result<Vec<TradingSignal>> {
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM trading_signals \
             WHERE (?1 IS NULL OR strategy_id = ?1) \
             ORDER BY timestamp DESC, id ASC LIMIT ?2 OFFSET ?3"
        );
        let rows: Vec<SignalRow> = sqlx::query_as(&sql)
            .bind(filter.strategy_id.as_deref())
            .bind(i64::from(page.limit()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TradingSignal::try_from).collect()
    }

    async fn touch_last_signal_time(&self, id: &str, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE strategies SET last_signal_time = ?2 \
             WHERE id = ?1 AND (last_signal_time IS NULL OR last_signal_time < ?2)",
        )
        .bind(id)
        .bind(format_ts(&ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
