use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{check_field, fields_for, FieldKind};
use crate::{Error, Result};

// ─── Strategy ─────────────────────────────────────────────────────────────────

/// Closed set of rule families the engine knows how to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    MeanReversion,
    Momentum,
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyType::MeanReversion => write!(f, "mean_reversion"),
            StrategyType::Momentum => write!(f, "momentum"),
        }
    }
}

impl FromStr for StrategyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean_reversion" => Ok(StrategyType::MeanReversion),
            "momentum" => Ok(StrategyType::Momentum),
            other => Err(Error::validation(
                "strategy_type",
                format!("unsupported strategy type '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionParams {
    pub lookback_period: usize,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumParams {
    pub momentum_period: usize,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub profit_target: f64,
    pub max_hold_days: u32,
}

/// Strategy parameters, one strongly-typed variant per strategy type.
///
/// Serializes as `{"strategy_type": "...", "parameters": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy_type", content = "parameters", rename_all = "snake_case")]
pub enum StrategyParams {
    MeanReversion(MeanReversionParams),
    Momentum(MomentumParams),
}

impl StrategyParams {
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyParams::MeanReversion(_) => StrategyType::MeanReversion,
            StrategyParams::Momentum(_) => StrategyType::Momentum,
        }
    }

    /// Build typed parameters from an untyped JSON object, naming the first
    /// offending field on failure.
    pub fn from_parts(strategy_type: StrategyType, parameters: &Value) -> Result<Self> {
        let Some(obj) = parameters.as_object() else {
            return Err(Error::validation("parameters", "must be a JSON object"));
        };

        for key in obj.keys() {
            if !fields_for(strategy_type).iter().any(|f| f.name == key) {
                return Err(Error::validation(
                    key.as_str(),
                    format!("unknown parameter for strategy type '{strategy_type}'"),
                ));
            }
        }

        for spec in fields_for(strategy_type) {
            let Some(value) = obj.get(spec.name) else {
                return Err(Error::validation(spec.name, "is required"));
            };
            let number = match spec.kind {
                FieldKind::Integer => value
                    .as_u64()
                    .map(|v| v as f64)
                    .ok_or_else(|| Error::validation(spec.name, "must be a non-negative integer"))?,
                FieldKind::Number => value
                    .as_f64()
                    .ok_or_else(|| Error::validation(spec.name, "must be a number"))?,
            };
            spec.check(number)?;
        }

        let params = match strategy_type {
            StrategyType::MeanReversion => {
                StrategyParams::MeanReversion(serde_json::from_value(parameters.clone())?)
            }
            StrategyType::Momentum => {
                StrategyParams::Momentum(serde_json::from_value(parameters.clone())?)
            }
        };
        params.validate()?;
        Ok(params)
    }

    /// The parameter fields as a flat JSON object.
    pub fn to_map(&self) -> Map<String, Value> {
        let value = match self {
            StrategyParams::MeanReversion(p) => serde_json::to_value(p),
            StrategyParams::Momentum(p) => serde_json::to_value(p),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Overlay a partial set of fields onto these parameters and re-validate.
    /// The strategy type never changes through a merge.
    pub fn merge(&self, patch: &Map<String, Value>) -> Result<Self> {
        let mut merged = self.to_map();
        for (key, value) in patch {
            if !merged.contains_key(key) {
                return Err(Error::validation(
                    key.as_str(),
                    format!("unknown parameter for strategy type '{}'", self.strategy_type()),
                ));
            }
            merged.insert(key.clone(), value.clone());
        }
        Self::from_parts(self.strategy_type(), &Value::Object(merged))
    }

    pub fn validate(&self) -> Result<()> {
        let t = self.strategy_type();
        match self {
            StrategyParams::MeanReversion(p) => {
                check_field(t, "lookback_period", p.lookback_period as f64)?;
                check_field(t, "buy_threshold", p.buy_threshold)?;
                check_field(t, "sell_threshold", p.sell_threshold)?;
            }
            StrategyParams::Momentum(p) => {
                check_field(t, "momentum_period", p.momentum_period as f64)?;
                check_field(t, "buy_threshold", p.buy_threshold)?;
                check_field(t, "sell_threshold", p.sell_threshold)?;
                check_field(t, "profit_target", p.profit_target)?;
                check_field(t, "max_hold_days", p.max_hold_days as f64)?;
            }
        }
        Ok(())
    }

    /// Number of trailing closes the evaluator for these parameters needs.
    pub fn required_history(&self) -> usize {
        match self {
            StrategyParams::MeanReversion(p) => p.lookback_period,
            StrategyParams::Momentum(p) => p.momentum_period,
        }
    }
}

/// Lifecycle state of a strategy.
///
/// `active ⇄ paused`, `active|paused → stopped`. `stopped` is terminal: the
/// only way out is deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum StrategyStatus {
    Active,
    Paused,
    Stopped,
}

impl StrategyStatus {
    pub fn transition_to(self, next: StrategyStatus) -> Result<StrategyStatus> {
        match (self, next) {
            (StrategyStatus::Stopped, StrategyStatus::Stopped) => Ok(next),
            (StrategyStatus::Stopped, _) => Err(Error::validation(
                "status",
                format!("a stopped strategy cannot become {next}"),
            )),
            _ => Ok(next),
        }
    }
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Active => write!(f, "active"),
            StrategyStatus::Paused => write!(f, "paused"),
            StrategyStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for StrategyStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(StrategyStatus::Active),
            "paused" => Ok(StrategyStatus::Paused),
            "stopped" => Ok(StrategyStatus::Stopped),
            other => Err(Error::validation("status", format!("unknown status '{other}'"))),
        }
    }
}

/// Position opened by a stateful evaluator, tracked per instrument on the
/// owning strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub params: StrategyParams,
    pub stock_universe: Vec<String>,
    /// Re-evaluation interval in trading days.
    pub rebalance_frequency: u32,
    pub status: StrategyStatus,
    #[serde(default)]
    pub performance_metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_signal_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub positions: BTreeMap<String, OpenPosition>,
}

impl Strategy {
    pub fn strategy_type(&self) -> StrategyType {
        self.params.strategy_type()
    }

    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }

    /// Advance `last_signal_time`, never moving it backwards.
    pub fn touch_last_signal(&mut self, ts: DateTime<Utc>) {
        if self.last_signal_time.map_or(true, |prev| ts > prev) {
            self.last_signal_time = Some(ts);
        }
    }
}

/// A validated request to create a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStrategy {
    pub name: String,
    pub params: StrategyParams,
    pub stock_universe: Vec<String>,
    pub rebalance_frequency: u32,
}

impl NewStrategy {
    pub fn into_strategy(self, id: String, now: DateTime<Utc>) -> Result<Strategy> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        self.params.validate()?;
        let stock_universe = normalize_universe(self.stock_universe)?;
        if self.rebalance_frequency == 0 {
            return Err(Error::validation("rebalance_frequency", "must be > 0"));
        }

        Ok(Strategy {
            id,
            name,
            params: self.params,
            stock_universe,
            rebalance_frequency: self.rebalance_frequency,
            status: StrategyStatus::Active,
            performance_metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_signal_time: None,
            positions: BTreeMap::new(),
        })
    }
}

/// Trim codes and drop duplicates, keeping first-seen order.
pub fn normalize_universe(codes: Vec<String>) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(codes.len());
    for code in codes {
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(Error::validation("stock_universe", "instrument codes must not be blank"));
        }
        if seen.insert(code.clone()) {
            out.push(code);
        }
    }
    if out.is_empty() {
        return Err(Error::validation("stock_universe", "must contain at least one instrument"));
    }
    Ok(out)
}

// ─── Signals ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Buy => write!(f, "BUY"),
            SignalType::Sell => write!(f, "SELL"),
            SignalType::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for SignalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalType::Buy),
            "SELL" => Ok(SignalType::Sell),
            "HOLD" => Ok(SignalType::Hold),
            _ => Err(Error::validation("signal_type", format!("unknown signal type '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(Error::validation("risk_level", format!("unknown risk level '{other}'"))),
        }
    }
}

/// Immutable record of one emitted decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: String,
    pub strategy_id: String,
    pub stock_code: String,
    pub signal_type: SignalType,
    /// In [0, 1].
    pub confidence: f64,
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub expected_return: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    /// Snapshot of the parameters that produced this signal.
    pub parameters: StrategyParams,
}

// ─── Market data ──────────────────────────────────────────────────────────────

/// Slow-moving fundamentals used by the value and quality factors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fundamentals {
    /// Return on equity in percent.
    pub current_roe: Option<f64>,
    pub roe_history: Vec<f64>,
    /// Debt-to-assets in percent.
    pub debt_ratio: Option<f64>,
    /// Year-over-year profit growth as a fraction.
    pub profit_growth: Option<f64>,
    pub profit_history: Vec<f64>,
    pub pe_ratio: Option<f64>,
    /// Historical percentile of the PE ratio in [0, 1].
    pub pe_percentile: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub pb_percentile: Option<f64>,
    pub ps_ratio: Option<f64>,
    /// Dividend yield as a fraction.
    pub dividend_yield: Option<f64>,
}

/// Latest quote for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub code: String,
    pub price: f64,
    /// Daily change in percent.
    #[serde(default)]
    pub change_pct: Option<f64>,
    /// Turnover rate in percent.
    #[serde(default)]
    pub turnover_rate: Option<f64>,
    /// Net money flow in currency units.
    #[serde(default)]
    pub money_flow: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub fundamentals: Fundamentals,
    pub timestamp: DateTime<Utc>,
}

/// One daily bar. Histories are ordered oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub turnover: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sentiment_label: Option<SentimentLabel>,
    /// Pre-computed sentiment in [0, 1]; preferred over the label when present.
    #[serde(default)]
    pub sentiment_score: Option<f64>,
}

/// Everything the factor calculators may consult for one instrument.
/// Any subset may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSnapshot {
    pub change_pct: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub money_flow: Option<f64>,
    pub fundamentals: Fundamentals,
    pub history: Vec<PricePoint>,
}

impl MarketSnapshot {
    pub fn from_quote(quote: &Quote, history: Vec<PricePoint>) -> Self {
        Self {
            change_pct: quote.change_pct,
            turnover_rate: quote.turnover_rate,
            money_flow: quote.money_flow,
            fundamentals: quote.fundamentals.clone(),
            history,
        }
    }
}

// ─── Scoring ──────────────────────────────────────────────────────────────────

/// Composite weights for the four factors. Must be non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub momentum: f64,
    pub sentiment: f64,
    pub value: f64,
    pub quality: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            momentum: 0.30,
            sentiment: 0.25,
            value: 0.25,
            quality: 0.20,
        }
    }
}

impl FactorWeights {
    pub fn validate(&self) -> Result<()> {
        let parts = [
            ("momentum", self.momentum),
            ("sentiment", self.sentiment),
            ("value", self.value),
            ("quality", self.quality),
        ];
        for (name, w) in parts {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::validation(
                    format!("weights.{name}"),
                    "must be a non-negative number",
                ));
            }
        }
        let sum: f64 = parts.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::validation("weights", format!("must sum to 1, got {sum}")));
        }
        Ok(())
    }
}

/// Per-instrument, per-day factor breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub code: String,
    pub date: NaiveDate,
    /// Sub-scores in [0, 100]; `None` when the factor had no usable input.
    pub momentum: Option<f64>,
    pub sentiment: Option<f64>,
    pub value: Option<f64>,
    pub quality: Option<f64>,
    /// Weighted composite in [0, 100].
    pub total: f64,
    pub weights: FactorWeights,
    pub inputs: MarketSnapshot,
    pub news_count: usize,
}

// ─── Filters ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyFilter {
    pub status: Option<StrategyStatus>,
}

impl StrategyFilter {
    pub fn matches(&self, strategy: &Strategy) -> bool {
        self.status.map_or(true, |s| strategy.status == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalFilter {
    pub strategy_id: Option<String>,
}

impl SignalFilter {
    pub fn matches(&self, signal: &TradingSignal) -> bool {
        self.strategy_id
            .as_deref()
            .map_or(true, |id| signal.strategy_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mr_params() -> StrategyParams {
        StrategyParams::MeanReversion(MeanReversionParams {
            lookback_period: 20,
            buy_threshold: -0.08,
            sell_threshold: 0.02,
        })
    }

    #[test]
    fn params_round_trip_through_tagged_json() {
        let json = serde_json::to_value(mr_params()).unwrap();
        assert_eq!(json["strategy_type"], "mean_reversion");
        assert_eq!(json["parameters"]["lookback_period"], 20);
    }

    #[test]
    fn from_parts_names_missing_field() {
        let err = StrategyParams::from_parts(
            StrategyType::MeanReversion,
            &json!({"lookback_period": 20, "buy_threshold": -0.08}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "sell_threshold"));
    }

    #[test]
    fn from_parts_rejects_unknown_field() {
        let err = StrategyParams::from_parts(
            StrategyType::Momentum,
            &json!({
                "momentum_period": 10, "buy_threshold": 0.05, "sell_threshold": -0.03,
                "profit_target": 0.08, "max_hold_days": 20, "leverage": 3
            }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "leverage"));
    }

    #[test]
    fn from_parts_rejects_out_of_range_threshold() {
        let err = StrategyParams::from_parts(
            StrategyType::MeanReversion,
            &json!({"lookback_period": 20, "buy_threshold": 0.05, "sell_threshold": 0.02}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "buy_threshold"));
    }

    #[test]
    fn merge_overlays_only_provided_fields() {
        let mut patch = Map::new();
        patch.insert("lookback_period".into(), json!(10));
        let merged = mr_params().merge(&patch).unwrap();
        assert_eq!(
            merged,
            StrategyParams::MeanReversion(MeanReversionParams {
                lookback_period: 10,
                buy_threshold: -0.08,
                sell_threshold: 0.02,
            })
        );
    }

    #[test]
    fn merge_rejects_fields_of_another_type() {
        let mut patch = Map::new();
        patch.insert("profit_target".into(), json!(0.1));
        assert!(mr_params().merge(&patch).is_err());
    }

    #[test]
    fn stopped_is_terminal() {
        assert!(StrategyStatus::Active.transition_to(StrategyStatus::Paused).is_ok());
        assert!(StrategyStatus::Paused.transition_to(StrategyStatus::Active).is_ok());
        assert!(StrategyStatus::Paused.transition_to(StrategyStatus::Stopped).is_ok());
        assert!(StrategyStatus::Stopped.transition_to(StrategyStatus::Active).is_err());
        assert!(StrategyStatus::Stopped.transition_to(StrategyStatus::Paused).is_err());
    }

    #[test]
    fn universe_is_deduplicated_in_order() {
        let codes = vec!["600519".into(), " 000001 ".into(), "600519".into()];
        assert_eq!(normalize_universe(codes).unwrap(), vec!["600519", "000001"]);
        assert!(normalize_universe(vec![]).is_err());
        assert!(normalize_universe(vec!["  ".into()]).is_err());
    }

    #[test]
    fn new_strategy_requires_positive_rebalance() {
        let req = NewStrategy {
            name: "mr".into(),
            params: mr_params(),
            stock_universe: vec!["000001".into()],
            rebalance_frequency: 0,
        };
        let err = req.into_strategy("id".into(), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "rebalance_frequency"));
    }

    #[test]
    fn last_signal_time_never_moves_backwards() {
        let now = Utc::now();
        let mut s = NewStrategy {
            name: "mr".into(),
            params: mr_params(),
            stock_universe: vec!["000001".into()],
            rebalance_frequency: 10,
        }
        .into_strategy("id".into(), now)
        .unwrap();
        s.touch_last_signal(now);
        s.touch_last_signal(now - chrono::Duration::seconds(5));
        assert_eq!(s.last_signal_time, Some(now));
    }

    #[test]
    fn default_weights_sum_to_one() {
        FactorWeights::default().validate().unwrap();
        let bad = FactorWeights { momentum: 0.5, ..FactorWeights::default() };
        assert!(bad.validate().is_err());
    }
}
