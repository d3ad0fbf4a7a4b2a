use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{
    MeanReversionParams, MomentumParams, NewStrategy, Result, StrategyParams, StrategyType,
};

/// Instruments used when a preset does not name its own pool.
pub const DEFAULT_STOCK_POOL: [&str; 5] = ["000001", "000002", "600036", "600519", "000858"];
pub const DEFAULT_REBALANCE_FREQUENCY: u32 = 10;

/// A named, ready-to-use strategy template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    pub key: String,
    pub name: String,
    pub params: StrategyParams,
    pub stock_pool: Vec<String>,
    pub rebalance_frequency: u32,
    /// Free-form label such as "low" or "medium-high".
    pub risk_profile: String,
    pub description: String,
}

impl Preset {
    pub fn to_new_strategy(&self, name: Option<String>) -> NewStrategy {
        NewStrategy {
            name: name.unwrap_or_else(|| self.name.clone()),
            params: self.params.clone(),
            stock_universe: self.stock_pool.clone(),
            rebalance_frequency: self.rebalance_frequency,
        }
    }
}

/// Optional presets file (TOML).
///
/// Example `config/presets.toml`:
/// ```toml
/// [[preset]]
/// key = "bank_reversion"
/// name = "Bank mean reversion"
/// strategy_type = "mean_reversion"
/// stock_pool = ["600036", "000001"]
///
/// [preset.parameters]
/// lookback_period = 15
/// buy_threshold = -0.06
/// sell_threshold = 0.03
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresetFileConfig {
    #[serde(rename = "preset", default)]
    pub presets: Vec<PresetConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresetConfig {
    pub key: String,
    pub name: String,
    pub strategy_type: StrategyType,
    pub parameters: toml::Table,
    #[serde(default)]
    pub stock_pool: Option<Vec<String>>,
    #[serde(default)]
    pub rebalance_frequency: Option<u32>,
    #[serde(default)]
    pub risk_profile: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PresetConfig {
    fn into_preset(self) -> Result<Preset> {
        let parameters = serde_json::to_value(&self.parameters)?;
        let params = StrategyParams::from_parts(self.strategy_type, &parameters)?;
        Ok(Preset {
            key: self.key,
            name: self.name,
            params,
            stock_pool: self.stock_pool.unwrap_or_else(default_pool),
            rebalance_frequency: self
                .rebalance_frequency
                .unwrap_or(DEFAULT_REBALANCE_FREQUENCY),
            risk_profile: self.risk_profile.unwrap_or_else(|| "medium".into()),
            description: self.description.unwrap_or_default(),
        })
    }
}

/// Built-in presets, optionally extended or overridden from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetBook {
    presets: BTreeMap<String, Preset>,
}

impl Default for PresetBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetBook {
    pub fn builtin() -> Self {
        let presets = builtin_presets()
            .into_iter()
            .map(|p| (p.key.clone(), p))
            .collect();
        Self { presets }
    }

    /// Built-ins overlaid with the presets in `path`. Entries with an existing
    /// key replace the built-in.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut book = Self::builtin();
        book.merge_toml(&content)?;
        info!(path, presets = book.presets.len(), "Loaded strategy presets");
        Ok(book)
    }

    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let file: PresetFileConfig = toml::from_str(content)
            .map_err(|e| common::Error::Config(format!("invalid presets file: {e}")))?;
        for cfg in file.presets {
            let preset = cfg.into_preset()?;
            self.presets.insert(preset.key.clone(), preset);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Preset> {
        self.presets.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }
}

fn default_pool() -> Vec<String> {
    DEFAULT_STOCK_POOL.iter().map(|s| s.to_string()).collect()
}

// ─── Built-in presets ─────────────────────────────────────────────────────────

fn mean_reversion(lookback_period: usize, buy_threshold: f64, sell_threshold: f64) -> StrategyParams {
    StrategyParams::MeanReversion(MeanReversionParams {
        lookback_period,
        buy_threshold,
        sell_threshold,
    })
}

fn momentum(
    momentum_period: usize,
    buy_threshold: f64,
    sell_threshold: f64,
    profit_target: f64,
    max_hold_days: u32,
) -> StrategyParams {
    StrategyParams::Momentum(MomentumParams {
        momentum_period,
        buy_threshold,
        sell_threshold,
        profit_target,
        max_hold_days,
    })
}

fn builtin_presets() -> Vec<Preset> {
    let preset = |key: &str, name: &str, params, risk: &str, description: &str| Preset {
        key: key.into(),
        name: name.into(),
        params,
        stock_pool: default_pool(),
        rebalance_frequency: DEFAULT_REBALANCE_FREQUENCY,
        risk_profile: risk.into(),
        description: description.into(),
    };
    vec![
        preset(
            "conservative",
            "Conservative mean reversion",
            mean_reversion(20, -0.10, 0.02),
            "low",
            "Waits for deeper dips; steadier returns at lower risk",
        ),
        preset(
            "balanced",
            "Balanced mean reversion",
            mean_reversion(20, -0.08, 0.02),
            "medium",
            "Best parameters from the 2022-2023 optimization run",
        ),
        preset(
            "aggressive",
            "Aggressive mean reversion",
            mean_reversion(15, -0.05, 0.03),
            "high",
            "Shorter lookback and shallower entries for higher turnover",
        ),
        preset(
            "momentum_conservative",
            "Conservative momentum",
            momentum(15, 0.08, -0.05, 0.06, 25),
            "medium",
            "High entry bar with a modest profit target",
        ),
        preset(
            "momentum_balanced",
            "Balanced momentum",
            momentum(10, 0.05, -0.03, 0.08, 20),
            "medium-high",
            "Balances trend capture against reversal risk",
        ),
        preset(
            "momentum_aggressive",
            "Aggressive momentum",
            momentum(5, 0.03, -0.02, 0.12, 15),
            "high",
            "Short-term trend chasing with a wide profit target",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_presets_are_valid() {
        let book = PresetBook::builtin();
        assert_eq!(book.iter().count(), 6);
        for preset in book.iter() {
            preset.params.validate().unwrap();
            assert_eq!(preset.stock_pool.len(), 5);
        }
        assert_eq!(
            book.get("balanced").unwrap().params,
            mean_reversion(20, -0.08, 0.02)
        );
    }

    #[test]
    fn file_presets_extend_and_override() {
        let mut book = PresetBook::builtin();
        book.merge_toml(
            r#"
            [[preset]]
            key = "balanced"
            name = "Tuned balanced"
            strategy_type = "mean_reversion"
            [preset.parameters]
            lookback_period = 10
            buy_threshold = -0.05
            sell_threshold = 0.03

            [[preset]]
            key = "banks"
            name = "Bank momentum"
            strategy_type = "momentum"
            stock_pool = ["600036"]
            rebalance_frequency = 5
            [preset.parameters]
            momentum_period = 10
            buy_threshold = 0.05
            sell_threshold = -0.03
            profit_target = 0.08
            max_hold_days = 20
            "#,
        )
        .unwrap();

        assert_eq!(book.get("balanced").unwrap().name, "Tuned balanced");
        let banks = book.get("banks").unwrap();
        assert_eq!(banks.stock_pool, vec!["600036"]);
        assert_eq!(banks.rebalance_frequency, 5);
        assert_eq!(book.iter().count(), 7);
    }

    #[test]
    fn invalid_file_preset_names_the_field() {
        let mut book = PresetBook::builtin();
        let err = book
            .merge_toml(
                r#"
                [[preset]]
                key = "bad"
                name = "Bad"
                strategy_type = "mean_reversion"
                [preset.parameters]
                lookback_period = 1
                buy_threshold = -0.05
                sell_threshold = 0.03
                "#,
            )
            .unwrap_err();
        assert!(matches!(err, common::Error::Validation { ref field, .. } if field == "lookback_period"));
    }

    #[test]
    fn preset_builds_named_strategy() {
        let book = PresetBook::builtin();
        let req = book.get("aggressive").unwrap().to_new_strategy(Some("mine".into()));
        assert_eq!(req.name, "mine");
        assert_eq!(req.rebalance_frequency, 10);
    }
}
