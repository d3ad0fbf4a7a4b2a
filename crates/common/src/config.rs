use std::time::Duration;

use crate::FactorWeights;

/// All configuration loaded from environment variables at startup.
/// Missing required variables or malformed values cause an immediate panic
/// with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // API
    pub api_token: String,
    pub api_port: u16,

    // Storage. `None` runs against the in-memory gateway.
    pub database_url: Option<String>,

    // Market data
    pub market_snapshot_path: Option<String>,
    pub market_timeout: Duration,
    pub max_concurrent_fetches: usize,

    // Engine
    pub persistence_timeout: Duration,
    pub signal_cache_capacity: usize,
    /// `None` disables scheduled generation.
    pub generation_interval: Option<Duration>,

    // Strategy presets file path
    pub presets_path: Option<String>,

    // Scoring
    pub factor_weights: FactorWeights,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let defaults = FactorWeights::default();
        let factor_weights = FactorWeights {
            momentum: parsed_env("MOMENTUM_WEIGHT", defaults.momentum),
            sentiment: parsed_env("SENTIMENT_WEIGHT", defaults.sentiment),
            value: parsed_env("VALUE_WEIGHT", defaults.value),
            quality: parsed_env("QUALITY_WEIGHT", defaults.quality),
        };
        if let Err(e) = factor_weights.validate() {
            panic!("ERROR: factor weights are invalid: {e}");
        }

        let max_concurrent_fetches: usize = parsed_env("MAX_CONCURRENT_FETCHES", 8);
        if max_concurrent_fetches == 0 {
            panic!("ERROR: MAX_CONCURRENT_FETCHES must be > 0");
        }
        let signal_cache_capacity: usize = parsed_env("SIGNAL_CACHE_CAPACITY", 10_000);
        if signal_cache_capacity == 0 {
            panic!("ERROR: SIGNAL_CACHE_CAPACITY must be > 0");
        }

        let generation_interval = match parsed_env::<u64>("GENERATION_INTERVAL_SECS", 0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Config {
            api_token: required_env("API_TOKEN"),
            api_port: parsed_env("API_PORT", 8080),
            database_url: optional_env("DATABASE_URL"),
            market_snapshot_path: optional_env("MARKET_SNAPSHOT_PATH"),
            market_timeout: Duration::from_millis(parsed_env("MARKET_TIMEOUT_MS", 5000)),
            max_concurrent_fetches,
            persistence_timeout: Duration::from_millis(parsed_env("PERSISTENCE_TIMEOUT_MS", 2000)),
            signal_cache_capacity,
            generation_interval,
            presets_path: optional_env("PRESETS_PATH"),
            factor_weights,
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match optional_env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            panic!("ERROR: environment variable '{key}' has an invalid value: '{raw}'")
        }),
        None => default,
    }
}
