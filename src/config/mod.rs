//! Configuration for the signal/review/position pipeline.
//!
//! One YAML file (default `config.yaml`, overridable via `CONFIG_PATH`) loaded through the
//! `config` crate, layered with `PERPCORE__SECTION__FIELD`-style environment overrides for
//! secrets (API keys, LLM keys, Telegram token) so they never need to live in the checked-in
//! file. Generalizes the teacher's per-broker `*Config::from_env()` structs into one
//! `TradingConfig` tree with the same default-filling idiom.

mod llm_config;
mod okx_config;
mod risk_config;

pub use llm_config::{ClaudeConfig, DeepSeekConfig, LlmConfig};
pub use okx_config::OkxConfig;
pub use risk_config::{CapitalConfig, EntryConfig, ExitConfig, RiskConfig, SafetyConfig};

use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: Vec<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self { bot_token: String::new(), chat_id: Vec::new() }
    }
}

/// Mirrors `application::coordinator::CoordinatorConfig` field-for-field so the loaded
/// section can be handed straight to `Coordinator::new` via `.into()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSectionConfig {
    pub cycle_interval_sec: u64,
    pub universe_timeframe: String,
    pub candle_limit: usize,
    pub min_candles: usize,
    pub watcher_recheck_sec: i64,
    pub sl_verification_sec: i64,
}

impl Default for CoordinatorSectionConfig {
    fn default() -> Self {
        Self {
            cycle_interval_sec: 60,
            universe_timeframe: "5m".to_string(),
            candle_limit: 200,
            min_candles: 50,
            watcher_recheck_sec: 60,
            sl_verification_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub signals_db_url: String,
    pub watch_db_url: String,
    pub high_vol_db_url: String,
    pub training_db_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            signals_db_url: "sqlite://data/signals.db".to_string(),
            watch_db_url: "sqlite://data/watch_signals.db".to_string(),
            high_vol_db_url: "sqlite://data/high_vol_track.db".to_string(),
            training_db_url: "sqlite://data/xgboost_training.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityEnvConfig {
    pub metrics_report_interval_sec: u64,
    pub review_interval_sec: i64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self { metrics_report_interval_sec: 60, review_interval_sec: 300 }
    }
}

/// Root configuration tree. Every section has a usable default, matching `auto_trader.py`'s
/// `config.get(section, {}).get(field, default)` fallback chain one level up: a whole
/// section missing from the YAML file behaves the same as every field within it missing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TradingConfig {
    pub okx: OkxConfig,
    pub capital: CapitalConfig,
    pub risk: RiskConfig,
    pub entry: EntryConfig,
    pub exit: ExitConfig,
    pub safety: SafetyConfig,
    pub llm: LlmConfig,
    pub telegram: TelegramConfig,
    pub coordinator: CoordinatorSectionConfig,
    pub database: DatabaseConfig,
    pub observability: ObservabilityEnvConfig,
}

impl TradingConfig {
    /// Loads `path` (defaulting to `config.yaml`, or `$CONFIG_PATH` if set), then applies
    /// `PERPCORE__SECTION__FIELD` environment overrides on top. The YAML file is optional --
    /// a fresh checkout with only environment variables set still starts, every section
    /// falling back to its defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("CONFIG_PATH").ok())
            .unwrap_or_else(|| "config.yaml".to_string());

        let loader = ConfigLoader::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix("PERPCORE").separator("__"))
            .build()
            .context("failed to build configuration")?;

        loader.try_deserialize().context("failed to deserialize TradingConfig")
    }
}

impl From<CoordinatorSectionConfig> for crate::application::coordinator::CoordinatorConfig {
    fn from(section: CoordinatorSectionConfig) -> Self {
        Self {
            cycle_interval_sec: section.cycle_interval_sec,
            universe_timeframe: section.universe_timeframe,
            candle_limit: section.candle_limit,
            min_candles: section.min_candles,
            watcher_recheck_sec: section.watcher_recheck_sec,
            sl_verification_sec: section.sl_verification_sec,
            // Track-1 sizing fields come from the `[capital]`/`[risk]` sections instead, set
            // by the caller after this conversion -- defaults here just keep the struct total.
            ..crate::application::coordinator::CoordinatorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_when_no_file_and_no_env() {
        let config = TradingConfig::load(Some("does-not-exist.yaml")).expect("defaults should load");
        assert_eq!(config.capital.total_usdt, 50.0);
        assert_eq!(config.risk.max_positions, 3);
        assert_eq!(config.coordinator.cycle_interval_sec, 60);
    }

    #[test]
    fn coordinator_section_converts_into_coordinator_config() {
        let section = CoordinatorSectionConfig::default();
        let coordinator_config: crate::application::coordinator::CoordinatorConfig = section.into();
        assert_eq!(coordinator_config.candle_limit, 200);
    }
}
