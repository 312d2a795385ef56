//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime. If an optimised-parameters file exists, its keys
//! override the `[trade]` section.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::types::BotError;

/// Top-level application configuration. Built once at startup and shared
/// by `Arc` with every component.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub trade: TradeConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub coingecko: CoinGeckoConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Seconds to sleep between trading cycles. `--interval` overrides it.
    #[serde(default = "default_interval")]
    pub cycle_interval_secs: u64,
    /// Seconds between coin refreshes while the engine loops.
    #[serde(default = "default_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_interval(),
            refresh_interval_secs: default_interval(),
        }
    }
}

fn default_interval() -> u64 {
    3600
}

/// Trade thresholds. Aliases accept the key names written by the
/// parameter-search tool.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TradeConfig {
    #[serde(alias = "take_profit")]
    pub take_profit_pct: f64,
    #[serde(alias = "stop_loss")]
    pub stop_loss_pct: f64,
    #[serde(alias = "order_amount")]
    pub order_quantity: f64,
    pub price_change_threshold: f64,
    #[serde(default = "default_params_file")]
    pub optimized_params_file: Option<String>,
}

fn default_params_file() -> Option<String> {
    Some("best_params.json".to_string())
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PoolConfig {
    pub min_volume_24h: f64,
    pub min_reserves_usd: f64,
    pub min_buys_24h: f64,
}

/// Upper bound on `api.max_retries`.
const MAX_RETRY_ATTEMPTS: u32 = 10;
/// Upper bound on backoff multiplier and delays, in seconds.
const MAX_BACKOFF_SECS: f64 = 3600.0;

/// Resilience parameters for outbound API calls.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ApiConfig {
    pub max_retries: u32,
    pub retry_backoff_multiplier: f64,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_multiplier: 1.0,
            min_delay_secs: 1.0,
            max_delay_secs: 10.0,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    /// Primary market-data provider: "coingecko" or "binance".
    pub market_data: String,
    /// Storage backend: "json", "sqlite" or "memory".
    pub storage: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            market_data: "coingecko".to_string(),
            storage: "json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoinGeckoConfig {
    pub api_root: String,
    pub api_key_env: Option<String>,
    pub coins_per_page: u32,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            api_root: "https://api.coingecko.com/api/v3".to_string(),
            api_key_env: Some("CG_API_KEY".to_string()),
            coins_per_page: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BinanceConfig {
    pub api_root: String,
    /// Quote asset appended to coin symbols, e.g. BTC + USDT.
    pub quote_asset: String,
    /// How many pairs `get_coins` returns, ranked by quote volume.
    pub max_coins: usize,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_root: "https://api.binance.com".to_string(),
            quote_asset: "USDT".to_string(),
            max_coins: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_url: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Path to the instruction template. Missing file → built-in prompt.
    #[serde(default)]
    pub prompt_template_file: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 512,
            prompt_template_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub coins_file: String,
    pub orders_file: String,
    pub portfolio_file: String,
    pub sqlite_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            coins_file: "data/coins.json".to_string(),
            orders_file: "data/orders.json".to_string(),
            portfolio_file: "data/portfolio.json".to_string(),
            sqlite_url: "sqlite://data/coinpilot.db".to_string(),
        }
    }
}

/// `{module, class, version}` triple naming a plugin implementation.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub module: String,
    pub class: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl PluginSpec {
    pub fn new(module: &str, class: &str, version: Option<&str>) -> Self {
        Self {
            module: module.to_string(),
            class: class.to_string(),
            version: version.map(String::from),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PluginsConfig {
    pub engine: PluginSpec,
    pub evaluator: PluginSpec,
    pub strategy: PluginSpec,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            engine: PluginSpec::new("engine", "Engine", None),
            evaluator: PluginSpec::new("evaluator", "Evaluator", Some("v1")),
            strategy: PluginSpec::new("strategy", "Strategy", Some("v1")),
        }
    }
}

/// Partial plugin selection for shadow mode. Unset fields inherit the
/// production value.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PluginOverride {
    pub module: Option<String>,
    pub class: Option<String>,
    pub version: Option<String>,
}

impl PluginOverride {
    pub fn apply(&self, production: &PluginSpec) -> PluginSpec {
        PluginSpec {
            module: self.module.clone().unwrap_or_else(|| production.module.clone()),
            class: self.class.clone().unwrap_or_else(|| production.class.clone()),
            version: self.version.clone().or_else(|| production.version.clone()),
        }
    }
}

/// Where shadow evaluations write their orders and positions.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShadowStorage {
    /// Same backend as production.
    #[default]
    Shared,
    /// Private in-memory ledger; coin data is still read from production.
    Isolated,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShadowConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub evaluator: PluginOverride,
    #[serde(default)]
    pub strategy: PluginOverride,
    #[serde(default)]
    pub storage: ShadowStorage,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            evaluator: PluginOverride::default(),
            strategy: PluginOverride::default(),
            storage: ShadowStorage::default(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_max_in_flight() -> usize {
    32
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply optimised trade
    /// parameters if the configured file exists.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;

        if let Some(params) = config.trade.optimized_params_file.clone() {
            if Path::new(&params).exists() {
                config.apply_optimized_params(&params)?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay the keys of a JSON object onto `[trade]`.
    pub fn apply_optimized_params(&mut self, path: &str) -> Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read optimised parameters: {path}"))?;
        let overrides: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse optimised parameters: {path}"))?;
        let serde_json::Value::Object(overrides) = overrides else {
            anyhow::bail!(BotError::Config(format!("{path} must contain a JSON object")));
        };

        let mut merged = serde_json::to_value(&self.trade)?;
        if let serde_json::Value::Object(ref mut fields) = merged {
            for (key, value) in overrides {
                let key = match key.as_str() {
                    "take_profit" => "take_profit_pct".to_string(),
                    "stop_loss" => "stop_loss_pct".to_string(),
                    "order_amount" => "order_quantity".to_string(),
                    _ => key,
                };
                if fields.contains_key(&key) {
                    fields.insert(key, value);
                }
            }
        }
        self.trade = serde_json::from_value(merged)
            .with_context(|| format!("Invalid optimised parameters in {path}"))?;

        info!(path, trade = ?self.trade, "Applied optimised trade parameters");
        Ok(())
    }

    /// Reject configurations that would violate order invariants.
    pub fn validate(&self) -> Result<()> {
        if self.trade.order_quantity <= 0.0 {
            anyhow::bail!(BotError::Config(format!(
                "trade.order_quantity must be > 0 (got {})",
                self.trade.order_quantity
            )));
        }
        if self.api.max_retries == 0 {
            anyhow::bail!(BotError::Config("api.max_retries must be >= 1".into()));
        }
        if self.api.max_retries > MAX_RETRY_ATTEMPTS {
            anyhow::bail!(BotError::Config(format!(
                "api.max_retries must be <= {MAX_RETRY_ATTEMPTS} (got {})",
                self.api.max_retries
            )));
        }
        let backoff = [
            ("api.retry_backoff_multiplier", self.api.retry_backoff_multiplier),
            ("api.min_delay_secs", self.api.min_delay_secs),
            ("api.max_delay_secs", self.api.max_delay_secs),
        ];
        for (key, value) in backoff {
            if !value.is_finite() || !(0.0..=MAX_BACKOFF_SECS).contains(&value) {
                anyhow::bail!(BotError::Config(format!(
                    "{key} must be between 0 and {MAX_BACKOFF_SECS} (got {value})"
                )));
            }
        }
        if self.api.min_delay_secs > self.api.max_delay_secs {
            anyhow::bail!(BotError::Config(format!(
                "api.min_delay_secs ({}) exceeds api.max_delay_secs ({})",
                self.api.min_delay_secs, self.api.max_delay_secs
            )));
        }
        if self.trade.stop_loss_pct <= 0.0 || self.trade.take_profit_pct <= 0.0 {
            warn!(
                stop_loss = self.trade.stop_loss_pct,
                take_profit = self.trade.take_profit_pct,
                "Non-positive exit thresholds; stop-loss will take priority when both trigger"
            );
        }
        Ok(())
    }

    /// Resolve an optional secret; unset or empty variables yield `None`.
    pub fn resolve_secret(env_name: Option<&str>) -> Option<SecretString> {
        env_name
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
            .map(SecretString::new)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig::from_toml_str(
        r#"
        [trade]
        take_profit_pct = 20.0
        stop_loss_pct = 10.0
        order_quantity = 1.0
        price_change_threshold = 3.0

        [pool]
        min_volume_24h = 1000.0
        min_reserves_usd = 10000.0
        min_buys_24h = 10.0

        [api]
        max_retries = 3
        retry_backoff_multiplier = 0.0
        min_delay_secs = 0.0
        max_delay_secs = 0.0
        request_timeout_secs = 5
        "#,
    )
    .unwrap()
}
