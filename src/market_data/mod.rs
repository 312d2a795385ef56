//! Market-data providers.
//!
//! Defines the `MarketDataPort` trait and provides implementations for
//! CoinGecko and Binance, plus the failover `MarketDataGateway` that the
//! rest of the engine talks to.

pub mod binance;
pub mod coingecko;
pub mod gateway;
pub mod retry;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::types::{Coin, OhlcSample};

pub use gateway::MarketDataGateway;
pub use retry::RetryPolicy;

/// Abstraction over market-data sources.
///
/// Adapters return `Err` for failures; the gateway is responsible for
/// retrying, failing over and degrading to absent values.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Current USD price for a provider coin id. `None` if unknown.
    async fn get_price(&self, coin_id: &str) -> Result<Option<f64>>;

    /// Historical candles, oldest first.
    async fn get_historic_ohlc(
        &self,
        coin_id: &str,
        vs_currency: &str,
        days: u32,
        interval: &str,
    ) -> Result<Vec<OhlcSample>>;

    /// Top coins by market cap, each with one current price sample.
    async fn get_coins(&self) -> Result<Vec<Coin>>;

    /// Liquidity pool search. Returns the raw `{"data": [...]}` payload.
    async fn search_pools(&self, query: &str, chain: Option<&str>) -> Result<Value>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Build the failover gateway from `providers.market_data`.
///
/// The configured provider is tried first, the other one second.
pub fn build_gateway(config: &AppConfig) -> Result<MarketDataGateway> {
    let coingecko: Arc<dyn MarketDataPort> =
        Arc::new(coingecko::CoinGeckoClient::from_config(config)?);
    let binance: Arc<dyn MarketDataPort> = Arc::new(binance::BinanceClient::from_config(config)?);

    let providers = match config.providers.market_data.to_lowercase().as_str() {
        "coingecko" => vec![coingecko, binance],
        "binance" => vec![binance, coingecko],
        other => {
            warn!(provider = other, "Unknown market data provider, defaulting to CoinGecko");
            vec![coingecko, binance]
        }
    };

    let order: Vec<&str> = providers.iter().map(|p| p.name()).collect();
    info!(providers = ?order, "Market data gateway ready");

    Ok(MarketDataGateway::new(
        providers,
        RetryPolicy::from_config(&config.api),
    ))
}
