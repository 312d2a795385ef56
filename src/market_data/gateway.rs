//! Priority-ordered failover across market-data providers.
//!
//! For every capability the providers are tried in order. Each call is
//! wrapped in the retry policy; errors are logged and the next provider is
//! tried. The first non-empty result wins. When nothing usable comes back
//! the absent value is returned (`None`, empty list, `Value::Null`), so the
//! gateway itself never fails.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{MarketDataPort, RetryPolicy};
use crate::types::{Coin, OhlcSample};

pub struct MarketDataGateway {
    providers: Vec<Arc<dyn MarketDataPort>>,
    retry: RetryPolicy,
}

impl MarketDataGateway {
    pub fn new(providers: Vec<Arc<dyn MarketDataPort>>, retry: RetryPolicy) -> Self {
        Self { providers, retry }
    }

    /// Try each provider until `usable` accepts a result.
    async fn first_usable<T, F, Fut>(
        &self,
        capability: &str,
        call: F,
        usable: impl Fn(&T) -> bool,
    ) -> Option<T>
    where
        F: Fn(Arc<dyn MarketDataPort>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for provider in &self.providers {
            let label = format!("{}.{capability}", provider.name());
            match self.retry.run(&label, || call(Arc::clone(provider))).await {
                Ok(value) if usable(&value) => return Some(value),
                Ok(_) => {
                    debug!(provider = provider.name(), capability, "Empty result, trying next provider");
                }
                Err(e) => {
                    warn!(provider = provider.name(), capability, error = %e, "Provider failed");
                }
            }
        }
        None
    }
}

#[async_trait]
impl MarketDataPort for MarketDataGateway {
    async fn get_price(&self, coin_id: &str) -> Result<Option<f64>> {
        let price = self
            .first_usable(
                "get_price",
                |p| async move { p.get_price(coin_id).await },
                |v: &Option<f64>| v.is_some(),
            )
            .await;
        Ok(price.flatten())
    }

    async fn get_historic_ohlc(
        &self,
        coin_id: &str,
        vs_currency: &str,
        days: u32,
        interval: &str,
    ) -> Result<Vec<OhlcSample>> {
        let candles = self
            .first_usable(
                "get_historic_ohlc",
                |p| async move { p.get_historic_ohlc(coin_id, vs_currency, days, interval).await },
                |v: &Vec<OhlcSample>| !v.is_empty(),
            )
            .await;
        Ok(candles.unwrap_or_default())
    }

    async fn get_coins(&self) -> Result<Vec<Coin>> {
        let coins = self
            .first_usable(
                "get_coins",
                |p| async move { p.get_coins().await },
                |v: &Vec<Coin>| !v.is_empty(),
            )
            .await;
        Ok(coins.unwrap_or_default())
    }

    async fn search_pools(&self, query: &str, chain: Option<&str>) -> Result<Value> {
        let payload = self
            .first_usable(
                "search_pools",
                |p| async move { p.search_pools(query, chain).await },
                |v: &Value| !v.is_null(),
            )
            .await;
        Ok(payload.unwrap_or(Value::Null))
    }

    fn name(&self) -> &str {
        "gateway"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
