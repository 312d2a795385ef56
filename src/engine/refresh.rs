//! Keeps the stored coin universe current.
//!
//! `initialize` seeds an empty store with the provider's top coins and a
//! day of hourly candles; `refresh` appends the latest sample and price
//! change for known coins and seeds coins that entered the top list.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::market_data::MarketDataPort;
use crate::storage::DataStorage;
use crate::types::Coin;

/// Outcome of one refresh pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub fetched: usize,
    pub added: usize,
    pub updated: usize,
}

pub struct CoinRefresher {
    storage: Arc<dyn DataStorage>,
    market_data: Arc<dyn MarketDataPort>,
}

impl CoinRefresher {
    pub fn new(storage: Arc<dyn DataStorage>, market_data: Arc<dyn MarketDataPort>) -> Self {
        Self {
            storage,
            market_data,
        }
    }

    /// Populate an empty store. Returns the number of coins added; a
    /// non-empty store is left alone.
    pub async fn initialize(&self) -> Result<usize> {
        if !self.storage.get_all_coins().await?.is_empty() {
            info!("Coin store already initialised; skipping");
            return Ok(0);
        }

        let coins = self.market_data.get_coins().await?;
        info!(provider = self.market_data.name(), count = coins.len(), "Seeding coin store");

        let mut added = 0;
        for coin in &coins {
            if self.add_with_history(coin).await? {
                added += 1;
            }
        }
        info!(added, "Coin store initialised");
        Ok(added)
    }

    /// Sync stored coins with the provider's current top list.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let local = self.storage.get_all_coins().await?;
        if local.is_empty() {
            warn!("No coins in the store; run with --init-db first");
            return Ok(RefreshReport::default());
        }
        let known: HashSet<String> = local.into_iter().map(|c| c.coin_id).collect();

        let latest = self.market_data.get_coins().await?;
        let mut report = RefreshReport {
            fetched: latest.len(),
            ..Default::default()
        };

        for coin in &latest {
            if !known.contains(&coin.coin_id) {
                info!(symbol = %coin.symbol, "New coin in top list; fetching history");
                if self.add_with_history(coin).await? {
                    report.added += 1;
                }
                continue;
            }

            if !coin.prices.is_empty() {
                self.storage.append_prices(&coin.symbol, &coin.prices).await?;
            }
            self.storage
                .update_price_change(&coin.symbol, coin.price_change)
                .await?;
            report.updated += 1;
        }

        info!(
            fetched = report.fetched,
            added = report.added,
            updated = report.updated,
            "Coin prices refreshed"
        );
        Ok(report)
    }

    /// Store `coin` with a day of hourly candles followed by its listing
    /// sample. The coin is added bare so the older history is not rejected
    /// as out of order.
    async fn add_with_history(&self, coin: &Coin) -> Result<bool> {
        let bare = Coin {
            prices: Vec::new(),
            ..coin.clone()
        };
        let Some(_) = self.storage.add_coin(&bare).await? else {
            debug!(symbol = %coin.symbol, "Coin already stored");
            return Ok(false);
        };
        let mut samples = self
            .market_data
            .get_historic_ohlc(&coin.coin_id, "usd", 1, "hourly")
            .await?;
        let history = samples.len();
        samples.extend(coin.prices.iter().cloned());
        if !samples.is_empty() {
            self.storage.append_prices(&coin.symbol, &samples).await?;
        }
        debug!(symbol = %coin.symbol, history, "Added coin");
        Ok(true)
    }

    /// Refresh every `every`, starting one period from now.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    error!(error = %e, "Coin refresh failed");
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::testing::{daily_history, StaticMarket};
    use crate::types::OhlcSample;
    use chrono::{TimeZone, Utc};

    fn listed(coin_id: &str, symbol: &str, change: f64, price: f64) -> Coin {
        let mut coin = Coin::new(coin_id, symbol);
        coin.price_change = change;
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        coin.prices = vec![OhlcSample::flat(at, price)];
        coin
    }

    fn hourly_history(end: chrono::DateTime<Utc>, hours: i64) -> Vec<OhlcSample> {
        (0..hours)
            .map(|i| OhlcSample::flat(end - chrono::Duration::hours(hours - i), 90.0 + i as f64))
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_seeds_empty_store() {
        let listed_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let market = StaticMarket::new(None)
            .with_coins(vec![listed("bitcoin", "BTC", 1.0, 100.0), listed("ethereum", "ETH", 2.0, 10.0)])
            .with_history(hourly_history(listed_at, 24));
        let refresher = CoinRefresher::new(storage.clone(), Arc::new(market));

        assert_eq!(refresher.initialize().await.unwrap(), 2);

        let btc = storage.get_coin_by_symbol("BTC").await.unwrap().unwrap();
        assert_eq!(btc.prices.len(), 25);
        assert_eq!(btc.prices[0].timestamp, listed_at - chrono::Duration::hours(24));
        assert_eq!(btc.last_close(), Some(100.0));
        assert!(btc.prices.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(btc.price_change, 1.0);
    }

    #[tokio::test]
    async fn test_new_coin_on_refresh_keeps_history() {
        let listed_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let storage = Arc::new(MemoryStorage::with_coins(vec![Coin::new("bitcoin", "BTC")]));
        let market = StaticMarket::new(None)
            .with_coins(vec![listed("solana", "SOL", 9.0, 20.0)])
            .with_history(hourly_history(listed_at, 24));
        let refresher = CoinRefresher::new(storage.clone(), Arc::new(market));

        assert_eq!(refresher.refresh().await.unwrap().added, 1);
        let sol = storage.get_coin_by_symbol("SOL").await.unwrap().unwrap();
        assert_eq!(sol.prices.len(), 25);
        assert_eq!(sol.last_close(), Some(20.0));
    }

    #[tokio::test]
    async fn test_initialize_skips_populated_store() {
        let storage = Arc::new(MemoryStorage::with_coins(vec![Coin::new("bitcoin", "BTC")]));
        let market = StaticMarket::new(None).with_coins(vec![listed("ethereum", "ETH", 2.0, 10.0)]);
        let refresher = CoinRefresher::new(storage.clone(), Arc::new(market));

        assert_eq!(refresher.initialize().await.unwrap(), 0);
        assert_eq!(storage.get_all_coins().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_updates_known_and_adds_new() {
        let storage = Arc::new(MemoryStorage::with_coins(vec![Coin::new("bitcoin", "BTC")]));
        let market = StaticMarket::new(None).with_coins(vec![
            listed("bitcoin", "BTC", 4.5, 101.0),
            listed("solana", "SOL", 9.0, 20.0),
        ]);
        let refresher = CoinRefresher::new(storage.clone(), Arc::new(market));

        let report = refresher.refresh().await.unwrap();
        assert_eq!(
            report,
            RefreshReport {
                fetched: 2,
                added: 1,
                updated: 1
            }
        );

        let btc = storage.get_coin_by_symbol("BTC").await.unwrap().unwrap();
        assert_eq!(btc.price_change, 4.5);
        assert_eq!(btc.last_close(), Some(101.0));
        assert!(storage.get_coin_by_symbol("SOL").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_on_empty_store_is_noop() {
        let storage = Arc::new(MemoryStorage::new());
        let market = StaticMarket::new(None).with_coins(vec![listed("bitcoin", "BTC", 4.5, 101.0)]);
        let refresher = CoinRefresher::new(storage.clone(), Arc::new(market));

        assert_eq!(refresher.refresh().await.unwrap(), RefreshReport::default());
        assert!(storage.get_all_coins().await.unwrap().is_empty());
    }
}
