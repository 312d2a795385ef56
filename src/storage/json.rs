//! JSON file storage.
//!
//! Three files: coins, orders and portfolio, each holding a JSON array.
//! Every operation reads the file, applies the change and rewrites it via a
//! temp file + rename, under a per-file async mutex.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    add_coin_to, append_pnl_in, filter_orders, insert_position_into, merge_samples,
    update_position_in, validate_order, DataStorage,
};
use crate::types::{Coin, Direction, OhlcSample, Order, PnlEntry, Position};

// ---------------------------------------------------------------------------
// JSON file table
// ---------------------------------------------------------------------------

/// One JSON array file guarded by a mutex.
struct JsonTable<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _records: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonTable<T> {
    fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            lock: Mutex::new(()),
            _records: std::marker::PhantomData,
        }
    }

    /// Missing file reads as an empty table.
    async fn load(path: &Path) -> Result<Vec<T>> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    async fn save(path: &Path, records: &[T]) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(records).context("Failed to serialise records")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!(path = %path.display(), records = records.len(), "Saved");
        Ok(())
    }

    async fn read(&self) -> Result<Vec<T>> {
        let _guard = self.lock.lock().await;
        Self::load(&self.path).await
    }

    /// Apply `f` and persist the result. The file is rewritten even when
    /// `f` made no change.
    async fn modify<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Result<R> {
        let _guard = self.lock.lock().await;
        let mut records = Self::load(&self.path).await?;
        let out = f(&mut records);
        Self::save(&self.path, &records).await?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

pub struct JsonStorage {
    coins: JsonTable<Coin>,
    orders: JsonTable<Order>,
    portfolio: JsonTable<Position>,
}

impl JsonStorage {
    pub fn new(coins_file: &str, orders_file: &str, portfolio_file: &str) -> Self {
        info!(coins_file, orders_file, portfolio_file, "Using JSON storage");
        Self {
            coins: JsonTable::new(coins_file),
            orders: JsonTable::new(orders_file),
            portfolio: JsonTable::new(portfolio_file),
        }
    }
}

#[async_trait]
impl DataStorage for JsonStorage {
    async fn get_all_coins(&self) -> Result<Vec<Coin>> {
        self.coins.read().await
    }

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>> {
        Ok(self
            .coins
            .read()
            .await?
            .into_iter()
            .find(|c| c.symbol == symbol))
    }

    async fn add_coin(&self, coin: &Coin) -> Result<Option<Coin>> {
        self.coins.modify(|coins| add_coin_to(coins, coin)).await
    }

    async fn append_prices(&self, symbol: &str, samples: &[OhlcSample]) -> Result<Option<usize>> {
        self.coins
            .modify(|coins| {
                coins
                    .iter_mut()
                    .find(|c| c.symbol == symbol)
                    .map(|c| merge_samples(&mut c.prices, samples))
            })
            .await
    }

    async fn update_price_change(&self, symbol: &str, price_change: f64) -> Result<bool> {
        self.coins
            .modify(|coins| match coins.iter_mut().find(|c| c.symbol == symbol) {
                Some(coin) => {
                    coin.price_change = price_change;
                    true
                }
                None => false,
            })
            .await
    }

    async fn update_realized_pnl(&self, symbol: &str, realized_pnl: f64) -> Result<bool> {
        self.coins
            .modify(|coins| match coins.iter_mut().find(|c| c.symbol == symbol) {
                Some(coin) => {
                    coin.realized_pnl = realized_pnl;
                    true
                }
                None => false,
            })
            .await
    }

    async fn get_all_orders(&self, direction: Option<Direction>) -> Result<Vec<Order>> {
        Ok(filter_orders(&self.orders.read().await?, direction))
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        validate_order(order)?;
        self.orders.modify(|orders| orders.push(order.clone())).await
    }

    async fn get_all_positions(&self) -> Result<Vec<Position>> {
        self.portfolio.read().await
    }

    async fn get_position_by_symbol(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .portfolio
            .read()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol))
    }

    async fn insert_position(
        &self,
        symbol: &str,
        cost_basis: f64,
        total_quantity: f64,
    ) -> Result<Position> {
        self.portfolio
            .modify(|positions| insert_position_into(positions, symbol, cost_basis, total_quantity))
            .await?
    }

    async fn update_position_by_symbol(
        &self,
        symbol: &str,
        cost_basis: f64,
        additional_qty: f64,
    ) -> Result<Option<Position>> {
        self.portfolio
            .modify(|positions| update_position_in(positions, symbol, cost_basis, additional_qty))
            .await
    }

    async fn append_pnl_entry(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<Option<PnlEntry>> {
        self.portfolio
            .modify(|positions| append_pnl_in(positions, symbol, timestamp, value))
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct TempFiles {
        dir: PathBuf,
    }

    impl TempFiles {
        fn new() -> Self {
            let mut dir = std::env::temp_dir();
            dir.push(format!("coinpilot_json_{}", uuid::Uuid::new_v4()));
            Self { dir }
        }

        fn path(&self, name: &str) -> String {
            self.dir.join(name).to_string_lossy().to_string()
        }

        fn storage(&self) -> JsonStorage {
            JsonStorage::new(
                &self.path("coins.json"),
                &self.path("orders.json"),
                &self.path("portfolio.json"),
            )
        }
    }

    impl Drop for TempFiles {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    #[tokio::test]
    async fn test_missing_files_read_empty() {
        let files = TempFiles::new();
        let store = files.storage();
        assert!(store.get_all_coins().await.unwrap().is_empty());
        assert!(store.get_all_orders(None).await.unwrap().is_empty());
        assert!(store.get_position_by_symbol("BTC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let files = TempFiles::new();
        {
            let store = files.storage();
            let mut coin = Coin::new("bitcoin", "BTC");
            coin.prices.push(OhlcSample::flat(Utc::now(), 100.0));
            store.add_coin(&coin).await.unwrap();
            store.insert_position("BTC", 100.0, 1.0).await.unwrap();
            store
                .insert_order(&Order {
                    timestamp: Utc::now(),
                    price: 100.0,
                    quantity: 1.0,
                    symbol: "BTC".into(),
                    direction: Direction::Buy,
                })
                .await
                .unwrap();
        }

        let reopened = files.storage();
        let btc = reopened.get_coin_by_symbol("BTC").await.unwrap().unwrap();
        assert_eq!(btc.last_close(), Some(100.0));
        assert_eq!(reopened.get_all_orders(Some(Direction::Buy)).await.unwrap().len(), 1);
        assert_eq!(
            reopened.get_position_by_symbol("BTC").await.unwrap().unwrap().cost_basis,
            100.0
        );
    }

    #[tokio::test]
    async fn test_duplicate_coin_returns_none() {
        let files = TempFiles::new();
        let store = files.storage();
        assert!(store.add_coin(&Coin::new("bitcoin", "BTC")).await.unwrap().is_some());
        assert!(store.add_coin(&Coin::new("bitcoin", "BTC")).await.unwrap().is_none());
        assert_eq!(store.get_all_coins().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_files_use_camel_case_coins() {
        let files = TempFiles::new();
        let store = files.storage();
        store.add_coin(&Coin::new("bitcoin", "BTC")).await.unwrap();
        let raw = std::fs::read_to_string(files.path("coins.json")).unwrap();
        assert!(raw.contains("\"coinId\""));
        assert!(raw.contains("\"realizedPnl\""));
    }
}
