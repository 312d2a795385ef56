//! Private ledger for isolated shadow evaluation.
//!
//! Coin market data (listing, history, price change) is read from and
//! written to the live backend. Orders, positions, PnL snapshots and
//! realized PnL stay in process memory, so shadow trades never touch the
//! production ledger.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{DataStorage, MemoryStorage};
use crate::types::{Coin, Direction, OhlcSample, Order, PnlEntry, Position};

pub struct ShadowLedger {
    live: Arc<dyn DataStorage>,
    book: MemoryStorage,
    realized_pnl: RwLock<HashMap<String, f64>>,
}

impl ShadowLedger {
    pub fn new(live: Arc<dyn DataStorage>) -> Self {
        Self {
            live,
            book: MemoryStorage::new(),
            realized_pnl: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the live realized PnL with the shadow one, if any.
    async fn overlay(&self, mut coin: Coin) -> Coin {
        coin.realized_pnl = self
            .realized_pnl
            .read()
            .await
            .get(&coin.symbol)
            .copied()
            .unwrap_or(0.0);
        coin
    }
}

#[async_trait]
impl DataStorage for ShadowLedger {
    async fn get_all_coins(&self) -> Result<Vec<Coin>> {
        let mut coins = Vec::new();
        for coin in self.live.get_all_coins().await? {
            coins.push(self.overlay(coin).await);
        }
        Ok(coins)
    }

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>> {
        match self.live.get_coin_by_symbol(symbol).await? {
            Some(coin) => Ok(Some(self.overlay(coin).await)),
            None => Ok(None),
        }
    }

    async fn add_coin(&self, coin: &Coin) -> Result<Option<Coin>> {
        self.live.add_coin(coin).await
    }

    async fn append_prices(&self, symbol: &str, samples: &[OhlcSample]) -> Result<Option<usize>> {
        self.live.append_prices(symbol, samples).await
    }

    async fn update_price_change(&self, symbol: &str, price_change: f64) -> Result<bool> {
        self.live.update_price_change(symbol, price_change).await
    }

    async fn update_realized_pnl(&self, symbol: &str, realized_pnl: f64) -> Result<bool> {
        if self.live.get_coin_by_symbol(symbol).await?.is_none() {
            return Ok(false);
        }
        self.realized_pnl
            .write()
            .await
            .insert(symbol.to_string(), realized_pnl);
        Ok(true)
    }

    async fn get_all_orders(&self, direction: Option<Direction>) -> Result<Vec<Order>> {
        self.book.get_all_orders(direction).await
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.book.insert_order(order).await
    }

    async fn get_all_positions(&self) -> Result<Vec<Position>> {
        self.book.get_all_positions().await
    }

    async fn get_position_by_symbol(&self, symbol: &str) -> Result<Option<Position>> {
        self.book.get_position_by_symbol(symbol).await
    }

    async fn insert_position(
        &self,
        symbol: &str,
        cost_basis: f64,
        total_quantity: f64,
    ) -> Result<Position> {
        self.book.insert_position(symbol, cost_basis, total_quantity).await
    }

    async fn update_position_by_symbol(
        &self,
        symbol: &str,
        cost_basis: f64,
        additional_qty: f64,
    ) -> Result<Option<Position>> {
        self.book
            .update_position_by_symbol(symbol, cost_basis, additional_qty)
            .await
    }

    async fn append_pnl_entry(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<Option<PnlEntry>> {
        self.book.append_pnl_entry(symbol, timestamp, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shadow_writes_stay_private() {
        let mut btc = Coin::new("bitcoin", "BTC");
        btc.realized_pnl = 5.0;
        let live: Arc<dyn DataStorage> = Arc::new(MemoryStorage::with_coins(vec![btc]));
        let ledger = ShadowLedger::new(Arc::clone(&live));

        ledger.insert_position("BTC", 100.0, 1.0).await.unwrap();
        ledger
            .insert_order(&Order {
                timestamp: Utc::now(),
                price: 100.0,
                quantity: 1.0,
                symbol: "BTC".into(),
                direction: Direction::Buy,
            })
            .await
            .unwrap();
        assert!(ledger.update_realized_pnl("BTC", 30.0).await.unwrap());

        assert!(live.get_all_orders(None).await.unwrap().is_empty());
        assert!(live.get_position_by_symbol("BTC").await.unwrap().is_none());
        let live_btc = live.get_coin_by_symbol("BTC").await.unwrap().unwrap();
        assert_eq!(live_btc.realized_pnl, 5.0);

        let shadow_btc = ledger.get_coin_by_symbol("BTC").await.unwrap().unwrap();
        assert_eq!(shadow_btc.realized_pnl, 30.0);
        assert_eq!(ledger.get_all_orders(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shadow_starts_from_zero_realized_pnl() {
        let mut eth = Coin::new("ethereum", "ETH");
        eth.realized_pnl = -12.0;
        let live: Arc<dyn DataStorage> = Arc::new(MemoryStorage::with_coins(vec![eth]));
        let ledger = ShadowLedger::new(live);

        let coins = ledger.get_all_coins().await.unwrap();
        assert_eq!(coins[0].realized_pnl, 0.0);
        assert!(!ledger.update_realized_pnl("DOGE", 1.0).await.unwrap());
    }
}
