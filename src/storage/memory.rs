//! In-memory storage backend.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    add_coin_to, append_pnl_in, filter_orders, insert_position_into, merge_samples,
    update_position_in, validate_order, DataStorage,
};
use crate::types::{Coin, Direction, OhlcSample, Order, PnlEntry, Position};

#[derive(Default)]
pub struct MemoryStorage {
    coins: RwLock<Vec<Coin>>,
    orders: RwLock<Vec<Order>>,
    positions: RwLock<Vec<Position>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, for tests and fixtures.
    pub fn with_coins(coins: Vec<Coin>) -> Self {
        Self {
            coins: RwLock::new(coins),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DataStorage for MemoryStorage {
    async fn get_all_coins(&self) -> Result<Vec<Coin>> {
        Ok(self.coins.read().await.clone())
    }

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>> {
        Ok(self
            .coins
            .read()
            .await
            .iter()
            .find(|c| c.symbol == symbol)
            .cloned())
    }

    async fn add_coin(&self, coin: &Coin) -> Result<Option<Coin>> {
        Ok(add_coin_to(&mut *self.coins.write().await, coin))
    }

    async fn append_prices(&self, symbol: &str, samples: &[OhlcSample]) -> Result<Option<usize>> {
        let mut coins = self.coins.write().await;
        Ok(coins
            .iter_mut()
            .find(|c| c.symbol == symbol)
            .map(|c| merge_samples(&mut c.prices, samples)))
    }

    async fn update_price_change(&self, symbol: &str, price_change: f64) -> Result<bool> {
        let mut coins = self.coins.write().await;
        Ok(match coins.iter_mut().find(|c| c.symbol == symbol) {
            Some(coin) => {
                coin.price_change = price_change;
                true
            }
            None => false,
        })
    }

    async fn update_realized_pnl(&self, symbol: &str, realized_pnl: f64) -> Result<bool> {
        let mut coins = self.coins.write().await;
        Ok(match coins.iter_mut().find(|c| c.symbol == symbol) {
            Some(coin) => {
                coin.realized_pnl = realized_pnl;
                true
            }
            None => false,
        })
    }

    async fn get_all_orders(&self, direction: Option<Direction>) -> Result<Vec<Order>> {
        Ok(filter_orders(&self.orders.read().await, direction))
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        validate_order(order)?;
        self.orders.write().await.push(order.clone());
        Ok(())
    }

    async fn get_all_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.clone())
    }

    async fn get_position_by_symbol(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .positions
            .read()
            .await
            .iter()
            .find(|p| p.symbol == symbol)
            .cloned())
    }

    async fn insert_position(
        &self,
        symbol: &str,
        cost_basis: f64,
        total_quantity: f64,
    ) -> Result<Position> {
        insert_position_into(&mut *self.positions.write().await, symbol, cost_basis, total_quantity)
    }

    async fn update_position_by_symbol(
        &self,
        symbol: &str,
        cost_basis: f64,
        additional_qty: f64,
    ) -> Result<Option<Position>> {
        Ok(update_position_in(
            &mut self.positions.write().await,
            symbol,
            cost_basis,
            additional_qty,
        ))
    }

    async fn append_pnl_entry(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<Option<PnlEntry>> {
        Ok(append_pnl_in(&mut self.positions.write().await, symbol, timestamp, value))
    }
}
