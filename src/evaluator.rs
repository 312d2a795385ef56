//! Candidate selection and liquidity-pool safety filter.
//!
//! An `Evaluator` decides which coins are worth a buy decision this cycle
//! and which of their pools are deep enough to trade against. It holds no
//! state between calls.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::market_data::MarketDataPort;
use crate::types::{Coin, LiquidityPool};

#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Whether the coin's price change qualifies it for evaluation.
    fn is_candidate(&self, coin: &Coin) -> bool;

    /// Pools for the coin that pass every safety threshold. Never fails;
    /// provider problems yield no pools.
    async fn check_liquidity_pools(&self, coin: &Coin) -> Vec<LiquidityPool>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// EvaluatorV1
// ---------------------------------------------------------------------------

pub struct EvaluatorV1 {
    price_change_threshold: f64,
    pool: PoolConfig,
    market_data: Arc<dyn MarketDataPort>,
}

impl EvaluatorV1 {
    pub fn new(
        price_change_threshold: f64,
        pool: PoolConfig,
        market_data: Arc<dyn MarketDataPort>,
    ) -> Self {
        Self {
            price_change_threshold,
            pool,
            market_data,
        }
    }

    /// Inclusive thresholds on reserve, 24h volume and 24h buy count.
    pub fn is_safe(&self, pool: &LiquidityPool) -> bool {
        pool.reserve_usd >= self.pool.min_reserves_usd
            && pool.volume_24h_usd >= self.pool.min_volume_24h
            && pool.buys_24h >= self.pool.min_buys_24h
    }
}

#[async_trait]
impl Evaluator for EvaluatorV1 {
    fn is_candidate(&self, coin: &Coin) -> bool {
        coin.price_change >= self.price_change_threshold
    }

    async fn check_liquidity_pools(&self, coin: &Coin) -> Vec<LiquidityPool> {
        let payload = match self.market_data.search_pools(&coin.symbol, None).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(symbol = %coin.symbol, error = %e, "Pool search failed");
                return Vec::new();
            }
        };

        let pools = LiquidityPool::parse_search(&payload);
        let found = pools.len();
        let safe: Vec<LiquidityPool> = pools.into_iter().filter(|p| self.is_safe(p)).collect();

        debug!(symbol = %coin.symbol, found, safe = safe.len(), "Liquidity pools checked");
        safe
    }

    fn name(&self) -> &str {
        "EvaluatorV1"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
