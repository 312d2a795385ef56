//! Core engine: the cyclic evaluate → buy → sell → snapshot loop.
//!
//! Each cycle walks every stored coin sequentially. A coin that fails is
//! logged and skipped; the cycle itself only fails if the coin list cannot
//! be read. Shadow evaluations, when enabled, are dispatched per coin and
//! never awaited by the cycle.

pub mod refresh;
pub mod shadow;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::evaluator::Evaluator;
use crate::market_data::MarketDataPort;
use crate::storage::DataStorage;
use crate::strategy::Strategy;
use crate::types::Coin;
use shadow::ShadowRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    CycleRunning,
    Sleeping,
    Stopped,
}

/// Counters for one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub coins_seen: usize,
    pub candidates: usize,
    pub priced: usize,
    pub buys: usize,
    pub sells: usize,
    pub shadow_dispatches: usize,
    pub failures: usize,
}

impl CycleReport {
    fn log(&self) {
        info!(
            cycle = self.cycle,
            coins = self.coins_seen,
            candidates = self.candidates,
            priced = self.priced,
            buys = self.buys,
            sells = self.sells,
            shadow = self.shadow_dispatches,
            failures = self.failures,
            "Cycle complete"
        );
    }
}

#[async_trait]
pub trait TradingEngine: Send + Sync {
    /// Run cycles until stopped. With `run_once`, a single cycle runs and
    /// in-flight shadow evaluations are awaited before returning.
    async fn run(&self, run_once: bool) -> Result<()>;

    async fn run_cycle(&self) -> Result<CycleReport>;

    fn state(&self) -> EngineState;

    /// Stop and wait for in-flight shadow evaluations.
    async fn shutdown(&self);

    fn name(&self) -> &str;
}

/// Everything an engine needs, resolved at startup.
pub struct EngineParts {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn DataStorage>,
    pub market_data: Arc<dyn MarketDataPort>,
    pub evaluator: Arc<dyn Evaluator>,
    pub strategy: Arc<dyn Strategy>,
    pub shadow: Option<ShadowRunner>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    storage: Arc<dyn DataStorage>,
    market_data: Arc<dyn MarketDataPort>,
    evaluator: Arc<dyn Evaluator>,
    strategy: Arc<dyn Strategy>,
    shadow: Option<ShadowRunner>,
    interval: Duration,
    state: watch::Sender<EngineState>,
    cycles: AtomicU64,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            storage: parts.storage,
            market_data: parts.market_data,
            evaluator: parts.evaluator,
            strategy: parts.strategy,
            shadow: parts.shadow,
            interval: Duration::from_secs(parts.config.engine.cycle_interval_secs),
            state,
            cycles: AtomicU64::new(0),
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn shadow(&self) -> Option<&ShadowRunner> {
        self.shadow.as_ref()
    }

    fn set_state(&self, next: EngineState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Engine state");
        }
    }

    async fn cycle(&self, cycle: u64) -> Result<CycleReport> {
        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };

        let coins = self.storage.get_all_coins().await?;
        report.coins_seen = coins.len();
        if coins.is_empty() {
            warn!("No coins in storage; nothing to evaluate");
            return Ok(report);
        }

        for coin in &coins {
            if let Err(e) = self.process_coin(coin, &mut report).await {
                report.failures += 1;
                error!(symbol = %coin.symbol, error = %e, "Coin processing failed; continuing");
            }
        }
        Ok(report)
    }

    async fn process_coin(&self, coin: &Coin, report: &mut CycleReport) -> Result<()> {
        if !self.evaluator.is_candidate(coin) {
            return Ok(());
        }
        report.candidates += 1;

        let Some(price) = self.market_data.get_price(&coin.coin_id).await? else {
            warn!(symbol = %coin.symbol, coin_id = %coin.coin_id, "No price available; skipping");
            return Ok(());
        };
        report.priced += 1;

        let pools = self.evaluator.check_liquidity_pools(coin).await;
        if pools.is_empty() {
            debug!(symbol = %coin.symbol, "No safe pools; skipping buy");
        } else if self
            .strategy
            .evaluate_and_execute_buy(coin, price, &pools)
            .await?
            .is_some()
        {
            report.buys += 1;
        }

        let fills = self.strategy.evaluate_and_execute_sell(coin, price).await?;
        report.sells += fills.len();

        if self
            .storage
            .append_pnl_entry(&coin.symbol, Utc::now(), price)
            .await?
            .is_none()
        {
            debug!(symbol = %coin.symbol, "No position; PnL snapshot skipped");
        }

        if let Some(shadow) = &self.shadow {
            if shadow.dispatch(coin, price).await {
                report.shadow_dispatches += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TradingEngine for Engine {
    async fn run(&self, run_once: bool) -> Result<()> {
        info!(
            evaluator = self.evaluator.name(),
            strategy = self.strategy.name(),
            market_data = self.market_data.name(),
            interval_secs = self.interval.as_secs(),
            run_once,
            shadow = self.shadow.is_some(),
            "Engine starting"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => report.log(),
                Err(e) => error!(error = %e, "Cycle failed; continuing to next"),
            }
            if run_once {
                break;
            }
            self.set_state(EngineState::Sleeping);
            tokio::time::sleep(self.interval).await;
        }

        self.shutdown().await;
        Ok(())
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("cycle", cycle, cycle_id = %Uuid::new_v4());

        self.set_state(EngineState::CycleRunning);
        let result = self.cycle(cycle).instrument(span).await;
        self.set_state(EngineState::Idle);
        result
    }

    fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    async fn shutdown(&self) {
        if let Some(shadow) = &self.shadow {
            shadow.shutdown().await;
        }
        self.set_state(EngineState::Stopped);
        info!(cycles = self.cycles.load(Ordering::Relaxed), "Engine stopped");
    }

    fn name(&self) -> &str {
        "Engine"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
