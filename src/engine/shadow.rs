//! Shadow evaluation: an alternate evaluator/strategy pair run alongside
//! production without ever blocking it.
//!
//! Every dispatch becomes a task in a supervised `JoinSet`. Failures and
//! panics are reported on an error channel drained by a supervisor task,
//! and the number of in-flight evaluations is bounded by a semaphore.
//! Dispatches beyond the bound are dropped.

use anyhow::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ShadowStorage;
use crate::evaluator::Evaluator;
use crate::plugins::{PluginContext, Plugins};
use crate::storage::ledger::ShadowLedger;
use crate::strategy::Strategy;
use crate::types::Coin;

/// A shadow evaluation that returned an error or panicked.
#[derive(Debug)]
pub struct ShadowFailure {
    pub symbol: String,
    pub message: String,
    pub panicked: bool,
}

/// Counters since the runner was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShadowStats {
    pub dispatched: usize,
    pub dropped: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicUsize,
    dropped: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

struct Inner {
    tasks: JoinSet<()>,
    /// `None` once shut down.
    errors: Option<mpsc::UnboundedSender<ShadowFailure>>,
    supervisor: Option<JoinHandle<()>>,
}

pub struct ShadowRunner {
    evaluator: Arc<dyn Evaluator>,
    strategy: Arc<dyn Strategy>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
    inner: Mutex<Inner>,
}

impl ShadowRunner {
    /// Must be called inside a tokio runtime; spawns the supervisor.
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        strategy: Arc<dyn Strategy>,
        max_in_flight: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = tokio::spawn(supervise(rx));

        Self {
            evaluator,
            strategy,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            counters: Arc::new(Counters::default()),
            inner: Mutex::new(Inner {
                tasks: JoinSet::new(),
                errors: Some(tx),
                supervisor: Some(supervisor),
            }),
        }
    }

    pub fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.evaluator
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    pub fn stats(&self) -> ShadowStats {
        ShadowStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Start a shadow evaluation for the coin. Returns `false` if it was
    /// dropped because the runner is saturated or shut down.
    pub async fn dispatch(&self, coin: &Coin, price: f64) -> bool {
        let mut inner = self.inner.lock().await;
        while inner.tasks.try_join_next().is_some() {}

        let Some(errors) = inner.errors.clone() else {
            debug!(symbol = %coin.symbol, "Shadow runner is shut down; dispatch ignored");
            return false;
        };

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    symbol = %coin.symbol,
                    in_flight = inner.tasks.len(),
                    "Shadow evaluation dropped: too many in flight"
                );
                return false;
            }
        };

        let evaluator = self.evaluator.clone();
        let strategy = self.strategy.clone();
        let counters = self.counters.clone();
        let coin = coin.clone();
        let span = info_span!(
            "shadow",
            symbol = %coin.symbol,
            evaluator = evaluator.name(),
            strategy = strategy.name()
        );

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        inner.tasks.spawn(
            async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(evaluate(&*evaluator, &*strategy, &coin, price))
                    .catch_unwind()
                    .await;

                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some((format!("{e:#}"), false)),
                    Err(panic) => Some((panic_message(panic.as_ref()), true)),
                };

                match failure {
                    None => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Some((message, panicked)) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        let _ = errors.send(ShadowFailure {
                            symbol: coin.symbol.clone(),
                            message,
                            panicked,
                        });
                    }
                }
            }
            .instrument(span),
        );
        true
    }

    /// Wait for in-flight evaluations, then stop the supervisor once it has
    /// logged every reported failure. Later dispatches are ignored.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let pending = inner.tasks.len();
        if pending > 0 {
            info!(pending, "Waiting for shadow evaluations to finish");
        }
        while let Some(joined) = inner.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Shadow task aborted");
            }
        }

        inner.errors = None;
        if let Some(supervisor) = inner.supervisor.take() {
            let _ = supervisor.await;
        }
        let stats = self.stats();
        info!(
            dispatched = stats.dispatched,
            completed = stats.completed,
            failed = stats.failed,
            dropped = stats.dropped,
            "Shadow runner stopped"
        );
    }
}

async fn evaluate(
    evaluator: &dyn Evaluator,
    strategy: &dyn Strategy,
    coin: &Coin,
    price: f64,
) -> Result<()> {
    if !evaluator.is_candidate(coin) {
        return Ok(());
    }
    let pools = evaluator.check_liquidity_pools(coin).await;
    if !pools.is_empty() {
        if let Some(order) = strategy.evaluate_and_execute_buy(coin, price, &pools).await? {
            info!(price = order.price, quantity = order.quantity, "Shadow BUY");
        }
    }
    let fills = strategy.evaluate_and_execute_sell(coin, price).await?;
    if !fills.is_empty() {
        info!(sells = fills.len(), "Shadow SELL");
    }
    Ok(())
}

async fn supervise(mut failures: mpsc::UnboundedReceiver<ShadowFailure>) {
    while let Some(failure) = failures.recv().await {
        warn!(
            symbol = %failure.symbol,
            panicked = failure.panicked,
            error = %failure.message,
            "Shadow evaluation failed"
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Resolve the shadow evaluator/strategy pair. Resolution failure disables
/// shadow mode with a warning instead of failing startup.
pub fn build_shadow(plugins: &Plugins, ctx: &PluginContext) -> Option<ShadowRunner> {
    let config = &ctx.config;
    if !config.shadow.enabled {
        return None;
    }

    let ctx = match config.shadow.storage {
        ShadowStorage::Shared => ctx.clone(),
        ShadowStorage::Isolated => {
            ctx.with_storage(Arc::new(ShadowLedger::new(ctx.storage.clone())))
        }
    };

    let evaluator_spec = config.shadow.evaluator.apply(&config.plugins.evaluator);
    let strategy_spec = config.shadow.strategy.apply(&config.plugins.strategy);

    let resolved = plugins
        .evaluator(&evaluator_spec, &ctx)
        .and_then(|evaluator| Ok((evaluator, plugins.strategy(&strategy_spec, &ctx)?)));

    match resolved {
        Ok((evaluator, strategy)) => {
            info!(
                evaluator = evaluator.name(),
                strategy = strategy.name(),
                storage = ?config.shadow.storage,
                max_in_flight = config.shadow.max_in_flight,
                "Shadow mode enabled"
            );
            Some(ShadowRunner::new(
                evaluator,
                strategy,
                config.shadow.max_in_flight,
            ))
        }
        Err(e) => {
            warn!(error = %e, "Shadow plugins could not be loaded; shadow mode disabled");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
