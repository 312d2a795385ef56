//! Name-based component selection.
//!
//! Evaluators, strategies and engines are chosen at startup from
//! `{module, class, version}` triples in the config. Each kind has a
//! registry of factory functions keyed by `(module, class)`; a version
//! selects `"{class}V{VERSION}"` first and falls back to the bare class.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AppConfig, PluginSpec};
use crate::engine::{Engine, EngineParts, TradingEngine};
use crate::evaluator::{Evaluator, EvaluatorV1};
use crate::llm::DecisionEngine;
use crate::market_data::MarketDataPort;
use crate::storage::DataStorage;
use crate::strategy::{Strategy, StrategyCore, StrategyV1, StrategyV2};
use crate::types::BotError;

/// Dependencies handed to evaluator and strategy factories.
#[derive(Clone)]
pub struct PluginContext {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn DataStorage>,
    pub market_data: Arc<dyn MarketDataPort>,
    pub decision_engine: Arc<dyn DecisionEngine>,
    pub instructions: String,
}

impl PluginContext {
    /// Same dependencies, different storage.
    pub fn with_storage(&self, storage: Arc<dyn DataStorage>) -> Self {
        Self {
            storage,
            ..self.clone()
        }
    }

    fn strategy_core(&self) -> StrategyCore {
        StrategyCore::new(
            self.storage.clone(),
            self.decision_engine.clone(),
            self.market_data.clone(),
            self.config.trade.clone(),
            self.instructions.clone(),
        )
    }
}

pub type EvaluatorFactory = fn(&PluginContext) -> Arc<dyn Evaluator>;
pub type StrategyFactory = fn(&PluginContext) -> Arc<dyn Strategy>;
pub type EngineFactory = fn(EngineParts) -> Arc<dyn TradingEngine>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A factory together with the class name it was registered under.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a, F> {
    pub class: &'a str,
    pub factory: F,
}

pub struct PluginRegistry<F> {
    kind: &'static str,
    factories: HashMap<(String, String), F>,
}

impl<F: Copy> PluginRegistry<F> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, module: &str, class: &str, factory: F) -> &mut Self {
        self.factories
            .insert((module.to_string(), class.to_string()), factory);
        self
    }

    fn lookup(&self, module: &str, class: &str) -> Option<Resolved<'_, F>> {
        self.factories
            .get_key_value(&(module.to_string(), class.to_string()))
            .map(|((_, class), factory)| Resolved {
                class: class.as_str(),
                factory: *factory,
            })
    }

    /// Find the factory for a spec, preferring the versioned class name.
    pub fn resolve(&self, spec: &PluginSpec) -> Result<Resolved<'_, F>, BotError> {
        if let Some(versioned) = versioned_class(&spec.class, spec.version.as_deref()) {
            if let Some(found) = self.lookup(&spec.module, &versioned) {
                return Ok(found);
            }
            warn!(
                kind = self.kind,
                module = %spec.module,
                class = %versioned,
                fallback = %spec.class,
                "Versioned plugin not found; falling back to base class"
            );
        }

        self.lookup(&spec.module, &spec.class)
            .ok_or_else(|| BotError::PluginNotFound {
                kind: self.kind,
                module: spec.module.clone(),
                class: spec.class.clone(),
                version: spec.version.clone(),
            })
    }
}

/// `"{class}V{VERSION}"` with a leading `v`/`V` stripped from the version.
fn versioned_class(class: &str, version: Option<&str>) -> Option<String> {
    let version = version?.trim();
    let version = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);
    if version.is_empty() {
        return None;
    }
    Some(format!("{class}V{}", version.to_uppercase()))
}

// ---------------------------------------------------------------------------
// Built-in plugins
// ---------------------------------------------------------------------------

fn evaluator_v1(ctx: &PluginContext) -> Arc<dyn Evaluator> {
    Arc::new(EvaluatorV1::new(
        ctx.config.trade.price_change_threshold,
        ctx.config.pool.clone(),
        ctx.market_data.clone(),
    ))
}

fn strategy_v1(ctx: &PluginContext) -> Arc<dyn Strategy> {
    Arc::new(StrategyV1::new(ctx.strategy_core()))
}

fn strategy_v2(ctx: &PluginContext) -> Arc<dyn Strategy> {
    Arc::new(StrategyV2::new(ctx.strategy_core()))
}

fn engine(parts: EngineParts) -> Arc<dyn TradingEngine> {
    Arc::new(Engine::new(parts))
}

/// Registries for every pluggable component kind.
pub struct Plugins {
    pub evaluators: PluginRegistry<EvaluatorFactory>,
    pub strategies: PluginRegistry<StrategyFactory>,
    pub engines: PluginRegistry<EngineFactory>,
}

impl Plugins {
    /// Registries populated with the implementations shipped in this crate.
    pub fn builtin() -> Self {
        let mut evaluators = PluginRegistry::<EvaluatorFactory>::new("evaluator");
        evaluators
            .register("evaluator", "Evaluator", evaluator_v1)
            .register("evaluator", "EvaluatorV1", evaluator_v1);

        let mut strategies = PluginRegistry::<StrategyFactory>::new("strategy");
        strategies
            .register("strategy", "Strategy", strategy_v1)
            .register("strategy", "StrategyV1", strategy_v1)
            .register("strategy", "StrategyV2", strategy_v2);

        let mut engines = PluginRegistry::<EngineFactory>::new("engine");
        engines.register("engine", "Engine", engine);

        Self {
            evaluators,
            strategies,
            engines,
        }
    }

    pub fn evaluator(
        &self,
        spec: &PluginSpec,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn Evaluator>, BotError> {
        let resolved = self.evaluators.resolve(spec)?;
        info!(module = %spec.module, class = resolved.class, "Loaded evaluator");
        Ok((resolved.factory)(ctx))
    }

    pub fn strategy(
        &self,
        spec: &PluginSpec,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn Strategy>, BotError> {
        let resolved = self.strategies.resolve(spec)?;
        info!(module = %spec.module, class = resolved.class, "Loaded strategy");
        Ok((resolved.factory)(ctx))
    }

    pub fn engine(
        &self,
        spec: &PluginSpec,
        parts: EngineParts,
    ) -> Result<Arc<dyn TradingEngine>, BotError> {
        let resolved = self.engines.resolve(spec)?;
        info!(module = %spec.module, class = resolved.class, "Loaded engine");
        Ok((resolved.factory)(parts))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::storage::memory::MemoryStorage;
    use crate::testing::{oracle_saying, StaticMarket};

    fn context() -> PluginContext {
        PluginContext {
            config: Arc::new(test_config()),
            storage: Arc::new(MemoryStorage::new()),
            market_data: Arc::new(StaticMarket::new(None)),
            decision_engine: Arc::new(oracle_saying("HOLD")),
            instructions: String::new(),
        }
    }

    fn strategy_class(version: Option<&str>) -> Result<String, BotError> {
        let plugins = Plugins::builtin();
        let spec = PluginSpec::new("strategy", "Strategy", version);
        plugins.strategies.resolve(&spec).map(|r| r.class.to_string())
    }

    #[test]
    fn test_version_spellings() {
        assert_eq!(versioned_class("Strategy", Some("v2")).unwrap(), "StrategyV2");
        assert_eq!(versioned_class("Strategy", Some("V2")).unwrap(), "StrategyV2");
        assert_eq!(versioned_class("Strategy", Some("2")).unwrap(), "StrategyV2");
        assert_eq!(versioned_class("Strategy", Some("beta")).unwrap(), "StrategyVBETA");
        assert_eq!(versioned_class("Strategy", Some("v")), None);
        assert_eq!(versioned_class("Strategy", None), None);
    }

    #[test]
    fn test_resolves_versioned_class() {
        assert_eq!(strategy_class(Some("v2")).unwrap(), "StrategyV2");
        assert_eq!(strategy_class(Some("2")).unwrap(), "StrategyV2");
        assert_eq!(strategy_class(Some("v1")).unwrap(), "StrategyV1");
        assert_eq!(strategy_class(None).unwrap(), "Strategy");
    }

    #[test]
    fn test_unknown_version_falls_back_to_base() {
        assert_eq!(strategy_class(Some("v9")).unwrap(), "Strategy");
    }

    #[test]
    fn test_missing_base_class_fails() {
        let plugins = Plugins::builtin();
        let spec = PluginSpec::new("strategy", "Momentum", Some("v9"));
        let err = plugins.strategies.resolve(&spec).unwrap_err();
        match err {
            BotError::PluginNotFound {
                kind,
                module,
                class,
                version,
            } => {
                assert_eq!(kind, "strategy");
                assert_eq!(module, "strategy");
                assert_eq!(class, "Momentum");
                assert_eq!(version.as_deref(), Some("v9"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_module_is_part_of_the_key() {
        let plugins = Plugins::builtin();
        let spec = PluginSpec::new("strategies", "Strategy", None);
        assert!(plugins.strategies.resolve(&spec).is_err());
    }

    #[test]
    fn test_builds_named_components() {
        let plugins = Plugins::builtin();
        let ctx = context();

        let strategy = plugins
            .strategy(&PluginSpec::new("strategy", "Strategy", Some("v2")), &ctx)
            .unwrap();
        assert_eq!(strategy.name(), "StrategyV2");

        let evaluator = plugins
            .evaluator(&ctx.config.plugins.evaluator, &ctx)
            .unwrap();
        assert_eq!(evaluator.name(), "EvaluatorV1");
    }

    #[test]
    fn test_default_config_resolves() {
        let plugins = Plugins::builtin();
        let defaults = crate::config::PluginsConfig::default();
        assert_eq!(
            plugins.evaluators.resolve(&defaults.evaluator).unwrap().class,
            "EvaluatorV1"
        );
        assert_eq!(
            plugins.strategies.resolve(&defaults.strategy).unwrap().class,
            "StrategyV1"
        );
        assert_eq!(plugins.engines.resolve(&defaults.engine).unwrap().class, "Engine");
    }
}
