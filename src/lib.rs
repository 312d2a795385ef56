//! COINPILOT: autonomous AI-assisted paper-trading engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market_data;
pub mod llm;
pub mod storage;
pub mod evaluator;
pub mod strategy;
pub mod plugins;
pub mod engine;

#[cfg(test)]
mod testing;
