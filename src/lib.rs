//! NTTP - natural-language questions to parameterized SQL
//!
//! This crate turns human-written database questions into safe, read-only,
//! parameterized SQL and executes them, built around a three-tier semantic
//! query cache:
//! - Intent normalization and fingerprinting (stable across phrasings)
//! - L1 exact cache (in-memory LRU or external KV) with pinning
//! - L2 semantic cache (embedding similarity) with promotion into L1
//! - L3 generative path with safety validation and error-driven retry
//!
//! The public surface is [`Nttp`]: `resolve` for the full pipeline,
//! `explain` for planning without execution, plus cached-schema management
//! and statistics.

pub mod cache;
mod client;
pub mod config;
pub mod db;
mod error;
pub mod intent;
pub mod llm;
mod models;
pub mod sqlgen;

pub use client::{Nttp, NttpBuilder};
pub use config::{
    CacheConfig, Config, ConfigError, CostConfig, DatabaseConfig, L1Config, L2Config, LimitsConfig,
    LlmConfig, LlmProvider,
};
pub use error::{Error, Result};
pub use models::{
    CacheLayer, Explanation, JsonValue, ResolveMeta, ResolveOptions, ResolveOutcome, Row,
};
