//! PaperHarvest Common Library
//!
//! Shared code for the PaperHarvest harvester including:
//! - Database layer: store abstraction, natural-key upsert, repositories
//! - Error types and handling
//! - Configuration management
//! - Visited-request store (Redis / in-memory)
//! - Metrics and logging setup

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod observability;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{MemoryStore, PgStore, Store};
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
