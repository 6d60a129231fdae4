//! Database layer for PaperHarvest
//!
//! Provides:
//! - Connection pool management
//! - `Store` seam with Postgres and in-memory implementations
//! - Entity models and the natural-key upsert primitive
//! - Repositories for the taxonomy, the eprint graph and websites

mod memory;
pub mod models;
mod postgres;
pub mod repository;
mod store;
pub mod upsert;

pub use memory::{MemoryStore, MemoryTransaction, Row};
pub use postgres::{PgStore, PgTransaction};
pub use repository::{Repository, SaveOutcome};
pub use store::{
    insert_placeholder, BatchInsert, Executor, Id, KeyLookup, OnConflict, SqlValue, Store,
    Transaction, MAX_BIND_PARAMS,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Bundled schema, every statement is `IF NOT EXISTS`
pub const SCHEMA_SQL: &str = include_str!("../../migrations/0001_schema.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = connect(&config.url, config)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to read replica...");
                let conn = connect(read_url, config)
                    .await
                    .map_err(|e| AppError::DatabaseConnection {
                        message: format!("Failed to connect to replica: {}", e),
                    })?;
                Some(conn)
            }
            None => None,
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Create missing tables on the primary
    pub async fn apply_schema(&self) -> Result<()> {
        info!("Applying bundled schema");
        self.primary.execute_unprepared(SCHEMA_SQL).await?;
        Ok(())
    }
}

async fn connect(url: &str, config: &DatabaseConfig) -> std::result::Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);

    Database::connect(opts).await
}
