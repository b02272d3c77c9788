//! Database layer for the Avoda service
//!
//! - SeaORM entity models for the request corpus and its embedding chunks
//! - `Repository`, the low-level hybrid-retrieval SQL surface
//! - connection pool management

pub mod models;
mod repository;

pub use repository::{RequestView, Repository};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper. A single pool backs both reads and
/// writes; the service has no write path over the request corpus, so
/// there is no read/write split to model.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("connecting to database");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(true);

        let conn = Database::connect(opts).await.map_err(|e| AppError::DatabaseConnection {
            message: format!("failed to connect: {e}"),
        })?;

        info!("database connection established");
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Ping the database to check connectivity, used by `/health`.
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("ping failed: {e}"),
            })?;
        Ok(())
    }
}
