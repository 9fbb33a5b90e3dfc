//! SQLite connection pool
//!
//! File databases run in WAL mode. In-memory databases are limited to a
//! single connection, since every connection to `:memory:` opens a separate
//! database.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use crate::storage::migrations::{self, MigrationStatus};

const FILE_POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how to open the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database file; `None` for an in-memory database
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    /// Apply pending migrations on open
    pub auto_migrate: bool,
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            max_connections: FILE_POOL_SIZE,
            auto_migrate: true,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            max_connections: 1,
            auto_migrate: true,
        }
    }

    /// Leave the schema untouched on open
    pub fn without_migrations(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            None => SqliteConnectOptions::from_str("sqlite::memory:")?,
        };
        Ok(options.foreign_keys(true).busy_timeout(BUSY_TIMEOUT))
    }
}

/// Pooled SQLite database holding the graph collections
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.as_deref().and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }

        let location = config
            .path
            .as_deref()
            .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
        if config.path.is_none() {
            // Dropping the only connection drops the database
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open database {}", location))?;

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }

        info!(database = %location, "Database opened");
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Database file, if any
    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate database schema")
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to read schema version")
    }

    pub async fn health_check(&self) -> Result<()> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        anyhow::ensure!(one == 1, "Database health check returned {}", one);
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
