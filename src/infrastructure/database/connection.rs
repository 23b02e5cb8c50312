use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::domain::models::DatabaseConfig;
use crate::domain::ports::errors::StoreError;

/// Lazily created `SQLite` connection pool
///
/// The pool is built on first use, exactly once, even when many operations
/// race for it; migrations run as part of that construction. Connections that
/// fail a ping when released are closed instead of going back to the pool.
pub struct DatabaseConnection {
    path: PathBuf,
    min_connections: u32,
    max_connections: u32,
    acquire_timeout: Duration,
    pool: OnceCell<SqlitePool>,
}

impl DatabaseConnection {
    /// Describe a pool without opening it
    ///
    /// # Configuration
    /// - Journal mode: WAL (Write-Ahead Logging)
    /// - Synchronous: NORMAL
    /// - Foreign keys: Enabled
    /// - Busy timeout: 5 seconds
    /// - Idle timeout: 30 seconds
    /// - Max lifetime: 30 minutes
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            min_connections: config.min_connections.min(config.max_connections),
            max_connections: config.max_connections.max(1),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            pool: OnceCell::new(),
        }
    }

    /// Get the pool, creating it and running migrations on first call
    pub async fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool.get_or_try_init(|| self.connect()).await
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqlitePool, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::ConnectionPoolError(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(self.acquire_timeout)
            .after_release(|conn, meta| {
                Box::pin(async move {
                    match conn.ping().await {
                        Ok(()) => Ok(true),
                        Err(err) => {
                            warn!(
                                age_secs = meta.age.as_secs(),
                                error = %err,
                                "discarding connection that failed health check"
                            );
                            Ok(false)
                        }
                    }
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::ConnectionPoolError(format!("Failed to create connection pool: {e}"))
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::MigrationError(format!("Migration failed: {e}")))?;

        info!(
            path = %self.path.display(),
            min_connections = self.min_connections,
            max_connections = self.max_connections,
            "database pool initialized"
        );

        Ok(pool)
    }

    /// Close the pool if it was ever opened
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}
