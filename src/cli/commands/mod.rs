//! CLI command implementations.

pub mod beam;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::domain::models::Config;
use crate::domain::ports::ProgramStore;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::database::{DatabaseConnection, SqliteProgramStore};

/// Load the configuration for a command invocation
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load().context("Failed to load configuration from .arborist/"),
    }
}

/// Store handles shared by every command
///
/// The pool opens on first use; call [`StoreHandle::close`] before exiting.
pub struct StoreHandle {
    pub db: Arc<DatabaseConnection>,
    pub store: Arc<SqliteProgramStore>,
}

impl StoreHandle {
    pub fn open(config: &Config) -> Self {
        let db = Arc::new(DatabaseConnection::new(&config.database));
        let store = Arc::new(SqliteProgramStore::new(Arc::clone(&db), &config.retry));
        Self { db, store }
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

/// Version to report on: the requested one, else the newest stored one
pub async fn resolve_report_version(
    store: &SqliteProgramStore,
    requested: Option<i64>,
) -> Result<Option<i64>> {
    match requested {
        Some(version) => Ok(Some(version)),
        None => store
            .get_largest_version()
            .await
            .context("Failed to look up the latest version"),
    }
}
