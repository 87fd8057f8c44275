//! [`HubStore`]: the connection pool plus transaction helpers.

use std::path::Path;

use rusqlite::{Transaction, TransactionBehavior};
use tracing::info;

use crate::errors::{Result, StoreError};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;

/// Handle to the hub database. Cheap to clone.
#[derive(Clone)]
pub struct HubStore {
    pool: ConnectionPool,
}

impl HubStore {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open (or create) a file-backed database and migrate it.
    pub fn open_file(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let pool = connection::new_file(&path.to_string_lossy(), config)?;
        let store = Self::new(pool);
        let applied = run_migrations(&*store.conn()?)?;
        info!(path = %path.display(), applied, "store opened");
        Ok(store)
    }

    /// Open a migrated in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        let store = Self::new(pool);
        let _ = run_migrations(&*store.conn()?)?;
        Ok(store)
    }

    /// Borrow a pooled connection.
    pub fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so concurrent callers serialize
    /// instead of failing on lock upgrade. Commits when `f` returns `Ok`;
    /// any error rolls back.
    pub fn immediate<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

impl std::fmt::Debug for HubStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("HubStore")
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish()
    }
}
