//! Open connections to a database.

use crate::engine::database::Database;
use crate::engine::transaction::Transaction;
use crate::error::{Result, StoreError};
use crate::types::{DatabaseStats, TransactionMode};
use std::sync::Arc;

/// An open connection to a database.
///
/// The connection is closed exactly once: by [`Connection::close`] or,
/// failing that, when it is dropped.
pub struct Connection {
    pub(crate) db: Arc<Database>,
    closed: bool,
}

impl Connection {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        db.connection_opened();
        Self { db, closed: false }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        self.db.name()
    }

    /// Current schema version.
    pub fn version(&self) -> u32 {
        self.db.state.read().version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.db.state.read().object_store_names()
    }

    pub fn stats(&self) -> DatabaseStats {
        self.db.state.read().stats()
    }

    /// Start a transaction over the named object stores.
    ///
    /// Every name must exist. Blocks while a conflicting transaction on
    /// the same database is running.
    pub fn transaction(&self, scope: &[&str], mode: TransactionMode) -> Result<Transaction<'_>> {
        if mode == TransactionMode::VersionChange {
            return Err(StoreError::InvalidOperation(
                "version change transactions are only started by an upgrade".into(),
            ));
        }
        let scope = scope.iter().map(|s| s.to_string()).collect();
        Transaction::begin(&self.db, scope, mode)
    }

    /// Close the connection.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.db.connection_closed();
            tracing::debug!(database = self.db.name(), "connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.db.name())
            .field("closed", &self.closed)
            .finish()
    }
}
