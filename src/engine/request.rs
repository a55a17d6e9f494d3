//! Pending open requests and the schema upgrade hook.

use crate::engine::connection::Connection;
use crate::engine::transaction::{ObjectStore, Transaction};
use crate::engine::Engine;
use crate::error::{Result, StoreError};
use crate::types::{ObjectStoreParams, RequestState, TransactionMode};
use std::sync::Arc;

/// A pending request to open a database at a given version.
///
/// Created by [`Engine::open_database`]; nothing happens until it is
/// resolved, and it can be resolved only once.
pub struct OpenRequest {
    engine: Engine,
    name: String,
    version: u32,
    state: RequestState,
}

impl OpenRequest {
    pub(crate) fn new(engine: Engine, name: String, version: u32) -> Self {
        Self {
            engine,
            name,
            version,
            state: RequestState::Pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Open the database without an upgrade hook.
    pub fn resolve(&mut self) -> Result<Connection> {
        self.resolve_with(|_| Ok(()))
    }

    /// Open the database, running `on_upgrade` if the requested version is
    /// newer than the stored one.
    ///
    /// The hook runs inside a version-change transaction. If it returns an
    /// error, every change it made is rolled back, the stored version is
    /// left alone, and the error is returned.
    pub fn resolve_with<F>(&mut self, on_upgrade: F) -> Result<Connection>
    where
        F: FnOnce(&mut VersionChange<'_>) -> Result<()>,
    {
        if self.state != RequestState::Pending {
            return Err(StoreError::RequestConsumed(self.name.clone()));
        }

        let result = self.open(on_upgrade);
        self.state = match result {
            Ok(_) => RequestState::Success,
            Err(_) => RequestState::Error,
        };
        result
    }

    fn open<F>(&mut self, on_upgrade: F) -> Result<Connection>
    where
        F: FnOnce(&mut VersionChange<'_>) -> Result<()>,
    {
        if self.version == 0 {
            return Err(StoreError::InvalidVersion);
        }

        let db = self.engine.database(&self.name)?;

        // Opens of one database are serialized, so the version and the
        // connection count read here hold until this open completes.
        let _opening = db.begin_open();

        let current = db.state.read().version;
        if self.version < current {
            return Err(StoreError::VersionError {
                requested: self.version,
                current,
            });
        }
        if self.version == current {
            return Ok(Connection::new(Arc::clone(&db)));
        }

        self.state = RequestState::UpgradeNeeded;
        if db.open_connections() > 0 {
            return Err(StoreError::Blocked(self.name.clone()));
        }

        let connection = Connection::new(Arc::clone(&db));
        {
            let txn = Transaction::begin(&connection.db, Vec::new(), TransactionMode::VersionChange)?;
            let mut upgrade = VersionChange {
                txn,
                old_version: current,
                new_version: self.version,
            };
            upgrade.txn.set_version(self.version)?;
            on_upgrade(&mut upgrade)?;
            upgrade.txn.commit()?;
        }

        tracing::debug!(
            database = %self.name,
            version = self.version,
            "database upgraded"
        );
        Ok(connection)
    }
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("state", &self.state)
            .finish()
    }
}

/// The schema upgrade in progress, handed to the upgrade hook.
pub struct VersionChange<'c> {
    txn: Transaction<'c>,
    old_version: u32,
    new_version: u32,
}

impl<'c> VersionChange<'c> {
    /// Version before the upgrade (0 for a new database).
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.txn.state().object_store_names()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.txn.state().stores.contains_key(name)
    }

    /// Create an object store and return a handle to it.
    pub fn create_object_store(
        &mut self,
        name: &str,
        params: ObjectStoreParams,
    ) -> Result<ObjectStore<'_, 'c>> {
        self.txn.create_store(name, params)?;
        self.txn.object_store(name)
    }

    pub fn delete_object_store(&mut self, name: &str) -> Result<()> {
        self.txn.delete_store(name)
    }

    /// Handle to an existing object store.
    pub fn object_store(&mut self, name: &str) -> Result<ObjectStore<'_, 'c>> {
        self.txn.object_store(name)
    }
}
