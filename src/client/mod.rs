//! CRUD convenience layer over a single collection.
//!
//! Each operation takes a pending [`OpenRequest`] by value, provisions the
//! collection if an upgrade is needed, runs exactly one operation in its
//! own transaction and closes the connection, whether it succeeded or not.
//! Failures are logged and returned; nothing is retried.

mod dispatch;

pub use dispatch::{Completion, Operation, Outcome};

use crate::engine::{Connection, ObjectStore, OpenRequest, VersionChange};
use crate::error::Result;
use crate::types::{IndexParams, Key, ObjectStoreParams, Record, TransactionMode};
use serde_json::Value;
use uuid::Uuid;

/// Diagnostic logged when a database can't be opened.
pub const CONNECT_FAILURE: &str = "Something went wrong while trying to connect the database";

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Record field carrying the record's identifier.
    pub id_field: String,

    /// Secondary index name is `<collection><index_suffix>`.
    pub index_suffix: String,

    /// Create the identifier index alongside a new collection.
    pub create_index: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            index_suffix: "Index".to_string(),
            create_index: true,
        }
    }
}

/// The five client operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    InsertOne,
    ReadAll,
    ReadOne,
    UpdateOne,
    DeleteOne,
}

impl OperationKind {
    pub fn mode(self) -> TransactionMode {
        match self {
            OperationKind::ReadAll | OperationKind::ReadOne => TransactionMode::ReadOnly,
            _ => TransactionMode::ReadWrite,
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            OperationKind::InsertOne => "Data added successfully",
            OperationKind::ReadAll => "Read all data successfully",
            OperationKind::ReadOne => "Read one item from database",
            OperationKind::UpdateOne => "updated data successfully",
            OperationKind::DeleteOne => "Deleted one item from database",
        }
    }

    /// Reads log what they found alongside the success message.
    pub fn logs_result(self) -> bool {
        matches!(self, OperationKind::ReadAll | OperationKind::ReadOne)
    }

    pub fn failure_message(self) -> &'static str {
        match self {
            OperationKind::InsertOne => "Something went wrong while adding item",
            OperationKind::ReadAll | OperationKind::ReadOne => {
                "Something went wrong while getting data"
            }
            OperationKind::UpdateOne => "Something went wrong while updating item",
            OperationKind::DeleteOne => "Something went wrong while deleting data",
        }
    }
}

/// Performs one CRUD action against one collection, creating the
/// collection on upgrade if it is missing.
#[derive(Clone, Debug, Default)]
pub struct RecordStoreClient {
    config: ClientConfig,
}

impl RecordStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Name of the identifier index of `collection`.
    pub fn index_name(&self, collection: &str) -> String {
        format!("{}{}", collection, self.config.index_suffix)
    }

    /// Create `collection` (auto-increment keys) and its identifier index,
    /// unless it already exists.
    pub fn ensure_collection(&self, upgrade: &mut VersionChange<'_>, collection: &str) -> Result<()> {
        if upgrade.contains(collection) {
            return Ok(());
        }

        let index_name = self.index_name(collection);
        let mut store = upgrade.create_object_store(collection, ObjectStoreParams::auto_increment())?;
        if self.config.create_index {
            store.create_index(&index_name, IndexParams::on(self.config.id_field.as_str()))?;
        }

        tracing::debug!(collection, version = upgrade.new_version(), "collection created");
        Ok(())
    }

    /// Insert one record, keyed by its identifier.
    ///
    /// A record without an identifier gets a fresh UUID (v7, so ids
    /// generated by one process sort in creation order). Fails if the key
    /// is already taken.
    pub fn insert_one(&self, request: OpenRequest, mut record: Record, collection: &str) -> Result<Key> {
        if !record.contains_key(&self.config.id_field) {
            record.insert(
                self.config.id_field.clone(),
                Value::String(Uuid::now_v7().to_string()),
            );
        }
        let id_field = self.config.id_field.as_str();

        self.perform(request, collection, OperationKind::InsertOne, |store| {
            let key = record.get(id_field).map(Key::from_value).transpose()?;
            store.add(record, key)
        })
    }

    /// Every record of the collection, in key order.
    pub fn read_all(&self, request: OpenRequest, collection: &str) -> Result<Vec<Record>> {
        self.perform(request, collection, OperationKind::ReadAll, |store| store.get_all())
    }

    /// The record at `key`, or `None`.
    pub fn read_one(&self, request: OpenRequest, collection: &str, key: impl Into<Key>) -> Result<Option<Record>> {
        let key = key.into();
        self.perform(request, collection, OperationKind::ReadOne, |store| store.get(&key))
    }

    /// Overwrite (or create) the record at `key`.
    ///
    /// A record without an identifier gets `key` as its identifier.
    pub fn update_one(
        &self,
        request: OpenRequest,
        collection: &str,
        mut record: Record,
        key: impl Into<Key>,
    ) -> Result<()> {
        let key = key.into();
        if !record.contains_key(&self.config.id_field) {
            record.insert(self.config.id_field.clone(), key.to_value());
        }

        self.perform(request, collection, OperationKind::UpdateOne, |store| {
            store.put(record, Some(key)).map(|_| ())
        })
    }

    /// Remove the record at `key`. Removing an absent key is not an error.
    pub fn delete_one(&self, request: OpenRequest, collection: &str, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        self.perform(request, collection, OperationKind::DeleteOne, |store| store.delete(&key))
    }

    /// Open the connection, run `op` in one transaction, log, close.
    fn perform<T, F>(&self, mut request: OpenRequest, collection: &str, kind: OperationKind, op: F) -> Result<T>
    where
        T: std::fmt::Debug,
        F: FnOnce(&mut ObjectStore<'_, '_>) -> Result<T>,
    {
        let connection = request
            .resolve_with(|upgrade| self.ensure_collection(upgrade, collection))
            .map_err(|e| {
                tracing::error!(database = request.name(), error = %e, "{}", CONNECT_FAILURE);
                e
            })?;

        let result = Self::run(&connection, collection, kind.mode(), op);
        match &result {
            Ok(value) if kind.logs_result() => {
                tracing::debug!(collection, result = ?value, "{}", kind.success_message())
            }
            Ok(_) => tracing::debug!(collection, "{}", kind.success_message()),
            Err(e) => tracing::error!(collection, error = %e, "{}", kind.failure_message()),
        }

        connection.close();
        result
    }

    fn run<T, F>(connection: &Connection, collection: &str, mode: TransactionMode, op: F) -> Result<T>
    where
        F: FnOnce(&mut ObjectStore<'_, '_>) -> Result<T>,
    {
        let mut txn = connection.transaction(&[collection], mode)?;
        let value = {
            let mut store = txn.object_store(collection)?;
            op(&mut store)?
        };
        txn.commit()?;
        Ok(value)
    }
}

/// [`RecordStoreClient::insert_one`] with the default configuration.
pub fn insert_one(request: OpenRequest, record: Record, collection: &str) -> Result<Key> {
    RecordStoreClient::new().insert_one(request, record, collection)
}

/// [`RecordStoreClient::read_all`] with the default configuration.
pub fn read_all(request: OpenRequest, collection: &str) -> Result<Vec<Record>> {
    RecordStoreClient::new().read_all(request, collection)
}

/// [`RecordStoreClient::read_one`] with the default configuration.
pub fn read_one(request: OpenRequest, collection: &str, key: impl Into<Key>) -> Result<Option<Record>> {
    RecordStoreClient::new().read_one(request, collection, key)
}

/// [`RecordStoreClient::update_one`] with the default configuration.
pub fn update_one(request: OpenRequest, collection: &str, record: Record, key: impl Into<Key>) -> Result<()> {
    RecordStoreClient::new().update_one(request, collection, record, key)
}

/// [`RecordStoreClient::delete_one`] with the default configuration.
pub fn delete_one(request: OpenRequest, collection: &str, key: impl Into<Key>) -> Result<()> {
    RecordStoreClient::new().delete_one(request, collection, key)
}
