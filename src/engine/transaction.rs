//! Transactions and object store handles.
//!
//! Read-only transactions share the database; read-write and
//! version-change transactions hold it exclusively for their whole
//! lifetime. Writes apply in place and are recorded twice: as WAL
//! mutations (made durable on commit) and as undo steps (replayed in
//! reverse on abort). Dropping an uncommitted transaction aborts it.

use crate::engine::database::Database;
use crate::engine::state::DatabaseState;
use crate::error::{Result, StoreError};
use crate::records::{ObjectStoreData, SecondaryIndex};
use crate::types::{IndexParams, Key, ObjectStoreParams, Record, TransactionMode};
use crate::wal::Mutation;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

enum Access<'c> {
    Read(RwLockReadGuard<'c, DatabaseState>),
    Write(RwLockWriteGuard<'c, DatabaseState>),
}

/// How to reverse one applied change.
enum Undo {
    Version(u32),
    Record {
        store: String,
        key: Key,
        previous: Option<Record>,
    },
    Generator {
        store: String,
        previous: Option<i64>,
    },
    Store {
        name: String,
        previous: Option<ObjectStoreData>,
    },
    Index {
        store: String,
        name: String,
    },
}

/// A transaction over one or more object stores of a database.
pub struct Transaction<'c> {
    db: &'c Database,
    mode: TransactionMode,
    scope: Vec<String>,
    access: Access<'c>,
    mutations: Vec<Mutation>,
    undo: Vec<Undo>,
    finished: bool,
}

impl<'c> Transaction<'c> {
    /// Start a transaction, waiting for conflicting transactions to finish.
    ///
    /// Version-change transactions ignore `scope` and cover every store.
    pub(crate) fn begin(db: &'c Database, scope: Vec<String>, mode: TransactionMode) -> Result<Self> {
        let access = if mode.is_write() {
            Access::Write(db.state.write())
        } else {
            Access::Read(db.state.read())
        };

        let txn = Self {
            db,
            mode,
            scope,
            access,
            mutations: Vec::new(),
            undo: Vec::new(),
            finished: false,
        };

        if mode != TransactionMode::VersionChange {
            if txn.scope.is_empty() {
                return Err(StoreError::InvalidOperation(
                    "transaction scope is empty".into(),
                ));
            }
            for name in &txn.scope {
                txn.state().store(name)?;
            }
        }

        Ok(txn)
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Object stores this transaction may touch.
    pub fn scope(&self) -> Vec<String> {
        match self.mode {
            TransactionMode::VersionChange => self.state().object_store_names(),
            _ => self.scope.clone(),
        }
    }

    /// Get a handle to an object store in scope.
    pub fn object_store(&mut self, name: &str) -> Result<ObjectStore<'_, 'c>> {
        if self.mode != TransactionMode::VersionChange && !self.scope.iter().any(|s| s == name) {
            return Err(StoreError::NotInScope(name.to_string()));
        }
        self.state().store(name)?;
        Ok(ObjectStore {
            txn: self,
            name: name.to_string(),
        })
    }

    /// Commit: make every change durable and visible.
    ///
    /// If persisting fails, the changes are rolled back and the error
    /// returned.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.mutations.is_empty() {
            return Ok(());
        }

        let mutations = std::mem::take(&mut self.mutations);
        let count = mutations.len();
        match self.db.persist(mutations, self.state()) {
            Ok(()) => {
                self.undo.clear();
                tracing::debug!(database = self.db.name(), mutations = count, "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Abort: undo every change made by this transaction.
    pub fn abort(mut self) {
        self.finished = true;
        self.rollback();
    }

    pub(crate) fn state(&self) -> &DatabaseState {
        match &self.access {
            Access::Read(guard) => &**guard,
            Access::Write(guard) => &**guard,
        }
    }

    fn state_mut(&mut self) -> Result<&mut DatabaseState> {
        match &mut self.access {
            Access::Read(_) => Err(StoreError::ReadOnly),
            Access::Write(guard) => Ok(&mut **guard),
        }
    }

    fn require_version_change(&self, what: &str) -> Result<()> {
        if self.mode != TransactionMode::VersionChange {
            return Err(StoreError::InvalidOperation(format!(
                "{} is only allowed during an upgrade",
                what
            )));
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.mutations.clear();
        let undo = std::mem::take(&mut self.undo);
        if undo.is_empty() {
            return;
        }
        let Access::Write(state) = &mut self.access else {
            return;
        };

        tracing::debug!(database = self.db.name(), steps = undo.len(), "rolling back transaction");
        for step in undo.into_iter().rev() {
            match step {
                Undo::Version(version) => state.version = version,
                Undo::Record {
                    store,
                    key,
                    previous,
                } => {
                    if let Some(data) = state.stores.get_mut(&store) {
                        match previous {
                            Some(record) => {
                                data.insert_record(key, record);
                            }
                            None => {
                                data.remove_record(&key);
                            }
                        }
                    }
                }
                Undo::Generator { store, previous } => {
                    if let Some(data) = state.stores.get_mut(&store) {
                        data.set_key_generator(previous);
                    }
                }
                Undo::Store { name, previous } => match previous {
                    Some(data) => {
                        state.stores.insert(name, data);
                    }
                    None => {
                        state.stores.remove(&name);
                    }
                },
                Undo::Index { store, name } => {
                    if let Some(data) = state.stores.get_mut(&store) {
                        data.remove_index(&name);
                    }
                }
            }
        }
    }

    // --- Write primitives ---

    /// Add (`overwrite == false`) or put a record.
    fn write(&mut self, store: &str, mut value: Record, key: Option<Key>, overwrite: bool) -> Result<Key> {
        let data = self.state_mut()?.store_mut(store)?;

        let derived = data.derive_key(&value, key)?;
        if !overwrite && data.contains(&derived.key) {
            return Err(StoreError::ConstraintViolation {
                store: store.to_string(),
                key: derived.key,
            });
        }
        if derived.inject {
            data.inject_key(&mut value, &derived.key);
        }
        if let Some((index, index_key)) = data.unique_conflict(&derived.key, &value) {
            return Err(StoreError::ConstraintViolation {
                store: format!("{}.{}", store, index),
                key: index_key,
            });
        }

        let encoded = serde_json::to_vec(&value)?;
        let previous_generator = data.key_generator();
        if let Some(next) = derived.next_generator {
            data.set_key_generator(Some(next));
        }
        let previous = data.insert_record(derived.key.clone(), value);

        if let Some(next) = derived.next_generator {
            self.undo.push(Undo::Generator {
                store: store.to_string(),
                previous: previous_generator,
            });
            self.mutations.push(Mutation::SetKeyGenerator {
                store: store.to_string(),
                next,
            });
        }
        self.undo.push(Undo::Record {
            store: store.to_string(),
            key: derived.key.clone(),
            previous,
        });
        self.mutations.push(Mutation::Put {
            store: store.to_string(),
            key: derived.key.clone(),
            value: encoded,
        });

        Ok(derived.key)
    }

    fn delete(&mut self, store: &str, key: &Key) -> Result<()> {
        let data = self.state_mut()?.store_mut(store)?;

        // Deleting an absent key is a no-op.
        if let Some(previous) = data.remove_record(key) {
            self.undo.push(Undo::Record {
                store: store.to_string(),
                key: key.clone(),
                previous: Some(previous),
            });
            self.mutations.push(Mutation::Delete {
                store: store.to_string(),
                key: key.clone(),
            });
        }
        Ok(())
    }

    fn clear(&mut self, store: &str) -> Result<()> {
        let data = self.state_mut()?.store_mut(store)?;
        let previous = data.clone();
        data.clear();

        self.undo.push(Undo::Store {
            name: store.to_string(),
            previous: Some(previous),
        });
        self.mutations.push(Mutation::Clear {
            store: store.to_string(),
        });
        Ok(())
    }

    pub(crate) fn create_store(&mut self, name: &str, params: ObjectStoreParams) -> Result<()> {
        self.require_version_change("creating an object store")?;
        let state = self.state_mut()?;
        if state.stores.contains_key(name) {
            return Err(StoreError::ObjectStoreExists(name.to_string()));
        }
        state
            .stores
            .insert(name.to_string(), ObjectStoreData::new(params.clone()));

        self.undo.push(Undo::Store {
            name: name.to_string(),
            previous: None,
        });
        self.mutations.push(Mutation::CreateStore {
            name: name.to_string(),
            params,
        });
        Ok(())
    }

    pub(crate) fn delete_store(&mut self, name: &str) -> Result<()> {
        self.require_version_change("deleting an object store")?;
        let previous = self
            .state_mut()?
            .stores
            .remove(name)
            .ok_or_else(|| StoreError::ObjectStoreNotFound(name.to_string()))?;

        self.undo.push(Undo::Store {
            name: name.to_string(),
            previous: Some(previous),
        });
        self.mutations.push(Mutation::DeleteStore {
            name: name.to_string(),
        });
        Ok(())
    }

    fn create_index(&mut self, store: &str, name: &str, params: IndexParams) -> Result<()> {
        self.require_version_change("creating an index")?;
        self.state_mut()?
            .store_mut(store)?
            .create_index(name, params.clone())?;

        self.undo.push(Undo::Index {
            store: store.to_string(),
            name: name.to_string(),
        });
        self.mutations.push(Mutation::CreateIndex {
            store: store.to_string(),
            name: name.to_string(),
            params,
        });
        Ok(())
    }

    pub(crate) fn set_version(&mut self, version: u32) -> Result<()> {
        self.require_version_change("changing the version")?;
        let state = self.state_mut()?;
        let previous = state.version;
        state.version = version;

        self.undo.push(Undo::Version(previous));
        self.mutations.push(Mutation::SetVersion(version));
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}

/// An object store, seen through a transaction.
pub struct ObjectStore<'t, 'c> {
    txn: &'t mut Transaction<'c>,
    name: String,
}

impl<'t, 'c> ObjectStore<'t, 'c> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a new record. Fails with [`StoreError::ConstraintViolation`]
    /// if the key is already taken.
    pub fn add(&mut self, value: Record, key: Option<Key>) -> Result<Key> {
        self.txn.write(&self.name, value, key, false)
    }

    /// Insert or overwrite a record.
    pub fn put(&mut self, value: Record, key: Option<Key>) -> Result<Key> {
        self.txn.write(&self.name, value, key, true)
    }

    pub fn get(&self, key: &Key) -> Result<Option<Record>> {
        Ok(self.data()?.get(key).cloned())
    }

    /// Every record, in ascending key order.
    pub fn get_all(&self) -> Result<Vec<Record>> {
        Ok(self.data()?.iter().map(|(_, r)| r.clone()).collect())
    }

    /// Every key, in ascending order.
    pub fn get_all_keys(&self) -> Result<Vec<Key>> {
        Ok(self.data()?.iter().map(|(k, _)| k.clone()).collect())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.data()?.len())
    }

    /// Remove the record at `key`, if any.
    pub fn delete(&mut self, key: &Key) -> Result<()> {
        self.txn.delete(&self.name, key)
    }

    /// Remove every record.
    pub fn clear(&mut self) -> Result<()> {
        self.txn.clear(&self.name)
    }

    pub fn params(&self) -> Result<ObjectStoreParams> {
        Ok(self.data()?.params().clone())
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        Ok(self.data()?.index_names())
    }

    /// Create a secondary index. Only allowed during an upgrade.
    pub fn create_index(&mut self, name: &str, params: IndexParams) -> Result<()> {
        self.txn.create_index(&self.name, name, params)
    }

    /// Look up a secondary index by name.
    pub fn index(&self, name: &str) -> Result<IndexHandle<'_>> {
        let store = self.data()?;
        let index = store
            .index(name)
            .ok_or_else(|| StoreError::IndexNotFound(name.to_string()))?;
        Ok(IndexHandle { store, index })
    }

    fn data(&self) -> Result<&ObjectStoreData> {
        self.txn.state().store(&self.name)
    }
}

/// Read access to a secondary index.
pub struct IndexHandle<'a> {
    store: &'a ObjectStoreData,
    index: &'a SecondaryIndex,
}

impl IndexHandle<'_> {
    /// Primary key of the first record whose indexed field equals `key`.
    pub fn get_key(&self, key: &Key) -> Option<Key> {
        self.index.get(key).cloned()
    }

    /// First record whose indexed field equals `key`.
    pub fn get(&self, key: &Key) -> Option<Record> {
        self.index
            .get(key)
            .and_then(|primary| self.store.get(primary))
            .cloned()
    }

    /// Every record whose indexed field equals `key`, in primary key order.
    pub fn get_all(&self, key: &Key) -> Vec<Record> {
        self.index
            .get_all(key)
            .iter()
            .filter_map(|primary| self.store.get(primary).cloned())
            .collect()
    }

    /// Number of indexed records.
    pub fn count(&self) -> usize {
        self.index.len()
    }
}
