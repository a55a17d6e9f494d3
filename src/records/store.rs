//! In-memory contents of a single object store.

use crate::error::{Result, StoreError};
use crate::types::{IndexParams, Key, ObjectStoreParams, Record};
use std::collections::BTreeMap;

use super::{extract_path, insert_path, SecondaryIndex};

/// Largest key a generator hands out. Past it the generator is exhausted.
pub const MAX_GENERATED_KEY: i64 = 1 << 53;

/// Key chosen for a write, plus the key generator change it implies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: Key,

    /// New generator value, if the write moves the generator.
    pub next_generator: Option<i64>,

    /// The key was generated and must be written into the record's key path.
    pub inject: bool,
}

/// Records of one object store, ordered by primary key.
#[derive(Clone, Debug)]
pub struct ObjectStoreData {
    params: ObjectStoreParams,

    records: BTreeMap<Key, Record>,

    /// Next generated key (only for auto-increment stores).
    key_generator: Option<i64>,

    indexes: BTreeMap<String, SecondaryIndex>,
}

impl ObjectStoreData {
    /// Create an empty store.
    pub fn new(params: ObjectStoreParams) -> Self {
        let key_generator = params.auto_increment.then_some(1);
        Self {
            params,
            records: BTreeMap::new(),
            key_generator,
            indexes: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> &ObjectStoreParams {
        &self.params
    }

    pub fn key_generator(&self) -> Option<i64> {
        self.key_generator
    }

    pub fn set_key_generator(&mut self, next: Option<i64>) {
        self.key_generator = next;
    }

    pub fn get(&self, key: &Key) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.records.contains_key(key)
    }

    /// Iterate records in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Record)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.indexes.get(name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub fn indexes(&self) -> impl Iterator<Item = (&String, &SecondaryIndex)> {
        self.indexes.iter()
    }

    /// Decide the primary key for a write.
    ///
    /// In-line stores (with a key path) take the key from the record and
    /// reject an explicit key. Otherwise the explicit key is used. When
    /// neither yields a key, the key generator supplies one.
    pub fn derive_key(&self, value: &Record, explicit: Option<Key>) -> Result<DerivedKey> {
        match (&self.params.key_path, explicit) {
            (Some(path), Some(_)) => Err(StoreError::DataError(format!(
                "explicit key supplied to a store with key path '{}'",
                path
            ))),
            (Some(path), None) => match extract_path(value, path) {
                Some(v) => {
                    let key = Key::from_value(v)?;
                    Ok(DerivedKey {
                        next_generator: self.bumped_generator(&key),
                        key,
                        inject: false,
                    })
                }
                None => self.generate_key(true),
            },
            (None, Some(key)) => Ok(DerivedKey {
                next_generator: self.bumped_generator(&key),
                key,
                inject: false,
            }),
            (None, None) => self.generate_key(false),
        }
    }

    fn generate_key(&self, inject: bool) -> Result<DerivedKey> {
        match self.key_generator {
            Some(next) if next > MAX_GENERATED_KEY => Err(StoreError::KeyGeneratorExhausted),
            Some(next) => Ok(DerivedKey {
                key: Key::Int(next),
                next_generator: Some(next + 1),
                inject,
            }),
            None => Err(StoreError::DataError(
                "no key supplied and the store has no key generator".into(),
            )),
        }
    }

    /// An explicit integer key at or past the generator moves it forward,
    /// never beyond the exhausted state.
    fn bumped_generator(&self, key: &Key) -> Option<i64> {
        match (self.key_generator, key.as_int()) {
            (Some(next), Some(k)) if k >= next => {
                let bumped = k.min(MAX_GENERATED_KEY) + 1;
                (bumped != next).then_some(bumped)
            }
            _ => None,
        }
    }

    /// Write a generated key into the record at the store's key path.
    pub fn inject_key(&self, value: &mut Record, key: &Key) {
        if let Some(path) = &self.params.key_path {
            insert_path(value, path, key.to_value());
        }
    }

    /// The first unique index `record` would violate, as (index, index key).
    pub fn unique_conflict(&self, key: &Key, record: &Record) -> Option<(String, Key)> {
        self.indexes
            .iter()
            .find_map(|(name, index)| index.conflict(key, record).map(|k| (name.clone(), k)))
    }

    /// Insert or overwrite a record, keeping indexes in step.
    ///
    /// Returns the previous record at `key`.
    pub fn insert_record(&mut self, key: Key, record: Record) -> Option<Record> {
        let previous = self.remove_record(&key);
        for index in self.indexes.values_mut() {
            index.insert(&key, &record);
        }
        self.records.insert(key, record);
        previous
    }

    /// Remove a record, keeping indexes in step.
    pub fn remove_record(&mut self, key: &Key) -> Option<Record> {
        let previous = self.records.remove(key)?;
        for index in self.indexes.values_mut() {
            index.remove(key, &previous);
        }
        Some(previous)
    }

    /// Create an index and populate it from existing records.
    pub fn create_index(&mut self, name: &str, params: IndexParams) -> Result<()> {
        if self.indexes.contains_key(name) {
            return Err(StoreError::IndexExists(name.to_string()));
        }

        let mut index = SecondaryIndex::new(params);
        for (key, record) in &self.records {
            if index.conflict(key, record).is_some() {
                return Err(StoreError::InvalidOperation(format!(
                    "existing records violate unique index '{}'",
                    name
                )));
            }
            index.insert(key, record);
        }

        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    pub fn remove_index(&mut self, name: &str) -> Option<SecondaryIndex> {
        self.indexes.remove(name)
    }

    /// Remove every record. The key generator is left untouched.
    pub fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }
}
