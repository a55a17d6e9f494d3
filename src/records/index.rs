//! Secondary indexes over object store records.

use crate::types::{IndexParams, Key, Record};
use std::collections::{BTreeMap, BTreeSet};

use super::extract_path;

/// Index mapping a record field's value to the primary keys holding it.
///
/// Entries are derived from record data and rebuilt on load; only the
/// index definition is persisted.
#[derive(Clone, Debug)]
pub struct SecondaryIndex {
    params: IndexParams,

    /// Index key -> primary keys.
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl SecondaryIndex {
    /// Create an empty index.
    pub fn new(params: IndexParams) -> Self {
        Self {
            params,
            entries: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// The index key for a record, if its field holds a valid key.
    ///
    /// Records without the field (or with a non-key value) are not indexed.
    pub fn index_key(&self, record: &Record) -> Option<Key> {
        extract_path(record, &self.params.key_path).and_then(|v| Key::from_value(v).ok())
    }

    /// Add a record to the index.
    pub fn insert(&mut self, primary: &Key, record: &Record) {
        if let Some(key) = self.index_key(record) {
            self.entries.entry(key).or_default().insert(primary.clone());
        }
    }

    /// Remove a record from the index.
    pub fn remove(&mut self, primary: &Key, record: &Record) {
        if let Some(key) = self.index_key(record) {
            if let Some(primaries) = self.entries.get_mut(&key) {
                primaries.remove(primary);
                if primaries.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// For unique indexes, return the index key that `record` would clash on.
    ///
    /// A record may always keep its own index key when overwritten in place.
    pub fn conflict(&self, primary: &Key, record: &Record) -> Option<Key> {
        if !self.params.unique {
            return None;
        }
        let key = self.index_key(record)?;
        match self.entries.get(&key) {
            Some(primaries) if primaries.iter().any(|p| p != primary) => Some(key),
            _ => None,
        }
    }

    /// First primary key (in key order) whose record has this index key.
    pub fn get(&self, key: &Key) -> Option<&Key> {
        self.entries.get(key).and_then(|primaries| primaries.iter().next())
    }

    /// All primary keys whose records have this index key.
    pub fn get_all(&self, key: &Key) -> Vec<Key> {
        self.entries
            .get(key)
            .map(|primaries| primaries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
