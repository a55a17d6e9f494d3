//! Logical contents of one database.

use crate::error::{Result, StoreError};
use crate::records::ObjectStoreData;
use crate::types::{DatabaseStats, Record};
use crate::wal::Mutation;
use std::collections::BTreeMap;

/// Schema version plus every object store of a database.
#[derive(Clone, Debug, Default)]
pub struct DatabaseState {
    /// Zero until the first successful upgrade.
    pub version: u32,
    pub stores: BTreeMap<String, ObjectStoreData>,
}

impl DatabaseState {
    pub fn store(&self, name: &str) -> Result<&ObjectStoreData> {
        self.stores
            .get(name)
            .ok_or_else(|| StoreError::ObjectStoreNotFound(name.to_string()))
    }

    pub fn store_mut(&mut self, name: &str) -> Result<&mut ObjectStoreData> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| StoreError::ObjectStoreNotFound(name.to_string()))
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Re-apply a logged mutation (used during recovery).
    pub fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::SetVersion(version) => self.version = *version,
            Mutation::CreateStore { name, params } => {
                if self.stores.contains_key(name) {
                    return Err(StoreError::ObjectStoreExists(name.clone()));
                }
                self.stores
                    .insert(name.clone(), ObjectStoreData::new(params.clone()));
            }
            Mutation::DeleteStore { name } => {
                self.stores
                    .remove(name)
                    .ok_or_else(|| StoreError::ObjectStoreNotFound(name.clone()))?;
            }
            Mutation::CreateIndex {
                store,
                name,
                params,
            } => self.store_mut(store)?.create_index(name, params.clone())?,
            Mutation::Put { store, key, value } => {
                let record: Record = serde_json::from_slice(value)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                self.store_mut(store)?.insert_record(key.clone(), record);
            }
            Mutation::Delete { store, key } => {
                self.store_mut(store)?.remove_record(key);
            }
            Mutation::Clear { store } => self.store_mut(store)?.clear(),
            Mutation::SetKeyGenerator { store, next } => {
                self.store_mut(store)?.set_key_generator(Some(*next));
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            version: self.version,
            object_store_count: self.stores.len() as u64,
            index_count: self
                .stores
                .values()
                .map(|s| s.index_names().len() as u64)
                .sum(),
            record_count: self.stores.values().map(|s| s.len() as u64).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexParams, Key, ObjectStoreParams};

    #[test]
    fn test_apply_sequence() {
        let mut state = DatabaseState::default();
        let mutations = vec![
            Mutation::SetVersion(1),
            Mutation::CreateStore {
                name: "items".into(),
                params: ObjectStoreParams::auto_increment(),
            },
            Mutation::CreateIndex {
                store: "items".into(),
                name: "itemsIndex".into(),
                params: IndexParams::on("id"),
            },
            Mutation::Put {
                store: "items".into(),
                key: Key::from("a"),
                value: br#"{"id":"a","n":1}"#.to_vec(),
            },
            Mutation::SetKeyGenerator {
                store: "items".into(),
                next: 7,
            },
        ];
        for m in &mutations {
            state.apply(m).unwrap();
        }

        let store = state.store("items").unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.key_generator(), Some(7));
        assert_eq!(
            store.index("itemsIndex").unwrap().get(&Key::from("a")),
            Some(&Key::from("a"))
        );

        state
            .apply(&Mutation::Delete {
                store: "items".into(),
                key: Key::from("a"),
            })
            .unwrap();
        assert!(state.store("items").unwrap().is_empty());

        let stats = state.stats();
        assert_eq!(stats.object_store_count, 1);
        assert_eq!(stats.index_count, 1);
        assert_eq!(stats.record_count, 0);
    }

    #[test]
    fn test_apply_to_missing_store() {
        let mut state = DatabaseState::default();
        let result = state.apply(&Mutation::Clear {
            store: "nope".into(),
        });
        assert!(matches!(result, Err(StoreError::ObjectStoreNotFound(_))));
    }
}
