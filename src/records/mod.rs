//! Object store contents and their secondary indexes.
//!
//! Records are kept in primary key order so that full reads come back
//! sorted the same way the host engine sorts them.

mod index;
mod store;

pub use index::SecondaryIndex;
pub use store::{DerivedKey, ObjectStoreData};

use crate::types::Record;
use serde_json::Value;

/// Look up a (possibly dotted) field path in a record.
pub(crate) fn extract_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a (possibly dotted) field path, creating intermediate objects.
pub(crate) fn insert_path(record: &mut Record, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            record.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = record
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Record::new()));
            if !child.is_object() {
                *child = Value::Object(Record::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}
