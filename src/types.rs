//! Core types for the record store.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stored record: an arbitrary mapping of field names to values.
pub type Record = serde_json::Map<String, Value>;

/// Primary key of a record within an object store.
///
/// Integer keys sort before string keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Convert a JSON value into a key.
    ///
    /// Only integers (or floats with no fractional part) and strings are
    /// valid keys.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Key::Int(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                        Ok(Key::Int(f as i64))
                    }
                    _ => Err(StoreError::InvalidKey(format!("unsupported number {}", n))),
                }
            }
            Value::String(s) => Ok(Key::Text(s.clone())),
            other => Err(StoreError::InvalidKey(format!("{} is not a valid key", other))),
        }
    }

    /// Convert back to a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Text(_) => None,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "Key({})", i),
            Key::Text(s) => write!(f, "Key({:?})", s),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

/// Transaction access mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    /// Schema upgrade; only reachable through an open request.
    VersionChange,
}

impl TransactionMode {
    pub fn is_write(self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

/// Parameters for a new object store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreParams {
    /// Assign 1, 2, 3, ... when no key is supplied.
    pub auto_increment: bool,

    /// Field of the record holding its key (in-line keys).
    pub key_path: Option<String>,
}

impl ObjectStoreParams {
    pub fn auto_increment() -> Self {
        Self {
            auto_increment: true,
            key_path: None,
        }
    }
}

/// Parameters for a secondary index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Record field the index is keyed by.
    pub key_path: String,

    /// Reject writes that would map two records to one index key.
    pub unique: bool,
}

impl IndexParams {
    pub fn on(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            unique: false,
        }
    }
}

/// Lifecycle of an open request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    UpgradeNeeded,
    Success,
    Error,
}

/// Database statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub version: u32,
    pub object_store_count: u64,
    pub index_count: u64,
    pub record_count: u64,
}

/// Milliseconds since Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
