//! Error types for the record store.

use crate::types::Key;
use thiserror::Error;

/// Main error type for engine and client operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Engine directory is locked by another process")]
    Locked,

    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Requested version {requested} is lower than the stored version {current}")]
    VersionError { requested: u32, current: u32 },

    #[error("Database version must be greater than zero")]
    InvalidVersion,

    #[error("Database {0} has open connections")]
    Blocked(String),

    #[error("Open request for {0} was already resolved")]
    RequestConsumed(String),

    #[error("Object store not found: {0}")]
    ObjectStoreNotFound(String),

    #[error("Object store already exists: {0}")]
    ObjectStoreExists(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexExists(String),

    #[error("Key already exists in {store}: {key}")]
    ConstraintViolation { store: String, key: Key },

    #[error("Key generator exhausted")]
    KeyGeneratorExhausted,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Transaction is read-only")]
    ReadOnly,

    #[error("Object store {0} is not in the transaction scope")]
    NotInScope(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Operation aborted: {0}")]
    Aborted(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
