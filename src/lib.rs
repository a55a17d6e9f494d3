//! # Record Store Client
//!
//! A small CRUD layer over an embedded, versioned, transactional record
//! store.
//!
//! ## Core Concepts
//!
//! - **Engine**: holds named, versioned databases on disk (or in memory)
//! - **Open requests**: pending connections that run a schema upgrade hook
//!   when opened at a newer version
//! - **Transactions**: scoped to object stores, read-only or read-write,
//!   with a single writer per database
//! - **Client**: five operations (insert one, read all, read one, update
//!   one, delete one) that each provision their collection, run in their
//!   own transaction and close their connection
//!
//! ## Example
//!
//! ```ignore
//! use record_store_client::{Engine, EngineConfig, RecordStoreClient};
//! use serde_json::json;
//!
//! let engine = Engine::open_or_create(EngineConfig {
//!     path: "./my-store".into(),
//!     ..Default::default()
//! })?;
//! let client = RecordStoreClient::new();
//!
//! let record = json!({"name": "a"}).as_object().cloned().unwrap();
//! let key = client.insert_one(engine.open_database("dummyDB", 1), record, "items")?;
//! let found = client.read_one(engine.open_database("dummyDB", 1), "items", key)?;
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod records;
pub mod types;
pub mod wal;

// Re-exports
pub use client::{
    delete_one, insert_one, read_all, read_one, update_one, ClientConfig, Completion, Operation,
    OperationKind, Outcome, RecordStoreClient,
};
pub use engine::{
    Connection, Engine, EngineConfig, IndexHandle, ObjectStore, OpenRequest, Transaction,
    VersionChange,
};
pub use error::{Result, StoreError};
pub use records::{ObjectStoreData, SecondaryIndex};
pub use types::*;
pub use wal::{Mutation, WalEntry, WriteAheadLog};
