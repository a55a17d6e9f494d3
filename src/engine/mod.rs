//! The embedded storage engine.
//!
//! Databases are named and versioned. A caller asks for a connection with
//! [`Engine::open_database`], which returns a pending [`OpenRequest`]. Resolving
//! the request runs the schema upgrade hook when the requested version is
//! newer than the stored one, then yields a [`Connection`]. Connections open
//! [`Transaction`]s scoped to object stores, and object stores take the
//! single-record operations.

mod connection;
mod database;
mod request;
mod snapshot;
mod state;
mod transaction;

pub use connection::Connection;
pub use request::{OpenRequest, VersionChange};
pub use transaction::{IndexHandle, ObjectStore, Transaction};

use crate::error::{Result, StoreError};
use crate::types::DatabaseStats;
use database::{file_paths, Database, SNAPSHOT_EXT, WAL_EXT};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directory holding every database of this engine.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Snapshot a database and truncate its WAL after this many commits
    /// (0 = only on explicit [`Engine::checkpoint`]).
    pub checkpoint_interval: u64,

    /// fsync the WAL on every commit.
    pub sync_on_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./record-store"),
            create_if_missing: true,
            checkpoint_interval: 1000,
            sync_on_commit: true,
        }
    }
}

/// Magic bytes for the engine manifest.
const ENGINE_MAGIC: &[u8; 4] = b"RSE\0";

/// Current engine format version.
const ENGINE_VERSION: u8 = 1;

struct EngineInner {
    config: EngineConfig,

    /// `None` for in-memory engines.
    root: Option<PathBuf>,

    /// Lock file for exclusive access.
    _lock_file: Option<File>,

    /// Databases loaded so far, by name.
    databases: Mutex<HashMap<String, Arc<Database>>>,
}

/// Handle to an engine. Cloning is cheap and shares the same databases.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Open an existing engine directory or create a new one.
    pub fn open_or_create(config: EngineConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new engine directory.
    pub fn create(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        tracing::debug!(path = %config.path.display(), "created engine");
        Ok(Self::from_parts(config, lock_file))
    }

    /// Open an existing engine directory.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        tracing::debug!(path = %config.path.display(), "opened engine");
        Ok(Self::from_parts(config, lock_file))
    }

    /// An engine that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: EngineConfig::default(),
                root: None,
                _lock_file: None,
                databases: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn from_parts(config: EngineConfig, lock_file: File) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                root: Some(config.path.clone()),
                config,
                _lock_file: Some(lock_file),
                databases: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a pending request to open `name` at `version`.
    ///
    /// Nothing is read or written until the request is resolved.
    pub fn open_database(&self, name: impl Into<String>, version: u32) -> OpenRequest {
        OpenRequest::new(self.clone(), name.into(), version)
    }

    /// Names of every database that has been created (version > 0).
    pub fn database_names(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();

        for (name, db) in self.inner.databases.lock().iter() {
            if db.state.read().version > 0 {
                names.insert(name.clone());
            }
        }

        if let Some(root) = &self.inner.root {
            for entry in fs::read_dir(root)? {
                let path = entry?.path();
                let is_db_file = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == SNAPSHOT_EXT || e == WAL_EXT);
                if !is_db_file {
                    continue;
                }
                let decoded = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| hex::decode(s).ok())
                    .and_then(|bytes| String::from_utf8(bytes).ok());
                if let Some(name) = decoded {
                    names.insert(name);
                }
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Delete a database and its files.
    ///
    /// Deleting a database that doesn't exist succeeds. Fails with
    /// [`StoreError::Blocked`] while connections to it are open.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        let mut databases = self.inner.databases.lock();

        if let Some(db) = databases.get(name) {
            if db.open_connections() > 0 {
                return Err(StoreError::Blocked(name.to_string()));
            }
            db.remove_files()?;
            databases.remove(name);
        } else if let Some(root) = &self.inner.root {
            let (snapshot_path, wal_path) = file_paths(root, name);
            for path in [snapshot_path, wal_path] {
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
        }

        tracing::debug!(database = name, "deleted database");
        Ok(())
    }

    /// Snapshot every loaded database and truncate their WALs.
    pub fn checkpoint(&self) -> Result<()> {
        let databases: Vec<Arc<Database>> =
            self.inner.databases.lock().values().cloned().collect();
        for db in databases {
            db.checkpoint()?;
        }
        Ok(())
    }

    /// Statistics for a database, or `None` if it was never created.
    pub fn database_stats(&self, name: &str) -> Result<Option<DatabaseStats>> {
        let db = self.database(name)?;
        let state = db.state.read();
        if state.version == 0 {
            return Ok(None);
        }
        Ok(Some(state.stats()))
    }

    /// Directory of a file-backed engine.
    pub fn path(&self) -> Option<&Path> {
        self.inner.root.as_deref()
    }

    /// Get a loaded database, loading it on first use.
    pub(crate) fn database(&self, name: &str) -> Result<Arc<Database>> {
        let mut databases = self.inner.databases.lock();
        if let Some(db) = databases.get(name) {
            return Ok(Arc::clone(db));
        }

        let db = match &self.inner.root {
            Some(root) => Database::load(name, root, &self.inner.config)?,
            None => Database::in_memory(name),
        };
        let db = Arc::new(db);
        databases.insert(name.to_string(), Arc::clone(&db));
        Ok(db)
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(ENGINE_MAGIC)?;
        file.write_all(&[ENGINE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENGINE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid engine magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENGINE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported engine version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.inner.root)
            .finish_non_exhaustive()
    }
}
