//! A loaded database: shared state, connection count and on-disk files.

use crate::engine::snapshot::{read_snapshot, write_snapshot};
use crate::engine::state::DatabaseState;
use crate::engine::EngineConfig;
use crate::error::{Result, StoreError};
use crate::wal::{Mutation, WriteAheadLog};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot file extension.
pub(crate) const SNAPSHOT_EXT: &str = "snap";

/// WAL file extension.
pub(crate) const WAL_EXT: &str = "wal";

/// Snapshot and WAL paths for a database name.
///
/// Names are hex-encoded so that any name maps to a safe file name and
/// can be recovered when listing.
pub(crate) fn file_paths(root: &Path, name: &str) -> (PathBuf, PathBuf) {
    let stem = hex::encode(name.as_bytes());
    (
        root.join(format!("{}.{}", stem, SNAPSHOT_EXT)),
        root.join(format!("{}.{}", stem, WAL_EXT)),
    )
}

/// Persistence for a directory-backed database.
struct DatabaseFiles {
    snapshot_path: PathBuf,
    wal_path: PathBuf,

    /// Created on the first commit.
    wal: Mutex<Option<WriteAheadLog>>,

    /// Last sequence folded into the snapshot found at load.
    snapshot_seq: u64,

    /// Commits since the last checkpoint.
    commits_since_checkpoint: Mutex<u64>,

    checkpoint_interval: u64,
    sync_on_commit: bool,
}

/// A database shared by every connection to it.
pub(crate) struct Database {
    name: String,

    /// Guarded by the engine's transaction rules: read-only transactions
    /// share it, read-write and version-change transactions hold it alone.
    pub(crate) state: RwLock<DatabaseState>,

    files: Option<DatabaseFiles>,

    connections: AtomicUsize,

    /// Held for the whole of an open request, upgrade included.
    opening: Mutex<()>,
}

impl Database {
    /// A database that lives only in memory.
    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(DatabaseState::default()),
            files: None,
            connections: AtomicUsize::new(0),
            opening: Mutex::new(()),
        }
    }

    /// Load a database from `root`, replaying its WAL over the last snapshot.
    ///
    /// A database with no files starts empty at version 0.
    pub fn load(name: &str, root: &Path, config: &EngineConfig) -> Result<Self> {
        let (snapshot_path, wal_path) = file_paths(root, name);

        let (mut state, snapshot_seq) = if snapshot_path.exists() {
            read_snapshot(&snapshot_path)?
        } else {
            (DatabaseState::default(), 0)
        };

        let mut replayed = 0u64;
        let wal = if wal_path.exists() {
            let (wal, entries) = WriteAheadLog::open(&wal_path, config.sync_on_commit, snapshot_seq)?;
            for entry in entries.iter().filter(|e| e.seq > snapshot_seq) {
                for mutation in &entry.mutations {
                    state.apply(mutation).map_err(|e| {
                        StoreError::Corruption(format!(
                            "replaying WAL entry {} of '{}': {}",
                            entry.seq, name, e
                        ))
                    })?;
                }
                replayed += 1;
            }
            Some(wal)
        } else {
            None
        };

        tracing::debug!(
            database = name,
            version = state.version,
            replayed,
            "loaded database"
        );

        Ok(Self {
            name: name.to_string(),
            state: RwLock::new(state),
            files: Some(DatabaseFiles {
                snapshot_path,
                wal_path,
                wal: Mutex::new(wal),
                snapshot_seq,
                commits_since_checkpoint: Mutex::new(replayed),
                checkpoint_interval: config.checkpoint_interval,
                sync_on_commit: config.sync_on_commit,
            }),
            connections: AtomicUsize::new(0),
            opening: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize open requests against this database.
    pub fn begin_open(&self) -> MutexGuard<'_, ()> {
        self.opening.lock()
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Make a transaction's mutations durable.
    ///
    /// `state` is the post-transaction state, still held under the
    /// transaction's write lock; it is used when a checkpoint falls due.
    pub fn persist(&self, mutations: Vec<Mutation>, state: &DatabaseState) -> Result<()> {
        let Some(files) = &self.files else {
            return Ok(());
        };

        let mut wal_slot = files.wal.lock();
        if wal_slot.is_none() {
            // Numbering continues past the snapshot, or replay would skip
            // the new entries.
            let (wal, _) =
                WriteAheadLog::open(&files.wal_path, files.sync_on_commit, files.snapshot_seq)?;
            *wal_slot = Some(wal);
        }
        let Some(wal) = wal_slot.as_ref() else {
            return Err(StoreError::NotInitialized);
        };

        let seq = wal.append(mutations)?;

        let mut commits = files.commits_since_checkpoint.lock();
        *commits += 1;
        if files.checkpoint_interval > 0 && *commits >= files.checkpoint_interval {
            // The commit is already durable in the WAL; a failed checkpoint
            // only means a longer replay next time.
            match write_snapshot(&files.snapshot_path, state, seq).and_then(|_| wal.clear()) {
                Ok(()) => {
                    tracing::debug!(database = %self.name, seq, "checkpoint written");
                    *commits = 0;
                }
                Err(e) => tracing::warn!(database = %self.name, "checkpoint failed: {}", e),
            }
        }

        Ok(())
    }

    /// Write a snapshot of the current state and truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(files) = &self.files else {
            return Ok(());
        };

        let state = self.state.read();
        let wal_slot = files.wal.lock();
        let Some(wal) = wal_slot.as_ref() else {
            // Nothing was ever committed.
            return Ok(());
        };

        write_snapshot(&files.snapshot_path, &state, wal.last_seq())?;
        wal.clear()?;
        *files.commits_since_checkpoint.lock() = 0;
        Ok(())
    }

    /// Remove this database's files.
    pub fn remove_files(&self) -> Result<()> {
        let Some(files) = &self.files else {
            return Ok(());
        };

        *files.wal.lock() = None;
        for path in [&files.snapshot_path, &files.wal_path] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
