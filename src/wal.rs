//! Write-Ahead Log of committed transactions.
//!
//! Every committed read-write or version-change transaction is appended as
//! one entry holding its mutations. Appending the entry (and syncing it)
//! is the commit point. On open, entries are replayed on top of the last
//! snapshot; a torn tail is cut off.

use crate::error::{Result, StoreError};
use crate::types::{now_millis, IndexParams, Key, ObjectStoreParams};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for WAL file.
const WAL_MAGIC: &[u8; 4] = b"WAL\0";

/// Current WAL format version.
const WAL_VERSION: u8 = 1;

/// Header size (magic + version).
const WAL_HEADER_SIZE: u64 = 5;

/// A single change to a database, as recorded in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    SetVersion(u32),
    CreateStore {
        name: String,
        params: ObjectStoreParams,
    },
    DeleteStore {
        name: String,
    },
    CreateIndex {
        store: String,
        name: String,
        params: IndexParams,
    },
    Put {
        store: String,
        key: Key,
        /// JSON-encoded record.
        value: Vec<u8>,
    },
    Delete {
        store: String,
        key: Key,
    },
    Clear {
        store: String,
    },
    SetKeyGenerator {
        store: String,
        next: i64,
    },
}

/// One committed transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonic sequence number, never reused across checkpoints.
    pub seq: u64,
    /// Commit time (milliseconds since epoch).
    pub timestamp: u64,
    pub mutations: Vec<Mutation>,
}

/// Write-Ahead Log manager.
pub struct WriteAheadLog {
    /// Path to the WAL file.
    path: PathBuf,
    /// Next sequence number.
    next_seq: Mutex<u64>,
    /// Append handle.
    writer: Mutex<BufWriter<File>>,
    /// fsync after every append.
    sync: bool,
}

impl WriteAheadLog {
    /// Create or open a WAL file, returning it along with every intact entry.
    ///
    /// `min_seq` is the last sequence already folded into a snapshot; new
    /// entries are numbered after it even if the log itself is empty.
    pub fn open(path: impl AsRef<Path>, sync: bool, min_seq: u64) -> Result<(Self, Vec<WalEntry>)> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Vec::new();

        if path.exists() {
            let file = OpenOptions::new().read(true).open(&path)?;
            let mut reader = BufReader::new(file);

            Self::read_header(&mut reader)?;

            let mut valid_len = WAL_HEADER_SIZE;
            loop {
                match Self::read_entry(&mut reader) {
                    Ok(Some((entry, len))) => {
                        valid_len += len;
                        entries.push(entry);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(
                            "discarding WAL tail of {} after offset {}: {}",
                            path.display(),
                            valid_len,
                            e
                        );
                        break;
                    }
                }
            }

            // Cut any torn tail so new entries follow the last good one.
            let file = OpenOptions::new().write(true).open(&path)?;
            if file.metadata()?.len() > valid_len {
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;

            file.write_all(WAL_MAGIC)?;
            file.write_all(&[WAL_VERSION])?;
            file.sync_all()?;
        }

        let max_seq = entries.iter().map(|e| e.seq).max().unwrap_or(0).max(min_seq);
        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        Ok((
            Self {
                path,
                next_seq: Mutex::new(max_seq + 1),
                writer: Mutex::new(writer),
                sync,
            },
            entries,
        ))
    }

    /// Append a committed transaction (returns its sequence number).
    pub fn append(&self, mutations: Vec<Mutation>) -> Result<u64> {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;

        let entry = WalEntry {
            seq,
            timestamp: now_millis(),
            mutations,
        };

        let mut writer = self.writer.lock();
        let start = writer.get_ref().metadata()?.len();
        let written = Self::write_entry(&mut writer, &entry).and_then(|_| {
            writer.flush()?;
            if self.sync {
                writer.get_ref().sync_all()?;
            }
            Ok(())
        });

        if let Err(e) = written {
            // A later append must not carry this entry's bytes to disk.
            if let Err(reset) = self.discard_since(&mut writer, start) {
                tracing::warn!("could not discard failed WAL append at {}: {}", start, reset);
            }
            return Err(e);
        }

        *next_seq += 1;
        Ok(seq)
    }

    /// Drop buffered bytes and cut the file back to `len`.
    fn discard_since(&self, writer: &mut BufWriter<File>, len: u64) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(len)?;
        let stale = std::mem::replace(writer, BufWriter::new(file));
        // into_parts hands back the buffer without flushing it.
        let _ = stale.into_parts();
        Ok(())
    }

    /// Sequence number of the most recent entry.
    pub fn last_seq(&self) -> u64 {
        *self.next_seq.lock() - 1
    }

    /// Drop all entries (called after a successful checkpoint).
    ///
    /// Sequence numbering continues where it left off.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;

        file.write_all(WAL_MAGIC)?;
        file.write_all(&[WAL_VERSION])?;
        file.sync_all()?;

        *writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);

        Ok(())
    }

    /// Size of the log file in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn read_header(reader: &mut BufReader<File>) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != WAL_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid WAL magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != WAL_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported WAL version: {}",
                version[0]
            )));
        }

        reader.seek(SeekFrom::Start(WAL_HEADER_SIZE))?;
        Ok(())
    }

    fn write_entry(writer: &mut BufWriter<File>, entry: &WalEntry) -> Result<()> {
        let encoded = rmp_serde::to_vec(entry)?;

        let len = encoded.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;

        let checksum = crc32fast::hash(&encoded);
        writer.write_all(&checksum.to_le_bytes())?;

        Ok(())
    }

    /// Read the next entry and its framed length; `None` at a clean end.
    fn read_entry(reader: &mut BufReader<File>) -> Result<Option<(WalEntry, u64)>> {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > 100 * 1024 * 1024 {
            // 100MB sanity check
            return Err(StoreError::Corruption("WAL entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);

        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok(Some((entry, 4 + len as u64 + 4)))
    }
}
