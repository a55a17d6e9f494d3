//! Point-in-time snapshot files.
//!
//! Layout: magic, version byte, u64 body length, rmp-serde body, CRC32 of
//! the body. Snapshots are written to a temporary file and renamed into
//! place, so a crash leaves either the old or the new snapshot.

use crate::engine::state::DatabaseState;
use crate::error::{Result, StoreError};
use crate::records::ObjectStoreData;
use crate::types::{IndexParams, Key, ObjectStoreParams, Record};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"RSN\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    /// Last WAL sequence folded into this snapshot.
    last_seq: u64,
    version: u32,
    stores: Vec<StoreSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    name: String,
    params: ObjectStoreParams,
    key_generator: Option<i64>,
    indexes: Vec<(String, IndexParams)>,
    /// JSON-encoded records in key order.
    records: Vec<(Key, Vec<u8>)>,
}

/// Write `state` as the snapshot at `path`.
pub fn write_snapshot(path: &Path, state: &DatabaseState, last_seq: u64) -> Result<()> {
    let mut stores = Vec::with_capacity(state.stores.len());
    for (name, data) in &state.stores {
        let mut records = Vec::with_capacity(data.len());
        for (key, record) in data.iter() {
            records.push((key.clone(), serde_json::to_vec(record)?));
        }
        stores.push(StoreSnapshot {
            name: name.clone(),
            params: data.params().clone(),
            key_generator: data.key_generator(),
            indexes: data
                .indexes()
                .map(|(n, index)| (n.clone(), index.params().clone()))
                .collect(),
            records,
        });
    }

    let body = rmp_serde::to_vec(&SnapshotBody {
        last_seq,
        version: state.version,
        stores,
    })?;

    let tmp_path = path.with_extension("snap.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(SNAPSHOT_MAGIC)?;
        file.write_all(&[SNAPSHOT_VERSION])?;
        file.write_all(&(body.len() as u64).to_le_bytes())?;
        file.write_all(&body)?;
        file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Load a snapshot, returning the state and its last WAL sequence.
pub fn read_snapshot(path: &Path) -> Result<(DatabaseState, u64)> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid snapshot magic".into()));
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != SNAPSHOT_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported snapshot version: {}",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    if len > file.metadata()?.len() {
        return Err(StoreError::Corruption("Snapshot body length exceeds file size".into()));
    }

    let mut body = vec![0u8; len as usize];
    file.read_exact(&mut body)?;

    let mut checksum_bytes = [0u8; 4];
    file.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(&body);
    if stored != computed {
        return Err(StoreError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    let body: SnapshotBody = rmp_serde::from_slice(&body)?;

    let mut state = DatabaseState {
        version: body.version,
        ..Default::default()
    };
    for snapshot in body.stores {
        let mut data = ObjectStoreData::new(snapshot.params);
        data.set_key_generator(snapshot.key_generator);
        for (name, params) in snapshot.indexes {
            data.create_index(&name, params)?;
        }
        for (key, bytes) in snapshot.records {
            let record: Record = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            data.insert_record(key, record);
        }
        state.stores.insert(snapshot.name, data);
    }

    Ok((state, body.last_seq))
}
