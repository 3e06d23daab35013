//! LMDB-backed durable tier.
//!
//! Uses the heed crate (Rust bindings for LMDB). Keys and values are UTF-8
//! text; each operation runs in its own transaction so a failed write never
//! leaves a partial entry behind.

use std::path::Path;

use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};

use super::durable::{CacheFault, DurableStore};

pub struct LmdbStore {
    env: Env,
    db: Database<Str, Str>,
}

impl LmdbStore {
    /// Open (or create) the store in `path`.
    ///
    /// `max_size_mb` bounds the memory map; writes beyond it surface as
    /// [`CacheFault::Quota`].
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, CacheFault> {
        std::fs::create_dir_all(&path).map_err(|e| CacheFault::Storage(e.to_string()))?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified by anything but LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(storage_fault)?;

        let mut wtxn = env.write_txn().map_err(storage_fault)?;
        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(storage_fault)?;
        wtxn.commit().map_err(storage_fault)?;

        Ok(Self { env, db })
    }
}

fn storage_fault(e: heed::Error) -> CacheFault {
    match e {
        heed::Error::Mdb(heed::MdbError::MapFull) => CacheFault::Quota(e.to_string()),
        other => CacheFault::Storage(other.to_string()),
    }
}

impl DurableStore for LmdbStore {
    fn read(&self, key: &str) -> Result<Option<String>, CacheFault> {
        let rtxn = self.env.read_txn().map_err(storage_fault)?;
        let value = self.db.get(&rtxn, key).map_err(storage_fault)?;
        Ok(value.map(str::to_string))
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), CacheFault> {
        let mut wtxn = self.env.write_txn().map_err(storage_fault)?;
        self.db
            .put(&mut wtxn, key, contents)
            .map_err(storage_fault)?;
        wtxn.commit().map_err(storage_fault)
    }

    fn remove(&self, key: &str) -> Result<(), CacheFault> {
        let mut wtxn = self.env.write_txn().map_err(storage_fault)?;
        self.db.delete(&mut wtxn, key).map_err(storage_fault)?;
        wtxn.commit().map_err(storage_fault)
    }

    fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheFault> {
        let keys: Vec<String> = {
            let rtxn = self.env.read_txn().map_err(storage_fault)?;
            let iter = self
                .db
                .prefix_iter(&rtxn, prefix)
                .map_err(storage_fault)?;
            iter.filter_map(|entry| entry.ok().map(|(k, _)| k.to_string()))
                .collect()
        };

        let mut wtxn = self.env.write_txn().map_err(storage_fault)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(storage_fault)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(storage_fault)?;
        Ok(deleted)
    }
}
