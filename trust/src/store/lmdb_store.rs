// Copyright (c) 2025 Cascoin Trust Developers

use lmdb::{Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, Transaction, WriteFlags};
use std::{fs, path::Path};
use tracing::{debug, info};

use super::{BatchOp, KvStore, StoreError, WriteBatch};

/// File name of the trust database inside its directory.
const DB_FILE: &str = "trust.mdb";

/// LMDB-backed trust storage
pub struct LmdbStore {
    env: Environment,
    /// trust: namespaced key -> bincode value
    db: Database,
}

impl LmdbStore {
    /// Open or create the trust database under `path`.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, StoreError> {
        fs::create_dir_all(path)?;

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(1)
            .set_map_size(map_size)
            .open(&path.join(DB_FILE))?;

        let db = env.create_db(Some("trust"), DatabaseFlags::empty())?;

        info!(path = %path.display(), map_size, "Opened trust database");
        Ok(Self { env, db })
    }
}

impl KvStore for LmdbStore {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &key) {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let txn = self.env.begin_ro_txn()?;
        let mut entries = Vec::new();
        {
            let mut cursor = txn.open_ro_cursor(self.db)?;
            for result in cursor.iter_from(prefix) {
                let (key, value) = result?;
                if !key.starts_with(prefix) {
                    break;
                }
                entries.push((key.to_vec(), value.to_vec()));
            }
        }
        Ok(entries)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let ops = batch.len();
        let mut txn = self.env.begin_rw_txn()?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    txn.put(self.db, &key, &value, WriteFlags::empty())?;
                }
                BatchOp::Delete(key) => match txn.del(self.db, &key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        txn.commit()?;
        debug!(ops, "Committed trust batch");
        Ok(())
    }
}
