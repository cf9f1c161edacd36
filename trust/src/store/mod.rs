// Copyright (c) 2025 Cascoin Trust Developers

//! Key-value persistence for trust data.
//!
//! Every component reads and writes through [`KvStore`]. Writes that touch
//! more than one key go through a [`WriteBatch`] so they land atomically, and
//! writers serialize per key region with [`PrefixLocks`].

mod lmdb_store;
mod memory;

pub mod keys;

pub use lmdb_store::LmdbStore;
pub use memory::MemoryStore;

use parking_lot::{Mutex, MutexGuard};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lmdb::Error> for StoreError {
    fn from(e: lmdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered set of writes committed atomically.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    /// Encode `value` with bincode and queue it under `key`.
    pub fn put_value<T: Serialize>(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = bincode::serialize(value)?;
        self.put(key, bytes);
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Minimal storage contract the trust engine needs.
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`.
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply every operation in `batch` or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.commit(batch)
    }

    fn erase(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.commit(batch)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.read(key)?.is_some())
    }
}

/// Read and decode a bincode value.
pub fn read_value<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    match store.read(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// Decode every value under `prefix`, in key order.
pub fn scan_values<T: DeserializeOwned>(
    store: &dyn KvStore,
    prefix: &[u8],
) -> Result<Vec<T>, StoreError> {
    store
        .scan_prefix(prefix)?
        .into_iter()
        .map(|(_, v)| bincode::deserialize(&v).map_err(StoreError::from))
        .collect()
}

/// Logical key regions, each guarded by its own writer lock.
///
/// When one unit of work needs several regions it must acquire them in
/// declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyRegion {
    TrustEdges,
    Votes,
    Disputes,
    Reputation,
    Clusters,
    Flags,
    Behavior,
    Meta,
}

impl KeyRegion {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        self as usize
    }
}

/// One writer mutex per [`KeyRegion`].
#[derive(Debug, Default)]
pub struct PrefixLocks {
    locks: [Mutex<()>; KeyRegion::COUNT],
}

impl PrefixLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the writer lock for `region` until the guard drops.
    pub fn lock(&self, region: KeyRegion) -> MutexGuard<'_, ()> {
        self.locks[region.index()].lock()
    }
}
