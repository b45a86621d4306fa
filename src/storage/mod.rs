//! Embedded ordered key/value store.
//!
//! Thin wrapper over rocksdb: point reads, prefix scans, and atomic
//! multi-key batches. Every block commit is issued as one [`Batch`], so a
//! partially applied commit is impossible.

pub mod keys;

use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("value codec: {0}")]
    Codec(#[from] bincode::Error),
}

pub struct Store {
    db: DB,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?)
    }

    /// Reads and bincode-decodes a value.
    pub fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.put(key, value)?)
    }

    pub fn put_value<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), StoreError> {
        Ok(self.db.put(key, bincode::serialize(value)?)?)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.delete(key)?)
    }

    /// Applies every mutation in `batch` atomically.
    pub fn write(&self, batch: Batch) -> Result<(), StoreError> {
        Ok(self.db.write(batch.inner)?)
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

/// Atomic write batch. Mutations accumulate in memory and land together in
/// [`Store::write`].
#[derive(Default)]
pub struct Batch {
    inner: WriteBatch,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.put(key, value);
    }

    pub fn put_value<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<(), StoreError> {
        self.inner.put(key, bincode::serialize(value)?);
        Ok(())
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.inner.delete(key);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_round_trip() {
        let (_dir, store) = open_temp();
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap().unwrap(), b"v");
        assert!(store.get(b"missing").unwrap().is_none());
        store.delete(b"k").unwrap();
        assert!(store.get(b"k").unwrap().is_none());
    }

    #[test]
    fn batch_applies_all_or_nothing() {
        let (_dir, store) = open_temp();
        let mut batch = Batch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        store.write(batch).unwrap();
        assert_eq!(store.get(b"a").unwrap().unwrap(), b"1");
        assert_eq!(store.get(b"b").unwrap().unwrap(), b"2");
    }

    #[test]
    fn scan_prefix_stays_inside_prefix() {
        let (_dir, store) = open_temp();
        store.put(b"x/1", b"a").unwrap();
        store.put(b"x/2", b"b").unwrap();
        store.put(b"y/1", b"c").unwrap();
        let rows = store.scan_prefix(b"x/").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, b"x/1");
        assert_eq!(rows[1].0, b"x/2");
    }

    #[test]
    fn typed_values_round_trip() {
        let (_dir, store) = open_temp();
        store.put_value(b"n", &42u64).unwrap();
        let n: u64 = store.get_value(b"n").unwrap().unwrap();
        assert_eq!(n, 42);
    }
}
