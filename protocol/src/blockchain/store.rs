//! # Persistent Store
//!
//! A generic namespace → key → opaque-string-blob persistence layer,
//! backed by `sled`. Every namespace the blockchain engine needs
//! (`privkey`, `block`, `blocknum`, `blockstate`) is a separate sled tree
//! — sled's tree abstraction maps directly onto the spec's "subdirectory
//! per namespace, file name per key" model, and gives us atomic,
//! durable writes for free instead of hand-rolled write-then-rename.
//!
//! This module is deliberately untyped: it knows nothing about blocks or
//! state snapshots. Typed convenience lives one layer up, in
//! [`super::canonical`] and [`super::fork`].

use std::path::Path;

use sled::{Db, Tree};
use thiserror::Error;

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("required key {namespace}/{key} is missing")]
    MissingKey { namespace: String, key: String },
}

/// A namespace/key/opaque-blob key-value store.
#[derive(Clone)]
pub struct Store {
    db: Db,
}

impl Store {
    /// Opens (or creates) a store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self { db: sled::open(path)? })
    }

    /// Opens an in-memory store that disappears when dropped. Used by
    /// tests and by any ephemeral node run.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, namespace: &str) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(namespace)?)
    }

    /// Writes `value` under `namespace/key`. Overwrites any existing value.
    pub fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let tree = self.tree(namespace)?;
        tree.insert(key.as_bytes(), value.as_bytes())?;
        tree.flush()?;
        Ok(())
    }

    /// Reads `namespace/key`, if present.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let tree = self.tree(namespace)?;
        match tree.get(key.as_bytes())? {
            Some(ivec) => Ok(Some(String::from_utf8_lossy(&ivec).into_owned())),
            None => Ok(None),
        }
    }

    /// Reads `namespace/key`, failing with [`StoreError::MissingKey`] if
    /// absent — for keys whose absence is a configuration error rather
    /// than a legitimate "not found" outcome.
    pub fn require(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        self.get(namespace, key)?.ok_or_else(|| StoreError::MissingKey {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    }

    pub fn exists(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let tree = self.tree(namespace)?;
        Ok(tree.contains_key(key.as_bytes())?)
    }

    pub fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let tree = self.tree(namespace)?;
        tree.remove(key.as_bytes())?;
        tree.flush()?;
        Ok(())
    }

    /// Lists every key currently present in `namespace`.
    pub fn scan_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let tree = self.tree(namespace)?;
        tree.iter()
            .keys()
            .map(|k| k.map(|k| String::from_utf8_lossy(&k).into_owned()).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = Store::open_temporary().unwrap();
        store.put("block", "abc123", "serialised-block").unwrap();
        assert_eq!(store.get("block", "abc123").unwrap().as_deref(), Some("serialised-block"));
    }

    #[test]
    fn missing_key_returns_none() {
        let store = Store::open_temporary().unwrap();
        assert_eq!(store.get("block", "nope").unwrap(), None);
    }

    #[test]
    fn require_fails_on_missing_key() {
        let store = Store::open_temporary().unwrap();
        assert!(store.require("blocknum", "latest").is_err());
    }

    #[test]
    fn require_succeeds_once_present() {
        let store = Store::open_temporary().unwrap();
        store.put("blocknum", "latest", "5").unwrap();
        assert_eq!(store.require("blocknum", "latest").unwrap(), "5");
    }

    #[test]
    fn put_overwrites_existing_value() {
        let store = Store::open_temporary().unwrap();
        store.put("privkey", "privkey", "old").unwrap();
        store.put("privkey", "privkey", "new").unwrap();
        assert_eq!(store.get("privkey", "privkey").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn delete_removes_key() {
        let store = Store::open_temporary().unwrap();
        store.put("block", "x", "y").unwrap();
        store.delete("block", "x").unwrap();
        assert!(!store.exists("block", "x").unwrap());
    }

    #[test]
    fn namespaces_are_independent() {
        let store = Store::open_temporary().unwrap();
        store.put("block", "k", "block-value").unwrap();
        store.put("blocknum", "k", "blocknum-value").unwrap();
        assert_eq!(store.get("block", "k").unwrap().as_deref(), Some("block-value"));
        assert_eq!(store.get("blocknum", "k").unwrap().as_deref(), Some("blocknum-value"));
    }

    #[test]
    fn scan_keys_lists_everything_in_namespace() {
        let store = Store::open_temporary().unwrap();
        store.put("blocknum", "0", "hash0").unwrap();
        store.put("blocknum", "1", "hash1").unwrap();
        let mut keys = store.scan_keys("blocknum").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["0".to_string(), "1".to_string()]);
    }
}
