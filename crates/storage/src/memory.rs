//! In-memory storage backend
//!
//! Backed by an ordered map so `list_page` is a range scan. Transactions
//! buffer their writes in an overlay and apply them under a single write
//! lock on commit.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::{Storage, StorageError, StorageResult, Transaction};

type Map = BTreeMap<String, Vec<u8>>;

/// In-memory implementation of [`Storage`]
#[derive(Clone)]
pub struct MemoryStorage {
    entries: Arc<RwLock<Map>>,
    transactional: bool,
}

impl MemoryStorage {
    /// Create an empty store with transaction support
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            transactional: true,
        }
    }

    /// Create an empty store whose `begin` reports no transaction support
    pub fn without_transactions() -> Self {
        Self {
            transactional: false,
            ..Self::new()
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every key, for assertions
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.len())
            .field("transactional", &self.transactional)
            .finish()
    }
}

fn check_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "key is empty",
        });
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "key contains a parent segment",
        });
    }
    Ok(())
}

fn page<'a>(
    keys: impl Iterator<Item = &'a String>,
    prefix: &str,
    after: Option<&str>,
    limit: Option<usize>,
) -> Vec<String> {
    keys.filter_map(|key| key.strip_prefix(prefix))
        .filter(|suffix| after.is_none_or(|after| *suffix > after))
        .take(limit.unwrap_or(usize::MAX))
        .map(str::to_string)
        .collect()
}

fn range_from(prefix: &str) -> (Bound<String>, Bound<String>) {
    (Bound::Included(prefix.to_string()), Bound::Unbounded)
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        check_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        check_key(key)?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        check_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        let entries = self.entries.read();
        let keys = entries
            .range(range_from(prefix))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix));
        Ok(page(keys, prefix, after, limit))
    }

    async fn begin(&self) -> StorageResult<Option<Box<dyn Transaction>>> {
        if !self.transactional {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryTransaction {
            entries: Arc::clone(&self.entries),
            overlay: Mutex::new(Some(BTreeMap::new())),
        })))
    }
}

/// Buffered write set; `None` marks a delete
type Overlay = BTreeMap<String, Option<Vec<u8>>>;

struct MemoryTransaction {
    entries: Arc<RwLock<Map>>,
    // `None` once committed or rolled back
    overlay: Mutex<Option<Overlay>>,
}

impl MemoryTransaction {
    fn with_overlay<R>(&self, f: impl FnOnce(&mut Overlay) -> R) -> StorageResult<R> {
        let mut guard = self.overlay.lock();
        let overlay = guard.as_mut().ok_or(StorageError::TransactionClosed)?;
        Ok(f(overlay))
    }
}

#[async_trait]
impl Storage for MemoryTransaction {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        check_key(key)?;
        let buffered = self.with_overlay(|overlay| overlay.get(key).cloned())?;
        match buffered {
            Some(value) => Ok(value),
            None => Ok(self.entries.read().get(key).cloned()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        check_key(key)?;
        self.with_overlay(|overlay| {
            overlay.insert(key.to_string(), Some(value));
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        check_key(key)?;
        self.with_overlay(|overlay| {
            overlay.insert(key.to_string(), None);
        })
    }

    async fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        let overlay = self.with_overlay(|overlay| overlay.clone())?;
        let mut merged: BTreeMap<String, ()> = self
            .entries
            .read()
            .range(range_from(prefix))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .map(|key| (key.clone(), ()))
            .collect();
        for (key, value) in overlay {
            if !key.starts_with(prefix) {
                continue;
            }
            match value {
                Some(_) => merged.insert(key, ()),
                None => merged.remove(&key),
            };
        }
        Ok(page(merged.keys(), prefix, after, limit))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let overlay = self
            .overlay
            .lock()
            .take()
            .ok_or(StorageError::TransactionClosed)?;
        let writes = overlay.len();
        let mut entries = self.entries.write();
        for (key, value) in overlay {
            match value {
                Some(value) => entries.insert(key, value),
                None => entries.remove(&key),
            };
        }
        tracing::trace!(writes, "Committed memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.overlay
            .lock()
            .take()
            .ok_or(StorageError::TransactionClosed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageExt;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    async fn seeded() -> MemoryStorage {
        let store = MemoryStorage::new();
        for key in ["role/a", "role/b", "role/c", "static-role/a", "wal/1"] {
            store.put(key, b"x".to_vec()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStorage::new();
        assert!(store.is_empty());

        store.put("role/a", b"one".to_vec()).await.unwrap();
        assert_eq!(store.get("role/a").await.unwrap(), Some(b"one".to_vec()));

        store.put("role/a", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("role/a").await.unwrap(), Some(b"two".to_vec()));

        store.delete("role/a").await.unwrap();
        assert_eq!(store.get("role/a").await.unwrap(), None);
        // idempotent
        store.delete("role/a").await.unwrap();
    }

    #[rstest]
    #[case("role/", None, None, vec!["a", "b", "c"])]
    #[case("role/", Some("a"), None, vec!["b", "c"])]
    #[case("role/", Some("aa"), Some(1), vec!["b"])]
    #[case("role/", None, Some(2), vec!["a", "b"])]
    #[case("static-role/", None, None, vec!["a"])]
    #[case("missing/", None, None, vec![])]
    #[tokio::test]
    async fn test_list_page(
        #[case] prefix: &str,
        #[case] after: Option<&str>,
        #[case] limit: Option<usize>,
        #[case] expected: Vec<&str>,
    ) {
        let store = seeded().await;
        let keys = store.list_page(prefix, after, limit).await.unwrap();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let store = MemoryStorage::new();
        assert!(matches!(
            store.put("", Vec::new()).await,
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.get("role/../wal").await,
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStorage::new();
        store.put_json("doc", &json!({"a": 1})).await.unwrap();
        let value: Option<serde_json::Value> = store.get_json("doc").await.unwrap();
        assert_eq!(value, Some(json!({"a": 1})));

        store.put("broken", b"{not json".to_vec()).await.unwrap();
        let err = store.get_json::<serde_json::Value>("broken").await.unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_transaction_commit_applies_all_writes() {
        let store = seeded().await;
        let tx = store.begin().await.unwrap().unwrap();

        tx.delete("role/a").await.unwrap();
        tx.put("role/d", b"y".to_vec()).await.unwrap();

        // uncommitted writes visible inside, invisible outside
        assert_eq!(tx.get("role/a").await.unwrap(), None);
        assert_eq!(tx.list("role/").await.unwrap(), vec!["b", "c", "d"]);
        assert_eq!(store.get("role/a").await.unwrap(), Some(b"x".to_vec()));

        tx.commit().await.unwrap();
        assert_eq!(store.list("role/").await.unwrap(), vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_transaction_rollback_and_drop_discard_writes() {
        let store = seeded().await;

        let tx = store.begin().await.unwrap().unwrap();
        tx.delete("wal/1").await.unwrap();
        tx.rollback().await.unwrap();

        let tx = store.begin().await.unwrap().unwrap();
        tx.delete("wal/1").await.unwrap();
        drop(tx);

        assert_eq!(store.list("wal/").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_without_transactions() {
        let store = MemoryStorage::without_transactions();
        assert!(store.begin().await.unwrap().is_none());
    }
}
