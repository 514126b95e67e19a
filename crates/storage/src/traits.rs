use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{StorageError, StorageResult};

/// Durable key-value storage
///
/// Single-key operations are atomic. Keys are `/`-separated paths; listing
/// returns keys relative to the requested prefix in ascending order.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write a value, replacing any existing one
    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys under `prefix` strictly after `after`, at most `limit` entries
    ///
    /// Returned keys have the prefix stripped. `after` is relative to the
    /// prefix too and does not have to exist. `None` for `limit` lists all.
    async fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<String>>;

    /// List every key under `prefix`
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.list_page(prefix, None, None).await
    }

    /// Start a multi-key transaction, `None` when the backend has no transactions
    async fn begin(&self) -> StorageResult<Option<Box<dyn Transaction>>> {
        Ok(None)
    }
}

/// Multi-key transaction
///
/// Reads observe the transaction's own uncommitted writes. Dropping a
/// transaction without committing discards its writes.
#[async_trait]
pub trait Transaction: Storage {
    /// Apply every buffered write atomically
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discard every buffered write
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// JSON helpers available on every [`Storage`]
#[async_trait]
pub trait StorageExt: Storage {
    /// Read and decode a JSON entry
    async fn get_json<T>(&self, key: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|source| {
                StorageError::Serialization {
                    key: key.to_string(),
                    source,
                }
            }),
        }
    }

    /// Encode and write a JSON entry
    async fn put_json<T>(&self, key: &str, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.put(key, bytes).await
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}
