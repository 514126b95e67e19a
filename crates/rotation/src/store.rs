//! Role persistence
//!
//! Thin typed access to role records. Writers of static roles must hold the
//! role's lock; the store itself does not enforce it.

use std::sync::Arc;

use vigil_storage::{Storage, StorageExt};

use crate::RotationResult;
use crate::role::{RoleEntry, RoleKind};

/// Typed access to dynamic and static role records
#[derive(Clone)]
pub struct RoleStore {
    storage: Arc<dyn Storage>,
}

impl RoleStore {
    /// Store over the given backend
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Storage key of a role
    pub fn key(kind: RoleKind, name: &str) -> String {
        format!("{}{name}", kind.prefix())
    }

    /// Read a role record
    pub async fn get(&self, kind: RoleKind, name: &str) -> RotationResult<Option<RoleEntry>> {
        Ok(self.storage.get_json(&Self::key(kind, name)).await?)
    }

    /// Read a static role record
    pub async fn get_static(&self, name: &str) -> RotationResult<Option<RoleEntry>> {
        self.get(RoleKind::Static, name).await
    }

    /// Write a role record
    pub async fn put(&self, kind: RoleKind, name: &str, role: &RoleEntry) -> RotationResult<()> {
        Ok(self.storage.put_json(&Self::key(kind, name), role).await?)
    }

    /// Remove a role record
    pub async fn delete(&self, kind: RoleKind, name: &str) -> RotationResult<()> {
        Ok(self.storage.delete(&Self::key(kind, name)).await?)
    }

    /// Whether a record exists in the namespace, readable or not
    pub async fn exists(&self, kind: RoleKind, name: &str) -> RotationResult<bool> {
        Ok(self.storage.get(&Self::key(kind, name)).await?.is_some())
    }

    /// Role names of one kind, in ascending order
    ///
    /// Starts strictly after `after`; `limit` of `None` or `<= 0` lists all.
    pub async fn list(
        &self,
        kind: RoleKind,
        after: Option<&str>,
        limit: Option<i64>,
    ) -> RotationResult<Vec<String>> {
        let limit = limit
            .filter(|limit| *limit > 0)
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(self.storage.list_page(kind.prefix(), after, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Statements;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::time::Duration;
    use vigil_credential::{ConfigMap, CredentialType};
    use vigil_storage::MemoryStorage;

    fn dynamic() -> RoleEntry {
        RoleEntry {
            db_name: "pg".into(),
            statements: Statements::default(),
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::ZERO,
            credential_type: CredentialType::Password,
            credential_config: ConfigMap::new(),
            static_account: None,
        }
    }

    async fn store_with(names: &[&str]) -> RoleStore {
        let store = RoleStore::new(Arc::new(MemoryStorage::new()));
        for name in names {
            store.put(RoleKind::Dynamic, name, &dynamic()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = store_with(&[]).await;
        assert_eq!(store.get(RoleKind::Dynamic, "r").await.unwrap(), None);

        store.put(RoleKind::Dynamic, "r", &dynamic()).await.unwrap();
        assert_eq!(store.get(RoleKind::Dynamic, "r").await.unwrap(), Some(dynamic()));
        assert_eq!(store.get_static("r").await.unwrap(), None);
        assert!(store.exists(RoleKind::Dynamic, "r").await.unwrap());
        assert!(!store.exists(RoleKind::Static, "r").await.unwrap());

        store.delete(RoleKind::Dynamic, "r").await.unwrap();
        assert!(!store.exists(RoleKind::Dynamic, "r").await.unwrap());
    }

    #[rstest]
    #[case(None, None, vec!["a", "b", "c"])]
    #[case(None, Some(0), vec!["a", "b", "c"])]
    #[case(None, Some(-1), vec!["a", "b", "c"])]
    #[case(Some("a"), Some(1), vec!["b"])]
    #[case(Some("zz"), None, vec![])]
    #[tokio::test]
    async fn test_list_pagination(
        #[case] after: Option<&str>,
        #[case] limit: Option<i64>,
        #[case] expected: Vec<&str>,
    ) {
        let store = store_with(&["c", "a", "b"]).await;
        assert_eq!(store.list(RoleKind::Dynamic, after, limit).await.unwrap(), expected);
        assert!(store.list(RoleKind::Static, None, None).await.unwrap().is_empty());
    }
}
