//! Rotation write-ahead log
//!
//! A record is written before the external driver call and removed after
//! the role record has been updated. A record that survives a crash means
//! the new material may or may not have reached the database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use vigil_credential::CredentialMaterial;
use vigil_storage::{Storage, StorageError, StorageExt};

use crate::role::StaticAccount;

/// Key prefix of WAL records
pub const WAL_PREFIX: &str = "wal/";

/// In-flight rotation of one static role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Record id
    pub id: String,
    /// Role being rotated
    pub role_name: String,
    /// Account the material is applied to
    pub username: String,
    /// Generated material, not yet committed to the role
    pub credential: CredentialMaterial,
    /// When the material was generated
    pub generated_at: DateTime<Utc>,
    /// Role's last rotation when the material was generated
    #[serde(default)]
    pub last_vault_rotation: Option<DateTime<Utc>>,
}

impl WalRecord {
    /// New record for `account` with a fresh id
    pub fn new(
        role_name: &str,
        account: &StaticAccount,
        credential: CredentialMaterial,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role_name: role_name.to_string(),
            username: account.username.clone(),
            credential,
            generated_at,
            last_vault_rotation: account.last_vault_rotation,
        }
    }

    /// Why the record no longer applies to `account`, `None` when it still does
    ///
    /// A record is stale once the role has been rotated since it was
    /// written, or re-created for another account.
    pub fn staleness(&self, account: &StaticAccount) -> Option<&'static str> {
        if self.username != account.username {
            Some("username changed")
        } else if self.last_vault_rotation != account.last_vault_rotation {
            Some("role rotated since record was written")
        } else {
            None
        }
    }
}

/// Outcome of reading a WAL record
#[derive(Debug)]
pub enum WalEntry {
    /// Decoded record
    Valid(WalRecord),
    /// Undecodable record; the role name is kept when it could be read
    Corrupt {
        /// Record id
        id: String,
        /// Role name, if the record still names one
        role_name: Option<String>,
        /// Decode error
        error: String,
    },
}

/// WAL records in durable storage
#[derive(Clone)]
pub struct Wal {
    storage: Arc<dyn Storage>,
}

impl Wal {
    /// WAL over the given backend
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Storage key of a record
    pub fn key(id: &str) -> String {
        format!("{WAL_PREFIX}{id}")
    }

    /// Persist a record
    pub async fn put(&self, record: &WalRecord) -> Result<(), StorageError> {
        self.storage.put_json(&Self::key(&record.id), record).await
    }

    /// Read a record, reporting undecodable ones instead of failing
    pub async fn get(&self, id: &str) -> Result<Option<WalEntry>, StorageError> {
        let Some(bytes) = self.storage.get(&Self::key(id)).await? else {
            return Ok(None);
        };
        Ok(Some(decode(id, &bytes)))
    }

    /// Remove a record; removing an absent record is not an error
    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.storage.delete(&Self::key(id)).await
    }

    /// Ids of every record
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        self.storage.list(WAL_PREFIX).await
    }

    /// Ids of every record naming `role_name`, corrupt ones included
    ///
    /// Read failures are returned per id so callers can keep going.
    pub async fn find_for_role(
        &self,
        role_name: &str,
    ) -> Result<Vec<Result<String, (String, StorageError)>>, StorageError> {
        let mut found = Vec::new();
        for id in self.list().await? {
            match self.get(&id).await {
                Ok(Some(entry)) if entry.role_name() == Some(role_name) => found.push(Ok(id)),
                Ok(_) => {}
                Err(err) => found.push(Err((id, err))),
            }
        }
        Ok(found)
    }
}

impl WalEntry {
    /// Role the record belongs to, if known
    pub fn role_name(&self) -> Option<&str> {
        match self {
            Self::Valid(record) => Some(&record.role_name),
            Self::Corrupt { role_name, .. } => role_name.as_deref(),
        }
    }
}

fn decode(id: &str, bytes: &[u8]) -> WalEntry {
    match serde_json::from_slice::<WalRecord>(bytes) {
        Ok(record) => WalEntry::Valid(record),
        Err(err) => {
            let role_name = serde_json::from_slice::<Value>(bytes).ok().and_then(|value| {
                value
                    .get("role_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            WalEntry::Corrupt {
                id: id.to_string(),
                role_name,
                error: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use vigil_credential::SecretString;
    use vigil_storage::MemoryStorage;

    fn account(last: Option<DateTime<Utc>>) -> StaticAccount {
        StaticAccount {
            username: "svc_a".into(),
            credential: None,
            last_vault_rotation: last,
            rotation_period: Duration::from_secs(60),
            revoke_user_on_delete: false,
        }
    }

    fn record(role: &str, account: &StaticAccount) -> WalRecord {
        WalRecord::new(
            role,
            account,
            CredentialMaterial::Password {
                password: SecretString::new("next-password"),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = Arc::new(MemoryStorage::new());
        let wal = Wal::new(storage.clone());
        let rec = record("db-user1", &account(None));

        wal.put(&rec).await.unwrap();
        assert_eq!(wal.list().await.unwrap(), vec![rec.id.clone()]);
        match wal.get(&rec.id).await.unwrap() {
            Some(WalEntry::Valid(read)) => assert_eq!(read, rec),
            other => panic!("expected valid record, got {other:?}"),
        }

        wal.delete(&rec.id).await.unwrap();
        assert!(wal.get(&rec.id).await.unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_keeps_role_name() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put("wal/broken", br#"{"role_name":"db-user1","credential":42}"#.to_vec())
            .await
            .unwrap();
        storage.put("wal/garbage", b"\x00\x01".to_vec()).await.unwrap();
        let wal = Wal::new(storage);

        match wal.get("broken").await.unwrap() {
            Some(WalEntry::Corrupt { role_name, .. }) => {
                assert_eq!(role_name.as_deref(), Some("db-user1"));
            }
            other => panic!("expected corrupt record, got {other:?}"),
        }
        let garbage = wal.get("garbage").await.unwrap().unwrap();
        assert_eq!(garbage.role_name(), None);
    }

    #[tokio::test]
    async fn test_find_for_role() {
        let wal = Wal::new(Arc::new(MemoryStorage::new()));
        let mine = record("db-user1", &account(None));
        let other = record("db-user2", &account(None));
        wal.put(&mine).await.unwrap();
        wal.put(&other).await.unwrap();

        let found: Vec<String> = wal
            .find_for_role("db-user1")
            .await
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(found, vec![mine.id]);
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let acct = account(Some(now));
        let rec = record("db-user1", &acct);
        assert_eq!(rec.staleness(&acct), None);

        let rotated = account(Some(now + TimeDelta::seconds(60)));
        assert!(rec.staleness(&rotated).is_some());

        let recreated = StaticAccount {
            username: "svc_b".into(),
            ..acct
        };
        assert_eq!(rec.staleness(&recreated), Some("username changed"));
    }
}
