//! Administrative role API
//!
//! Create, update, read, delete and list roles. Every write takes the
//! role's lock, so an administrative change and a scheduled rotation of the
//! same role are serialized. Writes are upserts: a missing role is created,
//! an existing one is updated field by field, and fields left out of the
//! request keep their stored values.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use vigil_credential::{
    ConfigMap, CredentialGenerator, CredentialType, GeneratorError, ValidationError,
};
use vigil_storage::{Storage, StorageError};

use crate::driver::RevokeRequest;
use crate::engine::Engine;
use crate::queue::QueueItem;
use crate::role::{
    DynamicRoleView, RoleEntry, RoleKind, RoleView, StaticAccount, StaticRoleView, Statements,
    validate_role_name,
};
use crate::store::RoleStore;
use crate::wal::Wal;
use crate::{RotationError, RotationResult};

/// Whether a write created a role or updated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Role did not exist
    Created,
    /// Existing role updated
    Updated,
}

/// Fields of a static role write; `None` keeps the stored value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticRoleRequest {
    /// Database connection, required on create
    pub db_name: Option<String>,
    /// Managed account, required on create and immutable afterwards
    pub username: Option<String>,
    /// Interval between rotations, required on create
    #[serde(with = "humantime_serde")]
    pub rotation_period: Option<Duration>,
    /// Statements executed by the driver on rotation
    pub rotation_statements: Option<Vec<String>>,
    /// Credential type name, `password` when never set
    pub credential_type: Option<String>,
    /// Generator options for the credential type
    pub credential_config: Option<ConfigMap>,
    /// Remove the external account when the role is deleted
    pub revoke_user_on_delete: Option<bool>,
}

impl StaticRoleRequest {
    /// Empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database connection
    #[must_use]
    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    /// Set the managed account
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the rotation period
    #[must_use]
    pub fn rotation_period(mut self, period: Duration) -> Self {
        self.rotation_period = Some(period);
        self
    }

    /// Set the rotation statements
    #[must_use]
    pub fn rotation_statements<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rotation_statements = Some(statements.into_iter().map(Into::into).collect());
        self
    }

    /// Set the credential type and its options
    #[must_use]
    pub fn credential(mut self, credential_type: impl Into<String>, config: ConfigMap) -> Self {
        self.credential_type = Some(credential_type.into());
        self.credential_config = Some(config);
        self
    }

    /// Set whether the account is removed with the role
    #[must_use]
    pub fn revoke_user_on_delete(mut self, revoke: bool) -> Self {
        self.revoke_user_on_delete = Some(revoke);
        self
    }
}

/// Fields of a dynamic role write; `None` keeps the stored value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DynamicRoleRequest {
    /// Database connection, required on create
    pub db_name: Option<String>,
    /// Default lease TTL
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,
    /// Maximum lease TTL
    #[serde(with = "humantime_serde")]
    pub max_ttl: Option<Duration>,
    /// Account creation statements
    pub creation_statements: Option<Vec<String>>,
    /// Account revocation statements; empty entries are dropped
    pub revocation_statements: Option<Vec<String>>,
    /// Rollback statements
    pub rollback_statements: Option<Vec<String>>,
    /// Lease renewal statements
    pub renew_statements: Option<Vec<String>>,
    /// Credential type name, `password` when never set
    pub credential_type: Option<String>,
    /// Generator options for the credential type
    pub credential_config: Option<ConfigMap>,
}

impl DynamicRoleRequest {
    /// Empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database connection
    #[must_use]
    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    /// Set the default and maximum lease TTLs
    #[must_use]
    pub fn ttls(mut self, default_ttl: Duration, max_ttl: Duration) -> Self {
        self.default_ttl = Some(default_ttl);
        self.max_ttl = Some(max_ttl);
        self
    }

    /// Set the creation statements
    #[must_use]
    pub fn creation_statements<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.creation_statements = Some(statements.into_iter().map(Into::into).collect());
        self
    }

    /// Set the revocation statements
    #[must_use]
    pub fn revocation_statements<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.revocation_statements = Some(statements.into_iter().map(Into::into).collect());
        self
    }

    /// Set the credential type and its options
    #[must_use]
    pub fn credential(mut self, credential_type: impl Into<String>, config: ConfigMap) -> Self {
        self.credential_type = Some(credential_type.into());
        self.credential_config = Some(config);
        self
    }
}

/// Administrative interface over the roles of one rotation service
#[derive(Clone)]
pub struct RoleManager {
    engine: Arc<Engine>,
}

impl RoleManager {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Create or update a static role
    ///
    /// A created role is queued for its first rotation on the next tick. An
    /// update re-prioritizes the role's queue item from its last rotation
    /// and the (possibly new) period.
    ///
    /// # Errors
    ///
    /// - [`RotationError::NameConflict`] if a dynamic role has the name
    /// - [`RotationError::Validation`] for missing, malformed or immutable fields
    /// - [`RotationError::Storage`] if the role cannot be read or written
    pub async fn write_static_role(
        &self,
        name: &str,
        request: StaticRoleRequest,
    ) -> RotationResult<WriteOutcome> {
        validate_role_name(name)?;
        let engine = &self.engine;
        let _guard = engine.locks.lock(name).await;

        if engine.roles.exists(RoleKind::Dynamic, name).await? {
            return Err(RotationError::NameConflict {
                name: name.to_string(),
            });
        }

        let existing = match engine.roles.get_static(name).await {
            Ok(existing) => existing,
            // a quarantined role may be re-created over its unreadable record
            Err(RotationError::Storage(err))
                if err.is_corruption() && engine.quarantine.contains(name) =>
            {
                warn!(role = %name, error = %err, "Overwriting unreadable role record");
                None
            }
            Err(err) => return Err(err),
        };

        let (mut role, mut account, creating) = match existing {
            Some(mut role) => match role.static_account.take() {
                Some(account) => (role, account, false),
                None => (role, blank_account(), true),
            },
            None => (blank_role(), blank_account(), true),
        };

        if let Some(db_name) = request.db_name {
            role.db_name = db_name;
        }
        if role.db_name.is_empty() {
            return Err(RotationError::validation("database name is a required field"));
        }

        match request.username {
            Some(username) if !creating && username != account.username => {
                return Err(RotationError::validation(
                    "cannot update static account username",
                ));
            }
            Some(username) => account.username = username,
            None => {}
        }
        if account.username.is_empty() {
            return Err(RotationError::validation(
                "username is a required field to create a static account",
            ));
        }

        let tick = engine.config.tick_interval;
        match request.rotation_period {
            Some(period) if period < tick => {
                return Err(RotationError::validation(format!(
                    "rotation_period must be {} seconds or more",
                    tick.as_secs()
                )));
            }
            Some(period) => account.rotation_period = period,
            None if creating => {
                return Err(RotationError::validation(
                    "rotation_period is required to create static accounts",
                ));
            }
            None => {}
        }

        if let Some(statements) = request.rotation_statements {
            role.statements.rotation = statements;
        }
        if let Some(revoke) = request.revoke_user_on_delete {
            account.revoke_user_on_delete = revoke;
        }
        apply_credential(
            &mut role,
            creating,
            request.credential_type,
            request.credential_config,
        )?;

        role.static_account = Some(account.clone());
        engine.roles.put(RoleKind::Static, name, &role).await?;
        self.release_quarantine(name).await;

        let now = engine.clock.now();
        let item = if creating {
            QueueItem::new(name, now)
        } else {
            let due = account.due_at(now);
            match engine.queue.pop_by_name(name) {
                // keep a pending WAL and the retry count
                Some(previous) => previous.due_at(due),
                None => QueueItem::new(name, due),
            }
        };
        debug!(role = %name, due = %item.due(), "Static role queued");
        engine.queue.push(item);

        let outcome = if creating {
            info!(role = %name, username = %account.username, "Created static role");
            WriteOutcome::Created
        } else {
            info!(role = %name, "Updated static role");
            WriteOutcome::Updated
        };
        Ok(outcome)
    }

    /// Create or update a dynamic role
    ///
    /// # Errors
    ///
    /// - [`RotationError::NameConflict`] if a static role has the name
    /// - [`RotationError::Validation`] for missing or malformed fields
    /// - [`RotationError::Storage`] if the role cannot be read or written
    pub async fn write_dynamic_role(
        &self,
        name: &str,
        request: DynamicRoleRequest,
    ) -> RotationResult<WriteOutcome> {
        validate_role_name(name)?;
        let engine = &self.engine;
        let _guard = engine.locks.lock(name).await;

        if engine.roles.exists(RoleKind::Static, name).await? {
            return Err(RotationError::NameConflict {
                name: name.to_string(),
            });
        }

        let existing = engine.roles.get(RoleKind::Dynamic, name).await?;
        let creating = existing.is_none();
        let mut role = existing.unwrap_or_else(blank_role);
        role.static_account = None;

        if let Some(db_name) = request.db_name {
            role.db_name = db_name;
        }
        if role.db_name.is_empty() {
            return Err(RotationError::validation("database name is a required field"));
        }

        let statements = &mut role.statements;
        if let Some(creation) = request.creation_statements {
            statements.creation = creation;
        }
        if let Some(revocation) = request.revocation_statements {
            statements.revocation = revocation;
        }
        if let Some(rollback) = request.rollback_statements {
            statements.rollback = rollback;
        }
        if let Some(renewal) = request.renew_statements {
            statements.renewal = renewal;
        }
        statements.revocation.retain(|statement| !statement.is_empty());

        if let Some(default_ttl) = request.default_ttl {
            role.default_ttl = default_ttl;
        }
        if let Some(max_ttl) = request.max_ttl {
            role.max_ttl = max_ttl;
        }
        apply_credential(
            &mut role,
            creating,
            request.credential_type,
            request.credential_config,
        )?;

        engine.roles.put(RoleKind::Dynamic, name, &role).await?;
        if creating {
            info!(role = %name, "Created dynamic role");
            Ok(WriteOutcome::Created)
        } else {
            info!(role = %name, "Updated dynamic role");
            Ok(WriteOutcome::Updated)
        }
    }

    /// Read a role of either kind
    pub async fn read_role(&self, name: &str) -> RotationResult<Option<RoleView>> {
        if let Some(view) = self.read_static_role(name).await? {
            return Ok(Some(RoleView::Static(view)));
        }
        Ok(self.read_dynamic_role(name).await?.map(RoleView::Dynamic))
    }

    /// Read a static role with its rotation state
    pub async fn read_static_role(&self, name: &str) -> RotationResult<Option<StaticRoleView>> {
        let engine = &self.engine;
        let Some(role) = engine.roles.get_static(name).await? else {
            return Ok(None);
        };
        let Some(account) = role.static_account.as_ref() else {
            return Ok(None);
        };
        let quarantined = engine.quarantine.get(name).map(|entry| entry.reason);
        Ok(Some(StaticRoleView::new(
            name,
            &role,
            account,
            engine.clock.now(),
            engine.config.tick_interval,
            quarantined,
        )))
    }

    /// Read a dynamic role
    pub async fn read_dynamic_role(&self, name: &str) -> RotationResult<Option<DynamicRoleView>> {
        Ok(self
            .engine
            .roles
            .get(RoleKind::Dynamic, name)
            .await?
            .map(|role| DynamicRoleView::new(name, &role)))
    }

    /// Delete a role of the given kind; deleting a missing role succeeds
    ///
    /// # Errors
    ///
    /// For static roles, [`RotationError::Cleanup`] reports WAL records that
    /// could not be removed. The role itself is gone when it is returned.
    pub async fn delete_role(&self, kind: RoleKind, name: &str) -> RotationResult<()> {
        match kind {
            RoleKind::Dynamic => self.delete_dynamic_role(name).await,
            RoleKind::Static => self.delete_static_role(name).await,
        }
    }

    /// Delete a dynamic role
    pub async fn delete_dynamic_role(&self, name: &str) -> RotationResult<()> {
        let _guard = self.engine.locks.lock(name).await;
        self.engine.roles.delete(RoleKind::Dynamic, name).await?;
        info!(role = %name, "Deleted dynamic role");
        Ok(())
    }

    /// Delete a static role, its queue item and its WAL records
    ///
    /// When the role asks for it, the external account is removed
    /// afterwards. A failed removal is logged and does not fail the delete.
    pub async fn delete_static_role(&self, name: &str) -> RotationResult<()> {
        let engine = &self.engine;
        let _guard = engine.locks.lock(name).await;

        engine.queue.pop_by_name(name);
        let role = match engine.roles.get_static(name).await {
            Ok(role) => role,
            Err(RotationError::Storage(err)) if err.is_corruption() => {
                warn!(role = %name, error = %err, "Deleting unreadable role record");
                None
            }
            Err(err) => return Err(err),
        };

        let mut failures = Vec::new();
        let mut wal_ids = Vec::new();
        for entry in engine.wal.find_for_role(name).await? {
            match entry {
                Ok(wal_id) => wal_ids.push(wal_id),
                Err((wal_id, err)) => failures.push(format!("{wal_id}: {err}")),
            }
        }
        if let Some(entry) = engine.quarantine.release(name) {
            if let Some(wal_id) = entry.wal_id {
                if !wal_ids.contains(&wal_id) {
                    wal_ids.push(wal_id);
                }
            }
        }

        let role_key = RoleStore::key(RoleKind::Static, name);
        match engine.storage.begin().await? {
            Some(tx) => {
                if let Err(err) = delete_records(&*tx, &role_key, &wal_ids, &mut failures).await {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(role = %name, error = %rollback, "Rollback failed");
                    }
                    return Err(err.into());
                }
                tx.commit().await?;
            }
            None => {
                delete_records(&*engine.storage, &role_key, &wal_ids, &mut failures).await?;
            }
        }
        info!(role = %name, wal_records = wal_ids.len(), "Deleted static role");

        if let Some(RoleEntry {
            db_name,
            static_account: Some(account),
            ..
        }) = role
        {
            if account.revoke_user_on_delete {
                self.revoke(name, db_name, account).await;
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RotationError::Cleanup {
                role: name.to_string(),
                failures,
            })
        }
    }

    async fn revoke(&self, name: &str, db_name: String, account: StaticAccount) {
        let request = RevokeRequest {
            db_name,
            role_name: name.to_string(),
            username: account.username,
        };
        let timeout = self.engine.config.driver_timeout;
        match tokio::time::timeout(timeout, self.engine.driver.revoke_static_account(&request))
            .await
        {
            Ok(Ok(())) => {
                info!(role = %name, username = %request.username, "Removed static account");
            }
            Ok(Err(err)) => {
                warn!(role = %name, username = %request.username, error = %err, "Failed to remove static account");
            }
            Err(_) => {
                warn!(role = %name, username = %request.username, ?timeout, "Removing static account timed out");
            }
        }
    }

    /// Role names of one kind in ascending order, starting after `after`
    ///
    /// A `limit` of `None` or `<= 0` lists every role.
    pub async fn list_roles(
        &self,
        kind: RoleKind,
        after: Option<&str>,
        limit: Option<i64>,
    ) -> RotationResult<Vec<String>> {
        self.engine.roles.list(kind, after, limit).await
    }

    /// Rotate a static role immediately
    ///
    /// Returns the new last-rotation time. Unlike scheduled rotation, a
    /// failure is returned to the caller; the role is still rescheduled
    /// with backoff.
    pub async fn rotate_role(&self, name: &str) -> RotationResult<DateTime<Utc>> {
        self.engine.rotate_now(name).await
    }

    async fn release_quarantine(&self, name: &str) {
        let Some(entry) = self.engine.quarantine.release(name) else {
            return;
        };
        info!(role = %name, reason = %entry.reason, "Released role from quarantine");
        if let Some(wal_id) = entry.wal_id {
            if let Err(err) = self.engine.wal.delete(&wal_id).await {
                warn!(role = %name, wal_id = %wal_id, error = %err, "Failed to remove unreadable WAL record");
            }
        }
    }
}

fn blank_role() -> RoleEntry {
    RoleEntry {
        db_name: String::new(),
        statements: Statements::default(),
        default_ttl: Duration::ZERO,
        max_ttl: Duration::ZERO,
        credential_type: CredentialType::default(),
        credential_config: ConfigMap::new(),
        static_account: None,
    }
}

fn blank_account() -> StaticAccount {
    StaticAccount {
        username: String::new(),
        credential: None,
        last_vault_rotation: None,
        rotation_period: Duration::ZERO,
        revoke_user_on_delete: false,
    }
}

/// Set the credential type and re-validate its options
///
/// Omitted options are kept while the type is unchanged. On a type change
/// they are re-checked against the new type and reset to its defaults when
/// rejected. Stored options are always the generator's normalized ones.
fn apply_credential(
    role: &mut RoleEntry,
    creating: bool,
    credential_type: Option<String>,
    credential_config: Option<ConfigMap>,
) -> RotationResult<()> {
    let mut type_changed = false;
    if let Some(raw) = credential_type {
        let parsed: CredentialType = raw
            .parse()
            .map_err(|err: ValidationError| RotationError::validation(err.to_string()))?;
        type_changed = parsed != role.credential_type;
        role.credential_type = parsed;
    }

    let config = match credential_config {
        Some(config) => config,
        None if creating => ConfigMap::new(),
        None if type_changed => {
            // stored options carry over when the new type accepts them
            if let Ok(generator) =
                CredentialGenerator::new(role.credential_type, &role.credential_config)
            {
                role.credential_config = generator.config_map();
                return Ok(());
            }
            ConfigMap::new()
        }
        None => return Ok(()),
    };
    let generator = CredentialGenerator::new(role.credential_type, &config).map_err(|err| {
        match err {
            GeneratorError::Validation(err) => RotationError::from(err),
            other => RotationError::Generator(other),
        }
    })?;
    role.credential_config = generator.config_map();
    Ok(())
}

/// Delete a role record and its WAL records
///
/// The role delete is fatal; WAL failures are collected.
async fn delete_records<S: Storage + ?Sized>(
    storage: &S,
    role_key: &str,
    wal_ids: &[String],
    failures: &mut Vec<String>,
) -> Result<(), StorageError> {
    storage.delete(role_key).await?;
    for wal_id in wal_ids {
        match storage.delete(&Wal::key(wal_id)).await {
            Ok(()) => debug!(wal_id = %wal_id, "Deleted WAL record of deleted role"),
            Err(err) => failures.push(format!("{wal_id}: {err}")),
        }
    }
    Ok(())
}
