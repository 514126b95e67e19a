//! Rotation pipeline shared by the scheduler, recovery and manual rotation
//!
//! One rotation of a static role, always under the role's lock:
//!
//! 1. generate new material (or reuse the material of a fresh WAL record),
//! 2. write the WAL record,
//! 3. apply the material through the database driver, bounded by a deadline,
//! 4. persist the role with the new material and `last_vault_rotation = now`,
//! 5. delete the WAL record,
//! 6. re-push the queue item at `now + rotation_period`.
//!
//! The WAL write precedes the driver call: the driver call is the only
//! non-idempotent, non-local step, so its inputs must be durable first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use vigil_credential::{CredentialGenerator, GenerateRequest};
use vigil_storage::Storage;

use crate::clock::{self, Clock};
use crate::config::RotationConfig;
use crate::driver::{DatabaseDriver, SetCredentialRequest};
use crate::events::{EventBus, RotationEvent};
use crate::lock::LockTable;
use crate::quarantine::{Quarantine, QuarantineEntry};
use crate::queue::{QueueItem, RotationQueue};
use crate::role::{RoleEntry, RoleKind, StaticAccount};
use crate::store::RoleStore;
use crate::wal::{Wal, WalEntry, WalRecord};
use crate::{RotationError, RotationResult};

/// Step of the pipeline a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Generate,
    WalWrite,
    Apply,
    Persist,
}

#[derive(Debug)]
pub(crate) struct Failure {
    pub(crate) stage: Stage,
    /// WAL record left behind, if one was written
    pub(crate) wal_id: Option<String>,
    pub(crate) error: RotationError,
}

impl Failure {
    fn new(stage: Stage, wal_id: Option<String>, error: impl Into<RotationError>) -> Self {
        Self {
            stage,
            wal_id,
            error: error.into(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Rotated {
    pub(crate) rotated_at: DateTime<Utc>,
    pub(crate) wal_id: String,
    pub(crate) wal_deleted: bool,
}

/// What happened to a popped queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Role rotated and requeued
    Rotated,
    /// Attempt failed and was rescheduled
    Failed,
    /// Role no longer due; requeued at its next rotation
    Skipped,
    /// Role gone or quarantined; item dropped
    Dropped,
    /// Role quarantined while processing the item
    Quarantined,
}

/// Shared rotation state owned by the service
pub(crate) struct Engine {
    pub(crate) config: RotationConfig,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) driver: Arc<dyn DatabaseDriver>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) roles: RoleStore,
    pub(crate) wal: Wal,
    pub(crate) queue: RotationQueue,
    pub(crate) locks: LockTable,
    pub(crate) events: EventBus,
    pub(crate) quarantine: Quarantine,
}

impl Engine {
    pub(crate) fn new(
        config: RotationConfig,
        storage: Arc<dyn Storage>,
        driver: Arc<dyn DatabaseDriver>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            roles: RoleStore::new(Arc::clone(&storage)),
            wal: Wal::new(Arc::clone(&storage)),
            queue: RotationQueue::new(),
            locks: LockTable::new(config.lock_stripes),
            quarantine: Quarantine::default(),
            config,
            storage,
            driver,
            clock,
            events,
        }
    }

    /// Rotate one role; the caller holds the role's lock
    pub(crate) async fn rotate_locked(
        &self,
        name: &str,
        role: &mut RoleEntry,
        reuse: Option<WalRecord>,
        now: DateTime<Utc>,
    ) -> Result<Rotated, Failure> {
        let Some(account) = role.static_account.as_ref() else {
            return Err(Failure::new(
                Stage::Generate,
                None,
                RotationError::Recovery {
                    role: name.to_string(),
                    reason: "static role record has no static account".into(),
                },
            ));
        };

        let record = match reuse {
            Some(record) => {
                debug!(role = %name, wal_id = %record.id, "Reusing material from WAL");
                record
            }
            None => {
                let generator =
                    CredentialGenerator::new(role.credential_type, &role.credential_config)
                        .map_err(|e| Failure::new(Stage::Generate, None, e))?;
                let material = generator
                    .generate(&GenerateRequest::new(name, &account.username))
                    .map_err(|e| Failure::new(Stage::Generate, None, e))?;

                let record = WalRecord::new(name, account, material, now);
                self.wal
                    .put(&record)
                    .await
                    .map_err(|e| Failure::new(Stage::WalWrite, None, e))?;
                debug!(role = %name, wal_id = %record.id, "WAL record written");
                record
            }
        };
        let wal_id = record.id.clone();

        let request = SetCredentialRequest {
            db_name: role.db_name.clone(),
            role_name: name.to_string(),
            username: account.username.clone(),
            credential: record.credential.clone(),
            statements: role.statements.rotation.clone(),
            credential_type: role.credential_type,
            credential_config: role.credential_config.clone(),
        };
        let committed_at = self
            .apply(&request)
            .await
            .map_err(|e| Failure::new(Stage::Apply, Some(wal_id.clone()), e))?;

        if let Some(account) = role.static_account.as_mut() {
            account.credential = Some(record.credential);
            account.last_vault_rotation = Some(now);
        }
        self.roles
            .put(RoleKind::Static, name, role)
            .await
            .map_err(|e| Failure::new(Stage::Persist, Some(wal_id.clone()), e))?;

        let wal_deleted = match self.wal.delete(&wal_id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(role = %name, wal_id = %wal_id, error = %err, "Failed to delete WAL after rotation");
                false
            }
        };

        debug!(role = %name, committed_at = %committed_at, "Credential applied");
        Ok(Rotated {
            rotated_at: now,
            wal_id,
            wal_deleted,
        })
    }

    async fn apply(&self, request: &SetCredentialRequest) -> RotationResult<DateTime<Utc>> {
        let timeout = self.config.driver_timeout;
        match tokio::time::timeout(timeout, self.driver.set_static_credential(request)).await {
            Ok(Ok(committed_at)) => Ok(committed_at),
            Ok(Err(source)) => Err(RotationError::Driver {
                role: request.role_name.clone(),
                source,
            }),
            Err(_) => Err(RotationError::Timeout {
                role: request.role_name.clone(),
                timeout,
            }),
        }
    }

    /// Requeue after a successful rotation; the caller holds the role's lock
    pub(crate) fn finish(&self, name: &str, account: &StaticAccount, rotated: &Rotated) {
        let next_rotation = clock::add(rotated.rotated_at, account.rotation_period);
        let item = if rotated.wal_deleted {
            QueueItem::new(name, next_rotation)
        } else {
            // retry the cleanup next tick; the role itself is not due again
            QueueItem {
                wal_id: Some(rotated.wal_id.clone()),
                ..QueueItem::new(name, rotated.rotated_at)
            }
        };
        self.queue.push(item);

        info!(role = %name, next_rotation = %next_rotation, "Rotated static role credential");
        self.events.publish(RotationEvent::Rotated {
            role: name.to_string(),
            rotated_at: rotated.rotated_at,
            next_rotation,
        });
    }

    /// Requeue after a failed attempt; the caller holds the role's lock
    pub(crate) fn reschedule(&self, item: QueueItem, failure: &Failure, now: DateTime<Utc>) {
        let name = item.name.clone();
        match failure.stage {
            Stage::Generate | Stage::Apply => {
                let policy = &self.config.retry_backoff;
                let attempt = item.attempt.saturating_add(1);
                let next_retry = clock::add(now, policy.backoff_duration(attempt - 1));

                warn!(
                    role = %name,
                    attempt,
                    error = %failure.error,
                    next_retry = %next_retry,
                    "Rotation failed, retry scheduled"
                );
                self.events.publish(RotationEvent::RotationFailed {
                    role: name.clone(),
                    attempt,
                    error: failure.error.to_string(),
                    next_retry,
                });
                // reported once, on the failure that exhausts the budget
                if policy.is_exhausted(attempt) && !policy.is_exhausted(attempt - 1) {
                    error!(
                        role = %name,
                        attempts = attempt,
                        error = %failure.error,
                        "Rotation retries exhausted, continuing at max backoff"
                    );
                    self.events.publish(RotationEvent::RetriesExhausted {
                        role: name.clone(),
                        attempts: attempt,
                        error: failure.error.to_string(),
                    });
                }

                self.queue.push(QueueItem {
                    name,
                    priority: next_retry.timestamp(),
                    wal_id: failure.wal_id.clone(),
                    attempt,
                });
            }
            Stage::WalWrite | Stage::Persist => {
                warn!(
                    role = %name,
                    stage = ?failure.stage,
                    error = %failure.error,
                    "Rotation aborted by storage failure, retrying next tick"
                );
                let wal_id = failure.wal_id.clone().or_else(|| item.wal_id.clone());
                self.queue.push(QueueItem {
                    wal_id,
                    ..item.due_at(now)
                });
            }
        }
    }

    /// Process one popped queue item
    pub(crate) async fn process_item(&self, item: QueueItem) -> ItemOutcome {
        let name = item.name.clone();
        if self.quarantine.contains(&name) {
            debug!(role = %name, "Skipping quarantined role");
            return ItemOutcome::Dropped;
        }

        let _guard = self.locks.lock(&name).await;
        let now = self.clock.now();

        let mut role = match self.roles.get_static(&name).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                info!(role = %name, "Role removed before rotation, dropping queue item");
                self.discard_role_wals(&name, "role deleted").await;
                return ItemOutcome::Dropped;
            }
            Err(RotationError::Storage(err)) if err.is_corruption() => {
                self.quarantine_role(&name, None, format!("stored role record is corrupt: {err}"));
                return ItemOutcome::Quarantined;
            }
            Err(err) => {
                warn!(role = %name, error = %err, "Failed to load role, retrying next tick");
                self.queue.push(item.due_at(now));
                return ItemOutcome::Failed;
            }
        };
        let Some(account) = role.static_account.clone() else {
            self.quarantine_role(&name, None, "static role record has no static account".into());
            return ItemOutcome::Quarantined;
        };

        let reuse = match self.fresh_wal(&name, &account, item.wal_id.as_deref()).await {
            Ok(reuse) => reuse,
            Err(outcome) => {
                if outcome == ItemOutcome::Failed {
                    self.queue.push(item.due_at(now));
                }
                return outcome;
            }
        };

        // judged at the queue's whole-second granularity
        let next = QueueItem::new(&name, account.due_at(now));
        if reuse.is_none() && !next.is_due(now) {
            debug!(role = %name, due = %next.due(), "Role no longer due, requeued");
            self.queue.push(next);
            return ItemOutcome::Skipped;
        }

        match self.rotate_locked(&name, &mut role, reuse, now).await {
            Ok(rotated) => {
                self.finish(&name, &account, &rotated);
                ItemOutcome::Rotated
            }
            Err(failure) => {
                self.reschedule(item, &failure, now);
                ItemOutcome::Failed
            }
        }
    }

    /// Load the WAL record named by a queue item and decide whether it is reusable
    ///
    /// Stale records are discarded. `Err` carries the outcome to report
    /// when the item cannot be processed this tick.
    async fn fresh_wal(
        &self,
        name: &str,
        account: &StaticAccount,
        wal_id: Option<&str>,
    ) -> Result<Option<WalRecord>, ItemOutcome> {
        let Some(wal_id) = wal_id else {
            return Ok(None);
        };
        match self.wal.get(wal_id).await {
            Ok(Some(WalEntry::Valid(record))) => match record.staleness(account) {
                None => Ok(Some(record)),
                Some(reason) => {
                    self.discard_wal(name, &record.id, reason).await;
                    Ok(None)
                }
            },
            Ok(Some(WalEntry::Corrupt { id, error, .. })) => {
                self.quarantine_role(name, Some(id), format!("WAL record is corrupt: {error}"));
                Err(ItemOutcome::Quarantined)
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!(role = %name, wal_id, error = %err, "Failed to read WAL, retrying next tick");
                Err(ItemOutcome::Failed)
            }
        }
    }

    /// Manual rotation; driver failures are returned to the caller
    pub(crate) async fn rotate_now(&self, name: &str) -> RotationResult<DateTime<Utc>> {
        let _guard = self.locks.lock(name).await;
        let now = self.clock.now();

        if let Some(entry) = self.quarantine.get(name) {
            return Err(RotationError::Recovery {
                role: name.to_string(),
                reason: entry.reason,
            });
        }
        let mut role = self
            .roles
            .get_static(name)
            .await?
            .ok_or_else(|| RotationError::NotFound {
                name: name.to_string(),
            })?;
        let account = role.static_account.clone().ok_or_else(|| RotationError::Recovery {
            role: name.to_string(),
            reason: "static role record has no static account".into(),
        })?;

        let item = self
            .queue
            .pop_by_name(name)
            .unwrap_or_else(|| QueueItem::new(name, now));
        let reuse = match self.fresh_wal(name, &account, item.wal_id.as_deref()).await {
            Ok(reuse) => reuse,
            Err(outcome) => {
                if outcome == ItemOutcome::Failed {
                    self.queue.push(item);
                }
                return Err(RotationError::Recovery {
                    role: name.to_string(),
                    reason: "WAL record could not be read".into(),
                });
            }
        };

        match self.rotate_locked(name, &mut role, reuse, now).await {
            Ok(rotated) => {
                self.finish(name, &account, &rotated);
                Ok(rotated.rotated_at)
            }
            Err(failure) => {
                self.reschedule(item, &failure, now);
                Err(failure.error)
            }
        }
    }

    pub(crate) fn quarantine_role(&self, name: &str, wal_id: Option<String>, reason: String) {
        self.queue.pop_by_name(name);
        let entry = QuarantineEntry {
            reason: reason.clone(),
            wal_id,
            since: self.clock.now(),
        };
        if self.quarantine.insert(name, entry) {
            error!(role = %name, reason = %reason, "Role quarantined, automatic rotation stopped");
            self.events.publish(RotationEvent::Quarantined {
                role: name.to_string(),
                reason,
            });
        }
    }

    pub(crate) async fn discard_wal(&self, name: &str, wal_id: &str, reason: &str) {
        match self.wal.delete(wal_id).await {
            Ok(()) => {
                info!(role = %name, wal_id, reason, "Discarded WAL record");
                self.events.publish(RotationEvent::WalDiscarded {
                    role: name.to_string(),
                    wal_id: wal_id.to_string(),
                    reason: reason.to_string(),
                });
            }
            Err(err) => {
                warn!(role = %name, wal_id, error = %err, "Failed to discard WAL record");
            }
        }
    }

    /// Best-effort removal of every WAL record naming `name`
    pub(crate) async fn discard_role_wals(&self, name: &str, reason: &str) {
        let found = match self.wal.find_for_role(name).await {
            Ok(found) => found,
            Err(err) => {
                warn!(role = %name, error = %err, "Failed to list WAL records");
                return;
            }
        };
        for entry in found {
            match entry {
                Ok(wal_id) => self.discard_wal(name, &wal_id, reason).await,
                Err((wal_id, err)) => {
                    warn!(role = %name, wal_id = %wal_id, error = %err, "Failed to read WAL record");
                }
            }
        }
    }

    /// Queue one item per stored static role that has none yet
    pub(crate) async fn rebuild_queue(&self) -> RotationResult<usize> {
        let now = self.clock.now();
        let mut pushed = 0;
        for name in self.roles.list(RoleKind::Static, None, None).await? {
            if self.queue.contains(&name) || self.quarantine.contains(&name) {
                continue;
            }
            match self.roles.get_static(&name).await {
                Ok(Some(RoleEntry {
                    static_account: Some(account),
                    ..
                })) => {
                    self.queue.push(QueueItem::new(&name, account.due_at(now)));
                    pushed += 1;
                }
                Ok(Some(_)) => {
                    self.quarantine_role(&name, None, "static role record has no static account".into());
                }
                Ok(None) => {}
                Err(RotationError::Storage(err)) if err.is_corruption() => {
                    self.quarantine_role(&name, None, format!("stored role record is corrupt: {err}"));
                }
                Err(err) => return Err(err),
            }
        }
        info!(roles = pushed, "Rotation queue rebuilt");
        Ok(pushed)
    }
}
