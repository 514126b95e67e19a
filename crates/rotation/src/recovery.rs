//! Crash recovery
//!
//! Runs once at startup, before the queue is rebuilt and before the first
//! tick. Every surviving WAL record marks a rotation whose external apply
//! may or may not have happened. Records that still match their role are
//! re-applied with the stored material (the generator is not run again),
//! then committed exactly like a normal rotation.

use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::events::RotationEvent;
use crate::queue::QueueItem;
use crate::role::RoleEntry;
use crate::wal::{WalEntry, WalRecord};
use crate::{RotationError, RotationResult};

/// Counts of what recovery did with each WAL record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records re-applied and committed
    pub recovered: usize,
    /// Records deleted because their role is gone or moved on
    pub discarded: usize,
    /// Records whose re-apply failed; retried by the scheduler
    pub retrying: usize,
    /// Roles quarantined
    pub quarantined: usize,
}

impl Engine {
    pub(crate) async fn recover(&self) -> RotationResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let ids = self.wal.list().await?;
        if ids.is_empty() {
            return Ok(report);
        }
        info!(records = ids.len(), "Recovering in-flight rotations");

        for id in ids {
            let record = match self.wal.get(&id).await? {
                Some(WalEntry::Valid(record)) => record,
                Some(WalEntry::Corrupt {
                    id,
                    role_name: Some(role),
                    error,
                }) => {
                    self.quarantine_role(&role, Some(id), format!("WAL record is corrupt: {error}"));
                    report.quarantined += 1;
                    continue;
                }
                Some(WalEntry::Corrupt {
                    id,
                    role_name: None,
                    error,
                }) => {
                    // no role to attribute it to; keep it for an operator
                    error!(wal_id = %id, error = %error, "Unreadable WAL record left in place");
                    continue;
                }
                None => continue,
            };
            self.recover_record(record, &mut report).await?;
        }

        info!(
            recovered = report.recovered,
            discarded = report.discarded,
            retrying = report.retrying,
            quarantined = report.quarantined,
            "Recovery finished"
        );
        Ok(report)
    }

    async fn recover_record(
        &self,
        record: WalRecord,
        report: &mut RecoveryReport,
    ) -> RotationResult<()> {
        let name = record.role_name.clone();
        let _guard = self.locks.lock(&name).await;
        let now = self.clock.now();

        if self.quarantine.contains(&name) {
            return Ok(());
        }

        let mut role = match self.roles.get_static(&name).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                self.discard_wal(&name, &record.id, "role deleted").await;
                report.discarded += 1;
                return Ok(());
            }
            Err(RotationError::Storage(err)) if err.is_corruption() => {
                self.quarantine_role(&name, None, format!("stored role record is corrupt: {err}"));
                report.quarantined += 1;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let account = match &role {
            RoleEntry {
                static_account: Some(account),
                ..
            } => account.clone(),
            _ => {
                self.quarantine_role(&name, None, "static role record has no static account".into());
                report.quarantined += 1;
                return Ok(());
            }
        };

        if let Some(reason) = record.staleness(&account) {
            self.discard_wal(&name, &record.id, reason).await;
            report.discarded += 1;
            return Ok(());
        }

        let wal_id = record.id.clone();
        let item = QueueItem {
            wal_id: Some(wal_id.clone()),
            ..QueueItem::new(&name, now)
        };
        match self.rotate_locked(&name, &mut role, Some(record), now).await {
            Ok(rotated) => {
                self.finish(&name, &account, &rotated);
                self.events.publish(RotationEvent::Recovered {
                    role: name.clone(),
                    wal_id,
                    rotated_at: rotated.rotated_at,
                });
                info!(role = %name, "Recovered in-flight rotation");
                report.recovered += 1;
            }
            Err(failure) => {
                warn!(role = %name, error = %failure.error, "Re-applying WAL failed during recovery");
                self.reschedule(item, &failure, now);
                report.retrying += 1;
            }
        }
        Ok(())
    }
}
