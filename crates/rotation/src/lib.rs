//! Vigil Rotation - static database credential rotation
//!
//! Keeps the credentials of long-lived database accounts fresh. Every static
//! role names one pre-existing account and a rotation period; the engine
//! rotates the account's credential each period and survives crashes in the
//! middle of a rotation.
//!
//! # Architecture
//!
//! - [`RotationQueue`]: in-memory priority queue of `(role, next due time)`,
//!   rebuilt from storage at startup.
//! - [`LockTable`]: striped per-role locks; every mutation of a static role,
//!   whether administrative or scheduled, runs under the role's lock.
//! - [`Wal`]: write-ahead records holding new material until the rotation is
//!   committed, so an interrupted rotation is re-applied with the same
//!   material instead of a new one.
//! - [`RoleManager`]: administrative create/update/read/delete/list.
//! - [`RotationService`]: owns the scheduler task; runs recovery and rebuilds
//!   the queue before the first tick.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use vigil_rotation::{
//!     DatabaseDriver, RotationConfig, RotationService, StaticRoleRequest,
//! };
//! use vigil_storage::MemoryStorage;
//!
//! # async fn example(driver: Arc<dyn DatabaseDriver>) -> vigil_rotation::RotationResult<()> {
//! let service =
//!     RotationService::start(RotationConfig::default(), Arc::new(MemoryStorage::new()), driver)
//!         .await?;
//!
//! service
//!     .manager()
//!     .write_static_role(
//!         "db-user1",
//!         StaticRoleRequest::new()
//!             .db_name("pg")
//!             .username("svc_a")
//!             .rotation_period(Duration::from_secs(3600)),
//!     )
//!     .await?;
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod clock;
/// Engine configuration and its loaders
pub mod config;
mod driver;
mod engine;
mod error;
mod events;
mod lock;
mod manager;
mod quarantine;
mod queue;
mod recovery;
mod retry;
/// Role data model and read views
pub mod role;
mod scheduler;
mod service;
mod store;
mod wal;

/// Test doubles: mock driver, controllable clock, failing storage
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::RotationConfig;
pub use driver::{DatabaseDriver, DriverError, RevokeRequest, SetCredentialRequest};
pub use engine::ItemOutcome;
pub use error::{RotationError, RotationResult};
pub use events::{EventBus, RotationEvent};
pub use lock::{LockTable, RoleGuard};
pub use manager::{DynamicRoleRequest, RoleManager, StaticRoleRequest, WriteOutcome};
pub use quarantine::{Quarantine, QuarantineEntry};
pub use queue::{QueueItem, RotationQueue};
pub use recovery::RecoveryReport;
pub use retry::RetryPolicy;
pub use role::{
    DynamicRoleView, RoleEntry, RoleKind, RoleView, StaticAccount, StaticRoleView, Statements,
};
pub use scheduler::TickReport;
pub use service::{RotationService, RotationServiceBuilder};
pub use store::RoleStore;
pub use wal::{WAL_PREFIX, Wal, WalEntry, WalRecord};
