//! Per-role exclusive locks
//!
//! A fixed array of async mutexes; a role name maps to a stripe through
//! its SHA-256 digest. Memory stays bounded no matter how many roles
//! exist, at the cost of unrelated roles occasionally sharing a stripe.
//! Locks are not reentrant: never hold two role locks at once.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the whole read-modify-write span of one role
pub type RoleGuard = OwnedMutexGuard<()>;

/// Striped lock table keyed by role name
pub struct LockTable {
    stripes: Box<[Arc<Mutex<()>>]>,
}

impl LockTable {
    /// Table with `stripes` locks, rounded up to a power of two
    pub fn new(stripes: usize) -> Self {
        let count = stripes.max(1).next_power_of_two();
        Self {
            stripes: (0..count).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; a table has at least one stripe
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Stripe index of a role name
    pub fn stripe_of(&self, name: &str) -> usize {
        let digest = Sha256::digest(name.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let mask = self.stripes.len() - 1;
        (u64::from_be_bytes(prefix) as usize) & mask
    }

    /// Wait for the role's lock
    pub async fn lock(&self, name: &str) -> RoleGuard {
        Arc::clone(&self.stripes[self.stripe_of(name)])
            .lock_owned()
            .await
    }
}

impl fmt::Debug for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}
