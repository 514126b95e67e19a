//! Test doubles for the rotation engine
//!
//! - [`MockDriver`]: records every call, fails on demand
//! - [`TestClock`]: follows tokio's (pausable) clock plus a manual offset
//! - [`FlakyStorage`]: fails writes under a key prefix a set number of times

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use vigil_storage::{MemoryStorage, Storage, StorageError, StorageResult, Transaction};

use crate::clock::{self, Clock};
use crate::driver::{DatabaseDriver, DriverError, RevokeRequest, SetCredentialRequest};
use crate::manager::StaticRoleRequest;

/// Mock database driver with configurable failures
#[derive(Debug, Default)]
pub struct MockDriver {
    calls: Mutex<Vec<SetCredentialRequest>>,
    revocations: Mutex<Vec<RevokeRequest>>,
    fail_next: AtomicU32,
    fail_always: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockDriver {
    /// Driver that accepts every call
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` calls
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call until turned off
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every call
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Number of `set_static_credential` calls, failed ones included
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every `set_static_credential` request, oldest first
    pub fn calls(&self) -> Vec<SetCredentialRequest> {
        self.calls.lock().clone()
    }

    /// Calls made for one role
    pub fn calls_for(&self, role: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.role_name == role)
            .count()
    }

    /// Every account removal request
    pub fn revocations(&self) -> Vec<RevokeRequest> {
        self.revocations.lock().clone()
    }

    fn should_fail(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    async fn set_static_credential(
        &self,
        request: &SetCredentialRequest,
    ) -> Result<DateTime<Utc>, DriverError> {
        self.calls.lock().push(request.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail() {
            return Err(DriverError::new("mock driver failure"));
        }
        Ok(Utc::now())
    }

    async fn revoke_static_account(&self, request: &RevokeRequest) -> Result<(), DriverError> {
        self.revocations.lock().push(request.clone());
        if self.should_fail() {
            return Err(DriverError::new("mock driver failure"));
        }
        Ok(())
    }
}

/// Clock driven by tokio time plus a manual offset
///
/// Under `#[tokio::test(start_paused = true)]` the clock moves with
/// `tokio::time::advance` and auto-advance; [`advance`](Self::advance)
/// moves it without touching tokio timers.
pub struct TestClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
    offset: Mutex<Duration>,
}

impl TestClock {
    /// Clock starting at 2024-01-01T00:00:00Z
    pub fn new() -> Arc<Self> {
        let base = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self::starting_at(base)
    }

    /// Clock starting at `base`
    pub fn starting_at(base: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            base,
            start: tokio::time::Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.start.elapsed() + *self.offset.lock();
        clock::add(self.base, elapsed)
    }
}

impl fmt::Debug for TestClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClock").field("now", &self.now()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Get,
    Put,
    Delete,
}

#[derive(Debug)]
struct Rule {
    op: Op,
    prefix: String,
    remaining: u32,
}

/// Storage that fails selected operations
///
/// Wraps a [`MemoryStorage`]; the inner store can be shared with a second
/// service to simulate a restart over the same data. Reports no
/// transaction support so every write goes through the failure rules.
#[derive(Debug, Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    rules: Arc<Mutex<Vec<Rule>>>,
}

impl FlakyStorage {
    /// Flaky view over `inner`
    pub fn new(inner: MemoryStorage) -> Arc<Self> {
        Arc::new(Self {
            inner,
            rules: Arc::default(),
        })
    }

    /// The wrapped store
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Fail the next `times` reads of keys starting with `prefix`
    pub fn fail_gets(&self, prefix: &str, times: u32) {
        self.add_rule(Op::Get, prefix, times);
    }

    /// Fail the next `times` writes of keys starting with `prefix`
    pub fn fail_puts(&self, prefix: &str, times: u32) {
        self.add_rule(Op::Put, prefix, times);
    }

    /// Fail the next `times` deletes of keys starting with `prefix`
    pub fn fail_deletes(&self, prefix: &str, times: u32) {
        self.add_rule(Op::Delete, prefix, times);
    }

    fn add_rule(&self, op: Op, prefix: &str, remaining: u32) {
        self.rules.lock().push(Rule {
            op,
            prefix: prefix.to_string(),
            remaining,
        });
    }

    fn check(&self, op: Op, key: &str) -> StorageResult<()> {
        let mut rules = self.rules.lock();
        let hit = rules
            .iter_mut()
            .find(|rule| rule.op == op && rule.remaining > 0 && key.starts_with(&rule.prefix));
        match hit {
            Some(rule) => {
                rule.remaining -= 1;
                Err(StorageError::backend(format!("injected {op:?} failure for {key}")))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check(Op::Get, key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.check(Op::Put, key)?;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check(Op::Delete, key)?;
        self.inner.delete(key).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        self.inner.list_page(prefix, after, limit).await
    }

    async fn begin(&self) -> StorageResult<Option<Box<dyn Transaction>>> {
        Ok(None)
    }
}

/// Static role request with a password credential
pub fn static_role(db_name: &str, username: &str, period: Duration) -> StaticRoleRequest {
    StaticRoleRequest::new()
        .db_name(db_name)
        .username(username)
        .rotation_period(period)
}
