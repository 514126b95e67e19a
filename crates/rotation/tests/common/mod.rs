//! Shared harness for rotation integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vigil_credential::CredentialMaterial;
use vigil_rotation::testing::{MockDriver, TestClock};
use vigil_rotation::{
    Clock, RoleStore, RotationConfig, RotationService, RotationServiceBuilder, StaticAccount,
    WAL_PREFIX,
};
use vigil_storage::{MemoryStorage, Storage};

pub const PERIOD: Duration = Duration::from_secs(5);

/// Defaults with a 5s tick
pub fn config() -> RotationConfig {
    RotationConfig {
        tick_interval: Duration::from_secs(5),
        ..RotationConfig::default()
    }
}

pub struct Harness {
    pub clock: Arc<TestClock>,
    pub driver: Arc<MockDriver>,
    pub storage: MemoryStorage,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new())
    }

    pub fn with_storage(storage: MemoryStorage) -> Self {
        vigil_log::init_test();
        Self {
            clock: TestClock::new(),
            driver: MockDriver::new(),
            storage,
        }
    }

    /// Builder over the harness storage, no background ticker
    pub fn builder(&self, config: RotationConfig) -> RotationServiceBuilder {
        self.builder_over(config, Arc::new(self.storage.clone()))
    }

    pub fn builder_over(
        &self,
        config: RotationConfig,
        storage: Arc<dyn Storage>,
    ) -> RotationServiceBuilder {
        RotationService::builder(config, storage, self.driver.clone())
            .clock(self.clock.clone())
            .without_ticker()
    }

    pub async fn start(&self) -> RotationService {
        self.builder(config()).start().await.unwrap()
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub async fn account(&self, name: &str) -> StaticAccount {
        RoleStore::new(Arc::new(self.storage.clone()))
            .get_static(name)
            .await
            .unwrap()
            .and_then(|role| role.static_account)
            .unwrap()
    }

    pub async fn credential(&self, name: &str) -> Option<CredentialMaterial> {
        self.account(name).await.credential
    }

    pub fn wal_keys(&self) -> Vec<String> {
        self.storage
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(WAL_PREFIX))
            .collect()
    }
}
