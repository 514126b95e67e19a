//! Rotation service lifecycle
//!
//! Startup order matters: WAL recovery runs first, then the queue is
//! rebuilt from the stored roles, and only then does the scheduler tick.
//! Recovery requeues the roles it touches, so the rebuild only adds the
//! roles it has not seen.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_storage::Storage;

use crate::clock::{Clock, SystemClock};
use crate::config::RotationConfig;
use crate::driver::DatabaseDriver;
use crate::engine::Engine;
use crate::events::{EventBus, RotationEvent};
use crate::lock::LockTable;
use crate::manager::RoleManager;
use crate::quarantine::Quarantine;
use crate::queue::RotationQueue;
use crate::recovery::RecoveryReport;
use crate::scheduler::{Scheduler, TickReport};
use crate::RotationResult;

/// Builder for [`RotationService`]
pub struct RotationServiceBuilder {
    config: RotationConfig,
    storage: Arc<dyn Storage>,
    driver: Arc<dyn DatabaseDriver>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    ticker: bool,
}

impl RotationServiceBuilder {
    /// Use `clock` instead of the system clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Buffer up to `capacity` events per subscriber
    ///
    /// Replaces the event bus, dropping earlier subscribers.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.events = EventBus::new(capacity);
        self
    }

    /// Subscribe before startup, so recovery events are observed
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.events.subscribe()
    }

    /// Do not spawn the scheduler task; ticks are driven with [`RotationService::tick`]
    #[must_use]
    pub fn without_ticker(mut self) -> Self {
        self.ticker = false;
        self
    }

    /// Validate the config, recover in-flight rotations, rebuild the queue
    /// and start the scheduler
    ///
    /// # Errors
    ///
    /// - [`RotationError::Config`](crate::RotationError::Config) for an invalid config
    /// - [`RotationError::Storage`](crate::RotationError::Storage) if WAL
    ///   records or roles cannot be listed
    pub async fn start(self) -> RotationResult<RotationService> {
        self.config.validate()?;
        let engine = Arc::new(Engine::new(
            self.config,
            self.storage,
            self.driver,
            self.clock,
            self.events,
        ));

        let recovery = engine.recover().await?;
        let queued = engine.rebuild_queue().await?;

        let shutdown = CancellationToken::new();
        let task = self.ticker.then(|| {
            let scheduler = Scheduler::new(Arc::clone(&engine));
            tokio::spawn(scheduler.run(shutdown.clone()))
        });

        info!(
            queued = engine.queue.len(),
            rebuilt = queued,
            recovered = recovery.recovered,
            quarantined = engine.quarantine.roles().len(),
            ticker = task.is_some(),
            "Rotation service started"
        );
        Ok(RotationService {
            manager: RoleManager::new(Arc::clone(&engine)),
            scheduler: Scheduler::new(Arc::clone(&engine)),
            engine,
            recovery,
            shutdown,
            task,
        })
    }
}

impl fmt::Debug for RotationServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationServiceBuilder")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("ticker", &self.ticker)
            .finish_non_exhaustive()
    }
}

/// Running rotation engine: scheduler task plus administrative API
pub struct RotationService {
    engine: Arc<Engine>,
    manager: RoleManager,
    scheduler: Scheduler,
    recovery: RecoveryReport,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RotationService {
    /// Builder with the system clock and a background scheduler
    pub fn builder(
        config: RotationConfig,
        storage: Arc<dyn Storage>,
        driver: Arc<dyn DatabaseDriver>,
    ) -> RotationServiceBuilder {
        RotationServiceBuilder {
            config,
            storage,
            driver,
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
            ticker: true,
        }
    }

    /// Start with defaults; see [`RotationServiceBuilder::start`]
    pub async fn start(
        config: RotationConfig,
        storage: Arc<dyn Storage>,
        driver: Arc<dyn DatabaseDriver>,
    ) -> RotationResult<Self> {
        Self::builder(config, storage, driver).start().await
    }

    /// Administrative role API
    pub fn manager(&self) -> &RoleManager {
        &self.manager
    }

    /// Subscribe to rotation events
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.engine.events.subscribe()
    }

    /// Pending rotations
    pub fn queue(&self) -> &RotationQueue {
        &self.engine.queue
    }

    /// Per-role locks shared by the scheduler and the role manager
    pub fn locks(&self) -> &LockTable {
        &self.engine.locks
    }

    /// Roles excluded from automatic rotation
    pub fn quarantine(&self) -> &Quarantine {
        &self.engine.quarantine
    }

    /// Active configuration
    pub fn config(&self) -> &RotationConfig {
        &self.engine.config
    }

    /// What startup recovery did
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    /// Run one scheduler tick to completion
    ///
    /// Meant for services built with
    /// [`without_ticker`](RotationServiceBuilder::without_ticker).
    pub async fn tick(&self) -> TickReport {
        self.scheduler.tick().await
    }

    /// Stop the scheduler and wait for in-flight rotations
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Scheduler task ended abnormally");
            }
        }
        info!("Rotation service stopped");
    }
}

impl fmt::Debug for RotationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationService")
            .field("config", &self.engine.config)
            .field("queue", &self.engine.queue)
            .field("recovery", &self.recovery)
            .field("ticker", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for RotationService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
