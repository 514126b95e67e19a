//! Rotation scheduler
//!
//! A periodic loop that drains every due item on each tick and rotates the
//! roles concurrently, bounded by `max_concurrent_rotations`. Items are
//! popped before they are processed, so a slow rotation never holds up the
//! scan for other roles and no role is rotated twice in one tick.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::{Engine, ItemOutcome};

/// Outcomes of one scheduler tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Roles rotated
    pub rotated: usize,
    /// Attempts that failed and were rescheduled
    pub failed: usize,
    /// Items requeued because their role was no longer due
    pub skipped: usize,
    /// Items dropped because the role was deleted or quarantined
    pub dropped: usize,
}

impl TickReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Rotated => self.rotated += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Dropped | ItemOutcome::Quarantined => self.dropped += 1,
        }
    }

    /// Items handled in the tick
    pub fn total(&self) -> usize {
        self.rotated + self.failed + self.skipped + self.dropped
    }
}

pub(crate) struct Scheduler {
    engine: Arc<Engine>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        let permits = Arc::new(Semaphore::new(engine.config.max_concurrent_rotations));
        Self { engine, permits }
    }

    /// Pop every due item and spawn its processing into `tasks`
    fn dispatch_due(&self, tasks: &mut JoinSet<ItemOutcome>) -> usize {
        let now = self.engine.clock.now();
        let due = self.engine.queue.drain_due(now);
        let count = due.len();
        for item in due {
            let engine = Arc::clone(&self.engine);
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    // semaphore closed: shutting down, put the item back
                    engine.queue.push(item);
                    return ItemOutcome::Skipped;
                };
                engine.process_item(item).await
            });
        }
        if count > 0 {
            debug!(due = count, "Dispatched due rotations");
        }
        count
    }

    /// Run one tick to completion
    pub(crate) async fn tick(&self) -> TickReport {
        let mut tasks = JoinSet::new();
        self.dispatch_due(&mut tasks);

        let mut report = TickReport::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    error!(error = %err, "Rotation task panicked");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Tick until `shutdown` is cancelled, then wait for in-flight rotations
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        let tick_interval = self.engine.config.tick_interval;
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        info!(tick_interval = ?tick_interval, "Rotation scheduler started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.dispatch_due(&mut tasks);
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = result {
                        error!(error = %err, "Rotation task panicked");
                    }
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight rotations");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "Rotation task panicked");
            }
        }
        info!("Rotation scheduler stopped");
    }
}
