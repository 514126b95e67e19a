//! Scheduler ticks, retries and storage failures during rotation

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use common::{Harness, PERIOD, config};
use pretty_assertions::assert_eq;
use vigil_rotation::testing::{FlakyStorage, static_role};
use vigil_rotation::{
    RetryPolicy, RotationConfig, RotationEvent, RotationService, StaticRoleRequest, TickReport,
    WAL_PREFIX, WriteOutcome,
};
use vigil_storage::Storage;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rotated(n: usize) -> TickReport {
    TickReport {
        rotated: n,
        ..TickReport::default()
    }
}

fn failing_config() -> RotationConfig {
    RotationConfig {
        retry_backoff: RetryPolicy {
            initial_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(20),
            max_attempts: 2,
        },
        ..config()
    }
}

// ---------------------------------------------------------------------------
// Normal rotation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_created_role_rotates_on_first_tick() {
    let h = Harness::new();
    let service = h.start().await;

    let outcome = service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Created);
    assert!(h.credential("db-user1").await.is_none());
    assert_eq!(
        service.queue().get("db-user1").unwrap().priority,
        h.now().timestamp()
    );

    assert_eq!(service.tick().await, rotated(1));

    let account = h.account("db-user1").await;
    let first = account.credential.clone().unwrap();
    assert_eq!(account.last_vault_rotation, Some(h.now()));
    assert_eq!(first.password().unwrap().len(), 20);

    let calls = h.driver.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].username, "svc_a");
    assert_eq!(calls[0].db_name, "pg");
    assert_eq!(calls[0].credential, first);
    assert!(h.wal_keys().is_empty());

    // next rotation is one period out
    assert_eq!(service.tick().await.total(), 0);
    assert_eq!(
        service.queue().get("db-user1").unwrap().priority,
        (h.now() + TimeDelta::seconds(5)).timestamp()
    );

    h.clock.advance(PERIOD);
    assert_eq!(service.tick().await, rotated(1));
    let second = h.credential("db-user1").await.unwrap();
    assert_ne!(first, second);
    assert_eq!(h.driver.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_statements_reach_driver() {
    let h = Harness::new();
    let service = h.start().await;
    service
        .manager()
        .write_static_role(
            "db-user1",
            static_role("pg", "svc_a", PERIOD)
                .rotation_statements(["ALTER USER \"{{name}}\" WITH PASSWORD '{{password}}'"]),
        )
        .await
        .unwrap();

    service.tick().await;

    assert_eq!(
        h.driver.calls()[0].statements,
        vec!["ALTER USER \"{{name}}\" WITH PASSWORD '{{password}}'".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_period_update_reprioritizes_from_last_rotation() {
    let h = Harness::new();
    let service = h.start().await;
    let manager = service.manager();
    manager
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();
    service.tick().await;
    let last = h.account("db-user1").await.last_vault_rotation.unwrap();

    let outcome = manager
        .write_static_role(
            "db-user1",
            StaticRoleRequest::new().rotation_period(Duration::from_secs(60)),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Updated);
    assert_eq!(
        service.queue().get("db-user1").unwrap().priority,
        (last + TimeDelta::seconds(60)).timestamp()
    );

    h.clock.advance(PERIOD);
    assert_eq!(service.tick().await.total(), 0);

    h.clock.advance(Duration::from_secs(55));
    assert_eq!(service.tick().await, rotated(1));
}

#[tokio::test(start_paused = true)]
async fn test_rotation_off_the_tick_grid_rotates_every_tick() {
    let h = Harness::new();
    let service = h.start().await;
    service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();

    // first rotation lands 100ms past a whole second
    h.clock.advance(Duration::from_millis(100));
    assert_eq!(service.tick().await, rotated(1));
    let last = h.account("db-user1").await.last_vault_rotation.unwrap();
    assert_eq!(last.timestamp_subsec_millis(), 100);

    // next tick falls in the same second as the due time, before it
    h.clock.advance(Duration::from_millis(4900));
    assert_eq!(service.tick().await, rotated(1));

    for _ in 0..2 {
        h.clock.advance(PERIOD);
        assert_eq!(service.tick().await, rotated(1));
    }
    assert_eq!(h.driver.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_many_roles_rotate_in_one_tick() {
    let h = Harness::new();
    let service = h.start().await;
    for i in 0..20 {
        service
            .manager()
            .write_static_role(&format!("role-{i}"), static_role("pg", &format!("svc_{i}"), PERIOD))
            .await
            .unwrap();
    }

    assert_eq!(service.tick().await, rotated(20));
    assert_eq!(h.driver.call_count(), 20);
    assert_eq!(service.queue().len(), 20);
    assert!(h.wal_keys().is_empty());
}

// ---------------------------------------------------------------------------
// Failures and retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_driver_failures_back_off_and_reuse_wal_material() {
    let h = Harness::new();
    let builder = h.builder(failing_config());
    let mut events = builder.subscribe();
    let service = builder.start().await.unwrap();
    service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();
    h.driver.set_fail_always(true);

    // first failure: ~10s backoff
    assert_eq!(service.tick().await.failed, 1);
    let item = service.queue().get("db-user1").unwrap();
    assert_eq!(item.attempt, 1);
    assert!(item.wal_id.is_some());
    let now = h.now().timestamp();
    assert!((now + 9..=now + 11).contains(&item.priority), "{item:?}");
    assert!(matches!(
        events.try_recv().unwrap(),
        RotationEvent::RotationFailed { attempt: 1, .. }
    ));
    assert_eq!(h.wal_keys().len(), 1);

    // second failure exhausts the budget, retries continue
    h.clock.advance(Duration::from_secs(30));
    assert_eq!(service.tick().await.failed, 1);
    let item = service.queue().get("db-user1").unwrap();
    assert_eq!(item.attempt, 2);
    let now = h.now().timestamp();
    assert!((now + 18..=now + 20).contains(&item.priority), "{item:?}");
    assert!(matches!(
        events.try_recv().unwrap(),
        RotationEvent::RotationFailed { attempt: 2, .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        RotationEvent::RetriesExhausted { attempts: 2, .. }
    ));
    assert_eq!(h.wal_keys().len(), 1);
    assert_eq!(h.account("db-user1").await.last_vault_rotation, None);

    // recovery of the database commits the material generated first
    h.driver.set_fail_always(false);
    h.clock.advance(Duration::from_secs(30));
    assert_eq!(service.tick().await, rotated(1));

    let calls = h.driver.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].credential, calls[1].credential);
    assert_eq!(calls[1].credential, calls[2].credential);
    assert_eq!(h.credential("db-user1").await, Some(calls[2].credential.clone()));
    assert!(h.wal_keys().is_empty());

    let item = service.queue().get("db-user1").unwrap();
    assert_eq!(item.attempt, 0);
    assert_eq!(item.wal_id, None);
    assert!(matches!(
        events.try_recv().unwrap(),
        RotationEvent::Rotated { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_driver_timeout_is_a_retryable_failure() {
    let h = Harness::new();
    let config = RotationConfig {
        driver_timeout: Duration::from_secs(1),
        ..config()
    };
    let service = h.builder(config).start().await.unwrap();
    service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();
    h.driver.set_delay(Some(Duration::from_secs(10)));

    assert_eq!(service.tick().await.failed, 1);
    let item = service.queue().get("db-user1").unwrap();
    assert_eq!(item.attempt, 1);
    assert!(item.wal_id.is_some());
    assert_eq!(h.account("db-user1").await.last_vault_rotation, None);
}

#[tokio::test(start_paused = true)]
async fn test_wal_write_failure_retries_next_tick_without_driver_call() {
    let h = Harness::new();
    let flaky = FlakyStorage::new(h.storage.clone());
    let service = h.builder_over(config(), flaky.clone()).start().await.unwrap();
    service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();

    flaky.fail_puts(WAL_PREFIX, 1);
    assert_eq!(service.tick().await.failed, 1);
    assert_eq!(h.driver.call_count(), 0);
    let item = service.queue().get("db-user1").unwrap();
    assert_eq!(item.attempt, 0);
    assert_eq!(item.priority, h.now().timestamp());

    assert_eq!(service.tick().await, rotated(1));
    assert_eq!(h.driver.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_persist_failure_keeps_wal_and_reapplies_same_material() {
    let h = Harness::new();
    let flaky = FlakyStorage::new(h.storage.clone());
    let service = h.builder_over(config(), flaky.clone()).start().await.unwrap();
    service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();

    flaky.fail_puts("static-role/", 1);
    assert_eq!(service.tick().await.failed, 1);
    assert_eq!(h.driver.call_count(), 1);
    assert_eq!(h.wal_keys().len(), 1);
    assert_eq!(h.account("db-user1").await.last_vault_rotation, None);

    assert_eq!(service.tick().await, rotated(1));
    let calls = h.driver.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].credential, calls[1].credential);
    assert_eq!(h.credential("db-user1").await, Some(calls[1].credential.clone()));
    assert!(h.wal_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wal_delete_failure_is_cleaned_up_next_tick() {
    let h = Harness::new();
    let flaky = FlakyStorage::new(h.storage.clone());
    let service = h.builder_over(config(), flaky.clone()).start().await.unwrap();
    service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();

    flaky.fail_deletes(WAL_PREFIX, 1);
    assert_eq!(service.tick().await, rotated(1));
    assert_eq!(h.wal_keys().len(), 1);
    assert!(service.queue().get("db-user1").unwrap().wal_id.is_some());

    // the leftover record is stale: discarded, role not rotated again
    let report = service.tick().await;
    assert_eq!(report.skipped, 1);
    assert!(h.wal_keys().is_empty());
    assert_eq!(h.driver.call_count(), 1);
    let last = h.account("db-user1").await.last_vault_rotation.unwrap();
    assert_eq!(
        service.queue().get("db-user1").unwrap().priority,
        (last + TimeDelta::seconds(5)).timestamp()
    );
}

// ---------------------------------------------------------------------------
// Concurrency and the background ticker
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_update_during_rotation_is_serialized() {
    let h = Harness::new();
    let service = h.start().await;
    let manager = service.manager().clone();
    manager
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();
    h.driver.set_delay(Some(Duration::from_secs(1)));

    let update = async {
        tokio::task::yield_now().await;
        manager
            .write_static_role(
                "db-user1",
                StaticRoleRequest::new().rotation_period(Duration::from_secs(60)),
            )
            .await
    };
    let (report, updated) = tokio::join!(service.tick(), update);

    assert_eq!(report, rotated(1));
    assert_eq!(updated.unwrap(), WriteOutcome::Updated);
    assert_eq!(h.driver.call_count(), 1);

    let account = h.account("db-user1").await;
    assert_eq!(account.rotation_period, Duration::from_secs(60));
    assert!(account.credential.is_some());
    let last = account.last_vault_rotation.unwrap();
    assert_eq!(
        service.queue().get("db-user1").unwrap().priority,
        (last + TimeDelta::seconds(60)).timestamp()
    );
}

#[tokio::test(start_paused = true)]
async fn test_role_deleted_while_waiting_for_lock_is_dropped() {
    let h = Harness::new();
    let service = h.builder(failing_config()).start().await.unwrap();
    service
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();

    // a failed attempt leaves a WAL record for the retry
    h.driver.fail_next(1);
    assert_eq!(service.tick().await.failed, 1);
    assert_eq!(h.wal_keys().len(), 1);
    h.clock.advance(Duration::from_secs(30));

    let guard = service.locks().lock("db-user1").await;
    let delete = async {
        tokio::task::yield_now().await;
        // popped by the tick, blocked on the lock
        assert!(!service.queue().contains("db-user1"));
        h.storage.delete("static-role/db-user1").await.unwrap();
        drop(guard);
    };
    let (report, ()) = tokio::join!(service.tick(), delete);

    assert_eq!(
        report,
        TickReport {
            dropped: 1,
            ..TickReport::default()
        }
    );
    assert_eq!(h.driver.call_count(), 1);
    assert!(h.wal_keys().is_empty());
    assert!(service.queue().is_empty());

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(service.tick().await.total(), 0);
    assert_eq!(h.driver.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_ticker_rotates_repeatedly() {
    let h = Harness::new();
    h.start()
        .await
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();

    let service = RotationService::builder(config(), Arc::new(h.storage.clone()), h.driver.clone())
        .clock(h.clock.clone())
        .start()
        .await
        .unwrap();

    // ticks at 0s, 5s and 10s
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.driver.call_count(), 3);

    service.shutdown().await;
    assert!(h.wal_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_rotation() {
    let h = Harness::new();
    h.start()
        .await
        .manager()
        .write_static_role("db-user1", static_role("pg", "svc_a", PERIOD))
        .await
        .unwrap();
    h.driver.set_delay(Some(Duration::from_secs(2)));

    let service = RotationService::builder(config(), Arc::new(h.storage.clone()), h.driver.clone())
        .clock(h.clock.clone())
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.driver.call_count(), 1);
    assert_eq!(h.account("db-user1").await.last_vault_rotation, None);

    service.shutdown().await;
    assert!(h.account("db-user1").await.last_vault_rotation.is_some());
    assert!(h.wal_keys().is_empty());
}
