//! Collection dispatcher tests
//!
//! These cover per-host isolation, the retry state machine and the actor
//! cadence, with a scripted executor standing in for the remote engine.

use std::time::Duration;

use assert_matches::assert_matches;
use fleetwatch::actors::DispatcherHandle;
use fleetwatch::config::RetryPolicy;
use fleetwatch::exec::{ExecError, HostResult, Target};
use fleetwatch::inventory::{InventoryEntry, InventoryStore};
use fleetwatch::job::JobState;
use fleetwatch::status::SystemStatus;
use fleetwatch::storage::{LogFilter, LogLevel, MetricQuery, StorageBackend};
use fleetwatch::{ORCHESTRATOR_SYSTEM_ID, SystemType};
use pretty_assertions::assert_eq;

use crate::helpers::*;

async fn sample_count(fixture: &Fixture, system_id: i64) -> usize {
    fixture
        .storage
        .query_metrics(MetricQuery {
            system_id: Some(system_id),
            ..Default::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_two_of_three_hosts_partially_succeed() {
    let fixture = Fixture::new();
    let web1 = fixture.provision("web1", SystemType::Linux).await;
    let web2 = fixture.provision("web2", SystemType::Linux).await;
    let web3 = fixture.provision("web3", SystemType::Linux).await;

    fixture.executor.respond(vec![
        HostResult::ok("web1", metrics_payload(12.0)),
        HostResult::ok("web2", metrics_payload(48.5)),
        HostResult::failed("web3", "Failed to connect to the host via ssh"),
    ]);

    let report = fixture
        .runner(SystemType::Linux, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::PartiallySucceeded);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.hosts_ok, vec!["web1".to_string(), "web2".to_string()]);
    assert_eq!(report.host_errors.len(), 1);
    assert_eq!(
        fixture.executor.targets(),
        vec![Target::Group("linux_servers".to_string())]
    );

    assert_eq!(sample_count(&fixture, web1.id).await, 1);
    assert_eq!(sample_count(&fixture, web2.id).await, 1);
    assert_eq!(sample_count(&fixture, web3.id).await, 0);

    for id in [web1.id, web2.id] {
        let system = fixture.storage.get_system(id).await.unwrap().unwrap();
        assert_eq!(system.status, SystemStatus::Online);
        assert!(system.last_heartbeat.is_some());
    }
    let failed = fixture.storage.get_system(web3.id).await.unwrap().unwrap();
    assert_eq!(failed.status, SystemStatus::Offline);
    assert_eq!(failed.last_heartbeat, None);

    let errors = fixture.logs(web3.id, LogLevel::Error).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Failed to connect"));

    let summary = fixture
        .storage
        .query_logs(LogFilter {
            system_id: Some(ORCHESTRATOR_SYSTEM_ID),
            source: Some("collector".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].level, LogLevel::Info);
    assert!(summary[0].message.ends_with("Hosts ok: 2"));

    let counters = fixture.sink.snapshot();
    assert_eq!(counters.hosts_ingested, 2);
    assert_eq!(counters.hosts_failed, 1);
    assert_eq!(counters.jobs_partially_succeeded, 1);
}

#[tokio::test]
async fn test_all_hosts_ok_succeeds() {
    let fixture = Fixture::new();
    fixture.provision("db1", SystemType::Database).await;
    fixture
        .executor
        .respond(vec![HostResult::ok("db1", metrics_payload(5.0))]);

    let report = fixture
        .runner(SystemType::Database, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Succeeded);
    assert!(report.host_errors.is_empty());
}

#[tokio::test]
async fn test_definition_error_is_not_retried() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;
    fixture
        .executor
        .fail(ExecError::DefinitionNotFound("linux_metrics.yml".to_string()));

    let report = fixture
        .runner(SystemType::Linux, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.attempts, 1);
    assert_eq!(fixture.executor.call_times().len(), 1);

    let errors = fixture.logs(ORCHESTRATOR_SYSTEM_ID, LogLevel::Error).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("linux_metrics.yml"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_exhaust_three_attempts() {
    let fixture = Fixture::new();
    fixture.provision("win1", SystemType::Windows).await;
    for _ in 0..3 {
        fixture
            .executor
            .fail(ExecError::Transient("connection refused".to_string()));
    }

    let report = fixture
        .runner(SystemType::Windows, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.attempts, 3);

    let calls = fixture.executor.call_times();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(60));
    }

    let errors = fixture.logs(ORCHESTRATOR_SYSTEM_ID, LogLevel::Error).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("3 attempt(s)"));
    assert_eq!(fixture.sink.snapshot().attempts_failed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;
    fixture
        .executor
        .fail(ExecError::Transient("engine exited with status 4".to_string()));
    fixture
        .executor
        .respond(vec![HostResult::ok("web1", metrics_payload(20.0))]);

    let report = fixture
        .runner(SystemType::Linux, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Succeeded);
    assert_eq!(report.attempts, 2);
    assert!(fixture.logs(ORCHESTRATOR_SYSTEM_ID, LogLevel::Error).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hard_timeout_counts_as_failed_attempt() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;
    fixture.executor.push(Step::Hang);
    fixture.executor.push(Step::Hang);

    let policy = RetryPolicy {
        max_attempts: 2,
        backoff: Duration::from_secs(1),
        soft_timeout: Duration::from_secs(5),
        hard_timeout: Duration::from_secs(10),
    };

    let report = fixture
        .runner(SystemType::Linux, policy)
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.attempts, 2);
    assert!(report.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_invalid_payload_is_a_host_failure() {
    let fixture = Fixture::new();
    let web1 = fixture.provision("web1", SystemType::Linux).await;
    let web2 = fixture.provision("web2", SystemType::Linux).await;

    fixture.executor.respond(vec![
        HostResult::ok("web1", metrics_payload(150.0)),
        HostResult::ok("web2", serde_json::Value::Null),
    ]);

    let report = fixture
        .runner(SystemType::Linux, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::PartiallySucceeded);
    assert!(report.hosts_ok.is_empty());
    assert!(report.host_errors["web1"].contains("cpu_usage"));
    assert_eq!(report.host_errors["web2"], "no metrics reported");

    assert_eq!(sample_count(&fixture, web1.id).await, 0);
    assert_eq!(fixture.logs(web1.id, LogLevel::Error).await.len(), 1);
    assert_eq!(fixture.logs(web2.id, LogLevel::Error).await.len(), 1);

    // no host succeeded, so no summary entry
    let info = fixture
        .storage
        .query_logs(LogFilter {
            system_id: Some(ORCHESTRATOR_SYSTEM_ID),
            source: Some("collector".to_string()),
            level: Some(LogLevel::Info),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(info.is_empty());
}

#[tokio::test]
async fn test_unknown_and_missing_hosts() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;
    let web2 = fixture.provision("web2", SystemType::Linux).await;

    // an inventory host with no system row behind it
    let mut document = fixture.inventory.snapshot().await.unwrap();
    let vars = document.host("web1").unwrap().clone();
    document.insert(InventoryEntry {
        name: "ghost".to_string(),
        group: "linux_servers".to_string(),
        vars,
    });
    InventoryStore::save(fixture.store.as_ref(), &document)
        .await
        .unwrap();

    fixture.executor.respond(vec![
        HostResult::ok("web1", metrics_payload(1.0)),
        HostResult::ok("ghost", metrics_payload(1.0)),
    ]);

    let report = fixture
        .runner(SystemType::Linux, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::PartiallySucceeded);
    assert_eq!(report.hosts_ok, vec!["web1".to_string()]);
    assert_eq!(report.host_errors["web2"], "no result reported");
    assert!(report.host_errors["ghost"].contains("not a known system"));

    let orchestrator_errors = fixture.logs(ORCHESTRATOR_SYSTEM_ID, LogLevel::Error).await;
    assert_eq!(orchestrator_errors.len(), 1);
    assert!(orchestrator_errors[0].message.contains("ghost"));
    assert_eq!(fixture.logs(web2.id, LogLevel::Error).await.len(), 1);
}

#[tokio::test]
async fn test_results_outside_the_group_are_rejected() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;
    let db1 = fixture.provision("db1", SystemType::Database).await;

    fixture.executor.respond(vec![
        HostResult::ok("web1", metrics_payload(1.0)),
        HostResult::ok("db1", metrics_payload(1.0)),
    ]);

    let report = fixture
        .runner(SystemType::Linux, RetryPolicy::default())
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::PartiallySucceeded);
    assert_eq!(report.hosts_ok, vec!["web1".to_string()]);
    assert_eq!(report.host_errors["db1"], "host db1 not in linux_servers");

    assert_eq!(sample_count(&fixture, db1.id).await, 0);
    let stored = fixture.storage.get_system(db1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SystemStatus::Offline);
    assert_eq!(stored.last_heartbeat, None);
}

#[tokio::test]
async fn test_empty_group_is_skipped() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;

    let report = fixture
        .runner(SystemType::Database, RetryPolicy::default())
        .run_job()
        .await;

    assert!(report.is_none());
    assert!(fixture.executor.call_times().is_empty());
}

#[tokio::test]
async fn test_unreadable_inventory_is_transient() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;
    fixture.store.fail_loads(true);

    let policy = RetryPolicy {
        max_attempts: 1,
        ..RetryPolicy::default()
    };
    let report = fixture
        .runner(SystemType::Linux, policy)
        .run_job()
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Failed);
    assert!(report.last_error.unwrap().contains("inventory unavailable"));
    assert!(fixture.executor.call_times().is_empty());
}

#[tokio::test]
async fn test_handle_trigger_and_shutdown() {
    let fixture = Fixture::new();
    fixture.provision("db1", SystemType::Database).await;
    fixture
        .executor
        .respond(vec![HostResult::ok("db1", metrics_payload(9.0))]);

    let handle = DispatcherHandle::spawn(
        fixture.runner(SystemType::Database, RetryPolicy::default()),
        Duration::from_secs(3600),
    );

    let report = handle.trigger_now().await.unwrap().unwrap();
    assert_eq!(report.state, JobState::Succeeded);

    handle.update_interval(600).await.unwrap();
    handle.shutdown().await.unwrap();

    assert_matches!(handle.trigger_now().await, Err(_));
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_ticks_on_cadence() {
    let fixture = Fixture::new();
    fixture.provision("web1", SystemType::Linux).await;
    fixture
        .executor
        .respond(vec![HostResult::ok("web1", metrics_payload(3.0))]);

    let handle = DispatcherHandle::spawn(
        fixture.runner(SystemType::Linux, RetryPolicy::default()),
        Duration::from_secs(300),
    );

    // nothing runs before the first full interval
    tokio::time::sleep(Duration::from_secs(299)).await;
    assert!(fixture.executor.call_times().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fixture.executor.call_times().len(), 1);
    assert_eq!(fixture.sink.snapshot().jobs_succeeded, 1);

    handle.shutdown().await.unwrap();
}
