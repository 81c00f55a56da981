//! End-to-end flows through the orchestrator facade

use std::sync::Arc;

use assert_matches::assert_matches;
use fleetwatch::config::ScheduleConfig;
use fleetwatch::error::OrchestratorError;
use fleetwatch::exec::HostResult;
use fleetwatch::job::JobState;
use fleetwatch::orchestrator::Orchestrator;
use fleetwatch::status::SystemStatus;
use fleetwatch::storage::{MetricQuery, StorageBackend, SystemFilter};
use fleetwatch::synchronizer::ProvisionRequest;
use fleetwatch::{CollectedMetrics, SystemType};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn metrics(cpu: f64) -> CollectedMetrics {
    serde_json::from_value(metrics_payload(cpu)).unwrap()
}

#[tokio::test]
async fn test_provision_collect_decommission() {
    let fixture = Fixture::new();
    let orchestrator = Orchestrator::start(&ScheduleConfig::default(), None, fixture.collaborators());

    let mut request = ProvisionRequest::new("web1", SystemType::Linux, "10.0.0.1", "ansible");
    request.verify = true;
    let web1 = orchestrator.provision_system(request).await.unwrap();
    assert_eq!(web1.status, SystemStatus::Online);

    fixture
        .executor
        .respond(vec![HostResult::ok("web1", metrics_payload(42.0))]);
    let report = orchestrator
        .trigger_collection(SystemType::Linux)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.state, JobState::Succeeded);

    // no windows hosts, nothing to run
    assert_eq!(orchestrator.trigger_collection(SystemType::Windows).await.unwrap(), None);

    let status = orchestrator.get_status(web1.id).await.unwrap();
    assert_eq!(status.status, SystemStatus::Online);

    let linux = orchestrator
        .list_systems(SystemFilter {
            system_type: Some(SystemType::Linux),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(linux.len(), 1);

    let results = orchestrator.run_ad_hoc("all", "ping", "").await.unwrap();
    assert_eq!(results.len(), 1);

    let sweep = orchestrator.sweep_now().await.unwrap();
    assert!(sweep.transitions.is_empty());
    assert_eq!(orchestrator.cleanup_now().await.unwrap(), None);

    orchestrator.decommission_system(web1.id).await.unwrap();
    assert_matches!(
        orchestrator.get_status(web1.id).await,
        Err(OrchestratorError::NotFound(_))
    );
    assert!(!orchestrator.inventory().contains_host("web1").await.unwrap());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_record_metric() {
    let fixture = Fixture::new();
    let orchestrator = Orchestrator::start(&ScheduleConfig::default(), None, fixture.collaborators());
    let db1 = orchestrator
        .provision_system(ProvisionRequest::new("db1", SystemType::Database, "10.0.0.5", "ansible"))
        .await
        .unwrap();
    assert_eq!(db1.status, SystemStatus::Offline);

    let sample = orchestrator.record_metric(db1.id, metrics(17.0)).await.unwrap();
    assert_eq!(sample.system_id, db1.id);
    assert_eq!(sample.cpu_usage, 17.0);

    let stored = orchestrator.get_status(db1.id).await.unwrap();
    assert_eq!(stored.status, SystemStatus::Online);
    assert_eq!(stored.last_heartbeat, Some(sample.timestamp));

    assert_matches!(
        orchestrator.record_metric(db1.id, metrics(101.0)).await,
        Err(OrchestratorError::Validation(_))
    );
    assert_matches!(
        orchestrator.record_metric(999, metrics(1.0)).await,
        Err(OrchestratorError::NotFound(_))
    );

    let samples = orchestrator
        .storage()
        .query_metrics(MetricQuery {
            system_id: Some(db1.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);

    orchestrator.shutdown().await.unwrap();
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_and_inventory_file() {
    use fleetwatch::config::RetentionConfig;
    use fleetwatch::inventory::YamlFileStore;
    use fleetwatch::storage::sqlite::SqliteBackend;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fleetwatch.db");
    let inventory_path = dir.path().join("inventory.yml");

    let fixture = Fixture::new();
    let mut collaborators = fixture.collaborators();
    collaborators.storage = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    collaborators.inventory_store = Arc::new(YamlFileStore::new(&inventory_path));

    let orchestrator = Orchestrator::start(
        &ScheduleConfig::default(),
        Some(RetentionConfig::default()),
        collaborators,
    );

    let web1 = orchestrator
        .provision_system(ProvisionRequest::new("web1", SystemType::Linux, "10.0.0.1", "ansible"))
        .await
        .unwrap();
    orchestrator
        .provision_system(ProvisionRequest::new("win1", SystemType::Windows, "10.0.0.2", "admin"))
        .await
        .unwrap();

    let yaml = tokio::fs::read_to_string(&inventory_path).await.unwrap();
    assert!(yaml.contains("linux_servers"));
    assert!(yaml.contains("windows_servers"));
    assert!(yaml.contains("ansible_winrm_transport: ntlm"));

    fixture
        .executor
        .respond(vec![HostResult::ok("web1", metrics_payload(55.0))]);
    let report = orchestrator
        .trigger_collection(SystemType::Linux)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.state, JobState::Succeeded);

    let cleanup = orchestrator.cleanup_now().await.unwrap().unwrap();
    assert_eq!(cleanup.metrics_deleted, 0);

    orchestrator.shutdown().await.unwrap();

    // everything survives a restart
    let reopened = SqliteBackend::new(&db_path).await.unwrap();
    let stored = reopened.get_system(web1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SystemStatus::Online);
    assert!(stored.last_heartbeat.is_some());
    assert_eq!(
        reopened
            .query_metrics(MetricQuery {
                system_id: Some(web1.id),
                ..Default::default()
            })
            .await
            .unwrap()
            .len(),
        1
    );
    reopened.close().await.unwrap();
}
