//! Status sweep against stored heartbeats

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use fleetwatch::actors::{StatusSweeper, SweepHandle};
use fleetwatch::status::SystemStatus;
use fleetwatch::storage::{LogLevel, MonitoredSystem, StorageBackend};
use fleetwatch::{SystemType, exec::HostResult};
use pretty_assertions::assert_eq;

use crate::helpers::*;

async fn set_heartbeat(fixture: &Fixture, system: &MonitoredSystem, age_secs: i64, status: SystemStatus) {
    let mut system = system.clone();
    system.status = status;
    system.last_heartbeat = Some(Utc::now() - TimeDelta::seconds(age_secs));
    fixture.storage.update_system(&system).await.unwrap();
}

fn sweeper(fixture: &Fixture) -> StatusSweeper {
    StatusSweeper::new(fixture.storage.clone(), fixture.sink.clone())
}

#[tokio::test]
async fn test_stale_heartbeat_goes_offline() {
    let fixture = Fixture::new();
    let web1 = fixture.provision("web1", SystemType::Linux).await;
    set_heartbeat(&fixture, &web1, 601, SystemStatus::Online).await;

    let report = sweeper(&fixture).sweep(Utc::now()).await.unwrap();

    assert_eq!(report.checked, 1);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].from, SystemStatus::Online);
    assert_eq!(report.transitions[0].to, SystemStatus::Offline);

    let stored = fixture.storage.get_system(web1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SystemStatus::Offline);

    let warnings = fixture.logs(web1.id, LogLevel::Warning).await;
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "Status changed from online to offline for web1");
    assert_eq!(warnings[0].source.as_deref(), Some("status_monitor"));
    assert_eq!(fixture.sink.snapshot().status_changes, 1);
}

#[tokio::test]
async fn test_bands_and_no_upgrade() {
    let fixture = Fixture::new();
    let fresh = fixture.provision("fresh", SystemType::Linux).await;
    let ageing = fixture.provision("ageing", SystemType::Linux).await;
    let revived = fixture.provision("revived", SystemType::Linux).await;

    set_heartbeat(&fixture, &fresh, 10, SystemStatus::Online).await;
    set_heartbeat(&fixture, &ageing, 400, SystemStatus::Online).await;
    // a fresh heartbeat alone does not bring an offline system back
    set_heartbeat(&fixture, &revived, 10, SystemStatus::Offline).await;

    let report = sweeper(&fixture).sweep(Utc::now()).await.unwrap();

    assert_eq!(report.checked, 3);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].name, "ageing");
    assert_eq!(report.transitions[0].to, SystemStatus::Warning);

    let status = |id| {
        let storage = fixture.storage.clone();
        async move { storage.get_system(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(fresh.id).await, SystemStatus::Online);
    assert_eq!(status(ageing.id).await, SystemStatus::Warning);
    assert_eq!(status(revived.id).await, SystemStatus::Offline);

    let info = fixture.logs(ageing.id, LogLevel::Info).await;
    assert!(info.iter().any(|log| log.message == "Status changed from online to warning for ageing"));
}

#[tokio::test]
async fn test_second_sweep_is_quiet() {
    let fixture = Fixture::new();
    let web1 = fixture.provision("web1", SystemType::Linux).await;
    set_heartbeat(&fixture, &web1, 900, SystemStatus::Online).await;

    let sweeper = sweeper(&fixture);
    assert_eq!(sweeper.sweep(Utc::now()).await.unwrap().transitions.len(), 1);
    assert!(sweeper.sweep(Utc::now()).await.unwrap().transitions.is_empty());
    assert_eq!(fixture.logs(web1.id, LogLevel::Warning).await.len(), 1);
}

#[tokio::test]
async fn test_collection_brings_system_back_online() {
    let fixture = Fixture::new();
    let web1 = fixture.provision("web1", SystemType::Linux).await;
    set_heartbeat(&fixture, &web1, 900, SystemStatus::Offline).await;

    fixture
        .executor
        .respond(vec![HostResult::ok("web1", metrics_payload(30.0))]);
    fixture
        .runner(SystemType::Linux, Default::default())
        .run_job()
        .await
        .unwrap();

    let report = sweeper(&fixture).sweep(Utc::now()).await.unwrap();
    assert!(report.transitions.is_empty());

    let stored = fixture.storage.get_system(web1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SystemStatus::Online);
}

#[tokio::test]
async fn test_sweep_handle() {
    let fixture = Fixture::new();
    let web1 = fixture.provision("web1", SystemType::Linux).await;
    set_heartbeat(&fixture, &web1, 3600, SystemStatus::Warning).await;

    let handle = SweepHandle::spawn(sweeper(&fixture), Duration::from_secs(3600));

    // the first tick fires immediately; whichever sweep runs first does the work
    let report = handle.sweep_now().await.unwrap().unwrap();
    assert!(report.transitions.len() <= 1);

    let stored = fixture.storage.get_system(web1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SystemStatus::Offline);
    assert_eq!(fixture.logs(web1.id, LogLevel::Warning).await.len(), 1);

    handle.shutdown().await.unwrap();
}
