//! Helper collaborators and fixtures for integration tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwatch::status::SystemStatus;
use fleetwatch::{SystemId, SystemType};
use fleetwatch::actors::CollectionRunner;
use fleetwatch::config::RetryPolicy;
use fleetwatch::exec::{
    ConnectivityProbe, ExecError, ExecutionReport, HostResult, JobSpec, ProbeResult,
    RemoteExecutor, Target,
};
use fleetwatch::inventory::{
    Inventory, InventoryDocument, InventoryError, InventoryResult, InventoryStore, MemoryStore,
};
use fleetwatch::observability::CounterSink;
use fleetwatch::orchestrator::Collaborators;
use fleetwatch::storage::{
    HealthStatus, LogEntry, LogFilter, LogLevel, MemoryBackend, MetricQuery, MetricSample,
    MonitoredSystem, NewLog, NewMetric, NewSystem, StorageBackend, StorageError, StorageResult,
    SystemFilter,
};
use fleetwatch::synchronizer::{InventorySynchronizer, ProvisionRequest};
use tokio::time::Instant;

/// One scripted response of [`ScriptedExecutor::execute`]
pub enum Step {
    Respond(Result<ExecutionReport, ExecError>),
    /// Never completes
    Hang,
}

/// Executor replaying a fixed script and recording when it was called
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Instant, Target)>>,
    ad_hoc_calls: Mutex<Vec<(Vec<String>, String, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn respond(&self, results: Vec<HostResult>) {
        self.push(Step::Respond(Ok(ExecutionReport::from_results(results))));
    }

    pub fn fail(&self, error: ExecError) {
        self.push(Step::Respond(Err(error)));
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn targets(&self) -> Vec<Target> {
        self.calls.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn ad_hoc_calls(&self) -> Vec<(Vec<String>, String, String)> {
        self.ad_hoc_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, _job: &JobSpec, target: &Target) -> Result<ExecutionReport, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), target.clone()));

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(result)) => result,
            Some(Step::Hang) => futures::future::pending().await,
            None => Err(ExecError::Transient("script exhausted".to_string())),
        }
    }

    async fn run_ad_hoc(
        &self,
        hosts: &[String],
        module: &str,
        args: &str,
    ) -> Result<Vec<HostResult>, ExecError> {
        self.ad_hoc_calls
            .lock()
            .unwrap()
            .push((hosts.to_vec(), module.to_string(), args.to_string()));

        Ok(hosts
            .iter()
            .map(|host| HostResult::ok(host, serde_json::json!({"rc": 0, "stdout": "ok"})))
            .collect())
    }
}

/// Probe answering the same way for every host
pub struct StaticProbe {
    pub result: ProbeResult,
    pinged: Mutex<Vec<String>>,
}

impl StaticProbe {
    pub fn reachable() -> Self {
        Self::with(true, "pong")
    }

    pub fn unreachable(message: &str) -> Self {
        Self::with(false, message)
    }

    fn with(success: bool, message: &str) -> Self {
        Self {
            result: ProbeResult {
                success,
                message: message.to_string(),
            },
            pinged: Mutex::new(Vec::new()),
        }
    }

    pub fn pinged(&self) -> Vec<String> {
        self.pinged.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn ping(&self, host: &str) -> ProbeResult {
        self.pinged.lock().unwrap().push(host.to_string());
        self.result.clone()
    }
}

/// In-memory inventory store whose loads and saves can be made to fail
#[derive(Default)]
pub struct FlakyInventoryStore {
    inner: MemoryStore,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    /// Saves still allowed before `fail_saves` switches on; 0 means no countdown
    saves_left: AtomicUsize,
}

impl FlakyInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.saves_left.store(0, Ordering::SeqCst);
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Let `saves` more saves through, then fail every one after
    pub fn fail_saves_after(&self, saves: usize) {
        self.fail_saves.store(false, Ordering::SeqCst);
        self.saves_left.store(saves, Ordering::SeqCst);
    }
}

#[async_trait]
impl InventoryStore for FlakyInventoryStore {
    async fn load(&self) -> InventoryResult<InventoryDocument> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable("load refused".to_string()));
        }
        self.inner.load().await
    }

    async fn save(&self, document: &InventoryDocument) -> InventoryResult<()> {
        let countdown = self
            .saves_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if countdown == Ok(1) {
            self.fail_saves.store(true, Ordering::SeqCst);
        }
        if countdown.is_err() && self.fail_saves.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable("save refused".to_string()));
        }
        self.inner.save(document).await
    }

    fn location(&self) -> String {
        "flaky".to_string()
    }
}

/// In-memory backend whose system updates and deletes can be made to fail
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryBackend,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for FlakyStorage {
    async fn create_system(&self, system: NewSystem) -> StorageResult<MonitoredSystem> {
        self.inner.create_system(system).await
    }

    async fn get_system(&self, id: SystemId) -> StorageResult<Option<MonitoredSystem>> {
        self.inner.get_system(id).await
    }

    async fn get_system_by_name(&self, name: &str) -> StorageResult<Option<MonitoredSystem>> {
        self.inner.get_system_by_name(name).await
    }

    async fn list_systems(&self, filter: SystemFilter) -> StorageResult<Vec<MonitoredSystem>> {
        self.inner.list_systems(filter).await
    }

    async fn update_system(&self, system: &MonitoredSystem) -> StorageResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("update refused".to_string()));
        }
        self.inner.update_system(system).await
    }

    async fn update_status(
        &self,
        id: SystemId,
        status: SystemStatus,
        observed_heartbeat: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        self.inner.update_status(id, status, observed_heartbeat).await
    }

    async fn delete_system(&self, id: SystemId) -> StorageResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("delete refused".to_string()));
        }
        self.inner.delete_system(id).await
    }

    async fn create_metric(&self, metric: NewMetric) -> StorageResult<MetricSample> {
        self.inner.create_metric(metric).await
    }

    async fn record_collection(&self, metric: NewMetric) -> StorageResult<MetricSample> {
        self.inner.record_collection(metric).await
    }

    async fn query_metrics(&self, query: MetricQuery) -> StorageResult<Vec<MetricSample>> {
        self.inner.query_metrics(query).await
    }

    async fn delete_metrics_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.delete_metrics_older_than(before).await
    }

    async fn create_log(&self, log: NewLog) -> StorageResult<LogEntry> {
        self.inner.create_log(log).await
    }

    async fn query_logs(&self, filter: LogFilter) -> StorageResult<Vec<LogEntry>> {
        self.inner.query_logs(filter).await
    }

    async fn delete_logs_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.delete_logs_older_than(before).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn get_stats(&self) -> StorageResult<String> {
        self.inner.get_stats().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

/// Everything a component under test needs, sharing one inventory
pub struct Fixture {
    pub storage: Arc<FlakyStorage>,
    pub store: Arc<FlakyInventoryStore>,
    pub inventory: Inventory,
    pub executor: Arc<ScriptedExecutor>,
    pub probe: Arc<StaticProbe>,
    pub sink: Arc<CounterSink>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_probe(StaticProbe::reachable())
    }

    pub fn with_probe(probe: StaticProbe) -> Self {
        let store = Arc::new(FlakyInventoryStore::new());
        Self {
            storage: Arc::new(FlakyStorage::new()),
            inventory: Inventory::new(store.clone()),
            store,
            executor: Arc::new(ScriptedExecutor::new()),
            probe: Arc::new(probe),
            sink: Arc::new(CounterSink::new()),
        }
    }

    pub fn synchronizer(&self) -> InventorySynchronizer {
        InventorySynchronizer::new(self.storage.clone(), self.inventory.clone(), self.probe.clone())
    }

    pub fn runner(&self, system_type: SystemType, policy: RetryPolicy) -> CollectionRunner {
        CollectionRunner::new(
            system_type,
            self.storage.clone(),
            self.inventory.clone(),
            self.executor.clone(),
            self.sink.clone(),
            policy,
        )
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            storage: self.storage.clone(),
            inventory_store: self.store.clone(),
            executor: self.executor.clone(),
            probe: self.probe.clone(),
            sink: self.sink.clone(),
        }
    }

    /// Provision without a connectivity check
    pub async fn provision(&self, name: &str, system_type: SystemType) -> MonitoredSystem {
        self.synchronizer()
            .provision(ProvisionRequest::new(name, system_type, "10.0.0.1", "ansible"))
            .await
            .unwrap()
    }

    pub async fn logs(&self, system_id: i64, level: LogLevel) -> Vec<LogEntry> {
        self.storage
            .query_logs(LogFilter {
                system_id: Some(system_id),
                level: Some(level),
                ..Default::default()
            })
            .await
            .unwrap()
    }
}

pub fn metrics_payload(cpu: f64) -> serde_json::Value {
    serde_json::json!({
        "cpu_usage": cpu,
        "memory_usage": 40.0,
        "disk_usage": 55.5,
        "network_in": 1200.0,
        "network_out": 300.0
    })
}
