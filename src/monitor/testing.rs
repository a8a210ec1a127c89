//! In-memory collaborators for monitor tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Collaborators, Status, Target, TargetKind};
use crate::db::{ConnectionRecord, DbError, DefinitionStore, ListPersistence, TargetRecord};
use crate::menu::MenuGroupSync;
use crate::probe::{ProbeError, ServiceControl, StatusProbe};

/// Service name for services, connection id for instances.
pub fn probe_label(kind: &TargetKind) -> String {
    match kind {
        TargetKind::Service { name, .. } => name.clone(),
        TargetKind::Instance { connection, .. } => connection.id.clone(),
    }
}

/// Status probe answering from a script; unscripted targets are `Accepting`.
#[derive(Default)]
pub struct ScriptedProbe {
    answers: Mutex<HashMap<String, Result<Status, ProbeError>>>,
    delay: Mutex<Duration>,
    queries: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, label: &str, status: Status) {
        self.answers.lock().unwrap().insert(label.to_string(), Ok(status));
    }

    pub fn set_error(&self, label: &str, error: ProbeError) {
        self.answers.lock().unwrap().insert(label.to_string(), Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProbe for ScriptedProbe {
    async fn query(&self, kind: &TargetKind, _timeout: Duration) -> Result<Status, ProbeError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .lock()
            .unwrap()
            .get(&probe_label(kind))
            .cloned()
            .unwrap_or(Ok(Status::Accepting))
    }
}

/// Service control that takes a fixed time per verb.
pub struct ScriptedControl {
    stop_delay: Duration,
    start_delay: Duration,
    failure: Mutex<Option<ProbeError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedControl {
    pub fn new(stop_delay: Duration, start_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            stop_delay,
            start_delay,
            failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_with(&self, error: ProbeError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn run(&self, verb: &str, name: &str, delay: Duration) -> Result<(), ProbeError> {
        self.calls.lock().unwrap().push(format!("{} {}", verb, name));
        tokio::time::sleep(delay).await;
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ServiceControl for ScriptedControl {
    async fn start(&self, _host: &str, name: &str, _timeout: Duration) -> Result<(), ProbeError> {
        self.run("start", name, self.start_delay).await
    }

    async fn stop(&self, _host: &str, name: &str, _timeout: Duration) -> Result<(), ProbeError> {
        self.run("stop", name, self.stop_delay).await
    }
}

/// Persistence keeping the last saved list in memory.
#[derive(Default)]
pub struct MemoryPersistence {
    saved: Mutex<Vec<TargetRecord>>,
    saves: AtomicUsize,
    failing: Mutex<bool>,
}

impl MemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_records(records: Vec<TargetRecord>) -> Arc<Self> {
        let persistence = Self::default();
        *persistence.saved.lock().unwrap() = records;
        Arc::new(persistence)
    }

    pub fn saved(&self) -> Vec<TargetRecord> {
        self.saved.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

impl ListPersistence for MemoryPersistence {
    fn save(&self, targets: &[TargetRecord]) -> Result<(), DbError> {
        if *self.failing.lock().unwrap() {
            return Err(DbError::Migration("disk full".to_string()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.saved.lock().unwrap() = targets.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Vec<TargetRecord>, DbError> {
        Ok(self.saved())
    }
}

/// Connection registry held in memory.
#[derive(Default)]
pub struct MemoryDefinitions {
    records: Mutex<HashMap<String, ConnectionRecord>>,
}

impl MemoryDefinitions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, record: ConnectionRecord) {
        self.records.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn remove(&self, id: &str) {
        self.records.lock().unwrap().remove(id);
    }
}

impl DefinitionStore for MemoryDefinitions {
    fn get_by_id(&self, id: &str) -> Result<Option<ConnectionRecord>, DbError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }
}

/// Menu sync recording every callback as `"<verb> <key>"`.
#[derive(Default)]
pub struct RecordingMenu {
    calls: Mutex<Vec<String>>,
}

impl RecordingMenu {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl MenuGroupSync for RecordingMenu {
    fn setup(&self, target: &Target) {
        self.calls.lock().unwrap().push(format!("setup {}", target.key()));
    }

    fn update(&self, target: &Target, refreshing: bool) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("update {} {}", target.key(), refreshing));
    }

    fn recreate_submenus(&self, target: &Target) {
        self.calls.lock().unwrap().push(format!("recreate {}", target.key()));
    }
}

/// Bundle of fakes, kept around so tests can inspect them.
pub struct Fakes {
    pub probe: Arc<ScriptedProbe>,
    pub control: Arc<ScriptedControl>,
    pub persistence: Arc<MemoryPersistence>,
    pub definitions: Arc<MemoryDefinitions>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::with_persistence(MemoryPersistence::new())
    }

    pub fn with_persistence(persistence: Arc<MemoryPersistence>) -> Self {
        Self {
            probe: ScriptedProbe::new(),
            control: ScriptedControl::new(Duration::ZERO, Duration::ZERO),
            persistence,
            definitions: MemoryDefinitions::new(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            probe: self.probe.clone(),
            control: self.control.clone(),
            persistence: self.persistence.clone(),
            definitions: self.definitions.clone(),
        }
    }
}

pub fn connection(id: &str, host: &str, port: u16) -> ConnectionRecord {
    ConnectionRecord {
        id: id.to_string(),
        name: format!("{} connection", id),
        host: host.to_string(),
        port,
        user_name: "root".to_string(),
    }
}

pub fn service(name: &str, poll_interval_secs: u32) -> Target {
    Target::new(TargetKind::service("localhost", name), poll_interval_secs)
}

pub fn instance(record: ConnectionRecord, poll_interval_secs: u32) -> Target {
    Target::new(TargetKind::instance(record), poll_interval_secs)
}
