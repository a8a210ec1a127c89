//! Monitored target entity.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use super::{Status, StatusChange};
use crate::db::{ConnectionRecord, TargetRecord};
use crate::probe::{is_local_host, ProbeError, ServiceControl, StatusProbe};

/// Stable identity of a monitored target.
///
/// Services are keyed by host and service name, instances by host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn service(host: &str, name: &str) -> Self {
        Self(format!(
            "service:{}/{}",
            normalize_host(host),
            name.trim().to_ascii_lowercase()
        ))
    }

    pub fn instance(host: &str, port: u16) -> Self {
        Self(format!("instance:{}:{}", normalize_host(host), port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TargetKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TargetKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_host(host: &str) -> String {
    if is_local_host(host) {
        "localhost".to_string()
    } else {
        host.trim().to_ascii_lowercase()
    }
}

/// What a target monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetKind {
    Service {
        host: String,
        name: String,
        display_name: String,
    },
    /// A MySQL instance, backed by a primary connection definition. Other
    /// definitions pointing at the same host and port are kept as related.
    Instance {
        connection: ConnectionRecord,
        #[serde(default)]
        related_connections: Vec<String>,
    },
}

impl TargetKind {
    pub fn service(host: &str, name: &str) -> Self {
        TargetKind::Service {
            host: host.to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
        }
    }

    pub fn instance(connection: ConnectionRecord) -> Self {
        TargetKind::Instance {
            connection,
            related_connections: Vec::new(),
        }
    }

    /// The key a target built from this kind is identified by.
    pub fn identity(&self) -> TargetKey {
        match self {
            TargetKind::Service { host, name, .. } => TargetKey::service(host, name),
            TargetKind::Instance { connection, .. } => {
                TargetKey::instance(&connection.host, connection.port)
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            TargetKind::Service { display_name, name, .. } if display_name.is_empty() => {
                name.clone()
            }
            TargetKind::Service { display_name, .. } => display_name.clone(),
            TargetKind::Instance { connection, .. } if connection.name.is_empty() => {
                format!("{}:{}", connection.host, connection.port)
            }
            TargetKind::Instance { connection, .. } => connection.name.clone(),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            TargetKind::Service { host, .. } => host,
            TargetKind::Instance { connection, .. } => &connection.host,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, TargetKind::Service { .. })
    }
}

/// Low-level signals a target raises towards the list it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSignal {
    StatusChanged { key: TargetKey, previous: Status },
    PropertyChanged { key: TargetKey },
    Error { key: TargetKey, error: ProbeError },
}

impl TargetSignal {
    pub fn key(&self) -> &TargetKey {
        match self {
            TargetSignal::StatusChanged { key, .. }
            | TargetSignal::PropertyChanged { key }
            | TargetSignal::Error { key, .. } => key,
        }
    }
}

/// Service control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAction {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for TargetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetAction::Start => "start",
            TargetAction::Stop => "stop",
            TargetAction::Restart => "restart",
        })
    }
}

impl FromStr for TargetAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(TargetAction::Start),
            "stop" => Ok(TargetAction::Stop),
            "restart" => Ok(TargetAction::Restart),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

/// Outcome of a failed start/stop/restart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("{0} is not a service")]
    NotAService(TargetKey),
    #[error("{action} timed out after {budget:?}")]
    TimedOut { action: TargetAction, budget: Duration },
    #[error("{action} failed: {source}")]
    Failed {
        action: TargetAction,
        source: ProbeError,
    },
}

/// Partial update of the per-target preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub monitoring_enabled: Option<bool>,
    pub poll_interval_secs: Option<u32>,
    pub notify_on_status_change: Option<bool>,
    pub update_indicator_on_status_change: Option<bool>,
}

/// Owned, serializable picture of a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetView {
    pub key: TargetKey,
    pub display_name: String,
    pub host: String,
    pub is_service: bool,
    pub status: Status,
    pub previous_status: Status,
    pub monitoring_enabled: bool,
    pub poll_interval_secs: u32,
    pub remaining_secs: u32,
    pub notify_on_status_change: bool,
    pub update_indicator_on_status_change: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

/// A monitored service or database instance.
#[derive(Debug)]
pub struct Target {
    key: TargetKey,
    kind: TargetKind,
    current_status: Status,
    previous_status: Status,
    monitoring_enabled: bool,
    poll_interval_secs: u32,
    remaining_secs: u32,
    notify_on_status_change: bool,
    update_indicator_on_status_change: bool,
    last_checked: Option<DateTime<Utc>>,
    listener: Option<UnboundedSender<TargetSignal>>,
}

impl Target {
    /// Create an unattached target with status `Unknown`.
    pub fn new(kind: TargetKind, poll_interval_secs: u32) -> Self {
        let poll_interval_secs = poll_interval_secs.max(1);
        Self {
            key: kind.identity(),
            kind,
            current_status: Status::Unknown,
            previous_status: Status::Unknown,
            monitoring_enabled: true,
            poll_interval_secs,
            remaining_secs: poll_interval_secs,
            notify_on_status_change: true,
            update_indicator_on_status_change: true,
            last_checked: None,
            listener: None,
        }
    }

    pub fn from_record(record: TargetRecord) -> Self {
        let poll_interval_secs = record.poll_interval_secs.max(1);
        Self {
            key: record.key,
            kind: record.kind,
            current_status: Status::Unknown,
            previous_status: Status::Unknown,
            monitoring_enabled: record.monitoring_enabled,
            poll_interval_secs,
            remaining_secs: poll_interval_secs,
            notify_on_status_change: record.notify_on_status_change,
            update_indicator_on_status_change: record.update_indicator_on_status_change,
            last_checked: None,
            listener: None,
        }
    }

    pub fn to_record(&self) -> TargetRecord {
        TargetRecord {
            key: self.key.clone(),
            kind: self.kind.clone(),
            monitoring_enabled: self.monitoring_enabled,
            poll_interval_secs: self.poll_interval_secs,
            notify_on_status_change: self.notify_on_status_change,
            update_indicator_on_status_change: self.update_indicator_on_status_change,
        }
    }

    pub fn view(&self) -> TargetView {
        TargetView {
            key: self.key.clone(),
            display_name: self.display_name(),
            host: self.kind.host().to_string(),
            is_service: self.kind.is_service(),
            status: self.current_status,
            previous_status: self.previous_status,
            monitoring_enabled: self.monitoring_enabled,
            poll_interval_secs: self.poll_interval_secs,
            remaining_secs: self.remaining_secs,
            notify_on_status_change: self.notify_on_status_change,
            update_indicator_on_status_change: self.update_indicator_on_status_change,
            last_checked: self.last_checked,
        }
    }

    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    pub fn kind(&self) -> &TargetKind {
        &self.kind
    }

    pub fn display_name(&self) -> String {
        self.kind.display_name()
    }

    pub fn status(&self) -> Status {
        self.current_status
    }

    pub fn previous_status(&self) -> Status {
        self.previous_status
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring_enabled
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn notify_on_status_change(&self) -> bool {
        self.notify_on_status_change
    }

    pub fn is_attached(&self) -> bool {
        self.listener.is_some()
    }

    pub(crate) fn attach(&mut self, listener: UnboundedSender<TargetSignal>) {
        self.listener = Some(listener);
    }

    pub(crate) fn detach(&mut self) {
        self.listener = None;
    }

    fn emit(&self, signal: TargetSignal) {
        if let Some(listener) = &self.listener {
            let _ = listener.send(signal);
        }
    }

    /// Record a newly observed status. Returns the transition, if any.
    pub fn set_status(&mut self, status: Status) -> Option<StatusChange> {
        if status == self.current_status {
            return None;
        }

        let change = StatusChange {
            previous: self.current_status,
            current: status,
        };
        self.previous_status = self.current_status;
        self.current_status = status;
        self.emit(TargetSignal::StatusChanged {
            key: self.key.clone(),
            previous: change.previous,
        });
        Some(change)
    }

    /// Query the live status, bounded by `timeout`.
    ///
    /// Failures never reach the caller: they are raised as an error signal
    /// and the status is left as it was.
    pub async fn refresh_status(
        &mut self,
        probe: &dyn StatusProbe,
        timeout: Duration,
    ) -> Option<StatusChange> {
        let result = match tokio::time::timeout(timeout, probe.query(&self.kind, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        match result {
            Ok(status) => {
                self.last_checked = Some(Utc::now());
                tracing::debug!("{}: {}", self.key, status);
                self.set_status(status)
            }
            Err(error) => {
                tracing::warn!("Status query for {} failed: {}", self.key, error);
                self.emit(TargetSignal::Error {
                    key: self.key.clone(),
                    error,
                });
                None
            }
        }
    }

    /// Advance the poll countdown by one tick. Returns true when a poll is due,
    /// in which case the countdown restarts from the poll interval.
    pub fn tick_countdown(&mut self) -> bool {
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.remaining_secs = self.poll_interval_secs;
            true
        } else {
            false
        }
    }

    pub(crate) fn set_remaining_secs(&mut self, secs: u32) {
        self.remaining_secs = secs.clamp(1, self.poll_interval_secs);
    }

    /// Apply a preferences update. Raises a property-changed signal when
    /// anything actually changed.
    pub fn apply_preferences(&mut self, prefs: &Preferences) -> bool {
        let mut changed = false;

        if let Some(enabled) = prefs.monitoring_enabled {
            changed |= std::mem::replace(&mut self.monitoring_enabled, enabled) != enabled;
        }
        if let Some(interval) = prefs.poll_interval_secs.map(|i| i.max(1)) {
            if interval != self.poll_interval_secs {
                self.poll_interval_secs = interval;
                self.remaining_secs = self.remaining_secs.min(interval);
                changed = true;
            }
        }
        if let Some(notify) = prefs.notify_on_status_change {
            changed |= std::mem::replace(&mut self.notify_on_status_change, notify) != notify;
        }
        if let Some(indicator) = prefs.update_indicator_on_status_change {
            changed |= std::mem::replace(&mut self.update_indicator_on_status_change, indicator)
                != indicator;
        }

        if changed {
            self.emit(TargetSignal::PropertyChanged {
                key: self.key.clone(),
            });
        }
        changed
    }

    /// Whether `connection_id` is this instance's primary or a related definition.
    pub fn references_connection(&self, connection_id: &str) -> bool {
        match &self.kind {
            TargetKind::Instance {
                connection,
                related_connections,
            } => connection.id == connection_id || related_connections.iter().any(|id| id == connection_id),
            TargetKind::Service { .. } => false,
        }
    }

    /// Make `record` the primary definition of this instance, demoting the
    /// previous primary to a related definition.
    pub(crate) fn promote_connection(&mut self, record: ConnectionRecord) -> bool {
        let TargetKind::Instance {
            connection,
            related_connections,
        } = &mut self.kind
        else {
            return false;
        };

        if connection.id == record.id {
            if *connection == record {
                return false;
            }
            *connection = record;
        } else {
            let previous = std::mem::replace(connection, record);
            related_connections.retain(|id| *id != connection.id);
            if !related_connections.contains(&previous.id) {
                related_connections.push(previous.id);
            }
        }

        self.emit(TargetSignal::PropertyChanged {
            key: self.key.clone(),
        });
        true
    }

    /// Replace the cached definitions in place. Identity is untouched.
    pub(crate) fn sync_definitions(&mut self, primary: ConnectionRecord, related: Vec<String>) -> bool {
        let TargetKind::Instance {
            connection,
            related_connections,
        } = &mut self.kind
        else {
            return false;
        };

        if *connection == primary && *related_connections == related {
            return false;
        }
        *connection = primary;
        *related_connections = related;
        true
    }

    fn service_ref(&self) -> Result<(&str, &str), ActionError> {
        match &self.kind {
            TargetKind::Service { host, name, .. } => Ok((host, name)),
            TargetKind::Instance { .. } => Err(ActionError::NotAService(self.key.clone())),
        }
    }

    pub async fn start(&self, control: &dyn ServiceControl, budget: Duration) -> Result<(), ActionError> {
        let (host, name) = self.service_ref()?;
        bounded(TargetAction::Start, budget, control.start(host, name, budget)).await
    }

    pub async fn stop(&self, control: &dyn ServiceControl, budget: Duration) -> Result<(), ActionError> {
        let (host, name) = self.service_ref()?;
        bounded(TargetAction::Stop, budget, control.stop(host, name, budget)).await
    }

    /// Stop, then start with whatever is left of `budget`.
    pub async fn restart(&self, control: &dyn ServiceControl, budget: Duration) -> Result<(), ActionError> {
        let (host, name) = self.service_ref()?;
        let began = Instant::now();

        let as_restart = |e: ActionError| match e {
            ActionError::TimedOut { .. } => ActionError::TimedOut {
                action: TargetAction::Restart,
                budget,
            },
            ActionError::Failed { source, .. } => ActionError::Failed {
                action: TargetAction::Restart,
                source,
            },
            other => other,
        };

        bounded(TargetAction::Stop, budget, control.stop(host, name, budget))
            .await
            .map_err(as_restart)?;

        let remaining = budget.saturating_sub(began.elapsed());
        bounded(TargetAction::Start, remaining, control.start(host, name, remaining))
            .await
            .map_err(as_restart)
    }

    pub async fn perform(
        &self,
        action: TargetAction,
        control: &dyn ServiceControl,
        budget: Duration,
    ) -> Result<(), ActionError> {
        match action {
            TargetAction::Start => self.start(control, budget).await,
            TargetAction::Stop => self.stop(control, budget).await,
            TargetAction::Restart => self.restart(control, budget).await,
        }
    }
}

async fn bounded<F>(action: TargetAction, budget: Duration, call: F) -> Result<(), ActionError>
where
    F: Future<Output = Result<(), ProbeError>>,
{
    if budget.is_zero() {
        return Err(ActionError::TimedOut { action, budget });
    }

    match tokio::time::timeout(budget, call).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(ProbeError::Timeout(_))) | Err(_) => Err(ActionError::TimedOut { action, budget }),
        Ok(Err(source)) => Err(ActionError::Failed { action, source }),
    }
}
