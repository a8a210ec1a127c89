//! Owner task for the monitored list.
//!
//! The list is moved into a single task that multiplexes the countdown
//! timer with requests arriving over a channel, so every mutation and
//! every event delivery happens on that one task.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{
    AddOutcome, MonitorError, MonitoredList, Preferences, RefreshSummary, TargetAction, TargetKey,
    TargetView,
};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Requests handled by the monitor task.
#[derive(Debug)]
pub enum MonitorCommand {
    Snapshot {
        reply: Reply<Vec<TargetView>>,
    },
    AddService {
        host: String,
        name: String,
        display_name: Option<String>,
        reply: Reply<Result<TargetKey, MonitorError>>,
    },
    AddInstance {
        connection_id: String,
        reply: Reply<Result<AddOutcome, MonitorError>>,
    },
    Remove {
        key: TargetKey,
        reply: Reply<bool>,
    },
    SetPreferences {
        key: TargetKey,
        prefs: Preferences,
        reply: Reply<Result<bool, MonitorError>>,
    },
    PerformAction {
        key: TargetKey,
        action: TargetAction,
        reply: Reply<Result<(), MonitorError>>,
    },
    RefreshAll {
        force: bool,
        reply: Reply<RefreshSummary>,
    },
    Shutdown,
}

/// Cloneable client of the monitor task.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> MonitorCommand,
    ) -> Result<T, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| MonitorError::Stopped)?;
        rx.await.map_err(|_| MonitorError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<Vec<TargetView>, MonitorError> {
        self.request(|reply| MonitorCommand::Snapshot { reply }).await
    }

    pub async fn add_service(
        &self,
        host: &str,
        name: &str,
        display_name: Option<String>,
    ) -> Result<TargetKey, MonitorError> {
        self.request(|reply| MonitorCommand::AddService {
            host: host.to_string(),
            name: name.to_string(),
            display_name,
            reply,
        })
        .await?
    }

    pub async fn add_instance(&self, connection_id: &str) -> Result<AddOutcome, MonitorError> {
        self.request(|reply| MonitorCommand::AddInstance {
            connection_id: connection_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn remove(&self, key: TargetKey) -> Result<bool, MonitorError> {
        self.request(|reply| MonitorCommand::Remove { key, reply }).await
    }

    pub async fn set_preferences(&self, key: TargetKey, prefs: Preferences) -> Result<bool, MonitorError> {
        self.request(|reply| MonitorCommand::SetPreferences { key, prefs, reply })
            .await?
    }

    pub async fn perform_action(&self, key: TargetKey, action: TargetAction) -> Result<(), MonitorError> {
        self.request(|reply| MonitorCommand::PerformAction { key, action, reply })
            .await?
    }

    pub async fn refresh_all(&self, force: bool) -> Result<RefreshSummary, MonitorError> {
        self.request(|reply| MonitorCommand::RefreshAll { force, reply })
            .await
    }

    /// Ask the task to release its targets and exit.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(MonitorCommand::Shutdown).await;
    }
}

/// Move `list` into its owner task. The task performs a forced refresh
/// first, then ticks every `tick`.
pub fn spawn_monitor(list: MonitoredList, tick: Duration) -> (MonitorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run_monitor(list, rx, tick));
    (MonitorHandle { tx }, task)
}

async fn run_monitor(mut list: MonitoredList, mut rx: mpsc::Receiver<MonitorCommand>, tick: Duration) {
    let summary = list.refresh_all(true).await;
    tracing::info!(
        "Monitor started with {} targets ({} stale removed)",
        summary.remaining,
        summary.removed
    );

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            command = rx.recv() => {
                match command {
                    Some(MonitorCommand::Shutdown) | None => break,
                    Some(command) => handle_command(&mut list, command).await,
                }
            }
            _ = interval.tick() => {
                list.tick().await;
                if let Err(e) = list.save_if_changed() {
                    tracing::debug!("Pending list changes still not saved: {}", e);
                }
            }
        }
    }

    tracing::info!("Monitor stopping");
    list.shutdown();
}

async fn handle_command(list: &mut MonitoredList, command: MonitorCommand) {
    match command {
        MonitorCommand::Snapshot { reply } => {
            let _ = reply.send(list.views());
        }
        MonitorCommand::AddService {
            host,
            name,
            display_name,
            reply,
        } => {
            let _ = reply.send(list.add_service(&host, &name, display_name).await);
        }
        MonitorCommand::AddInstance { connection_id, reply } => {
            let _ = reply.send(list.add_instance_by_id(&connection_id).await);
        }
        MonitorCommand::Remove { key, reply } => {
            let _ = reply.send(list.remove(&key));
        }
        MonitorCommand::SetPreferences { key, prefs, reply } => {
            let _ = reply.send(list.set_preferences(&key, &prefs));
        }
        MonitorCommand::PerformAction { key, action, reply } => {
            let _ = reply.send(list.perform_action(&key, action).await);
        }
        MonitorCommand::RefreshAll { force, reply } => {
            let _ = reply.send(list.refresh_all(force).await);
        }
        MonitorCommand::Shutdown => {}
    }
}
