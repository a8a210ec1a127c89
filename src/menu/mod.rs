//! Tray menu synchronization.
//!
//! The monitored list drives menu groups through [`MenuGroupSync`]. The
//! production implementation forwards owned target views over a channel to
//! the menu owner task, so callbacks may come from any task without the
//! board ever being touched off its owner.

mod board;

pub use board::*;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::monitor::{ChangeDispatcher, ListChangeKind, Status, Target, TargetKey, TargetView};

/// Callbacks the monitored list invokes on the menu layer.
pub trait MenuGroupSync: Send + Sync {
    /// A target joined the list.
    fn setup(&self, target: &Target);
    /// A target's status or properties changed. `refreshing` is set during a
    /// lightweight refresh pass.
    fn update(&self, target: &Target, refreshing: bool);
    /// Rebuild a target's sub-entries from scratch.
    fn recreate_submenus(&self, target: &Target);
}

/// Updates sent to the menu owner task.
#[derive(Debug)]
pub enum MenuCommand {
    Setup(TargetView),
    Update { view: TargetView, refreshing: bool },
    Recreate(TargetView),
    Remove(TargetKey),
    Clear,
    Snapshot(oneshot::Sender<MenuSnapshot>),
    Shutdown,
}

/// Point-in-time copy of the board.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MenuSnapshot {
    pub indicator: Indicator,
    pub groups: Vec<MenuGroup>,
}

/// [`MenuGroupSync`] that forwards to the menu owner task.
#[derive(Debug, Clone)]
pub struct ChannelMenuSync {
    tx: mpsc::UnboundedSender<MenuCommand>,
}

impl ChannelMenuSync {
    fn send(&self, command: MenuCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("Menu board is gone, dropping update");
        }
    }

    pub fn remove(&self, key: &TargetKey) {
        self.send(MenuCommand::Remove(key.clone()));
    }

    pub fn clear(&self) {
        self.send(MenuCommand::Clear);
    }
}

impl MenuGroupSync for ChannelMenuSync {
    fn setup(&self, target: &Target) {
        self.send(MenuCommand::Setup(target.view()));
    }

    fn update(&self, target: &Target, refreshing: bool) {
        self.send(MenuCommand::Update {
            view: target.view(),
            refreshing,
        });
    }

    fn recreate_submenus(&self, target: &Target) {
        self.send(MenuCommand::Recreate(target.view()));
    }
}

/// Handle for talking to the menu owner task.
#[derive(Debug, Clone)]
pub struct MenuHandle {
    tx: mpsc::UnboundedSender<MenuCommand>,
}

impl MenuHandle {
    pub fn sync(&self) -> ChannelMenuSync {
        ChannelMenuSync {
            tx: self.tx.clone(),
        }
    }

    /// Current board, or `None` once the task has stopped.
    pub async fn snapshot(&self) -> Option<MenuSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(MenuCommand::Snapshot(reply)).ok()?;
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(MenuCommand::Shutdown);
    }
}

/// Spawn the task owning the menu board.
pub fn spawn_menu_board() -> (MenuHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_menu_board(rx));
    (MenuHandle { tx }, task)
}

async fn run_menu_board(mut rx: mpsc::UnboundedReceiver<MenuCommand>) {
    let mut board = MenuBoard::new();
    let mut indicator = board.indicator();

    while let Some(command) = rx.recv().await {
        match command {
            MenuCommand::Setup(view) => board.setup(&view),
            MenuCommand::Update { view, refreshing } => board.update(&view, refreshing),
            MenuCommand::Recreate(view) => board.recreate(&view),
            MenuCommand::Remove(key) => {
                board.remove(&key);
            }
            MenuCommand::Clear => board.clear(),
            MenuCommand::Snapshot(reply) => {
                let _ = reply.send(MenuSnapshot {
                    indicator: board.indicator(),
                    groups: board.groups().to_vec(),
                });
            }
            MenuCommand::Shutdown => break,
        }

        let current = board.indicator();
        if current != indicator {
            tracing::info!("Tray indicator: {:?} -> {:?}", indicator, current);
            indicator = current;
        }
    }

    tracing::debug!("Menu board stopped");
}

/// User-facing notification for a status transition, if the target wants one.
pub fn notification_text(target: &Target, previous: Status) -> Option<String> {
    if !target.notify_on_status_change() || previous == Status::Unknown {
        return None;
    }
    Some(format!(
        "{} changed from {} to {}",
        target.display_name(),
        previous,
        target.status()
    ))
}

/// Register the menu and notification consumers on the list's dispatcher.
pub fn subscribe_menu(dispatcher: &mut ChangeDispatcher, menu: ChannelMenuSync) {
    dispatcher.on_list_changed(move |target, kind| match (kind, target) {
        (ListChangeKind::Deleted, Some(target)) => menu.remove(target.key()),
        (ListChangeKind::Reset, _) => menu.clear(),
        _ => {}
    });

    dispatcher.on_status_changed(|target, previous| {
        if let Some(text) = notification_text(target, previous) {
            tracing::info!(target: "notifier::notification", "{}", text);
        }
    });

    dispatcher.on_error(|target, error| {
        tracing::debug!("Status of {} unavailable: {}", target.key(), error);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::service;
    use crate::monitor::Preferences;

    #[tokio::test]
    async fn test_board_task_applies_updates_in_order() {
        let (handle, _task) = spawn_menu_board();
        let sync = handle.sync();

        let mut target = service("mysql", 5);
        sync.setup(&target);
        target.set_status(Status::Refusing);
        sync.update(&target, false);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.indicator, Indicator::Warning);
        assert_eq!(snapshot.groups.len(), 1);
        assert_eq!(snapshot.groups[0].header, "mysql - Stopped");

        sync.remove(target.key());
        assert!(handle.snapshot().await.unwrap().groups.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_after_shutdown() {
        let (handle, task) = spawn_menu_board();
        handle.shutdown();
        task.await.unwrap();

        assert!(handle.snapshot().await.is_none());
        // late callbacks are dropped quietly
        handle.sync().setup(&service("mysql", 5));
    }

    #[tokio::test]
    async fn test_dispatcher_events_reach_board() {
        let (handle, _task) = spawn_menu_board();
        let sync = handle.sync();
        let mut dispatcher = ChangeDispatcher::new();
        subscribe_menu(&mut dispatcher, sync.clone());

        let a = service("a", 5);
        let b = service("b", 5);
        sync.setup(&a);
        sync.setup(&b);

        dispatcher.list_changed(Some(&a), ListChangeKind::Deleted);
        assert_eq!(handle.snapshot().await.unwrap().groups.len(), 1);

        dispatcher.list_changed(None, ListChangeKind::Reset);
        assert!(handle.snapshot().await.unwrap().groups.is_empty());
    }

    #[test]
    fn test_notification_text() {
        let mut target = service("mysql", 5);
        target.set_status(Status::Accepting);
        assert_eq!(notification_text(&target, Status::Unknown), None);

        target.set_status(Status::Refusing);
        assert_eq!(
            notification_text(&target, Status::Accepting).as_deref(),
            Some("mysql changed from Running to Stopped")
        );

        target.apply_preferences(&Preferences {
            notify_on_status_change: Some(false),
            ..Default::default()
        });
        assert_eq!(notification_text(&target, Status::Accepting), None);
    }
}
