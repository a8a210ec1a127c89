//! Menu board state: one group per monitored target plus the tray indicator.

use serde::Serialize;

use crate::monitor::{Status, TargetAction, TargetKey, TargetView};

/// Aggregate tray indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Ok,
    Busy,
    Warning,
    Unknown,
}

/// A single menu item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    /// Display text.
    pub label: String,
    /// Whether the item is enabled (clickable).
    pub enabled: bool,
    /// Action triggered on click.
    pub action: Option<TargetAction>,
}

impl MenuItem {
    fn action(action: TargetAction, enabled: bool) -> Self {
        let label = match action {
            TargetAction::Start => "Start",
            TargetAction::Stop => "Stop",
            TargetAction::Restart => "Restart",
        };
        Self {
            label: label.into(),
            enabled,
            action: Some(action),
        }
    }
}

/// Menu entries belonging to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuGroup {
    pub key: TargetKey,
    /// Target name and status, e.g. `MySQL80 - Running`.
    pub header: String,
    pub status: Status,
    pub items: Vec<MenuItem>,
    #[serde(skip)]
    tracks_indicator: bool,
}

impl MenuGroup {
    fn build(view: &TargetView) -> Self {
        Self {
            key: view.key.clone(),
            header: header(view),
            status: view.status,
            items: build_items(view),
            tracks_indicator: view.update_indicator_on_status_change,
        }
    }
}

fn header(view: &TargetView) -> String {
    format!("{} - {}", view.display_name, view.status)
}

/// Action items of a service. Nothing is actionable while the status is
/// unknown or in transition; instances have no actions.
fn build_items(view: &TargetView) -> Vec<MenuItem> {
    if !view.is_service {
        return Vec::new();
    }

    let (start, stop, restart) = match view.status {
        Status::Accepting => (false, true, true),
        Status::Refusing => (true, false, false),
        Status::Paused => (true, true, false),
        Status::Unknown | Status::Starting | Status::Stopping => (false, false, false),
    };

    vec![
        MenuItem::action(TargetAction::Start, start),
        MenuItem::action(TargetAction::Stop, stop),
        MenuItem::action(TargetAction::Restart, restart),
    ]
}

/// Everything the tray shows, in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MenuBoard {
    groups: Vec<MenuGroup>,
}

impl MenuBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[MenuGroup] {
        &self.groups
    }

    fn position(&self, key: &TargetKey) -> Option<usize> {
        self.groups.iter().position(|g| &g.key == key)
    }

    /// Create the group for a newly monitored target, or rebuild an existing one.
    pub fn setup(&mut self, view: &TargetView) {
        let group = MenuGroup::build(view);
        match self.position(&view.key) {
            Some(index) => self.groups[index] = group,
            None => self.groups.push(group),
        }
    }

    /// Refresh a group after a status or property change.
    ///
    /// During a lightweight refresh only the header is redrawn unless the
    /// status itself moved.
    pub fn update(&mut self, view: &TargetView, refreshing: bool) {
        let Some(index) = self.position(&view.key) else {
            self.setup(view);
            return;
        };

        let group = &mut self.groups[index];
        group.header = header(view);
        group.tracks_indicator = view.update_indicator_on_status_change;
        if !refreshing || group.status != view.status {
            group.status = view.status;
            group.items = build_items(view);
        }
    }

    /// Rebuild the group's sub-entries from scratch.
    pub fn recreate(&mut self, view: &TargetView) {
        self.setup(view);
    }

    pub fn remove(&mut self, key: &TargetKey) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| &g.key != key);
        self.groups.len() != before
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Aggregate status over the targets that drive the indicator.
    pub fn indicator(&self) -> Indicator {
        let tracked = || self.groups.iter().filter(|g| g.tracks_indicator);

        if tracked().any(|g| g.status == Status::Refusing) {
            Indicator::Warning
        } else if tracked().any(|g| g.status == Status::Unknown) {
            Indicator::Unknown
        } else if tracked().any(|g| g.status.is_transitional()) {
            Indicator::Busy
        } else {
            Indicator::Ok
        }
    }
}
