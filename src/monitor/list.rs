//! The monitored list: ordered ownership of targets, persistence after
//! every mutation, subscription wiring and the poll countdown.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{
    ChangeDispatcher, ListChangeKind, MonitorError, Preferences, Status, StatusChange, Target,
    TargetAction, TargetKey, TargetKind, TargetSignal, TargetView,
};
use crate::config::MonitorSettings;
use crate::db::{ConnectionRecord, DefinitionStore, ListPersistence, TargetRecord};
use crate::menu::MenuGroupSync;
use crate::probe::{ServiceControl, StatusProbe};

/// External capabilities the list is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn StatusProbe>,
    pub control: Arc<dyn ServiceControl>,
    pub persistence: Arc<dyn ListPersistence>,
    pub definitions: Arc<dyn DefinitionStore>,
}

/// Result of adding an instance from a connection definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub key: TargetKey,
    /// The instance was already monitored; its primary definition was updated.
    pub already_monitored: bool,
}

/// What a refresh_all pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub removed: usize,
    pub synced: usize,
    pub remaining: usize,
}

enum DefinitionState {
    Unchanged,
    Synced {
        primary: ConnectionRecord,
        related: Vec<String>,
    },
    Vanished,
}

pub struct MonitoredList {
    targets: Vec<Target>,
    dispatcher: ChangeDispatcher,
    signal_tx: UnboundedSender<TargetSignal>,
    signal_rx: UnboundedReceiver<TargetSignal>,
    settings: MonitorSettings,
    probe: Arc<dyn StatusProbe>,
    control: Arc<dyn ServiceControl>,
    persistence: Arc<dyn ListPersistence>,
    definitions: Arc<dyn DefinitionStore>,
    menu: Option<Arc<dyn MenuGroupSync>>,
    refreshing: bool,
    has_changes: bool,
}

impl MonitoredList {
    /// Create an empty list.
    pub fn new(settings: MonitorSettings, collaborators: Collaborators) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            targets: Vec::new(),
            dispatcher: ChangeDispatcher::new(),
            signal_tx,
            signal_rx,
            settings,
            probe: collaborators.probe,
            control: collaborators.control,
            persistence: collaborators.persistence,
            definitions: collaborators.definitions,
            menu: None,
            refreshing: false,
            has_changes: false,
        }
    }

    /// Build the list from persisted state. Loaded targets start `Unknown`
    /// and are attached, but no events fire and nothing is saved.
    pub fn load(settings: MonitorSettings, collaborators: Collaborators) -> Result<Self, MonitorError> {
        let records = collaborators.persistence.load()?;
        let mut list = Self::new(settings, collaborators);

        for record in records {
            if list.contains(&record.key) {
                tracing::warn!("Skipping duplicate persisted target {}", record.key);
                continue;
            }
            let mut target = Target::from_record(record);
            target.attach(list.signal_tx.clone());
            list.targets.push(target);
        }

        tracing::info!("Loaded {} monitored targets", list.targets.len());
        Ok(list)
    }

    pub fn set_menu_sync(&mut self, menu: Arc<dyn MenuGroupSync>) {
        self.menu = Some(menu);
    }

    pub fn dispatcher(&mut self) -> &mut ChangeDispatcher {
        &mut self.dispatcher
    }

    // --- Queries ---

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn get(&self, key: &TargetKey) -> Option<&Target> {
        self.targets.iter().find(|t| t.key() == key)
    }

    pub fn position(&self, key: &TargetKey) -> Option<usize> {
        self.targets.iter().position(|t| t.key() == key)
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.position(key).is_some()
    }

    pub fn records(&self) -> Vec<TargetRecord> {
        self.targets.iter().map(Target::to_record).collect()
    }

    pub fn views(&self) -> Vec<TargetView> {
        self.targets.iter().map(Target::view).collect()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    /// Whether a mutation has not reached storage yet.
    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    // --- Membership ---

    pub async fn add(&mut self, target: Target) -> Result<(), MonitorError> {
        let index = self.targets.len();
        self.insert(index, target).await
    }

    pub async fn insert(&mut self, index: usize, mut target: Target) -> Result<(), MonitorError> {
        if index > self.targets.len() {
            return Err(MonitorError::IndexOutOfRange {
                index,
                len: self.targets.len(),
            });
        }
        if self.contains(target.key()) {
            return Err(MonitorError::DuplicateTarget(target.key().clone()));
        }

        tracing::info!("Monitoring {}", target.key());
        target.attach(self.signal_tx.clone());
        self.targets.insert(index, target);
        self.mark_changed();

        if let Some(menu) = &self.menu {
            menu.setup(&self.targets[index]);
        }
        if self.targets[index].status() == Status::Unknown {
            let probe = Arc::clone(&self.probe);
            self.targets[index]
                .refresh_status(probe.as_ref(), self.settings.query_timeout)
                .await;
        }

        self.dispatcher
            .list_changed(Some(&self.targets[index]), ListChangeKind::Added);
        self.pump_signals();
        Ok(())
    }

    /// Add a service by host and name.
    pub async fn add_service(
        &mut self,
        host: &str,
        name: &str,
        display_name: Option<String>,
    ) -> Result<TargetKey, MonitorError> {
        let kind = TargetKind::Service {
            host: host.to_string(),
            name: name.to_string(),
            display_name: display_name.unwrap_or_else(|| name.to_string()),
        };
        let target = Target::new(kind, self.settings.default_poll_interval_secs);
        let key = target.key().clone();
        self.add(target).await?;
        Ok(key)
    }

    /// Add an instance from a connection definition.
    ///
    /// A definition whose host and port (or id) is already monitored, under
    /// its original key or at the address its definition now points to, does not
    /// create a second target; it becomes the existing target's primary
    /// definition instead.
    pub async fn add_instance(&mut self, connection: ConnectionRecord) -> Result<AddOutcome, MonitorError> {
        let key = TargetKey::instance(&connection.host, connection.port);

        let existing = self
            .targets
            .iter()
            .position(|t| {
                t.key() == &key
                    || t.kind().identity() == key
                    || t.references_connection(&connection.id)
            });
        if let Some(index) = existing {
            let existing_key = self.targets[index].key().clone();
            tracing::info!(
                "Connection {} already monitored as {}, updating primary definition",
                connection.id,
                existing_key
            );
            self.targets[index].promote_connection(connection);
            self.pump_signals();
            return Ok(AddOutcome {
                key: existing_key,
                already_monitored: true,
            });
        }

        let target = Target::new(
            TargetKind::instance(connection),
            self.settings.default_poll_interval_secs,
        );
        self.add(target).await?;
        Ok(AddOutcome {
            key,
            already_monitored: false,
        })
    }

    /// Add an instance by looking its definition up in the definition store.
    pub async fn add_instance_by_id(&mut self, connection_id: &str) -> Result<AddOutcome, MonitorError> {
        let connection = self
            .definitions
            .get_by_id(connection_id)?
            .ok_or_else(|| MonitorError::UnknownConnection(connection_id.to_string()))?;
        self.add_instance(connection).await
    }

    /// Remove by identity. Returns false when the key is not monitored.
    pub fn remove(&mut self, key: &TargetKey) -> bool {
        match self.position(key) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    /// Remove by position, handing back the detached target.
    pub fn remove_at(&mut self, index: usize) -> Option<Target> {
        if index >= self.targets.len() {
            return None;
        }

        let mut target = self.targets.remove(index);
        target.detach();
        tracing::info!("Stopped monitoring {}", target.key());
        self.mark_changed();
        self.dispatcher
            .list_changed(Some(&target), ListChangeKind::Deleted);
        Some(target)
    }

    /// Indexed set. Returns the target that was replaced.
    pub async fn replace(&mut self, index: usize, mut target: Target) -> Result<Target, MonitorError> {
        if index >= self.targets.len() {
            return Err(MonitorError::IndexOutOfRange {
                index,
                len: self.targets.len(),
            });
        }
        if let Some(existing) = self.position(target.key()) {
            if existing != index {
                return Err(MonitorError::DuplicateTarget(target.key().clone()));
            }
        }

        target.attach(self.signal_tx.clone());
        let mut previous = std::mem::replace(&mut self.targets[index], target);
        previous.detach();
        self.mark_changed();

        if let Some(menu) = &self.menu {
            menu.setup(&self.targets[index]);
        }
        if self.targets[index].status() == Status::Unknown {
            let probe = Arc::clone(&self.probe);
            self.targets[index]
                .refresh_status(probe.as_ref(), self.settings.query_timeout)
                .await;
        }

        self.dispatcher
            .list_changed(Some(&self.targets[index]), ListChangeKind::Changed);
        self.pump_signals();
        Ok(previous)
    }

    /// Remove every target with a single `Reset` notification.
    pub fn clear(&mut self) {
        for target in &mut self.targets {
            target.detach();
        }
        self.targets.clear();
        self.mark_changed();
        self.dispatcher.list_changed(None, ListChangeKind::Reset);
    }

    pub fn set_preferences(&mut self, key: &TargetKey, prefs: &Preferences) -> Result<bool, MonitorError> {
        let index = self
            .position(key)
            .ok_or_else(|| MonitorError::NotFound(key.clone()))?;
        let changed = self.targets[index].apply_preferences(prefs);
        self.pump_signals();
        Ok(changed)
    }

    // --- Polling ---

    /// Advance every enabled target's countdown by one tick and return the
    /// keys whose poll is due. Does nothing while refresh_all runs.
    pub fn update_countdowns(&mut self) -> Vec<TargetKey> {
        if self.refreshing {
            tracing::debug!("Skipping countdown update during refresh");
            return Vec::new();
        }

        self.targets
            .iter_mut()
            .filter(|t| t.monitoring_enabled())
            .filter_map(|t| t.tick_countdown().then(|| t.key().clone()))
            .collect()
    }

    /// One timer tick: update countdowns and poll the targets that are due.
    pub async fn tick(&mut self) -> usize {
        let due = self.update_countdowns();
        for key in &due {
            if let Err(e) = self.refresh_target(key).await {
                tracing::debug!("Skipping poll of {}: {}", key, e);
            }
        }
        due.len()
    }

    /// Poll a single target now.
    pub async fn refresh_target(&mut self, key: &TargetKey) -> Result<Option<StatusChange>, MonitorError> {
        let index = self
            .position(key)
            .ok_or_else(|| MonitorError::NotFound(key.clone()))?;
        let probe = Arc::clone(&self.probe);
        let change = self.targets[index]
            .refresh_status(probe.as_ref(), self.settings.query_timeout)
            .await;
        self.pump_signals();
        Ok(change)
    }

    /// Run a service action, then re-poll the target whatever the outcome.
    ///
    /// Failures go to the caller only, never to the error channel.
    pub async fn perform_action(&mut self, key: &TargetKey, action: TargetAction) -> Result<(), MonitorError> {
        let index = self
            .position(key)
            .ok_or_else(|| MonitorError::NotFound(key.clone()))?;
        let control = Arc::clone(&self.control);
        let budget = self.settings.action_timeout;

        tracing::info!("Running {} on {}", action, key);
        let result = self.targets[index]
            .perform(action, control.as_ref(), budget)
            .await;
        if let Err(e) = &result {
            tracing::warn!("{} on {} failed: {}", action, key, e);
        }

        self.refresh_target(key).await?;
        result.map_err(MonitorError::from)
    }

    // --- Reconciliation ---

    /// Full resynchronization against the definition store.
    ///
    /// Targets whose definitions vanished are dropped, changed definitions are
    /// synced in place. With `force_menu_sync` every target is re-polled and
    /// re-announced; otherwise poll countdowns survive the pass untouched.
    pub async fn refresh_all(&mut self, force_menu_sync: bool) -> RefreshSummary {
        self.refreshing = true;
        let countdowns: HashMap<TargetKey, u32> = self
            .targets
            .iter()
            .map(|t| (t.key().clone(), t.remaining_secs()))
            .collect();

        let mut summary = RefreshSummary::default();
        let mut index = 0;
        while index < self.targets.len() {
            self.targets[index].detach();

            match self.resolve_definition(index) {
                DefinitionState::Vanished => {
                    tracing::info!(
                        "Definition for {} no longer exists, dropping it",
                        self.targets[index].key()
                    );
                    self.remove_at(index);
                    summary.removed += 1;
                    // the next target shifted into `index`
                    continue;
                }
                DefinitionState::Synced { primary, related } => {
                    if self.targets[index].sync_definitions(primary, related) {
                        summary.synced += 1;
                        self.has_changes = true;
                    }
                }
                DefinitionState::Unchanged => {}
            }

            self.targets[index].attach(self.signal_tx.clone());
            index += 1;
        }

        if summary.synced > 0 {
            self.save_logged();
        }

        if force_menu_sync {
            let probe = Arc::clone(&self.probe);
            for i in 0..self.targets.len() {
                self.targets[i]
                    .refresh_status(probe.as_ref(), self.settings.query_timeout)
                    .await;
                if let Some(menu) = &self.menu {
                    menu.recreate_submenus(&self.targets[i]);
                }
                self.dispatcher
                    .list_changed(Some(&self.targets[i]), ListChangeKind::Added);
                self.pump_signals();
            }
        } else {
            for target in &mut self.targets {
                if let Some(&secs) = countdowns.get(target.key()) {
                    target.set_remaining_secs(secs);
                }
            }
            if let Some(menu) = &self.menu {
                for target in &self.targets {
                    menu.update(target, true);
                }
            }
        }

        summary.remaining = self.targets.len();
        self.refreshing = false;
        tracing::debug!("refresh_all done: {:?}", summary);
        summary
    }

    fn resolve_definition(&self, index: usize) -> DefinitionState {
        let TargetKind::Instance {
            connection,
            related_connections,
        } = self.targets[index].kind()
        else {
            return DefinitionState::Unchanged;
        };

        let primary = match self.definitions.get_by_id(&connection.id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Cannot look up connection {}: {}", connection.id, e);
                return DefinitionState::Unchanged;
            }
        };

        let mut related = Vec::with_capacity(related_connections.len());
        for id in related_connections {
            match self.definitions.get_by_id(id) {
                Ok(Some(record)) => related.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Cannot look up connection {}: {}", id, e);
                    return DefinitionState::Unchanged;
                }
            }
        }

        let primary = match primary {
            Some(primary) => primary,
            None if related.is_empty() => return DefinitionState::Vanished,
            None => related.remove(0),
        };

        if primary == *connection && related.len() == related_connections.len() {
            return DefinitionState::Unchanged;
        }

        DefinitionState::Synced {
            primary,
            related: related.into_iter().map(|r| r.id).collect(),
        }
    }

    // --- Signals and persistence ---

    /// Relay queued target signals to subscribers.
    fn pump_signals(&mut self) {
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.relay(signal);
        }
    }

    fn relay(&mut self, signal: TargetSignal) {
        let Some(index) = self.position(signal.key()) else {
            tracing::debug!("Ignoring signal for unmonitored target {}", signal.key());
            return;
        };

        match signal {
            TargetSignal::StatusChanged { previous, .. } => {
                let target = &self.targets[index];
                self.dispatcher.status_changed(target, previous);
                if let Some(menu) = &self.menu {
                    menu.update(target, false);
                }
                self.dispatcher
                    .list_changed(Some(target), ListChangeKind::Changed);
            }
            TargetSignal::PropertyChanged { .. } => {
                self.mark_changed();
                let target = &self.targets[index];
                if let Some(menu) = &self.menu {
                    menu.update(target, false);
                }
                self.dispatcher
                    .list_changed(Some(target), ListChangeKind::Changed);
            }
            TargetSignal::Error { error, .. } => {
                self.dispatcher.error(&self.targets[index], &error);
            }
        }
    }

    fn mark_changed(&mut self) {
        self.has_changes = true;
        self.save_logged();
    }

    fn save_logged(&mut self) {
        if let Err(e) = self.save() {
            tracing::error!("Failed to save monitored list: {}", e);
        }
    }

    /// Write the whole list to storage.
    pub fn save(&mut self) -> Result<(), MonitorError> {
        self.persistence.save(&self.records())?;
        self.has_changes = false;
        Ok(())
    }

    /// Flush pending changes, if any. Returns whether a save happened.
    pub fn save_if_changed(&mut self) -> Result<bool, MonitorError> {
        if !self.has_changes {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Release every target. Teardown failures are logged, not swallowed.
    pub fn shutdown(mut self) {
        for target in &mut self.targets {
            target.detach();
        }
        if let Err(e) = self.save_if_changed() {
            tracing::warn!("Teardown: could not flush monitored list: {}", e);
        }
        self.dispatcher.list_changed(None, ListChangeKind::Reset);
        tracing::info!("Released {} monitored targets", self.targets.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::{connection, instance, service, Fakes, RecordingMenu};
    use crate::probe::ProbeError;
    use crate::menu::{spawn_menu_board, Indicator};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    type Events = Arc<Mutex<Vec<(Option<TargetKey>, ListChangeKind)>>>;

    fn record_list_events(list: &mut MonitoredList) -> Events {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        list.dispatcher().on_list_changed(move |target, kind| {
            sink.lock()
                .unwrap()
                .push((target.map(|t| t.key().clone()), kind));
        });
        events
    }

    fn record_status_events(list: &mut MonitoredList) -> Arc<Mutex<Vec<(TargetKey, Status, Status)>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        list.dispatcher().on_status_changed(move |target, previous| {
            sink.lock()
                .unwrap()
                .push((target.key().clone(), previous, target.status()));
        });
        events
    }

    fn kinds(events: &Events) -> Vec<ListChangeKind> {
        events.lock().unwrap().iter().map(|(_, k)| *k).collect()
    }

    fn new_list(fakes: &Fakes) -> MonitoredList {
        MonitoredList::new(MonitorSettings::default(), fakes.collaborators())
    }

    #[tokio::test]
    async fn test_persisted_snapshot_matches_memory_after_mutations() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);

        assert_ok!(list.add(service("mysql", 5)).await);
        assert_ok!(list.add(service("nginx", 5)).await);
        assert_ok!(list.insert(0, service("redis", 5)).await);
        assert!(list.remove(&TargetKey::service("localhost", "nginx")));
        assert_ok!(list.add(service("postgres", 5)).await);
        assert!(list.remove_at(0).is_some());

        assert_eq!(fakes.persistence.saved(), list.records());
        let names: Vec<_> = list.iter().map(|t| t.display_name()).collect();
        assert_eq!(names, vec!["mysql", "postgres"]);
        assert!(!list.has_changes());
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates_and_bad_index() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);

        assert_ok!(list.add(service("mysql", 5)).await);
        let dup = list.add(service("MySQL", 5)).await;
        assert!(matches!(dup, Err(MonitorError::DuplicateTarget(_))));
        assert_err!(list.insert(5, service("nginx", 5)).await);
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_add_refreshes_unknown_status_and_announces() {
        let fakes = Fakes::new();
        fakes.probe.set_status("mysql", Status::Refusing);
        let menu = RecordingMenu::new();
        let mut list = new_list(&fakes);
        list.set_menu_sync(menu.clone());
        let events = record_list_events(&mut list);

        assert_ok!(list.add(service("mysql", 5)).await);

        let key = TargetKey::service("localhost", "mysql");
        assert_eq!(list.get(&key).unwrap().status(), Status::Refusing);
        assert_eq!(fakes.probe.query_count(), 1);
        assert_eq!(
            kinds(&events),
            vec![ListChangeKind::Added, ListChangeKind::Changed]
        );
        assert_eq!(menu.calls()[0], format!("setup {}", key));
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        let events = record_list_events(&mut list);

        assert!(!list.remove(&TargetKey::service("localhost", "ghost")));
        assert!(list.remove_at(3).is_none());
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(fakes.persistence.save_count(), 0);
    }

    #[tokio::test]
    async fn test_removed_target_no_longer_reaches_subscribers() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        assert_ok!(list.add(service("mysql", 5)).await);
        assert_ok!(list.add(service("nginx", 5)).await);
        let events = record_list_events(&mut list);
        let statuses = record_status_events(&mut list);

        let mut removed = list.remove_at(0).unwrap();
        assert!(!removed.is_attached());
        events.lock().unwrap().clear();

        // the detached target raises nothing
        removed.set_status(Status::Refusing);
        list.pump_signals();
        // a forged signal for the former key is ignored
        list.relay(TargetSignal::StatusChanged {
            key: removed.key().clone(),
            previous: Status::Accepting,
        });

        assert!(events.lock().unwrap().is_empty());
        assert!(statuses.lock().unwrap().is_empty());
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_swaps_in_place() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        assert_ok!(list.add(service("mysql", 5)).await);
        assert_ok!(list.add(service("nginx", 5)).await);
        let events = record_list_events(&mut list);

        let old = list.replace(0, service("redis", 5)).await.unwrap();

        assert_eq!(old.key(), &TargetKey::service("localhost", "mysql"));
        assert!(!old.is_attached());
        assert_eq!(list.iter().next().unwrap().display_name(), "redis");
        // the slot change, then the first status of the newcomer
        assert_eq!(
            kinds(&events),
            vec![ListChangeKind::Changed, ListChangeKind::Changed]
        );
        assert!(matches!(
            list.replace(0, service("nginx", 5)).await,
            Err(MonitorError::DuplicateTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_adding_known_definition_updates_primary() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);

        let first = list
            .add_instance(connection("c1", "db01", 3306))
            .await
            .unwrap();
        assert!(!first.already_monitored);

        let second = list
            .add_instance(connection("c2", "DB01", 3306))
            .await
            .unwrap();
        assert!(second.already_monitored);
        assert_eq!(second.key, first.key);
        assert_eq!(list.len(), 1);

        match list.get(&first.key).unwrap().kind() {
            TargetKind::Instance {
                connection,
                related_connections,
            } => {
                assert_eq!(connection.id, "c2");
                assert_eq!(related_connections, &vec!["c1".to_string()]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(fakes.persistence.saved(), list.records());

        // the related definition is recognized by id as well
        let third = list
            .add_instance(connection("c1", "db01", 3306))
            .await
            .unwrap();
        assert!(third.already_monitored);
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_add_instance_by_unknown_id() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);

        let result = list.add_instance_by_id("missing").await;
        assert!(matches!(result, Err(MonitorError::UnknownConnection(_))));
    }

    #[tokio::test]
    async fn test_three_targets_one_transition() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        for name in ["a", "b", "c"] {
            fakes.probe.set_status(name, Status::Accepting);
            assert_ok!(list.add(service(name, 5)).await);
        }
        let events = record_list_events(&mut list);
        let statuses = record_status_events(&mut list);
        let queries_before = fakes.probe.query_count();

        fakes.probe.set_status("b", Status::Refusing);
        let mut polled = 0;
        for _ in 0..4 {
            polled += list.tick().await;
        }
        assert_eq!(polled, 0);
        polled += list.tick().await;

        assert_eq!(polled, 3);
        assert_eq!(fakes.probe.query_count() - queries_before, 3);
        assert_eq!(
            *statuses.lock().unwrap(),
            vec![(
                TargetKey::service("localhost", "b"),
                Status::Accepting,
                Status::Refusing
            )]
        );
        assert_eq!(kinds(&events), vec![ListChangeKind::Changed]);
    }

    #[tokio::test]
    async fn test_disabled_targets_are_not_polled() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        assert_ok!(list.add(service("mysql", 1)).await);
        let key = TargetKey::service("localhost", "mysql");
        list.set_preferences(
            &key,
            &Preferences {
                monitoring_enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(list.update_countdowns().is_empty());
        assert!(!fakes.persistence.saved()[0].monitoring_enabled);
    }

    #[tokio::test]
    async fn test_countdowns_frozen_during_refresh() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        assert_ok!(list.add(service("mysql", 1)).await);

        list.refreshing = true;
        assert!(list.update_countdowns().is_empty());
        assert_eq!(list.iter().next().unwrap().remaining_secs(), 1);

        list.refreshing = false;
        assert_eq!(list.update_countdowns().len(), 1);
    }

    #[tokio::test]
    async fn test_query_errors_reach_error_channel_only() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        fakes.probe.set_status("mysql", Status::Accepting);
        assert_ok!(list.add(service("mysql", 5)).await);

        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            list.dispatcher()
                .on_error(move |target, error| errors.lock().unwrap().push((target.key().clone(), error.clone())));
        }
        let events = record_list_events(&mut list);

        fakes
            .probe
            .set_error("mysql", ProbeError::Network("unreachable".to_string()));
        let key = TargetKey::service("localhost", "mysql");
        let change = list.refresh_target(&key).await.unwrap();

        assert!(change.is_none());
        assert_eq!(list.get(&key).unwrap().status(), Status::Accepting);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all_preserves_countdowns() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        assert_ok!(list.add(service("a", 10)).await);
        assert_ok!(list.add(service("b", 7)).await);
        fakes.definitions.insert(connection("c1", "db01", 3306));
        assert_ok!(list.add_instance(connection("c1", "db01", 3306)).await);
        for _ in 0..3 {
            list.tick().await;
        }
        let before: Vec<u32> = list.iter().map(Target::remaining_secs).collect();
        assert_eq!(before, vec![7, 4, 7]);

        let summary = list.refresh_all(false).await;

        let after: Vec<u32> = list.iter().map(Target::remaining_secs).collect();
        assert_eq!(after, before);
        assert_eq!(summary.removed, 0);
        assert!(list.iter().all(Target::is_attached));
        assert!(!list.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_all_drops_consecutive_stale_targets() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        let ids = ["c1", "c2", "c3", "c4", "c5"];
        for (i, id) in ids.iter().enumerate() {
            fakes.definitions.insert(connection(id, "db01", 3301 + i as u16));
            assert_ok!(list.add_instance(connection(id, "db01", 3301 + i as u16)).await);
        }
        assert_ok!(list.insert(1, service("mysql", 5)).await);

        // c2 and c3 are adjacent, c5 is last
        for id in ["c2", "c3", "c5"] {
            fakes.definitions.remove(id);
        }
        let events = record_list_events(&mut list);

        let summary = list.refresh_all(false).await;

        assert_eq!(summary.removed, 3);
        assert_eq!(summary.remaining, 3);
        let keys: Vec<_> = list.iter().map(|t| t.key().clone()).collect();
        assert_eq!(
            keys,
            vec![
                TargetKey::instance("db01", 3301),
                TargetKey::service("localhost", "mysql"),
                TargetKey::instance("db01", 3304),
            ]
        );
        assert_eq!(
            kinds(&events),
            vec![ListChangeKind::Deleted; 3]
        );
        assert_eq!(fakes.persistence.saved(), list.records());
    }

    #[tokio::test]
    async fn test_refresh_all_evaluates_target_after_removed_one() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        fakes.definitions.insert(connection("gone", "db01", 3306));
        fakes.definitions.insert(connection("edited", "db02", 3306));
        assert_ok!(list.add_instance(connection("gone", "db01", 3306)).await);
        assert_ok!(list.add_instance(connection("edited", "db02", 3306)).await);

        fakes.definitions.remove("gone");
        let mut edited = connection("edited", "db02", 3306);
        edited.name = "Renamed".to_string();
        fakes.definitions.insert(edited.clone());

        let summary = list.refresh_all(false).await;

        assert_eq!(summary.removed, 1);
        assert_eq!(summary.synced, 1);
        let target = list.iter().next().unwrap();
        assert_eq!(target.key(), &TargetKey::instance("db02", 3306));
        assert_eq!(target.display_name(), "Renamed");
        assert_eq!(fakes.persistence.saved(), list.records());
    }

    #[tokio::test]
    async fn test_refresh_all_promotes_related_definition() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        fakes.definitions.insert(connection("c1", "db01", 3306));
        fakes.definitions.insert(connection("c2", "db01", 3306));
        assert_ok!(list.add_instance(connection("c1", "db01", 3306)).await);
        assert_ok!(list.add_instance(connection("c2", "db01", 3306)).await);

        fakes.definitions.remove("c2");
        let summary = list.refresh_all(false).await;

        assert_eq!(summary.removed, 0);
        let target = list.iter().next().unwrap();
        assert!(target.references_connection("c1"));
        assert!(!target.references_connection("c2"));
    }

    #[tokio::test]
    async fn test_forced_refresh_repolls_and_reannounces() {
        let fakes = Fakes::new();
        let menu = RecordingMenu::new();
        let mut list = new_list(&fakes);
        list.set_menu_sync(menu.clone());
        assert_ok!(list.add(service("a", 5)).await);
        assert_ok!(list.add(service("b", 5)).await);
        let events = record_list_events(&mut list);
        let queries_before = fakes.probe.query_count();

        list.refresh_all(true).await;

        assert_eq!(fakes.probe.query_count() - queries_before, 2);
        assert_eq!(
            kinds(&events),
            vec![ListChangeKind::Added, ListChangeKind::Added]
        );
        let recreated = menu
            .calls()
            .iter()
            .filter(|c| c.starts_with("recreate"))
            .count();
        assert_eq!(recreated, 2);
    }

    #[tokio::test]
    async fn test_light_refresh_updates_menu_without_polling() {
        let fakes = Fakes::new();
        let menu = RecordingMenu::new();
        let mut list = new_list(&fakes);
        list.set_menu_sync(menu.clone());
        assert_ok!(list.add(service("a", 5)).await);
        let queries_before = fakes.probe.query_count();

        list.refresh_all(false).await;

        assert_eq!(fakes.probe.query_count(), queries_before);
        let key = TargetKey::service("localhost", "a");
        assert_eq!(menu.calls().last().unwrap(), &format!("update {} true", key));
    }

    #[tokio::test]
    async fn test_perform_action_repolls_and_reports_failure() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        fakes.probe.set_status("mysql", Status::Accepting);
        assert_ok!(list.add(service("mysql", 5)).await);
        let key = TargetKey::service("localhost", "mysql");

        fakes.probe.set_status("mysql", Status::Refusing);
        assert_ok!(list.perform_action(&key, TargetAction::Stop).await);
        assert_eq!(list.get(&key).unwrap().status(), Status::Refusing);

        fakes
            .control
            .fail_with(ProbeError::Command("access denied".to_string()));
        let result = list.perform_action(&key, TargetAction::Start).await;
        assert!(matches!(result, Err(MonitorError::Action(_))));
        assert_eq!(fakes.control.calls(), vec!["stop mysql", "start mysql"]);
    }

    #[tokio::test]
    async fn test_load_restores_order_without_events() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        assert_ok!(list.add(service("a", 5)).await);
        assert_ok!(list.add(service("b", 9)).await);
        let saved = fakes.persistence.saved();

        let reloaded = MonitoredList::load(
            MonitorSettings::default(),
            Fakes::with_persistence(fakes.persistence.clone()).collaborators(),
        )
        .unwrap();

        assert_eq!(reloaded.records(), saved);
        assert!(reloaded.iter().all(|t| t.status() == Status::Unknown));
        assert!(reloaded.iter().all(Target::is_attached));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_changes_pending() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        fakes.persistence.set_failing(true);

        assert_ok!(list.add(service("a", 5)).await);
        assert!(list.has_changes());

        fakes.persistence.set_failing(false);
        assert!(list.save_if_changed().unwrap());
        assert!(!list.has_changes());
        assert_eq!(fakes.persistence.saved(), list.records());
    }

    #[tokio::test]
    async fn test_clear_and_shutdown_emit_reset() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        assert_ok!(list.add(instance(connection("c1", "db01", 3306), 5)).await);
        let events = record_list_events(&mut list);

        list.clear();
        assert!(list.is_empty());
        assert_eq!(events.lock().unwrap().as_slice(), &[(None, ListChangeKind::Reset)]);
        assert!(fakes.persistence.saved().is_empty());

        list.shutdown();
        assert_eq!(kinds(&events), vec![ListChangeKind::Reset, ListChangeKind::Reset]);
    }

    #[tokio::test]
    async fn test_property_changes_reach_menu_board() {
        let fakes = Fakes::new();
        let (menu, _task) = spawn_menu_board();
        let mut list = new_list(&fakes);
        list.set_menu_sync(Arc::new(menu.sync()));

        fakes.probe.set_status("mysql", Status::Refusing);
        let key = list.add_service("localhost", "mysql", None).await.unwrap();
        assert_eq!(menu.snapshot().await.unwrap().indicator, Indicator::Warning);

        list.set_preferences(
            &key,
            &Preferences {
                update_indicator_on_status_change: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(menu.snapshot().await.unwrap().indicator, Indicator::Ok);

        let first = list
            .add_instance(connection("c1", "db01", 3306))
            .await
            .unwrap();
        let mut renamed = connection("c2", "db01", 3306);
        renamed.name = "Renamed".to_string();
        assert!(list.add_instance(renamed).await.unwrap().already_monitored);

        let snapshot = menu.snapshot().await.unwrap();
        let group = snapshot
            .groups
            .iter()
            .find(|g| g.key == first.key)
            .unwrap();
        assert_eq!(group.header, "Renamed - Running");
    }

    #[tokio::test]
    async fn test_edited_address_is_recognized_as_monitored() {
        let fakes = Fakes::new();
        let mut list = new_list(&fakes);
        fakes.definitions.insert(connection("c1", "db01", 3306));
        let original = list
            .add_instance(connection("c1", "db01", 3306))
            .await
            .unwrap();

        fakes.definitions.insert(connection("c1", "db02", 3306));
        let summary = list.refresh_all(false).await;
        assert_eq!(summary.synced, 1);

        let outcome = list
            .add_instance(connection("c3", "db02", 3306))
            .await
            .unwrap();

        assert!(outcome.already_monitored);
        assert_eq!(outcome.key, original.key);
        assert_eq!(list.len(), 1);
        assert!(list.iter().next().unwrap().references_connection("c3"));
    }

    #[derive(Debug, Clone)]
    enum Mutation {
        Add(u8),
        Insert(usize, u8),
        Remove(u8),
        RemoveAt(usize),
    }

    fn mutation() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            (0u8..6).prop_map(Mutation::Add),
            (0usize..8, 0u8..6).prop_map(|(index, n)| Mutation::Insert(index, n)),
            (0u8..6).prop_map(Mutation::Remove),
            (0usize..8).prop_map(Mutation::RemoveAt),
        ]
    }

    proptest! {
        #[test]
        fn test_persisted_snapshot_follows_any_mutation_sequence(
            mutations in prop::collection::vec(mutation(), 1..24)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let fakes = Fakes::new();
                let mut list = new_list(&fakes);

                for m in mutations {
                    let name = |n: u8| format!("svc{}", n);
                    match m {
                        Mutation::Add(n) => {
                            let _ = list.add(service(&name(n), 5)).await;
                        }
                        Mutation::Insert(index, n) => {
                            let _ = list.insert(index, service(&name(n), 5)).await;
                        }
                        Mutation::Remove(n) => {
                            list.remove(&TargetKey::service("localhost", &name(n)));
                        }
                        Mutation::RemoveAt(index) => {
                            list.remove_at(index);
                        }
                    }

                    assert_eq!(fakes.persistence.saved(), list.records());
                    let mut keys: Vec<_> = list.iter().map(|t| t.key().clone()).collect();
                    keys.sort();
                    keys.dedup();
                    assert_eq!(keys.len(), list.len());
                }
            });
        }
    }
}
