//! Change dispatcher: ordered observer registration for the three
//! notification channels of the monitored list.
//!
//! Delivery is synchronous, on whatever task fires the event, in
//! registration order. Subscribers that mutate UI state forward the event
//! to their own owner task (see [`crate::menu`]).

use std::fmt;

use serde::Serialize;

use super::{Status, Target};
use crate::probe::ProbeError;

/// Kind of list membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListChangeKind {
    Added,
    Deleted,
    Changed,
    Reset,
}

/// Handle returned by every subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ListChangedFn = Box<dyn FnMut(Option<&Target>, ListChangeKind) + Send>;
type StatusChangedFn = Box<dyn FnMut(&Target, Status) + Send>;
type ErrorFn = Box<dyn FnMut(&Target, &ProbeError) + Send>;

#[derive(Default)]
pub struct ChangeDispatcher {
    next_id: u64,
    list_changed: Vec<(SubscriptionId, ListChangedFn)>,
    status_changed: Vec<(SubscriptionId, StatusChangedFn)>,
    errors: Vec<(SubscriptionId, ErrorFn)>,
}

impl fmt::Debug for ChangeDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDispatcher")
            .field("list_changed", &self.list_changed.len())
            .field("status_changed", &self.status_changed.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    /// Subscribe to list membership changes. The target is `None` for `Reset`.
    pub fn on_list_changed<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(Option<&Target>, ListChangeKind) + Send + 'static,
    {
        let id = self.next_id();
        self.list_changed.push((id, Box::new(callback)));
        id
    }

    /// Subscribe to status transitions; the callback gets the previous status.
    pub fn on_status_changed<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Target, Status) + Send + 'static,
    {
        let id = self.next_id();
        self.status_changed.push((id, Box::new(callback)));
        id
    }

    /// Subscribe to failed status queries.
    pub fn on_error<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Target, &ProbeError) + Send + 'static,
    {
        let id = self.next_id();
        self.errors.push((id, Box::new(callback)));
        id
    }

    /// Remove a subscription from whichever channel holds it.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriber_count();
        self.list_changed.retain(|(sid, _)| *sid != id);
        self.status_changed.retain(|(sid, _)| *sid != id);
        self.errors.retain(|(sid, _)| *sid != id);
        self.subscriber_count() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.list_changed.len() + self.status_changed.len() + self.errors.len()
    }

    pub fn list_changed(&mut self, target: Option<&Target>, kind: ListChangeKind) {
        for (_, callback) in &mut self.list_changed {
            callback(target, kind);
        }
    }

    pub fn status_changed(&mut self, target: &Target, previous: Status) {
        for (_, callback) in &mut self.status_changed {
            callback(target, previous);
        }
    }

    pub fn error(&mut self, target: &Target, error: &ProbeError) {
        for (_, callback) in &mut self.errors {
            callback(target, error);
        }
    }
}
