//! Target status values.

use serde::{Deserialize, Serialize};

/// Live status of a monitored target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not queried yet, or the last query could not decide.
    #[default]
    Unknown,
    /// Service running / instance accepting connections.
    Accepting,
    /// Service stopped / instance refusing connections.
    Refusing,
    Starting,
    Stopping,
    Paused,
}

impl Status {
    /// Whether the target is between two stable states.
    pub fn is_transitional(self) -> bool {
        matches!(self, Status::Starting | Status::Stopping)
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Unknown => "Unknown",
            Status::Accepting => "Running",
            Status::Refusing => "Stopped",
            Status::Starting => "Starting",
            Status::Stopping => "Stopping",
            Status::Paused => "Paused",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An observed status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: Status,
    pub current: Status,
}
