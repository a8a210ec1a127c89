//! Monitored-list error types.

use thiserror::Error;

use super::{ActionError, TargetKey};
use crate::db::DbError;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("target {0} is already monitored")]
    DuplicateTarget(TargetKey),
    #[error("index {index} out of range for list of {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("target {0} is not monitored")]
    NotFound(TargetKey),
    #[error("connection {0} does not exist")]
    UnknownConnection(String),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
    #[error("monitor task is not running")]
    Stopped,
}
