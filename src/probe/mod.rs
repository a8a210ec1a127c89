//! Probe module: the external status and service-control capabilities.
//!
//! Supports OS services (systemd / Windows service manager) and MySQL
//! instances reached over TCP.

mod connection;
mod service;

pub use connection::*;
pub use service::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::monitor::{Status, TargetKind};

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Live status query for a monitored target.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn query(&self, kind: &TargetKind, timeout: Duration) -> Result<Status, ProbeError>;
}

/// Start/stop control for OS services.
///
/// Implementations return once the service reached the requested state
/// or fail with [`ProbeError::Timeout`].
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn start(&self, host: &str, name: &str, timeout: Duration) -> Result<(), ProbeError>;
    async fn stop(&self, host: &str, name: &str, timeout: Duration) -> Result<(), ProbeError>;
}

/// Probe backed by the local operating system and the network.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

#[async_trait]
impl StatusProbe for SystemProbe {
    async fn query(&self, kind: &TargetKind, timeout: Duration) -> Result<Status, ProbeError> {
        match kind {
            TargetKind::Service { host, name, .. } => query_service(host, name, timeout).await,
            TargetKind::Instance { connection, .. } => {
                test_connection(&connection.host, connection.port, timeout).await
            }
        }
    }
}

#[async_trait]
impl ServiceControl for SystemProbe {
    async fn start(&self, host: &str, name: &str, timeout: Duration) -> Result<(), ProbeError> {
        control_service(host, name, ServiceCommand::Start, timeout).await
    }

    async fn stop(&self, host: &str, name: &str, timeout: Duration) -> Result<(), ProbeError> {
        control_service(host, name, ServiceCommand::Stop, timeout).await
    }
}
