//! Database model types.

use serde::{Deserialize, Serialize};

use crate::monitor::{TargetKey, TargetKind};

/// Default MySQL port used when a connection omits one.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// A connection definition, the external record a monitored instance
/// is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user_name: String,
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

impl Default for ConnectionRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            host: "localhost".to_string(),
            port: DEFAULT_MYSQL_PORT,
            user_name: String::new(),
        }
    }
}

/// Persisted form of a monitored target.
///
/// Live status is never stored; it is re-queried after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub key: TargetKey,
    pub kind: TargetKind,
    pub monitoring_enabled: bool,
    pub poll_interval_secs: u32,
    pub notify_on_status_change: bool,
    pub update_indicator_on_status_change: bool,
}
