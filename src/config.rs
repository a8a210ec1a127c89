//! Configuration module for the notifier.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Monitoring settings handed to the monitored list at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Poll interval given to newly added targets, in seconds (default: 10)
    pub default_poll_interval_secs: u32,
    /// Upper bound for a single status query (default: 5s)
    pub query_timeout: Duration,
    /// Budget for start/stop/restart actions (default: 30s)
    pub action_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            default_poll_interval_secs: 10,
            query_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(30),
        }
    }
}

/// Notifier configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// HTTP port for the control surface (default: 8080)
    pub http_port: u16,
    /// Directory holding the database file (default: application data dir)
    pub data_dir: PathBuf,
    /// Length of one countdown tick (default: 1s)
    pub tick: Duration,
    pub monitor: MonitorSettings,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            data_dir: default_data_dir(),
            tick: Duration::from_secs(1),
            monitor: MonitorSettings::default(),
        }
    }
}

impl NotifierConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NOTIFIER_HTTP_PORT`: HTTP port (default: 8080)
    /// - `NOTIFIER_DATA_DIR`: data directory (default: `<data dir>/notifier`)
    /// - `NOTIFIER_TICK_SECS`: countdown tick length (default: 1)
    /// - `NOTIFIER_DEFAULT_POLL_SECS`: poll interval for new targets (default: 10)
    /// - `NOTIFIER_QUERY_TIMEOUT_SECS`: status query timeout (default: 5)
    /// - `NOTIFIER_ACTION_TIMEOUT_SECS`: start/stop/restart budget (default: 30)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env_parse::<u16>("NOTIFIER_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Ok(dir) = env::var("NOTIFIER_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }

        if let Some(secs) = env_parse::<u64>("NOTIFIER_TICK_SECS").filter(|s| *s > 0) {
            cfg.tick = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u32>("NOTIFIER_DEFAULT_POLL_SECS").filter(|s| *s > 0) {
            cfg.monitor.default_poll_interval_secs = secs;
        }

        if let Some(secs) = env_parse::<u64>("NOTIFIER_QUERY_TIMEOUT_SECS").filter(|s| *s > 0) {
            cfg.monitor.query_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("NOTIFIER_ACTION_TIMEOUT_SECS").filter(|s| *s > 0) {
            cfg.monitor.action_timeout = Duration::from_secs(secs);
        }

        cfg
    }

    /// Path to the SQLite database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("notifier.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("notifier"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
