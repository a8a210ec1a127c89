//! SQLite database store implementation.

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::monitor::{TargetKey, TargetKind};

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
    #[error("database lock poisoned")]
    Poisoned,
}

/// Whole-list persistence for the monitored list.
pub trait ListPersistence: Send + Sync {
    /// Replace the stored list with `targets`, preserving order.
    fn save(&self, targets: &[TargetRecord]) -> Result<(), DbError>;
    /// Load the stored list in order.
    fn load(&self) -> Result<Vec<TargetRecord>, DbError>;
}

/// Lookup of connection definitions by id.
pub trait DefinitionStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> Result<Option<ConnectionRecord>, DbError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Connection definitions ---

    /// Add a new connection definition.
    pub fn add_connection(&self, record: &ConnectionRecord) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO connections (id, name, host, port, user_name) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.id, record.name, record.host, record.port, record.user_name],
        )?;
        Ok(())
    }

    /// Update an existing connection definition.
    pub fn update_connection(&self, record: &ConnectionRecord) -> Result<(), DbError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE connections SET name=?1, host=?2, port=?3, user_name=?4 WHERE id=?5",
            params![record.name, record.host, record.port, record.user_name, record.id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Delete a connection definition. Missing ids are not an error.
    pub fn delete_connection(&self, id: &str) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM connections WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Get a connection definition by id.
    pub fn get_connection(&self, id: &str) -> Result<Option<ConnectionRecord>, DbError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, name, host, port, user_name FROM connections WHERE id = ?1",
                params![id],
                connection_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Get all connection definitions.
    pub fn get_connections(&self) -> Result<Vec<ConnectionRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, name, host, port, user_name FROM connections ORDER BY name")?;
        let records = stmt
            .query_map([], connection_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }

    // --- Monitored list ---

    /// Rewrite the monitored list in a single transaction.
    pub fn save_targets(&self, targets: &[TargetRecord]) -> Result<(), DbError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute("DELETE FROM monitored_targets", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO monitored_targets (position, target_key, kind, monitoring_enabled, poll_interval, notify_on_status_change, update_indicator)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for (position, t) in targets.iter().enumerate() {
                let kind = serde_json::to_string(&t.kind)?;
                stmt.execute(params![
                    position as i64,
                    t.key.as_str(),
                    kind,
                    t.monitoring_enabled,
                    t.poll_interval_secs,
                    t.notify_on_status_change,
                    t.update_indicator_on_status_change,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the monitored list in stored order.
    pub fn load_targets(&self) -> Result<Vec<TargetRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT target_key, kind, monitoring_enabled, poll_interval, notify_on_status_change, update_indicator
             FROM monitored_targets ORDER BY position ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut targets = Vec::with_capacity(rows.len());
        for (key, kind, enabled, interval, notify, indicator) in rows {
            let kind: TargetKind = serde_json::from_str(&kind)?;
            targets.push(TargetRecord {
                key: TargetKey::from(key),
                kind,
                monitoring_enabled: enabled,
                poll_interval_secs: interval,
                notify_on_status_change: notify,
                update_indicator_on_status_change: indicator,
            });
        }

        Ok(targets)
    }
}

impl ListPersistence for Store {
    fn save(&self, targets: &[TargetRecord]) -> Result<(), DbError> {
        self.save_targets(targets)
    }

    fn load(&self) -> Result<Vec<TargetRecord>, DbError> {
        self.load_targets()
    }
}

impl DefinitionStore for Store {
    fn get_by_id(&self, id: &str) -> Result<Option<ConnectionRecord>, DbError> {
        self.get_connection(id)
    }
}

fn connection_from_row(row: &rusqlite::Row<'_>) -> SqlResult<ConnectionRecord> {
    Ok(ConnectionRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        user_name: row.get(4)?,
    })
}
