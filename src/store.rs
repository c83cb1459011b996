//! SQLite persistence of the last-known status of every service
//!
//! The store is fed only through [`SaveEvent`]s: [`StatusStore::spawn_writer`]
//! drains the save queue on a dedicated thread so status transitions never
//! wait on disk. At startup [`StatusStore::load_all`] provides the snapshots
//! handed to the service manager.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};

use crate::service::events::{SaveEvent, StatusSnapshot};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to create {path:?}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Schema migrations, applied in order above the stored `user_version`
const MIGRATIONS: &[&str] = &[
    // v1: status table
    r#"
    CREATE TABLE IF NOT EXISTS status (
        service_id TEXT PRIMARY KEY,
        latest_version TEXT NOT NULL DEFAULT '',
        latest_version_timestamp TEXT,
        deployed_version TEXT NOT NULL DEFAULT '',
        deployed_version_timestamp TEXT,
        approved_version TEXT NOT NULL DEFAULT '',
        last_queried TEXT,
        updated_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
];

pub struct StatusStore {
    conn: Mutex<Connection>,
}

impl StatusStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        info!("Opening status database at {:?}", db_path);
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::apply_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, sql) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version <= current_version {
                continue;
            }
            conn.execute_batch(sql)?;
            debug!("Applied migration v{}", version);
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
        }
        Ok(())
    }

    /// Every stored snapshot, keyed by service id
    pub fn load_all(&self) -> Result<HashMap<String, StatusSnapshot>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT service_id, latest_version, latest_version_timestamp,
                   deployed_version, deployed_version_timestamp,
                   approved_version, last_queried
            FROM status
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    StatusSnapshot {
                        latest_version: row.get(1)?,
                        latest_version_timestamp: parse_timestamp(row.get(2)?),
                        deployed_version: row.get(3)?,
                        deployed_version_timestamp: parse_timestamp(row.get(4)?),
                        approved_version: row.get(5)?,
                        last_queried: parse_timestamp(row.get(6)?),
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        debug!("Loaded {} stored statuses", rows.len());
        Ok(rows)
    }

    pub fn get(&self, service_id: &str) -> Result<Option<StatusSnapshot>, StoreError> {
        let conn = self.lock_conn()?;
        let snapshot = conn
            .query_row(
                r#"
                SELECT latest_version, latest_version_timestamp,
                       deployed_version, deployed_version_timestamp,
                       approved_version, last_queried
                FROM status WHERE service_id = ?1
                "#,
                [service_id],
                |row| {
                    Ok(StatusSnapshot {
                        latest_version: row.get(0)?,
                        latest_version_timestamp: parse_timestamp(row.get(1)?),
                        deployed_version: row.get(2)?,
                        deployed_version_timestamp: parse_timestamp(row.get(3)?),
                        approved_version: row.get(4)?,
                        last_queried: parse_timestamp(row.get(5)?),
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn save(&self, service_id: &str, snapshot: &StatusSnapshot) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO status (
                service_id, latest_version, latest_version_timestamp,
                deployed_version, deployed_version_timestamp,
                approved_version, last_queried, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(service_id) DO UPDATE SET
                latest_version = excluded.latest_version,
                latest_version_timestamp = excluded.latest_version_timestamp,
                deployed_version = excluded.deployed_version,
                deployed_version_timestamp = excluded.deployed_version_timestamp,
                approved_version = excluded.approved_version,
                last_queried = excluded.last_queried,
                updated_at = excluded.updated_at
            "#,
            (
                service_id,
                &snapshot.latest_version,
                snapshot.latest_version_timestamp.map(|t| t.to_rfc3339()),
                &snapshot.deployed_version,
                snapshot.deployed_version_timestamp.map(|t| t.to_rfc3339()),
                &snapshot.approved_version,
                snapshot.last_queried.map(|t| t.to_rfc3339()),
                Utc::now().timestamp_millis(),
            ),
        )?;
        Ok(())
    }

    pub fn delete(&self, service_id: &str) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM status WHERE service_id = ?1", [service_id])?;
        Ok(())
    }

    fn apply(&self, event: &SaveEvent) -> Result<(), StoreError> {
        match event {
            SaveEvent::Save {
                service_id,
                snapshot,
            } => self.save(service_id, snapshot),
            SaveEvent::Delete { service_id } => self.delete(service_id),
        }
    }

    /// Drain `events` on a dedicated thread until every sender is dropped
    pub fn spawn_writer(
        self: Arc<Self>,
        mut events: UnboundedReceiver<SaveEvent>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("status-writer".to_string())
            .spawn(move || {
                while let Some(event) = events.blocking_recv() {
                    if let Err(e) = self.apply(&event) {
                        error!("Failed to persist {:?}: {}", event, e);
                    }
                }
                debug!("Status writer stopped");
            })
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc::unbounded_channel;

    fn snapshot(latest: &str) -> StatusSnapshot {
        StatusSnapshot {
            latest_version: latest.to_string(),
            latest_version_timestamp: Some(Utc::now()),
            deployed_version: "1.0.0".to_string(),
            approved_version: latest.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn save_then_load_all() {
        let temp_dir = TempDir::new().unwrap();
        let store = StatusStore::open(&temp_dir.path().join("status.db")).unwrap();
        let argus = snapshot("1.2.0");

        store.save("argus", &argus).unwrap();
        store.save("gitea", &snapshot("0.9.0")).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["argus"], argus);
    }

    #[test]
    fn save_overwrites_existing_row() {
        let temp_dir = TempDir::new().unwrap();
        let store = StatusStore::open(&temp_dir.path().join("status.db")).unwrap();

        store.save("argus", &snapshot("1.0.0")).unwrap();
        store.save("argus", &snapshot("1.1.0")).unwrap();

        let stored = store.get("argus").unwrap().unwrap();
        assert_eq!(stored.latest_version, "1.1.0");
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_row() {
        let temp_dir = TempDir::new().unwrap();
        let store = StatusStore::open(&temp_dir.path().join("status.db")).unwrap();
        store.save("argus", &snapshot("1.0.0")).unwrap();

        store.delete("argus").unwrap();

        assert_eq!(store.get("argus").unwrap(), None);
    }

    #[test]
    fn open_creates_parent_dirs_and_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/data/status.db");

        StatusStore::open(&db_path)
            .unwrap()
            .save("argus", &snapshot("1.0.0"))
            .unwrap();
        let reopened = StatusStore::open(&db_path).unwrap();

        assert_eq!(reopened.get("argus").unwrap().unwrap().latest_version, "1.0.0");
        let conn = reopened.lock_conn().unwrap();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn writer_applies_events_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(StatusStore::open(&temp_dir.path().join("status.db")).unwrap());
        let (tx, rx) = unbounded_channel();
        let writer = Arc::clone(&store).spawn_writer(rx).unwrap();

        tx.send(SaveEvent::Save {
            service_id: "argus".to_string(),
            snapshot: snapshot("1.0.0"),
        })
        .unwrap();
        tx.send(SaveEvent::Save {
            service_id: "gitea".to_string(),
            snapshot: snapshot("2.0.0"),
        })
        .unwrap();
        tx.send(SaveEvent::Delete {
            service_id: "argus".to_string(),
        })
        .unwrap();
        drop(tx);
        writer.join().unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["gitea"]);
    }
}
