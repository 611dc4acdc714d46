use std::path::Path;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

use crate::model::{AttendanceThresholds, Class};

/// Durable per-user snapshot of the class collection plus the user's default
/// thresholds. Whole-value rows; a missing or unreadable row is "absent",
/// never an error, and callers start from empty state.
pub struct PersistenceCache {
    conn: Connection,
}

impl PersistenceCache {
    pub fn open(workspace: &Path) -> Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let db_path = workspace.join("attendsheets.sqlite3");
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS class_snapshots(
                user_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_thresholds(
                user_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        Ok(PersistenceCache { conn })
    }

    pub fn save_classes(&self, user_id: &str, classes: &[Class]) -> Result<()> {
        let payload = serde_json::to_string(classes)?;
        self.conn.execute(
            "INSERT INTO class_snapshots(user_id, payload, saved_at)
             VALUES(?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
               payload = excluded.payload,
               saved_at = excluded.saved_at",
            (user_id, &payload, chrono::Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    pub fn load_classes(&self, user_id: &str) -> Option<Vec<Class>> {
        let payload: Option<String> = match self
            .conn
            .query_row(
                "SELECT payload FROM class_snapshots WHERE user_id = ?",
                [user_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                warn!(user = user_id, error = %e, "snapshot read failed");
                return None;
            }
        };
        let payload = payload?;
        match serde_json::from_str(&payload) {
            Ok(classes) => Some(classes),
            Err(e) => {
                // Corrupt snapshot reads as absent; the session starts empty.
                warn!(user = user_id, error = %e, "discarding unreadable snapshot");
                None
            }
        }
    }

    pub fn save_thresholds(&self, user_id: &str, thresholds: &AttendanceThresholds) -> Result<()> {
        let payload = serde_json::to_string(thresholds)?;
        self.conn.execute(
            "INSERT INTO user_thresholds(user_id, payload)
             VALUES(?, ?)
             ON CONFLICT(user_id) DO UPDATE SET payload = excluded.payload",
            (user_id, &payload),
        )?;
        Ok(())
    }

    pub fn load_thresholds(&self, user_id: &str) -> Option<AttendanceThresholds> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM user_thresholds WHERE user_id = ?",
                [user_id],
                |r| r.get(0),
            )
            .optional()
            .ok()
            .flatten();
        serde_json::from_str(&payload?).ok()
    }
}
