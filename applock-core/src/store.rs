//! Durable protection records.
//!
//! Two records live here: the singleton settings row (whether enforcement is
//! on, the PIN hash, last update time) and the protected-application list.
//! The store is the source of truth; the in-memory snapshot in
//! [`crate::state`] is refreshed from it after every write, never the
//! reverse.

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

/// Singleton enforcement settings. Created lazily on first read.
///
/// `enabled == true` implies `pin_hash` is set; the PIN gate is the only
/// writer of this row and maintains the invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectionSettings {
    pub enabled: bool,
    pub pin_hash: Option<String>,
    /// Unix millis of the last transition.
    pub updated_at: i64,
}

impl ProtectionSettings {
    fn initial() -> Self {
        Self {
            enabled: false,
            pin_hash: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// One application the user chose to gate behind the PIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedApp {
    pub id: i64,
    /// Display name.
    pub label: String,
    /// Unique OS application identifier.
    pub package: String,
}

pub struct ProtectionStore {
    conn: Connection,
}

impl ProtectionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA busy_timeout=5000; PRAGMA foreign_keys=ON;")?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS protection_settings (
                id              INTEGER PRIMARY KEY CHECK (id = 1),
                enabled         INTEGER NOT NULL DEFAULT 0,
                pin_hash        TEXT,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS protected_apps (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                label           TEXT NOT NULL,
                package_name    TEXT NOT NULL UNIQUE
            );

            CREATE INDEX IF NOT EXISTS idx_protected_apps_label ON protected_apps(label);",
        )?;
        Ok(())
    }

    pub fn settings(&self) -> Result<Option<ProtectionSettings>> {
        let row = self
            .conn
            .query_row(
                "SELECT enabled, pin_hash, updated_at FROM protection_settings WHERE id = 1",
                [],
                |row| {
                    Ok(ProtectionSettings {
                        enabled: row.get::<_, i64>(0)? != 0,
                        pin_hash: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Read the settings row, creating the default row on first access.
    pub fn settings_or_default(&self) -> Result<ProtectionSettings> {
        if let Some(settings) = self.settings()? {
            return Ok(settings);
        }
        let settings = ProtectionSettings::initial();
        self.upsert_settings(&settings)?;
        Ok(settings)
    }

    /// Whole-row upsert. The settings row is always written in one statement
    /// so concurrent transitions cannot interleave field-level updates.
    pub fn upsert_settings(&self, settings: &ProtectionSettings) -> Result<()> {
        self.conn.execute(
            "INSERT INTO protection_settings (id, enabled, pin_hash, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET enabled = ?1, pin_hash = ?2, updated_at = ?3",
            params![settings.enabled as i64, settings.pin_hash, settings.updated_at],
        )?;
        Ok(())
    }

    pub fn list_protected(&self) -> Result<Vec<ProtectedApp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, label, package_name FROM protected_apps ORDER BY label ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ProtectedApp {
                id: row.get(0)?,
                label: row.get(1)?,
                package: row.get(2)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Add an application to the protected list. Adding a package that is
    /// already present replaces its label and keeps its id.
    pub fn insert_protected(&self, label: &str, package: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO protected_apps (label, package_name) VALUES (?1, ?2)
             ON CONFLICT(package_name) DO UPDATE SET label = ?1",
            params![label, package],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM protected_apps WHERE package_name = ?1",
            [package],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Remove by package identifier. Returns whether a row was deleted.
    pub fn remove_protected(&self, package: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM protected_apps WHERE package_name = ?1", [package])?;
        Ok(n > 0)
    }

    pub fn clear_protected(&self) -> Result<()> {
        self.conn.execute("DELETE FROM protected_apps", [])?;
        Ok(())
    }
}
