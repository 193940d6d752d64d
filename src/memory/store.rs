//! SQLite persistence for built maps.
//!
//! `ui_maps` holds exactly one live row per fingerprint. Rows replaced by a
//! newer map or removed by an invalidation move to `ui_map_history`, which is
//! kept for audit and pruned per fingerprint; nothing reads maps back from it.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::{
    error::PersistenceError,
    model::{
        fingerprint::WindowFingerprint,
        ui_map::{SCHEMA_VERSION, UiMap},
    },
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ui_maps (
    fingerprint    TEXT PRIMARY KEY,
    schema_version INTEGER NOT NULL,
    built_at       TEXT NOT NULL,
    payload        BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS ui_map_history (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint    TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    built_at       TEXT NOT NULL,
    payload        BLOB NOT NULL,
    retired_at     TEXT NOT NULL,
    reason         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ui_map_history_fp ON ui_map_history (fingerprint, id);
";

pub struct MapStore {
    conn: Mutex<Connection>,
    history_limit: usize,
}

impl MapStore {
    /// Open (or create) a file-backed store. Parent directories are created.
    pub fn open(path: impl AsRef<Path>, history_limit: usize) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened map store");
        Self::init(conn, history_limit)
    }

    pub fn open_in_memory(history_limit: usize) -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?, history_limit)
    }

    fn init(conn: Connection, history_limit: usize) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA)?;
        Ok(MapStore {
            conn: Mutex::new(conn),
            history_limit,
        })
    }

    /// Store `map` as the live row for its fingerprint, retiring any previous one.
    pub fn upsert(&self, map: &UiMap) -> Result<(), PersistenceError> {
        let payload = serde_json::to_vec(map)?;
        let fp = map.fingerprint().as_str();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let retired = retire_live(&tx, fp, "superseded")?;
        tx.execute(
            "INSERT INTO ui_maps (fingerprint, schema_version, built_at, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![fp, map.schema_version(), map.built_at().to_rfc3339(), payload],
        )?;
        prune_history(&tx, fp, self.history_limit)?;
        tx.commit()?;

        debug!(fingerprint = fp, elements = map.len(), retired, "stored map");
        Ok(())
    }

    /// Live map for `fingerprint`. A row written under another schema version
    /// reads as absent so the caller rebuilds it.
    pub fn load(&self, fingerprint: &WindowFingerprint) -> Result<Option<UiMap>, PersistenceError> {
        let row: Option<(u32, Vec<u8>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT schema_version, payload FROM ui_maps WHERE fingerprint = ?1",
                [fingerprint.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((version, _)) if version != SCHEMA_VERSION => {
                debug!(
                    fingerprint = %fingerprint,
                    stored = version,
                    current = SCHEMA_VERSION,
                    "ignoring map stored under another schema version"
                );
                Ok(None)
            }
            Some((_, payload)) => Ok(Some(serde_json::from_slice(&payload)?)),
        }
    }

    /// Move the live row to history. Returns whether there was one.
    pub fn retire(&self, fingerprint: &WindowFingerprint, reason: &str) -> Result<bool, PersistenceError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let retired = retire_live(&tx, fingerprint.as_str(), reason)?;
        prune_history(&tx, fingerprint.as_str(), self.history_limit)?;
        tx.commit()?;
        Ok(retired)
    }

    /// Number of retired maps kept for `fingerprint`.
    pub fn history_count(&self, fingerprint: &WindowFingerprint) -> Result<usize, PersistenceError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM ui_map_history WHERE fingerprint = ?1",
            [fingerprint.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Every fingerprint with a live map, sorted.
    pub fn fingerprints(&self) -> Result<Vec<WindowFingerprint>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT fingerprint FROM ui_maps ORDER BY fingerprint")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().map(WindowFingerprint::from_hex).collect())
    }
}

fn retire_live(tx: &rusqlite::Transaction<'_>, fp: &str, reason: &str) -> Result<bool, rusqlite::Error> {
    let moved = tx.execute(
        "INSERT INTO ui_map_history (fingerprint, schema_version, built_at, payload, retired_at, reason)
         SELECT fingerprint, schema_version, built_at, payload, ?2, ?3
         FROM ui_maps WHERE fingerprint = ?1",
        params![fp, Utc::now().to_rfc3339(), reason],
    )?;
    tx.execute("DELETE FROM ui_maps WHERE fingerprint = ?1", [fp])?;
    Ok(moved > 0)
}

fn prune_history(tx: &rusqlite::Transaction<'_>, fp: &str, keep: usize) -> Result<(), rusqlite::Error> {
    tx.execute(
        "DELETE FROM ui_map_history
         WHERE fingerprint = ?1
           AND id NOT IN (
               SELECT id FROM ui_map_history WHERE fingerprint = ?1 ORDER BY id DESC LIMIT ?2
           )",
        params![fp, keep as i64],
    )?;
    Ok(())
}
