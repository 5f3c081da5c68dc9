//! Settings persistence: a flat key-value store plus the fire-and-forget
//! write worker the controller dispatches to.
//!
//! Playback state is the source of truth, not the store: a write that still
//! fails after one retry is dropped with an error log.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::protocol::TrackId;

/// Setting keys written by the orchestration core.
pub const KEY_LAST_PLAYED_TRACK: &str = "last_played_track";
pub const KEY_LAST_PLAYED_POSITION_MS: &str = "last_played_position_ms";
pub const KEY_REPEAT_MODE: &str = "repeat_mode";
pub const KEY_FIRST_INSTALL_DONE: &str = "first_install_done";
pub const KEY_SORT_ORDER: &str = "sort_order";

/// Prefix for per-track favorite flags (`favorite.<track_id>`).
pub const KEY_FAVORITE_PREFIX: &str = "favorite.";

/// Primitive scalar persisted under a string key. Missing key implies the
/// caller's default; there is no schema versioning beyond that.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl SettingValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// External persistence contract. Writes are fire-and-forget from the
/// controller's perspective; it never waits on this.
pub trait PersistenceGateway: Send {
    fn load_setting(&self, key: &str) -> Result<Option<SettingValue>>;
    fn save_setting(&self, key: &str, value: &SettingValue) -> Result<()>;

    fn load_last_played(&self) -> Result<Option<(TrackId, u64)>> {
        let track = self.load_setting(KEY_LAST_PLAYED_TRACK)?;
        let position = self.load_setting(KEY_LAST_PLAYED_POSITION_MS)?;
        match track.and_then(|v| v.as_int()) {
            Some(id) => {
                let position_ms = position.and_then(|v| v.as_int()).unwrap_or(0).max(0) as u64;
                Ok(Some((id, position_ms)))
            }
            None => Ok(None),
        }
    }

    fn save_last_played(&self, track_id: TrackId, position_ms: u64) -> Result<()> {
        self.save_setting(KEY_LAST_PLAYED_TRACK, &SettingValue::Int(track_id))?;
        self.save_setting(
            KEY_LAST_PLAYED_POSITION_MS,
            &SettingValue::Int(position_ms as i64),
        )
    }
}

/// Marks the install flag on first run. Returns whether this run was the
/// first one.
pub fn mark_first_install(gateway: &dyn PersistenceGateway) -> Result<bool> {
    if gateway.load_setting(KEY_FIRST_INSTALL_DONE)?.is_some() {
        return Ok(false);
    }
    gateway.save_setting(KEY_FIRST_INSTALL_DONE, &SettingValue::Bool(true))?;
    Ok(true)
}

/// SQLite-backed key-value settings store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

impl PersistenceGateway for SqliteStore {
    fn load_setting(&self, key: &str) -> Result<Option<SettingValue>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let (kind, value) = row?;
        let parsed = match kind.as_str() {
            "bool" => SettingValue::Bool(value == "1"),
            "int" => SettingValue::Int(value.parse::<i64>().map_err(|e| {
                Error::PersistenceWriteFailed(format!("corrupt int for {}: {}", key, e))
            })?),
            _ => SettingValue::Text(value),
        };
        Ok(Some(parsed))
    }

    fn save_setting(&self, key: &str, value: &SettingValue) -> Result<()> {
        let (kind, text) = match value {
            SettingValue::Bool(b) => ("bool", if *b { "1".to_string() } else { "0".to_string() }),
            SettingValue::Int(i) => ("int", i.to_string()),
            SettingValue::Text(s) => ("text", s.clone()),
        };
        self.conn.execute(
            "INSERT INTO settings (key, kind, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, value = excluded.value",
            params![key, kind, text],
        )?;
        Ok(())
    }
}

/// One queued write for the persistence worker.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    SaveLastPlayed { track_id: TrackId, position_ms: u64 },
    SaveSetting { key: String, value: SettingValue },
}

/// Cloneable handle used by the controller to dispatch writes without
/// blocking on I/O.
#[derive(Clone)]
pub struct StoreHandle {
    tx: Sender<StoreRequest>,
}

impl StoreHandle {
    pub fn new(tx: Sender<StoreRequest>) -> Self {
        Self { tx }
    }

    /// Handle wired to a plain receiver, for tests that assert on the
    /// exact sequence of dispatched writes.
    pub fn channel() -> (Self, Receiver<StoreRequest>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    pub fn save_last_played(&self, track_id: TrackId, position_ms: u64) {
        self.dispatch(StoreRequest::SaveLastPlayed {
            track_id,
            position_ms,
        });
    }

    pub fn save_setting(&self, key: impl Into<String>, value: SettingValue) {
        self.dispatch(StoreRequest::SaveSetting {
            key: key.into(),
            value,
        });
    }

    fn dispatch(&self, request: StoreRequest) {
        if self.tx.send(request).is_err() {
            debug!("StoreHandle: persistence worker is gone, dropping write");
        }
    }
}

/// Spawns the persistence worker thread and returns its handle.
///
/// Failed writes are retried exactly once before being dropped.
pub fn spawn_store_worker(
    gateway: Box<dyn PersistenceGateway>,
) -> (StoreHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<StoreRequest>();
    let join = thread::spawn(move || {
        info!("persistence worker: started");
        while let Ok(request) = rx.recv() {
            apply_with_retry(gateway.as_ref(), &request);
        }
        info!("persistence worker: stopped");
    });
    (StoreHandle::new(tx), join)
}

fn apply_with_retry(gateway: &dyn PersistenceGateway, request: &StoreRequest) {
    for attempt in 0..2 {
        match apply(gateway, request) {
            Ok(()) => return,
            Err(e) if attempt == 0 => {
                warn!("persistence write failed, retrying once: {}", e);
            }
            Err(e) => {
                error!("persistence write dropped after retry: {}", e);
            }
        }
    }
}

fn apply(gateway: &dyn PersistenceGateway, request: &StoreRequest) -> Result<()> {
    match request {
        StoreRequest::SaveLastPlayed {
            track_id,
            position_ms,
        } => gateway.save_last_played(*track_id, *position_ms),
        StoreRequest::SaveSetting { key, value } => gateway.save_setting(key, value),
    }
}
