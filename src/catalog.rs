//! Track/playlist catalog access.
//!
//! The catalog owns all track and playlist records; the controller only
//! reads from it to materialize a queue or resolve an id. Catalog mutation
//! (scanning, imports, playlist editing) happens outside the orchestration
//! core.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::protocol::{Track, TrackId};

/// Persisted ordering preference for catalog listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Title,
    Artist,
    Album,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Title => "title",
            SortOrder::Artist => "artist",
            SortOrder::Album => "album",
        }
    }

    /// Unknown values fall back to title order.
    pub fn from_str_or_title(value: &str) -> Self {
        match value {
            "artist" => SortOrder::Artist,
            "album" => SortOrder::Album,
            _ => SortOrder::Title,
        }
    }

    /// Comparator for track listings; id breaks ties so the order is stable
    /// across runs.
    pub fn compare(&self, a: &Track, b: &Track) -> std::cmp::Ordering {
        let primary = match self {
            SortOrder::Title => a.title.cmp(&b.title),
            SortOrder::Artist => a.artist.cmp(&b.artist).then(a.title.cmp(&b.title)),
            SortOrder::Album => a.album.cmp(&b.album).then(a.title.cmp(&b.title)),
        };
        primary.then(a.id.cmp(&b.id))
    }
}

/// A named, persisted, ordered list of track ids. Distinct from the live
/// queue: a queue is materialized from a playlist when playback starts, and
/// later playlist edits do not mutate the live queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub track_ids: Vec<TrackId>,
}

/// Read contract the controller depends on. Synchronous from the
/// controller's viewpoint; lookups are cheap local reads.
pub trait CatalogRepository: Send + Sync {
    fn all_tracks(&self) -> Result<Vec<Arc<Track>>>;
    fn track_by_id(&self, id: TrackId) -> Result<Option<Arc<Track>>>;
    fn playlist_by_id(&self, id: i64) -> Result<Option<Playlist>>;
    fn update_playlist(&self, playlist: &Playlist) -> Result<()>;
}

/// SQLite-backed library catalog.
pub struct LibraryDb {
    conn: Mutex<Connection>,
}

impl LibraryDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// In-memory catalog, used by the test suite and scratch sessions.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                album TEXT NOT NULL,
                album_id INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                content_ref TEXT NOT NULL,
                favorite INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS playlist_tracks (
                playlist_id INTEGER NOT NULL,
                track_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                FOREIGN KEY(playlist_id) REFERENCES playlists(id),
                FOREIGN KEY(track_id) REFERENCES tracks(id)
            )",
            [],
        )?;
        Ok(())
    }

    /// Inserts a track; used by import tooling outside the controller.
    pub fn insert_track(&self, track: &Track) -> Result<()> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "INSERT INTO tracks (id, title, artist, album, album_id, duration_ms, content_ref, favorite)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                track.id,
                track.title,
                track.artist,
                track.album,
                track.album_id,
                track.duration_ms as i64,
                track.content_ref,
                track.is_favorite as i64,
            ],
        )?;
        Ok(())
    }

    pub fn track_count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn next_track_id(&self) -> Result<TrackId> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let max: Option<i64> = conn.query_row("SELECT MAX(id) FROM tracks", [], |r| r.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
        Ok(Track {
            id: row.get(0)?,
            title: row.get(1)?,
            artist: row.get(2)?,
            album: row.get(3)?,
            album_id: row.get(4)?,
            duration_ms: row.get::<_, i64>(5)? as u64,
            content_ref: row.get(6)?,
            is_favorite: row.get::<_, i64>(7)? != 0,
        })
    }
}

impl CatalogRepository for LibraryDb {
    fn all_tracks(&self) -> Result<Vec<Arc<Track>>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, title, artist, album, album_id, duration_ms, content_ref, favorite
             FROM tracks ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_track)?;

        let mut tracks = Vec::new();
        for row in rows {
            tracks.push(Arc::new(row?));
        }
        Ok(tracks)
    }

    fn track_by_id(&self, id: TrackId) -> Result<Option<Arc<Track>>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, title, artist, album, album_id, duration_ms, content_ref, favorite
             FROM tracks WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::row_to_track)?;
        match rows.next() {
            Some(row) => Ok(Some(Arc::new(row?))),
            None => Ok(None),
        }
    }

    fn playlist_by_id(&self, id: i64) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM playlists WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        let Some(name) = name else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT track_id FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| row.get::<_, i64>(0))?;
        let mut track_ids = Vec::new();
        for row in rows {
            track_ids.push(row?);
        }
        Ok(Some(Playlist {
            id,
            name,
            track_ids,
        }))
    }

    fn update_playlist(&self, playlist: &Playlist) -> Result<()> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "INSERT INTO playlists (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![playlist.id, playlist.name],
        )?;
        conn.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1",
            params![playlist.id],
        )?;
        let mut stmt = conn.prepare(
            "INSERT INTO playlist_tracks (playlist_id, track_id, position) VALUES (?1, ?2, ?3)",
        )?;
        for (position, track_id) in playlist.track_ids.iter().enumerate() {
            stmt.execute(params![playlist.id, track_id, position as i64])?;
        }
        Ok(())
    }
}

/// Fixed in-memory catalog for tests.
pub struct InMemoryCatalog {
    tracks: Vec<Arc<Track>>,
    by_id: HashMap<TrackId, Arc<Track>>,
    playlists: Mutex<HashMap<i64, Playlist>>,
}

impl InMemoryCatalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        let tracks: Vec<Arc<Track>> = tracks.into_iter().map(Arc::new).collect();
        let by_id = tracks.iter().map(|t| (t.id, Arc::clone(t))).collect();
        Self {
            tracks,
            by_id,
            playlists: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_playlist(self, playlist: Playlist) -> Self {
        self.playlists
            .lock()
            .expect("playlist lock poisoned")
            .insert(playlist.id, playlist);
        self
    }
}

impl CatalogRepository for InMemoryCatalog {
    fn all_tracks(&self) -> Result<Vec<Arc<Track>>> {
        Ok(self.tracks.clone())
    }

    fn track_by_id(&self, id: TrackId) -> Result<Option<Arc<Track>>> {
        Ok(self.by_id.get(&id).cloned())
    }

    fn playlist_by_id(&self, id: i64) -> Result<Option<Playlist>> {
        Ok(self
            .playlists
            .lock()
            .expect("playlist lock poisoned")
            .get(&id)
            .cloned())
    }

    fn update_playlist(&self, playlist: &Playlist) -> Result<()> {
        self.playlists
            .lock()
            .expect("playlist lock poisoned")
            .insert(playlist.id, playlist.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track(id: TrackId, title: &str) -> Track {
        Track {
            id,
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_id: 1,
            duration_ms: 200_000,
            content_ref: format!("/music/{}.flac", id),
            is_favorite: false,
        }
    }

    #[test]
    fn test_insert_and_lookup_track() {
        let db = LibraryDb::open_in_memory().unwrap();
        db.insert_track(&sample_track(7, "Seven")).unwrap();

        let found = db.track_by_id(7).unwrap().unwrap();
        assert_eq!(found.title, "Seven");
        assert!(db.track_by_id(8).unwrap().is_none());
    }

    #[test]
    fn test_all_tracks_ordered_by_id() {
        let db = LibraryDb::open_in_memory().unwrap();
        db.insert_track(&sample_track(2, "B")).unwrap();
        db.insert_track(&sample_track(1, "A")).unwrap();

        let tracks = db.all_tracks().unwrap();
        let ids: Vec<TrackId> = tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_sort_order_comparator_and_parsing() {
        let mut a = sample_track(1, "Zebra");
        a.artist = "Ann".to_string();
        let mut b = sample_track(2, "Alpha");
        b.artist = "Bob".to_string();

        assert_eq!(
            SortOrder::Title.compare(&a, &b),
            std::cmp::Ordering::Greater
        );
        assert_eq!(SortOrder::Artist.compare(&a, &b), std::cmp::Ordering::Less);

        assert_eq!(SortOrder::from_str_or_title("artist"), SortOrder::Artist);
        assert_eq!(SortOrder::from_str_or_title("garbage"), SortOrder::Title);
        assert_eq!(SortOrder::Album.as_str(), "album");
    }

    #[test]
    fn test_playlist_round_trip_preserves_order() {
        let db = LibraryDb::open_in_memory().unwrap();
        for id in 1..=3 {
            db.insert_track(&sample_track(id, "t")).unwrap();
        }
        let playlist = Playlist {
            id: 10,
            name: "Morning".to_string(),
            track_ids: vec![3, 1, 2],
        };
        db.update_playlist(&playlist).unwrap();

        let loaded = db.playlist_by_id(10).unwrap().unwrap();
        assert_eq!(loaded, playlist);
        assert!(db.playlist_by_id(11).unwrap().is_none());
    }
}
