//! Error types for the playback orchestration core.

use thiserror::Error;

use crate::protocol::TrackId;

/// Errors surfaced by the controller and its gateways.
///
/// None of these are fatal: the controller logs, leaves state unchanged,
/// and keeps consuming commands.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested track id is absent from the active catalog snapshot.
    #[error("track {0} not found in catalog")]
    TrackNotFound(TrackId),

    /// Requested playlist id is absent from the catalog.
    #[error("playlist {0} not found")]
    PlaylistNotFound(i64),

    /// A command required a loaded track but the queue is empty.
    #[error("no active track")]
    NoActiveTrack,

    /// Malformed queue index in a load/reorder request.
    #[error("invalid index {index} for queue of length {len}")]
    InvalidIndex { index: usize, len: usize },

    /// A settings/last-played write failed (retried once, then dropped).
    #[error("persistence write failed: {0}")]
    PersistenceWriteFailed(String),

    /// Notification or media-session host is not reachable.
    #[error("host unavailable: {0}")]
    HostUnavailable(String),

    /// Configuration file loading errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or query errors.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File I/O errors.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the trackline Error.
pub type Result<T> = std::result::Result<T, Error>;
