//! Shared payload types exchanged between the controller and its adapters.
//!
//! Commands flow inward through one bounded channel; state snapshots flow
//! outward on a broadcast bus. Everything here is cheap to clone.

use std::sync::Arc;

/// Stable track identifier assigned by the library catalog.
pub type TrackId = i64;

/// Repeat behavior applied when navigating beyond a queue boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Off, // Stop after reaching the end of the queue
    All, // Wrap around to the other end of the queue
    One, // Restart the current track
}

impl RepeatMode {
    /// Stable name used for settings persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "all",
            RepeatMode::One => "one",
        }
    }

    /// Parses a persisted repeat-mode name; unknown values map to `Off`.
    pub fn from_str_or_off(value: &str) -> Self {
        match value {
            "all" => RepeatMode::All,
            "one" => RepeatMode::One,
            _ => RepeatMode::Off,
        }
    }
}

/// Immutable descriptor of one playable audio item.
///
/// Owned by the catalog; the queue and snapshots hold shared references.
/// The favorite flag here is the catalog's view at load time; live toggles
/// go through the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: i64,
    pub duration_ms: u64,
    /// Opaque handle to the playable content (file path, URI, ...).
    pub content_ref: String,
    pub is_favorite: bool,
}

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// No track has been loaded this session.
    Idle,
    Playing,
    Paused,
    /// A stop was issued; the queue is cleared and position reset.
    Stopped,
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Idle => write!(f, "idle"),
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Paused => write!(f, "paused"),
            PlaybackStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Post-transition state published after every accepted command.
///
/// `seq` increases monotonically; observers must drop snapshots whose
/// sequence number is behind the last one they published.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub track: Option<Arc<Track>>,
    pub position_ms: u64,
    pub volume: f32,
    pub muted: bool,
    /// Live favorite flag for the current track (session overrides applied).
    pub favorite: bool,
    pub repeat_mode: RepeatMode,
    pub seq: u64,
}

impl PlaybackSnapshot {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn duration_ms(&self) -> u64 {
        self.track.as_ref().map(|t| t.duration_ms).unwrap_or(0)
    }
}

/// What to materialize the queue from when playback is initiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayTarget {
    /// All catalog tracks, cursor on the given track.
    Track(TrackId),
    /// All catalog tracks, cursor on the given index.
    AllTracks { start_index: usize },
    /// A persisted playlist, cursor on the given index.
    Playlist { id: i64, start_index: usize },
}

/// Commands accepted by the controller's serialized command loop.
///
/// All three producers (UI, media buttons, sleep timer) submit these; the
/// controller applies them strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(PlayTarget),
    Resume,
    Pause,
    Stop,
    Next,
    Previous,
    /// Absolute seek in milliseconds; clamped to the track duration.
    Seek(u64),
    SetRepeatMode(RepeatMode),
    /// Favorite flag for the current track.
    SetFavorite(bool),
    /// Volume level in [0.0, 1.0].
    SetVolume(f32),
    SetMuted(bool),
    /// Move one queue element; the playing track identity is preserved.
    Reorder { from: usize, to: usize },
    /// Playback progress reported by the audio sink.
    PositionTick(u64),
    /// The audio sink reached the end of the current track.
    TrackFinished,
    /// Ends the command loop; issued by the composition root on exit.
    Shutdown,
}
