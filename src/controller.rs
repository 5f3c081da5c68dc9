//! Playback controller: single authoritative owner of playback state.
//!
//! All commands funnel through one bounded channel and are applied strictly
//! in arrival order, which removes lost-update races between the UI, the
//! media-button callback, and the sleep timer. Every accepted transition
//! bumps the snapshot sequence number and publishes the post-transition
//! state on the update bus.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use crate::catalog::CatalogRepository;
use crate::error::{Error, Result};
use crate::protocol::{
    Command, PlayTarget, PlaybackSnapshot, PlaybackStatus, RepeatMode, Track, TrackId,
};
use crate::queue::Queue;
use crate::store::{SettingValue, StoreHandle, KEY_FAVORITE_PREFIX, KEY_REPEAT_MODE};

/// Capacity of the outbound snapshot broadcast bus.
const UPDATE_BUS_CAPACITY: usize = 256;

/// Non-blocking submission side of the command channel. Cloned by every
/// producer; a full channel drops the command with a warning rather than
/// blocking the producer.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Detached sender+receiver pair for exercising command producers.
    #[cfg(test)]
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn submit(&self, command: Command) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                warn!("command channel full, dropping {:?}", command);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("controller is gone, dropping command");
            }
        }
    }
}

/// Initial values the composition root reads from the settings store before
/// the controller starts; the controller itself never blocks on loads.
#[derive(Debug, Clone)]
pub struct ControllerSeed {
    pub volume: f32,
    pub repeat_mode: RepeatMode,
    pub last_played: Option<(TrackId, u64)>,
    pub persist_repeat_mode: bool,
    pub restore_last_position: bool,
}

impl Default for ControllerSeed {
    fn default() -> Self {
        Self {
            volume: 0.75,
            repeat_mode: RepeatMode::Off,
            last_played: None,
            persist_repeat_mode: false,
            restore_last_position: true,
        }
    }
}

/// Cloneable access point handed to all consumers: command submission,
/// the snapshot change stream, and the latest-value accessor.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: CommandSender,
    updates: broadcast::Sender<PlaybackSnapshot>,
    latest: watch::Receiver<PlaybackSnapshot>,
}

impl ControllerHandle {
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn submit(&self, command: Command) {
        self.commands.submit(command);
    }

    /// Change-notification stream of post-transition snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackSnapshot> {
        self.updates.subscribe()
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> PlaybackSnapshot {
        self.latest.borrow().clone()
    }

    /// Latest-value receiver for observers that only want current state.
    pub fn watch(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.latest.clone()
    }
}

pub struct PlaybackController {
    commands: mpsc::Receiver<Command>,
    updates: broadcast::Sender<PlaybackSnapshot>,
    latest: watch::Sender<PlaybackSnapshot>,
    catalog: Arc<dyn CatalogRepository>,
    store: StoreHandle,
    queue: Queue,
    status: PlaybackStatus,
    position_ms: u64,
    volume: f32,
    muted: bool,
    /// Session-local favorite toggles; the catalog view stays read-only.
    favorite_overrides: HashMap<TrackId, bool>,
    last_played: Option<(TrackId, u64)>,
    seq: u64,
    persist_repeat_mode: bool,
    restore_last_position: bool,
}

impl PlaybackController {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        store: StoreHandle,
        seed: ControllerSeed,
        channel_capacity: usize,
    ) -> (Self, ControllerHandle) {
        let (command_tx, command_rx) = mpsc::channel(channel_capacity.max(1));
        let (update_tx, _) = broadcast::channel(UPDATE_BUS_CAPACITY);

        let mut queue = Queue::new();
        queue.set_repeat_mode(seed.repeat_mode);

        let controller = Self {
            commands: command_rx,
            updates: update_tx.clone(),
            latest: watch::channel(PlaybackSnapshot {
                status: PlaybackStatus::Idle,
                track: None,
                position_ms: 0,
                volume: seed.volume.clamp(0.0, 1.0),
                muted: false,
                favorite: false,
                repeat_mode: seed.repeat_mode,
                seq: 0,
            })
            .0,
            catalog,
            store,
            queue,
            status: PlaybackStatus::Idle,
            position_ms: 0,
            volume: seed.volume.clamp(0.0, 1.0),
            muted: false,
            favorite_overrides: HashMap::new(),
            last_played: seed.last_played,
            seq: 0,
            persist_repeat_mode: seed.persist_repeat_mode,
            restore_last_position: seed.restore_last_position,
        };

        let latest_rx = controller.latest.subscribe();
        let handle = ControllerHandle {
            commands: CommandSender { tx: command_tx },
            updates: update_tx,
            latest: latest_rx,
        };
        (controller, handle)
    }

    /// Serialized command loop. Runs until `Command::Shutdown` arrives or
    /// every sender is dropped.
    pub async fn run(mut self) {
        info!("playback controller: started");
        while let Some(command) = self.commands.recv().await {
            if command == Command::Shutdown {
                break;
            }
            self.handle(command);
        }
        self.record_last_played();
        info!("playback controller: stopped");
    }

    fn handle(&mut self, command: Command) {
        match self.apply(&command) {
            Ok(true) => self.publish(),
            Ok(false) => {}
            Err(Error::NoActiveTrack)
                if matches!(command, Command::Pause | Command::Resume) =>
            {
                // Safety commands degrade to silent no-ops without a track.
                debug!("{:?} ignored: no active track", command);
            }
            Err(e) => warn!("command {:?} rejected: {}", command, e),
        }
    }

    /// Applies one command against queue/state. `Ok(true)` means an
    /// accepted transition that must be published; `Ok(false)` means the
    /// command was accepted but changed nothing.
    fn apply(&mut self, command: &Command) -> Result<bool> {
        match command {
            Command::Play(target) => self.apply_play(target),
            Command::Resume => match self.status {
                PlaybackStatus::Paused => {
                    self.status = PlaybackStatus::Playing;
                    Ok(true)
                }
                PlaybackStatus::Playing => Ok(false),
                PlaybackStatus::Idle | PlaybackStatus::Stopped => Err(Error::NoActiveTrack),
            },
            Command::Pause => match self.status {
                PlaybackStatus::Playing => {
                    self.status = PlaybackStatus::Paused;
                    self.record_last_played();
                    Ok(true)
                }
                PlaybackStatus::Paused => Ok(false),
                PlaybackStatus::Idle | PlaybackStatus::Stopped => Err(Error::NoActiveTrack),
            },
            Command::Next | Command::TrackFinished => self.apply_step(true),
            Command::Previous => self.apply_step(false),
            Command::Seek(position_ms) => {
                if !matches!(
                    self.status,
                    PlaybackStatus::Playing | PlaybackStatus::Paused
                ) || self.queue.is_empty()
                {
                    return Err(Error::NoActiveTrack);
                }
                let duration = self.current_duration_ms();
                let clamped = (*position_ms).min(duration);
                if clamped == self.position_ms {
                    return Ok(false);
                }
                self.position_ms = clamped;
                Ok(true)
            }
            Command::SetRepeatMode(mode) => {
                if self.queue.repeat_mode() == *mode {
                    return Ok(false);
                }
                self.queue.set_repeat_mode(*mode);
                if self.persist_repeat_mode {
                    self.store
                        .save_setting(KEY_REPEAT_MODE, SettingValue::Text(mode.as_str().into()));
                }
                Ok(true)
            }
            Command::SetFavorite(value) => {
                let Some(track) = self.queue.current_track() else {
                    debug!("SetFavorite ignored: no active track");
                    return Ok(false);
                };
                if self.favorite_of(&track) == *value {
                    // Unchanged value: no transition, no persistence write.
                    return Ok(false);
                }
                self.favorite_overrides.insert(track.id, *value);
                self.store.save_setting(
                    format!("{}{}", KEY_FAVORITE_PREFIX, track.id),
                    SettingValue::Bool(*value),
                );
                Ok(true)
            }
            Command::SetVolume(level) => {
                let clamped = level.clamp(0.0, 1.0);
                if (clamped - self.volume).abs() < f32::EPSILON {
                    return Ok(false);
                }
                self.volume = clamped;
                Ok(true)
            }
            Command::SetMuted(muted) => {
                if self.muted == *muted {
                    return Ok(false);
                }
                self.muted = *muted;
                Ok(true)
            }
            Command::Reorder { from, to } => {
                self.queue.reorder(*from, *to)?;
                if from != to {
                    let order: Vec<TrackId> =
                        self.queue.tracks().iter().map(|t| t.id).collect();
                    debug!("queue reordered: {:?}", order);
                    return Ok(true);
                }
                Ok(false)
            }
            Command::PositionTick(position_ms) => {
                if self.status != PlaybackStatus::Playing || self.queue.is_empty() {
                    return Ok(false);
                }
                let clamped = (*position_ms).min(self.current_duration_ms());
                if clamped == self.position_ms {
                    return Ok(false);
                }
                self.position_ms = clamped;
                Ok(true)
            }
            Command::Stop => {
                if self.status == PlaybackStatus::Stopped && self.queue.is_empty() {
                    return Ok(false);
                }
                self.record_last_played();
                self.queue.clear();
                self.position_ms = 0;
                self.status = PlaybackStatus::Stopped;
                Ok(true)
            }
            Command::Shutdown => Ok(false),
        }
    }

    fn apply_play(&mut self, target: &PlayTarget) -> Result<bool> {
        let (tracks, start_index) = self.materialize(target)?;
        if tracks.is_empty() {
            info!("play: nothing to play, selection is empty");
            return Ok(false);
        }
        self.queue.load(tracks, start_index)?;

        let track = self
            .queue
            .current_track()
            .expect("non-empty queue has a current track");
        self.position_ms = self.restored_position_for(&track);
        self.status = PlaybackStatus::Playing;
        self.record_last_played();
        Ok(true)
    }

    /// Next/previous delegation. A boundary signal with repeat off stops
    /// playback at position zero; the cursor stays on the boundary track.
    fn apply_step(&mut self, forward: bool) -> Result<bool> {
        if self.queue.is_empty() {
            return Ok(false);
        }
        let step = if forward {
            self.queue.advance()
        } else {
            self.queue.retreat()
        };
        match step {
            Some(_) => {
                self.position_ms = 0;
                self.record_last_played();
                Ok(true)
            }
            None => {
                self.position_ms = 0;
                self.status = PlaybackStatus::Stopped;
                self.record_last_played();
                Ok(true)
            }
        }
    }

    fn materialize(&self, target: &PlayTarget) -> Result<(Vec<Arc<Track>>, usize)> {
        match target {
            PlayTarget::Track(id) => {
                let tracks = self.catalog.all_tracks()?;
                let index = tracks
                    .iter()
                    .position(|t| t.id == *id)
                    .ok_or(Error::TrackNotFound(*id))?;
                Ok((tracks, index))
            }
            PlayTarget::AllTracks { start_index } => {
                let tracks = self.catalog.all_tracks()?;
                if tracks.is_empty() {
                    return Ok((tracks, 0));
                }
                if *start_index >= tracks.len() {
                    return Err(Error::InvalidIndex {
                        index: *start_index,
                        len: tracks.len(),
                    });
                }
                Ok((tracks, *start_index))
            }
            PlayTarget::Playlist { id, start_index } => {
                let playlist = self
                    .catalog
                    .playlist_by_id(*id)?
                    .ok_or(Error::PlaylistNotFound(*id))?;
                let mut tracks = Vec::with_capacity(playlist.track_ids.len());
                for track_id in &playlist.track_ids {
                    match self.catalog.track_by_id(*track_id)? {
                        Some(track) => tracks.push(track),
                        None => {
                            warn!(
                                "playlist {}: track {} missing from catalog, skipping",
                                id, track_id
                            );
                        }
                    }
                }
                if tracks.is_empty() {
                    return Ok((tracks, 0));
                }
                if *start_index >= tracks.len() {
                    return Err(Error::InvalidIndex {
                        index: *start_index,
                        len: tracks.len(),
                    });
                }
                Ok((tracks, *start_index))
            }
        }
    }

    fn restored_position_for(&self, track: &Track) -> u64 {
        if !self.restore_last_position {
            return 0;
        }
        match self.last_played {
            Some((id, position_ms)) if id == track.id => position_ms.min(track.duration_ms),
            _ => 0,
        }
    }

    fn favorite_of(&self, track: &Track) -> bool {
        self.favorite_overrides
            .get(&track.id)
            .copied()
            .unwrap_or(track.is_favorite)
    }

    fn current_duration_ms(&self) -> u64 {
        self.queue
            .current_track()
            .map(|t| t.duration_ms)
            .unwrap_or(0)
    }

    fn record_last_played(&mut self) {
        if let Some(track) = self.queue.current_track() {
            self.store.save_last_played(track.id, self.position_ms);
            self.last_played = Some((track.id, self.position_ms));
        }
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        let track = self.queue.current_track();
        let favorite = track.as_deref().map(|t| self.favorite_of(t)).unwrap_or(false);
        PlaybackSnapshot {
            status: self.status,
            track,
            position_ms: self.position_ms,
            volume: self.volume,
            muted: self.muted,
            favorite,
            repeat_mode: self.queue.repeat_mode(),
            seq: self.seq,
        }
    }

    fn publish(&mut self) {
        self.seq += 1;
        let snapshot = self.snapshot();
        // No receivers is fine; the watch side always keeps the latest.
        let _ = self.updates.send(snapshot.clone());
        let _ = self.latest.send(snapshot);
    }
}
