//! OS media-session bridge (MPRIS/SMTC/Now Playing).
//!
//! Connects the snapshot bus to the platform media controls via `souvlaki`.
//! Hardware/OS button events are translated into controller commands; state
//! going the other way is deduplicated so the OS surface is only touched on
//! real changes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig, SeekDirection,
};
use tokio::sync::broadcast::Receiver;

use crate::controller::CommandSender;
use crate::error::{Error, Result};
use crate::protocol::{Command, PlaybackSnapshot, PlaybackStatus, TrackId};

const MEDIA_SESSION_DISPLAY_NAME: &str = "Trackline";
const MEDIA_SESSION_DBUS_NAME: &str = "trackline";
const SEEK_STEP_MS: u64 = 10_000;

/// Last state known to the attached event callback. The callback runs on a
/// platform thread, so it reads this shared cell rather than the bridge.
#[derive(Debug, Clone, Copy, Default)]
struct ControlState {
    is_playing: bool,
    elapsed_ms: u64,
    total_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackPublishState {
    Stopped,
    Paused,
    Playing,
}

#[derive(Debug, Clone, PartialEq)]
struct PublishedMetadata {
    track_id: Option<TrackId>,
    total_ms: u64,
}

/// Handles OS media control events and mirrors playback state outward.
pub struct MediaSessionBridge {
    updates: Receiver<PlaybackSnapshot>,
    control_state: Arc<Mutex<ControlState>>,
    controls: Option<MediaControls>,
    last_seq: u64,
    last_published_playback: Option<PlaybackPublishState>,
    last_published_metadata: Option<PublishedMetadata>,
}

impl MediaSessionBridge {
    /// Creates the bridge and attempts to initialize the platform backend.
    /// Backend failures degrade to a no-op bridge; commands keep flowing
    /// from the other producers.
    pub fn new(updates: Receiver<PlaybackSnapshot>, commands: CommandSender) -> Self {
        let control_state = Arc::new(Mutex::new(ControlState::default()));
        let controls = match Self::create_controls(commands, Arc::clone(&control_state)) {
            Ok(controls) => Some(controls),
            Err(err) => {
                warn!("MediaSessionBridge: media controls unavailable: {}", err);
                None
            }
        };

        Self {
            updates,
            control_state,
            controls,
            last_seq: 0,
            last_published_playback: None,
            last_published_metadata: None,
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn create_controls(
        commands: CommandSender,
        control_state: Arc<Mutex<ControlState>>,
    ) -> Result<MediaControls> {
        let mut controls = MediaControls::new(PlatformConfig {
            display_name: MEDIA_SESSION_DISPLAY_NAME,
            dbus_name: MEDIA_SESSION_DBUS_NAME,
            hwnd: None,
        })
        .map_err(|err| {
            Error::HostUnavailable(format!("create media controls backend: {}", err))
        })?;

        controls
            .attach(move |event| {
                let snapshot = match control_state.lock() {
                    Ok(state) => *state,
                    Err(poisoned) => *poisoned.into_inner(),
                };

                if let Some(command) = Self::map_control_event(event, snapshot) {
                    commands.submit(command);
                }
            })
            .map_err(|err| {
                Error::HostUnavailable(format!("attach media controls handler: {}", err))
            })?;

        Ok(controls)
    }

    #[cfg(target_os = "windows")]
    fn create_controls(
        _commands: CommandSender,
        _control_state: Arc<Mutex<ControlState>>,
    ) -> Result<MediaControls> {
        // Souvlaki requires an HWND on Windows, which the console frontend
        // does not have.
        Err(Error::HostUnavailable(
            "Windows media controls require an HWND".to_string(),
        ))
    }

    fn map_control_event(event: MediaControlEvent, state: ControlState) -> Option<Command> {
        match event {
            // The OS "play" button means resume; starting fresh playback
            // stays a frontend decision.
            MediaControlEvent::Play => Some(Command::Resume),
            MediaControlEvent::Pause => Some(Command::Pause),
            MediaControlEvent::Toggle => {
                if state.is_playing {
                    Some(Command::Pause)
                } else {
                    Some(Command::Resume)
                }
            }
            MediaControlEvent::Next => Some(Command::Next),
            MediaControlEvent::Previous => Some(Command::Previous),
            MediaControlEvent::Stop => Some(Command::Stop),
            MediaControlEvent::SetPosition(position) => {
                Self::seek_command_from_target_ms(state, position.0.as_millis() as u64)
            }
            MediaControlEvent::SeekBy(direction, delta) => {
                let delta_ms = delta.as_millis() as u64;
                let target_ms = match direction {
                    SeekDirection::Forward => state.elapsed_ms.saturating_add(delta_ms),
                    SeekDirection::Backward => state.elapsed_ms.saturating_sub(delta_ms),
                };
                Self::seek_command_from_target_ms(state, target_ms)
            }
            MediaControlEvent::Seek(direction) => {
                let target_ms = match direction {
                    SeekDirection::Forward => state.elapsed_ms.saturating_add(SEEK_STEP_MS),
                    SeekDirection::Backward => state.elapsed_ms.saturating_sub(SEEK_STEP_MS),
                };
                Self::seek_command_from_target_ms(state, target_ms)
            }
            MediaControlEvent::SetVolume(level) => Some(Command::SetVolume(level as f32)),
            MediaControlEvent::OpenUri(_)
            | MediaControlEvent::Raise
            | MediaControlEvent::Quit => None,
        }
    }

    fn seek_command_from_target_ms(state: ControlState, target_ms: u64) -> Option<Command> {
        if state.total_ms == 0 {
            return None;
        }
        Some(Command::Seek(target_ms.min(state.total_ms)))
    }

    fn update_control_state(&self, snapshot: &PlaybackSnapshot) {
        let next = ControlState {
            is_playing: snapshot.is_playing(),
            elapsed_ms: snapshot.position_ms,
            total_ms: snapshot.duration_ms(),
        };
        match self.control_state.lock() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    fn desired_playback(snapshot: &PlaybackSnapshot) -> PlaybackPublishState {
        match snapshot.status {
            PlaybackStatus::Playing => PlaybackPublishState::Playing,
            PlaybackStatus::Paused => PlaybackPublishState::Paused,
            PlaybackStatus::Idle | PlaybackStatus::Stopped => PlaybackPublishState::Stopped,
        }
    }

    fn publish_playback_if_needed(&mut self, snapshot: &PlaybackSnapshot) {
        let desired = Self::desired_playback(snapshot);
        if self.last_published_playback == Some(desired) {
            return;
        }

        let Some(controls) = self.controls.as_mut() else {
            return;
        };

        let playback = match desired {
            PlaybackPublishState::Stopped => MediaPlayback::Stopped,
            PlaybackPublishState::Paused => MediaPlayback::Paused { progress: None },
            PlaybackPublishState::Playing => MediaPlayback::Playing { progress: None },
        };

        if let Err(err) = controls.set_playback(playback) {
            warn!(
                "MediaSessionBridge: failed to publish playback state {:?}: {}",
                desired, err
            );
            return;
        }
        self.last_published_playback = Some(desired);
    }

    fn publish_metadata_if_needed(&mut self, snapshot: &PlaybackSnapshot) {
        let desired = PublishedMetadata {
            track_id: snapshot.track.as_ref().map(|t| t.id),
            total_ms: snapshot.duration_ms(),
        };
        if self.last_published_metadata.as_ref() == Some(&desired) {
            return;
        }

        let Some(controls) = self.controls.as_mut() else {
            return;
        };

        let publish_result = if let Some(track) = snapshot.track.as_ref() {
            let duration = (desired.total_ms > 0).then(|| Duration::from_millis(desired.total_ms));
            controls.set_metadata(MediaMetadata {
                title: Some(track.title.as_str()),
                artist: Some(track.artist.as_str()),
                album: Some(track.album.as_str()),
                cover_url: None,
                duration,
            })
        } else {
            controls.set_metadata(MediaMetadata::default())
        };

        if let Err(err) = publish_result {
            warn!("MediaSessionBridge: failed to publish metadata: {}", err);
            return;
        }
        self.last_published_metadata = Some(desired);
    }

    fn handle_snapshot(&mut self, snapshot: PlaybackSnapshot) {
        // Lagged redelivery or reordering: never step backwards.
        if snapshot.seq <= self.last_seq {
            return;
        }
        self.last_seq = snapshot.seq;

        self.update_control_state(&snapshot);
        // Metadata first so the playback state refers to the right track.
        self.publish_metadata_if_needed(&snapshot);
        self.publish_playback_if_needed(&snapshot);
    }

    /// Starts the blocking bridge loop; runs until the snapshot bus closes.
    pub fn run(&mut self) {
        info!("MediaSessionBridge: started");
        loop {
            match self.updates.blocking_recv() {
                Ok(snapshot) => self.handle_snapshot(snapshot),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("MediaSessionBridge: snapshot bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("MediaSessionBridge: stopped");
    }
}
