//! Notification synchronizer: mirrors playback state onto a host
//! notification surface.
//!
//! Renders are throttled through a rate limiter with trailing-edge
//! coalescing: bursts of snapshots collapse into one deferred render that
//! always carries the final state. Duplicate snapshots (same sequence
//! number) never reach the host twice.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{PlaybackSnapshot, PlaybackStatus};

/// Stable identity of the playback notification; reusing it makes renders
/// update in place instead of stacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationHandle(pub Uuid);

/// What the host is asked to display.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationContent {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Active playback pins the notification; the user cannot swipe it away.
    pub dismissible: bool,
}

impl NotificationContent {
    fn from_snapshot(snapshot: &PlaybackSnapshot) -> Option<Self> {
        let track = snapshot.track.as_ref()?;
        Some(Self {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            is_playing: snapshot.is_playing(),
            position_ms: snapshot.position_ms,
            duration_ms: track.duration_ms,
            dismissible: false,
        })
    }
}

/// Host-side notification surface. Implementations must tolerate repeated
/// cancels and renders with an unchanged handle.
pub trait NotificationHost: Send {
    fn render(&mut self, handle: NotificationHandle, content: &NotificationContent) -> Result<()>;
    fn cancel(&mut self, handle: NotificationHandle) -> Result<()>;
}

/// Keeps the process alive in the host's eyes while playback is active.
pub trait ForegroundServiceHost: Send {
    fn enter_foreground(&mut self, handle: NotificationHandle) -> Result<()>;
    fn leave_foreground(&mut self) -> Result<()>;
}

/// Desktop stand-in host; renders to the log instead of a system tray.
pub struct LogNotificationHost;

impl NotificationHost for LogNotificationHost {
    fn render(&mut self, handle: NotificationHandle, content: &NotificationContent) -> Result<()> {
        info!(
            "notification {}: {} - {} [{}] {}s/{}s",
            handle.0,
            content.artist,
            content.title,
            if content.is_playing { "playing" } else { "paused" },
            content.position_ms / 1_000,
            content.duration_ms / 1_000,
        );
        Ok(())
    }

    fn cancel(&mut self, handle: NotificationHandle) -> Result<()> {
        info!("notification {}: cleared", handle.0);
        Ok(())
    }
}

/// No-op foreground host for platforms without a service lifecycle.
pub struct NullForegroundHost;

impl ForegroundServiceHost for NullForegroundHost {
    fn enter_foreground(&mut self, _handle: NotificationHandle) -> Result<()> {
        Ok(())
    }

    fn leave_foreground(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct NotificationSynchronizer {
    updates: Receiver<PlaybackSnapshot>,
    host: Box<dyn NotificationHost>,
    foreground: Box<dyn ForegroundServiceHost>,
    handle: NotificationHandle,
    render_limiter: RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    min_render_interval: Duration,
    /// Snapshot withheld by the limiter, flushed on the trailing edge.
    pending: Option<PlaybackSnapshot>,
    flush_at: Option<Instant>,
    last_rendered_seq: u64,
    notification_visible: bool,
    in_foreground: bool,
}

impl NotificationSynchronizer {
    pub fn new(
        updates: Receiver<PlaybackSnapshot>,
        host: Box<dyn NotificationHost>,
        foreground: Box<dyn ForegroundServiceHost>,
        min_render_interval: Duration,
    ) -> Self {
        let interval = min_render_interval.max(Duration::from_millis(1));
        Self {
            updates,
            host,
            foreground,
            handle: NotificationHandle(Uuid::new_v4()),
            render_limiter: RateLimiter::direct(
                Quota::with_period(interval)
                    .expect("valid limiter period")
                    .allow_burst(NonZeroU32::new(1).expect("non-zero limiter burst")),
            ),
            min_render_interval: interval,
            pending: None,
            flush_at: None,
            last_rendered_seq: 0,
            notification_visible: false,
            in_foreground: false,
        }
    }

    /// Event loop: applies snapshots as they arrive, and flushes the
    /// coalesced pending snapshot once the throttle window elapses.
    pub async fn run(mut self) {
        info!("NotificationSynchronizer: started");
        loop {
            let flush_at = self.flush_at;
            tokio::select! {
                received = self.updates.recv() => match received {
                    Ok(snapshot) => self.observe(snapshot),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "NotificationSynchronizer: snapshot bus lagged by {} messages",
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = async {
                    match flush_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        // No pending flush; park until a snapshot arrives.
                        None => std::future::pending::<()>().await,
                    }
                } => self.flush_pending(),
            }
        }
        // The controller is gone; take the surface down.
        self.teardown();
        info!("NotificationSynchronizer: stopped");
    }

    fn observe(&mut self, snapshot: PlaybackSnapshot) {
        if snapshot.seq <= self.last_rendered_seq {
            return;
        }

        if self.render_limiter.check().is_ok() {
            self.pending = None;
            self.flush_at = None;
            self.apply(&snapshot);
        } else {
            // Withhold, remembering only the newest state. The scheduled
            // flush keeps its deadline.
            if self.flush_at.is_none() {
                self.flush_at = Some(Instant::now() + self.min_render_interval);
            }
            self.pending = Some(snapshot);
        }
    }

    fn flush_pending(&mut self) {
        self.flush_at = None;
        if let Some(snapshot) = self.pending.take() {
            if snapshot.seq > self.last_rendered_seq {
                self.apply(&snapshot);
            }
        }
    }

    fn apply(&mut self, snapshot: &PlaybackSnapshot) {
        match snapshot.status {
            PlaybackStatus::Playing | PlaybackStatus::Paused => {
                let Some(content) = NotificationContent::from_snapshot(snapshot) else {
                    self.last_rendered_seq = snapshot.seq;
                    return;
                };
                if let Err(err) = self.host.render(self.handle, &content) {
                    // Host outages degrade the surface, never playback. The
                    // sequence number stays put so the snapshot is eligible
                    // again once the host recovers.
                    warn!("NotificationSynchronizer: render failed: {}", err);
                    return;
                }
                self.last_rendered_seq = snapshot.seq;
                self.notification_visible = true;
                if !self.in_foreground {
                    match self.foreground.enter_foreground(self.handle) {
                        Ok(()) => self.in_foreground = true,
                        Err(err) => {
                            warn!("NotificationSynchronizer: enter_foreground failed: {}", err)
                        }
                    }
                }
            }
            PlaybackStatus::Idle | PlaybackStatus::Stopped => {
                self.last_rendered_seq = snapshot.seq;
                self.teardown();
            }
        }
    }

    fn teardown(&mut self) {
        if self.notification_visible {
            if let Err(err) = self.host.cancel(self.handle) {
                warn!("NotificationSynchronizer: cancel failed: {}", err);
            }
            self.notification_visible = false;
        }
        if self.in_foreground {
            match self.foreground.leave_foreground() {
                Ok(()) => self.in_foreground = false,
                Err(err) => {
                    warn!("NotificationSynchronizer: leave_foreground failed: {}", err)
                }
            }
        }
        debug!("NotificationSynchronizer: surface torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RepeatMode, Track};
    use std::sync::{Arc as StdArc, Mutex};
    use tokio::sync::broadcast;

    #[derive(Debug, Clone, PartialEq)]
    enum HostCall {
        Render(NotificationContent),
        Cancel,
    }

    #[derive(Clone, Default)]
    struct RecordingHost {
        calls: StdArc<Mutex<Vec<HostCall>>>,
        fail_renders: StdArc<Mutex<bool>>,
    }

    impl RecordingHost {
        fn set_fail(&self, fail: bool) {
            *self.fail_renders.lock().unwrap() = fail;
        }

        fn calls(&self) -> Vec<HostCall> {
            self.calls.lock().unwrap().clone()
        }

        fn renders(&self) -> Vec<NotificationContent> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    HostCall::Render(content) => Some(content),
                    HostCall::Cancel => None,
                })
                .collect()
        }
    }

    impl NotificationHost for RecordingHost {
        fn render(
            &mut self,
            _handle: NotificationHandle,
            content: &NotificationContent,
        ) -> Result<()> {
            if *self.fail_renders.lock().unwrap() {
                return Err(crate::error::Error::HostUnavailable(
                    "render rejected".to_string(),
                ));
            }
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Render(content.clone()));
            Ok(())
        }

        fn cancel(&mut self, _handle: NotificationHandle) -> Result<()> {
            self.calls.lock().unwrap().push(HostCall::Cancel);
            Ok(())
        }
    }

    fn snapshot(seq: u64, status: PlaybackStatus, position_ms: u64) -> PlaybackSnapshot {
        let track = std::sync::Arc::new(Track {
            id: 1,
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_id: 1,
            duration_ms: 180_000,
            content_ref: "/music/1.flac".to_string(),
            is_favorite: false,
        });
        PlaybackSnapshot {
            status,
            track: Some(track),
            position_ms,
            volume: 0.75,
            muted: false,
            favorite: false,
            repeat_mode: RepeatMode::Off,
            seq,
        }
    }

    fn synchronizer_with(
        host: RecordingHost,
        interval: Duration,
    ) -> (NotificationSynchronizer, broadcast::Sender<PlaybackSnapshot>) {
        let (tx, rx) = broadcast::channel(64);
        let sync = NotificationSynchronizer::new(
            rx,
            Box::new(host),
            Box::new(NullForegroundHost),
            interval,
        );
        (sync, tx)
    }

    #[test]
    fn test_duplicate_seq_is_not_rendered_twice() {
        let host = RecordingHost::default();
        let (mut sync, _tx) = synchronizer_with(host.clone(), Duration::from_millis(1));

        sync.observe(snapshot(1, PlaybackStatus::Playing, 0));
        sync.observe(snapshot(1, PlaybackStatus::Playing, 0));
        sync.flush_pending();

        assert_eq!(host.renders().len(), 1);
    }

    #[test]
    fn test_stop_cancels_notification_once() {
        let host = RecordingHost::default();
        let (mut sync, _tx) = synchronizer_with(host.clone(), Duration::from_millis(1));

        sync.observe(snapshot(1, PlaybackStatus::Playing, 0));
        sync.observe(snapshot(2, PlaybackStatus::Stopped, 0));
        // Limiter withheld the stop; the trailing flush applies it.
        sync.flush_pending();
        sync.teardown();

        let cancels = host
            .calls()
            .iter()
            .filter(|c| **c == HostCall::Cancel)
            .count();
        assert_eq!(cancels, 1);
    }

    #[test]
    fn test_render_failure_degrades_without_marking_visible() {
        let host = RecordingHost::default();
        host.set_fail(true);
        let (mut sync, _tx) = synchronizer_with(host.clone(), Duration::from_millis(1));

        sync.observe(snapshot(1, PlaybackStatus::Playing, 0));
        assert!(!sync.notification_visible);

        // Stop after a failed render must not issue a cancel.
        sync.teardown();
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_failed_render_leaves_snapshot_eligible_for_retry() {
        let host = RecordingHost::default();
        host.set_fail(true);
        let (mut sync, _tx) = synchronizer_with(host.clone(), Duration::from_millis(1));

        sync.observe(snapshot(1, PlaybackStatus::Playing, 0));
        assert!(host.renders().is_empty());
        assert_eq!(sync.last_rendered_seq, 0);

        // Host recovers; a redelivery of the same sequence number must not
        // be discarded as already rendered.
        host.set_fail(false);
        sync.observe(snapshot(1, PlaybackStatus::Playing, 0));
        sync.flush_pending();

        assert_eq!(host.renders().len(), 1);
        assert_eq!(sync.last_rendered_seq, 1);
    }

    #[tokio::test]
    async fn test_rapid_updates_coalesce_into_one_trailing_render() {
        let host = RecordingHost::default();
        let (sync, tx) = synchronizer_with(host.clone(), Duration::from_millis(80));
        let task = tokio::spawn(sync.run());

        // First snapshot passes the limiter; the two rapid seeks behind it
        // must collapse into a single trailing render with the final state.
        tx.send(snapshot(1, PlaybackStatus::Playing, 0)).unwrap();
        tx.send(snapshot(2, PlaybackStatus::Playing, 10_000)).unwrap();
        tx.send(snapshot(3, PlaybackStatus::Playing, 20_000)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(tx);
        task.await.unwrap();

        let renders = host.renders();
        assert_eq!(renders.len(), 2);
        assert_eq!(renders[0].position_ms, 0);
        assert_eq!(renders[1].position_ms, 20_000);
    }
}
