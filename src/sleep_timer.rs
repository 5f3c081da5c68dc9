//! Sleep timer: pauses playback after a configured delay.
//!
//! Arming is last-writer-wins; each arm bumps a generation counter and the
//! expiry task only fires if its generation is still current, so a cancel
//! or re-arm silently defuses every older timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::runtime::Handle;

use crate::controller::CommandSender;
use crate::protocol::Command;

/// Longest accepted delay (2 hours); longer requests are clamped.
pub const MAX_DURATION: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Clone)]
pub struct SleepTimer {
    commands: CommandSender,
    runtime: Handle,
    generation: Arc<AtomicU64>,
    armed_until: Arc<Mutex<Option<Instant>>>,
}

impl SleepTimer {
    pub fn new(commands: CommandSender, runtime: Handle) -> Self {
        Self {
            commands,
            runtime,
            generation: Arc::new(AtomicU64::new(0)),
            armed_until: Arc::new(Mutex::new(None)),
        }
    }

    /// Arms the timer, replacing any previously armed one. A zero duration
    /// cancels instead.
    pub fn arm(&self, duration: Duration) {
        if duration.is_zero() {
            self.cancel();
            return;
        }
        let duration = if duration > MAX_DURATION {
            warn!(
                "sleep timer: clamping requested delay to {} seconds",
                MAX_DURATION.as_secs()
            );
            MAX_DURATION
        } else {
            duration
        };

        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_armed_until(Some(Instant::now() + duration));
        info!("sleep timer: armed for {} seconds", duration.as_secs());

        let commands = self.commands.clone();
        let generation = Arc::clone(&self.generation);
        let armed_until = Arc::clone(&self.armed_until);
        self.runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            if generation.load(Ordering::SeqCst) != my_generation {
                // Cancelled or replaced while we slept.
                debug!("sleep timer: stale expiry ignored");
                return;
            }
            match armed_until.lock() {
                Ok(mut state) => *state = None,
                Err(poisoned) => *poisoned.into_inner() = None,
            }
            info!("sleep timer: expired, pausing playback");
            commands.submit(Command::Pause);
        });
    }

    /// Disarms the timer; safe to call when nothing is armed.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_armed = self.armed_until().is_some();
        self.set_armed_until(None);
        if was_armed {
            info!("sleep timer: cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed_until().is_some()
    }

    /// Time left until the timer fires, or `None` when disarmed.
    pub fn remaining(&self) -> Option<Duration> {
        self.armed_until()
            .map(|end| end.saturating_duration_since(Instant::now()))
    }

    fn armed_until(&self) -> Option<Instant> {
        match self.armed_until.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_armed_until(&self, value: Option<Instant>) {
        match self.armed_until.lock() {
            Ok(mut state) => *state = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[tokio::test]
    async fn test_expiry_submits_pause() {
        let (commands, mut rx) = CommandSender::channel(8);
        let timer = SleepTimer::new(commands, Handle::current());

        timer.arm(Duration::from_millis(40));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(rx.try_recv(), Ok(Command::Pause));
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_cancel_before_expiry_fires_nothing() {
        let (commands, mut rx) = CommandSender::channel(8);
        let timer = SleepTimer::new(commands, Handle::current());

        timer.arm(Duration::from_millis(60));
        tokio::time::sleep(Duration::from_millis(10)).await;
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous_timer() {
        let (commands, mut rx) = CommandSender::channel(8);
        let timer = SleepTimer::new(commands, Handle::current());

        timer.arm(Duration::from_millis(40));
        timer.arm(Duration::from_millis(400));

        // The first deadline passes without firing; only the second is live.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(timer.is_armed());
    }

    #[tokio::test]
    async fn test_zero_duration_cancels() {
        let (commands, mut rx) = CommandSender::channel(8);
        let timer = SleepTimer::new(commands, Handle::current());

        timer.arm(Duration::from_millis(50));
        timer.arm(Duration::ZERO);
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_cancel_when_disarmed_is_a_noop() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let (commands, _rx) = CommandSender::channel(8);
        let timer = SleepTimer::new(commands, runtime.handle().clone());
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_armed());
        assert!(timer.remaining().is_none());
    }
}
