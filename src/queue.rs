//! Live playback queue: an ordered sequence of shared track references
//! with a current-index cursor and repeat-mode wraparound policy.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::{RepeatMode, Track, TrackId};

/// The in-memory sequence of tracks currently eligible for playback
/// advancement. Tracks are owned by the catalog; the queue holds read-only
/// references. An empty queue has no cursor and treats navigation as a no-op.
pub struct Queue {
    tracks: Vec<Arc<Track>>,
    current_index: Option<usize>,
    repeat_mode: RepeatMode,
}

impl Queue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            current_index: None,
            repeat_mode: RepeatMode::Off,
        }
    }

    /// Replaces queue contents. Empty input yields an empty queue; for
    /// non-empty input `start_index` must be in bounds.
    pub fn load(&mut self, tracks: Vec<Arc<Track>>, start_index: usize) -> Result<()> {
        if tracks.is_empty() {
            self.tracks.clear();
            self.current_index = None;
            return Ok(());
        }
        if start_index >= tracks.len() {
            return Err(Error::InvalidIndex {
                index: start_index,
                len: tracks.len(),
            });
        }
        self.tracks = tracks;
        self.current_index = Some(start_index);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current_index = None;
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<Arc<Track>> {
        self.current_index.map(|i| Arc::clone(&self.tracks[i]))
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    /// Advances the cursor. Returns the new current index, or `None` when
    /// the end of the queue was reached with repeat off (cursor unchanged;
    /// the caller stops playback). Repeat-one returns the unchanged index
    /// and the caller restarts the track from position zero.
    pub fn advance(&mut self) -> Option<usize> {
        let current = self.current_index?;
        match self.repeat_mode {
            RepeatMode::One => Some(current),
            RepeatMode::All => {
                let next = if current + 1 < self.tracks.len() {
                    current + 1
                } else {
                    0
                };
                self.current_index = Some(next);
                Some(next)
            }
            RepeatMode::Off => {
                if current + 1 < self.tracks.len() {
                    self.current_index = Some(current + 1);
                    Some(current + 1)
                } else {
                    // End of queue; cursor stays put.
                    None
                }
            }
        }
    }

    /// Moves the cursor backwards; symmetric to [`Queue::advance`]. At
    /// index zero the cursor wraps to the last index only with repeat-all,
    /// otherwise `None` signals start-of-queue (cursor unchanged).
    pub fn retreat(&mut self) -> Option<usize> {
        let current = self.current_index?;
        match self.repeat_mode {
            RepeatMode::One => Some(current),
            RepeatMode::All => {
                let prev = if current > 0 {
                    current - 1
                } else {
                    self.tracks.len() - 1
                };
                self.current_index = Some(prev);
                Some(prev)
            }
            RepeatMode::Off => {
                if current > 0 {
                    self.current_index = Some(current - 1);
                    Some(current - 1)
                } else {
                    None
                }
            }
        }
    }

    /// Moves one element from `from` to `to`. The track that was at the
    /// cursor remains the current track: the cursor is recomputed from the
    /// moved identity, never from the raw index.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.tracks.len();
        if from >= len {
            return Err(Error::InvalidIndex { index: from, len });
        }
        if to >= len {
            return Err(Error::InvalidIndex { index: to, len });
        }
        if from == to {
            return Ok(());
        }

        let playing_id: Option<TrackId> = self.current_track().map(|t| t.id);

        let moved = self.tracks.remove(from);
        self.tracks.insert(to, moved);

        if let Some(id) = playing_id {
            self.current_index = self.tracks.iter().position(|t| t.id == id);
        }
        Ok(())
    }

    /// The full ordered contents, for observers that render the queue.
    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.tracks
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: TrackId) -> Arc<Track> {
        Arc::new(Track {
            id,
            title: format!("Track {}", id),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_id: 1,
            duration_ms: 180_000,
            content_ref: format!("/music/{}.flac", id),
            is_favorite: false,
        })
    }

    fn loaded_queue(ids: &[TrackId], start: usize) -> Queue {
        let mut queue = Queue::new();
        queue
            .load(ids.iter().copied().map(track).collect(), start)
            .unwrap();
        queue
    }

    #[test]
    fn test_load_empty_input_yields_empty_queue() {
        let mut queue = Queue::new();
        queue.load(Vec::new(), 0).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.current_index(), None);
        assert!(queue.current_track().is_none());
    }

    #[test]
    fn test_load_rejects_out_of_bounds_start() {
        let mut queue = Queue::new();
        let result = queue.load(vec![track(1), track(2)], 2);
        assert!(matches!(result, Err(Error::InvalidIndex { index: 2, len: 2 })));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_navigation_on_empty_queue_is_noop() {
        let mut queue = Queue::new();
        assert_eq!(queue.advance(), None);
        assert_eq!(queue.retreat(), None);
    }

    #[test]
    fn test_advance_increments_within_bounds() {
        let mut queue = loaded_queue(&[1, 2, 3], 0);
        assert_eq!(queue.advance(), Some(1));
        assert_eq!(queue.advance(), Some(2));
    }

    #[test]
    fn test_advance_at_end_with_repeat_off_signals_and_keeps_cursor() {
        let mut queue = loaded_queue(&[1, 2, 3], 2);
        assert_eq!(queue.advance(), None);
        assert_eq!(queue.current_index(), Some(2));
    }

    #[test]
    fn test_advance_wraps_with_repeat_all() {
        let mut queue = loaded_queue(&[1, 2, 3], 2);
        queue.set_repeat_mode(RepeatMode::All);
        assert_eq!(queue.advance(), Some(0));
    }

    #[test]
    fn test_repeat_all_full_cycle_returns_to_origin() {
        let mut queue = loaded_queue(&[1, 2, 3, 4, 5], 2);
        queue.set_repeat_mode(RepeatMode::All);
        for _ in 0..queue.len() {
            assert!(queue.advance().is_some());
        }
        assert_eq!(queue.current_index(), Some(2));
    }

    #[test]
    fn test_repeat_one_keeps_index_on_advance() {
        let mut queue = loaded_queue(&[1, 2, 3], 1);
        queue.set_repeat_mode(RepeatMode::One);
        assert_eq!(queue.advance(), Some(1));
        assert_eq!(queue.current_index(), Some(1));
    }

    #[test]
    fn test_retreat_at_start_with_repeat_off_signals_and_stays() {
        let mut queue = loaded_queue(&[1, 2, 3], 0);
        assert_eq!(queue.retreat(), None);
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn test_retreat_wraps_only_with_repeat_all() {
        let mut queue = loaded_queue(&[1, 2, 3], 0);
        queue.set_repeat_mode(RepeatMode::All);
        assert_eq!(queue.retreat(), Some(2));
    }

    #[test]
    fn test_reorder_preserves_playing_track_identity() {
        // [A,B,C] with A playing; moving A to the back yields [B,C,A]
        // with the cursor following A.
        let mut queue = loaded_queue(&[1, 2, 3], 0);
        queue.reorder(0, 2).unwrap();

        let ids: Vec<TrackId> = queue.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(queue.current_index(), Some(2));
        assert_eq!(queue.current_track().unwrap().id, 1);
    }

    #[test]
    fn test_reorder_around_playing_track_keeps_identity() {
        let mut queue = loaded_queue(&[1, 2, 3], 1);
        queue.reorder(2, 0).unwrap();

        let ids: Vec<TrackId> = queue.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(queue.current_track().unwrap().id, 2);
    }

    #[test]
    fn test_reorder_rejects_out_of_range_indices() {
        let mut queue = loaded_queue(&[1, 2, 3], 0);
        assert!(queue.reorder(3, 0).is_err());
        assert!(queue.reorder(0, 3).is_err());
        // State unchanged after rejection.
        let ids: Vec<TrackId> = queue.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(queue.current_index(), Some(0));
    }
}
