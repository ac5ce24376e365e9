use crate::api::models::{Entity, Track};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    None,
    List,
    Song,
}

impl RepeatMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => RepeatMode::List,
            2 => RepeatMode::Song,
            _ => RepeatMode::None,
        }
    }

    pub fn as_index(&self) -> u8 {
        match self {
            RepeatMode::None => 0,
            RepeatMode::List => 1,
            RepeatMode::Song => 2,
        }
    }
}

/// Where a history entry came from, so retreat can put it back.
#[derive(Debug, Clone)]
enum Origin {
    /// Played from the auto lane at this cursor index.
    Auto(usize),
    /// Played as a detached manual track while the auto cursor was frozen
    /// at this index.
    Manual(usize),
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    track: Arc<Track>,
    origin: Origin,
}

/// Three-lane playback queue.
///
/// `auto` holds the active source container's tracks in play order, with
/// `shuffled_auto` substituted as the active lane while shuffle is on.
/// `manual` holds user-enqueued tracks and is drained strictly before any
/// auto advancement. `history` records everything fully played, most
/// recent last, tagged with enough origin data for retreat to undo it.
///
/// While a manual track plays it is held in `detached` and the cursor is
/// frozen; the next advance with an empty manual lane resumes the auto
/// lane at `cursor + 1`.
pub struct PlayQueue {
    history: Vec<HistoryEntry>,
    manual: Vec<Arc<Track>>,
    auto: Vec<Arc<Track>>,
    shuffled_auto: Vec<Arc<Track>>,
    cursor: usize,
    detached: Option<Arc<Track>>,
    repeat: RepeatMode,
    shuffle: bool,
    source: Option<Entity>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            manual: Vec::new(),
            auto: Vec::new(),
            shuffled_auto: Vec::new(),
            cursor: 0,
            detached: None,
            repeat: RepeatMode::None,
            shuffle: false,
            source: None,
        }
    }

    fn active(&self) -> &[Arc<Track>] {
        if self.shuffle {
            &self.shuffled_auto
        } else {
            &self.auto
        }
    }

    /// Replace the auto lane with a container's tracks. History is cleared,
    /// the manual lane is left alone.
    pub fn set_source(&mut self, source: Option<Entity>, tracks: Vec<Arc<Track>>, start_index: usize) {
        self.auto = tracks;
        self.history.clear();
        self.detached = None;
        self.source = source;
        self.cursor = if self.auto.is_empty() {
            0
        } else {
            start_index.min(self.auto.len() - 1)
        };
        if self.shuffle {
            // The start track stays addressable at the requested index.
            self.regenerate_shuffle_keeping(self.cursor);
        } else {
            self.shuffled_auto.clear();
        }
    }

    /// Uniform permutation of `auto` with the track at `keep` swapped back
    /// to that same index, so the cursor contract holds across the toggle.
    fn regenerate_shuffle_keeping(&mut self, keep: usize) {
        self.shuffled_auto = self.auto.clone();
        self.shuffled_auto.shuffle(&mut rand::thread_rng());
        if let Some(kept) = self.auto.get(keep) {
            if let Some(pos) = self.shuffled_auto.iter().position(|t| t.id == kept.id) {
                self.shuffled_auto.swap(keep, pos);
            }
        }
    }

    pub fn current(&self) -> Option<Arc<Track>> {
        if let Some(track) = &self.detached {
            return Some(Arc::clone(track));
        }
        self.active().get(self.cursor).map(Arc::clone)
    }

    pub fn source(&self) -> Option<&Entity> {
        self.source.as_ref()
    }

    /// Auto-lane position of the current track (frozen while a detached
    /// manual track plays).
    pub fn current_index(&self) -> usize {
        self.cursor
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    /// Turning shuffle on puts the playing track at index 0 of a fresh
    /// permutation; turning it off re-anchors the cursor onto the playing
    /// track's position in the original order.
    pub fn set_shuffle(&mut self, on: bool) {
        if on == self.shuffle {
            return;
        }
        if on {
            self.shuffle = true;
            if self.detached.is_some() || self.auto.is_empty() {
                // No auto position to anchor; clamp the frozen cursor.
                self.shuffled_auto = self.auto.clone();
                self.shuffled_auto.shuffle(&mut rand::thread_rng());
                self.cursor = self.cursor.min(self.auto.len().saturating_sub(1));
                return;
            }
            let current = self.active_unshuffled_current();
            self.shuffled_auto = self.auto.clone();
            self.shuffled_auto.shuffle(&mut rand::thread_rng());
            if let Some(current) = current {
                if let Some(pos) = self.shuffled_auto.iter().position(|t| t.id == current.id) {
                    self.shuffled_auto.swap(0, pos);
                }
            }
            self.cursor = 0;
        } else {
            let current = self.current();
            self.shuffle = false;
            self.shuffled_auto.clear();
            if self.detached.is_none() {
                if let Some(current) = current {
                    if let Some(pos) = self.auto.iter().position(|t| t.id == current.id) {
                        self.cursor = pos;
                    }
                }
            }
            self.cursor = self.cursor.min(self.auto.len().saturating_sub(1));
        }
    }

    fn active_unshuffled_current(&self) -> Option<Arc<Track>> {
        self.auto.get(self.cursor).map(Arc::clone)
    }

    pub fn enqueue_next(&mut self, track: Arc<Track>) {
        self.manual.insert(0, track);
    }

    pub fn enqueue_end(&mut self, track: Arc<Track>) {
        self.manual.push(track);
    }

    pub fn manual_len(&self) -> usize {
        self.manual.len()
    }

    /// Upcoming tracks in play order: the manual lane, then the rest of
    /// the active lane past the cursor.
    pub fn upcoming(&self) -> Vec<Arc<Track>> {
        let mut out: Vec<Arc<Track>> = self.manual.iter().map(Arc::clone).collect();
        let rest_from = (self.cursor + 1).min(self.active().len());
        out.extend(self.active()[rest_from..].iter().map(Arc::clone));
        out
    }

    fn push_current_to_history(&mut self) {
        if let Some(track) = self.detached.take() {
            self.history.push(HistoryEntry {
                track,
                origin: Origin::Manual(self.cursor),
            });
        } else if let Some(track) = self.active().get(self.cursor).map(Arc::clone) {
            self.history.push(HistoryEntry {
                track,
                origin: Origin::Auto(self.cursor),
            });
        }
    }

    /// Install and return the next track. Decision table, first match wins:
    /// repeat-song, manual lane, cursor step, repeat-list wrap, terminal.
    pub fn advance(&mut self) -> Option<Arc<Track>> {
        // Rule 1: repeat song. No cursor change, no history push.
        if self.repeat == RepeatMode::Song {
            if let Some(current) = self.current() {
                return Some(current);
            }
        }

        // Rule 2: drain the manual lane; cursor stays frozen.
        if !self.manual.is_empty() {
            self.push_current_to_history();
            let next = self.manual.remove(0);
            self.detached = Some(Arc::clone(&next));
            return Some(next);
        }

        // Rule 3: step the active lane. With a detached track just played,
        // this resumes at the frozen cursor + 1.
        if self.cursor + 1 < self.active().len() {
            self.push_current_to_history();
            self.cursor += 1;
            self.detached = None;
            return self.active().get(self.cursor).map(Arc::clone);
        }

        // Rule 4: repeat list wraps, reshuffling under shuffle.
        if self.repeat == RepeatMode::List && !self.active().is_empty() {
            self.push_current_to_history();
            if self.shuffle {
                self.shuffled_auto.shuffle(&mut rand::thread_rng());
            }
            self.cursor = 0;
            self.detached = None;
            return self.active().get(0).map(Arc::clone);
        }

        // Rule 5: terminal; the current track is retained.
        None
    }

    /// Undo the most recent advance. With empty history the current track
    /// is returned unchanged (the caller seeks to zero instead).
    pub fn retreat(&mut self) -> Option<Arc<Track>> {
        let entry = match self.history.pop() {
            Some(entry) => entry,
            None => return self.current(),
        };

        // The outgoing current goes back where it came from.
        if let Some(outgoing) = self.detached.take() {
            self.manual.insert(0, outgoing);
        }

        match entry.origin {
            Origin::Auto(index) => {
                // Re-anchor by id in case the permutation changed since the
                // push; fall back to the recorded index.
                let pos = self
                    .active()
                    .iter()
                    .position(|t| t.id == entry.track.id)
                    .unwrap_or(index);
                self.cursor = pos.min(self.active().len().saturating_sub(1));
                self.detached = None;
            }
            Origin::Manual(frozen) => {
                // Re-freeze the cursor where it sat under this track, so
                // the auto track just left replays on the next advance.
                self.cursor = frozen.min(self.active().len().saturating_sub(1));
                self.detached = Some(Arc::clone(&entry.track));
            }
        }
        Some(entry.track)
    }

    pub fn can_advance(&self) -> bool {
        self.peek_next().is_some()
    }

    pub fn can_retreat(&self) -> bool {
        !self.history.is_empty()
    }

    /// What advance() would return, without mutating anything. Drives both
    /// `can_advance` and next-track preloading.
    pub fn peek_next(&self) -> Option<Arc<Track>> {
        if self.repeat == RepeatMode::Song {
            if let Some(current) = self.current() {
                return Some(current);
            }
        }
        if let Some(first) = self.manual.first() {
            return Some(Arc::clone(first));
        }
        if self.cursor + 1 < self.active().len() {
            return self.active().get(self.cursor + 1).map(Arc::clone);
        }
        if self.repeat == RepeatMode::List {
            return self.active().first().map(Arc::clone);
        }
        None
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.auto.is_empty() && self.manual.is_empty() && self.detached.is_none()
    }
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Arc<Track> {
        Arc::new(Track {
            id: id.to_string(),
            title: format!("Track {}", id),
            duration: 180.0,
            track_number: None,
            volume_number: None,
            isrc: None,
            artist_name: "Artist".to_string(),
            artist_id: None,
            artists: vec!["Artist".to_string()],
            album_name: "Album".to_string(),
            album_id: Some("al".to_string()),
            artwork_url: None,
            explicit: false,
            available: true,
            media_tags: Vec::new(),
        })
    }

    fn tracks(ids: &[&str]) -> Vec<Arc<Track>> {
        ids.iter().map(|id| track(id)).collect()
    }

    fn queue_with(ids: &[&str], start: usize) -> PlayQueue {
        let mut queue = PlayQueue::new();
        queue.set_source(None, tracks(ids), start);
        queue
    }

    #[test]
    fn linear_album_advances_to_terminal() {
        let mut queue = queue_with(&["1", "2", "3"], 0);
        assert_eq!(queue.current().unwrap().id, "1");
        assert_eq!(queue.advance().unwrap().id, "2");
        assert_eq!(queue.advance().unwrap().id, "3");
        assert!(queue.advance().is_none());
        // Terminal retains the current track and a [T1, T2] history.
        assert_eq!(queue.current().unwrap().id, "3");
        assert_eq!(queue.history_len(), 2);
    }

    #[test]
    fn manual_lane_drains_before_auto() {
        let mut queue = queue_with(&["1", "2"], 0);
        queue.enqueue_next(track("x"));
        assert_eq!(queue.advance().unwrap().id, "x");
        // Cursor was frozen; auto resumes where it left off.
        assert_eq!(queue.advance().unwrap().id, "2");
    }

    #[test]
    fn play_next_beats_add_to_queue() {
        let mut queue = queue_with(&["1"], 0);
        queue.enqueue_end(track("end"));
        queue.enqueue_next(track("next"));
        assert_eq!(queue.advance().unwrap().id, "next");
        assert_eq!(queue.advance().unwrap().id, "end");
    }

    #[test]
    fn repeat_song_pins_the_current_track() {
        let mut queue = queue_with(&["1", "2", "3", "4", "5", "6"], 4);
        queue.set_repeat(RepeatMode::Song);
        assert_eq!(queue.advance().unwrap().id, "5");
        assert_eq!(queue.advance().unwrap().id, "5");
        assert_eq!(queue.history_len(), 0);
        queue.set_repeat(RepeatMode::None);
        assert_eq!(queue.advance().unwrap().id, "6");
    }

    #[test]
    fn repeat_song_wins_over_pending_manual() {
        let mut queue = queue_with(&["1", "2"], 0);
        queue.enqueue_next(track("x"));
        queue.set_repeat(RepeatMode::Song);
        assert_eq!(queue.advance().unwrap().id, "1");
        assert_eq!(queue.manual_len(), 1);
    }

    #[test]
    fn repeat_list_wraps_to_the_start() {
        let mut queue = queue_with(&["1", "2"], 1);
        queue.set_repeat(RepeatMode::List);
        assert_eq!(queue.advance().unwrap().id, "1");
        assert_eq!(queue.advance().unwrap().id, "2");
        assert!(queue.can_advance());
    }

    #[test]
    fn shuffle_toggle_round_trips_current_and_order() {
        let ids: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        let mut queue = queue_with(&id_refs, 0);

        queue.set_shuffle(true);
        assert_eq!(queue.current().unwrap().id, "1");
        assert_eq!(queue.current_index(), 0);

        queue.set_shuffle(false);
        assert_eq!(queue.current().unwrap().id, "1");
        assert_eq!(queue.current_index(), 0);
        // Original order is back.
        assert_eq!(queue.advance().unwrap().id, "2");
    }

    #[test]
    fn shuffled_source_keeps_start_track_at_start_index() {
        let mut queue = PlayQueue::new();
        queue.set_shuffle(true);
        queue.set_source(None, tracks(&["1", "2", "3", "4"]), 2);
        assert_eq!(queue.current().unwrap().id, "3");
    }

    #[test]
    fn retreat_pops_the_actual_prior_track() {
        let mut queue = queue_with(&["1", "2", "3"], 0);
        queue.advance();
        queue.advance();
        assert_eq!(queue.current().unwrap().id, "3");
        assert_eq!(queue.retreat().unwrap().id, "2");
        assert_eq!(queue.current().unwrap().id, "2");
        assert_eq!(queue.retreat().unwrap().id, "1");
        // Empty history: retreat hands back the current track.
        assert!(!queue.can_retreat());
        assert_eq!(queue.retreat().unwrap().id, "1");
    }

    #[test]
    fn retreat_restores_a_manual_track_and_the_frozen_cursor() {
        let mut queue = queue_with(&["1", "2"], 0);
        queue.enqueue_next(track("x"));
        queue.advance(); // x, detached
        queue.advance(); // 2, cursor resumed
        assert_eq!(queue.retreat().unwrap().id, "x");
        assert_eq!(queue.current().unwrap().id, "x");
        // Another retreat lands back on 1; x returns to manual[0].
        assert_eq!(queue.retreat().unwrap().id, "1");
        assert_eq!(queue.manual_len(), 1);
        assert_eq!(queue.advance().unwrap().id, "x");
    }

    #[test]
    fn retreat_to_manual_replays_the_auto_track_just_left() {
        let mut queue = queue_with(&["1", "2"], 0);
        queue.enqueue_next(track("x"));
        assert_eq!(queue.advance().unwrap().id, "x");
        assert_eq!(queue.advance().unwrap().id, "2");
        assert_eq!(queue.retreat().unwrap().id, "x");
        // Track 2 was left mid-flight; advancing again must replay it.
        assert_eq!(queue.advance().unwrap().id, "2");
        assert!(queue.advance().is_none());
    }

    #[test]
    fn enqueue_next_then_advance_returns_it_under_any_shuffle() {
        for shuffle in [false, true] {
            let mut queue = queue_with(&["1", "2", "3"], 0);
            queue.set_shuffle(shuffle);
            queue.enqueue_next(track("x"));
            assert_eq!(queue.advance().unwrap().id, "x");
        }
    }

    #[test]
    fn can_advance_mirrors_what_advance_produces() {
        let mut queue = queue_with(&["1", "2"], 0);
        assert!(queue.can_advance());
        queue.advance();
        assert!(!queue.can_advance());
        queue.set_repeat(RepeatMode::List);
        assert!(queue.can_advance());
        queue.set_repeat(RepeatMode::None);
        queue.enqueue_end(track("x"));
        assert!(queue.can_advance());
    }

    #[test]
    fn set_source_resets_auto_and_history_but_not_manual() {
        let mut queue = queue_with(&["1", "2"], 0);
        queue.enqueue_end(track("kept"));
        queue.advance();
        assert_eq!(queue.history_len(), 1);

        queue.set_source(None, tracks(&["9"]), 0);
        assert_eq!(queue.history_len(), 0);
        assert_eq!(queue.current().unwrap().id, "9");
        assert_eq!(queue.manual_len(), 1);
    }

    #[test]
    fn start_index_is_clamped() {
        let queue = queue_with(&["1", "2"], 99);
        assert_eq!(queue.current().unwrap().id, "2");
    }

    #[test]
    fn repeat_mode_indices_round_trip() {
        for index in 0..=2u8 {
            assert_eq!(RepeatMode::from_index(index).as_index(), index);
        }
        assert_eq!(RepeatMode::from_index(7), RepeatMode::None);
    }
}
