// src/engine/undo.rs

use crate::engine::track::Track;

/// Snapshot of one track's audio and alignment metadata, taken just before
/// a new recording pass overwrites it.
pub struct UndoSnapshot {
    pub track_id: usize,
    pub audio: Vec<f32>,
    pub length_in_samples: usize,
    pub record_length: usize,
    pub record_start_sample: i64,
    pub loop_multiplier: f32,
}

/// Single-slot undo: every `start_recording` overwrites the slot, `take`
/// consumes it. Snapshot storage is recycled between saves, so once warm
/// a save is a bounded copy with no allocation on the audio thread.
#[derive(Default)]
pub struct UndoHistory {
    slot: Option<UndoSnapshot>,
    spare: Vec<f32>,
}

impl UndoHistory {
    pub fn save(&mut self, track_id: usize, track: &Track) {
        let mut audio = match self.slot.take() {
            Some(previous) => previous.audio,
            None => std::mem::take(&mut self.spare),
        };
        audio.clear();
        audio.extend_from_slice(&track.buffer);
        self.slot = Some(UndoSnapshot {
            track_id,
            audio,
            length_in_samples: track.length_in_samples,
            record_length: track.record_length,
            record_start_sample: track.record_start_sample,
            loop_multiplier: track.loop_multiplier,
        });
    }

    pub fn take(&mut self) -> Option<UndoSnapshot> {
        self.slot.take()
    }

    /// Returns a consumed snapshot's storage for the next `save`.
    pub fn recycle(&mut self, buffer: Vec<f32>) {
        if buffer.capacity() > self.spare.capacity() {
            self.spare = buffer;
        }
    }

    pub fn clear(&mut self) {
        if let Some(snapshot) = self.slot.take() {
            self.recycle(snapshot.audio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::track::SharedTrackState;

    #[test]
    fn snapshot_round_trips_track_metadata() {
        let mut history = UndoHistory::default();
        let mut track = Track::new(SharedTrackState::new(), 48000.0);
        track.buffer = vec![0.25; 64];
        track.length_in_samples = 64;
        track.record_length = 64;
        track.loop_multiplier = 0.5;

        history.save(3, &track);
        let snapshot = history.take().unwrap();
        assert_eq!(snapshot.track_id, 3);
        assert_eq!(snapshot.audio, vec![0.25; 64]);
        assert_eq!(snapshot.length_in_samples, 64);
        assert_eq!(snapshot.loop_multiplier, 0.5);
        assert!(history.take().is_none());
    }

    #[test]
    fn snapshot_storage_is_recycled() {
        let mut history = UndoHistory::default();
        let mut track = Track::new(SharedTrackState::new(), 48000.0);
        track.buffer = vec![1.0; 1024];
        history.save(0, &track);

        let snapshot = history.take().unwrap();
        history.recycle(snapshot.audio);

        // The recycled storage backs the next, smaller snapshot without a
        // fresh allocation.
        track.buffer = vec![2.0; 512];
        history.save(0, &track);
        let snapshot = history.take().unwrap();
        assert_eq!(snapshot.audio, vec![2.0; 512]);
        assert!(snapshot.audio.capacity() >= 1024);
    }
}
