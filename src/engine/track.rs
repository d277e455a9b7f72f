// src/engine/track.rs

use crate::fx_components::{AutoTune, Effect};
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Scaler for storing float values in atomics.
pub const PARAM_SCALER: f32 = 1_000_000.0;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Idle,
    Recording,
    Playing,
}

impl From<u8> for TrackState {
    fn from(val: u8) -> Self {
        match val {
            1 => TrackState::Recording,
            2 => TrackState::Playing,
            _ => TrackState::Idle,
        }
    }
}

/// Per-track state shared between the control and audio threads.
#[derive(Clone)]
pub struct SharedTrackState {
    state: Arc<AtomicU8>,
    rms: Arc<AtomicU32>,
    peak: Arc<AtomicU32>,
    recorded_len: Arc<AtomicUsize>,
    position: Arc<AtomicU32>,
    loop_multiplier: Arc<AtomicU32>,
}

impl SharedTrackState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TrackState::Idle as u8)),
            rms: Arc::new(AtomicU32::new(0)),
            peak: Arc::new(AtomicU32::new(0)),
            recorded_len: Arc::new(AtomicUsize::new(0)),
            position: Arc::new(AtomicU32::new(0)),
            loop_multiplier: Arc::new(AtomicU32::new(PARAM_SCALER as u32)),
        }
    }

    pub fn get(&self) -> TrackState {
        self.state.load(Ordering::Relaxed).into()
    }

    pub fn set(&self, state: TrackState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn rms(&self) -> f32 {
        self.rms.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    pub fn set_rms(&self, rms: f32) {
        self.rms
            .store((rms.clamp(0.0, 1.0) * PARAM_SCALER) as u32, Ordering::Relaxed);
    }

    pub fn peak(&self) -> f32 {
        self.peak.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    pub fn set_peak(&self, peak: f32) {
        self.peak
            .store((peak.clamp(0.0, 1.0) * PARAM_SCALER) as u32, Ordering::Relaxed);
    }

    pub fn recorded_len(&self) -> usize {
        self.recorded_len.load(Ordering::Relaxed)
    }

    pub fn set_recorded_len(&self, len: usize) {
        self.recorded_len.store(len, Ordering::Relaxed);
    }

    /// Normalized playback position, 0.0 to 1.0.
    pub fn position(&self) -> f32 {
        self.position.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    pub fn set_position(&self, normalized: f32) {
        self.position.store(
            (normalized.clamp(0.0, 1.0) * PARAM_SCALER) as u32,
            Ordering::Relaxed,
        );
    }

    pub fn loop_multiplier(&self) -> f32 {
        self.loop_multiplier.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    pub fn set_loop_multiplier(&self, multiplier: f32) {
        self.loop_multiplier
            .store((multiplier * PARAM_SCALER) as u32, Ordering::Relaxed);
    }
}

/// One looper track, owned by the audio thread.
pub struct Track {
    pub shared: SharedTrackState,
    pub buffer: Vec<f32>,
    pub write_position: usize,
    pub read_position: usize,
    pub is_recording: bool,
    pub is_playing: bool,
    /// Samples captured this recording pass; may exceed the physical
    /// buffer length once aligned.
    pub record_length: usize,
    /// Effective length for wraparound while recording: the master loop
    /// length once established, otherwise the buffer capacity.
    pub record_capacity: usize,
    /// Global absolute sample index at which recording began.
    pub record_start_sample: i64,
    /// Master-relative phase at which recording began.
    pub recording_start_phase: usize,
    /// Logical playback length post-alignment.
    pub length_in_samples: usize,
    pub loop_multiplier: f32,
    pub gain: f32,
    pub muted: bool,
    pub effects: Vec<Box<dyn Effect>>,
    pub autotune: AutoTune,
    sum_squares: f32,
    peak_level: f32,
    meter_samples: usize,
}

impl Track {
    pub fn new(shared: SharedTrackState, sample_rate: f32) -> Self {
        Self {
            shared,
            buffer: Vec::new(),
            write_position: 0,
            read_position: 0,
            is_recording: false,
            is_playing: false,
            record_length: 0,
            record_capacity: 0,
            record_start_sample: 0,
            recording_start_phase: 0,
            length_in_samples: 0,
            loop_multiplier: 1.0,
            gain: 1.0,
            muted: false,
            effects: Vec::new(),
            autotune: AutoTune::new(sample_rate),
            sum_squares: 0.0,
            peak_level: 0.0,
            meter_samples: 0,
        }
    }

    /// Prepares the buffer for a new recording pass. Allocation happens
    /// here, at a block boundary, never in the per-sample path.
    pub fn begin_recording(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        self.buffer.clear();
        self.buffer.resize(capacity, 0.0);
        self.record_capacity = capacity;
        self.write_position = 0;
        self.read_position = 0;
        self.record_length = 0;
        self.recording_start_phase = 0;
        self.length_in_samples = 0;
        self.is_recording = true;
        self.is_playing = false;
        self.shared.set(TrackState::Recording);
        self.shared.set_recorded_len(0);
        self.shared.set_position(0.0);
    }

    #[inline]
    pub fn accumulate_meter(&mut self, sample: f32) {
        self.sum_squares += sample * sample;
        self.peak_level = self.peak_level.max(sample.abs());
        self.meter_samples += 1;
    }

    pub fn publish_meters(&mut self) {
        if self.meter_samples > 0 {
            let rms = (self.sum_squares / self.meter_samples as f32).sqrt();
            self.shared.set_rms(rms);
            self.shared.set_peak(self.peak_level);
        } else if self.shared.get() == TrackState::Idle {
            self.shared.set_rms(0.0);
            self.shared.set_peak(0.0);
        }
        self.sum_squares = 0.0;
        self.peak_level = 0.0;
        self.meter_samples = 0;
    }

    #[inline]
    pub fn publish_position(&self) {
        if self.length_in_samples > 0 {
            self.shared
                .set_position(self.read_position as f32 / self.length_in_samples as f32);
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.write_position = 0;
        self.read_position = 0;
        self.is_recording = false;
        self.is_playing = false;
        self.record_length = 0;
        self.record_capacity = 0;
        self.record_start_sample = 0;
        self.recording_start_phase = 0;
        self.length_in_samples = 0;
        self.loop_multiplier = 1.0;
        self.sum_squares = 0.0;
        self.peak_level = 0.0;
        self.meter_samples = 0;
        self.shared.set(TrackState::Idle);
        self.shared.set_recorded_len(0);
        self.shared.set_position(0.0);
        self.shared.set_loop_multiplier(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [TrackState::Idle, TrackState::Recording, TrackState::Playing] {
            assert_eq!(TrackState::from(state as u8), state);
        }
        assert_eq!(TrackState::from(200), TrackState::Idle);
    }

    #[test]
    fn begin_recording_resets_cursors_and_flags() {
        let mut track = Track::new(SharedTrackState::new(), 48000.0);
        track.read_position = 17;
        track.is_playing = true;
        track.begin_recording(64);
        assert_eq!(track.buffer.len(), 64);
        assert_eq!(track.write_position, 0);
        assert_eq!(track.record_length, 0);
        assert!(track.is_recording);
        assert!(!track.is_playing);
        assert_eq!(track.shared.get(), TrackState::Recording);
    }

    #[test]
    fn meters_average_over_block() {
        let mut track = Track::new(SharedTrackState::new(), 48000.0);
        for _ in 0..100 {
            track.accumulate_meter(0.5);
        }
        track.publish_meters();
        assert!((track.shared.rms() - 0.5).abs() < 1e-3);
        assert!((track.shared.peak() - 0.5).abs() < 1e-3);
    }
}
