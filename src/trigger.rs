// src/trigger.rs

//! Trigger-armed pre-roll capture.
//!
//! The engine feeds every raw input block through this buffer. A sample
//! crossing the low threshold arms the detector and marks where the phrase
//! began; a later sample crossing the high threshold confirms the trigger.
//! The span between the armed mark and the write cursor is the pre-roll
//! ("lookback") that can be retroactively injected into a new recording.

use crate::ring::SampleRing;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Length of the capture ring, in seconds of audio.
const CAPTURE_SECONDS: f32 = 2.0;
/// How long the armed detector tolerates silence before disarming.
const SILENCE_TIMEOUT_SECONDS: f32 = 0.5;

/// Confirmed-trigger reference shared with the engine's control surface.
/// Set once per confirmation, consumed when a recording starts.
#[derive(Debug, Default)]
pub struct TriggerEvent {
    active: AtomicBool,
    start_sample: AtomicI64,
}

impl TriggerEvent {
    pub fn set(&self, start_sample: i64) {
        self.start_sample.store(start_sample, Ordering::Relaxed);
        self.active.store(true, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn start_sample(&self) -> i64 {
        self.start_sample.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

pub struct TriggerCaptureBuffer {
    ring: SampleRing,
    /// Ring index of the low-threshold crossing that armed the detector.
    potential_start_index: Option<usize>,
    /// Absolute sample index of that crossing.
    potential_start_sample: i64,
    in_pre_roll: bool,
    silence_counter: usize,
    silence_timeout: usize,
    total_written: i64,
}

impl TriggerCaptureBuffer {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            ring: SampleRing::with_capacity((sample_rate * CAPTURE_SECONDS) as usize),
            potential_start_index: None,
            potential_start_sample: 0,
            in_pre_roll: false,
            silence_counter: 0,
            silence_timeout: (sample_rate * SILENCE_TIMEOUT_SECONDS) as usize,
            total_written: 0,
        }
    }

    pub fn write(&mut self, samples: &[f32]) {
        self.ring.write(samples);
        self.total_written += samples.len() as i64;
    }

    /// Scans a block (already passed to `write`) for trigger activity.
    /// Returns true the moment a high-threshold crossing confirms an armed
    /// trigger; the armed index stays put as the pre-roll start marker.
    pub fn process_triggers(&mut self, samples: &[f32], low: f32, high: f32) -> bool {
        let block_len = samples.len();
        for (i, &sample) in samples.iter().enumerate() {
            let level = sample.abs();
            if !self.in_pre_roll {
                if level > low {
                    self.potential_start_index = Some(self.ring.index_back(block_len - i));
                    self.potential_start_sample =
                        self.total_written - (block_len - i) as i64;
                    self.in_pre_roll = true;
                    self.silence_counter = 0;
                }
            } else {
                if level > high && self.potential_start_index.is_some() {
                    return true;
                }
                if level < low {
                    self.silence_counter += 1;
                    if self.silence_counter >= self.silence_timeout {
                        self.in_pre_roll = false;
                        self.potential_start_index = None;
                        self.silence_counter = 0;
                    }
                } else {
                    self.silence_counter = 0;
                }
            }
        }
        false
    }

    pub fn is_armed(&self) -> bool {
        self.in_pre_roll && self.potential_start_index.is_some()
    }

    /// Absolute sample index of the armed low-threshold crossing.
    pub fn armed_start_sample(&self) -> i64 {
        self.potential_start_sample
    }

    /// Number of pre-roll samples a `read_lookback_into` call would yield.
    pub fn lookback_len(&self) -> usize {
        match self.potential_start_index {
            Some(start) => self.ring.span_from(start),
            None => 0,
        }
    }

    /// Copies the pre-roll span into `out`: armed index up to the write
    /// cursor. Retrieval happens before the next block is written, so the
    /// span ends exactly where normal recording picks up and no sample is
    /// captured twice or lost. Invalidates the armed index but leaves the
    /// armed flag alone so a sustained phrase does not immediately
    /// re-trigger.
    pub fn read_lookback_into(&mut self, out: &mut Vec<f32>) {
        let Some(start) = self.potential_start_index.take() else {
            return;
        };
        let span = self.ring.span_from(start);
        self.ring.read_into(start, span, out);
    }

    /// Drops any armed pre-roll marker. Called when a recording pass
    /// starts or finishes so stale phrases never feed a later lookback.
    pub fn disarm(&mut self) {
        self.potential_start_index = None;
        self.in_pre_roll = false;
        self.silence_counter = 0;
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.disarm();
        self.total_written = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> TriggerCaptureBuffer {
        // 1 kHz rate keeps the ring and silence timeout small.
        TriggerCaptureBuffer::new(1000.0)
    }

    #[test]
    fn low_crossing_arms_high_crossing_confirms() {
        let mut tb = buffer();
        let quiet = vec![0.0f32; 16];
        tb.write(&quiet);
        assert!(!tb.process_triggers(&quiet, 0.05, 0.3));
        assert!(!tb.is_armed());

        let soft = vec![0.1f32; 16];
        tb.write(&soft);
        assert!(!tb.process_triggers(&soft, 0.05, 0.3));
        assert!(tb.is_armed());

        let loud = vec![0.5f32; 16];
        tb.write(&loud);
        assert!(tb.process_triggers(&loud, 0.05, 0.3));
        assert!(tb.is_armed());
    }

    #[test]
    fn silence_timeout_disarms() {
        let mut tb = buffer();
        let soft = vec![0.1f32; 8];
        tb.write(&soft);
        tb.process_triggers(&soft, 0.05, 0.3);
        assert!(tb.is_armed());

        // 0.5 s of silence at 1 kHz is 500 samples.
        let quiet = vec![0.0f32; 600];
        tb.write(&quiet);
        assert!(!tb.process_triggers(&quiet, 0.05, 0.3));
        assert!(!tb.is_armed());
    }

    #[test]
    fn lookback_spans_arm_to_cursor_and_reads_once() {
        let mut tb = buffer();
        // Pre-roll phrase: 32 soft samples arm the detector at sample 0.
        let soft = vec![0.1f32; 32];
        tb.write(&soft);
        assert!(!tb.process_triggers(&soft, 0.05, 0.3));

        // Confirming block. Nothing past the cursor has been recorded yet,
        // so the lookback covers the soft pre-roll and the confirming
        // onset: 48 samples, none lost.
        let loud = vec![0.5f32; 16];
        tb.write(&loud);
        assert!(tb.process_triggers(&loud, 0.05, 0.3));

        assert_eq!(tb.lookback_len(), 48);
        let mut out = Vec::new();
        tb.read_lookback_into(&mut out);
        assert_eq!(out.len(), 48);
        assert!(out[..32].iter().all(|&s| (s - 0.1).abs() < 1e-6));
        assert!(out[32..].iter().all(|&s| (s - 0.5).abs() < 1e-6));

        // Armed index is consumed: a second read yields nothing.
        let mut again = Vec::new();
        tb.read_lookback_into(&mut again);
        assert!(again.is_empty());
        assert_eq!(tb.lookback_len(), 0);
    }

    #[test]
    fn disarm_drops_the_pending_phrase() {
        let mut tb = buffer();
        let soft = vec![0.1f32; 32];
        tb.write(&soft);
        tb.process_triggers(&soft, 0.05, 0.3);
        assert!(tb.is_armed());

        tb.disarm();
        assert!(!tb.is_armed());
        assert_eq!(tb.lookback_len(), 0);
        let mut out = Vec::new();
        tb.read_lookback_into(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn armed_start_sample_is_absolute() {
        let mut tb = buffer();
        let quiet = vec![0.0f32; 100];
        tb.write(&quiet);
        tb.process_triggers(&quiet, 0.05, 0.3);

        let mut block = vec![0.0f32; 10];
        block[4] = 0.2;
        tb.write(&block);
        tb.process_triggers(&block, 0.05, 0.3);
        assert_eq!(tb.armed_start_sample(), 104);
    }
}
