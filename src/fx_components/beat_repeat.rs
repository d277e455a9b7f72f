// src/fx_components/beat_repeat.rs

//! Beat repeat: captures a short slice of the incoming signal and stutters
//! it for a configurable number of repeats.

use crate::fx_components::Effect;
use crate::ring::SampleRing;

pub struct BeatRepeat {
    sample_rate: f32,
    history: SampleRing,
    slice: Vec<f32>,
    slice_len: usize,
    play_pos: usize,
    repeats_left: usize,
    repeats: usize,
    interval_samples: usize,
    since_capture: usize,
    active: bool,
    mix: f32,
}

impl BeatRepeat {
    pub fn new(sample_rate: f32) -> Self {
        let slice_len = (sample_rate * 0.125) as usize;
        Self {
            sample_rate,
            history: SampleRing::with_capacity(sample_rate as usize),
            slice: vec![0.0; sample_rate as usize],
            slice_len: slice_len.max(1),
            play_pos: 0,
            repeats_left: 0,
            repeats: 4,
            interval_samples: sample_rate as usize,
            since_capture: 0,
            active: false,
            mix: 1.0,
        }
    }

    fn capture(&mut self) {
        self.slice.clear();
        self.history.read_last_into(self.slice_len, &mut self.slice);
        self.play_pos = 0;
        self.repeats_left = self.repeats;
    }
}

impl Effect for BeatRepeat {
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        self.history.push(input);
        if !self.active {
            return input;
        }

        self.since_capture += 1;
        if self.since_capture >= self.interval_samples {
            self.since_capture = 0;
            self.capture();
        }

        if self.repeats_left == 0 || self.slice.is_empty() {
            return input;
        }

        let repeated = self.slice[self.play_pos];
        self.play_pos += 1;
        if self.play_pos >= self.slice.len() {
            self.play_pos = 0;
            self.repeats_left -= 1;
        }
        input * (1.0 - self.mix) + repeated * self.mix
    }

    fn set_parameter(&mut self, name: &str, value: f32) {
        match name {
            "active" => self.active = value >= 0.5,
            "slice_ms" => {
                let max = self.history.capacity();
                self.slice_len =
                    (((value.max(1.0) / 1000.0) * self.sample_rate) as usize).clamp(1, max);
            }
            "repeats" => self.repeats = (value as usize).clamp(1, 32),
            "interval_ms" => {
                self.interval_samples =
                    (((value.max(1.0) / 1000.0) * self.sample_rate) as usize).max(1);
            }
            "mix" => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.history.clear();
        self.slice.clear();
        self.play_pos = 0;
        self.repeats_left = 0;
        self.since_capture = 0;
    }
}
