// src/fx_components/compressor.rs

//! A feed-forward compressor with an envelope follower sidechain.

use crate::fx_components::Effect;

#[derive(Debug)]
pub struct Compressor {
    sample_rate: f32,
    threshold: f32,
    ratio: f32,
    makeup: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32) -> Self {
        let mut c = Self {
            sample_rate,
            threshold: 0.5,
            ratio: 4.0,
            makeup: 1.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
        };
        c.set_times(5.0, 80.0);
        c
    }

    fn set_times(&mut self, attack_ms: f32, release_ms: f32) {
        self.attack_coeff = (-(1.0 / (attack_ms.max(0.1) * 0.001 * self.sample_rate))).exp();
        self.release_coeff = (-(1.0 / (release_ms.max(1.0) * 0.001 * self.sample_rate))).exp();
    }
}

impl Effect for Compressor {
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let level = input.abs();
        self.envelope = if level > self.envelope {
            self.attack_coeff * (self.envelope - level) + level
        } else {
            self.release_coeff * (self.envelope - level) + level
        };

        let gain = if self.envelope > self.threshold {
            let over = self.envelope / self.threshold;
            (self.threshold * over.powf(1.0 / self.ratio)) / self.envelope
        } else {
            1.0
        };

        input * gain * self.makeup
    }

    fn set_parameter(&mut self, name: &str, value: f32) {
        match name {
            "threshold" => self.threshold = value.clamp(0.01, 1.0),
            "ratio" => self.ratio = value.clamp(1.0, 20.0),
            "makeup" => self.makeup = value.clamp(0.0, 4.0),
            "attack_ms" => {
                let release = -1.0 / ((self.release_coeff.ln()) * 0.001 * self.sample_rate);
                self.set_times(value, release);
            }
            "release_ms" => {
                let attack = -1.0 / ((self.attack_coeff.ln()) * 0.001 * self.sample_rate);
                self.set_times(attack, value);
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}
