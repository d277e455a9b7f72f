// src/fx_components/reverb.rs

//! A Schroeder reverb: four parallel combs into two serial all-passes.

use crate::fx_components::Effect;

#[derive(Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    delay_length: usize,
    feedback: f32,
}

impl CombFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            index: 0,
            delay_length: delay_samples.max(1),
            feedback: 0.7,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let read_index = (self.index + self.buffer.len() - self.delay_length) % self.buffer.len();
        let output = self.buffer[read_index];
        self.buffer[self.index] = input + output * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

#[derive(Clone)]
struct AllPassFilter {
    buffer: Vec<f32>,
    index: usize,
    delay_length: usize,
}

impl AllPassFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            index: 0,
            delay_length: delay_samples.max(1),
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let read_index = (self.index + self.buffer.len() - self.delay_length) % self.buffer.len();
        let delayed = self.buffer[read_index];
        let output = -input + delayed;
        self.buffer[self.index] = input + delayed * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

pub struct Reverb {
    comb_filters: [CombFilter; 4],
    all_pass_filters: [AllPassFilter; 2],
    base_comb_delays: [f32; 4],
    sr_factor: f32,
    mix: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Self {
        let sr_factor = sample_rate / 44100.0;
        let base_comb_delays = [1116.0, 1188.0, 1277.0, 1356.0];
        let base_allpass_delays = [225.0, 556.0];
        Self {
            comb_filters: [
                CombFilter::new((base_comb_delays[0] * sr_factor) as usize),
                CombFilter::new((base_comb_delays[1] * sr_factor) as usize),
                CombFilter::new((base_comb_delays[2] * sr_factor) as usize),
                CombFilter::new((base_comb_delays[3] * sr_factor) as usize),
            ],
            all_pass_filters: [
                AllPassFilter::new((base_allpass_delays[0] * sr_factor) as usize),
                AllPassFilter::new((base_allpass_delays[1] * sr_factor) as usize),
            ],
            base_comb_delays,
            sr_factor,
            mix: 0.3,
        }
    }
}

impl Effect for Reverb {
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let comb_out = self
            .comb_filters
            .iter_mut()
            .map(|f| f.process(input))
            .sum::<f32>()
            * 0.25;
        let wet = self
            .all_pass_filters
            .iter_mut()
            .fold(comb_out, |acc, f| f.process(acc));
        input * (1.0 - self.mix) + wet * self.mix
    }

    fn set_parameter(&mut self, name: &str, value: f32) {
        match name {
            "mix" => self.mix = value.clamp(0.0, 1.0),
            "decay" => {
                for comb in &mut self.comb_filters {
                    comb.feedback = value.clamp(0.0, 0.98);
                }
            }
            "size" => {
                let size = value.clamp(0.25, 1.0);
                for (i, comb) in self.comb_filters.iter_mut().enumerate() {
                    let delay = (self.base_comb_delays[i] * size * self.sr_factor) as usize;
                    comb.delay_length = delay.max(1).min(comb.buffer.len());
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        for comb in &mut self.comb_filters {
            comb.buffer.fill(0.0);
        }
        for ap in &mut self.all_pass_filters {
            ap.buffer.fill(0.0);
        }
    }
}
