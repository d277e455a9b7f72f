// src/fx_components/delay.rs

//! A fractional delay line using a circular buffer and linear interpolation.

use crate::fx_components::Effect;

#[derive(Debug)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    sample_rate: f32,
    time_ms: f32,
    feedback: f32,
    mix: f32,
}

impl DelayLine {
    pub fn new(max_delay_ms: f32, sample_rate: f32) -> Self {
        let max_delay_samples = ((max_delay_ms / 1000.0 * sample_rate).ceil() as usize).max(1);
        Self {
            buffer: vec![0.0; max_delay_samples],
            write_pos: 0,
            sample_rate,
            time_ms: 250.0,
            feedback: 0.3,
            mix: 0.5,
        }
    }

    #[inline]
    fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    #[inline]
    fn read(&self, delay_samples: f32) -> f32 {
        let len = self.buffer.len();
        let read_pos = (self.write_pos as f32 - delay_samples + len as f32) % len as f32;
        let index0 = read_pos.floor() as usize % len;
        let index1 = (index0 + 1) % len;
        let fraction = read_pos.fract();
        let s0 = self.buffer[index0];
        let s1 = self.buffer[index1];
        s0 + fraction * (s1 - s0)
    }
}

impl Effect for DelayLine {
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delay_samples = (self.time_ms / 1000.0 * self.sample_rate)
            .clamp(1.0, (self.buffer.len() - 1) as f32);
        let delayed = self.read(delay_samples);
        self.write((input + delayed * self.feedback).clamp(-1.0, 1.0));
        input * (1.0 - self.mix) + delayed * self.mix
    }

    fn set_parameter(&mut self, name: &str, value: f32) {
        match name {
            "time_ms" => {
                let max_ms = self.buffer.len() as f32 / self.sample_rate * 1000.0;
                self.time_ms = value.clamp(1.0, max_ms);
            }
            "feedback" => self.feedback = value.clamp(0.0, 0.95),
            "mix" => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}
