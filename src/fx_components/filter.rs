// src/fx_components/filter.rs

//! A state-variable filter with low-pass, high-pass and band-pass outputs.

use crate::fx_components::Effect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterMode {
    LowPass,
    HighPass,
    BandPass,
}

#[derive(Debug)]
pub struct Filter {
    sample_rate: f32,
    mode: FilterMode,
    cutoff_hz: f32,
    resonance: f32,
    low: f32,
    band: f32,
}

impl Filter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            mode: FilterMode::LowPass,
            cutoff_hz: 4000.0,
            resonance: 0.3,
            low: 0.0,
            band: 0.0,
        }
    }
}

impl Effect for Filter {
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let f = 2.0 * (std::f32::consts::PI * self.cutoff_hz / self.sample_rate).sin();
        let q = 1.0 - self.resonance.clamp(0.0, 0.95);

        let high = input - self.low - q * self.band;
        self.band += f * high;
        self.low += f * self.band;
        self.band = self.band.clamp(-4.0, 4.0);
        self.low = self.low.clamp(-4.0, 4.0);

        match self.mode {
            FilterMode::LowPass => self.low,
            FilterMode::HighPass => high,
            FilterMode::BandPass => self.band,
        }
    }

    fn set_parameter(&mut self, name: &str, value: f32) {
        match name {
            "cutoff_hz" => self.cutoff_hz = value.clamp(20.0, self.sample_rate * 0.45),
            "resonance" => self.resonance = value.clamp(0.0, 1.0),
            "mode" => {
                self.mode = match value as u32 {
                    1 => FilterMode::HighPass,
                    2 => FilterMode::BandPass,
                    _ => FilterMode::LowPass,
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }
}
