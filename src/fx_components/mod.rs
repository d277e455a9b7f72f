// src/fx_components/mod.rs

pub mod autotune;
pub mod beat_repeat;
pub mod compressor;
pub mod delay;
pub mod filter;
pub mod reverb;

pub use autotune::{AutoTune, PitchDetector, PitchShifter};
pub use beat_repeat::BeatRepeat;
pub use compressor::Compressor;
pub use delay::DelayLine;
pub use filter::Filter;
pub use reverb::Reverb;

/// A common interface for the per-track insert effects.
///
/// The synchronization core only ever drives this contract: one sample in,
/// one sample out, and named parameter setters for the control thread to
/// reach through the command queue. Unknown parameter names are ignored.
pub trait Effect: Send {
    fn process(&mut self, input: f32) -> f32;
    fn set_parameter(&mut self, name: &str, value: f32);
    fn reset(&mut self);
}

/// Tagged constructor for the effect variants a track can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Filter,
    Compressor,
    Delay,
    Reverb,
    BeatRepeat,
}

impl EffectKind {
    pub fn build(self, sample_rate: f32) -> Box<dyn Effect> {
        match self {
            EffectKind::Filter => Box::new(Filter::new(sample_rate)),
            EffectKind::Compressor => Box::new(Compressor::new(sample_rate)),
            EffectKind::Delay => Box::new(DelayLine::new(2000.0, sample_rate)),
            EffectKind::Reverb => Box::new(Reverb::new(sample_rate)),
            EffectKind::BeatRepeat => Box::new(BeatRepeat::new(sample_rate)),
        }
    }
}

impl std::str::FromStr for EffectKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "filter" => Ok(EffectKind::Filter),
            "compressor" => Ok(EffectKind::Compressor),
            "delay" => Ok(EffectKind::Delay),
            "reverb" => Ok(EffectKind::Reverb),
            "beatrepeat" | "beat_repeat" => Ok(EffectKind::BeatRepeat),
            _ => Err(()),
        }
    }
}
