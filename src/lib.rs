// src/lib.rs

//! Multi-track live looper core.
//!
//! The first loop recorded becomes the master and fixes the cycle length;
//! every later track is recorded and played back phase-locked to it. The
//! engine runs inside the audio callback and is driven by a lock-free
//! command queue from the control thread.

pub mod audio_io;
pub mod engine;
pub mod fx_components;
pub mod monitor;
pub mod ring;
pub mod settings;
pub mod trigger;

pub use engine::{
    EngineCommand, EngineConfig, EngineHandle, LoopSynchronizer, SharedTrackState, TrackState,
};
pub use fx_components::{Effect, EffectKind};
pub use monitor::MonitorBuffer;
pub use trigger::TriggerEvent;
