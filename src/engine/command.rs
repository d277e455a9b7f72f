// src/engine/command.rs

use crate::engine::track::Track;
use crate::fx_components::EffectKind;

/// Commands issued by the control thread, drained by the audio thread at
/// the start of each processed block. Operations on a track id that does
/// not exist are no-ops.
pub enum EngineCommand {
    /// Appends a track built on the control thread; the audio thread only
    /// moves it into the pool, so the allocation never happens mid-block.
    AddTrack(Box<Track>),
    StartRecording(usize),
    /// Start recording and retroactively inject the trigger buffer's
    /// captured pre-roll ahead of the write cursor.
    StartRecordingWithLookback(usize),
    StopRecording(usize),
    StartPlaying(usize),
    StopPlaying(usize),
    StartAllPlayback,
    ClearTrack(usize),
    AllClear,
    Undo,
    SetTrackGain(usize, f32),
    ToggleTrackMute(usize),
    SetInputMonitoring(bool),
    LoadEffect {
        track: usize,
        kind: EffectKind,
    },
    ClearEffects(usize),
    SetEffectParameter {
        track: usize,
        effect: usize,
        name: String,
        value: f32,
    },
    SetAutotune {
        track: usize,
        enabled: bool,
    },
    SetAutotuneAmount {
        track: usize,
        amount: f32,
    },
    SetTriggerThresholds {
        low: f32,
        high: f32,
    },
}
