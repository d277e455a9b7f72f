// src/engine/mod.rs

//! The loop synchronization engine.
//!
//! `LoopSynchronizer` owns every track, the master-loop state, the trigger
//! capture buffer and the undo slot. It runs entirely on the audio thread:
//! the control thread talks to it through a bounded SPSC command queue that
//! is drained at the start of each processed block, and reads state back
//! through atomics published on `EngineHandle`.

pub mod command;
pub mod track;
pub mod undo;

pub use command::EngineCommand;
pub use track::{SharedTrackState, Track, TrackState, PARAM_SCALER};

use crate::trigger::{TriggerCaptureBuffer, TriggerEvent};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use undo::UndoHistory;

const COMMAND_QUEUE_CAPACITY: usize = 256;
const MONITOR_QUEUE_CAPACITY: usize = 8192;

/// Master-loop bookkeeping. `loop_length` is fixed once the first track
/// finishes recording and only a full clear resets it.
#[derive(Clone, Copy, Default)]
struct MasterLoopState {
    master_track: Option<usize>,
    loop_length: usize,
    start_sample: i64,
    read_position: usize,
}

/// Engine-wide state shared with the control thread.
#[derive(Clone)]
pub struct SharedEngineState {
    master_len: Arc<AtomicUsize>,
    master_position: Arc<AtomicU32>,
    current_sample: Arc<AtomicU64>,
    max_multiplier: Arc<AtomicU32>,
    last_undo: Arc<AtomicI64>,
    cpu_load: Arc<AtomicU32>,
    input_peak: Arc<AtomicU32>,
}

impl SharedEngineState {
    fn new() -> Self {
        Self {
            master_len: Arc::new(AtomicUsize::new(0)),
            master_position: Arc::new(AtomicU32::new(0)),
            current_sample: Arc::new(AtomicU64::new(0)),
            max_multiplier: Arc::new(AtomicU32::new(PARAM_SCALER as u32)),
            last_undo: Arc::new(AtomicI64::new(-1)),
            cpu_load: Arc::new(AtomicU32::new(0)),
            input_peak: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn master_loop_length(&self) -> usize {
        self.master_len.load(Ordering::Relaxed)
    }

    /// Normalized master cycle position, 0.0 to 1.0.
    pub fn master_position(&self) -> f32 {
        self.master_position.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    pub fn current_sample_position(&self) -> u64 {
        self.current_sample.load(Ordering::Relaxed)
    }

    pub fn max_loop_multiplier(&self) -> f32 {
        self.max_multiplier.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    /// Track id restored by the most recent undo, -1 if there was nothing
    /// to undo.
    pub fn last_undo(&self) -> i64 {
        self.last_undo.load(Ordering::Relaxed)
    }

    /// Audio callback load as a fraction of the buffer duration, scaled by
    /// 1000.
    pub fn cpu_load(&self) -> u32 {
        self.cpu_load.load(Ordering::Relaxed)
    }

    pub fn input_peak(&self) -> f32 {
        self.input_peak.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }
}

/// Construction parameters for the engine.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub num_tracks: usize,
    /// Upper bound on a first (master) recording, in seconds.
    pub max_loop_seconds: f32,
    pub trigger_low_threshold: f32,
    pub trigger_high_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            num_tracks: 8,
            max_loop_seconds: 30.0,
            trigger_low_threshold: 0.05,
            trigger_high_threshold: 0.3,
        }
    }
}

/// Control-thread handle: sends commands and reads published state.
pub struct EngineHandle {
    command_producer: HeapProducer<EngineCommand>,
    monitor_consumer: HeapConsumer<f32>,
    sample_rate: f32,
    pub tracks: Vec<SharedTrackState>,
    pub engine: SharedEngineState,
    pub trigger_event: Arc<TriggerEvent>,
}

impl EngineHandle {
    /// Queues a command for the next audio block. Dropped with a warning if
    /// the queue is full; the audio thread is never blocked.
    pub fn send(&mut self, command: EngineCommand) {
        if self.command_producer.push(command).is_err() {
            log::warn!("engine command queue full, command dropped");
        }
    }

    /// Builds a new track on this thread and hands it to the engine.
    /// Returns the id the track will occupy.
    pub fn add_track(&mut self) -> usize {
        let shared = SharedTrackState::new();
        let track = Track::new(shared.clone(), self.sample_rate);
        let id = self.tracks.len();
        self.tracks.push(shared);
        self.send(EngineCommand::AddTrack(Box::new(track)));
        id
    }

    pub fn track_state(&self, id: usize) -> TrackState {
        self.tracks.get(id).map_or(TrackState::Idle, |t| t.get())
    }

    pub fn track_rms(&self, id: usize) -> f32 {
        self.tracks.get(id).map_or(0.0, |t| t.rms())
    }

    pub fn track_recorded_len(&self, id: usize) -> usize {
        self.tracks.get(id).map_or(0, |t| t.recorded_len())
    }

    pub fn track_position(&self, id: usize) -> f32 {
        self.tracks.get(id).map_or(0.0, |t| t.position())
    }

    /// Pulls up to `out.len()` monitor samples; returns how many were
    /// available. Non-blocking.
    pub fn drain_monitor(&mut self, out: &mut [f32]) -> usize {
        self.monitor_consumer.pop_slice(out)
    }
}

pub struct LoopSynchronizer {
    command_consumer: HeapConsumer<EngineCommand>,
    monitor_producer: HeapProducer<f32>,
    tracks: Vec<Track>,
    master: MasterLoopState,
    current_sample_position: i64,
    undo: UndoHistory,
    trigger: TriggerCaptureBuffer,
    trigger_event: Arc<TriggerEvent>,
    shared: SharedEngineState,
    sample_rate: f32,
    max_loop_samples: usize,
    trigger_low: f32,
    trigger_high: f32,
    input_monitoring: bool,
    lookback_scratch: Vec<f32>,
}

impl LoopSynchronizer {
    pub fn new(config: EngineConfig) -> (Self, EngineHandle) {
        let (command_producer, command_consumer) =
            HeapRb::<EngineCommand>::new(COMMAND_QUEUE_CAPACITY).split();
        let (monitor_producer, monitor_consumer) =
            HeapRb::<f32>::new(MONITOR_QUEUE_CAPACITY).split();

        let track_states: Vec<SharedTrackState> = (0..config.num_tracks)
            .map(|_| SharedTrackState::new())
            .collect();
        let tracks: Vec<Track> = track_states
            .iter()
            .map(|s| Track::new(s.clone(), config.sample_rate))
            .collect();

        let shared = SharedEngineState::new();
        let trigger_event = Arc::new(TriggerEvent::default());
        let max_loop_samples = ((config.sample_rate * config.max_loop_seconds) as usize).max(1);

        let engine = Self {
            command_consumer,
            monitor_producer,
            tracks,
            master: MasterLoopState::default(),
            current_sample_position: 0,
            undo: UndoHistory::default(),
            trigger: TriggerCaptureBuffer::new(config.sample_rate),
            trigger_event: trigger_event.clone(),
            shared: shared.clone(),
            sample_rate: config.sample_rate,
            max_loop_samples,
            trigger_low: config.trigger_low_threshold,
            trigger_high: config.trigger_high_threshold,
            input_monitoring: false,
            lookback_scratch: Vec::new(),
        };

        let handle = EngineHandle {
            command_producer,
            monitor_consumer,
            sample_rate: config.sample_rate,
            tracks: track_states,
            engine: shared,
            trigger_event,
        };

        (engine, handle)
    }

    /// Processes one audio block. Pending control commands take effect
    /// here, before the first sample, never mid-block.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        let start_time = Instant::now();
        self.handle_commands();

        self.trigger.write(input);
        if self
            .trigger
            .process_triggers(input, self.trigger_low, self.trigger_high)
            && !self.trigger_event.is_active()
        {
            self.trigger_event.set(self.trigger.armed_start_sample());
        }

        let num_samples = input.len().min(output.len());
        for i in 0..num_samples {
            let record_input = input[i];

            // Recording pass. A slave track is truncated the instant its
            // captured span reaches one master cycle; samples past that
            // boundary never land in the buffer.
            {
                let master = &self.master;
                for (id, track) in self.tracks.iter_mut().enumerate() {
                    if !track.is_recording {
                        continue;
                    }
                    if master.loop_length > 0
                        && master.master_track != Some(id)
                        && track.record_length >= master.loop_length
                    {
                        finalize_slave_recording(track, master);
                        continue;
                    }
                    let cap = track.record_capacity.max(1);
                    track.buffer[track.write_position] = record_input;
                    track.write_position = (track.write_position + 1) % cap;
                    track.record_length += 1;
                    track.accumulate_meter(record_input);
                }
            }

            // Playback pass: playing tracks are summed, per-track gain
            // only.
            let mut mix = 0.0f32;
            for track in self.tracks.iter_mut() {
                if !track.is_playing || track.length_in_samples == 0 {
                    continue;
                }
                let mut sample = track.buffer[track.read_position];
                for fx in track.effects.iter_mut() {
                    sample = fx.process(sample);
                }
                sample = track.autotune.process(sample);
                track.accumulate_meter(sample);
                if !track.muted {
                    mix += sample * track.gain;
                }
                track.read_position = (track.read_position + 1) % track.length_in_samples;
                track.publish_position();
            }

            if self.input_monitoring {
                mix += record_input;
            }
            output[i] = mix;
            // Visualization feed: newest samples drop when the UI lags.
            let _ = self.monitor_producer.push(mix);

            self.current_sample_position += 1;
            if self.master.loop_length > 0 {
                let master_playing = self
                    .master
                    .master_track
                    .and_then(|id| self.tracks.get(id))
                    .map_or(false, |t| t.is_playing);
                if master_playing {
                    self.master.read_position =
                        (self.master.read_position + 1) % self.master.loop_length;
                }
            }
        }

        for track in self.tracks.iter_mut() {
            track.publish_meters();
        }
        let input_peak = input.iter().fold(0.0f32, |max, &v| max.max(v.abs()));
        self.shared
            .input_peak
            .store((input_peak.clamp(0.0, 1.0) * PARAM_SCALER) as u32, Ordering::Relaxed);
        self.shared
            .current_sample
            .store(self.current_sample_position as u64, Ordering::Relaxed);
        if self.master.loop_length > 0 {
            self.shared.master_position.store(
                ((self.master.read_position as f32 / self.master.loop_length as f32)
                    * PARAM_SCALER) as u32,
                Ordering::Relaxed,
            );
        }
        if num_samples > 0 {
            let load_ratio =
                start_time.elapsed().as_secs_f32() / (num_samples as f32 / self.sample_rate);
            self.shared
                .cpu_load
                .store((load_ratio * 1000.0) as u32, Ordering::Relaxed);
        }
    }

    fn handle_commands(&mut self) {
        while let Some(command) = self.command_consumer.pop() {
            match command {
                EngineCommand::AddTrack(track) => self.tracks.push(*track),
                EngineCommand::StartRecording(id) => self.start_recording(id),
                EngineCommand::StartRecordingWithLookback(id) => {
                    self.start_recording_with_lookback(id)
                }
                EngineCommand::StopRecording(id) => self.stop_recording(id),
                EngineCommand::StartPlaying(id) => self.start_playing(id),
                EngineCommand::StopPlaying(id) => self.stop_playing(id),
                EngineCommand::StartAllPlayback => {
                    for id in 0..self.tracks.len() {
                        self.start_playing(id);
                    }
                }
                EngineCommand::ClearTrack(id) => {
                    if let Some(track) = self.tracks.get_mut(id) {
                        track.reset();
                    }
                }
                EngineCommand::AllClear => self.all_clear(),
                EngineCommand::Undo => {
                    let restored = self.undo_last_recording();
                    self.shared
                        .last_undo
                        .store(restored.map_or(-1, |id| id as i64), Ordering::Relaxed);
                }
                EngineCommand::SetTrackGain(id, gain) => {
                    if let Some(track) = self.tracks.get_mut(id) {
                        track.gain = gain.clamp(0.0, 4.0);
                    }
                }
                EngineCommand::ToggleTrackMute(id) => {
                    if let Some(track) = self.tracks.get_mut(id) {
                        track.muted = !track.muted;
                    }
                }
                EngineCommand::SetInputMonitoring(enabled) => {
                    self.input_monitoring = enabled;
                }
                EngineCommand::LoadEffect { track, kind } => {
                    let sample_rate = self.sample_rate;
                    if let Some(track) = self.tracks.get_mut(track) {
                        track.effects.push(kind.build(sample_rate));
                    }
                }
                EngineCommand::ClearEffects(id) => {
                    if let Some(track) = self.tracks.get_mut(id) {
                        track.effects.clear();
                    }
                }
                EngineCommand::SetEffectParameter {
                    track,
                    effect,
                    name,
                    value,
                } => {
                    if let Some(track) = self.tracks.get_mut(track) {
                        if let Some(fx) = track.effects.get_mut(effect) {
                            fx.set_parameter(&name, value);
                        }
                    }
                }
                EngineCommand::SetAutotune { track, enabled } => {
                    if let Some(track) = self.tracks.get_mut(track) {
                        track.autotune.set_enabled(enabled);
                    }
                }
                EngineCommand::SetAutotuneAmount { track, amount } => {
                    if let Some(track) = self.tracks.get_mut(track) {
                        track.autotune.set_amount(amount);
                    }
                }
                EngineCommand::SetTriggerThresholds { low, high } => {
                    self.trigger_low = low.max(0.0);
                    self.trigger_high = high.max(self.trigger_low);
                }
            }
        }
    }

    /// Begins a recording pass. The start reference is chosen in priority
    /// order: the master's current phase, then an armed trigger event, then
    /// position zero.
    fn start_recording(&mut self, id: usize) {
        let master_len = self.master.loop_length;
        let master_read = self.master.read_position;
        let current_sample = self.current_sample_position;
        let max_loop = self.max_loop_samples;

        let Some(track) = self.tracks.get_mut(id) else {
            return;
        };
        if track.is_recording {
            return;
        }
        self.undo.save(id, track);

        let capacity = if master_len > 0 { master_len } else { max_loop };
        track.begin_recording(capacity);

        if master_len > 0 {
            track.write_position = master_read % capacity;
            track.recording_start_phase = track.write_position;
            track.record_start_sample = current_sample;
        } else if self.trigger_event.is_active() {
            track.record_start_sample = self.trigger_event.start_sample();
        } else {
            track.record_start_sample = current_sample;
        }

        // This pass consumes any pending trigger context; a stale phrase
        // must never feed a later lookback.
        self.trigger_event.clear();
        self.trigger.disarm();
    }

    /// `start_recording` plus retroactive injection of the trigger
    /// buffer's captured span ahead of the write cursor. The span is read
    /// before `start_recording` consumes the trigger context, and it ends
    /// at the capture cursor — exactly where this block's normal recording
    /// picks up, so nothing is duplicated or lost in between.
    fn start_recording_with_lookback(&mut self, id: usize) {
        let Some(track) = self.tracks.get(id) else {
            return;
        };
        if track.is_recording {
            return;
        }

        let mut scratch = std::mem::take(&mut self.lookback_scratch);
        scratch.clear();
        self.trigger.read_lookback_into(&mut scratch);

        self.start_recording(id);

        let master_len = self.master.loop_length;
        let current_sample = self.current_sample_position;
        if let Some(track) = self.tracks.get_mut(id) {
            if track.is_recording && !scratch.is_empty() {
                let limit = track.record_capacity.max(1);
                let injected = scratch.len().min(limit);
                let tail = &scratch[scratch.len() - injected..];
                for (k, &sample) in tail.iter().enumerate() {
                    let pos = (track.write_position + limit - injected + k) % limit;
                    track.buffer[pos] = sample;
                }
                track.record_length += injected;
                track.recording_start_phase =
                    (track.recording_start_phase + limit - (injected % limit)) % limit;
                if master_len == 0 {
                    // The injected span ends where this pass begins, so the
                    // eventual master starts `injected` samples earlier.
                    track.record_start_sample = current_sample - injected as i64;
                }
            }
        }
        self.lookback_scratch = scratch;
    }

    fn stop_recording(&mut self, id: usize) {
        if self.master.loop_length == 0 {
            let Some(track) = self.tracks.get_mut(id) else {
                return;
            };
            if !track.is_recording {
                return;
            }
            track.is_recording = false;

            let cap = track.record_capacity.max(1);
            let len = track.record_length.min(cap);
            if len == 0 {
                // Degenerate recording: discarded, no master established.
                track.reset();
                return;
            }

            // Unwrap the ring so the loop's first sample sits at index 0.
            let start = (track.write_position + cap - (len % cap)) % cap;
            let mut aligned = Vec::with_capacity(len);
            if start + len <= cap {
                aligned.extend_from_slice(&track.buffer[start..start + len]);
            } else {
                aligned.extend_from_slice(&track.buffer[start..cap]);
                aligned.extend_from_slice(&track.buffer[..len - (cap - start)]);
            }
            track.buffer = aligned;
            track.length_in_samples = len;
            track.loop_multiplier = 1.0;
            track.read_position = 0;
            track.is_playing = true;
            track.shared.set(TrackState::Playing);
            track.shared.set_recorded_len(track.record_length);
            track.shared.set_loop_multiplier(1.0);

            self.master.master_track = Some(id);
            self.master.loop_length = len;
            self.master.start_sample = track.record_start_sample.max(0);
            self.master.read_position = 0;
            track.record_start_sample = self.master.start_sample;
            self.shared.master_len.store(len, Ordering::Relaxed);
        } else {
            let master = self.master;
            let Some(track) = self.tracks.get_mut(id) else {
                return;
            };
            if !track.is_recording {
                return;
            }
            if track.record_length == 0 {
                track.is_recording = false;
                track.reset();
                return;
            }
            finalize_slave_recording(track, &master);
        }
        // The finished take's audio is loop content now, not a phrase
        // waiting to trigger a lookback.
        self.trigger.disarm();
        self.trigger_event.clear();
        self.publish_max_multiplier();
    }

    fn undo_last_recording(&mut self) -> Option<usize> {
        let mut snapshot = self.undo.take()?;
        let id = snapshot.track_id;
        let track = self.tracks.get_mut(id)?;
        std::mem::swap(&mut track.buffer, &mut snapshot.audio);
        track.length_in_samples = snapshot.length_in_samples;
        track.record_length = snapshot.record_length;
        track.record_start_sample = snapshot.record_start_sample;
        track.loop_multiplier = snapshot.loop_multiplier;
        track.is_recording = false;
        track.is_playing = false;
        track.write_position = 0;
        track.read_position = 0;
        track.shared.set(TrackState::Idle);
        track.shared.set_recorded_len(snapshot.record_length);
        track.shared.set_loop_multiplier(snapshot.loop_multiplier);
        // The displaced buffer becomes the next snapshot's storage.
        self.undo.recycle(snapshot.audio);
        self.publish_max_multiplier();
        Some(id)
    }

    /// Starts playback phase-locked to whatever is already looping: the
    /// read cursor picks up the master's current phase, never zero while a
    /// master cycle is running.
    fn start_playing(&mut self, id: usize) {
        let master_len = self.master.loop_length;
        let master_read = self.master.read_position;
        let Some(track) = self.tracks.get_mut(id) else {
            return;
        };
        if track.is_recording || track.length_in_samples == 0 {
            return;
        }
        track.read_position = if master_len > 0 {
            master_read % track.length_in_samples
        } else {
            0
        };
        track.is_playing = true;
        track.shared.set(TrackState::Playing);
    }

    fn stop_playing(&mut self, id: usize) {
        let Some(track) = self.tracks.get_mut(id) else {
            return;
        };
        if track.is_recording {
            return;
        }
        track.is_playing = false;
        track.shared.set(TrackState::Idle);
    }

    fn all_clear(&mut self) {
        for track in self.tracks.iter_mut() {
            track.reset();
        }
        self.master = MasterLoopState::default();
        self.current_sample_position = 0;
        self.undo.clear();
        self.trigger.reset();
        self.trigger_event.clear();
        self.shared.master_len.store(0, Ordering::Relaxed);
        self.shared.master_position.store(0, Ordering::Relaxed);
        self.shared.current_sample.store(0, Ordering::Relaxed);
        self.shared
            .max_multiplier
            .store(PARAM_SCALER as u32, Ordering::Relaxed);
    }

    fn publish_max_multiplier(&self) {
        let max = self
            .tracks
            .iter()
            .filter(|t| t.length_in_samples > 0)
            .fold(1.0f32, |max, t| max.max(t.loop_multiplier));
        self.shared
            .max_multiplier
            .store((max * PARAM_SCALER) as u32, Ordering::Relaxed);
    }
}

/// Aligns a track that finished recording against an established master:
/// its playback span becomes exactly one master cycle and playback begins
/// at the master's current phase.
fn finalize_slave_recording(track: &mut Track, master: &MasterLoopState) {
    track.is_recording = false;
    let len = master.loop_length.max(1);
    track.buffer.resize(len, 0.0);
    track.length_in_samples = len;
    track.loop_multiplier = quantize_multiplier(track.record_length, len);
    // The buffer is physically time-aligned now; keep a single source of
    // truth for the start time.
    track.record_start_sample = master.start_sample;
    track.read_position = master.read_position % len;
    track.is_playing = true;
    track.shared.set(TrackState::Playing);
    track.shared.set_recorded_len(track.record_length);
    track.shared.set_loop_multiplier(track.loop_multiplier);
}

/// Ratio of a recorded span to the master cycle, quantized to ×N / ÷N.
fn quantize_multiplier(record_length: usize, master_length: usize) -> f32 {
    if record_length == 0 || master_length == 0 {
        return 1.0;
    }
    let ratio = record_length as f32 / master_length as f32;
    if ratio >= 1.0 {
        ratio.round().max(1.0)
    } else {
        1.0 / (1.0 / ratio).round().max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn make_engine(num_tracks: usize) -> (LoopSynchronizer, EngineHandle) {
        LoopSynchronizer::new(EngineConfig {
            sample_rate: 1000.0,
            num_tracks,
            max_loop_seconds: 1.0,
            trigger_low_threshold: 0.05,
            trigger_high_threshold: 0.3,
        })
    }

    fn process(engine: &mut LoopSynchronizer, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0; input.len()];
        engine.process_block(input, &mut output);
        output
    }

    fn record_master(engine: &mut LoopSynchronizer, handle: &mut EngineHandle, samples: &[f32]) {
        handle.send(EngineCommand::StartRecording(0));
        process(engine, samples);
        handle.send(EngineCommand::StopRecording(0));
        process(engine, &[]);
    }

    #[test]
    fn first_recording_establishes_master() {
        let (mut engine, mut handle) = make_engine(2);
        record_master(&mut engine, &mut handle, &vec![1.0; 100]);

        assert_eq!(handle.engine.master_loop_length(), 100);
        assert_eq!(handle.track_state(0), TrackState::Playing);
        assert_eq!(handle.track_recorded_len(0), 100);

        let out = process(&mut engine, &vec![0.0; 50]);
        assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn zero_length_recording_is_discarded() {
        let (mut engine, mut handle) = make_engine(1);
        handle.send(EngineCommand::StartRecording(0));
        handle.send(EngineCommand::StopRecording(0));
        process(&mut engine, &[]);
        assert_eq!(handle.engine.master_loop_length(), 0);
        assert_eq!(handle.track_state(0), TrackState::Idle);
    }

    #[test]
    fn slave_recording_truncates_at_master_boundary() {
        let (mut engine, mut handle) = make_engine(2);
        record_master(&mut engine, &mut handle, &vec![1.0; 100]);

        // Slave records a 200-sample block: 100 samples of 0.5 then 100 of
        // 0.9. Only the 0.5 segment may land in the track.
        handle.send(EngineCommand::StartRecording(1));
        let mut block = vec![0.5; 100];
        block.extend(std::iter::repeat(0.9).take(100));
        let out = process(&mut engine, &block);

        // First master cycle: only the master is audible.
        for &s in &out[..100] {
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-6);
        }
        // The slave auto-completed at the boundary and plays in phase.
        for &s in &out[100..] {
            assert_abs_diff_eq!(s, 1.5, epsilon = 1e-6);
        }
        assert_eq!(handle.track_recorded_len(1), 100);
        assert!(engine.tracks[1].buffer.iter().all(|&s| s != 0.9));

        // Next cycle from sample 0 sums master and slave: 1.0 + 0.5.
        let next = process(&mut engine, &vec![0.0; 100]);
        assert_abs_diff_eq!(next[0], 1.5, epsilon = 1e-6);
    }

    #[test]
    fn slave_alignment_fixes_length_to_master() {
        let (mut engine, mut handle) = make_engine(2);
        record_master(&mut engine, &mut handle, &vec![1.0; 100]);

        handle.send(EngineCommand::StartRecording(1));
        process(&mut engine, &vec![0.2; 60]);
        handle.send(EngineCommand::StopRecording(1));
        process(&mut engine, &[]);

        assert_eq!(engine.tracks[1].length_in_samples, 100);
        assert_eq!(engine.tracks[1].record_length, 60);
        assert_abs_diff_eq!(engine.tracks[1].loop_multiplier, 0.5, epsilon = 1e-6);
        // Master length is untouched by any later recording.
        assert_eq!(handle.engine.master_loop_length(), 100);
    }

    #[test]
    fn master_length_invariant_until_all_clear() {
        let (mut engine, mut handle) = make_engine(3);
        record_master(&mut engine, &mut handle, &vec![1.0; 80]);

        for id in [1usize, 2] {
            handle.send(EngineCommand::StartRecording(id));
            process(&mut engine, &vec![0.3; 200]);
            handle.send(EngineCommand::StopRecording(id));
            process(&mut engine, &[]);
            assert_eq!(handle.engine.master_loop_length(), 80);
        }

        handle.send(EngineCommand::AllClear);
        process(&mut engine, &[]);
        assert_eq!(handle.engine.master_loop_length(), 0);
        assert_eq!(handle.engine.current_sample_position(), 0);
    }

    #[test]
    fn undo_restores_pre_recording_buffer_once() {
        let (mut engine, mut handle) = make_engine(1);
        record_master(&mut engine, &mut handle, &vec![1.0; 100]);

        // Re-record over the master track, then undo.
        handle.send(EngineCommand::StartRecording(0));
        process(&mut engine, &vec![0.2; 50]);
        handle.send(EngineCommand::StopRecording(0));
        process(&mut engine, &[]);
        assert_eq!(engine.tracks[0].record_length, 50);

        handle.send(EngineCommand::Undo);
        process(&mut engine, &[]);
        assert_eq!(handle.engine.last_undo(), 0);
        assert_eq!(engine.tracks[0].length_in_samples, 100);
        assert!(engine.tracks[0].buffer.iter().all(|&s| (s - 1.0).abs() < 1e-6));

        // The slot was consumed; a second undo reports nothing.
        handle.send(EngineCommand::Undo);
        process(&mut engine, &[]);
        assert_eq!(handle.engine.last_undo(), -1);
    }

    #[test]
    fn start_playing_locks_to_master_phase() {
        let (mut engine, mut handle) = make_engine(2);
        let ramp: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        record_master(&mut engine, &mut handle, &ramp);

        // Record the same ramp onto track 1, in phase with the master.
        handle.send(EngineCommand::StartRecording(1));
        process(&mut engine, &ramp);
        handle.send(EngineCommand::StopRecording(1));
        process(&mut engine, &[]);

        handle.send(EngineCommand::StopPlaying(1));
        process(&mut engine, &vec![0.0; 30]);

        handle.send(EngineCommand::StartPlaying(1));
        let out = process(&mut engine, &[0.0]);
        let phase = engine.master_phase_for_test();
        // One sample was consumed, so the sample just played was phase - 1.
        let played = (phase + 99) % 100;
        assert_abs_diff_eq!(out[0], 2.0 * ramp[played], epsilon = 1e-5);
    }

    #[test]
    fn lookback_extends_first_recording_backward() {
        let (mut engine, mut handle) = make_engine(1);

        // Arm the trigger with 40 soft pre-roll samples, confirm with 20
        // loud ones.
        process(&mut engine, &vec![0.1; 40]);
        process(&mut engine, &vec![0.5; 20]);
        assert!(handle.trigger_event.is_active());

        handle.send(EngineCommand::StartRecordingWithLookback(0));
        process(&mut engine, &vec![0.9; 10]);
        handle.send(EngineCommand::StopRecording(0));
        process(&mut engine, &[]);

        // 60 injected samples — the soft pre-roll AND the confirming
        // onset — plus 10 recorded normally; the loop is gapless.
        assert_eq!(handle.engine.master_loop_length(), 70);
        let track = &engine.tracks[0];
        assert!(track.buffer[..40].iter().all(|&s| (s - 0.1).abs() < 1e-6));
        assert!(track.buffer[40..60].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(track.buffer[60..70].iter().all(|&s| (s - 0.9).abs() < 1e-6));
    }

    #[test]
    fn lookback_shortens_remaining_slave_span() {
        let (mut engine, mut handle) = make_engine(2);
        record_master(&mut engine, &mut handle, &vec![1.0; 100]);

        // Arm and confirm a trigger while the master loops.
        process(&mut engine, &vec![0.1; 30]);
        process(&mut engine, &vec![0.5; 20]);

        handle.send(EngineCommand::StartRecordingWithLookback(1));
        process(&mut engine, &[]);
        // The 50 captured samples already count toward the master cycle.
        assert_eq!(engine.tracks[1].record_length, 50);

        process(&mut engine, &vec![0.2; 100]);
        // Completed after 50 more samples, not 100, with the captured
        // phrase sitting in front of the normally-recorded span.
        assert!(!engine.tracks[1].is_recording);
        assert_eq!(engine.tracks[1].record_length, 100);
        assert_eq!(engine.tracks[1].length_in_samples, 100);
        let track = &engine.tracks[1];
        assert!(track.buffer[..30].iter().all(|&s| (s - 0.1).abs() < 1e-6));
        assert!(track.buffer[30..50].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(track.buffer[50..100].iter().all(|&s| (s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn recording_consumes_pending_trigger_context() {
        let (mut engine, mut handle) = make_engine(2);
        // The loud first take arms and confirms the trigger on its own
        // input; finishing the take must consume that context.
        record_master(&mut engine, &mut handle, &vec![1.0; 100]);
        assert!(!handle.trigger_event.is_active());
        assert!(!engine.trigger.is_armed());

        // With no fresh phrase, a lookback recording injects nothing from
        // the earlier take.
        handle.send(EngineCommand::StartRecordingWithLookback(1));
        process(&mut engine, &[]);
        assert_eq!(engine.tracks[1].record_length, 0);
    }

    #[test]
    fn monitor_queue_carries_the_mix() {
        let (mut engine, mut handle) = make_engine(1);
        record_master(&mut engine, &mut handle, &vec![0.4; 50]);

        let out = process(&mut engine, &vec![0.0; 50]);
        let mut drained = vec![0.0f32; 4096];
        let n = handle.drain_monitor(&mut drained);
        assert!(n >= 50);
        // The tail of the monitor stream is the block just mixed.
        assert_abs_diff_eq!(drained[n - 1], out[49], epsilon = 1e-6);
    }

    #[test]
    fn added_track_joins_the_pool_and_records() {
        let (mut engine, mut handle) = make_engine(1);
        record_master(&mut engine, &mut handle, &vec![1.0; 100]);

        let id = handle.add_track();
        assert_eq!(id, 1);
        handle.send(EngineCommand::StartRecording(id));
        process(&mut engine, &vec![0.5; 100]);
        handle.send(EngineCommand::StopRecording(id));
        process(&mut engine, &[]);
        assert_eq!(handle.track_state(id), TrackState::Playing);
        assert_eq!(handle.track_recorded_len(id), 100);
    }

    #[test]
    fn invalid_track_ids_are_no_ops() {
        let (mut engine, mut handle) = make_engine(1);
        handle.send(EngineCommand::StartRecording(99));
        handle.send(EngineCommand::StopRecording(99));
        handle.send(EngineCommand::StartPlaying(99));
        handle.send(EngineCommand::ClearTrack(99));
        process(&mut engine, &vec![0.0; 8]);
        assert_eq!(handle.engine.master_loop_length(), 0);
        assert_eq!(handle.track_state(0), TrackState::Idle);
    }

    #[test]
    fn multiplier_quantizes_to_divisions_and_multiples() {
        assert_abs_diff_eq!(quantize_multiplier(60, 100), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(quantize_multiplier(100, 100), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(quantize_multiplier(24, 100), 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(quantize_multiplier(210, 100), 2.0, epsilon = 1e-6);
    }

    impl LoopSynchronizer {
        fn master_phase_for_test(&self) -> usize {
            self.master.read_position
        }
    }
}
