// src/fx_components/autotune.rs

//! Real-time pitch correction: a YIN pitch detector feeding a dual-head
//! delay-line pitch shifter.

use crate::ring::SampleRing;
use std::f32::consts::PI;

/// Minimum analysis window length in seconds. The effective window is
/// widened when needed so half of it (the lag search range) still spans a
/// full period of `MIN_FREQ_HZ`, bounded to [256, 2048] samples.
const WINDOW_SECONDS: f32 = 0.025;
/// Windows with RMS below this are treated as silence.
const RMS_FLOOR: f32 = 0.01;
/// Decay applied to the last estimate on silent or implausible windows.
const PITCH_DECAY: f32 = 0.95;
/// Normalized-difference threshold for lag acceptance.
const YIN_THRESHOLD: f32 = 0.15;
const MIN_FREQ_HZ: f32 = 50.0;
const MAX_FREQ_HZ: f32 = 2000.0;
/// Exponential smoothing: 70% previous estimate, 30% new.
const SMOOTHING_RETAIN: f32 = 0.7;

/// Fundamental-frequency estimator over a ring-buffered input window.
pub struct PitchDetector {
    sample_rate: f32,
    ring: SampleRing,
    window: Vec<f32>,
    difference: Vec<f32>,
    cumulative: Vec<f32>,
    smoothed_pitch: f32,
}

impl PitchDetector {
    pub fn new(sample_rate: f32) -> Self {
        let max_window = 2048;
        Self {
            sample_rate,
            ring: SampleRing::with_capacity(max_window * 2),
            window: Vec::with_capacity(max_window),
            difference: vec![0.0; max_window / 2],
            cumulative: vec![0.0; max_window / 2],
            smoothed_pitch: 0.0,
        }
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.ring.push(sample);
    }

    pub fn current_pitch(&self) -> f32 {
        self.smoothed_pitch
    }

    /// Runs one analysis pass over the most recent window and returns the
    /// smoothed pitch estimate in Hz (0.0 while nothing has been detected).
    pub fn detect(&mut self) -> f32 {
        let low_freq_window = (2.0 * self.sample_rate / MIN_FREQ_HZ) as usize + 2;
        let window_len = ((self.sample_rate * WINDOW_SECONDS) as usize)
            .max(low_freq_window)
            .clamp(256, 2048);
        self.window.clear();
        self.ring.read_last_into(window_len, &mut self.window);

        let rms = (self.window.iter().map(|s| s * s).sum::<f32>() / window_len as f32).sqrt();
        if rms < RMS_FLOOR {
            return self.decay();
        }

        let max_lag = window_len / 2;
        self.difference_function(max_lag);
        self.cumulative_mean_normalized(max_lag);

        let min_lag = ((self.sample_rate / MAX_FREQ_HZ) as usize).max(2);
        let Some(lag) = self.first_lag_below_threshold(min_lag, max_lag) else {
            return self.decay();
        };
        let refined = self.parabolic_interpolation(lag, max_lag);
        let frequency = self.sample_rate / refined;

        if !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&frequency) {
            return self.decay();
        }

        self.smoothed_pitch = if self.smoothed_pitch > 0.0 {
            SMOOTHING_RETAIN * self.smoothed_pitch + (1.0 - SMOOTHING_RETAIN) * frequency
        } else {
            frequency
        };
        self.smoothed_pitch
    }

    fn decay(&mut self) -> f32 {
        self.smoothed_pitch *= PITCH_DECAY;
        if self.smoothed_pitch < 1.0 {
            self.smoothed_pitch = 0.0;
        }
        self.smoothed_pitch
    }

    fn difference_function(&mut self, max_lag: usize) {
        for tau in 1..max_lag {
            let mut sum = 0.0f32;
            for j in 0..max_lag {
                let diff = self.window[j] - self.window[j + tau];
                sum += diff * diff;
            }
            self.difference[tau] = sum;
        }
    }

    fn cumulative_mean_normalized(&mut self, max_lag: usize) {
        self.cumulative[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..max_lag {
            running_sum += self.difference[tau];
            self.cumulative[tau] = if running_sum > 0.0 {
                self.difference[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    /// First lag whose normalized difference drops below the threshold,
    /// walking forward while the next lag still improves on it.
    fn first_lag_below_threshold(&self, min_lag: usize, max_lag: usize) -> Option<usize> {
        let mut tau = min_lag;
        while tau < max_lag {
            if self.cumulative[tau] < YIN_THRESHOLD {
                while tau + 1 < max_lag && self.cumulative[tau + 1] < self.cumulative[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }
        None
    }

    fn parabolic_interpolation(&self, tau: usize, max_lag: usize) -> f32 {
        if tau == 0 || tau + 1 >= max_lag {
            return tau as f32;
        }
        let s0 = self.cumulative[tau - 1];
        let s1 = self.cumulative[tau];
        let s2 = self.cumulative[tau + 1];
        let denom = 2.0 * (2.0 * s1 - s0 - s2);
        let adjustment = (s2 - s0) / denom;
        if adjustment.is_finite() {
            tau as f32 + adjustment
        } else {
            tau as f32
        }
    }
}

/// Length of the shifter's delay line in seconds.
const SHIFT_BUFFER_SECONDS: f32 = 0.05;

/// Pitch-ratio resampler: two read heads advancing at `ratio` through a
/// short delay line, cross-faded with a raised-cosine window over half the
/// buffer. When a crossfade completes, the silent head is re-synced one
/// half-buffer ahead of the audible one.
pub struct PitchShifter {
    buffer: Vec<f32>,
    write_pos: usize,
    head_a: f32,
    head_b: f32,
    fade: f32,
    ratio: f32,
}

impl PitchShifter {
    pub fn new(sample_rate: f32) -> Self {
        let len = ((sample_rate * SHIFT_BUFFER_SECONDS) as usize).max(64);
        Self {
            buffer: vec![0.0; len],
            write_pos: 0,
            head_a: (len / 2) as f32,
            head_b: 0.0,
            fade: 0.0,
            ratio: 1.0,
        }
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.clamp(0.5, 2.0);
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    #[inline]
    fn read(&self, pos: f32) -> f32 {
        let len = self.buffer.len();
        let index0 = pos.floor() as usize % len;
        let index1 = (index0 + 1) % len;
        let fraction = pos.fract();
        let s0 = self.buffer[index0];
        let s1 = self.buffer[index1];
        s0 + fraction * (s1 - s0)
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let len = self.buffer.len() as f32;
        let half = len / 2.0;

        self.buffer[self.write_pos] = input;

        let gain_a = 0.5 * (1.0 + (PI * self.fade).cos());
        let gain_b = 1.0 - gain_a;
        let output = self.read(self.head_a) * gain_a + self.read(self.head_b) * gain_b;

        self.head_a = (self.head_a + self.ratio) % len;
        self.head_b = (self.head_b + self.ratio) % len;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();

        // The crossfade tracks head drift relative to the write cursor, so
        // at ratio 1.0 the heads hold still and the output stays a clean
        // constant delay.
        self.fade += (self.ratio - 1.0).abs() / half;
        if self.fade >= 1.0 {
            self.fade = 0.0;
            self.head_a = (self.head_b + half) % len;
            std::mem::swap(&mut self.head_a, &mut self.head_b);
        }

        output
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.head_a = (self.buffer.len() / 2) as f32;
        self.head_b = 0.0;
        self.fade = 0.0;
    }
}

/// How often the corrector re-runs pitch analysis, in samples.
const DETECT_INTERVAL: usize = 256;

/// Per-track pitch corrector: snaps the detected pitch to the nearest
/// semitone, blended by `amount`.
pub struct AutoTune {
    detector: PitchDetector,
    shifter: PitchShifter,
    enabled: bool,
    amount: f32,
    samples_until_detect: usize,
    smoothed_ratio: f32,
}

impl AutoTune {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            detector: PitchDetector::new(sample_rate),
            shifter: PitchShifter::new(sample_rate),
            enabled: false,
            amount: 1.0,
            samples_until_detect: DETECT_INTERVAL,
            smoothed_ratio: 1.0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.shifter.reset();
            self.smoothed_ratio = 1.0;
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_amount(&mut self, amount: f32) {
        self.amount = amount.clamp(0.0, 1.0);
    }

    pub fn detected_pitch(&self) -> f32 {
        self.detector.current_pitch()
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.detector.push(input);
        if !self.enabled {
            return input;
        }

        self.samples_until_detect -= 1;
        if self.samples_until_detect == 0 {
            self.samples_until_detect = DETECT_INTERVAL;
            let pitch = self.detector.detect();
            if pitch > 0.0 {
                let target = nearest_semitone_hz(pitch);
                let raw_ratio = (target / pitch).clamp(0.5, 2.0);
                let desired = 1.0 + (raw_ratio - 1.0) * self.amount;
                self.smoothed_ratio = 0.7 * self.smoothed_ratio + 0.3 * desired;
                self.shifter.set_ratio(self.smoothed_ratio);
            }
        }

        self.shifter.process(input)
    }
}

/// Frequency of the equal-tempered semitone nearest to `freq`.
fn nearest_semitone_hz(freq: f32) -> f32 {
    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    440.0 * 2.0f32.powf((midi.round() - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: f32 = 48000.0;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * freq * n as f32 / SR).sin() * 0.5)
            .collect()
    }

    #[test]
    fn detector_converges_on_sine() {
        let mut det = PitchDetector::new(SR);
        for &s in &sine(440.0, 4096) {
            det.push(s);
        }
        let mut estimate = 0.0;
        for _ in 0..30 {
            estimate = det.detect();
        }
        assert!(
            (estimate - 440.0).abs() / 440.0 < 0.02,
            "estimate {estimate} not within 2% of 440 Hz"
        );
    }

    #[test]
    fn detector_converges_at_the_low_end_of_the_range() {
        let mut det = PitchDetector::new(SR);
        for &s in &sine(60.0, 8192) {
            det.push(s);
        }
        let mut estimate = 0.0;
        for _ in 0..30 {
            estimate = det.detect();
        }
        assert!(
            (estimate - 60.0).abs() / 60.0 < 0.02,
            "estimate {estimate} not within 2% of 60 Hz"
        );
    }

    #[test]
    fn detector_decays_on_silence() {
        let mut det = PitchDetector::new(SR);
        for &s in &sine(440.0, 4096) {
            det.push(s);
        }
        for _ in 0..30 {
            det.detect();
        }
        let settled = det.current_pitch();
        assert!(settled > 0.0);

        for _ in 0..4096 {
            det.push(0.0);
        }
        let mut previous = settled;
        for _ in 0..50 {
            let next = det.detect();
            assert!(next <= previous);
            previous = next;
        }
        assert!(previous < settled * 0.2);
    }

    #[test]
    fn detector_rejects_out_of_range_by_decay() {
        let mut det = PitchDetector::new(SR);
        // 10 Hz is below the plausible vocal range; the window cannot hold
        // a full period, so any estimate must be rejected.
        for &s in &sine(10.0, 4096) {
            det.push(s);
        }
        for _ in 0..20 {
            det.detect();
        }
        assert_eq!(det.current_pitch(), 0.0);
    }

    #[test]
    fn shifter_is_transparent_at_unity_ratio() {
        let mut shifter = PitchShifter::new(SR);
        shifter.set_ratio(1.0);
        let input = sine(200.0, 8000);
        let half = (SR * SHIFT_BUFFER_SECONDS) as usize / 2;
        let mut output = Vec::with_capacity(input.len());
        for &s in &input {
            output.push(shifter.process(s));
        }
        // After warmup the output is the input delayed by half the buffer.
        for n in (half * 2)..input.len() {
            assert_abs_diff_eq!(output[n], input[n - half], epsilon = 1e-3);
        }
    }

    #[test]
    fn shifter_doubles_frequency_at_ratio_two() {
        let mut shifter = PitchShifter::new(SR);
        shifter.set_ratio(2.0);
        // 200 Hz has a 240-sample period; half the shift buffer (1200
        // samples) is an exact multiple, so crossfaded heads stay coherent.
        let input = sine(200.0, 12000);
        let mut output = Vec::with_capacity(input.len());
        for &s in &input {
            output.push(shifter.process(s));
        }
        let span = &output[4800..9600];
        let mut rising = 0;
        for pair in span.windows(2) {
            if pair[0] <= 0.0 && pair[1] > 0.0 {
                rising += 1;
            }
        }
        // 400 Hz over 0.1 s is 40 cycles.
        assert!(
            (34..=46).contains(&rising),
            "expected ~40 rising zero crossings, got {rising}"
        );
    }

    #[test]
    fn nearest_semitone_snaps_up_and_down() {
        assert_abs_diff_eq!(nearest_semitone_hz(440.0), 440.0, epsilon = 1e-3);
        assert_abs_diff_eq!(nearest_semitone_hz(450.0), 440.0, epsilon = 1e-2);
        assert_abs_diff_eq!(nearest_semitone_hz(458.0), 466.16, epsilon = 0.1);
    }

    #[test]
    fn autotune_passes_through_when_disabled() {
        let mut tuner = AutoTune::new(SR);
        assert!(!tuner.is_enabled());
        for &s in &sine(300.0, 512) {
            assert_eq!(tuner.process(s), s);
        }
    }
}
