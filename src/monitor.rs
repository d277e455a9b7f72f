// src/monitor.rs

//! Control-thread view of the output mix.
//!
//! The audio thread pushes every mixed sample into a bounded queue and never
//! waits on it; when the control thread falls behind, the newest samples are
//! simply dropped. `MonitorBuffer` drains that queue into a rolling window
//! sized for display and level readouts.

use crate::engine::EngineHandle;

const DEFAULT_WINDOW: usize = 2048;
const DRAIN_CHUNK: usize = 1024;

pub struct MonitorBuffer {
    window: Vec<f32>,
    scratch: Vec<f32>,
}

impl MonitorBuffer {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window_len: usize) -> Self {
        Self {
            window: vec![0.0; window_len.max(1)],
            scratch: vec![0.0; DRAIN_CHUNK],
        }
    }

    /// Drains everything currently queued on the handle into the rolling
    /// window. Returns how many samples arrived.
    pub fn update(&mut self, handle: &mut EngineHandle) -> usize {
        let mut scratch = std::mem::take(&mut self.scratch);
        let mut total = 0;
        loop {
            let n = handle.drain_monitor(&mut scratch);
            if n == 0 {
                break;
            }
            self.push_samples(&scratch[..n]);
            total += n;
        }
        self.scratch = scratch;
        total
    }

    fn push_samples(&mut self, samples: &[f32]) {
        let len = self.window.len();
        if samples.len() >= len {
            self.window.copy_from_slice(&samples[samples.len() - len..]);
        } else {
            self.window.rotate_left(samples.len());
            let tail = len - samples.len();
            self.window[tail..].copy_from_slice(samples);
        }
    }

    /// Oldest-to-newest view of the most recent samples.
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    pub fn peak(&self) -> f32 {
        self.window.iter().fold(0.0f32, |max, &v| max.max(v.abs()))
    }

    pub fn rms(&self) -> f32 {
        let sum: f32 = self.window.iter().map(|&v| v * v).sum();
        (sum / self.window.len() as f32).sqrt()
    }
}

impl Default for MonitorBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_window_keeps_newest_samples() {
        let mut monitor = MonitorBuffer::with_window(4);
        monitor.push_samples(&[1.0, 2.0]);
        assert_eq!(monitor.window(), &[0.0, 0.0, 1.0, 2.0]);
        monitor.push_samples(&[3.0, 4.0, 5.0]);
        assert_eq!(monitor.window(), &[2.0, 3.0, 4.0, 5.0]);
        // A burst longer than the window keeps only its tail.
        monitor.push_samples(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(monitor.window(), &[0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn levels_reflect_window_contents() {
        let mut monitor = MonitorBuffer::with_window(4);
        monitor.push_samples(&[0.5, -0.5, 0.5, -0.5]);
        assert!((monitor.peak() - 0.5).abs() < 1e-6);
        assert!((monitor.rms() - 0.5).abs() < 1e-6);
    }
}
