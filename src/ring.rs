// src/ring.rs

//! A fixed-capacity circular sample buffer.
//!
//! All wraparound arithmetic in the engine goes through this type so the
//! at-most-two-chunk copy logic lives in exactly one place.

/// Fixed-capacity ring of `f32` samples. Writing past the end overwrites
/// the oldest samples; the capacity never changes after construction.
pub struct SampleRing {
    data: Vec<f32>,
    write_pos: usize,
}

impl SampleRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.data[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.data.len();
    }

    pub fn write(&mut self, samples: &[f32]) {
        for &s in samples {
            self.push(s);
        }
    }

    /// Index of the sample written `offset` blocks-of-one ago. `offset = 0`
    /// is the slot the next push will land in.
    pub fn index_back(&self, offset: usize) -> usize {
        let cap = self.data.len();
        (self.write_pos + cap - (offset % cap)) % cap
    }

    /// Number of slots from `start` up to (not including) the write cursor,
    /// walking forward with wraparound.
    pub fn span_from(&self, start: usize) -> usize {
        let cap = self.data.len();
        (self.write_pos + cap - (start % cap)) % cap
    }

    /// Copies `len` samples starting at ring index `start` into `out`,
    /// handling wraparound in up to two contiguous chunks.
    pub fn read_into(&self, start: usize, len: usize, out: &mut Vec<f32>) {
        let cap = self.data.len();
        let len = len.min(cap);
        let start = start % cap;
        let first = len.min(cap - start);
        out.extend_from_slice(&self.data[start..start + first]);
        if first < len {
            out.extend_from_slice(&self.data[..len - first]);
        }
    }

    /// Copies the `len` most recent samples (ending at the write cursor).
    pub fn read_last_into(&self, len: usize, out: &mut Vec<f32>) {
        let len = len.min(self.data.len());
        self.read_into(self.index_back(len), len, out);
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_spans_wraparound_in_two_chunks() {
        let mut ring = SampleRing::with_capacity(8);
        for i in 0..10 {
            ring.push(i as f32);
        }
        // Oldest surviving sample is 2.0, newest is 9.0.
        let mut out = Vec::new();
        ring.read_last_into(8, &mut out);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn span_from_tracks_distance_to_cursor() {
        let mut ring = SampleRing::with_capacity(4);
        ring.write(&[1.0, 2.0, 3.0]);
        assert_eq!(ring.span_from(0), 3);
        ring.write(&[4.0, 5.0]); // cursor wraps to 1
        assert_eq!(ring.span_from(3), 2);
    }

    #[test]
    fn read_len_is_bounded_by_capacity() {
        let mut ring = SampleRing::with_capacity(4);
        ring.write(&[1.0, 2.0, 3.0, 4.0]);
        let mut out = Vec::new();
        ring.read_last_into(100, &mut out);
        assert_eq!(out.len(), 4);
    }
}
