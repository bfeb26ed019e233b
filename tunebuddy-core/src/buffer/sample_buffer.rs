use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default capacity, in seconds of audio, of a fresh recording.
pub const DEFAULT_LENGTH_SECS: f64 = 60.0;

struct Samples {
    data: Vec<f32>,
    /// One past the last sample ever written.
    written: usize,
}

/// Growable, time-indexed store of a whole recording.
///
/// The capture callback writes spans at their start time; readers copy spans
/// back out. Unwritten gaps before `written` read as silence.
pub struct SampleBuffer {
    sample_rate: u32,
    inner: Mutex<Samples>,
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SampleBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("capacity", &inner.data.len())
            .field("written", &inner.written)
            .finish()
    }
}

impl SampleBuffer {
    /// Creates a buffer with room for [`DEFAULT_LENGTH_SECS`] of audio.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_length(sample_rate, DEFAULT_LENGTH_SECS)
    }

    /// Creates a buffer with room for `seconds` of audio.
    pub fn with_length(sample_rate: u32, seconds: f64) -> Self {
        let capacity = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self {
            sample_rate,
            inner: Mutex::new(Samples {
                data: vec![0.0; capacity.max(1)],
                written: 0,
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sample index of a time in seconds (negative times map to 0).
    pub fn time_to_index(&self, time: f64) -> usize {
        (time * self.sample_rate as f64).round().max(0.0) as usize
    }

    /// Writes `samples` starting at `at_time`, overwriting what was there.
    /// Capacity at least doubles whenever the span would not fit.
    pub fn write(&self, samples: &[f32], at_time: f64) {
        let start = self.time_to_index(at_time);
        let end = start + samples.len();

        let mut inner = self.lock();
        if end > inner.data.len() {
            let mut capacity = inner.data.len().max(1);
            while capacity < end {
                capacity *= 2;
            }
            inner.data.resize(capacity, 0.0);
        }
        inner.data[start..end].copy_from_slice(samples);
        inner.written = inner.written.max(end);
    }

    /// Copies out the span `[start_time, end_time)`.
    ///
    /// The span is cut at the end of written data; reading entirely past it
    /// returns an empty vector.
    pub fn read(&self, start_time: f64, end_time: f64) -> Vec<f32> {
        let start = self.time_to_index(start_time);
        let inner = self.lock();
        let end = self.time_to_index(end_time).min(inner.written);
        if start >= end {
            return Vec::new();
        }
        inner.data[start..end].to_vec()
    }

    /// Seconds of audio written so far.
    pub fn duration(&self) -> f64 {
        self.lock().written as f64 / self.sample_rate as f64
    }

    /// Forgets all written audio, keeping the allocation.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.data.fill(0.0);
        inner.written = 0;
    }

    fn lock(&self) -> MutexGuard<'_, Samples> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_span() {
        let buffer = SampleBuffer::with_length(10, 1.0);
        buffer.write(&[1.0, 2.0, 3.0, 4.0], 0.0);
        assert_eq!(buffer.read(0.1, 0.3), vec![2.0, 3.0]);
        assert_eq!(buffer.read(0.0, 10.0), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn reading_past_end_is_empty() {
        let buffer = SampleBuffer::with_length(10, 1.0);
        buffer.write(&[1.0, 2.0], 0.0);
        assert!(buffer.read(0.5, 0.9).is_empty());
        assert!(buffer.read(0.3, 0.1).is_empty());
    }

    #[test]
    fn grows_past_capacity() {
        let buffer = SampleBuffer::with_length(10, 0.5);
        let span: Vec<f32> = (0..20).map(|i| i as f32).collect();
        buffer.write(&span, 0.4);
        assert_eq!(buffer.read(0.4, 2.4), span);
        assert!((buffer.duration() - 2.4).abs() < 1e-9);
        // The gap before the span reads as silence.
        assert_eq!(buffer.read(0.0, 0.4), vec![0.0; 4]);
    }

    #[test]
    fn overwrites_by_time() {
        let buffer = SampleBuffer::with_length(10, 1.0);
        buffer.write(&[1.0; 5], 0.0);
        buffer.write(&[9.0, 9.0], 0.2);
        assert_eq!(buffer.read(0.0, 0.5), vec![1.0, 1.0, 9.0, 9.0, 1.0]);
    }

    #[test]
    fn clear_resets_written_length() {
        let buffer = SampleBuffer::with_length(10, 1.0);
        buffer.write(&[1.0; 5], 0.0);
        buffer.clear();
        assert!(buffer.read(0.0, 1.0).is_empty());
        assert_eq!(buffer.duration(), 0.0);
    }
}
