use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::pitch::Pitch;

/// Default capacity, in seconds, of a fresh pitch stream.
pub const DEFAULT_LENGTH_SECS: f64 = 60.0;

/// Fraction of capacity past which a write grows the store.
const GROW_AT: f64 = 0.8;

/// Slack absorbing float error when a pitch time maps back to its slot.
const INDEX_EPSILON: f64 = 1e-6;

/// Time-addressable store of estimated pitches, one slot per audio hop.
///
/// Slots that were never written read as "no data" and are skipped by
/// range reads.
pub struct PitchStream {
    frames_per_sec: f64,
    slots: Mutex<Vec<Option<Pitch>>>,
}

impl std::fmt::Debug for PitchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchStream")
            .field("frames_per_sec", &self.frames_per_sec)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl PitchStream {
    /// A stream of pitches produced every `hop_size` samples.
    pub fn new(sample_rate: u32, hop_size: usize) -> Self {
        let frames_per_sec = sample_rate as f64 / hop_size.max(1) as f64;
        let capacity = (DEFAULT_LENGTH_SECS * frames_per_sec).ceil() as usize;
        Self {
            frames_per_sec,
            slots: Mutex::new(vec![None; capacity.max(1)]),
        }
    }

    /// Slot index of a time: `floor(time * sample_rate / hop_size)`.
    pub fn time_to_index(&self, time: f64) -> usize {
        (time * self.frames_per_sec + INDEX_EPSILON).floor().max(0.0) as usize
    }

    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// Writes consecutive pitches starting at `at_time`, or at the first
    /// pitch's own time when `None`. Grows to at least twice the capacity
    /// once a write reaches past 80% of it.
    pub fn write<I>(&self, pitches: I, at_time: Option<f64>)
    where
        I: IntoIterator<Item = Pitch>,
    {
        let pitches: Vec<Pitch> = pitches.into_iter().collect();
        let Some(first) = pitches.first() else {
            return;
        };
        let start = self.time_to_index(at_time.unwrap_or(first.time));
        let end = start + pitches.len();

        let mut slots = self.lock();
        if end as f64 > slots.len() as f64 * GROW_AT {
            let mut capacity = slots.len().max(1);
            while end as f64 > capacity as f64 * GROW_AT {
                capacity *= 2;
            }
            slots.resize(capacity, None);
        }
        for (slot, pitch) in slots[start..end].iter_mut().zip(pitches) {
            *slot = Some(pitch);
        }
    }

    /// Written pitches in `[start_time, end_time)`, in time order.
    pub fn read(&self, start_time: f64, end_time: f64) -> Vec<Pitch> {
        let start = self.time_to_index(start_time);
        let slots = self.lock();
        let end = self.time_to_index(end_time).min(slots.len());
        if start >= end {
            return Vec::new();
        }
        slots[start..end].iter().flatten().cloned().collect()
    }

    /// The pitch in the slot covering `time`, if one was written.
    pub fn read_nearest(&self, time: f64) -> Option<Pitch> {
        let index = self.time_to_index(time);
        self.lock().get(index).cloned().flatten()
    }

    /// Every written pitch, in time order.
    pub fn snapshot(&self) -> Vec<Pitch> {
        self.lock().iter().flatten().cloned().collect()
    }

    /// Forgets every pitch, keeping the allocation.
    pub fn clear(&self) {
        self.lock().fill(None);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Pitch>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(index: usize) -> Pitch {
        Pitch::unvoiced(index as f64 * 128.0 / 44100.0, index as f64)
    }

    #[test]
    fn pitch_times_map_back_to_their_slots() {
        let stream = PitchStream::new(44100, 128);
        for index in [0, 1, 3, 7, 1000, 12345] {
            assert_eq!(stream.time_to_index(at(index).time), index);
        }
    }

    #[test]
    fn reads_skip_gaps() {
        let stream = PitchStream::new(44100, 128);
        stream.write([at(2)], None);
        stream.write([at(5), at(6)], None);
        let read = stream.read(0.0, at(10).time);
        let volumes: Vec<f64> = read.iter().map(|p| p.volume).collect();
        assert_eq!(volumes, vec![2.0, 5.0, 6.0]);
        assert!(stream.read_nearest(at(3).time).is_none());
        assert_eq!(stream.read_nearest(at(6).time).unwrap().volume, 6.0);
    }

    #[test]
    fn grows_before_filling_up() {
        let stream = PitchStream::new(10, 1);
        let capacity = stream.capacity();
        assert_eq!(capacity, 600);
        let index = (capacity as f64 * 0.9) as usize;
        stream.write([Pitch::unvoiced(index as f64 / 10.0, 1.0)], None);
        assert!(stream.capacity() >= 2 * capacity);
        assert_eq!(stream.snapshot().len(), 1);
    }

    #[test]
    fn explicit_time_overrides_pitch_time() {
        let stream = PitchStream::new(10, 1);
        stream.write([at(0)], Some(2.0));
        assert!(stream.read_nearest(0.0).is_none());
        assert!(stream.read_nearest(2.0).is_some());
    }
}
