use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A window copied out of a [`FrameQueue`], stamped with the time of its
/// first element.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    pub data: Vec<T>,
    pub start_time: f64,
}

struct QueueState<T> {
    items: VecDeque<T>,
    /// Time of the element at the head of the queue.
    cursor: f64,
}

/// Lock-guarded FIFO that hands out overlapping fixed-size windows.
///
/// Used audio -> pitch (elements are samples) and pitch -> note (elements
/// are [`Pitch`](crate::pitch::Pitch)es). `rate` is elements per second and
/// drives the time cursor.
pub struct FrameQueue<T> {
    rate: f64,
    state: Mutex<QueueState<T>>,
}

impl<T> std::fmt::Debug for FrameQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FrameQueue")
            .field("rate", &self.rate)
            .field("buffered", &state.items.len())
            .field("cursor", &state.cursor)
            .finish()
    }
}

impl<T> FrameQueue<T> {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                cursor: 0.0,
            }),
        }
    }

    /// Elements per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Sets the time of the current head element.
    pub fn init_start_time(&self, start_time: f64) {
        self.lock().cursor = start_time;
    }

    /// Drops everything buffered and restarts the cursor at `start_time`.
    pub fn reset(&self, start_time: f64) {
        let mut state = self.lock();
        state.items.clear();
        state.cursor = start_time;
    }

    /// Appends to the tail.
    pub fn push<I: IntoIterator<Item = T>>(&self, items: I) {
        self.lock().items.extend(items);
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Time of the next frame to be popped.
    pub fn current_time(&self) -> f64 {
        self.lock().cursor
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> FrameQueue<T> {
    /// Copies out the first `frame_size` elements and advances the head by
    /// `hop_size`, keeping `frame_size - hop_size` of them for the next call.
    ///
    /// Returns `None` (and leaves the queue untouched) while fewer than
    /// `frame_size` elements are buffered.
    pub fn pop(&self, frame_size: usize, hop_size: usize) -> Option<Frame<T>> {
        let mut state = self.lock();
        if frame_size == 0 || state.items.len() < frame_size {
            return None;
        }
        let data: Vec<T> = state.items.iter().take(frame_size).cloned().collect();
        state.items.drain(..hop_size.min(frame_size));

        let start_time = state.cursor;
        state.cursor += hop_size as f64 / self.rate;
        Some(Frame { data, start_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_enough_data_leaves_queue_untouched() {
        let queue = FrameQueue::new(10.0);
        queue.push([1, 2, 3]);
        assert!(queue.pop(4, 2).is_none());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.current_time(), 0.0);
    }

    #[test]
    fn consecutive_frames_overlap() {
        let queue = FrameQueue::new(100.0);
        queue.push(0..50);
        let (frame_size, hop) = (8, 3);
        let mut previous: Option<Frame<i32>> = None;
        let mut popped = 0;
        while let Some(frame) = queue.pop(frame_size, hop) {
            assert_eq!(frame.data.len(), frame_size);
            if let Some(prev) = &previous {
                assert_eq!(frame.data[..frame_size - hop], prev.data[hop..]);
            }
            previous = Some(frame);
            popped += 1;
        }
        // Pops succeed exactly while at least `frame_size` remain buffered.
        assert_eq!(popped, (50 - frame_size) / hop + 1);
        assert!(queue.len() < frame_size);
    }

    #[test]
    fn cursor_advances_by_hop() {
        let queue = FrameQueue::new(4.0);
        queue.init_start_time(10.0);
        queue.push(0..16);
        assert_eq!(queue.pop(4, 2).unwrap().start_time, 10.0);
        assert_eq!(queue.pop(4, 2).unwrap().start_time, 10.5);
        assert_eq!(queue.current_time(), 11.0);
    }

    #[test]
    fn debug_needs_no_clone() {
        struct Opaque;
        let queue: FrameQueue<Opaque> = FrameQueue::new(8.0);
        queue.push([Opaque, Opaque]);
        let text = format!("{queue:?}");
        assert!(text.contains("buffered: 2"), "{text}");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn reset_discards_tail() {
        let queue = FrameQueue::new(1.0);
        queue.push(0..10);
        queue.reset(5.0);
        assert!(queue.is_empty());
        queue.push(100..104);
        let frame = queue.pop(4, 4).unwrap();
        assert_eq!(frame.data, vec![100, 101, 102, 103]);
        assert_eq!(frame.start_time, 5.0);
    }
}
