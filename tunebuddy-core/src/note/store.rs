use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::note::Note;

#[derive(Default)]
struct Inner {
    /// Sorted, duplicate-free start times; parallel to `notes`.
    times: Vec<f64>,
    notes: Vec<Arc<Note>>,
    /// `reach[i]` is the latest end time among `notes[..=i]`. Never
    /// decreases, so it can be binary searched.
    reach: Vec<f64>,
}

impl Inner {
    /// Rebuilds `reach` from `from` on.
    fn extend_reach(&mut self, from: usize) {
        self.reach.truncate(from);
        let mut latest = from
            .checked_sub(1)
            .map_or(f64::NEG_INFINITY, |i| self.reach[i]);
        for note in &self.notes[from..] {
            latest = latest.max(note.end_time);
            self.reach.push(latest);
        }
    }
}

/// Notes keyed by unique start time.
///
/// A sorted index of start times, with a running latest end time beside
/// it, gives O(log n) range and nearest-time lookups. Writing a note at an
/// existing start time replaces the old one. Every read returns a
/// snapshot, so a reader never sees the store change underneath it while
/// the segmenter keeps appending.
#[derive(Default)]
pub struct NoteStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for NoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteStore").field("len", &self.len()).finish()
    }
}

impl FromIterator<Note> for NoteStore {
    fn from_iter<I: IntoIterator<Item = Note>>(notes: I) -> Self {
        let store = NoteStore::new();
        for note in notes {
            store.write(note);
        }
        store
    }
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `note` at its start time, replacing any note already there.
    pub fn write(&self, note: Note) -> Arc<Note> {
        let note = Arc::new(note);
        let time = note.start_time;
        let mut inner = self.lock();
        let index = match inner.times.binary_search_by(|probe| probe.total_cmp(&time)) {
            Ok(index) => {
                inner.notes[index] = Arc::clone(&note);
                index
            }
            Err(index) => {
                inner.times.insert(index, time);
                inner.notes.insert(index, Arc::clone(&note));
                index
            }
        };
        inner.extend_reach(index);
        note
    }

    /// Notes whose `[start_time, end_time]` intersects `[start, end]`, in
    /// start-time order.
    pub fn read(&self, start: f64, end: f64) -> Vec<Arc<Note>> {
        let inner = self.lock();
        // Everything before `lower` has ended by `start`.
        let lower = inner.reach.partition_point(|&t| t < start);
        let upper = inner.times.partition_point(|&t| t <= end);
        if lower >= upper {
            return Vec::new();
        }
        inner.notes[lower..upper]
            .iter()
            .filter(|note| note.end_time >= start)
            .cloned()
            .collect()
    }

    /// The note whose start time is closest to `time`; ties go to the
    /// earlier note.
    pub fn read_nearest(&self, time: f64) -> Option<Arc<Note>> {
        let inner = self.lock();
        let index = inner.times.partition_point(|&t| t < time);
        let before = index.checked_sub(1);
        let after = (index < inner.times.len()).then_some(index);
        let chosen = match (before, after) {
            (Some(b), Some(a)) => {
                if time - inner.times[b] <= inner.times[a] - time {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        Some(Arc::clone(&inner.notes[chosen]))
    }

    /// The `index`-th note in start-time order.
    pub fn get(&self, index: usize) -> Option<Arc<Note>> {
        self.lock().notes.get(index).cloned()
    }

    /// Every note, in start-time order.
    pub fn notes(&self) -> Vec<Arc<Note>> {
        self.lock().notes.clone()
    }

    /// Every note except rests, in start-time order.
    pub fn voiced_notes(&self) -> Vec<Arc<Note>> {
        self.lock()
            .notes
            .iter()
            .filter(|note| !note.is_unvoiced())
            .cloned()
            .collect()
    }

    /// The sorted start-time index.
    pub fn times(&self) -> Vec<f64> {
        self.lock().times.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().notes.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.times.clear();
        inner.notes.clear();
        inner.reach.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
