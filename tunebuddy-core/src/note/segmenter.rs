//! Onset-based note segmentation.
//!
//! A window of pitches is an onset boundary when it is voiced and flat, or
//! mostly unvoiced. A boundary whose pitch differs enough from the pending
//! note closes that note and opens the next one. Windows that are neither
//! flat nor unvoiced are transients: they extend the pending note instead
//! of splitting it.

use linreg::linear_regression;
use tracing::debug;

use crate::config::SegmenterConfig;
use crate::error::{Error, Result};
use crate::note::{Note, NoteId, NoteStore, UNVOICED_MIDI};
use crate::pitch::{MAX_CANDIDATES, Pitch};

/// What the segmenter needs to know about one window of pitches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    /// Time of the window's first pitch.
    pub start_time: f64,
    /// Median MIDI number per candidate rank over voiced pitches
    /// ([`UNVOICED_MIDI`] where a rank has no data).
    pub medians: [f64; MAX_CANDIDATES],
    /// Least-squares slope of the best-rank track, semitones per second.
    pub slope: f64,
    pub is_flat: bool,
    pub is_unvoiced: bool,
    /// Mean volume of the window.
    pub volume: f64,
}

impl WindowSummary {
    /// The pitch this window stands for: the rank-0 median, or the
    /// unvoiced sentinel for a mostly-unvoiced window.
    pub fn pitch(&self) -> f64 {
        if self.is_unvoiced {
            UNVOICED_MIDI
        } else {
            self.medians[0]
        }
    }

    /// Whether this window may start a new note.
    pub fn is_boundary(&self) -> bool {
        self.is_flat || self.is_unvoiced
    }
}

/// Cuts pitch sequences into notes.
#[derive(Debug, Clone)]
pub struct NoteSegmenter {
    config: SegmenterConfig,
}

impl NoteSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Median pitches, slope, flatness and voicing of one window.
    pub fn summarize(&self, window: &[Pitch]) -> Result<WindowSummary> {
        let first = window.first().ok_or(Error::EmptyFrame)?;
        let sensitivity = self.config.sensitivity;
        let voiced: Vec<&Pitch> = window.iter().filter(|p| p.is_voiced(sensitivity)).collect();

        let mut medians = [UNVOICED_MIDI; MAX_CANDIDATES];
        for (rank, median_slot) in medians.iter_mut().enumerate() {
            let mut track: Vec<f64> = voiced.iter().filter_map(|p| p.midi_at(rank)).collect();
            if let Some(value) = median(&mut track) {
                *median_slot = value;
            }
        }

        let slope = self.slope(first.time, &voiced)?;
        let unvoiced_count = window
            .iter()
            .filter(|p| p.unvoiced_probability > sensitivity)
            .count();
        let is_unvoiced =
            unvoiced_count as f64 > self.config.unvoiced_proportion * window.len() as f64;
        let volume = window.iter().map(|p| p.volume).sum::<f64>() / window.len() as f64;

        let summary = WindowSummary {
            start_time: first.time,
            medians,
            slope,
            is_flat: slope.abs() < self.config.slope_threshold,
            is_unvoiced,
            volume,
        };
        debug!(
            time = summary.start_time,
            midi = summary.pitch(),
            slope,
            flat = summary.is_flat,
            unvoiced = is_unvoiced,
            "window summarized"
        );
        Ok(summary)
    }

    /// Offline segmentation of a complete pitch list.
    ///
    /// Windows advance by the configured hop; the first note opens at the
    /// first flat or unvoiced window, and the pending note is flushed at the
    /// end.
    pub fn detect_notes(&self, pitches: &[Pitch]) -> Result<NoteStore> {
        let store = NoteStore::new();
        let (size, hop) = (self.config.window.frame_size, self.config.window.hop_size);
        let mut tracker = OnsetTracker::new(self.config, false);

        let mut start = 0;
        while start + size <= pitches.len() {
            let summary = self.summarize(&pitches[start..start + size])?;
            if let Some(note) = tracker.push(&summary) {
                store.write(note);
            }
            start += hop;
        }
        if let Some(note) = tracker.finish() {
            store.write(note);
        }
        debug!(notes = store.len(), "offline note detection done");
        Ok(store)
    }

    fn slope(&self, origin: f64, voiced: &[&Pitch]) -> Result<f64> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = voiced
            .iter()
            .filter_map(|p| p.midi_at(0).map(|midi| (p.time - origin, midi)))
            .unzip();
        if xs.len() < 2 {
            return Ok(0.0);
        }
        let (slope, _intercept): (f64, f64) = linear_regression(&xs, &ys)
            .map_err(|e| Error::DegenerateWindow(format!("{e:?}")))?;
        if !slope.is_finite() {
            return Err(Error::DegenerateWindow(format!("slope {slope}")));
        }
        Ok(slope)
    }
}

/// Median of a slice (mean of the middle pair for even lengths). Sorts in
/// place.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    start_time: f64,
    pitches: [f64; MAX_CANDIDATES],
    volume: f64,
}

impl Pending {
    fn open(summary: &WindowSummary) -> Self {
        let pitches = if summary.is_unvoiced {
            [UNVOICED_MIDI; MAX_CANDIDATES]
        } else {
            summary.medians
        };
        Self {
            start_time: summary.start_time,
            pitches,
            volume: summary.volume,
        }
    }

    fn close(&self, id: NoteId, end_time: f64) -> Note {
        Note::new(id, self.start_time, end_time.max(self.start_time), &self.pitches)
            .with_volume(self.volume)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    SeekingFirstNote,
    Emitting(Pending),
}

/// The segmentation state machine, fed one window at a time.
///
/// Shared by the offline pass and the streaming worker.
#[derive(Debug, Clone)]
pub struct OnsetTracker {
    config: SegmenterConfig,
    /// Streaming mode opens the first note on the very first window.
    accept_first_window: bool,
    state: State,
    next_id: NoteId,
    /// Start of the last window that did not get skipped as a transient.
    last_good_time: Option<f64>,
}

impl OnsetTracker {
    pub fn new(config: SegmenterConfig, accept_first_window: bool) -> Self {
        Self {
            config,
            accept_first_window,
            state: State::SeekingFirstNote,
            next_id: 0,
            last_good_time: None,
        }
    }

    /// Whether the first note has been opened yet.
    pub fn is_emitting(&self) -> bool {
        matches!(self.state, State::Emitting(_))
    }

    /// Feeds one window. Returns the pending note when this window closes
    /// it.
    pub fn push(&mut self, summary: &WindowSummary) -> Option<Note> {
        let time = summary.start_time;
        match self.state {
            State::SeekingFirstNote => {
                if self.accept_first_window || summary.is_boundary() {
                    self.state = State::Emitting(Pending::open(summary));
                    self.last_good_time = Some(time);
                }
                None
            }
            State::Emitting(pending) => {
                let delta = (pending.pitches[0] - summary.pitch()).abs();
                if delta < self.config.pitch_threshold {
                    self.last_good_time = Some(time);
                    return None;
                }
                if !summary.is_boundary() {
                    return None;
                }
                let note = pending.close(self.next_id, time);
                debug!(
                    start = note.start_time,
                    end = note.end_time,
                    midi = note.midi(),
                    "note detected"
                );
                self.next_id += 1;
                self.state = State::Emitting(Pending::open(summary));
                self.last_good_time = Some(time);
                Some(note)
            }
        }
    }

    /// Closes the pending note at the last good boundary time.
    pub fn finish(&mut self) -> Option<Note> {
        let State::Emitting(pending) = self.state else {
            return None;
        };
        self.state = State::SeekingFirstNote;
        let end = self.last_good_time.unwrap_or(pending.start_time);
        let note = pending.close(self.next_id, end);
        self.next_id += 1;
        Some(note)
    }
}
