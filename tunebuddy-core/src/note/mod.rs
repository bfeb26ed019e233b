//! # Note Module
//!
//! Discrete note events, the time-indexed store that holds them, and the
//! onset-based segmenter that cuts a pitch stream into notes.

pub mod segmenter;
pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tuning::note_name;

pub use segmenter::{NoteSegmenter, OnsetTracker, WindowSummary};
pub use store::NoteStore;

/// Reserved pitch of a note that covers an unvoiced stretch (a rest). No
/// real MIDI number is negative.
pub const UNVOICED_MIDI: f64 = -1.0;

/// Identifier of a note within its store.
pub type NoteId = usize;

/// An immutable note event. Corrections create a new note rather than
/// editing one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub start_time: f64,
    pub end_time: f64,
    /// Ranked MIDI estimates, best first. `[UNVOICED_MIDI]` for a rest.
    pitches: Vec<f64>,
    pub volume: Option<f64>,
}

impl Note {
    /// A note with ranked pitch estimates. Sentinel and non-finite
    /// estimates are dropped; with none left the note is unvoiced.
    pub fn new(id: NoteId, start_time: f64, end_time: f64, pitches: &[f64]) -> Self {
        let mut kept: Vec<f64> = pitches
            .iter()
            .copied()
            .filter(|midi| midi.is_finite() && *midi >= 0.0)
            .collect();
        if kept.is_empty() {
            kept.push(UNVOICED_MIDI);
        }
        Self {
            id,
            start_time,
            end_time,
            pitches: kept,
            volume: None,
        }
    }

    /// A rest covering `[start_time, end_time]`.
    pub fn unvoiced(id: NoteId, start_time: f64, end_time: f64) -> Self {
        Self::new(id, start_time, end_time, &[])
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// The top-ranked MIDI estimate (the sentinel for a rest).
    pub fn midi(&self) -> f64 {
        self.pitches[0]
    }

    /// All ranked MIDI estimates, best first.
    pub fn pitches(&self) -> &[f64] {
        &self.pitches
    }

    pub fn is_unvoiced(&self) -> bool {
        self.pitches[0] == UNVOICED_MIDI
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unvoiced() {
            write!(f, "rest @ {:.3}s", self.start_time)
        } else {
            write!(
                f,
                "{} ({:.2}) @ {:.3}s",
                note_name(self.midi()),
                self.midi(),
                self.start_time
            )
        }
    }
}
