//! # Pitch Detection Module
//!
//! Probabilistic fundamental-frequency estimation (YIN with PYIN-style
//! threshold voting) and the time-indexed store its results land in.
//!
//! ## Features
//! - FFT autocorrelation and cumulative-mean normalized difference
//! - Prominence-based period candidates with parabolic refinement
//! - Beta-prior thresholding that yields a probability per candidate plus
//!   an explicit unvoiced probability
//! - Batch (whole recording) and per-frame entry points

pub mod estimator;
pub mod peaks;
pub mod preprocess;
pub mod prior;
pub mod stream;

use serde::{Deserialize, Serialize};

pub use estimator::PitchEstimator;
pub use stream::PitchStream;

/// Most candidates kept per frame.
pub const MAX_CANDIDATES: usize = 3;

/// One pitch hypothesis for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchCandidate {
    /// Fractional MIDI number.
    pub midi: f64,
    pub probability: f64,
}

/// One analysis frame's result. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Start time of the analysed frame, in seconds.
    pub time: f64,
    candidates: Vec<PitchCandidate>,
    /// RMS of the centered frame before normalization.
    pub volume: f64,
    /// `1 - sum of all candidate probabilities` (including the ones
    /// dropped past [`MAX_CANDIDATES`]).
    pub unvoiced_probability: f64,
}

impl Pitch {
    /// Ranks `candidates` by descending probability and keeps the top
    /// [`MAX_CANDIDATES`].
    pub fn new(
        time: f64,
        mut candidates: Vec<PitchCandidate>,
        volume: f64,
        unvoiced_probability: f64,
    ) -> Self {
        candidates.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        candidates.truncate(MAX_CANDIDATES);
        Self {
            time,
            candidates,
            volume,
            unvoiced_probability,
        }
    }

    /// A frame with no pitch at all.
    pub fn unvoiced(time: f64, volume: f64) -> Self {
        Self {
            time,
            candidates: Vec::new(),
            volume,
            unvoiced_probability: 1.0,
        }
    }

    /// Candidates, most probable first.
    pub fn candidates(&self) -> &[PitchCandidate] {
        &self.candidates
    }

    /// The most probable candidate, if any.
    pub fn best(&self) -> Option<&PitchCandidate> {
        self.candidates.first()
    }

    /// MIDI number of the candidate at `rank` (0 = most probable).
    pub fn midi_at(&self, rank: usize) -> Option<f64> {
        self.candidates.get(rank).map(|c| c.midi)
    }

    /// Voiced under a given sensitivity: unvoiced probability below it.
    pub fn is_voiced(&self, sensitivity: f64) -> bool {
        self.unvoiced_probability < sensitivity && !self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(midi: f64, probability: f64) -> PitchCandidate {
        PitchCandidate { midi, probability }
    }

    #[test]
    fn ranks_and_bounds_candidates() {
        let pitch = Pitch::new(
            0.5,
            vec![
                candidate(48.0, 0.1),
                candidate(60.0, 0.6),
                candidate(72.0, 0.05),
                candidate(55.0, 0.2),
            ],
            0.3,
            0.05,
        );
        let midis: Vec<f64> = pitch.candidates().iter().map(|c| c.midi).collect();
        assert_eq!(midis, vec![60.0, 55.0, 48.0]);
        assert_eq!(pitch.best().unwrap().midi, 60.0);
        assert_eq!(pitch.midi_at(3), None);
    }

    #[test]
    fn unvoiced_frame_has_no_candidates() {
        let pitch = Pitch::unvoiced(1.0, 0.0);
        assert!(pitch.best().is_none());
        assert!(!pitch.is_voiced(0.9));
        assert_eq!(pitch.unvoiced_probability, 1.0);
    }
}
