//! The analysis core of tunebuddy.
//!
//! Turns a monophonic performance into pitches, pitches into notes, and
//! notes into a mistake report against a reference score. This crate is
//! headless: it has no GUI or file-format code, and live capture is behind
//! the `capture` feature.

#[cfg(feature = "capture")]
pub mod audio;
pub mod align;
pub mod buffer;
pub mod config;
pub mod error;
pub mod fft;
pub mod note;
pub mod pitch;
pub mod score;
pub mod session;
pub mod tuning;
pub mod worker;

pub use align::{Aligner, Alignment, Mistake, MistakeKind};
pub use config::{AlignerConfig, DistancePolicy, SessionConfig};
pub use error::{Error, Result};
pub use note::{Note, NoteStore};
pub use pitch::{Pitch, PitchCandidate};
pub use score::{Score, ScoreEvent};
pub use session::{OfflineAnalysis, PipelineEvent, Session, analyze};
