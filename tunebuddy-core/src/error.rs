//! # Error Module
//!
//! One error type for the whole analysis core. Per-frame variants are
//! recoverable: the streaming workers log them and move on to the next
//! frame. Configuration and traceback variants are not.

use std::io;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside the analysis core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration invariant does not hold.
    #[error("invalid configuration `{name}`: {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    /// A frame with no samples (or no pitches) in it.
    #[error("frame is empty")]
    EmptyFrame,

    /// A frame whose peak amplitude is zero; nothing to normalize.
    #[error("frame is silent")]
    SilentFrame,

    /// A frame containing NaN or infinite samples.
    #[error("frame contains non-finite values")]
    NonFiniteFrame,

    /// The pitch-track regression over a window could not be fitted.
    #[error("degenerate segmentation window: {0}")]
    DegenerateWindow(String),

    /// The pre-emphasis high-pass could not be designed.
    #[error("high-pass filter design failed: {0}")]
    Filter(String),

    /// The alignment traceback reached a cell no transition can leave.
    #[error("alignment traceback stuck at cell ({row}, {col})")]
    Traceback { row: usize, col: usize },

    /// Tempo (BPM) or stretch factor is not strictly positive.
    #[error("invalid tempo: {0}")]
    InvalidTempo(f64),

    /// A streaming worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

impl Error {
    pub(crate) fn config(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            name,
            reason: reason.into(),
        }
    }

    /// Whether this error only affects the frame that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::EmptyFrame
                | Error::SilentFrame
                | Error::NonFiniteFrame
                | Error::DegenerateWindow(_)
                | Error::Filter(_)
        )
    }
}
