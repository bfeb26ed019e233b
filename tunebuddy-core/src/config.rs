//! # Configuration Module
//!
//! Immutable per-session tuning for every pipeline stage. All structs are
//! `serde` (de)serializable with field defaults, so a partial JSON file only
//! overrides the options it names. Validation happens once, up front;
//! nothing here is clamped behind the caller's back.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pitch search range and reference tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Reference frequency of A4 in Hz.
    pub tuning: f64,
    /// Lowest detectable fundamental in Hz.
    pub fmin: f64,
    /// Highest detectable fundamental in Hz.
    pub fmax: f64,
}

impl Default for PitchConfig {
    fn default() -> Self {
        // Violin range (G3 and up).
        Self {
            sample_rate: 44100,
            tuning: 440.0,
            fmin: 196.0,
            fmax: 5000.0,
        }
    }
}

impl PitchConfig {
    /// Shortest period searched, in samples.
    pub fn tau_min(&self) -> usize {
        (self.sample_rate as f64 / self.fmax) as usize
    }

    /// Longest period searched, in samples.
    pub fn tau_max(&self) -> usize {
        (self.sample_rate as f64 / self.fmin) as usize
    }

    /// Checks the search range against a frame size.
    pub fn validate(&self, frame_size: usize) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::config("sample_rate", "must be positive"));
        }
        if !(self.tuning.is_finite() && self.tuning > 0.0) {
            return Err(Error::config("tuning", format!("got {}", self.tuning)));
        }
        if !(self.fmin.is_finite() && self.fmin > 0.0) {
            return Err(Error::config("fmin", format!("got {}", self.fmin)));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !(self.fmax.is_finite() && self.fmax > self.fmin && self.fmax <= nyquist) {
            return Err(Error::config(
                "fmax",
                format!(
                    "got {}, need fmin ({}) < fmax <= nyquist ({nyquist})",
                    self.fmax, self.fmin
                ),
            ));
        }
        let (tau_min, tau_max) = (self.tau_min(), self.tau_max());
        if tau_min >= tau_max {
            return Err(Error::config(
                "fmin/fmax",
                format!("tau_min ({tau_min}) must be below tau_max ({tau_max})"),
            ));
        }
        if tau_max > frame_size {
            return Err(Error::config(
                "fmin",
                format!("tau_max ({tau_max}) exceeds frame size ({frame_size})"),
            ));
        }
        Ok(())
    }
}

/// Probabilistic thresholding parameters (Beta prior over YIN thresholds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyinConfig {
    pub n_thresholds: usize,
    pub beta_a: f64,
    pub beta_b: f64,
    /// Weight multiplier for a threshold that no candidate passes.
    pub unvoiced_penalty: f64,
}

impl Default for PyinConfig {
    fn default() -> Self {
        // Beta(2, 11.33) has a mean threshold of 0.15.
        Self {
            n_thresholds: 100,
            beta_a: 2.0,
            beta_b: 34.0 / 3.0,
            unvoiced_penalty: 0.01,
        }
    }
}

impl PyinConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_thresholds == 0 {
            return Err(Error::config("n_thresholds", "must be positive"));
        }
        if !(self.beta_a > 0.0 && self.beta_b > 0.0) {
            return Err(Error::config(
                "beta_a/beta_b",
                format!("got ({}, {})", self.beta_a, self.beta_b),
            ));
        }
        if !(0.0..=1.0).contains(&self.unvoiced_penalty) {
            return Err(Error::config(
                "unvoiced_penalty",
                format!("got {}, need a value in [0, 1]", self.unvoiced_penalty),
            ));
        }
        Ok(())
    }
}

/// Sliding window geometry: `frame_size` elements per window, advancing by
/// `hop_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    pub frame_size: usize,
    pub hop_size: usize,
}

impl FrameConfig {
    pub const fn new(frame_size: usize, hop_size: usize) -> Self {
        Self {
            frame_size,
            hop_size,
        }
    }

    /// Elements shared by two consecutive windows.
    pub fn overlap(&self) -> usize {
        self.frame_size.saturating_sub(self.hop_size)
    }

    pub fn validate(&self, name: &'static str) -> Result<()> {
        if self.frame_size == 0 || self.hop_size == 0 {
            return Err(Error::config(name, "frame and hop sizes must be positive"));
        }
        if self.hop_size > self.frame_size {
            return Err(Error::config(
                name,
                format!(
                    "hop size {} exceeds frame size {}",
                    self.hop_size, self.frame_size
                ),
            ));
        }
        Ok(())
    }
}

/// Onset model for turning pitches into notes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Window over the pitch stream, in pitch frames.
    pub window: FrameConfig,
    /// Median pitch change (semitones) that may start a new note.
    pub pitch_threshold: f64,
    /// Largest |slope| (semitones per second) still counted as flat.
    pub slope_threshold: f64,
    /// A pitch is voiced when its unvoiced probability is below this.
    pub sensitivity: f64,
    /// Fraction of unvoiced pitches above which a window is unvoiced.
    pub unvoiced_proportion: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window: FrameConfig::new(30, 15),
            pitch_threshold: 0.75,
            slope_threshold: 1.5,
            sensitivity: 0.9,
            unvoiced_proportion: 0.5,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<()> {
        self.window.validate("segmenter.window")?;
        if !(self.pitch_threshold > 0.0) {
            return Err(Error::config("pitch_threshold", "must be positive"));
        }
        if !(self.slope_threshold > 0.0) {
            return Err(Error::config("slope_threshold", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(Error::config(
                "sensitivity",
                format!("got {}, need a value in [0, 1]", self.sensitivity),
            ));
        }
        if !(self.unvoiced_proportion > 0.0 && self.unvoiced_proportion < 1.0) {
            return Err(Error::config(
                "unvoiced_proportion",
                format!("got {}, need a value in (0, 1)", self.unvoiced_proportion),
            ));
        }
        Ok(())
    }
}

/// How the pitch of a performed note is compared with a reference note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistancePolicy {
    /// Only the top-ranked estimate counts.
    Strict,
    /// The closest of all ranked estimates counts; forgives octave errors.
    #[default]
    Lenient,
}

/// Edit-distance costs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    pub insertion: f64,
    pub deletion: f64,
    pub substitution: f64,
    /// Pitch distance (semitones) below which a substitution is a match.
    pub tolerance: f64,
    pub policy: DistancePolicy,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            insertion: 1.5,
            deletion: 2.0,
            substitution: 1.0,
            tolerance: 1.0,
            policy: DistancePolicy::Lenient,
        }
    }
}

impl AlignerConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, cost) in [
            ("insertion", self.insertion),
            ("deletion", self.deletion),
            ("substitution", self.substitution),
            ("tolerance", self.tolerance),
        ] {
            if !(cost.is_finite() && cost >= 0.0) {
                return Err(Error::config(name, format!("got {cost}, need >= 0")));
            }
        }
        Ok(())
    }
}

/// Everything a session needs, in one place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pitch: PitchConfig,
    pub pyin: PyinConfig,
    /// Audio windows fed to the pitch estimator.
    pub audio_frames: FrameConfig,
    pub segmenter: SegmenterConfig,
    pub aligner: AlignerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pitch: PitchConfig::default(),
            pyin: PyinConfig::default(),
            audio_frames: FrameConfig::new(4096, 128),
            segmenter: SegmenterConfig::default(),
            aligner: AlignerConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        self.audio_frames.validate("audio_frames")?;
        self.pitch.validate(self.audio_frames.frame_size)?;
        self.pyin.validate()?;
        self.segmenter.validate()?;
        self.aligner.validate()?;
        Ok(())
    }

    /// Pitch frames per second.
    pub fn pitch_rate(&self) -> f64 {
        self.pitch.sample_rate as f64 / self.audio_frames.hop_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn tau_range_from_frequencies() {
        let config = PitchConfig::default();
        assert_eq!(config.tau_min(), 8);
        assert_eq!(config.tau_max(), 225);
    }

    #[test]
    fn rejects_inverted_range() {
        let config = PitchConfig {
            fmin: 800.0,
            fmax: 400.0,
            ..PitchConfig::default()
        };
        assert!(matches!(
            config.validate(4096),
            Err(Error::InvalidConfig { name: "fmax", .. })
        ));
    }

    #[test]
    fn rejects_period_longer_than_frame() {
        let config = PitchConfig {
            fmin: 20.0,
            ..PitchConfig::default()
        };
        assert!(config.validate(1024).is_err());
        assert!(config.validate(4096).is_ok());
    }

    #[test]
    fn rejects_hop_larger_than_frame() {
        assert!(FrameConfig::new(128, 256).validate("test").is_err());
        assert!(FrameConfig::new(128, 0).validate("test").is_err());
        assert_eq!(FrameConfig::new(4096, 128).overlap(), 3968);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"pitch": {"tuning": 442.0}, "aligner": {"policy": "strict"}}"#)
                .unwrap();
        assert_eq!(config.pitch.tuning, 442.0);
        assert_eq!(config.pitch.fmin, 196.0);
        assert_eq!(config.aligner.policy, DistancePolicy::Strict);
        assert_eq!(config.audio_frames, FrameConfig::new(4096, 128));
    }
}
