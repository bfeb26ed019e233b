//! A probabilistic YIN (PYIN-style) fundamental-frequency estimator.
//!
//! Per frame:
//! 1. Condition: center, measure RMS volume, peak-normalize, high-pass
//!    at 0.8 x fmin.
//! 2. Autocorrelate with the FFT and derive the difference function.
//! 3. Normalize it by its cumulative mean (CMNDF) from `tau_min` on.
//! 4. Pick prominent autocorrelation peaks in `tau_min..=tau_max` as
//!    candidate periods.
//! 5. Vote over Beta-distributed absolute thresholds to assign each
//!    candidate a probability; what is left over is unvoiced.
//! 6. Refine each candidate with parabolic interpolation, clamped to the
//!    search range, and convert it to a MIDI number.

use tracing::debug;

use crate::config::{FrameConfig, PitchConfig, PyinConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::fft::Autocorrelator;
use crate::pitch::peaks::{candidate_lags, refine_period};
use crate::pitch::preprocess::condition;
use crate::pitch::prior::ThresholdPrior;
use crate::pitch::{Pitch, PitchCandidate};
use crate::tuning::freq_to_midi;

/// High-pass cutoff as a fraction of the lowest detectable fundamental.
const HIGH_PASS_RATIO: f64 = 0.8;

/// Maps audio frames to [`Pitch`]es. Holds cached FFT plans, so each
/// streaming worker owns its own estimator.
#[derive(Debug)]
pub struct PitchEstimator {
    pitch: PitchConfig,
    pyin: PyinConfig,
    frames: FrameConfig,
    prior: ThresholdPrior,
    autocorrelator: Autocorrelator,
}

impl PitchEstimator {
    /// Builds an estimator from a validated session configuration.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Self::from_parts(config.pitch, config.pyin, config.audio_frames)
    }

    pub fn from_parts(pitch: PitchConfig, pyin: PyinConfig, frames: FrameConfig) -> Result<Self> {
        frames.validate("audio_frames")?;
        pitch.validate(frames.frame_size)?;
        pyin.validate()?;
        Ok(Self {
            pitch,
            pyin,
            frames,
            prior: ThresholdPrior::new(&pyin),
            autocorrelator: Autocorrelator::new(),
        })
    }

    pub fn pitch_config(&self) -> &PitchConfig {
        &self.pitch
    }

    pub fn frames(&self) -> FrameConfig {
        self.frames
    }

    /// Estimates the pitch of one frame starting at `start_time`.
    ///
    /// Silent frames are not errors: they come back as fully unvoiced
    /// pitches with no candidates.
    ///
    /// # Arguments
    /// * `frame` - `frame_size` samples of mono audio
    /// * `start_time` - Time of the first sample, in seconds
    ///
    /// # Returns
    /// * `Ok(pitch)` - Up to three candidates, best first, and the unvoiced
    ///   probability
    /// * `Err(e)` - An empty or non-finite frame, or a high-pass that cannot
    ///   be designed for this sample rate
    pub fn detect_pitch(&mut self, frame: &[f32], start_time: f64) -> Result<Pitch> {
        let sample_rate = self.pitch.sample_rate;
        let conditioned = match condition(frame, sample_rate, self.pitch.fmin * HIGH_PASS_RATIO) {
            Ok(conditioned) => conditioned,
            Err(Error::SilentFrame) => return Ok(Pitch::unvoiced(start_time, 0.0)),
            Err(e) => return Err(e),
        };
        let volume = conditioned.volume;

        let tau_min = self.pitch.tau_min();
        let tau_max = self.pitch.tau_max();
        // Lags run well past tau_max: a peak at tau_max needs the trough on
        // its right for a meaningful prominence.
        let acf = self
            .autocorrelator
            .autocorrelate(&conditioned.signal, 2 * tau_max + 1);
        if acf.len() <= tau_min || acf[0] <= 0.0 {
            return Ok(Pitch::unvoiced(start_time, volume));
        }

        let difference = difference_function(&conditioned.signal, &acf);
        let cmndf = cumulative_mean_normalized_difference(&difference, tau_min);
        let lags = candidate_lags(&acf, tau_min..tau_max + 1);
        let probabilities = self.vote(&lags, &cmndf);

        let mut candidates = Vec::with_capacity(lags.len());
        for (&lag, &probability) in lags.iter().zip(probabilities.iter()) {
            let period = refine_period(&acf, lag, tau_min..=tau_max);
            let Some(midi) = freq_to_midi(sample_rate as f64 / period, self.pitch.tuning) else {
                continue;
            };
            candidates.push(PitchCandidate { midi, probability });
        }

        let voiced_mass: f64 = candidates.iter().map(|c| c.probability).sum();
        let unvoiced_probability = (1.0 - voiced_mass).clamp(0.0, 1.0);
        let pitch = Pitch::new(start_time, candidates, volume, unvoiced_probability);

        if let Some(best) = pitch.best() {
            debug!(
                time = start_time,
                midi = best.midi,
                probability = best.probability,
                unvoiced = pitch.unvoiced_probability,
                "pitch detected"
            );
        }
        Ok(pitch)
    }

    /// Runs [`detect_pitch`](Self::detect_pitch) over a whole recording,
    /// one frame per hop. Any frame failure aborts the batch.
    pub fn detect_pitches(&mut self, samples: &[f32]) -> Result<Vec<Pitch>> {
        let FrameConfig {
            frame_size,
            hop_size,
        } = self.frames;
        if samples.len() < frame_size {
            return Ok(Vec::new());
        }
        let n_frames = 1 + (samples.len() - frame_size) / hop_size;
        let sample_rate = self.pitch.sample_rate as f64;

        let mut pitches = Vec::with_capacity(n_frames);
        for i in 0..n_frames {
            let start = i * hop_size;
            let start_time = start as f64 / sample_rate;
            pitches.push(self.detect_pitch(&samples[start..start + frame_size], start_time)?);
        }
        debug!(frames = pitches.len(), "batch pitch detection done");
        Ok(pitches)
    }

    /// Probability mass per candidate lag, accumulated over every threshold
    /// of the prior.
    fn vote(&self, lags: &[usize], cmndf: &[f64]) -> Vec<f64> {
        let mut probabilities = vec![0.0; lags.len()];
        if lags.is_empty() {
            return probabilities;
        }
        for (threshold, weight) in self.prior.iter() {
            let (index, voiced) = absolute_threshold(lags, cmndf, threshold);
            probabilities[index] += if voiced {
                weight
            } else {
                weight * self.pyin.unvoiced_penalty
            };
        }
        probabilities
    }
}

/// YIN difference function `d(tau) = sum_n (x[n] - x[n + tau])^2` for every
/// lag of `acf`, expanded as the energies of the two overlapping parts
/// minus twice the autocorrelation.
pub fn difference_function(signal: &[f64], acf: &[f64]) -> Vec<f64> {
    let mut energy = Vec::with_capacity(signal.len() + 1);
    energy.push(0.0);
    let mut total = 0.0;
    for &sample in signal {
        total += sample * sample;
        energy.push(total);
    }

    let n = signal.len();
    acf.iter()
        .enumerate()
        .map(|(tau, &r)| {
            if tau >= n {
                return 0.0;
            }
            let head = energy[n - tau];
            let tail = total - energy[tau];
            (head + tail - 2.0 * r).max(0.0)
        })
        .collect()
}

/// The difference function normalized by its running mean from `tau_min`
/// on. Lags below `tau_min` read 1 and are never candidates.
pub fn cumulative_mean_normalized_difference(difference: &[f64], tau_min: usize) -> Vec<f64> {
    let first = tau_min.max(1);
    let mut cmndf = vec![1.0; difference.len()];
    let mut running_sum = 0.0;

    for tau in first..difference.len() {
        running_sum += difference[tau];
        let mean = running_sum / (tau + 1 - first) as f64;
        cmndf[tau] = if mean > 0.0 { difference[tau] / mean } else { 1.0 };
    }
    cmndf
}

/// Scans candidates in lag order for the first one at or under
/// `threshold`. Without one, the candidate with the lowest CMNDF is taken
/// and reported unvoiced.
///
/// Returns the index into `lags` and whether the pick was voiced.
fn absolute_threshold(lags: &[usize], cmndf: &[f64], threshold: f64) -> (usize, bool) {
    if let Some(index) = lags.iter().position(|&lag| cmndf[lag] <= threshold) {
        return (index, true);
    }
    let index = lags
        .iter()
        .enumerate()
        .min_by(|a, b| cmndf[*a.1].total_cmp(&cmndf[*b.1]))
        .map(|(index, _)| index)
        .unwrap_or(0);
    (index, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (0.6 * (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin()) as f32)
            .collect()
    }

    fn estimator() -> PitchEstimator {
        PitchEstimator::new(&SessionConfig::default()).unwrap()
    }

    #[test]
    fn difference_matches_direct_sum() {
        let signal: Vec<f64> = (0..64).map(|i| (i as f64 * 0.41).sin() + 0.1 * i as f64).collect();
        let acf: Vec<f64> = (0..20)
            .map(|tau| (0..64 - tau).map(|n| signal[n] * signal[n + tau]).sum())
            .collect();
        let difference = difference_function(&signal, &acf);
        for (tau, &d) in difference.iter().enumerate() {
            let direct: f64 = (0..64 - tau).map(|n| (signal[n] - signal[n + tau]).powi(2)).sum();
            assert!((d - direct).abs() < 1e-9, "tau {tau}: {d} vs {direct}");
        }
    }

    #[test]
    fn cmndf_is_one_below_tau_min() {
        let difference = [0.0, 2.0, 6.0, 10.0, 7.0, 1.0];
        let cmndf = cumulative_mean_normalized_difference(&difference, 2);
        assert_eq!(&cmndf[..2], &[1.0, 1.0]);
        // First normalized lag always divides by itself.
        assert_eq!(cmndf[2], 1.0);
        // Mean at tau 5 = (6 + 10 + 7 + 1) / 4.
        assert!((cmndf[5] - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn threshold_prefers_first_qualifying_lag() {
        let mut cmndf = vec![1.0; 10];
        cmndf[3] = 0.3;
        cmndf[6] = 0.05;
        let lags = [3, 6];
        assert_eq!(absolute_threshold(&lags, &cmndf, 0.1), (1, true));
        assert_eq!(absolute_threshold(&lags, &cmndf, 0.5), (0, true));
        assert_eq!(absolute_threshold(&lags, &cmndf, 0.01), (1, false));
    }

    #[test]
    fn a4_sine() {
        let frame = sine(440.0, 44100, 4096);
        let pitch = estimator().detect_pitch(&frame, 1.25).unwrap();
        let best = pitch.best().unwrap();
        assert!((best.midi - 69.0).abs() < 0.5, "midi {}", best.midi);
        assert!(pitch.unvoiced_probability < 0.1, "unvoiced {}", pitch.unvoiced_probability);
        assert_eq!(pitch.time, 1.25);
        assert!(pitch.volume > 0.4 && pitch.volume < 0.45);
    }

    #[test]
    fn sines_across_the_search_range() {
        let config = SessionConfig::default();
        let (fmin, fmax) = (config.pitch.fmin, config.pitch.fmax);
        let mut estimator = estimator();
        for freq in [fmin, fmin + 1.0, fmin + 2.0, fmin + 4.0, 220.0, 1000.0, 4000.0, fmax] {
            let pitch = estimator.detect_pitch(&sine(freq, 44100, 4096), 0.0).unwrap();
            let expected = freq_to_midi(freq, 440.0).unwrap();
            let best = pitch
                .best()
                .unwrap_or_else(|| panic!("no candidate at {freq} Hz"));
            assert!(
                (best.midi - expected).abs() < 0.5,
                "{freq} Hz: midi {} vs {expected}",
                best.midi
            );
            assert!(
                pitch.unvoiced_probability < 0.1,
                "{freq} Hz: unvoiced {}",
                pitch.unvoiced_probability
            );
        }
    }

    #[test]
    fn silence_is_unvoiced() {
        let pitch = estimator().detect_pitch(&[0.0; 4096], 0.0).unwrap();
        assert!(pitch.candidates().is_empty());
        assert_eq!(pitch.unvoiced_probability, 1.0);
    }

    #[test]
    fn batch_frames_follow_hop() {
        let samples = sine(523.25, 44100, 4096 + 128 * 9);
        let pitches = estimator().detect_pitches(&samples).unwrap();
        assert_eq!(pitches.len(), 10);
        assert!((pitches[3].time - 3.0 * 128.0 / 44100.0).abs() < 1e-12);
        for pitch in &pitches {
            assert!((pitch.best().unwrap().midi - 72.0).abs() < 0.5);
        }
    }

    #[test]
    fn short_recording_has_no_frames() {
        assert!(estimator().detect_pitches(&[0.1; 100]).unwrap().is_empty());
    }

    #[test]
    fn bad_frame_is_an_error() {
        let mut frame = sine(440.0, 44100, 4096);
        frame[10] = f32::INFINITY;
        assert!(matches!(
            estimator().detect_pitch(&frame, 0.0),
            Err(Error::NonFiniteFrame)
        ));
    }
}
