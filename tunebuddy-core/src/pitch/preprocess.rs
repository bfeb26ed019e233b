//! Frame conditioning ahead of the autocorrelation.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, Q_BUTTERWORTH_F64, ToHertz, Type};

use crate::error::{Error, Result};

/// A frame ready for period search.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditioned {
    /// Centered, peak-normalized, high-passed signal.
    pub signal: Vec<f64>,
    /// RMS of the centered signal before normalization.
    pub volume: f64,
}

/// Removes the DC offset from a signal by making its average value zero.
///
/// Returns the removed mean.
pub fn remove_dc_offset(signal: &mut [f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;
    for sample in signal.iter_mut() {
        *sample -= mean;
    }
    mean
}

/// Root mean square of a signal.
pub fn rms(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|s| s * s).sum::<f64>() / signal.len() as f64).sqrt()
}

/// Runs a 2nd order Butterworth high-pass over the signal in place, from a
/// fresh (zero) filter state.
pub fn high_pass(signal: &mut [f64], sample_rate: u32, cutoff: f64) -> Result<()> {
    let coeffs = Coefficients::<f64>::from_params(
        Type::HighPass,
        (sample_rate as f64).hz(),
        cutoff.hz(),
        Q_BUTTERWORTH_F64,
    )
    .map_err(|e| Error::Filter(format!("{e:?} (cutoff {cutoff} Hz at {sample_rate} Hz)")))?;
    let mut filter = DirectForm2Transposed::<f64>::new(coeffs);
    for sample in signal.iter_mut() {
        *sample = filter.run(*sample);
    }
    Ok(())
}

/// Centers, measures, normalizes and high-passes one frame.
///
/// Fails with [`Error::SilentFrame`] when nothing is left after centering;
/// such a frame has no pitch and must not be normalized.
pub fn condition(frame: &[f32], sample_rate: u32, cutoff: f64) -> Result<Conditioned> {
    if frame.is_empty() {
        return Err(Error::EmptyFrame);
    }
    if frame.iter().any(|s| !s.is_finite()) {
        return Err(Error::NonFiniteFrame);
    }

    let mut signal: Vec<f64> = frame.iter().map(|&s| s as f64).collect();
    remove_dc_offset(&mut signal);
    let volume = rms(&signal);

    let peak = signal.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
    if peak <= f64::EPSILON {
        return Err(Error::SilentFrame);
    }
    for sample in signal.iter_mut() {
        *sample /= peak;
    }

    high_pass(&mut signal, sample_rate, cutoff)?;
    Ok(Conditioned { signal, volume })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_offset_and_measures_volume() {
        let frame: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 1.5 } else { 0.5 }).collect();
        let conditioned = condition(&frame, 44100, 100.0).unwrap();
        // Square wave of amplitude 0.5 around 1.0.
        assert!((conditioned.volume - 0.5).abs() < 1e-9);
        assert_eq!(conditioned.signal.len(), 1000);
    }

    #[test]
    fn constant_frame_is_silent() {
        assert!(matches!(condition(&[0.3; 64], 44100, 100.0), Err(Error::SilentFrame)));
        assert!(matches!(condition(&[0.0; 64], 44100, 100.0), Err(Error::SilentFrame)));
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(condition(&[], 44100, 100.0), Err(Error::EmptyFrame)));
        assert!(matches!(
            condition(&[0.1, f32::NAN, 0.2], 44100, 100.0),
            Err(Error::NonFiniteFrame)
        ));
    }

    #[test]
    fn high_pass_attenuates_low_tone() {
        let sr = 44100;
        let tone = |freq: f64| -> Vec<f64> {
            (0..8192)
                .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sr as f64).sin())
                .collect()
        };
        let mut low = tone(20.0);
        let mut high = tone(1000.0);
        high_pass(&mut low, sr, 160.0).unwrap();
        high_pass(&mut high, sr, 160.0).unwrap();
        // Skip the filter's start-up transient.
        assert!(rms(&low[4096..]) < 0.05);
        assert!(rms(&high[4096..]) > 0.65);
    }

    #[test]
    fn cutoff_above_nyquist_is_an_error() {
        let mut signal = vec![0.0; 16];
        assert!(matches!(high_pass(&mut signal, 8000, 6000.0), Err(Error::Filter(_))));
    }
}
