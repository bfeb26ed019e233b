//! # Fast Fourier Transform (FFT) Module
//!
//! FFT-backed autocorrelation for the pitch estimator. The autocorrelation
//! is computed with the Wiener-Khinchin identity: the inverse transform of
//! the power spectrum of the zero-padded frame.
//!
//! ## Features
//! - High-performance FFT using RustFFT, plans cached across frames
//! - Padding to a fast transform length with only small prime factors
//! - Linear (not circular) correlation for every requested lag

use rustfft::{FftPlanner, num_complex::Complex};

/// Smallest "nice" transform length of at least `min_len`.
///
/// Candidates are 16, 18, 20, 24, 25, 27, 30 or 32 times a power of two,
/// which keeps the prime factors to 2, 3 and 5.
pub fn fast_len(min_len: usize) -> usize {
    const NICE_SIZES: [usize; 8] = [16, 18, 20, 24, 25, 27, 30, 32];
    let octave = usize::BITS - (min_len / 32).leading_zeros();
    let scale = 1usize << octave;
    NICE_SIZES
        .iter()
        .map(|size| size * scale)
        .filter(|&size| size >= min_len)
        .min()
        .unwrap_or_else(|| min_len.next_power_of_two())
}

/// Computes autocorrelation curves, reusing FFT plans between frames.
pub struct Autocorrelator {
    planner: FftPlanner<f64>,
}

impl Default for Autocorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Autocorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autocorrelator").finish_non_exhaustive()
    }
}

impl Autocorrelator {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Returns `acf[tau] = sum_n x[n] * x[n + tau]` for `tau` in
    /// `0..max_lag` (`max_lag` is capped at the signal length).
    ///
    /// The frame is zero-padded past `len + max_lag`, so no lag wraps around.
    pub fn autocorrelate(&mut self, signal: &[f64], max_lag: usize) -> Vec<f64> {
        let max_lag = max_lag.min(signal.len());
        if max_lag == 0 {
            return Vec::new();
        }
        let size = fast_len(signal.len() + max_lag);
        let forward = self.planner.plan_fft_forward(size);
        let inverse = self.planner.plan_fft_inverse(size);

        let mut buffer: Vec<Complex<f64>> = signal
            .iter()
            .map(|&sample| Complex { re: sample, im: 0.0 })
            .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }))
            .take(size)
            .collect();

        forward.process(&mut buffer);
        // X * conj(X): the power spectrum.
        for bin in buffer.iter_mut() {
            *bin = Complex {
                re: bin.norm_sqr(),
                im: 0.0,
            };
        }
        inverse.process(&mut buffer);

        // RustFFT leaves the inverse unnormalized.
        let scale = 1.0 / size as f64;
        buffer.iter().take(max_lag).map(|c| c.re * scale).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_acf(signal: &[f64], max_lag: usize) -> Vec<f64> {
        (0..max_lag)
            .map(|tau| {
                signal
                    .iter()
                    .zip(signal.iter().skip(tau))
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect()
    }

    #[test]
    fn fast_len_covers_request() {
        assert_eq!(fast_len(4096 + 225), 4608);
        assert_eq!(fast_len(16), 16);
        for n in [1, 31, 33, 100, 1000, 5000, 12345] {
            let len = fast_len(n);
            assert!(len >= n, "{len} < {n}");
            assert!(len < 2 * n + 32, "{len} too large for {n}");
        }
    }

    #[test]
    fn matches_direct_autocorrelation() {
        let signal: Vec<f64> = (0..200)
            .map(|i| (i as f64 * 0.37).sin() + 0.25 * (i as f64 * 1.3).cos())
            .collect();
        let mut acf = Autocorrelator::new();
        let fast = acf.autocorrelate(&signal, 64);
        let slow = direct_acf(&signal, 64);
        assert_eq!(fast.len(), 64);
        for (a, b) in fast.iter().zip(&slow) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn zero_lag_is_energy() {
        let signal = [1.0, -2.0, 3.0];
        let acf = Autocorrelator::new().autocorrelate(&signal, 10);
        assert_eq!(acf.len(), 3);
        assert!((acf[0] - 14.0).abs() < 1e-9);
        assert!((acf[2] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_signal_gives_empty_curve() {
        assert!(Autocorrelator::new().autocorrelate(&[], 10).is_empty());
    }
}
