//! Beta prior over YIN absolute thresholds.

use std::f64::consts::PI;

use crate::config::PyinConfig;

/// `n` evenly spaced thresholds in `(0, 1]`, each weighted by
/// `beta_pdf(threshold) / n`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdPrior {
    thresholds: Vec<f64>,
    weights: Vec<f64>,
}

impl ThresholdPrior {
    pub fn new(config: &PyinConfig) -> Self {
        let n = config.n_thresholds.max(1);
        let thresholds: Vec<f64> = (1..=n).map(|i| i as f64 / n as f64).collect();
        let weights = thresholds
            .iter()
            .map(|&t| beta_pdf(t, config.beta_a, config.beta_b) / n as f64)
            .collect();
        Self {
            thresholds,
            weights,
        }
    }

    /// `(threshold, weight)` pairs in increasing threshold order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.thresholds.iter().copied().zip(self.weights.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Sum of all weights; close to 1 for a fine grid.
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }
}

/// Beta distribution density at `x`.
pub fn beta_pdf(x: f64, a: f64, b: f64) -> f64 {
    if !(0.0..=1.0).contains(&x) {
        return 0.0;
    }
    // The density is 0 at an edge unless that exponent is <= 0.
    if (x == 0.0 && a > 1.0) || (x == 1.0 && b > 1.0) {
        return 0.0;
    }
    let ln_beta = ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b);
    ((a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() - ln_beta).exp()
}

/// Natural log of the gamma function (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula.
        return (PI / (PI * x).sin()).abs().ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + G + 0.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ln_gamma_known_values() {
        assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(2.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(5.0), 24.0_f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(ln_gamma(0.5), PI.sqrt().ln(), epsilon = 1e-10);
    }

    #[test]
    fn beta_pdf_matches_closed_form() {
        // Beta(2, 2) = 6 x (1 - x).
        assert_relative_eq!(beta_pdf(0.3, 2.0, 2.0), 6.0 * 0.3 * 0.7, epsilon = 1e-10);
        assert_eq!(beta_pdf(1.0, 2.0, 11.0), 0.0);
        assert_eq!(beta_pdf(1.5, 2.0, 11.0), 0.0);
    }

    #[test]
    fn prior_weights_sum_to_about_one() {
        let prior = ThresholdPrior::new(&PyinConfig::default());
        assert_eq!(prior.len(), 100);
        assert_relative_eq!(prior.total_weight(), 1.0, epsilon = 0.02);
        // Mass concentrates around the 0.15 mean.
        let (peak, _) = prior
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        assert!((0.05..=0.15).contains(&peak), "mode at {peak}");
    }
}
