//! Peak picking on the autocorrelation curve.

/// Number of prominence levels tried before falling back to the maximum.
pub const PROMINENCE_RETRIES: usize = 5;

/// Indices of the local maxima of `x`. A flat top counts once, at its
/// middle sample. The first and last samples are never peaks.
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Topographic prominence of the peak at `peak`: its height above the
/// higher of the two lowest points reachable before climbing above it.
pub fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];

    let mut left_min = height;
    for &value in x[..=peak].iter().rev() {
        if value > height {
            break;
        }
        left_min = left_min.min(value);
    }

    let mut right_min = height;
    for &value in &x[peak..] {
        if value > height {
            break;
        }
        right_min = right_min.min(value);
    }

    height - left_min.max(right_min)
}

/// Peaks of `acf` inside `lags` whose prominence is at least
/// `min_prominence`, in increasing lag order.
pub fn prominent_peaks(acf: &[f64], lags: std::ops::Range<usize>, min_prominence: f64) -> Vec<usize> {
    local_maxima(acf)
        .into_iter()
        .filter(|peak| lags.contains(peak))
        .filter(|&peak| prominence(acf, peak) >= min_prominence)
        .collect()
}

/// Candidate periods for one frame.
///
/// Starts at half the curve's range and halves the required prominence up
/// to [`PROMINENCE_RETRIES`] times. With no peak at any level, falls back to
/// the global maximum inside `lags`. Empty only when `lags` misses the
/// curve entirely.
pub fn candidate_lags(acf: &[f64], lags: std::ops::Range<usize>) -> Vec<usize> {
    let lags = lags.start..lags.end.min(acf.len());
    if lags.is_empty() {
        return Vec::new();
    }

    let max = acf.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = acf.iter().copied().fold(f64::INFINITY, f64::min);
    let mut level = ((max - min) / 2.0).abs();

    for _ in 0..PROMINENCE_RETRIES {
        let peaks = prominent_peaks(acf, lags.clone(), level);
        if !peaks.is_empty() {
            return peaks;
        }
        level /= 2.0;
    }

    let best = lags
        .clone()
        .max_by(|&a, &b| acf[a].total_cmp(&acf[b]).then(b.cmp(&a)))
        .unwrap_or(lags.start);
    vec![best]
}

/// Refines a peak position by fitting a parabola through it and its two
/// neighbours. Boundary or degenerate cases return the integer index.
pub fn parabolic_interpolation(curve: &[f64], peak: usize) -> f64 {
    if peak == 0 || peak + 1 >= curve.len() {
        return peak as f64;
    }
    let (y1, y2, y3) = (curve[peak - 1], curve[peak], curve[peak + 1]);
    let denominator = 2.0 * (y1 - 2.0 * y2 + y3);
    if denominator == 0.0 {
        return peak as f64;
    }
    peak as f64 + (y1 - y3) / denominator
}

/// Period of the candidate at `lag`, refined on `acf` and kept inside the
/// searched `periods`. A lag on a slope (the argmax fallback) would
/// otherwise be pulled out of range by the fit.
pub fn refine_period(acf: &[f64], lag: usize, periods: std::ops::RangeInclusive<usize>) -> f64 {
    parabolic_interpolation(acf, lag).clamp(*periods.start() as f64, *periods.end() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_maxima_and_plateau_middles() {
        let x = [0.0, 2.0, 1.0, 3.0, 3.0, 3.0, 0.0, 1.0];
        assert_eq!(local_maxima(&x), vec![1, 4]);
        assert!(local_maxima(&[1.0, 2.0]).is_empty());
        // A rising edge at the end is not a peak.
        assert!(local_maxima(&[0.0, 1.0, 2.0]).is_empty());
    }

    #[test]
    fn prominence_uses_higher_base() {
        let x = [0.0, 5.0, 1.0, 3.0, 2.0, 4.0, -1.0];
        // Peak 3.0 sits between bases 1.0 (left, until 5.0) and 2.0 (right, until 4.0).
        assert_eq!(prominence(&x, 3), 1.0);
        // Peak 5.0 is the highest: bases 0.0 (left) and -1.0 (right).
        assert_eq!(prominence(&x, 1), 5.0);
    }

    #[test]
    fn retries_at_lower_prominence() {
        let mut acf = vec![10.0, 0.0];
        acf.extend([0.5, 0.0, 0.0, 0.0]);
        // Only small bumps inside the lag range.
        let peaks = candidate_lags(&acf, 1..6);
        assert_eq!(peaks, vec![2]);
    }

    #[test]
    fn falls_back_to_global_maximum() {
        let acf = [10.0, 8.0, 6.0, 4.0, 2.0];
        assert_eq!(candidate_lags(&acf, 1..5), vec![1]);
        assert!(candidate_lags(&acf, 7..9).is_empty());
    }

    #[test]
    fn parabola_vertex() {
        // y = -(x - 2.25)^2 sampled at 1, 2, 3.
        let curve: Vec<f64> = (0..5).map(|x| -((x as f64 - 2.25).powi(2))).collect();
        assert!((parabolic_interpolation(&curve, 2) - 2.25).abs() < 1e-12);
        assert_eq!(parabolic_interpolation(&curve, 0), 0.0);
        assert_eq!(parabolic_interpolation(&curve, 4), 4.0);
        assert_eq!(parabolic_interpolation(&[1.0, 1.0, 1.0], 1), 1.0);
    }

    #[test]
    fn peak_at_last_searched_lag_is_found() {
        // Rises into lag 4 and falls after it; lag 5 is only a neighbour.
        let acf = [10.0, 2.0, 0.0, 4.0, 6.0, 5.0];
        assert_eq!(candidate_lags(&acf, 2..5), vec![4]);
    }

    #[test]
    fn refinement_stays_in_range() {
        // Monotonic decay: the fallback lands on the lower bound and the
        // parabola would push it further down.
        let acf = [10.0, 8.0, 5.0, 1.0, 0.0, -2.0];
        let lag = candidate_lags(&acf, 2..5)[0];
        assert_eq!(lag, 2);
        assert!(parabolic_interpolation(&acf, lag) < 2.0);
        assert_eq!(refine_period(&acf, lag, 2..=4), 2.0);

        let curve: Vec<f64> = (0..5).map(|x| -((x as f64 - 2.25).powi(2))).collect();
        assert!((refine_period(&curve, 2, 1..=3) - 2.25).abs() < 1e-12);
    }
}
