//! Linear-interpolation percentile over an unsorted sample slice.
//!
//! Deliberately not the teacher's logarithmic-bucket histogram: order
//! execution metrics need exact quantiles on a few hundred samples, not an
//! approximation tuned for millions of latency observations per second.

/// `p` in `[0.0, 1.0]`. Returns 0.0 for an empty sample set.
pub fn percentile(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile_sorted(&sorted, p)
}

/// Same as [`percentile`] but assumes `sorted` is already sorted ascending,
/// for callers that keep a sorted snapshot around.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let p = p.clamp(0.0, 1.0);
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn single_sample_is_itself() {
        assert_eq!(percentile(&[42.0], 0.99), 42.0);
    }

    #[test]
    fn median_of_five() {
        let samples = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert_eq!(percentile(&samples, 0.5), 3.0);
    }

    #[test]
    fn p95_interpolates() {
        let samples: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        let p95 = percentile(&samples, 0.95);
        assert!((p95 - 95.05).abs() < 1e-9);
    }

    #[test]
    fn monotonic_in_p() {
        let samples = [10.0, 20.0, 30.0, 40.0, 50.0];
        let p50 = percentile(&samples, 0.5);
        let p90 = percentile(&samples, 0.9);
        assert!(p90 >= p50);
    }
}
