//! Small statistical helpers shared by every analyzer
//!
//! All functions are pure, operate on slices, and treat degenerate input
//! (empty slices, zero variance) as a well-defined result rather than a
//! panic. Population variance is used throughout, matching how the
//! detectors' thresholds were calibrated.

/// Arithmetic mean; 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance; 0.0 for an empty slice
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0.0 for an empty slice
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Pearson correlation of two equal-length slices.
///
/// Returns `None` when either side has zero variance (correlation is
/// undefined there, and callers treat those pairs as uncorrelated).
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    debug_assert_eq!(a.len(), b.len());
    let n = a.len();
    if n == 0 {
        return None;
    }
    let mean_a = mean(a);
    let mean_b = mean(b);

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some(cov / denom)
}

/// Ordinary least squares slope of `values` against index 0..n.
///
/// 0.0 when fewer than two points or when all indices collapse (cannot
/// happen with index-x, kept for symmetry with `pearson`).
pub fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = mean(values);

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, v) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (v - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// The k-th largest value (1-based); `None` when `k` is out of range.
///
/// Used to turn a contamination fraction into a score threshold: the
/// ceil(contamination * n)-th largest score is the cutoff.
pub fn kth_largest(values: &[f64], k: usize) -> Option<f64> {
    if k == 0 || k > values.len() {
        return None;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    Some(sorted[k - 1])
}

/// Mean absolute error between predictions and actuals
pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> f64 {
    debug_assert_eq!(predicted.len(), actual.len());
    if predicted.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual.iter())
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / predicted.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-12);
        assert!((std_dev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_slices_are_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(ols_slope(&[]), 0.0);
    }

    #[test]
    fn test_pearson_perfect_correlation() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 4.0, 6.0, 8.0, 10.0];
        let r = pearson(&a, &b).unwrap();
        assert!((r - 1.0).abs() < 1e-12);

        let inverted: Vec<f64> = b.iter().map(|v| -v).collect();
        let r = pearson(&a, &inverted).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_undefined_for_constant_series() {
        let a = [1.0, 2.0, 3.0];
        let b = [5.0, 5.0, 5.0];
        assert!(pearson(&a, &b).is_none());
    }

    #[test]
    fn test_ols_slope_on_line() {
        let values = [3.0, 5.0, 7.0, 9.0];
        assert!((ols_slope(&values) - 2.0).abs() < 1e-12);

        let flat = [4.0, 4.0, 4.0, 4.0];
        assert!(ols_slope(&flat).abs() < 1e-12);
    }

    #[test]
    fn test_kth_largest() {
        let values = [0.1, 0.9, 0.5, 0.7];
        assert_eq!(kth_largest(&values, 1), Some(0.9));
        assert_eq!(kth_largest(&values, 2), Some(0.7));
        assert_eq!(kth_largest(&values, 4), Some(0.1));
        assert_eq!(kth_largest(&values, 5), None);
        assert_eq!(kth_largest(&values, 0), None);
    }

    #[test]
    fn test_mean_absolute_error() {
        let predicted = [1.0, 2.0, 3.0];
        let actual = [1.5, 2.0, 2.0];
        assert!((mean_absolute_error(&predicted, &actual) - 0.5).abs() < 1e-12);
    }
}
