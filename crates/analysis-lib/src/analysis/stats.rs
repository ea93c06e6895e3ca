//! Statistics helpers shared by the analyzers
//!
//! All dispersion measures use the population form (divide by `n`).

use crate::models::MetricSample;

pub fn values(samples: &[MetricSample]) -> Vec<f64> {
    samples.iter().map(|s| s.value).collect()
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn mean_of_samples(samples: &[MetricSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
}

/// Population standard deviation, 0 for an empty slice
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// `std_dev / mean`, 0 when the mean is not positive
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let avg = mean(values);
    if avg <= f64::EPSILON {
        return 0.0;
    }
    std_dev(values) / avg
}

pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Percentile with linear interpolation between closest ranks
///
/// `idx = p/100 * (n-1)` on the sorted values; the result interpolates
/// between `floor(idx)` and `ceil(idx)`. Returns 0 for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let index = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let low = index.floor() as usize;
    let high = index.ceil() as usize;
    if low == high {
        return sorted[low];
    }
    sorted[low] * (high as f64 - index) + sorted[high] * (index - low as f64)
}

/// Gini coefficient `ΣΣ|xi - xj| / (2 n Σx)`
///
/// 0 for a perfectly even distribution, approaching 1 when one entry holds
/// everything. Returns 0 when the sum is not positive.
pub fn gini(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    if values.is_empty() || sum <= 0.0 {
        return 0.0;
    }
    let mut abs_diff = 0.0;
    for xi in values {
        for xj in values {
            abs_diff += (xi - xj).abs();
        }
    }
    abs_diff / (2.0 * n * sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN: [f64; 10] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];

    #[test]
    fn test_percentile_interpolates() {
        assert!((percentile(&TEN, 95.0) - 9.55).abs() < 1e-9);
        assert!((percentile(&TEN, 50.0) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_bounds() {
        let shuffled = [7.0, 3.0, 10.0, 1.0, 5.5];
        assert_eq!(percentile(&shuffled, 0.0), 1.0);
        assert_eq!(percentile(&shuffled, 100.0), 10.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
        assert_eq!(percentile(&[4.2], 95.0), 4.2);
    }

    #[test]
    fn test_std_dev_population() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&values) - 2.0).abs() < 1e-9);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn test_coefficient_of_variation_zero_mean() {
        assert_eq!(coefficient_of_variation(&[0.0, 0.0, 0.0]), 0.0);
        assert!((coefficient_of_variation(&[1.0, 3.0]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_max_and_mean() {
        assert_eq!(max(&TEN), 10.0);
        assert_eq!(max(&[]), 0.0);
        assert_eq!(mean(&TEN), 5.5);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_gini_even_and_concentrated() {
        assert_eq!(gini(&[3.0, 3.0, 3.0, 3.0]), 0.0);

        let mut loads = vec![0.0; 9];
        loads.push(12.0);
        assert!((gini(&loads) - 0.9).abs() < 1e-9);
        assert_eq!(gini(&[0.0, 0.0]), 0.0);
    }
}
