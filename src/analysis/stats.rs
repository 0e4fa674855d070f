//! Descriptive statistics over plain `f64` samples.
//!
//! Every function has a defined result for empty input: rates are 0,
//! everything else is `None`.

use serde::{Deserialize, Serialize};

/// Percentage of `matching` in `total`, 0 when `total` is 0.
pub fn rate(matching: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * matching as f64 / total as f64
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance (divides by n).
pub fn variance(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let sum_sq_diff: f64 = values.iter().map(|&x| (x - mean).powi(2)).sum();
    Some(sum_sq_diff / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 0.5)
}

/// Quantile `q` in `[0, 1]` with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q = q.clamp(0.0, 1.0);
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Z-score of every value against the sample's own mean and std dev.
/// A constant sample (σ = 0) scores 0 everywhere.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    let (Some(mean), Some(std)) = (mean(values), std_dev(values)) else {
        return Vec::new();
    };
    if std <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Five-number summary plus mean, as used for box-plot style distributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: u64,
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
    pub mean: f64,
}

impl Distribution {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            count: values.len() as u64,
            min: percentile(values, 0.0)?,
            p25: percentile(values, 0.25)?,
            median: percentile(values, 0.5)?,
            p75: percentile(values, 0.75)?,
            max: percentile(values, 1.0)?,
            mean: mean(values)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(mean(&values), Some(3.0));
        // Population variance of 1..5 is 2.0
        assert_eq!(variance(&values), Some(2.0));
        assert!((std_dev(&values).unwrap() - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(median(&values), Some(3.0));
    }

    #[test]
    fn test_empty_inputs_have_defined_results() {
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
        assert_eq!(median(&[]), None);
        assert!(z_scores(&[]).is_empty());
        assert!(Distribution::from_values(&[]).is_none());
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.5), Some(25.0));
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 1.0), Some(40.0));
        assert_eq!(percentile(&[7.0], 0.95), Some(7.0));
    }

    #[test]
    fn test_constant_sample_scores_zero() {
        assert_eq!(z_scores(&[4.0, 4.0, 4.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_single_outlier_z_score() {
        let values = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 5000.0];
        let z = z_scores(&values);
        // With population σ the largest attainable z for n = 8 is sqrt(7).
        assert!((z[7] - 7f64.sqrt()).abs() < 1e-9);
        assert!(z[..7].iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_rate_bounds() {
        assert_eq!(rate(2, 10), 20.0);
        assert_eq!(rate(10, 10), 100.0);
        assert_eq!(rate(0, 10), 0.0);
    }
}
