use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::stats;
use crate::analysis::trend::TrendSeries;
use crate::config::AnalysisConfig;
use crate::detect::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ZScore,
    MedianDeviation,
}

/// One bucket whose value exceeded the detector's threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub metric: String,
    pub group: Option<String>,
    pub bucket: String,
    pub observed: f64,
    /// Mean for z-score flags, median for traffic flags.
    pub baseline: f64,
    pub deviation_score: f64,
    pub method: DetectionMethod,
    pub severity: Severity,
}

/// Stateless per-series outlier tests.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    z_threshold: f64,
    traffic_threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(2.0, 0.5)
    }
}

impl AnomalyDetector {
    pub fn new(z_threshold: f64, traffic_threshold: f64) -> Self {
        Self {
            z_threshold,
            traffic_threshold,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.z_threshold, config.traffic_deviation_threshold)
    }

    /// Flag buckets with `|z| > z_threshold` against the series' own
    /// population mean and std dev. Missing values are ignored.
    pub fn zscore(&self, series: &TrendSeries) -> Vec<AnomalyFlag> {
        self.zscore_in_group(series, None)
    }

    /// Z-score test applied within each group independently.
    pub fn zscore_grouped(&self, groups: &BTreeMap<String, TrendSeries>) -> Vec<AnomalyFlag> {
        groups
            .iter()
            .flat_map(|(group, series)| self.zscore_in_group(series, Some(group)))
            .collect()
    }

    fn zscore_in_group(&self, series: &TrendSeries, group: Option<&str>) -> Vec<AnomalyFlag> {
        let present: Vec<(&str, f64)> = series
            .points
            .iter()
            .filter_map(|p| p.value.map(|v| (p.bucket.as_str(), v)))
            .collect();
        let values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
        let Some(mean) = stats::mean(&values) else {
            return Vec::new();
        };

        present
            .iter()
            .zip(stats::z_scores(&values))
            .filter(|(_, z)| z.abs() > self.z_threshold)
            .map(|((bucket, observed), z)| AnomalyFlag {
                metric: series.name.clone(),
                group: group.map(str::to_string),
                bucket: bucket.to_string(),
                observed: *observed,
                baseline: mean,
                deviation_score: z,
                method: DetectionMethod::ZScore,
                severity: severity_for(z, self.z_threshold),
            })
            .collect()
    }

    /// Flag buckets whose relative deviation from the series median exceeds
    /// the traffic threshold. A zero median flags nothing.
    pub fn traffic(&self, series: &TrendSeries) -> Vec<AnomalyFlag> {
        let values: Vec<f64> = series.points.iter().filter_map(|p| p.value).collect();
        let Some(median) = stats::median(&values) else {
            return Vec::new();
        };
        if median.abs() <= f64::EPSILON {
            return Vec::new();
        }

        series
            .points
            .iter()
            .filter_map(|p| {
                let observed = p.value?;
                let deviation = (observed - median).abs() / median;
                (deviation > self.traffic_threshold).then(|| AnomalyFlag {
                    metric: series.name.clone(),
                    group: None,
                    bucket: p.bucket.clone(),
                    observed,
                    baseline: median,
                    deviation_score: deviation,
                    method: DetectionMethod::MedianDeviation,
                    severity: severity_for(deviation, self.traffic_threshold),
                })
            })
            .collect()
    }
}

/// Severity from how far a score overshoots its threshold.
fn severity_for(score: f64, threshold: f64) -> Severity {
    let ratio = score.abs() / threshold;
    if ratio >= 2.0 {
        Severity::High
    } else if ratio >= 1.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}
