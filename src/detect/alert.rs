use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::aggregator::SourceAddressSummary;
use crate::detect::{AnomalyFlag, DetectionMethod, Severity};

/// Cutoffs for source-address alerts. Rates are percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRules {
    /// Sources need strictly more requests than this to be evaluated.
    pub min_requests: u64,
    pub medium_error_rate: f64,
    pub high_error_rate: f64,
    pub critical_error_rate: f64,
    pub max_alerts: usize,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            min_requests: 10,
            medium_error_rate: 20.0,
            high_error_rate: 30.0,
            critical_error_rate: 50.0,
            max_alerts: 5,
        }
    }
}

impl AlertRules {
    /// Tier for an error rate, `None` below the medium cutoff.
    pub fn tier(&self, error_rate: f64) -> Option<Severity> {
        if error_rate > self.critical_error_rate {
            Some(Severity::Critical)
        } else if error_rate > self.high_error_rate {
            Some(Severity::High)
        } else if error_rate > self.medium_error_rate {
            Some(Severity::Medium)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SourceAddress,
    Anomaly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: Severity,
    pub kind: AlertKind,
    /// Source address or metric name the alert is about.
    pub subject: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    fn new(severity: Severity, kind: AlertKind, subject: String, title: String, description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            kind,
            subject,
            title,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Classify one source-address aggregate. Low-volume sources never alert.
pub fn classify_source(rules: &AlertRules, summary: &SourceAddressSummary) -> Option<Alert> {
    if summary.request_count <= rules.min_requests {
        return None;
    }
    let severity = rules.tier(summary.error_rate)?;
    Some(Alert::new(
        severity,
        AlertKind::SourceAddress,
        summary.src_ip.clone(),
        format!("Suspicious activity from {}", summary.src_ip),
        format!(
            "{:.1}% error rate across {} requests affecting {} users",
            summary.error_rate, summary.request_count, summary.users_affected
        ),
    ))
}

/// Alerts for every qualifying source, highest error rate first, capped at
/// `rules.max_alerts`.
pub fn classify_sources(rules: &AlertRules, summaries: &[SourceAddressSummary]) -> Vec<Alert> {
    let mut ranked: Vec<&SourceAddressSummary> = summaries.iter().collect();
    ranked.sort_by(|a, b| b.error_rate.total_cmp(&a.error_rate));
    ranked
        .into_iter()
        .filter_map(|s| classify_source(rules, s))
        .take(rules.max_alerts)
        .collect()
}

pub fn anomaly_alert(flag: &AnomalyFlag) -> Alert {
    let subject = match &flag.group {
        Some(group) => format!("{} ({})", flag.metric, group),
        None => flag.metric.clone(),
    };
    let score = match flag.method {
        DetectionMethod::ZScore => format!("z = {:.2}", flag.deviation_score),
        DetectionMethod::MedianDeviation => format!("{:.0}% from median", flag.deviation_score * 100.0),
    };
    Alert::new(
        flag.severity,
        AlertKind::Anomaly,
        subject.clone(),
        format!("Anomalous {} at {}", subject, flag.bucket),
        format!("observed {:.1} against baseline {:.1} ({})", flag.observed, flag.baseline, score),
    )
}
