//! Runs every analysis section for one window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::analysis::aggregator::{
    self, ActionShare, CategoryCount, EndpointPerformance, FailedAuthCount, FunctionPerformance,
    OverviewMetrics, SourceAddressSummary, TrafficBySource, UserActivity,
};
use crate::analysis::correlation::{CorrelationEngine, CorrelationView};
use crate::analysis::trend::{self, TrendReport};
use crate::config::AnalyticsConfig;
use crate::detect::alert::{self, Alert};
use crate::detect::{AnomalyDetector, AnomalyFlag};
use crate::logs::TimeWindow;
use crate::storage::{Freshness, LogSnapshot, LogStore};

/// Top-N cut for the small distribution tables.
const TOP_N: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Distributions {
    pub methods: Vec<CategoryCount>,
    pub execution_statuses: Vec<CategoryCount>,
    pub actions: Vec<ActionShare>,
    pub top_endpoints: Vec<CategoryCount>,
    pub top_sources: Vec<TrafficBySource>,
}

impl Distributions {
    pub fn from_snapshot(snapshot: &LogSnapshot) -> Self {
        Self {
            methods: aggregator::method_distribution(&snapshot.access),
            execution_statuses: aggregator::execution_status_distribution(&snapshot.execution),
            actions: aggregator::action_shares(&snapshot.network),
            top_endpoints: aggregator::top_endpoints(&snapshot.access, TOP_N),
            top_sources: aggregator::top_sources_by_bytes(&snapshot.network, TOP_N),
        }
    }
}

/// All sections for one window. Each section is empty, never an error, when
/// the window holds no rows.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub window: TimeWindow,
    pub generated_at: DateTime<Utc>,
    pub overview: OverviewMetrics,
    pub trends: TrendReport,
    pub endpoints: Vec<EndpointPerformance>,
    pub functions: Vec<FunctionPerformance>,
    pub users: Vec<UserActivity>,
    pub failed_auth: Vec<FailedAuthCount>,
    pub sources: Vec<SourceAddressSummary>,
    pub distributions: Distributions,
    pub anomalies: Vec<AnomalyFlag>,
    pub alerts: Vec<Alert>,
    pub correlation: CorrelationView,
}

impl AnalysisReport {
    pub fn is_empty(&self) -> bool {
        self.overview.total_requests == 0 && self.trends.is_empty() && self.correlation.is_empty()
    }
}

pub fn trend_section(snapshot: &LogSnapshot, config: &AnalyticsConfig) -> TrendReport {
    trend::build_trends(
        &snapshot.access,
        &snapshot.execution,
        config.analysis.bucket,
        Some(config.analysis.rolling_span),
    )
}

/// Latency and error-rate spikes, per-function latency spikes, and hourly
/// traffic deviations, in that order.
pub fn anomaly_section(snapshot: &LogSnapshot, config: &AnalyticsConfig) -> Vec<AnomalyFlag> {
    let detector = AnomalyDetector::from_config(&config.analysis);
    let trends = trend_section(snapshot, config);

    let mut flags = Vec::new();
    for metric in ["avg_latency_ms", "error_rate"] {
        if let Some(series) = trends.series(metric) {
            flags.extend(detector.zscore(series));
        }
    }
    let per_function = trend::function_latency_trend(&snapshot.execution, config.analysis.bucket);
    flags.extend(detector.zscore_grouped(&per_function));
    flags.extend(detector.traffic(&trend::hourly_traffic(&snapshot.access)));

    debug!(flags = flags.len(), "anomaly scan complete");
    flags
}

/// Source-address alerts followed by anomaly alerts, most urgent first.
pub fn alert_section(snapshot: &LogSnapshot, config: &AnalyticsConfig, anomalies: &[AnomalyFlag]) -> Vec<Alert> {
    let summaries = aggregator::source_address_summaries(&snapshot.network, &snapshot.access);
    let mut alerts = alert::classify_sources(&config.alerts, &summaries);
    alerts.extend(anomalies.iter().map(alert::anomaly_alert));
    // Stable sort keeps error-rate order within a tier.
    alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
    alerts
}

pub fn run_report(store: &LogStore, window: &TimeWindow, config: &AnalyticsConfig, freshness: Freshness) -> AnalysisReport {
    info!(%window, "running analysis report");
    let snapshot = store.snapshot(window, freshness);
    let analysis = &config.analysis;

    let anomalies = anomaly_section(&snapshot, config);
    let alerts = alert_section(&snapshot, config, &anomalies);
    let correlation = CorrelationEngine::new(store.clone(), analysis.correlation_limit).correlate(window);

    let report = AnalysisReport {
        window: *window,
        generated_at: Utc::now(),
        overview: aggregator::overview(&snapshot.access, &snapshot.execution, &snapshot.network),
        trends: trend_section(&snapshot, config),
        endpoints: aggregator::endpoint_performance(&snapshot.access, &snapshot.execution, analysis.top_endpoints),
        functions: aggregator::function_performance(&snapshot.execution),
        users: aggregator::user_activity(&snapshot.access, &snapshot.execution, analysis.top_users),
        failed_auth: aggregator::failed_auth_by_endpoint(&snapshot.access, TOP_N),
        sources: aggregator::suspicious_sources(
            &aggregator::source_address_summaries(&snapshot.network, &snapshot.access),
            config.alerts.min_requests,
            analysis.top_sources,
        ),
        distributions: Distributions::from_snapshot(&snapshot),
        anomalies,
        alerts,
        correlation,
    };

    info!(
        %window,
        requests = report.overview.total_requests,
        anomalies = report.anomalies.len(),
        alerts = report.alerts.len(),
        "analysis report complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{AccessEvent, ExecutionEvent, ExecutionStatus, NetworkAction, NetworkEvent};
    use chrono::{Duration, TimeZone};

    fn snapshot_with_noisy_source() -> LogSnapshot {
        let start = Utc.with_ymd_and_hms(2025, 4, 13, 0, 0, 0).unwrap();
        let window = TimeWindow::new(start, start + Duration::days(1)).unwrap();
        let mut snapshot = LogSnapshot::empty(window);
        for i in 0..15i64 {
            let rid = format!("req-{}", i);
            let ts = start + Duration::minutes(i);
            snapshot.access.push(AccessEvent {
                timestamp: ts,
                user_id: format!("user_{}", i % 3),
                endpoint: "/api/login".into(),
                method: "POST".into(),
                status_code: if i < 9 { 401 } else { 200 },
                request_id: rid.clone(),
            });
            snapshot.execution.push(ExecutionEvent {
                timestamp: ts,
                function_name: "authenticate".into(),
                duration_ms: 120.0,
                status: ExecutionStatus::Success,
                request_id: rid.clone(),
            });
            snapshot.network.push(NetworkEvent {
                timestamp: ts,
                src_ip: "203.0.113.7".into(),
                dst_ip: "10.0.0.1".into(),
                action: NetworkAction::Accept,
                bytes_sent: 512,
                request_id: rid,
            });
        }
        snapshot
    }

    #[test]
    fn test_alert_section_flags_noisy_source() {
        let snapshot = snapshot_with_noisy_source();
        let config = AnalyticsConfig::default();
        let anomalies = anomaly_section(&snapshot, &config);
        let alerts = alert_section(&snapshot, &config, &anomalies);
        assert_eq!(alerts[0].subject, "203.0.113.7");
        assert_eq!(alerts[0].severity, crate::detect::Severity::Critical);
        assert_eq!(alerts[0].description, "60.0% error rate across 15 requests affecting 3 users");
    }

    #[test]
    fn test_sections_on_empty_snapshot() {
        let start = Utc.with_ymd_and_hms(2025, 4, 13, 0, 0, 0).unwrap();
        let snapshot = LogSnapshot::empty(TimeWindow::new(start, start).unwrap());
        let config = AnalyticsConfig::default();
        assert!(trend_section(&snapshot, &config).is_empty());
        assert!(anomaly_section(&snapshot, &config).is_empty());
        assert!(alert_section(&snapshot, &config, &[]).is_empty());
        let dists = Distributions::from_snapshot(&snapshot);
        assert!(dists.methods.is_empty() && dists.actions.is_empty());
    }
}
