use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::analysis::correlation::inner_join;
use crate::analysis::stats;
use crate::logs::{AccessEvent, ExecutionEvent, ExecutionStatus, NetworkAction, NetworkEvent};

/// Named scalar metrics for one window or one group.
///
/// `None` means "no data": an average over zero rows, for example.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSnapshot(BTreeMap<String, Option<f64>>);

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<f64>) {
        self.0.insert(name.into(), value);
    }

    /// Value of `name`, `None` when absent or undefined.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied().flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn count(&self, name: &str) -> u64 {
        self.get(name).map_or(0, |v| v.round() as u64)
    }
}

type Reducer<'a, T> = Box<dyn Fn(&[&T]) -> Option<f64> + 'a>;

/// A named reduction over a group of rows.
pub struct MetricSpec<'a, T> {
    name: &'static str,
    reduce: Reducer<'a, T>,
}

impl<T> MetricSpec<'_, T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn evaluate(&self, rows: &[&T]) -> Option<f64> {
        (self.reduce)(rows)
    }
}

impl<'a, T: 'a> MetricSpec<'a, T> {
    pub fn count(name: &'static str) -> Self {
        Self {
            name,
            reduce: Box::new(|rows: &[&T]| Some(rows.len() as f64)),
        }
    }

    pub fn rate<P>(name: &'static str, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + 'a,
    {
        Self {
            name,
            reduce: Box::new(move |rows: &[&T]| Some(rate_of(rows.iter().copied(), &predicate))),
        }
    }

    pub fn average<F>(name: &'static str, field: F) -> Self
    where
        F: Fn(&T) -> Option<f64> + 'a,
    {
        Self {
            name,
            reduce: Box::new(move |rows: &[&T]| stats::mean(&collect_field(rows, &field))),
        }
    }

    pub fn sum<F>(name: &'static str, field: F) -> Self
    where
        F: Fn(&T) -> Option<f64> + 'a,
    {
        Self {
            name,
            reduce: Box::new(move |rows: &[&T]| Some(collect_field(rows, &field).iter().sum())),
        }
    }

    pub fn max<F>(name: &'static str, field: F) -> Self
    where
        F: Fn(&T) -> Option<f64> + 'a,
    {
        Self {
            name,
            reduce: Box::new(move |rows: &[&T]| {
                collect_field(rows, &field).into_iter().max_by(f64::total_cmp)
            }),
        }
    }

    pub fn percentile<F>(name: &'static str, q: f64, field: F) -> Self
    where
        F: Fn(&T) -> Option<f64> + 'a,
    {
        Self {
            name,
            reduce: Box::new(move |rows: &[&T]| stats::percentile(&collect_field(rows, &field), q)),
        }
    }

    pub fn distinct_count<K, F>(name: &'static str, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + 'a,
    {
        Self {
            name,
            reduce: Box::new(move |rows: &[&T]| {
                Some(rows.iter().map(|r| key(r)).collect::<BTreeSet<_>>().len() as f64)
            }),
        }
    }
}

fn collect_field<T>(rows: &[&T], field: &dyn Fn(&T) -> Option<f64>) -> Vec<f64> {
    rows.iter().filter_map(|r| field(r)).collect()
}

fn rate_of<'r, T: 'r>(rows: impl Iterator<Item = &'r T>, predicate: &dyn Fn(&T) -> bool) -> f64 {
    let (mut total, mut hits) = (0u64, 0u64);
    for row in rows {
        total += 1;
        if predicate(row) {
            hits += 1;
        }
    }
    stats::rate(hits, total)
}

pub fn total_count<T>(rows: &[T]) -> u64 {
    rows.len() as u64
}

/// Percentage of rows matching `predicate`, 0 for an empty set.
pub fn rate<T>(rows: &[T], predicate: impl Fn(&T) -> bool) -> f64 {
    rate_of(rows.iter(), &predicate)
}

/// Mean of the defined values of `field`, `None` when there are none.
pub fn average<T>(rows: &[T], field: impl Fn(&T) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = rows.iter().filter_map(field).collect();
    stats::mean(&values)
}

/// Evaluate `metrics` per distinct `group_key`, keys in ascending order.
pub fn group_aggregate<T, K, G>(rows: &[T], group_key: G, metrics: &[MetricSpec<'_, T>]) -> BTreeMap<K, MetricSnapshot>
where
    K: Ord,
    G: Fn(&T) -> K,
{
    let mut groups: BTreeMap<K, Vec<&T>> = BTreeMap::new();
    for row in rows {
        groups.entry(group_key(row)).or_default().push(row);
    }
    groups
        .into_iter()
        .map(|(key, members)| {
            let mut snapshot = MetricSnapshot::new();
            for metric in metrics {
                snapshot.insert(metric.name(), metric.evaluate(&members));
            }
            (key, snapshot)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Window overview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewMetrics {
    pub total_requests: u64,
    pub avg_latency_ms: Option<f64>,
    pub active_users: u64,
    /// Share of executions with status SUCCESS.
    pub success_rate: f64,
    pub rejected_connections: u64,
    pub failed_executions: u64,
}

impl OverviewMetrics {
    pub fn to_snapshot(&self) -> MetricSnapshot {
        let mut s = MetricSnapshot::new();
        s.insert("total_requests", Some(self.total_requests as f64));
        s.insert("avg_latency_ms", self.avg_latency_ms);
        s.insert("active_users", Some(self.active_users as f64));
        s.insert("success_rate", Some(self.success_rate));
        s.insert("rejected_connections", Some(self.rejected_connections as f64));
        s.insert("failed_executions", Some(self.failed_executions as f64));
        s
    }
}

pub fn overview(access: &[AccessEvent], execution: &[ExecutionEvent], network: &[NetworkEvent]) -> OverviewMetrics {
    OverviewMetrics {
        total_requests: total_count(access),
        avg_latency_ms: average(execution, |e| Some(e.duration_ms)),
        active_users: access.iter().map(|a| a.user_id.as_str()).collect::<BTreeSet<_>>().len() as u64,
        success_rate: rate(execution, |e| e.status == ExecutionStatus::Success),
        rejected_connections: network.iter().filter(|n| n.action == NetworkAction::Reject).count() as u64,
        failed_executions: execution.iter().filter(|e| e.status == ExecutionStatus::Failed).count() as u64,
    }
}

// ---------------------------------------------------------------------------
// Per-entity breakdowns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointPerformance {
    pub endpoint: String,
    pub method: String,
    pub requests: u64,
    pub avg_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    /// Share of responses below 400.
    pub success_rate: f64,
}

/// Access rows joined to their executions, grouped by endpoint and method,
/// busiest first.
pub fn endpoint_performance(access: &[AccessEvent], execution: &[ExecutionEvent], top_n: usize) -> Vec<EndpointPerformance> {
    let pairs = inner_join(access, execution);
    let metrics = [
        MetricSpec::count("requests"),
        MetricSpec::average("avg_duration_ms", |p: &(&AccessEvent, &ExecutionEvent)| Some(p.1.duration_ms)),
        MetricSpec::max("max_duration_ms", |p: &(&AccessEvent, &ExecutionEvent)| Some(p.1.duration_ms)),
        MetricSpec::rate("success_rate", |p: &(&AccessEvent, &ExecutionEvent)| p.0.status_code < 400),
    ];
    let grouped = group_aggregate(
        &pairs,
        |p| (p.0.endpoint.clone(), p.0.method.clone()),
        &metrics,
    );

    let mut rows: Vec<EndpointPerformance> = grouped
        .into_iter()
        .map(|((endpoint, method), s)| EndpointPerformance {
            endpoint,
            method,
            requests: s.count("requests"),
            avg_duration_ms: s.get("avg_duration_ms"),
            max_duration_ms: s.get("max_duration_ms"),
            success_rate: s.get("success_rate").unwrap_or(0.0),
        })
        .collect();
    rows.sort_by(|a, b| b.requests.cmp(&a.requests));
    rows.truncate(top_n);
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPerformance {
    pub function_name: String,
    pub executions: u64,
    pub avg_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub p95_duration_ms: Option<f64>,
    pub success_rate: f64,
}

pub fn function_performance(execution: &[ExecutionEvent]) -> Vec<FunctionPerformance> {
    let metrics = [
        MetricSpec::count("executions"),
        MetricSpec::average("avg_duration_ms", |e: &ExecutionEvent| Some(e.duration_ms)),
        MetricSpec::max("max_duration_ms", |e: &ExecutionEvent| Some(e.duration_ms)),
        MetricSpec::percentile("p95_duration_ms", 0.95, |e: &ExecutionEvent| Some(e.duration_ms)),
        MetricSpec::rate("success_rate", |e: &ExecutionEvent| e.status == ExecutionStatus::Success),
    ];
    let mut rows: Vec<FunctionPerformance> = group_aggregate(execution, |e| e.function_name.clone(), &metrics)
        .into_iter()
        .map(|(function_name, s)| FunctionPerformance {
            function_name,
            executions: s.count("executions"),
            avg_duration_ms: s.get("avg_duration_ms"),
            max_duration_ms: s.get("max_duration_ms"),
            p95_duration_ms: s.get("p95_duration_ms"),
            success_rate: s.get("success_rate").unwrap_or(0.0),
        })
        .collect();
    rows.sort_by(|a, b| b.executions.cmp(&a.executions));
    rows
}

/// Traffic from one source address, matched to the HTTP responses it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAddressSummary {
    pub src_ip: String,
    pub request_count: u64,
    pub errors: u64,
    pub users_affected: u64,
    pub error_rate: f64,
    /// Distinct endpoints, comma separated.
    pub endpoints_accessed: String,
}

/// Network rows joined to access rows, grouped by source address, highest
/// error rate first.
pub fn source_address_summaries(network: &[NetworkEvent], access: &[AccessEvent]) -> Vec<SourceAddressSummary> {
    let pairs = inner_join(network, access);
    let mut groups: BTreeMap<&str, Vec<&AccessEvent>> = BTreeMap::new();
    for &(n, a) in &pairs {
        groups.entry(n.src_ip.as_str()).or_default().push(a);
    }

    let mut rows: Vec<SourceAddressSummary> = groups
        .into_iter()
        .map(|(src_ip, hits)| {
            let errors = hits.iter().filter(|a| a.is_error()).count() as u64;
            let users: BTreeSet<&str> = hits.iter().map(|a| a.user_id.as_str()).collect();
            let endpoints: BTreeSet<&str> = hits.iter().map(|a| a.endpoint.as_str()).collect();
            SourceAddressSummary {
                src_ip: src_ip.to_string(),
                request_count: hits.len() as u64,
                errors,
                users_affected: users.len() as u64,
                error_rate: stats::rate(errors, hits.len() as u64),
                endpoints_accessed: endpoints.into_iter().collect::<Vec<_>>().join(","),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.error_rate.total_cmp(&a.error_rate));
    rows
}

/// Sources with more than `min_requests` requests, highest error rate first,
/// at most `top_n` of them.
pub fn suspicious_sources(
    summaries: &[SourceAddressSummary],
    min_requests: u64,
    top_n: usize,
) -> Vec<SourceAddressSummary> {
    summaries
        .iter()
        .filter(|s| s.request_count > min_requests)
        .take(top_n)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivity {
    pub user_id: String,
    pub active_days: u64,
    pub total_requests: u64,
    pub avg_duration_ms: Option<f64>,
    /// Share of the user's executions with status SUCCESS.
    pub success_rate: f64,
    pub avg_secs_between_requests: Option<f64>,
}

/// Engaged users: active on more than one day with more than ten requests.
pub fn user_activity(access: &[AccessEvent], execution: &[ExecutionEvent], top_n: usize) -> Vec<UserActivity> {
    let pairs = inner_join(access, execution);
    let metrics = [
        MetricSpec::count("total_requests"),
        MetricSpec::distinct_count("active_days", |p: &(&AccessEvent, &ExecutionEvent)| p.0.timestamp.date_naive()),
        MetricSpec::average("avg_duration_ms", |p: &(&AccessEvent, &ExecutionEvent)| Some(p.1.duration_ms)),
        MetricSpec::rate("success_rate", |p: &(&AccessEvent, &ExecutionEvent)| {
            p.1.status == ExecutionStatus::Success
        }),
    ];
    let grouped = group_aggregate(&pairs, |p| p.0.user_id.clone(), &metrics);

    let mut request_times: HashMap<&str, Vec<_>> = HashMap::new();
    for a in access {
        request_times.entry(a.user_id.as_str()).or_default().push(a.timestamp);
    }

    let mut rows: Vec<UserActivity> = grouped
        .into_iter()
        .map(|(user_id, s)| {
            let gap = request_times.get_mut(user_id.as_str()).and_then(|times| {
                times.sort();
                let gaps: Vec<f64> = times
                    .windows(2)
                    .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
                    .collect();
                stats::mean(&gaps)
            });
            UserActivity {
                active_days: s.count("active_days"),
                total_requests: s.count("total_requests"),
                avg_duration_ms: s.get("avg_duration_ms"),
                success_rate: s.get("success_rate").unwrap_or(0.0),
                avg_secs_between_requests: gap,
                user_id,
            }
        })
        .filter(|u| u.active_days > 1 && u.total_requests > 10)
        .collect();
    rows.sort_by(|a, b| b.total_requests.cmp(&a.total_requests));
    rows.truncate(top_n);
    rows
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAuthCount {
    pub endpoint: String,
    pub failed_attempts: u64,
    pub users_affected: u64,
}

/// 401 responses per endpoint, most first.
pub fn failed_auth_by_endpoint(access: &[AccessEvent], top_n: usize) -> Vec<FailedAuthCount> {
    let mut groups: BTreeMap<&str, (u64, BTreeSet<&str>)> = BTreeMap::new();
    for a in access.iter().filter(|a| a.status_code == 401) {
        let entry = groups.entry(a.endpoint.as_str()).or_default();
        entry.0 += 1;
        entry.1.insert(a.user_id.as_str());
    }
    let mut rows: Vec<FailedAuthCount> = groups
        .into_iter()
        .map(|(endpoint, (failed_attempts, users))| FailedAuthCount {
            endpoint: endpoint.to_string(),
            failed_attempts,
            users_affected: users.len() as u64,
        })
        .collect();
    rows.sort_by(|a, b| b.failed_attempts.cmp(&a.failed_attempts));
    rows.truncate(top_n);
    rows
}

// ---------------------------------------------------------------------------
// Distributions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

/// Value counts, most frequent first, ties broken by name.
pub fn value_counts<T>(rows: &[T], key: impl Fn(&T) -> String) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for row in rows {
        *counts.entry(key(row)).or_default() += 1;
    }
    let mut out: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

pub fn method_distribution(access: &[AccessEvent]) -> Vec<CategoryCount> {
    value_counts(access, |a| a.method.clone())
}

pub fn execution_status_distribution(execution: &[ExecutionEvent]) -> Vec<CategoryCount> {
    value_counts(execution, |e| e.status.to_string())
}

pub fn top_endpoints(access: &[AccessEvent], top_n: usize) -> Vec<CategoryCount> {
    let mut counts = value_counts(access, |a| a.endpoint.clone());
    counts.truncate(top_n);
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionShare {
    pub action: NetworkAction,
    pub count: u64,
    pub percentage: f64,
}

pub fn action_shares(network: &[NetworkEvent]) -> Vec<ActionShare> {
    let mut counts: BTreeMap<NetworkAction, u64> = BTreeMap::new();
    for n in network {
        *counts.entry(n.action).or_default() += 1;
    }
    let total = total_count(network);
    counts
        .into_iter()
        .map(|(action, count)| ActionShare {
            action,
            count,
            percentage: stats::rate(count, total),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficBySource {
    pub src_ip: String,
    pub total_bytes_sent: u64,
}

pub fn top_sources_by_bytes(network: &[NetworkEvent], top_n: usize) -> Vec<TrafficBySource> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for n in network {
        *totals.entry(n.src_ip.as_str()).or_default() += n.bytes_sent;
    }
    let mut rows: Vec<TrafficBySource> = totals
        .into_iter()
        .map(|(src_ip, total_bytes_sent)| TrafficBySource {
            src_ip: src_ip.to_string(),
            total_bytes_sent,
        })
        .collect();
    rows.sort_by(|a, b| b.total_bytes_sent.cmp(&a.total_bytes_sent));
    rows.truncate(top_n);
    rows
}
