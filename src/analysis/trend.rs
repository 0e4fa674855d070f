//! Time-bucketed series and trailing smoothing.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::aggregator::{group_aggregate, MetricSpec};
use crate::analysis::correlation::index_by_request;
use crate::analysis::stats;
use crate::logs::{AccessEvent, ExecutionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    #[default]
    Day,
    Hour,
}

impl Bucket {
    /// Bucket label; labels sort in chronological order.
    pub fn label(&self, ts: DateTime<Utc>) -> String {
        match self {
            Bucket::Day => ts.format("%Y-%m-%d").to_string(),
            Bucket::Hour => ts.format("%Y-%m-%d %H:00").to_string(),
        }
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Bucket::Day),
            "hour" | "hourly" => Ok(Bucket::Hour),
            other => Err(format!("unknown bucket '{}', expected day or hour", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket: String,
    pub value: Option<f64>,
}

/// Ordered (bucket, value) pairs for one metric, optionally one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub name: String,
    pub points: Vec<TrendPoint>,
}

impl TrendSeries {
    pub fn new(name: impl Into<String>, points: Vec<TrendPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Trailing mean over the last `span` buckets; same buckets as `self`.
    pub fn rolling_average(&self, span: usize) -> TrendSeries {
        let smoothed = rolling_average(&self.values(), span);
        TrendSeries {
            name: format!("{}_rolling_{}", self.name, span),
            points: self
                .points
                .iter()
                .zip(smoothed)
                .map(|(p, value)| TrendPoint {
                    bucket: p.bucket.clone(),
                    value,
                })
                .collect(),
        }
    }
}

/// Trailing rolling mean with a window that shrinks at the series start
/// (minimum one period). Missing values are skipped inside each window.
pub fn rolling_average(values: &[Option<f64>], span: usize) -> Vec<Option<f64>> {
    let span = span.max(1);
    (0..values.len())
        .map(|i| {
            let from = (i + 1).saturating_sub(span);
            let present: Vec<f64> = values[from..=i].iter().flatten().copied().collect();
            stats::mean(&present)
        })
        .collect()
}

/// Bucket `rows` by timestamp and reduce each bucket with `metric`.
pub fn bucket_series<T, F>(name: &str, rows: &[T], timestamp: F, bucket: Bucket, metric: MetricSpec<'_, T>) -> TrendSeries
where
    F: Fn(&T) -> DateTime<Utc>,
{
    let metric_name = metric.name();
    let points = group_aggregate(rows, |r| bucket.label(timestamp(r)), &[metric])
        .into_iter()
        .map(|(bucket, snapshot)| TrendPoint {
            bucket,
            value: snapshot.get(metric_name),
        })
        .collect();
    TrendSeries::new(name, points)
}

/// Per-bucket request metrics. Latency comes from a left join onto
/// executions, so requests without an execution still count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTrendRow {
    pub bucket: String,
    pub requests: u64,
    pub avg_latency_ms: Option<f64>,
    /// Share of responses below 400.
    pub success_rate: f64,
    pub error_rate: f64,
    pub active_users: u64,
}

pub fn daily_trend(access: &[AccessEvent], execution: &[ExecutionEvent], bucket: Bucket) -> Vec<DailyTrendRow> {
    let executions = index_by_request(execution);

    #[derive(Default)]
    struct Acc<'a> {
        requests: u64,
        ok: u64,
        durations: Vec<f64>,
        users: BTreeSet<&'a str>,
    }

    let mut buckets: BTreeMap<String, Acc<'_>> = BTreeMap::new();
    for a in access {
        let acc = buckets.entry(bucket.label(a.timestamp)).or_default();
        acc.requests += 1;
        if !a.is_error() {
            acc.ok += 1;
        }
        acc.users.insert(a.user_id.as_str());
        if let Some(matches) = executions.get(a.request_id.as_str()) {
            acc.durations.extend(matches.iter().map(|e| e.duration_ms));
        }
    }

    buckets
        .into_iter()
        .map(|(bucket, acc)| {
            let success_rate = stats::rate(acc.ok, acc.requests);
            DailyTrendRow {
                bucket,
                requests: acc.requests,
                avg_latency_ms: stats::mean(&acc.durations),
                success_rate,
                error_rate: stats::rate(acc.requests - acc.ok, acc.requests),
                active_users: acc.users.len() as u64,
            }
        })
        .collect()
}

/// A raw series and, when smoothing was requested, its rolling average.
#[derive(Debug, Clone, Serialize)]
pub struct TrendView {
    pub series: TrendSeries,
    pub rolling: Option<TrendSeries>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub bucket: Bucket,
    pub rows: Vec<DailyTrendRow>,
    pub views: Vec<TrendView>,
}

impl TrendReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn series(&self, name: &str) -> Option<&TrendSeries> {
        self.views.iter().map(|v| &v.series).find(|s| s.name == name)
    }
}

pub fn build_trends(
    access: &[AccessEvent],
    execution: &[ExecutionEvent],
    bucket: Bucket,
    rolling_span: Option<usize>,
) -> TrendReport {
    let rows = daily_trend(access, execution, bucket);

    let column = |name: &str, value: fn(&DailyTrendRow) -> Option<f64>| {
        TrendSeries::new(
            name,
            rows.iter()
                .map(|r| TrendPoint {
                    bucket: r.bucket.clone(),
                    value: value(r),
                })
                .collect(),
        )
    };
    let series = vec![
        column("requests", |r| Some(r.requests as f64)),
        column("avg_latency_ms", |r| r.avg_latency_ms),
        column("success_rate", |r| Some(r.success_rate)),
        column("error_rate", |r| Some(r.error_rate)),
        column("active_users", |r| Some(r.active_users as f64)),
    ];

    let views = series
        .into_iter()
        .map(|series| TrendView {
            rolling: rolling_span.map(|span| series.rolling_average(span)),
            series,
        })
        .collect();

    TrendReport { bucket, rows, views }
}

/// Average duration per function per bucket, one series per function.
pub fn function_latency_trend(execution: &[ExecutionEvent], bucket: Bucket) -> BTreeMap<String, TrendSeries> {
    let mut by_function: BTreeMap<&str, Vec<&ExecutionEvent>> = BTreeMap::new();
    for e in execution {
        by_function.entry(e.function_name.as_str()).or_default().push(e);
    }
    by_function
        .into_iter()
        .map(|(function, rows)| {
            let series = bucket_series(
                "avg_duration_ms",
                &rows,
                |e| e.timestamp,
                bucket,
                MetricSpec::average("avg_duration_ms", |e: &&ExecutionEvent| Some(e.duration_ms)),
            );
            (function.to_string(), series)
        })
        .collect()
}

/// Request count per hour.
pub fn hourly_traffic(access: &[AccessEvent]) -> TrendSeries {
    bucket_series(
        "hourly_requests",
        access,
        |a| a.timestamp,
        Bucket::Hour,
        MetricSpec::count("requests"),
    )
}
