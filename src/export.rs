//! CSV export of raw and derived row sets.
//!
//! The header row is written from a fixed column list rather than inferred
//! from the first record, so an empty row set still exports its header.

use std::io::Write;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::analysis::aggregator::{
    ActionShare, CategoryCount, EndpointPerformance, FailedAuthCount, FunctionPerformance,
    SourceAddressSummary, TrafficBySource, UserActivity,
};
use crate::analysis::correlation::{JoinedEvent, StatusActionCount};
use crate::analysis::trend::DailyTrendRow;
use crate::detect::{Alert, AnomalyFlag};
use crate::logs::{AccessEvent, ExecutionEvent, LogFilter, NetworkEvent, Table, TimeWindow};
use crate::storage::LogStore;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A flat record with a fixed column order matching its serde field order.
pub trait CsvRow: Serialize {
    const HEADERS: &'static [&'static str];
}

/// Write `rows` as CSV with a header row. Returns the number of data rows.
pub fn write_csv<W: Write, R: CsvRow>(writer: W, rows: &[R]) -> Result<usize, ExportError> {
    let mut out = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    out.write_record(R::HEADERS)?;
    for row in rows {
        out.serialize(row)?;
    }
    out.flush()?;
    Ok(rows.len())
}

/// Export one raw table for a window, narrowed by `filter`.
pub fn export_table<W: Write>(
    store: &LogStore,
    table: Table,
    window: &TimeWindow,
    filter: &LogFilter,
    writer: W,
) -> Result<usize, ExportError> {
    let written = match table {
        Table::Access => write_csv(writer, &filter.access(&store.access_events(window)))?,
        Table::Execution => write_csv(writer, &filter.execution(&store.execution_events(window)))?,
        Table::Network => write_csv(writer, &filter.network(&store.network_events(window)))?,
    };
    info!(%table, %window, rows = written, "exported table");
    Ok(written)
}

macro_rules! csv_row {
    ($ty:ty, [$($col:literal),+ $(,)?]) => {
        impl CsvRow for $ty {
            const HEADERS: &'static [&'static str] = &[$($col),+];
        }
    };
}

csv_row!(AccessEvent, ["timestamp", "user_id", "endpoint", "method", "status_code", "request_id"]);
csv_row!(ExecutionEvent, ["timestamp", "function_name", "duration_ms", "status", "request_id"]);
csv_row!(NetworkEvent, ["timestamp", "src_ip", "dst_ip", "action", "bytes_sent", "request_id"]);
csv_row!(JoinedEvent, [
    "timestamp", "request_id", "user_id", "endpoint", "method", "status_code",
    "function_name", "duration_ms", "execution_status", "src_ip", "dst_ip", "action", "bytes_sent",
]);
csv_row!(StatusActionCount, ["status_code", "action", "count"]);
csv_row!(DailyTrendRow, ["bucket", "requests", "avg_latency_ms", "success_rate", "error_rate", "active_users"]);
csv_row!(EndpointPerformance, ["endpoint", "method", "requests", "avg_duration_ms", "max_duration_ms", "success_rate"]);
csv_row!(FunctionPerformance, [
    "function_name", "executions", "avg_duration_ms", "max_duration_ms", "p95_duration_ms", "success_rate",
]);
csv_row!(SourceAddressSummary, [
    "src_ip", "request_count", "errors", "users_affected", "error_rate", "endpoints_accessed",
]);
csv_row!(UserActivity, [
    "user_id", "active_days", "total_requests", "avg_duration_ms", "success_rate", "avg_secs_between_requests",
]);
csv_row!(FailedAuthCount, ["endpoint", "failed_attempts", "users_affected"]);
csv_row!(CategoryCount, ["category", "count"]);
csv_row!(ActionShare, ["action", "count", "percentage"]);
csv_row!(TrafficBySource, ["src_ip", "total_bytes_sent"]);
csv_row!(AnomalyFlag, [
    "metric", "group", "bucket", "observed", "baseline", "deviation_score", "method", "severity",
]);
csv_row!(Alert, ["id", "severity", "kind", "subject", "title", "description", "created_at"]);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionMethod, Severity};
    use crate::logs::ExecutionStatus;
    use chrono::{TimeZone, Utc};

    fn to_string<R: CsvRow>(rows: &[R]) -> String {
        let mut buf = Vec::new();
        write_csv(&mut buf, rows).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_empty_set_still_has_header() {
        let out = to_string::<AccessEvent>(&[]);
        assert_eq!(out, "timestamp,user_id,endpoint,method,status_code,request_id\n");
    }

    #[test]
    fn test_raw_rows() {
        let row = ExecutionEvent {
            timestamp: Utc.with_ymd_and_hms(2025, 4, 13, 12, 0, 0).unwrap(),
            function_name: "get_data".into(),
            duration_ms: 125.5,
            status: ExecutionStatus::Timeout,
            request_id: "req-1".into(),
        };
        let out = to_string(&[row]);
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("timestamp,function_name,duration_ms,status,request_id"));
        assert_eq!(lines.next(), Some("2025-04-13T12:00:00Z,get_data,125.5,TIMEOUT,req-1"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_derived_rows_with_missing_values() {
        let row = AnomalyFlag {
            metric: "hourly_requests".into(),
            group: None,
            bucket: "2025-04-13 09:00".into(),
            observed: 50.0,
            baseline: 10.0,
            deviation_score: 4.0,
            method: DetectionMethod::MedianDeviation,
            severity: Severity::High,
        };
        let out = to_string(&[row]);
        assert_eq!(
            out.lines().nth(1),
            Some("hourly_requests,,2025-04-13 09:00,50.0,10.0,4.0,median_deviation,HIGH")
        );
    }

    #[test]
    fn test_comma_joined_field_is_quoted() {
        let row = SourceAddressSummary {
            src_ip: "192.168.1.1".into(),
            request_count: 12,
            errors: 3,
            users_affected: 2,
            error_rate: 25.0,
            endpoints_accessed: "/api/data,/api/login".into(),
        };
        let out = to_string(&[row]);
        assert_eq!(out.lines().nth(1), Some("192.168.1.1,12,3,2,25.0,\"/api/data,/api/login\""));
    }
}
