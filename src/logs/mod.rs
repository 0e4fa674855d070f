//! Log record model -- the three input tables and their shared request id.

pub mod window;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::window::{TimeWindow, WindowError};

/// The three log tables the analytics core reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Access,
    Execution,
    Network,
}

impl Table {
    pub fn table_name(&self) -> &'static str {
        match self {
            Table::Access => "access_logs",
            Table::Execution => "execution_logs",
            Table::Network => "vpc_logs",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.table_name())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "access" | "access_logs" => Ok(Table::Access),
            "execution" | "execution_logs" => Ok(Table::Execution),
            "network" | "vpc" | "vpc_logs" => Ok(Table::Network),
            other => Err(format!("unknown log table '{}'", other)),
        }
    }
}

/// One HTTP request as seen by the access log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub request_id: String,
}

impl AccessEvent {
    /// 4xx and 5xx responses.
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

/// One function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    pub function_name: String,
    pub duration_ms: f64,
    pub status: ExecutionStatus,
    pub request_id: String,
}

/// One network flow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub timestamp: DateTime<Utc>,
    pub src_ip: String,
    pub dst_ip: String,
    pub action: NetworkAction,
    pub bytes_sent: u64,
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMEOUT" => Ok(ExecutionStatus::Timeout),
            "ERROR" => Ok(ExecutionStatus::Error),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkAction {
    Accept,
    Reject,
    Drop,
}

impl NetworkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkAction::Accept => "ACCEPT",
            NetworkAction::Reject => "REJECT",
            NetworkAction::Drop => "DROP",
        }
    }
}

impl fmt::Display for NetworkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for NetworkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(NetworkAction::Accept),
            "REJECT" => Ok(NetworkAction::Reject),
            "DROP" => Ok(NetworkAction::Drop),
            other => Err(format!("unknown network action '{}'", other)),
        }
    }
}

/// Rows that carry the shared request id.
pub trait RequestKeyed {
    fn request_id(&self) -> &str;
}

impl RequestKeyed for AccessEvent {
    fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl RequestKeyed for ExecutionEvent {
    fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl RequestKeyed for NetworkEvent {
    fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Parse a stored timestamp. Accepts RFC 3339 as well as naive ISO-8601
/// values with either `T` or a space separator; naive values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Row-level narrowing for table views and exports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    pub user_id: Option<String>,
    pub function_name: Option<String>,
    pub action: Option<NetworkAction>,
}

impl LogFilter {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.function_name.is_none() && self.action.is_none()
    }

    pub fn access(&self, rows: &[AccessEvent]) -> Vec<AccessEvent> {
        rows.iter()
            .filter(|r| self.user_id.as_deref().map_or(true, |u| r.user_id == u))
            .cloned()
            .collect()
    }

    pub fn execution(&self, rows: &[ExecutionEvent]) -> Vec<ExecutionEvent> {
        rows.iter()
            .filter(|r| {
                self.function_name
                    .as_deref()
                    .map_or(true, |f| r.function_name == f)
            })
            .cloned()
            .collect()
    }

    pub fn network(&self, rows: &[NetworkEvent]) -> Vec<NetworkEvent> {
        rows.iter()
            .filter(|r| self.action.map_or(true, |a| r.action == a))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 4, 13, 12, 0, 5).unwrap();
        assert_eq!(parse_timestamp("2025-04-13T12:00:05"), Some(expected));
        assert_eq!(parse_timestamp("2025-04-13 12:00:05"), Some(expected));
        assert_eq!(parse_timestamp("2025-04-13T12:00:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-04-13T14:00:05+02:00"), Some(expected));

        let fractional = parse_timestamp("2025-04-13T12:00:05.250").unwrap();
        assert_eq!(fractional.nanosecond(), 250_000_000);

        let midnight = parse_timestamp("2025-04-13").unwrap();
        assert_eq!(midnight.hour(), 0);

        assert!(parse_timestamp("not a time").is_none());
    }

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!("success".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Success));
        assert_eq!("TIMEOUT".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Timeout));
        assert_eq!("Reject".parse::<NetworkAction>(), Ok(NetworkAction::Reject));
        assert!("maybe".parse::<NetworkAction>().is_err());
        assert_eq!("vpc".parse::<Table>(), Ok(Table::Network));
    }

    #[test]
    fn test_filter_narrows_rows() {
        let ts = Utc.with_ymd_and_hms(2025, 4, 13, 12, 0, 0).unwrap();
        let rows = vec![
            NetworkEvent {
                timestamp: ts,
                src_ip: "192.168.1.1".into(),
                dst_ip: "10.0.0.1".into(),
                action: NetworkAction::Accept,
                bytes_sent: 100,
                request_id: "req-1".into(),
            },
            NetworkEvent {
                timestamp: ts,
                src_ip: "192.168.1.2".into(),
                dst_ip: "10.0.0.1".into(),
                action: NetworkAction::Reject,
                bytes_sent: 200,
                request_id: "req-2".into(),
            },
        ];

        let filter = LogFilter {
            action: Some(NetworkAction::Reject),
            ..Default::default()
        };
        let filtered = filter.network(&rows);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].request_id, "req-2");

        assert_eq!(LogFilter::default().network(&rows).len(), 2);
    }
}
