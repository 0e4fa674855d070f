use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::stats::Distribution;
use crate::logs::{ExecutionStatus, NetworkAction, RequestKeyed, TimeWindow};
use crate::storage::LogStore;

/// One request seen in all three tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub user_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub function_name: String,
    pub duration_ms: f64,
    pub execution_status: ExecutionStatus,
    pub src_ip: String,
    pub dst_ip: String,
    pub action: NetworkAction,
    pub bytes_sent: u64,
}

/// Group rows by request id, keeping input order within each group.
pub fn index_by_request<T: RequestKeyed>(rows: &[T]) -> HashMap<&str, Vec<&T>> {
    let mut index: HashMap<&str, Vec<&T>> = HashMap::new();
    for row in rows {
        index.entry(row.request_id()).or_default().push(row);
    }
    index
}

/// Inner join on request id. Output follows `left` order; a left row with
/// several matches yields one pair per match.
pub fn inner_join<'a, L, R>(left: &'a [L], right: &'a [R]) -> Vec<(&'a L, &'a R)>
where
    L: RequestKeyed,
    R: RequestKeyed,
{
    let index = index_by_request(right);
    let mut pairs = Vec::new();
    for l in left {
        if let Some(matches) = index.get(l.request_id()) {
            pairs.extend(matches.iter().map(|r| (l, *r)));
        }
    }
    pairs
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusActionCount {
    pub status_code: u16,
    pub action: NetworkAction,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationDistribution {
    pub function_name: String,
    pub status: ExecutionStatus,
    pub distribution: Distribution,
}

/// Status code × network action hierarchy counts.
pub fn status_action_counts(rows: &[JoinedEvent]) -> Vec<StatusActionCount> {
    let mut counts: BTreeMap<(u16, NetworkAction), u64> = BTreeMap::new();
    for row in rows {
        *counts.entry((row.status_code, row.action)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((status_code, action), count)| StatusActionCount {
            status_code,
            action,
            count,
        })
        .collect()
}

/// Duration distribution per function and execution status.
pub fn duration_by_function_status(rows: &[JoinedEvent]) -> Vec<DurationDistribution> {
    let mut groups: BTreeMap<(&str, ExecutionStatus), Vec<f64>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.function_name.as_str(), row.execution_status))
            .or_default()
            .push(row.duration_ms);
    }
    groups
        .into_iter()
        .filter_map(|((function_name, status), durations)| {
            Distribution::from_values(&durations).map(|distribution| DurationDistribution {
                function_name: function_name.to_string(),
                status,
                distribution,
            })
        })
        .collect()
}

/// Joined rows for a window and the two cross-tabulations built from them.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationView {
    pub limit: usize,
    /// More than `limit` joinable rows exist in the window.
    pub truncated: bool,
    pub rows: Vec<JoinedEvent>,
    pub status_actions: Vec<StatusActionCount>,
    pub durations: Vec<DurationDistribution>,
}

impl CorrelationView {
    /// Build a view from up to `limit + 1` joined rows; the extra row only
    /// marks the view as truncated.
    pub fn from_rows(mut rows: Vec<JoinedEvent>, limit: usize) -> Self {
        let truncated = rows.len() > limit;
        rows.truncate(limit);
        Self {
            limit,
            truncated,
            status_actions: status_action_counts(&rows),
            durations: duration_by_function_status(&rows),
            rows,
        }
    }

    pub fn empty(limit: usize) -> Self {
        Self::from_rows(Vec::new(), limit)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Runs the capped three-way join against the store.
pub struct CorrelationEngine {
    store: LogStore,
    limit: usize,
}

impl CorrelationEngine {
    pub fn new(store: LogStore, limit: usize) -> Self {
        Self { store, limit }
    }

    pub fn correlate(&self, window: &TimeWindow) -> CorrelationView {
        let rows = self.store.joined_events(window, self.limit.saturating_add(1));
        let view = CorrelationView::from_rows(rows, self.limit);
        info!(
            %window,
            rows = view.rows.len(),
            truncated = view.truncated,
            "correlation join complete"
        );
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{AccessEvent, ExecutionEvent};
    use chrono::TimeZone;

    fn joined(function: &str, status: ExecutionStatus, code: u16, action: NetworkAction, ms: f64) -> JoinedEvent {
        JoinedEvent {
            timestamp: Utc.with_ymd_and_hms(2025, 4, 13, 12, 0, 0).unwrap(),
            request_id: "req".into(),
            user_id: "user_1".into(),
            endpoint: "/api/data".into(),
            method: "GET".into(),
            status_code: code,
            function_name: function.into(),
            duration_ms: ms,
            execution_status: status,
            src_ip: "192.168.1.1".into(),
            dst_ip: "10.0.0.1".into(),
            action,
            bytes_sent: 100,
        }
    }

    #[test]
    fn test_inner_join_drops_unmatched_and_fans_out() {
        let ts = Utc.with_ymd_and_hms(2025, 4, 13, 12, 0, 0).unwrap();
        let access = vec![
            AccessEvent {
                timestamp: ts,
                user_id: "u1".into(),
                endpoint: "/a".into(),
                method: "GET".into(),
                status_code: 200,
                request_id: "r1".into(),
            },
            AccessEvent {
                timestamp: ts,
                user_id: "u2".into(),
                endpoint: "/b".into(),
                method: "GET".into(),
                status_code: 200,
                request_id: "r2".into(),
            },
        ];
        let exec = |rid: &str, ms: f64| ExecutionEvent {
            timestamp: ts,
            function_name: "f".into(),
            duration_ms: ms,
            status: ExecutionStatus::Success,
            request_id: rid.into(),
        };
        let execution = vec![exec("r1", 10.0), exec("r1", 20.0), exec("r9", 30.0)];

        let pairs = inner_join(&access, &execution);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|(a, _)| a.request_id == "r1"));
        assert_eq!(pairs[1].1.duration_ms, 20.0);
    }

    #[test]
    fn test_status_action_counts() {
        let rows = vec![
            joined("f", ExecutionStatus::Success, 200, NetworkAction::Accept, 1.0),
            joined("f", ExecutionStatus::Success, 200, NetworkAction::Accept, 1.0),
            joined("f", ExecutionStatus::Failed, 500, NetworkAction::Reject, 1.0),
        ];
        let counts = status_action_counts(&rows);
        assert_eq!(
            counts,
            vec![
                StatusActionCount { status_code: 200, action: NetworkAction::Accept, count: 2 },
                StatusActionCount { status_code: 500, action: NetworkAction::Reject, count: 1 },
            ]
        );
    }

    #[test]
    fn test_duration_distribution_per_function_and_status() {
        let rows = vec![
            joined("get_data", ExecutionStatus::Success, 200, NetworkAction::Accept, 100.0),
            joined("get_data", ExecutionStatus::Success, 200, NetworkAction::Accept, 300.0),
            joined("get_data", ExecutionStatus::Failed, 500, NetworkAction::Reject, 900.0),
        ];
        let dists = duration_by_function_status(&rows);
        assert_eq!(dists.len(), 2);
        assert_eq!(dists[0].status, ExecutionStatus::Success);
        assert_eq!(dists[0].distribution.count, 2);
        assert_eq!(dists[0].distribution.median, 200.0);
        assert_eq!(dists[1].distribution.max, 900.0);
    }

    #[test]
    fn test_truncated_only_past_limit() {
        let row = || joined("get_data", ExecutionStatus::Success, 200, NetworkAction::Accept, 100.0);

        let exact = CorrelationView::from_rows(vec![row(), row(), row()], 3);
        assert_eq!(exact.rows.len(), 3);
        assert!(!exact.truncated);

        let over = CorrelationView::from_rows(vec![row(), row(), row(), row()], 3);
        assert_eq!(over.rows.len(), 3);
        assert!(over.truncated);
        let counted: u64 = over.status_actions.iter().map(|c| c.count).sum();
        assert_eq!(counted, 3);
    }

    #[test]
    fn test_empty_view_is_explicit() {
        let view = CorrelationView::empty(1000);
        assert!(view.is_empty());
        assert!(!view.truncated);
        assert!(view.status_actions.is_empty());
        assert!(view.durations.is_empty());
    }
}
