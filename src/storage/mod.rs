//! SQLite log store accessor -- pooled connections, bounded retry on open,
//! parameterized window reads.
//!
//! Read failures never escape this module: a failing query is logged and
//! read as an empty result so one broken section cannot take down a report.

pub mod cache;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Row, ToSql};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use self::cache::SnapshotCache;
use crate::analysis::correlation::JoinedEvent;
use crate::config::StoreConfig;
use crate::logs::{
    parse_timestamp, AccessEvent, ExecutionEvent, ExecutionStatus, NetworkAction, NetworkEvent, TimeWindow,
};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("log store unavailable after {attempts} attempt(s): {reason}")]
    StoreUnavailable { attempts: u32, reason: String },
    #[error("query '{query}' failed: {reason}")]
    QueryFailure { query: &'static str, reason: String },
}

/// How hard to try before declaring the store unavailable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            attempts: cfg.retry_attempts,
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
        }
    }
}

/// Open the SQLite database, retrying per `policy`.
pub fn open_pool(path: &Path, policy: &RetryPolicy) -> Result<Pool, StoreError> {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match try_open(path, policy.connect_timeout) {
            Ok(pool) => {
                info!(path = %path.display(), attempt, "log store opened");
                return Ok(pool);
            }
            Err(e) => {
                warn!(path = %path.display(), attempt, attempts, error = %e, "failed to open log store");
                last_error = format!("{:#}", e);
                if attempt < attempts {
                    std::thread::sleep(policy.backoff);
                }
            }
        }
    }

    Err(StoreError::StoreUnavailable {
        attempts,
        reason: last_error,
    })
}

fn try_open(path: &Path, connect_timeout: Duration) -> anyhow::Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder()
        .connection_timeout(connect_timeout)
        .build(manager)?;

    let conn = pool.get()?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Whether a snapshot read may be served from the TTL cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    #[default]
    Cached,
    Exact,
}

/// Every row of the three tables for one window, read at `fetched_at`.
#[derive(Debug, Clone, Serialize)]
pub struct LogSnapshot {
    pub window: TimeWindow,
    pub fetched_at: DateTime<Utc>,
    pub access: Vec<AccessEvent>,
    pub execution: Vec<ExecutionEvent>,
    pub network: Vec<NetworkEvent>,
}

impl LogSnapshot {
    pub fn empty(window: TimeWindow) -> Self {
        Self {
            window,
            fetched_at: Utc::now(),
            access: Vec::new(),
            execution: Vec::new(),
            network: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_empty() && self.execution.is_empty() && self.network.is_empty()
    }
}

const ACCESS_SQL: &str = "SELECT timestamp, user_id, endpoint, method, status_code, request_id
     FROM access_logs
     WHERE julianday(timestamp) >= julianday(?1) AND julianday(timestamp) < julianday(?2)
     ORDER BY julianday(timestamp) ASC";

const EXECUTION_SQL: &str = "SELECT timestamp, function_name, duration_ms, status, request_id
     FROM execution_logs
     WHERE julianday(timestamp) >= julianday(?1) AND julianday(timestamp) < julianday(?2)
     ORDER BY julianday(timestamp) ASC";

const NETWORK_SQL: &str = "SELECT timestamp, src_ip, dst_ip, action, bytes_sent, request_id
     FROM vpc_logs
     WHERE julianday(timestamp) >= julianday(?1) AND julianday(timestamp) < julianday(?2)
     ORDER BY julianday(timestamp) ASC";

const JOINED_SQL: &str = "SELECT a.timestamp, a.request_id, a.user_id, a.endpoint, a.method, a.status_code,
            e.function_name, e.duration_ms, e.status,
            v.src_ip, v.dst_ip, v.action, v.bytes_sent
     FROM access_logs a
     JOIN execution_logs e ON a.request_id = e.request_id
     JOIN vpc_logs v ON a.request_id = v.request_id
     WHERE julianday(a.timestamp) >= julianday(?1) AND julianday(a.timestamp) < julianday(?2)
     ORDER BY julianday(a.timestamp) ASC
     LIMIT ?3";

/// Handle to the log store. Construct once, clone freely.
#[derive(Clone)]
pub struct LogStore {
    pool: Pool,
    path: PathBuf,
    cache: SnapshotCache,
}

impl LogStore {
    pub fn open(path: &Path, policy: &RetryPolicy, cache_ttl: Duration) -> Result<Self, StoreError> {
        let pool = open_pool(path, policy)?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            cache: SnapshotCache::new(cache_ttl),
        })
    }

    pub fn from_config(cfg: &StoreConfig) -> Result<Self, StoreError> {
        Self::open(&cfg.path, &RetryPolicy::from(cfg), cfg.cache_ttl())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn access_events(&self, window: &TimeWindow) -> Vec<AccessEvent> {
        let (start, end) = (window.start_param(), window.end_param());
        self.read_rows("access_logs", ACCESS_SQL, rusqlite::params![start, end], decode_access)
    }

    pub fn execution_events(&self, window: &TimeWindow) -> Vec<ExecutionEvent> {
        let (start, end) = (window.start_param(), window.end_param());
        self.read_rows("execution_logs", EXECUTION_SQL, rusqlite::params![start, end], decode_execution)
    }

    pub fn network_events(&self, window: &TimeWindow) -> Vec<NetworkEvent> {
        let (start, end) = (window.start_param(), window.end_param());
        self.read_rows("vpc_logs", NETWORK_SQL, rusqlite::params![start, end], decode_network)
    }

    /// Inner join of all three tables on request id, at most `limit` rows.
    pub fn joined_events(&self, window: &TimeWindow, limit: usize) -> Vec<JoinedEvent> {
        let (start, end) = (window.start_param(), window.end_param());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read_rows("joined_logs", JOINED_SQL, rusqlite::params![start, end, limit], decode_joined)
    }

    /// Read all three tables for `window`, possibly from the TTL cache.
    pub fn snapshot(&self, window: &TimeWindow, freshness: Freshness) -> Arc<LogSnapshot> {
        if freshness == Freshness::Cached {
            if let Some(hit) = self.cache.get(window) {
                debug!(%window, "serving cached log snapshot");
                return hit;
            }
        }

        let snapshot = Arc::new(LogSnapshot {
            window: *window,
            fetched_at: Utc::now(),
            access: self.access_events(window),
            execution: self.execution_events(window),
            network: self.network_events(window),
        });
        debug!(
            %window,
            access = snapshot.access.len(),
            execution = snapshot.execution.len(),
            network = snapshot.network.len(),
            "fetched log snapshot"
        );
        self.cache.insert(*window, snapshot.clone());
        snapshot
    }

    fn read_rows<T, F>(&self, query: &'static str, sql: &str, params: &[&dyn ToSql], decode: F) -> Vec<T>
    where
        F: Fn(&Row<'_>) -> rusqlite::Result<Option<T>>,
    {
        match self.try_read_rows(sql, params, decode) {
            Ok((rows, skipped)) => {
                if skipped > 0 {
                    warn!(query, skipped, "skipped rows that could not be decoded");
                }
                rows
            }
            Err(e) => {
                let err = StoreError::QueryFailure {
                    query,
                    reason: format!("{:#}", e),
                };
                warn!(error = %err, "returning empty result");
                Vec::new()
            }
        }
    }

    fn try_read_rows<T, F>(&self, sql: &str, params: &[&dyn ToSql], decode: F) -> anyhow::Result<(Vec<T>, usize)>
    where
        F: Fn(&Row<'_>) -> rusqlite::Result<Option<T>>,
    {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| decode(row))?;

        let mut out = Vec::new();
        let mut skipped = 0usize;
        for r in rows {
            match r {
                Ok(Some(v)) => out.push(v),
                Ok(None) | Err(_) => skipped += 1,
            }
        }
        Ok((out, skipped))
    }
}

fn decode_access(row: &Row<'_>) -> rusqlite::Result<Option<AccessEvent>> {
    let raw_ts: String = row.get(0)?;
    let status: i64 = row.get(4)?;
    let (Some(timestamp), Ok(status_code)) = (parse_timestamp(&raw_ts), u16::try_from(status)) else {
        return Ok(None);
    };
    Ok(Some(AccessEvent {
        timestamp,
        user_id: row.get(1)?,
        endpoint: row.get(2)?,
        method: row.get(3)?,
        status_code,
        request_id: row.get(5)?,
    }))
}

fn decode_execution(row: &Row<'_>) -> rusqlite::Result<Option<ExecutionEvent>> {
    let raw_ts: String = row.get(0)?;
    let duration_ms: f64 = row.get(2)?;
    let raw_status: String = row.get(3)?;
    let (Some(timestamp), Ok(status)) = (parse_timestamp(&raw_ts), raw_status.parse::<ExecutionStatus>()) else {
        return Ok(None);
    };
    if !(duration_ms >= 0.0) {
        return Ok(None);
    }
    Ok(Some(ExecutionEvent {
        timestamp,
        function_name: row.get(1)?,
        duration_ms,
        status,
        request_id: row.get(4)?,
    }))
}

fn decode_network(row: &Row<'_>) -> rusqlite::Result<Option<NetworkEvent>> {
    let raw_ts: String = row.get(0)?;
    let raw_action: String = row.get(3)?;
    let bytes: i64 = row.get(4)?;
    let (Some(timestamp), Ok(action), Ok(bytes_sent)) = (
        parse_timestamp(&raw_ts),
        raw_action.parse::<NetworkAction>(),
        u64::try_from(bytes),
    ) else {
        return Ok(None);
    };
    Ok(Some(NetworkEvent {
        timestamp,
        src_ip: row.get(1)?,
        dst_ip: row.get(2)?,
        action,
        bytes_sent,
        request_id: row.get(5)?,
    }))
}

fn decode_joined(row: &Row<'_>) -> rusqlite::Result<Option<JoinedEvent>> {
    let raw_ts: String = row.get(0)?;
    let status: i64 = row.get(5)?;
    let duration_ms: f64 = row.get(7)?;
    let raw_exec_status: String = row.get(8)?;
    let raw_action: String = row.get(11)?;
    let bytes: i64 = row.get(12)?;
    let (Some(timestamp), Ok(status_code), Ok(execution_status), Ok(action), Ok(bytes_sent)) = (
        parse_timestamp(&raw_ts),
        u16::try_from(status),
        raw_exec_status.parse::<ExecutionStatus>(),
        raw_action.parse::<NetworkAction>(),
        u64::try_from(bytes),
    ) else {
        return Ok(None);
    };
    Ok(Some(JoinedEvent {
        timestamp,
        request_id: row.get(1)?,
        user_id: row.get(2)?,
        endpoint: row.get(3)?,
        method: row.get(4)?,
        status_code,
        function_name: row.get(6)?,
        duration_ms,
        execution_status,
        src_ip: row.get(9)?,
        dst_ip: row.get(10)?,
        action,
        bytes_sent,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params, Connection};

    fn seeded_store(dir: &tempfile::TempDir) -> LogStore {
        let path = dir.path().join("logs.db");
        let conn = Connection::open(&path).unwrap();
        schema::migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO access_logs VALUES (?1, 'user_1', '/api/data', 'GET', 200, 'req-1')",
            params!["2025-04-13T12:00:00"],
        )
        .unwrap();
        // Space-separated timestamps must land in the same window.
        conn.execute(
            "INSERT INTO access_logs VALUES (?1, 'user_2', '/api/login', 'POST', 401, 'req-2')",
            params!["2025-04-13 12:30:00"],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO access_logs VALUES (?1, 'user_3', '/api/data', 'GET', 200, 'req-3')",
            params!["2025-04-14T00:00:00"],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO execution_logs VALUES ('2025-04-13T12:00:00', 'get_data', 120, 'SUCCESS', 'req-1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO execution_logs VALUES ('2025-04-13T12:30:00', 'login_handler', 80, 'BOGUS', 'req-2')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO vpc_logs VALUES ('2025-04-13T12:00:00', '192.168.1.1', '10.0.0.1', 'ACCEPT', 512, 'req-1')",
            [],
        )
        .unwrap();
        drop(conn);

        let policy = RetryPolicy {
            attempts: 1,
            backoff: Duration::from_millis(1),
            connect_timeout: Duration::from_secs(2),
        };
        LogStore::open(&path, &policy, Duration::from_secs(60)).unwrap()
    }

    fn day() -> TimeWindow {
        TimeWindow::parse("2025-04-13", "2025-04-14").unwrap()
    }

    #[test]
    fn test_window_read_is_half_open_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        let rows = store.access_events(&day());
        assert_eq!(rows.len(), 2, "end bound is exclusive");
        assert_eq!(rows[0].request_id, "req-1");
        assert_eq!(rows[1].request_id, "req-2");
        assert_eq!(rows[1].status_code, 401);
    }

    #[test]
    fn test_undecodable_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        let rows = store.execution_events(&day());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].function_name, "get_data");
    }

    #[test]
    fn test_window_queries_use_time_index() {
        let conn = Connection::open_in_memory().unwrap();
        schema::migrate(&conn).unwrap();
        for (sql, index) in [
            (ACCESS_SQL, "idx_access_logs_julianday"),
            (EXECUTION_SQL, "idx_execution_logs_julianday"),
            (NETWORK_SQL, "idx_vpc_logs_julianday"),
        ] {
            let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {}", sql)).unwrap();
            let plan: Vec<String> = stmt
                .query_map(params!["2025-04-13T00:00:00.000", "2025-04-14T00:00:00.000"], |row| row.get(3))
                .unwrap()
                .collect::<rusqlite::Result<_>>()
                .unwrap();
            assert!(plan.iter().any(|d| d.contains(index)), "{:?}", plan);
        }
    }

    #[test]
    fn test_empty_window_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let w = TimeWindow::parse("2025-04-13T12:00:00", "2025-04-13T12:00:00").unwrap();

        assert!(store.access_events(&w).is_empty());
        assert!(store.network_events(&w).is_empty());
        assert!(store.snapshot(&w, Freshness::Exact).is_empty());
    }

    #[test]
    fn test_joined_events_inner_join() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        let joined = store.joined_events(&day(), 1000);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].request_id, "req-1");
        assert_eq!(joined[0].action, NetworkAction::Accept);
        assert_eq!(joined[0].bytes_sent, 512);
    }

    #[test]
    fn test_query_failure_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        store
            .pool()
            .get()
            .unwrap()
            .execute_batch("DROP TABLE vpc_logs; CREATE TABLE vpc_logs (\"nothing\" TEXT);")
            .unwrap();

        assert!(store.network_events(&day()).is_empty());
        assert!(store.joined_events(&day(), 10).is_empty());
        assert_eq!(store.access_events(&day()).len(), 2);
    }

    #[test]
    fn test_snapshot_cache_and_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        let first = store.snapshot(&day(), Freshness::Cached);
        assert_eq!(first.access.len(), 2);

        store
            .pool()
            .get()
            .unwrap()
            .execute(
                "INSERT INTO access_logs VALUES ('2025-04-13T13:00:00', 'user_4', '/api/data', 'GET', 200, 'req-4')",
                [],
            )
            .unwrap();

        let cached = store.snapshot(&day(), Freshness::Cached);
        assert!(Arc::ptr_eq(&first, &cached));

        let exact = store.snapshot(&day(), Freshness::Exact);
        assert_eq!(exact.access.len(), 3);
    }

    #[test]
    fn test_open_gives_up_after_bounded_attempts() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(200),
        };
        let err = LogStore::open(
            Path::new("/nonexistent-dir/logscope/logs.db"),
            &policy,
            Duration::ZERO,
        )
        .err()
        .expect("store should be unavailable");
        assert!(matches!(err, StoreError::StoreUnavailable { attempts: 3, .. }));
    }
}
