//! Shared fixtures: temporary log databases seeded through rusqlite.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection};
use tempfile::TempDir;

use logscope::storage::{schema, LogStore, RetryPolicy};

pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One request as it appears across the three tables.
#[derive(Debug, Clone)]
pub struct Request {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub user_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub function_name: String,
    pub duration_ms: f64,
    pub exec_status: String,
    pub src_ip: String,
    pub action: String,
    pub bytes_sent: u64,
}

impl Request {
    pub fn new(request_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            request_id: request_id.into(),
            user_id: "user_1".into(),
            endpoint: "/api/data".into(),
            method: "GET".into(),
            status_code: 200,
            function_name: "get_data".into(),
            duration_ms: 100.0,
            exec_status: "SUCCESS".into(),
            src_ip: "192.168.1.10".into(),
            action: "ACCEPT".into(),
            bytes_sent: 1024,
        }
    }
}

pub struct LogDb {
    _dir: TempDir,
    path: PathBuf,
    conn: Connection,
}

impl LogDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");
        let conn = Connection::open(&path).unwrap();
        schema::migrate(&conn).unwrap();
        Self { _dir: dir, path, conn }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store with no cache and a short connection timeout.
    pub fn store(&self) -> LogStore {
        let policy = RetryPolicy {
            attempts: 1,
            backoff: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(2),
        };
        LogStore::open(&self.path, &policy, Duration::ZERO).unwrap()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn insert(&self, r: &Request) {
        let ts = r.timestamp.format(TS_FORMAT).to_string();
        self.conn
            .execute(
                "INSERT INTO access_logs (timestamp, user_id, endpoint, method, status_code, request_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ts, r.user_id, r.endpoint, r.method, r.status_code, r.request_id],
            )
            .unwrap();
        self.conn
            .execute(
                "INSERT INTO execution_logs (timestamp, function_name, duration_ms, status, request_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![ts, r.function_name, r.duration_ms, r.exec_status, r.request_id],
            )
            .unwrap();
        self.conn
            .execute(
                "INSERT INTO vpc_logs (timestamp, src_ip, dst_ip, action, bytes_sent, request_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ts, r.src_ip, "10.0.0.1", r.action, r.bytes_sent as i64, r.request_id],
            )
            .unwrap();
    }

    pub fn insert_all(&self, requests: &[Request]) {
        self.conn.execute_batch("BEGIN").unwrap();
        for r in requests {
            self.insert(r);
        }
        self.conn.execute_batch("COMMIT").unwrap();
    }
}

pub fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 13, 0, 0, 0).unwrap()
}

/// `n` joinable requests spread over the day starting at `start`, with a
/// reproducible mix of users, endpoints, statuses and actions.
pub fn random_requests(n: usize, start: DateTime<Utc>, seed: u64) -> Vec<Request> {
    const USERS: &[&str] = &["user_1", "user_2", "user_3", "user_4", "user_5"];
    const ENDPOINTS: &[(&str, &str, &str)] = &[
        ("/api/data", "GET", "get_data"),
        ("/api/login", "POST", "authenticate"),
        ("/api/orders", "POST", "create_order"),
    ];
    const STATUS_CODES: &[u16] = &[200, 200, 200, 201, 401, 404, 500];
    const EXEC_STATUSES: &[&str] = &["SUCCESS", "SUCCESS", "SUCCESS", "FAILED", "TIMEOUT"];
    const ACTIONS: &[&str] = &["ACCEPT", "ACCEPT", "ACCEPT", "REJECT", "DROP"];

    let mut rng = StdRng::seed_from_u64(seed);
    let step = (86_400 / n.max(1)).max(1) as i64;
    (0..n)
        .map(|i| {
            let (endpoint, method, function) = ENDPOINTS[rng.gen_range(0..ENDPOINTS.len())];
            let mut r = Request::new(format!("req-{:06}", i), start + ChronoDuration::seconds(i as i64 * step));
            r.user_id = USERS[rng.gen_range(0..USERS.len())].to_string();
            r.endpoint = endpoint.to_string();
            r.method = method.to_string();
            r.function_name = function.to_string();
            r.status_code = STATUS_CODES[rng.gen_range(0..STATUS_CODES.len())];
            r.duration_ms = rng.gen_range(20.0..800.0);
            r.exec_status = EXEC_STATUSES[rng.gen_range(0..EXEC_STATUSES.len())].to_string();
            r.src_ip = format!("192.168.1.{}", rng.gen_range(1..20));
            r.action = ACTIONS[rng.gen_range(0..ACTIONS.len())].to_string();
            r.bytes_sent = rng.gen_range(100..100_000);
            r
        })
        .collect()
}
