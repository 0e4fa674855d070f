//! Log table schema.
//!
//! The analytics core only reads these tables. Creating them when missing
//! lets a fresh database read as "no data" instead of failing every query.

use anyhow::Result;
use rusqlite::Connection;

/// Create the three log tables and their indexes if they do not exist.
///
/// Window filters compare `julianday(timestamp)`, so the time indexes are
/// built on that expression rather than the raw column.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS access_logs (
            timestamp TEXT NOT NULL,
            user_id TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            method TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            request_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS execution_logs (
            timestamp TEXT NOT NULL,
            function_name TEXT NOT NULL,
            duration_ms REAL NOT NULL,
            status TEXT NOT NULL,
            request_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vpc_logs (
            timestamp TEXT NOT NULL,
            src_ip TEXT NOT NULL,
            dst_ip TEXT NOT NULL,
            action TEXT NOT NULL,
            bytes_sent INTEGER NOT NULL,
            request_id TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_access_logs_julianday ON access_logs(julianday(timestamp));
        CREATE INDEX IF NOT EXISTS idx_access_logs_request ON access_logs(request_id);
        CREATE INDEX IF NOT EXISTS idx_execution_logs_julianday ON execution_logs(julianday(timestamp));
        CREATE INDEX IF NOT EXISTS idx_execution_logs_request ON execution_logs(request_id);
        CREATE INDEX IF NOT EXISTS idx_vpc_logs_julianday ON vpc_logs(julianday(timestamp));
        CREATE INDEX IF NOT EXISTS idx_vpc_logs_request ON vpc_logs(request_id);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["access_logs", "execution_logs", "vpc_logs"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{} should start empty", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }
}
