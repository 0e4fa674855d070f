//! Half-open query windows.
//!
//! Every query in the crate evaluates `[start, end)`: the start bound is
//! inclusive, the end bound exclusive. `start == end` is a valid empty window.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use super::parse_timestamp;

/// Format used when binding window bounds as SQL parameters.
const BIND_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid window bound '{0}': expected ISO-8601 date or datetime")]
    InvalidBound(String),
    #[error("window start {start} is after end {end}")]
    Inverted { start: String, end: String },
    #[error("window of {0} days reaches outside the supported date range")]
    OutOfRange(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse caller-supplied bounds. A bare date means midnight UTC, so an
    /// end bound of `2025-04-14` stops just before that day begins.
    pub fn parse(start: &str, end: &str) -> Result<Self, WindowError> {
        let s = parse_timestamp(start).ok_or_else(|| WindowError::InvalidBound(start.to_string()))?;
        let e = parse_timestamp(end).ok_or_else(|| WindowError::InvalidBound(end.to_string()))?;
        Self::new(s, e)
    }

    /// The `days` days ending at `now`.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Result<Self, WindowError> {
        Ok(Self {
            start: days_before(now, days)?,
            end: now,
        })
    }

    /// Window from optional caller bounds. A missing start falls back to
    /// `days` before the end; a missing end means `now`.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, WindowError> {
        let end = match end {
            Some(raw) => parse_timestamp(raw).ok_or_else(|| WindowError::InvalidBound(raw.to_string()))?,
            None => now,
        };
        let start = match start {
            Some(raw) => parse_timestamp(raw).ok_or_else(|| WindowError::InvalidBound(raw.to_string()))?,
            None => days_before(end, days)?,
        };
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn start_param(&self) -> String {
        self.start.format(BIND_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(BIND_FORMAT).to_string()
    }
}

fn days_before(ts: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, WindowError> {
    Duration::try_days(i64::from(days))
        .and_then(|span| ts.checked_sub_signed(span))
        .ok_or(WindowError::OutOfRange(days))
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
