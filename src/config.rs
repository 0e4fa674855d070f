//! TOML configuration for logscope.
//!
//! One parameterized configuration covers every dashboard variant: grouping
//! bucket, window size, smoothing span, anomaly thresholds and alert cutoffs.
//! Loading order is an explicit path, then `LOGSCOPE_CONFIG`, then
//! `./logscope.toml`, then compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::trend::Bucket;
use crate::detect::alert::AlertRules;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub alerts: AlertRules,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AnalyticsConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded logscope configuration");
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the env var and
    /// working-directory candidates fall through to defaults on error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var("LOGSCOPE_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LOGSCOPE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new("logscope.toml");
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.store.retry_attempts > 0, "store.retry_attempts must be at least 1");
        ensure!(self.analysis.window_days > 0, "analysis.window_days must be at least 1");
        ensure!(self.analysis.rolling_span > 0, "analysis.rolling_span must be at least 1");
        ensure!(
            self.analysis.z_threshold > 0.0,
            "analysis.z_threshold must be positive"
        );
        ensure!(
            self.analysis.traffic_deviation_threshold > 0.0,
            "analysis.traffic_deviation_threshold must be positive"
        );
        ensure!(
            self.analysis.correlation_limit > 0,
            "analysis.correlation_limit must be at least 1"
        );
        ensure!(
            self.alerts.medium_error_rate <= self.alerts.high_error_rate
                && self.alerts.high_error_rate <= self.alerts.critical_error_rate,
            "alert error-rate cutoffs must be ordered medium <= high <= critical"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database holding the three log tables.
    pub path: PathBuf,
    /// Attempts made to open the store before giving up.
    pub retry_attempts: u32,
    /// Fixed pause between open attempts.
    pub retry_backoff_ms: u64,
    /// How long the pool waits for a connection on each attempt.
    pub connect_timeout_ms: u64,
    /// Maximum age of a cached window snapshot. 0 disables the cache.
    pub cache_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs.db"),
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            connect_timeout_ms: 5000,
            cache_ttl_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Trend bucket size.
    pub bucket: Bucket,
    /// Default window length when the caller gives no bounds.
    pub window_days: u32,
    /// Trailing rolling-average span, in buckets.
    pub rolling_span: usize,
    /// |z| above which a bucket is anomalous.
    pub z_threshold: f64,
    /// Relative deviation from the hourly median above which traffic is anomalous.
    pub traffic_deviation_threshold: f64,
    /// Row cap for the three-way correlation join.
    pub correlation_limit: usize,
    pub top_endpoints: usize,
    pub top_users: usize,
    /// Row cap for the suspicious source address table.
    pub top_sources: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bucket: Bucket::Day,
            window_days: 7,
            rolling_span: 7,
            z_threshold: 2.0,
            traffic_deviation_threshold: 0.5,
            correlation_limit: 1000,
            top_endpoints: 20,
            top_users: 50,
            top_sources: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
