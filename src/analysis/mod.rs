//! Metric aggregation, trends, correlation and the report runner.

pub mod aggregator;
pub mod correlation;
pub mod runner;
pub mod stats;
pub mod trend;

pub use self::runner::{run_report, AnalysisReport};
