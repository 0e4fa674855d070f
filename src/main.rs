use std::io::Write;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};

use logscope::analysis::correlation::CorrelationEngine;
use logscope::analysis::runner;
use logscope::analysis::trend::Bucket;
use logscope::config::{AnalyticsConfig, LoggingConfig};
use logscope::logs::{LogFilter, NetworkAction, Table, TimeWindow};
use logscope::storage::{Freshness, LogStore};

const NO_DATA: &str = "no data available";

#[derive(Parser)]
#[command(
    name = "logscope",
    about = "Log analytics and anomaly detection over SQLite log tables",
    version,
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// SQLite database holding access_logs, execution_logs and vpc_logs
    #[arg(long, global = true, env = "LOGSCOPE_DB")]
    db: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Window start, inclusive (ISO-8601 date or datetime)
    #[arg(long, global = true)]
    start: Option<String>,

    /// Window end, exclusive (ISO-8601 date or datetime)
    #[arg(long, global = true)]
    end: Option<String>,

    /// Window length in days when --start is not given
    #[arg(long, global = true)]
    days: Option<u32>,

    /// JSON output for machine parsing
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Headline metrics for the window
    Overview,

    /// Bucketed request, latency and error trends
    Trends {
        /// Bucket size: day or hour
        #[arg(long)]
        bucket: Option<Bucket>,
    },

    /// Z-score and traffic-volume anomaly flags
    Anomalies,

    /// Severity-tiered alerts for suspicious sources and anomalies
    Alerts,

    /// Requests joined across all three tables
    Correlate {
        /// Maximum joined rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Every analysis section for the window
    Report,

    /// Export one raw table as CSV
    Export {
        /// Table: access, execution or network
        table: Table,

        /// Output file path (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Only rows for this user (access table)
        #[arg(long)]
        user: Option<String>,

        /// Only rows for this function (execution table)
        #[arg(long)]
        function: Option<String>,

        /// Only rows with this action (network table)
        #[arg(long)]
        action: Option<NetworkAction>,
    },

    /// Start the HTTP API server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = cli.global;

    let mut config = AnalyticsConfig::resolve(global.config.as_deref())?;
    if let Some(db) = global.db {
        config.store.path = db;
    }
    init_tracing(&config.logging);

    let command = match cli.command {
        Commands::Serve { bind } => {
            tracing::info!(%bind, "starting logscope API");
            return logscope::serve(&bind, config).await;
        }
        command => command,
    };

    let days = global.days.unwrap_or(config.analysis.window_days);
    let window = TimeWindow::resolve(
        global.start.as_deref(),
        global.end.as_deref(),
        days,
        chrono::Utc::now(),
    )
    .context("invalid time window")?;
    let store = LogStore::from_config(&config.store)
        .with_context(|| format!("failed to open {}", config.store.path.display()))?;

    match command {
        Commands::Overview => {
            let snapshot = store.snapshot(&window, Freshness::Exact);
            let m = logscope::analysis::aggregator::overview(&snapshot.access, &snapshot.execution, &snapshot.network);
            if global.json {
                return print_json(&m);
            }
            println!("\n=== logscope overview {} ===", window);
            if m.total_requests == 0 {
                println!("{}", NO_DATA);
                return Ok(());
            }
            println!("{:<25} : {}", "Total requests", m.total_requests);
            println!("{:<25} : {}", "Avg latency (ms)", fmt_opt(m.avg_latency_ms));
            println!("{:<25} : {}", "Active users", m.active_users);
            println!("{:<25} : {:.1}%", "Success rate", m.success_rate);
            println!("{:<25} : {}", "Rejected connections", m.rejected_connections);
            println!("{:<25} : {}", "Failed executions", m.failed_executions);
        }
        Commands::Trends { bucket } => {
            if let Some(bucket) = bucket {
                config.analysis.bucket = bucket;
            }
            let snapshot = store.snapshot(&window, Freshness::Exact);
            let report = runner::trend_section(&snapshot, &config);
            if global.json {
                return print_json(&report);
            }
            if report.is_empty() {
                println!("{}", NO_DATA);
                return Ok(());
            }
            println!(
                "{:<18} | {:>8} | {:>12} | {:>9} | {:>9} | {:>6}",
                "Bucket", "Requests", "Latency (ms)", "Success %", "Error %", "Users"
            );
            println!("{:-<18}-|-{:-<8}-|-{:-<12}-|-{:-<9}-|-{:-<9}-|-{:-<6}", "", "", "", "", "", "");
            for row in &report.rows {
                println!(
                    "{:<18} | {:>8} | {:>12} | {:>9.1} | {:>9.1} | {:>6}",
                    row.bucket,
                    row.requests,
                    fmt_opt(row.avg_latency_ms),
                    row.success_rate,
                    row.error_rate,
                    row.active_users
                );
            }
        }
        Commands::Anomalies => {
            let snapshot = store.snapshot(&window, Freshness::Exact);
            let flags = runner::anomaly_section(&snapshot, &config);
            if global.json {
                return print_json(&flags);
            }
            if flags.is_empty() {
                println!("No anomalies detected in {}.", window);
                return Ok(());
            }
            println!(
                "{:<8} | {:<25} | {:<18} | {:>10} | {:>10} | {:>7}",
                "Severity", "Metric", "Bucket", "Observed", "Baseline", "Score"
            );
            println!("{:-<8}-|-{:-<25}-|-{:-<18}-|-{:-<10}-|-{:-<10}-|-{:-<7}", "", "", "", "", "", "");
            for f in &flags {
                let metric = match &f.group {
                    Some(group) => format!("{}/{}", f.metric, group),
                    None => f.metric.clone(),
                };
                println!(
                    "{:<8} | {:<25} | {:<18} | {:>10.1} | {:>10.1} | {:>7.2}",
                    f.severity, metric, f.bucket, f.observed, f.baseline, f.deviation_score
                );
            }
        }
        Commands::Alerts => {
            let snapshot = store.snapshot(&window, Freshness::Exact);
            let flags = runner::anomaly_section(&snapshot, &config);
            let alerts = runner::alert_section(&snapshot, &config, &flags);
            if global.json {
                return print_json(&alerts);
            }
            if alerts.is_empty() {
                println!("No alerts for {}.", window);
                return Ok(());
            }
            for alert in &alerts {
                println!("[{}] {}", alert.severity, alert.title);
                println!("    {}", alert.description);
            }
        }
        Commands::Correlate { limit } => {
            let limit = limit.unwrap_or(config.analysis.correlation_limit);
            ensure!(limit > 0, "--limit must be at least 1");
            let view = CorrelationEngine::new(store, limit).correlate(&window);
            if global.json {
                return print_json(&view);
            }
            if view.is_empty() {
                println!("{}", NO_DATA);
                return Ok(());
            }
            println!("Joined rows: {}{}", view.rows.len(), if view.truncated { " (truncated)" } else { "" });
            println!("\n{:<6} | {:<8} | Count", "Status", "Action");
            println!("{:-<6}-|-{:-<8}-|-{:-<6}", "", "", "");
            for c in &view.status_actions {
                println!("{:<6} | {:<8} | {}", c.status_code, c.action, c.count);
            }
            println!(
                "\n{:<25} | {:<8} | {:>5} | {:>9} | {:>9} | {:>9}",
                "Function", "Status", "Count", "p25", "Median", "p75"
            );
            println!("{:-<25}-|-{:-<8}-|-{:-<5}-|-{:-<9}-|-{:-<9}-|-{:-<9}", "", "", "", "", "", "");
            for d in &view.durations {
                println!(
                    "{:<25} | {:<8} | {:>5} | {:>9.1} | {:>9.1} | {:>9.1}",
                    d.function_name,
                    d.status,
                    d.distribution.count,
                    d.distribution.p25,
                    d.distribution.median,
                    d.distribution.p75
                );
            }
        }
        Commands::Report => {
            let report = runner::run_report(&store, &window, &config, Freshness::Exact);
            if global.json {
                return print_json(&report);
            }
            println!("\n=== logscope report {} ===", window);
            if report.is_empty() {
                println!("{}", NO_DATA);
                return Ok(());
            }
            println!("{:<25} : {}", "Total requests", report.overview.total_requests);
            println!("{:<25} : {}", "Avg latency (ms)", fmt_opt(report.overview.avg_latency_ms));
            println!("{:<25} : {:.1}%", "Success rate", report.overview.success_rate);
            println!("{:<25} : {}", "Trend buckets", report.trends.rows.len());
            println!("{:<25} : {}", "Endpoints", report.endpoints.len());
            println!("{:<25} : {}", "Functions", report.functions.len());
            println!("{:<25} : {}", "Engaged users", report.users.len());
            println!("{:<25} : {}", "Source addresses", report.sources.len());
            println!("{:<25} : {}", "Anomalies", report.anomalies.len());
            println!("{:<25} : {}", "Alerts", report.alerts.len());
            println!("{:<25} : {}", "Correlated requests", report.correlation.rows.len());
        }
        Commands::Export {
            table,
            output,
            user,
            function,
            action,
        } => {
            let filter = LogFilter {
                user_id: user,
                function_name: function,
                action,
            };
            let rows = match &output {
                Some(path) => {
                    let file = std::fs::File::create(path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    logscope::export::export_table(&store, table, &window, &filter, file)?
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut lock = stdout.lock();
                    let n = logscope::export::export_table(&store, table, &window, &filter, &mut lock)?;
                    lock.flush()?;
                    n
                }
            };
            if let Some(path) = output {
                eprintln!("Wrote {} {} rows to {}", rows, table, path.display());
            }
        }
        // Dispatched before the store is opened.
        Commands::Serve { .. } => {}
    }

    Ok(())
}
