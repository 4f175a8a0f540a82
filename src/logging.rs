use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
///
/// Returns the appender guard; the caller must keep it alive for the life of
/// the process so buffered log lines are flushed on exit.
pub fn init() -> WorkerGuard {
    // Ensure logs directory exists
    let _ = fs::create_dir_all("logs");

    // Daily-rotated JSON file log, non-blocking so the pipeline never waits
    // on log I/O
    let file_appender = tracing_appender::rolling::daily("logs", "sales_etl.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    // Human-readable console output
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("sales_etl=info".parse().unwrap()))
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}
