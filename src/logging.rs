//! Logging setup for the lending service.
//!
//! Async file logging with daily rotation; the returned guard must be kept
//! alive for the entire program.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn setup_async_file_logging(service_name: &str, log_dir: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, format!("{}.log", service_name));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .json() // Structured JSON output
                .with_target(true)
                .with_thread_ids(true)
                .with_file(false)
                .with_line_number(false),
        )
        .init();

    guard
}
