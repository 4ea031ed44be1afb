//! Process-wide logging setup
//!
//! Structured `tracing` output on stdout through a non-blocking appender.
//! The returned guard must live for the whole process; dropping it during
//! the shutdown grace window flushes buffered lines from the workers.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init(level: &str) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(writer))
        .init();

    guard
}
