//! `tracing` initialization for the control process and tests.

use std::str::FromStr;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes the global subscriber from `directives`, falling back to
/// the `RUST_LOG` env var, then to `info`. Call once at process start.
pub fn init(directives: Option<&str>) {
    let filter = match directives {
        Some(directives) => EnvFilter::from_str(directives)
            .unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::NONE)
        .with_target(false)
        .init();
}

/// Initializes logging for a test. Repeated calls are no-ops rather than
/// panics so every test can call this unconditionally.
pub fn init_for_testing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
