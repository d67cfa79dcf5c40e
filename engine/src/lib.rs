//! Scriptwright Core Library
//!
//! Generates long-form video scripts in dependent batches over several AI
//! providers. Provider outages, rate limits, revoked keys, and malformed
//! model output degrade a job instead of failing it.
//!
//! ## Layout
//!
//! - [`core::credentials`]: per-provider key pools with quarantine
//! - [`core::ai`]: provider catalog, failover, gateway, tolerant JSON decoding
//! - [`core::jobs`]: batch orchestration, prompts, and the script service
//! - [`core::billing`]: idempotent per-job charging
//! - [`core::settings`]: persisted pipeline settings

pub mod core;

use std::path::Path;
use std::sync::OnceLock;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Installs the global tracing subscriber.
///
/// Logs go to stderr, and to a daily-rolling file when `log_dir` is set.
/// `RUST_LOG` overrides the default `info` level. Calling this twice is a
/// no-op.
pub fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create log directory {:?}: {}", dir, e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "scriptwright.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Already initialized (tests, embedding hosts)
    let _ = tracing::subscriber::set_global_default(subscriber);
}
