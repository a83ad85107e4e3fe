//! Logging bootstrap (`spec.md` §3.1 expansion). Mirrors the teacher's
//! `relay-server::logging::init`: an `EnvFilter` plus a stdout `fmt` layer,
//! with an optional daily-rotating file layer layered on top when enabled.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

const FILE_PREFIX: &str = "signal-bridge";

/// Initialize the global subscriber. `RUST_LOG` overrides `config.level`
/// when set. The file-appender's non-blocking writer guard is leaked so it
/// lives for the rest of the process, matching the teacher's long-running
/// server posture (`relay-server::logging::init`).
pub fn init(config: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.clone()));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if config.enabled {
        if let Err(e) = std::fs::create_dir_all(&config.directory) {
            eprintln!("failed to create log directory {}: {e}", config.directory);
        }
        let file_appender = tracing_appender::rolling::daily(&config.directory, FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .init();
        std::mem::forget(guard);
    } else {
        subscriber.init();
    }
}
