//! Logging setup
//!
//! Console output always; when file logging is enabled, daily-rolling files
//! under the configured directory, separated by log type:
//! - main/ - all events as JSON
//! - error/ - WARN and above
//! - api/ - HTTP server and request timing
//! - pool/ - worker pool and health monitor

use crate::infrastructure::config::LoggingConfig;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::{filter_fn, LevelFilter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TYPES: [&str; 4] = ["main", "error", "api", "pool"];

/// Initialize logging
///
/// Returns the appender guards, which must be kept alive for the duration of
/// the program. RUST_LOG takes precedence over `config.level`.
///
/// # Errors
/// Fails when the log directories cannot be created.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<Vec<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if !config.file_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true),
            )
            .init();
        return Ok(Vec::new());
    }

    create_log_dirs(&config.directory)?;

    let mut guards = Vec::new();

    // Main log - all logs
    let (main_appender, main_guard) = create_appender(&config.directory, "main");
    guards.push(main_guard);

    // Error log - ERROR and WARN only
    let (error_appender, error_guard) = create_appender(&config.directory, "error");
    guards.push(error_guard);

    // API log - server and timing logs
    let (api_appender, api_guard) = create_appender(&config.directory, "api");
    guards.push(api_guard);

    // Pool log - worker pool and health monitor
    let (pool_appender, pool_guard) = create_appender(&config.directory, "pool");
    guards.push(pool_guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(LevelFilter::WARN);

    let api_layer = tracing_subscriber::fmt::layer()
        .with_writer(api_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(filter_fn(|metadata| is_api_target(metadata.target())));

    let pool_layer = tracing_subscriber::fmt::layer()
        .with_writer(pool_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(filter_fn(|metadata| is_pool_target(metadata.target())));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(main_layer)
        .with(error_layer)
        .with(api_layer)
        .with(pool_layer)
        .with(console_layer)
        .init();

    tracing::info!(
        "Logging system initialized. Log files in {} directory",
        config.directory.display()
    );

    Ok(guards)
}

fn create_log_dirs(root: &Path) -> std::io::Result<()> {
    for log_type in LOG_TYPES {
        fs::create_dir_all(root.join(log_type))?;
    }
    Ok(())
}

/// Create a rolling file appender
fn create_appender(root: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, root.join(name), name);

    tracing_appender::non_blocking(appender)
}

fn is_api_target(target: &str) -> bool {
    target.contains("api") || target.contains("server") || target.contains("timing")
}

fn is_pool_target(target: &str) -> bool {
    target.contains("pool") || target.contains("health")
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_api {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "api", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_pool {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "pool", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_health {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "health", $level, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_creation() {
        let test_dir = std::env::temp_dir().join(format!("sociolens_logs_{}", std::process::id()));
        if test_dir.exists() {
            fs::remove_dir_all(&test_dir).ok();
        }

        create_log_dirs(&test_dir).unwrap();
        for log_type in LOG_TYPES {
            assert!(test_dir.join(log_type).exists());
        }

        fs::remove_dir_all(&test_dir).ok();
    }

    // Installs the global subscriber, so this is the only test that calls init_logging
    #[test]
    fn test_init_with_file_logging() {
        let test_dir =
            std::env::temp_dir().join(format!("sociolens_init_logs_{}", std::process::id()));
        let config = LoggingConfig {
            level: "info".to_string(),
            file_logging: true,
            directory: test_dir.clone(),
        };

        let guards = init_logging(&config).unwrap();
        assert_eq!(guards.len(), LOG_TYPES.len());
        for log_type in LOG_TYPES {
            assert!(test_dir.join(log_type).is_dir());
        }

        drop(guards);
        fs::remove_dir_all(&test_dir).ok();
    }

    #[test]
    fn test_target_routing() {
        assert!(is_api_target("sociolens::infrastructure::api"));
        assert!(is_api_target("timing"));
        assert!(!is_api_target("pool"));
        assert!(is_pool_target("pool"));
        assert!(is_pool_target("health"));
        assert!(!is_pool_target("api"));
    }
}
