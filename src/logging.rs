//! Tracing setup: stdout always, plus a daily rolling file when the config
//! carries a log directory.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "lingo-backend.log";

/// Chatty at `info`; only worth seeing when something fails.
const QUIET_TARGETS: &[&str] = &["sqlx::query", "tungstenite", "tokio_tungstenite", "hyper"];

/// Keeps the non-blocking file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Appends a `warn` directive for every quiet target the caller's filter
/// does not already mention.
pub fn filter_directives(log_level: &str) -> String {
    let base = match log_level.trim() {
        "" => "info",
        level => level,
    };
    let mut directives = vec![base.to_string()];
    directives.extend(
        QUIET_TARGETS
            .iter()
            .filter(|target| !base.contains(**target))
            .map(|target| format!("{target}=warn")),
    );
    directives.join(",")
}

pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Option<FileLogGuard> {
    let env_filter =
        EnvFilter::try_new(filter_directives(log_level)).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir.map(|dir| (dir, file_writer(dir))) {
        Some((_, Ok((writer, guard)))) => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(FileLogGuard { _guard: guard }),
        ),
        Some((dir, Err(err))) => {
            eprintln!("failed to create log directory {}: {err}", dir.display());
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    if let (Some(dir), Some(_)) = (log_dir, guard.as_ref()) {
        tracing::info!(log_dir = %dir.display(), "file logging enabled");
    }
    guard
}

fn file_writer(dir: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_targets_are_appended() {
        assert_eq!(
            filter_directives("info"),
            "info,sqlx::query=warn,tungstenite=warn,tokio_tungstenite=warn,hyper=warn"
        );
        assert!(filter_directives("  ").starts_with("info,"));
    }

    #[test]
    fn test_explicit_target_is_left_alone() {
        let directives = filter_directives("debug,sqlx::query=debug");
        assert!(directives.starts_with("debug,sqlx::query=debug,"));
        assert!(!directives.contains("sqlx::query=warn"));
    }
}
