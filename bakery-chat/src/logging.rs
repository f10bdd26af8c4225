use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::error::{ChatError, Result};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`). A second call is a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init();
}

/// Log to stderr and to `bakery-chat.<date>.log` under `dir`, rotated daily.
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_file_logging(dir: &Path) -> Result<WorkerGuard> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("bakery-chat")
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| ChatError::Config(format!("Cannot log to {}: {}", dir.display(), e)))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr.and(file_writer))
        .try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging();
        init_logging();
        tracing::info!("still logging");
    }

    #[test]
    fn test_file_logging_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_file_logging(dir.path()).unwrap();
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("bakery-chat") && n.ends_with(".log")));
    }
}
