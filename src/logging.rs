//! Structured logging setup: console plus an optional daily rolling file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "stock-out";
const MAX_LOG_FILES: usize = 10;
const DEFAULT_FILTER: &str = "info,pos_stock_out=debug";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. When `log_dir` is given, old
/// files are pruned and a non-blocking daily file layer is added; keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return None;
    };

    let file_ready = fs::create_dir_all(dir).is_ok();
    if file_ready {
        prune_old_logs(dir, MAX_LOG_FILES);
    }

    let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if !file_ready {
        warn!(dir = %dir.display(), "Could not create log directory");
    }
    Some(guard)
}

/// Keep only the `keep` most recently modified `stock-out.*` files in `dir`.
pub fn prune_old_logs(dir: &Path, keep: usize) {
    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")))
                .unwrap_or(false);
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to prune old log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_prune_keeps_newest_stock_out_logs() {
        let dir = std::env::temp_dir().join(format!("stock_out_logs_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let base = SystemTime::now() - Duration::from_secs(3600);
        for day in 1..=4 {
            let path = dir.join(format!("stock-out.2024-01-0{day}"));
            fs::write(&path, "line\n").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(day * 60)).unwrap();
        }
        fs::write(dir.join("other.log"), "keep me").unwrap();

        prune_old_logs(&dir, 2);

        let mut remaining: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec!["other.log", "stock-out.2024-01-03", "stock-out.2024-01-04"]
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = std::env::temp_dir().join(format!("stock_out_nologs_{}", uuid::Uuid::new_v4()));
        prune_old_logs(&dir, 1);
        assert!(!dir.exists());
    }
}
