use std::fs;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// Daily files kept by [`cleanup_old_logs`].
    pub max_files: usize,
    pub enable_console: bool,
    pub enable_file: bool,
    pub log_level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            max_files: 14,
            enable_console: true,
            enable_file: false,
            log_level: Level::INFO,
        }
    }
}

pub fn default_filter(level: Level) -> String {
    format!("campaign_ops={},sqlx=warn,rdkafka=warn", level.as_str().to_lowercase())
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured
/// level. The returned guards flush the file writers and must outlive the
/// process's logging.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<Vec<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config.log_level)));

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();

    if config.enable_console {
        let console_layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true);
        layers.push(Box::new(console_layer));
    }

    if config.enable_file {
        fs::create_dir_all(&config.log_dir)?;

        let all_appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "campaign-ops.log");
        let (all_writer, all_guard) = tracing_appender::non_blocking(all_appender);
        guards.push(all_guard);
        let all_layer = fmt::layer()
            .with_writer(all_writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);
        layers.push(Box::new(all_layer));

        let error_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "error.log");
        let (error_writer, error_guard) = tracing_appender::non_blocking(error_appender);
        guards.push(error_guard);
        let error_layer = fmt::layer()
            .with_writer(error_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::LevelFilter::WARN);
        layers.push(Box::new(error_layer));
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    Ok(guards)
}

/// Removes the oldest `.log` files beyond `max_files`. Returns how many
/// were removed.
pub fn cleanup_old_logs(log_dir: &str, max_files: usize) -> std::io::Result<usize> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        return Ok(0);
    }

    let mut log_files: Vec<_> = fs::read_dir(log_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.contains(".log"))
                .unwrap_or(false)
        })
        .collect();

    if log_files.len() <= max_files {
        return Ok(0);
    }

    // Oldest first
    log_files.sort_by_key(|entry| {
        entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    let excess = log_files.len() - max_files;
    let mut removed = 0;
    for entry in log_files.iter().take(excess) {
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_quiets_dependencies() {
        assert_eq!(
            default_filter(Level::DEBUG),
            "campaign_ops=debug,sqlx=warn,rdkafka=warn"
        );
    }

    #[test]
    fn test_cleanup_old_logs() {
        let dir = std::env::temp_dir().join(format!("campaign-ops-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for day in 1..=4 {
            fs::write(dir.join(format!("campaign-ops.log.2024-01-0{}", day)), b"x").unwrap();
        }
        fs::write(dir.join("notes.txt"), b"keep").unwrap();

        let dir_str = dir.to_str().unwrap();
        assert_eq!(cleanup_old_logs(dir_str, 2).unwrap(), 2);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 3);
        assert_eq!(cleanup_old_logs(dir_str, 2).unwrap(), 0);

        fs::remove_dir_all(&dir).unwrap();
        assert_eq!(cleanup_old_logs(dir_str, 2).unwrap(), 0);
    }
}
