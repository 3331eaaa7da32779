use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use core_types::config::LoggingSection;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging from the `[logging]` config section.
///
/// - Honors `logging.level`, falling back to `RUST_LOG` then `info`.
/// - Console output goes to stderr so command output on stdout stays clean;
///   `json` or `text` per `logging.format`.
/// - When `logging.file` is set, JSON logs are also written to a rolling file.
///   Keep the returned guard alive for the life of the process.
pub fn init_tracing_with_config(cfg: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let filter_str = if cfg.level.is_empty() {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())
    } else {
        cfg.level.clone()
    };
    let filter = EnvFilter::try_new(&filter_str)
        .with_context(|| format!("invalid log filter {filter_str:?}"))?;

    let (file_layer, guard) = if cfg.file.is_empty() {
        (None, None)
    } else {
        let appender = file_appender(Path::new(&cfg.file), &cfg.roll)?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);
        (Some(layer), Some(guard))
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let result = if cfg.format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    };

    if let Err(e) = result {
        static WARNED_ONCE: OnceLock<()> = OnceLock::new();
        // Common in tests when several initialize tracing.
        let msg = e.to_string();
        if !msg.contains("already set") && WARNED_ONCE.set(()).is_ok() {
            eprintln!("Tracing init failed (global subscriber already set?): {msg}");
        }
    }

    Ok(guard)
}

/// Initializer using the default logging section (console only).
pub fn init_tracing() -> Result<Option<WorkerGuard>> {
    init_tracing_with_config(&LoggingSection::default())
}

fn file_appender(path: &Path, roll: &str) -> Result<RollingFileAppender> {
    let (dir, file) = split_dir_file(path)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    Ok(match roll {
        "daily" => rolling::daily(dir, file),
        "hourly" => rolling::hourly(dir, file),
        "never" => rolling::never(dir, file),
        other => bail!("logging.roll must be daily, hourly or never, got {other:?}"),
    })
}

fn split_dir_file(path: &Path) -> Result<(&Path, &str)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = path
        .file_name()
        .and_then(|s| s.to_str())
        .context("log file missing filename")?;
    Ok((dir, file))
}
