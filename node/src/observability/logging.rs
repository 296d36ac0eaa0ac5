use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with a daily rotating file next to the console
///
/// - Daily rotating log files in `log_dir` (default ~/.matmul/logs), named `{file_prefix}.log`
/// - Console output on stderr; stdout is reserved for the metrics report
/// - Configurable via RUST_LOG environment variable
pub fn init_production_logging(
    level: &str,
    log_dir: Option<PathBuf>,
    file_prefix: &str,
) -> anyhow::Result<()> {
    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".matmul")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    // Environment filter (RUST_LOG overrides level)
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &log_dir, format!("{}.log", file_prefix));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false) // No colors in log files
                .with_target(true)
                .with_line_number(true),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_line_number(false),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %level,
        "File logging initialized"
    );

    Ok(())
}

/// Initialize console-only logging (stderr)
pub fn init_simple_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_line_number(false),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
