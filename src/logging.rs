use anyhow::Context as _;
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Compact console output on stderr plus daily-rotated JSON files under the
/// data directory. `KEYHUB_LOG` overrides the default `info` filter.
pub fn init(data_dir: &Path) -> anyhow::Result<()> {
    let log_dir = crate::app::logs_dir(data_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("创建日志目录失败：{}", log_dir.display()))?;

    let env_filter = match std::env::var("KEYHUB_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::new(v),
        _ => EnvFilter::new("info"),
    };

    let file_appender = tracing_appender::rolling::daily(&log_dir, "keyhub.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    FILE_GUARD
        .set(file_guard)
        .map_err(|_| anyhow::anyhow!("日志系统已初始化"))?;

    Ok(())
}
