// ============================================================================
// LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// One global subscriber: an EnvFilter (RUST_LOG wins over the configured
// level), a stdout fmt layer in pretty/compact/json form, and optionally a
// daily-rolling file layer through tracing-appender.
// ============================================================================

use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{AuditError, AuditResult};

/// Map a configured level name to a filter, defaulting to `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn stdout_layer(config: &LoggingConfig) -> BoxedLayer {
    match config.format.as_str() {
        "json" => fmt::layer().json().with_target(true).with_current_span(false).boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_ansi(config.colors)
            .with_target(true)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_ansi(config.colors)
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process so buffered file output is flushed.
pub fn init_logging(config: &LoggingConfig) -> AuditResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer(config)];

    let guard = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().json().with_writer(writer).with_ansi(false).boxed());
            Some(guard)
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry().with(layers).with(env_filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AuditError::Internal(format!("Failed to set logger: {e}")))?;

    info!(
        target: "auditnozzle::init",
        level = %config.level,
        format = %config.format,
        file = ?config.directory,
        "Logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter("DEBUG"), LevelFilter::DEBUG);
        assert_eq!(level_filter("warning"), LevelFilter::WARN);
        assert_eq!(level_filter("nonsense"), LevelFilter::INFO);
    }
}
