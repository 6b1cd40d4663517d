//! Logging configuration, applied once at process start by the binary.
//!
//! The library only emits `tracing` events; it never installs a
//! subscriber. Level precedence: CLI flags, then the `DCP_LOG_LEVEL`
//! environment variable, then WARNING. `DCP_LOG_FILE` adds a file sink
//! whose level is `DCP_LOG_FILE_LEVEL` (defaulting to the console level).

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const ENV_LOG_LEVEL: &str = "DCP_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "DCP_LOG_FILE";
pub const ENV_LOG_FILE_LEVEL: &str = "DCP_LOG_FILE_LEVEL";

/// Map a level name to a filter. Accepts the Python-style names the
/// environment contract specifies (WARNING, CRITICAL) next to the
/// conventional ones. Unknown names fall back to WARN.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" | "TRACE" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARNING" | "WARN" => LevelFilter::WARN,
        "ERROR" | "CRITICAL" => LevelFilter::ERROR,
        _ => LevelFilter::WARN,
    }
}

/// Resolve the console level from CLI flags and the environment.
pub fn resolve_level(verbose: bool, quiet: bool, debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else if verbose {
        LevelFilter::INFO
    } else if quiet {
        LevelFilter::ERROR
    } else {
        match std::env::var(ENV_LOG_LEVEL) {
            Ok(level) => parse_level(&level),
            Err(_) => LevelFilter::WARN,
        }
    }
}

/// Install the global subscriber. Returns the file writer guard, which
/// the caller must keep alive for the process lifetime.
pub fn setup_logging(level: LevelFilter) -> Option<WorkerGuard> {
    let console = console_layer(level);

    let file_target = std::env::var(ENV_LOG_FILE).ok();
    let mut guard = None;

    let file_layer = file_target.and_then(|path| {
        let target = std::path::PathBuf::from(path);
        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        let name = target.file_name()?.to_string_lossy().into_owned();
        let appender = tracing_appender::rolling::never(&dir, name);
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);

        let file_level = std::env::var(ENV_LOG_FILE_LEVEL)
            .map(|l| parse_level(&l))
            .unwrap_or(level);

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(file_level),
        )
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    guard
}

fn console_layer<S>(level: LevelFilter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    // Quieter levels get a bare format; DEBUG gets full diagnostics.
    if level >= LevelFilter::DEBUG {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_filter(level),
        )
    } else if level >= LevelFilter::INFO {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(level),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .with_level(true)
                .with_filter(level),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_python_names() {
        assert_eq!(parse_level("WARNING"), LevelFilter::WARN);
        assert_eq!(parse_level("critical"), LevelFilter::ERROR);
        assert_eq!(parse_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level("bogus"), LevelFilter::WARN);
    }

    #[test]
    fn test_flag_precedence() {
        assert_eq!(resolve_level(true, false, true), LevelFilter::DEBUG);
        assert_eq!(resolve_level(true, false, false), LevelFilter::INFO);
        assert_eq!(resolve_level(false, true, false), LevelFilter::ERROR);
    }
}
