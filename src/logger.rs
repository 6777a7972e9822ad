//! Logging setup shared by the apex-hessian binaries and benches.
//!
//! Library code only emits `tracing` events; nothing is printed unless a
//! subscriber is installed through one of the functions below.
//!
//! Line format:
//! ```text
//! [INFO  2026-01-01 12:00:00 apex_hessian::optimizer] message      (INFO/WARN/ERROR)
//! [DEBUG 2026-01-01 12:00:00 levenberg_marquardt.rs:412] message   (DEBUG/TRACE)
//! ```
//!
//! `RUST_LOG` overrides the default level, e.g.
//! `RUST_LOG=apex_hessian=debug` prints the per-trial λ table of the
//! Levenberg-Marquardt optimizer.

use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    EnvFilter,
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    registry::LookupSpan,
};

/// Install the global subscriber at INFO level.
///
/// ```no_run
/// apex_hessian::init_logger();
/// tracing::info!("optimizer started");
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the global subscriber with `default_level` unless `RUST_LOG` is set.
///
/// A second call is a no-op, so tests and benches may call it freely.
pub fn init_logger_with_level(default_level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(BracketFormatter)
        .try_init();
    if installed.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}

/// Colored, bracketed level tag
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::ERROR => "\x1b[31mERROR\x1b[0m",
        Level::WARN => "\x1b[33mWARN \x1b[0m",
        Level::INFO => "\x1b[32mINFO \x1b[0m",
        Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
        Level::TRACE => "\x1b[35mTRACE\x1b[0m",
    }
}

struct BracketFormatter;

impl<S, N> FormatEvent<S, N> for BracketFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = *metadata.level();
        write!(
            writer,
            "[{} {} ",
            level_tag(level),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        // source location for the verbose levels, module path otherwise
        let verbose = level == Level::DEBUG || level == Level::TRACE;
        match (verbose, metadata.file(), metadata.line()) {
            (true, Some(file), Some(line)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{filename}:{line}")?;
            }
            _ => write!(writer, "{}", metadata.target())?,
        }
        write!(writer, "] ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_tags_have_equal_width() {
        let widths: Vec<usize> = [
            Level::ERROR,
            Level::WARN,
            Level::INFO,
            Level::DEBUG,
            Level::TRACE,
        ]
        .into_iter()
        .map(|level| level_tag(level).len())
        .collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logger_with_level(Level::WARN);
        init_logger_with_level(Level::DEBUG);
        tracing::info!("still running");
    }
}
