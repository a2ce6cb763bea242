use std::fs::File;
use std::io::{IsTerminal, stderr};
use std::path::PathBuf;

use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default log file, used when stdout carries the serial link.
pub fn default_log_file() -> PathBuf {
    std::env::temp_dir().join("ps2-ikbd.log")
}

pub fn setup_logging_file(level: tracing::Level, logfile: PathBuf) -> std::io::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(File::create(logfile)?)
        .log_internal_errors(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(logging_targets(level))
        .init();
    Ok(())
}

/// Log to stderr so stdout stays free for IKBD bytes.
pub fn setup_logging_stdio(level: tracing::Level) {
    let format = tracing_subscriber::fmt::format()
        .with_target(false)
        .with_line_number(false)
        .with_level(false)
        .without_time();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(stderr().is_terminal())
        .with_writer(stderr)
        .event_format(format)
        .log_internal_errors(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(logging_targets(level))
        .init();
}

fn logging_targets(level: tracing::Level) -> Targets {
    Targets::new().with_default(LevelFilter::from_level(level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_targets_follow_level() {
        let targets = logging_targets(Level::INFO);
        assert!(targets.would_enable("ps2_ikbd", &Level::INFO));
        assert!(!targets.would_enable("ps2_ikbd", &Level::TRACE));
        assert!(logging_targets(Level::TRACE).would_enable("ps2_ikbd", &Level::TRACE));
    }

    #[test]
    fn test_default_log_file_in_temp_dir() {
        assert!(default_log_file().starts_with(std::env::temp_dir()));
    }
}
