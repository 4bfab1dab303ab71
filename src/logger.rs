//! Logger initialization.

use std::io::Write;

use colored::*;
use log::LevelFilter;

/// Maps `-v`/`-q` counts to a level. Quiet wins.
pub fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Warn;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Builds the stderr logger.
///
/// `rust_log` (the `RUST_LOG` value) replaces the default filters for other
/// crates; `level` always decides this crate's output.
pub fn build_logger(level: LevelFilter, rust_log: Option<&str>) -> env_logger::Logger {
    let mut builder = env_logger::Builder::new();
    match rust_log {
        Some(filters) => {
            builder.parse_filters(filters);
        }
        None => {
            builder.filter_level(LevelFilter::Warn);
            builder.filter_module("reqwest", LevelFilter::Info);
        }
    }
    builder.filter_module("geotagger", level);
    builder.format(|buf, record| {
        let level = record.level();
        // Per-image progress reads better without decoration.
        if level == log::Level::Info {
            return writeln!(buf, "{}", record.args());
        }
        let label = match level {
            log::Level::Error => level.to_string().red(),
            log::Level::Warn => level.to_string().yellow(),
            log::Level::Info => level.to_string().green(),
            log::Level::Debug => level.to_string().blue(),
            log::Level::Trace => level.to_string().purple(),
        };
        writeln!(buf, "[{}] {}", label, record.args())
    });
    builder.build()
}

/// Installs [`build_logger`] as the global logger.
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let logger = build_logger(level, rust_log.as_deref());
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(())
}
