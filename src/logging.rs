//! Logger initialization.
//!
//! Log lines go to standard error so the plugin line on standard output stays
//! the only thing a monitoring agent reads.

use std::io::Write;

use env_logger::Builder;
use log::{LevelFilter, SetLoggerError};

/// Maps the number of `-v` flags to a level: warnings by default, then info,
/// debug and trace.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initializes `env_logger`.
///
/// `RUST_LOG` is read first; `level` then overrides it for this crate only, so
/// `RUST_LOG=trace` still works for everything else.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    // try_init so repeated initialization (tests) is an error, not a panic
    builder(level).try_init()
}

fn builder(level: LevelFilter) -> Builder {
    let mut builder = Builder::from_default_env();
    builder.filter_module("certnet", level);
    builder.filter_module("check_cert_net", level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}: {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder
}
