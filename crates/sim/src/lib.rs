//! startup glue for the wmediumd daemon

pub mod config;

use log::LevelFilter;

pub use config::{ConfigError, Topology};

/// Maps an RFC 5424 severity (0-7) onto a log filter.
pub fn log_filter(severity: u8) -> LevelFilter {
    match severity {
        0..=3 => LevelFilter::Error,
        4 => LevelFilter::Warn,
        5 => LevelFilter::Info,
        6 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
