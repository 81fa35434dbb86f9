//! Logging levels and subscriber setup
// (c) 2025 Ross Younger

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{EnvFilter, prelude::*};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Environment variable that overrides what gets logged
const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Verbosity of the protocol library.
///
/// Levels are ordered: `Debug < Info < Error`, so a level enables its own
/// events and everything more severe. `Debug` additionally enables
/// per-connection QUIC tracing from the transport layer.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including QUIC transport events
    Debug,
    /// Connection and transaction lifecycle events
    #[default]
    Info,
    /// Failures only
    Error,
}

impl LogLevel {
    /// The filter directives this level implies.
    fn directives(self) -> &'static str {
        match self {
            LogLevel::Debug => "qtx=debug,quinn=debug",
            LogLevel::Info => "qtx=info",
            LogLevel::Error => "qtx=error",
        }
    }
}

/// Installs a global `tracing` subscriber logging to stderr at the given
/// level. `RUST_LOG`, if set, takes precedence over the level.
///
/// Idempotent; only the first call in a process has any effect. Does nothing
/// if some other subscriber is already installed.
pub fn setup(level: LogLevel) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter = EnvFilter::try_from_env(STANDARD_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(level.directives()));
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .try_init();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::LogLevel;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Error);
    }

    #[test]
    fn string_round_trip() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert!(LogLevel::from_str("chatty").is_err());
    }

    #[test]
    fn setup_is_idempotent() {
        super::setup(LogLevel::Error);
        super::setup(LogLevel::Debug); // no-op, must not panic
    }
}
