//! Structured logging setup.
//!
//! `init` builds a `sloggers` terminal logger at the requested severity
//! and returns a root `Logger`; every sub-daemon gets a child logger via
//! `log.new(o!(...))` rather than logging through the root directly.

pub use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds a root terminal logger at the requested severity, writing to
/// stderr.
pub fn init(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to construct terminal logger")
}

/// A logger that discards everything, for tests and for contexts where
/// logging should be optional (the rate limiter is constructible without
/// a live daemon around it).
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
