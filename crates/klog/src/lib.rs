//! Boot-time logging subsystem.
//!
//! Lines are written to a [`Sink`] supplied by the platform (a UART on real
//! hardware, a capture buffer under test). Until [`init`] installs one, every
//! record is dropped. [`Logger`] bridges the `log` facade so library crates
//! can use `log::info!` and friends.
#![cfg_attr(not(test), no_std)]

use core::fmt::{self, Write};

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Level::Trace => "\x1b[90m", // Gray
            Level::Debug => "\x1b[36m", // Cyan
            Level::Info => "\x1b[32m",  // Green
            Level::Warn => "\x1b[33m",  // Yellow
            Level::Error => "\x1b[31m", // Red
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

/// Byte-oriented output the logger writes to.
///
/// Implementations must tolerate being called from any core; a serial sink
/// typically wraps its port in a spinlock.
pub trait Sink: Sync {
    fn write_str(&self, s: &str);
}

/// The installed sink. Written once by [`init`].
static SINK: spin::Once<&'static dyn Sink> = spin::Once::new();

static LOGGER: Logger = Logger;

/// Adapter so `core::fmt` machinery can target a [`Sink`].
struct SinkWriter<'a>(&'a dyn Sink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Install `sink` and register [`Logger`] as the `log` backend.
///
/// Only the first call takes effect; later calls return the `log` crate's
/// error and leave the original sink in place.
pub fn init(sink: &'static dyn Sink, max: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    SINK.call_once(|| sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(max);
    Ok(())
}

/// Whether a sink has been installed.
pub fn is_initialized() -> bool {
    SINK.get().is_some()
}

/// Format one complete line (colour, level tag, optional target, message).
pub fn format_line(out: &mut dyn Write, level: Level, target: Option<&str>, args: fmt::Arguments) -> fmt::Result {
    out.write_str(level.color())?;
    out.write_str("[")?;
    out.write_str(level.as_str())?;
    out.write_str("]\x1b[0m ")?;
    if let Some(target) = target {
        out.write_str(target)?;
        out.write_str(": ")?;
    }
    out.write_fmt(args)?;
    out.write_str("\n")
}

/// `log` facade backend writing through the installed sink.
pub struct Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = SINK.get() {
            let _ = format_line(
                &mut SinkWriter(*sink),
                record.level().into(),
                Some(record.target()),
                *record.args(),
            );
        }
    }

    fn flush(&self) {}
}
