// Kernel Logging Subsystem
//
// Structured, leveled logging for diagnostics and crash analysis. Every
// entry carries a severity, a coarse tick-derived timestamp and the
// originating subsystem; Debug entries additionally carry file and line.
// The serial port is the only sink in this iteration and is treated as
// ground truth.
//
// Messages below the current level are dropped before any formatting work
// happens, so disabled levels cost almost nothing in the hot path.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::serial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Panic = 4,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Panic => "PANIC",
        }
    }

    fn from_raw(raw: u8) -> LogLevel {
        match raw {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Panic,
        }
    }
}

static CURRENT_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub fn init() {
    set_level(LogLevel::Info);
}

pub fn set_level(level: LogLevel) {
    CURRENT_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_raw(CURRENT_LOG_LEVEL.load(Ordering::Relaxed))
}

fn timestamp_parts() -> (u64, u64) {
    let ms = crate::irq::ticks() * crate::irq::MS_PER_TICK;
    (ms / 1000, ms % 1000)
}

pub fn _log(level: LogLevel, origin: &str, args: fmt::Arguments, file: &str, line: u32) {
    if level < get_level() {
        return;
    }

    let (seconds, milliseconds) = timestamp_parts();

    if level == LogLevel::Debug {
        serial::_print(format_args!(
            "[t={}.{:03}s] [{}] [{}] {} ({}:{})\n",
            seconds,
            milliseconds,
            level.as_str(),
            origin,
            args,
            file,
            line
        ));
    } else {
        serial::_print(format_args!(
            "[t={}.{:03}s] [{}] [{}] {}\n",
            seconds,
            milliseconds,
            level.as_str(),
            origin,
            args
        ));
    }
}

#[macro_export]
macro_rules! log_debug {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Debug,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Info,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Warn,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Error,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_panic {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Panic,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}
