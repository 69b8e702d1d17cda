// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-mm-team
//! PUBLIC API: log_* macros, Sink, set_sink, emit(level,target,args)
//! INVARIANTS: Debug/Trace only in debug builds; sink registered at most once;
//!             silent (not buffered) when no sink is installed

use core::fmt::Arguments;

use spin::Once;

/// Logging severity used by the mapper.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    pub const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

/// Destination for log lines, supplied by the embedder.
///
/// The mapper runs in interrupt context, so implementations must not block
/// beyond their own short critical sections.
pub trait Sink: Send + Sync {
    fn write_line(&self, level: Level, target: &'static str, args: Arguments<'_>);
}

static SINK: Once<&'static dyn Sink> = Once::new();

/// Registers the process-wide sink. Later calls are ignored.
pub fn set_sink(sink: &'static dyn Sink) {
    SINK.call_once(|| sink);
}

/// Emits a log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }
    if let Some(sink) = SINK.get() {
        sink.write_line(level, target, args);
    }
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}
