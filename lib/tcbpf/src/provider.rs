// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers let the primitives run in more than one context by
//! plugging in the services they need. On the BPF target there is no
//! logging beyond `bpf_trace_printk`, which is itself a helper; in
//! process, trace output from the fake helper backend is routed
//! through a [`LogProvider`] so tests and `tcbpfadm` decide where it
//! ends up.

use alloc::boxed::Box;
use core::fmt;
use core::fmt::Display;

/// The set of providers handed to an in-process helper backend.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the primitives run.
///
/// For example, in a unit test this could map to `println!`.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[cfg(any(feature = "std", test))]
#[derive(Clone, Copy)]
pub struct PrintlnLog;

#[cfg(any(feature = "std", test))]
impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Keep every message in memory, so a test can assert on what was
/// traced.
#[cfg(any(feature = "std", test))]
#[derive(Clone, Default)]
pub struct CaptureLog {
    lines: std::sync::Arc<std::sync::Mutex<Vec<(LogLevel, String)>>>,
}

#[cfg(any(feature = "std", test))]
impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the captured messages.
    pub fn take(&self) -> Vec<(LogLevel, String)> {
        match self.lines.lock() {
            Ok(mut lines) => core::mem::take(&mut *lines),
            Err(poisoned) => core::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[cfg(any(feature = "std", test))]
impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        let entry = (level, String::from(msg));
        match self.lines.lock() {
            Ok(mut lines) => lines.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn level_display() {
        assert_eq!(format!("{}", LogLevel::Note), "[NOTE]");
        assert_eq!(format!("{}", LogLevel::Error), "[ERROR]");
    }

    #[test]
    fn capture_is_shared_between_clones() {
        let log = CaptureLog::new();
        let providers = Providers { log: Box::new(log.clone()) };
        providers.log.log(LogLevel::Warn, "ttl exceeded");
        assert_eq!(
            log.take(),
            vec![(LogLevel::Warn, String::from("ttl exceeded"))]
        );
        assert!(log.take().is_empty());
    }
}
