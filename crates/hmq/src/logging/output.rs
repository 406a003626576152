// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging output backends (console and file).

use log::Level;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Output destination for formatted log records.
///
/// Implementations must be thread-safe and handle errors gracefully.
pub trait Output: Send + Sync {
    /// Write one record. Records below the output's own filter are dropped.
    fn write(&self, level: Level, target: &str, message: &str) -> io::Result<()>;

    /// Flush any buffered output.
    fn flush(&self) -> io::Result<()>;
}

fn format_line(level: Level, target: &str, message: &str) -> String {
    format!("[{:<5}] {}: {}\n", level.as_str(), target, message)
}

/// Writes records to stderr.
pub struct ConsoleOutput {
    max_level: Mutex<Level>,
}

impl ConsoleOutput {
    /// Console output accepting records up to `max_level` verbosity.
    pub fn new(max_level: Level) -> Self {
        Self {
            max_level: Mutex::new(max_level),
        }
    }

    /// Change the verbosity threshold.
    pub fn set_level(&self, level: Level) {
        *self.max_level.lock() = level;
    }
}

impl Output for ConsoleOutput {
    fn write(&self, level: Level, target: &str, message: &str) -> io::Result<()> {
        if level > *self.max_level.lock() {
            return Ok(());
        }
        io::stderr().write_all(format_line(level, target, message).as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Appends records to a file (truncated on creation).
pub struct FileOutput {
    file: Mutex<File>,
    max_level: Mutex<Level>,
}

impl FileOutput {
    /// Create or truncate the file at `path`.
    pub fn new(path: impl AsRef<Path>, max_level: Level) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            max_level: Mutex::new(max_level),
        })
    }

    /// Change the verbosity threshold.
    pub fn set_level(&self, level: Level) {
        *self.max_level.lock() = level;
    }
}

impl Output for FileOutput {
    fn write(&self, level: Level, target: &str, message: &str) -> io::Result<()> {
        if level > *self.max_level.lock() {
            return Ok(());
        }
        self.file
            .lock()
            .write_all(format_line(level, target, message).as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        self.file.lock().flush()
    }
}
