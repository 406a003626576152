// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global `log::Log` implementation forwarding to an [`Output`].

use super::output::Output;
use log::{LevelFilter, Log, Metadata, Record};
use std::io;
use std::sync::{Arc, OnceLock};

static LOGGER: OnceLock<&'static HmqLogger> = OnceLock::new();

struct HmqLogger {
    output: Arc<dyn Output>,
}

impl Log for HmqLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        let _ = self.output.write(record.level(), record.target(), &message);
    }

    fn flush(&self) {
        let _ = self.output.flush();
    }
}

/// Install `output` as the process logger with the given max level.
///
/// Only the first call installs a logger; later calls (or a logger set by
/// someone else) leave it untouched and return `false`.
pub fn init_logger(output: Arc<dyn Output>, level: LevelFilter) -> bool {
    let mut installed = false;
    LOGGER.get_or_init(|| {
        let logger: &'static HmqLogger = Box::leak(Box::new(HmqLogger { output }));
        if log::set_logger(logger).is_ok() {
            log::set_max_level(level);
            installed = true;
        }
        logger
    });
    installed
}

/// Flush the installed output.
///
/// Safe to call even if the logger is not initialized.
pub fn flush_logger() -> io::Result<()> {
    match LOGGER.get() {
        Some(logger) => logger.output.flush(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::output::FileOutput;

    #[test]
    fn test_flush_without_logger_is_ok() {
        // Whether or not another test installed one, flushing never fails.
        assert!(flush_logger().is_ok());
    }

    #[test]
    fn test_init_routes_facade_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("facade.log");
        let output = Arc::new(FileOutput::new(&path, log::Level::Trace).expect("output"));

        let first = init_logger(output.clone(), LevelFilter::Debug);
        let second = init_logger(output, LevelFilter::Trace);
        assert!(!second, "second init is ignored");

        if first {
            log::info!("[TEST] routed through hmq logger");
            flush_logger().expect("flush");
            let contents = std::fs::read_to_string(&path).expect("read");
            assert!(contents.contains("[TEST] routed through hmq logger"));
        }
    }
}
