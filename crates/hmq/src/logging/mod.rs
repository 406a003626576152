// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Optional backends for the `log` facade.
//!
//! Every module of this crate logs through `log::debug!` / `info!` / `warn!`
//! / `error!` with a bracketed component prefix (`[CTX]`, `[POLLER]`,
//! `[BEACON]`, `[SOCKET]`). Applications that already install a logger need
//! nothing from here. Enable the `logging` feature to get a small built-in
//! logger with console and file outputs.
//!
//! ## Example
//!
//! ```ignore
//! use hmq::logging::{init_logger, ConsoleOutput};
//! use std::sync::Arc;
//!
//! // Initialize early in main()
//! let console = Arc::new(ConsoleOutput::new(log::Level::Debug));
//! init_logger(console, log::LevelFilter::Debug);
//! ```

#[cfg(feature = "logging")]
pub mod logger;
#[cfg(feature = "logging")]
mod output;

#[cfg(feature = "logging")]
pub use output::{ConsoleOutput, FileOutput, Output};

#[cfg(feature = "logging")]
pub use logger::{flush_logger, init_logger};
