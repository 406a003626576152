// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by the context, poller, beacon and socket layers.

use std::io;

/// Errors returned by HMQ operations.
///
/// Lifecycle violations (`InvalidState`, `Terminated`) are always surfaced
/// to the caller that triggered them. Background loops never return these
/// to the application; they log and, for the poller, report through the
/// error callback.
///
/// # Example
///
/// ```rust,no_run
/// use hmq::{Context, Error};
///
/// let ctx = Context::new();
/// match ctx.check_disposed() {
///     Err(Error::Terminated) => println!("context is gone"),
///     Err(e) => println!("other error: {}", e),
///     Ok(()) => println!("context still usable"),
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation attempted on a resource or context in the wrong state
    /// (closed socket, failed beacon, registration on a terminating context).
    InvalidState(String),
    /// The owning context reached the `Terminated` state.
    Terminated,

    // ========================================================================
    // Wait Errors
    // ========================================================================
    /// A bounded wait elapsed without the awaited condition.
    Timeout,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    IoError(io::Error),
    /// Requested port/address unavailable.
    BindFailed(String),
    /// Frame exceeds the configured maximum size.
    FrameTooLarge(usize),

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// A readiness handler reported a failure.
    Handler(String),
}

impl Error {
    /// Shorthand for `Error::InvalidState` with a formatted message.
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// True for the two lifecycle-misuse variants.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::InvalidState(_) | Error::Terminated)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Terminated => write!(f, "Context terminated"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::FrameTooLarge(len) => write!(f, "Frame too large: {} bytes", len),
            Error::Handler(msg) => write!(f, "Handler failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

/// Convenient alias for results using [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
