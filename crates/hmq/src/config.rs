// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HMQ Global Configuration
//!
//! Centralizes the constants used by the poller, beacon and socket layers and
//! the process-wide termination flags.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time constants (intervals, size limits)
//! - **Level 2 (Process)**: termination flags, seeded once from the
//!   environment and mutated only at bootstrap / between test phases
//! - **Level 3 (Default context)**: the convenience [`Context`] used at the
//!   application boundary, stored in an `ArcSwapOption`
//!
//! # Environment
//!
//! - `HMQ_BLOCK_TERMINATION=1` - start with blocking termination enabled
//! - `HMQ_MANUAL_TERMINATION=1` - start with manual termination taken over
//!
//! # Example
//!
//! ```rust,no_run
//! use hmq::config;
//!
//! config::set_block_termination(true);
//! config::manual_termination_takeover();
//!
//! let ctx = config::context_create();
//! // ... create sockets / beacons on `ctx`, dispose them ...
//! config::context_terminate()?;
//! assert!(ctx.check_disposed().is_err());
//! # Ok::<(), hmq::Error>(())
//! ```

use crate::context::{Context, TerminationPolicy};
use crate::Result;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

// =======================================================================
// Poller
// =======================================================================

/// Upper bound of one poller wait when nothing is ready.
///
/// Structural changes and the stop flag are re-checked at least this often.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =======================================================================
// Beacon
// =======================================================================

/// Default broadcast destination for beacon announcements.
pub const DEFAULT_BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Receive timeout of the beacon listener loop (bounds stop latency).
pub const BEACON_RECV_POLL: Duration = Duration::from_millis(100);

/// Maximum beacon payload (one UDP frame, same limit as zbeacon).
pub const MAX_BEACON_SIZE: usize = 255;

/// Consecutive I/O failures after which a beacon loop gives up.
pub const MAX_CONSECUTIVE_IO_ERRORS: u32 = 16;

// =======================================================================
// Socket
// =======================================================================

/// Maximum frame accepted by the framed socket (anti-OOM protection).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// How long `send_frame` waits for a peer to connect.
pub const PEER_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

// =======================================================================
// Process-wide termination flags
// =======================================================================

struct Flags {
    block_termination: AtomicBool,
    manual_takeover: AtomicBool,
}

static FLAGS: OnceLock<Flags> = OnceLock::new();

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn flags() -> &'static Flags {
    FLAGS.get_or_init(|| {
        let block = env_flag("HMQ_BLOCK_TERMINATION");
        let manual = env_flag("HMQ_MANUAL_TERMINATION");
        if block || manual {
            log::info!(
                "[CONFIG] termination flags from env: block={} manual={}",
                block,
                manual
            );
        }
        Flags {
            block_termination: AtomicBool::new(block),
            manual_takeover: AtomicBool::new(manual),
        }
    })
}

/// Whether `terminate()` blocks until every resource is released.
#[must_use]
pub fn block_termination() -> bool {
    flags().block_termination.load(Ordering::Acquire)
}

/// Enable or disable blocking termination.
pub fn set_block_termination(block: bool) {
    flags().block_termination.store(block, Ordering::Release);
}

/// Take over termination: only explicit terminate calls end a context.
pub fn manual_termination_takeover() {
    flags().manual_takeover.store(true, Ordering::Release);
}

/// Return to automatic termination.
pub fn disable_manual_termination() {
    flags().manual_takeover.store(false, Ordering::Release);
}

/// Whether manual termination has been taken over.
#[must_use]
pub fn is_manual_termination() -> bool {
    flags().manual_takeover.load(Ordering::Acquire)
}

/// Snapshot of the process-wide flags.
#[must_use]
pub fn termination_policy() -> TerminationPolicy {
    TerminationPolicy {
        block_termination: block_termination(),
        manual_takeover: is_manual_termination(),
    }
}

// =======================================================================
// Default context
// =======================================================================

static DEFAULT_CONTEXT: ArcSwapOption<Context> = ArcSwapOption::const_empty();
static CREATE_LOCK: Mutex<()> = parking_lot::const_mutex(());

fn install_fresh() -> Arc<Context> {
    let ctx = Context::new();
    DEFAULT_CONTEXT.store(Some(Arc::clone(&ctx)));
    log::debug!("[CONFIG] default context is now #{}", ctx.id());
    ctx
}

/// Current default context, created lazily.
///
/// With manual termination taken over, a terminated instance is returned
/// as-is so callers can observe it through
/// [`Context::check_disposed`]; [`context_create`] replaces it. In automatic
/// mode a terminated instance is replaced transparently.
#[must_use]
pub fn context() -> Arc<Context> {
    let usable = |ctx: &Arc<Context>| !ctx.is_terminated() || is_manual_termination();

    if let Some(ctx) = DEFAULT_CONTEXT.load_full() {
        if usable(&ctx) {
            return ctx;
        }
    }

    let _guard = CREATE_LOCK.lock();
    match DEFAULT_CONTEXT.load_full() {
        Some(ctx) if usable(&ctx) => ctx,
        _ => install_fresh(),
    }
}

/// Return the live default context, replacing a terminated one.
///
/// Idempotent while the current instance is not terminated.
pub fn context_create() -> Arc<Context> {
    let _guard = CREATE_LOCK.lock();
    match DEFAULT_CONTEXT.load_full() {
        Some(ctx) if !ctx.is_terminated() => ctx,
        _ => install_fresh(),
    }
}

/// Terminate the default context (no-op if none was ever created).
pub fn context_terminate() -> Result<()> {
    match DEFAULT_CONTEXT.load_full() {
        Some(ctx) => ctx.terminate(),
        None => Ok(()),
    }
}

/// Terminate the default context, waiting at most `timeout`.
pub fn context_terminate_timeout(timeout: Duration) -> Result<()> {
    match DEFAULT_CONTEXT.load_full() {
        Some(ctx) => ctx.terminate_timeout(timeout),
        None => Ok(()),
    }
}
