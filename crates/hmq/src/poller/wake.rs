// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wake notification shared between a poller and its pollables.
//!
//! # Architecture
//! - Atomic flag for the lock-free signal path (pollable became ready)
//! - Condvar fallback for the idle poller
//!
//! A pollable calls [`WakeNotifier::notify`] whenever its readiness may have
//! changed; the poller sleeps in [`WakeNotifier::wait_timeout`] between
//! cycles. Notifications are coalesced: many `notify()` calls while the
//! poller is busy produce a single wake-up.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Coalescing wake-up flag with blocking wait.
#[derive(Debug)]
pub struct WakeNotifier {
    /// Set by `notify`, consumed by the waiter
    pending: AtomicBool,
    /// True while a waiter is parked on the condvar
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

impl WakeNotifier {
    /// Create a notifier with no pending wake-up.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            sleeping: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Signal the waiter.
    ///
    /// The condvar is only touched if the waiter might be parked.
    #[inline]
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);

        if *self.sleeping.lock() {
            self.condvar.notify_one();
        }
    }

    /// Consume a pending wake-up without blocking.
    #[inline]
    pub fn check_and_clear(&self) -> bool {
        self.pending.swap(false, Ordering::Acquire)
    }

    /// Peek at the pending flag.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Block until notified or until `timeout` elapses.
    ///
    /// Returns `true` if a notification was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    /// Block until notified or until `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut sleeping = self.sleeping.lock();

        // Re-check under the lock: notify() takes the same lock before
        // deciding whether to signal.
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }

        *sleeping = true;
        while !self.pending.load(Ordering::Acquire) {
            if self.condvar.wait_until(&mut sleeping, deadline).timed_out() {
                break;
            }
        }
        *sleeping = false;

        self.pending.swap(false, Ordering::Acquire)
    }
}

impl Default for WakeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_then_clear() {
        let notifier = WakeNotifier::new();
        assert!(!notifier.is_pending());
        notifier.notify();
        notifier.notify();
        assert!(notifier.check_and_clear());
        assert!(!notifier.check_and_clear(), "notifications coalesce");
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let notifier = Arc::new(WakeNotifier::new());
        let n = Arc::clone(&notifier);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            n.notify();
        });

        let start = Instant::now();
        let woken = notifier.wait_timeout(Duration::from_millis(500));
        assert!(woken);
        assert!(start.elapsed() < Duration::from_millis(250));

        handle.join().expect("notifier thread");
    }

    #[test]
    fn test_timeout_without_notify() {
        let notifier = WakeNotifier::new();
        let start = Instant::now();
        assert!(!notifier.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn test_pending_returns_immediately() {
        let notifier = WakeNotifier::new();
        notifier.notify();
        let start = Instant::now();
        assert!(notifier.wait_timeout(Duration::from_secs(1)));
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
