// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pollable trait - readiness predicate attached to a [`Poller`].
//!
//! A pollable is anything that can answer "do you have work ready?" and wake
//! a blocked poller when the answer may have changed. Sockets, beacons and
//! timers implement it; applications can implement it for their own
//! resources.
//!
//! [`Poller`]: super::Poller

use super::wake::WakeNotifier;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of a pollable inside a poller's registration set.
pub type PollId = u64;

static NEXT_POLL_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique [`PollId`].
#[must_use]
pub fn next_poll_id() -> PollId {
    NEXT_POLL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Readiness source that can be multiplexed by a poller.
pub trait Pollable: Send + Sync {
    /// Stable identity used for duplicate detection and removal.
    fn poll_id(&self) -> PollId;

    /// Whether work is ready right now.
    fn is_ready(&self) -> bool;

    /// Register a notifier to be signalled when readiness may have changed.
    fn attach_notifier(&self, notifier: Arc<WakeNotifier>);

    /// Remove a previously attached notifier.
    fn detach_notifier(&self, notifier: &Arc<WakeNotifier>);

    /// Earliest instant at which this pollable becomes ready on its own
    /// (timers). The poller never sleeps past it.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// Called by the poller after the readiness handler ran.
    fn acknowledge(&self) {}

    /// Block until ready or until `timeout` elapses.
    fn wait_ready(&self, timeout: Duration) -> bool {
        if self.is_ready() {
            return true;
        }

        let notifier = Arc::new(WakeNotifier::new());
        self.attach_notifier(Arc::clone(&notifier));

        let deadline = Instant::now() + timeout;
        let ready = loop {
            if self.is_ready() {
                break true;
            }
            let wake_at = self.next_deadline().map_or(deadline, |d| d.min(deadline));
            if Instant::now() >= deadline {
                break false;
            }
            notifier.wait_until(wake_at);
        };

        self.detach_notifier(&notifier);
        ready
    }
}

/// Set of notifiers attached to one pollable.
///
/// Helper for `Pollable` implementations: keep one of these next to the
/// readiness state and call [`NotifierSet::notify_all`] after every change.
#[derive(Debug, Default)]
pub struct NotifierSet {
    notifiers: Mutex<Vec<Arc<WakeNotifier>>>,
}

impl NotifierSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notifier (ignored if already present).
    pub fn add(&self, notifier: Arc<WakeNotifier>) {
        let mut notifiers = self.notifiers.lock();
        if !notifiers.iter().any(|n| Arc::ptr_eq(n, &notifier)) {
            notifiers.push(notifier);
        }
    }

    /// Remove a notifier.
    pub fn remove(&self, notifier: &Arc<WakeNotifier>) {
        self.notifiers.lock().retain(|n| !Arc::ptr_eq(n, notifier));
    }

    /// Signal every attached notifier.
    pub fn notify_all(&self) {
        for notifier in self.notifiers.lock().iter() {
            notifier.notify();
        }
    }

    /// Number of attached notifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.lock().len()
    }

    /// True when nothing is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.lock().is_empty()
    }
}
