// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic timer pollable.
//!
//! A [`Timer`] becomes ready every `interval` while enabled. Its handler runs
//! on the poller thread like any other pollable, which makes it the natural
//! place for housekeeping that must not race with socket handlers.

use super::pollable::{next_poll_id, NotifierSet, PollId, Pollable};
use super::wake::WakeNotifier;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Expiry bookkeeping, guarded by one lock.
#[derive(Debug)]
struct Schedule {
    /// Next expiry; `None` while disabled
    next: Option<Instant>,
    /// Expiry last reported ready, advanced by `acknowledge`
    due: Option<Instant>,
}

/// Interval timer driven by a poller.
#[derive(Debug)]
pub struct Timer {
    id: PollId,
    interval: Mutex<Duration>,
    schedule: Mutex<Schedule>,
    notifiers: NotifierSet,
}

impl Timer {
    /// Create an enabled timer that first fires after `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: next_poll_id(),
            interval: Mutex::new(interval),
            schedule: Mutex::new(Schedule {
                next: Some(Instant::now() + interval),
                due: None,
            }),
            notifiers: NotifierSet::new(),
        })
    }

    /// Current interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Change the interval; takes effect from now.
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
        self.reset();
    }

    /// Whether the timer is armed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.schedule.lock().next.is_some()
    }

    /// Arm the timer (next expiry one interval from now).
    pub fn enable(&self) {
        self.reset();
    }

    /// Disarm the timer.
    pub fn disable(&self) {
        self.schedule.lock().next = None;
        self.notifiers.notify_all();
    }

    /// Restart the countdown from now.
    ///
    /// Calling this from the timer's own handler is honoured: the expiry
    /// being dispatched is not advanced on top of the new one.
    pub fn reset(&self) {
        let interval = self.interval();
        self.schedule.lock().next = Some(Instant::now() + interval);
        self.notifiers.notify_all();
    }
}

impl Pollable for Timer {
    fn poll_id(&self) -> PollId {
        self.id
    }

    fn is_ready(&self) -> bool {
        let mut schedule = self.schedule.lock();
        match schedule.next {
            Some(next) if Instant::now() >= next => {
                schedule.due = Some(next);
                true
            }
            _ => false,
        }
    }

    fn attach_notifier(&self, notifier: Arc<WakeNotifier>) {
        self.notifiers.add(notifier);
    }

    fn detach_notifier(&self, notifier: &Arc<WakeNotifier>) {
        self.notifiers.remove(notifier);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.schedule.lock().next
    }

    fn acknowledge(&self) {
        let interval = self.interval();
        let mut schedule = self.schedule.lock();
        let due = schedule.due.take();

        // Rescheduled (or disarmed) while dispatching: keep the new expiry.
        let Some(expiry) = schedule.next.filter(|next| Some(*next) == due) else {
            return;
        };

        let now = Instant::now();
        if interval.is_zero() {
            schedule.next = Some(now);
            return;
        }
        // Skip missed periods instead of firing a burst.
        let mut upcoming = expiry + interval;
        while upcoming <= now {
            upcoming += interval;
        }
        schedule.next = Some(upcoming);
    }
}
