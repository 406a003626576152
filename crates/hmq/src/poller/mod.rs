// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Poller - reactor over a dynamic set of pollables.
//!
//! A [`Poller`] blocks on a single [`WakeNotifier`] shared by every attached
//! [`Pollable`], and dispatches the readiness handler of each ready pollable
//! in registration order. The loop runs on the caller thread ([`Poller::run`])
//! or on a named background thread ([`Poller::run_async`]).
//!
//! # Cycle
//!
//! ```text
//! drain posted tasks
//! snapshot entries            (lock held only for the clone)
//! nothing ready?  -> wait on notifier, bounded by
//!                    min(poll_interval, earliest pollable deadline)
//! for entry in snapshot:      registration order
//!     skip if removed or not ready
//!     handler()               panics caught, errors -> on_error
//!     pollable.acknowledge()
//! ```
//!
//! Handlers of one poller never run concurrently: they all execute on the
//! loop thread. Entries may be added or removed from any thread, including
//! from inside a handler; a removed entry is never dispatched again, even
//! within the cycle whose snapshot still holds it.
//!
//! # Example
//!
//! ```rust,no_run
//! use hmq::{Poller, Timer};
//! use std::time::Duration;
//!
//! let poller = Poller::new();
//! let timer = Timer::new(Duration::from_millis(50));
//! poller.add(timer, |_| {
//!     println!("tick");
//!     Ok(())
//! })?;
//!
//! poller.run_async()?;
//! std::thread::sleep(Duration::from_millis(200));
//! poller.stop_and_join()?;
//! # Ok::<(), hmq::Error>(())
//! ```

pub mod pollable;
pub mod timer;
pub mod wake;

pub use pollable::{next_poll_id, NotifierSet, PollId, Pollable};
pub use timer::Timer;
pub use wake::WakeNotifier;

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Readiness handler invoked on the loop thread.
pub type ReadyHandler = Box<dyn FnMut() -> Result<()> + Send>;

/// Side channel for handler failures: `(poll_id, error)`.
pub type ErrorCallback = Arc<dyn Fn(PollId, &Error) + Send + Sync>;

type Task = Box<dyn FnOnce() + Send>;

/// Poller tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Upper bound of one idle wait.
    pub poll_interval: Duration,
    /// Stop the loop after the first handler failure.
    pub stop_on_error: bool,
    /// Name of the background thread started by `run_async`.
    pub thread_name: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_on_error: false,
            thread_name: "hmq-poller".to_string(),
        }
    }
}

/// Loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    /// Completed poll cycles.
    pub cycles: u64,
    /// Handler invocations.
    pub dispatches: u64,
    /// Handler failures (errors and caught panics).
    pub handler_errors: u64,
    /// Posted tasks executed.
    pub tasks: u64,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    dispatches: AtomicU64,
    handler_errors: AtomicU64,
    tasks: AtomicU64,
}

struct Entry {
    id: PollId,
    pollable: Arc<dyn Pollable>,
    handler: Mutex<ReadyHandler>,
    removed: AtomicBool,
}

struct Shared {
    config: PollerConfig,
    entries: Mutex<Vec<Arc<Entry>>>,
    notifier: Arc<WakeNotifier>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    task_tx: Sender<Task>,
    task_rx: Receiver<Task>,
    on_error: RwLock<ErrorCallback>,
    counters: Counters,
    loop_thread: Mutex<Option<ThreadId>>,
}

/// Reactor dispatching readiness handlers for a set of pollables.
pub struct Poller {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Empty poller with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PollerConfig::default())
    }

    /// Empty poller with explicit configuration.
    #[must_use]
    pub fn with_config(config: PollerConfig) -> Self {
        let (task_tx, task_rx) = channel::unbounded();
        let default_callback: ErrorCallback = Arc::new(|id, err| {
            log::warn!("[POLLER] handler of pollable #{} failed: {}", id, err);
        });

        Self {
            shared: Arc::new(Shared {
                config,
                entries: Mutex::new(Vec::new()),
                notifier: Arc::new(WakeNotifier::new()),
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                task_tx,
                task_rx,
                on_error: RwLock::new(default_callback),
                counters: Counters::default(),
                loop_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Builder-style [`Poller::add`] for pre-seeded construction.
    pub fn with<P, F>(self, pollable: Arc<P>, handler: F) -> Result<Self>
    where
        P: Pollable + 'static,
        F: FnMut(&P) -> Result<()> + Send + 'static,
    {
        self.add(pollable, handler)?;
        Ok(self)
    }

    /// Register `pollable`; `handler` runs on the loop thread each cycle the
    /// pollable is ready.
    ///
    /// Fails with `InvalidState` if a pollable with the same id is already
    /// registered.
    pub fn add<P, F>(&self, pollable: Arc<P>, mut handler: F) -> Result<PollId>
    where
        P: Pollable + 'static,
        F: FnMut(&P) -> Result<()> + Send + 'static,
    {
        let target = Arc::clone(&pollable);
        self.add_boxed(pollable, Box::new(move || handler(&target)))
    }

    /// Type-erased [`Poller::add`].
    pub fn add_boxed(&self, pollable: Arc<dyn Pollable>, handler: ReadyHandler) -> Result<PollId> {
        let id = pollable.poll_id();
        let mut entries = self.shared.entries.lock();
        if entries.iter().any(|entry| entry.id == id) {
            return Err(Error::invalid_state(format!(
                "pollable #{} is already registered",
                id
            )));
        }

        pollable.attach_notifier(Arc::clone(&self.shared.notifier));
        entries.push(Arc::new(Entry {
            id,
            pollable,
            handler: Mutex::new(handler),
            removed: AtomicBool::new(false),
        }));
        let count = entries.len();
        drop(entries);

        log::debug!("[POLLER] added pollable #{} (count={})", id, count);
        // Let a sleeping loop pick up a pollable that is already ready.
        self.shared.notifier.notify();
        Ok(id)
    }

    /// Unregister a pollable. Returns `false` if it was not registered.
    ///
    /// The pollable itself is not closed.
    pub fn remove(&self, id: PollId) -> bool {
        let entry = {
            let mut entries = self.shared.entries.lock();
            match entries.iter().position(|entry| entry.id == id) {
                Some(index) => entries.remove(index),
                None => return false,
            }
        };

        entry.removed.store(true, Ordering::Release);
        entry.pollable.detach_notifier(&self.shared.notifier);
        log::debug!("[POLLER] removed pollable #{}", id);
        self.shared.notifier.notify();
        true
    }

    /// Whether a pollable with this id is registered.
    #[must_use]
    pub fn contains(&self, id: PollId) -> bool {
        self.shared.entries.lock().iter().any(|entry| entry.id == id)
    }

    /// Number of registered pollables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// True when no pollable is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.entries.lock().is_empty()
    }

    /// Install the handler-failure callback (replaces the default `warn!`).
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(PollId, &Error) + Send + Sync + 'static,
    {
        *self.shared.on_error.write() = Arc::new(callback);
    }

    /// Queue `task` to run on the loop thread at the next cycle.
    ///
    /// Tasks posted while the poller is stopped run once it starts again.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The receiver lives in `shared`, so the send cannot fail.
        let _ = self.shared.task_tx.send(Box::new(task));
        self.shared.notifier.notify();
    }

    /// Run the loop on the calling thread until [`Poller::stop`].
    ///
    /// A `stop()` issued before the loop starts makes it return at once.
    /// Fails with `InvalidState` if the poller is already running.
    pub fn run(&self) -> Result<()> {
        self.shared.begin_run()?;
        *self.shared.loop_thread.lock() = Some(thread::current().id());
        self.shared.run_loop();
        self.shared.finish_run();
        Ok(())
    }

    /// Run the loop on a background thread.
    ///
    /// A `stop()` issued after this returns is never lost.
    pub fn run_async(&self) -> Result<()> {
        self.shared.begin_run()?;

        // A previous async run has exited: `running` was false above.
        let stale = self.worker.lock().take();
        if let Some(stale) = stale {
            let _ = stale.join();
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || {
                *shared.loop_thread.lock() = Some(thread::current().id());
                shared.run_loop();
                shared.finish_run();
            });

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                log::error!("[POLLER] failed to spawn loop thread: {}", e);
                Err(Error::IoError(e))
            }
        }
    }

    /// Request the loop to exit. Idempotent and non-blocking.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.notifier.notify();
    }

    /// Wait for the background loop started by `run_async` to exit.
    ///
    /// Fails with `InvalidState` when called from the loop thread itself.
    pub fn join(&self) -> Result<()> {
        let handle = {
            let mut worker = self.worker.lock();
            if worker
                .as_ref()
                .is_some_and(|handle| handle.thread().id() == thread::current().id())
            {
                return Err(Error::invalid_state(
                    "poller cannot join its own loop thread",
                ));
            }
            worker.take()
        };

        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Handler("poller loop thread panicked".to_string())),
            None => Ok(()),
        }
    }

    /// [`Poller::stop`] followed by [`Poller::join`].
    pub fn stop_and_join(&self) -> Result<()> {
        self.stop();
        self.join()
    }

    /// Whether a loop is currently executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Counters snapshot.
    #[must_use]
    pub fn stats(&self) -> PollerStats {
        let c = &self.shared.counters;
        PollerStats {
            cycles: c.cycles.load(Ordering::Relaxed),
            dispatches: c.dispatches.load(Ordering::Relaxed),
            handler_errors: c.handler_errors.load(Ordering::Relaxed),
            tasks: c.tasks.load(Ordering::Relaxed),
        }
    }

    /// Loop configuration.
    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.shared.config
    }
}

impl Shared {
    fn begin_run(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::invalid_state("poller is already running"));
        }
        Ok(())
    }

    /// A stop request is consumed only by the run it ended.
    fn finish_run(&self) {
        *self.loop_thread.lock() = None;
        self.stop_requested.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn run_loop(&self) {
        log::debug!(
            "[POLLER] loop started with {} pollable(s)",
            self.entries.lock().len()
        );

        while !self.stopping() {
            self.run_tasks();
            let mut snapshot = self.snapshot();

            if !snapshot.iter().any(|entry| entry.pollable.is_ready()) {
                let timeout = self.idle_timeout(&snapshot);
                self.notifier.wait_timeout(timeout);
                if self.stopping() {
                    break;
                }
                self.run_tasks();
                snapshot = self.snapshot();
            }

            self.counters.cycles.fetch_add(1, Ordering::Relaxed);
            self.dispatch(&snapshot);
        }

        log::debug!("[POLLER] loop exited");
    }

    fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries.lock().clone()
    }

    fn idle_timeout(&self, snapshot: &[Arc<Entry>]) -> Duration {
        let now = Instant::now();
        snapshot
            .iter()
            .filter_map(|entry| entry.pollable.next_deadline())
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(self.config.poll_interval, Duration::min)
    }

    fn run_tasks(&self) {
        while let Ok(task) = self.task_rx.try_recv() {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                log::error!("[POLLER] posted task panicked");
            }
            self.counters.tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn dispatch(&self, snapshot: &[Arc<Entry>]) {
        for entry in snapshot {
            if self.stopping() {
                return;
            }
            if entry.removed.load(Ordering::Acquire) || !entry.pollable.is_ready() {
                continue;
            }

            let outcome = {
                let mut handler = entry.handler.lock();
                panic::catch_unwind(AssertUnwindSafe(|| (*handler)()))
            };
            entry.pollable.acknowledge();
            self.counters.dispatches.fetch_add(1, Ordering::Relaxed);

            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(_) => Error::Handler(format!("handler of pollable #{} panicked", entry.id)),
            };

            self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
            let callback = Arc::clone(&*self.on_error.read());
            if panic::catch_unwind(AssertUnwindSafe(|| callback(entry.id, &err))).is_err() {
                log::error!("[POLLER] error callback panicked");
            }

            if self.config.stop_on_error {
                log::debug!("[POLLER] stop_on_error set, stopping after #{}", entry.id);
                self.stop_requested.store(true, Ordering::Release);
            }
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();

        let on_loop_thread = self
            .shared
            .loop_thread
            .lock()
            .is_some_and(|id| id == thread::current().id());
        if !on_loop_thread {
            if let Some(handle) = self.worker.get_mut().take() {
                let _ = handle.join();
            }
        }

        let entries = std::mem::take(&mut *self.shared.entries.lock());
        for entry in entries {
            entry.removed.store(true, Ordering::Release);
            entry.pollable.detach_notifier(&self.shared.notifier);
        }
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("pollables", &self.len())
            .field("running", &self.is_running())
            .field("config", &self.shared.config)
            .finish()
    }
}
