// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Context lifecycle and termination coordination.
//!
//! A [`Context`] owns the registry of live sharable resources and drives the
//! `Active -> Terminating -> Terminated` state machine. Sockets and beacons
//! take an explicit `&Arc<Context>`; the process-wide default instance lives
//! in [`crate::config`] and is only meant for the application boundary.
//!
//! # Termination Policy
//!
//! ```text
//! manual_takeover = false   explicit terminate() is a no-op;
//!                           the last deregistration terminates the context
//! manual_takeover = true    only terminate() drives the state machine:
//!   block_termination=true    terminate() blocks until the registry is empty
//!   block_termination=false   terminate() returns; the deregistration that
//!                             empties the registry completes termination
//! ```
//!
//! # Thread Safety
//!
//! Registry mutations and the emptiness check that gates termination share a
//! single `parking_lot::Mutex`. Blocked terminators wait on a `Condvar` that
//! the draining deregistration notifies.

pub mod registry;

pub use registry::{ResourceHandle, ResourceId, ResourceInfo, ResourceKind};

use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use registry::Registry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Accepting registrations.
    Active,
    /// Terminate requested, waiting for the registry to drain.
    Terminating,
    /// Registry drained; every operation fails.
    Terminated,
}

/// Flags controlling how termination is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminationPolicy {
    /// Block `terminate()` until every resource has been released.
    pub block_termination: bool,
    /// Only an explicit `terminate()` may terminate the context.
    pub manual_takeover: bool,
}

impl TerminationPolicy {
    /// Manual takeover with blocking termination.
    #[must_use]
    pub const fn manual_blocking() -> Self {
        Self {
            block_termination: true,
            manual_takeover: true,
        }
    }

    /// Manual takeover with deferred (non-blocking) completion.
    #[must_use]
    pub const fn manual_deferred() -> Self {
        Self {
            block_termination: false,
            manual_takeover: true,
        }
    }

    /// Implicit termination on last release.
    #[must_use]
    pub const fn automatic() -> Self {
        Self {
            block_termination: false,
            manual_takeover: false,
        }
    }
}

struct ContextInner {
    state: ContextState,
    registry: Registry,
}

/// Messaging context: registry of live resources plus termination state.
pub struct Context {
    id: u64,
    policy: Option<TerminationPolicy>,
    inner: Mutex<ContextInner>,
    drained: Condvar,
}

impl Context {
    /// Create a context that follows the process-wide termination flags.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Create a context with a fixed policy, independent of process flags.
    #[must_use]
    pub fn with_policy(policy: TerminationPolicy) -> Arc<Self> {
        Self::build(Some(policy))
    }

    fn build(policy: Option<TerminationPolicy>) -> Arc<Self> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("[CTX] context #{} created (policy={:?})", id, policy);
        Arc::new(Self {
            id,
            policy,
            inner: Mutex::new(ContextInner {
                state: ContextState::Active,
                registry: Registry::default(),
            }),
            drained: Condvar::new(),
        })
    }

    /// Process-unique identifier (diagnostics only).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Effective policy: the fixed one, or the current process-wide flags.
    #[must_use]
    pub fn policy(&self) -> TerminationPolicy {
        self.policy.unwrap_or_else(crate::config::termination_policy)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.inner.lock().state
    }

    /// True once the context reached `Terminated`.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == ContextState::Terminated
    }

    /// Liveness probe: fails with [`Error::Terminated`] iff the context is
    /// `Terminated`.
    pub fn check_disposed(&self) -> Result<()> {
        match self.state() {
            ContextState::Terminated => Err(Error::Terminated),
            _ => Ok(()),
        }
    }

    /// Number of live registered resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Snapshot of the live resources, ordered by registration.
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceInfo> {
        self.inner.lock().registry.snapshot()
    }

    /// Register a sharable resource.
    ///
    /// Fails with `InvalidState` once termination has been requested.
    pub fn register(
        self: &Arc<Self>,
        kind: ResourceKind,
        label: impl Into<String>,
    ) -> Result<ResourceHandle> {
        let label = label.into();
        let mut inner = self.inner.lock();
        match inner.state {
            ContextState::Active => {}
            ContextState::Terminating => {
                return Err(Error::invalid_state(format!(
                    "context #{} is terminating, cannot register {} '{}'",
                    self.id,
                    kind.as_str(),
                    label
                )));
            }
            ContextState::Terminated => {
                return Err(Error::invalid_state(format!(
                    "context #{} is terminated, cannot register {} '{}'",
                    self.id,
                    kind.as_str(),
                    label
                )));
            }
        }

        let id = inner.registry.insert(kind, label);
        log::debug!(
            "[CTX] #{} registered {} id={} (live={})",
            self.id,
            kind.as_str(),
            id,
            inner.registry.len()
        );
        drop(inner);

        Ok(ResourceHandle::new(Arc::clone(self), id, kind))
    }

    /// Called by [`ResourceHandle`]; returns true if the entry existed.
    pub(crate) fn deregister(&self, id: ResourceId) -> bool {
        let policy = self.policy();
        let mut inner = self.inner.lock();
        let Some(info) = inner.registry.remove(id) else {
            return false;
        };
        log::debug!(
            "[CTX] #{} released {} id={} (live={})",
            self.id,
            info.kind.as_str(),
            id,
            inner.registry.len()
        );

        if inner.registry.is_empty() {
            match inner.state {
                ContextState::Terminating => {
                    inner.state = ContextState::Terminated;
                    log::info!("[CTX] #{} terminated (last resource released)", self.id);
                    self.drained.notify_all();
                }
                ContextState::Active if !policy.manual_takeover => {
                    inner.state = ContextState::Terminated;
                    log::info!("[CTX] #{} terminated implicitly (automatic mode)", self.id);
                    self.drained.notify_all();
                }
                _ => {}
            }
        }
        true
    }

    /// Request termination according to the effective policy.
    ///
    /// Terminating an already terminated context succeeds without effect.
    pub fn terminate(&self) -> Result<()> {
        let policy = self.policy();
        let mut inner = self.inner.lock();

        if !self.begin_terminate(&mut inner, policy) {
            return Ok(());
        }

        if !policy.block_termination {
            log::debug!(
                "[CTX] #{} terminate deferred until {} resource(s) are released",
                self.id,
                inner.registry.len()
            );
            return Ok(());
        }

        log::debug!(
            "[CTX] #{} terminate blocking on {} resource(s)",
            self.id,
            inner.registry.len()
        );
        while inner.state != ContextState::Terminated {
            self.drained.wait(&mut inner);
        }
        Ok(())
    }

    /// Request termination and wait at most `timeout` for it to complete.
    ///
    /// Always waits regardless of `block_termination`. On timeout the
    /// context stays `Terminating` and [`Error::Timeout`] is returned.
    pub fn terminate_timeout(&self, timeout: Duration) -> Result<()> {
        let policy = self.policy();
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        if !self.begin_terminate(&mut inner, policy) {
            return Ok(());
        }

        while inner.state != ContextState::Terminated {
            if self.drained.wait_until(&mut inner, deadline).timed_out()
                && inner.state != ContextState::Terminated
            {
                log::debug!(
                    "[CTX] #{} terminate timed out with {} live resource(s)",
                    self.id,
                    inner.registry.len()
                );
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Shared prologue of the terminate variants.
    ///
    /// Returns `true` when the caller still has to wait for the registry to
    /// drain.
    fn begin_terminate(&self, inner: &mut ContextInner, policy: TerminationPolicy) -> bool {
        if inner.state == ContextState::Terminated {
            return false;
        }

        if !policy.manual_takeover {
            log::debug!(
                "[CTX] #{} terminate ignored: manual termination not taken over",
                self.id
            );
            return false;
        }

        if inner.registry.is_empty() {
            inner.state = ContextState::Terminated;
            log::info!("[CTX] #{} terminated", self.id);
            self.drained.notify_all();
            return false;
        }

        inner.state = ContextState::Terminating;
        true
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("resources", &inner.registry.len())
            .field("policy", &self.policy)
            .finish()
    }
}
