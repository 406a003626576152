// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource registry and liveness handles.
//!
//! Every sharable resource (socket, beacon, background worker) registers with
//! its [`Context`] on construction and receives a [`ResourceHandle`]. The
//! handle deregisters on drop, so cleanup also happens on panic or early
//! return.
//!
//! # Thread Safety
//!
//! The registry map itself is not synchronized. It lives inside the context
//! state mutex so that registration, deregistration and the
//! termination-gating emptiness check are linearizable.

use super::Context;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Identifier of a registered resource (unique per context).
pub type ResourceId = u64;

/// Kind of sharable resource tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Framed socket endpoint.
    Socket,
    /// Discovery beacon (send/receive workers).
    Beacon,
    /// Any other background worker bound to the context.
    Worker,
}

impl ResourceKind {
    /// Short label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Beacon => "beacon",
            Self::Worker => "worker",
        }
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    /// Registry identifier
    pub id: ResourceId,
    /// Resource kind
    pub kind: ResourceKind,
    /// Free-form label supplied at registration (endpoint, port, ...)
    pub label: String,
    /// Registration time
    pub registered_at: Instant,
}

/// Map from resource id to liveness entry.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: BTreeMap<ResourceId, ResourceInfo>,
    next_id: ResourceId,
}

impl Registry {
    pub(crate) fn insert(&mut self, kind: ResourceKind, label: String) -> ResourceId {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(
            id,
            ResourceInfo {
                id,
                kind,
                label,
                registered_at: Instant::now(),
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: ResourceId) -> Option<ResourceInfo> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<ResourceInfo> {
        self.entries.values().cloned().collect()
    }
}

/// Liveness token returned by [`Context::register`].
///
/// Dropping the handle deregisters the resource. [`ResourceHandle::deregister`]
/// may be called any number of times; only the first call has an effect.
pub struct ResourceHandle {
    context: Arc<Context>,
    id: ResourceId,
    kind: ResourceKind,
    released: AtomicBool,
}

impl ResourceHandle {
    pub(crate) fn new(context: Arc<Context>, id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            context,
            id,
            kind,
            released: AtomicBool::new(false),
        }
    }

    /// Registry identifier of this resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Kind recorded at registration.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Context this resource belongs to.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// True once the resource has been removed from the registry.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Remove the resource from the registry.
    ///
    /// Returns `true` for the call that actually removed the entry.
    pub fn deregister(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.context.deregister(self.id)
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("context", &self.context.id())
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("released", &self.is_released())
            .finish()
    }
}
