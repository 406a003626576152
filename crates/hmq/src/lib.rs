// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HMQ - messaging core: contexts, reactor, discovery
//!
//! The concurrency and lifecycle core of a socket-style messaging library:
//! coordinated context termination across live resources, a reactor that
//! multiplexes readiness across heterogeneous pollables, and a UDP beacon
//! for peer discovery on the local network.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hmq::{config, Poller, Socket, SocketKind};
//!
//! fn main() -> hmq::Result<()> {
//!     config::set_block_termination(true);
//!     config::manual_termination_takeover();
//!     let ctx = config::context_create();
//!
//!     let rep = std::sync::Arc::new(Socket::new(&ctx, SocketKind::Response)?);
//!     let req = Socket::new(&ctx, SocketKind::Request)?;
//!     let port = rep.bind_random_port("127.0.0.1")?;
//!     req.connect(&format!("127.0.0.1:{}", port))?;
//!
//!     let poller = Poller::new();
//!     poller.add(rep.clone(), |rep| {
//!         let request = rep.recv_string()?;
//!         rep.send_str(&format!("{} World", request))
//!     })?;
//!     poller.run_async()?;
//!
//!     req.send_str("Hello")?;
//!     assert_eq!(req.recv_string()?, "Hello World");
//!
//!     poller.stop_and_join()?;
//!     drop(poller);
//!     drop(rep);
//!     drop(req);
//!     config::context_terminate()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application Layer                           |
//! |        config::context()  ->  Socket / Beacon  ->  Poller           |
//! +---------------------------------------------------------------------+
//! |                          Lifecycle Layer                            |
//! |   Context (Active -> Terminating -> Terminated) | Resource Registry  |
//! +---------------------------------------------------------------------+
//! |                           Reactor Layer                             |
//! |   Pollable | WakeNotifier | Timer | posted tasks | error callback   |
//! +---------------------------------------------------------------------+
//! |                          Transport Layer                            |
//! |   UDP broadcast beacon | framed TCP endpoint                        |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Context`] | Resource registry plus termination state machine |
//! | [`Poller`] | Reactor dispatching readiness handlers |
//! | [`Beacon`] | UDP broadcast speaker/listener |
//! | [`Socket`] | Minimal framed single-peer endpoint |

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// UDP broadcast discovery (speaker / listener).
pub mod beacon;
/// Constants, process-wide termination flags and the default context.
pub mod config;
/// Context lifecycle and the resource registry.
pub mod context;
/// Error type and result alias.
pub mod error;
/// Optional `log` facade backends (console/file).
pub mod logging;
/// Reactor over pollable resources.
pub mod poller;
/// Minimal framed TCP endpoint.
pub mod socket;

pub use beacon::{Beacon, BeaconConfig, BeaconMessage};
pub use context::{
    Context, ContextState, ResourceHandle, ResourceId, ResourceInfo, ResourceKind,
    TerminationPolicy,
};
pub use error::{Error, Result};
pub use poller::{
    NotifierSet, PollId, Pollable, Poller, PollerConfig, PollerStats, Timer, WakeNotifier,
};
pub use socket::{Socket, SocketKind};
