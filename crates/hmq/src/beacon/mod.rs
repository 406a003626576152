// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Beacon - UDP broadcast discovery.
//!
//! A [`Beacon`] binds a broadcast-capable UDP endpoint on a discovery port
//! and can act as a speaker, a listener, or both:
//!
//! - **Speaker** (`publish`): re-broadcasts one opaque payload every
//!   interval on the `hmq-beacon-tx` thread. The first datagram leaves
//!   immediately.
//! - **Listener** (`subscribe`): receives datagrams on the `hmq-beacon-rx`
//!   thread, keeps those whose payload starts with the subscribed prefix
//!   (empty prefix accepts everything) and queues them for `receive`.
//!
//! Every beacon is registered with its [`Context`] for its whole lifetime,
//! so a blocking context termination waits for it to be closed.
//!
//! # Failure Semantics
//!
//! Transient I/O errors are logged and counted. After
//! [`MAX_CONSECUTIVE_IO_ERRORS`] consecutive failures, or on a fatal error,
//! the failing loop stops and the beacon is marked failed: every later
//! operation fails with `InvalidState`.
//!
//! # Example
//!
//! ```rust,no_run
//! use hmq::{Beacon, Context};
//! use std::time::Duration;
//!
//! let ctx = Context::new();
//! let speaker = Beacon::new(&ctx)?;
//! speaker.configure(9999)?;
//! speaker.publish(b"Hello", Duration::from_millis(100))?;
//!
//! let listener = Beacon::new(&ctx)?;
//! listener.configure(9999)?;
//! listener.subscribe(b"H")?;
//! let msg = listener.receive()?;
//! println!("{} from {}", msg.as_string(), msg.peer_address);
//! # Ok::<(), hmq::Error>(())
//! ```

mod transport;

use crate::config::{
    BEACON_RECV_POLL, DEFAULT_BROADCAST_ADDR, MAX_BEACON_SIZE, MAX_CONSECUTIVE_IO_ERRORS,
};
use crate::context::{Context, ResourceHandle, ResourceKind};
use crate::poller::{next_poll_id, NotifierSet, PollId, Pollable, WakeNotifier};
use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receive buffer: any single UDP datagram fits.
const RECV_BUFFER_SIZE: usize = 65_536;

/// A discovery datagram accepted by the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconMessage {
    /// Raw datagram payload.
    pub payload: Vec<u8>,
    /// Sender as `ip:port`.
    pub peer_address: String,
}

impl BeaconMessage {
    /// Payload decoded as (lossy) UTF-8.
    #[must_use]
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Beacon tuning.
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    /// Destination address of speaker datagrams.
    pub broadcast_addr: Ipv4Addr,
    /// Listener receive timeout (bounds stop latency).
    pub recv_poll: Duration,
    /// Largest accepted payload, both directions.
    pub max_datagram: usize,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: DEFAULT_BROADCAST_ADDR,
            recv_poll: BEACON_RECV_POLL,
            max_datagram: MAX_BEACON_SIZE,
        }
    }
}

impl BeaconConfig {
    /// Defaults overridden by `HMQ_BEACON_BROADCAST` (an IPv4 address).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("HMQ_BEACON_BROADCAST") {
            match value.trim().parse::<Ipv4Addr>() {
                Ok(addr) => {
                    log::debug!("[BEACON] broadcast address from env: {}", addr);
                    config.broadcast_addr = addr;
                }
                Err(e) => {
                    log::warn!(
                        "[BEACON] ignoring invalid HMQ_BEACON_BROADCAST='{}': {}",
                        value,
                        e
                    );
                }
            }
        }
        config
    }
}

/// Background loop thread plus its stop channel.
///
/// Dropping the sender disconnects the channel, which both loops treat as
/// the stop signal.
struct StopHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StopHandle {
    fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bound UDP endpoint.
struct Endpoint {
    socket: Arc<UdpSocket>,
    port: u16,
    interface: Ipv4Addr,
}

struct Shared {
    id: PollId,
    config: BeaconConfig,
    inbox_tx: Sender<BeaconMessage>,
    inbox_rx: Receiver<BeaconMessage>,
    notifiers: NotifierSet,
    prefix: RwLock<Vec<u8>>,
    closed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn fail(&self, reason: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            log::error!("[BEACON] #{} failed: {}", self.id, reason);
            *failure = Some(reason);
        }
        drop(failure);
        self.notifiers.notify_all();
    }
}

#[derive(Default)]
struct State {
    endpoint: Option<Endpoint>,
    /// Active publication: payload + interval
    publication: Option<(Vec<u8>, Duration)>,
    subscribed: bool,
    speaker: Option<StopHandle>,
    listener: Option<StopHandle>,
}

/// UDP broadcast speaker/listener registered with a [`Context`].
pub struct Beacon {
    shared: Arc<Shared>,
    handle: ResourceHandle,
    state: Mutex<State>,
}

impl Beacon {
    /// Create an unconfigured beacon registered with `ctx`.
    pub fn new(ctx: &Arc<Context>) -> Result<Self> {
        Self::with_config(ctx, BeaconConfig::from_env())
    }

    /// Create a beacon on the process-wide default context.
    pub fn with_default_context() -> Result<Self> {
        Self::new(&crate::config::context())
    }

    /// Create a beacon with explicit tuning.
    pub fn with_config(ctx: &Arc<Context>, config: BeaconConfig) -> Result<Self> {
        let handle = ctx.register(ResourceKind::Beacon, "beacon")?;
        let (inbox_tx, inbox_rx) = channel::unbounded();
        let id = next_poll_id();
        log::debug!("[BEACON] #{} created (context #{})", id, ctx.id());

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                config,
                inbox_tx,
                inbox_rx,
                notifiers: NotifierSet::new(),
                prefix: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
            handle,
            state: Mutex::new(State::default()),
        })
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        self.handle.context()
    }

    /// Tuning in effect.
    #[must_use]
    pub fn config(&self) -> &BeaconConfig {
        &self.shared.config
    }

    /// Bound discovery port, once configured.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.state.lock().endpoint.as_ref().map(|ep| ep.port)
    }

    /// Interface address this beacon announces from.
    ///
    /// Resolved to the primary IPv4 interface when configured on the
    /// wildcard address. `None` until configured.
    #[must_use]
    pub fn bound_to(&self) -> Option<Ipv4Addr> {
        let interface = self.state.lock().endpoint.as_ref().map(|ep| ep.interface)?;
        if interface.is_unspecified() {
            Some(transport::primary_interface())
        } else {
            Some(interface)
        }
    }

    /// True while a publication is active.
    #[must_use]
    pub fn is_publishing(&self) -> bool {
        self.state.lock().publication.is_some()
    }

    /// True while the listener loop runs.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscribed
    }

    /// True after `close()`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Failure reason, if a background loop gave up.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    fn ensure_usable(&self) -> Result<()> {
        self.handle.context().check_disposed()?;
        if self.is_closed() {
            return Err(Error::invalid_state(format!(
                "beacon #{} is closed",
                self.shared.id
            )));
        }
        if let Some(reason) = self.shared.failure.lock().as_ref() {
            return Err(Error::invalid_state(format!(
                "beacon #{} failed: {}",
                self.shared.id, reason
            )));
        }
        Ok(())
    }

    /// Bind the discovery endpoint on every interface.
    pub fn configure(&self, port: u16) -> Result<()> {
        self.configure_on(Ipv4Addr::UNSPECIFIED, port)
    }

    /// Bind the discovery endpoint, announcing from `interface`.
    ///
    /// The endpoint itself listens on the wildcard address so broadcasts
    /// are received. `port == 0` picks an ephemeral port (see
    /// [`Beacon::port`]). On reconfiguration the new endpoint is bound
    /// first; if that fails the previous endpoint stays in use.
    pub fn configure_on(&self, interface: Ipv4Addr, port: u16) -> Result<()> {
        self.ensure_usable()?;

        let socket = transport::open_endpoint(port, self.shared.config.recv_poll)?;
        let port = socket.local_addr()?.port();
        let endpoint = Endpoint {
            socket: Arc::new(socket),
            port,
            interface,
        };

        let mut state = self.state.lock();
        Self::stop_loops(&mut state);
        state.endpoint = Some(endpoint);

        if let Some((payload, interval)) = state.publication.clone() {
            self.start_speaker(&mut state, payload, interval)?;
        }
        if state.subscribed {
            self.start_listener(&mut state)?;
        }

        log::debug!(
            "[BEACON] #{} configured on {}:{}",
            self.shared.id,
            interface,
            port
        );
        Ok(())
    }

    /// Broadcast `payload` every `interval` until silenced.
    ///
    /// Replaces any active publication. Fails with `FrameTooLarge` above
    /// the configured maximum datagram size and with `InvalidState` for a
    /// zero interval.
    pub fn publish(&self, payload: &[u8], interval: Duration) -> Result<()> {
        self.ensure_usable()?;
        if interval.is_zero() {
            return Err(Error::invalid_state("beacon interval must be non-zero"));
        }
        if payload.len() > self.shared.config.max_datagram {
            return Err(Error::FrameTooLarge(payload.len()));
        }

        let mut state = self.state.lock();
        Self::require_endpoint(&state)?;
        if let Some(mut speaker) = state.speaker.take() {
            speaker.stop();
        }
        state.publication = Some((payload.to_vec(), interval));
        self.start_speaker(&mut state, payload.to_vec(), interval)
    }

    /// Stop broadcasting.
    pub fn silence(&self) -> Result<()> {
        self.ensure_usable()?;
        let mut state = self.state.lock();
        state.publication = None;
        if let Some(mut speaker) = state.speaker.take() {
            speaker.stop();
            log::debug!("[BEACON] #{} silenced", self.shared.id);
        }
        Ok(())
    }

    /// Start listening for datagrams starting with `prefix`.
    ///
    /// Subscribing again only swaps the filter.
    pub fn subscribe(&self, prefix: &[u8]) -> Result<()> {
        self.ensure_usable()?;
        let mut state = self.state.lock();
        Self::require_endpoint(&state)?;

        *self.shared.prefix.write() = prefix.to_vec();
        state.subscribed = true;
        if state.listener.is_none() {
            self.start_listener(&mut state)?;
        }
        Ok(())
    }

    /// Stop listening. Already queued messages stay receivable.
    pub fn unsubscribe(&self) -> Result<()> {
        self.ensure_usable()?;
        let mut state = self.state.lock();
        state.subscribed = false;
        if let Some(mut listener) = state.listener.take() {
            listener.stop();
            log::debug!("[BEACON] #{} unsubscribed", self.shared.id);
        }
        Ok(())
    }

    /// Block until a matching message is queued.
    pub fn receive(&self) -> Result<BeaconMessage> {
        self.receive_until(None)
    }

    /// Block until a matching message is queued or `timeout` elapses.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<BeaconMessage> {
        self.receive_until(Some(Instant::now() + timeout))
    }

    /// Pop a queued message without blocking.
    pub fn try_receive(&self) -> Result<Option<BeaconMessage>> {
        self.ensure_usable()?;
        match self.shared.inbox_rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(_) => Ok(None),
        }
    }

    fn receive_until(&self, deadline: Option<Instant>) -> Result<BeaconMessage> {
        loop {
            self.ensure_usable()?;

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    (deadline - now).min(self.shared.config.recv_poll)
                }
                None => self.shared.config.recv_poll,
            };

            match self.shared.inbox_rx.recv_timeout(slice) {
                Ok(msg) => return Ok(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::invalid_state("beacon inbox disconnected"));
                }
            }
        }
    }

    /// Stop both loops, release the endpoint and deregister. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            Self::stop_loops(&mut state);
            state.endpoint = None;
            state.publication = None;
            state.subscribed = false;
        }

        self.shared.notifiers.notify_all();
        self.handle.deregister();
        log::debug!("[BEACON] #{} closed", self.shared.id);
        Ok(())
    }

    fn require_endpoint(state: &State) -> Result<()> {
        if state.endpoint.is_none() {
            return Err(Error::invalid_state("beacon is not configured"));
        }
        Ok(())
    }

    fn stop_loops(state: &mut State) {
        if let Some(mut speaker) = state.speaker.take() {
            speaker.stop();
        }
        if let Some(mut listener) = state.listener.take() {
            listener.stop();
        }
    }

    fn start_speaker(&self, state: &mut State, payload: Vec<u8>, interval: Duration) -> Result<()> {
        let endpoint = state
            .endpoint
            .as_ref()
            .ok_or_else(|| Error::invalid_state("beacon is not configured"))?;
        let target = SocketAddrV4::new(self.shared.config.broadcast_addr, endpoint.port);
        let socket = Arc::clone(&endpoint.socket);
        let shared = Arc::clone(&self.shared);
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("hmq-beacon-tx".to_string())
            .spawn(move || speaker_loop(&shared, &socket, target, &payload, interval, &stop_rx))?;

        state.speaker = Some(StopHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        });
        log::debug!(
            "[BEACON] #{} publishing to {} every {:?}",
            self.shared.id,
            target,
            interval
        );
        Ok(())
    }

    fn start_listener(&self, state: &mut State) -> Result<()> {
        let endpoint = state
            .endpoint
            .as_ref()
            .ok_or_else(|| Error::invalid_state("beacon is not configured"))?;
        let socket = Arc::clone(&endpoint.socket);
        let shared = Arc::clone(&self.shared);
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("hmq-beacon-rx".to_string())
            .spawn(move || listener_loop(&shared, &socket, &stop_rx))?;

        state.listener = Some(StopHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        });
        log::debug!(
            "[BEACON] #{} listening on port {}",
            self.shared.id,
            endpoint.port
        );
        Ok(())
    }
}

fn speaker_loop(
    shared: &Shared,
    socket: &UdpSocket,
    target: SocketAddrV4,
    payload: &[u8],
    interval: Duration,
    stop_rx: &Receiver<()>,
) {
    let mut consecutive_errors = 0u32;

    loop {
        match socket.send_to(payload, target) {
            Ok(_) => consecutive_errors = 0,
            Err(e) if transport::is_fatal_io(&e) => {
                shared.fail(format!("send to {} failed: {}", target, e));
                return;
            }
            Err(e) => {
                consecutive_errors += 1;
                log::debug!(
                    "[BEACON] #{} send to {} failed ({}/{}): {}",
                    shared.id,
                    target,
                    consecutive_errors,
                    MAX_CONSECUTIVE_IO_ERRORS,
                    e
                );
                if consecutive_errors >= MAX_CONSECUTIVE_IO_ERRORS {
                    shared.fail(format!(
                        "{} consecutive send errors, last: {}",
                        consecutive_errors, e
                    ));
                    return;
                }
            }
        }

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn listener_loop(shared: &Shared, socket: &UdpSocket, stop_rx: &Receiver<()>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut consecutive_errors = 0u32;

    loop {
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => return,
        }

        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                consecutive_errors = 0;
                if len > shared.config.max_datagram {
                    log::debug!(
                        "[BEACON] #{} dropping {}-byte datagram from {}",
                        shared.id,
                        len,
                        peer
                    );
                    continue;
                }

                let payload = &buf[..len];
                if !payload.starts_with(&shared.prefix.read()) {
                    continue;
                }

                let msg = BeaconMessage {
                    payload: payload.to_vec(),
                    peer_address: peer.to_string(),
                };
                if shared.inbox_tx.send(msg).is_ok() {
                    shared.notifiers.notify_all();
                }
            }
            Err(e) if transport::is_poll_timeout(&e) => {}
            Err(e) if transport::is_fatal_io(&e) => {
                shared.fail(format!("receive failed: {}", e));
                return;
            }
            Err(e) => {
                consecutive_errors += 1;
                log::debug!(
                    "[BEACON] #{} receive failed ({}/{}): {}",
                    shared.id,
                    consecutive_errors,
                    MAX_CONSECUTIVE_IO_ERRORS,
                    e
                );
                if consecutive_errors >= MAX_CONSECUTIVE_IO_ERRORS {
                    shared.fail(format!(
                        "{} consecutive receive errors, last: {}",
                        consecutive_errors, e
                    ));
                    return;
                }
            }
        }
    }
}

impl Pollable for Beacon {
    fn poll_id(&self) -> PollId {
        self.shared.id
    }

    fn is_ready(&self) -> bool {
        !self.shared.inbox_rx.is_empty()
    }

    fn attach_notifier(&self, notifier: Arc<WakeNotifier>) {
        self.shared.notifiers.add(notifier);
    }

    fn detach_notifier(&self, notifier: &Arc<WakeNotifier>) {
        self.shared.notifiers.remove(notifier);
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("id", &self.shared.id)
            .field("port", &self.port())
            .field("publishing", &self.is_publishing())
            .field("subscribed", &self.is_subscribed())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests;
