// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal framed TCP endpoint.
//!
//! [`Socket`] exchanges length-prefixed frames with exactly one peer. It is
//! the sharable resource the context lifecycle and the poller operate on:
//! construction registers it with its [`Context`], close (or drop)
//! deregisters it.
//!
//! # Threads
//!
//! ```text
//! bind()     -> hmq-accept     accepts the single peer, then exits
//! peer set   -> hmq-socket-rx  blocking reads -> FrameDecoder -> inbox
//! ```
//!
//! Inbound frames are queued on a crossbeam channel and every attached
//! [`WakeNotifier`] is signalled, so a [`Poller`](crate::Poller) sees the
//! socket become ready without polling it.
//!
//! # Request / Response
//!
//! `Request` sockets must alternate send then receive, `Response` sockets
//! receive then send. Out-of-order calls fail with `InvalidState`.

pub mod frame;

pub use frame::{FrameDecoder, FRAME_HEADER_SIZE};

use crate::config::{DEFAULT_POLL_INTERVAL, MAX_FRAME_SIZE, PEER_WAIT_TIMEOUT};
use crate::context::{Context, ResourceHandle, ResourceKind};
use crate::poller::{next_poll_id, NotifierSet, PollId, Pollable, WakeNotifier};
use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Messaging pattern of a [`Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Free-form bidirectional exchange.
    Pair,
    /// Client side: send, then receive the reply.
    Request,
    /// Server side: receive, then send the reply.
    Response,
}

impl SocketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SocketKind::Pair => "pair",
            SocketKind::Request => "request",
            SocketKind::Response => "response",
        }
    }
}

/// Position in the request/response alternation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Send,
    Recv,
    Any,
}

impl Turn {
    fn initial(kind: SocketKind) -> Self {
        match kind {
            SocketKind::Pair => Turn::Any,
            SocketKind::Request => Turn::Send,
            SocketKind::Response => Turn::Recv,
        }
    }
}

struct Shared {
    id: PollId,
    kind: SocketKind,
    inbox_tx: Sender<Vec<u8>>,
    inbox_rx: Receiver<Vec<u8>>,
    notifiers: NotifierSet,
    /// Write half of the peer stream
    peer: Mutex<Option<TcpStream>>,
    peer_changed: Condvar,
    closed: AtomicBool,
    peer_lost: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn wake_all(&self) {
        self.peer_changed.notify_all();
        self.notifiers.notify_all();
    }
}

/// Framed single-peer endpoint registered with a [`Context`].
pub struct Socket {
    shared: Arc<Shared>,
    handle: ResourceHandle,
    turn: Mutex<Turn>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Socket {
    /// Create a socket registered with `ctx`.
    ///
    /// Fails with `InvalidState` once `ctx` is terminating or terminated.
    pub fn new(ctx: &Arc<Context>, kind: SocketKind) -> Result<Self> {
        let handle = ctx.register(ResourceKind::Socket, kind.as_str())?;
        let (inbox_tx, inbox_rx) = channel::unbounded();

        let socket = Self {
            shared: Arc::new(Shared {
                id: next_poll_id(),
                kind,
                inbox_tx,
                inbox_rx,
                notifiers: NotifierSet::new(),
                peer: Mutex::new(None),
                peer_changed: Condvar::new(),
                closed: AtomicBool::new(false),
                peer_lost: AtomicBool::new(false),
                threads: Mutex::new(Vec::new()),
            }),
            handle,
            turn: Mutex::new(Turn::initial(kind)),
            local_addr: Mutex::new(None),
        };
        log::debug!(
            "[SOCKET] #{} created ({}, context #{})",
            socket.shared.id,
            kind.as_str(),
            ctx.id()
        );
        Ok(socket)
    }

    /// Create a socket on the process-wide default context.
    pub fn with_default_context(kind: SocketKind) -> Result<Self> {
        Self::new(&crate::config::context(), kind)
    }

    /// Messaging pattern.
    #[must_use]
    pub fn kind(&self) -> SocketKind {
        self.shared.kind
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        self.handle.context()
    }

    /// Bound address, if `bind` succeeded.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// True once a peer stream is attached.
    #[must_use]
    pub fn has_peer(&self) -> bool {
        self.shared.peer.lock().is_some()
    }

    /// True after `close()`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_usable(&self) -> Result<()> {
        self.handle.context().check_disposed()?;
        if self.is_closed() {
            return Err(Error::invalid_state(format!(
                "socket #{} is closed",
                self.shared.id
            )));
        }
        Ok(())
    }

    /// Listen on `addr` and accept a single peer in the background.
    pub fn bind(&self, addr: &str) -> Result<SocketAddr> {
        self.ensure_usable()?;
        if self.local_addr.lock().is_some() {
            return Err(Error::invalid_state("socket is already bound"));
        }

        let listener = TcpListener::bind(addr)
            .map_err(|e| Error::BindFailed(format!("{}: {}", addr, e)))?;
        let local = listener.local_addr()?;

        let shared = Arc::clone(&self.shared);
        let accept = thread::Builder::new()
            .name("hmq-accept".to_string())
            .spawn(move || accept_loop(shared, listener))?;
        self.shared.threads.lock().push(accept);

        *self.local_addr.lock() = Some(local);
        log::debug!("[SOCKET] #{} bound to {}", self.shared.id, local);
        Ok(local)
    }

    /// Bind to an OS-assigned port on `host` and return it.
    pub fn bind_random_port(&self, host: &str) -> Result<u16> {
        Ok(self.bind(&format!("{}:0", host))?.port())
    }

    /// Connect to a bound peer.
    pub fn connect(&self, addr: &str) -> Result<()> {
        self.ensure_usable()?;
        if self.has_peer() {
            return Err(Error::invalid_state("socket already has a peer"));
        }
        let stream = TcpStream::connect(addr)?;
        log::debug!("[SOCKET] #{} connected to {}", self.shared.id, addr);
        install_peer(&self.shared, stream)
    }

    fn check_turn(&self, wanted: Turn) -> Result<()> {
        let turn = *self.turn.lock();
        if turn == Turn::Any || turn == wanted {
            return Ok(());
        }
        Err(Error::invalid_state(format!(
            "{} socket cannot {} now",
            self.shared.kind.as_str(),
            if wanted == Turn::Send { "send" } else { "receive" }
        )))
    }

    fn advance_turn(&self) {
        let mut turn = self.turn.lock();
        *turn = match *turn {
            Turn::Send => Turn::Recv,
            Turn::Recv => Turn::Send,
            Turn::Any => Turn::Any,
        };
    }

    /// Send one frame, waiting up to `PEER_WAIT_TIMEOUT` for a peer.
    pub fn send_frame(&self, payload: &[u8]) -> Result<()> {
        self.ensure_usable()?;
        self.check_turn(Turn::Send)?;
        let frame = frame::encode(payload, MAX_FRAME_SIZE)?;

        let deadline = Instant::now() + PEER_WAIT_TIMEOUT;
        let mut peer = self.shared.peer.lock();
        while peer.is_none() {
            if self.is_closed() {
                return Err(Error::invalid_state("socket closed while waiting for a peer"));
            }
            if self
                .shared
                .peer_changed
                .wait_until(&mut peer, deadline)
                .timed_out()
                && peer.is_none()
            {
                return Err(Error::Timeout);
            }
        }

        let Some(stream) = peer.as_mut() else {
            return Err(Error::invalid_state("peer disappeared"));
        };
        stream.write_all(&frame)?;
        drop(peer);

        self.advance_turn();
        Ok(())
    }

    /// Send a UTF-8 string frame.
    pub fn send_str(&self, text: &str) -> Result<()> {
        self.send_frame(text.as_bytes())
    }

    /// Block until a frame arrives.
    pub fn recv_frame(&self) -> Result<Vec<u8>> {
        self.recv_until(None)
    }

    /// Block until a frame arrives or `timeout` elapses.
    pub fn recv_frame_timeout(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.recv_until(Some(Instant::now() + timeout))
    }

    /// Receive a queued frame without blocking.
    pub fn try_recv_frame(&self) -> Result<Option<Vec<u8>>> {
        self.ensure_usable()?;
        self.check_turn(Turn::Recv)?;
        match self.shared.inbox_rx.try_recv() {
            Ok(frame) => {
                self.advance_turn();
                Ok(Some(frame))
            }
            Err(_) => Ok(None),
        }
    }

    /// Receive a frame as a (lossy) UTF-8 string.
    pub fn recv_string(&self) -> Result<String> {
        let frame = self.recv_frame()?;
        Ok(String::from_utf8_lossy(&frame).into_owned())
    }

    /// [`Socket::recv_string`] with a timeout.
    pub fn recv_string_timeout(&self, timeout: Duration) -> Result<String> {
        let frame = self.recv_frame_timeout(timeout)?;
        Ok(String::from_utf8_lossy(&frame).into_owned())
    }

    fn recv_until(&self, deadline: Option<Instant>) -> Result<Vec<u8>> {
        self.check_turn(Turn::Recv)?;
        loop {
            self.ensure_usable()?;

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    (deadline - now).min(DEFAULT_POLL_INTERVAL)
                }
                None => DEFAULT_POLL_INTERVAL,
            };

            match self.shared.inbox_rx.recv_timeout(slice) {
                Ok(frame) => {
                    self.advance_turn();
                    return Ok(frame);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.peer_lost.load(Ordering::Acquire)
                        && self.shared.inbox_rx.is_empty()
                    {
                        return Err(Error::invalid_state("peer disconnected"));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::invalid_state("socket inbox disconnected"));
                }
            }
        }
    }

    /// Shut the peer stream down, stop the background threads and
    /// deregister from the context. Idempotent.
    pub fn close(&self) -> Result<()> {
        let had_peer = {
            let mut peer = self.shared.peer.lock();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            match peer.take() {
                Some(stream) => {
                    let _ = stream.shutdown(Shutdown::Both);
                    true
                }
                None => false,
            }
        };
        self.shared.wake_all();

        // Unblock a pending accept() with a throwaway connection.
        if let Some(local) = self.local_addr().filter(|_| !had_peer) {
            let target = if local.ip().is_unspecified() {
                SocketAddr::from((Ipv4Addr::LOCALHOST, local.port()))
            } else {
                local
            };
            let _ = TcpStream::connect_timeout(&target, Duration::from_millis(200));
        }

        let current = thread::current().id();
        loop {
            let batch = std::mem::take(&mut *self.shared.threads.lock());
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                if handle.thread().id() != current {
                    let _ = handle.join();
                }
            }
        }

        self.handle.deregister();
        log::debug!("[SOCKET] #{} closed", self.shared.id);
        Ok(())
    }
}

fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
                log::debug!("[SOCKET] #{} accepted peer {}", shared.id, peer);
                if let Err(e) = install_peer(&shared, stream) {
                    log::warn!("[SOCKET] #{} failed to attach peer: {}", shared.id, e);
                }
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !shared.closed.load(Ordering::Acquire) {
                    log::warn!("[SOCKET] #{} accept failed: {}", shared.id, e);
                }
                return;
            }
        }
    }
}

fn install_peer(shared: &Arc<Shared>, stream: TcpStream) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let reader = stream.try_clone()?;

    let mut peer = shared.peer.lock();
    if shared.closed.load(Ordering::Acquire) {
        let _ = stream.shutdown(Shutdown::Both);
        return Err(Error::invalid_state("socket closed"));
    }
    if peer.is_some() {
        return Err(Error::invalid_state("socket already has a peer"));
    }

    let rx_shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name("hmq-socket-rx".to_string())
        .spawn(move || read_loop(rx_shared, reader))?;
    shared.threads.lock().push(handle);

    *peer = Some(stream);
    drop(peer);
    shared.peer_changed.notify_all();
    Ok(())
}

fn read_loop(shared: Arc<Shared>, mut stream: TcpStream) {
    let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);
    let mut buf = vec![0u8; 8192];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                decoder.feed(&buf[..n]);
                let mut delivered = false;
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => {
                            let _ = shared.inbox_tx.send(frame);
                            delivered = true;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("[SOCKET] #{} dropping peer: {}", shared.id, e);
                            let _ = stream.shutdown(Shutdown::Both);
                            shared.peer_lost.store(true, Ordering::Release);
                            shared.wake_all();
                            return;
                        }
                    }
                }
                if delivered {
                    shared.notifiers.notify_all();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !shared.closed.load(Ordering::Acquire) {
                    log::debug!("[SOCKET] #{} read failed: {}", shared.id, e);
                }
                break;
            }
        }
    }

    if !shared.closed.load(Ordering::Acquire) {
        log::debug!("[SOCKET] #{} peer disconnected", shared.id);
    }
    shared.peer_lost.store(true, Ordering::Release);
    shared.wake_all();
}

impl Pollable for Socket {
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

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("local_addr", &self.local_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}
