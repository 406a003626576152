// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::doc_markdown)] // Test documentation
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::redundant_closure_for_method_calls)] // Test code clarity

//! Default-context termination under manual takeover.
//!
//! Every test flips process-wide flags, so they run serialized behind
//! `FIXTURE_LOCK` and restore the defaults on exit.

use hmq::{config, Beacon, ContextState, Error, Poller, Socket, SocketKind};
use parking_lot::{Mutex, MutexGuard};
use std::net::UdpSocket;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

static FIXTURE_LOCK: Mutex<()> = parking_lot::const_mutex(());

const WAIT: Duration = Duration::from_secs(2);

/// Blocking + manual termination for the duration of one test.
struct ManualTermination {
    _guard: MutexGuard<'static, ()>,
}

impl ManualTermination {
    fn setup() -> Self {
        let guard = FIXTURE_LOCK.lock();
        config::set_block_termination(true);
        config::manual_termination_takeover();
        Self { _guard: guard }
    }
}

impl Drop for ManualTermination {
    fn drop(&mut self) {
        config::set_block_termination(false);
        config::disable_manual_termination();
    }
}

fn verify_termination() -> bool {
    matches!(config::context().check_disposed(), Err(Error::Terminated))
}

#[test]
fn test_terminate_without_takeover_keeps_context_alive() {
    let _fixture = ManualTermination::setup();
    config::context_create();

    config::disable_manual_termination();
    config::context_terminate().expect("terminate");
    let terminated = verify_termination();

    config::manual_termination_takeover();
    assert!(!terminated);
}

#[test]
fn test_create_context() {
    let _fixture = ManualTermination::setup();
    config::context_create();
    assert!(!verify_termination());
}

#[test]
fn test_create_is_idempotent_while_live() {
    let _fixture = ManualTermination::setup();
    let first = config::context_create();
    let second = config::context_create();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &config::context()));
}

#[test]
fn test_terminate_context() {
    let _fixture = ManualTermination::setup();
    config::context_create();
    config::context_terminate().expect("terminate");
    assert!(verify_termination());

    // Terminating again is a no-op success.
    config::context_terminate().expect("second terminate");
}

#[test]
fn test_create_replaces_terminated_context() {
    let _fixture = ManualTermination::setup();
    let old = config::context_create();
    config::context_terminate().expect("terminate");
    assert!(old.is_terminated());

    let fresh = config::context_create();
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(fresh.state(), ContextState::Active);
    assert!(!verify_termination());
}

#[test]
fn test_terminate_after_sockets_use() {
    let _fixture = ManualTermination::setup();
    config::context_create();
    {
        let rep = Socket::with_default_context(SocketKind::Response).expect("rep");
        let req = Socket::with_default_context(SocketKind::Request).expect("req");
        let port = rep.bind_random_port("127.0.0.1").expect("bind");
        req.connect(&format!("127.0.0.1:{}", port)).expect("connect");

        req.send_str("Hi").expect("send");
        assert_eq!(rep.recv_string_timeout(WAIT).expect("recv"), "Hi");
        rep.send_str("Hi2").expect("reply");
        assert_eq!(req.recv_string_timeout(WAIT).expect("recv reply"), "Hi2");
    }

    config::context_terminate().expect("terminate");
    assert!(verify_termination());
}

#[test]
fn test_terminate_after_beacon_use() {
    let _fixture = ManualTermination::setup();
    config::context_create();
    {
        let speaker = Beacon::with_default_context().expect("speaker");
        let listener = Beacon::with_default_context().expect("listener");

        speaker.configure(0).expect("speaker configure");
        speaker
            .publish(b"Hello", Duration::from_millis(100))
            .expect("publish");

        listener.configure(0).expect("listener configure");
        listener.subscribe(b"H").expect("subscribe");

        let sender = UdpSocket::bind("127.0.0.1:0").expect("sender");
        let port = listener.port().expect("port");
        sender.send_to(b"Hello", ("127.0.0.1", port)).expect("send");

        let message = listener.receive_timeout(WAIT).expect("receive");
        assert_eq!(message.as_string(), "Hello");
        assert!(message.peer_address.starts_with("127.0.0.1:"));
    }

    config::context_terminate().expect("terminate");
    assert!(verify_termination());
}

#[test]
fn test_cycle_create_terminate() {
    let _fixture = ManualTermination::setup();

    for _ in 0..10 {
        config::context_create();
        assert!(!verify_termination());

        {
            let rep = Arc::new(Socket::with_default_context(SocketKind::Response).expect("rep"));
            let req = Socket::with_default_context(SocketKind::Request).expect("req");
            let poller = Poller::new();

            let port = rep.bind_random_port("127.0.0.1").expect("bind");
            req.connect(&format!("127.0.0.1:{}", port)).expect("connect");

            poller
                .add(Arc::clone(&rep), |rep| {
                    assert_eq!(rep.recv_string()?, "Hello");
                    rep.send_str("World")
                })
                .expect("add");

            poller.run_async().expect("run_async");
            req.send_str("Hello").expect("send");
            assert_eq!(req.recv_string_timeout(WAIT).expect("reply"), "World");
            poller.stop_and_join().expect("stop");
        }

        config::context_terminate().expect("terminate");
        assert!(verify_termination());
    }
}

#[test]
fn test_blocking_terminate_waits_for_live_socket() {
    let _fixture = ManualTermination::setup();
    let ctx = config::context_create();
    let socket = Socket::with_default_context(SocketKind::Pair).expect("socket");

    let (tx, rx) = mpsc::channel();
    let terminator = thread::spawn(move || {
        let result = config::context_terminate();
        tx.send(Instant::now()).expect("signal");
        result
    });

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(ctx.state(), ContextState::Terminating);
    assert!(!verify_termination(), "terminating is not terminated");

    let released_at = Instant::now();
    drop(socket);
    let returned_at = rx.recv_timeout(WAIT).expect("terminate returned");
    assert!(returned_at >= released_at);
    terminator
        .join()
        .expect("terminator thread")
        .expect("terminate ok");
    assert!(verify_termination());
}

#[test]
fn test_non_blocking_terminate_completes_on_last_release() {
    let _fixture = ManualTermination::setup();
    config::set_block_termination(false);
    let ctx = config::context_create();
    let socket = Socket::with_default_context(SocketKind::Pair).expect("socket");

    config::context_terminate().expect("terminate returns immediately");
    assert_eq!(ctx.state(), ContextState::Terminating);
    assert!(matches!(
        Socket::with_default_context(SocketKind::Pair),
        Err(Error::InvalidState(_))
    ));

    drop(socket);
    assert!(verify_termination());
}

#[test]
fn test_terminate_timeout_reports_live_resources() {
    let _fixture = ManualTermination::setup();
    let ctx = config::context_create();
    let socket = Socket::with_default_context(SocketKind::Pair).expect("socket");

    assert!(matches!(
        config::context_terminate_timeout(Duration::from_millis(50)),
        Err(Error::Timeout)
    ));
    assert_eq!(ctx.state(), ContextState::Terminating);

    socket.close().expect("close");
    assert!(verify_termination());
}

#[test]
fn test_automatic_mode_terminates_on_last_release_and_replaces_default() {
    let _fixture = ManualTermination::setup();
    config::disable_manual_termination();

    let ctx = config::context_create();
    let socket = Socket::new(&ctx, SocketKind::Pair).expect("socket");
    drop(socket);
    assert!(ctx.is_terminated(), "last release terminates in automatic mode");

    let replacement = config::context();
    assert!(!Arc::ptr_eq(&ctx, &replacement));
    assert!(replacement.check_disposed().is_ok());
}
