// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::doc_markdown)] // Test documentation
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Poller driving sockets and timers together.

use hmq::{Context, Poller, PollerConfig, Socket, SocketKind, TerminationPolicy, Timer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn manual_ctx() -> Arc<Context> {
    Context::with_policy(TerminationPolicy::manual_blocking())
}

fn connected_pair(ctx: &Arc<Context>) -> (Arc<Socket>, Socket) {
    let rep = Arc::new(Socket::new(ctx, SocketKind::Response).expect("rep"));
    let req = Socket::new(ctx, SocketKind::Request).expect("req");
    let port = rep.bind_random_port("127.0.0.1").expect("bind");
    req.connect(&format!("127.0.0.1:{}", port)).expect("connect");
    (rep, req)
}

#[test]
fn test_request_reply_through_poller_then_terminate() {
    let ctx = manual_ctx();
    {
        let (rep, req) = connected_pair(&ctx);
        let poller = Poller::new();
        poller
            .add(Arc::clone(&rep), |rep| {
                let request = rep.recv_string()?;
                rep.send_str(&format!("{} World", request))
            })
            .expect("add");
        poller.run_async().expect("run_async");

        for round in 0..5 {
            let request = format!("Hello{}", round);
            req.send_str(&request).expect("send");
            assert_eq!(
                req.recv_string_timeout(WAIT).expect("reply"),
                format!("{} World", request)
            );
        }

        poller.stop_and_join().expect("stop");
        assert!(poller.stats().dispatches >= 5);
    }

    ctx.terminate().expect("terminate");
    assert!(ctx.is_terminated());
}

#[test]
fn test_timer_and_socket_share_one_loop() {
    let ctx = manual_ctx();
    let (rep, req) = connected_pair(&ctx);
    let timer = Timer::new(Duration::from_millis(20));
    let ticks = Arc::new(AtomicUsize::new(0));

    let poller = Poller::new();
    {
        let ticks = Arc::clone(&ticks);
        poller
            .add(Arc::clone(&timer), move |_| {
                ticks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("add timer");
    }
    poller
        .add(Arc::clone(&rep), |rep| {
            let frame = rep.recv_frame()?;
            rep.send_frame(&frame)
        })
        .expect("add socket");
    poller.run_async().expect("run_async");

    req.send_str("echo").expect("send");
    assert_eq!(req.recv_string_timeout(WAIT).expect("echo"), "echo");

    thread::sleep(Duration::from_millis(150));
    poller.stop_and_join().expect("stop");
    assert!(ticks.load(Ordering::SeqCst) >= 3, "timer fired alongside socket");
}

#[test]
fn test_synchronous_run_stopped_by_posted_task() {
    let poller = Arc::new(Poller::with_config(PollerConfig {
        poll_interval: Duration::from_millis(10),
        ..PollerConfig::default()
    }));
    let (tx, rx) = mpsc::channel();

    let runner = {
        let poller = Arc::clone(&poller);
        thread::spawn(move || {
            let result = poller.run();
            let _ = tx.send(Instant::now());
            result
        })
    };

    let deadline = Instant::now() + WAIT;
    while !poller.is_running() {
        assert!(Instant::now() < deadline, "loop never started");
        thread::sleep(Duration::from_millis(1));
    }

    let stopper = Arc::clone(&poller);
    let posted_at = Instant::now();
    poller.post(move || stopper.stop());

    let returned_at = rx.recv_timeout(WAIT).expect("run returned");
    assert!(returned_at >= posted_at);
    runner.join().expect("runner").expect("run ok");
    assert!(!poller.is_running());
}

#[test]
fn test_removing_socket_leaves_it_open() {
    let ctx = manual_ctx();
    let (rep, req) = connected_pair(&ctx);
    let poller = Poller::new();
    let id = poller.add(Arc::clone(&rep), |_| Ok(())).expect("add");

    assert!(poller.remove(id));
    assert!(!poller.remove(id));
    assert!(!rep.is_closed());

    req.send_str("still open").expect("send");
    assert_eq!(rep.recv_string_timeout(WAIT).expect("recv"), "still open");
}
