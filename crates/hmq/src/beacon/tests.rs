// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::*;
use crate::context::TerminationPolicy;
use std::net::SocketAddr;

const WAIT: Duration = Duration::from_secs(2);

fn manual_ctx() -> Arc<Context> {
    Context::with_policy(TerminationPolicy::manual_blocking())
}

fn loopback_config() -> BeaconConfig {
    BeaconConfig {
        broadcast_addr: Ipv4Addr::LOCALHOST,
        ..BeaconConfig::default()
    }
}

/// Send each payload as one datagram to `127.0.0.1:port`; returns the
/// sender address.
fn send_datagrams(port: u16, payloads: &[&[u8]]) -> SocketAddr {
    let sender = UdpSocket::bind("127.0.0.1:0").expect("sender bind");
    for payload in payloads {
        sender
            .send_to(payload, ("127.0.0.1", port))
            .expect("send_to");
    }
    sender.local_addr().expect("sender addr")
}

/// Exclusive-address receiver sharing the speaker's port on loopback.
#[cfg(unix)]
fn loopback_receiver(port: u16) -> UdpSocket {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).expect("socket");
    socket.set_reuse_address(true).expect("reuseaddr");
    socket.set_reuse_port(true).expect("reuseport");
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    socket.bind(&addr.into()).expect("bind receiver");
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .expect("timeout");
    socket.into()
}

#[test]
fn test_listener_filters_by_prefix() {
    let ctx = manual_ctx();
    let listener = Beacon::new(&ctx).expect("beacon");
    listener.configure(0).expect("configure");
    let port = listener.port().expect("port");
    listener.subscribe(b"H").expect("subscribe");

    let sender = send_datagrams(port, &[b"Hello", b"World", b"Hi"]);

    let first = listener.receive_timeout(WAIT).expect("first");
    assert_eq!(first.as_string(), "Hello");
    assert_eq!(first.peer_address, sender.to_string());

    let second = listener.receive_timeout(WAIT).expect("second");
    assert_eq!(second.payload, b"Hi");

    assert!(matches!(
        listener.receive_timeout(Duration::from_millis(150)),
        Err(Error::Timeout)
    ));
}

#[test]
fn test_empty_prefix_accepts_everything() {
    let ctx = manual_ctx();
    let listener = Beacon::new(&ctx).expect("beacon");
    listener.configure(0).expect("configure");
    listener.subscribe(b"").expect("subscribe");

    send_datagrams(listener.port().expect("port"), &[b"abc", b"xyz"]);
    assert_eq!(listener.receive_timeout(WAIT).expect("abc").payload, b"abc");
    assert_eq!(listener.receive_timeout(WAIT).expect("xyz").payload, b"xyz");
}

#[test]
fn test_resubscribe_swaps_filter() {
    let ctx = manual_ctx();
    let listener = Beacon::new(&ctx).expect("beacon");
    listener.configure(0).expect("configure");
    let port = listener.port().expect("port");

    listener.subscribe(b"A").expect("subscribe A");
    send_datagrams(port, &[b"A1"]);
    assert_eq!(listener.receive_timeout(WAIT).expect("A1").payload, b"A1");

    listener.subscribe(b"B").expect("subscribe B");
    send_datagrams(port, &[b"A2", b"B1"]);
    assert_eq!(listener.receive_timeout(WAIT).expect("B1").payload, b"B1");
}

#[cfg(unix)]
#[test]
fn test_speaker_sends_immediately_then_every_interval() {
    let ctx = manual_ctx();
    let speaker = Beacon::with_config(&ctx, loopback_config()).expect("beacon");
    speaker.configure(0).expect("configure");
    let receiver = loopback_receiver(speaker.port().expect("port"));

    receiver
        .set_read_timeout(Some(Duration::from_secs(1)))
        .expect("timeout");

    let start = Instant::now();
    speaker
        .publish(b"Hello", Duration::from_millis(300))
        .expect("publish");
    assert!(speaker.is_publishing());

    let mut buf = [0u8; 64];
    let (len, _) = receiver.recv_from(&mut buf).expect("first datagram");
    assert_eq!(&buf[..len], b"Hello");
    assert!(start.elapsed() < Duration::from_millis(250), "first send is immediate");

    let (len, _) = receiver.recv_from(&mut buf).expect("second datagram");
    assert_eq!(&buf[..len], b"Hello");
    assert!(start.elapsed() >= Duration::from_millis(290));

    speaker.close().expect("close");
}

#[cfg(unix)]
#[test]
fn test_silence_stops_speaker() {
    let ctx = manual_ctx();
    let speaker = Beacon::with_config(&ctx, loopback_config()).expect("beacon");
    speaker.configure(0).expect("configure");
    let receiver = loopback_receiver(speaker.port().expect("port"));

    speaker
        .publish(b"ping", Duration::from_millis(20))
        .expect("publish");
    let mut buf = [0u8; 64];
    receiver.recv_from(&mut buf).expect("datagram while publishing");

    speaker.silence().expect("silence");
    assert!(!speaker.is_publishing());

    // Drain what was sent before the loop stopped.
    receiver.set_nonblocking(true).expect("nonblocking");
    while receiver.recv_from(&mut buf).is_ok() {}
    receiver.set_nonblocking(false).expect("blocking");

    assert!(receiver.recv_from(&mut buf).is_err(), "no datagram after silence");
}

#[test]
fn test_publish_rejects_oversized_payload() {
    let ctx = manual_ctx();
    let beacon = Beacon::new(&ctx).expect("beacon");
    beacon.configure(0).expect("configure");

    let payload = vec![b'x'; MAX_BEACON_SIZE + 1];
    assert!(matches!(
        beacon.publish(&payload, Duration::from_secs(1)),
        Err(Error::FrameTooLarge(len)) if len == MAX_BEACON_SIZE + 1
    ));
    assert!(!beacon.is_publishing());
}

#[test]
fn test_publish_rejects_zero_interval() {
    let ctx = manual_ctx();
    let beacon = Beacon::with_config(&ctx, loopback_config()).expect("beacon");
    beacon.configure(0).expect("configure");

    assert!(matches!(
        beacon.publish(b"Hello", Duration::ZERO),
        Err(Error::InvalidState(_))
    ));
    assert!(!beacon.is_publishing());

    beacon
        .publish(b"Hello", Duration::from_millis(100))
        .expect("non-zero interval accepted");
    assert!(beacon.is_publishing());
    beacon.close().expect("close");
}

#[test]
fn test_operations_require_configuration() {
    let ctx = manual_ctx();
    let beacon = Beacon::new(&ctx).expect("beacon");
    assert!(beacon.port().is_none());
    assert!(beacon.bound_to().is_none());
    assert!(matches!(
        beacon.publish(b"x", Duration::from_secs(1)),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(beacon.subscribe(b"x"), Err(Error::InvalidState(_))));
}

#[test]
fn test_unsubscribe_keeps_queued_messages() {
    let ctx = manual_ctx();
    let listener = Beacon::new(&ctx).expect("beacon");
    listener.configure(0).expect("configure");
    listener.subscribe(b"").expect("subscribe");

    send_datagrams(listener.port().expect("port"), &[b"queued"]);
    assert!(listener.wait_ready(WAIT));

    listener.unsubscribe().expect("unsubscribe");
    assert!(!listener.is_subscribed());
    let msg = listener.try_receive().expect("try_receive");
    assert_eq!(msg.map(|m| m.payload), Some(b"queued".to_vec()));
}

#[test]
fn test_reconfigure_failure_keeps_old_endpoint() {
    let ctx = manual_ctx();
    let listener = Beacon::new(&ctx).expect("beacon");
    listener.configure(0).expect("configure");
    let port = listener.port().expect("port");
    listener.subscribe(b"").expect("subscribe");

    let exclusive = UdpSocket::bind("0.0.0.0:0").expect("exclusive bind");
    let taken = exclusive.local_addr().expect("addr").port();
    assert!(matches!(
        listener.configure(taken),
        Err(Error::BindFailed(_))
    ));

    assert_eq!(listener.port(), Some(port));
    send_datagrams(port, &[b"still here"]);
    assert_eq!(
        listener.receive_timeout(WAIT).expect("old endpoint").payload,
        b"still here"
    );
}

#[test]
fn test_reconfigure_moves_listener_to_new_port() {
    let ctx = manual_ctx();
    let listener = Beacon::new(&ctx).expect("beacon");
    listener.configure(0).expect("configure");
    let old_port = listener.port().expect("port");
    listener.subscribe(b"").expect("subscribe");

    listener.configure(0).expect("reconfigure");
    let new_port = listener.port().expect("port");
    assert_ne!(old_port, new_port);
    assert!(listener.is_subscribed());

    send_datagrams(new_port, &[b"moved"]);
    assert_eq!(
        listener.receive_timeout(WAIT).expect("new endpoint").payload,
        b"moved"
    );
}

#[test]
fn test_close_stops_loops_and_deregisters() {
    let ctx = manual_ctx();
    let beacon = Beacon::with_config(&ctx, loopback_config()).expect("beacon");
    beacon.configure(0).expect("configure");
    beacon.subscribe(b"").expect("subscribe");
    beacon
        .publish(b"bye", Duration::from_millis(500))
        .expect("publish");
    assert_eq!(ctx.resource_count(), 1);

    let start = Instant::now();
    beacon.close().expect("close");
    assert!(start.elapsed() < BEACON_RECV_POLL * 3);
    beacon.close().expect("second close");

    assert_eq!(ctx.resource_count(), 0);
    assert!(beacon.port().is_none());
    assert!(matches!(beacon.configure(0), Err(Error::InvalidState(_))));
    assert!(matches!(beacon.try_receive(), Err(Error::InvalidState(_))));
    assert!(matches!(
        beacon.receive_timeout(Duration::from_millis(10)),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_beacon_on_terminated_context_fails() {
    let ctx = manual_ctx();
    ctx.terminate().expect("terminate");
    assert!(matches!(Beacon::new(&ctx), Err(Error::InvalidState(_))));
}

#[test]
fn test_blocking_terminate_waits_for_beacon() {
    let ctx = manual_ctx();
    let beacon = Beacon::new(&ctx).expect("beacon");
    beacon.configure(0).expect("configure");

    let (tx, rx) = std::sync::mpsc::channel();
    let terminator = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            ctx.terminate().expect("terminate");
            tx.send(()).expect("signal");
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(beacon);
    rx.recv_timeout(WAIT).expect("terminate returned");
    terminator.join().expect("terminator");
    assert!(ctx.is_terminated());
}

#[test]
fn test_bound_to_reports_interface() {
    let ctx = manual_ctx();
    let beacon = Beacon::new(&ctx).expect("beacon");

    beacon
        .configure_on(Ipv4Addr::LOCALHOST, 0)
        .expect("configure_on");
    assert_eq!(beacon.bound_to(), Some(Ipv4Addr::LOCALHOST));

    beacon.configure(0).expect("configure");
    let resolved = beacon.bound_to().expect("resolved");
    assert!(!resolved.is_unspecified());
}

#[test]
fn test_failed_beacon_rejects_operations() {
    let ctx = manual_ctx();
    let beacon = Beacon::new(&ctx).expect("beacon");
    beacon.configure(0).expect("configure");

    beacon.shared.fail("simulated".to_string());
    assert!(beacon.failure().is_some());
    let err = beacon.subscribe(b"").expect_err("failed beacon");
    assert!(err.to_string().contains("simulated"));

    beacon.close().expect("close still releases");
    assert_eq!(ctx.resource_count(), 0);
}

#[test]
fn test_default_config_matches_constants() {
    let config = BeaconConfig::default();
    assert_eq!(config.broadcast_addr, DEFAULT_BROADCAST_ADDR);
    assert_eq!(config.recv_poll, BEACON_RECV_POLL);
    assert_eq!(config.max_datagram, MAX_BEACON_SIZE);
}
