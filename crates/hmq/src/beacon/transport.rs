// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP endpoint setup for beacons.
//!
//! Several beacons on one host share the discovery port, so the endpoint is
//! always bound with `SO_REUSEADDR` (plus `SO_REUSEPORT` on unix) and
//! `SO_BROADCAST`.

use crate::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// Open a broadcast-capable UDP endpoint on `0.0.0.0:port`.
///
/// `port == 0` picks an ephemeral port; read it back with `local_addr()`.
/// Any failure is reported as [`Error::BindFailed`].
pub(crate) fn open_endpoint(port: u16, recv_poll: Duration) -> Result<UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let bind_failed = |e: io::Error| Error::BindFailed(format!("udp {}: {}", addr, e));

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;

    #[cfg(unix)]
    set_reuseport(&socket).map_err(bind_failed)?;

    socket.set_broadcast(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;

    // Bounds how long a stopping listener can stay blocked in recv_from.
    socket.set_read_timeout(Some(recv_poll)).map_err(bind_failed)?;

    Ok(socket.into())
}

/// Set SO_REUSEPORT so several processes can share the discovery port.
#[cfg(unix)]
fn set_reuseport(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: setsockopt FFI with valid fd, standard socket option, and correctly sized optval pointer
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Errors after which the endpoint can never be used again.
pub(crate) fn is_fatal_io(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::EBADF) {
            return true;
        }
    }
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::InvalidInput
    )
}

/// Receive errors that only mean "nothing arrived during this poll".
pub(crate) fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// First non-loopback IPv4 interface, falling back to loopback.
pub(crate) fn primary_interface() -> Ipv4Addr {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[BEACON] failed to list network interfaces: {}", e);
            return Ipv4Addr::LOCALHOST;
        }
    };

    interfaces
        .into_iter()
        .find_map(|(_name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}
