//! Socket helpers: listeners for stream outputs and receive sockets for RTP inputs.

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::os::fd::OwnedFd;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::time::Duration;

use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
    SockaddrIn6,
};

/// Create a socket bound to `addr` with SO_REUSEADDR, and IPV6_V6ONLY for v6 addresses.
fn bound_socket(addr: SocketAddr, ty: SockType, protocol: SockProtocol) -> io::Result<OwnedFd> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket::socket(family, ty, SockFlag::SOCK_CLOEXEC, protocol)?;

    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    match addr {
        SocketAddr::V4(v4) => {
            socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4))?;
        }
        SocketAddr::V6(v6) => {
            socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true)?;
            socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6))?;
        }
    }
    Ok(fd)
}

/// Bind a non-blocking TCP listener for a stream output.
pub fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let fd = bound_socket(addr, SockType::Stream, SockProtocol::Tcp)?;
    socket::listen(&fd, Backlog::MAXCONN)?;

    let listener = unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) };
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Bind a blocking UDP receive socket with a read timeout and kernel buffer size.
///
/// A zero `recv_buffer` leaves the kernel default in place.
pub fn bind_udp_receiver(
    addr: SocketAddr,
    read_timeout: Duration,
    recv_buffer: usize,
) -> io::Result<UdpSocket> {
    let fd = bound_socket(addr, SockType::Datagram, SockProtocol::Udp)?;
    if recv_buffer > 0 {
        socket::setsockopt(&fd, sockopt::RcvBuf, &recv_buffer)?;
    }

    let udp = unsafe { UdpSocket::from_raw_fd(fd.into_raw_fd()) };
    udp.set_read_timeout(Some(read_timeout.max(Duration::from_millis(1))))?;
    Ok(udp)
}
