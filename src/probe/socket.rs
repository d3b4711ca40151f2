use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::error::{ProbeError, Result};

/// Max size of an incoming buffer (largest IPv4 datagram)
pub const MAX_RECV: usize = u16::MAX as usize;

/// How the UDP probe opens its socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UdpMode {
    /// Plain SOCK_DGRAM socket, no privilege needed
    #[default]
    Datagram,
    /// SOCK_RAW/IPPROTO_UDP; the IPv4 header of replies is visible (TTL)
    Raw,
}

/// Map a socket creation failure, singling out missing privilege
pub fn classify_open_error(kind: &'static str, err: io::Error) -> ProbeError {
    let denied = err.kind() == io::ErrorKind::PermissionDenied
        || matches!(err.raw_os_error(), Some(libc::EPERM) | Some(libc::EACCES));
    if denied {
        ProbeError::Permission { kind, source: err }
    } else {
        ProbeError::Transport(err)
    }
}

/// Bind socket to a specific source IP address
pub fn bind_to_source_ip(socket: &Socket, ip: Ipv4Addr, port: u16) -> Result<()> {
    let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
    socket.bind(&SockAddr::from(addr))?;
    Ok(())
}

/// Create a raw ICMP socket. Requires root or CAP_NET_RAW.
pub fn create_icmp_socket(bind: Option<Ipv4Addr>) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
        .map_err(|e| classify_open_error("ICMP", e))?;

    if let Some(ip) = bind {
        // Port number is irrelevant for ICMP
        bind_to_source_ip(&socket, ip, 0)?;
    }
    Ok(socket)
}

/// Create a UDP socket, raw or datagram.
///
/// Datagram sockets are bound up front so the local port is known before sending.
pub fn create_udp_socket(mode: UdpMode, bind: Option<Ipv4Addr>) -> Result<Socket> {
    match mode {
        UdpMode::Raw => {
            let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))
                .map_err(|e| classify_open_error("raw UDP", e))?;
            if let Some(ip) = bind {
                bind_to_source_ip(&socket, ip, 0)?;
            }
            Ok(socket)
        }
        UdpMode::Datagram => {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
                .map_err(|e| classify_open_error("UDP", e))?;
            bind_to_source_ip(&socket, bind.unwrap_or(Ipv4Addr::UNSPECIFIED), 0)?;
            Ok(socket)
        }
    }
}

/// Create a TCP stream socket
pub fn create_tcp_socket(bind: Option<Ipv4Addr>) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| classify_open_error("TCP", e))?;
    if let Some(ip) = bind {
        bind_to_source_ip(&socket, ip, 0)?;
    }
    Ok(socket)
}

/// Send a datagram to target
pub fn send_to(socket: &Socket, packet: &[u8], target: Ipv4Addr, port: u16) -> io::Result<usize> {
    let addr = SockAddr::from(SocketAddrV4::new(target, port));
    socket.send_to(packet, &addr)
}

/// Local port of a bound or connected socket
pub fn local_port(socket: &Socket) -> Option<u16> {
    socket
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_socket())
        .map(|addr| addr.port())
}

fn poll_timeout_ms(timeout: Duration) -> libc::c_int {
    // Round up so a sub-millisecond budget still waits instead of spinning
    let ms = timeout.as_micros().div_ceil(1000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

/// Wait until `socket` is readable or `timeout` passes.
///
/// Returns `Ok(false)` on timeout. Interrupted waits resume with what is left
/// of the budget.
#[cfg(unix)]
pub fn wait_readable(socket: &Socket, timeout: Duration) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let deadline = Instant::now().checked_add(timeout);
    loop {
        let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
        let mut pfd = libc::pollfd {
            fd: socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        let ret = unsafe { libc::poll(&mut pfd, 1, poll_timeout_ms(remaining)) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        // POLLERR/POLLHUP also count: the following read reports what happened
        return Ok(ret > 0 && pfd.revents != 0);
    }
}

/// Receive one packet into `buffer`'s spare capacity, returning its length and sender
pub fn recv_packet(socket: &Socket, buffer: &mut Vec<u8>) -> io::Result<(usize, Option<SocketAddrV4>)> {
    buffer.clear();
    if buffer.capacity() < MAX_RECV {
        buffer.reserve(MAX_RECV);
    }

    let spare: &mut [MaybeUninit<u8>] = buffer.spare_capacity_mut();
    let (len, addr) = socket.recv_from(spare)?;
    // SAFETY: recv_from initialized the first `len` bytes
    unsafe { buffer.set_len(len) };
    Ok((len, addr.as_socket_ipv4()))
}
