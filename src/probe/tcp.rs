//! TCP connect probe
//!
//! The connect handshake is the ping signal. After connecting, a short payload
//! is written and the first readable event (data or an orderly close) counts as
//! the reply.

use socket2::{SockAddr, Socket};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::config::ProbeProtocol;
use crate::error::Result;
use crate::probe::socket::{create_tcp_socket, local_port, recv_packet, wait_readable};
use crate::probe::{Outcome, ProbeStrategy, Reply, remaining};

/// Default destination port for TCP probes
pub const DEFAULT_TCP_PORT: u16 = 8888;
/// Probe payload
pub const TCP_PAYLOAD: &[u8] = b"hello tcp";

/// TCP connect probe
#[derive(Debug, Clone)]
pub struct TcpProbe {
    destination: Ipv4Addr,
    port: u16,
    timeout: Duration,
    bind: Option<Ipv4Addr>,
}

impl TcpProbe {
    pub fn new(destination: Ipv4Addr, port: u16, timeout: Duration, bind: Option<Ipv4Addr>) -> Self {
        Self {
            destination,
            port,
            timeout,
            bind,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl ProbeStrategy for TcpProbe {
    fn protocol(&self) -> ProbeProtocol {
        ProbeProtocol::Tcp
    }

    fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn open(&self) -> Result<Socket> {
        create_tcp_socket(self.bind)
    }

    fn send(&mut self, socket: &Socket, _sequence: u16) -> Result<Instant> {
        let addr = SockAddr::from(SocketAddrV4::new(self.destination, self.port));

        let sent_at = Instant::now();
        // A connect that runs out of time is a lost probe, not a transport error
        socket.connect_timeout(&addr, self.timeout)?;
        socket.send(TCP_PAYLOAD)?;
        Ok(sent_at)
    }

    fn receive(&mut self, socket: &Socket, sequence: u16, sent_at: Instant) -> Outcome {
        match wait_readable(socket, remaining(sent_at, self.timeout)) {
            Ok(true) => {}
            Ok(false) => return Outcome::Timeout,
            Err(e) => return Outcome::Error(e.into()),
        }

        let mut buffer = Vec::with_capacity(crate::probe::MAX_RECV);
        let len = match recv_packet(socket, &mut buffer) {
            Ok((len, _)) => len,
            Err(e) => return Outcome::Error(e.into()),
        };

        Outcome::Reply(Reply {
            sequence,
            delay: sent_at.elapsed(),
            ttl: None,
            source: self.destination,
            bytes: len,
            local_port: local_port(socket),
            target_port: Some(self.port),
        })
    }
}
