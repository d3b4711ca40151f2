use socket2::Socket;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::config::ProbeProtocol;
use crate::error::Result;
use crate::probe::packet::{IPV4_HEADER_SIZE, decode_ipv4_header};
use crate::probe::socket::{
    UdpMode, create_udp_socket, local_port, recv_packet, send_to, wait_readable,
};
use crate::probe::{Outcome, ProbeStrategy, Reply, remaining};

/// UDP header size
pub const UDP_HEADER_SIZE: usize = 8;
/// Default destination port for UDP probes
pub const DEFAULT_UDP_PORT: u16 = 31500;
/// Source port written into hand-built headers on raw sockets
pub const RAW_UDP_SRC_PORT: u16 = 50000;
/// Probe payload
pub const UDP_PAYLOAD: &[u8] = b"hello udp";

/// Build a UDP header + payload for a raw socket.
/// The checksum is left at zero, which IPv4 defines as "not computed".
pub fn build_udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let length = (UDP_HEADER_SIZE + payload.len()) as u16;
    let mut packet = Vec::with_capacity(length as usize);
    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&length.to_be_bytes());
    packet.extend_from_slice(&0u16.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// UDP probe.
///
/// UDP carries no identifier, so the first readable event on the socket counts
/// as the reply. Nothing checks that it came from the destination.
#[derive(Debug, Clone)]
pub struct UdpProbe {
    destination: Ipv4Addr,
    port: u16,
    timeout: Duration,
    mode: UdpMode,
    bind: Option<Ipv4Addr>,
}

impl UdpProbe {
    pub fn new(
        destination: Ipv4Addr,
        port: u16,
        timeout: Duration,
        mode: UdpMode,
        bind: Option<Ipv4Addr>,
    ) -> Self {
        Self {
            destination,
            port,
            timeout,
            mode,
            bind,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl ProbeStrategy for UdpProbe {
    fn protocol(&self) -> ProbeProtocol {
        ProbeProtocol::Udp
    }

    fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn open(&self) -> Result<Socket> {
        create_udp_socket(self.mode, self.bind)
    }

    fn send(&mut self, socket: &Socket, _sequence: u16) -> Result<Instant> {
        let packet = match self.mode {
            UdpMode::Datagram => UDP_PAYLOAD.to_vec(),
            UdpMode::Raw => build_udp_datagram(RAW_UDP_SRC_PORT, self.port, UDP_PAYLOAD),
        };

        let sent_at = Instant::now();
        send_to(socket, &packet, self.destination, self.port)?;
        Ok(sent_at)
    }

    fn receive(&mut self, socket: &Socket, sequence: u16, sent_at: Instant) -> Outcome {
        // Single wait: there is nothing to filter on
        match wait_readable(socket, remaining(sent_at, self.timeout)) {
            Ok(true) => {}
            Ok(false) => return Outcome::Timeout,
            Err(e) => return Outcome::Error(e.into()),
        }

        let mut buffer = Vec::with_capacity(crate::probe::MAX_RECV);
        let (len, from) = match recv_packet(socket, &mut buffer) {
            Ok(received) => received,
            Err(e) => return Outcome::Error(e.into()),
        };
        let delay = sent_at.elapsed();

        let (ttl, source, bytes, local) = match self.mode {
            UdpMode::Datagram => (
                None,
                from.map_or(self.destination, |addr| *addr.ip()),
                len,
                local_port(socket),
            ),
            UdpMode::Raw => {
                // Raw sockets see the IPv4 header; a reply we cannot decode ends the attempt
                let header = match decode_ipv4_header(&buffer[..len]) {
                    Ok(header) => header,
                    Err(e) => return Outcome::Error(e),
                };
                (
                    Some(header.ttl),
                    header.source,
                    len.saturating_sub(IPV4_HEADER_SIZE + UDP_HEADER_SIZE),
                    Some(RAW_UDP_SRC_PORT),
                )
            }
        };

        Outcome::Reply(Reply {
            sequence,
            delay,
            ttl,
            source,
            bytes,
            local_port: local,
            target_port: Some(self.port),
        })
    }
}
