use socket2::Socket;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use crate::config::ProbeProtocol;
use crate::error::{ProbeError, Result};
use crate::probe::packet::{
    ICMP_ECHO_REQUEST, IcmpReply, MAX_PAYLOAD_SIZE, build_payload, decode_reply, encode_icmp_echo,
};
use crate::probe::socket::{create_icmp_socket, recv_packet, send_to, wait_readable};
use crate::probe::{Outcome, ProbeStrategy, Reply, remaining};

static IDENTIFIER_OFFSET: AtomicU16 = AtomicU16::new(0);

/// Identifier for a new ICMP session.
///
/// Based on the process id, offset per call so that sessions running in
/// parallel inside one process never share an identifier.
pub fn next_identifier() -> u16 {
    (std::process::id() as u16).wrapping_add(IDENTIFIER_OFFSET.fetch_add(1, Ordering::Relaxed))
}

/// Outcome of inspecting one packet read from the raw socket
#[derive(Debug, PartialEq, Eq)]
pub enum Match {
    Ours(IcmpReply),
    /// Foreign identifier, our own outgoing request, or undecodable
    Discard,
}

/// Decide whether a raw packet is the echo reply for `identifier`
pub fn match_reply(packet: &[u8], identifier: u16) -> Match {
    let reply = match decode_reply(packet) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::trace!(error = %e, "discarding malformed ICMP packet");
            return Match::Discard;
        }
    };

    // Loopback hands our own request back to the raw socket
    if reply.icmp.icmp_type == ICMP_ECHO_REQUEST {
        return Match::Discard;
    }
    if reply.icmp.identifier != identifier {
        tracing::trace!(
            identifier = reply.icmp.identifier,
            expected = identifier,
            "discarding foreign ICMP packet"
        );
        return Match::Discard;
    }
    Match::Ours(reply)
}

/// ICMP echo probe over a raw socket
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    destination: Ipv4Addr,
    identifier: u16,
    payload: Vec<u8>,
    timeout: Duration,
    bind: Option<Ipv4Addr>,
}

impl IcmpProbe {
    pub fn new(
        destination: Ipv4Addr,
        identifier: u16,
        packet_size: usize,
        timeout: Duration,
        bind: Option<Ipv4Addr>,
    ) -> Result<Self> {
        if packet_size > MAX_PAYLOAD_SIZE {
            return Err(ProbeError::PayloadTooLarge {
                size: packet_size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            destination,
            identifier,
            payload: build_payload(packet_size),
            timeout,
            bind,
        })
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }
}

impl ProbeStrategy for IcmpProbe {
    fn protocol(&self) -> ProbeProtocol {
        ProbeProtocol::Icmp
    }

    fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn open(&self) -> Result<Socket> {
        create_icmp_socket(self.bind)
    }

    fn send(&mut self, socket: &Socket, sequence: u16) -> Result<Instant> {
        let packet = encode_icmp_echo(self.identifier, sequence, &self.payload)?;

        let sent_at = Instant::now();
        // ICMP has no ports; the kernel ignores this one
        send_to(socket, &packet, self.destination, 0)?;
        Ok(sent_at)
    }

    fn receive(&mut self, socket: &Socket, _sequence: u16, sent_at: Instant) -> Outcome {
        let mut buffer = Vec::with_capacity(crate::probe::MAX_RECV);

        loop {
            // Shrinks by the time spent in every wait, foreign packets included
            let budget = remaining(sent_at, self.timeout);
            if budget.is_zero() {
                return Outcome::Timeout;
            }

            match wait_readable(socket, budget) {
                Ok(true) => {}
                Ok(false) => return Outcome::Timeout,
                Err(e) => return Outcome::Error(e.into()),
            }

            let len = match recv_packet(socket, &mut buffer) {
                Ok((len, _)) => len,
                Err(e) => return Outcome::Error(e.into()),
            };
            let received_at = Instant::now();

            if let Match::Ours(reply) = match_reply(&buffer[..len], self.identifier) {
                // Identifier decides the match; the sequence is whatever came back
                return Outcome::Reply(Reply {
                    sequence: reply.icmp.sequence,
                    delay: received_at.duration_since(sent_at),
                    ttl: Some(reply.ip.ttl),
                    source: reply.ip.source,
                    bytes: reply.payload_size + crate::probe::ICMP_HEADER_SIZE,
                    local_port: None,
                    target_port: None,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::packet::tests::{echo_reply_for, wrap_ipv4};
    use crate::probe::socket::{UdpMode, create_udp_socket, local_port};
    use std::net::UdpSocket;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn reply_packet(identifier: u16, sequence: u16) -> Vec<u8> {
        let request = encode_icmp_echo(identifier, sequence, &build_payload(16)).unwrap();
        wrap_ipv4(&echo_reply_for(&request), 60, Ipv4Addr::new(8, 8, 8, 8))
    }

    #[test]
    fn test_next_identifier_differs() {
        let a = next_identifier();
        let b = next_identifier();
        assert_ne!(a, b);
    }

    #[test]
    fn test_match_own_reply() {
        let packet = reply_packet(0x1111, 5);
        match match_reply(&packet, 0x1111) {
            Match::Ours(reply) => {
                assert_eq!(reply.icmp.sequence, 5);
                assert_eq!(reply.ip.ttl, 60);
                assert_eq!(reply.payload_size, 16);
            }
            Match::Discard => panic!("own reply was discarded"),
        }
    }

    #[test]
    fn test_identifiers_do_not_cross_match() {
        // Two sessions probing the same destination
        let first = reply_packet(0x1111, 0);
        let second = reply_packet(0x2222, 0);

        assert!(matches!(match_reply(&first, 0x1111), Match::Ours(_)));
        assert_eq!(match_reply(&second, 0x1111), Match::Discard);
        assert!(matches!(match_reply(&second, 0x2222), Match::Ours(_)));
        assert_eq!(match_reply(&first, 0x2222), Match::Discard);
    }

    /// Datagram socket on loopback standing in for the raw socket
    fn loopback_receiver() -> (Socket, u16) {
        let socket = create_udp_socket(UdpMode::Datagram, Some(Ipv4Addr::LOCALHOST)).unwrap();
        let port = local_port(&socket).unwrap();
        (socket, port)
    }

    #[test]
    fn test_foreign_stream_cannot_extend_timeout() {
        let (socket, port) = loopback_receiver();
        let stop = AtomicBool::new(false);
        let timeout = Duration::from_millis(300);
        let mut icmp = IcmpProbe::new(Ipv4Addr::LOCALHOST, 0x1111, 16, timeout, None).unwrap();

        let (outcome, elapsed) = thread::scope(|s| {
            s.spawn(|| {
                let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
                let foreign = reply_packet(0x9999, 0);
                while !stop.load(Ordering::Relaxed) {
                    let _ = sender.send_to(&foreign, ("127.0.0.1", port));
                    thread::sleep(Duration::from_millis(5));
                }
            });

            let sent_at = Instant::now();
            let outcome = icmp.receive(&socket, 0, sent_at);
            let elapsed = sent_at.elapsed();
            stop.store(true, Ordering::Relaxed);
            (outcome, elapsed)
        });

        assert!(matches!(outcome, Outcome::Timeout), "got {outcome:?}");
        assert!(elapsed >= timeout, "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "overran: {elapsed:?}");
    }

    #[test]
    fn test_reply_reports_decoded_sequence() {
        let (socket, port) = loopback_receiver();
        let mut icmp =
            IcmpProbe::new(Ipv4Addr::LOCALHOST, 0x1111, 16, Duration::from_secs(2), None).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&reply_packet(0x9999, 3), ("127.0.0.1", port)).unwrap();
        sender.send_to(&reply_packet(0x1111, 7), ("127.0.0.1", port)).unwrap();

        let outcome = icmp.receive(&socket, 3, Instant::now());
        let reply = outcome.reply().expect("matching reply");
        assert_eq!(reply.sequence, 7);
        assert_eq!(reply.ttl, Some(60));
        assert_eq!(reply.source, Ipv4Addr::new(8, 8, 8, 8));
    }

    #[test]
    fn test_own_request_is_discarded() {
        let request = encode_icmp_echo(0x1111, 0, &build_payload(16)).unwrap();
        let packet = wrap_ipv4(&request, 64, Ipv4Addr::LOCALHOST);
        assert_eq!(match_reply(&packet, 0x1111), Match::Discard);
    }

    #[test]
    fn test_malformed_is_discarded() {
        assert_eq!(match_reply(&[0u8; 10], 0), Match::Discard);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = IcmpProbe::new(
            Ipv4Addr::LOCALHOST,
            1,
            MAX_PAYLOAD_SIZE + 1,
            Duration::from_secs(1),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ProbeError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_attempt_without_privilege() {
        let mut probe = IcmpProbe::new(
            Ipv4Addr::LOCALHOST,
            next_identifier(),
            56,
            Duration::from_millis(500),
            None,
        )
        .unwrap();

        match probe.attempt(0) {
            // Not root: must surface the distinguished permission error
            Err(e) => assert!(e.is_permission(), "unexpected error: {e}"),
            // Root: loopback always answers
            Ok(outcome) => {
                let reply = outcome.reply().expect("loopback echo reply");
                assert_eq!(reply.source, Ipv4Addr::LOCALHOST);
                assert!(reply.ttl.is_some());
            }
        }
    }
}
