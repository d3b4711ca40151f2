//! Probe strategies and the shared send/receive contract.
//!
//! Each attempt opens one socket, sends one probe, waits for one reply and
//! closes the socket again, whatever the result.

pub mod checksum;
pub mod icmp;
pub mod packet;
pub mod resolve;
pub mod socket;
pub mod tcp;
pub mod udp;

pub use checksum::*;
pub use icmp::*;
pub use packet::*;
pub use resolve::*;
pub use socket::*;
pub use tcp::*;
pub use udp::*;

use socket2::Socket;
use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::config::{Config, ProbeProtocol};
use crate::error::{ProbeError, Result};

/// A reply matched to one of our probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub sequence: u16,
    /// From just before the send call to just after the receive call
    pub delay: Duration,
    /// TTL of the reply's IPv4 header, when the socket exposes it
    pub ttl: Option<u8>,
    pub source: Ipv4Addr,
    /// Bytes received
    pub bytes: usize,
    pub local_port: Option<u16>,
    pub target_port: Option<u16>,
}

impl Reply {
    pub fn delay_ms(&self) -> f64 {
        self.delay.as_secs_f64() * 1000.0
    }
}

/// Result of one probe attempt
#[derive(Debug)]
pub enum Outcome {
    Reply(Reply),
    /// No matching reply within the timeout
    Timeout,
    /// Socket-level or decoding failure; only this attempt is lost
    Error(ProbeError),
}

impl Outcome {
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Outcome::Reply(reply) => Some(reply),
            _ => None,
        }
    }
}

/// One way of probing a destination.
///
/// Implementors provide socket creation, the send half and the receive half;
/// [`ProbeStrategy::attempt`] ties them together.
pub trait ProbeStrategy: Send {
    fn protocol(&self) -> ProbeProtocol;

    fn destination(&self) -> Ipv4Addr;

    /// Budget for one attempt, measured from the send timestamp
    fn timeout(&self) -> Duration;

    /// Open a fresh socket for a single attempt
    fn open(&self) -> Result<Socket>;

    /// Send one probe, returning the timestamp taken right before the send call
    fn send(&mut self, socket: &Socket, sequence: u16) -> Result<Instant>;

    /// Wait for the reply to the probe sent at `sent_at`
    fn receive(&mut self, socket: &Socket, sequence: u16, sent_at: Instant) -> Outcome;

    /// Run one full attempt.
    ///
    /// Fatal errors (permission, oversized payload) are returned as `Err`; every
    /// other failure becomes an [`Outcome`]. The socket is dropped before
    /// returning on every path.
    fn attempt(&mut self, sequence: u16) -> Result<Outcome> {
        let socket = match self.open() {
            Ok(socket) => socket,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(Outcome::Error(e)),
        };

        let outcome = match self.send(&socket, sequence) {
            Ok(sent_at) => self.receive(&socket, sequence, sent_at),
            Err(e) if e.is_fatal() => return Err(e),
            Err(ProbeError::Transport(e)) if is_timeout(&e) => Outcome::Timeout,
            Err(e) => Outcome::Error(e),
        };

        drop(socket);
        Ok(outcome)
    }
}

/// True for I/O errors that mean "ran out of time"
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Remaining budget of an attempt that started at `sent_at`
pub fn remaining(sent_at: Instant, timeout: Duration) -> Duration {
    timeout.saturating_sub(sent_at.elapsed())
}

/// Build the strategy selected by `config` for `destination`
pub fn build_strategy(config: &Config, destination: Ipv4Addr) -> Result<Box<dyn ProbeStrategy>> {
    let strategy: Box<dyn ProbeStrategy> = match config.protocol {
        ProbeProtocol::Icmp => Box::new(IcmpProbe::new(
            destination,
            config.identifier.unwrap_or_else(next_identifier),
            config.packet_size,
            config.timeout,
            config.bind,
        )?),
        ProbeProtocol::Udp => Box::new(UdpProbe::new(
            destination,
            config.effective_port(),
            config.timeout,
            config.udp_mode,
            config.bind,
        )),
        ProbeProtocol::Tcp => Box::new(TcpProbe::new(
            destination,
            config.effective_port(),
            config.timeout,
            config.bind,
        )),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_timeout() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::ConnectionRefused)));
    }

    #[test]
    fn test_remaining_saturates() {
        let sent_at = Instant::now();
        assert!(remaining(sent_at, Duration::from_secs(10)) <= Duration::from_secs(10));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(remaining(sent_at, Duration::from_millis(1)), Duration::ZERO);
    }

    #[test]
    fn test_build_strategy_per_protocol() {
        let dest = Ipv4Addr::LOCALHOST;
        for protocol in [ProbeProtocol::Icmp, ProbeProtocol::Udp, ProbeProtocol::Tcp] {
            let config = Config {
                protocol,
                ..Config::default()
            };
            let strategy = build_strategy(&config, dest).unwrap();
            assert_eq!(strategy.protocol(), protocol);
            assert_eq!(strategy.destination(), dest);
            assert_eq!(strategy.timeout(), config.timeout);
        }
    }

    #[test]
    fn test_build_strategy_rejects_huge_payload() {
        let config = Config {
            packet_size: MAX_PAYLOAD_SIZE + 1,
            ..Config::default()
        };
        let err = build_strategy(&config, Ipv4Addr::LOCALHOST).err().unwrap();
        assert!(matches!(err, ProbeError::PayloadTooLarge { .. }));
    }
}
