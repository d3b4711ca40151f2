//! One-call probing API.
//!
//! Each call resolves the host, runs a fresh session and hands back a plain
//! serializable result. `Ok(None)` means the probe went unanswered within the
//! timeout; a refused connection or any other socket failure is an `Err`.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::{Config, ProbeProtocol};
use crate::error::Result;
use crate::probe::{DEFAULT_TCP_PORT, Outcome, Reply, resolve};
use crate::state::{Session, Summary, Target};

/// Answer to a single ICMP echo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpPing {
    pub delay_ms: f64,
    pub ttl: Option<u8>,
    pub destination_ip: Ipv4Addr,
}

/// Answer to a single UDP or TCP probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortPing {
    pub delay_ms: f64,
    pub destination_ip: Ipv4Addr,
    pub local_port: Option<u16>,
    pub target_port: u16,
}

fn session_for(host: &str, config: Config) -> Result<Session> {
    let resolved = resolve(host)?;
    Session::new(Target::new(host, resolved), config)
}

/// Run exactly one attempt and return the reply, if any
fn single(host: &str, config: Config) -> Result<(Ipv4Addr, Option<Reply>)> {
    let mut session = session_for(host, config)?;
    let destination = session.target.resolved;

    match session.run_single()? {
        Outcome::Reply(reply) => Ok((destination, Some(reply))),
        Outcome::Timeout => Ok((destination, None)),
        Outcome::Error(e) => Err(e),
    }
}

/// Send one ICMP echo request (needs raw-socket privilege)
pub fn ping_icmp(host: &str, timeout: Duration, packet_size: usize) -> Result<Option<IcmpPing>> {
    let config = Config {
        protocol: ProbeProtocol::Icmp,
        timeout,
        packet_size,
        ..Config::default()
    };
    let (destination_ip, reply) = single(host, config)?;
    Ok(reply.map(|r| IcmpPing {
        delay_ms: r.delay_ms(),
        ttl: r.ttl,
        destination_ip,
    }))
}

fn ping_port(
    host: &str,
    protocol: ProbeProtocol,
    port: u16,
    timeout: Duration,
) -> Result<Option<PortPing>> {
    let config = Config {
        protocol,
        port: Some(port),
        timeout,
        ..Config::default()
    };
    let (destination_ip, reply) = single(host, config)?;
    Ok(reply.map(|r| PortPing {
        delay_ms: r.delay_ms(),
        destination_ip,
        local_port: r.local_port,
        target_port: port,
    }))
}

/// Send one UDP datagram and wait for anything to come back
pub fn ping_udp(host: &str, port: u16, timeout: Duration) -> Result<Option<PortPing>> {
    ping_port(host, ProbeProtocol::Udp, port, timeout)
}

/// Connect to `port`, send a short payload and wait for a response
pub fn ping_tcp(host: &str, port: u16, timeout: Duration) -> Result<Option<PortPing>> {
    ping_port(host, ProbeProtocol::Tcp, port, timeout)
}

/// [`ping_tcp`] against the default echo port
pub fn ping_tcp_default(host: &str, timeout: Duration) -> Result<Option<PortPing>> {
    ping_tcp(host, DEFAULT_TCP_PORT, timeout)
}

/// Run `count` probes with default pacing and return the aggregated summary
pub fn run(
    host: &str,
    protocol: ProbeProtocol,
    count: u64,
    timeout: Duration,
) -> Result<Summary> {
    run_with_config(
        host,
        Config {
            protocol,
            count: Some(count),
            timeout,
            ..Config::default()
        },
    )
}

/// Run a session with a fully specified configuration
pub fn run_with_config(host: &str, config: Config) -> Result<Summary> {
    let (count, deadline) = (config.count, config.deadline);
    let mut session = session_for(host, config)?;
    session.run(count, deadline)?;
    Ok(session.summary())
}
