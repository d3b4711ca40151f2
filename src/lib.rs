//! ICMP, UDP and TCP reachability probes with round-trip statistics.
//!
//! [`ping`] holds the one-call API; [`state::Session`] drives repeated probes.

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod ping;
pub mod prefs;
pub mod probe;
pub mod state;

pub use error::{ProbeError, Result};
pub use ping::{IcmpPing, PortPing, ping_icmp, ping_tcp, ping_udp, run};
