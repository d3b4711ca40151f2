use clap::{ArgAction, Parser};
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::ProbeProtocol;
use crate::probe::MAX_PAYLOAD_SIZE;

/// Measure reachability and round-trip time with ICMP, UDP or TCP probes
#[derive(Parser, Debug, Clone)]
#[command(name = "rping")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target hosts (IPv4 address or hostname)
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Number of probes to send (0 = until the deadline)
    #[arg(short = 'c', long = "count")]
    pub count: Option<u64>,

    /// Stop after probes have taken this many seconds in total
    #[arg(short = 'w', long = "deadline", allow_negative_numbers = true)]
    pub deadline: Option<f64>,

    /// Probe timeout in seconds [default: 1]
    #[arg(short = 'W', long = "timeout", allow_negative_numbers = true)]
    pub timeout: Option<f64>,

    /// Minimum seconds between probes [default: 1]
    #[arg(short = 'i', long = "interval", allow_negative_numbers = true)]
    pub interval: Option<f64>,

    /// ICMP payload size in bytes [default: 55]
    #[arg(short = 's', long = "size")]
    pub size: Option<usize>,

    /// Probe protocol (icmp, udp, tcp)
    #[arg(short = 'p', long = "protocol", default_value = "icmp")]
    pub protocol: String,

    /// Port for UDP/TCP probes [default: 31500 udp, 8888 tcp]
    #[arg(long = "port")]
    pub port: Option<u16>,

    /// Use a raw UDP socket (needs root, reports TTL)
    #[arg(long = "raw-udp")]
    pub raw_udp: bool,

    /// Local IPv4 address to send from
    #[arg(short = 'I', long = "bind")]
    pub bind: Option<Ipv4Addr>,

    /// ICMP identifier (default derived from the process id)
    #[arg(long = "id")]
    pub id: Option<u16>,

    /// Output JSON summary
    #[arg(long = "json")]
    pub json: bool,

    /// Output one CSV row per probe
    #[arg(long = "csv")]
    pub csv: bool,

    /// Only print the summary
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn deadline_duration(&self) -> Option<Duration> {
        self.deadline.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    pub fn interval_duration(&self) -> Option<Duration> {
        self.interval.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Machine-readable output replaces the per-probe lines
    pub fn is_batch_mode(&self) -> bool {
        self.json || self.csv
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        let Some(protocol) = ProbeProtocol::parse(&self.protocol) else {
            return Err(format!("Unknown protocol: {}. Use icmp, udp, or tcp", self.protocol));
        };

        if self.json && self.csv {
            return Err("Cannot combine --json and --csv".into());
        }

        if let Some(timeout) = self.timeout {
            if !(timeout > 0.0 && timeout.is_finite()) {
                return Err("Timeout must be positive".into());
            }
        }

        if let Some(interval) = self.interval {
            if !(interval >= 0.0 && interval.is_finite()) {
                return Err("Interval cannot be negative".into());
            }
        }

        if let Some(deadline) = self.deadline {
            if !(deadline > 0.0 && deadline.is_finite()) {
                return Err("Deadline must be positive".into());
            }
        }

        if self.count == Some(0) && self.deadline.is_none() {
            return Err("-c 0 requires a deadline (-w)".into());
        }

        if let Some(size) = self.size {
            if size > MAX_PAYLOAD_SIZE {
                return Err(format!("Packet size cannot exceed {}", MAX_PAYLOAD_SIZE));
            }
            if protocol != ProbeProtocol::Icmp {
                return Err("--size only applies to ICMP probes".into());
            }
        }

        if self.raw_udp && protocol != ProbeProtocol::Udp {
            return Err("--raw-udp requires -p udp".into());
        }

        if self.port.is_some() && protocol == ProbeProtocol::Icmp {
            return Err("--port only applies to UDP and TCP probes".into());
        }

        if self.port == Some(0) {
            return Err("Port must be between 1 and 65535".into());
        }

        Ok(())
    }
}
