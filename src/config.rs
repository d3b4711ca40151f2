use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::cli::Args;
use crate::prefs::Prefs;
use crate::probe::{DEFAULT_PACKET_SIZE, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, UdpMode};

/// Default probe timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Minimum spacing between probes of one session
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Probe protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    #[default]
    Icmp,
    Udp,
    Tcp,
}

impl ProbeProtocol {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "icmp" => Some(Self::Icmp),
            "udp" => Some(Self::Udp),
            "tcp" => Some(Self::Tcp),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Icmp => "icmp",
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        })
    }
}

/// Runtime configuration for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Probe protocol
    pub protocol: ProbeProtocol,
    /// Number of attempts (None = bounded by deadline only)
    pub count: Option<u64>,
    /// Stop once attempts have taken this long in total
    #[serde(default, with = "option_duration_serde")]
    pub deadline: Option<Duration>,
    /// Probe timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Minimum spacing between probes
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// ICMP payload size in bytes
    pub packet_size: usize,
    /// Port for UDP/TCP probes (None = protocol default)
    pub port: Option<u16>,
    /// Socket type for UDP probes
    pub udp_mode: UdpMode,
    /// ICMP identifier override
    pub identifier: Option<u16>,
    /// Local address to send from
    pub bind: Option<Ipv4Addr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProbeProtocol::Icmp,
            count: None,
            deadline: None,
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            packet_size: DEFAULT_PACKET_SIZE,
            port: None,
            udp_mode: UdpMode::Datagram,
            identifier: None,
            bind: None,
        }
    }
}

impl Config {
    /// Port actually probed for UDP/TCP
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.protocol {
            ProbeProtocol::Tcp => DEFAULT_TCP_PORT,
            ProbeProtocol::Udp | ProbeProtocol::Icmp => DEFAULT_UDP_PORT,
        })
    }

    /// Merge CLI flags over saved preferences over built-in defaults
    pub fn from_args(args: &Args, prefs: &Prefs) -> Self {
        let defaults = Self::default();
        // Validated by Args::validate
        let protocol = ProbeProtocol::parse(&args.protocol).unwrap_or_default();

        let port = args.port.or(match protocol {
            ProbeProtocol::Udp => prefs.udp_port,
            ProbeProtocol::Tcp => prefs.tcp_port,
            ProbeProtocol::Icmp => None,
        });

        Self {
            protocol,
            count: args.count.filter(|&c| c > 0),
            deadline: args.deadline_duration(),
            timeout: args
                .timeout_duration()
                .or(prefs.timeout_duration())
                .unwrap_or(defaults.timeout),
            interval: args
                .interval_duration()
                .or(prefs.interval_duration())
                .unwrap_or(defaults.interval),
            packet_size: args.size.or(prefs.packet_size).unwrap_or(defaults.packet_size),
            port,
            udp_mode: if args.raw_udp { UdpMode::Raw } else { UdpMode::Datagram },
            identifier: args.id,
            bind: args.bind,
        }
    }
}

/// Serde helper for Duration (fractional seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
