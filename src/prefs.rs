//! Saved defaults.
//!
//! Read from ~/.config/rping/config.toml. Every field is optional; command-line
//! flags win over anything set here.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User preferences
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Prefs {
    /// Probe timeout in seconds
    pub timeout: Option<f64>,
    /// Probe interval in seconds
    pub interval: Option<f64>,
    /// ICMP payload size in bytes
    pub packet_size: Option<usize>,
    /// Default port for UDP probes
    pub udp_port: Option<u16>,
    /// Default port for TCP probes
    pub tcp_port: Option<u16>,
    /// Log filter used when RUST_LOG is unset (e.g. "info", "rping=debug")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Prefs {
    /// Get config file path: ~/.config/rping/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rping").join("config.toml"))
    }

    /// Load preferences from the default path; a missing file yields defaults
    pub fn load() -> anyhow::Result<Self> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load preferences from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        positive_secs(self.timeout)
    }

    pub fn interval_duration(&self) -> Option<Duration> {
        positive_secs(self.interval)
    }
}

fn positive_secs(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefs_default() {
        let prefs = Prefs::default();
        assert!(prefs.timeout.is_none());
        assert!(prefs.log_level.is_none());
        assert!(prefs.timeout_duration().is_none());
    }

    #[test]
    fn test_prefs_parse() {
        let prefs: Prefs = toml::from_str(
            "timeout = 2.5\ninterval = 0.2\npacket_size = 64\ntcp_port = 443\nlog_level = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(prefs.timeout_duration(), Some(Duration::from_millis(2500)));
        assert_eq!(prefs.interval_duration(), Some(Duration::from_millis(200)));
        assert_eq!(prefs.packet_size, Some(64));
        assert_eq!(prefs.tcp_port, Some(443));
        assert_eq!(prefs.udp_port, None);
        assert_eq!(prefs.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_prefs_reject_unknown_keys() {
        assert!(toml::from_str::<Prefs>("timout = 1.0\n").is_err());
    }

    #[test]
    fn test_non_positive_durations_ignored() {
        let prefs = Prefs {
            timeout: Some(0.0),
            interval: Some(-1.0),
            ..Prefs::default()
        };
        assert!(prefs.timeout_duration().is_none());
        assert!(prefs.interval_duration().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("rping-prefs-{}.toml", std::process::id()));
        fs::write(&path, "udp_port = 9999\n").unwrap();
        let prefs = Prefs::load_from(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(prefs.udp_port, Some(9999));

        assert!(Prefs::load_from(&path).is_err());
    }

    #[test]
    fn test_log_level_omitted_when_none() {
        let toml_str = toml::to_string_pretty(&Prefs::default()).unwrap();
        assert!(!toml_str.contains("log_level"));
    }
}
