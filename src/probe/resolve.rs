use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use crate::error::{ProbeError, Result};

/// Check for four dot-separated decimal components, each in [0, 255]
pub fn is_valid_dotted_quad(addr: &str) -> bool {
    parse_dotted_quad(addr).is_some()
}

fn parse_dotted_quad(addr: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = addr.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // Leading zeros are fine ("010" is 10); overlong digit runs are not
        let value: u32 = part.trim_start_matches('0').parse().unwrap_or(0);
        if part.trim_start_matches('0').len() > 3 || value > 255 {
            return None;
        }
        *octet = value as u8;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

/// Anything made only of digits and dots is meant as a literal address
fn looks_numeric(host: &str) -> bool {
    !host.is_empty() && host.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

/// Resolve a user-supplied host to an IPv4 address.
///
/// Dotted quads are returned without touching the resolver. A numeric string
/// that is not a valid dotted quad fails immediately instead of being handed to
/// name resolution.
pub fn resolve(host: &str) -> Result<Ipv4Addr> {
    let host = host.trim();

    if let Some(ip) = parse_dotted_quad(host) {
        return Ok(ip);
    }

    if looks_numeric(host) {
        return Err(ProbeError::Resolution {
            host: host.to_string(),
            reason: "invalid dotted-quad address".to_string(),
        });
    }

    let addrs = (host, 0).to_socket_addrs().map_err(|e| ProbeError::Resolution {
        host: host.to_string(),
        reason: e.to_string(),
    })?;

    let resolved = addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| ProbeError::Resolution {
            host: host.to_string(),
            reason: "no IPv4 address found".to_string(),
        })?;

    tracing::debug!(%host, ip = %resolved, "resolved host");
    Ok(resolved)
}
