//! ICMP echo encoding and IPv4/ICMP header decoding
//!
//! Replies read from a raw IPv4 socket start with the 20-byte IPv4 header,
//! followed by the 8-byte ICMP header and the echoed payload.

use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpTypes};
use std::net::Ipv4Addr;

use crate::error::{ProbeError, Result};
use crate::probe::checksum::checksum;

/// IPv4 header size (no options)
pub const IPV4_HEADER_SIZE: usize = 20;
/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// IPv4 + ICMP headers at the front of a raw reply
pub const REPLY_HEADER_SIZE: usize = IPV4_HEADER_SIZE + ICMP_HEADER_SIZE;
/// Default payload size
pub const DEFAULT_PACKET_SIZE: usize = 55;
/// Largest payload that still fits the 16-bit IPv4 total length
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - REPLY_HEADER_SIZE;
/// First byte of the payload fill pattern
const PAYLOAD_PATTERN_START: usize = 0x42;

/// ICMP echo reply type
pub const ICMP_ECHO_REPLY: u8 = 0;
/// ICMP echo request type
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// Decoded IPv4 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// First byte: version and header length nibbles
    pub version: u8,
    /// Type-of-service byte
    pub tos: u8,
    pub total_length: u16,
    pub id: u16,
    /// Flags and fragment offset
    pub flags: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

/// Decoded ICMP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

/// A raw ICMP reply split into its headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpReply {
    pub ip: Ipv4Header,
    pub icmp: IcmpHeader,
    /// Bytes following both headers
    pub payload_size: usize,
}

/// Build a payload of `size` bytes: 0x42, 0x43, ... wrapping at 0xFF
pub fn build_payload(size: usize) -> Vec<u8> {
    (PAYLOAD_PATTERN_START..PAYLOAD_PATTERN_START + size)
        .map(|i| (i & 0xFF) as u8)
        .collect()
}

/// Build an ICMP echo request: header with a zero checksum, checksum over
/// header + payload, then the header re-packed with the real value.
pub fn encode_icmp_echo(identifier: u16, sequence: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProbeError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload.len()];
    let len = buffer.len();
    let mut packet =
        MutableEchoRequestPacket::new(&mut buffer).ok_or(ProbeError::MalformedPacket {
            len,
            needed: ICMP_HEADER_SIZE,
        })?;

    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_checksum(0);
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet.set_payload(payload);

    let cksum = checksum(&buffer);
    buffer[2..4].copy_from_slice(&cksum.to_be_bytes());

    Ok(buffer)
}

fn need(bytes: &[u8], needed: usize) -> Result<()> {
    if bytes.len() < needed {
        return Err(ProbeError::MalformedPacket {
            len: bytes.len(),
            needed,
        });
    }
    Ok(())
}

fn be16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn addr(bytes: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3])
}

/// Decode the fixed 20-byte IPv4 header at the start of `bytes`
pub fn decode_ipv4_header(bytes: &[u8]) -> Result<Ipv4Header> {
    need(bytes, IPV4_HEADER_SIZE)?;
    Ok(Ipv4Header {
        version: bytes[0],
        tos: bytes[1],
        total_length: be16(bytes, 2),
        id: be16(bytes, 4),
        flags: be16(bytes, 6),
        ttl: bytes[8],
        protocol: bytes[9],
        checksum: be16(bytes, 10),
        source: addr(bytes, 12),
        destination: addr(bytes, 16),
    })
}

/// Decode the 8-byte ICMP header at the start of `bytes`
pub fn decode_icmp_header(bytes: &[u8]) -> Result<IcmpHeader> {
    need(bytes, ICMP_HEADER_SIZE)?;
    Ok(IcmpHeader {
        icmp_type: bytes[0],
        code: bytes[1],
        checksum: be16(bytes, 2),
        identifier: be16(bytes, 4),
        sequence: be16(bytes, 6),
    })
}

/// Decode a full raw reply (IPv4 header, then ICMP header)
pub fn decode_reply(bytes: &[u8]) -> Result<IcmpReply> {
    need(bytes, REPLY_HEADER_SIZE)?;
    Ok(IcmpReply {
        ip: decode_ipv4_header(&bytes[..IPV4_HEADER_SIZE])?,
        icmp: decode_icmp_header(&bytes[IPV4_HEADER_SIZE..REPLY_HEADER_SIZE])?,
        payload_size: bytes.len() - REPLY_HEADER_SIZE,
    })
}
