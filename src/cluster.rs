//! Helpers for the cluster layer: SHA-1 ring positions for consistent
//! hashing, hex conversion, and local IP discovery. The storage core does
//! not use these; they are provided alongside it for node placement.

use crate::error::{Error, Result};

use sha1::{Digest, Sha1};
use std::net::{IpAddr, UdpSocket};

/// A position on the 160-bit consistent-hashing ring. Positions order as
/// big-endian unsigned integers, so byte-wise comparison is numeric
/// comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingPosition([u8; 20]);

/// Hashes a UTF-8 string to its position on the ring.
pub fn sha1(input: &str) -> RingPosition {
    RingPosition(Sha1::digest(input.as_bytes()).into())
}

impl RingPosition {
    /// The position as a 40-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 40-character hex string back into a ring position.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|err| Error::InvalidInput(format!("invalid hex digest: {err}")))?;
        let digest = <[u8; 20]>::try_from(bytes.as_slice()).map_err(|_| {
            Error::InvalidInput(format!("hex digest must be 40 characters, got {}", s.len()))
        })?;
        Ok(Self(digest))
    }
}

/// Discovers this machine's non-loopback IP address by asking the OS to
/// route a UDP socket towards a public address; no packet is ever sent.
/// Tries IPv4 first, then IPv6. Returns `None` when no route exists or
/// only loopback is available.
pub fn local_ip() -> Option<IpAddr> {
    route_ip(("0.0.0.0", 0), ("8.8.8.8", 80))
        .or_else(|| route_ip(("::", 0), ("2001:4860:4860::8888", 80)))
}

fn route_ip(bind: (&str, u16), probe: (&str, u16)) -> Option<IpAddr> {
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(probe).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        return None;
    }
    Some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_vectors() {
        assert_eq!(sha1("abc").to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(sha1("").to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn hex_round_trip() -> Result<()> {
        let position = sha1("node-1");
        assert_eq!(RingPosition::from_hex(&position.to_hex())?, position);
        Ok(())
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(RingPosition::from_hex("not hex at all").is_err());
        assert!(RingPosition::from_hex("abcd").is_err()); // too short
        assert!(RingPosition::from_hex(&"ab".repeat(21)).is_err()); // too long
    }

    #[test]
    fn positions_order_numerically() -> Result<()> {
        let low = RingPosition::from_hex(&format!("{:0>40}", "1"))?;
        let high = RingPosition::from_hex(&"ff".repeat(20))?;
        assert!(low < high);
        assert!(low > RingPosition::from_hex(&"00".repeat(20))?);
        Ok(())
    }

    #[test]
    fn local_ip_is_not_loopback() {
        if let Some(ip) = local_ip() {
            assert!(!ip.is_loopback());
        }
    }
}
