//! Canonical storage form for IP addresses.
//!
//! The AutoBlock database keeps a second, fixed-width column next to the raw
//! address so both families sort and compare uniformly:
//!
//! - IPv4 `a.b.c.d` becomes the IPv4-mapped IPv6 form
//!   `0000:0000:0000:0000:0000:FFFF:AABB:CCDD`
//! - IPv6 is fully exploded, eight groups of four upper-case hex digits

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{AutoBlockError, Result};

/// Prefix shared by every canonical IPv4 address.
pub const IPV4_MAPPED_PREFIX: &str = "0000:0000:0000:0000:0000:FFFF:";

/// Length of every canonical form (8 groups of 4 digits + 7 colons).
pub const CANONICAL_LEN: usize = 39;

/// Canonicalize a textual IP address.
///
/// # Examples
/// ```
/// use autoblockip::canonical::canonicalize;
/// assert_eq!(
///     canonicalize("83.222.191.62").unwrap(),
///     "0000:0000:0000:0000:0000:FFFF:53DE:BF3E"
/// );
/// assert!(canonicalize("not-an-ip").is_err());
/// ```
pub fn canonicalize(address: &str) -> Result<String> {
    let ip: IpAddr = address
        .parse()
        .map_err(|_| AutoBlockError::InvalidAddress(address.to_string()))?;
    Ok(canonicalize_addr(ip))
}

/// Canonicalize an already parsed address.
pub fn canonicalize_addr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => canonicalize_v4(v4),
        IpAddr::V6(v6) => canonicalize_v6(v6),
    }
}

fn canonicalize_v4(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{}{:02X}{:02X}:{:02X}{:02X}", IPV4_MAPPED_PREFIX, a, b, c, d)
}

fn canonicalize_v6(ip: Ipv6Addr) -> String {
    ip.segments()
        .iter()
        .map(|segment| format!("{:04X}", segment))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_ipv4() {
        assert_eq!(
            canonicalize("83.222.191.62").unwrap(),
            "0000:0000:0000:0000:0000:FFFF:53DE:BF3E"
        );
        assert_eq!(
            canonicalize("0.0.0.0").unwrap(),
            "0000:0000:0000:0000:0000:FFFF:0000:0000"
        );
        assert_eq!(
            canonicalize("255.255.255.255").unwrap(),
            "0000:0000:0000:0000:0000:FFFF:FFFF:FFFF"
        );
    }

    #[test]
    fn test_canonicalize_ipv6() {
        assert_eq!(
            canonicalize("2001:db8::1").unwrap(),
            "2001:0DB8:0000:0000:0000:0000:0000:0001"
        );
        assert_eq!(
            canonicalize("::").unwrap(),
            "0000:0000:0000:0000:0000:0000:0000:0000"
        );
    }

    #[test]
    fn test_canonicalize_mapped_ipv6_literal() {
        // A v4-mapped v6 literal stays in the v6 family
        assert_eq!(
            canonicalize("::ffff:1.2.3.4").unwrap(),
            "0000:0000:0000:0000:0000:FFFF:0102:0304"
        );
    }

    #[test]
    fn test_canonicalize_invalid() {
        for bad in ["", "garbage", "1.2.3", "1.2.3.4.5", "256.0.0.1", "01.2.3.4", "1.2.3.4/32", "::g"] {
            assert!(
                matches!(canonicalize(bad), Err(AutoBlockError::InvalidAddress(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_ipv4_ordering_matches_numeric_ordering() {
        let low = canonicalize("9.255.255.255").unwrap();
        let high = canonicalize("10.0.0.0").unwrap();
        assert!(low < high);
    }
}
