//! CIDR admission control and expansion.
//!
//! Networks are only expanded into individual records when they are small
//! enough: a network is admitted iff its prefix length is at least the
//! configured minimum. Admitted networks are processed smallest first so the
//! cheap expansions land before the expensive ones.

use ipnet::{IpAddrRange, IpNet, Ipv4AddrRange, Ipv6AddrRange};
use std::cmp::Reverse;
use tracing::warn;

use crate::error::{AutoBlockError, Result};
use crate::record::AddressRecord;

/// A parsed network token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrEntry {
    /// The token as it appeared in the list
    pub network: String,
    pub prefix_len: u8,
    /// Number of addresses covered (saturates at `u128::MAX`)
    pub address_count: u128,
    pub is_ipv6: bool,
}

impl CidrEntry {
    /// Parse a `/`-bearing token into an entry.
    pub fn parse(token: &str) -> Result<Self> {
        let net = parse_network(token)?;
        Ok(Self {
            network: token.to_string(),
            prefix_len: net.prefix_len(),
            address_count: address_count(&net),
            is_ipv6: matches!(net, IpNet::V6(_)),
        })
    }

    /// Address part of the token, used as the ordering tie-breaker.
    pub fn base_address(&self) -> &str {
        self.network
            .split_once('/')
            .map(|(addr, _)| addr)
            .unwrap_or(&self.network)
    }
}

/// Outcome of the size check for one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

/// Decide whether a network is small enough to expand.
pub fn admit(entry: &CidrEntry, min_prefix: u8) -> Admission {
    if entry.prefix_len >= min_prefix {
        Admission::Admitted
    } else {
        Admission::Rejected
    }
}

/// Parse a network token strictly: host bits must be zero.
///
/// `1.10.16.0/20` is accepted, `1.10.16.5/20` is not.
pub fn parse_network(token: &str) -> Result<IpNet> {
    let net: IpNet = token
        .parse()
        .map_err(|_| AutoBlockError::InvalidNetwork(token.to_string()))?;
    if net.trunc() != net {
        return Err(AutoBlockError::InvalidNetwork(token.to_string()));
    }
    Ok(net)
}

/// Number of addresses in a network.
///
/// Uses saturating arithmetic: `::/0` would overflow u128.
pub fn address_count(net: &IpNet) -> u128 {
    let shift = u32::from(net.max_prefix_len() - net.prefix_len());
    if shift >= 128 {
        u128::MAX
    } else {
        1u128 << shift
    }
}

/// Order admitted networks: descending prefix length, then base address.
pub fn sort_admitted(entries: &mut [CidrEntry]) {
    entries.sort_by(|a, b| {
        (Reverse(a.prefix_len), a.base_address()).cmp(&(Reverse(b.prefix_len), b.base_address()))
    });
}

/// Lazy enumeration of every address of a network, network and broadcast
/// addresses included.
#[derive(Debug, Clone)]
pub struct Expansion {
    range: Option<IpAddrRange>,
    expire_at: i64,
}

impl Iterator for Expansion {
    type Item = AddressRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let ip = self.range.as_mut()?.next()?;
        Some(AddressRecord::from_addr(ip, self.expire_at))
    }
}

/// Expand a network token into address records.
///
/// An unparsable token is logged and yields nothing; it does not abort the
/// caller.
pub fn expand(network: &str, expire_at: i64) -> Expansion {
    let range = match parse_network(network) {
        Ok(IpNet::V4(net)) => Some(IpAddrRange::from(Ipv4AddrRange::new(
            net.network(),
            net.broadcast(),
        ))),
        Ok(IpNet::V6(net)) => Some(IpAddrRange::from(Ipv6AddrRange::new(
            net.network(),
            net.broadcast(),
        ))),
        Err(e) => {
            warn!("Error expanding CIDR {}: {}", network, e);
            None
        }
    };
    Expansion { range, expire_at }
}
