//! Deny records as written to the AutoBlock table.

use std::net::IpAddr;

use crate::canonical::canonicalize_addr;

/// Expiry value meaning the record never expires.
pub const NEVER_EXPIRES: i64 = 0;

/// One address ready to be upserted.
///
/// `address` is the unique key in the store, `canonical` the fixed-width
/// form and `expire_at` an absolute epoch second (or [`NEVER_EXPIRES`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressRecord {
    pub address: String,
    pub canonical: String,
    pub expire_at: i64,
}

impl AddressRecord {
    /// Build a record from a parsed address.
    pub fn from_addr(ip: IpAddr, expire_at: i64) -> Self {
        Self {
            address: ip.to_string(),
            canonical: canonicalize_addr(ip),
            expire_at,
        }
    }
}
