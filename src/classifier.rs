//! Line classification for block-lists.
//!
//! Every whitespace-separated token of every line is a candidate: lines
//! starting with `#`, other `#` tokens and blanks are ignored, `/`-bearing tokens are networks, anything else must
//! be a single address. Nothing is dropped silently; a token that fails to
//! parse is recorded as invalid.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::canonical::canonicalize_addr;
use crate::cidr::{admit, sort_admitted, Admission, CidrEntry};
use crate::record::AddressRecord;

/// Pre-check applied before a token is parsed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenFilter {
    /// Classify every non-comment token (IPv6 literals included)
    #[default]
    Any,
    /// Skip tokens without a `.` (legacy behavior, ignores IPv6 literals)
    Dotted,
}

/// What happened to a single token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenClass {
    /// Blank, comment or filtered out
    Ignored,
    Single(AddressRecord),
    Admitted(CidrEntry),
    Rejected(CidrEntry),
    Invalid,
}

/// Running counters for one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationTally {
    /// Every single address token plus every parsed network's size
    pub total_potential: u128,
    /// Admitted network tokens, duplicates included
    pub admitted_tokens: usize,
    /// Addresses covered by the unique admitted networks
    pub admitted_addresses: u128,
    pub rejected_networks: usize,
    pub rejected_addresses: u128,
    /// Unique invalid tokens
    pub invalid_tokens: usize,
}

/// Output of [`Classifier::classify`].
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Unique single addresses keyed by raw text
    pub singles: BTreeMap<String, AddressRecord>,
    /// Admitted networks, smallest first
    pub networks: Vec<CidrEntry>,
    pub invalid: BTreeSet<String>,
    pub tally: ClassificationTally,
}

impl Classification {
    /// Unique single addresses as a list ready for upsert.
    pub fn single_records(&self) -> Vec<AddressRecord> {
        self.singles.values().cloned().collect()
    }

    /// Singles plus every address of the admitted networks.
    pub fn total_to_apply(&self) -> u128 {
        (self.singles.len() as u128).saturating_add(self.tally.admitted_addresses)
    }

    pub fn is_empty(&self) -> bool {
        self.singles.is_empty() && self.networks.is_empty()
    }
}

/// Default admission threshold for IPv6 networks (256 addresses).
pub const DEFAULT_MIN_CIDR_PREFIX_V6: u8 = 120;

/// Classifies tokens against a fixed admission threshold and expiry.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    pub min_cidr_prefix: u8,
    /// Threshold for IPv6 networks; an IPv6 /24 would be 2^104 addresses
    pub min_cidr_prefix_v6: u8,
    pub expire_at: i64,
    pub filter: TokenFilter,
}

impl Classifier {
    pub fn new(min_cidr_prefix: u8, expire_at: i64, filter: TokenFilter) -> Self {
        Self {
            min_cidr_prefix,
            min_cidr_prefix_v6: DEFAULT_MIN_CIDR_PREFIX_V6,
            expire_at,
            filter,
        }
    }

    pub fn with_min_prefix_v6(mut self, min_cidr_prefix_v6: u8) -> Self {
        self.min_cidr_prefix_v6 = min_cidr_prefix_v6;
        self
    }

    fn threshold(&self, entry: &CidrEntry) -> u8 {
        if entry.is_ipv6 {
            self.min_cidr_prefix_v6
        } else {
            self.min_cidr_prefix
        }
    }

    /// Classify one token.
    pub fn classify_token(&self, token: &str) -> TokenClass {
        if token.is_empty() || token.starts_with('#') {
            return TokenClass::Ignored;
        }
        if self.filter == TokenFilter::Dotted && !token.contains('.') {
            return TokenClass::Ignored;
        }

        if token.contains('/') {
            return match CidrEntry::parse(token) {
                Ok(entry) => match admit(&entry, self.threshold(&entry)) {
                    Admission::Admitted => TokenClass::Admitted(entry),
                    Admission::Rejected => TokenClass::Rejected(entry),
                },
                Err(_) => TokenClass::Invalid,
            };
        }

        match token.parse::<IpAddr>() {
            Ok(ip) => TokenClass::Single(AddressRecord {
                address: token.to_string(),
                canonical: canonicalize_addr(ip),
                expire_at: self.expire_at,
            }),
            Err(_) => TokenClass::Invalid,
        }
    }

    /// Classify every token of every line.
    pub fn classify<I, S>(&self, lines: I) -> Classification
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Classification::default();
        let mut admitted: BTreeMap<String, CidrEntry> = BTreeMap::new();

        for line in lines {
            let line = line.as_ref();
            if is_comment_line(line) {
                continue;
            }
            // Elsewhere a `#` token only skips itself
            for token in line.split_whitespace() {
                match self.classify_token(token) {
                    TokenClass::Ignored => {}
                    TokenClass::Single(record) => {
                        out.tally.total_potential = out.tally.total_potential.saturating_add(1);
                        out.singles.insert(record.address.clone(), record);
                    }
                    TokenClass::Admitted(entry) => {
                        let tally = &mut out.tally;
                        tally.total_potential =
                            tally.total_potential.saturating_add(entry.address_count);
                        tally.admitted_tokens += 1;
                        if !admitted.contains_key(&entry.network) {
                            tally.admitted_addresses =
                                tally.admitted_addresses.saturating_add(entry.address_count);
                            admitted.insert(entry.network.clone(), entry);
                        }
                    }
                    TokenClass::Rejected(entry) => {
                        let tally = &mut out.tally;
                        tally.total_potential =
                            tally.total_potential.saturating_add(entry.address_count);
                        tally.rejected_networks += 1;
                        tally.rejected_addresses =
                            tally.rejected_addresses.saturating_add(entry.address_count);
                    }
                    TokenClass::Invalid => {
                        out.invalid.insert(token.to_string());
                    }
                }
            }
        }

        out.tally.invalid_tokens = out.invalid.len();
        out.networks = admitted.into_values().collect();
        sort_admitted(&mut out.networks);
        out
    }
}

/// A line whose first token starts with `#`.
fn is_comment_line(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|first| first.starts_with('#'))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn token_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
                .prop_map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d)),
            (any::<u32>(), 0u8..=32).prop_map(|(addr, prefix)| {
                ipnet::Ipv4Net::new(addr.into(), prefix).unwrap().trunc().to_string()
            }),
            Just("# comment".to_string()),
            "[a-z]{1,8}",
        ]
    }

    proptest! {
        /// Admitted + rejected equals every parsed network token
        #[test]
        fn prop_network_tokens_accounted(
            tokens in prop::collection::vec(token_strategy(), 0..60),
            min_prefix in 0u8..=32,
        ) {
            let classifier = Classifier::new(min_prefix, 0, TokenFilter::Any);
            let parsed_networks = tokens
                .iter()
                .filter(|t| t.contains('/') && CidrEntry::parse(t).is_ok())
                .count();
            let result = classifier.classify(tokens.iter());
            prop_assert_eq!(
                result.tally.admitted_tokens + result.tally.rejected_networks,
                parsed_networks
            );
            for entry in &result.networks {
                prop_assert!(entry.prefix_len >= min_prefix);
            }
        }

        /// Same input, same output
        #[test]
        fn prop_classification_deterministic(tokens in prop::collection::vec(token_strategy(), 0..40)) {
            let classifier = Classifier::new(24, 0, TokenFilter::Any);
            let a = classifier.classify(tokens.iter());
            let b = classifier.classify(tokens.iter());
            prop_assert_eq!(a.singles, b.singles);
            prop_assert_eq!(a.networks, b.networks);
            prop_assert_eq!(a.tally, b.tally);
        }
    }
}
