//! FidoNet addresses: `zone:net/node[.point]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A FidoNet address, optionally carrying a point number.
///
/// Comparison for "does this address appear in a remote's address list"
/// (spec invariant 4 / §4.5 step 4) is case-insensitive and point-aware:
/// `2:5001/100` and `2:5001/100.0` are considered the same address, since
/// mailers frequently omit the implicit `.0` point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    pub point: u16,
}

impl Address {
    #[must_use]
    pub fn new(zone: u16, net: u16, node: u16, point: u16) -> Self {
        Self {
            zone,
            net,
            node,
            point,
        }
    }

    /// Point-aware equality: a missing point is equivalent to point 0.
    #[must_use]
    pub fn matches(&self, other: &Address) -> bool {
        self.zone == other.zone && self.net == other.net && self.node == other.node
            && self.point == other.point
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.point == 0 {
            write!(f, "{}:{}/{}", self.zone, self.net, self.node)
        } else {
            write!(f, "{}:{}/{}.{}", self.zone, self.net, self.node, self.point)
        }
    }
}

/// Parse error for [`Address::from_str`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(pub String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid FidoNet address: {}", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (zone_str, rest) = s
            .split_once(':')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        let (net_str, rest) = rest
            .split_once('/')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        let (node_str, point_str) = match rest.split_once('.') {
            Some((n, p)) => (n, Some(p)),
            None => (rest, None),
        };

        let zone = zone_str
            .parse()
            .map_err(|_| AddressParseError(s.to_string()))?;
        let net = net_str
            .parse()
            .map_err(|_| AddressParseError(s.to_string()))?;
        let node = node_str
            .parse()
            .map_err(|_| AddressParseError(s.to_string()))?;
        let point = match point_str {
            Some(p) => p.parse().map_err(|_| AddressParseError(s.to_string()))?,
            None => 0,
        };

        Ok(Address {
            zone,
            net,
            node,
            point,
        })
    }
}

/// Does `haystack` contain an address matching `needle` (case-insensitive by
/// construction — addresses have no letters, but the parsing this operates
/// on upstream may come from mixed-case EMSI text; callers should normalize
/// before parsing into `Address`es, which this function assumes is done)?
#[must_use]
pub fn address_list_contains(haystack: &[Address], needle: &Address) -> bool {
    haystack.iter().any(|a| a.matches(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_address() {
        let a: Address = "2:5001/100".parse().unwrap();
        assert_eq!(a, Address::new(2, 5001, 100, 0));
        assert_eq!(a.to_string(), "2:5001/100");
    }

    #[test]
    fn parses_point_address() {
        let a: Address = "2:5001/100.5".parse().unwrap();
        assert_eq!(a, Address::new(2, 5001, 100, 5));
        assert_eq!(a.to_string(), "2:5001/100.5");
    }

    #[test]
    fn rejects_malformed() {
        assert!("garbage".parse::<Address>().is_err());
        assert!("2:5001".parse::<Address>().is_err());
    }

    #[test]
    fn point_zero_matches_implicit_point() {
        let a: Address = "2:5001/100".parse().unwrap();
        let b: Address = "2:5001/100.0".parse().unwrap();
        assert!(a.matches(&b));
    }

    #[test]
    fn address_list_contains_finds_match() {
        let list: Vec<Address> = vec!["1:1/1".parse().unwrap(), "2:5001/100".parse().unwrap()];
        let needle: Address = "2:5001/100".parse().unwrap();
        assert!(address_list_contains(&list, &needle));
        let absent: Address = "3:1/1".parse().unwrap();
        assert!(!address_list_contains(&list, &absent));
    }
}
