//! CIDR address ranges: parsing, canonical form, containment, host sampling.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;

/// Error type for CIDR parsing. Callers harvesting SPF tokens skip the
/// offending token and keep going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrError {
    #[error("invalid IPv4 address: {0}")]
    InvalidV4(String),
    #[error("invalid IPv6 address: {0}")]
    InvalidV6(String),
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),
    #[error("IPv4 prefix > 32")]
    V4PrefixTooLong,
    #[error("IPv6 prefix > 128")]
    V6PrefixTooLong,
}

/// An IPv4 or IPv6 network prefix. Host bits are masked off at construction,
/// so two spellings of the same network compare (and hash) equal and the
/// `Display` form is canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cidr {
    V4 { network: Ipv4Addr, prefix: u8 },
    V6 { network: Ipv6Addr, prefix: u8 },
}

impl Cidr {
    /// Build an IPv4 range, masking host bits. prefix must be <= 32.
    pub fn v4(addr: Ipv4Addr, prefix: u8) -> Result<Self, CidrError> {
        if prefix > 32 {
            return Err(CidrError::V4PrefixTooLong);
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask4(prefix));
        Ok(Cidr::V4 { network, prefix })
    }

    /// Build an IPv6 range, masking host bits. prefix must be <= 128.
    pub fn v6(addr: Ipv6Addr, prefix: u8) -> Result<Self, CidrError> {
        if prefix > 128 {
            return Err(CidrError::V6PrefixTooLong);
        }
        let network = Ipv6Addr::from(u128::from(addr) & mask6(prefix));
        Ok(Cidr::V6 { network, prefix })
    }

    /// Parse the argument of an `ip4:` mechanism: `addr` or `addr/prefix`.
    /// A bare address defaults to /32.
    pub fn parse_v4(s: &str) -> Result<Self, CidrError> {
        let (addr_str, prefix) = split_prefix(s, 32)?;
        let addr: Ipv4Addr = addr_str
            .parse()
            .map_err(|_| CidrError::InvalidV4(addr_str.to_string()))?;
        Self::v4(addr, prefix)
    }

    /// Parse the argument of an `ip6:` mechanism: `addr` or `addr/prefix`.
    /// A bare address defaults to /128.
    pub fn parse_v6(s: &str) -> Result<Self, CidrError> {
        let (addr_str, prefix) = split_prefix(s, 128)?;
        let addr: Ipv6Addr = addr_str
            .parse()
            .map_err(|_| CidrError::InvalidV6(addr_str.to_string()))?;
        Self::v6(addr, prefix)
    }

    pub fn prefix(&self) -> u8 {
        match self {
            Cidr::V4 { prefix, .. } | Cidr::V6 { prefix, .. } => *prefix,
        }
    }

    /// Check whether an address falls within this range. Mixed address
    /// families never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (Cidr::V4 { network, prefix }, IpAddr::V4(ip)) => {
                let mask = mask4(*prefix);
                (u32::from(ip) & mask) == (u32::from(*network) & mask)
            }
            (Cidr::V6 { network, prefix }, IpAddr::V6(ip)) => {
                let mask = mask6(*prefix);
                (u128::from(ip) & mask) == (u128::from(*network) & mask)
            }
            _ => false,
        }
    }

    /// Draw one address uniformly from the range's usable host space.
    ///
    /// IPv4 ranges wider than /31 exclude the network and broadcast
    /// addresses; /31 and /32 yield the network address itself. IPv6 offsets
    /// are capped at 2^32 to keep the draw cheap, skipping the network
    /// address for variety.
    pub fn sample_host(&self, rng: &mut impl Rng) -> IpAddr {
        match self {
            Cidr::V4 { network, prefix } => {
                let host_bits = 32 - prefix;
                let size = 1u64 << host_bits;
                if size <= 2 {
                    return IpAddr::V4(*network);
                }
                let idx = rng.gen_range(1..=size - 2);
                IpAddr::V4(Ipv4Addr::from((u64::from(u32::from(*network)) + idx) as u32))
            }
            Cidr::V6 { network, prefix } => {
                let host_bits = 128 - prefix;
                if host_bits == 0 {
                    return IpAddr::V6(*network);
                }
                let cap = if host_bits > 32 {
                    1u128 << 32
                } else {
                    (1u128 << host_bits) - 1
                };
                let offset = rng.gen_range(1..=cap);
                IpAddr::V6(Ipv6Addr::from(u128::from(*network) + offset))
            }
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cidr::V4 { network, prefix } => write!(f, "{network}/{prefix}"),
            Cidr::V6 { network, prefix } => write!(f, "{network}/{prefix}"),
        }
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    /// Family is detected from the address text: a colon means IPv6.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr_part = s.split('/').next().unwrap_or(s);
        if addr_part.contains(':') {
            Cidr::parse_v6(s)
        } else {
            Cidr::parse_v4(s)
        }
    }
}

fn split_prefix(s: &str, default: u8) -> Result<(&str, u8), CidrError> {
    match s.split_once('/') {
        Some((addr, p)) => {
            let prefix: u8 = p
                .parse()
                .map_err(|_| CidrError::InvalidPrefix(p.to_string()))?;
            Ok((addr, prefix))
        }
        None => Ok((s, default)),
    }
}

fn mask4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        !0u32 << (32 - prefix)
    }
}

fn mask6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        !0u128 << (128 - prefix)
    }
}
