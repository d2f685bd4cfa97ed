//! Internet number resources.
//!
//! The arithmetic is done by the block types of the `rpki` crate. This
//! module adds a single comma separated text notation for all three
//! resource types and the prefix types used for BGP announcements.

use std::{cmp, error, fmt};
use std::str::FromStr;
use lazy_static::lazy_static;
use rpki::repository::resources::{
    Addr, AddressRange, AsBlock, AsBlocks, AsBlocksBuilder, Asn, IpBlock,
    IpBlocksBuilder, Ipv4Blocks, Ipv6Blocks, Prefix,
};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};


//------------ Private use resources ----------------------------------------

lazy_static! {
    /// AS numbers and addresses reserved for private use.
    pub static ref PRIVATE_USE: ResourceSet = ResourceSet::from_strs(
        "AS64512-AS65534, AS4200000000-AS4294967294",
        "10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16",
        "fc00::/7",
    ).unwrap_or_default();

    /// AS numbers reserved for private use.
    pub static ref PRIVATE_USE_ASNS: ResourceSet = ResourceSet::from_strs(
        "AS64512-AS65534, AS4200000000-AS4294967294", "", "",
    ).unwrap_or_default();
}


/// Parses an AS number in either `AS64496` or `64496` notation.
pub fn parse_asn(s: &str) -> Result<Asn, ResourceSetError> {
    let s = s.trim();
    Asn::from_str(s).map_err(|_| ResourceSetError::Asn(s.to_string()))
}


//------------ TypedPrefix ---------------------------------------------------

/// A prefix that knows which family it belongs to.
///
/// This type serializes into the string representation of the prefix.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub enum TypedPrefix {
    /// An IPv4 prefix.
    V4(Ipv4Prefix),

    /// An IPv6 prefix.
    V6(Ipv6Prefix),
}

impl TypedPrefix {
    /// Converts the types prefix into an untyped prefix.
    pub fn prefix(self) -> Prefix {
        match self {
            Self::V4(prefix) => prefix.into(),
            Self::V6(prefix) => prefix.into(),
        }
    }

    /// Returns the prefix length of the prefix.
    pub fn addr_len(&self) -> u8 {
        self.prefix().addr_len()
    }
}


//--- From and FromStr

impl From<Ipv4Prefix> for TypedPrefix {
    fn from(prefix: Ipv4Prefix) -> Self {
        TypedPrefix::V4(prefix)
    }
}

impl From<Ipv6Prefix> for TypedPrefix {
    fn from(prefix: Ipv6Prefix) -> Self {
        TypedPrefix::V6(prefix)
    }
}

impl From<TypedPrefix> for ResourceSet {
    fn from(tp: TypedPrefix) -> ResourceSet {
        let mut builder = IpBlocksBuilder::new();
        builder.push(tp.prefix());
        let blocks = builder.finalize();

        match tp {
            TypedPrefix::V4(_) => ResourceSet {
                ipv4: blocks.into(),
                ..Default::default()
            },
            TypedPrefix::V6(_) => ResourceSet {
                ipv6: blocks.into(),
                ..Default::default()
            },
        }
    }
}

impl FromStr for TypedPrefix {
    type Err = ResourceSetError;

    /// Parses a prefix, refusing prefixes with host bits set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ResourceSetError::Prefix(s.to_string());
        let (addr, _) = s.split_once('/').ok_or_else(err)?;
        let addr = Addr::from_str(addr).map_err(|_| err())?;

        let res = if s.contains(':') {
            TypedPrefix::V6(Ipv6Prefix(
                Prefix::from_v6_str(s).map_err(|_| err())?
            ))
        }
        else {
            TypedPrefix::V4(Ipv4Prefix(
                Prefix::from_v4_str(s).map_err(|_| err())?
            ))
        };
        if res.prefix().addr() != addr {
            return Err(err())
        }
        Ok(res)
    }
}


//--- PartialOrd and Ord

impl PartialOrd for TypedPrefix {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypedPrefix {
    /// Orders IPv4 before IPv6, then by address and prefix length.
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        let family = |prefix: &TypedPrefix| matches!(prefix, TypedPrefix::V6(_));
        family(self).cmp(&family(other)).then_with(|| {
            self.prefix().addr().cmp(&other.prefix().addr())
        }).then_with(|| {
            self.addr_len().cmp(&other.addr_len())
        })
    }
}


//--- Display and Debug

impl fmt::Display for TypedPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypedPrefix::V4(pfx) => pfx.fmt(f),
            TypedPrefix::V6(pfx) => pfx.fmt(f),
        }
    }
}

impl fmt::Debug for TypedPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self)
    }
}


//--- Deserialize and Serialize

impl<'de> Deserialize<'de> for TypedPrefix {
    fn deserialize<D>(d: D) -> Result<TypedPrefix, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        TypedPrefix::from_str(string.as_str()).map_err(de::Error::custom)
    }
}

impl Serialize for TypedPrefix {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(s)
    }
}


//------------ Ipv4Prefix ----------------------------------------------------

/// An IPv4 prefix.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Ipv4Prefix(Prefix);

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.0.to_v4(), self.0.addr_len())
    }
}

impl fmt::Debug for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self)
    }
}

impl From<Ipv4Prefix> for Prefix {
    fn from(prefix: Ipv4Prefix) -> Self {
        prefix.0
    }
}


//------------ Ipv6Prefix ----------------------------------------------------

/// An IPv6 prefix.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Ipv6Prefix(Prefix);

impl fmt::Display for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.0.to_v6(), self.0.addr_len())
    }
}

impl fmt::Debug for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self)
    }
}

impl From<Ipv6Prefix> for Prefix {
    fn from(prefix: Ipv6Prefix) -> Self {
        prefix.0
    }
}


//------------ ResourceSet ---------------------------------------------------

/// A set of AS numbers and IPv4 and IPv6 addresses.
///
/// The textual representation is a single comma separated list of ASNs, AS
/// ranges, IP addresses, prefixes and address ranges, e.g.
/// `AS64496-AS64500, 10.0.0.0/8, 192.0.2.1-192.0.2.10, 2001:db8::/32`.
/// This type (de)serializes as that string.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct ResourceSet {
    asn: AsBlocks,
    ipv4: Ipv4Blocks,
    ipv6: Ipv6Blocks,
}

impl ResourceSet {
    /// Creates a set from separate strings for the three resource types.
    ///
    /// Each of the strings may be empty.
    pub fn from_strs(
        asn: &str, ipv4: &str, ipv6: &str
    ) -> Result<Self, ResourceSetError> {
        let asn = AsBlocks::from_str(asn).map_err(|_| {
            ResourceSetError::Asn(asn.to_string())
        })?;
        let ipv4 = Ipv4Blocks::from_str(ipv4).map_err(|_| {
            ResourceSetError::Addr(ipv4.to_string())
        })?;
        let ipv6 = Ipv6Blocks::from_str(ipv6).map_err(|_| {
            ResourceSetError::Addr(ipv6.to_string())
        })?;
        Ok(ResourceSet { asn, ipv4, ipv6 })
    }

    /// Creates a set holding a single AS number.
    pub fn from_asn(asn: Asn) -> Self {
        Self::from_asns(Some(asn))
    }

    /// Creates a set holding the given AS numbers.
    pub fn from_asns(asns: impl IntoIterator<Item = Asn>) -> Self {
        ResourceSet {
            asn: asns.into_iter().map(AsBlock::from).collect(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.asn.is_empty() && self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    /// Returns the union of this set and the other.
    pub fn union(&self, other: &Self) -> Self {
        ResourceSet {
            asn: self.asn.union(&other.asn),
            ipv4: self.ipv4.union(&other.ipv4).into(),
            ipv6: self.ipv6.union(&other.ipv6).into(),
        }
    }

    /// Returns the resources found in both this set and the other.
    pub fn intersection(&self, other: &Self) -> Self {
        ResourceSet {
            asn: self.asn.intersection(&other.asn),
            ipv4: self.ipv4.intersection(&other.ipv4).into(),
            ipv6: self.ipv6.intersection(&other.ipv6).into(),
        }
    }

    /// Returns the resources in this set that are not in the other.
    pub fn difference(&self, other: &Self) -> Self {
        ResourceSet {
            asn: self.asn.difference(&other.asn),
            ipv4: self.ipv4.difference(&other.ipv4).into(),
            ipv6: self.ipv6.difference(&other.ipv6).into(),
        }
    }

    /// Returns whether all resources in `other` are also in `self`.
    pub fn contains(&self, other: &Self) -> bool {
        self.asn.contains(&other.asn)
            && self.ipv4.contains(&other.ipv4)
            && self.ipv6.contains(&other.ipv6)
    }

    pub fn contains_asn(&self, asn: Asn) -> bool {
        self.asn.contains_asn(asn)
    }

    /// Returns whether the set shares at least one address with `prefix`.
    pub fn overlaps_prefix(&self, prefix: TypedPrefix) -> bool {
        match prefix {
            TypedPrefix::V4(pfx) => self.ipv4.intersects_block(pfx.0),
            TypedPrefix::V6(pfx) => self.ipv6.intersects_block(pfx.0),
        }
    }

    /// Returns the minimal list of IPv4 prefixes covering the set.
    pub fn ipv4_prefixes(&self) -> Vec<Ipv4Prefix> {
        self.ipv4.iter().flat_map(|block| {
            AddressRange::new(block.min(), block.max()).to_v4_prefixes()
        }).map(Ipv4Prefix).collect()
    }

    /// Returns the minimal list of IPv6 prefixes covering the set.
    pub fn ipv6_prefixes(&self) -> Vec<Ipv6Prefix> {
        self.ipv6.iter().flat_map(|block| {
            AddressRange::new(block.min(), block.max()).to_v6_prefixes()
        }).map(Ipv6Prefix).collect()
    }

    /// Parses a single IP block and refuses inverted ranges.
    fn parse_ip_block<E>(
        item: &str, parse: fn(&str) -> Result<IpBlock, E>
    ) -> Result<IpBlock, ResourceSetError> {
        let block = parse(item).map_err(|_| {
            if item.contains('/') {
                ResourceSetError::Prefix(item.to_string())
            }
            else if item.contains('-') {
                ResourceSetError::Range(item.to_string())
            }
            else {
                ResourceSetError::Addr(item.to_string())
            }
        })?;
        if block.min() > block.max() {
            return Err(ResourceSetError::Range(item.to_string()))
        }
        Ok(block)
    }
}

impl FromStr for ResourceSet {
    type Err = ResourceSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut asn = AsBlocksBuilder::new();
        let mut ipv4 = IpBlocksBuilder::new();
        let mut ipv6 = IpBlocksBuilder::new();

        for item in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if item.contains(':') {
                ipv6.push(Self::parse_ip_block(item, IpBlock::from_v6_str)?);
            }
            else if item.contains('.') {
                ipv4.push(Self::parse_ip_block(item, IpBlock::from_v4_str)?);
            }
            else {
                let block = AsBlock::from_str(item).map_err(|_| {
                    ResourceSetError::Asn(item.to_string())
                })?;
                if block.min() > block.max() {
                    return Err(ResourceSetError::Range(item.to_string()))
                }
                asn.push(block);
            }
        }

        Ok(ResourceSet {
            asn: asn.finalize(),
            ipv4: ipv4.finalize().into(),
            ipv6: ipv6.finalize().into(),
        })
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts = [
            self.asn.to_string(),
            self.ipv4.to_string(),
            self.ipv6.to_string(),
        ];
        let parts: Vec<_> = parts.iter().filter(|part| {
            !part.is_empty()
        }).map(String::as_str).collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl fmt::Debug for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl<'de> Deserialize<'de> for ResourceSet {
    fn deserialize<D>(d: D) -> Result<ResourceSet, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        ResourceSet::from_str(string.as_str()).map_err(de::Error::custom)
    }
}

impl Serialize for ResourceSet {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(s)
    }
}


//============ Error Types ===================================================

//------------ ResourceSetError ----------------------------------------------

/// A resource string could not be parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResourceSetError {
    /// An AS number is invalid.
    Asn(String),

    /// An IP address is invalid.
    Addr(String),

    /// A prefix is invalid or has host bits set.
    Prefix(String),

    /// A range is invalid or mixes address families.
    Range(String),
}

impl fmt::Display for ResourceSetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResourceSetError::Asn(s) => {
                write!(f, "Invalid AS number: '{}'", s)
            }
            ResourceSetError::Addr(s) => {
                write!(f, "Invalid IP address: '{}'", s)
            }
            ResourceSetError::Prefix(s) => {
                write!(f, "Invalid prefix: '{}'", s)
            }
            ResourceSetError::Range(s) => {
                write!(f, "Invalid range: '{}'", s)
            }
        }
    }
}

impl error::Error for ResourceSetError {}


//============ Tests =========================================================
