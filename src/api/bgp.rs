//! Types for observed BGP announcements.

use std::fmt;
use rpki::repository::resources::Asn;
use serde::{Deserialize, Serialize};
use crate::api::resources::TypedPrefix;


//------------ BgpRisEntry ---------------------------------------------------

/// A route origin as seen by the RIS route collectors.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct BgpRisEntry {
    /// The origin AS number of the route.
    pub origin: Asn,

    /// The announced prefix.
    pub prefix: TypedPrefix,

    /// The number of RIS peers that have seen the route.
    pub visibility: u32,
}

impl BgpRisEntry {
    pub fn new(origin: Asn, prefix: TypedPrefix, visibility: u32) -> Self {
        BgpRisEntry { origin, prefix, visibility }
    }

    /// Returns the announced route without the visibility.
    pub fn route(&self) -> AnnouncedRoute {
        AnnouncedRoute::new(self.origin, self.prefix)
    }
}

impl fmt::Display for BgpRisEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} => {} ({})", self.prefix, self.origin, self.visibility)
    }
}


//------------ AnnouncedRoute ------------------------------------------------

/// An origin AS number and the prefix it announces.
///
/// Routes are ordered by prefix first and origin second.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct AnnouncedRoute {
    pub asn: Asn,
    pub prefix: TypedPrefix,
}

impl AnnouncedRoute {
    pub fn new(asn: Asn, prefix: TypedPrefix) -> Self {
        AnnouncedRoute { asn, prefix }
    }
}

impl Ord for AnnouncedRoute {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.prefix.cmp(&other.prefix).then(self.asn.cmp(&other.asn))
    }
}

impl PartialOrd for AnnouncedRoute {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AnnouncedRoute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[asn={}, prefix={}]", self.asn, self.prefix)
    }
}


//------------ Tests ---------------------------------------------------------
