//! Helper functions for testing the engine.

use std::str::FromStr;
use rpki::repository::resources::Asn;
use crate::api::bgp::AnnouncedRoute;
use crate::api::resources::{ResourceSet, TypedPrefix};

pub fn init_logging() {
    // Tests call this repeatedly, only the first call installs the logger.
    let _ = stderrlog::new().verbosity(4).init();
}

pub fn resources(s: &str) -> ResourceSet {
    ResourceSet::from_str(s).unwrap()
}

pub fn prefix(s: &str) -> TypedPrefix {
    TypedPrefix::from_str(s).unwrap()
}

pub fn announced_route(asn: u32, prefix: &str) -> AnnouncedRoute {
    AnnouncedRoute::new(Asn::from_u32(asn), self::prefix(prefix))
}
