//! The events for the `CertificateAuthority` aggregate.

use std::fmt;
use rpki::repository::resources::Asn;
use serde::{Deserialize, Serialize};
use crate::api::aspa::{ietf_notation, AspaProviders};
use crate::api::bgp::AnnouncedRoute;
use crate::api::resources::ResourceSet;
use crate::commons::eventsourcing::VersionedId;


//------------ CaEvent -------------------------------------------------------

/// The events of the `CertificateAuthority` aggregate.
///
/// Every event belongs to exactly one CA. Its `Display` implementation is
/// the description kept in the audit log.
//
//  *Warning:* This type is used in stored state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum CaEvent {
    /// The parent issued a new certificate for one of the CA's keys.
    IncomingCertificateUpdated {
        ca: VersionedId,
        key: String,
        resources: ResourceSet,
    },

    /// The parent revoked the certificate for one of the CA's keys.
    IncomingCertificateRevoked {
        ca: VersionedId,
        key: String,
    },

    /// Suppressed announcements were removed after a resource change.
    RoaAlertIgnoredAnnouncedRoutesUpdated {
        ca: VersionedId,
        removed: Vec<AnnouncedRoute>,
    },

    /// ASPA entries were removed after a resource change.
    AspaConfigurationUpdatedDueToChangedResources {
        ca: VersionedId,
        removed: Vec<(Asn, AspaProviders)>,
    },
}

impl CaEvent {
    /// Returns the CA this event belongs to.
    pub fn ca(&self) -> VersionedId {
        match self {
            CaEvent::IncomingCertificateUpdated { ca, .. }
            | CaEvent::IncomingCertificateRevoked { ca, .. }
            | CaEvent::RoaAlertIgnoredAnnouncedRoutesUpdated { ca, .. }
            | CaEvent::AspaConfigurationUpdatedDueToChangedResources {
                ca, ..
            } => *ca,
        }
    }
}

impl fmt::Display for CaEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaEvent::IncomingCertificateUpdated { key, resources, .. } => {
                write!(
                    f,
                    "Updated incoming certificate for key {} with resources {}.",
                    key, resources
                )
            }
            CaEvent::IncomingCertificateRevoked { key, .. } => {
                write!(f, "Revoked incoming certificate for key {}.", key)
            }
            CaEvent::RoaAlertIgnoredAnnouncedRoutesUpdated {
                removed, ..
            } => {
                let removed = if removed.is_empty() {
                    "none".to_string()
                }
                else {
                    removed.iter().map(ToString::to_string).collect::<Vec<_>>()
                        .join("; ")
                };
                write!(
                    f,
                    "Updated suppressed routes for ROA alerts due to changed \
                     resources, deletions: {}.",
                    removed
                )
            }
            CaEvent::AspaConfigurationUpdatedDueToChangedResources {
                removed, ..
            } => {
                let removed: Vec<_> = removed.iter().map(|(customer, providers)| {
                    ietf_notation(*customer, providers)
                }).collect();
                write!(
                    f,
                    "Updated ASPA configuration due to changed resources, \
                     removed customer ASNs: {}.",
                    removed.join("; ")
                )
            }
        }
    }
}


//------------ Tests ---------------------------------------------------------
