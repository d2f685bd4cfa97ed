//! The aggregate for an RPKI Certification Authority.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::api::alerts::RoaAlertConfiguration;
use crate::api::aspa::AspaConfiguration;
use crate::api::resources::ResourceSet;
use crate::commons::eventsourcing::{Aggregate, AggregateId, VersionedId};


//------------ CertificateAuthority ------------------------------------------

/// A certificate authority.
///
/// Only the parts the engine keeps consistent are modelled here: the
/// resources certified by the parent, and the configuration derived from
/// them.
//
//  *Warning:* This type is used in stored state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateAuthority {
    id: AggregateId,
    version: u64,
    name: String,
    uuid: Uuid,

    /// The resources of the incoming certificates by key name.
    incoming: BTreeMap<String, ResourceSet>,

    /// Whether derived configuration changed since the last publication.
    configuration_updated: bool,

    roa_alerts: Option<RoaAlertConfiguration>,
    aspa: AspaConfiguration,
}

impl CertificateAuthority {
    pub fn new(id: AggregateId, name: impl Into<String>) -> Self {
        CertificateAuthority {
            id,
            version: 0,
            name: name.into(),
            uuid: Uuid::new_v4(),
            incoming: BTreeMap::new(),
            configuration_updated: false,
            roa_alerts: None,
            aspa: AspaConfiguration::default(),
        }
    }

    pub fn versioned_id(&self) -> VersionedId {
        VersionedId::new(self.id, self.version)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// # Certified resources
///
impl CertificateAuthority {
    /// Returns the union of the resources of all incoming certificates.
    pub fn certified_resources(&self) -> ResourceSet {
        self.incoming.values().fold(ResourceSet::default(), |res, set| {
            res.union(set)
        })
    }

    pub fn incoming_resources(&self, key: &str) -> Option<&ResourceSet> {
        self.incoming.get(key)
    }

    /// Stores the resources for a key.
    ///
    /// Returns `false` if the key already had exactly these resources.
    pub fn update_incoming(&mut self, key: &str, resources: ResourceSet) -> bool {
        if self.incoming.get(key) == Some(&resources) {
            return false
        }
        self.incoming.insert(key.to_string(), resources);
        true
    }

    /// Removes the certificate for a key, returning its resources.
    pub fn revoke_incoming(&mut self, key: &str) -> Option<ResourceSet> {
        self.incoming.remove(key)
    }
}

/// # Derived configuration
///
impl CertificateAuthority {
    pub fn configuration_updated(&self) -> bool {
        self.configuration_updated
    }

    /// Marks the configuration as needing publication.
    pub fn mark_configuration_updated(&mut self) {
        self.configuration_updated = true
    }

    pub fn roa_alerts(&self) -> Option<&RoaAlertConfiguration> {
        self.roa_alerts.as_ref()
    }

    /// Returns the ROA alert configuration, creating it if necessary.
    pub fn roa_alerts_or_default(&mut self) -> &mut RoaAlertConfiguration {
        self.roa_alerts.get_or_insert_with(Default::default)
    }

    pub fn aspa(&self) -> &AspaConfiguration {
        &self.aspa
    }

    pub fn set_aspa(&mut self, aspa: AspaConfiguration) {
        self.aspa = aspa
    }
}

impl Aggregate for CertificateAuthority {
    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use super::*;

    #[test]
    fn certified_resources_are_union() {
        let mut ca = CertificateAuthority::new(AggregateId::from(1), "ca");
        assert!(ca.certified_resources().is_empty());

        assert!(ca.update_incoming(
            "a", ResourceSet::from_str("AS1, 10.0.0.0/9").unwrap()
        ));
        assert!(ca.update_incoming(
            "b", ResourceSet::from_str("10.128.0.0/9").unwrap()
        ));
        assert!(!ca.update_incoming(
            "b", ResourceSet::from_str("10.128.0.0/9").unwrap()
        ));
        assert_eq!(
            ca.certified_resources(),
            ResourceSet::from_str("AS1, 10.0.0.0/8").unwrap()
        );

        assert!(ca.revoke_incoming("a").is_some());
        assert!(ca.revoke_incoming("a").is_none());
        assert_eq!(
            ca.certified_resources(),
            ResourceSet::from_str("10.128.0.0/9").unwrap()
        );
    }

    #[test]
    fn configuration_marker() {
        let mut ca = CertificateAuthority::new(AggregateId::from(1), "ca");
        assert!(!ca.configuration_updated());
        ca.mark_configuration_updated();
        assert!(ca.configuration_updated());
    }
}
