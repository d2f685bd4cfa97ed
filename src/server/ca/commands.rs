//! The commands for the `CertificateAuthority` aggregate.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use rpki::repository::resources::Asn;
use crate::api::alerts::{RoaAlertFrequency, RouteValidityState};
use crate::api::aspa::{
    ietf_notation, AspaConfiguration, AspaConfigurationData, AspaDiff,
};
use crate::api::bgp::AnnouncedRoute;
use crate::api::history::{CommandGroup, CommandType};
use crate::api::resources::ResourceSet;
use crate::commons::actor::Actor;
use crate::commons::eventsourcing::VersionedId;


//------------ CaCommand -----------------------------------------------------

/// An intent to change a certificate authority.
///
/// The command names the version of the CA it was based on. System
/// commands are applied to whatever the current version is, user commands
/// are refused if other users changed the CA in the meantime.
#[derive(Clone, Debug)]
pub struct CaCommand {
    ca: VersionedId,
    actor: Actor,
    details: CaCommandDetails,
}

impl CaCommand {
    pub fn new(ca: VersionedId, actor: Actor, details: CaCommandDetails) -> Self {
        CaCommand { ca, actor, details }
    }

    pub fn ca(&self) -> VersionedId {
        self.ca
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn details(&self) -> &CaCommandDetails {
        &self.details
    }

    pub fn command_type(&self) -> CommandType {
        self.details.command_type()
    }

    pub fn group(&self) -> CommandGroup {
        self.command_type().group()
    }

    /// Returns the human readable summary kept in the audit log.
    pub fn summary(&self) -> String {
        self.details.to_string()
    }
}

/// # Constructing commands
///
impl CaCommand {
    pub fn create(ca: VersionedId, name: impl Into<String>, actor: Actor) -> Self {
        Self::new(ca, actor, CaCommandDetails::CreateCertificateAuthority {
            name: name.into(),
        })
    }

    pub fn update_incoming(
        ca: VersionedId,
        key: impl Into<String>,
        resources: ResourceSet,
        actor: Actor,
    ) -> Self {
        Self::new(ca, actor, CaCommandDetails::UpdateIncomingCertificate {
            key: key.into(),
            resources,
        })
    }

    pub fn revoke_incoming(
        ca: VersionedId, key: impl Into<String>, actor: Actor
    ) -> Self {
        Self::new(ca, actor, CaCommandDetails::RevokeIncomingCertificate {
            key: key.into(),
        })
    }

    pub fn subscribe_to_roa_alert(
        ca: VersionedId,
        email: impl Into<String>,
        route_validity_states: BTreeSet<RouteValidityState>,
        frequency: RoaAlertFrequency,
        actor: Actor,
    ) -> Self {
        Self::new(ca, actor, CaCommandDetails::SubscribeToRoaAlert {
            email: email.into(),
            route_validity_states,
            frequency,
        })
    }

    pub fn unsubscribe_from_roa_alert(
        ca: VersionedId,
        email: impl Into<String>,
        notify_on_roa_changes: bool,
        actor: Actor,
    ) -> Self {
        Self::new(ca, actor, CaCommandDetails::UnsubscribeFromRoaAlert {
            email: email.into(),
            notify_on_roa_changes,
        })
    }

    pub fn update_roa_alert_ignored(
        ca: VersionedId,
        additions: Vec<AnnouncedRoute>,
        deletions: Vec<AnnouncedRoute>,
        actor: Actor,
    ) -> Self {
        Self::new(
            ca, actor,
            CaCommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes {
                additions, deletions
            }
        )
    }

    /// Creates a command replacing the ASPA configuration.
    ///
    /// The `current` configuration is only used to describe the change in
    /// the audit log. The handler checks `if_match` against the entity tag
    /// of the configuration it finds.
    pub fn update_aspa_configuration(
        ca: VersionedId,
        if_match: Option<String>,
        configuration: Vec<AspaConfigurationData>,
        current: &AspaConfiguration,
        actor: Actor,
    ) -> Self {
        let diff = AspaConfigurationData::into_configuration(
            configuration.clone()
        ).map(|updated| current.diff(&updated)).unwrap_or_default();
        Self::new(ca, actor, CaCommandDetails::UpdateAspaConfiguration {
            if_match,
            configuration,
            diff,
        })
    }

    pub fn delete(ca: VersionedId, actor: Actor) -> Self {
        Self::new(ca, actor, CaCommandDetails::DeleteCertificateAuthority)
    }
}

impl fmt::Display for CaCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f, "{}:{}:{} by {}",
            self.group(), self.command_type(), self.ca, self.actor
        )
    }
}


//------------ CaCommandDetails ----------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CaCommandDetails {
    /// Creates a new CA under the id of the command.
    CreateCertificateAuthority {
        name: String,
    },

    /// The parent issued a certificate for one of the CA's keys.
    UpdateIncomingCertificate {
        key: String,
        resources: ResourceSet,
    },

    /// The parent revoked the certificate for one of the CA's keys.
    RevokeIncomingCertificate {
        key: String,
    },

    SubscribeToRoaAlert {
        email: String,
        route_validity_states: BTreeSet<RouteValidityState>,
        frequency: RoaAlertFrequency,
    },

    UnsubscribeFromRoaAlert {
        email: String,
        notify_on_roa_changes: bool,
    },

    UpdateRoaAlertIgnoredAnnouncedRoutes {
        additions: Vec<AnnouncedRoute>,
        deletions: Vec<AnnouncedRoute>,
    },

    UpdateAspaConfiguration {
        /// The entity tag of the configuration the user based this on.
        if_match: Option<String>,
        configuration: Vec<AspaConfigurationData>,

        /// The change per customer, for the audit log.
        diff: BTreeMap<Asn, AspaDiff>,
    },

    DeleteCertificateAuthority,
}

impl CaCommandDetails {
    pub fn command_type(&self) -> CommandType {
        match self {
            CaCommandDetails::CreateCertificateAuthority { .. } => {
                CommandType::CreateCertificateAuthority
            }
            CaCommandDetails::UpdateIncomingCertificate { .. } => {
                CommandType::UpdateIncomingCertificate
            }
            CaCommandDetails::RevokeIncomingCertificate { .. } => {
                CommandType::RevokeIncomingCertificate
            }
            CaCommandDetails::SubscribeToRoaAlert { .. } => {
                CommandType::SubscribeToRoaAlert
            }
            CaCommandDetails::UnsubscribeFromRoaAlert { .. } => {
                CommandType::UnsubscribeFromRoaAlert
            }
            CaCommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes { .. } => {
                CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes
            }
            CaCommandDetails::UpdateAspaConfiguration { .. } => {
                CommandType::UpdateAspaConfiguration
            }
            CaCommandDetails::DeleteCertificateAuthority => {
                CommandType::DeleteCertificateAuthority
            }
        }
    }
}

fn routes_list(routes: &[AnnouncedRoute]) -> String {
    if routes.is_empty() {
        "none".into()
    }
    else {
        routes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    }
}

fn asn_list(asns: &BTreeSet<Asn>) -> String {
    let asns: Vec<_> = asns.iter().map(ToString::to_string).collect();
    format!("[{}]", asns.join(", "))
}

impl fmt::Display for CaCommandDetails {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaCommandDetails::CreateCertificateAuthority { name } => {
                write!(f, "Created certificate authority '{}'.", name)
            }
            CaCommandDetails::UpdateIncomingCertificate { key, .. } => {
                write!(f, "Updated incoming certificate for key {}.", key)
            }
            CaCommandDetails::RevokeIncomingCertificate { key } => {
                write!(f, "Revoked incoming certificate for key {}.", key)
            }
            CaCommandDetails::SubscribeToRoaAlert {
                email, route_validity_states, frequency
            } => {
                let validity = if route_validity_states.contains(
                    &RouteValidityState::Unknown
                ) {
                    "invalid and unknown announcements."
                }
                else {
                    "invalid announcements only."
                };
                write!(
                    f, "Subscribed {} to {} ROA alerts for {}",
                    email, frequency, validity
                )
            }
            CaCommandDetails::UnsubscribeFromRoaAlert { email, .. } => {
                write!(f, "Unsubscribed {} from ROA alerts.", email)
            }
            CaCommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes {
                additions, deletions
            } => {
                write!(
                    f,
                    "Updated suppressed routes for ROA alerts. \
                     Additions: {}. Deletions: {}.",
                    routes_list(additions), routes_list(deletions)
                )
            }
            CaCommandDetails::UpdateAspaConfiguration { diff, .. } => {
                let changes: Vec<_> = diff.iter().map(|(customer, diff)| {
                    format!(
                        "{} (was: {})",
                        ietf_notation(*customer, &diff.added),
                        asn_list(&diff.deleted)
                    )
                }).collect();
                if changes.is_empty() {
                    write!(f, "Updated ASPA configuration: no changes.")
                }
                else {
                    write!(
                        f, "Updated ASPA configuration: {}.", changes.join("; ")
                    )
                }
            }
            CaCommandDetails::DeleteCertificateAuthority => {
                write!(f, "Deleted certificate authority.")
            }
        }
    }
}


//------------ Tests ---------------------------------------------------------
