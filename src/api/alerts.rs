//! ROA alert configuration.
//!
//! Users can subscribe to alerts about announcements seen in BGP that are
//! invalid or unknown given the ROAs of their CA. Announcements the user
//! does not care about can be suppressed.

use std::collections::BTreeSet;
use std::fmt;
use serde::{Deserialize, Serialize};
use crate::api::bgp::AnnouncedRoute;
use crate::api::resources::ResourceSet;


/// Normalises an e-mail address for comparison.
pub fn norm_email(email: &str) -> String {
    email.trim().to_lowercase()
}


//------------ RoaAlertFrequency ---------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoaAlertFrequency {
    #[default]
    Daily,
    Weekly,
}

impl fmt::Display for RoaAlertFrequency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            RoaAlertFrequency::Daily => "daily",
            RoaAlertFrequency::Weekly => "weekly",
        })
    }
}


//------------ RouteValidityState --------------------------------------------

/// The validity states a subscriber wants to be alerted about.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteValidityState {
    InvalidAsn,
    InvalidLength,
    Unknown,
}


//------------ RoaAlertSubscription ------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoaAlertSubscription {
    /// The normalised e-mail addresses of the subscribers.
    pub emails: BTreeSet<String>,
    pub route_validity_states: BTreeSet<RouteValidityState>,
    pub frequency: RoaAlertFrequency,
}


//------------ RoaAlertConfiguration -----------------------------------------

/// The ROA alert configuration of a CA.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoaAlertConfiguration {
    subscription: Option<RoaAlertSubscription>,
    notify_on_roa_changes: bool,
    ignored: BTreeSet<AnnouncedRoute>,
}

impl RoaAlertConfiguration {
    pub fn subscription(&self) -> Option<&RoaAlertSubscription> {
        self.subscription.as_ref()
    }

    pub fn notify_on_roa_changes(&self) -> bool {
        self.notify_on_roa_changes
    }

    pub fn set_notify_on_roa_changes(&mut self, notify: bool) {
        self.notify_on_roa_changes = notify
    }

    /// Adds the e-mail address and replaces states and frequency.
    pub fn subscribe(
        &mut self,
        email: &str,
        route_validity_states: BTreeSet<RouteValidityState>,
        frequency: RoaAlertFrequency,
    ) {
        let email = norm_email(email);
        match self.subscription.as_mut() {
            Some(subscription) => {
                subscription.emails.insert(email);
                subscription.route_validity_states = route_validity_states;
                subscription.frequency = frequency;
            }
            None => {
                self.subscription = Some(RoaAlertSubscription {
                    emails: [email].into(),
                    route_validity_states,
                    frequency,
                })
            }
        }
    }

    /// Removes the e-mail address.
    ///
    /// Returns whether the address was subscribed. The subscription is
    /// dropped when its last address is removed.
    pub fn remove_email(&mut self, email: &str) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false
        };
        let removed = subscription.emails.remove(&norm_email(email));
        if subscription.emails.is_empty() {
            self.subscription = None;
        }
        removed
    }

    /// Returns the suppressed announcements.
    pub fn ignored(&self) -> &BTreeSet<AnnouncedRoute> {
        &self.ignored
    }

    /// Adds and then removes suppressed announcements.
    ///
    /// Returns whether the suppressed announcements changed.
    pub fn update(
        &mut self,
        additions: &[AnnouncedRoute],
        deletions: &[AnnouncedRoute],
    ) -> bool {
        let before = self.ignored.clone();
        self.ignored.extend(additions.iter().copied());
        for deletion in deletions {
            self.ignored.remove(deletion);
        }
        self.ignored != before
    }

    /// Removes suppressed announcements outside of the resources.
    ///
    /// An announcement is kept if its prefix shares at least one address
    /// with the resources. Returns the removed announcements in order.
    pub fn retain_overlapping(
        &mut self, resources: &ResourceSet
    ) -> Vec<AnnouncedRoute> {
        let removed: Vec<_> = self.ignored.iter().filter(|route| {
            !resources.overlaps_prefix(route.prefix)
        }).copied().collect();
        for route in &removed {
            self.ignored.remove(route);
        }
        removed
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use rpki::repository::resources::Asn;
    use crate::api::resources::TypedPrefix;
    use super::*;

    fn route(asn: u32, prefix: &str) -> AnnouncedRoute {
        AnnouncedRoute::new(
            Asn::from_u32(asn), TypedPrefix::from_str(prefix).unwrap()
        )
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let mut config = RoaAlertConfiguration::default();
        config.subscribe(
            " Alice@Example.com ",
            [RouteValidityState::InvalidAsn].into(),
            RoaAlertFrequency::Daily,
        );
        config.subscribe(
            "bob@example.com",
            [RouteValidityState::Unknown].into(),
            RoaAlertFrequency::Weekly,
        );

        let subscription = config.subscription().unwrap();
        assert_eq!(subscription.emails.len(), 2);
        assert!(subscription.emails.contains("alice@example.com"));
        assert_eq!(subscription.frequency, RoaAlertFrequency::Weekly);

        assert!(!config.remove_email("carol@example.com"));
        assert!(config.remove_email("ALICE@example.com"));
        assert!(config.remove_email("bob@example.com"));
        assert!(config.subscription().is_none());
    }

    #[test]
    fn retain_overlapping() {
        let mut config = RoaAlertConfiguration::default();
        assert!(config.update(
            &[
                route(1, "fc00::/7"),
                route(1, "fc00::/8"),
                route(1, "fc80::/9"),
                route(2, "10.0.0.0/8"),
            ],
            &[],
        ));
        assert!(!config.update(&[route(1, "fc00::/7")], &[route(3, "fc00::/7")]));
        assert!(!config.update(&[route(3, "fc00::/7")], &[route(3, "fc00::/7")]));
        let removed = config.retain_overlapping(
            &ResourceSet::from_str("fc00::/9").unwrap()
        );
        assert_eq!(removed, vec![route(2, "10.0.0.0/8"), route(1, "fc80::/9")]);
        assert_eq!(config.ignored().len(), 2);
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_string(&RouteValidityState::InvalidLength).unwrap(),
            "\"INVALID_LENGTH\""
        );
        assert_eq!(
            serde_json::to_string(&RoaAlertFrequency::Weekly).unwrap(),
            "\"WEEKLY\""
        );
    }
}
