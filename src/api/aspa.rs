//! ASPA configuration.
//!
//! A CA keeps, per customer AS number it holds, the set of provider AS
//! numbers that are authorised to propagate its routes, each optionally
//! limited to one address family.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use rpki::repository::resources::Asn;
use rpki::rrdp::Hash;
use serde::{Deserialize, Serialize};
use crate::api::resources::{parse_asn, ResourceSet};


//------------ AspaAfiLimit --------------------------------------------------

/// The address families a provider is authorised for.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
    PartialOrd, Serialize,
)]
pub enum AspaAfiLimit {
    #[default]
    #[serde(rename = "ANY")]
    Any,

    #[serde(rename = "IPv4")]
    Ipv4,

    #[serde(rename = "IPv6")]
    Ipv6,
}

impl AspaAfiLimit {
    /// Returns the suffix used after the provider in IETF notation.
    fn suffix(self) -> &'static str {
        match self {
            AspaAfiLimit::Any => "",
            AspaAfiLimit::Ipv4 => "(v4)",
            AspaAfiLimit::Ipv6 => "(v6)",
        }
    }
}


//------------ AspaProviders -------------------------------------------------

/// The providers of one customer, ordered by AS number.
pub type AspaProviders = BTreeMap<Asn, AspaAfiLimit>;

/// Formats a single customer and its providers in IETF notation.
///
/// Example: `AS65000 => AS65001, AS65002(v4), AS65003(v6)`. An empty
/// provider set is shown as `AS65000 => <none>`.
pub fn ietf_notation(customer: Asn, providers: &AspaProviders) -> String {
    if providers.is_empty() {
        return format!("{} => <none>", customer)
    }
    let providers: Vec<_> = providers.iter().map(|(asn, limit)| {
        format!("{}{}", asn, limit.suffix())
    }).collect();
    format!("{} => {}", customer, providers.join(", "))
}


//------------ AspaConfiguration ---------------------------------------------

/// The complete ASPA configuration of a CA.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AspaConfiguration(BTreeMap<Asn, AspaProviders>);

impl AspaConfiguration {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, customer: Asn) -> Option<&AspaProviders> {
        self.0.get(&customer)
    }

    pub fn insert(&mut self, customer: Asn, providers: AspaProviders) {
        self.0.insert(customer, providers);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Asn, &AspaProviders)> {
        self.0.iter().map(|(customer, providers)| (*customer, providers))
    }

    /// Returns all customer AS numbers as a resource set.
    pub fn customers(&self) -> ResourceSet {
        ResourceSet::from_asns(self.0.keys().copied())
    }

    /// Removes all entries for customers not held in `resources`.
    ///
    /// Returns the removed entries in customer order.
    pub fn retain_held(
        &mut self, resources: &ResourceSet
    ) -> Vec<(Asn, AspaProviders)> {
        let removed: Vec<Asn> = self.0.keys().copied().filter(|customer| {
            !resources.contains_asn(*customer)
        }).collect();
        removed.into_iter().filter_map(|customer| {
            self.0.remove(&customer).map(|providers| (customer, providers))
        }).collect()
    }

    /// Returns the canonical text of the configuration.
    ///
    /// This is the IETF notation of every entry in customer order, one
    /// entry per line.
    pub fn canonical_text(&self) -> String {
        let lines: Vec<_> = self.0.iter().map(|(customer, providers)| {
            ietf_notation(*customer, providers)
        }).collect();
        lines.join("\n")
    }

    /// Returns the entity tag of the configuration.
    ///
    /// The tag is the hex encoded SHA-256 hash of the canonical text.
    pub fn entity_tag(&self) -> String {
        Hash::from_data(self.canonical_text().as_bytes()).to_string()
    }

    /// Returns the per customer differences from `self` to `other`.
    pub fn diff(&self, other: &AspaConfiguration) -> BTreeMap<Asn, AspaDiff> {
        let empty = AspaProviders::new();
        let customers: BTreeSet<Asn> = self.0.keys().chain(
            other.0.keys()
        ).copied().collect();

        let mut res = BTreeMap::new();
        for customer in customers {
            let current = self.0.get(&customer).unwrap_or(&empty);
            let updated = other.0.get(&customer).unwrap_or(&empty);
            let in_current = self.0.contains_key(&customer);
            let in_updated = other.0.contains_key(&customer);
            if current == updated && in_current == in_updated {
                continue
            }
            let added = updated.iter().filter(|(asn, limit)| {
                current.get(asn) != Some(limit)
            }).map(|(asn, limit)| (*asn, *limit)).collect();
            let deleted = current.keys().filter(|asn| {
                !updated.contains_key(asn)
            }).copied().collect();
            res.insert(customer, AspaDiff { added, deleted });
        }
        res
    }
}

impl fmt::Display for AspaConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.canonical_text())
    }
}


//------------ AspaDiff ------------------------------------------------------

/// The change of the providers for one customer.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AspaDiff {
    /// Providers that were added or whose limit changed.
    pub added: AspaProviders,

    /// Providers that were removed.
    pub deleted: BTreeSet<Asn>,
}


//------------ AspaConfigurationData -----------------------------------------

/// One customer entry as submitted by a user.
///
/// Unlike [`AspaConfiguration`] this may contain duplicates, which is why
/// the providers are a list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AspaConfigurationData {
    pub customer: Asn,
    pub providers: Vec<AspaProvider>,
}

impl AspaConfigurationData {
    pub fn new(customer: Asn, providers: Vec<AspaProvider>) -> Self {
        AspaConfigurationData { customer, providers }
    }

    /// Converts a list of entries into a configuration.
    ///
    /// Fails if a customer appears more than once or a provider appears
    /// more than once for the same customer.
    pub fn into_configuration(
        data: Vec<AspaConfigurationData>
    ) -> Result<AspaConfiguration, AspaDuplicate> {
        let mut res = AspaConfiguration::default();
        for entry in data {
            let mut providers = AspaProviders::new();
            for provider in entry.providers {
                if providers.insert(provider.asn, provider.afi_limit).is_some() {
                    return Err(AspaDuplicate::Provider(entry.customer, provider.asn))
                }
            }
            if res.0.insert(entry.customer, providers).is_some() {
                return Err(AspaDuplicate::Customer(entry.customer))
            }
        }
        Ok(res)
    }
}

impl fmt::Display for AspaConfigurationData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // example: AS65000 => AS65001, AS65002(v4), AS65003(v6)
        write!(f, "{} => ", self.customer)?;
        if self.providers.is_empty() {
            write!(f, "<none>")?;
        } else {
            for (i, provider) in self.providers.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", provider)?;
            }
        }
        Ok(())
    }
}

impl FromStr for AspaConfigurationData {
    type Err = AspaFormatError;

    // example: AS65000 => AS65001, AS65002(v4), AS65003(v6)
    // example: AS65000 => <none>
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split("=>");

        let customer = {
            let customer_str = parts.next().ok_or(AspaFormatError::CustomerAsMissing)?;
            parse_asn(customer_str).map_err(|_| {
                AspaFormatError::CustomerAsInvalid(customer_str.trim().to_string())
            })?
        };

        let providers = {
            let mut providers = vec![];
            let providers_str = parts.next().unwrap_or("<none>");

            if providers_str.trim() != "<none>" {
                for provider_part in providers_str.split(',') {
                    providers.push(AspaProvider::from_str(provider_part)?);
                }
            }

            providers
        };

        // unexpected extra bits are not acceptable
        if parts.next().is_some() {
            Err(AspaFormatError::ExtraParts)
        } else {
            Ok(AspaConfigurationData::new(customer, providers))
        }
    }
}


//------------ AspaProvider --------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AspaProvider {
    pub asn: Asn,

    #[serde(default)]
    pub afi_limit: AspaAfiLimit,
}

impl AspaProvider {
    pub fn new(asn: Asn, afi_limit: AspaAfiLimit) -> Self {
        AspaProvider { asn, afi_limit }
    }
}

impl fmt::Display for AspaProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.asn, self.afi_limit.suffix())
    }
}

impl FromStr for AspaProvider {
    type Err = AspaFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (asn, afi_limit) = if let Some(asn) = s.strip_suffix("(v4)") {
            (asn, AspaAfiLimit::Ipv4)
        } else if let Some(asn) = s.strip_suffix("(v6)") {
            (asn, AspaAfiLimit::Ipv6)
        } else {
            (s, AspaAfiLimit::Any)
        };
        let asn = parse_asn(asn).map_err(|_| {
            AspaFormatError::ProviderAsInvalid(s.to_string())
        })?;
        Ok(AspaProvider::new(asn, afi_limit))
    }
}


//============ Error Types ===================================================

//------------ AspaFormatError -----------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AspaFormatError {
    CustomerAsMissing,
    CustomerAsInvalid(String),
    ProviderAsInvalid(String),
    ExtraParts,
}

impl fmt::Display for AspaFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AspaFormatError::CustomerAsMissing => {
                write!(f, "ASPA configuration format invalid: customer AS missing")
            }
            AspaFormatError::CustomerAsInvalid(s) => {
                write!(f, "ASPA configuration format invalid: cannot parse customer AS: {}", s)
            }
            AspaFormatError::ProviderAsInvalid(s) => {
                write!(f, "ASPA configuration format invalid: cannot parse provider AS: {}", s)
            }
            AspaFormatError::ExtraParts => {
                write!(f, "ASPA configuration format invalid: found more than one '=>'")
            }
        }
    }
}

impl std::error::Error for AspaFormatError {}


//------------ AspaDuplicate -------------------------------------------------

/// An AS number appears twice in submitted ASPA configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AspaDuplicate {
    Customer(Asn),
    Provider(Asn, Asn),
}

impl fmt::Display for AspaDuplicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AspaDuplicate::Customer(customer) => {
                write!(f, "duplicate customer {} in ASPA configuration", customer)
            }
            AspaDuplicate::Provider(customer, provider) => {
                write!(
                    f, "duplicate provider {} for customer {} in ASPA configuration",
                    provider, customer
                )
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> AspaConfigurationData {
        AspaConfigurationData::from_str(s).unwrap()
    }

    fn config(entries: &[&str]) -> AspaConfiguration {
        AspaConfigurationData::into_configuration(
            entries.iter().map(|s| data(s)).collect()
        ).unwrap()
    }

    #[test]
    fn ietf_notation_round_trip() {
        for s in ["AS1 => AS2, AS3(v4), AS4(v6)", "AS1 => <none>"] {
            assert_eq!(data(s).to_string(), s);
        }
        assert_eq!(
            config(&["AS1 => AS4(v6), AS3(v4), AS2"]).canonical_text(),
            "AS1 => AS2, AS3(v4), AS4(v6)"
        );
        assert_eq!(data("65000 => 65001").to_string(), "AS65000 => AS65001");
    }

    #[test]
    fn reject_bad_notation() {
        assert!(AspaConfigurationData::from_str("AS1 => AS2 => AS3").is_err());
        assert!(AspaConfigurationData::from_str("ASx => AS2").is_err());
        assert!(AspaConfigurationData::from_str("AS1 => AS2(v5)").is_err());
    }

    #[test]
    fn duplicates() {
        assert_eq!(
            AspaConfigurationData::into_configuration(
                vec![data("AS1 => AS2"), data("AS1 => AS3")]
            ),
            Err(AspaDuplicate::Customer(Asn::from_u32(1)))
        );
        assert_eq!(
            AspaConfigurationData::into_configuration(
                vec![data("AS1 => AS2, AS2(v4)")]
            ),
            Err(AspaDuplicate::Provider(Asn::from_u32(1), Asn::from_u32(2)))
        );
    }

    #[test]
    fn entity_tag() {
        let empty = AspaConfiguration::default();
        // SHA-256 of the empty string.
        assert_eq!(
            empty.entity_tag(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let one = config(&["AS1 => AS2"]);
        let other = config(&["AS1 => AS2(v4)"]);
        assert_ne!(one.entity_tag(), empty.entity_tag());
        assert_ne!(one.entity_tag(), other.entity_tag());
        assert_eq!(one.entity_tag(), config(&["AS1 => AS2"]).entity_tag());
    }

    #[test]
    fn retain_held() {
        let mut configuration = config(&["AS1 => AS2", "AS64512 => AS3"]);
        let removed = configuration.retain_held(
            &ResourceSet::from_str("AS64512-AS65534").unwrap()
        );
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, Asn::from_u32(1));
        assert_eq!(configuration.canonical_text(), "AS64512 => AS3");
    }

    #[test]
    fn diff() {
        let current = config(&["AS1 => AS2, AS3", "AS5 => AS6"]);
        let updated = config(&["AS1 => AS2, AS4(v4)", "AS7 => <none>"]);
        let diff = current.diff(&updated);

        let keys: Vec<_> = diff.keys().map(|asn| asn.into_u32()).collect();
        assert_eq!(keys, vec![1, 5, 7]);
        assert_eq!(
            ietf_notation(Asn::from_u32(1), &diff[&Asn::from_u32(1)].added),
            "AS1 => AS4(v4)"
        );
        assert!(diff[&Asn::from_u32(5)].added.is_empty());
        assert_eq!(diff[&Asn::from_u32(5)].deleted.len(), 1);
        assert!(current.diff(&current).is_empty());
    }
}
