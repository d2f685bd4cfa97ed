//! Transactional aggregate storage and synchronous event propagation.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

mod bus;
pub use self::bus::{DelegateGuard, PropagationScope, Subscription};

mod locks;
pub use self::locks::{LockMode, LockTable, TxId};

mod store;
pub use self::store::{AggregateStore, CommittedVersions, Transaction};


//------------ Aggregate -----------------------------------------------------

/// An aggregate kept in an [`AggregateStore`].
///
/// The aggregate root is responsible for guarding its own consistency. It
/// is only changed inside a [`Transaction`] and the store assigns its
/// version when the transaction commits.
pub trait Aggregate: Clone + Send + Sync + 'static {
    /// Returns the identifier of the aggregate.
    fn id(&self) -> AggregateId;

    /// Returns the current version of the aggregate.
    fn version(&self) -> u64;

    /// Sets the version. Only called by the store.
    fn set_version(&mut self, version: u64);
}


//------------ AggregateId ---------------------------------------------------

/// The identifier of an aggregate.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct AggregateId(u64);

impl AggregateId {
    pub fn into_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for AggregateId {
    fn from(id: u64) -> Self {
        AggregateId(id)
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ VersionedId ---------------------------------------------------

/// An aggregate identifier together with a version of that aggregate.
///
/// The textual form is `id:version`.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct VersionedId {
    id: AggregateId,
    version: u64,
}

impl VersionedId {
    pub fn new(id: AggregateId, version: u64) -> Self {
        VersionedId { id, version }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the same id with the given version.
    pub fn with_version(self, version: u64) -> Self {
        VersionedId { id: self.id, version }
    }
}

impl FromStr for VersionedId {
    type Err = VersionedIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, version) = s.split_once(':').ok_or(VersionedIdError)?;
        let id = u64::from_str(id).map_err(|_| VersionedIdError)?;
        let version = u64::from_str(version).map_err(|_| VersionedIdError)?;
        Ok(VersionedId::new(id.into(), version))
    }
}

impl fmt::Display for VersionedId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.version)
    }
}


//------------ VersionedIdError ----------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VersionedIdError;

impl fmt::Display for VersionedIdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("expected 'id:version'")
    }
}

impl std::error::Error for VersionedIdError {}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_id_text() {
        let id = VersionedId::new(AggregateId::from(12), 3);
        assert_eq!(id.to_string(), "12:3");
        assert_eq!(VersionedId::from_str("12:3").unwrap(), id);
        assert_eq!(id.with_version(4).to_string(), "12:4");
        assert!(VersionedId::from_str("12").is_err());
        assert!(VersionedId::from_str("a:1").is_err());
    }
}
