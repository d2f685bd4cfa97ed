//! An in-memory aggregate store with optimistic transactions.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use log::{debug, trace};
use crate::commons::error::Error;
use super::{Aggregate, AggregateId, LockMode, LockTable, TxId};


//------------ AggregateStore ------------------------------------------------

/// Keeps the current version of all aggregates of one type.
///
/// Aggregates are only changed through a [`Transaction`]. A transaction
/// works on private copies of the aggregates it touches. When it commits,
/// the store checks that none of the changed aggregates was committed by
/// someone else in the meantime and then applies all changes at once.
#[derive(Debug)]
pub struct AggregateStore<A> {
    aggregates: RwLock<HashMap<AggregateId, A>>,
    locks: LockTable,
    next_id: AtomicU64,
    next_tx: AtomicU64,
}

impl<A> Default for AggregateStore<A> {
    fn default() -> Self {
        AggregateStore {
            aggregates: RwLock::new(HashMap::new()),
            locks: LockTable::default(),
            next_id: AtomicU64::new(1),
            next_tx: AtomicU64::new(1),
        }
    }
}

impl<A: Aggregate> AggregateStore<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new aggregate id.
    ///
    /// Ids are never reused, even if the transaction that was supposed to
    /// create the aggregate is rolled back.
    pub fn next_id(&self) -> AggregateId {
        self.next_id.fetch_add(1, Ordering::Relaxed).into()
    }

    /// Returns a copy of the committed state of an aggregate.
    pub fn get(&self, id: AggregateId) -> Option<A> {
        self.aggregates.read().expect("poisoned lock").get(&id).cloned()
    }

    /// Returns the committed version of an aggregate.
    pub fn version(&self, id: AggregateId) -> Option<u64> {
        self.aggregates.read().expect("poisoned lock").get(&id).map(
            A::version
        )
    }

    pub fn has(&self, id: AggregateId) -> bool {
        self.aggregates.read().expect("poisoned lock").contains_key(&id)
    }

    /// Returns the ids of all committed aggregates, sorted.
    pub fn ids(&self) -> Vec<AggregateId> {
        let mut ids: Vec<_> = self.aggregates.read().expect(
            "poisoned lock"
        ).keys().copied().collect();
        ids.sort();
        ids
    }

    /// Starts a new transaction.
    pub fn transaction(&self, lock_timeout: Duration) -> Transaction<'_, A> {
        let tx = TxId::from(self.next_tx.fetch_add(1, Ordering::Relaxed));
        trace!("Starting transaction {}", tx);
        Transaction {
            store: self,
            tx,
            lock_timeout,
            entries: HashMap::new(),
        }
    }
}


//------------ Entry ---------------------------------------------------------

/// The working copy of an aggregate inside a transaction.
#[derive(Debug)]
struct Entry<A> {
    /// The committed version when first read, `None` if it was absent.
    base: Option<u64>,

    /// The current state, `None` if absent or removed.
    working: Option<A>,

    dirty: bool,
    force_increment: bool,
}

impl<A> Entry<A> {
    fn has_changes(&self) -> bool {
        self.dirty || self.force_increment
    }

    fn pending_version(&self) -> Option<u64> {
        self.working.as_ref()?;
        match self.base {
            None => Some(0),
            Some(base) if self.has_changes() => Some(base + 1),
            Some(base) => Some(base),
        }
    }
}


//------------ Transaction ---------------------------------------------------

/// A unit of work against an [`AggregateStore`].
///
/// Either [`commit_with`][Self::commit_with] applies all changes, or none
/// of them become visible. Dropping the transaction without committing
/// rolls it back. Locks acquired through the transaction are released
/// when it ends.
#[derive(Debug)]
pub struct Transaction<'a, A: Aggregate> {
    store: &'a AggregateStore<A>,
    tx: TxId,
    lock_timeout: Duration,
    entries: HashMap<AggregateId, Entry<A>>,
}

impl<A: Aggregate> Transaction<'_, A> {
    pub fn id(&self) -> TxId {
        self.tx
    }

    /// Acquires a lock on the aggregate for the rest of the transaction.
    pub fn lock(&mut self, id: AggregateId, mode: LockMode) -> Result<(), Error> {
        self.store.locks.acquire(id, self.tx, mode, self.lock_timeout)
    }

    /// Locks the aggregate exclusively and makes sure its version is
    /// incremented on commit, even if it is not changed otherwise.
    pub fn lock_and_increment(&mut self, id: AggregateId) -> Result<(), Error> {
        self.lock(id, LockMode::Exclusive)?;
        let entry = self.load(id);
        if entry.working.is_some() {
            entry.force_increment = true;
        }
        Ok(())
    }

    fn load(&mut self, id: AggregateId) -> &mut Entry<A> {
        let store = self.store;
        self.entries.entry(id).or_insert_with(|| {
            let working = store.get(id);
            Entry {
                base: working.as_ref().map(A::version),
                working,
                dirty: false,
                force_increment: false,
            }
        })
    }

    /// Returns the aggregate as seen by this transaction.
    pub fn get(&mut self, id: AggregateId) -> Option<&A> {
        self.load(id).working.as_ref()
    }

    /// Returns the aggregate for changing it.
    ///
    /// The aggregate will get a new version on commit.
    pub fn get_mut(&mut self, id: AggregateId) -> Option<&mut A> {
        let entry = self.load(id);
        if entry.working.is_some() {
            entry.dirty = true;
        }
        entry.working.as_mut()
    }

    /// Adds a new aggregate.
    ///
    /// Returns `false` and leaves the transaction unchanged if an aggregate
    /// with the same id already exists.
    pub fn insert(&mut self, aggregate: A) -> bool {
        let entry = self.load(aggregate.id());
        if entry.working.is_some() {
            return false
        }
        entry.working = Some(aggregate);
        entry.dirty = true;
        true
    }

    /// Removes an aggregate, returning its last state.
    pub fn remove(&mut self, id: AggregateId) -> Option<A> {
        let entry = self.load(id);
        let removed = entry.working.take();
        if removed.is_some() {
            entry.dirty = true;
        }
        removed
    }

    /// Returns the version the aggregate will have once committed.
    pub fn pending_version(&mut self, id: AggregateId) -> Option<u64> {
        self.load(id).pending_version()
    }

    /// Returns whether anything will be written on commit.
    pub fn has_changes(&self) -> bool {
        self.entries.values().any(Entry::has_changes)
    }

    /// Commits all changes.
    ///
    /// Fails with a version conflict, and changes nothing, if any changed
    /// aggregate was committed by another transaction after it was first
    /// read by this one. The `on_commit` closure is run while the changes
    /// are applied, so that related data can be written together with them.
    pub fn commit_with<F>(
        mut self, on_commit: F
    ) -> Result<CommittedVersions, Error>
    where
        F: FnOnce(&CommittedVersions),
    {
        let entries = std::mem::take(&mut self.entries);
        let mut aggregates = self.store.aggregates.write().expect(
            "poisoned lock"
        );

        for (id, entry) in &entries {
            if !entry.has_changes() {
                continue
            }
            let found = aggregates.get(id).map(A::version);
            if found != entry.base {
                debug!(
                    "Transaction {} conflicts on aggregate {}: \
                     expected {:?}, found {:?}",
                    self.tx, id, entry.base, found
                );
                return Err(Error::VersionConflict {
                    id: *id,
                    expected: entry.base.unwrap_or_default(),
                    found,
                })
            }
        }

        let mut versions = CommittedVersions::default();
        for (id, entry) in entries {
            let version = entry.pending_version();
            if !entry.has_changes() {
                if let Some(version) = version {
                    versions.0.insert(id, version);
                }
                continue
            }
            match (entry.working, version) {
                (Some(mut aggregate), Some(version)) => {
                    aggregate.set_version(version);
                    aggregates.insert(id, aggregate);
                    versions.0.insert(id, version);
                }
                _ => {
                    aggregates.remove(&id);
                }
            }
        }
        on_commit(&versions);
        trace!("Committed transaction {}", self.tx);
        Ok(versions)
    }

    /// Commits all changes.
    pub fn commit(self) -> Result<CommittedVersions, Error> {
        self.commit_with(|_| ())
    }

    /// Discards all changes.
    pub fn rollback(self) {
        trace!("Rolled back transaction {}", self.tx);
    }
}

impl<A: Aggregate> Drop for Transaction<'_, A> {
    fn drop(&mut self) {
        self.store.locks.release_all(self.tx);
    }
}


//------------ CommittedVersions ---------------------------------------------

/// The versions of all aggregates touched by a committed transaction.
#[derive(Clone, Debug, Default)]
pub struct CommittedVersions(HashMap<AggregateId, u64>);

impl CommittedVersions {
    pub fn get(&self, id: AggregateId) -> Option<u64> {
        self.0.get(&id).copied()
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Counter {
        id: AggregateId,
        version: u64,
        value: u64,
    }

    impl Counter {
        fn new(id: AggregateId) -> Self {
            Counter { id, version: 0, value: 0 }
        }
    }

    impl Aggregate for Counter {
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

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn store_with_counter() -> (AggregateStore<Counter>, AggregateId) {
        let store = AggregateStore::new();
        let id = store.next_id();
        let mut tx = store.transaction(TIMEOUT);
        assert!(tx.insert(Counter::new(id)));
        let versions = tx.commit().unwrap();
        assert_eq!(versions.get(id), Some(0));
        (store, id)
    }

    #[test]
    fn one_increment_per_transaction() {
        let (store, id) = store_with_counter();

        let mut tx = store.transaction(TIMEOUT);
        tx.lock(id, LockMode::Exclusive).unwrap();
        tx.get_mut(id).unwrap().value += 1;
        tx.get_mut(id).unwrap().value += 1;
        assert_eq!(tx.pending_version(id), Some(1));
        tx.commit().unwrap();

        let counter = store.get(id).unwrap();
        assert_eq!(counter.version, 1);
        assert_eq!(counter.value, 2);
    }

    #[test]
    fn read_only_keeps_version() {
        let (store, id) = store_with_counter();

        let mut tx = store.transaction(TIMEOUT);
        assert_eq!(tx.get(id).unwrap().value, 0);
        assert!(!tx.has_changes());
        tx.commit().unwrap();
        assert_eq!(store.version(id), Some(0));

        let mut tx = store.transaction(TIMEOUT);
        tx.lock_and_increment(id).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.version(id), Some(1));
    }

    #[test]
    fn rollback_discards() {
        let (store, id) = store_with_counter();

        let mut tx = store.transaction(TIMEOUT);
        tx.get_mut(id).unwrap().value = 10;
        let other = store.next_id();
        tx.insert(Counter::new(other));
        tx.rollback();

        assert_eq!(store.get(id).unwrap().value, 0);
        assert!(!store.has(other));
        assert_ne!(store.next_id(), other);
    }

    #[test]
    fn concurrent_change_conflicts() {
        let (store, id) = store_with_counter();

        let mut first = store.transaction(TIMEOUT);
        let mut second = store.transaction(TIMEOUT);
        first.get_mut(id).unwrap().value = 1;
        second.get_mut(id).unwrap().value = 2;

        first.commit().unwrap();
        let mut written = false;
        let res = second.commit_with(|_| written = true);
        assert!(matches!(
            res,
            Err(Error::VersionConflict { expected: 0, found: Some(1), .. })
        ));
        assert!(!written);
        assert_eq!(store.get(id).unwrap().value, 1);
    }

    #[test]
    fn locks_released_when_transaction_ends() {
        let (store, id) = store_with_counter();

        let mut first = store.transaction(TIMEOUT);
        first.lock(id, LockMode::Exclusive).unwrap();

        let mut second = store.transaction(TIMEOUT);
        assert!(matches!(
            second.lock(id, LockMode::Shared),
            Err(Error::LockTimeout(_))
        ));

        drop(first);
        second.lock(id, LockMode::Shared).unwrap();
    }

    #[test]
    fn insert_and_remove() {
        let (store, id) = store_with_counter();

        let mut tx = store.transaction(TIMEOUT);
        assert!(!tx.insert(Counter::new(id)));
        assert!(tx.remove(id).is_some());
        assert!(tx.get(id).is_none());
        assert_eq!(tx.pending_version(id), None);
        tx.commit().unwrap();

        assert!(!store.has(id));
        assert!(store.ids().is_empty());
    }
}
