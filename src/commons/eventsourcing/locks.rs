//! Support locking on aggregates so that updates by concurrent
//! transactions are performed sequentially.
//!
//! Locks are owned by a transaction rather than by a thread. A transaction
//! can acquire a lock it already holds again, and it can upgrade a shared
//! lock to an exclusive one if it is the only holder. All locks of a
//! transaction are released together when it ends.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use log::trace;
use crate::commons::error::Error;
use super::AggregateId;


//------------ TxId ----------------------------------------------------------

/// The identifier of a transaction owning locks.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TxId(u64);

impl From<u64> for TxId {
    fn from(id: u64) -> Self {
        TxId(id)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}


//------------ LockMode ------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Other transactions may read but not lock exclusively.
    Shared,

    /// No other transaction may lock the aggregate.
    Exclusive,
}


//------------ LockState -----------------------------------------------------

#[derive(Debug, Default)]
struct LockState {
    exclusive: Option<TxId>,
    shared: HashSet<TxId>,
}

impl LockState {
    fn can_grant(&self, tx: TxId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => {
                self.exclusive.is_none() || self.exclusive == Some(tx)
            }
            LockMode::Exclusive => {
                (self.exclusive.is_none() || self.exclusive == Some(tx))
                    && self.shared.iter().all(|holder| *holder == tx)
            }
        }
    }

    fn grant(&mut self, tx: TxId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                if self.exclusive != Some(tx) {
                    self.shared.insert(tx);
                }
            }
            LockMode::Exclusive => {
                self.shared.remove(&tx);
                self.exclusive = Some(tx);
            }
        }
    }

    fn release(&mut self, tx: TxId) {
        if self.exclusive == Some(tx) {
            self.exclusive = None;
        }
        self.shared.remove(&tx);
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}


//------------ LockTable -----------------------------------------------------

/// Shared and exclusive locks for aggregates, owned by transactions.
///
/// Waiting for a lock blocks on a condition variable until the lock is
/// released or the timeout expires.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<AggregateId, LockState>>,
    released: Condvar,
}

impl LockTable {
    /// Acquires a lock for the transaction, waiting up to `timeout`.
    pub fn acquire(
        &self,
        id: AggregateId,
        tx: TxId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let mut locks = self.locks.lock().expect("poisoned lock");
        loop {
            let state = locks.entry(id).or_default();
            if state.can_grant(tx, mode) {
                state.grant(tx, mode);
                trace!("{} acquired {:?} lock on {}", tx, mode, id);
                return Ok(())
            }

            let now = Instant::now();
            if now >= deadline {
                trace!("{} timed out waiting for lock on {}", tx, id);
                return Err(Error::LockTimeout(id))
            }
            locks = self.released
                .wait_timeout(locks, deadline - now)
                .expect("poisoned lock")
                .0;
        }
    }

    /// Returns whether the transaction holds a lock of at least `mode`.
    pub fn holds(&self, id: AggregateId, tx: TxId, mode: LockMode) -> bool {
        let locks = self.locks.lock().expect("poisoned lock");
        match locks.get(&id) {
            Some(state) => match mode {
                LockMode::Exclusive => state.exclusive == Some(tx),
                LockMode::Shared => {
                    state.exclusive == Some(tx) || state.shared.contains(&tx)
                }
            }
            None => false,
        }
    }

    /// Releases all locks held by the transaction.
    pub fn release_all(&self, tx: TxId) {
        let mut locks = self.locks.lock().expect("poisoned lock");
        for state in locks.values_mut() {
            state.release(tx);
        }
        locks.retain(|_, state| !state.is_free());
        self.released.notify_all();
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn shared_locks_are_compatible() {
        let table = LockTable::default();
        let id = AggregateId::from(1);
        let (a, b) = (TxId::from(1), TxId::from(2));

        table.acquire(id, a, LockMode::Shared, SHORT).unwrap();
        table.acquire(id, b, LockMode::Shared, SHORT).unwrap();
        assert!(matches!(
            table.acquire(id, a, LockMode::Exclusive, SHORT),
            Err(Error::LockTimeout(_))
        ));

        table.release_all(b);
        table.acquire(id, a, LockMode::Exclusive, SHORT).unwrap();
        assert!(table.holds(id, a, LockMode::Exclusive));
        assert!(!table.holds(id, b, LockMode::Shared));
    }

    #[test]
    fn exclusive_lock_is_reentrant() {
        let table = LockTable::default();
        let id = AggregateId::from(1);
        let a = TxId::from(1);

        table.acquire(id, a, LockMode::Exclusive, SHORT).unwrap();
        table.acquire(id, a, LockMode::Exclusive, SHORT).unwrap();
        table.acquire(id, a, LockMode::Shared, SHORT).unwrap();
        assert!(matches!(
            table.acquire(id, TxId::from(2), LockMode::Shared, SHORT),
            Err(Error::LockTimeout(_))
        ));
    }

    #[test]
    fn waiter_is_woken_on_release() {
        let table = Arc::new(LockTable::default());
        let id = AggregateId::from(1);
        table.acquire(id, TxId::from(1), LockMode::Exclusive, SHORT).unwrap();

        let waiter = {
            let table = table.clone();
            thread::spawn(move || {
                table.acquire(
                    id, TxId::from(2), LockMode::Exclusive,
                    Duration::from_secs(10)
                )
            })
        };

        thread::sleep(SHORT);
        table.release_all(TxId::from(1));
        assert!(waiter.join().unwrap().is_ok());
        assert!(table.holds(id, TxId::from(2), LockMode::Exclusive));
    }
}
