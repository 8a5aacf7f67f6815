// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-account exclusive locks with canonical ordering.
//!
//! Every account lives inside its own [`parking_lot::Mutex`]. The mutex is the
//! lock: holding its guard is the only way to reach `&mut Account`, so a
//! balance can never be mutated without the account lock held.
//!
//! # Deadlock avoidance
//!
//! Operations needing several accounts lock them in ascending [`AccountId`]
//! order, whatever order the caller names them in. With one global order no
//! cycle of waiters can form. Every acquisition is also bounded by a deadline;
//! a caller that cannot get its full lock set in time drops whatever it
//! already holds and reports [`LedgerError::LockTimeout`].

use crate::account::Account;
use crate::base::AccountId;
use crate::error::LedgerError;
use dashmap::DashMap;
use lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type AccountSlot = Arc<Mutex<Account>>;
type AccountGuard = ArcMutexGuard<RawMutex, Account>;

/// Upper bound applied to caller timeouts so deadlines stay representable.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24);

/// Locks held by one ledger operation.
///
/// Guards are kept in canonical order. Dropping the set releases every lock
/// still held, so locks are returned on every exit path, including early
/// returns and panics.
pub struct LockSet {
    guards: Vec<AccountGuard>,
    released: bool,
}

impl LockSet {
    fn new(guards: Vec<AccountGuard>) -> Self {
        Self {
            guards,
            released: false,
        }
    }

    /// Ids of the held accounts, in lock order.
    pub fn ids(&self) -> Vec<AccountId> {
        self.guards.iter().map(|guard| guard.id()).collect()
    }

    /// Returns `true` until [`LockSet::release`] has been called.
    pub fn is_held(&self) -> bool {
        !self.released
    }

    /// Read access to a held account.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LockNotHeld`] if the set was released or never locked `id`.
    pub fn account(&self, id: AccountId) -> Result<&Account, LedgerError> {
        if self.released {
            return Err(LedgerError::LockNotHeld);
        }
        self.guards
            .iter()
            .find(|guard| guard.id() == id)
            .map(|guard| &**guard)
            .ok_or(LedgerError::LockNotHeld)
    }

    pub(crate) fn account_mut(&mut self, id: AccountId) -> Result<&mut Account, LedgerError> {
        if self.released {
            return Err(LedgerError::LockNotHeld);
        }
        self.guards
            .iter_mut()
            .find(|guard| guard.id() == id)
            .map(|guard| &mut **guard)
            .ok_or(LedgerError::LockNotHeld)
    }

    /// Iterates over the held accounts in lock order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.guards.iter().map(|guard| &**guard)
    }

    /// Releases every lock in the set.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LockNotHeld`] if the set was already released. The set
    /// is left as it was; nothing is unlocked twice.
    pub fn release(&mut self) -> Result<(), LedgerError> {
        if self.released {
            error!("release called on a lock set that holds no locks");
            return Err(LedgerError::LockNotHeld);
        }
        let ids = self.ids();
        self.guards.clear();
        self.released = true;
        debug!(accounts = ?ids, "locks released");
        Ok(())
    }
}

/// Owner of the account table and its per-account locks.
///
/// Slots are cloned out of the [`DashMap`] before blocking, so no map shard is
/// held while a thread waits on an account.
#[derive(Debug, Default)]
pub struct LockManager {
    accounts: DashMap<AccountId, AccountSlot>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Registers an account. Returns `false` if the id is already taken.
    pub(crate) fn insert(&self, account: Account) -> bool {
        let id = account.id();
        match self.accounts.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(account)));
                true
            }
        }
    }

    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// All account ids in canonical lock order.
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn slot(&self, id: AccountId) -> Result<AccountSlot, LedgerError> {
        self.accounts
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::UnknownAccount(id))
    }

    fn deadline(timeout: Duration) -> Instant {
        Instant::now() + timeout.min(MAX_WAIT)
    }

    fn lock_until(
        id: AccountId,
        slot: &AccountSlot,
        deadline: Instant,
    ) -> Result<AccountGuard, LedgerError> {
        match Mutex::try_lock_arc_until(slot, deadline) {
            Some(guard) => Ok(guard),
            None => {
                warn!(account = %id, "lock acquisition timed out");
                Err(LedgerError::LockTimeout)
            }
        }
    }

    /// Locks one account.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownAccount`] - No account with this id.
    /// - [`LedgerError::LockTimeout`] - Lock not obtained within `timeout`.
    pub fn acquire_single(&self, id: AccountId, timeout: Duration) -> Result<LockSet, LedgerError> {
        let slot = self.slot(id)?;
        let guard = Self::lock_until(id, &slot, Self::deadline(timeout))?;
        Ok(LockSet::new(vec![guard]))
    }

    /// Locks two accounts in canonical order.
    ///
    /// Naming the same account twice takes a single lock. The second lock gets
    /// whatever remains of `timeout` after the first; if it cannot be taken the
    /// first is released before returning.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownAccount`] - Either id is unknown. No lock is taken.
    /// - [`LedgerError::LockTimeout`] - Both locks not obtained within `timeout`.
    pub fn acquire_pair(
        &self,
        a: AccountId,
        b: AccountId,
        timeout: Duration,
    ) -> Result<LockSet, LedgerError> {
        if a == b {
            return self.acquire_single(a, timeout);
        }

        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_slot = self.slot(first)?;
        let second_slot = self.slot(second)?;
        let deadline = Self::deadline(timeout);

        let first_guard = Self::lock_until(first, &first_slot, deadline)?;
        match Self::lock_until(second, &second_slot, deadline) {
            Ok(second_guard) => Ok(LockSet::new(vec![first_guard, second_guard])),
            Err(err) => {
                drop(first_guard);
                debug!(held = %first, wanted = %second, "released partial lock pair");
                Err(err)
            }
        }
    }

    /// Locks every account in canonical order under one shared deadline.
    ///
    /// Only accounts that exist when the call starts are included.
    pub fn acquire_all(&self, timeout: Duration) -> Result<LockSet, LedgerError> {
        let deadline = Self::deadline(timeout);
        let mut guards = Vec::with_capacity(self.accounts.len());
        for id in self.account_ids() {
            let slot = self.slot(id)?;
            guards.push(Self::lock_until(id, &slot, deadline)?);
        }
        Ok(LockSet::new(guards))
    }

    /// Releases a lock set. See [`LockSet::release`].
    pub fn release(&self, locks: &mut LockSet) -> Result<(), LedgerError> {
        locks.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::mpsc;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn manager_with(ids: &[u32]) -> Arc<LockManager> {
        let manager = LockManager::new();
        for id in ids {
            assert!(manager.insert(Account::new(AccountId(*id), dec!(100.00))));
        }
        Arc::new(manager)
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let manager = manager_with(&[1]);
        assert!(!manager.insert(Account::new(AccountId(1), Decimal::ZERO)));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn account_ids_are_sorted() {
        let manager = manager_with(&[5, 1, 3]);
        assert_eq!(
            manager.account_ids(),
            vec![AccountId(1), AccountId(3), AccountId(5)]
        );
    }

    #[test]
    fn acquire_single_unknown_account() {
        let manager = manager_with(&[1]);
        let result = manager.acquire_single(AccountId(9), TIMEOUT);
        assert!(matches!(result, Err(LedgerError::UnknownAccount(AccountId(9)))));
    }

    #[test]
    fn acquire_pair_orders_locks_canonically() {
        let manager = manager_with(&[1, 2]);
        let locks = manager.acquire_pair(AccountId(2), AccountId(1), TIMEOUT).unwrap();
        assert_eq!(locks.ids(), vec![AccountId(1), AccountId(2)]);
    }

    #[test]
    fn acquire_pair_same_account_takes_one_lock() {
        let manager = manager_with(&[4]);
        let locks = manager.acquire_pair(AccountId(4), AccountId(4), TIMEOUT).unwrap();
        assert_eq!(locks.ids(), vec![AccountId(4)]);
    }

    #[test]
    fn acquire_pair_unknown_account_takes_no_lock() {
        let manager = manager_with(&[1]);
        let result = manager.acquire_pair(AccountId(1), AccountId(2), TIMEOUT);
        assert!(matches!(result, Err(LedgerError::UnknownAccount(AccountId(2)))));
        // Account 1 must still be free.
        assert!(manager.acquire_single(AccountId(1), Duration::ZERO).is_ok());
    }

    #[test]
    fn acquire_single_times_out_while_held() {
        let manager = manager_with(&[1]);
        let _held = manager.acquire_single(AccountId(1), TIMEOUT).unwrap();

        let other = Arc::clone(&manager);
        let result = thread::spawn(move || {
            other
                .acquire_single(AccountId(1), Duration::from_millis(20))
                .map(|_| ())
        })
        .join()
        .unwrap();

        assert_eq!(result, Err(LedgerError::LockTimeout));
    }

    #[test]
    fn acquire_pair_timeout_releases_first_lock() {
        let manager = manager_with(&[1, 2]);
        // Hold the higher account so the pair stalls on its second lock.
        let held = manager.acquire_single(AccountId(2), TIMEOUT).unwrap();

        let other = Arc::clone(&manager);
        let result = thread::spawn(move || {
            let pair = other
                .acquire_pair(AccountId(1), AccountId(2), Duration::from_millis(20))
                .map(|_| ());
            // The lower account must be free again after the failed pair.
            let single = other.acquire_single(AccountId(1), Duration::ZERO).map(|_| ());
            (pair, single)
        })
        .join()
        .unwrap();

        assert_eq!(result.0, Err(LedgerError::LockTimeout));
        assert_eq!(result.1, Ok(()));
        drop(held);
    }

    #[test]
    fn waiting_acquire_succeeds_once_released() {
        let manager = manager_with(&[1]);
        let mut held = manager.acquire_single(AccountId(1), TIMEOUT).unwrap();
        let (ready_tx, ready_rx) = mpsc::channel();

        let other = Arc::clone(&manager);
        let waiter = thread::spawn(move || {
            ready_tx.send(()).unwrap();
            other
                .acquire_single(AccountId(1), Duration::from_secs(5))
                .map(|locks| locks.ids())
        });

        ready_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(10));
        manager.release(&mut held).unwrap();

        assert_eq!(waiter.join().unwrap(), Ok(vec![AccountId(1)]));
    }

    #[test]
    fn release_twice_signals_lock_not_held() {
        let manager = manager_with(&[1, 2]);
        let mut locks = manager.acquire_pair(AccountId(1), AccountId(2), TIMEOUT).unwrap();

        assert_eq!(manager.release(&mut locks), Ok(()));
        assert!(!locks.is_held());
        assert_eq!(manager.release(&mut locks), Err(LedgerError::LockNotHeld));

        // State is intact: both accounts can be locked again.
        let again = manager.acquire_pair(AccountId(1), AccountId(2), Duration::ZERO);
        assert!(again.is_ok());
    }

    #[test]
    fn released_set_denies_account_access() {
        let manager = manager_with(&[1]);
        let mut locks = manager.acquire_single(AccountId(1), TIMEOUT).unwrap();
        assert_eq!(locks.account(AccountId(1)).unwrap().balance(), dec!(100.00));

        locks.release().unwrap();
        assert!(matches!(locks.account(AccountId(1)), Err(LedgerError::LockNotHeld)));
        assert!(matches!(
            locks.account_mut(AccountId(1)),
            Err(LedgerError::LockNotHeld)
        ));
    }

    #[test]
    fn access_to_unlocked_account_is_denied() {
        let manager = manager_with(&[1, 2]);
        let mut locks = manager.acquire_single(AccountId(1), TIMEOUT).unwrap();
        assert!(matches!(
            locks.account_mut(AccountId(2)),
            Err(LedgerError::LockNotHeld)
        ));
    }

    #[test]
    fn dropping_set_releases_locks() {
        let manager = manager_with(&[1, 2]);
        {
            let _locks = manager.acquire_pair(AccountId(1), AccountId(2), TIMEOUT).unwrap();
        }
        assert!(manager.acquire_all(Duration::ZERO).is_ok());
    }

    #[test]
    fn acquire_all_locks_every_account_in_order() {
        let manager = manager_with(&[3, 1, 2]);
        let locks = manager.acquire_all(TIMEOUT).unwrap();
        assert_eq!(locks.ids(), vec![AccountId(1), AccountId(2), AccountId(3)]);
        let total: Decimal = locks.accounts().map(Account::balance).sum();
        assert_eq!(total, dec!(300.00));
    }

    #[test]
    fn acquire_all_on_empty_manager() {
        let manager = LockManager::new();
        let locks = manager.acquire_all(TIMEOUT).unwrap();
        assert!(locks.ids().is_empty());
    }
}
