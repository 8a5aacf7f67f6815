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

//! Public ledger API.
//!
//! The [`Ledger`] owns every account and is the only way to change a balance.
//! It composes the [`LockManager`] (who may touch which account, and when) with
//! the [`TransferCoordinator`] (what a transfer does once its locks are held)
//! and retries lock timeouts according to the configured [`RetryPolicy`].
//!
//! # Operations
//!
//! | Operation | Locks | Retries |
//! |-----------|-------|---------|
//! | `transfer` | both accounts, canonical order | on lock timeout |
//! | `deposit` / `withdraw` | one account | on lock timeout |
//! | `balance_of` / `snapshot` | one account | on lock timeout |
//! | `total_balance` | every account, canonical order | on lock timeout |
//!
//! # Invariants
//!
//! - No balance is ever negative, not even transiently.
//! - Transfers conserve the sum of all balances; only deposits and
//!   withdrawals change it.
//! - Account ids are never reused.
//!
//! [`RetryPolicy`]: crate::RetryPolicy

use crate::account::{Account, AccountSnapshot};
use crate::base::{AccountId, TransferId};
use crate::config::LedgerConfig;
use crate::coordinator::{TransferCoordinator, TransferOutcome, TransferRecord};
use crate::error::LedgerError;
use crate::journal::{NoopSink, TransferSink};
use crate::lock_manager::{LockManager, LockSet};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// In-memory transactional ledger.
///
/// Safe to share between threads behind an [`Arc`]. Operations on disjoint
/// accounts proceed in parallel; operations sharing an account serialize on
/// that account's lock.
pub struct Ledger {
    locks: LockManager,
    config: LedgerConfig,
    sink: Arc<dyn TransferSink>,
    next_account: AtomicU32,
    next_transfer: AtomicU64,
}

impl Ledger {
    /// Creates an empty ledger that discards transfer records.
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopSink))
    }

    /// Creates an empty ledger that reports every transfer attempt to `sink`.
    pub fn with_sink(config: LedgerConfig, sink: Arc<dyn TransferSink>) -> Self {
        Ledger {
            locks: LockManager::new(),
            config,
            sink,
            next_account: AtomicU32::new(1),
            next_transfer: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Ids of all accounts in canonical lock order.
    pub fn account_ids(&self) -> Vec<AccountId> {
        self.locks.account_ids()
    }

    /// Opens a new account and returns its id.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `initial_balance` is negative.
    /// - [`LedgerError::AccountIdsExhausted`] - Every id has been handed out.
    /// - [`LedgerError::DuplicateAccount`] - The allocated id is already taken.
    #[instrument(skip(self), level = "debug")]
    pub fn open_account(&self, initial_balance: Decimal) -> Result<AccountId, LedgerError> {
        if initial_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let id = self
            .next_account
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(1))
            .map(AccountId)
            .map_err(|_| LedgerError::AccountIdsExhausted)?;
        if !self.locks.insert(Account::new(id, initial_balance)) {
            error!(account = %id, "account id handed out twice");
            return Err(LedgerError::DuplicateAccount(id));
        }
        info!(account = %id, %initial_balance, "account opened");
        Ok(id)
    }

    /// Moves `amount` from one account to another as a single atomic unit.
    ///
    /// `timeout` bounds each attempt's lock acquisition. Attempts that time
    /// out are retried with jittered backoff up to the policy's limit; every
    /// attempt produces one [`TransferRecord`] for the configured sink.
    ///
    /// # Outcomes
    ///
    /// | Outcome | Cause |
    /// |---------|-------|
    /// | `Completed` | Funds moved (or self-transfer of an affordable amount) |
    /// | `Rejected(InvalidAmount)` | `amount <= 0` |
    /// | `Rejected(UnknownAccount)` | Either id does not exist |
    /// | `Failed { InsufficientFunds, retryable: false }` | `from` balance too low |
    /// | `Failed { BalanceOverflow, retryable: false }` | `to` balance would overflow |
    /// | `Failed { LockTimeout, retryable: true }` | Retries exhausted |
    ///
    /// # Errors
    ///
    /// [`LedgerError::LockNotHeld`] if lock bookkeeping is violated. This is a
    /// bug, never a business outcome.
    #[instrument(skip(self), level = "debug")]
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        timeout: Duration,
    ) -> Result<TransferOutcome, LedgerError> {
        let coordinator = TransferCoordinator::new(&self.locks);
        let mut attempt = 0;

        loop {
            let id = TransferId(self.next_transfer.fetch_add(1, Ordering::Relaxed));
            let outcome = coordinator
                .execute(from, to, amount, timeout)
                .map_err(|err| {
                    error!(transfer = %id, %from, %to, %err, "lock invariant violated");
                    err
                })?;

            self.sink
                .record(&TransferRecord::new(id, from, to, amount, outcome));

            match outcome {
                TransferOutcome::Failed {
                    reason,
                    retryable: true,
                } if self.backoff(&mut attempt, reason) => continue,
                _ => return Ok(outcome),
            }
        }
    }

    /// Credits an account and returns its new balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`.
    /// - [`LedgerError::UnknownAccount`] - No such account.
    /// - [`LedgerError::BalanceOverflow`] - Balance would exceed the decimal range.
    /// - [`LedgerError::LockTimeout`] - Retries exhausted.
    #[instrument(skip(self), level = "debug")]
    pub fn deposit(&self, id: AccountId, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.with_single(id, |locks| {
            let account = locks.account_mut(id)?;
            account.credit(amount)?;
            Ok(account.balance())
        })
    }

    /// Debits an account and returns its new balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`.
    /// - [`LedgerError::UnknownAccount`] - No such account.
    /// - [`LedgerError::InsufficientFunds`] - Balance lower than `amount`.
    /// - [`LedgerError::LockTimeout`] - Retries exhausted.
    #[instrument(skip(self), level = "debug")]
    pub fn withdraw(&self, id: AccountId, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.with_single(id, |locks| {
            let account = locks.account_mut(id)?;
            account.debit(amount)?;
            Ok(account.balance())
        })
    }

    /// Reads an account's balance under its lock.
    pub fn balance_of(&self, id: AccountId) -> Result<Decimal, LedgerError> {
        self.with_single(id, |locks| Ok(locks.account(id)?.balance()))
    }

    /// Copies an account under its lock.
    pub fn snapshot(&self, id: AccountId) -> Result<AccountSnapshot, LedgerError> {
        self.with_single(id, |locks| Ok(locks.account(id)?.snapshot()))
    }

    /// Sums every balance from one consistent snapshot.
    ///
    /// Locks all accounts at once, so it stalls every other operation while
    /// it runs. Meant for invariant checks, not for hot paths.
    pub fn total_balance(&self) -> Result<Decimal, LedgerError> {
        self.with_retry(|| {
            let mut locks = self.locks.acquire_all(self.config.lock_timeout)?;
            let total = locks
                .accounts()
                .try_fold(Decimal::ZERO, |sum, account| sum.checked_add(account.balance()))
                .ok_or(LedgerError::BalanceOverflow)?;
            locks.release()?;
            Ok(total)
        })
    }

    /// Runs `op` with one account locked, retrying lock timeouts.
    fn with_single<T>(
        &self,
        id: AccountId,
        op: impl Fn(&mut LockSet) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        self.with_retry(|| {
            let mut locks = self.locks.acquire_single(id, self.config.lock_timeout)?;
            let value = op(&mut locks)?;
            locks.release()?;
            Ok(value)
        })
    }

    fn with_retry<T>(
        &self,
        op: impl Fn() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if self.backoff(&mut attempt, err) => continue,
                result => return result,
            }
        }
    }

    /// Sleeps before the next retry. Returns `false` when `reason` is not
    /// retryable or the policy is exhausted.
    fn backoff(&self, attempt: &mut u32, reason: LedgerError) -> bool {
        if !reason.is_retryable() {
            return false;
        }
        if !self.config.retry.should_retry(*attempt) {
            warn!(attempts = *attempt + 1, %reason, "giving up after lock contention");
            return false;
        }
        *attempt += 1;
        let delay = self.config.retry.delay_for_attempt(*attempt);
        warn!(attempt = *attempt, ?delay, %reason, "retrying after lock contention");
        thread::sleep(delay);
        true
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}
