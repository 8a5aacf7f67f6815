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

//! Account state.
//!
//! An [`Account`] is the atomic unit of ledger state: an immutable id and a
//! non-negative fixed-point balance. Accounts are only ever reachable mutably
//! through a [`LockSet`](crate::LockSet), so `credit` and `debit` always run
//! with the account's lock held.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use concurrent_ledger::{Ledger, LedgerConfig};
//!
//! let ledger = Ledger::new(LedgerConfig::default());
//! let id = ledger.open_account(dec!(25.00)).unwrap();
//! let snapshot = ledger.snapshot(id).unwrap();
//! assert_eq!(snapshot.balance, dec!(25.00));
//! ```

use crate::base::AccountId;
use crate::error::LedgerError;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Ledger account.
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    balance: Decimal,
}

impl Account {
    /// Number of decimal places used when serializing balances.
    pub const DECIMAL_PRECISION: u32 = 4;

    pub(crate) fn new(id: AccountId, balance: Decimal) -> Self {
        let account = Self { id, balance };
        account.assert_invariants();
        account
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance of account {} went negative: {}",
            self.id,
            self.balance
        );
    }

    /// Increases the balance.
    pub(crate) fn credit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;
        self.assert_invariants();
        Ok(())
    }

    /// Decreases the balance, refusing to go below zero.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        self.balance -= amount;
        self.assert_invariants();
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id,
            balance: self.balance,
        }
    }
}

/// Point-in-time copy of an account, taken while its lock was held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub balance: Decimal,
}

impl Serialize for AccountSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("AccountSnapshot", 2)?;
        state.serialize_field("account", &self.id)?;
        state.serialize_field(
            "balance",
            &self.balance.round_dp(Account::DECIMAL_PRECISION),
        )?;
        state.end()
    }
}
