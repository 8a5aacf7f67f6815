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

//! Error types for ledger operations.

use crate::base::AccountId;
use serde::Serialize;
use thiserror::Error;

/// Ledger operation errors.
///
/// Validation and funds errors are deterministic for a given ledger state and
/// are never retried. [`LedgerError::LockTimeout`] is the only retryable
/// kind. [`LedgerError::LockNotHeld`] signals a bug in lock bookkeeping and
/// must reach the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Referenced account does not exist
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    /// Debit would take the balance below zero
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Credit would exceed the representable balance
    #[error("balance overflow")]
    BalanceOverflow,

    /// Locks could not be acquired within the timeout
    #[error("timed out acquiring account lock")]
    LockTimeout,

    /// The account id space is used up
    #[error("no account ids left")]
    AccountIdsExhausted,

    /// Account id is already taken
    #[error("account {0} already exists")]
    DuplicateAccount(AccountId),

    /// Release or access through a lock set that no longer holds its locks
    #[error("lock not held")]
    LockNotHeld,
}

impl LedgerError {
    /// Whether re-attempting the same operation may succeed unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::LedgerError;
    use crate::base::AccountId;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            LedgerError::UnknownAccount(AccountId(3)).to_string(),
            "unknown account 3"
        );
        assert_eq!(
            LedgerError::InsufficientFunds.to_string(),
            "insufficient funds"
        );
        assert_eq!(LedgerError::BalanceOverflow.to_string(), "balance overflow");
        assert_eq!(
            LedgerError::LockTimeout.to_string(),
            "timed out acquiring account lock"
        );
        assert_eq!(
            LedgerError::AccountIdsExhausted.to_string(),
            "no account ids left"
        );
        assert_eq!(
            LedgerError::DuplicateAccount(AccountId(4)).to_string(),
            "account 4 already exists"
        );
        assert_eq!(LedgerError::LockNotHeld.to_string(), "lock not held");
    }

    #[test]
    fn only_lock_timeout_is_retryable() {
        assert!(LedgerError::LockTimeout.is_retryable());
        assert!(!LedgerError::InvalidAmount.is_retryable());
        assert!(!LedgerError::UnknownAccount(AccountId(1)).is_retryable());
        assert!(!LedgerError::InsufficientFunds.is_retryable());
        assert!(!LedgerError::BalanceOverflow.is_retryable());
        assert!(!LedgerError::AccountIdsExhausted.is_retryable());
        assert!(!LedgerError::DuplicateAccount(AccountId(1)).is_retryable());
        assert!(!LedgerError::LockNotHeld.is_retryable());
    }

    #[test]
    fn errors_are_clone_and_eq() {
        let err = LedgerError::InsufficientFunds;
        assert_eq!(err, err.clone());
        assert_ne!(LedgerError::InvalidAmount, LedgerError::LockTimeout);
    }
}
