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

//! Single-transfer execution.
//!
//! A [`TransferCoordinator`] runs one transfer attempt as an all-or-nothing
//! unit:
//!
//! ```text
//! Validating ──► Locking ──► Mutating ──► Releasing ──► Completed
//!     │             │            │
//!     ▼             ▼            ▼
//!  Rejected   Failed(retry)  Failed(no retry)
//! ```
//!
//! Validation happens before any lock is taken. Both balances change while
//! both account locks are held, so no other operation can observe the debit
//! without the matching credit.

use crate::base::{AccountId, TransferId};
use crate::error::LedgerError;
use crate::lock_manager::{LockManager, LockSet};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Terminal result of a transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferOutcome {
    /// Both legs applied.
    Completed,
    /// Request was invalid; nothing was locked or changed.
    Rejected(LedgerError),
    /// Request was valid but could not be applied; nothing was changed.
    Failed { reason: LedgerError, retryable: bool },
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferOutcome::Failed { retryable: true, .. })
    }

    /// The error behind a non-completed outcome.
    pub fn reason(&self) -> Option<LedgerError> {
        match self {
            TransferOutcome::Completed => None,
            TransferOutcome::Rejected(reason) | TransferOutcome::Failed { reason, .. } => {
                Some(*reason)
            }
        }
    }

    fn failed(reason: LedgerError) -> Self {
        TransferOutcome::Failed {
            reason,
            retryable: reason.is_retryable(),
        }
    }
}

/// Audit entry produced at the end of every transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub outcome: TransferOutcome,
}

impl TransferRecord {
    pub fn new(
        id: TransferId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        outcome: TransferOutcome,
    ) -> Self {
        Self {
            id,
            from,
            to,
            amount,
            timestamp: Utc::now(),
            outcome,
        }
    }
}

/// Executes transfers against the accounts owned by a [`LockManager`].
pub struct TransferCoordinator<'a> {
    locks: &'a LockManager,
}

impl<'a> TransferCoordinator<'a> {
    pub fn new(locks: &'a LockManager) -> Self {
        Self { locks }
    }

    /// Runs one transfer attempt.
    ///
    /// Validation and funds problems come back as `Ok` outcomes. `Err` is
    /// reserved for [`LedgerError::LockNotHeld`], which means lock bookkeeping
    /// is broken and must not be mistaken for an ordinary failure.
    pub fn execute(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        timeout: Duration,
    ) -> Result<TransferOutcome, LedgerError> {
        // Validating
        if amount <= Decimal::ZERO {
            return Ok(TransferOutcome::Rejected(LedgerError::InvalidAmount));
        }
        for id in [from, to] {
            if !self.locks.contains(id) {
                return Ok(TransferOutcome::Rejected(LedgerError::UnknownAccount(id)));
            }
        }

        // Locking
        let mut locks = match self.locks.acquire_pair(from, to, timeout) {
            Ok(locks) => locks,
            Err(err @ LedgerError::UnknownAccount(_)) => {
                return Ok(TransferOutcome::Rejected(err));
            }
            Err(err) => {
                debug!(%from, %to, %err, "transfer could not lock accounts");
                return Ok(TransferOutcome::failed(err));
            }
        };

        // Mutating
        let outcome = match Self::apply(&mut locks, from, to, amount) {
            Ok(()) => TransferOutcome::Completed,
            Err(LedgerError::LockNotHeld) => return Err(LedgerError::LockNotHeld),
            Err(err) => TransferOutcome::failed(err),
        };

        // Releasing
        locks.release()?;

        debug!(%from, %to, %amount, ?outcome, "transfer finished");
        Ok(outcome)
    }

    fn apply(
        locks: &mut LockSet,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if from == to {
            // Nothing moves, but the transfer must still be fundable.
            if locks.account(from)?.balance() < amount {
                return Err(LedgerError::InsufficientFunds);
            }
            return Ok(());
        }

        locks.account_mut(from)?.debit(amount)?;
        let credited = locks.account_mut(to).and_then(|account| account.credit(amount));
        if let Err(err) = credited {
            // Undo the debit while both locks are still held.
            locks.account_mut(from)?.credit(amount)?;
            return Err(err);
        }
        Ok(())
    }
}
