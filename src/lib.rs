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

//! # Concurrent Ledger
//!
//! An in-memory transactional ledger. Many threads may move money between
//! accounts at once; the ledger guarantees no lost updates, no negative
//! balances, atomic two-account transfers, and freedom from deadlock.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Public API owning every account
//! - [`LockManager`]: Timed per-account locks taken in canonical id order
//! - [`TransferCoordinator`]: Runs one transfer as an all-or-nothing unit
//! - [`TransferSink`]: Audit hook receiving a [`TransferRecord`] per attempt
//! - [`LedgerError`]: Error taxonomy, with [`LedgerError::is_retryable`]
//!
//! ## Example
//!
//! ```
//! use concurrent_ledger::{Ledger, LedgerConfig, TransferOutcome};
//! use rust_decimal_macros::dec;
//! use std::time::Duration;
//!
//! let ledger = Ledger::new(LedgerConfig::default());
//! let a = ledger.open_account(dec!(100.00)).unwrap();
//! let b = ledger.open_account(dec!(50.00)).unwrap();
//!
//! let outcome = ledger
//!     .transfer(a, b, dec!(30.00), Duration::from_millis(100))
//!     .unwrap();
//! assert_eq!(outcome, TransferOutcome::Completed);
//! assert_eq!(ledger.balance_of(a).unwrap(), dec!(70.00));
//! assert_eq!(ledger.balance_of(b).unwrap(), dec!(80.00));
//! ```
//!
//! ## Thread Safety
//!
//! Each account sits behind its own mutex. Transfers between disjoint pairs
//! run fully in parallel; transfers sharing an account serialize on it.
//! Every lock acquisition is bounded by a timeout, and timeouts are retried
//! with jittered backoff.

pub mod account;
mod base;
mod config;
mod coordinator;
pub mod error;
mod journal;
mod ledger;
mod lock_manager;

pub use account::{Account, AccountSnapshot};
pub use base::{AccountId, TransferId};
pub use config::{LedgerConfig, RetryPolicy};
pub use coordinator::{TransferCoordinator, TransferOutcome, TransferRecord};
pub use error::LedgerError;
pub use journal::{NoopSink, TransferJournal, TransferSink};
pub use ledger::Ledger;
pub use lock_manager::{LockManager, LockSet};
