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

//! Core identifier types for accounts and transfers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a ledger account.
///
/// Identifiers are totally ordered. Every multi-account lock acquisition
/// takes locks in ascending `AccountId` order, which is what keeps two
/// opposite-direction transfers from waiting on each other forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single transfer attempt.
///
/// Assigned by the ledger from a monotonic counter; every attempt, including
/// retries of the same request, gets its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_ids_order_numerically() {
        let mut ids = vec![AccountId(7), AccountId(2), AccountId(10)];
        ids.sort();
        assert_eq!(ids, vec![AccountId(2), AccountId(7), AccountId(10)]);
    }

    #[test]
    fn ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&AccountId(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&TransferId(9)).unwrap(), "9");
    }
}
