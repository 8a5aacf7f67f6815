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

//! Audit hook for transfer records.
//!
//! The ledger hands every [`TransferRecord`] to a [`TransferSink`]. Storage
//! and transport belong to whoever implements the sink; [`TransferJournal`]
//! is an in-memory implementation for tests and embedding.

use crate::base::TransferId;
use crate::coordinator::TransferRecord;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;

/// Receiver of transfer records.
///
/// Called on the transferring thread after its locks are released, so a slow
/// sink delays the caller but never blocks other accounts.
pub trait TransferSink: Send + Sync {
    fn record(&self, record: &TransferRecord);
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TransferSink for NoopSink {
    fn record(&self, _record: &TransferRecord) {}
}

/// A thread-safe, append-only record journal.
///
/// Combines a [`DashMap`] for lookup by id with a [`SegQueue`] that preserves
/// arrival order. Safe for concurrent use from every transferring thread.
#[derive(Debug, Default)]
pub struct TransferJournal {
    records: DashMap<TransferId, TransferRecord>,
    order: SegQueue<TransferId>,
}

impl TransferJournal {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            order: SegQueue::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up a record by transfer id.
    pub fn get(&self, id: TransferId) -> Option<TransferRecord> {
        self.records.get(&id).map(|record| record.clone())
    }

    /// Removes and returns all records in arrival order.
    pub fn drain(&self) -> Vec<TransferRecord> {
        let mut drained = Vec::with_capacity(self.order.len());
        while let Some(id) = self.order.pop() {
            if let Some((_, record)) = self.records.remove(&id) {
                drained.push(record);
            }
        }
        drained
    }
}

impl TransferSink for TransferJournal {
    fn record(&self, record: &TransferRecord) {
        // Ids come from a monotonic counter; a repeat means the record was
        // already journaled.
        if self.records.insert(record.id, record.clone()).is_none() {
            self.order.push(record.id);
        }
    }
}
