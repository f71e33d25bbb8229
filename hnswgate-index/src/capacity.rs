// SPDX-License-Identifier: AGPL-3.0-or-later
// HnswGate - Concurrent access layer for HNSW vector indexes
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
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

//! Capacity Admission
//!
//! The engine only knows its own element count, so two concurrent batches
//! that each fit on their own could overshoot `max_elements` together.
//! Every insert path reserves slots here first:
//!
//! ```text
//!   reserve(n):  lock admission
//!                current + pending + n <= max ?  pending += n : CapacityExceeded
//!                unlock
//!   per insert:  engine.add(..); settle()       (pending -= 1)
//!   drop:        pending -= unsettled
//! ```
//!
//! The engine count is incremented before the matching slot is settled, so
//! `current + pending` never under-counts.

use crate::engine::IndexHandle;
use crate::error::{IndexError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Shared admission state of one index
#[derive(Debug, Default)]
pub struct CapacityGuard {
    admission: Mutex<()>,
    pending: AtomicUsize,
}

impl CapacityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots reserved by in-flight inserts
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Reserve `requested` slots against `handle`'s capacity
    ///
    /// Fails with [`IndexError::CapacityExceeded`] without reserving anything
    /// when `current + pending + requested > max`.
    pub fn reserve(&self, handle: &dyn IndexHandle, requested: usize) -> Result<Reservation<'_>> {
        let _admission = self.admission.lock();

        let current = handle.current_count();
        let max = handle.max_elements();
        let pending = self.pending.load(Ordering::Acquire);

        let fits = current
            .checked_add(pending)
            .and_then(|n| n.checked_add(requested))
            .is_some_and(|total| total <= max);
        if !fits {
            warn!(
                current,
                pending, requested, max, "capacity reservation rejected"
            );
            return Err(IndexError::CapacityExceeded {
                current,
                pending,
                requested,
                max,
            });
        }

        self.pending.fetch_add(requested, Ordering::AcqRel);
        Ok(Reservation {
            guard: self,
            outstanding: AtomicUsize::new(requested),
        })
    }
}

/// Slots held by one insert or batch
///
/// Shared by reference across the workers of a batch. Unsettled slots are
/// released on drop.
#[derive(Debug)]
pub struct Reservation<'a> {
    guard: &'a CapacityGuard,
    outstanding: AtomicUsize,
}

impl Reservation<'_> {
    /// Release one slot after its insert finished, successfully or not
    pub fn settle(&self) {
        let taken = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            self.guard.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Slots not yet settled
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let rest = self.outstanding.swap(0, Ordering::AcqRel);
        if rest > 0 {
            self.guard.pending.fetch_sub(rest, Ordering::AcqRel);
        }
    }
}
