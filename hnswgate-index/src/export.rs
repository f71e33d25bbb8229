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

//! Vector Export
//!
//! Walks the engine's internal id space `0..count`, where `count` is captured
//! when the iterator is created, so elements inserted afterwards are not
//! visited.
//!
//! ## Iterator lifecycle
//!
//! ```text
//!   Created ──advance──> Iterating ──advance──> ... ──> Exhausted
//!      ^                                                   │
//!      └─────────────────────── reset ─────────────────────┘
//! ```
//!
//! `element()` and `vector()` do not move the cursor; the caller advances
//! explicitly, so a failed fetch can be retried at the same position.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let stats = index.export(false, |label, vector, _deleted| {
//!     writer.write_record(label, vector)?;
//!     Ok::<_, MyError>(())
//! })?;
//! ```

use crate::error::{IndexError, Result};
use crate::index::Index;
use tracing::{debug, warn};

/// One element of the id space, without its vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementInfo {
    pub internal_id: u64,
    pub label: u64,
    pub is_deleted: bool,
}

/// Cursor position of a [`VectorIterator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorState {
    pub current_id: u64,
    /// Element count when the iterator was created
    pub total_count: u64,
    pub dimension: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorPhase {
    Created,
    Iterating,
    Exhausted,
}

/// Counters of one export run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Elements passed to the visitor
    pub visited: u64,
    pub skipped_deleted: u64,
    /// Elements whose info or vector could not be fetched
    pub skipped_unreadable: u64,
}

/// Cursor over the elements of an [`Index`]
///
/// Each fetch takes the index's shared gate on its own, so the index is not
/// locked between calls.
#[derive(Debug)]
pub struct VectorIterator<'a> {
    index: &'a Index,
    state: IteratorState,
}

impl VectorIterator<'_> {
    pub fn has_next(&self) -> bool {
        self.state.current_id < self.state.total_count
    }

    fn check_position(&self) -> Result<usize> {
        if !self.has_next() {
            return Err(IndexError::IteratorOutOfRange {
                position: self.state.current_id,
                total: self.state.total_count,
            });
        }
        Ok(self.state.current_id as usize)
    }

    /// Label and deletion flag at the cursor
    pub fn element(&self) -> Result<ElementInfo> {
        let id = self.check_position()?;
        self.index.with_handle(|handle| {
            let (label, is_deleted) = handle.element_by_internal_id(id).ok_or(
                IndexError::IteratorOutOfRange {
                    position: id as u64,
                    total: self.state.total_count,
                },
            )?;
            Ok(ElementInfo {
                internal_id: id as u64,
                label,
                is_deleted,
            })
        })
    }

    /// Stored vector at the cursor
    pub fn vector(&self) -> Result<Vec<f32>> {
        let id = self.check_position()?;
        self.index.with_handle(|handle| {
            handle
                .vector_by_internal_id(id)
                .ok_or(IndexError::IteratorOutOfRange {
                    position: id as u64,
                    total: self.state.total_count,
                })
        })
    }

    /// Move to the next element; no-op once exhausted
    pub fn advance(&mut self) {
        if self.has_next() {
            self.state.current_id += 1;
        }
    }

    /// Back to the first element, keeping the captured count
    pub fn reset(&mut self) {
        self.state.current_id = 0;
    }

    /// `(current, total)`
    pub fn progress(&self) -> (u64, u64) {
        (self.state.current_id, self.state.total_count)
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn phase(&self) -> IteratorPhase {
        if !self.has_next() {
            IteratorPhase::Exhausted
        } else if self.state.current_id == 0 {
            IteratorPhase::Created
        } else {
            IteratorPhase::Iterating
        }
    }
}

impl Index {
    /// Iterator over the elements present now
    pub fn iter(&self) -> Result<VectorIterator<'_>> {
        let (total_count, dimension) =
            self.with_handle(|handle| Ok((handle.current_count() as u64, handle.dimension())))?;
        Ok(VectorIterator {
            index: self,
            state: IteratorState {
                current_id: 0,
                total_count,
                dimension,
            },
        })
    }

    /// Stream every element to `visit(label, vector, is_deleted)`
    ///
    /// Deleted elements are skipped unless `include_deleted`. The first
    /// visitor error stops the export and is returned unchanged. Elements
    /// that cannot be fetched are skipped and counted; a closed index aborts
    /// with [`IndexError::ClosedHandle`].
    pub fn export<E, F>(
        &self,
        include_deleted: bool,
        mut visit: F,
    ) -> std::result::Result<ExportStats, E>
    where
        E: From<IndexError>,
        F: FnMut(u64, &[f32], bool) -> std::result::Result<(), E>,
    {
        let mut iter = self.iter()?;
        let mut stats = ExportStats::default();

        while iter.has_next() {
            let position = iter.state().current_id;
            let element = match iter.element() {
                Ok(element) => element,
                Err(IndexError::ClosedHandle) => return Err(IndexError::ClosedHandle.into()),
                Err(error) => {
                    warn!(position, %error, "skipping unreadable element");
                    stats.skipped_unreadable += 1;
                    iter.advance();
                    continue;
                }
            };

            if element.is_deleted && !include_deleted {
                stats.skipped_deleted += 1;
                iter.advance();
                continue;
            }

            let vector = match iter.vector() {
                Ok(vector) => vector,
                Err(IndexError::ClosedHandle) => return Err(IndexError::ClosedHandle.into()),
                Err(error) => {
                    warn!(position, label = element.label, %error, "skipping unreadable vector");
                    stats.skipped_unreadable += 1;
                    iter.advance();
                    continue;
                }
            };

            visit(element.label, &vector, element.is_deleted)?;
            stats.visited += 1;
            iter.advance();
        }

        debug!(
            visited = stats.visited,
            skipped_deleted = stats.skipped_deleted,
            skipped_unreadable = stats.skipped_unreadable,
            "export finished"
        );
        Ok(stats)
    }
}
