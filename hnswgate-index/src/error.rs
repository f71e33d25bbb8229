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

//! Error types for the access layer
//!
//! Engine failures are reported by the engine as [`EngineError`] and wrapped
//! here with the operation that triggered them, so callers can match on
//! *what* failed without parsing messages.

use crate::engine::EngineError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`Index`](crate::Index) and the bulk operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Operation attempted on a handle that was never opened or already closed
    #[error("index is closed")]
    ClosedHandle,

    /// Admission would push the index past `max_elements`
    #[error(
        "batch would exceed index capacity ({current} stored + {pending} pending + {requested} requested > {max}) - use resize() to increase capacity"
    )]
    CapacityExceeded {
        current: usize,
        pending: usize,
        requested: usize,
        max: usize,
    },

    /// Engine rejected an insert
    #[error("failed to add label {label}: {source}")]
    AddFailure {
        label: u64,
        #[source]
        source: EngineError,
    },

    /// Persisted index missing, unreadable or invalid
    #[error("failed to load index from {}: {source}", .path.display())]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    /// Index could not be written (permissions, disk space)
    #[error("failed to save index to {}: {source}", .path.display())]
    SaveFailure {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    /// New size below current count, or allocation failure
    #[error("failed to resize index to {requested} elements: {source}")]
    ResizeFailure {
        requested: usize,
        #[source]
        source: EngineError,
    },

    /// Label missing or already in the requested deletion state
    #[error("failed to change deletion state of label {label}: {source}")]
    MarkFailure {
        label: u64,
        #[source]
        source: EngineError,
    },

    /// Engine rejected a query
    #[error("search failed: {0}")]
    SearchFailure(#[source] EngineError),

    /// Label unknown or soft-deleted
    #[error("label {0} not found")]
    LabelNotFound(u64),

    /// Iterator accessed past the captured element count
    #[error("iterator position {position} out of range (total {total})")]
    IteratorOutOfRange { position: u64, total: u64 },

    /// Vector length differs from the index dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Job never started because its bulk call was cancelled
    #[error("job {job} cancelled before it started")]
    Cancelled { job: usize },

    /// Rejected construction parameters
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IndexError {
    /// True for errors caused by cancellation rather than by the job itself
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexError::Cancelled { .. })
    }
}

/// Result type for access-layer operations
pub type Result<T> = std::result::Result<T, IndexError>;
