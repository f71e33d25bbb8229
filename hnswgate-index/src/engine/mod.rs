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

//! ANN Engine Contract
//!
//! The access layer never looks inside the nearest-neighbor graph. It talks
//! to an engine through the [`IndexHandle`] trait, a small synchronous
//! contract modeled on hnswlib's C API:
//!
//! ```text
//! ┌───────────────┐   add / search / mark   ┌────────────────────┐
//! │  access layer │ ──────────────────────> │ dyn IndexHandle    │
//! │  (Index)      │ <────────────────────── │ (HnswEngine, ...)  │
//! └───────────────┘  labels, distances, ids └────────────────────┘
//! ```
//!
//! ## Thread-safety contract
//!
//! - `&self` methods must be safe to call concurrently (reads with reads,
//!   adds with adds, adds with reads).
//! - [`IndexHandle::resize`] takes `&mut self`; the access layer only calls
//!   it while holding its exclusive gate. `save` is likewise only called
//!   under the exclusive gate even though it takes `&self`.
//!
//! ## Engines
//!
//! - [`HnswEngine`]: bundled in-process HNSW graph with bincode snapshots.

mod hnsw;

pub use hnsw::{EngineParams, HnswEngine};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors reported by an engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Vector length differs from the engine dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Element count already equals `max_elements`
    #[error("index is full ({max} elements)")]
    Full { max: usize },

    /// Label was never inserted
    #[error("label {0} does not exist")]
    UnknownLabel(u64),

    /// Label is already soft-deleted
    #[error("label {0} is already deleted")]
    AlreadyDeleted(u64),

    /// Label is not soft-deleted
    #[error("label {0} is not deleted")]
    NotDeleted(u64),

    /// Resize target smaller than the stored element count
    #[error("new size {requested} is smaller than current element count {count}")]
    ShrinkBelowCount { count: usize, requested: usize },

    /// Persisted metric differs from the requested one
    #[error("metric mismatch: file holds {found:?}, expected {expected:?}")]
    MetricMismatch { expected: Metric, found: Metric },

    /// Persisted file written by an incompatible version
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    /// Snapshot encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Native distance functions of an engine
///
/// Cosine is not a native metric: it is inner product over unit vectors,
/// see [`SpaceType`](crate::SpaceType).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean distance
    L2,
    /// `1 - dot(a, b)`
    InnerProduct,
}

impl Metric {
    /// Distance between two vectors of equal length (smaller = closer)
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| {
                    let d = x - y;
                    d * d
                })
                .sum(),
            Metric::InnerProduct => {
                let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                1.0 - dot
            }
        }
    }
}

/// Opaque ANN index engine
///
/// Labels are caller-assigned `u64` values. Internal ids are dense,
/// engine-assigned and stable for the lifetime of the engine:
/// `0..current_count()` addresses every element ever inserted, deleted or not.
pub trait IndexHandle: Send + Sync {
    /// Fixed vector dimension
    fn dimension(&self) -> usize;

    /// Native metric
    fn metric(&self) -> Metric;

    /// Insert `vector` under `label`
    ///
    /// An existing label is overwritten in place and undeleted.
    fn add(&self, vector: &[f32], label: u64) -> EngineResult<()>;

    /// Up to `k` nearest active elements as `(label, distance)`, ascending
    fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<(u64, f32)>>;

    /// Set the query-time beam width
    fn set_ef(&self, ef: usize);

    /// Change `max_elements`
    fn resize(&mut self, new_max: usize) -> EngineResult<()>;

    /// Persist to `path` in the engine's own format
    fn save(&self, path: &Path) -> EngineResult<()>;

    /// Elements ever inserted, including soft-deleted ones
    fn current_count(&self) -> usize;

    /// Capacity
    fn max_elements(&self) -> usize;

    /// Soft-deleted elements
    fn deleted_count(&self) -> usize;

    /// Soft-delete a label
    fn mark_deleted(&self, label: u64) -> EngineResult<()>;

    /// Restore a soft-deleted label
    fn unmark_deleted(&self, label: u64) -> EngineResult<()>;

    /// Stored vector of an active label
    fn vector_by_label(&self, label: u64) -> Option<Vec<f32>>;

    /// `(label, is_deleted)` of an internal id
    fn element_by_internal_id(&self, id: usize) -> Option<(u64, bool)>;

    /// Stored vector of an internal id, deleted or not
    fn vector_by_internal_id(&self, id: usize) -> Option<Vec<f32>>;
}
