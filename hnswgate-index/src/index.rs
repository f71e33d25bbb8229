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

//! Index Handle Wrapper
//!
//! [`Index`] owns one engine and is the only way the rest of the crate
//! reaches it. The engine sits behind a read/write gate:
//!
//! ```text
//!   shared (read)      add, search, counts, mark/unmark, lookups,
//!                      iterator fetches, whole BatchAdd / ParallelSearch calls
//!   exclusive (write)  resize, save, close
//! ```
//!
//! Closing takes the engine out of the gate; every later call fails with
//! [`IndexError::ClosedHandle`]. Dropping an `Index` closes it.

use crate::capacity::CapacityGuard;
use crate::config::{IndexConfig, SpaceType};
use crate::engine::{HnswEngine, IndexHandle};
use crate::error::{IndexError, Result};
use crate::normalize::normalize;
use crate::search::SearchResult;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Thread-safe owner of one ANN index
pub struct Index {
    gate: RwLock<Option<Box<dyn IndexHandle>>>,
    space: SpaceType,
    dimension: usize,
    capacity: CapacityGuard,
}

impl Index {
    /// Create an empty index with the bundled engine
    pub fn new(config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let engine = HnswEngine::new(config.engine_params());
        if let Some(ef) = config.ef_search {
            engine.set_ef(ef);
        }

        info!(
            space = %config.space,
            dimension = config.dimension,
            max_elements = config.max_elements,
            m = config.m,
            ef_construction = config.ef_construction,
            "created index"
        );
        Self::with_engine(config.space, Box::new(engine))
    }

    /// Euclidean index
    pub fn l2(
        dimension: usize,
        max_elements: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::new(&Self::config(
            SpaceType::Euclidean,
            dimension,
            max_elements,
            m,
            ef_construction,
            seed,
        ))
    }

    /// Inner-product index
    pub fn ip(
        dimension: usize,
        max_elements: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::new(&Self::config(
            SpaceType::InnerProduct,
            dimension,
            max_elements,
            m,
            ef_construction,
            seed,
        ))
    }

    /// Cosine index; vectors are normalized on insert and query
    pub fn cosine(
        dimension: usize,
        max_elements: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::new(&Self::config(
            SpaceType::Cosine,
            dimension,
            max_elements,
            m,
            ef_construction,
            seed,
        ))
    }

    fn config(
        space: SpaceType,
        dimension: usize,
        max_elements: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> IndexConfig {
        IndexConfig::new(space, dimension)
            .with_max_elements(max_elements)
            .with_m(m)
            .with_ef_construction(ef_construction)
            .with_seed(seed)
    }

    /// Load an index saved by [`Index::save`]
    ///
    /// Fails with [`IndexError::LoadFailure`] if the file is missing, corrupt,
    /// or was written with another dimension or metric. The snapshot records
    /// only the engine metric, so a cosine index can be reopened as
    /// [`SpaceType::InnerProduct`]; later inserts are then stored unnormalized.
    pub fn load(space: SpaceType, dimension: usize, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let engine = HnswEngine::load(path, dimension, space.metric()).map_err(|source| {
            IndexError::LoadFailure {
                path: path.to_path_buf(),
                source,
            }
        })?;

        info!(
            path = %path.display(),
            space = %space,
            elements = engine.current_count(),
            "loaded index"
        );
        Self::with_engine(space, Box::new(engine))
    }

    /// Wrap an arbitrary engine
    ///
    /// Fails with [`IndexError::InvalidConfig`] unless the engine's metric is
    /// [`SpaceType::metric`] of `space` (inner product for cosine).
    pub fn with_engine(space: SpaceType, engine: Box<dyn IndexHandle>) -> Result<Self> {
        if engine.metric() != space.metric() {
            return Err(IndexError::InvalidConfig(format!(
                "{} space needs a {:?} engine, got {:?}",
                space,
                space.metric(),
                engine.metric()
            )));
        }

        let dimension = engine.dimension();
        Ok(Self {
            gate: RwLock::new(Some(engine)),
            space,
            dimension,
            capacity: CapacityGuard::new(),
        })
    }

    /// Run `f` against the engine under the shared gate
    pub(crate) fn with_handle<T>(&self, f: impl FnOnce(&dyn IndexHandle) -> Result<T>) -> Result<T> {
        let gate = self.gate.read();
        let handle = gate.as_deref().ok_or(IndexError::ClosedHandle)?;
        f(handle)
    }

    pub(crate) fn capacity(&self) -> &CapacityGuard {
        &self.capacity
    }

    pub(crate) fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Vector as the engine should see it
    pub(crate) fn prepare<'v>(&self, vector: &'v [f32]) -> Cow<'v, [f32]> {
        if self.space.normalizes() {
            Cow::Owned(normalize(vector))
        } else {
            Cow::Borrowed(vector)
        }
    }

    /// Insert one vector
    ///
    /// Fails with [`IndexError::CapacityExceeded`] when the index is full,
    /// leaving it unchanged.
    pub fn add(&self, vector: &[f32], label: u64) -> Result<()> {
        self.check_dimension(vector.len())?;
        self.with_handle(|handle| {
            let reservation = self.capacity.reserve(handle, 1)?;
            let result = self.insert(handle, vector, label);
            reservation.settle();
            result
        })
    }

    /// Insert without admission control; callers hold a reservation
    pub(crate) fn insert(&self, handle: &dyn IndexHandle, vector: &[f32], label: u64) -> Result<()> {
        handle
            .add(&self.prepare(vector), label)
            .map_err(|source| IndexError::AddFailure { label, source })
    }

    /// `k` nearest neighbors by engine distance, ascending
    ///
    /// Returns fewer than `k` results when the index holds fewer active
    /// elements. `query_index` of the result is 0.
    pub fn search_k(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        self.with_handle(|handle| self.query(handle, 0, query, k, false))
    }

    /// `k` nearest neighbors as similarity scores, descending
    ///
    /// See [`SpaceType::similarity`] for the conversion.
    pub fn search_k_similarity(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        self.with_handle(|handle| self.query(handle, 0, query, k, true))
    }

    pub(crate) fn query(
        &self,
        handle: &dyn IndexHandle,
        query_index: usize,
        query: &[f32],
        k: usize,
        similarity: bool,
    ) -> Result<SearchResult> {
        self.check_dimension(query.len())?;
        let neighbors = handle
            .search(&self.prepare(query), k)
            .map_err(IndexError::SearchFailure)?;

        let (labels, scores): (Vec<u64>, Vec<f32>) = neighbors
            .into_iter()
            .map(|(label, distance)| {
                let score = if similarity {
                    self.space.similarity(distance)
                } else {
                    distance
                };
                (label, score)
            })
            .unzip();

        Ok(SearchResult {
            query_index,
            labels,
            scores,
        })
    }

    /// Set the query-time beam width
    pub fn set_ef(&self, ef: usize) -> Result<()> {
        self.with_handle(|handle| {
            handle.set_ef(ef);
            Ok(())
        })
    }

    /// Change capacity; waits for in-flight operations to drain
    pub fn resize(&self, new_max: usize) -> Result<()> {
        let mut gate = self.gate.write();
        let handle = gate.as_deref_mut().ok_or(IndexError::ClosedHandle)?;
        handle
            .resize(new_max)
            .map_err(|source| IndexError::ResizeFailure {
                requested: new_max,
                source,
            })?;
        info!(max_elements = new_max, "resized index");
        Ok(())
    }

    /// Persist the index; waits for in-flight operations to drain
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let gate = self.gate.write();
        let handle = gate.as_deref().ok_or(IndexError::ClosedHandle)?;
        handle.save(path).map_err(|source| IndexError::SaveFailure {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            elements = handle.current_count(),
            "saved index"
        );
        Ok(())
    }

    /// Elements ever inserted, including soft-deleted ones
    pub fn current_count(&self) -> Result<usize> {
        self.with_handle(|handle| Ok(handle.current_count()))
    }

    pub fn max_elements(&self) -> Result<usize> {
        self.with_handle(|handle| Ok(handle.max_elements()))
    }

    pub fn deleted_count(&self) -> Result<usize> {
        self.with_handle(|handle| Ok(handle.deleted_count()))
    }

    pub fn dimension(&self) -> Result<usize> {
        self.with_handle(|handle| Ok(handle.dimension()))
    }

    pub fn space(&self) -> SpaceType {
        self.space
    }

    pub fn is_cosine_space(&self) -> bool {
        self.space == SpaceType::Cosine
    }

    /// Soft-delete a label; it stays in the graph but is no longer returned
    pub fn mark_deleted(&self, label: u64) -> Result<()> {
        self.with_handle(|handle| {
            handle
                .mark_deleted(label)
                .map_err(|source| IndexError::MarkFailure { label, source })
        })
    }

    /// Restore a soft-deleted label
    pub fn unmark_deleted(&self, label: u64) -> Result<()> {
        self.with_handle(|handle| {
            handle
                .unmark_deleted(label)
                .map_err(|source| IndexError::MarkFailure { label, source })
        })
    }

    /// Stored vector of an active label (unit length in cosine spaces)
    pub fn get_vector(&self, label: u64) -> Result<Vec<f32>> {
        self.with_handle(|handle| {
            handle
                .vector_by_label(label)
                .ok_or(IndexError::LabelNotFound(label))
        })
    }

    /// Stored vectors of the active labels among `labels`; others are skipped
    pub fn get_vectors(&self, labels: &[u64]) -> Result<HashMap<u64, Vec<f32>>> {
        self.with_handle(|handle| {
            Ok(labels
                .iter()
                .filter_map(|&label| handle.vector_by_label(label).map(|v| (label, v)))
                .collect())
        })
    }

    /// Release the engine; later calls fail with [`IndexError::ClosedHandle`]
    ///
    /// Waits for in-flight operations. Closing twice is a no-op.
    pub fn close(&self) {
        if self.gate.write().take().is_some() {
            debug!("closed index");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.gate.read().is_none()
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("space", &self.space)
            .field("dimension", &self.dimension)
            .field("closed", &self.is_closed())
            .field("pending", &self.capacity.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(space: SpaceType, max: usize) -> Index {
        Index::new(&IndexConfig::new(space, 4).with_max_elements(max)).unwrap()
    }

    #[test]
    fn test_add_and_search() {
        let index = small(SpaceType::Euclidean, 10);
        index.add(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        index.add(&[0.0, 1.0, 0.0, 0.0], 2).unwrap();

        let result = index.search_k(&[1.0, 0.1, 0.0, 0.0], 2).unwrap();
        assert_eq!(result.labels, vec![1, 2]);
        assert_eq!(result.scores.len(), 2);
        assert!(result.scores[0] < result.scores[1]);
    }

    #[test]
    fn test_single_add_capacity() {
        let index = small(SpaceType::Euclidean, 2);
        index.add(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        index.add(&[0.0, 1.0, 0.0, 0.0], 2).unwrap();
        let err = index.add(&[0.0, 0.0, 1.0, 0.0], 3).unwrap_err();
        assert!(matches!(err, IndexError::CapacityExceeded { max: 2, .. }));
        assert_eq!(index.current_count().unwrap(), 2);

        index.resize(3).unwrap();
        index.add(&[0.0, 0.0, 1.0, 0.0], 3).unwrap();
        assert_eq!(index.capacity().pending(), 0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = small(SpaceType::Euclidean, 10);
        assert!(matches!(
            index.add(&[1.0], 1),
            Err(IndexError::DimensionMismatch { expected: 4, actual: 1 })
        ));
        assert!(matches!(
            index.search_k(&[1.0, 2.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_cosine_stores_unit_vectors() {
        let index = small(SpaceType::Cosine, 10);
        index.add(&[3.0, 4.0, 0.0, 0.0], 9).unwrap();
        let stored = index.get_vector(9).unwrap();
        assert!((stored[0] - 0.6).abs() < 1e-6);
        assert!((stored[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_preserves_values() {
        let index = small(SpaceType::Euclidean, 10);
        index.add(&[3.0, 4.0, 5.0, 6.0], 9).unwrap();
        assert_eq!(index.get_vector(9).unwrap(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_get_vector_missing_and_deleted() {
        let index = small(SpaceType::Euclidean, 10);
        index.add(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        index.add(&[0.0, 1.0, 0.0, 0.0], 2).unwrap();
        index.mark_deleted(2).unwrap();

        assert!(matches!(index.get_vector(42), Err(IndexError::LabelNotFound(42))));
        assert!(matches!(index.get_vector(2), Err(IndexError::LabelNotFound(2))));

        let found = index.get_vectors(&[1, 2, 42]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&1));
    }

    #[test]
    fn test_mark_failures() {
        let index = small(SpaceType::Euclidean, 10);
        index.add(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert!(matches!(
            index.mark_deleted(5),
            Err(IndexError::MarkFailure { label: 5, .. })
        ));
        index.mark_deleted(1).unwrap();
        assert!(index.mark_deleted(1).is_err());
        assert_eq!(index.deleted_count().unwrap(), 1);
        index.unmark_deleted(1).unwrap();
        assert!(index.unmark_deleted(1).is_err());
    }

    #[test]
    fn test_resize_below_count() {
        let index = small(SpaceType::Euclidean, 10);
        index.add(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        index.add(&[0.0, 1.0, 0.0, 0.0], 2).unwrap();
        assert!(matches!(
            index.resize(1),
            Err(IndexError::ResizeFailure { requested: 1, .. })
        ));
        assert_eq!(index.max_elements().unwrap(), 10);
    }

    #[test]
    fn test_close_is_idempotent() {
        let index = small(SpaceType::Euclidean, 10);
        index.add(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        index.close();
        index.close();
        assert!(index.is_closed());
    }

    #[test]
    fn test_closed_handle_errors() {
        let index = small(SpaceType::Cosine, 10);
        index.close();

        assert!(matches!(index.add(&[1.0, 0.0, 0.0, 0.0], 1), Err(IndexError::ClosedHandle)));
        assert!(matches!(index.search_k(&[1.0, 0.0, 0.0, 0.0], 1), Err(IndexError::ClosedHandle)));
        assert!(matches!(index.current_count(), Err(IndexError::ClosedHandle)));
        assert!(matches!(index.resize(20), Err(IndexError::ClosedHandle)));
        assert!(matches!(index.save("/nonexistent/x.idx"), Err(IndexError::ClosedHandle)));
        assert!(matches!(index.mark_deleted(1), Err(IndexError::ClosedHandle)));
        assert!(matches!(index.get_vector(1), Err(IndexError::ClosedHandle)));
        assert!(matches!(index.set_ef(10), Err(IndexError::ClosedHandle)));
        assert!(index.is_cosine_space());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Index::new(&IndexConfig::new(SpaceType::Euclidean, 0)),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_space_constructors() {
        assert_eq!(Index::l2(4, 10, 16, 100, 1).unwrap().space(), SpaceType::Euclidean);
        assert_eq!(Index::ip(4, 10, 16, 100, 1).unwrap().space(), SpaceType::InnerProduct);
        let cosine = Index::cosine(4, 10, 16, 100, 1).unwrap();
        assert!(cosine.is_cosine_space());
        assert_eq!(cosine.dimension().unwrap(), 4);
    }
}
