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

//! Parallel Search
//!
//! Answers a batch of k-NN queries on a worker pool. `results[i]` always
//! answers `queries[i]`, whatever the worker count, and identical queries in
//! one batch get identical answers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hnswgate_index::{Index, SearchOptions};
//!
//! let results = index.parallel_search_similarity(&queries, 10, &SearchOptions::default())?;
//! for result in &results {
//!     println!("query {} -> {:?}", result.query_index, result.labels);
//! }
//! ```

use crate::dispatch::{CancellationToken, WorkerPool};
use crate::error::Result;
use crate::index::Index;
use std::time::Instant;
use tracing::debug;

/// Answer to one query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Position of the query in its batch
    pub query_index: usize,
    pub labels: Vec<u64>,
    /// Distances (ascending) or similarities (descending)
    pub scores: Vec<f32>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(label, score)` pairs in rank order
    pub fn iter(&self) -> impl Iterator<Item = (u64, f32)> + '_ {
        self.labels.iter().copied().zip(self.scores.iter().copied())
    }
}

/// Options for [`Index::parallel_search`]
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Worker count (0 = default)
    pub max_workers: usize,
    pub cancel: Option<CancellationToken>,
}

impl SearchOptions {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Index {
    /// k-NN for every query, scored by engine distance
    ///
    /// Returns the first per-query error by query index.
    pub fn parallel_search<Q>(
        &self,
        queries: &[Q],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>>
    where
        Q: AsRef<[f32]> + Sync,
    {
        self.run_queries(queries, k, options, false)
    }

    /// k-NN for every query, scored by similarity
    ///
    /// See [`SpaceType::similarity`](crate::SpaceType::similarity).
    pub fn parallel_search_similarity<Q>(
        &self,
        queries: &[Q],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>>
    where
        Q: AsRef<[f32]> + Sync,
    {
        self.run_queries(queries, k, options, true)
    }

    /// Labels of the k nearest neighbors of every query
    pub fn batch_search_k<Q>(&self, queries: &[Q], k: usize) -> Result<Vec<Vec<u64>>>
    where
        Q: AsRef<[f32]> + Sync,
    {
        let results = self.parallel_search(queries, k, &SearchOptions::default())?;
        Ok(results.into_iter().map(|r| r.labels).collect())
    }

    /// Labels of the k most similar elements of every query
    pub fn batch_search_k_similarity<Q>(&self, queries: &[Q], k: usize) -> Result<Vec<Vec<u64>>>
    where
        Q: AsRef<[f32]> + Sync,
    {
        let results = self.parallel_search_similarity(queries, k, &SearchOptions::default())?;
        Ok(results.into_iter().map(|r| r.labels).collect())
    }

    fn run_queries<Q>(
        &self,
        queries: &[Q],
        k: usize,
        options: &SearchOptions,
        similarity: bool,
    ) -> Result<Vec<SearchResult>>
    where
        Q: AsRef<[f32]> + Sync,
    {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        self.with_handle(|handle| {
            let pool =
                WorkerPool::new(options.max_workers).with_cancellation(options.cancel.clone());
            let jobs: Vec<&Q> = queries.iter().collect();
            let outcomes = pool.run(jobs, |query_index, query| {
                self.query(handle, query_index, query.as_ref(), k, similarity)
            });

            debug!(
                queries = queries.len(),
                k,
                workers = pool.workers().min(queries.len()),
                elapsed_us = start.elapsed().as_micros() as u64,
                "parallel search finished"
            );
            outcomes.into_iter().collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, SpaceType};
    use crate::error::IndexError;

    fn axis_index() -> Index {
        let config = IndexConfig::new(SpaceType::Euclidean, 3).with_max_elements(10);
        let index = Index::new(&config).unwrap();
        index.add(&[1.0, 0.0, 0.0], 1).unwrap();
        index.add(&[0.0, 1.0, 0.0], 2).unwrap();
        index.add(&[0.0, 0.0, 1.0], 3).unwrap();
        index
    }

    #[test]
    fn test_empty_queries() {
        let index = axis_index();
        let queries: Vec<Vec<f32>> = Vec::new();
        assert!(index.parallel_search(&queries, 3, &SearchOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_results_follow_query_order() {
        let index = axis_index();
        let queries: Vec<Vec<f32>> = vec![
            vec![0.0, 0.0, 1.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
        ];
        let results = index
            .parallel_search(&queries, 1, &SearchOptions::default().with_max_workers(3))
            .unwrap();
        let top: Vec<u64> = results.iter().map(|r| r.labels[0]).collect();
        assert_eq!(top, vec![3, 1, 2]);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.query_index, i);
        }
    }

    #[test]
    fn test_similarity_scores_descend() {
        let index = axis_index();
        let results = index
            .parallel_search_similarity(&[[0.9f32, 0.3, 0.0]], 3, &SearchOptions::default())
            .unwrap();
        let scores = &results[0].scores;
        assert_eq!(scores.len(), 3);
        assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{:?}", scores);
        assert!(scores.iter().all(|s| *s > 0.0 && *s <= 1.0));
    }

    #[test]
    fn test_first_error_by_query_index() {
        let index = axis_index();
        let queries: Vec<Vec<f32>> = vec![vec![1.0, 0.0, 0.0], vec![1.0], vec![1.0, 0.0]];
        let err = index
            .parallel_search(&queries, 1, &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, actual: 1 }
        ));
    }

    #[test]
    fn test_batch_search_k_labels() {
        let index = axis_index();
        let labels = index
            .batch_search_k(&[vec![0.0f32, 1.0, 0.0], vec![1.0, 0.0, 0.0]], 1)
            .unwrap();
        assert_eq!(labels, vec![vec![2], vec![1]]);

        let labels = index.batch_search_k_similarity(&[vec![0.0f32, 0.0, 1.0]], 2).unwrap();
        assert_eq!(labels[0][0], 3);
    }

    #[test]
    fn test_search_result_iter() {
        let result = SearchResult {
            query_index: 0,
            labels: vec![4, 5],
            scores: vec![0.1, 0.2],
        };
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![(4, 0.1), (5, 0.2)]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_cancelled_search() {
        let index = axis_index();
        let token = CancellationToken::new();
        token.cancel();
        let err = index
            .parallel_search(
                &[vec![1.0f32, 0.0, 0.0]],
                1,
                &SearchOptions::default().with_cancellation(token),
            )
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_closed_index_search() {
        let index = axis_index();
        index.close();
        assert!(matches!(
            index.parallel_search(&[vec![1.0f32, 0.0, 0.0]], 1, &SearchOptions::default()),
            Err(IndexError::ClosedHandle)
        ));
    }
}
