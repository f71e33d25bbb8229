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

//! Batch insert and parallel search under realistic load
//!
//! - Result ordering for any worker count
//! - Determinism of duplicate queries
//! - Capacity admission with single and concurrent batch inserts
//! - Cosine similarity scoring

use hnswgate_index::{
    BatchAddOptions, Index, IndexConfig, IndexError, SearchOptions, SpaceType, VectorRecord,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

/// Deterministic pseudo-random vector in [-1, 1)^dim
fn generate_vector(id: u64, dim: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(id);
    (0..dim).map(|_| rng.r#gen::<f32>() * 2.0 - 1.0).collect()
}

fn generate_records(start: u64, n: usize, dim: usize) -> Vec<VectorRecord> {
    (start..start + n as u64)
        .map(|id| VectorRecord::new(generate_vector(id, dim), id))
        .collect()
}

fn new_index(space: SpaceType, dim: usize, max: usize) -> Index {
    Index::new(
        &IndexConfig::new(space, dim)
            .with_max_elements(max)
            .with_ef_search(64),
    )
    .unwrap()
}

#[test]
fn test_cosine_axis_scenario() {
    let index = new_index(SpaceType::Cosine, 8, 10);
    let mut e0 = vec![0.0f32; 8];
    e0[0] = 1.0;
    let mut e1 = vec![0.0f32; 8];
    e1[1] = 1.0;
    index.add(&e0, 1).unwrap();
    index.add(&e1, 2).unwrap();

    let mut query = vec![0.0f32; 8];
    query[0] = 2.0;
    let results = index
        .parallel_search_similarity(&[query], 2, &SearchOptions::default())
        .unwrap();

    assert_eq!(results[0].labels, vec![1, 2]);
    assert!((results[0].scores[0] - 1.0).abs() < 1e-5, "{:?}", results[0].scores);
    assert!(results[0].scores[1].abs() < 1e-5, "{:?}", results[0].scores);
}

#[test]
fn test_batch_then_parallel_search() {
    println!("\n=== Batch insert + parallel search ===");

    let dim = 16;
    let index = new_index(SpaceType::Euclidean, dim, 1_000);
    let records = generate_records(0, 1_000, dim);
    index
        .batch_add(&records, &BatchAddOptions::default().with_max_workers(8))
        .unwrap();
    assert_eq!(index.current_count().unwrap(), 1_000);

    let queries: Vec<Vec<f32>> = records.iter().step_by(10).map(|r| r.vector.clone()).collect();
    let results = index
        .parallel_search(&queries, 5, &SearchOptions::default().with_max_workers(8))
        .unwrap();

    let mut self_hits = 0;
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.query_index, i);
        assert!(result.len() <= 5);
        assert!(result.scores.windows(2).all(|w| w[0] <= w[1]));
        if result.labels.first() == Some(&(i as u64 * 10)) {
            self_hits += 1;
        }
    }
    println!("✓ self hits: {}/{}", self_hits, results.len());
    assert!(self_hits >= 95, "self-recall too low: {}/100", self_hits);
}

#[test]
fn test_duplicate_queries_identical() {
    let dim = 16;
    let index = new_index(SpaceType::Cosine, dim, 500);
    index
        .batch_add(&generate_records(0, 500, dim), &BatchAddOptions::default())
        .unwrap();

    let query = generate_vector(12_345, dim);
    let queries = vec![query; 64];
    let results = index
        .parallel_search_similarity(&queries, 10, &SearchOptions::default().with_max_workers(8))
        .unwrap();

    assert_eq!(results.len(), 64);
    for result in &results[1..] {
        assert_eq!(result.labels, results[0].labels);
        assert_eq!(result.scores, results[0].scores);
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let dim = 12;
    let index = new_index(SpaceType::InnerProduct, dim, 300);
    index
        .batch_add(&generate_records(0, 300, dim), &BatchAddOptions::default())
        .unwrap();

    let queries: Vec<Vec<f32>> = (1_000..1_050).map(|id| generate_vector(id, dim)).collect();
    let parallel = index
        .parallel_search(&queries, 7, &SearchOptions::default().with_max_workers(6))
        .unwrap();
    for (i, query) in queries.iter().enumerate() {
        let single = index.search_k(query, 7).unwrap();
        assert_eq!(parallel[i].labels, single.labels);
        assert_eq!(parallel[i].scores, single.scores);
    }
}

#[test]
fn test_individual_inserts_stop_at_capacity() {
    let dim = 4;
    let max = 25;
    let index = new_index(SpaceType::Euclidean, dim, max);

    for record in generate_records(0, max, dim) {
        index.add(&record.vector, record.label).unwrap();
    }
    let err = index.add(&generate_vector(999, dim), 999).unwrap_err();
    assert!(matches!(err, IndexError::CapacityExceeded { .. }), "{}", err);
    assert_eq!(index.current_count().unwrap(), max);
}

#[test]
fn test_batch_exactly_at_capacity() {
    let index = new_index(SpaceType::Euclidean, 4, 50);
    index
        .batch_add(&generate_records(0, 50, 4), &BatchAddOptions::default())
        .unwrap();
    assert_eq!(index.current_count().unwrap(), 50);

    let err = index
        .batch_add(&generate_records(50, 1, 4), &BatchAddOptions::default())
        .unwrap_err();
    assert!(matches!(err, IndexError::CapacityExceeded { current: 50, .. }));
    assert_eq!(index.current_count().unwrap(), 50);
}

#[test]
fn test_concurrent_batches_respect_capacity() {
    let dim = 8;
    let index = Arc::new(new_index(SpaceType::Euclidean, dim, 100));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                let records = generate_records(t * 1_000, 40, dim);
                index.batch_add(&records, &BatchAddOptions::default().with_max_workers(4))
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(()) => admitted += 1,
            Err(IndexError::CapacityExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    let count = index.current_count().unwrap();
    assert_eq!(admitted, 2);
    assert_eq!(count, 80);
    assert!(count <= 100);
}

#[test]
fn test_concurrent_single_adds_never_overfill() {
    let dim = 4;
    let index = Arc::new(new_index(SpaceType::Euclidean, dim, 100));

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                let mut rejected = 0;
                for record in generate_records(t * 1_000, 20, dim) {
                    match index.add(&record.vector, record.label) {
                        Ok(()) => {}
                        Err(IndexError::CapacityExceeded { .. }) => rejected += 1,
                        Err(other) => panic!("unexpected error: {}", other),
                    }
                }
                rejected
            })
        })
        .collect();

    let rejected: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let count = index.current_count().unwrap();
    assert!(count <= 100, "capacity exceeded: {}", count);
    assert_eq!(count + rejected, 160);

    // Whatever is left is still admissible, one slot at a time
    let mut id = 100_000;
    while index.add(&generate_vector(id, dim), id).is_ok() {
        id += 1;
    }
    assert_eq!(index.current_count().unwrap(), 100);
}

#[test]
fn test_resize_between_batches() {
    let index = new_index(SpaceType::Euclidean, 4, 10);
    index
        .batch_add(&generate_records(0, 10, 4), &BatchAddOptions::default())
        .unwrap();
    assert!(index
        .batch_add(&generate_records(10, 10, 4), &BatchAddOptions::default())
        .is_err());

    index.resize(20).unwrap();
    index
        .batch_add(&generate_records(10, 10, 4), &BatchAddOptions::default())
        .unwrap();
    assert_eq!(index.current_count().unwrap(), 20);
    assert_eq!(index.max_elements().unwrap(), 20);
}

#[test]
fn test_search_while_inserting() {
    let dim = 8;
    let index = Arc::new(new_index(SpaceType::Cosine, dim, 1_000));
    index
        .batch_add(&generate_records(0, 200, dim), &BatchAddOptions::default())
        .unwrap();

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            index
                .batch_add(&generate_records(200, 800, dim), &BatchAddOptions::default())
                .unwrap();
        })
    };

    let queries: Vec<Vec<f32>> = (5_000..5_020).map(|id| generate_vector(id, dim)).collect();
    for _ in 0..10 {
        let results = index
            .parallel_search(&queries, 5, &SearchOptions::default())
            .unwrap();
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.len() == 5));
    }

    writer.join().unwrap();
    assert_eq!(index.current_count().unwrap(), 1_000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_results_keep_query_order(workers in 1usize..9, n in 1usize..60) {
        let dim = 6;
        let index = new_index(SpaceType::Euclidean, dim, 100);
        index.batch_add(&generate_records(0, 100, dim), &BatchAddOptions::default()).unwrap();

        let queries: Vec<Vec<f32>> = (0..n as u64).map(|id| generate_vector(id + 7_000, dim)).collect();
        let results = index
            .parallel_search(&queries, 3, &SearchOptions::default().with_max_workers(workers))
            .unwrap();

        prop_assert_eq!(results.len(), n);
        for (i, result) in results.iter().enumerate() {
            prop_assert_eq!(result.query_index, i);
            let single = index.search_k(&queries[i], 3).unwrap();
            prop_assert_eq!(&result.labels, &single.labels);
        }
    }
}
