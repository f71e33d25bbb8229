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

//! Bundled HNSW engine
//!
//! Fixed-capacity HNSW graph with caller-assigned labels and soft deletes,
//! persisted as a versioned bincode snapshot.
//!
//! All graph state sits behind one `RwLock`: inserts, deletes and undeletes
//! take the write side, searches and lookups the read side. Level assignment
//! uses a seeded `StdRng`, so a single-threaded build with the same seed and
//! insert order produces the same graph.

use super::{EngineError, EngineResult, IndexHandle, Metric};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::SystemTime;
use tracing::debug;

const SNAPSHOT_VERSION: u32 = 1;

/// Hard cap on node levels
const MAX_LEVEL: usize = 15;

/// Query beam width before `set_ef` is called (hnswlib default)
const DEFAULT_EF_SEARCH: usize = 10;

/// Construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    pub dimension: usize,
    pub max_elements: usize,
    /// Max connections per layer (layer 0 allows 2*M)
    pub m: usize,
    pub ef_construction: usize,
    /// Seed for level generation
    pub seed: u64,
    pub metric: Metric,
}

impl EngineParams {
    /// Parameters with M=16, ef_construction=200, seed=100
    pub fn new(dimension: usize, max_elements: usize, metric: Metric) -> Self {
        Self {
            dimension,
            max_elements,
            m: 16,
            ef_construction: 200,
            seed: 100,
            metric,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct Node {
    label: u64,
    vector: Vec<f32>,
    /// Neighbors for each layer (layer 0 = densest)
    layers: Vec<Vec<usize>>,
    deleted: bool,
}

struct Graph {
    nodes: Vec<Node>,
    labels: HashMap<u64, usize>,
    entry_point: Option<usize>,
    max_level: usize,
    max_elements: usize,
    deleted: usize,
}

/// Candidate entry for priority queue (min-heap by distance)
#[derive(Clone, Copy)]
struct Candidate {
    distance: f32,
    node_idx: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// On-disk form of the engine
#[derive(Serialize, Deserialize)]
struct EngineSnapshot {
    version: u32,
    params: EngineParams,
    ef_search: usize,
    entry_point: Option<usize>,
    max_level: usize,
    nodes: Vec<Node>,
    created_at: SystemTime,
}

/// In-process HNSW index
///
/// Key parameters:
/// - M: max connections per layer (typically 16-32)
/// - M_max: max connections for layer 0 (2*M)
/// - ef_construction: search depth during insertion (typically 200)
/// - ef_search: search depth during queries, raised to `k` when smaller
#[allow(non_snake_case)]
pub struct HnswEngine {
    graph: RwLock<Graph>,
    dimension: usize,
    metric: Metric,
    M: usize,
    M_max: usize,
    ef_construction: usize,
    seed: u64,
    ef_search: AtomicUsize,
    ml: f64, // 1/ln(M)
    level_rng: Mutex<StdRng>,
}

impl HnswEngine {
    /// Create an empty engine
    pub fn new(params: EngineParams) -> Self {
        #[allow(non_snake_case)]
        let M = params.m.max(2);

        Self {
            graph: RwLock::new(Graph {
                nodes: Vec::new(),
                labels: HashMap::new(),
                entry_point: None,
                max_level: 0,
                max_elements: params.max_elements,
                deleted: 0,
            }),
            dimension: params.dimension,
            metric: params.metric,
            M,
            M_max: 2 * M,
            ef_construction: params.ef_construction.max(M),
            seed: params.seed,
            ef_search: AtomicUsize::new(DEFAULT_EF_SEARCH),
            ml: 1.0 / (M as f64).ln(),
            level_rng: Mutex::new(StdRng::seed_from_u64(params.seed)),
        }
    }

    /// Load a snapshot written by [`IndexHandle::save`]
    ///
    /// Fails if the file is missing or corrupt, or if its dimension or
    /// metric differ from the ones requested.
    pub fn load(path: &Path, dimension: usize, metric: Metric) -> EngineResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: EngineSnapshot = bincode::deserialize_from(reader)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::UnsupportedVersion(snapshot.version));
        }
        if snapshot.params.dimension != dimension {
            return Err(EngineError::DimensionMismatch {
                expected: dimension,
                actual: snapshot.params.dimension,
            });
        }
        if snapshot.params.metric != metric {
            return Err(EngineError::MetricMismatch {
                expected: metric,
                found: snapshot.params.metric,
            });
        }

        let engine = Self::new(snapshot.params);
        engine
            .ef_search
            .store(snapshot.ef_search, AtomicOrdering::Relaxed);
        {
            let mut graph = engine.graph.write();
            graph.labels = snapshot
                .nodes
                .iter()
                .enumerate()
                .map(|(idx, node)| (node.label, idx))
                .collect();
            graph.deleted = snapshot.nodes.iter().filter(|n| n.deleted).count();
            graph.entry_point = snapshot.entry_point;
            graph.max_level = snapshot.max_level;
            graph.nodes = snapshot.nodes;
        }

        Ok(engine)
    }

    fn check_dimension(&self, actual: usize) -> EngineResult<()> {
        if actual != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Search within one layer, returning up to `num_closest` node indices
    fn search_layer(
        &self,
        nodes: &[Node],
        query: &[f32],
        entry_points: &[usize],
        num_closest: usize,
        layer: usize,
    ) -> Vec<usize> {
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut w = BinaryHeap::new();

        for &ep in entry_points {
            let candidate = Candidate {
                distance: self.metric.distance(&nodes[ep].vector, query),
                node_idx: ep,
            };
            candidates.push(candidate);
            w.push(Reverse(candidate));
            visited.insert(ep);
        }

        while let Some(c) = candidates.pop() {
            // If c is farther than furthest in w, we're done
            if let Some(Reverse(furthest)) = w.peek()
                && c.distance > furthest.distance
            {
                break;
            }

            let Some(neighbors) = nodes[c.node_idx].layers.get(layer) else {
                continue;
            };

            for &neighbor_idx in neighbors {
                if !visited.insert(neighbor_idx) {
                    continue;
                }
                let distance = self.metric.distance(&nodes[neighbor_idx].vector, query);
                let furthest = w.peek().map_or(f32::INFINITY, |r| r.0.distance);

                if w.len() < num_closest || distance < furthest {
                    let candidate = Candidate {
                        distance,
                        node_idx: neighbor_idx,
                    };
                    candidates.push(candidate);
                    w.push(Reverse(candidate));
                    if w.len() > num_closest {
                        w.pop();
                    }
                }
            }
        }

        w.into_iter().map(|Reverse(c)| c.node_idx).collect()
    }

    /// Select neighbors using RNG diversification
    ///
    /// A candidate closer to an already-selected neighbor than to the query
    /// is redundant; slots left over are filled with the closest remaining.
    #[allow(non_snake_case)]
    fn select_neighbors(
        &self,
        nodes: &[Node],
        candidates: &[usize],
        query: &[f32],
        M: usize,
    ) -> Vec<usize> {
        if candidates.len() <= M {
            return candidates.to_vec();
        }

        let mut sorted: Vec<(usize, f32)> = candidates
            .iter()
            .map(|&idx| (idx, self.metric.distance(&nodes[idx].vector, query)))
            .collect();
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let mut selected = Vec::with_capacity(M);
        selected.push(sorted[0].0);

        for &(candidate_idx, candidate_dist) in sorted.iter().skip(1) {
            if selected.len() >= M {
                break;
            }
            let is_diverse = selected.iter().all(|&selected_idx| {
                self.metric
                    .distance(&nodes[candidate_idx].vector, &nodes[selected_idx].vector)
                    >= candidate_dist * 0.9
            });
            if is_diverse || selected.len() < M / 2 {
                selected.push(candidate_idx);
            }
        }

        for &(candidate_idx, _) in &sorted {
            if selected.len() >= M {
                break;
            }
            if !selected.contains(&candidate_idx) {
                selected.push(candidate_idx);
            }
        }

        selected
    }

    /// Keep the `max_conn` closest links of a node
    fn prune_connections(
        &self,
        nodes: &[Node],
        node_idx: usize,
        layer: usize,
        max_conn: usize,
    ) -> Vec<usize> {
        let node_vec = &nodes[node_idx].vector;
        let mut sorted: Vec<(usize, f32)> = nodes[node_idx].layers[layer]
            .iter()
            .map(|&idx| (idx, self.metric.distance(node_vec, &nodes[idx].vector)))
            .collect();

        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        sorted.truncate(max_conn);
        sorted.into_iter().map(|(idx, _)| idx).collect()
    }

    /// level = floor(-ln(uniform(0,1)) * mL), capped at [`MAX_LEVEL`]
    fn random_level(&self) -> usize {
        let uniform: f64 = self.level_rng.lock().r#gen();
        if uniform <= 0.0 {
            return 0;
        }
        ((-uniform.ln() * self.ml).floor() as usize).min(MAX_LEVEL)
    }
}

impl IndexHandle for HnswEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn add(&self, vector: &[f32], label: u64) -> EngineResult<()> {
        self.check_dimension(vector.len())?;

        let mut guard = self.graph.write();
        let graph = &mut *guard;

        // Existing label: overwrite in place, links are kept
        if let Some(&idx) = graph.labels.get(&label) {
            let node = &mut graph.nodes[idx];
            node.vector.copy_from_slice(vector);
            if node.deleted {
                node.deleted = false;
                graph.deleted -= 1;
            }
            return Ok(());
        }

        if graph.nodes.len() >= graph.max_elements {
            return Err(EngineError::Full {
                max: graph.max_elements,
            });
        }

        let level = self.random_level();
        let idx = graph.nodes.len();
        graph.nodes.push(Node {
            label,
            vector: vector.to_vec(),
            layers: vec![Vec::new(); level + 1],
            deleted: false,
        });
        graph.labels.insert(label, idx);

        // First node becomes entry point
        let Some(entry_point) = graph.entry_point else {
            graph.entry_point = Some(idx);
            graph.max_level = level;
            return Ok(());
        };

        let max_level = graph.max_level;
        let nodes = &mut graph.nodes;
        let mut curr_nearest = vec![entry_point];

        // Zoom into higher layers
        for lc in (level + 1..=max_level).rev() {
            curr_nearest = self.search_layer(nodes.as_slice(), vector, &curr_nearest, 1, lc);
        }

        for lc in (0..=level.min(max_level)).rev() {
            let candidates = self.search_layer(
                nodes.as_slice(),
                vector,
                &curr_nearest,
                self.ef_construction,
                lc,
            );

            let max_conn = if lc == 0 { self.M_max } else { self.M };
            let neighbors = self.select_neighbors(nodes.as_slice(), &candidates, vector, max_conn);

            // Bidirectional links
            for &neighbor_idx in &neighbors {
                nodes[idx].layers[lc].push(neighbor_idx);

                if lc < nodes[neighbor_idx].layers.len() {
                    nodes[neighbor_idx].layers[lc].push(idx);
                    if nodes[neighbor_idx].layers[lc].len() > max_conn {
                        let pruned =
                            self.prune_connections(nodes.as_slice(), neighbor_idx, lc, max_conn);
                        nodes[neighbor_idx].layers[lc] = pruned;
                    }
                }
            }

            curr_nearest = candidates;
        }

        if level > max_level {
            graph.entry_point = Some(idx);
            graph.max_level = level;
        }

        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<(u64, f32)>> {
        self.check_dimension(query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let graph = self.graph.read();
        let Some(entry_point) = graph.entry_point else {
            return Ok(Vec::new());
        };

        let mut curr_nearest = vec![entry_point];
        for lc in (1..=graph.max_level).rev() {
            curr_nearest = self.search_layer(&graph.nodes, query, &curr_nearest, 1, lc);
        }

        // Deleted nodes are traversed but not returned, so widen the beam
        let ef = self.ef_search.load(AtomicOrdering::Relaxed).max(k) + graph.deleted;
        let candidates = self.search_layer(&graph.nodes, query, &curr_nearest, ef, 0);

        let mut results: Vec<(u64, f32)> = candidates
            .into_iter()
            .filter(|&idx| !graph.nodes[idx].deleted)
            .map(|idx| {
                let node = &graph.nodes[idx];
                (node.label, self.metric.distance(&node.vector, query))
            })
            .collect();

        results.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results.truncate(k);

        Ok(results)
    }

    fn set_ef(&self, ef: usize) {
        self.ef_search.store(ef.max(1), AtomicOrdering::Relaxed);
    }

    fn resize(&mut self, new_max: usize) -> EngineResult<()> {
        let graph = self.graph.get_mut();
        if new_max < graph.nodes.len() {
            return Err(EngineError::ShrinkBelowCount {
                count: graph.nodes.len(),
                requested: new_max,
            });
        }
        graph.max_elements = new_max;
        Ok(())
    }

    fn save(&self, path: &Path) -> EngineResult<()> {
        let snapshot = {
            let graph = self.graph.read();
            EngineSnapshot {
                version: SNAPSHOT_VERSION,
                params: EngineParams {
                    dimension: self.dimension,
                    max_elements: graph.max_elements,
                    m: self.M,
                    ef_construction: self.ef_construction,
                    seed: self.seed,
                    metric: self.metric,
                },
                ef_search: self.ef_search.load(AtomicOrdering::Relaxed),
                entry_point: graph.entry_point,
                max_level: graph.max_level,
                nodes: graph.nodes.clone(),
                created_at: SystemTime::now(),
            }
        };

        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, &snapshot)?;
        writer.flush()?;

        debug!(
            path = %path.display(),
            nodes = snapshot.nodes.len(),
            "engine snapshot written"
        );
        Ok(())
    }

    fn current_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    fn max_elements(&self) -> usize {
        self.graph.read().max_elements
    }

    fn deleted_count(&self) -> usize {
        self.graph.read().deleted
    }

    fn mark_deleted(&self, label: u64) -> EngineResult<()> {
        let mut guard = self.graph.write();
        let graph = &mut *guard;
        let idx = *graph
            .labels
            .get(&label)
            .ok_or(EngineError::UnknownLabel(label))?;
        let node = &mut graph.nodes[idx];
        if node.deleted {
            return Err(EngineError::AlreadyDeleted(label));
        }
        node.deleted = true;
        graph.deleted += 1;
        Ok(())
    }

    fn unmark_deleted(&self, label: u64) -> EngineResult<()> {
        let mut guard = self.graph.write();
        let graph = &mut *guard;
        let idx = *graph
            .labels
            .get(&label)
            .ok_or(EngineError::UnknownLabel(label))?;
        let node = &mut graph.nodes[idx];
        if !node.deleted {
            return Err(EngineError::NotDeleted(label));
        }
        node.deleted = false;
        graph.deleted -= 1;
        Ok(())
    }

    fn vector_by_label(&self, label: u64) -> Option<Vec<f32>> {
        let graph = self.graph.read();
        let node = &graph.nodes[*graph.labels.get(&label)?];
        (!node.deleted).then(|| node.vector.clone())
    }

    fn element_by_internal_id(&self, id: usize) -> Option<(u64, bool)> {
        self.graph
            .read()
            .nodes
            .get(id)
            .map(|node| (node.label, node.deleted))
    }

    fn vector_by_internal_id(&self, id: usize) -> Option<Vec<f32>> {
        self.graph.read().nodes.get(id).map(|node| node.vector.clone())
    }
}
