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

//! HnswGate Index
//!
//! Concurrency and correctness layer over an opaque HNSW engine: batch
//! inserts and batched queries on a bounded worker pool, capacity admission
//! that holds under concurrent inserts, cosine normalization, and streaming
//! export of the stored vectors.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──> Index ──(gate)──> dyn IndexHandle ──> HnswEngine
//!               │
//!               ├── batch_add ──────> CapacityGuard ─┐
//!               ├── parallel_search ─────────────────┼──> WorkerPool ──> engine
//!               └── iter / export ──> VectorIterator  │     (ordered results)
//!                                                     └── normalize (cosine)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hnswgate_index::{BatchAddOptions, Index, IndexConfig, SearchOptions, SpaceType, VectorRecord};
//!
//! let index = Index::new(&IndexConfig::new(SpaceType::Cosine, 384).with_max_elements(100_000))?;
//! index.batch_add(&records, &BatchAddOptions::default())?;
//! let results = index.parallel_search_similarity(&queries, 10, &SearchOptions::default())?;
//! index.save("vectors.idx")?;
//! ```

pub mod batch;
pub mod capacity;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod export;
pub mod index;
pub mod normalize;
pub mod search;

pub use batch::{BatchAddOptions, BatchReport, JobFailure, VectorRecord};
pub use capacity::{CapacityGuard, Reservation};
pub use config::{IndexConfig, SpaceType};
pub use dispatch::{CancellationToken, WorkerPool};
pub use engine::{EngineError, EngineParams, HnswEngine, IndexHandle, Metric};
pub use error::{IndexError, Result};
pub use export::{ElementInfo, ExportStats, IteratorPhase, IteratorState, VectorIterator};
pub use index::Index;
pub use search::{SearchOptions, SearchResult};
