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

//! Batch Insert
//!
//! Inserts many labeled vectors on a worker pool.
//!
//! ```text
//! records ──> reserve(len) ──> WorkerPool ──> normalize? ──> engine.add ──> settle
//!                 │
//!                 └── CapacityExceeded: nothing inserted
//! ```
//!
//! The whole batch is admitted or rejected up front. Once admitted, a failing
//! record does not stop the others; [`Index::batch_add`] reports the first
//! failure by record position and [`Index::batch_add_report`] reports all of
//! them.

use crate::dispatch::{CancellationToken, WorkerPool};
use crate::error::{IndexError, Result};
use crate::index::Index;
use std::time::Instant;
use tracing::debug;

/// Default `chunk_size`
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// One vector to insert
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub label: u64,
}

impl VectorRecord {
    pub fn new(vector: Vec<f32>, label: u64) -> Self {
        Self { vector, label }
    }
}

/// Options for [`Index::batch_add`]
#[derive(Debug, Clone)]
pub struct BatchAddOptions {
    /// Worker count (0 = default)
    pub max_workers: usize,
    /// Accepted for compatibility; records are always dispatched one by one
    pub chunk_size: usize,
    pub cancel: Option<CancellationToken>,
}

impl Default for BatchAddOptions {
    fn default() -> Self {
        Self {
            max_workers: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: None,
        }
    }
}

impl BatchAddOptions {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A record that was not inserted
#[derive(Debug)]
pub struct JobFailure {
    /// Position in the input batch
    pub job_index: usize,
    pub label: u64,
    pub error: IndexError,
}

/// Outcome of a whole batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    /// Ordered by `job_index`
    pub failures: Vec<JobFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures caused by cancellation
    pub fn cancelled(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.error.is_cancelled())
            .count()
    }

    /// `Ok` if every record was inserted, else the first failure
    pub fn into_result(self) -> Result<()> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }
}

impl Index {
    /// Insert every record, returning the first failure by position
    pub fn batch_add(&self, records: &[VectorRecord], options: &BatchAddOptions) -> Result<()> {
        self.batch_add_report(records, options)?.into_result()
    }

    /// Insert every record, reporting each failure
    ///
    /// The outer `Result` fails only when the batch is not admitted at all
    /// (closed handle, capacity); per-record failures land in the report.
    pub fn batch_add_report(
        &self,
        records: &[VectorRecord],
        options: &BatchAddOptions,
    ) -> Result<BatchReport> {
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        let start = Instant::now();
        self.with_handle(|handle| {
            let reservation = self.capacity().reserve(handle, records.len())?;
            let pool =
                WorkerPool::new(options.max_workers).with_cancellation(options.cancel.clone());

            let jobs: Vec<&VectorRecord> = records.iter().collect();
            let outcomes = pool.run(jobs, |_, record| {
                let result = self
                    .check_dimension(record.vector.len())
                    .and_then(|_| self.insert(handle, &record.vector, record.label));
                reservation.settle();
                result
            });
            drop(reservation);

            let mut report = BatchReport {
                total: records.len(),
                ..Default::default()
            };
            for (job_index, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    Ok(()) => report.succeeded += 1,
                    Err(error) => report.failures.push(JobFailure {
                        job_index,
                        label: records[job_index].label,
                        error,
                    }),
                }
            }

            debug!(
                records = report.total,
                succeeded = report.succeeded,
                failed = report.failures.len(),
                workers = pool.workers().min(records.len()),
                chunk_size = options.chunk_size,
                elapsed_us = start.elapsed().as_micros() as u64,
                "batch add finished"
            );
            Ok(report)
        })
    }
}
