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

//! Job Dispatcher
//!
//! Fans a batch of jobs out over a bounded pool of scoped worker threads and
//! collects the results back in input order.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────┐
//!  jobs ──(i,j)──>│ bounded  │──> worker 0 ─┐
//!  (producer)     │ queue    │──> worker 1 ─┼──(i, result)──> slots[i]
//!                 │ cap 2·W  │──> worker W ─┘
//!                 └──────────┘
//! ```
//!
//! - Results are addressed by job index, so output order equals input order
//!   for any worker count.
//! - Workers are spawned per call and joined before [`WorkerPool::run`]
//!   returns.
//! - A failing job does not stop its siblings.
//! - A [`CancellationToken`] is checked by the producer before enqueuing and
//!   by workers before starting each job. Jobs that never start report
//!   [`IndexError::Cancelled`].

use crate::config::resolve_workers;
use crate::error::{IndexError, Result};
use crossbeam_channel::{bounded, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CancelState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Cooperative cancellation for bulk calls
///
/// Cloning shares the underlying flag. A token with a deadline reports
/// itself cancelled once the deadline has passed.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                deadline: None,
            }),
        }
    }

    /// Token that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// Token that expires `timeout` from now
    ///
    /// A timeout too large to represent as an `Instant` never expires.
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(deadline),
            None => Self::new(),
        }
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
            || self
                .state
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Bounded pool of workers for one bulk call
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    cancel: Option<CancellationToken>,
}

impl WorkerPool {
    /// Pool of `max_workers` workers (0 = [`default_workers`](crate::config::default_workers))
    pub fn new(max_workers: usize) -> Self {
        Self {
            workers: resolve_workers(max_workers),
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configured worker count; a call never uses more workers than jobs
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Run `work(index, job)` for every job, returning results in job order
    ///
    /// Blocks until every started job has finished. The returned vector has
    /// exactly one entry per job.
    pub fn run<J, R, F>(&self, jobs: Vec<J>, work: F) -> Vec<Result<R>>
    where
        J: Send,
        R: Send,
        F: Fn(usize, J) -> Result<R> + Sync,
    {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.workers.clamp(1, total);
        let (job_tx, job_rx) = bounded::<(usize, J)>(workers * 2);
        let (result_tx, result_rx) = unbounded::<(usize, Result<R>)>();
        let mut slots: Vec<Option<Result<R>>> = (0..total).map(|_| None).collect();

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                scope.spawn(move || {
                    for (idx, job) in job_rx.iter() {
                        let outcome = if self.is_cancelled() {
                            Err(IndexError::Cancelled { job: idx })
                        } else {
                            work(idx, job)
                        };
                        if result_tx.send((idx, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            for (idx, job) in jobs.into_iter().enumerate() {
                if self.is_cancelled() || job_tx.send((idx, job)).is_err() {
                    break;
                }
            }
            drop(job_tx);

            for (idx, outcome) in result_rx.iter() {
                slots[idx] = Some(outcome);
            }
        });

        slots
            .into_iter()
            .enumerate()
            .map(|(job, slot)| slot.unwrap_or(Err(IndexError::Cancelled { job })))
            .collect()
    }
}
