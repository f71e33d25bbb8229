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

//! Vector Normalization for Cosine Spaces
//!
//! A cosine index is stored as an inner-product index over unit vectors.
//! Every vector is normalized before it reaches the engine, on insert and
//! on query, so that:
//!
//! - `cosine_similarity(a, b) = dot_product(a, b)`
//! - `inner-product distance = 1 - cos(a, b)`
//!
//! ## Zero vectors
//!
//! The divisor is `‖v‖₂ + ε` with `ε = 1e-15`, so a zero vector maps to a
//! zero vector instead of NaNs.

/// Added to the norm before dividing
pub const NORM_EPSILON: f64 = 1e-15;

/// L2 norm of a vector
///
/// Accumulates in f64 so long vectors do not lose precision.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter()
        .map(|&x| (x as f64) * (x as f64))
        .sum::<f64>()
        .sqrt() as f32
}

/// Return a unit-length copy of `v`
///
/// Transforms v ∈ ℝ^d to v̂ = v / (‖v‖₂ + ε). The input is never modified,
/// and the function is safe to call from any number of threads.
///
/// # Example
/// ```
/// use hnswgate_index::normalize::normalize;
///
/// let v = normalize(&[3.0, 4.0]);
/// assert!((v[0] - 0.6).abs() < 1e-6);
/// assert!((v[1] - 0.8).abs() < 1e-6);
///
/// assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
/// ```
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm_sq: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum();
    let inv = 1.0 / (norm_sq.sqrt() + NORM_EPSILON);
    v.iter().map(|&x| ((x as f64) * inv) as f32).collect()
}

/// Check if a vector has unit length within `tolerance`
pub fn is_normalized(v: &[f32], tolerance: f32) -> bool {
    (l2_norm(v) - 1.0).abs() < tolerance
}
