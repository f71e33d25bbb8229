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

//! Index Configuration
//!
//! [`IndexConfig`] carries the construction parameters of an index and can
//! be embedded in an application's serde config:
//!
//! ```toml
//! [vectors]
//! space = "cosine"
//! dimension = 384
//! max_elements = 100000
//! m = 16
//! ef_construction = 200
//! ```
//!
//! ## Environment Variables
//!
//! - `HNSWGATE_MAX_WORKERS`: default worker count for bulk operations whose
//!   options leave `max_workers` at 0. Falls back to `num_cpus::get()`.

use crate::engine::{EngineParams, Metric};
use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Once;
use tracing::warn;

/// Environment variable overriding the default worker count
pub const MAX_WORKERS_ENV: &str = "HNSWGATE_MAX_WORKERS";

static INVALID_WORKERS_WARNING: Once = Once::new();

/// Default worker count for bulk operations
///
/// `HNSWGATE_MAX_WORKERS` if it holds a positive integer, otherwise the
/// number of logical CPUs. Never returns 0.
pub fn default_workers() -> usize {
    match std::env::var(MAX_WORKERS_ENV) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                INVALID_WORKERS_WARNING.call_once(|| {
                    warn!(
                        value = %raw,
                        "{} is not a positive integer, using CPU count",
                        MAX_WORKERS_ENV
                    );
                });
                num_cpus::get().max(1)
            }
        },
        Err(_) => num_cpus::get().max(1),
    }
}

/// Worker count for a call: `configured` if non-zero, else [`default_workers`]
pub fn resolve_workers(configured: usize) -> usize {
    if configured > 0 {
        configured
    } else {
        default_workers()
    }
}

/// Distance space of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    /// Squared L2 distance
    #[default]
    Euclidean,
    /// `1 - dot(a, b)`, vectors stored as given
    InnerProduct,
    /// Inner product over vectors normalized on insert and query
    Cosine,
}

impl SpaceType {
    /// Metric the engine is created with
    pub fn metric(self) -> Metric {
        match self {
            SpaceType::Euclidean => Metric::L2,
            SpaceType::InnerProduct | SpaceType::Cosine => Metric::InnerProduct,
        }
    }

    /// Whether vectors are normalized before reaching the engine
    pub fn normalizes(self) -> bool {
        self == SpaceType::Cosine
    }

    /// Convert an engine distance into a similarity score
    ///
    /// Cosine: `1 - distance`, i.e. the cosine similarity. Other spaces:
    /// `1 / (1 + distance)`, which is not a calibrated similarity and
    /// preserves ranking only while `distance > -1`. L2 distances always
    /// qualify; unnormalized inner-product distances (`1 - dot`) with
    /// `dot >= 2` give an infinite or negative score.
    #[inline]
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            SpaceType::Cosine => 1.0 - distance,
            _ => 1.0 / (1.0 + distance),
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpaceType::Euclidean => "l2",
            SpaceType::InnerProduct => "ip",
            SpaceType::Cosine => "cosine",
        };
        f.write_str(name)
    }
}

impl FromStr for SpaceType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(SpaceType::Euclidean),
            "ip" | "inner_product" | "dot" => Ok(SpaceType::InnerProduct),
            "cosine" | "cos" => Ok(SpaceType::Cosine),
            other => Err(IndexError::InvalidConfig(format!(
                "unknown space type: {}",
                other
            ))),
        }
    }
}

/// Construction parameters of an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub space: SpaceType,
    pub dimension: usize,
    pub max_elements: usize,
    /// Max connections per layer
    pub m: usize,
    /// Build-time beam width
    pub ef_construction: usize,
    /// Query-time beam width (engine default when unset)
    pub ef_search: Option<usize>,
    /// Seed for level generation
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            space: SpaceType::Euclidean,
            dimension: 0,
            max_elements: 10_000,
            m: 16,
            ef_construction: 200,
            ef_search: None,
            seed: 100,
        }
    }
}

impl IndexConfig {
    pub fn new(space: SpaceType, dimension: usize) -> Self {
        Self {
            space,
            dimension,
            ..Default::default()
        }
    }

    /// Small graphs, fast builds
    pub fn fast(space: SpaceType, dimension: usize) -> Self {
        Self {
            m: 8,
            ef_construction: 64,
            ..Self::new(space, dimension)
        }
    }

    /// Dense graphs, better recall
    pub fn high_recall(space: SpaceType, dimension: usize) -> Self {
        Self {
            m: 32,
            ef_construction: 400,
            ef_search: Some(128),
            ..Self::new(space, dimension)
        }
    }

    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = Some(ef_search);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject parameters the engine cannot build with
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(IndexError::InvalidConfig("dimension must be > 0".into()));
        }
        if self.max_elements == 0 {
            return Err(IndexError::InvalidConfig(
                "max_elements must be > 0".into(),
            ));
        }
        if self.m < 2 {
            return Err(IndexError::InvalidConfig(format!(
                "m must be >= 2, got {}",
                self.m
            )));
        }
        if self.ef_search == Some(0) {
            return Err(IndexError::InvalidConfig("ef_search must be > 0".into()));
        }
        Ok(())
    }

    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            dimension: self.dimension,
            max_elements: self.max_elements,
            m: self.m,
            ef_construction: self.ef_construction,
            seed: self.seed,
            metric: self.space.metric(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexConfig::default();
        assert_eq!(config.m, 16);
        assert_eq!(config.ef_construction, 200);
        assert_eq!(config.seed, 100);
        assert!(config.validate().is_err(), "dimension 0 must be rejected");
    }

    #[test]
    fn test_presets() {
        let fast = IndexConfig::fast(SpaceType::Cosine, 128);
        let recall = IndexConfig::high_recall(SpaceType::Cosine, 128);
        assert!(fast.m < recall.m);
        assert!(fast.validate().is_ok());
        assert!(recall.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let base = IndexConfig::new(SpaceType::Euclidean, 4);
        assert!(base.validate().is_ok());
        assert!(base.clone().with_max_elements(0).validate().is_err());
        assert!(base.clone().with_m(1).validate().is_err());
        assert!(base.with_ef_search(0).validate().is_err());
    }

    #[test]
    fn test_space_metric_mapping() {
        assert_eq!(SpaceType::Euclidean.metric(), Metric::L2);
        assert_eq!(SpaceType::InnerProduct.metric(), Metric::InnerProduct);
        assert_eq!(SpaceType::Cosine.metric(), Metric::InnerProduct);
        assert!(SpaceType::Cosine.normalizes());
        assert!(!SpaceType::InnerProduct.normalizes());
    }

    #[test]
    fn test_similarity_conversion() {
        assert!((SpaceType::Cosine.similarity(0.0) - 1.0).abs() < 1e-6);
        assert!((SpaceType::Cosine.similarity(1.0)).abs() < 1e-6);
        assert!((SpaceType::Euclidean.similarity(0.0) - 1.0).abs() < 1e-6);
        assert!((SpaceType::Euclidean.similarity(1.0) - 0.5).abs() < 1e-6);
        // Rank preserving
        assert!(SpaceType::Euclidean.similarity(2.0) < SpaceType::Euclidean.similarity(1.0));
    }

    #[test]
    fn test_inner_product_similarity_range() {
        let ip = SpaceType::InnerProduct;
        // dot in (-inf, 2): ranking kept
        assert!(ip.similarity(-0.5) > ip.similarity(0.0));
        assert!(ip.similarity(0.0) > ip.similarity(1.5));
        // dot == 2 and beyond: outside the rank-preserving range
        assert!(ip.similarity(-1.0).is_infinite());
        assert!(ip.similarity(-3.0) < 0.0);
    }

    #[test]
    fn test_space_parse_and_display() {
        for space in [SpaceType::Euclidean, SpaceType::InnerProduct, SpaceType::Cosine] {
            assert_eq!(space.to_string().parse::<SpaceType>().unwrap(), space);
        }
        assert_eq!("COSINE".parse::<SpaceType>().unwrap(), SpaceType::Cosine);
        assert!("hamming".parse::<SpaceType>().is_err());
    }

    #[test]
    fn test_resolve_workers() {
        assert_eq!(resolve_workers(3), 3);
        assert!(resolve_workers(0) >= 1);
    }

    #[test]
    fn test_engine_params() {
        let params = IndexConfig::new(SpaceType::Cosine, 8)
            .with_max_elements(50)
            .with_seed(7)
            .engine_params();
        assert_eq!(params.dimension, 8);
        assert_eq!(params.max_elements, 50);
        assert_eq!(params.seed, 7);
        assert_eq!(params.metric, Metric::InnerProduct);
    }
}
