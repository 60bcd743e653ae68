// SPDX-License-Identifier: Apache-2.0

//! Explicit campaign configuration.
//!
//! One value constructed up front and passed by reference into every
//! component constructor; no component reads environment or file state on
//! its own.

use std::path::Path;

use crate::filter::FilterConfig;
use crate::oracle::OracleConfig;
use crate::persist::{self, StoreError};
use crate::wcache::WeightCoefficients;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    pub coefficients: WeightCoefficients,
    pub filter: FilterConfig,
    pub oracle: OracleConfig,
    /// Offspring attempted per selected seed.
    pub mutations_per_seed: usize,
    /// Seeds selected per generation (the top-k size).
    pub seeds_per_generation: usize,
    /// Minimum weight for corpus promotion.
    pub promote_threshold: f64,
    /// Per-testcase execution timeout.
    pub exec_timeout_ms: u64,
    /// Testcases fanned out at once; 0 means one per available core.
    pub max_inflight: usize,
    /// Divisor normalizing raw coverage growth into a delta.
    pub coverage_norm: f64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            coefficients: WeightCoefficients::default(),
            filter: FilterConfig::default(),
            oracle: OracleConfig::default(),
            mutations_per_seed: 3,
            seeds_per_generation: 5,
            promote_threshold: 0.5,
            exec_timeout_ms: 30_000,
            max_inflight: 0,
            coverage_norm: 1000.0,
        }
    }
}

impl FuzzConfig {
    /// Loads a config from a JSON file; missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        persist::load_json(path)?.ok_or_else(|| StoreError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        })
    }
}
