// SPDX-License-Identifier: Apache-2.0

//! Global coverage aggregation across runs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::persist::{self, StoreError};

/// Monotonically growing set of coverage-point identifiers, persisted as a
/// whole-set snapshot. Merging is pure union: idempotent and commutative.
#[derive(Debug)]
pub struct CoverageFusion {
    path: PathBuf,
    norm: f64,
    global: BTreeSet<String>,
}

impl CoverageFusion {
    /// Opens the store at `path`, loading an existing snapshot if present.
    /// `norm` is the coverage-delta normalization divisor.
    pub fn open(path: &Path, norm: f64) -> Result<Self, StoreError> {
        let global: BTreeSet<String> = persist::load_json(path)?.unwrap_or_default();
        log::debug!(
            "coverage store {}: {} points",
            path.display(),
            global.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            norm,
            global,
        })
    }

    /// Folds `local` into the global set and returns the normalized growth
    /// `(|after| - |before|) / norm`. Merging the same set twice yields
    /// zero the second time; the snapshot is only rewritten when the set
    /// actually grew.
    pub fn merge(&mut self, local: &BTreeSet<String>) -> Result<f64, StoreError> {
        let before = self.global.len();
        self.global.extend(local.iter().cloned());
        let grown = self.global.len() - before;
        if grown > 0 {
            self.save()?;
            log::debug!("coverage: +{} points ({} total)", grown, self.global.len());
        }
        Ok(grown as f64 / self.norm)
    }

    /// Points in `total` not yet observed globally.
    pub fn uncovered(&self, total: &BTreeSet<String>) -> BTreeSet<String> {
        total.difference(&self.global).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    pub fn contains(&self, point: &str) -> bool {
        self.global.contains(point)
    }

    fn save(&self) -> Result<(), StoreError> {
        persist::save_json_atomic(&self.path, &self.global)
    }
}
