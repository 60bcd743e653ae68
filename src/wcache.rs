// SPDX-License-Identifier: Apache-2.0

//! Weighted seed cache: fitness scoring, ranking, and persistence.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::persist::{self, StoreError};

/// Pluggable novelty term for the weight formula. The default model scores
/// every fingerprint the same; an edit-distance model can be injected
/// without touching the formula.
pub trait NoveltyModel {
    fn score(&self, fingerprint: &str) -> f64;
}

/// Fixed novelty for every fingerprint.
pub struct ConstantNovelty(pub f64);

impl NoveltyModel for ConstantNovelty {
    fn score(&self, _fingerprint: &str) -> f64 {
        self.0
    }
}

/// Coefficients of the weight formula
/// `w = alpha*coverage + beta*bug + gamma*novelty + delta*efficiency`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WeightCoefficients {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl Default for WeightCoefficients {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 2.0,
            gamma: 0.5,
            delta: 1.0,
        }
    }
}

/// Latest scoring inputs for one fingerprint. Overwritten on every update;
/// only the most recent record is retained.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryRecord {
    pub cov_gain: f64,
    pub bug_score: f64,
    pub cycles: u64,
    pub weight: f64,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct CacheSnapshot {
    entries: BTreeMap<String, f64>,
    history: BTreeMap<String, HistoryRecord>,
}

/// Per-fingerprint fitness weights with synchronous, atomic persistence.
pub struct WeightCache {
    path: PathBuf,
    coefficients: WeightCoefficients,
    novelty: Box<dyn NoveltyModel + Send>,
    entries: BTreeMap<String, f64>,
    history: BTreeMap<String, HistoryRecord>,
}

impl std::fmt::Debug for WeightCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightCache")
            .field("path", &self.path)
            .field("coefficients", &self.coefficients)
            .field("novelty", &"<dyn NoveltyModel>")
            .field("entries", &self.entries)
            .field("history", &self.history)
            .finish()
    }
}

impl WeightCache {
    /// Opens the cache at `path`, loading an existing snapshot if present.
    pub fn open(
        path: &Path,
        coefficients: WeightCoefficients,
        novelty: Box<dyn NoveltyModel + Send>,
    ) -> Result<Self, StoreError> {
        let snapshot: CacheSnapshot = persist::load_json(path)?.unwrap_or_default();
        log::debug!(
            "weight cache {}: {} entries",
            path.display(),
            snapshot.entries.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            coefficients,
            novelty,
            entries: snapshot.entries,
            history: snapshot.history,
        })
    }

    /// Recomputes and stores the weight for `fingerprint`, overwriting any
    /// previous entry and history record, and persists before returning.
    pub fn update(
        &mut self,
        fingerprint: &str,
        coverage_delta: f64,
        bug_score: f64,
        cycles: u64,
    ) -> Result<f64, StoreError> {
        let c = &self.coefficients;
        let novelty = self.novelty.score(fingerprint);
        let efficiency = (coverage_delta + bug_score) / cycles.max(1) as f64;
        let weight =
            c.alpha * coverage_delta + c.beta * bug_score + c.gamma * novelty + c.delta * efficiency;

        self.entries.insert(fingerprint.to_string(), weight);
        self.history.insert(
            fingerprint.to_string(),
            HistoryRecord {
                cov_gain: coverage_delta,
                bug_score,
                cycles,
                weight,
            },
        );
        self.save()?;
        log::debug!("wcache: {fingerprint} -> w={weight:.4}");
        Ok(weight)
    }

    pub fn weight(&self, fingerprint: &str) -> Option<f64> {
        self.entries.get(fingerprint).copied()
    }

    pub fn history(&self, fingerprint: &str) -> Option<&HistoryRecord> {
        self.history.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` highest-weight fingerprints, heaviest first. Ties break by
    /// ascending fingerprint order so the ranking is stable across runs
    /// and reload.
    pub fn top_k(&self, k: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(id, &w)| (id.clone(), w))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);
        ranked
    }

    fn save(&self) -> Result<(), StoreError> {
        let snapshot = CacheSnapshot {
            entries: self.entries.clone(),
            history: self.history.clone(),
        };
        persist::save_json_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn open(dir: &Path) -> WeightCache {
        WeightCache::open(
            &dir.join("wcache.json"),
            WeightCoefficients::default(),
            Box::new(ConstantNovelty(1.0)),
        )
        .unwrap()
    }

    #[test]
    fn weight_formula_matches_coefficients() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = WeightCache::open(
            &dir.path().join("wcache.json"),
            WeightCoefficients {
                alpha: 1.0,
                beta: 2.0,
                gamma: 0.5,
                delta: 1.0,
            },
            Box::new(ConstantNovelty(1.0)),
        )
        .unwrap();
        let w = cache.update("abcd", 0.1, 1.0, 500).unwrap();
        let expected = 1.0 * 0.1 + 2.0 * 1.0 + 0.5 * 1.0 + 1.0 * (0.1 + 1.0) / 500.0;
        assert_eq!(w, expected);
        assert_eq!(cache.weight("abcd"), Some(expected));
    }

    #[test]
    fn zero_cycles_does_not_divide_by_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path());
        let w = cache.update("abcd", 0.5, 0.0, 0).unwrap();
        assert!(w.is_finite());
    }

    #[test]
    fn update_overwrites_entry_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path());
        cache.update("abcd", 0.5, 1.0, 100).unwrap();
        cache.update("abcd", 0.0, 0.0, 900).unwrap();
        assert_eq!(cache.len(), 1);
        let record = cache.history("abcd").unwrap();
        assert_eq!(record.cycles, 900);
        assert_eq!(record.bug_score, 0.0);
        assert_eq!(cache.weight("abcd"), Some(record.weight));
    }

    #[test]
    fn top_k_ranks_by_weight_then_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path());
        // Same inputs for "bbbb" and "aaaa" give equal weights.
        cache.update("bbbb", 0.2, 0.0, 100).unwrap();
        cache.update("aaaa", 0.2, 0.0, 100).unwrap();
        cache.update("cccc", 0.9, 1.0, 100).unwrap();
        let top = cache.top_k(2);
        assert_eq!(top[0].0, "cccc");
        assert_eq!(top[1].0, "aaaa");
        assert_eq!(cache.top_k(10).len(), 3);
        assert!(cache.top_k(0).is_empty());
    }

    #[test]
    fn snapshot_roundtrips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wcache.json");
        let mut before = WeightCache::open(
            &path,
            WeightCoefficients::default(),
            Box::new(ConstantNovelty(1.0)),
        )
        .unwrap();
        before.update("a1", 0.123456789, 1.0, 321).unwrap();
        before.update("b2", 0.0, 0.5, 7).unwrap();

        let after = WeightCache::open(
            &path,
            WeightCoefficients::default(),
            Box::new(ConstantNovelty(1.0)),
        )
        .unwrap();
        assert_eq!(after.entries, before.entries);
        assert_eq!(after.history, before.history);
        assert_eq!(after.top_k(10), before.top_k(10));
    }

    #[test]
    fn corrupt_snapshot_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wcache.json");
        std::fs::write(&path, "][").unwrap();
        let err = WeightCache::open(
            &path,
            WeightCoefficients::default(),
            Box::new(ConstantNovelty(1.0)),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err}");
    }
}
