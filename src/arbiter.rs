// SPDX-License-Identifier: Apache-2.0

//! Promotion of high-weight candidates into the long-lived corpus.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::persist::{self, StoreError};
use crate::testcase::{Origin, Testcase};

/// A promoted testcase with the weight it carried at promotion time.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CorpusEntry {
    pub words: Vec<u32>,
    pub origin: Origin,
    pub weight: f64,
}

/// Append-capable corpus sink keyed by fingerprint.
pub trait CorpusSink {
    /// Appends the entry unless the fingerprint is already present.
    /// Returns `true` when the entry was newly appended.
    fn append_if_absent(&mut self, tc: &Testcase, weight: f64) -> Result<bool, StoreError>;

    fn contains(&self, fingerprint: &str) -> bool;
}

/// File-backed corpus: `{ entries: map<id, entry> }` JSON snapshot,
/// append-only from this core's perspective.
pub struct CorpusStore {
    path: PathBuf,
    entries: BTreeMap<String, CorpusEntry>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct CorpusSnapshot {
    entries: BTreeMap<String, CorpusEntry>,
}

impl CorpusStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let snapshot: CorpusSnapshot = persist::load_json(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            entries: snapshot.entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&CorpusEntry> {
        self.entries.get(fingerprint)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &CorpusEntry)> {
        self.entries.iter()
    }

    /// Rebuilds the promoted testcases, e.g. to reseed a fresh campaign.
    pub fn testcases(&self) -> Vec<Testcase> {
        self.entries
            .values()
            .map(|e| Testcase::new(e.words.clone(), e.origin))
            .collect()
    }

    fn save(&self) -> Result<(), StoreError> {
        let snapshot = CorpusSnapshot {
            entries: self.entries.clone(),
        };
        persist::save_json_atomic(&self.path, &snapshot)
    }
}

impl CorpusSink for CorpusStore {
    fn append_if_absent(&mut self, tc: &Testcase, weight: f64) -> Result<bool, StoreError> {
        if self.entries.contains_key(tc.id()) {
            return Ok(false);
        }
        self.entries.insert(
            tc.id().to_string(),
            CorpusEntry {
                words: tc.words().to_vec(),
                origin: tc.origin(),
                weight,
            },
        );
        self.save()?;
        Ok(true)
    }

    fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }
}

/// Decides final promotion into the corpus.
pub struct Arbiter {
    threshold: f64,
}

impl Arbiter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Appends every candidate whose current weight is at or above the
    /// threshold. Promotion is monotonic and idempotent: an id already in
    /// the corpus is left untouched.
    pub fn promote(
        &self,
        candidates: &[Testcase],
        weight_of: impl Fn(&str) -> Option<f64>,
        corpus: &mut dyn CorpusSink,
    ) -> Result<Vec<String>, StoreError> {
        let mut promoted = Vec::new();
        for tc in candidates {
            let Some(weight) = weight_of(tc.id()) else {
                continue;
            };
            if weight >= self.threshold && corpus.append_if_absent(tc, weight)? {
                promoted.push(tc.id().to_string());
            }
        }
        log::info!(
            "arbiter: promoted {} of {} candidates",
            promoted.len(),
            candidates.len()
        );
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tc(words: Vec<u32>) -> Testcase {
        Testcase::new(words, Origin::MutationBinary)
    }

    fn open(dir: &Path) -> CorpusStore {
        CorpusStore::open(&dir.join("corpus.json")).unwrap()
    }

    #[test]
    fn promotes_only_at_or_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = open(dir.path());
        let strong = tc(vec![0x13, 0x33]);
        let weak = tc(vec![0x13]);
        let unknown = tc(vec![0x33]);
        let weights: BTreeMap<String, f64> = BTreeMap::from([
            (strong.id().to_string(), 0.8),
            (weak.id().to_string(), 0.2),
        ]);

        let arbiter = Arbiter::new(0.5);
        let promoted = arbiter
            .promote(
                &[strong.clone(), weak.clone(), unknown.clone()],
                |id| weights.get(id).copied(),
                &mut corpus,
            )
            .unwrap();
        assert_eq!(promoted, vec![strong.id().to_string()]);
        assert!(corpus.contains(strong.id()));
        assert!(!corpus.contains(weak.id()));
        assert!(!corpus.contains(unknown.id()));
        assert_eq!(corpus.get(strong.id()).unwrap().weight, 0.8);
    }

    #[test]
    fn duplicate_promotion_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = open(dir.path());
        let t = tc(vec![0x13, 0x33]);
        let arbiter = Arbiter::new(0.0);

        let first = arbiter
            .promote(&[t.clone()], |_| Some(1.0), &mut corpus)
            .unwrap();
        // Re-promotion with a different weight must not duplicate or
        // overwrite the original entry.
        let second = arbiter
            .promote(&[t.clone()], |_| Some(2.0), &mut corpus)
            .unwrap();
        assert_eq!(first, vec![t.id().to_string()]);
        assert!(second.is_empty());
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.get(t.id()).unwrap().weight, 1.0);
    }

    #[test]
    fn corpus_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let t = tc(vec![0x13, 0x33, 0x23]);
        {
            let mut corpus = open(dir.path());
            corpus.append_if_absent(&t, 0.75).unwrap();
        }
        let corpus = open(dir.path());
        assert_eq!(corpus.len(), 1);
        let entry = corpus.get(t.id()).unwrap();
        assert_eq!(entry.words, vec![0x13, 0x33, 0x23]);
        assert_eq!(entry.weight, 0.75);
        let rebuilt = corpus.testcases();
        assert_eq!(rebuilt[0].id(), t.id());
    }
}
