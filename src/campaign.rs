// SPDX-License-Identifier: Apache-2.0

//! One closed-loop generation: select, mutate, execute, compare, score,
//! promote. How many generations to run and when to stop is the caller's
//! decision.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::arbiter::{Arbiter, CorpusSink, CorpusStore};
use crate::config::FuzzConfig;
use crate::coverage::CoverageFusion;
use crate::exec::{self, ExecOutcome, Executor};
use crate::filter::LightweightFilter;
use crate::mutate::{MutationEngine, MutationStats};
use crate::oracle::{DifferentialOracle, MismatchKind};
use crate::persist::StoreError;
use crate::testcase::Testcase;
use crate::wcache::{NoveltyModel, WeightCache};

/// Summary of one generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub seeds: usize,
    pub offspring: usize,
    pub executed: usize,
    pub golden_failures: usize,
    pub candidate_failures: usize,
    pub timeouts: usize,
    /// Testcases with at least one mismatch.
    pub divergent: usize,
    /// Total mismatches across the generation.
    pub mismatches: usize,
    pub coverage_points: usize,
    pub promoted: Vec<String>,
    pub mutation: MutationStats,
}

/// The closed generation loop over one executor and one state directory.
///
/// Stores live under `state_dir` as `wcache.json`, `coverage.json`, and
/// `corpus.json`.
pub struct Campaign<E: Executor + 'static> {
    config: FuzzConfig,
    executor: Arc<E>,
    engine: MutationEngine,
    oracle: DifferentialOracle,
    filter: LightweightFilter,
    wcache: WeightCache,
    coverage: CoverageFusion,
    corpus: CorpusStore,
    arbiter: Arbiter,
    /// Every testcase seen so far, by fingerprint; the cache ranks ids and
    /// this pool resolves them back to instruction sequences.
    pool: BTreeMap<String, Testcase>,
}

impl<E: Executor + 'static> Campaign<E> {
    pub fn new(
        config: FuzzConfig,
        executor: Arc<E>,
        state_dir: &Path,
        novelty: Box<dyn NoveltyModel + Send>,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(state_dir).map_err(|e| StoreError::Io {
            path: state_dir.to_path_buf(),
            source: e,
        })?;
        let wcache = WeightCache::open(
            &state_dir.join("wcache.json"),
            config.coefficients,
            novelty,
        )?;
        let coverage = CoverageFusion::open(&state_dir.join("coverage.json"), config.coverage_norm)?;
        let corpus = CorpusStore::open(&state_dir.join("corpus.json"))?;
        let filter = LightweightFilter::new(config.filter.clone());
        let engine = MutationEngine::new(filter.clone());
        let oracle = DifferentialOracle::new(config.oracle.clone());
        let arbiter = Arbiter::new(config.promote_threshold);

        let mut pool = BTreeMap::new();
        for tc in corpus.testcases() {
            pool.insert(tc.id().to_string(), tc);
        }

        Ok(Self {
            config,
            executor,
            engine,
            oracle,
            filter,
            wcache,
            coverage,
            corpus,
            arbiter,
            pool,
        })
    }

    /// Admits external seeds (filtered) into the selection pool.
    pub fn add_seeds(&mut self, seeds: Vec<Testcase>) -> usize {
        let (passed, stats) = self.filter.filter_batch(seeds);
        if stats.passed < stats.total {
            log::warn!(
                "seed intake: {} of {} rejected by filter",
                stats.total - stats.passed,
                stats.total
            );
        }
        let admitted = passed.len();
        for tc in passed {
            self.pool.insert(tc.id().to_string(), tc);
        }
        admitted
    }

    pub fn wcache(&self) -> &WeightCache {
        &self.wcache
    }

    pub fn coverage(&self) -> &CoverageFusion {
        &self.coverage
    }

    pub fn corpus(&self) -> &CorpusStore {
        &self.corpus
    }

    /// Seeds selected for the next generation: the cache's top-k, falling
    /// back to pool order while the cache is still empty.
    fn select_seeds(&self) -> Vec<Testcase> {
        let k = self.config.seeds_per_generation;
        let ranked = self.wcache.top_k(k);
        let mut selected: Vec<Testcase> = ranked
            .iter()
            .filter_map(|(id, _)| self.pool.get(id).cloned())
            .collect();
        if selected.len() < k {
            let have: BTreeSet<String> = selected.iter().map(|t| t.id().to_string()).collect();
            for tc in self.pool.values() {
                if selected.len() >= k {
                    break;
                }
                if !have.contains(tc.id()) {
                    selected.push(tc.clone());
                }
            }
        }
        selected
    }

    /// Runs one generation and returns its summary.
    pub fn run_generation<R: Rng>(&mut self, rng: &mut R) -> Result<GenerationReport, StoreError> {
        let mut report = GenerationReport::default();

        let seeds = self.select_seeds();
        report.seeds = seeds.len();
        if seeds.is_empty() {
            log::warn!("generation skipped: no seeds in pool");
            return Ok(report);
        }

        // Expand. Content addressing dedups offspring across seeds.
        let mut offspring: BTreeMap<String, Testcase> = BTreeMap::new();
        for seed in &seeds {
            let batch = self
                .engine
                .mutate(seed, self.config.mutations_per_seed, rng);
            report.mutation.merge_from(&batch.stats);
            for child in batch.offspring {
                offspring.insert(child.id().to_string(), child);
            }
        }
        let batch: Vec<Testcase> = offspring.into_values().collect();
        report.offspring = batch.len();

        // Execute golden + candidates concurrently, then score per testcase.
        let runs = exec::run_batch(
            &self.executor,
            &batch,
            Duration::from_millis(self.config.exec_timeout_ms),
            self.config.max_inflight,
        );
        let candidate_ids = self.executor.candidate_ids();

        for tc in &batch {
            let Some(run) = runs.get(tc.id()) else {
                continue;
            };
            report.executed += 1;

            let golden = match &run.golden {
                ExecOutcome::Completed(trace) => trace,
                ExecOutcome::TimedOut => {
                    report.timeouts += 1;
                    report.golden_failures += 1;
                    continue;
                }
                ExecOutcome::Failed(_) => {
                    report.golden_failures += 1;
                    continue;
                }
            };

            let mut traces: Vec<Vec<_>> = Vec::new();
            let mut ids: Vec<String> = Vec::new();
            let mut local_coverage = golden.coverage.clone();
            for id in &candidate_ids {
                match run.candidates.get(id) {
                    Some(ExecOutcome::Completed(trace)) => {
                        local_coverage.extend(trace.coverage.iter().cloned());
                        traces.push(trace.states.clone());
                        ids.push(id.clone());
                    }
                    Some(ExecOutcome::TimedOut) => {
                        report.timeouts += 1;
                        report.candidate_failures += 1;
                    }
                    Some(ExecOutcome::Failed(_)) | None => {
                        report.candidate_failures += 1;
                    }
                }
            }

            let mismatches = self.oracle.compare(&golden.states, &traces, &ids);
            let score = bug_score(&mismatches.iter().map(|m| m.kind).collect::<Vec<_>>());
            if !mismatches.is_empty() {
                report.divergent += 1;
                report.mismatches += mismatches.len();
                log::info!(
                    "{}: {} mismatches (first at cycle {})",
                    tc.id(),
                    mismatches.len(),
                    mismatches[0].cycle
                );
            }

            let coverage_delta = self.coverage.merge(&local_coverage)?;
            let cycles = golden.states.len() as u64;
            self.wcache
                .update(tc.id(), coverage_delta, score, cycles)?;
            self.pool.insert(tc.id().to_string(), tc.clone());
        }

        report.coverage_points = self.coverage.len();
        report.promoted = self.arbiter.promote(
            &batch,
            |id| self.wcache.weight(id),
            &mut self.corpus as &mut dyn CorpusSink,
        )?;

        log::info!(
            "generation: {} seeds -> {} offspring, {} divergent, {} promoted, {} coverage points",
            report.seeds,
            report.offspring,
            report.divergent,
            report.promoted.len(),
            report.coverage_points
        );
        Ok(report)
    }
}

/// Binary bug signal from a comparison: any architectural divergence scores
/// 1.0; pure trace-length skew scores 0.5; a clean comparison scores 0.
fn bug_score(kinds: &[MismatchKind]) -> f64 {
    let architectural = kinds
        .iter()
        .any(|k| !matches!(k, MismatchKind::Timing));
    if architectural {
        1.0
    } else if !kinds.is_empty() {
        0.5
    } else {
        0.0
    }
}
