// SPDX-License-Identifier: Apache-2.0

//! Closed-loop generation against a stub execution collaborator: one
//! candidate diverges on pc from cycle 0, two are bit-identical to the
//! golden model.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use rvfuzz::arbiter::CorpusSink;
use rvfuzz::campaign::Campaign;
use rvfuzz::config::FuzzConfig;
use rvfuzz::exec::{ExecFailure, ExecTrace, Executor};
use rvfuzz::oracle::{ArchState, DifferentialOracle, MismatchKind, OracleConfig};
use rvfuzz::testcase::{Origin, Testcase};
use rvfuzz::wcache::ConstantNovelty;

const TRACE_LEN: usize = 8;

fn golden_states() -> Vec<ArchState> {
    (0..TRACE_LEN)
        .map(|i| ArchState::at(0x8000_0000 + 4 * i as u64))
        .collect()
}

fn divergent_states() -> Vec<ArchState> {
    // Offset pc from cycle 0 onward.
    (0..TRACE_LEN)
        .map(|i| ArchState::at(0x8000_0100 + 4 * i as u64))
        .collect()
}

struct StubExecutor;

impl Executor for StubExecutor {
    fn candidate_ids(&self) -> Vec<String> {
        vec![
            "dut-divergent".to_string(),
            "dut-good-a".to_string(),
            "dut-good-b".to_string(),
        ]
    }

    fn run_golden(&self, tc: &Testcase) -> Result<ExecTrace, ExecFailure> {
        Ok(ExecTrace {
            states: golden_states(),
            coverage: BTreeSet::from([format!("edge:{}", tc.id())]),
        })
    }

    fn run_candidate(&self, id: &str, _tc: &Testcase) -> Result<ExecTrace, ExecFailure> {
        let states = if id == "dut-divergent" {
            divergent_states()
        } else {
            golden_states()
        };
        Ok(ExecTrace {
            states,
            coverage: BTreeSet::new(),
        })
    }
}

fn seed_testcase() -> Testcase {
    // addi x1, x0, 1 / addi x2, x1, 2 / addi x3, x2, 3 / ebreak
    Testcase::new(
        vec![0x0010_0093, 0x0020_8113, 0x0031_0193, 0x0010_0073],
        Origin::CorpusSeed,
    )
}

fn campaign(threshold: f64, dir: &std::path::Path) -> Campaign<StubExecutor> {
    let config = FuzzConfig {
        mutations_per_seed: 3,
        promote_threshold: threshold,
        ..FuzzConfig::default()
    };
    let mut campaign = Campaign::new(
        config,
        Arc::new(StubExecutor),
        dir,
        Box::new(ConstantNovelty(1.0)),
    )
    .unwrap();
    assert_eq!(campaign.add_seeds(vec![seed_testcase()]), 1);
    campaign
}

#[test]
fn oracle_blames_only_the_divergent_candidate_on_every_cycle() {
    let exec = StubExecutor;
    let ids = exec.candidate_ids();
    let traces = vec![divergent_states(), golden_states(), golden_states()];
    let oracle = DifferentialOracle::new(OracleConfig::default());
    let mismatches = oracle.compare(&golden_states(), &traces, &ids);

    assert!(!mismatches.is_empty());
    assert!(mismatches.iter().all(|m| m.candidate == "dut-divergent"));
    assert!(mismatches.iter().all(|m| m.kind == MismatchKind::Pc));
    let cycles: Vec<usize> = mismatches.iter().map(|m| m.cycle).collect();
    assert_eq!(cycles, (0..TRACE_LEN).collect::<Vec<_>>());
}

#[test]
fn divergence_scores_a_bug_and_promotes_above_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut campaign = campaign(0.5, dir.path());
    let mut rng = Pcg64Mcg::seed_from_u64(5);
    let report = campaign.run_generation(&mut rng).unwrap();

    assert_eq!(report.seeds, 1);
    assert!(report.offspring >= 1 && report.offspring <= 3);
    assert_eq!(report.divergent, report.offspring);
    // Every offspring hit the divergent candidate on all compared cycles.
    assert_eq!(report.mismatches, report.offspring * TRACE_LEN);
    assert_eq!(report.golden_failures, 0);
    assert_eq!(report.candidate_failures, 0);

    for id in &report.promoted {
        let record = campaign.wcache().history(id).unwrap();
        assert_eq!(record.bug_score, 1.0);
        assert!(record.weight > 0.0);
        assert!(record.weight >= 0.5);
        assert!(campaign.corpus().contains(id));
    }
    // With the default coefficients a confirmed divergence clears the
    // promotion bar, so every executed offspring lands in the corpus.
    assert_eq!(report.promoted.len(), report.offspring);
}

#[test]
fn high_threshold_excludes_divergent_testcases_from_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let mut campaign = campaign(100.0, dir.path());
    let mut rng = Pcg64Mcg::seed_from_u64(5);
    let report = campaign.run_generation(&mut rng).unwrap();

    assert!(report.offspring >= 1);
    assert_eq!(report.divergent, report.offspring);
    assert!(report.promoted.is_empty());
    assert_eq!(campaign.corpus().len(), 0);
    // The weights are still recorded; only promotion was withheld.
    assert!(campaign.wcache().len() >= report.offspring);
}

#[test]
fn generations_are_reproducible_for_a_fixed_rng_seed() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let mut a = campaign(0.5, dir_a.path());
    let mut b = campaign(0.5, dir_b.path());

    let report_a = a.run_generation(&mut Pcg64Mcg::seed_from_u64(9)).unwrap();
    let report_b = b.run_generation(&mut Pcg64Mcg::seed_from_u64(9)).unwrap();

    assert_eq!(report_a.offspring, report_b.offspring);
    assert_eq!(report_a.promoted, report_b.promoted);
    assert_eq!(
        a.wcache().top_k(10).iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
        b.wcache().top_k(10).iter().map(|(id, _)| id.clone()).collect::<Vec<_>>()
    );
}
