// SPDX-License-Identifier: Apache-2.0

//! Differential comparison of cycle-level architectural traces.

use std::fmt;

/// One memory access observed in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemAccess {
    pub addr: u64,
    pub value: u64,
}

/// Architectural snapshot for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArchState {
    pub pc: u64,
    pub regs: [u64; 32],
    pub mem: Option<MemAccess>,
}

impl ArchState {
    pub fn at(pc: u64) -> Self {
        Self {
            pc,
            regs: [0; 32],
            mem: None,
        }
    }
}

/// What diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    Pc,
    Register { index: usize },
    Memory,
    /// Trace-length skew beyond the configured tolerance. `expected` and
    /// `actual` carry the golden and candidate trace lengths.
    Timing,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchKind::Pc => write!(f, "pc"),
            MismatchKind::Register { index } => write!(f, "x{index}"),
            MismatchKind::Memory => write!(f, "mem"),
            MismatchKind::Timing => write!(f, "timing"),
        }
    }
}

/// One point of divergence between the golden trace and a candidate trace.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub cycle: usize,
    pub kind: MismatchKind,
    pub expected: u64,
    pub actual: u64,
    pub candidate: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OracleConfig {
    /// Register indices compared each cycle.
    pub tracked_regs: Vec<usize>,
    /// Tolerated trace-length skew in cycles. Value mismatches are never
    /// suppressed; skew beyond this yields one `Timing` mismatch.
    pub cycle_tolerance: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            tracked_regs: vec![0, 1, 2, 3],
            cycle_tolerance: 5,
        }
    }
}

/// Compares a golden trace against candidate traces cycle by cycle.
#[derive(Debug, Clone)]
pub struct DifferentialOracle {
    config: OracleConfig,
}

impl DifferentialOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self { config }
    }

    /// Emits one [`Mismatch`] per diverging tracked field per cycle per
    /// candidate, for cycles `0..shortest trace length`. There is no
    /// resynchronization: once diverged, fields keep being compared
    /// independently every cycle. Output is ordered by cycle ascending,
    /// then candidate id ascending.
    ///
    /// `candidates` and `candidate_ids` must have equal length.
    pub fn compare(
        &self,
        golden: &[ArchState],
        candidates: &[Vec<ArchState>],
        candidate_ids: &[String],
    ) -> Vec<Mismatch> {
        assert_eq!(
            candidates.len(),
            candidate_ids.len(),
            "one id per candidate trace"
        );
        let mut mismatches = Vec::new();
        if candidates.is_empty() {
            return mismatches;
        }

        // Candidate iteration order fixes the output ordering within a cycle.
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| candidate_ids[a].cmp(&candidate_ids[b]));

        let min_len = candidates
            .iter()
            .map(|t| t.len())
            .chain(std::iter::once(golden.len()))
            .min()
            .unwrap_or(0);

        for cycle in 0..min_len {
            let gold = &golden[cycle];
            for &ci in &order {
                let cand = &candidates[ci][cycle];
                let id = &candidate_ids[ci];
                if cand.pc != gold.pc {
                    mismatches.push(Mismatch {
                        cycle,
                        kind: MismatchKind::Pc,
                        expected: gold.pc,
                        actual: cand.pc,
                        candidate: id.clone(),
                    });
                }
                for &reg in &self.config.tracked_regs {
                    if cand.regs[reg] != gold.regs[reg] {
                        mismatches.push(Mismatch {
                            cycle,
                            kind: MismatchKind::Register { index: reg },
                            expected: gold.regs[reg],
                            actual: cand.regs[reg],
                            candidate: id.clone(),
                        });
                    }
                }
                if let (Some(g), Some(c)) = (&gold.mem, &cand.mem) {
                    if g != c {
                        mismatches.push(Mismatch {
                            cycle,
                            kind: MismatchKind::Memory,
                            expected: g.addr,
                            actual: c.addr,
                            candidate: id.clone(),
                        });
                    }
                }
            }
        }

        for &ci in &order {
            let cand_len = candidates[ci].len();
            if golden.len().abs_diff(cand_len) > self.config.cycle_tolerance {
                mismatches.push(Mismatch {
                    cycle: golden.len().min(cand_len),
                    kind: MismatchKind::Timing,
                    expected: golden.len() as u64,
                    actual: cand_len as u64,
                    candidate: candidate_ids[ci].clone(),
                });
            }
        }

        // Timing entries land past the compared range, but their cycles can
        // interleave with each other; one stable pass restores the contract.
        mismatches.sort_by(|a, b| {
            a.cycle
                .cmp(&b.cycle)
                .then_with(|| a.candidate.cmp(&b.candidate))
        });
        mismatches
    }
}
