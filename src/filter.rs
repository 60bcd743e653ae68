// SPDX-License-Identifier: Apache-2.0

//! Pre-execution filter that discards pathological testcases.

use crate::rv32::{self, Decoded};
use crate::testcase::Testcase;

/// Structural patterns that can be banned by configuration. The set is a
/// closed enum; adding a pattern is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BannedPattern {
    /// A branch whose offset is zero, i.e. a tight self-loop.
    SelfJump,
    /// Two consecutive backward control transfers.
    AdjacentLoopMarkers,
}

/// Filter thresholds. A loop marker is a backward control transfer: a
/// branch with a negative offset.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterConfig {
    pub max_instructions: usize,
    pub max_loop_markers: usize,
    pub min_instructions: usize,
    pub banned: Vec<BannedPattern>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_instructions: 200,
            max_loop_markers: 3,
            min_instructions: 3,
            banned: vec![BannedPattern::SelfJump, BannedPattern::AdjacentLoopMarkers],
        }
    }
}

/// Why a testcase was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooManyInstructions,
    TooManyLoopMarkers,
    Banned(BannedPattern),
    TooFewInstructions,
}

/// Counts from one [`LightweightFilter::filter_batch`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub total: usize,
    pub passed: usize,
    pub too_long: usize,
    pub too_many_loops: usize,
    pub banned_pattern: usize,
    pub too_short: usize,
}

impl FilterStats {
    fn record(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::TooManyInstructions => self.too_long += 1,
            RejectReason::TooManyLoopMarkers => self.too_many_loops += 1,
            RejectReason::Banned(_) => self.banned_pattern += 1,
            RejectReason::TooFewInstructions => self.too_short += 1,
        }
    }
}

/// Static acceptance test over an instruction sequence. Pure: the verdict
/// is a function of the words alone, computed in one linear pass.
#[derive(Debug, Clone)]
pub struct LightweightFilter {
    config: FilterConfig,
}

impl LightweightFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn is_valid(&self, tc: &Testcase) -> bool {
        self.check(tc).is_ok()
    }

    /// Full verdict with the first failing rule.
    pub fn check(&self, tc: &Testcase) -> Result<(), RejectReason> {
        let words = tc.words();
        if words.len() > self.config.max_instructions {
            return Err(RejectReason::TooManyInstructions);
        }

        let mut loop_markers = 0usize;
        let mut decodable = 0usize;
        let mut prev_was_marker = false;
        for &word in words {
            let decoded = rv32::decode(word).ok();
            if decoded.is_some() {
                decodable += 1;
            }
            let (is_marker, is_self_jump) = match decoded {
                Some(Decoded::Branch { imm, .. }) => (imm < 0, imm == 0),
                _ => (false, false),
            };
            if is_self_jump && self.banned(BannedPattern::SelfJump) {
                return Err(RejectReason::Banned(BannedPattern::SelfJump));
            }
            if is_marker {
                loop_markers += 1;
                if prev_was_marker && self.banned(BannedPattern::AdjacentLoopMarkers) {
                    return Err(RejectReason::Banned(BannedPattern::AdjacentLoopMarkers));
                }
            }
            prev_was_marker = is_marker;
        }

        if loop_markers > self.config.max_loop_markers {
            return Err(RejectReason::TooManyLoopMarkers);
        }
        if decodable < self.config.min_instructions {
            return Err(RejectReason::TooFewInstructions);
        }
        Ok(())
    }

    /// Applies [`is_valid`](Self::is_valid) over a batch, preserving input
    /// order in the surviving sequence.
    pub fn filter_batch(&self, batch: Vec<Testcase>) -> (Vec<Testcase>, FilterStats) {
        let mut stats = FilterStats {
            total: batch.len(),
            ..FilterStats::default()
        };
        let mut passed = Vec::with_capacity(batch.len());
        for tc in batch {
            match self.check(&tc) {
                Ok(()) => {
                    stats.passed += 1;
                    passed.push(tc);
                }
                Err(reason) => stats.record(reason),
            }
        }
        log::info!("filter: {} -> {} passed", stats.total, stats.passed);
        (passed, stats)
    }

    fn banned(&self, pattern: BannedPattern) -> bool {
        self.config.banned.contains(&pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rv32::{OPCODE_BRANCH, OPCODE_OP_IMM, TERMINATOR};
    use crate::testcase::Origin;

    fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        (((imm as u32) & 0xfff) << 20) | (rs1 << 15) | (rd << 7) | OPCODE_OP_IMM
    }

    fn beq(rs1: u32, rs2: u32, imm: i32) -> u32 {
        let i = imm as u32;
        (((i >> 12) & 0x1) << 31)
            | (((i >> 5) & 0x3f) << 25)
            | (rs2 << 20)
            | (rs1 << 15)
            | (((i >> 1) & 0xf) << 8)
            | (((i >> 11) & 0x1) << 7)
            | OPCODE_BRANCH
    }

    fn tc(words: Vec<u32>) -> Testcase {
        Testcase::new(words, Origin::CorpusSeed)
    }

    fn filter() -> LightweightFilter {
        LightweightFilter::new(FilterConfig::default())
    }

    #[test]
    fn accepts_a_plain_straightline_program() {
        let t = tc(vec![addi(1, 0, 1), addi(2, 1, 2), addi(3, 2, 3), TERMINATOR]);
        assert!(filter().is_valid(&t));
    }

    #[test]
    fn verdict_is_deterministic() {
        let t = tc(vec![addi(1, 0, 1), addi(2, 1, 2), addi(3, 2, 3)]);
        let f = filter();
        let first = f.is_valid(&t);
        for _ in 0..10 {
            assert_eq!(f.is_valid(&t), first);
        }
    }

    #[test]
    fn rejects_oversized_programs() {
        let mut words = vec![addi(1, 0, 1); 201];
        words.push(TERMINATOR);
        assert_eq!(
            filter().check(&tc(words)),
            Err(RejectReason::TooManyInstructions)
        );
    }

    #[test]
    fn rejects_too_many_loop_markers() {
        let words = vec![
            addi(1, 0, 1),
            beq(1, 2, -4),
            addi(2, 0, 1),
            beq(1, 2, -8),
            addi(3, 0, 1),
            beq(1, 2, -12),
            addi(4, 0, 1),
            beq(1, 2, -16),
        ];
        assert_eq!(
            filter().check(&tc(words)),
            Err(RejectReason::TooManyLoopMarkers)
        );
    }

    #[test]
    fn rejects_self_jump() {
        let words = vec![addi(1, 0, 1), beq(0, 0, 0), addi(2, 0, 1), addi(3, 0, 1)];
        assert_eq!(
            filter().check(&tc(words)),
            Err(RejectReason::Banned(BannedPattern::SelfJump))
        );
    }

    #[test]
    fn rejects_adjacent_loop_markers() {
        let words = vec![addi(1, 0, 1), addi(2, 0, 1), beq(1, 2, -4), beq(1, 2, -8)];
        assert_eq!(
            filter().check(&tc(words)),
            Err(RejectReason::Banned(BannedPattern::AdjacentLoopMarkers))
        );
    }

    #[test]
    fn rejects_too_short_programs() {
        // Terminator and undecodable words do not count toward the minimum.
        let words = vec![addi(1, 0, 1), 0xffff_ffff, TERMINATOR];
        assert_eq!(
            filter().check(&tc(words)),
            Err(RejectReason::TooFewInstructions)
        );
    }

    #[test]
    fn disabled_patterns_are_not_enforced() {
        let config = FilterConfig {
            banned: vec![],
            ..FilterConfig::default()
        };
        let words = vec![addi(1, 0, 1), beq(0, 0, 0), addi(2, 0, 1), addi(3, 0, 1)];
        assert!(LightweightFilter::new(config).is_valid(&tc(words)));
    }

    #[test]
    fn batch_preserves_order_and_counts() {
        let good_a = tc(vec![addi(1, 0, 1), addi(2, 0, 2), addi(3, 0, 3)]);
        let bad = tc(vec![addi(1, 0, 1)]);
        let good_b = tc(vec![addi(4, 0, 4), addi(5, 0, 5), addi(6, 0, 6)]);
        let ids = [good_a.id().to_string(), good_b.id().to_string()];
        let (passed, stats) = filter().filter_batch(vec![good_a, bad, good_b]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.too_short, 1);
        let passed_ids: Vec<_> = passed.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(passed_ids, ids);
    }
}
