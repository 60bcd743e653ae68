// SPDX-License-Identifier: Apache-2.0

//! ISA-aware binary mutation of instruction sequences.
//!
//! Offspring are produced by applying exactly one operator to one
//! randomly-selected word of the seed, then re-validating the whole
//! candidate. The random source is an explicit parameter so a given RNG
//! state reproduces the exact offspring set.

use std::collections::BTreeMap;

use rand::Rng;

use crate::filter::LightweightFilter;
use crate::rv32::{self, CodecError, Decoded, Format};
use crate::testcase::{Origin, Testcase};

/// The closed set of mutation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MutationKind {
    Opcode,
    Immediate,
    Register,
}

/// Outcome counts for one [`MutationEngine::mutate`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MutationStats {
    pub attempts: usize,
    pub accepted: usize,
    pub rejected_codec: usize,
    pub rejected_filter: usize,
    pub accepted_by_kind: BTreeMap<MutationKind, usize>,
}

impl MutationStats {
    /// Merges `other` into `self` (for multi-seed generations).
    pub fn merge_from(&mut self, other: &MutationStats) {
        self.attempts += other.attempts;
        self.accepted += other.accepted;
        self.rejected_codec += other.rejected_codec;
        self.rejected_filter += other.rejected_filter;
        for (k, v) in &other.accepted_by_kind {
            *self.accepted_by_kind.entry(*k).or_insert(0) += v;
        }
    }
}

/// Offspring plus outcome counts.
#[derive(Debug, Clone)]
pub struct MutationBatch {
    pub offspring: Vec<Testcase>,
    pub stats: MutationStats,
}

pub struct MutationEngine {
    filter: LightweightFilter,
}

impl MutationEngine {
    pub fn new(filter: LightweightFilter) -> Self {
        Self { filter }
    }

    /// Produces at most `count` offspring from `seed`. Each of the `count`
    /// attempts picks one non-terminator word uniformly at random, applies
    /// one operator chosen uniformly from [`MutationKind`], and keeps the
    /// candidate only if the mutated word still decodes and the whole
    /// program passes the filter.
    pub fn mutate<R: Rng>(&self, seed: &Testcase, count: usize, rng: &mut R) -> MutationBatch {
        let mut stats = MutationStats::default();
        let mut offspring = Vec::with_capacity(count);

        let eligible: Vec<usize> = seed
            .words()
            .iter()
            .enumerate()
            .filter(|&(_, &w)| !rv32::is_terminator(w))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            log::debug!("seed {} has no mutable words", seed.id());
            return MutationBatch { offspring, stats };
        }

        for _ in 0..count {
            stats.attempts += 1;
            let idx = eligible[rng.gen_range(0..eligible.len())];
            let kind = match rng.gen_range(0..3u32) {
                0 => MutationKind::Opcode,
                1 => MutationKind::Immediate,
                _ => MutationKind::Register,
            };

            let mut words = seed.words().to_vec();
            let mutated = match kind {
                MutationKind::Opcode => mutate_opcode(words[idx], rng),
                MutationKind::Immediate => mutate_immediate(words[idx], rng),
                MutationKind::Register => mutate_register(words[idx], rng),
            };
            let word = match mutated {
                Ok(w) => w,
                Err(_) => {
                    stats.rejected_codec += 1;
                    continue;
                }
            };
            // Opcode flips can leave the closed format set; such candidates
            // are codec rejects, not filter rejects.
            if rv32::decode(word).is_err() {
                stats.rejected_codec += 1;
                continue;
            }
            words[idx] = word;

            let candidate = Testcase::new(words, Origin::MutationBinary);
            if !self.filter.is_valid(&candidate) {
                stats.rejected_filter += 1;
                continue;
            }
            stats.accepted += 1;
            *stats.accepted_by_kind.entry(kind).or_insert(0) += 1;
            offspring.push(candidate);
        }

        log::debug!(
            "mutate {}: {} accepted, {} codec rejects, {} filter rejects",
            seed.id(),
            stats.accepted,
            stats.rejected_codec,
            stats.rejected_filter
        );
        MutationBatch { offspring, stats }
    }
}

/// Flips 1-2 bits in the opcode field, plus one bit each in funct3/funct7
/// when those fields are non-zero for the word's format class.
fn mutate_opcode<R: Rng>(word: u32, rng: &mut R) -> Result<u32, CodecError> {
    let decoded = rv32::decode(word)?;
    let mut out = word;
    let flips = rng.gen_range(1..=2);
    for _ in 0..flips {
        out ^= 1 << rng.gen_range(0..7);
    }
    if (word >> 12) & 0x7 != 0 {
        out ^= 1 << (12 + rng.gen_range(0..3));
    }
    if let Decoded::RegReg { funct7, .. } = decoded {
        if funct7 != 0 {
            out ^= 1 << (25 + rng.gen_range(0..7));
        }
    }
    Ok(out)
}

/// Scales the signed immediate by a factor from {-2, -1, 1, 2} and clamps
/// it into the format's valid range. Words without an immediate field pass
/// through unchanged.
fn mutate_immediate<R: Rng>(word: u32, rng: &mut R) -> Result<u32, CodecError> {
    const FACTORS: [i32; 4] = [-2, -1, 1, 2];
    let decoded = rv32::decode(word)?;
    let factor = FACTORS[rng.gen_range(0..FACTORS.len())];
    let scale = |imm: i32, format: Format| -> i32 {
        let (lo, hi) = format.imm_range().unwrap_or((i32::MIN, i32::MAX));
        imm.saturating_mul(factor).clamp(lo, hi)
    };
    let next = match decoded {
        Decoded::RegReg { .. } => return Ok(word),
        Decoded::RegImm {
            opcode,
            funct3,
            rd,
            rs1,
            imm,
        } => Decoded::RegImm {
            opcode,
            funct3,
            rd,
            rs1,
            imm: scale(imm, Format::RegImm),
        },
        Decoded::Store {
            opcode,
            funct3,
            rs1,
            rs2,
            imm,
        } => Decoded::Store {
            opcode,
            funct3,
            rs1,
            rs2,
            imm: scale(imm, Format::Store),
        },
        Decoded::Branch {
            opcode,
            funct3,
            rs1,
            rs2,
            imm,
        } => Decoded::Branch {
            opcode,
            funct3,
            rs1,
            rs2,
            // Branch offsets stay even: the factors preserve parity and the
            // range endpoints are even.
            imm: scale(imm, Format::Branch),
        },
    };
    Ok(rv32::encode(&next))
}

/// Replaces source registers with uniformly random indices and the
/// destination register, where the format has one, with a uniformly random
/// non-zero index. x0 is never a write target.
fn mutate_register<R: Rng>(word: u32, rng: &mut R) -> Result<u32, CodecError> {
    let decoded = rv32::decode(word)?;
    let next = match decoded {
        Decoded::RegReg {
            opcode, funct3, funct7, ..
        } => Decoded::RegReg {
            opcode,
            funct3,
            funct7,
            rd: rng.gen_range(1..32),
            rs1: rng.gen_range(0..32),
            rs2: rng.gen_range(0..32),
        },
        Decoded::RegImm {
            opcode, funct3, imm, ..
        } => Decoded::RegImm {
            opcode,
            funct3,
            rd: rng.gen_range(1..32),
            rs1: rng.gen_range(0..32),
            imm,
        },
        Decoded::Store {
            opcode, funct3, imm, ..
        } => Decoded::Store {
            opcode,
            funct3,
            rs1: rng.gen_range(0..32),
            rs2: rng.gen_range(0..32),
            imm,
        },
        Decoded::Branch {
            opcode, funct3, imm, ..
        } => Decoded::Branch {
            opcode,
            funct3,
            rs1: rng.gen_range(0..32),
            rs2: rng.gen_range(0..32),
            imm,
        },
    };
    Ok(rv32::encode(&next))
}
