// SPDX-License-Identifier: Apache-2.0

//! Fixed-width RV32 instruction codec.
//!
//! Decodes 32-bit instruction words into typed fields for the closed set of
//! format classes the mutation engine understands, and encodes them back.
//! `encode(decode(w)) == w` for every word whose opcode is in the closed set.

use std::fmt;

/// The protected program terminator (`ebreak`). Mutation operators must
/// never select or alter this encoding.
pub const TERMINATOR: u32 = 0x0010_0073;

pub const OPCODE_OP: u32 = 0x33;
pub const OPCODE_OP_IMM: u32 = 0x13;
pub const OPCODE_LOAD: u32 = 0x03;
pub const OPCODE_JALR: u32 = 0x67;
pub const OPCODE_STORE: u32 = 0x23;
pub const OPCODE_BRANCH: u32 = 0x63;

/// Format classes the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    RegReg,
    RegImm,
    Store,
    Branch,
}

impl Format {
    /// Valid signed range of the immediate field, `None` for formats
    /// without an immediate. The branch range excludes odd offsets; bit 0
    /// of a branch immediate is implicitly zero.
    pub fn imm_range(self) -> Option<(i32, i32)> {
        match self {
            Format::RegReg => None,
            Format::RegImm | Format::Store => Some((-2048, 2047)),
            Format::Branch => Some((-4096, 4094)),
        }
    }
}

/// Returns the format class for an opcode, `None` when the opcode is
/// outside the closed set.
pub fn format_for_opcode(opcode: u32) -> Option<Format> {
    match opcode {
        OPCODE_OP => Some(Format::RegReg),
        OPCODE_OP_IMM | OPCODE_LOAD | OPCODE_JALR => Some(Format::RegImm),
        OPCODE_STORE => Some(Format::Store),
        OPCODE_BRANCH => Some(Format::Branch),
        _ => None,
    }
}

/// A decoded instruction word. Fields that are not meaningful for a format
/// class do not exist on its variant; operators must match on the variant
/// before touching a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    RegReg {
        opcode: u32,
        funct3: u32,
        funct7: u32,
        rd: u32,
        rs1: u32,
        rs2: u32,
    },
    RegImm {
        opcode: u32,
        funct3: u32,
        rd: u32,
        rs1: u32,
        imm: i32,
    },
    Store {
        opcode: u32,
        funct3: u32,
        rs1: u32,
        rs2: u32,
        imm: i32,
    },
    Branch {
        opcode: u32,
        funct3: u32,
        rs1: u32,
        rs2: u32,
        imm: i32,
    },
}

impl Decoded {
    pub fn format(&self) -> Format {
        match self {
            Decoded::RegReg { .. } => Format::RegReg,
            Decoded::RegImm { .. } => Format::RegImm,
            Decoded::Store { .. } => Format::Store,
            Decoded::Branch { .. } => Format::Branch,
        }
    }
}

/// Malformed or unsupported instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    UnsupportedOpcode { word: u32, opcode: u32 },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnsupportedOpcode { word, opcode } => write!(
                f,
                "word {word:#010x} has opcode {opcode:#04x} outside the supported format classes"
            ),
        }
    }
}

impl std::error::Error for CodecError {}

pub fn is_terminator(word: u32) -> bool {
    word == TERMINATOR
}

/// Decodes a 32-bit instruction word into typed fields.
pub fn decode(word: u32) -> Result<Decoded, CodecError> {
    let opcode = word & 0x7f;
    let format =
        format_for_opcode(opcode).ok_or(CodecError::UnsupportedOpcode { word, opcode })?;
    let funct3 = (word >> 12) & 0x7;
    let rd = (word >> 7) & 0x1f;
    let rs1 = (word >> 15) & 0x1f;
    let rs2 = (word >> 20) & 0x1f;
    let funct7 = (word >> 25) & 0x7f;
    Ok(match format {
        Format::RegReg => Decoded::RegReg {
            opcode,
            funct3,
            funct7,
            rd,
            rs1,
            rs2,
        },
        Format::RegImm => Decoded::RegImm {
            opcode,
            funct3,
            rd,
            rs1,
            imm: imm_i(word),
        },
        Format::Store => Decoded::Store {
            opcode,
            funct3,
            rs1,
            rs2,
            imm: imm_s(word),
        },
        Format::Branch => Decoded::Branch {
            opcode,
            funct3,
            rs1,
            rs2,
            imm: imm_b(word),
        },
    })
}

/// Encodes decoded fields back into a 32-bit instruction word. Exact
/// inverse of [`decode`] for well-formed inputs; register fields are masked
/// to 5 bits and immediates to their format's bit layout.
pub fn encode(d: &Decoded) -> u32 {
    match *d {
        Decoded::RegReg {
            opcode,
            funct3,
            funct7,
            rd,
            rs1,
            rs2,
        } => {
            ((funct7 & 0x7f) << 25)
                | ((rs2 & 0x1f) << 20)
                | ((rs1 & 0x1f) << 15)
                | ((funct3 & 0x7) << 12)
                | ((rd & 0x1f) << 7)
                | (opcode & 0x7f)
        }
        Decoded::RegImm {
            opcode,
            funct3,
            rd,
            rs1,
            imm,
        } => {
            (((imm as u32) & 0xfff) << 20)
                | ((rs1 & 0x1f) << 15)
                | ((funct3 & 0x7) << 12)
                | ((rd & 0x1f) << 7)
                | (opcode & 0x7f)
        }
        Decoded::Store {
            opcode,
            funct3,
            rs1,
            rs2,
            imm,
        } => {
            let imm = imm as u32;
            (((imm >> 5) & 0x7f) << 25)
                | ((rs2 & 0x1f) << 20)
                | ((rs1 & 0x1f) << 15)
                | ((funct3 & 0x7) << 12)
                | ((imm & 0x1f) << 7)
                | (opcode & 0x7f)
        }
        Decoded::Branch {
            opcode,
            funct3,
            rs1,
            rs2,
            imm,
        } => {
            let imm = imm as u32;
            (((imm >> 12) & 0x1) << 31)
                | (((imm >> 5) & 0x3f) << 25)
                | ((rs2 & 0x1f) << 20)
                | ((rs1 & 0x1f) << 15)
                | ((funct3 & 0x7) << 12)
                | (((imm >> 1) & 0xf) << 8)
                | (((imm >> 11) & 0x1) << 7)
                | (opcode & 0x7f)
        }
    }
}

fn imm_i(word: u32) -> i32 {
    (word as i32) >> 20
}

fn imm_s(word: u32) -> i32 {
    let hi = (word >> 25) & 0x7f;
    let lo = (word >> 7) & 0x1f;
    (((hi << 5) | lo) as i32) << 20 >> 20
}

fn imm_b(word: u32) -> i32 {
    let b12 = (word >> 31) & 0x1;
    let b11 = (word >> 7) & 0x1;
    let b10_5 = (word >> 25) & 0x3f;
    let b4_1 = (word >> 8) & 0xf;
    let raw = (b12 << 12) | (b11 << 11) | (b10_5 << 5) | (b4_1 << 1);
    ((raw as i32) << 19) >> 19
}
