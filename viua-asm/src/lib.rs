//! Atomic types of the Viua VM: opcodes, instruction formats, and the
//! encode/decode routines that every instruction in the system flows through.
//!
//! An instruction is a single 64-bit encoding unit. The low 16 bits carry the
//! opcode (with the top bit reserved for the greedy-bundle flag), and the
//! remaining 48 bits carry operands laid out according to the format embedded
//! in the opcode itself.

#![warn(missing_docs)]

mod instruction;
mod li;
mod opcode;
pub mod ops;
mod pack;
mod registers;
mod unpack;

#[cfg(test)]
mod encoding_tests;

pub use instruction::{Instruction, D, E, F, M, N, R, S, T};
pub use li::{
    load_immediate, load_immediate_instructions, to_loading_parts,
    LoadingParts,
};
pub use opcode::{Format, Opcode};
pub use registers::{Access, RegisterSet};

/// A raw, unparsed instruction word.
pub type RawInstruction = u64;

/// The numeric type opcodes are encoded with.
pub type OpcodeRepr = u16;

/// Mask selecting the opcode out of an instruction word's low half,
/// dropping the greedy flag.
pub const OPCODE_MASK: OpcodeRepr = 0x7fff;

/// The greedy flag. An instruction with this bit set must not be separated
/// from its successor by scheduler preemption.
pub const GREEDY: OpcodeRepr = 0x8000;

/// Mask selecting the format field (bits 4..11) out of an opcode.
pub const FORMAT_MASK: OpcodeRepr = 0x0ff0;

/// Size of a single encoding unit, in bytes.
pub const INSTRUCTION_SIZE: usize = core::mem::size_of::<RawInstruction>();

/// RECEIVE timeout immediate meaning "wait forever".
pub const RECEIVE_TIMEOUT_INFINITY: u32 = 0x00ff_ffff;

/// Failure modes of instruction decoding.
///
/// Any of these is fatal at decode time: a malformed word cannot be executed
/// and there is no in-band way to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// The low half of the word does not name a known opcode.
    #[error("invalid opcode: {0:#06x}")]
    InvalidOpcode(OpcodeRepr),
    /// A register reference selects a register set that does not exist.
    #[error("invalid register set in access: {0:#06x}")]
    InvalidRegisterSet(u16),
    /// A register reference is structurally valid but illegal, e.g. a void
    /// access with a non-zero index.
    #[error("illegal register access: {0:#06x}")]
    IllegalRegisterAccess(u16),
}

/// Does the raw word have the greedy flag set?
pub const fn is_greedy(raw: RawInstruction) -> bool {
    (raw as OpcodeRepr) & GREEDY != 0
}

/// The opcode portion of a raw word, with the greedy flag stripped.
pub const fn opcode_of(raw: RawInstruction) -> OpcodeRepr {
    (raw as OpcodeRepr) & OPCODE_MASK
}
