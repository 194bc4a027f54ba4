//! Decomposition of 64-bit constants into loadable parts.
//!
//! No format carries a 64-bit immediate, so the assembler materialises wide
//! constants with a short sequence of LUI and ADDI-family instructions. This
//! is the sole path by which 64-bit constants enter registers.

use crate::{
    instruction::{Instruction, E, R, T},
    ops,
    registers::Access,
    Opcode, RawInstruction,
};

const LOW_24: u64 = 0x0000_0000_00ff_ffff;
const HIGH_36: u64 = 0xffff_ffff_f000_0000;

/// How to materialise a 64-bit value without an immediate wider than 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadingParts {
    /// The high 36 bits, to be loaded with LUI.
    pub high: u64,
    /// Base of the low part.
    pub base: u32,
    /// Multiplier applied to the base; zero when the low part fits in an
    /// ADDI immediate directly.
    pub multiplier: u32,
    /// Remainder added after multiplication.
    pub remainder: u32,
}

/// Split a value into LUI/ADDI-loadable parts.
///
/// If the low 28 bits fit in 24, two instructions suffice. Otherwise the low
/// part is decomposed as `base * multiplier + remainder` with a fixed
/// multiplier of 16, which keeps every immediate within 24 bits.
pub fn to_loading_parts(value: u64) -> LoadingParts {
    let high = (value & HIGH_36) >> 28;
    let low = (value & !HIGH_36) as u32;

    if (low as u64 & LOW_24) == low as u64 {
        return LoadingParts {
            high,
            base: low,
            multiplier: 0,
            remainder: 0,
        };
    }

    let multiplier = 16;
    let remainder = low % multiplier;
    let base = (low - remainder) / multiplier;

    LoadingParts {
        high,
        base,
        multiplier,
        remainder,
    }
}

/// Emit the instruction sequence loading `value` into local register `out`,
/// encoded as one greedy bundle: all words but the last carry the greedy
/// flag, so the sequence is atomic with respect to preemption.
pub fn load_immediate(out: u8, value: u64, signed: bool) -> Vec<RawInstruction> {
    ops::bundle(load_immediate_instructions(out, value, signed))
}

/// The unencoded instruction sequence loading `value` into local register
/// `out`. Registers `out + 1` and `out + 2` are used as scratch when the
/// low part does not fit in a single immediate.
pub fn load_immediate_instructions(
    out: u8,
    value: u64,
    signed: bool,
) -> Vec<Instruction> {
    let parts = to_loading_parts(value);

    let (lui, addi) = if signed {
        (Opcode::Lui, Opcode::Addi)
    } else {
        (Opcode::Luiu, Opcode::Addiu)
    };

    let lui_of = |index: u8, immediate: u64| {
        Instruction::E(E {
            opcode: lui,
            out: Access::local(index),
            immediate,
        })
    };
    let addi_of = |index: u8, input: Access, immediate: u32| {
        Instruction::R(R {
            opcode: addi,
            out: Access::local(index),
            input,
            immediate,
        })
    };
    let arith_of = |opcode: Opcode, index: u8, rhs: u8| {
        Instruction::T(T {
            opcode,
            out: Access::local(index),
            lhs: Access::local(index),
            rhs: Access::local(rhs),
        })
    };

    let mut sequence = Vec::new();

    if parts.multiplier == 0 {
        // Skip the lui when none of the high bits are set; it would be pure
        // overhead.
        let input = if parts.high != 0 {
            sequence.push(lui_of(out, parts.high));
            Access::local(out)
        } else {
            Access::void()
        };
        sequence.push(addi_of(out, input, parts.base));
    } else {
        // The accumulator must start out defined even when the high part is
        // all zeroes.
        sequence.push(lui_of(out, parts.high));
        sequence.push(addi_of(out + 1, Access::void(), parts.base));
        sequence.push(addi_of(out + 2, Access::void(), parts.multiplier));
        sequence.push(arith_of(Opcode::Mul, out + 1, out + 2));
        sequence.push(addi_of(out + 2, Access::void(), parts.remainder));
        sequence.push(arith_of(Opcode::Add, out + 1, out + 2));
        sequence.push(arith_of(Opcode::Add, out, out + 1));
    }

    sequence
}
