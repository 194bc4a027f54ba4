//! Arithmetic, bit, comparison, and logic handlers.
//!
//! All of these dispatch on the type of the left-hand operand: the right
//! operand is cast to that type, and the result keeps the tag. Plain
//! operations wrap on overflow.

use viua_asm::{Opcode, R, T};

use super::registers::{fetch, save};
use crate::{
    error::Fault,
    process::{Pointer, Process},
    value::Value,
};

/// Pointer plus unsigned byte offset: derives a narrower pointer and
/// records its metadata. An offset reaching the end of the region is out
/// of bounds.
fn derive_pointer(
    proc: &mut Process,
    base: u64,
    offset: u64,
) -> Result<Value, Fault> {
    let info = proc.pointer_at(base)?;
    if offset >= info.size {
        return Err(Fault::Bounds {
            offset,
            size: info.size,
        });
    }
    let address = base
        .checked_add(offset)
        .ok_or(Fault::ArithmeticOverflow)?;
    proc.record_pointer(Pointer {
        address,
        size: info.size - offset,
        parent: info.address,
    });
    Ok(Value::Pointer(address))
}

fn int_arithmetic(op: Opcode, a: i64, b: i64) -> Result<i64, Fault> {
    Ok(match op {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Div => {
            if b == 0 {
                return Err(Fault::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        Opcode::Mod => {
            if b == 0 {
                return Err(Fault::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        _ => return Err(Fault::Type(op)),
    })
}

fn uint_arithmetic(op: Opcode, a: u64, b: u64) -> Result<u64, Fault> {
    Ok(match op {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Div => {
            if b == 0 {
                return Err(Fault::DivisionByZero);
            }
            a / b
        }
        Opcode::Mod => {
            if b == 0 {
                return Err(Fault::DivisionByZero);
            }
            a % b
        }
        _ => return Err(Fault::Type(op)),
    })
}

fn float_arithmetic<V>(op: Opcode, a: V, b: V) -> Result<V, Fault>
where
    V: core::ops::Add<Output = V>
        + core::ops::Sub<Output = V>
        + core::ops::Mul<Output = V>
        + core::ops::Div<Output = V>,
{
    Ok(match op {
        Opcode::Add => a + b,
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        _ => return Err(Fault::Type(op)),
    })
}

pub(super) fn arithmetic(proc: &mut Process, i: T) -> Result<(), Fault> {
    let lhs = fetch(proc, i.lhs)?;
    let rhs = fetch(proc, i.rhs)?;
    let mistyped = Fault::Type(i.opcode);

    let value = match lhs {
        Value::Int(a) => Value::Int(int_arithmetic(
            i.opcode,
            a,
            rhs.cast_to_i64().ok_or(mistyped)?,
        )?),
        Value::Uint(a) => Value::Uint(uint_arithmetic(
            i.opcode,
            a,
            rhs.cast_to_u64().ok_or(mistyped)?,
        )?),
        Value::Float(a) => Value::Float(float_arithmetic(
            i.opcode,
            a,
            rhs.cast_to_f32().ok_or(mistyped)?,
        )?),
        Value::Double(a) => Value::Double(float_arithmetic(
            i.opcode,
            a,
            rhs.cast_to_f64().ok_or(mistyped)?,
        )?),
        Value::Pointer(base) if i.opcode == Opcode::Add => {
            let offset = rhs.cast_to_u64().ok_or(mistyped)?;
            derive_pointer(proc, base, offset)?
        }
        _ => return Err(mistyped),
    };

    save(proc, i.out, value)
}

pub(super) fn bits(proc: &mut Process, i: T) -> Result<(), Fault> {
    let lhs = fetch(proc, i.lhs)?;
    let rhs = fetch(proc, i.rhs)?;
    let mistyped = Fault::Type(i.opcode);

    // Bit operations act on the 64-bit register view; the tag of the left
    // operand is preserved.
    let (raw, signed) = match lhs {
        Value::Int(a) => (a as u64, true),
        Value::Uint(a) => (a, false),
        _ => return Err(mistyped),
    };
    let amount = rhs.cast_to_u64().ok_or(mistyped)?;

    let result = match i.opcode {
        Opcode::Bitshl => {
            if amount >= 64 {
                0
            } else {
                raw << amount
            }
        }
        Opcode::Bitshr => {
            if amount >= 64 {
                0
            } else {
                raw >> amount
            }
        }
        Opcode::Bitashr => {
            let shift = amount.min(63);
            ((raw as i64) >> shift) as u64
        }
        Opcode::Bitrol => raw.rotate_left((amount % 64) as u32),
        Opcode::Bitror => raw.rotate_right((amount % 64) as u32),
        Opcode::Bitand => raw & amount,
        Opcode::Bitor => raw | amount,
        Opcode::Bitxor => raw ^ amount,
        _ => return Err(mistyped),
    };

    let value = if signed {
        Value::Int(result as i64)
    } else {
        Value::Uint(result)
    };
    save(proc, i.out, value)
}

fn ordering_of(lhs: Value, rhs: Value, op: Opcode) -> Result<core::cmp::Ordering, Fault> {
    use core::cmp::Ordering;
    let mistyped = Fault::Type(op);
    Ok(match lhs {
        Value::Int(a) => a.cmp(&rhs.cast_to_i64().ok_or(mistyped)?),
        Value::Uint(a) => a.cmp(&rhs.cast_to_u64().ok_or(mistyped)?),
        Value::Float(a) => a
            .partial_cmp(&rhs.cast_to_f32().ok_or(mistyped)?)
            .unwrap_or(Ordering::Less),
        Value::Double(a) => a
            .partial_cmp(&rhs.cast_to_f64().ok_or(mistyped)?)
            .unwrap_or(Ordering::Less),
        _ => return Err(mistyped),
    })
}

pub(super) fn comparison(proc: &mut Process, i: T) -> Result<(), Fault> {
    use core::cmp::Ordering;

    let lhs = fetch(proc, i.lhs)?;
    let rhs = fetch(proc, i.rhs)?;
    let mistyped = Fault::Type(i.opcode);

    // Atoms, pids, and pointers admit equality but have no order.
    let equality_only = match (lhs, rhs) {
        (Value::Atom(a), Value::Atom(b)) => Some(a == b),
        (Value::Pid(a), Value::Pid(b)) => Some(a == b),
        (Value::Pointer(a), Value::Pointer(b)) => Some(a == b),
        _ => None,
    };

    let value = match (i.opcode, equality_only) {
        (Opcode::Eq, Some(equal)) => Value::Uint(equal as u64),
        (_, Some(_)) => return Err(mistyped),
        (Opcode::Eq, None) => {
            Value::Uint((ordering_of(lhs, rhs, i.opcode)? == Ordering::Equal) as u64)
        }
        (Opcode::Lt, None) => {
            Value::Uint((ordering_of(lhs, rhs, i.opcode)? == Ordering::Less) as u64)
        }
        (Opcode::Gt, None) => {
            Value::Uint((ordering_of(lhs, rhs, i.opcode)? == Ordering::Greater) as u64)
        }
        (Opcode::Cmp, None) => Value::Int(match ordering_of(lhs, rhs, i.opcode)? {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }),
        _ => return Err(mistyped),
    };

    save(proc, i.out, value)
}

pub(super) fn logic(proc: &mut Process, i: T) -> Result<(), Fault> {
    let lhs = fetch(proc, i.lhs)?;
    let rhs = fetch(proc, i.rhs)?;
    let mistyped = Fault::Type(i.opcode);

    let a = lhs.cast_to_bool().ok_or(mistyped)?;
    let b = rhs.cast_to_bool().ok_or(mistyped)?;
    let result = match i.opcode {
        Opcode::And => a && b,
        Opcode::Or => a || b,
        _ => return Err(mistyped),
    };

    save(proc, i.out, Value::Uint(result as u64))
}

pub(super) fn not(proc: &mut Process, i: viua_asm::D) -> Result<(), Fault> {
    let input = fetch(proc, i.input)?;
    let value = input.cast_to_bool().ok_or(Fault::Type(i.opcode))?;
    save(proc, i.out, Value::Uint(!value as u64))
}

pub(super) fn bitnot(proc: &mut Process, i: viua_asm::D) -> Result<(), Fault> {
    let value = match fetch(proc, i.input)? {
        Value::Int(a) => Value::Int(!a),
        Value::Uint(a) => Value::Uint(!a),
        _ => return Err(Fault::Type(i.opcode)),
    };
    save(proc, i.out, value)
}

fn sign_extend_24(immediate: u32) -> i64 {
    (((immediate << 8) as i32) >> 8) as i64
}

pub(super) fn arithmetic_immediate(proc: &mut Process, i: R) -> Result<(), Fault> {
    let signed = matches!(
        i.opcode,
        Opcode::Addi | Opcode::Subi | Opcode::Muli | Opcode::Divi
    );
    let base = match i.opcode {
        Opcode::Addi | Opcode::Addiu => Opcode::Add,
        Opcode::Subi | Opcode::Subiu => Opcode::Sub,
        Opcode::Muli | Opcode::Muliu => Opcode::Mul,
        Opcode::Divi | Opcode::Diviu => Opcode::Div,
        other => return Err(Fault::Type(other)),
    };
    let mistyped = Fault::Type(i.opcode);

    let imm_i = sign_extend_24(i.immediate);
    let imm_u = i.immediate as u64;

    let value = match fetch(proc, i.input)? {
        // A void input reads as zero, in the signedness of the opcode.
        Value::Void => {
            if signed {
                Value::Int(int_arithmetic(base, 0, imm_i)?)
            } else {
                Value::Uint(uint_arithmetic(base, 0, imm_u)?)
            }
        }
        Value::Int(a) => {
            let b = if signed { imm_i } else { imm_u as i64 };
            Value::Int(int_arithmetic(base, a, b)?)
        }
        Value::Uint(a) => {
            let b = if signed { imm_i as u64 } else { imm_u };
            Value::Uint(uint_arithmetic(base, a, b)?)
        }
        Value::Float(a) => {
            let b = if signed { imm_i as f32 } else { imm_u as f32 };
            Value::Float(float_arithmetic(base, a, b)?)
        }
        Value::Double(a) => {
            let b = if signed { imm_i as f64 } else { imm_u as f64 };
            Value::Double(float_arithmetic(base, a, b)?)
        }
        Value::Pointer(addr)
            if !signed && matches!(base, Opcode::Add) =>
        {
            derive_pointer(proc, addr, imm_u)?
        }
        _ => return Err(mistyped),
    };

    save(proc, i.out, value)
}

pub(super) fn lui(proc: &mut Process, i: viua_asm::E) -> Result<(), Fault> {
    save(proc, i.out, Value::Int((i.immediate << 28) as i64))
}

pub(super) fn luiu(proc: &mut Process, i: viua_asm::E) -> Result<(), Fault> {
    save(proc, i.out, Value::Uint(i.immediate << 28))
}

pub(super) fn float(proc: &mut Process, i: viua_asm::F) -> Result<(), Fault> {
    save(proc, i.out, Value::Float(f32::from_bits(i.immediate)))
}
