//! Memory instructions: stack-region allocation, loads, and stores.
//!
//! All accesses go through the pointer map. A pointer that does not appear
//! in the map is invalid, and every offset is checked against the region's
//! recorded size before the arena is touched.

use viua_asm::{Opcode, M};

use super::registers::{fetch, save, take};
use crate::{
    error::Fault,
    process::{Pointer, Process, MEM_BASE},
    value::Value,
};

/// Largest single transfer: one register's worth of bytes.
const MAX_UNIT_SPEC: u8 = 3;

fn checked_region(
    proc: &Process,
    i: M,
    verb: Opcode,
) -> Result<(u64, usize), Fault> {
    if i.spec > MAX_UNIT_SPEC {
        return Err(Fault::Type(verb));
    }
    let unit = 1u64 << i.spec;
    let offset = i.immediate as u64 * unit;

    let base = match fetch(proc, i.input)? {
        Value::Pointer(address) => address,
        _ => return Err(Fault::Type(verb)),
    };
    let info = proc.pointer_at(base)?;
    if offset >= info.size {
        return Err(Fault::Bounds {
            offset,
            size: info.size,
        });
    }
    if offset + unit > info.size {
        return Err(Fault::Bounds {
            offset: offset + unit,
            size: info.size,
        });
    }

    Ok((base + offset, unit as usize))
}

pub(super) fn sm(proc: &mut Process, i: M) -> Result<(), Fault> {
    let (address, unit) = checked_region(proc, i, Opcode::Sm)?;
    let value = fetch(proc, i.out)?;
    if value.is_void() {
        return Err(Fault::VoidAccess);
    }
    let raw = value.as_memory();
    proc.memory_at_mut(address, unit)?.copy_from_slice(&raw[..unit]);
    Ok(())
}

pub(super) fn lm(proc: &mut Process, i: M) -> Result<(), Fault> {
    let (address, unit) = checked_region(proc, i, Opcode::Lm)?;
    let mut raw = [0u8; 8];
    raw[..unit].copy_from_slice(proc.memory_at(address, unit)?);
    save(proc, i.out, Value::Undefined(raw))
}

/// Allocate `immediate * (1 << spec)` bytes of scratch memory at the stack
/// break and hand back a pointer to the fresh region.
pub(super) fn aa(proc: &mut Process, i: M) -> Result<(), Fault> {
    let unit = 1u64 << i.spec.min(63);
    let size = i.immediate as u64 * unit;
    if size == 0 {
        return Err(Fault::Type(Opcode::Aa));
    }
    let address = proc.allocate(size);
    proc.record_pointer(Pointer {
        address,
        size,
        parent: address,
    });
    save(proc, i.out, Value::Pointer(address))
}

/// Drop a region. Deallocating the topmost allocation also returns its
/// bytes to the stack break.
pub(super) fn ad(proc: &mut Process, i: M) -> Result<(), Fault> {
    let address = match take(proc, i.input)? {
        Value::Pointer(address) => address,
        _ => return Err(Fault::Type(Opcode::Ad)),
    };
    let info = proc.pointer_at(address)?;
    if info.parent != info.address {
        return Err(Fault::Type(Opcode::Ad));
    }
    proc.pointers.remove(&address);
    if address + info.size == MEM_BASE + proc.stack_break {
        proc.stack_break -= info.size;
        proc.prune_pointers();
    }
    Ok(())
}

/// Re-derive a pointer, failing if its region is gone.
pub(super) fn ptr(proc: &mut Process, i: M) -> Result<(), Fault> {
    let address = match fetch(proc, i.input)? {
        Value::Pointer(address) => address,
        _ => return Err(Fault::Type(Opcode::Ptr)),
    };
    proc.pointer_at(address)?;
    save(proc, i.out, Value::Pointer(address))
}
