//! Register data movement and constructors reading the string table.

use viua_asm::{Opcode, D, S};

use super::registers::{fetch, save, take};
use crate::{error::Fault, process::Process, value::Value};

pub(super) fn copy(proc: &mut Process, i: D) -> Result<(), Fault> {
    let value = fetch(proc, i.input)?;
    save(proc, i.out, value)
}

pub(super) fn mov(proc: &mut Process, i: D) -> Result<(), Fault> {
    let value = take(proc, i.input)?;
    if value.is_void() {
        return Err(Fault::VoidAccess);
    }
    save(proc, i.out, value)
}

pub(super) fn swap(proc: &mut Process, i: D) -> Result<(), Fault> {
    let a = fetch(proc, i.out)?;
    let b = fetch(proc, i.input)?;
    save(proc, i.out, b)?;
    save(proc, i.input, a)
}

pub(super) fn delete(proc: &mut Process, i: S) -> Result<(), Fault> {
    save(proc, i.out, Value::Void)
}

/// The register already holds a strtab offset; replace it with the datum
/// those bytes spell, interned as an atom.
pub(super) fn atom(proc: &mut Process, i: S) -> Result<(), Fault> {
    let offset = fetch(proc, i.out)?
        .cast_to_u64()
        .ok_or(Fault::Type(Opcode::Atom))?;
    let text = {
        let data = proc.module.strtab.at(offset)?;
        core::str::from_utf8(data)
            .map_err(|_| Fault::Type(Opcode::Atom))?
            .to_owned()
    };
    let key = proc.intern(&text);
    save(proc, i.out, Value::Atom(key))
}

/// The register holds a strtab offset of an 8-byte little-endian payload;
/// replace it with the double those bytes encode.
pub(super) fn double(proc: &mut Process, i: S) -> Result<(), Fault> {
    let offset = fetch(proc, i.out)?
        .cast_to_u64()
        .ok_or(Fault::Type(Opcode::Double))?;
    let data = proc.module.strtab.at(offset)?;
    let raw: [u8; 8] = data
        .try_into()
        .map_err(|_| Fault::Type(Opcode::Double))?;
    save(proc, i.out, Value::Double(f64::from_bits(u64::from_le_bytes(raw))))
}
