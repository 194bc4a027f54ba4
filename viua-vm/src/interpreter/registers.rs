//! Resolution of register accesses against a process.

use viua_asm::{Access, RegisterSet};

use crate::{error::Fault, frame::Frame, process::Process, value::Value};

fn slot_of<'a>(
    registers: &'a mut Vec<Value>,
    index: u8,
) -> Result<&'a mut Value, Fault> {
    registers
        .get_mut(index as usize)
        .ok_or(Fault::RegisterOutOfRange(index))
}

/// Read the value a register access names. A void access yields the empty
/// sentinel; whether that is an error is up to the instruction.
pub(crate) fn fetch(proc: &Process, access: Access) -> Result<Value, Fault> {
    if !access.direct {
        return Err(Fault::UnsupportedAccess);
    }
    let frame = proc.stack.top().ok_or(Fault::UnsupportedAccess)?;
    let cell = |registers: &Vec<Value>| {
        registers
            .get(access.index as usize)
            .copied()
            .ok_or(Fault::RegisterOutOfRange(access.index))
    };
    match access.set {
        RegisterSet::Void => Ok(Value::Void),
        RegisterSet::Local => cell(&frame.registers),
        RegisterSet::Parameter => cell(&frame.parameters),
        RegisterSet::Argument => cell(&proc.stack.args),
        _ => Err(Fault::UnsupportedAccess),
    }
}

/// Write a value into the register an access names. Writes to void are
/// silently discarded.
pub(crate) fn save(
    proc: &mut Process,
    access: Access,
    value: Value,
) -> Result<(), Fault> {
    if !access.direct {
        return Err(Fault::UnsupportedAccess);
    }
    match access.set {
        RegisterSet::Void => Ok(()),
        RegisterSet::Local => {
            let frame =
                proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
            *slot_of(&mut frame.registers, access.index)? = value;
            Ok(())
        }
        RegisterSet::Parameter => {
            let frame =
                proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
            *slot_of(&mut frame.parameters, access.index)? = value;
            Ok(())
        }
        RegisterSet::Argument => {
            *slot_of(&mut proc.stack.args, access.index)? = value;
            Ok(())
        }
        _ => Err(Fault::UnsupportedAccess),
    }
}

/// Read a register and erase it, as `move` and operand-consuming
/// instructions do. Taking from void yields the empty sentinel.
pub(crate) fn take(proc: &mut Process, access: Access) -> Result<Value, Fault> {
    let value = fetch(proc, access)?;
    if !access.is_void() {
        save(proc, access, Value::Void)?;
    }
    Ok(value)
}

/// Read a register of an already-popped frame. Only the frame's own sets
/// are addressable here; this is how `return` fetches the value to hand
/// back to the caller.
pub(crate) fn fetch_in_frame(
    frame: &Frame,
    access: Access,
) -> Result<Value, Fault> {
    if !access.direct {
        return Err(Fault::UnsupportedAccess);
    }
    let cell = |registers: &Vec<Value>| {
        registers
            .get(access.index as usize)
            .copied()
            .ok_or(Fault::RegisterOutOfRange(access.index))
    };
    match access.set {
        RegisterSet::Void => Ok(Value::Void),
        RegisterSet::Local => cell(&frame.registers),
        RegisterSet::Parameter => cell(&frame.parameters),
        _ => Err(Fault::UnsupportedAccess),
    }
}
