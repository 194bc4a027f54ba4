//! Frame management, control transfer, and the unwinding routine.

use viua_asm::{
    is_greedy, opcode_of, Opcode, RegisterSet, D, E, N, R, S,
};

use super::registers::{fetch, fetch_in_frame, save, take};
use crate::{
    core::Services,
    error::Fault,
    frame::{CatchRecord, DeferredCall, Frame},
    process::Process,
    state::Step,
    value::Value,
};

pub(super) fn allocate_registers(proc: &mut Process, i: S) -> Result<(), Fault> {
    if i.out.set != RegisterSet::Local {
        return Err(Fault::UnsupportedAccess);
    }
    let count = i.out.index as usize;
    let frame = proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
    frame.registers.resize(count, Value::Void);
    Ok(())
}

pub(super) fn frame(proc: &mut Process, i: S) -> Result<(), Fault> {
    let capacity = match i.out.set {
        // The register index itself is the argument count.
        RegisterSet::Argument => i.out.index as u64,
        // A dynamic count read out of a local register.
        RegisterSet::Local => fetch(proc, i.out)?
            .cast_to_u64()
            .ok_or(Fault::Type(Opcode::Frame))?,
        _ => return Err(Fault::UnsupportedAccess),
    };
    proc.stack.args = vec![Value::Void; capacity as usize];
    Ok(())
}

fn resolve_function(proc: &mut Process, access: viua_asm::Access) -> Result<usize, Fault> {
    let offset = take(proc, access)?
        .cast_to_u64()
        .ok_or(Fault::Type(Opcode::Call))?;
    let (_, entry) = proc.module.function_at(offset)?;
    Ok(entry)
}

pub(super) fn call(proc: &mut Process, i: D) -> Result<Step, Fault> {
    let entry = resolve_function(proc, i.input)?;
    let return_ip = proc.stack.ip + 1;

    // Save the caller's memory bookkeeping into its own frame; it is
    // restored from there when the callee's frame is popped.
    {
        let caller = proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
        caller.saved_fp = proc.frame_pointer;
        caller.saved_sbrk = proc.stack_break;
    }

    let parameters = core::mem::take(&mut proc.stack.args);
    let mut frame = Frame::new(entry, Some(return_ip), parameters, i.out);

    // The callee starts with no scratch memory; an allocation inside it
    // grows the break.
    proc.frame_pointer = proc.stack_break;
    frame.saved_fp = proc.frame_pointer;
    frame.saved_sbrk = proc.stack_break;
    proc.stack.frames.push(frame);

    Ok(Step::Jump(entry))
}

pub(super) fn tailcall(
    proc: &mut Process,
    services: &mut Services,
    i: S,
) -> Result<Step, Fault> {
    let entry = resolve_function(proc, i.out)?;
    let parameters = core::mem::take(&mut proc.stack.args);

    // The replaced frame is exiting: its deferred calls run now.
    let deferred = {
        let top = proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
        core::mem::take(&mut top.deferred)
    };
    run_deferred(proc, services, deferred);

    let top = proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
    top.entry = entry;
    top.parameters = parameters;
    top.registers.clear();
    top.catches.clear();

    // Discard the replaced frame's scratch memory.
    proc.stack_break = proc.frame_pointer;
    proc.prune_pointers();

    Ok(Step::Jump(entry))
}

/// Schedule a call for when the current frame exits. The function operand
/// is resolved like a call's, and the staged arguments move in now.
pub(super) fn defer(proc: &mut Process, i: S) -> Result<(), Fault> {
    let entry = resolve_function(proc, i.out)?;
    let parameters = core::mem::take(&mut proc.stack.args);
    let frame = proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
    frame.deferred.push(DeferredCall { entry, parameters });
    Ok(())
}

// Run one deferred call to completion on the current stack. The callee gets
// an ordinary frame whose return transfers back to the saved instruction
// pointer; a fault or suspension inside it abandons that call only.
fn run_deferred_call(
    proc: &mut Process,
    services: &mut Services,
    call: DeferredCall,
) {
    let base = proc.stack.frames.len();
    let resume_ip = proc.stack.ip;
    let saved_fp = proc.frame_pointer;
    let saved_sbrk = proc.stack_break;

    if let Some(top) = proc.stack.top_mut() {
        top.saved_fp = proc.frame_pointer;
        top.saved_sbrk = proc.stack_break;
    }
    let mut frame = Frame::new(
        call.entry,
        Some(resume_ip),
        call.parameters,
        viua_asm::Access::void(),
    );
    proc.frame_pointer = proc.stack_break;
    frame.saved_fp = proc.frame_pointer;
    frame.saved_sbrk = proc.stack_break;
    proc.stack.frames.push(frame);
    proc.stack.ip = call.entry;

    while proc.stack.frames.len() > base {
        let ip = proc.stack.ip;
        let raw = match proc.module.text.get(ip).copied() {
            Some(raw) => raw,
            None => break,
        };
        match super::execute(proc, services, raw) {
            Ok(Step::Next) => proc.stack.ip = ip + 1,
            Ok(Step::Jump(target)) => proc.stack.ip = target,
            Ok(Step::Halt) => {
                proc.finish(Ok(Value::Void));
                break;
            }
            Ok(Step::Wait) | Err(_) => {
                // A deferred call may neither suspend nor unwind past
                // itself; abandon it and carry on with the frame exit.
                break;
            }
        }
    }

    proc.stack.frames.truncate(base);
    proc.frame_pointer = saved_fp;
    proc.stack_break = saved_sbrk;
    proc.prune_pointers();
    proc.stack.ip = resume_ip;
}

/// Run a frame's deferred calls, most recently scheduled first.
fn run_deferred(
    proc: &mut Process,
    services: &mut Services,
    deferred: Vec<DeferredCall>,
) {
    for call in deferred.into_iter().rev() {
        run_deferred_call(proc, services, call);
    }
}

pub(super) fn ret(
    proc: &mut Process,
    services: &mut Services,
    i: S,
) -> Result<Step, Fault> {
    let frame = proc.stack.frames.pop().ok_or(Fault::UnsupportedAccess)?;
    let value = fetch_in_frame(&frame, i.out)?;

    if proc.stack.frames.is_empty() {
        // Returning from the bottom frame finishes the process; the value
        // becomes the process result, observable through `join`. The
        // result is fixed before the deferred calls run.
        proc.finish(Ok(value));
        run_deferred(proc, services, frame.deferred);
        return Ok(Step::Halt);
    }

    // Restore the caller's memory bookkeeping before the deferred calls
    // run, so their scratch allocations stack on top of the caller's.
    let (fp, sbrk) = {
        let top = proc.stack.top().expect("caller frame is present");
        (top.saved_fp, top.saved_sbrk)
    };
    proc.frame_pointer = fp;
    proc.stack_break = sbrk;
    proc.prune_pointers();

    run_deferred(proc, services, frame.deferred);

    if !frame.result_to.is_void() {
        if value.is_void() {
            return Err(Fault::VoidReturnValueRequested);
        }
        save(proc, frame.result_to, value)?;
    }

    frame
        .return_ip
        .map(Step::Jump)
        .ok_or(Fault::UnsupportedAccess)
}

fn branch_target(proc: &Process, delta_bytes: i64) -> Result<usize, Fault> {
    let delta = delta_bytes / viua_asm::INSTRUCTION_SIZE as i64;
    let target = proc.stack.ip as i64 + delta;
    let limit = proc.module.text.len() as i64;
    if target < 0 || target > limit {
        return Err(Fault::Bounds {
            offset: target.unsigned_abs(),
            size: limit as u64,
        });
    }
    Ok(target as usize)
}

fn sign_extend_36(immediate: u64) -> i64 {
    ((immediate << 28) as i64) >> 28
}

fn sign_extend_24(immediate: u32) -> i64 {
    (((immediate << 8) as i32) >> 8) as i64
}

pub(super) fn jump(proc: &mut Process, i: E) -> Result<Step, Fault> {
    branch_target(proc, sign_extend_36(i.immediate)).map(Step::Jump)
}

pub(super) fn branch(proc: &mut Process, i: R) -> Result<Step, Fault> {
    let condition = fetch(proc, i.out)?;
    let taken = condition.is_void()
        || condition.cast_to_bool().ok_or(Fault::Type(Opcode::If))?;
    if taken {
        branch_target(proc, sign_extend_24(i.immediate)).map(Step::Jump)
    } else {
        Ok(Step::Next)
    }
}

/// Open a guarded region. The resume point of the catch record is the
/// instruction just past the matching `leave`, found by a forward scan that
/// tracks nesting.
pub(super) fn enter_try(proc: &mut Process, _: N) -> Result<(), Fault> {
    let text = &proc.module.text;
    let mut depth = 1usize;
    let mut at = proc.stack.ip + 1;
    let resume = loop {
        let raw = *text.get(at).ok_or(Fault::UnbalancedGuard)?;
        match Opcode::try_from(opcode_of(raw)) {
            Ok(Opcode::Try) => depth += 1,
            Ok(Opcode::Leave) => {
                depth -= 1;
                if depth == 0 {
                    break at + 1;
                }
            }
            _ => {}
        }
        at += 1;
    };

    let frame = proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
    frame.catches.push(CatchRecord { resume });
    Ok(())
}

pub(super) fn leave(proc: &mut Process, _: N) -> Result<(), Fault> {
    let frame = proc.stack.top_mut().ok_or(Fault::UnsupportedAccess)?;
    frame.catches.pop().ok_or(Fault::UnbalancedGuard)?;
    Ok(())
}

pub(super) fn throw(proc: &mut Process, i: S) -> Result<Step, Fault> {
    let value = take(proc, i.out)?;
    if value.is_void() {
        return Err(Fault::VoidAccess);
    }
    Err(Fault::Exception(value))
}

pub(super) fn draw(proc: &mut Process, i: S) -> Result<(), Fault> {
    // An empty slot yields void, so programs can branch on whether anything
    // was caught.
    let value = proc.caught.take().unwrap_or(Value::Void);
    save(proc, i.out, value)
}

/// Turn a fault into the value that unwinds as the exception.
fn exception_value(proc: &mut Process, fault: Fault) -> Value {
    match fault {
        Fault::Exception(value) => value,
        other => Value::Atom(proc.intern(other.name())),
    }
}

/// Unwind the stack with an in-flight exception value: per frame, run its
/// deferred calls in reverse, then check its guarded regions; pop and move
/// up otherwise, restoring memory bookkeeping on the way. With no handler
/// anywhere the process dies, logging a backtrace.
fn raise(proc: &mut Process, services: &mut Services, value: Value) {
    loop {
        let deferred = match proc.stack.top_mut() {
            None => break,
            Some(top) => core::mem::take(&mut top.deferred),
        };
        run_deferred(proc, services, deferred);

        let caught = proc.stack.top_mut().and_then(|top| top.catches.pop());
        if let Some(record) = caught {
            proc.caught = Some(value);
            proc.stack.ip = record.resume;
            return;
        }
        proc.stack.frames.pop();
        let restore = proc.stack.top().map(|top| (top.saved_fp, top.saved_sbrk));
        if let Some((fp, sbrk)) = restore {
            proc.frame_pointer = fp;
            proc.stack_break = sbrk;
            proc.prune_pointers();
        }
    }

    super::ebreak::death_backtrace(proc, &value);
    proc.finish(Err(value));
}

/// Entry point of fault handling: throwable faults unwind as exceptions,
/// the rest kill the process on the spot.
pub(crate) fn handle_fault(
    proc: &mut Process,
    services: &mut Services,
    fault: Fault,
) {
    if fault.is_throwable() {
        let value = exception_value(proc, fault);
        raise(proc, services, value);
    } else {
        let value = exception_value(proc, fault);
        super::ebreak::death_backtrace(proc, &value);
        proc.finish(Err(value));
    }
}

/// Is the word at the given index greedy? Used by the cycle loop.
pub(crate) fn word_is_greedy(proc: &Process, ip: usize) -> bool {
    proc.module.text.get(ip).copied().map(is_greedy).unwrap_or(false)
}
