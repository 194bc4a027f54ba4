//! Process-level instructions: spawning, messaging, joining.

use std::time::{Duration, Instant};

use viua_asm::{Opcode, D, R, S};

use super::registers::{fetch, save, take};
use crate::{
    core::Services,
    error::Fault,
    process::{Process, Wait},
    state::Step,
    value::Value,
};

/// Timeout immediate meaning "wait forever".
pub const TIMEOUT_INFINITY: u32 = viua_asm::RECEIVE_TIMEOUT_INFINITY;

pub(super) fn actor(
    proc: &mut Process,
    services: &mut Services,
    i: D,
) -> Result<(), Fault> {
    let offset = take(proc, i.input)?
        .cast_to_u64()
        .ok_or(Fault::Type(Opcode::Actor))?;
    let (_, entry) = proc.module.function_at(offset)?;

    let parameters = core::mem::take(&mut proc.stack.args);
    let pid = services.spawn(
        proc.module.clone(),
        entry,
        parameters,
        proc.trace.clone(),
    );
    save(proc, i.out, Value::Pid(pid))
}

pub(super) fn self_pid(proc: &mut Process, i: S) -> Result<(), Fault> {
    save(proc, i.out, Value::Pid(proc.pid))
}

pub(super) fn send(
    proc: &mut Process,
    services: &mut Services,
    i: D,
) -> Result<(), Fault> {
    let target = match fetch(proc, i.out)? {
        Value::Pid(pid) => pid,
        _ => return Err(Fault::Type(Opcode::Send)),
    };
    let value = take(proc, i.input)?;
    if value.is_void() {
        return Err(Fault::VoidAccess);
    }
    // Messages to processes that already exited are dropped; sending is
    // fire-and-forget.
    services.post(target, value);
    Ok(())
}

pub(super) fn receive(proc: &mut Process, i: R) -> Result<Step, Fault> {
    if let Some(value) = proc.mailbox.pop_front() {
        proc.wait = None;
        save(proc, i.out, value)?;
        return Ok(Step::Next);
    }

    match i.immediate {
        0 => {
            proc.wait = None;
            Err(Fault::MailboxEmpty)
        }
        TIMEOUT_INFINITY => {
            proc.wait = Some(Wait::Mailbox(None));
            Ok(Step::Wait)
        }
        ms => match proc.wait {
            Some(Wait::Mailbox(Some(deadline))) => {
                if Instant::now() >= deadline {
                    proc.wait = None;
                    Err(Fault::MailboxEmpty)
                } else {
                    Ok(Step::Wait)
                }
            }
            _ => {
                let deadline =
                    Instant::now() + Duration::from_millis(ms as u64);
                proc.wait = Some(Wait::Mailbox(Some(deadline)));
                Ok(Step::Wait)
            }
        },
    }
}

pub(super) fn join(
    proc: &mut Process,
    services: &mut Services,
    i: D,
) -> Result<Step, Fault> {
    let target = match fetch(proc, i.input)? {
        Value::Pid(pid) => pid,
        _ => return Err(Fault::Type(Opcode::Join)),
    };

    match services.take_exit(target) {
        Some(Ok(value)) => {
            proc.wait = None;
            save(proc, i.out, value)?;
            Ok(Step::Next)
        }
        Some(Err(exception)) => {
            proc.wait = None;
            Err(Fault::Exception(exception))
        }
        None if services.is_alive(target) => {
            proc.wait = Some(Wait::Join(target));
            Ok(Step::Wait)
        }
        None => {
            proc.wait = None;
            Err(Fault::NoSuchProcess)
        }
    }
}
