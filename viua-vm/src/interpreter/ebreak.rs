//! The EBREAK state dump and the death backtrace.

use std::collections::HashMap;

use itertools::Itertools;

use crate::{process::Process, value::Value};
use viua_asm::INSTRUCTION_SIZE;

fn dump_value(proc: &Process, value: &Value) -> String {
    match value {
        Value::Void => String::new(),
        Value::Int(v) => format!("is {:#018x} {}", *v as u64, v),
        Value::Uint(v) => format!("iu {v:#018x} {v}"),
        Value::Float(v) => format!("fl {:#010x} {}", v.to_bits(), v),
        Value::Double(v) => format!("db {:#018x} {}", v.to_bits(), v),
        Value::Pointer(addr) => format!("ptr {addr:#018x} {addr}"),
        Value::Atom(key) => match proc.atoms.get(key) {
            Some(text) => format!("atom '{text}'"),
            None => format!("atom {key:#018x}"),
        },
        Value::Pid(pid) => format!("pid {pid}"),
        Value::Undefined(raw) => {
            format!("raw {}", raw.iter().map(|b| format!("{b:02x}")).join(" "))
        }
    }
}

fn dump_registers(proc: &Process, registers: &[Value], suffix: &str) {
    for (i, each) in registers.iter().enumerate() {
        if each.is_void() {
            continue;
        }
        proc.trace.line(format_args!(
            "      [{i}.{suffix}] {}",
            dump_value(proc, each)
        ));
    }
}

fn function_names(proc: &Process) -> HashMap<usize, &str> {
    proc.module
        .functions
        .entries()
        .iter()
        .map(|e| {
            (
                (e.entry / INSTRUCTION_SIZE as u64) as usize,
                e.name.as_str(),
            )
        })
        .collect()
}

fn print_backtrace(proc: &Process) {
    let names = function_names(proc);
    for (i, frame) in proc.stack.frames.iter().enumerate() {
        let name = names.get(&frame.entry).copied().unwrap_or("??");
        let arguments = if frame.parameters.is_empty() {
            "()"
        } else {
            "(...)"
        };
        let ip_offset = if i + 1 < proc.stack.frames.len() {
            proc.stack.frames[i + 1].return_ip.unwrap_or(0)
        } else {
            proc.stack.ip
        } * INSTRUCTION_SIZE;
        match frame.return_ip {
            Some(return_ip) => proc.trace.line(format_args!(
                "    #{i}  {name} {arguments} at [.text+{ip_offset:#010x}] return to [.text+{:#010x}]",
                return_ip * INSTRUCTION_SIZE
            )),
            None => proc.trace.line(format_args!(
                "    #{i}  {name} {arguments} at [.text+{ip_offset:#010x}] return to null"
            )),
        }
    }
}

const MEM_LINE_SIZE: usize = 16;

fn dump_memory(proc: &Process) {
    proc.trace.line(format_args!("  memory:"));
    let used = proc.stack_break as usize;
    for (line, chunk) in proc.memory[..used.min(proc.memory.len())]
        .chunks(MEM_LINE_SIZE)
        .enumerate()
    {
        let hex = chunk.iter().map(|b| format!("{b:02x}")).join(" ");
        let printable: String = chunk
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '.'
                }
            })
            .collect();
        proc.trace.line(format_args!(
            "    {:016x}  {}  | {}",
            line * MEM_LINE_SIZE,
            hex,
            printable
        ));
    }
}

/// Dump the full process state to the trace stream.
pub(super) fn dump(proc: &Process) {
    proc.trace
        .line(format_args!("begin ebreak in process {}", proc.pid));

    proc.trace.line(format_args!("  backtrace:"));
    print_backtrace(proc);

    proc.trace.line(format_args!("  register contents:"));
    for (i, frame) in proc.stack.frames.iter().enumerate() {
        proc.trace.line(format_args!("    of #{i}"));
        proc.trace.line(format_args!(
            "        [fptr] iu {0:#018x} {0}",
            frame.saved_fp
        ));
        proc.trace.line(format_args!(
            "        [sbrk] iu {0:#018x} {0}",
            frame.saved_sbrk
        ));
        dump_registers(proc, &frame.parameters, "p");
        dump_registers(proc, &frame.registers, "l");
    }
    dump_registers(proc, &proc.stack.args, "a");

    dump_memory(proc);

    proc.trace
        .line(format_args!("end ebreak in process {}", proc.pid));
}

/// Log the backtrace of a process dying of an uncaught exception.
pub(crate) fn death_backtrace(proc: &Process, value: &Value) {
    proc.trace.line(format_args!(
        "uncaught exception in process {}: {}",
        proc.pid,
        dump_value(proc, value)
    ));
    proc.trace.line(format_args!("  backtrace:"));
    print_backtrace(proc);
}
