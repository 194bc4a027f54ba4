//! The bytecode executor: one-instruction dispatch and the preemption loop.

use viua_asm::{Instruction, Opcode, RawInstruction};

use crate::{core::Services, error::Fault, process::Process, state::Step, value::Value};

mod actor;
mod alu;
mod data;
mod ebreak;
mod flow;
mod memory;
pub(crate) mod registers;

pub use actor::TIMEOUT_INFINITY;

/// How many instructions a process may execute per cycle before it yields.
pub const PREEMPTION_THRESHOLD: usize = 2;

/// Execute the single instruction `raw`, returning what to do with the
/// instruction pointer.
pub(crate) fn execute(
    proc: &mut Process,
    services: &mut Services,
    raw: RawInstruction,
) -> Result<Step, Fault> {
    use Opcode::*;

    let work = |r: Result<(), Fault>| r.map(|_| Step::Next);

    match Instruction::decode(raw)? {
        Instruction::N(i) => match i.opcode {
            Noop => Ok(Step::Next),
            Halt => Ok(Step::Halt),
            Ebreak => {
                ebreak::dump(proc);
                Ok(Step::Next)
            }
            Try => work(flow::enter_try(proc, i)),
            Leave => work(flow::leave(proc, i)),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
        Instruction::T(i) => match i.opcode {
            Add | Sub | Mul | Div | Mod => work(alu::arithmetic(proc, i)),
            Bitshl | Bitshr | Bitashr | Bitrol | Bitror | Bitand | Bitor
            | Bitxor => work(alu::bits(proc, i)),
            Eq | Lt | Gt | Cmp => work(alu::comparison(proc, i)),
            And | Or => work(alu::logic(proc, i)),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
        Instruction::D(i) => match i.opcode {
            Call => flow::call(proc, i),
            Copy => work(data::copy(proc, i)),
            Move => work(data::mov(proc, i)),
            Swap => work(data::swap(proc, i)),
            Not => work(alu::not(proc, i)),
            Bitnot => work(alu::bitnot(proc, i)),
            Actor => work(actor::actor(proc, services, i)),
            Send => work(actor::send(proc, services, i)),
            Join => actor::join(proc, services, i),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
        Instruction::S(i) => match i.opcode {
            Delete => work(data::delete(proc, i)),
            Frame => work(flow::frame(proc, i)),
            Return => flow::ret(proc, services, i),
            Atom => work(data::atom(proc, i)),
            Double => work(data::double(proc, i)),
            Self_ => work(actor::self_pid(proc, i)),
            Throw => flow::throw(proc, i),
            Draw => work(flow::draw(proc, i)),
            AllocateRegisters => work(flow::allocate_registers(proc, i)),
            Tailcall => flow::tailcall(proc, services, i),
            Defer => work(flow::defer(proc, i)),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
        Instruction::F(i) => match i.opcode {
            Float => work(alu::float(proc, i)),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
        Instruction::E(i) => match i.opcode {
            Lui => work(alu::lui(proc, i)),
            Luiu => work(alu::luiu(proc, i)),
            Jump => flow::jump(proc, i),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
        Instruction::R(i) => match i.opcode {
            Addi | Addiu | Subi | Subiu | Muli | Muliu | Divi | Diviu => {
                work(alu::arithmetic_immediate(proc, i))
            }
            If => flow::branch(proc, i),
            Receive => actor::receive(proc, i),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
        Instruction::M(i) => match i.opcode {
            Sm => work(memory::sm(proc, i)),
            Lm => work(memory::lm(proc, i)),
            Aa => work(memory::aa(proc, i)),
            Ad => work(memory::ad(proc, i)),
            Ptr => work(memory::ptr(proc, i)),
            other => Err(Fault::UnimplementedInstruction(other)),
        },
    }
}

/// Execute one run starting at the current instruction pointer: a single
/// instruction, or a whole greedy bundle. Returns how many instructions
/// actually executed (zero when the process is blocked).
fn run_bundle(proc: &mut Process, services: &mut Services) -> usize {
    let mut executed = 0;

    loop {
        if proc.is_done() {
            break;
        }
        let ip = proc.stack.ip;
        let raw = match proc.module.text.get(ip).copied() {
            Some(raw) => raw,
            None => {
                // Ran off the end of the text: the process is finished.
                proc.finish(Ok(Value::Void));
                break;
            }
        };

        match execute(proc, services, raw) {
            Ok(Step::Next) => {
                executed += 1;
                proc.stack.ip = ip + 1;
            }
            Ok(Step::Jump(target)) => {
                executed += 1;
                proc.stack.ip = target;
            }
            Ok(Step::Halt) => {
                executed += 1;
                proc.finish(Ok(Value::Void));
                break;
            }
            Ok(Step::Wait) => break,
            Err(fault) => {
                executed += 1;
                let error = crate::error::ExecutionError::new(fault, raw);
                tracing::debug!(pid = %proc.pid, %error, "instruction fault");
                flow::handle_fault(proc, services, fault);
                if proc.is_done() {
                    break;
                }
            }
        }

        if !viua_asm::is_greedy(raw) {
            break;
        }
    }

    executed
}

/// Run one scheduling cycle of a process: up to [`PREEMPTION_THRESHOLD`]
/// runs, where a greedy bundle counts as many executions but is never
/// split. Returns the number of instructions executed.
pub fn run_cycle(proc: &mut Process, services: &mut Services) -> usize {
    let mut total = 0;
    let mut i = 0;

    while i < PREEMPTION_THRESHOLD && !proc.is_done() {
        let greedy = flow::word_is_greedy(proc, proc.stack.ip);

        let executed = run_bundle(proc, services);
        if executed == 0 {
            // Blocked; yield without consuming the threshold.
            break;
        }
        total += executed;

        // A greedy bundle may overrun the preemption threshold; it is
        // always executed whole, and the overrun is charged to the cycle.
        if greedy {
            i += executed - 1;
        }
        i += 1;
    }

    tracing::trace!(pid = %proc.pid, executed = total, "cycle");
    total
}
