//! Viua VM interpreter.
//!
//! A register-based virtual machine executing 64-bit instruction words
//! inside lightweight actor-style processes. Each process owns a call stack
//! of frames, a byte-addressable memory arena with pointer tracking, an
//! atom table, and a mailbox; processes share nothing but the loaded
//! module and communicate by asynchronous message passing.

#![warn(missing_docs)]

pub mod core;
pub mod elf;
mod error;
mod frame;
mod interpreter;
pub mod module;
mod pid;
mod process;
mod state;
mod trace;
mod value;

pub use crate::core::{Core, CoreError, Services};
pub use error::{ExecutionError, Fault};
pub use frame::{CatchRecord, DeferredCall, Frame, Stack};
pub use interpreter::{run_cycle, PREEMPTION_THRESHOLD, TIMEOUT_INFINITY};
pub use module::{FunctionEntry, FunctionTable, LoadError, Module, Strtab};
pub use pid::Pid;
pub use process::{Pointer, Process, Wait, MEM_BASE};
pub use state::Step;
pub use trace::TraceStream;
pub use value::Value;

/// Process exit code: success.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code: load failure, unhandled exception, or link failure.
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code reserved for compile errors.
pub const EXIT_COMPILE_ERROR: i32 = 2;
