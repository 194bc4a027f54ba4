//! Runtime fault taxonomy.

use viua_asm::{Opcode, RawInstruction};

use crate::value::Value;

/// A fault raised while executing a single instruction.
///
/// Most faults are *throwable*: they surface inside the process as VM
/// exceptions and unwind the stack looking for a guarded region. A few are
/// fatal at the point of decode or dispatch and terminate the process
/// unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Fault {
    /// The instruction word could not be decoded. Fatal.
    #[error("encoding error: {0}")]
    Encoding(#[from] viua_asm::EncodingError),
    /// The operand types do not admit the requested operation.
    #[error("unsupported operand types for {0}")]
    Type(Opcode),
    /// Pointer arithmetic or a memory access fell outside its region.
    #[error("illegal offset of {offset} byte(s) into a region of {size} byte(s)")]
    Bounds {
        /// Offset that was requested.
        offset: u64,
        /// Size of the region the offset was applied to.
        size: u64,
    },
    /// A memory instruction was given an address with no recorded region.
    #[error("unknown pointer: {0:#018x}")]
    UnknownPointer(u64),
    /// A value was read from a void source.
    #[error("use of a void value")]
    VoidAccess,
    /// A return value was requested from a function returning void.
    #[error("return value requested from function returning void")]
    VoidReturnValueRequested,
    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Overflow in a checked arithmetic operation.
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    /// RECEIVE exhausted its timeout with an empty mailbox. Transient.
    #[error("mailbox empty")]
    MailboxEmpty,
    /// The register set is not usable at run time, or the access mode is
    /// not implemented. Fatal.
    #[error("unsupported register access")]
    UnsupportedAccess,
    /// A register index fell outside the frame's allocated register file.
    #[error("register index out of range: {0}")]
    RegisterOutOfRange(u8),
    /// The opcode is part of the encoding but has no runtime behaviour.
    /// Fatal.
    #[error("unimplemented instruction: {0}")]
    UnimplementedInstruction(Opcode),
    /// An operand referred to a function table offset with no entry.
    #[error("invalid function offset: {0:#x}")]
    InvalidFunctionOffset(u64),
    /// A `try` has no matching `leave`. Fatal.
    #[error("guarded region is never left")]
    UnbalancedGuard,
    /// A pid operand does not name a process known to the core.
    #[error("no such process")]
    NoSuchProcess,
    /// A strtab offset fell outside the module's string table.
    #[error("invalid strtab offset: {0:#x}")]
    InvalidStrtabOffset(u64),
    /// An exception raised by the program itself, via `throw`.
    #[error("user exception")]
    Exception(Value),
}

impl Fault {
    /// Throwable faults unwind the stack as VM exceptions; the rest kill
    /// the process on the spot.
    pub const fn is_throwable(&self) -> bool {
        !matches!(
            self,
            Self::Encoding(_)
                | Self::UnsupportedAccess
                | Self::RegisterOutOfRange(_)
                | Self::UnimplementedInstruction(_)
                | Self::UnbalancedGuard
        )
    }

    /// Short atom-style name used when a fault is materialised as an
    /// exception value.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Encoding(_) => "EncodingError",
            Self::Type(_) => "TypeError",
            Self::Bounds { .. } => "BoundsError",
            Self::UnknownPointer(_) => "BoundsError",
            Self::VoidAccess => "VoidAccessError",
            Self::VoidReturnValueRequested => "VoidAccessError",
            Self::DivisionByZero => "DivisionByZero",
            Self::ArithmeticOverflow => "ArithmeticOverflow",
            Self::MailboxEmpty => "MailboxEmpty",
            Self::UnsupportedAccess => "UnsupportedAccess",
            Self::RegisterOutOfRange(_) => "UnsupportedAccess",
            Self::UnimplementedInstruction(_) => "UnimplementedInstruction",
            Self::InvalidFunctionOffset(_) => "LinkError",
            Self::UnbalancedGuard => "UnbalancedGuard",
            Self::NoSuchProcess => "NoSuchProcess",
            Self::InvalidStrtabOffset(_) => "BoundsError",
            Self::Exception(_) => "Exception",
        }
    }
}

/// A fault paired with the raw word that raised it, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("{fault} (at {instruction:#018x})")]
pub struct ExecutionError {
    /// The fault itself.
    pub fault: Fault,
    /// The word being executed when the fault was raised.
    pub instruction: RawInstruction,
}

impl ExecutionError {
    /// Pair a fault with its instruction word.
    pub const fn new(fault: Fault, instruction: RawInstruction) -> Self {
        Self { fault, instruction }
    }
}
