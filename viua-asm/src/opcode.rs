use crate::{EncodingError, OpcodeRepr, FORMAT_MASK};

/// Instruction formats.
///
/// The format of an instruction is encoded in bits 4..11 of its opcode, so
/// the executor can decode operands without a per-opcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u16)]
pub enum Format {
    /// No operands.
    N = 0x0000,
    /// Three register accesses.
    T = 0x0010,
    /// Two register accesses.
    D = 0x0020,
    /// One register access.
    S = 0x0030,
    /// One register access and a 32-bit immediate.
    F = 0x0040,
    /// One register access and a 36-bit immediate.
    E = 0x0050,
    /// Two register accesses and a 24-bit immediate.
    R = 0x0060,
    /// Two register accesses, a 16-bit immediate, and an 8-bit unit spec.
    M = 0x0070,
}

impl Format {
    /// Extract the format of an opcode, if its format field names one.
    pub fn of(opcode: OpcodeRepr) -> Option<Self> {
        match opcode & FORMAT_MASK {
            0x0000 => Some(Self::N),
            0x0010 => Some(Self::T),
            0x0020 => Some(Self::D),
            0x0030 => Some(Self::S),
            0x0040 => Some(Self::F),
            0x0050 => Some(Self::E),
            0x0060 => Some(Self::R),
            0x0070 => Some(Self::M),
            _ => None,
        }
    }
}

macro_rules! opcodes {
    ($($(#[doc = $doc:literal])* $name:ident = $value:literal / $mnemonic:literal,)*) => {
        /// Opcodes of the Viua instruction set.
        ///
        /// Discriminants are the wire encoding; the format field is part of
        /// the value, so `opcode as u16 & FORMAT_MASK` always recovers the
        /// operand layout.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
        #[repr(u16)]
        pub enum Opcode {
            $($(#[doc = $doc])* $name = $value,)*
        }

        impl Opcode {
            /// Assembly mnemonic of the opcode.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$name => $mnemonic,)*
                }
            }

            /// Look an opcode up by its assembly mnemonic.
            pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
                match mnemonic {
                    $($mnemonic => Some(Self::$name),)*
                    _ => None,
                }
            }
        }

        impl TryFrom<OpcodeRepr> for Opcode {
            type Error = EncodingError;

            fn try_from(raw: OpcodeRepr) -> Result<Self, Self::Error> {
                match raw {
                    $($value => Ok(Self::$name),)*
                    _ => Err(EncodingError::InvalidOpcode(raw)),
                }
            }
        }
    };
}

opcodes! {
    /// Do nothing.
    Noop = 0x0000 / "noop",
    /// Stop the process, unconditionally.
    Halt = 0x0001 / "halt",
    /// Dump the full process state to the trace stream.
    Ebreak = 0x0002 / "ebreak",
    /// Open a guarded region; exceptions unwinding into it are caught.
    Try = 0x0003 / "try",
    /// Close the innermost guarded region.
    Leave = 0x0004 / "leave",

    /// Add; dispatches on the type of the left-hand operand.
    Add = 0x0010 / "add",
    /// Subtract.
    Sub = 0x0011 / "sub",
    /// Multiply.
    Mul = 0x0012 / "mul",
    /// Divide. Integer division by zero is an error.
    Div = 0x0013 / "div",
    /// Remainder. Integer operands only.
    Mod = 0x0014 / "mod",
    /// Shift left.
    Bitshl = 0x0015 / "bitshl",
    /// Logical shift right.
    Bitshr = 0x0016 / "bitshr",
    /// Arithmetic shift right.
    Bitashr = 0x0017 / "bitashr",
    /// Rotate left, on the 64-bit register view.
    Bitrol = 0x0018 / "bitrol",
    /// Rotate right, on the 64-bit register view.
    Bitror = 0x0019 / "bitror",
    /// Bitwise and.
    Bitand = 0x001a / "bitand",
    /// Bitwise or.
    Bitor = 0x001b / "bitor",
    /// Bitwise exclusive or.
    Bitxor = 0x001c / "bitxor",
    /// Equality test; produces an unsigned 0 or 1.
    Eq = 0x001d / "eq",
    /// Less-than test.
    Lt = 0x001e / "lt",
    /// Greater-than test.
    Gt = 0x001f / "gt",
    /// Three-way comparison; produces a signed -1, 0, or 1.
    Cmp = 0x1010 / "cmp",
    /// Logical and, on truthiness of the operands.
    And = 0x1011 / "and",
    /// Logical or.
    Or = 0x1012 / "or",
    /// Submit an asynchronous I/O request.
    IoSubmit = 0x1013 / "io_submit",
    /// Wait for an I/O completion.
    IoWait = 0x1014 / "io_wait",
    /// Shut an I/O port down.
    IoShutdown = 0x1015 / "io_shutdown",
    /// Control an I/O port.
    IoCtl = 0x1016 / "io_ctl",

    /// Call a function; the input register holds a function table offset.
    Call = 0x0020 / "call",
    /// Copy a value between registers.
    Copy = 0x0021 / "copy",
    /// Move a value between registers, erasing the source.
    Move = 0x0022 / "move",
    /// Swap two registers.
    Swap = 0x0023 / "swap",
    /// Logical not.
    Not = 0x0024 / "not",
    /// Bitwise not.
    Bitnot = 0x0025 / "bitnot",
    /// Take a reference to a value.
    Ref = 0x0026 / "ref",
    /// Peek at an I/O port without consuming.
    IoPeek = 0x0027 / "io_peek",
    /// Spawn a process; the input register holds a function table offset.
    Actor = 0x0028 / "actor",
    /// Move a value into the mailbox of the process named by a pid.
    Send = 0x0029 / "send",
    /// Wait for a process to finish and take its result.
    Join = 0x002a / "join",

    /// Clear a register, deleting the value it contained.
    Delete = 0x0030 / "delete",
    /// Size the argument buffer for an upcoming call.
    Frame = 0x0031 / "frame",
    /// Return from the current frame, optionally carrying a value.
    Return = 0x0032 / "return",
    /// Intern the string at a strtab offset, producing an atom.
    Atom = 0x0033 / "atom",
    /// Construct a string from a strtab offset.
    String = 0x0034 / "string",
    /// Construct a 64-bit float from a strtab offset.
    Double = 0x0035 / "double",
    /// Produce the pid of the executing process.
    Self_ = 0x0036 / "self",
    /// Raise the value in a register as an exception.
    Throw = 0x0037 / "throw",
    /// Take the caught exception value, if any.
    Draw = 0x0038 / "draw",
    /// Size the local register file of the current frame.
    AllocateRegisters = 0x0039 / "allocate_registers",
    /// Replace the current frame with a call to another function.
    Tailcall = 0x003a / "tailcall",
    /// Schedule a call to run when the current frame returns or is
    /// unwound; the input register holds a function table offset.
    Defer = 0x003b / "defer",

    /// Load a 32-bit float immediate.
    Float = 0x0040 / "float",

    /// Load upper bits: a sign-extended 36-bit immediate shifted left by 28.
    Lui = 0x0050 / "lui",
    /// Unsigned variant of LUI.
    Luiu = 0x0051 / "luiu",
    /// Unconditional jump by a signed relative byte offset.
    Jump = 0x0052 / "jump",

    /// Add a sign-extended 24-bit immediate; a void input reads as zero.
    Addi = 0x0060 / "addi",
    /// Add a zero-extended 24-bit immediate.
    Addiu = 0x0061 / "addiu",
    /// Subtract a sign-extended immediate.
    Subi = 0x0062 / "subi",
    /// Subtract a zero-extended immediate.
    Subiu = 0x0063 / "subiu",
    /// Multiply by a sign-extended immediate.
    Muli = 0x0064 / "muli",
    /// Multiply by a zero-extended immediate.
    Muliu = 0x0065 / "muliu",
    /// Divide by a sign-extended immediate.
    Divi = 0x0066 / "divi",
    /// Divide by a zero-extended immediate.
    Diviu = 0x0067 / "diviu",
    /// Branch by a signed relative byte offset when the condition register
    /// is void or truthy; fall through otherwise.
    If = 0x0068 / "if",
    /// Pop the mailbox head, waiting up to a millisecond timeout.
    Receive = 0x0069 / "receive",

    /// Store `1 << spec` bytes from a register into memory.
    Sm = 0x0070 / "sm",
    /// Load `1 << spec` bytes from memory into a register.
    Lm = 0x0071 / "lm",
    /// Allocate scratch memory on the frame's stack region.
    Aa = 0x0072 / "aa",
    /// Deallocate a stack region.
    Ad = 0x0073 / "ad",
    /// Re-derive a pointer, checking its validity.
    Ptr = 0x0074 / "ptr",
}

impl Opcode {
    /// Format of the opcode's operands.
    pub fn format(self) -> Format {
        // Discriminants are constructed with a valid format field.
        Format::of(self as OpcodeRepr).expect("opcode carries a valid format field")
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
