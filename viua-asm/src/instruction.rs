use crate::{
    opcode::{Format, Opcode},
    pack, unpack,
    registers::Access,
    EncodingError, OpcodeRepr, RawInstruction, GREEDY, OPCODE_MASK,
};

/// No-operand instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct N {
    /// The opcode.
    pub opcode: Opcode,
}

/// Single register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct S {
    /// The opcode.
    pub opcode: Opcode,
    /// Output (or sole) operand.
    pub out: Access,
}

/// Two-way register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct D {
    /// The opcode.
    pub opcode: Opcode,
    /// Output operand.
    pub out: Access,
    /// Input operand.
    pub input: Access,
}

/// Three-way register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct T {
    /// The opcode.
    pub opcode: Opcode,
    /// Output operand.
    pub out: Access,
    /// Left-hand input operand.
    pub lhs: Access,
    /// Right-hand input operand.
    pub rhs: Access,
}

/// One register access and a 32-bit immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct F {
    /// The opcode.
    pub opcode: Opcode,
    /// Output operand.
    pub out: Access,
    /// Raw 32-bit immediate; for FLOAT these are the bits of an `f32`.
    pub immediate: u32,
}

/// One register access and a 36-bit immediate. "E" for "extended": four bits
/// longer than the F format, squeezed into the reserved nibble of the output
/// register's field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct E {
    /// The opcode.
    pub opcode: Opcode,
    /// Output operand.
    pub out: Access,
    /// 36-bit immediate. The high 28 bits must be zero.
    pub immediate: u64,
}

/// Two register accesses and a 24-bit immediate. "R" for "reduced": eight
/// bits shorter than the F format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct R {
    /// The opcode.
    pub opcode: Opcode,
    /// Output operand.
    pub out: Access,
    /// Input operand.
    pub input: Access,
    /// 24-bit immediate. The high 8 bits must be zero.
    pub immediate: u32,
}

/// Memory access: two register accesses, a 16-bit immediate offset, and an
/// 8-bit unit spec giving the access size as `1 << spec` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct M {
    /// The opcode.
    pub opcode: Opcode,
    /// Register operand: source of a store, destination of a load.
    pub out: Access,
    /// Base pointer register.
    pub input: Access,
    /// Offset immediate, in units of `1 << spec` bytes.
    pub immediate: u16,
    /// Unit size selector.
    pub spec: u8,
}

macro_rules! decoded_opcode {
    ($raw:expr) => {
        Opcode::try_from(($raw as OpcodeRepr) & OPCODE_MASK)?
    };
}

impl N {
    /// Decode the no-operand format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        Ok(Self {
            opcode: decoded_opcode!(raw),
        })
    }

    /// Encode into a raw word.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction
    }
}

impl S {
    /// Decode the single-access format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        Ok(Self {
            opcode: decoded_opcode!(raw),
            out: unpack::out_from_u64(raw)?,
        })
    }

    /// Encode into a raw word.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction | pack::u64_from_out(self.out)
    }
}

impl D {
    /// Decode the two-access format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        Ok(Self {
            opcode: decoded_opcode!(raw),
            out: unpack::out_from_u64(raw)?,
            input: unpack::in_from_u64(raw)?,
        })
    }

    /// Encode into a raw word.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction
            | pack::u64_from_out(self.out)
            | pack::u64_from_in(self.input)
    }
}

impl T {
    /// Decode the three-access format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        Ok(Self {
            opcode: decoded_opcode!(raw),
            out: unpack::out_from_u64(raw)?,
            lhs: unpack::in_from_u64(raw)?,
            rhs: unpack::rhs_from_u64(raw)?,
        })
    }

    /// Encode into a raw word.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction
            | pack::u64_from_out(self.out)
            | pack::u64_from_in(self.lhs)
            | pack::u64_from_rhs(self.rhs)
    }
}

impl F {
    /// Decode the 32-bit-immediate format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        Ok(Self {
            opcode: decoded_opcode!(raw),
            out: unpack::out_from_u64(raw)?,
            immediate: unpack::imm32_from_u64(raw),
        })
    }

    /// Encode into a raw word.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction
            | pack::u64_from_out(self.out)
            | pack::u64_from_imm32(self.immediate)
    }
}

impl E {
    /// Decode the 36-bit-immediate format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        Ok(Self {
            opcode: decoded_opcode!(raw),
            out: unpack::out_from_u64(raw)?,
            immediate: unpack::imm36_from_u64(raw),
        })
    }

    /// Encode into a raw word. Immediate bits beyond the low 36 are dropped.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction
            | pack::u64_from_out(self.out)
            | pack::u64_from_imm36(self.immediate)
    }
}

impl R {
    /// Decode the 24-bit-immediate format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        Ok(Self {
            opcode: decoded_opcode!(raw),
            out: unpack::out_from_u64(raw)?,
            input: unpack::in_from_u64(raw)?,
            immediate: unpack::imm24_from_u64(raw),
        })
    }

    /// Encode into a raw word. Immediate bits beyond the low 24 are dropped.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction
            | pack::u64_from_out(self.out)
            | pack::u64_from_in(self.input)
            | pack::u64_from_imm24(self.immediate)
    }
}

impl M {
    /// Decode the memory-access format.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        let (immediate, spec) = unpack::imm16_spec_from_u64(raw);
        Ok(Self {
            opcode: decoded_opcode!(raw),
            out: unpack::out_from_u64(raw)?,
            input: unpack::in_from_u64(raw)?,
            immediate,
            spec,
        })
    }

    /// Encode into a raw word.
    pub fn encode(self) -> RawInstruction {
        self.opcode as u16 as RawInstruction
            | pack::u64_from_out(self.out)
            | pack::u64_from_in(self.input)
            | pack::u64_from_imm16_spec(self.immediate, self.spec)
    }
}

/// A fully decoded instruction: the opcode plus its format's operand bundle.
///
/// The greedy flag is not part of this representation; it is a property of
/// the raw word, queried with [`crate::is_greedy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// No operands.
    N(N),
    /// One register access.
    S(S),
    /// Two register accesses.
    D(D),
    /// Three register accesses.
    T(T),
    /// Register access plus 32-bit immediate.
    F(F),
    /// Register access plus 36-bit immediate.
    E(E),
    /// Two register accesses plus 24-bit immediate.
    R(R),
    /// Memory access.
    M(M),
}

impl Instruction {
    /// Decode a raw word, dispatching on the format field of its opcode.
    ///
    /// Fails on unknown opcodes, unknown format bits, and illegal register
    /// references.
    pub fn decode(raw: RawInstruction) -> Result<Self, EncodingError> {
        let opcode = (raw as OpcodeRepr) & OPCODE_MASK;
        let format =
            Format::of(opcode).ok_or(EncodingError::InvalidOpcode(opcode))?;
        match format {
            Format::N => N::decode(raw).map(Self::N),
            Format::S => S::decode(raw).map(Self::S),
            Format::D => D::decode(raw).map(Self::D),
            Format::T => T::decode(raw).map(Self::T),
            Format::F => F::decode(raw).map(Self::F),
            Format::E => E::decode(raw).map(Self::E),
            Format::R => R::decode(raw).map(Self::R),
            Format::M => M::decode(raw).map(Self::M),
        }
    }

    /// Encode into a raw word with the greedy flag clear.
    pub fn encode(self) -> RawInstruction {
        match self {
            Self::N(i) => i.encode(),
            Self::S(i) => i.encode(),
            Self::D(i) => i.encode(),
            Self::T(i) => i.encode(),
            Self::F(i) => i.encode(),
            Self::E(i) => i.encode(),
            Self::R(i) => i.encode(),
            Self::M(i) => i.encode(),
        }
    }

    /// Encode into a raw word with the greedy flag set.
    pub fn encode_greedy(self) -> RawInstruction {
        self.encode() | GREEDY as RawInstruction
    }

    /// The instruction's opcode.
    pub fn opcode(self) -> Opcode {
        match self {
            Self::N(i) => i.opcode,
            Self::S(i) => i.opcode,
            Self::D(i) => i.opcode,
            Self::T(i) => i.opcode,
            Self::F(i) => i.opcode,
            Self::E(i) => i.opcode,
            Self::R(i) => i.opcode,
            Self::M(i) => i.opcode,
        }
    }
}

impl TryFrom<RawInstruction> for Instruction {
    type Error = EncodingError;

    fn try_from(raw: RawInstruction) -> Result<Self, Self::Error> {
        Self::decode(raw)
    }
}

impl From<Instruction> for RawInstruction {
    fn from(instruction: Instruction) -> Self {
        instruction.encode()
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::N(i) => write!(f, "{}", i.opcode),
            Self::S(i) => write!(f, "{} {}", i.opcode, i.out),
            Self::D(i) => write!(f, "{} {}, {}", i.opcode, i.out, i.input),
            Self::T(i) => {
                write!(f, "{} {}, {}, {}", i.opcode, i.out, i.lhs, i.rhs)
            }
            Self::F(i) => {
                write!(f, "{} {}, {:#010x}", i.opcode, i.out, i.immediate)
            }
            Self::E(i) => {
                write!(f, "{} {}, {:#011x}", i.opcode, i.out, i.immediate)
            }
            Self::R(i) => write!(
                f,
                "{} {}, {}, {:#08x}",
                i.opcode, i.out, i.input, i.immediate
            ),
            Self::M(i) => write!(
                f,
                "{} {}, {}, {}, {}",
                i.opcode, i.out, i.input, i.immediate, i.spec
            ),
        }
    }
}
