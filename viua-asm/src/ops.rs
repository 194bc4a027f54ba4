//! Typed constructors for every instruction, named after the mnemonics.
//!
//! These keep hand-written programs (and the code generator) free of raw
//! field-packing. Each constructor returns a decoded [`Instruction`]; call
//! [`Instruction::encode`] or [`Instruction::encode_greedy`] to get the wire
//! word.

use crate::{
    instruction::{Instruction, D, E, F, M, N, R, S, T},
    registers::Access,
    Opcode, RawInstruction,
};

macro_rules! n_op {
    ($($fname:ident -> $opcode:ident),* $(,)?) => {
        $(
            #[doc = concat!("Construct a `", stringify!($fname), "` instruction.")]
            pub fn $fname() -> Instruction {
                Instruction::N(N { opcode: Opcode::$opcode })
            }
        )*
    };
}

macro_rules! s_op {
    ($($fname:ident -> $opcode:ident),* $(,)?) => {
        $(
            #[doc = concat!("Construct a `", stringify!($fname), "` instruction.")]
            pub fn $fname(out: Access) -> Instruction {
                Instruction::S(S { opcode: Opcode::$opcode, out })
            }
        )*
    };
}

macro_rules! d_op {
    ($($fname:ident -> $opcode:ident),* $(,)?) => {
        $(
            #[doc = concat!("Construct a `", stringify!($fname), "` instruction.")]
            pub fn $fname(out: Access, input: Access) -> Instruction {
                Instruction::D(D { opcode: Opcode::$opcode, out, input })
            }
        )*
    };
}

macro_rules! t_op {
    ($($fname:ident -> $opcode:ident),* $(,)?) => {
        $(
            #[doc = concat!("Construct a `", stringify!($fname), "` instruction.")]
            pub fn $fname(out: Access, lhs: Access, rhs: Access) -> Instruction {
                Instruction::T(T { opcode: Opcode::$opcode, out, lhs, rhs })
            }
        )*
    };
}

macro_rules! e_op {
    ($($fname:ident -> $opcode:ident),* $(,)?) => {
        $(
            #[doc = concat!("Construct a `", stringify!($fname), "` instruction.")]
            pub fn $fname(out: Access, immediate: u64) -> Instruction {
                Instruction::E(E { opcode: Opcode::$opcode, out, immediate })
            }
        )*
    };
}

macro_rules! r_op {
    ($($fname:ident -> $opcode:ident),* $(,)?) => {
        $(
            #[doc = concat!("Construct a `", stringify!($fname), "` instruction.")]
            pub fn $fname(out: Access, input: Access, immediate: u32) -> Instruction {
                Instruction::R(R { opcode: Opcode::$opcode, out, input, immediate })
            }
        )*
    };
}

macro_rules! m_op {
    ($($fname:ident -> $opcode:ident),* $(,)?) => {
        $(
            #[doc = concat!("Construct a `", stringify!($fname), "` instruction.")]
            pub fn $fname(out: Access, input: Access, immediate: u16, spec: u8) -> Instruction {
                Instruction::M(M { opcode: Opcode::$opcode, out, input, immediate, spec })
            }
        )*
    };
}

n_op! {
    noop -> Noop,
    halt -> Halt,
    ebreak -> Ebreak,
    tr -> Try,
    leave -> Leave,
}

s_op! {
    delete -> Delete,
    frame -> Frame,
    ret -> Return,
    atom -> Atom,
    string -> String,
    double -> Double,
    self_pid -> Self_,
    throw -> Throw,
    draw -> Draw,
    allocate_registers -> AllocateRegisters,
    tailcall -> Tailcall,
    defer -> Defer,
}

d_op! {
    call -> Call,
    copy -> Copy,
    mov -> Move,
    swap -> Swap,
    not -> Not,
    bitnot -> Bitnot,
    reference -> Ref,
    io_peek -> IoPeek,
    actor -> Actor,
    send -> Send,
    join -> Join,
}

t_op! {
    add -> Add,
    sub -> Sub,
    mul -> Mul,
    div -> Div,
    modulo -> Mod,
    bitshl -> Bitshl,
    bitshr -> Bitshr,
    bitashr -> Bitashr,
    bitrol -> Bitrol,
    bitror -> Bitror,
    bitand -> Bitand,
    bitor -> Bitor,
    bitxor -> Bitxor,
    eq -> Eq,
    lt -> Lt,
    gt -> Gt,
    cmp -> Cmp,
    and -> And,
    or -> Or,
    io_submit -> IoSubmit,
    io_wait -> IoWait,
    io_shutdown -> IoShutdown,
    io_ctl -> IoCtl,
}

e_op! {
    lui -> Lui,
    luiu -> Luiu,
    jump -> Jump,
}

r_op! {
    addi -> Addi,
    addiu -> Addiu,
    subi -> Subi,
    subiu -> Subiu,
    muli -> Muli,
    muliu -> Muliu,
    divi -> Divi,
    diviu -> Diviu,
    branch -> If,
    receive -> Receive,
}

m_op! {
    sm -> Sm,
    lm -> Lm,
    aa -> Aa,
    ad -> Ad,
    ptr -> Ptr,
}

/// Construct a `float` instruction from an `f32` value.
pub fn float(out: Access, value: f32) -> Instruction {
    Instruction::F(F {
        opcode: Opcode::Float,
        out,
        immediate: value.to_bits(),
    })
}

/// Encode a sequence of instructions as one greedy bundle: every word but
/// the last carries the greedy flag, making the run atomic with respect to
/// scheduler preemption.
pub fn bundle(instructions: Vec<Instruction>) -> Vec<RawInstruction> {
    let last = instructions.len().saturating_sub(1);
    instructions
        .into_iter()
        .enumerate()
        .map(|(i, instruction)| {
            if i == last {
                instruction.encode()
            } else {
                instruction.encode_greedy()
            }
        })
        .collect()
}
