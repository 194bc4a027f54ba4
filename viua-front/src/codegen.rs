//! Fragments to bytecode.
//!
//! Pseudo-instructions are lowered here: `integer` through the LI
//! decomposition, data constructors through the string table, `call`-family
//! instructions through a greedy load of the function table offset into
//! local register 0, and `jump`/`if` into relative byte offsets. A
//! per-function table records the byte position of every jump word and
//! every table-offset load, so the linker can re-base a relocated module.

use std::collections::HashMap;

use viua_asm::{
    load_immediate_instructions, ops, Access, Format, Instruction, Opcode,
    RegisterSet, INSTRUCTION_SIZE, RECEIVE_TIMEOUT_INFINITY,
};
use viua_vm::{Module, Strtab};

use crate::{
    error::{CompileError, Location},
    parser::{
        Body, BodyKind, Fragment, InstructionNode, JumpTarget, Operand,
        RegisterAddress, RegisterOperand, Sigil, SourceUnit,
    },
};

/// Table offset sentinel marking an extern function entry that the linker
/// must resolve.
pub const EXTERN_ENTRY: u64 = u64::MAX;

/// The output of code generation: the module plus the relocation records
/// the linker consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembled {
    /// The generated module.
    pub module: Module,
    /// Per-function byte positions (within `.text`) of every jump word.
    pub jump_positions: HashMap<String, Vec<u64>>,
    /// Byte positions of words whose immediate is a function table offset.
    pub function_references: Vec<u64>,
    /// Byte positions of words whose immediate is a strtab offset.
    pub strtab_references: Vec<u64>,
}

// A lowered word, not yet encoded: the greedy flag is decided while the
// word's neighbours are still known.
#[derive(Debug, Clone, Copy)]
struct Planned {
    instruction: Instruction,
    greedy: bool,
}

// A branch target folded into patchable form.
#[derive(Debug, Clone)]
enum PatchTarget {
    // Instruction ordinal within the fragment list.
    Ordinal(usize),
    // A `.mark:`ed label within the fragment list.
    Label(String),
    // An absolute word index, from disassembled `0x...` targets.
    AbsoluteWord(usize),
}

#[derive(Debug, Clone)]
struct PendingJump {
    // Index of the branch word within the function's planned words.
    word: usize,
    target: PatchTarget,
    location: Location,
}

struct BodyLowering<'a> {
    generator: &'a Generator<'a>,
    words: Vec<Planned>,
    names: HashMap<String, u8>,
    // Byte positions, relative to the function start, patched to absolute
    // once the function's base is known.
    jump_words: Vec<usize>,
    function_references: Vec<usize>,
    strtab_references: Vec<usize>,
}

struct Generator<'a> {
    unit: &'a SourceUnit,
    blocks: HashMap<&'a str, &'a Body>,
}

const MAX_INLINE_DEPTH: usize = 32;

fn err(location: Location, message: impl Into<String>) -> CompileError {
    CompileError::syntax(location, message)
}

impl<'a> BodyLowering<'a> {
    fn resolve(
        &self,
        operand: &RegisterOperand,
    ) -> Result<Access, CompileError> {
        let index = match &operand.address {
            RegisterAddress::Index(index) => *index,
            RegisterAddress::Name(name) => {
                *self.names.get(name).ok_or_else(|| {
                    err(
                        operand.location,
                        format!("not a named register: '{name}'"),
                    )
                })?
            }
        };
        let direct = match operand.sigil {
            Sigil::Direct => true,
            Sigil::PointerDereference => false,
            Sigil::RegisterIndirect => {
                return Err(err(
                    operand.location,
                    "register-indirect access has no encoding",
                ))
            }
        };
        Ok(Access {
            set: operand.set,
            direct,
            index,
        })
    }

    fn operand_access(
        &self,
        instruction: &InstructionNode,
        at: usize,
    ) -> Result<Access, CompileError> {
        match instruction.operands.get(at) {
            Some(Operand::Register(register)) => self.resolve(register),
            Some(Operand::Void { .. }) => Ok(Access::void()),
            Some(other) => {
                Err(err(other.location(), "expected a register operand"))
            }
            None => Err(err(instruction.location, "missing operand")),
        }
    }

    fn operand_integer(
        &self,
        instruction: &InstructionNode,
        at: usize,
    ) -> Result<i64, CompileError> {
        match instruction.operands.get(at) {
            Some(Operand::Integer { value, .. }) => Ok(*value),
            Some(Operand::Bits { value, .. }) => Ok(*value as i64),
            Some(other) => {
                Err(err(other.location(), "expected an integer literal"))
            }
            None => Err(err(instruction.location, "missing operand")),
        }
    }

    fn local_target(
        &self,
        instruction: &InstructionNode,
    ) -> Result<u8, CompileError> {
        let access = self.operand_access(instruction, 0)?;
        if access.set != RegisterSet::Local || !access.direct {
            return Err(err(
                instruction.operands[0].location(),
                "constructor target must be a direct local register",
            ));
        }
        Ok(access.index)
    }

    fn push(&mut self, instruction: Instruction) {
        self.words.push(Planned {
            instruction,
            greedy: false,
        });
    }

    // Emit a LI sequence plus a final instruction as one greedy bundle.
    fn push_bundle(&mut self, mut sequence: Vec<Instruction>) {
        let last = sequence.pop().expect("bundle is never empty");
        for instruction in sequence {
            self.words.push(Planned {
                instruction,
                greedy: true,
            });
        }
        self.push(last);
    }

    fn push_strtab_load(
        &mut self,
        target: u8,
        offset: u64,
        at: Location,
        tail: Instruction,
    ) -> Result<(), CompileError> {
        // Strtab offsets must stay below the 24-bit immediate limit so the
        // load is a single patchable word.
        if offset > 0x00ff_ffff {
            return Err(err(at, "string table exceeds 16 MiB"));
        }
        self.strtab_references
            .push(self.words.len() * INSTRUCTION_SIZE);
        self.push_bundle(vec![
            ops::addiu(Access::local(target), Access::void(), offset as u32),
            tail,
        ]);
        Ok(())
    }

    fn push_function_load(
        &mut self,
        offset: u64,
        tail: Instruction,
    ) {
        // The callee offset rides through local register 0, the
        // return-value convention slot, which the call immediately
        // consumes.
        self.function_references
            .push(self.words.len() * INSTRUCTION_SIZE);
        self.push_bundle(vec![
            ops::addiu(Access::local(0), Access::void(), offset as u32),
            tail,
        ]);
    }

    fn function_offset(
        &self,
        module: &Module,
        instruction: &InstructionNode,
        at: usize,
    ) -> Result<u64, CompileError> {
        let Some(Operand::Function { name, location }) =
            instruction.operands.get(at)
        else {
            return Err(err(
                instruction.location,
                format!("{} expects a function name", instruction.mnemonic),
            ));
        };
        let offset = module.functions.offset_of(name).ok_or_else(|| {
            err(*location, format!("call to an undefined function: {name}"))
        })?;
        if offset > 0x00ff_ffff {
            return Err(err(
                *location,
                "function table offset overflows a load immediate",
            ));
        }
        Ok(offset)
    }

    /// Lower a fragment list: the function body, or an inlined block.
    /// Jump targets are local to the list.
    fn lower_fragments(
        &mut self,
        fragments: &[Fragment],
        module: &Module,
        strtab: &mut Strtab,
        depth: usize,
    ) -> Result<(), CompileError> {
        // Ordinal of each instruction fragment to its first word, for
        // branch target patching.
        let mut ordinal_words = Vec::new();
        let mut marks: HashMap<&str, usize> = HashMap::new();
        let mut pending: Vec<PendingJump> = Vec::new();
        let mut ordinals_seen = 0usize;

        for fragment in fragments {
            match fragment {
                Fragment::Name { index, name, .. } => {
                    self.names.insert(name.clone(), *index);
                }
                Fragment::Mark { label, .. } => {
                    marks.insert(label.as_str(), ordinals_seen);
                }
                Fragment::Unused { .. } => {}
                Fragment::Instruction(instruction) => {
                    ordinal_words.push(self.words.len());
                    ordinals_seen += 1;
                    let stop = self.lower_instruction(
                        instruction,
                        module,
                        strtab,
                        &mut pending,
                        ordinals_seen - 1,
                        depth,
                    )?;
                    if stop {
                        break;
                    }
                }
            }
        }
        // The end of the list is a valid branch target (fall out of an
        // inlined block).
        ordinal_words.push(self.words.len());

        for jump in pending {
            let target_word = match &jump.target {
                PatchTarget::Label(label) => {
                    let ordinal = *marks.get(label.as_str()).ok_or_else(
                        || {
                            err(
                                jump.location,
                                format!("jump to an unknown label: {label}"),
                            )
                        },
                    )?;
                    *ordinal_words.get(ordinal).ok_or_else(|| {
                        err(jump.location, "jump lands outside of the body")
                    })?
                }
                PatchTarget::Ordinal(ordinal) => *ordinal_words
                    .get(*ordinal)
                    .ok_or_else(|| {
                        err(jump.location, "jump lands outside of the body")
                    })?,
                PatchTarget::AbsoluteWord(word) => *word,
            };
            self.patch_branch(jump.word, target_word, jump.location)?;
        }

        Ok(())
    }

    fn patch_branch(
        &mut self,
        word: usize,
        target_word: usize,
        location: Location,
    ) -> Result<(), CompileError> {
        let delta_bytes =
            (target_word as i64 - word as i64) * INSTRUCTION_SIZE as i64;
        let planned = &mut self.words[word];
        planned.instruction = match planned.instruction {
            Instruction::E(mut e) => {
                if delta_bytes.unsigned_abs() >= (1 << 35) {
                    return Err(err(location, "jump offset out of range"));
                }
                e.immediate = (delta_bytes as u64) & 0x0000_000f_ffff_ffff;
                Instruction::E(e)
            }
            Instruction::R(mut r) => {
                if delta_bytes.unsigned_abs() >= (1 << 23) {
                    return Err(err(location, "branch offset out of range"));
                }
                r.immediate = (delta_bytes as u32) & 0x00ff_ffff;
                Instruction::R(r)
            }
            other => {
                unreachable!("only branch words are patched, got {other:?}")
            }
        };
        Ok(())
    }

    fn lower_instruction(
        &mut self,
        instruction: &InstructionNode,
        module: &Module,
        strtab: &mut Strtab,
        pending: &mut Vec<PendingJump>,
        ordinal: usize,
        depth: usize,
    ) -> Result<bool, CompileError> {
        let mnemonic = instruction.mnemonic.as_str();

        match mnemonic {
            "izero" => {
                let out = self.operand_access(instruction, 0)?;
                self.push(ops::addi(out, Access::void(), 0));
            }
            "integer" => {
                let target = self.local_target(instruction)?;
                let value = self.operand_integer(instruction, 1)?;
                self.push_bundle(load_immediate_instructions(
                    target,
                    value as u64,
                    true,
                ));
            }
            "bits" => {
                let target = self.local_target(instruction)?;
                let value = self.operand_integer(instruction, 1)?;
                self.push_bundle(load_immediate_instructions(
                    target,
                    value as u64,
                    false,
                ));
            }
            "float" => {
                let out = self.operand_access(instruction, 0)?;
                let Some(Operand::Float { value, .. }) =
                    instruction.operands.get(1)
                else {
                    return Err(err(
                        instruction.location,
                        "float expects a literal",
                    ));
                };
                self.push(ops::float(out, *value as f32));
            }
            "double" => {
                let target = self.local_target(instruction)?;
                let Some(Operand::Float { value, .. }) =
                    instruction.operands.get(1)
                else {
                    return Err(err(
                        instruction.location,
                        "double expects a literal",
                    ));
                };
                let offset = strtab.push(&value.to_bits().to_le_bytes());
                self.push_strtab_load(
                    target,
                    offset,
                    instruction.location,
                    ops::double(Access::local(target)),
                )?;
            }
            "atom" => {
                let target = self.local_target(instruction)?;
                let Some(Operand::Atom { value, .. }) =
                    instruction.operands.get(1)
                else {
                    return Err(err(
                        instruction.location,
                        "atom expects a literal",
                    ));
                };
                let offset = strtab.push(value.as_bytes());
                self.push_strtab_load(
                    target,
                    offset,
                    instruction.location,
                    ops::atom(Access::local(target)),
                )?;
            }
            "string" => {
                let target = self.local_target(instruction)?;
                let Some(Operand::Text { value, .. }) =
                    instruction.operands.get(1)
                else {
                    return Err(err(
                        instruction.location,
                        "string expects a literal",
                    ));
                };
                let offset = strtab.push(value.as_bytes());
                self.push_strtab_load(
                    target,
                    offset,
                    instruction.location,
                    ops::string(Access::local(target)),
                )?;
            }

            "call" => {
                let out = self.operand_access(instruction, 0)?;
                let offset =
                    self.function_offset(module, instruction, 1)?;
                self.push_function_load(
                    offset,
                    ops::call(out, Access::local(0)),
                );
            }
            "tailcall" => {
                let offset =
                    self.function_offset(module, instruction, 0)?;
                self.push_function_load(
                    offset,
                    ops::tailcall(Access::local(0)),
                );
            }
            "defer" => {
                let offset =
                    self.function_offset(module, instruction, 0)?;
                self.push_function_load(
                    offset,
                    ops::defer(Access::local(0)),
                );
            }
            "actor" => {
                let out = self.operand_access(instruction, 0)?;
                let offset =
                    self.function_offset(module, instruction, 1)?;
                self.push_function_load(
                    offset,
                    ops::actor(out, Access::local(0)),
                );
            }
            "closure" => {
                // A closure value is its function's table offset; captures
                // are populated into the closure-local set.
                let target = self.local_target(instruction)?;
                let offset =
                    self.function_offset(module, instruction, 1)?;
                self.function_references
                    .push(self.words.len() * INSTRUCTION_SIZE);
                self.push(ops::addiu(
                    Access::local(target),
                    Access::void(),
                    offset as u32,
                ));
            }
            "capture" | "capturecopy" | "capturemove" => {
                let index = self.operand_integer(instruction, 1)? as u8;
                let source = self.operand_access(instruction, 2)?;
                let target = Access {
                    set: RegisterSet::ClosureLocal,
                    direct: true,
                    index,
                };
                let lowered = match mnemonic {
                    "capture" => ops::reference(target, source),
                    "capturecopy" => ops::copy(target, source),
                    _ => ops::mov(target, source),
                };
                self.push(lowered);
            }

            "receive" => {
                let out = self.operand_access(instruction, 0)?;
                let timeout = match instruction.operands.get(1) {
                    Some(Operand::Timeout { milliseconds, .. }) => {
                        milliseconds.unwrap_or(RECEIVE_TIMEOUT_INFINITY)
                    }
                    _ => RECEIVE_TIMEOUT_INFINITY,
                };
                self.push(ops::receive(
                    out,
                    Access::void(),
                    timeout.min(RECEIVE_TIMEOUT_INFINITY),
                ));
            }

            "jump" => {
                let Some(Operand::Target { target, location }) =
                    instruction.operands.first()
                else {
                    return Err(err(
                        instruction.location,
                        "jump expects a target",
                    ));
                };
                self.jump_words.push(self.words.len() * INSTRUCTION_SIZE);
                pending.push(PendingJump {
                    word: self.words.len(),
                    target: relative_to_ordinal(target, ordinal, *location)?,
                    location: *location,
                });
                self.push(ops::jump(Access::void(), 0));
            }
            "if" => {
                let condition = self.operand_access(instruction, 0)?;
                let Some(Operand::Target {
                    target: true_target,
                    location: true_location,
                }) = instruction.operands.get(1)
                else {
                    return Err(err(
                        instruction.location,
                        "if expects branch targets",
                    ));
                };
                self.jump_words.push(self.words.len() * INSTRUCTION_SIZE);
                pending.push(PendingJump {
                    word: self.words.len(),
                    target: relative_to_ordinal(
                        true_target,
                        ordinal,
                        *true_location,
                    )?,
                    location: *true_location,
                });
                self.push(ops::branch(condition, Access::void(), 0));

                // The false branch falls through unless it names a real
                // target.
                if let Some(Operand::Target {
                    target: false_target,
                    location: false_location,
                }) = instruction.operands.get(2)
                {
                    if *false_target != JumpTarget::Forward(1) {
                        self.jump_words
                            .push(self.words.len() * INSTRUCTION_SIZE);
                        pending.push(PendingJump {
                            word: self.words.len(),
                            target: relative_to_ordinal(
                                false_target,
                                ordinal,
                                *false_location,
                            )?,
                            location: *false_location,
                        });
                        self.push(ops::jump(Access::void(), 0));
                    }
                }
            }

            "enter" => {
                let Some(Operand::Function { name, location }) =
                    instruction.operands.first()
                else {
                    return Err(err(
                        instruction.location,
                        "enter expects a block name",
                    ));
                };
                if depth >= MAX_INLINE_DEPTH {
                    return Err(err(
                        *location,
                        "blocks are nested too deeply",
                    ));
                }
                let block = *self
                    .generator
                    .blocks
                    .get(name.as_str())
                    .ok_or_else(|| {
                        err(
                            *location,
                            format!("enter of an unknown block: {name}"),
                        )
                    })?;
                self.lower_fragments(
                    &block.fragments,
                    module,
                    strtab,
                    depth + 1,
                )?;
            }
            "leave" if depth > 0 => {
                // End of an inlined block; nothing to execute.
                return Ok(true);
            }

            _ => {
                let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(
                    || {
                        err(
                            instruction.location,
                            format!("unknown instruction: {mnemonic}"),
                        )
                    },
                )?;
                self.lower_plain(opcode, instruction)?;
            }
        }

        Ok(false)
    }

    // Instructions whose assembly operands map one to one onto a format.
    fn lower_plain(
        &mut self,
        opcode: Opcode,
        instruction: &InstructionNode,
    ) -> Result<(), CompileError> {
        let lowered = match opcode.format() {
            Format::N => Instruction::N(viua_asm::N { opcode }),
            Format::S => Instruction::S(viua_asm::S {
                opcode,
                out: self.operand_access(instruction, 0)?,
            }),
            Format::D => Instruction::D(viua_asm::D {
                opcode,
                out: self.operand_access(instruction, 0)?,
                input: self.operand_access(instruction, 1)?,
            }),
            Format::T => Instruction::T(viua_asm::T {
                opcode,
                out: self.operand_access(instruction, 0)?,
                lhs: self.operand_access(instruction, 1)?,
                rhs: self.operand_access(instruction, 2)?,
            }),
            Format::E => Instruction::E(viua_asm::E {
                opcode,
                out: self.operand_access(instruction, 0)?,
                immediate: self.operand_integer(instruction, 1)? as u64,
            }),
            Format::R => Instruction::R(viua_asm::R {
                opcode,
                out: self.operand_access(instruction, 0)?,
                input: self.operand_access(instruction, 1)?,
                immediate: (self.operand_integer(instruction, 2)? as i32
                    as u32)
                    & 0x00ff_ffff,
            }),
            Format::M => {
                let (immediate, spec) = match opcode {
                    // aa takes a count and a unit but no base register.
                    Opcode::Aa => (
                        self.operand_integer(instruction, 1)? as u16,
                        self.operand_integer(instruction, 2)? as u8,
                    ),
                    Opcode::Ad | Opcode::Ptr => (0, 0),
                    _ => (
                        self.operand_integer(instruction, 2)? as u16,
                        self.operand_integer(instruction, 3)? as u8,
                    ),
                };
                let (out, input) = match opcode {
                    Opcode::Aa => {
                        (self.operand_access(instruction, 0)?, Access::void())
                    }
                    Opcode::Ad => {
                        (Access::void(), self.operand_access(instruction, 0)?)
                    }
                    _ => (
                        self.operand_access(instruction, 0)?,
                        self.operand_access(instruction, 1)?,
                    ),
                };
                Instruction::M(viua_asm::M {
                    opcode,
                    out,
                    input,
                    immediate,
                    spec,
                })
            }
            Format::F => {
                return Err(err(
                    instruction.location,
                    "float takes a literal operand",
                ))
            }
        };
        self.push(lowered);
        Ok(())
    }
}

// Fold parsed targets into the patchable form.
fn relative_to_ordinal(
    target: &JumpTarget,
    ordinal: usize,
    location: Location,
) -> Result<PatchTarget, CompileError> {
    Ok(match target {
        JumpTarget::Forward(count) => PatchTarget::Ordinal(ordinal + count),
        JumpTarget::Backward(count) => PatchTarget::Ordinal(
            ordinal.checked_sub(*count).ok_or_else(|| {
                err(location, "jump reaches before the function")
            })?,
        ),
        JumpTarget::Label(label) => PatchTarget::Label(label.clone()),
        JumpTarget::Absolute(address) => {
            PatchTarget::AbsoluteWord(*address as usize / INSTRUCTION_SIZE)
        }
    })
}

/// Generate bytecode for a parsed and verified source unit.
pub fn generate(unit: &SourceUnit) -> Result<Assembled, CompileError> {
    let generator = Generator {
        unit,
        blocks: unit
            .bodies
            .iter()
            .filter(|b| b.kind == BodyKind::Block)
            .map(|b| (b.name.as_str(), b))
            .collect(),
    };

    let mut module = Module::default();
    let mut strtab = Strtab::new();

    // The function table layout must be final before lowering: call sites
    // load table offsets as immediates.
    let mut seen = std::collections::HashSet::new();
    for body in &generator.unit.bodies {
        if !seen.insert((&body.name, body.kind == BodyKind::Block)) {
            return Err(err(
                body.location,
                format!("duplicate definition: {}", body.name),
            ));
        }
        match body.kind {
            BodyKind::Function | BodyKind::Closure => {
                module.functions.push(body.name.clone(), 0);
            }
            BodyKind::Block => {
                module.blocks.push(body.name.clone(), 0);
            }
        }
    }
    for name in &generator.unit.extern_functions {
        module.functions.push(name.clone(), EXTERN_ENTRY);
        module.signatures.push(name.clone());
    }
    for name in &generator.unit.extern_blocks {
        module.blocks.push(name.clone(), EXTERN_ENTRY);
    }
    module.metadata = generator.unit.info.clone();

    let mut assembled = Assembled::default();
    let mut text = Vec::new();

    for body in &generator.unit.bodies {
        if body.kind == BodyKind::Block {
            continue;
        }
        let base_words = text.len();
        let base_bytes = (base_words * INSTRUCTION_SIZE) as u64;
        module.functions.set_entry(&body.name, base_bytes);

        let mut lowering = BodyLowering {
            generator: &generator,
            words: Vec::new(),
            names: HashMap::new(),
            jump_words: Vec::new(),
            function_references: Vec::new(),
            strtab_references: Vec::new(),
        };
        lowering.lower_fragments(&body.fragments, &module, &mut strtab, 0)?;

        assembled.jump_positions.insert(
            body.name.clone(),
            lowering
                .jump_words
                .iter()
                .map(|at| *at as u64 + base_bytes)
                .collect(),
        );
        assembled.function_references.extend(
            lowering
                .function_references
                .iter()
                .map(|at| *at as u64 + base_bytes),
        );
        assembled.strtab_references.extend(
            lowering
                .strtab_references
                .iter()
                .map(|at| *at as u64 + base_bytes),
        );

        text.extend(lowering.words.iter().map(|planned| {
            if planned.greedy {
                planned.instruction.encode_greedy()
            } else {
                planned.instruction.encode()
            }
        }));
    }

    module.text = text;
    module.strtab = strtab;
    assembled.module = module;
    Ok(assembled)
}
