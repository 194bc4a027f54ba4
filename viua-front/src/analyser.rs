//! Register-usage verification.
//!
//! A forward walk over each function body tracking, per register
//! coordinate, whether it is defined, what type it holds, and whether it
//! was ever read or erased. Branches fork the walk with a copy of the
//! profile; blocks are analysed as subroutines over the live profile.

use std::collections::{HashMap, HashSet};

use viua_asm::RegisterSet;

use crate::{
    error::{CompileError, Location},
    parser::{
        Body, BodyKind, Fragment, InstructionNode, JumpTarget, Operand,
        RegisterAddress, RegisterOperand, Sigil, SourceUnit,
    },
};

/// A register coordinate: which set, which index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord {
    /// Register set.
    pub set: RegisterSet,
    /// Index within the set.
    pub index: u8,
}

impl Coord {
    fn local(index: u8) -> Self {
        Self {
            set: RegisterSet::Local,
            index,
        }
    }

    fn describe(&self) -> String {
        format!("{} register '{}'", self.set.name(), self.index)
    }
}

/// Statically inferred type of a register's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Anything; assertions always pass.
    Any,
    /// Signed or unsigned integer.
    Integer,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Boolean, as produced by comparisons.
    Boolean,
    /// Text.
    Text,
    /// Interned atom.
    Atom,
    /// Bit string.
    Bits,
    /// Process id.
    Pid,
    /// Pointer into process memory.
    Pointer,
    /// Closure under construction.
    Closure,
}

impl ValueType {
    fn name(&self) -> &'static str {
        match self {
            Self::Any => "value",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Atom => "atom",
            Self::Bits => "bits",
            Self::Pid => "pid",
            Self::Pointer => "pointer",
            Self::Closure => "closure",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Any | Self::Integer | Self::Float | Self::Double | Self::Pointer
        )
    }
}

#[derive(Debug, Clone)]
struct Definition {
    at: Location,
    value_type: ValueType,
    fresh: bool,
}

/// Per-point summary of register usage, forked at branches.
#[derive(Debug, Clone, Default)]
pub struct RegisterUsageProfile {
    defined: HashMap<Coord, Definition>,
    used: HashSet<Coord>,
    erased: HashMap<Coord, Location>,
    maybe_unused: HashSet<Coord>,
    names: HashMap<String, u8>,
    captures: HashMap<String, HashSet<u8>>,
    closure_of: HashMap<Coord, String>,
}

impl RegisterUsageProfile {
    // A write defines; overwriting keeps the original definition site (and
    // any use already recorded), so rewriting a live register does not
    // resurrect the unused-value check.
    fn define(&mut self, coord: Coord, at: Location, value_type: ValueType) {
        if coord.set == RegisterSet::Void {
            return;
        }
        self.erased.remove(&coord);
        match self.defined.entry(coord) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().value_type = value_type;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Definition {
                    at,
                    value_type,
                    fresh: true,
                });
            }
        }
    }

    fn erase(&mut self, coord: Coord, at: Location) {
        self.defined.remove(&coord);
        self.erased.insert(coord, at);
    }

    fn type_of(&self, coord: Coord) -> ValueType {
        self.defined
            .get(&coord)
            .map(|d| d.value_type)
            .unwrap_or(ValueType::Any)
    }

    /// Reset per-analysis ephemeral state, so definitions made before a
    /// fork are not attributed to the forked path.
    fn defresh(&mut self) {
        for definition in self.defined.values_mut() {
            definition.fresh = false;
        }
    }
}

/// An analysis failure: unused values are tracked separately so the branch
/// walker can apply the cross-branch suppression rule. `fresh` is set when
/// the offending definition was made after the last fork, in which case no
/// sibling branch can redeem it.
enum Failure {
    Unused {
        register: Coord,
        fresh: bool,
        error: CompileError,
    },
    Other(CompileError),
}

impl From<Failure> for CompileError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Unused { error, .. } => error,
            Failure::Other(error) => error,
        }
    }
}

type Walk = Result<RegisterUsageProfile, Failure>;

/// Positions of instructions and marks within one body.
struct BodyMap {
    // Fragment index of every instruction, in order.
    instructions: Vec<usize>,
    // Instruction ordinal of every fragment index.
    ordinals: HashMap<usize, usize>,
    // Mark label to the ordinal of the instruction that follows it.
    marks: HashMap<String, usize>,
}

impl BodyMap {
    fn of(body: &Body) -> Self {
        let mut instructions = Vec::new();
        let mut ordinals = HashMap::new();
        let mut marks = HashMap::new();
        for (at, fragment) in body.fragments.iter().enumerate() {
            match fragment {
                Fragment::Instruction(_) => {
                    ordinals.insert(at, instructions.len());
                    instructions.push(at);
                }
                Fragment::Mark { label, .. } => {
                    marks.insert(label.clone(), instructions.len());
                }
                _ => {}
            }
        }
        Self {
            instructions,
            ordinals,
            marks,
        }
    }
}

struct Analyser<'a> {
    blocks: HashMap<&'a str, &'a Body>,
    depth: usize,
}

const MAX_ANALYSIS_DEPTH: usize = 128;

fn syntax(location: Location, message: impl Into<String>) -> Failure {
    Failure::Other(CompileError::syntax(location, message))
}

fn analysis(location: Location, message: impl Into<String>) -> Failure {
    Failure::Other(CompileError::analysis(location, message))
}

fn operand_register<'o>(
    instruction: &'o InstructionNode,
    at: usize,
) -> Result<&'o RegisterOperand, Failure> {
    match instruction.operands.get(at) {
        Some(Operand::Register(register)) => Ok(register),
        Some(other) => Err(syntax(other.location(), "invalid operand")),
        None => Err(syntax(instruction.location, "missing operand")),
    }
}

fn operand_register_or_void<'o>(
    instruction: &'o InstructionNode,
    at: usize,
) -> Result<Option<&'o RegisterOperand>, Failure> {
    match instruction.operands.get(at) {
        Some(Operand::Register(register)) => Ok(Some(register)),
        Some(Operand::Void { .. }) => Ok(None),
        Some(other) => Err(syntax(other.location(), "invalid operand")),
        None => Err(syntax(instruction.location, "missing operand")),
    }
}

impl<'a> Analyser<'a> {
    fn resolve(
        &self,
        profile: &RegisterUsageProfile,
        operand: &RegisterOperand,
    ) -> Result<Coord, Failure> {
        let index = match &operand.address {
            RegisterAddress::Index(index) => *index,
            RegisterAddress::Name(name) => {
                *profile.names.get(name).ok_or_else(|| {
                    analysis(
                        operand.location,
                        format!("not a named register: '{name}'"),
                    )
                })?
            }
        };
        Ok(Coord {
            set: operand.set,
            index,
        })
    }

    /// Rule 1: read operands must be defined, with erased-here and
    /// maybe-mistyped-register-set asides.
    fn check_use(
        &self,
        profile: &mut RegisterUsageProfile,
        operand: &RegisterOperand,
        what: &str,
    ) -> Result<Coord, Failure> {
        let coord = self.resolve(profile, operand)?;
        if profile.defined.contains_key(&coord) {
            profile.used.insert(coord);
            return Ok(coord);
        }

        if let Some(erased_at) = profile.erased.get(&coord) {
            let error = CompileError::analysis(
                operand.location,
                format!("use of erased {}", coord.describe()),
            )
            .aside_at(*erased_at, "erased here");
            return Err(Failure::Other(error));
        }

        let mut error = CompileError::analysis(
            operand.location,
            format!("{what}: use of empty {}", coord.describe()),
        );
        if let Some(other) = self.maybe_mistyped_register_set(profile, coord) {
            error = error.aside(format!(
                "did you mean {} register {}?",
                other.name(),
                coord.index
            ));
        }
        Err(Failure::Other(error))
    }

    fn maybe_mistyped_register_set(
        &self,
        profile: &RegisterUsageProfile,
        missing: Coord,
    ) -> Option<RegisterSet> {
        profile
            .defined
            .keys()
            .find(|defined| {
                defined.index == missing.index && defined.set != missing.set
            })
            .map(|defined| defined.set)
    }

    /// Rule 4: type assertions, with the inferred type in the message.
    fn assert_type(
        &self,
        profile: &RegisterUsageProfile,
        coord: Coord,
        operand: &RegisterOperand,
        expected: ValueType,
    ) -> Result<(), Failure> {
        let actual = profile.type_of(coord);
        let compatible = match expected {
            ValueType::Any => true,
            ValueType::Integer if actual.is_numeric() => true,
            _ => actual == expected || actual == ValueType::Any,
        };
        if compatible {
            return Ok(());
        }
        Err(analysis(
            operand.location,
            format!(
                "invalid type of value in {}: expected {}, got {}",
                coord.describe(),
                expected.name(),
                actual.name()
            ),
        ))
    }

    /// Rule 3: at function exit, every defined register that was never
    /// read, never erased, and not blessed by `.unused:` is an error.
    /// Register 0 is the return-value convention slot and is exempt.
    fn check_unused(
        &self,
        profile: &RegisterUsageProfile,
    ) -> Result<(), Failure> {
        for (coord, definition) in &profile.defined {
            if coord.index == 0 && coord.set == RegisterSet::Local {
                continue;
            }
            if profile.used.contains(coord)
                || profile.maybe_unused.contains(coord)
            {
                continue;
            }
            return Err(Failure::Unused {
                register: *coord,
                fresh: definition.fresh,
                error: CompileError::analysis(
                    definition.at,
                    format!("unused value in {}", coord.describe()),
                ),
            });
        }
        Ok(())
    }

    fn jump_ordinal(
        &self,
        map: &BodyMap,
        current: usize,
        operand: &Operand,
    ) -> Result<Option<usize>, Failure> {
        let Operand::Target { location, target } = operand else {
            return Err(syntax(operand.location(), "invalid jump target"));
        };
        let ordinal = match target {
            JumpTarget::Forward(count) => current + count,
            // Rule 7: backward jumps are accepted without analysis.
            JumpTarget::Backward(_) => return Ok(None),
            // Rule 8: absolute addresses come from disassembled code and
            // are skipped.
            JumpTarget::Absolute(_) => return Ok(None),
            JumpTarget::Label(label) => {
                let ordinal =
                    *map.marks.get(label).ok_or_else(|| {
                        analysis(
                            *location,
                            format!("jump to an unknown label: {label}"),
                        )
                    })?;
                if ordinal <= current {
                    return Ok(None);
                }
                ordinal
            }
        };
        if ordinal >= map.instructions.len() {
            return Err(analysis(
                *location,
                "jump lands outside of the function body",
            ));
        }
        Ok(Some(ordinal))
    }

    /// Analyse one body from an instruction ordinal to its exit.
    fn walk(
        &mut self,
        body: &Body,
        map: &BodyMap,
        from: usize,
        mut profile: RegisterUsageProfile,
    ) -> Walk {
        self.depth += 1;
        if self.depth > MAX_ANALYSIS_DEPTH {
            return Err(analysis(
                body.location,
                "analysis recursion limit reached",
            ));
        }
        let result = self.walk_inner(body, map, from, &mut profile);
        self.depth -= 1;
        result.map(|_| profile)
    }

    fn walk_inner(
        &mut self,
        body: &Body,
        map: &BodyMap,
        from: usize,
        profile: &mut RegisterUsageProfile,
    ) -> Result<(), Failure> {
        let mut fragment_at = match map.instructions.get(from) {
            Some(at) => *at,
            None => return Ok(()),
        };

        // Register names declared before the starting point must be in
        // scope even when entering mid-body through a branch.
        for fragment in &body.fragments[..fragment_at] {
            if let Fragment::Name { index, name, .. } = fragment {
                profile.names.insert(name.clone(), *index);
            }
        }

        while fragment_at < body.fragments.len() {
            match &body.fragments[fragment_at] {
                Fragment::Mark { .. } => {}
                Fragment::Name {
                    location,
                    index,
                    name,
                } => {
                    if profile.names.contains_key(name) {
                        return Err(syntax(
                            *location,
                            format!("register name already taken: {name}"),
                        ));
                    }
                    profile.names.insert(name.clone(), *index);
                }
                Fragment::Unused { register, .. } => {
                    let index = register
                        .parse::<u8>()
                        .ok()
                        .or_else(|| profile.names.get(register).copied());
                    if let Some(index) = index {
                        profile.maybe_unused.insert(Coord::local(index));
                    }
                }
                Fragment::Instruction(instruction) => {
                    let ordinal = map.ordinals[&fragment_at];
                    let flow =
                        self.instruction(body, map, ordinal, instruction, profile)?;
                    match flow {
                        Flow::Continue => {}
                        Flow::Stop => return Ok(()),
                    }
                }
            }
            fragment_at += 1;
        }

        Ok(())
    }

    fn instruction(
        &mut self,
        body: &Body,
        map: &BodyMap,
        ordinal: usize,
        instruction: &InstructionNode,
        profile: &mut RegisterUsageProfile,
    ) -> Result<Flow, Failure> {
        let at = instruction.location;
        let mnemonic = instruction.mnemonic.as_str();

        match mnemonic {
            "allocate_registers" | "noop" | "ebreak" | "try" => {}
            "leave" => {
                // In a block body, `leave` is the exit point. Definitions
                // made inside the block flow back into the enclosing
                // function, which is where their use is accounted for.
                if body.kind == BodyKind::Block {
                    return Ok(Flow::Stop);
                }
            }
            "halt" => return Ok(Flow::Stop),

            "izero" | "integer" => {
                let target = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, target)?;
                profile.define(coord, at, ValueType::Integer);
            }
            "float" => {
                let target = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, target)?;
                profile.define(coord, at, ValueType::Float);
            }
            "double" => {
                let target = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, target)?;
                profile.define(coord, at, ValueType::Double);
            }
            "atom" => {
                let target = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, target)?;
                profile.define(coord, at, ValueType::Atom);
            }
            "string" => {
                let target = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, target)?;
                profile.define(coord, at, ValueType::Text);
            }
            "bits" => {
                let target = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, target)?;
                profile.define(coord, at, ValueType::Bits);
            }

            "add" | "sub" | "mul" | "div" | "mod" => {
                let lhs = operand_register(instruction, 1)?;
                let lhs_coord = self.check_use(
                    profile,
                    lhs,
                    &format!("{mnemonic} of empty register"),
                )?;
                self.assert_type(profile, lhs_coord, lhs, ValueType::Integer)?;
                let rhs = operand_register(instruction, 2)?;
                let rhs_coord = self.check_use(
                    profile,
                    rhs,
                    &format!("{mnemonic} of empty register"),
                )?;
                self.assert_type(profile, rhs_coord, rhs, ValueType::Integer)?;
                let result_type = profile.type_of(lhs_coord);
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, result_type);
                }
            }
            "bitshl" | "bitshr" | "bitashr" | "bitrol" | "bitror"
            | "bitand" | "bitor" | "bitxor" => {
                let lhs = operand_register(instruction, 1)?;
                let lhs_coord = self.check_use(
                    profile,
                    lhs,
                    &format!("{mnemonic} of empty register"),
                )?;
                let rhs = operand_register(instruction, 2)?;
                self.check_use(
                    profile,
                    rhs,
                    &format!("{mnemonic} of empty register"),
                )?;
                let result_type = profile.type_of(lhs_coord);
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, result_type);
                }
            }
            "eq" | "lt" | "gt" | "and" | "or" => {
                let lhs = operand_register(instruction, 1)?;
                self.check_use(
                    profile,
                    lhs,
                    &format!("{mnemonic} of empty register"),
                )?;
                let rhs = operand_register(instruction, 2)?;
                self.check_use(
                    profile,
                    rhs,
                    &format!("{mnemonic} of empty register"),
                )?;
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, ValueType::Boolean);
                }
            }
            "cmp" => {
                let lhs = operand_register(instruction, 1)?;
                self.check_use(profile, lhs, "cmp of empty register")?;
                let rhs = operand_register(instruction, 2)?;
                self.check_use(profile, rhs, "cmp of empty register")?;
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, ValueType::Integer);
                }
            }
            "addi" | "addiu" | "subi" | "subiu" | "muli" | "muliu"
            | "divi" | "diviu" => {
                if let Some(input) = operand_register_or_void(instruction, 1)? {
                    let coord = self.check_use(
                        profile,
                        input,
                        &format!("{mnemonic} of empty register"),
                    )?;
                    self.assert_type(profile, coord, input, ValueType::Integer)?;
                }
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, ValueType::Integer);
                }
            }
            "not" | "bitnot" => {
                let input = operand_register(instruction, 1)?;
                let coord = self.check_use(
                    profile,
                    input,
                    &format!("{mnemonic} of empty register"),
                )?;
                let produced = if mnemonic == "not" {
                    ValueType::Boolean
                } else {
                    profile.type_of(coord)
                };
                let out = operand_register(instruction, 0)?;
                let out_coord = self.resolve(profile, out)?;
                profile.define(out_coord, at, produced);
            }

            "copy" => {
                let source = operand_register(instruction, 1)?;
                let coord =
                    self.check_use(profile, source, "copy of empty register")?;
                let value_type = profile.type_of(coord);
                let out = operand_register(instruction, 0)?;
                let out_coord = self.resolve(profile, out)?;
                profile.define(out_coord, at, value_type);
            }
            "move" => {
                let source = operand_register(instruction, 1)?;
                let coord =
                    self.check_use(profile, source, "move of empty register")?;
                let value_type = profile.type_of(coord);
                // Rule 2: moving from behind a pointer dereference copies
                // instead of erasing the register holding the pointer.
                if source.sigil != Sigil::PointerDereference {
                    profile.erase(coord, source.location);
                }
                let out = operand_register(instruction, 0)?;
                let out_coord = self.resolve(profile, out)?;
                profile.define(out_coord, at, value_type);
            }
            "swap" => {
                let a = operand_register(instruction, 0)?;
                let a_coord =
                    self.check_use(profile, a, "swap of empty register")?;
                let b = operand_register(instruction, 1)?;
                let b_coord =
                    self.check_use(profile, b, "swap of empty register")?;
                let a_type = profile.type_of(a_coord);
                let b_type = profile.type_of(b_coord);
                profile.define(a_coord, at, b_type);
                profile.define(b_coord, at, a_type);
            }
            "delete" => {
                let target = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, target)?;
                if !profile.defined.contains_key(&coord) {
                    self.check_use(profile, target, "delete of empty register")?;
                }
                profile.erase(coord, target.location);
            }

            "frame" => {
                let existing: Vec<Coord> = profile
                    .defined
                    .keys()
                    .filter(|c| c.set == RegisterSet::Argument)
                    .copied()
                    .collect();
                for coord in existing {
                    profile.defined.remove(&coord);
                }
            }
            "call" | "actor" => {
                self.consume_arguments(profile);
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    let produced = if mnemonic == "actor" {
                        ValueType::Pid
                    } else {
                        ValueType::Any
                    };
                    profile.define(coord, at, produced);
                }
            }
            "tailcall" => {
                self.consume_arguments(profile);
                self.check_unused(profile)?;
                return Ok(Flow::Stop);
            }
            // A deferred call consumes the staged arguments like a call
            // does, but produces nothing and does not end the walk.
            "defer" => {
                self.consume_arguments(profile);
            }
            "return" => {
                if let Some(source) = operand_register_or_void(instruction, 0)? {
                    self.check_use(profile, source, "return of empty register")?;
                }
                self.check_unused(profile)?;
                return Ok(Flow::Stop);
            }

            "self" => {
                let out = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, out)?;
                profile.define(coord, at, ValueType::Pid);
            }
            "send" => {
                let target = operand_register(instruction, 0)?;
                let target_coord =
                    self.check_use(profile, target, "send to empty register")?;
                self.assert_type(profile, target_coord, target, ValueType::Pid)?;
                let value = operand_register(instruction, 1)?;
                let value_coord =
                    self.check_use(profile, value, "send of empty register")?;
                profile.erase(value_coord, value.location);
            }
            "receive" => {
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, ValueType::Any);
                }
            }
            "join" => {
                let source = operand_register(instruction, 1)?;
                let source_coord =
                    self.check_use(profile, source, "join of empty register")?;
                self.assert_type(profile, source_coord, source, ValueType::Pid)?;
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, ValueType::Any);
                }
            }

            "throw" => {
                let source = operand_register(instruction, 0)?;
                let coord =
                    self.check_use(profile, source, "throw from empty register")?;
                profile.erase(coord, source.location);
            }
            "draw" => {
                let out = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, out)?;
                profile.define(coord, at, ValueType::Any);
            }

            "sm" => {
                let value = operand_register(instruction, 0)?;
                self.check_use(profile, value, "sm of empty register")?;
                let base = operand_register(instruction, 1)?;
                let base_coord =
                    self.check_use(profile, base, "sm through empty register")?;
                self.assert_type(profile, base_coord, base, ValueType::Pointer)?;
            }
            "lm" => {
                let base = operand_register(instruction, 1)?;
                let base_coord =
                    self.check_use(profile, base, "lm through empty register")?;
                self.assert_type(profile, base_coord, base, ValueType::Pointer)?;
                let out = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, out)?;
                profile.define(coord, at, ValueType::Bits);
            }
            "aa" => {
                let out = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, out)?;
                profile.define(coord, at, ValueType::Pointer);
            }
            "ad" => {
                let target = operand_register(instruction, 0)?;
                let coord =
                    self.check_use(profile, target, "ad of empty register")?;
                self.assert_type(profile, coord, target, ValueType::Pointer)?;
                profile.erase(coord, target.location);
            }
            "ptr" => {
                let source = operand_register(instruction, 1)?;
                let source_coord =
                    self.check_use(profile, source, "ptr of empty register")?;
                self.assert_type(profile, source_coord, source, ValueType::Pointer)?;
                let out = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, out)?;
                profile.define(coord, at, ValueType::Pointer);
            }

            "io_submit" | "io_wait" | "io_shutdown" | "io_ctl" | "io_peek" => {
                for operand in instruction.operands.iter().skip(1) {
                    if let Operand::Register(register) = operand {
                        self.check_use(
                            profile,
                            register,
                            &format!("{mnemonic} of empty register"),
                        )?;
                    }
                }
                if let Some(out) = operand_register_or_void(instruction, 0)? {
                    let coord = self.resolve(profile, out)?;
                    profile.define(coord, at, ValueType::Any);
                }
            }

            // Rule 9: closures build their own capture profile.
            "closure" => {
                let out = operand_register(instruction, 0)?;
                let coord = self.resolve(profile, out)?;
                let Some(Operand::Function { name, .. }) =
                    instruction.operands.get(1)
                else {
                    return Err(syntax(at, "closure expects a closure name"));
                };
                profile.define(coord, at, ValueType::Closure);
                profile.closure_of.insert(coord, name.clone());
                profile.captures.entry(name.clone()).or_default();
            }
            "capture" | "capturecopy" | "capturemove" => {
                let target = operand_register(instruction, 0)?;
                let target_coord = self.check_use(
                    profile,
                    target,
                    &format!("{mnemonic} into empty register"),
                )?;
                self.assert_type(profile, target_coord, target, ValueType::Closure)?;

                let Some(Operand::Integer { value, .. }) =
                    instruction.operands.get(1)
                else {
                    return Err(syntax(at, format!("{mnemonic} expects a capture index")));
                };
                let source = operand_register(instruction, 2)?;
                let source_coord = self.check_use(
                    profile,
                    source,
                    &format!("{mnemonic} of empty register"),
                )?;
                if mnemonic == "capturemove" {
                    profile.erase(source_coord, source.location);
                }
                let closure_name =
                    profile.closure_of.get(&target_coord).cloned();
                if let Some(name) = closure_name {
                    profile
                        .captures
                        .entry(name)
                        .or_default()
                        .insert(*value as u8);
                }
            }

            "jump" => {
                let target = instruction
                    .operands
                    .first()
                    .ok_or_else(|| syntax(at, "jump expects a target"))?;
                match self.jump_ordinal(map, ordinal, target)? {
                    // Backward or absolute: accepted without analysis.
                    None => return Ok(Flow::Stop),
                    Some(target_ordinal) => {
                        let forked = self.walk(
                            body,
                            map,
                            target_ordinal,
                            profile.clone(),
                        )?;
                        *profile = forked;
                        return Ok(Flow::Stop);
                    }
                }
            }

            // Rule 5: `if` forks the analysis per branch; an UnusedValue
            // raised by one branch is an error only when the other branch
            // raises it for the same register.
            "if" => {
                if instruction.operands.len() < 3 {
                    return Err(syntax(
                        at,
                        "if expects a condition and two branch targets",
                    ));
                }
                let condition = operand_register(instruction, 0)?;
                self.check_use(
                    profile,
                    condition,
                    "branch depends on empty register",
                )?;

                let mut unused_in_true_branch: Option<Coord> = None;

                let true_target = &instruction.operands[1];
                if let Some(target) =
                    self.jump_ordinal(map, ordinal, true_target)?
                {
                    let mut forked = profile.clone();
                    forked.defresh();
                    match self.walk(body, map, target, forked) {
                        Ok(_) => {}
                        // A value defined inside the branch cannot be used
                        // by the sibling; report it outright.
                        Err(Failure::Unused {
                            fresh: true, error, ..
                        }) => {
                            return Err(Failure::Other(error.aside_at(
                                true_target.location(),
                                "after taking the true branch here",
                            )));
                        }
                        Err(Failure::Unused { register, .. }) => {
                            unused_in_true_branch = Some(register);
                        }
                        Err(Failure::Other(error)) => {
                            return Err(Failure::Other(error.aside_at(
                                true_target.location(),
                                "after taking the true branch here",
                            )));
                        }
                    }
                }

                let false_target = &instruction.operands[2];
                if let Some(target) =
                    self.jump_ordinal(map, ordinal, false_target)?
                {
                    let mut forked = profile.clone();
                    forked.defresh();
                    match self.walk(body, map, target, forked) {
                        Ok(_) => {}
                        Err(Failure::Unused {
                            fresh: true, error, ..
                        }) => {
                            return Err(Failure::Other(error.aside_at(
                                false_target.location(),
                                "after taking the false branch here",
                            )));
                        }
                        Err(Failure::Unused { register, fresh, error })
                            if Some(register) == unused_in_true_branch =>
                        {
                            return Err(Failure::Unused {
                                register,
                                fresh,
                                error: error.aside_at(
                                    condition.location,
                                    "after taking either branch at",
                                ),
                            });
                        }
                        // A different register: each branch consumes at
                        // least one of the values, so neither report
                        // stands.
                        Err(Failure::Unused { .. }) => {}
                        Err(Failure::Other(error)) => {
                            return Err(Failure::Other(error.aside_at(
                                false_target.location(),
                                "after taking the false branch here",
                            )));
                        }
                    }
                }

                return Ok(Flow::Stop);
            }

            // Rule 6: blocks are analysed as subroutines over the live
            // profile, and the function resumes with the result.
            "enter" => {
                let Some(Operand::Function { name, location }) =
                    instruction.operands.first()
                else {
                    return Err(syntax(at, "enter expects a block name"));
                };
                let block =
                    *self.blocks.get(name.as_str()).ok_or_else(|| {
                        analysis(
                            *location,
                            format!("enter of an unknown block: {name}"),
                        )
                    })?;
                let block_map = BodyMap::of(block);
                let mut entered = profile.clone();
                entered.defresh();
                let returned = self.walk(block, &block_map, 0, entered)?;
                *profile = returned;
            }

            other => {
                return Err(syntax(
                    at,
                    format!("unknown instruction: {other}"),
                ));
            }
        }

        Ok(Flow::Continue)
    }

    fn consume_arguments(&self, profile: &mut RegisterUsageProfile) {
        let arguments: Vec<Coord> = profile
            .defined
            .keys()
            .filter(|c| c.set == RegisterSet::Argument)
            .copied()
            .collect();
        for coord in arguments {
            profile.used.insert(coord);
            profile.defined.remove(&coord);
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

fn arity_of(name: &str) -> usize {
    name.rsplit('/')
        .next()
        .and_then(|arity| arity.parse().ok())
        .unwrap_or(0)
}

/// Verify register usage across every function and closure of a unit.
pub fn verify(unit: &SourceUnit) -> Result<(), CompileError> {
    let blocks: HashMap<&str, &Body> = unit
        .bodies
        .iter()
        .filter(|b| b.kind == BodyKind::Block)
        .map(|b| (b.name.as_str(), b))
        .collect();

    let mut captures_by_closure: HashMap<String, HashSet<u8>> = HashMap::new();

    // Functions first: they are where closures get built, so their
    // analysis feeds the capture sets the closure bodies are checked
    // against.
    let functions = unit.bodies.iter().filter(|b| b.kind == BodyKind::Function);
    let closures = unit.bodies.iter().filter(|b| b.kind == BodyKind::Closure);

    for body in functions.chain(closures) {

        let mut profile = RegisterUsageProfile::default();

        // Received parameters are defined on entry; whether the function
        // reads them is its own business.
        for index in 0..arity_of(&body.name) {
            let coord = Coord {
                set: RegisterSet::Parameter,
                index: index as u8,
            };
            profile.define(coord, body.location, ValueType::Any);
            profile.maybe_unused.insert(coord);
        }

        // A closure body sees its captured registers as defined.
        if body.kind == BodyKind::Closure {
            for index in
                captures_by_closure.get(&body.name).into_iter().flatten()
            {
                let coord = Coord {
                    set: RegisterSet::ClosureLocal,
                    index: *index,
                };
                profile.define(coord, body.location, ValueType::Any);
                profile.maybe_unused.insert(coord);
            }
        }

        let mut analyser = Analyser { blocks: blocks.clone(), depth: 0 };
        let map = BodyMap::of(body);
        let done = analyser
            .walk(body, &map, 0, profile)
            .map_err(CompileError::from)?;

        for (name, captured) in &done.captures {
            captures_by_closure
                .entry(name.clone())
                .or_default()
                .extend(captured.iter().copied());
        }
    }

    Ok(())
}
