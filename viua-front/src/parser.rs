//! Token stream to fragment tree.

use viua_asm::{Opcode, RegisterSet};

use crate::{
    error::{did_you_mean, CompileError, Location},
    lexer::Token,
};

/// Access mode sigil of a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    /// `%`: the value in the register.
    Direct,
    /// `@`: the register whose index is in the register.
    RegisterIndirect,
    /// `*`: the value behind the pointer in the register.
    PointerDereference,
}

/// A register named by index or by a `.name:`d alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterAddress {
    /// Numeric index.
    Index(u8),
    /// Symbolic name, resolved by the static analyser.
    Name(String),
}

/// A register operand, e.g. `%1 local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOperand {
    /// Where the operand appears.
    pub location: Location,
    /// Access mode.
    pub sigil: Sigil,
    /// Index or name.
    pub address: RegisterAddress,
    /// Register set.
    pub set: RegisterSet,
}

impl RegisterOperand {
    /// Render the operand roughly as written, for diagnostics.
    pub fn to_text(&self) -> String {
        let sigil = match self.sigil {
            Sigil::Direct => '%',
            Sigil::RegisterIndirect => '@',
            Sigil::PointerDereference => '*',
        };
        match &self.address {
            RegisterAddress::Index(i) => {
                format!("{sigil}{i} {}", self.set.name())
            }
            RegisterAddress::Name(name) => {
                format!("{sigil}{name} {}", self.set.name())
            }
        }
    }
}

/// Where a jump goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpTarget {
    /// `+N`: N instructions forward.
    Forward(usize),
    /// `-N`: N instructions backward.
    Backward(usize),
    /// A `.mark:`ed label.
    Label(String),
    /// `0x...`: an absolute byte address, as found in disassembler output.
    Absolute(u64),
}

/// One parsed operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A register access.
    Register(RegisterOperand),
    /// The void operand.
    Void {
        /// Where the operand appears.
        location: Location,
    },
    /// A signed integer literal.
    Integer {
        /// Where the operand appears.
        location: Location,
        /// The value.
        value: i64,
    },
    /// A floating point literal.
    Float {
        /// Where the operand appears.
        location: Location,
        /// The value.
        value: f64,
    },
    /// A quoted text literal, unescaped.
    Text {
        /// Where the operand appears.
        location: Location,
        /// The value.
        value: String,
    },
    /// A single-quoted atom literal.
    Atom {
        /// Where the operand appears.
        location: Location,
        /// The value, without quotes.
        value: String,
    },
    /// A `0b`/`0o`/`0x` bit-string literal.
    Bits {
        /// Where the operand appears.
        location: Location,
        /// The bit pattern.
        value: u64,
    },
    /// `true` or `false`.
    Bool {
        /// Where the operand appears.
        location: Location,
        /// The value.
        value: bool,
    },
    /// A receive timeout.
    Timeout {
        /// Where the operand appears.
        location: Location,
        /// Milliseconds; `None` is infinity.
        milliseconds: Option<u32>,
    },
    /// A jump target.
    Target {
        /// Where the operand appears.
        location: Location,
        /// The target.
        target: JumpTarget,
    },
    /// An arity-suffixed function (or block) name.
    Function {
        /// Where the operand appears.
        location: Location,
        /// The name, e.g. `main/0`.
        name: String,
    },
}

impl Operand {
    /// Location of any operand.
    pub fn location(&self) -> Location {
        match self {
            Operand::Register(r) => r.location,
            Operand::Void { location }
            | Operand::Integer { location, .. }
            | Operand::Float { location, .. }
            | Operand::Text { location, .. }
            | Operand::Atom { location, .. }
            | Operand::Bits { location, .. }
            | Operand::Bool { location, .. }
            | Operand::Timeout { location, .. }
            | Operand::Target { location, .. }
            | Operand::Function { location, .. } => *location,
        }
    }
}

/// A single parsed instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionNode {
    /// Location of the mnemonic.
    pub location: Location,
    /// The mnemonic, canonical lowercase.
    pub mnemonic: String,
    /// Operands in source order.
    pub operands: Vec<Operand>,
}

/// One fragment of a function, closure, or block body.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// An instruction.
    Instruction(InstructionNode),
    /// `.name: <index> <name>`.
    Name {
        /// Location of the directive.
        location: Location,
        /// Register index being named.
        index: u8,
        /// The alias.
        name: String,
    },
    /// `.mark: <label>`.
    Mark {
        /// Location of the directive.
        location: Location,
        /// The label.
        label: String,
    },
    /// `.unused: <register>` — suppresses the unused-value check.
    Unused {
        /// Location of the directive.
        location: Location,
        /// The register, as written (index or name, no sigil).
        register: String,
    },
}

/// What kind of body a definition introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `.function:`
    Function,
    /// `.closure:`
    Closure,
    /// `.block:`
    Block,
}

/// A function, closure, or block definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// What the definition introduces.
    pub kind: BodyKind,
    /// Location of the head directive.
    pub location: Location,
    /// Attributes from the `[[ ... ]]` list.
    pub attributes: Vec<String>,
    /// Arity-suffixed name.
    pub name: String,
    /// Fragments in source order.
    pub fragments: Vec<Fragment>,
}

/// A whole parsed source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceUnit {
    /// Function, closure, and block definitions, in source order.
    pub bodies: Vec<Body>,
    /// `.import:`ed module names.
    pub imports: Vec<String>,
    /// `.extern_function:` declarations.
    pub extern_functions: Vec<String>,
    /// `.extern_block:` declarations.
    pub extern_blocks: Vec<String>,
    /// `.info:` key/value metadata.
    pub info: Vec<(String, String)>,
}

/// Mnemonics that are assembler-level only, lowered by the code generator.
const PSEUDO_MNEMONICS: &[&str] = &[
    "integer",
    "izero",
    "bits",
    "jump",
    "if",
    "enter",
    "closure",
    "capture",
    "capturecopy",
    "capturemove",
];

fn known_mnemonics() -> impl Iterator<Item = &'static str> {
    use strum::IntoEnumIterator;
    Opcode::iter()
        .map(|op| op.mnemonic())
        .chain(PSEUDO_MNEMONICS.iter().copied())
}

fn is_known_mnemonic(text: &str) -> bool {
    Opcode::from_mnemonic(text).is_some()
        || PSEUDO_MNEMONICS.contains(&text)
}

fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn parse_register_set(token: &Token) -> Result<RegisterSet, CompileError> {
    match token.text.as_str() {
        "local" => Ok(RegisterSet::Local),
        "static" => Ok(RegisterSet::Static),
        "global" => Ok(RegisterSet::Global),
        "arguments" => Ok(RegisterSet::Argument),
        "parameters" => Ok(RegisterSet::Parameter),
        "closure_local" => Ok(RegisterSet::ClosureLocal),
        other => Err(CompileError::syntax(
            token.location,
            format!("not a register set: {other}"),
        )),
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.at)?;
        self.at += 1;
        Some(token)
    }

    fn expect(&mut self, text: &str) -> Result<&'a Token, CompileError> {
        match self.next() {
            Some(token) if token.is(text) => Ok(token),
            Some(token) => Err(CompileError::syntax(
                token.location,
                format!("expected {:?}, got {:?}", text, token.text),
            )),
            None => Err(CompileError::syntax(
                Location::default(),
                format!("expected {text:?}, got end of input"),
            )),
        }
    }

    fn line(&mut self) -> Vec<&'a Token> {
        let mut line = Vec::new();
        while let Some(token) = self.next() {
            if token.is_newline() {
                break;
            }
            line.push(token);
        }
        line
    }
}

fn parse_operand(
    tokens: &[&Token],
    at: &mut usize,
    mnemonic: &str,
) -> Result<Operand, CompileError> {
    let token = tokens[*at];
    let location = token.location;
    *at += 1;

    let text = token.text.as_str();
    if text.starts_with(['%', '@', '*']) {
        let sigil = match text.chars().next().unwrap() {
            '%' => Sigil::Direct,
            '@' => Sigil::RegisterIndirect,
            _ => Sigil::PointerDereference,
        };
        let set = match tokens.get(*at) {
            Some(rs) => {
                *at += 1;
                parse_register_set(rs)?
            }
            None => {
                return Err(CompileError::syntax(
                    location,
                    "register access is missing its register set",
                ))
            }
        };
        let bare = token.without_sigil();
        let address = match bare.parse::<u8>() {
            Ok(index) => RegisterAddress::Index(index),
            Err(_) if bare.chars().all(|c| c.is_ascii_digit()) => {
                return Err(CompileError::syntax(
                    location,
                    format!("register index out of range: {bare}"),
                ))
            }
            Err(_) => RegisterAddress::Name(bare.to_owned()),
        };
        return Ok(Operand::Register(RegisterOperand {
            location,
            sigil,
            address,
            set,
        }));
    }

    if text == "void" {
        return Ok(Operand::Void { location });
    }
    if text == "true" || text == "false" {
        return Ok(Operand::Bool {
            location,
            value: text == "true",
        });
    }
    if text.starts_with('"') {
        return Ok(Operand::Text {
            location,
            value: unescape(text),
        });
    }
    if text.starts_with('\'') {
        return Ok(Operand::Atom {
            location,
            value: unescape(text),
        });
    }

    // Receive timeouts.
    if matches!(mnemonic, "receive") && *at == tokens.len() {
        if text == "infinity" {
            return Ok(Operand::Timeout {
                location,
                milliseconds: None,
            });
        }
        if let Some(digits) = text.strip_suffix("ms") {
            if let Ok(value) = digits.parse::<u32>() {
                return Ok(Operand::Timeout {
                    location,
                    milliseconds: Some(value),
                });
            }
        }
        if let Some(digits) = text.strip_suffix('s') {
            if let Ok(value) = digits.parse::<u32>() {
                return Ok(Operand::Timeout {
                    location,
                    milliseconds: Some(value.saturating_mul(1000)),
                });
            }
        }
    }

    // Jump targets.
    if matches!(mnemonic, "jump" | "if") {
        if let Some(count) = text.strip_prefix('+') {
            if let Ok(count) = count.parse::<usize>() {
                return Ok(Operand::Target {
                    location,
                    target: JumpTarget::Forward(count),
                });
            }
        }
        if let Some(count) = text.strip_prefix('-') {
            if let Ok(count) = count.parse::<usize>() {
                return Ok(Operand::Target {
                    location,
                    target: JumpTarget::Backward(count),
                });
            }
        }
        if let Some(hex) = text.strip_prefix("0x") {
            if let Ok(address) = u64::from_str_radix(hex, 16) {
                return Ok(Operand::Target {
                    location,
                    target: JumpTarget::Absolute(address),
                });
            }
        }
        if !text.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
            return Ok(Operand::Target {
                location,
                target: JumpTarget::Label(text.to_owned()),
            });
        }
    }

    // Bit strings.
    for (prefix, radix) in [("0b", 2), ("0o", 8), ("0x", 16)] {
        if let Some(digits) = text.strip_prefix(prefix) {
            let value = u64::from_str_radix(digits, radix).map_err(|_| {
                CompileError::syntax(
                    location,
                    format!("invalid bit string: {text}"),
                )
            })?;
            return Ok(Operand::Bits { location, value });
        }
    }

    // Numbers.
    if text.contains('.') && text.parse::<f64>().is_ok() {
        return Ok(Operand::Float {
            location,
            value: text.parse().unwrap(),
        });
    }
    if let Ok(value) = text.parse::<i64>() {
        return Ok(Operand::Integer { location, value });
    }

    // Anything else is a symbol: a function or block name.
    Ok(Operand::Function {
        location,
        name: text.to_owned(),
    })
}

fn parse_instruction(line: &[&Token]) -> Result<InstructionNode, CompileError> {
    let mnemonic = line[0];
    if !is_known_mnemonic(&mnemonic.text) {
        let mut error = CompileError::syntax(
            mnemonic.location,
            format!("unknown instruction: {}", mnemonic.text),
        );
        if let Some(suggestion) =
            did_you_mean(&mnemonic.text, known_mnemonics())
        {
            error = error.aside(format!("did you mean {suggestion:?}?"));
        }
        return Err(error);
    }

    let mut operands = Vec::new();
    let mut at = 1;
    while at < line.len() {
        operands.push(parse_operand(line, &mut at, &mnemonic.text)?);
    }

    // A one-target `if` falls through when the condition is false.
    if mnemonic.is("if") && operands.len() == 2 {
        operands.push(Operand::Target {
            location: mnemonic.location,
            target: JumpTarget::Forward(1),
        });
    }

    Ok(InstructionNode {
        location: mnemonic.location,
        mnemonic: mnemonic.text.clone(),
        operands,
    })
}

fn parse_body(
    cursor: &mut Cursor<'_>,
    kind: BodyKind,
    head: &Token,
) -> Result<Body, CompileError> {
    cursor.expect("[[")?;
    let mut attributes = Vec::new();
    loop {
        match cursor.next() {
            Some(token) if token.is("]]") => break,
            Some(token) => attributes.push(token.text.clone()),
            None => {
                return Err(CompileError::syntax(
                    head.location,
                    "unterminated attribute list",
                ))
            }
        }
    }
    let name = cursor
        .next()
        .filter(|t| !t.is_newline())
        .ok_or_else(|| {
            CompileError::syntax(head.location, "definition is missing a name")
        })?;
    let body_name = name.text.clone();
    if kind != BodyKind::Block && !body_name.contains('/') {
        return Err(CompileError::syntax(
            name.location,
            format!("function name must carry an arity: {body_name}"),
        ));
    }
    cursor.expect("\n")?;

    let mut fragments = Vec::new();
    loop {
        let Some(first) = cursor.peek() else {
            return Err(CompileError::syntax(
                head.location,
                format!("missing .end of {body_name}"),
            ));
        };
        if first.is_newline() {
            cursor.next();
            continue;
        }
        if first.is(".end") {
            cursor.next();
            break;
        }

        let location = first.location;
        let line = cursor.line();
        match line[0].text.as_str() {
            ".name:" => {
                let [index, alias] = &line[1..] else {
                    return Err(CompileError::syntax(
                        location,
                        ".name: expects an index and a name",
                    ));
                };
                let index =
                    index.without_sigil().parse::<u8>().map_err(|_| {
                        CompileError::syntax(
                            index.location,
                            format!(
                                "not a register index: {}",
                                index.text
                            ),
                        )
                    })?;
                fragments.push(Fragment::Name {
                    location,
                    index,
                    name: alias.text.clone(),
                });
            }
            ".mark:" => {
                let [label] = &line[1..] else {
                    return Err(CompileError::syntax(
                        location,
                        ".mark: expects a label",
                    ));
                };
                fragments.push(Fragment::Mark {
                    location,
                    label: label.text.clone(),
                });
            }
            ".unused:" => {
                let [register, ..] = &line[1..] else {
                    return Err(CompileError::syntax(
                        location,
                        ".unused: expects a register",
                    ));
                };
                fragments.push(Fragment::Unused {
                    location,
                    register: register.without_sigil().to_owned(),
                });
            }
            text if text.starts_with('.') => {
                return Err(CompileError::syntax(
                    location,
                    format!("unexpected directive inside a body: {text}"),
                ));
            }
            _ => {
                fragments.push(Fragment::Instruction(parse_instruction(
                    &line,
                )?));
            }
        }
    }

    Ok(Body {
        kind,
        location: head.location,
        attributes,
        name: body_name,
        fragments,
    })
}

/// Parse a normalised token stream into a source unit.
pub fn parse(tokens: &[Token]) -> Result<SourceUnit, CompileError> {
    let mut cursor = Cursor { tokens, at: 0 };
    let mut unit = SourceUnit::default();

    while let Some(token) = cursor.next() {
        if token.is_newline() {
            continue;
        }
        match token.text.as_str() {
            ".function:" => {
                let body = parse_body(&mut cursor, BodyKind::Function, token)?;
                unit.bodies.push(body);
            }
            ".closure:" => {
                let body = parse_body(&mut cursor, BodyKind::Closure, token)?;
                unit.bodies.push(body);
            }
            ".block:" => {
                let body = parse_body(&mut cursor, BodyKind::Block, token)?;
                unit.bodies.push(body);
            }
            ".import:" => {
                let line = cursor.line();
                match line.as_slice() {
                    [name] => unit.imports.push(name.text.clone()),
                    _ => {
                        return Err(CompileError::syntax(
                            token.location,
                            ".import: expects a module name",
                        ))
                    }
                }
            }
            ".extern_function:" => {
                let line = cursor.line();
                match line.as_slice() {
                    [name] => {
                        unit.extern_functions.push(name.text.clone())
                    }
                    _ => {
                        return Err(CompileError::syntax(
                            token.location,
                            ".extern_function: expects a name",
                        ))
                    }
                }
            }
            ".extern_block:" => {
                let line = cursor.line();
                match line.as_slice() {
                    [name] => unit.extern_blocks.push(name.text.clone()),
                    _ => {
                        return Err(CompileError::syntax(
                            token.location,
                            ".extern_block: expects a name",
                        ))
                    }
                }
            }
            ".info:" => {
                let line = cursor.line();
                match line.as_slice() {
                    [key, value] => unit.info.push((
                        key.text.clone(),
                        value.text.trim_matches('"').to_owned(),
                    )),
                    _ => {
                        return Err(CompileError::syntax(
                            token.location,
                            ".info: expects a key and a value",
                        ))
                    }
                }
            }
            other => {
                let mut error = CompileError::syntax(
                    token.location,
                    format!("unexpected top-level token: {other}"),
                );
                let directives = [
                    ".function:",
                    ".closure:",
                    ".block:",
                    ".import:",
                    ".extern_function:",
                    ".extern_block:",
                    ".info:",
                ];
                if let Some(suggestion) = did_you_mean(other, directives) {
                    error =
                        error.aside(format!("did you mean {suggestion:?}?"));
                }
                return Err(error);
            }
        }
    }

    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::lex, normaliser::normalise};

    fn parsed(source: &str) -> SourceUnit {
        parse(&normalise(lex(source).unwrap()).unwrap()).unwrap()
    }

    #[test]
    fn parses_a_whole_function() {
        let unit = parsed(
            ".function: [[entry]] main/0\n\
             \x20 allocate_registers %4 local\n\
             \x20 integer %1 local 42\n\
             \x20 izero %0 local\n\
             \x20 return\n\
             .end\n",
        );
        assert_eq!(unit.bodies.len(), 1);
        let main = &unit.bodies[0];
        assert_eq!(main.kind, BodyKind::Function);
        assert_eq!(main.name, "main/0");
        assert_eq!(main.attributes, vec!["entry"]);
        assert_eq!(main.fragments.len(), 4);

        let Fragment::Instruction(integer) = &main.fragments[1] else {
            panic!("expected an instruction");
        };
        assert_eq!(integer.mnemonic, "integer");
        assert_eq!(
            integer.operands[1],
            Operand::Integer {
                location: integer.operands[1].location(),
                value: 42
            }
        );
    }

    #[test]
    fn unknown_mnemonics_get_a_suggestion() {
        let source = ".function: main/0\n  intger %1 local 42\n.end\n";
        let error =
            parse(&normalise(lex(source).unwrap()).unwrap()).unwrap_err();
        assert!(error.message.contains("unknown instruction"));
        assert!(error.asides[0].message.contains("integer"));
    }

    #[test]
    fn named_registers_and_marks_parse_into_fragments() {
        let unit = parsed(
            ".function: f/0\n\
             \x20 .name: 1 counter\n\
             \x20 .mark: loop\n\
             \x20 izero %counter local\n\
             \x20 jump loop\n\
             .end\n",
        );
        let body = &unit.bodies[0];
        assert!(matches!(
            body.fragments[0],
            Fragment::Name { index: 1, .. }
        ));
        assert!(
            matches!(&body.fragments[1], Fragment::Mark { label, .. } if label == "loop")
        );
        let Fragment::Instruction(jump) = &body.fragments[3] else {
            panic!("expected an instruction");
        };
        assert_eq!(
            jump.operands[0],
            Operand::Target {
                location: jump.operands[0].location(),
                target: JumpTarget::Label("loop".into())
            }
        );
    }

    #[test]
    fn if_with_one_target_falls_through() {
        let unit = parsed(
            ".function: f/0\n  if %1 local +2\n  izero %0 local\n.end\n",
        );
        let Fragment::Instruction(branch) = &unit.bodies[0].fragments[0]
        else {
            panic!("expected an instruction");
        };
        assert_eq!(branch.operands.len(), 3);
        assert_eq!(
            branch.operands[2],
            Operand::Target {
                location: branch.operands[2].location(),
                target: JumpTarget::Forward(1)
            }
        );
    }

    #[test]
    fn extern_declarations_and_info() {
        let unit = parsed(
            ".info: version \"0.1.0\"\n\
             .extern_function: print/1\n\
             .import: std_io\n",
        );
        assert_eq!(unit.extern_functions, vec!["print/1"]);
        assert_eq!(unit.imports, vec!["std_io"]);
        assert_eq!(unit.info, vec![("version".into(), "0.1.0".into())]);
    }
}
