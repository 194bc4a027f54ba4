//! Loaded bytecode modules.

use std::collections::HashMap;

use viua_asm::{RawInstruction, INSTRUCTION_SIZE};

use crate::error::Fault;

/// A single entry of the function table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    /// Arity-suffixed name, e.g. `main/0`.
    pub name: String,
    /// Byte offset of the function's first instruction inside `.text`.
    pub entry: u64,
}

/// The function table: names to entry offsets, addressable by the byte
/// offset of the entry inside the encoded table.
///
/// Instructions refer to functions by that table offset (loaded into a
/// register with the LI sequence), so both directions of the mapping are
/// kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionTable {
    entries: Vec<FunctionEntry>,
    by_offset: HashMap<u64, usize>,
    by_name: HashMap<String, u64>,
    encoded_size: u64,
}

impl FunctionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its table offset.
    pub fn push(&mut self, name: impl Into<String>, entry: u64) -> u64 {
        let name = name.into();
        let offset = self.encoded_size;
        // name, NUL, u64 entry offset
        self.encoded_size += name.len() as u64 + 1 + 8;
        self.by_offset.insert(offset, self.entries.len());
        self.by_name.insert(name.clone(), offset);
        self.entries.push(FunctionEntry { name, entry });
        offset
    }

    /// Entry at a table offset, as instructions address it.
    pub fn at_offset(&self, offset: u64) -> Option<&FunctionEntry> {
        self.by_offset.get(&offset).map(|i| &self.entries[*i])
    }

    /// Update the entry offset of a named function, once the layout of
    /// `.text` is known. Returns false when the name is not in the table.
    pub fn set_entry(&mut self, name: &str, entry: u64) -> bool {
        match self.by_name.get(name) {
            Some(offset) => {
                let index = self.by_offset[offset];
                self.entries[index].entry = entry;
                true
            }
            None => false,
        }
    }

    /// Table offset of a named function.
    pub fn offset_of(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    /// Entry of a named function.
    pub fn find(&self, name: &str) -> Option<&FunctionEntry> {
        self.offset_of(name).and_then(|o| self.at_offset(o))
    }

    /// All entries, in table order.
    pub fn entries(&self) -> &[FunctionEntry] {
        &self.entries
    }

    /// Size of the encoded table, in bytes.
    pub fn encoded_size(&self) -> u64 {
        self.encoded_size
    }

    /// Serialise into the on-disk representation: `name NUL entry:u64` per
    /// entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        for each in &self.entries {
            raw.extend_from_slice(each.name.as_bytes());
            raw.push(0);
            raw.extend_from_slice(&each.entry.to_le_bytes());
        }
        raw
    }

    /// Parse the on-disk representation.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, LoadError> {
        let mut table = Self::new();
        let mut i = 0;
        while i < raw.len() {
            let nul = raw[i..]
                .iter()
                .position(|b| *b == 0)
                .ok_or(LoadError::MalformedFunctionTable)?;
            let name = std::str::from_utf8(&raw[i..i + nul])
                .map_err(|_| LoadError::MalformedFunctionTable)?;
            let at = i + nul + 1;
            let entry = raw
                .get(at..at + 8)
                .ok_or(LoadError::MalformedFunctionTable)?;
            table.push(name, u64::from_le_bytes(entry.try_into().unwrap()));
            i = at + 8;
        }
        Ok(table)
    }
}

/// The string table: a bytes blob carrying all string, float, and bit
/// literal payloads. Each datum is stored as `size:u64` followed by the
/// bytes; instructions hold the offset of the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Strtab {
    raw: Vec<u8>,
}

impl Strtab {
    /// An empty string table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-encoded blob.
    pub fn from_bytes(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// Append a datum, returning the offset instructions should carry.
    pub fn push(&mut self, data: &[u8]) -> u64 {
        self.raw.extend_from_slice(&(data.len() as u64).to_le_bytes());
        let offset = self.raw.len() as u64;
        self.raw.extend_from_slice(data);
        offset
    }

    /// The datum at an offset produced by [`Strtab::push`].
    pub fn at(&self, offset: u64) -> Result<&[u8], Fault> {
        let offset = offset as usize;
        if offset < 8 || offset > self.raw.len() {
            return Err(Fault::InvalidStrtabOffset(offset as u64));
        }
        let size = u64::from_le_bytes(
            self.raw[offset - 8..offset].try_into().unwrap(),
        ) as usize;
        self.raw
            .get(offset..offset + size)
            .ok_or(Fault::InvalidStrtabOffset(offset as u64))
    }

    /// The raw encoded blob.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// A loaded module: code plus its symbol and data tables.
///
/// Modules are shared immutable between processes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    /// The instruction array.
    pub text: Vec<RawInstruction>,
    /// String table.
    pub strtab: Strtab,
    /// Function table.
    pub functions: FunctionTable,
    /// Block table, same layout as the function table.
    pub blocks: FunctionTable,
    /// Names of symbols this module expects other modules to provide.
    pub signatures: Vec<String>,
    /// Free-form key/value metadata.
    pub metadata: Vec<(String, String)>,
}

impl Module {
    /// Resolve a function table offset into a name and an instruction index
    /// into `.text`.
    pub fn function_at(&self, offset: u64) -> Result<(&str, usize), Fault> {
        let entry = self
            .functions
            .at_offset(offset)
            .ok_or(Fault::InvalidFunctionOffset(offset))?;
        if entry.entry % INSTRUCTION_SIZE as u64 != 0 {
            return Err(Fault::InvalidFunctionOffset(offset));
        }
        Ok((
            entry.name.as_str(),
            (entry.entry / INSTRUCTION_SIZE as u64) as usize,
        ))
    }

}

/// Failure modes of module loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The container is not an ELF file of the expected shape.
    #[error("not a Viua module: {0}")]
    NotAViuaModule(&'static str),
    /// The container is truncated.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// The function (or block) table bytes do not parse.
    #[error("malformed function table")]
    MalformedFunctionTable,
    /// A section required by the interpreter is missing.
    #[error("missing section: {0}")]
    MissingSection(&'static str),
}
