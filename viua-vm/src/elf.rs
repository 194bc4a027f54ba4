//! The ELF64 envelope modules are shipped in.
//!
//! The container is a host-standalone ELF executable: class 64,
//! little-endian, OSABI standalone, type EXEC, machine none. Exactly three
//! program headers are present: a PT_NULL whose `p_offset` field carries the
//! 8-byte VM magic, a PT_INTERP naming the interpreter, and a PT_LOAD
//! covering `.text`. The interpreter's tables ride in `.viua.*` sections.

use crate::module::{FunctionTable, LoadError, Module, Strtab};
use viua_asm::{RawInstruction, INSTRUCTION_SIZE};

/// The VM magic carried in the PT_NULL program header's `p_offset`.
pub const VIUA_MAGIC: [u8; 8] = *b"\x7fVIUA\0\0\0";

/// Default interpreter path recorded in PT_INTERP.
pub const DEFAULT_INTERPRETER: &str = "/usr/bin/viua-vm";

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;

const PT_LOAD: u32 = 1;
const PT_INTERP: u32 = 3;
const PT_NULL: u32 = 0;

const PF_X: u32 = 1;
const PF_R: u32 = 4;

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;

const ET_EXEC: u16 = 2;
const EM_NONE: u16 = 0;
const ELFOSABI_STANDALONE: u8 = 255;

struct Section {
    name: &'static str,
    kind: u32,
    data: Vec<u8>,
}

fn encode_strings(strings: &[String]) -> Vec<u8> {
    let mut raw = Vec::new();
    for each in strings {
        raw.extend_from_slice(each.as_bytes());
        raw.push(0);
    }
    raw
}

fn decode_strings(raw: &[u8]) -> Result<Vec<String>, LoadError> {
    raw.split(|b| *b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            std::str::from_utf8(chunk)
                .map(str::to_owned)
                .map_err(|_| LoadError::NotAViuaModule("non-UTF-8 symbol name"))
        })
        .collect()
}

fn encode_metadata(metadata: &[(String, String)]) -> Vec<u8> {
    let mut raw = Vec::new();
    for (key, value) in metadata {
        raw.extend_from_slice(key.as_bytes());
        raw.push(0);
        raw.extend_from_slice(value.as_bytes());
        raw.push(0);
    }
    raw
}

fn decode_metadata(raw: &[u8]) -> Result<Vec<(String, String)>, LoadError> {
    let strings = decode_strings(raw)?;
    Ok(strings
        .chunks(2)
        .filter(|pair| pair.len() == 2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

/// Serialise a module into its ELF envelope.
pub fn store(module: &Module) -> Vec<u8> {
    let interp = {
        let mut raw = DEFAULT_INTERPRETER.as_bytes().to_vec();
        raw.push(0);
        raw
    };
    let text: Vec<u8> = module
        .text
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();

    let sections = [
        Section {
            name: ".interp",
            kind: SHT_PROGBITS,
            data: interp,
        },
        Section {
            name: ".text",
            kind: SHT_PROGBITS,
            data: text,
        },
        Section {
            name: ".viua.strtab",
            kind: SHT_PROGBITS,
            data: module.strtab.as_bytes().to_vec(),
        },
        Section {
            name: ".viua.fns",
            kind: SHT_PROGBITS,
            data: module.functions.to_bytes(),
        },
        Section {
            name: ".viua.blocks",
            kind: SHT_PROGBITS,
            data: module.blocks.to_bytes(),
        },
        Section {
            name: ".viua.sigs",
            kind: SHT_PROGBITS,
            data: encode_strings(&module.signatures),
        },
        Section {
            name: ".viua.meta",
            kind: SHT_PROGBITS,
            data: encode_metadata(&module.metadata),
        },
    ];

    // Section name string table, with the leading NUL of the null section.
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for each in &sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(each.name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");

    // Lay file contents out: header, program headers, then each section's
    // data aligned to 8 bytes, then section headers.
    let mut offsets = Vec::new();
    let mut cursor = EHDR_SIZE + 3 * PHDR_SIZE;
    for each in &sections {
        cursor = (cursor + 7) & !7;
        offsets.push(cursor);
        cursor += each.data.len();
    }
    cursor = (cursor + 7) & !7;
    let shstrtab_offset = cursor;
    cursor += shstrtab.len();
    cursor = (cursor + 7) & !7;
    let shoff = cursor;

    let interp_offset = offsets[0];
    let interp_size = sections[0].data.len();
    let text_offset = offsets[1];
    let text_size = sections[1].data.len();

    let mut raw = Vec::with_capacity(shoff + (sections.len() + 2) * SHDR_SIZE);

    // ELF header.
    raw.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, ELFOSABI_STANDALONE]);
    raw.extend_from_slice(&[0u8; 8]);
    raw.extend_from_slice(&ET_EXEC.to_le_bytes());
    raw.extend_from_slice(&EM_NONE.to_le_bytes());
    raw.extend_from_slice(&1u32.to_le_bytes()); // e_version
    raw.extend_from_slice(&(text_offset as u64).to_le_bytes()); // e_entry
    raw.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes()); // e_phoff
    raw.extend_from_slice(&(shoff as u64).to_le_bytes()); // e_shoff
    raw.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    raw.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    raw.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    raw.extend_from_slice(&3u16.to_le_bytes()); // e_phnum
    raw.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
    raw.extend_from_slice(&((sections.len() + 2) as u16).to_le_bytes()); // e_shnum
    raw.extend_from_slice(&((sections.len() + 1) as u16).to_le_bytes()); // e_shstrndx

    let phdr = |kind: u32, flags: u32, offset: u64, size: u64, align: u64, raw: &mut Vec<u8>| {
        raw.extend_from_slice(&kind.to_le_bytes());
        raw.extend_from_slice(&flags.to_le_bytes());
        raw.extend_from_slice(&offset.to_le_bytes()); // p_offset
        raw.extend_from_slice(&offset.to_le_bytes()); // p_vaddr
        raw.extend_from_slice(&0u64.to_le_bytes()); // p_paddr
        raw.extend_from_slice(&size.to_le_bytes()); // p_filesz
        raw.extend_from_slice(&size.to_le_bytes()); // p_memsz
        raw.extend_from_slice(&align.to_le_bytes());
    };

    // The PT_NULL header smuggles the VM magic in its p_offset field.
    phdr(
        PT_NULL,
        0,
        u64::from_le_bytes(VIUA_MAGIC),
        0,
        0,
        &mut raw,
    );
    phdr(
        PT_INTERP,
        PF_R,
        interp_offset as u64,
        interp_size as u64,
        1,
        &mut raw,
    );
    phdr(
        PT_LOAD,
        PF_R | PF_X,
        text_offset as u64,
        text_size as u64,
        INSTRUCTION_SIZE as u64,
        &mut raw,
    );

    for (each, offset) in sections.iter().zip(&offsets) {
        while raw.len() < *offset {
            raw.push(0);
        }
        raw.extend_from_slice(&each.data);
    }
    while raw.len() < shstrtab_offset {
        raw.push(0);
    }
    raw.extend_from_slice(&shstrtab);
    while raw.len() < shoff {
        raw.push(0);
    }

    let shdr = |name: u32, kind: u32, offset: u64, size: u64, raw: &mut Vec<u8>| {
        raw.extend_from_slice(&name.to_le_bytes());
        raw.extend_from_slice(&kind.to_le_bytes());
        raw.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        raw.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        raw.extend_from_slice(&offset.to_le_bytes());
        raw.extend_from_slice(&size.to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes()); // sh_link
        raw.extend_from_slice(&0u32.to_le_bytes()); // sh_info
        raw.extend_from_slice(&8u64.to_le_bytes()); // sh_addralign
        raw.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
    };

    shdr(0, 0, 0, 0, &mut raw); // null section
    for ((each, offset), name) in sections.iter().zip(&offsets).zip(&name_offsets) {
        shdr(*name, each.kind, *offset as u64, each.data.len() as u64, &mut raw);
    }
    shdr(
        shstrtab_name_offset,
        SHT_STRTAB,
        shstrtab_offset as u64,
        shstrtab.len() as u64,
        &mut raw,
    );

    raw
}

fn read_u16(raw: &[u8], at: usize) -> Result<u16, LoadError> {
    raw.get(at..at + 2)
        .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
        .ok_or(LoadError::UnexpectedEof)
}

fn read_u32(raw: &[u8], at: usize) -> Result<u32, LoadError> {
    raw.get(at..at + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or(LoadError::UnexpectedEof)
}

fn read_u64(raw: &[u8], at: usize) -> Result<u64, LoadError> {
    raw.get(at..at + 8)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        .ok_or(LoadError::UnexpectedEof)
}

fn read_slice(raw: &[u8], at: usize, size: usize) -> Result<&[u8], LoadError> {
    raw.get(at..at + size).ok_or(LoadError::UnexpectedEof)
}

/// Load a module from its ELF envelope, validating the full shape described
/// in the module documentation.
pub fn load(raw: &[u8]) -> Result<Module, LoadError> {
    if raw.len() < EHDR_SIZE {
        return Err(LoadError::UnexpectedEof);
    }
    if read_slice(raw, 0, 4)? != [0x7f, b'E', b'L', b'F'] {
        return Err(LoadError::NotAViuaModule("bad ELF magic"));
    }
    if raw[4] != 2 {
        return Err(LoadError::NotAViuaModule("not a 64-bit ELF"));
    }
    if raw[5] != 1 {
        return Err(LoadError::NotAViuaModule("not little-endian"));
    }
    if raw[7] != ELFOSABI_STANDALONE {
        return Err(LoadError::NotAViuaModule("unexpected OSABI"));
    }
    if read_u16(raw, 16)? != ET_EXEC {
        return Err(LoadError::NotAViuaModule("not an executable"));
    }
    if read_u16(raw, 18)? != EM_NONE {
        return Err(LoadError::NotAViuaModule("unexpected machine"));
    }

    let phoff = read_u64(raw, 32)? as usize;
    let shoff = read_u64(raw, 40)? as usize;
    let phnum = read_u16(raw, 56)? as usize;
    let shnum = read_u16(raw, 60)? as usize;
    let shstrndx = read_u16(raw, 62)? as usize;

    if phnum != 3 {
        return Err(LoadError::NotAViuaModule("expected exactly 3 program headers"));
    }

    let mut saw_magic = false;
    let mut text: Option<Vec<RawInstruction>> = None;
    for i in 0..phnum {
        let at = phoff + i * PHDR_SIZE;
        let kind = read_u32(raw, at)?;
        let offset = read_u64(raw, at + 8)?;
        let filesz = read_u64(raw, at + 32)?;
        match kind {
            PT_NULL => {
                saw_magic = offset.to_le_bytes() == VIUA_MAGIC;
            }
            PT_INTERP => {
                read_slice(raw, offset as usize, filesz as usize)?;
            }
            PT_LOAD => {
                let data = read_slice(raw, offset as usize, filesz as usize)?;
                if data.len() % INSTRUCTION_SIZE != 0 {
                    return Err(LoadError::NotAViuaModule("unaligned .text"));
                }
                text = Some(
                    data.chunks_exact(INSTRUCTION_SIZE)
                        .map(|w| u64::from_le_bytes(w.try_into().unwrap()))
                        .collect(),
                );
            }
            _ => return Err(LoadError::NotAViuaModule("unexpected program header")),
        }
    }
    if !saw_magic {
        return Err(LoadError::NotAViuaModule("missing VM magic"));
    }
    let text = text.ok_or(LoadError::MissingSection(".text"))?;

    // Walk the section headers to pick up the interpreter tables.
    let shstr_at = shoff + shstrndx * SHDR_SIZE;
    let shstr_off = read_u64(raw, shstr_at + 24)? as usize;
    let shstr_size = read_u64(raw, shstr_at + 32)? as usize;
    let shstrtab = read_slice(raw, shstr_off, shstr_size)?;
    let name_at = |offset: u32| -> &str {
        let start = offset as usize;
        let end = shstrtab[start..]
            .iter()
            .position(|b| *b == 0)
            .map(|i| start + i)
            .unwrap_or(shstrtab.len());
        std::str::from_utf8(&shstrtab[start..end]).unwrap_or("")
    };

    let mut module = Module {
        text,
        ..Module::default()
    };
    for i in 0..shnum {
        let at = shoff + i * SHDR_SIZE;
        let name = name_at(read_u32(raw, at)?);
        let offset = read_u64(raw, at + 24)? as usize;
        let size = read_u64(raw, at + 32)? as usize;
        let data = || read_slice(raw, offset, size);
        match name {
            ".viua.strtab" => {
                module.strtab = Strtab::from_bytes(data()?.to_vec());
            }
            ".viua.fns" => {
                module.functions = FunctionTable::from_bytes(data()?)?;
            }
            ".viua.blocks" => {
                module.blocks = FunctionTable::from_bytes(data()?)?;
            }
            ".viua.sigs" => {
                module.signatures = decode_strings(data()?)?;
            }
            ".viua.meta" => {
                module.metadata = decode_metadata(data()?)?;
            }
            _ => {}
        }
    }

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_asm::{ops, Access};

    fn sample_module() -> Module {
        let mut module = Module::default();
        module.text = vec![
            ops::addi(Access::local(1), Access::void(), 42).encode(),
            ops::ebreak().encode(),
            ops::halt().encode(),
        ];
        module.strtab.push(b"answer");
        module.functions.push("main/0", 0);
        module.signatures.push("print/1".into());
        module
            .metadata
            .push(("version".into(), "0.1.0".into()));
        module
    }

    #[test]
    fn module_round_trips_through_the_envelope() {
        let module = sample_module();
        let raw = store(&module);
        let loaded = load(&raw).unwrap();
        assert_eq!(loaded, module);
    }

    #[test]
    fn rejects_a_non_elf_payload() {
        assert!(matches!(
            load(b"definitely not an elf"),
            Err(LoadError::NotAViuaModule(_))
        ));
    }

    #[test]
    fn rejects_a_missing_vm_magic() {
        let mut raw = store(&sample_module());
        // Corrupt the PT_NULL p_offset, where the magic lives.
        let at = EHDR_SIZE + 8;
        raw[at..at + 8].copy_from_slice(&[0; 8]);
        assert!(matches!(
            load(&raw),
            Err(LoadError::NotAViuaModule("missing VM magic"))
        ));
    }

    #[test]
    fn function_table_addresses_by_encoded_offset() {
        let mut table = FunctionTable::new();
        let main = table.push("main/0", 0);
        let other = table.push("other/2", 64);
        assert_eq!(main, 0);
        // "main/0" + NUL + u64
        assert_eq!(other, 6 + 1 + 8);
        assert_eq!(table.at_offset(other).unwrap().name, "other/2");
        assert_eq!(table.offset_of("main/0"), Some(main));

        let reparsed = FunctionTable::from_bytes(&table.to_bytes()).unwrap();
        assert_eq!(reparsed, table);
    }
}
