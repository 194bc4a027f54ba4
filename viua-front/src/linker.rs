//! Combining assembled modules into one.
//!
//! Text segments are concatenated, function table entries are re-based by
//! their module's load offset, and every recorded jump position and
//! table-offset load is shifted accordingly. Extern entries are resolved
//! against the other modules' definitions.

use std::collections::HashMap;

use viua_asm::{is_greedy, Instruction, GREEDY, INSTRUCTION_SIZE};
use viua_vm::Strtab;

use crate::{
    codegen::{Assembled, EXTERN_ENTRY},
    error::LinkError,
};

fn patch_immediate(
    text: &mut [u64],
    position_bytes: u64,
    shift: u32,
    what: &str,
) -> Result<(), LinkError> {
    let index = (position_bytes as usize) / INSTRUCTION_SIZE;
    let raw = text[index];
    let greedy = is_greedy(raw);
    let patched = match Instruction::decode(raw) {
        Ok(Instruction::R(mut r)) => {
            let immediate = r.immediate + shift;
            if immediate > 0x00ff_ffff {
                return Err(LinkError::OffsetOverflow(what.to_owned()));
            }
            r.immediate = immediate;
            Instruction::R(r)
        }
        _ => return Err(LinkError::OffsetOverflow(what.to_owned())),
    };
    text[index] = if greedy {
        patched.encode() | GREEDY as u64
    } else {
        patched.encode()
    };
    Ok(())
}

/// Link assembled modules into a single one. With `executable` set, one of
/// `main/0`, `main/1`, or `main/2` must be defined.
pub fn link(
    modules: &[Assembled],
    executable: bool,
) -> Result<Assembled, LinkError> {
    // Where every symbol is actually defined: (module index, entry bytes).
    let mut defined: HashMap<&str, (usize, u64)> = HashMap::new();
    let mut text_bases = Vec::with_capacity(modules.len());
    let mut table_bases = Vec::with_capacity(modules.len());
    let mut strtab_bases = Vec::with_capacity(modules.len());
    {
        let mut text_base = 0u64;
        let mut table_base = 0u64;
        let mut strtab_base = 0u64;
        for (at, assembled) in modules.iter().enumerate() {
            text_bases.push(text_base);
            table_bases.push(table_base);
            strtab_bases.push(strtab_base);
            for entry in assembled.module.functions.entries() {
                if entry.entry == EXTERN_ENTRY {
                    continue;
                }
                if defined
                    .insert(&entry.name, (at, entry.entry + text_base))
                    .is_some()
                {
                    return Err(LinkError::DuplicateSymbol(
                        entry.name.clone(),
                    ));
                }
            }
            text_base +=
                (assembled.module.text.len() * INSTRUCTION_SIZE) as u64;
            table_base += assembled.module.functions.encoded_size();
            strtab_base += assembled.module.strtab.as_bytes().len() as u64;
        }
    }

    if executable
        && !["main/0", "main/1", "main/2"]
            .iter()
            .any(|main| defined.contains_key(main))
    {
        return Err(LinkError::NoMainFunction);
    }

    let mut linked = Assembled::default();
    let mut strtab_raw = Vec::new();

    for (at, assembled) in modules.iter().enumerate() {
        let text_base = text_bases[at];
        let table_base = table_bases[at];
        let strtab_base = strtab_bases[at];
        let word_base = (text_base as usize) / INSTRUCTION_SIZE;

        linked
            .module
            .text
            .extend_from_slice(&assembled.module.text);
        strtab_raw.extend_from_slice(assembled.module.strtab.as_bytes());

        for entry in assembled.module.functions.entries() {
            let resolved = if entry.entry == EXTERN_ENTRY {
                defined
                    .get(entry.name.as_str())
                    .map(|(_, entry)| *entry)
                    .ok_or_else(|| {
                        LinkError::MissingSymbol(entry.name.clone())
                    })?
            } else {
                entry.entry + text_base
            };
            linked.module.functions.push(entry.name.clone(), resolved);
        }
        for entry in assembled.module.blocks.entries() {
            if entry.entry != EXTERN_ENTRY {
                linked
                    .module
                    .blocks
                    .push(entry.name.clone(), entry.entry + text_base);
            }
        }
        linked
            .module
            .metadata
            .extend(assembled.module.metadata.iter().cloned());

        // Re-base the recorded relocations, then apply the shifts to the
        // words they point at.
        let text = &mut linked.module.text[word_base..];
        for position in &assembled.function_references {
            if table_base > 0 {
                patch_immediate(
                    text,
                    *position,
                    table_base as u32,
                    "function table",
                )?;
            }
            linked.function_references.push(position + text_base);
        }
        for position in &assembled.strtab_references {
            if strtab_base > 0 {
                patch_immediate(
                    text,
                    *position,
                    strtab_base as u32,
                    "string table",
                )?;
            }
            linked.strtab_references.push(position + text_base);
        }
        for (function, positions) in &assembled.jump_positions {
            linked.jump_positions.insert(
                function.clone(),
                positions.iter().map(|p| p + text_base).collect(),
            );
        }
    }

    linked.module.strtab = Strtab::from_bytes(strtab_raw);
    Ok(linked)
}
