//! Assembler front-end for the Viua VM.
//!
//! Source text runs through a fixed pipeline: lexer → normaliser → parser
//! → static analyser → code generator. The result is a loadable module
//! (plus the relocation records the linker needs), or a compile error with
//! a source location and optional asides.

#![warn(missing_docs)]

pub mod analyser;
pub mod codegen;
mod error;
pub mod lexer;
pub mod linker;
pub mod normaliser;
pub mod parser;

pub use codegen::{Assembled, EXTERN_ENTRY};
pub use error::{Aside, CompileError, ErrorKind, LinkError, Location};
pub use linker::link;

/// Run the whole pipeline over one source file.
pub fn assemble(source: &str) -> Result<Assembled, CompileError> {
    let tokens = lexer::lex(source)?;
    let tokens = normaliser::normalise(tokens)?;
    tracing::debug!(tokens = tokens.len(), "lexed and normalised");
    let unit = parser::parse(&tokens)?;
    tracing::debug!(bodies = unit.bodies.len(), "parsed");
    analyser::verify(&unit)?;
    codegen::generate(&unit)
}
