//! Compile-time error reporting.

use std::fmt;

/// A position in the assembly source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    /// Line, starting at 1.
    pub line: usize,
    /// Column, starting at 1.
    pub character: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.character)
    }
}

/// What stage rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lexer, normaliser, or parser rejection.
    Syntax,
    /// Register-usage verification failure.
    StaticAnalysis,
}

/// A secondary note attached to an error, pointing at another location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aside {
    /// Where the note points, if anywhere.
    pub location: Option<Location>,
    /// The note itself.
    pub message: String,
}

/// A compile-time error: a primary site, a message, and optional asides
/// (e.g. where a register was erased, or a did-you-mean suggestion).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct CompileError {
    /// Which stage rejected the input.
    pub kind: ErrorKind,
    /// The primary location.
    pub location: Location,
    /// The primary message.
    pub message: String,
    /// Secondary notes.
    pub asides: Vec<Aside>,
}

impl CompileError {
    /// A syntax error at a location.
    pub fn syntax(location: Location, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Syntax,
            location,
            message: message.into(),
            asides: Vec::new(),
        }
    }

    /// A static-analysis error at a location.
    pub fn analysis(location: Location, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::StaticAnalysis,
            location,
            message: message.into(),
            asides: Vec::new(),
        }
    }

    /// Attach an aside pointing at another location.
    pub fn aside_at(
        mut self,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        self.asides.push(Aside {
            location: Some(location),
            message: message.into(),
        });
        self
    }

    /// Attach a free-floating aside.
    pub fn aside(mut self, message: impl Into<String>) -> Self {
        self.asides.push(Aside {
            location: None,
            message: message.into(),
        });
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: error: {}", self.location, self.message)?;
        for aside in &self.asides {
            match aside.location {
                Some(location) => {
                    write!(f, "\n{}: note: {}", location, aside.message)?
                }
                None => write!(f, "\nnote: {}", aside.message)?,
            }
        }
        Ok(())
    }
}

/// Failure modes of linking modules together.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The same symbol is defined by more than one module.
    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
    /// A referenced symbol is defined by no module.
    #[error("missing symbol: {0}")]
    MissingSymbol(String),
    /// Linking an executable requires an entry function.
    #[error("main/0, main/1, or main/2 must be defined to link an executable")]
    NoMainFunction,
    /// A rebased function table offset no longer fits its load immediate.
    #[error("function table offset overflows a load immediate: {0}")]
    OffsetOverflow(String),
}

/// Damerau-free Levenshtein distance, used for did-you-mean asides.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] =
                substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Closest candidate within a Levenshtein distance of 4, for "did you
/// mean" asides on unknown mnemonics and directives.
pub(crate) fn did_you_mean<'a>(
    unknown: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(|candidate| (levenshtein(unknown, candidate), candidate))
        .filter(|(distance, _)| *distance <= 4)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}
