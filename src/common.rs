//! Common definitions that are shared between different parts of the compiler.

use derive_more::{Display, Error};

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

use crate::front::symtab::SymbolTable;

/// Identifiers, labels, and other interned names.
pub type Id = internment::Intern<String>;

/// Intern a string slice as an [Id].
pub fn intern(s: &str) -> Id {
    Id::new(s.to_owned())
}

/// Numbered virtual registers produced by high-level code generation.
pub type VregNum = u32;

/// A position in a source file.  Line and column are 1-based.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
#[display("{file}:{line}:{col}")]
pub struct Location {
    pub file: Id,
    pub line: u32,
    pub col: u32,
}

impl Location {
    pub fn new(file: Id, line: u32, col: u32) -> Self {
        Location { file, line, col }
    }
}

/// The two kinds of compilation failure.  A semantic error is attached to a
/// source location and reports a problem with the input program; a runtime
/// error reports an internal limit or invariant violation.  Both abort the
/// compilation of the translation unit immediately.
#[derive(Clone, Debug, Display, Error)]
pub enum CompileError {
    #[display("{loc}:Error: {msg}")]
    Semantic { loc: Location, msg: String },
    #[display("Error: {msg}")]
    Runtime { msg: String },
}

impl CompileError {
    pub fn semantic(loc: Location, msg: impl Into<String>) -> Self {
        CompileError::Semantic {
            loc,
            msg: msg.into(),
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        CompileError::Runtime { msg: msg.into() }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

/// A string literal collected during storage allocation, destined for the
/// read-only data section.  `raw` is the still-escaped spelling from the
/// source, without the surrounding quotes.
#[derive(Clone, Debug)]
pub struct StringLit {
    pub label: Id,
    pub raw: String,
}

/// A global variable that needs module-level storage.
#[derive(Clone, Debug)]
pub struct GlobalVar {
    pub name: Id,
    pub size: u32,
    pub align: u32,
}

/// Per-compilation-unit state: the symbol table chain rooted at the global
/// scope, the control-flow label counter, and the literal-string table.
/// Threading this through the passes keeps the compiler free of mutable
/// global state.
#[derive(Debug)]
pub struct Context {
    pub symtab: SymbolTable,
    pub strings: Vec<StringLit>,
    pub globals: Vec<GlobalVar>,
    next_label: u32,
}

impl Context {
    pub fn new() -> Self {
        Context {
            symtab: SymbolTable::new(),
            strings: Vec::new(),
            globals: Vec::new(),
            next_label: 0,
        }
    }

    /// Allocate the next `.L<N>` control-flow label.
    pub fn next_label(&mut self) -> Id {
        let label = intern(&format!(".L{}", self.next_label));
        self.next_label += 1;
        label
    }

    /// Record a string literal and return its `_str<N>` label.
    pub fn add_string(&mut self, raw: String) -> Id {
        let label = intern(&format!("_str{}", self.strings.len()));
        self.strings.push(StringLit { label, raw });
        label
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}
