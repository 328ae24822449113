//! The back-end of the compiler.

pub mod asm;
pub mod codegen;

pub use asm::emit_module;
pub use codegen::generate;
