//! The x86-64 instruction surface.
//!
//! Low-level code reuses the shared operand and instruction containers
//! with machine-register operand kinds and AT&T-style mnemonics.  This
//! module also renders a whole module: the `.rodata` string table, the
//! `.comm` lines for globals, and the `.text` section.

use std::fmt;

use crate::common::Context;
use crate::middle::ir::{Cond, Instruction, InstructionSequence, OpSize, Operand, OperandKind};

pub type LlInstruction = Instruction<LlOpcode>;
pub type LlSequence = InstructionSequence<LlOpcode>;

/// Low-level opcodes.  Sized families carry their operand width;
/// widening moves carry (source, destination) widths.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LlOpcode {
    Nop,
    Mov(OpSize),
    Add(OpSize),
    Sub(OpSize),
    Imul(OpSize),
    Idiv(OpSize),
    Cdq,
    Cqto,
    /// movs<from><to>: sign-extending move
    Movs(OpSize, OpSize),
    /// movz<from><to>: zero-extending move
    Movz(OpSize, OpSize),
    Cmp(OpSize),
    Set(Cond),
    Jmp,
    Je,
    Jne,
    Call,
    Ret,
    Push,
    Pop,
    Lea,
}

impl fmt::Display for LlOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlOpcode::Nop => write!(f, "nop"),
            LlOpcode::Mov(s) => write!(f, "mov{s}"),
            LlOpcode::Add(s) => write!(f, "add{s}"),
            LlOpcode::Sub(s) => write!(f, "sub{s}"),
            LlOpcode::Imul(s) => write!(f, "imul{s}"),
            LlOpcode::Idiv(s) => write!(f, "idiv{s}"),
            LlOpcode::Cdq => write!(f, "cdq"),
            LlOpcode::Cqto => write!(f, "cqto"),
            LlOpcode::Movs(from, to) => write!(f, "movs{from}{to}"),
            LlOpcode::Movz(from, to) => write!(f, "movz{from}{to}"),
            LlOpcode::Cmp(s) => write!(f, "cmp{s}"),
            LlOpcode::Set(cond) => write!(f, "set{}", cond.cc()),
            LlOpcode::Jmp => write!(f, "jmp"),
            LlOpcode::Je => write!(f, "je"),
            LlOpcode::Jne => write!(f, "jne"),
            LlOpcode::Call => write!(f, "call"),
            LlOpcode::Ret => write!(f, "ret"),
            LlOpcode::Push => write!(f, "pushq"),
            LlOpcode::Pop => write!(f, "popq"),
            LlOpcode::Lea => write!(f, "leaq"),
        }
    }
}

/// Format a low-level operand in AT&T syntax.
pub fn format_ll_operand(op: &Operand) -> String {
    match op.kind {
        OperandKind::Mreg(r, size) => format!("%{}", r.name(size)),
        OperandKind::MregMem(r) => format!("(%{r})"),
        OperandKind::MregMemIdx(b, i) => format!("(%{b}, %{i})"),
        OperandKind::MregMemOff(r, 0) => format!("(%{r})"),
        OperandKind::MregMemOff(r, off) => format!("{off}(%{r})"),
        OperandKind::Imm(v) => format!("${v}"),
        OperandKind::Label(l) => l.to_string(),
        OperandKind::ImmLabel(l) => format!("${l}"),
        // virtual registers should not survive translation
        OperandKind::Vreg(n) => format!("vr{n}"),
        OperandKind::VregMem(n) => format!("(vr{n})"),
        OperandKind::VregMemIdx(b, i) => format!("(vr{b}, vr{i})"),
        OperandKind::VregMemOff(b, off) => format!("{off}(vr{b})"),
    }
}

impl fmt::Display for Instruction<LlOpcode> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.opcode.to_string();
        if self.operands.is_empty() {
            return write!(f, "{mnemonic}");
        }
        write!(f, "{mnemonic:<9}")?;
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", format_ll_operand(op))?;
        }
        Ok(())
    }
}

/// Render a low-level sequence, labels flush-left, instructions
/// indented.
pub fn format_ll_sequence(seq: &LlSequence) -> String {
    let mut out = String::new();
    for slot in seq.iter() {
        for label in &slot.labels {
            out.push_str(&format!("{label}:\n"));
        }
        out.push_str(&format!("\t{}\n", slot.ins));
    }
    out
}

/// The code generated for one function.
#[derive(Clone, Debug)]
pub struct LlFunction {
    pub name: crate::common::Id,
    pub seq: LlSequence,
}

/// Render the whole module: string literals, global storage, then the
/// text section.
pub fn emit_module(funcs: &[LlFunction], ctx: &Context) -> String {
    let mut out = String::new();
    if !ctx.strings.is_empty() {
        out.push_str("\t.section .rodata\n");
        for s in &ctx.strings {
            out.push_str(&format!("{}: .string \"{}\"\n", s.label, s.raw));
        }
    }
    for g in &ctx.globals {
        out.push_str(&format!("\t.comm {},{},{}\n", g.name, g.size, g.align));
    }
    out.push_str("\t.section .text\n");
    for f in funcs {
        out.push_str(&format!("\t.globl {}\n{}:\n", f.name, f.name));
        out.push_str(&format_ll_sequence(&f.seq));
    }
    out
}
