//! The shared operand and instruction representation.
//!
//! The high-level and low-level instruction sets reuse one operand shape
//! and one generic instruction/sequence container; only the opcode type
//! differs.  High-level code mentions virtual registers; after local
//! register allocation an operand may carry a binding to a machine
//! register or a frame slot, and low-level code mentions machine
//! registers, frame offsets, and labels directly.

use std::fmt;

use derive_more::Display;
use smallvec::SmallVec;

use crate::common::{CompileError, Id, Result, VregNum};
use crate::front::types::Type;

/// vr0 carries the return value.
pub const VREG_RETVAL: VregNum = 0;
/// vr1 is the first argument vreg.
pub const VREG_FIRST_ARG: VregNum = 1;
/// vr9 is the last argument vreg; more than nine parameters is an error.
pub const VREG_LAST_ARG: VregNum = 9;
/// Local variable allocation starts at vr10.
pub const VREG_FIRST_LOCAL: VregNum = 10;

/// Operand width in bytes, named by the instruction suffix letter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum OpSize {
    #[display("b")]
    B,
    #[display("w")]
    W,
    #[display("l")]
    L,
    #[display("q")]
    Q,
}

impl OpSize {
    pub fn bytes(self) -> u32 {
        match self {
            OpSize::B => 1,
            OpSize::W => 2,
            OpSize::L => 4,
            OpSize::Q => 8,
        }
    }

    /// The operand size used for values of the given type: integral types
    /// by width, pointers as quad words.
    pub fn for_type(ty: &Type) -> Result<OpSize> {
        if ty.is_pointer() {
            return Ok(OpSize::Q);
        }
        match ty.basic_kind().and_then(|k| k.size()) {
            Some(1) => Ok(OpSize::B),
            Some(2) => Ok(OpSize::W),
            Some(4) => Ok(OpSize::L),
            Some(8) => Ok(OpSize::Q),
            _ => Err(CompileError::runtime(format!(
                "attempt to use type '{ty}' as data"
            ))),
        }
    }
}

/// Comparison conditions, named by the high-level mnemonic suffix.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum Cond {
    #[display("lt")]
    Lt,
    #[display("lte")]
    Lte,
    #[display("gt")]
    Gt,
    #[display("gte")]
    Gte,
    #[display("eq")]
    Eq,
    #[display("neq")]
    Neq,
}

impl Cond {
    /// The x86-64 condition-code suffix for `set<cc>`/`j<cc>`.
    pub fn cc(self) -> &'static str {
        match self {
            Cond::Lt => "l",
            Cond::Lte => "le",
            Cond::Gt => "g",
            Cond::Gte => "ge",
            Cond::Eq => "e",
            Cond::Neq => "ne",
        }
    }
}

/// x86-64 general-purpose registers.  Display gives the 64-bit name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum MachineReg {
    #[display("rax")]
    Rax,
    #[display("rbx")]
    Rbx,
    #[display("rcx")]
    Rcx,
    #[display("rdx")]
    Rdx,
    #[display("rsi")]
    Rsi,
    #[display("rdi")]
    Rdi,
    #[display("rbp")]
    Rbp,
    #[display("rsp")]
    Rsp,
    #[display("r8")]
    R8,
    #[display("r9")]
    R9,
    #[display("r10")]
    R10,
    #[display("r11")]
    R11,
    #[display("r12")]
    R12,
    #[display("r13")]
    R13,
    #[display("r14")]
    R14,
    #[display("r15")]
    R15,
}

impl MachineReg {
    /// The register name at the given operand size.
    pub fn name(self, size: OpSize) -> &'static str {
        use MachineReg::*;
        use OpSize::*;
        match (self, size) {
            (Rax, B) => "al",
            (Rax, W) => "ax",
            (Rax, L) => "eax",
            (Rax, Q) => "rax",
            (Rbx, B) => "bl",
            (Rbx, W) => "bx",
            (Rbx, L) => "ebx",
            (Rbx, Q) => "rbx",
            (Rcx, B) => "cl",
            (Rcx, W) => "cx",
            (Rcx, L) => "ecx",
            (Rcx, Q) => "rcx",
            (Rdx, B) => "dl",
            (Rdx, W) => "dx",
            (Rdx, L) => "edx",
            (Rdx, Q) => "rdx",
            (Rsi, B) => "sil",
            (Rsi, W) => "si",
            (Rsi, L) => "esi",
            (Rsi, Q) => "rsi",
            (Rdi, B) => "dil",
            (Rdi, W) => "di",
            (Rdi, L) => "edi",
            (Rdi, Q) => "rdi",
            (Rbp, B) => "bpl",
            (Rbp, W) => "bp",
            (Rbp, L) => "ebp",
            (Rbp, Q) => "rbp",
            (Rsp, B) => "spl",
            (Rsp, W) => "sp",
            (Rsp, L) => "esp",
            (Rsp, Q) => "rsp",
            (R8, B) => "r8b",
            (R8, W) => "r8w",
            (R8, L) => "r8d",
            (R8, Q) => "r8",
            (R9, B) => "r9b",
            (R9, W) => "r9w",
            (R9, L) => "r9d",
            (R9, Q) => "r9",
            (R10, B) => "r10b",
            (R10, W) => "r10w",
            (R10, L) => "r10d",
            (R10, Q) => "r10",
            (R11, B) => "r11b",
            (R11, W) => "r11w",
            (R11, L) => "r11d",
            (R11, Q) => "r11",
            (R12, B) => "r12b",
            (R12, W) => "r12w",
            (R12, L) => "r12d",
            (R12, Q) => "r12",
            (R13, B) => "r13b",
            (R13, W) => "r13w",
            (R13, L) => "r13d",
            (R13, Q) => "r13",
            (R14, B) => "r14b",
            (R14, W) => "r14w",
            (R14, L) => "r14d",
            (R14, Q) => "r14",
            (R15, B) => "r15b",
            (R15, W) => "r15w",
            (R15, L) => "r15d",
            (R15, Q) => "r15",
        }
    }
}

/// The storage a local register allocator has chosen for a virtual
/// register occurrence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Binding {
    Mreg(MachineReg, OpSize),
    /// An `%rbp`-relative frame address.
    Frame(i64),
}

/// The shape of an operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    /// `vr<N>`
    Vreg(VregNum),
    /// `(vr<N>)` — the memory the register points to
    VregMem(VregNum),
    /// `(vr<N>, vr<M>)` — base plus index register
    VregMemIdx(VregNum, VregNum),
    /// `<imm>(vr<N>)` — base plus immediate offset
    VregMemOff(VregNum, i64),
    /// A machine register at a given width
    Mreg(MachineReg, OpSize),
    /// `(%reg)`
    MregMem(MachineReg),
    /// `(%reg, %reg)`
    MregMemIdx(MachineReg, MachineReg),
    /// `<imm>(%reg)`
    MregMemOff(MachineReg, i64),
    /// `$<value>`
    Imm(i64),
    /// A jump target
    Label(Id),
    /// `$<label>` — the address of a label
    ImmLabel(Id),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Operand {
    pub kind: OperandKind,
    /// Set by local register allocation on virtual-register operands.
    pub binding: Option<Binding>,
}

impl Operand {
    pub fn new(kind: OperandKind) -> Operand {
        Operand {
            kind,
            binding: None,
        }
    }

    pub fn vreg(n: VregNum) -> Operand {
        Operand::new(OperandKind::Vreg(n))
    }

    pub fn imm(value: i64) -> Operand {
        Operand::new(OperandKind::Imm(value))
    }

    pub fn label(l: Id) -> Operand {
        Operand::new(OperandKind::Label(l))
    }

    pub fn imm_label(l: Id) -> Operand {
        Operand::new(OperandKind::ImmLabel(l))
    }

    pub fn mreg(reg: MachineReg, size: OpSize) -> Operand {
        Operand::new(OperandKind::Mreg(reg, size))
    }

    pub fn mreg_mem(reg: MachineReg) -> Operand {
        Operand::new(OperandKind::MregMem(reg))
    }

    pub fn mreg_mem_off(reg: MachineReg, off: i64) -> Operand {
        Operand::new(OperandKind::MregMemOff(reg, off))
    }

    /// Flip a register operand into its one-level dereference.
    pub fn to_memref(self) -> Operand {
        let kind = match self.kind {
            OperandKind::Vreg(n) => OperandKind::VregMem(n),
            OperandKind::Mreg(r, _) => OperandKind::MregMem(r),
            other => panic!("to_memref on non-register operand {other:?}"),
        };
        Operand { kind, ..self }
    }

    /// Flip a memref back to the register holding the address.
    pub fn memref_to(self) -> Operand {
        let kind = match self.kind {
            OperandKind::VregMem(n) => OperandKind::Vreg(n),
            OperandKind::MregMem(r) => OperandKind::Mreg(r, OpSize::Q),
            other => panic!("memref_to on non-memref operand {other:?}"),
        };
        Operand { kind, ..self }
    }

    pub fn is_memref(&self) -> bool {
        matches!(
            self.kind,
            OperandKind::VregMem(_)
                | OperandKind::VregMemIdx(..)
                | OperandKind::VregMemOff(..)
                | OperandKind::MregMem(_)
                | OperandKind::MregMemIdx(..)
                | OperandKind::MregMemOff(..)
        )
    }

    pub fn is_imm(&self) -> bool {
        matches!(self.kind, OperandKind::Imm(_))
    }

    pub fn imm_value(&self) -> Option<i64> {
        match self.kind {
            OperandKind::Imm(v) => Some(v),
            _ => None,
        }
    }

    pub fn label_value(&self) -> Option<Id> {
        match self.kind {
            OperandKind::Label(l) | OperandKind::ImmLabel(l) => Some(l),
            _ => None,
        }
    }

    /// The base virtual register mentioned by this operand, if any.
    pub fn base_vreg(&self) -> Option<VregNum> {
        match self.kind {
            OperandKind::Vreg(n)
            | OperandKind::VregMem(n)
            | OperandKind::VregMemIdx(n, _)
            | OperandKind::VregMemOff(n, _) => Some(n),
            _ => None,
        }
    }

    pub fn index_vreg(&self) -> Option<VregNum> {
        match self.kind {
            OperandKind::VregMemIdx(_, i) => Some(i),
            _ => None,
        }
    }

    /// Rewrite the base virtual register, preserving the operand shape.
    pub fn with_base_vreg(self, n: VregNum) -> Operand {
        let kind = match self.kind {
            OperandKind::Vreg(_) => OperandKind::Vreg(n),
            OperandKind::VregMem(_) => OperandKind::VregMem(n),
            OperandKind::VregMemIdx(_, i) => OperandKind::VregMemIdx(n, i),
            OperandKind::VregMemOff(_, off) => OperandKind::VregMemOff(n, off),
            other => panic!("with_base_vreg on non-vreg operand {other:?}"),
        };
        Operand { kind, ..self }
    }
}

/// High-level opcodes.  Typed opcode families carry their operand width;
/// conversions carry (source, destination) widths.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum HlOpcode {
    #[display("nop")]
    Nop,
    #[display("enter")]
    Enter,
    #[display("leave")]
    Leave,
    #[display("ret")]
    Ret,
    #[display("mov_{_0}")]
    Mov(OpSize),
    #[display("add_{_0}")]
    Add(OpSize),
    #[display("sub_{_0}")]
    Sub(OpSize),
    #[display("mul_{_0}")]
    Mul(OpSize),
    #[display("div_{_0}")]
    Div(OpSize),
    #[display("mod_{_0}")]
    Mod(OpSize),
    #[display("neg_{_0}")]
    Neg(OpSize),
    #[display("cmp{_0}_{_1}")]
    Cmp(Cond, OpSize),
    #[display("sconv_{_0}{_1}")]
    SConv(OpSize, OpSize),
    #[display("uconv_{_0}{_1}")]
    UConv(OpSize, OpSize),
    #[display("jmp")]
    Jmp,
    #[display("cjmp_t")]
    CjmpT,
    #[display("cjmp_f")]
    CjmpF,
    #[display("call")]
    Call,
    #[display("localaddr")]
    LocalAddr,
}

impl HlOpcode {
    /// Does this opcode write its first operand?
    pub fn has_dest(self) -> bool {
        matches!(
            self,
            HlOpcode::Mov(_)
                | HlOpcode::Add(_)
                | HlOpcode::Sub(_)
                | HlOpcode::Mul(_)
                | HlOpcode::Div(_)
                | HlOpcode::Mod(_)
                | HlOpcode::Neg(_)
                | HlOpcode::Cmp(..)
                | HlOpcode::SConv(..)
                | HlOpcode::UConv(..)
                | HlOpcode::LocalAddr
        )
    }

    /// The width of the operand at the given index, where that is
    /// meaningful.
    pub fn operand_size(self, idx: usize) -> Option<OpSize> {
        match self {
            HlOpcode::Mov(s)
            | HlOpcode::Add(s)
            | HlOpcode::Sub(s)
            | HlOpcode::Mul(s)
            | HlOpcode::Div(s)
            | HlOpcode::Mod(s)
            | HlOpcode::Neg(s)
            | HlOpcode::Cmp(_, s) => Some(s),
            HlOpcode::SConv(src, dst) | HlOpcode::UConv(src, dst) => {
                if idx == 0 {
                    Some(dst)
                } else {
                    Some(src)
                }
            }
            HlOpcode::LocalAddr => Some(OpSize::Q),
            HlOpcode::CjmpT | HlOpcode::CjmpF => {
                if idx == 0 {
                    Some(OpSize::L)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Operand order is irrelevant for these; local value numbering may
    /// canonicalize their key members.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            HlOpcode::Add(_)
                | HlOpcode::Mul(_)
                | HlOpcode::Cmp(Cond::Eq, _)
                | HlOpcode::Cmp(Cond::Neq, _)
        )
    }

    /// Does control leave this instruction other than by falling through?
    pub fn is_control_transfer(self) -> bool {
        matches!(
            self,
            HlOpcode::Jmp | HlOpcode::CjmpT | HlOpcode::CjmpF | HlOpcode::Ret
        )
    }

    /// The operand index holding the branch target label.
    pub fn branch_target(self) -> Option<usize> {
        match self {
            HlOpcode::Jmp => Some(0),
            HlOpcode::CjmpT | HlOpcode::CjmpF => Some(1),
            _ => None,
        }
    }
}

/// An instruction: an opcode and up to three operands.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction<O> {
    pub opcode: O,
    pub operands: SmallVec<[Operand; 3]>,
}

impl<O> Instruction<O> {
    pub fn new(opcode: O, operands: &[Operand]) -> Self {
        Instruction {
            opcode,
            operands: SmallVec::from_slice(operands),
        }
    }

    pub fn operand(&self, idx: usize) -> &Operand {
        &self.operands[idx]
    }

    pub fn operand_mut(&mut self, idx: usize) -> &mut Operand {
        &mut self.operands[idx]
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }
}

/// One slot of an instruction sequence: an instruction plus any labels
/// defined at that position.
#[derive(Clone, Debug)]
pub struct Slot<O> {
    pub labels: SmallVec<[Id; 1]>,
    pub ins: Instruction<O>,
}

/// A sequence of instructions that owns its contents.  Labels are
/// attached to the next appended instruction; several labels may land on
/// the same position.
#[derive(Clone, Debug)]
pub struct InstructionSequence<O> {
    slots: Vec<Slot<O>>,
    pending_labels: Vec<Id>,
}

impl<O> InstructionSequence<O> {
    pub fn new() -> Self {
        InstructionSequence {
            slots: Vec::new(),
            pending_labels: Vec::new(),
        }
    }

    pub fn append(&mut self, ins: Instruction<O>) {
        let labels = SmallVec::from_vec(std::mem::take(&mut self.pending_labels));
        self.slots.push(Slot { labels, ins });
    }

    /// Define a label at the current position; it decorates the next
    /// appended instruction.
    pub fn define_label(&mut self, label: Id) {
        self.pending_labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Slot<O> {
        &self.slots[idx]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Slot<O>> {
        self.slots.iter()
    }
}

impl<O> Default for InstructionSequence<O> {
    fn default() -> Self {
        InstructionSequence::new()
    }
}

pub type HlInstruction = Instruction<HlOpcode>;
pub type HlSequence = InstructionSequence<HlOpcode>;

/// Format a high-level operand, including any register-allocation
/// decoration: `vr10<%rdi>` for a register binding, `vr11<-24(%rbp)>` for
/// a frame binding.
pub fn format_hl_operand(op: &Operand) -> String {
    let decoration = match op.binding {
        Some(Binding::Mreg(reg, size)) => format!("<%{}>", reg.name(size)),
        Some(Binding::Frame(off)) => format!("<{off}(%rbp)>"),
        None => String::new(),
    };
    match op.kind {
        OperandKind::Vreg(n) => format!("vr{n}{decoration}"),
        OperandKind::VregMem(n) => format!("(vr{n}{decoration})"),
        OperandKind::VregMemIdx(b, i) => format!("(vr{b}{decoration}, vr{i})"),
        OperandKind::VregMemOff(b, off) => format!("{off}(vr{b}q{decoration})"),
        OperandKind::Mreg(r, size) => format!("%{}", r.name(size)),
        OperandKind::MregMem(r) => format!("(%{r})"),
        OperandKind::MregMemIdx(b, i) => format!("(%{b}, %{i})"),
        OperandKind::MregMemOff(r, off) => format!("{off}(%{r})"),
        OperandKind::Imm(v) => format!("${v}"),
        OperandKind::Label(l) => l.to_string(),
        OperandKind::ImmLabel(l) => format!("${l}"),
    }
}

impl fmt::Display for Instruction<HlOpcode> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.opcode.to_string();
        write!(f, "{mnemonic:<9}")?;
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", format_hl_operand(op))?;
        }
        Ok(())
    }
}

/// Render a high-level sequence, labels flush-left, instructions
/// indented.
pub fn format_hl_sequence(seq: &HlSequence) -> String {
    let mut out = String::new();
    for slot in seq.iter() {
        for label in &slot.labels {
            out.push_str(&format!("{label}:\n"));
        }
        out.push_str(&format!("\t{}\n", slot.ins));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern;

    #[test]
    fn opcode_mnemonics() {
        assert_eq!(HlOpcode::Mov(OpSize::L).to_string(), "mov_l");
        assert_eq!(HlOpcode::Cmp(Cond::Lte, OpSize::Q).to_string(), "cmplte_q");
        assert_eq!(HlOpcode::SConv(OpSize::B, OpSize::L).to_string(), "sconv_bl");
        assert_eq!(HlOpcode::UConv(OpSize::W, OpSize::Q).to_string(), "uconv_wq");
        assert_eq!(HlOpcode::CjmpF.to_string(), "cjmp_f");
        assert_eq!(HlOpcode::LocalAddr.to_string(), "localaddr");
    }

    #[test]
    fn memref_flips() {
        let v = Operand::vreg(12);
        assert_eq!(v.to_memref().kind, OperandKind::VregMem(12));
        assert_eq!(v.to_memref().memref_to().kind, OperandKind::Vreg(12));
    }

    #[test]
    fn operand_formatting() {
        assert_eq!(format_hl_operand(&Operand::vreg(10)), "vr10");
        assert_eq!(format_hl_operand(&Operand::vreg(10).to_memref()), "(vr10)");
        assert_eq!(format_hl_operand(&Operand::imm(42)), "$42");
        assert_eq!(
            format_hl_operand(&Operand::imm_label(intern("_str0"))),
            "$_str0"
        );
        let mut bound = Operand::vreg(10);
        bound.binding = Some(Binding::Mreg(MachineReg::Rdi, OpSize::L));
        assert_eq!(format_hl_operand(&bound), "vr10<%edi>");
    }

    #[test]
    fn instruction_formatting_pads_mnemonic() {
        let ins = HlInstruction::new(
            HlOpcode::Mov(OpSize::L),
            &[Operand::vreg(10), Operand::imm(42)],
        );
        assert_eq!(ins.to_string(), "mov_l    vr10, $42");
    }

    #[test]
    fn labels_attach_to_next_instruction() {
        let mut seq = HlSequence::new();
        seq.append(HlInstruction::new(HlOpcode::Nop, &[]));
        seq.define_label(intern(".L0"));
        seq.define_label(intern(".L1"));
        seq.append(HlInstruction::new(HlOpcode::Ret, &[]));
        assert!(seq.get(0).labels.is_empty());
        assert_eq!(seq.get(1).labels.as_slice(), &[intern(".L0"), intern(".L1")]);
    }

    #[test]
    fn register_names_by_size() {
        assert_eq!(MachineReg::Rax.name(OpSize::B), "al");
        assert_eq!(MachineReg::Rdi.name(OpSize::L), "edi");
        assert_eq!(MachineReg::R10.name(OpSize::W), "r10w");
        assert_eq!(MachineReg::R15.name(OpSize::Q), "r15");
    }
}
