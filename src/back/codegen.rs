//! Low-level code generation.
//!
//! Translates each function's high-level sequence into x86-64-shaped
//! instructions.  With optimization enabled the sequence first runs
//! through the CFG pipeline (local value numbering, then local register
//! allocation) and the translation honors the resulting operand
//! bindings and callee-saved promotions.
//!
//! Scratch discipline: `%r10` is the arithmetic middleman; memref bases
//! that live in frame slots are materialized through `%r11`, always
//! resolved immediately before the instruction that consumes them, so a
//! single scratch register suffices.  `%rax`/`%rdx` are touched only by
//! the division expansion, whose operands are read first.

use log::debug;

use crate::back::asm::{LlFunction, LlInstruction, LlOpcode, LlSequence};
use crate::common::{CompileError, Map, Result, VregNum};
use crate::middle::cfg::ControlFlowGraph;
use crate::middle::codegen::FunctionCode;
use crate::middle::ir::{
    Binding, HlInstruction, HlOpcode, MachineReg, OpSize, Operand, OperandKind,
};
use crate::middle::lvn;
use crate::middle::regalloc;

/// vr1..vr6 alias the System V argument registers.
const ARG_REGS: [MachineReg; 6] = [
    MachineReg::Rdi,
    MachineReg::Rsi,
    MachineReg::Rdx,
    MachineReg::Rcx,
    MachineReg::R8,
    MachineReg::R9,
];

/// Translate one function to low-level code, optionally running the
/// high-level optimization pipeline first.
pub fn generate(func: &FunctionCode, optimize: bool) -> Result<LlFunction> {
    let (hl_seq, plan) = if optimize {
        let cfg = ControlFlowGraph::build(&func.iseq)?;
        let cfg = lvn::optimize(&cfg);
        let alloc = regalloc::allocate(&cfg, func)?;
        (alloc.cfg.create_instruction_sequence(), Some(alloc.plan))
    } else {
        (func.iseq.clone(), None)
    };

    let mut max_vreg: VregNum = 0;
    for slot in hl_seq.iter() {
        for op in &slot.ins.operands {
            if let Some(base) = op.base_vreg() {
                max_vreg = max_vreg.max(base);
            }
            if let Some(index) = op.index_vreg() {
                max_vreg = max_vreg.max(index);
            }
        }
    }
    let home_slots = max_vreg.saturating_sub(9) as i64;

    let local = func.local_bytes as i64;
    let raw_total = match &plan {
        None => local + 8 * home_slots,
        Some(p) => {
            round_up_16(local)
                + 8 * p.class2_slots as i64
                + 8 * p.spill_slots as i64
                + 8 * home_slots
        }
    };
    let total = round_up_16(raw_total);
    debug!("{}: frame of {total} bytes ({home_slots} vreg homes)", func.name);

    let (promoted, push_order) = match &plan {
        Some(p) => {
            let map: Map<VregNum, MachineReg> = p.promoted.iter().copied().collect();
            let order: Vec<MachineReg> = p.promoted.iter().map(|&(_, r)| r).collect();
            (map, order)
        }
        None => (Map::new(), Vec::new()),
    };

    let mut translator = LowLevelCodeGen {
        total,
        local,
        promoted,
        push_order,
    };
    let mut ll = LlSequence::new();
    for slot in hl_seq.iter() {
        for label in &slot.labels {
            ll.define_label(*label);
        }
        translator.translate_instruction(&slot.ins, &mut ll)?;
    }

    Ok(LlFunction {
        name: func.name,
        seq: ll,
    })
}

fn round_up_16(v: i64) -> i64 {
    (v + 15) / 16 * 16
}

struct LowLevelCodeGen {
    total: i64,
    local: i64,
    promoted: Map<VregNum, MachineReg>,
    push_order: Vec<MachineReg>,
}

fn r10(size: OpSize) -> Operand {
    Operand::mreg(MachineReg::R10, size)
}

impl LowLevelCodeGen {
    fn translate_instruction(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
    ) -> Result<()> {
        match hl.opcode {
            HlOpcode::Nop => {
                ll.append(LlInstruction::new(LlOpcode::Nop, &[]));
                Ok(())
            }
            HlOpcode::Enter => self.translate_enter(ll),
            HlOpcode::Leave => self.translate_leave(ll),
            HlOpcode::Ret => {
                ll.append(LlInstruction::new(LlOpcode::Ret, &[]));
                Ok(())
            }
            HlOpcode::Jmp => {
                let target = self.operand(ll, hl.operand(0), OpSize::Q)?;
                ll.append(LlInstruction::new(LlOpcode::Jmp, &[target]));
                Ok(())
            }
            HlOpcode::Call => {
                let target = self.operand(ll, hl.operand(0), OpSize::Q)?;
                ll.append(LlInstruction::new(LlOpcode::Call, &[target]));
                Ok(())
            }
            HlOpcode::CjmpT | HlOpcode::CjmpF => {
                let cond = self.operand(ll, hl.operand(0), OpSize::L)?;
                ll.append(LlInstruction::new(
                    LlOpcode::Cmp(OpSize::L),
                    &[Operand::imm(0), cond],
                ));
                let target = self.operand(ll, hl.operand(1), OpSize::Q)?;
                let jump = if hl.opcode == HlOpcode::CjmpT {
                    LlOpcode::Jne
                } else {
                    LlOpcode::Je
                };
                ll.append(LlInstruction::new(jump, &[target]));
                Ok(())
            }
            HlOpcode::Mov(size) => self.translate_mov(hl, ll, size),
            HlOpcode::Add(size) => {
                self.translate_add_sub(hl, ll, LlOpcode::Add(size), size)
            }
            HlOpcode::Sub(size) => {
                self.translate_add_sub(hl, ll, LlOpcode::Sub(size), size)
            }
            HlOpcode::Mul(size) => self.translate_mul(hl, ll, size),
            HlOpcode::Div(size) => self.translate_div_mod(hl, ll, size, true),
            HlOpcode::Mod(size) => self.translate_div_mod(hl, ll, size, false),
            HlOpcode::Cmp(cond, size) => self.translate_cmp(hl, ll, cond, size),
            HlOpcode::SConv(from, to) => {
                self.translate_conv(hl, ll, LlOpcode::Movs(from, to), from, to)
            }
            HlOpcode::UConv(from, to) => {
                self.translate_conv(hl, ll, LlOpcode::Movz(from, to), from, to)
            }
            HlOpcode::Neg(size) => self.translate_neg(hl, ll, size),
            HlOpcode::LocalAddr => self.translate_localaddr(hl, ll),
        }
    }

    /// ABI prologue: establish the frame, then save any promoted
    /// callee-saved registers inside it.
    fn translate_enter(&mut self, ll: &mut LlSequence) -> Result<()> {
        let rbp = Operand::mreg(MachineReg::Rbp, OpSize::Q);
        let rsp = Operand::mreg(MachineReg::Rsp, OpSize::Q);
        ll.append(LlInstruction::new(LlOpcode::Push, &[rbp]));
        ll.append(LlInstruction::new(LlOpcode::Mov(OpSize::Q), &[rsp, rbp]));
        ll.append(LlInstruction::new(
            LlOpcode::Sub(OpSize::Q),
            &[Operand::imm(self.total), rsp],
        ));
        for reg in &self.push_order {
            ll.append(LlInstruction::new(
                LlOpcode::Push,
                &[Operand::mreg(*reg, OpSize::Q)],
            ));
        }
        Ok(())
    }

    fn translate_leave(&mut self, ll: &mut LlSequence) -> Result<()> {
        let rbp = Operand::mreg(MachineReg::Rbp, OpSize::Q);
        let rsp = Operand::mreg(MachineReg::Rsp, OpSize::Q);
        for reg in self.push_order.iter().rev() {
            ll.append(LlInstruction::new(
                LlOpcode::Pop,
                &[Operand::mreg(*reg, OpSize::Q)],
            ));
        }
        ll.append(LlInstruction::new(
            LlOpcode::Add(OpSize::Q),
            &[Operand::imm(self.total), rsp],
        ));
        ll.append(LlInstruction::new(LlOpcode::Pop, &[rbp]));
        Ok(())
    }

    fn translate_mov(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
        size: OpSize,
    ) -> Result<()> {
        if self.is_memory(hl.operand(1)) && self.is_memory(hl.operand(0)) {
            let src = self.operand(ll, hl.operand(1), size)?;
            ll.append(LlInstruction::new(LlOpcode::Mov(size), &[src, r10(size)]));
            let dst = self.operand(ll, hl.operand(0), size)?;
            ll.append(LlInstruction::new(LlOpcode::Mov(size), &[r10(size), dst]));
        } else {
            let src = self.operand(ll, hl.operand(1), size)?;
            let dst = self.operand(ll, hl.operand(0), size)?;
            ll.append(LlInstruction::new(LlOpcode::Mov(size), &[src, dst]));
        }
        Ok(())
    }

    fn translate_add_sub(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
        op: LlOpcode,
        size: OpSize,
    ) -> Result<()> {
        let src_mem = self.is_memory(hl.operand(1)) || self.is_memory(hl.operand(2));
        if src_mem && self.is_memory(hl.operand(0)) {
            let srcl = self.operand(ll, hl.operand(1), size)?;
            ll.append(LlInstruction::new(LlOpcode::Mov(size), &[srcl, r10(size)]));
            let srcr = self.operand(ll, hl.operand(2), size)?;
            ll.append(LlInstruction::new(op, &[srcr, r10(size)]));
            let dst = self.operand(ll, hl.operand(0), size)?;
            ll.append(LlInstruction::new(LlOpcode::Mov(size), &[r10(size), dst]));
        } else {
            let srcl = self.operand(ll, hl.operand(1), size)?;
            let dst = self.operand(ll, hl.operand(0), size)?;
            ll.append(LlInstruction::new(LlOpcode::Mov(size), &[srcl, dst]));
            let srcr = self.operand(ll, hl.operand(2), size)?;
            ll.append(LlInstruction::new(op, &[srcr, dst]));
        }
        Ok(())
    }

    fn translate_mul(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
        size: OpSize,
    ) -> Result<()> {
        if size < OpSize::L {
            return Err(CompileError::runtime("multiply narrower than 32 bits"));
        }
        let srcl = self.operand(ll, hl.operand(1), size)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[srcl, r10(size)]));
        let srcr = self.operand(ll, hl.operand(2), size)?;
        ll.append(LlInstruction::new(LlOpcode::Imul(size), &[srcr, r10(size)]));
        let dst = self.operand(ll, hl.operand(0), size)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[r10(size), dst]));
        Ok(())
    }

    fn translate_div_mod(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
        size: OpSize,
        quotient: bool,
    ) -> Result<()> {
        if size < OpSize::L {
            return Err(CompileError::runtime("divide narrower than 32 bits"));
        }
        // The divisor is read before %rax/%rdx are clobbered.
        let srcr = self.operand(ll, hl.operand(2), size)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[srcr, r10(size)]));
        let srcl = self.operand(ll, hl.operand(1), size)?;
        let rax = Operand::mreg(MachineReg::Rax, size);
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[srcl, rax]));
        let extend = if size == OpSize::Q {
            LlOpcode::Cqto
        } else {
            LlOpcode::Cdq
        };
        ll.append(LlInstruction::new(extend, &[]));
        ll.append(LlInstruction::new(LlOpcode::Idiv(size), &[r10(size)]));
        let result = if quotient {
            Operand::mreg(MachineReg::Rax, size)
        } else {
            Operand::mreg(MachineReg::Rdx, size)
        };
        let dst = self.operand(ll, hl.operand(0), size)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[result, dst]));
        Ok(())
    }

    fn translate_cmp(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
        cond: crate::middle::ir::Cond,
        size: OpSize,
    ) -> Result<()> {
        let srcl = self.operand(ll, hl.operand(1), size)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[srcl, r10(size)]));
        let srcr = self.operand(ll, hl.operand(2), size)?;
        ll.append(LlInstruction::new(LlOpcode::Cmp(size), &[srcr, r10(size)]));
        let r10b = Operand::mreg(MachineReg::R10, OpSize::B);
        ll.append(LlInstruction::new(LlOpcode::Set(cond), &[r10b]));
        if size > OpSize::B {
            ll.append(LlInstruction::new(
                LlOpcode::Movz(OpSize::B, size),
                &[r10b, r10(size)],
            ));
        }
        let dst = self.operand(ll, hl.operand(0), size)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[r10(size), dst]));
        Ok(())
    }

    fn translate_conv(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
        op: LlOpcode,
        from: OpSize,
        to: OpSize,
    ) -> Result<()> {
        let src = self.operand(ll, hl.operand(1), from)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(from), &[src, r10(from)]));
        if op == LlOpcode::Movz(OpSize::L, OpSize::Q) {
            // no movzlq: a 32-bit move already zeroes the upper half
            ll.append(LlInstruction::new(
                LlOpcode::Mov(OpSize::L),
                &[r10(OpSize::L), r10(OpSize::L)],
            ));
        } else {
            ll.append(LlInstruction::new(op, &[r10(from), r10(to)]));
        }
        let dst = self.operand(ll, hl.operand(0), to)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(to), &[r10(to), dst]));
        Ok(())
    }

    fn translate_neg(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
        size: OpSize,
    ) -> Result<()> {
        let src = self.operand(ll, hl.operand(1), size)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(size), &[src, r10(size)]));
        let dst = self.operand(ll, hl.operand(0), size)?;
        ll.append(LlInstruction::new(
            LlOpcode::Mov(size),
            &[Operand::imm(0), dst],
        ));
        ll.append(LlInstruction::new(LlOpcode::Sub(size), &[r10(size), dst]));
        Ok(())
    }

    /// `localaddr dst, $offset`: materialize a local storage address.
    fn translate_localaddr(
        &mut self,
        hl: &HlInstruction,
        ll: &mut LlSequence,
    ) -> Result<()> {
        let offset = hl
            .operand(1)
            .imm_value()
            .ok_or_else(|| CompileError::runtime("localaddr without an offset"))?;
        let addr = Operand::mreg_mem_off(MachineReg::Rbp, offset - self.local);
        let r10q = r10(OpSize::Q);
        ll.append(LlInstruction::new(LlOpcode::Lea, &[addr, r10q]));
        let dst = self.operand(ll, hl.operand(0), OpSize::Q)?;
        ll.append(LlInstruction::new(LlOpcode::Mov(OpSize::Q), &[r10q, dst]));
        Ok(())
    }

    /// Will this high-level operand resolve to a memory reference?
    fn is_memory(&self, op: &Operand) -> bool {
        match op.binding {
            Some(Binding::Frame(_)) => return true,
            Some(Binding::Mreg(..)) => return false,
            None => {}
        }
        match op.kind {
            OperandKind::Vreg(n) => {
                !(self.promoted.contains_key(&n) || n <= 6)
            }
            OperandKind::Imm(_)
            | OperandKind::Label(_)
            | OperandKind::ImmLabel(_)
            | OperandKind::Mreg(..) => false,
            _ => true,
        }
    }

    /// Resolve a high-level operand to a low-level one, emitting loads
    /// for frame-resident memref bases.
    fn operand(
        &mut self,
        ll: &mut LlSequence,
        op: &Operand,
        size: OpSize,
    ) -> Result<Operand> {
        match op.binding {
            Some(Binding::Frame(addr)) => {
                return match op.kind {
                    // the bound base holds an address sitting in a slot
                    OperandKind::VregMem(_) => {
                        let r11 = Operand::mreg(MachineReg::R11, OpSize::Q);
                        ll.append(LlInstruction::new(
                            LlOpcode::Mov(OpSize::Q),
                            &[Operand::mreg_mem_off(MachineReg::Rbp, addr), r11],
                        ));
                        Ok(Operand::mreg_mem(MachineReg::R11))
                    }
                    _ => Ok(Operand::mreg_mem_off(MachineReg::Rbp, addr)),
                };
            }
            Some(Binding::Mreg(reg, _)) => {
                return match op.kind {
                    OperandKind::VregMem(_) => Ok(Operand::mreg_mem(reg)),
                    _ => Ok(Operand::mreg(reg, size)),
                };
            }
            None => {}
        }
        match op.kind {
            OperandKind::Imm(v) => Ok(Operand::imm(v)),
            OperandKind::Label(l) => Ok(Operand::label(l)),
            OperandKind::ImmLabel(l) => Ok(Operand::imm_label(l)),
            OperandKind::Mreg(..)
            | OperandKind::MregMem(_)
            | OperandKind::MregMemIdx(..)
            | OperandKind::MregMemOff(..) => Ok(*op),
            OperandKind::Vreg(n) => self.resolve_vreg(n, size),
            OperandKind::VregMem(n) => {
                let base = self.resolve_vreg(n, OpSize::Q)?;
                match base.kind {
                    OperandKind::Mreg(reg, _) => Ok(Operand::mreg_mem(reg)),
                    _ => {
                        let r11 = Operand::mreg(MachineReg::R11, OpSize::Q);
                        ll.append(LlInstruction::new(
                            LlOpcode::Mov(OpSize::Q),
                            &[base, r11],
                        ));
                        Ok(Operand::mreg_mem(MachineReg::R11))
                    }
                }
            }
            OperandKind::VregMemIdx(..) | OperandKind::VregMemOff(..) => {
                Err(CompileError::runtime("unhandled high-level operand kind"))
            }
        }
    }

    /// The machine home of a virtual register: `vr0` is the return
    /// value, `vr1..vr6` are the argument registers, everything else
    /// lives in a frame slot.
    fn resolve_vreg(&self, n: VregNum, size: OpSize) -> Result<Operand> {
        if let Some(&reg) = self.promoted.get(&n) {
            return Ok(Operand::mreg(reg, size));
        }
        match n {
            0 => Ok(Operand::mreg(MachineReg::Rax, size)),
            1..=6 => Ok(Operand::mreg(ARG_REGS[(n - 1) as usize], size)),
            7..=9 => Err(CompileError::runtime(format!(
                "argument vr{n} has no machine register"
            ))),
            _ => Ok(Operand::mreg_mem_off(
                MachineReg::Rbp,
                (n as i64 - 10) * 8 - self.total,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::asm::format_ll_sequence;
    use crate::common::Context;
    use crate::front::parse::parse;
    use crate::front::sema::analyze;
    use crate::middle::codegen::generate_unit;
    use crate::middle::storage::allocate_storage;

    fn ll_text(src: &str, optimize: bool) -> String {
        let mut unit = parse(src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        funcs
            .iter()
            .map(|f| format_ll_sequence(&generate(f, optimize).unwrap().seq))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn squish(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn frame_size(text: &str) -> i64 {
        let at = text.find("subq").expect("prologue subq");
        let rest = &text[at..];
        let dollar = rest.find('$').unwrap();
        let comma = rest.find(',').unwrap();
        rest[dollar + 1..comma].parse().unwrap()
    }

    #[test]
    fn prologue_and_epilogue() {
        let text = squish(&ll_text("int main(void) { return 42; }", false));
        assert!(text.contains("pushq %rbp"));
        assert!(text.contains("movq %rsp, %rbp"));
        assert!(text.contains("subq $"));
        assert!(text.contains("addq $"));
        assert!(text.contains("popq %rbp"));
        assert!(text.ends_with("ret"));
    }

    #[test]
    fn frame_is_multiple_of_sixteen() {
        for src in [
            "int main(void) { return 42; }",
            "int main(void) { int a[3]; a[0] = 1; return a[0]; }",
            "int f(int x, int y) { return x * y + 2; } int main(void) { return f(2, 3); }",
        ] {
            for optimize in [false, true] {
                let text = ll_text(src, optimize);
                assert_eq!(frame_size(&text) % 16, 0, "src: {src}");
            }
        }
    }

    #[test]
    fn return_value_lands_in_eax() {
        let text = squish(&ll_text("int main(void) { return 42; }", false));
        // vr0 aliases %rax; the store reaches it through the vr10 home
        assert!(text.contains("movl $42,"));
        assert!(text.contains(", %eax"), "got: {text}");
    }

    #[test]
    fn vreg_homes_are_rbp_relative() {
        let text = ll_text("int main(void) { int a; a = 5; return a; }", false);
        // a lives in vr10 whose home is the frame bottom
        let total = frame_size(&text);
        assert!(
            text.contains(&format!("-{total}(%rbp)")),
            "vr10 home should be -total: {text}"
        );
    }

    #[test]
    fn memory_to_memory_moves_through_r10() {
        let text = squish(&ll_text(
            "int main(void) { int a; int b; a = 1; b = a; return b; }",
            false,
        ));
        assert!(text.contains("%r10d"), "got: {text}");
    }

    #[test]
    fn division_uses_idiv_and_extends() {
        let text = squish(&ll_text(
            "int main(void) { int a; a = 7; return a / 2; }",
            false,
        ));
        assert!(text.contains("cdq"));
        assert!(text.contains("idivl %r10d"));
        assert!(text.contains("%eax"));
        let modulo = squish(&ll_text(
            "int main(void) { int a; a = 7; return a % 2; }",
            false,
        ));
        assert!(modulo.contains("%edx"), "remainder comes from edx: {modulo}");
    }

    #[test]
    fn comparisons_set_and_widen() {
        let text = squish(&ll_text(
            "int main(void) { int a; a = 1; return a < 2; }",
            false,
        ));
        assert!(text.contains("cmpl"));
        assert!(text.contains("setl %r10b"));
        assert!(text.contains("movzbl %r10b, %r10d"));
    }

    #[test]
    fn conditional_jumps_compare_to_zero() {
        let text = squish(&ll_text(
            "int main(void) { int a; a = 1; if (a) { a = 2; } return a; }",
            false,
        ));
        assert!(text.contains("cmpl $0,"));
        assert!(text.contains("je .L0"), "cjmp_f becomes je: {text}");
    }

    #[test]
    fn localaddr_uses_lea() {
        let text = squish(&ll_text(
            "int main(void) { int a[2]; a[0] = 1; return a[0]; }",
            false,
        ));
        assert!(text.contains("leaq -8(%rbp), %r10"), "got: {text}");
    }

    #[test]
    fn widening_goes_through_r10() {
        let text = squish(&ll_text(
            "int main(void) { char c; int i; c = 'a'; i = c; return i; }",
            false,
        ));
        assert!(text.contains("movsbl %r10b, %r10d"), "got: {text}");
    }

    #[test]
    fn negation_subtracts_from_zero() {
        let text = squish(&ll_text(
            "int main(void) { int a; a = 5; return -a; }",
            false,
        ));
        assert!(text.contains("movl $0,"));
        assert!(text.contains("subl %r10d,"), "got: {text}");
    }

    #[test]
    fn arguments_flow_through_abi_registers() {
        let text = squish(&ll_text(
            "int f(int x, int y) { return x + y; } int main(void) { return f(1, 2); }",
        false,
        ));
        assert!(text.contains("%edi"), "first argument: {text}");
        assert!(text.contains("%esi"), "second argument: {text}");
        assert!(text.contains("call f"));
    }

    #[test]
    fn optimized_code_binds_pool_registers() {
        let text = ll_text(
            "int f(int x, int y) { return (x + y) * (y - x); }",
            true,
        );
        // promoted homes and pool registers appear instead of frame
        // traffic for every temp
        assert!(
            text.contains("%r12") || text.contains("%rdi") || text.contains("%rsi"),
            "got: {text}"
        );
    }

    #[test]
    fn promoted_registers_are_saved_and_restored() {
        let src = "int f(int n) { int i; int s; s = 0; i = 0; while (i < n) { s = s + i; i = i + 1; } return s; }";
        let text = squish(&ll_text(src, true));
        let pushes = text.matches("pushq %r1").count();
        let pops = text.matches("popq %r1").count();
        assert_eq!(pushes, pops);
        assert!(pushes > 0, "expected callee-saved pushes: {text}");
        assert_eq!(pushes % 2, 0, "push count must stay 16-aligned");
    }

    #[test]
    fn optimized_and_unoptimized_share_the_shape() {
        for optimize in [false, true] {
            let text = ll_text("int main(void) { return 6 * 7; }", optimize);
            assert!(text.contains("ret"));
            assert_eq!(frame_size(&text) % 16, 0);
        }
    }
}
