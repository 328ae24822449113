//! Local register allocation.
//!
//! Virtual registers are split into three storage classes.  Class 1 is
//! the memory already placed by storage allocation (arrays, structs,
//! address-taken scalars).  Class 2 — vregs live across block
//! boundaries, plus named function variables that were not promoted to a
//! callee-saved register — gets fixed 8-byte frame slots above class 1.
//! Class 3, the purely block-local temporaries, is mapped onto the
//! caller-saved pool `{rdi, rsi, rdx, rcx, r8, r9}` minus the registers
//! a block uses for call arguments; when the pool runs dry a victim is
//! stored to a reserved spill slot and reloaded at its next use.  The
//! pool is caller-saved, so bindings do not survive a `call`: anything
//! still live is spilled across it.
//!
//! Up to five of the most frequently occurring function variables are
//! promoted to the callee-saved registers `{r12, r13, r14, r15, rbx}`;
//! the low-level translator pushes and pops them around the frame.

use log::debug;

use crate::common::{CompileError, Map, Result, Set, VregNum};
use crate::middle::cfg::{
    BlockKind, ControlFlowGraph, LiveVregs, VregSet, MAX_VREGS,
};
use crate::middle::codegen::FunctionCode;
use crate::middle::ir::{
    Binding, HlInstruction, HlOpcode, MachineReg, OpSize, Operand, VREG_LAST_ARG,
};

pub const CALLER_POOL: [MachineReg; 6] = [
    MachineReg::Rdi,
    MachineReg::Rsi,
    MachineReg::Rdx,
    MachineReg::Rcx,
    MachineReg::R8,
    MachineReg::R9,
];

pub const CALLEE_SAVED: [MachineReg; 5] = [
    MachineReg::R12,
    MachineReg::R13,
    MachineReg::R14,
    MachineReg::R15,
    MachineReg::Rbx,
];

/// How the frame must grow beyond class-1 storage, plus the promotion
/// map, for the low-level translator.
#[derive(Clone, Debug, Default)]
pub struct FramePlan {
    pub class2_slots: u32,
    pub spill_slots: u32,
    pub promoted: Vec<(VregNum, MachineReg)>,
}

#[derive(Debug)]
pub struct AllocationResult {
    pub cfg: ControlFlowGraph,
    pub plan: FramePlan,
}

/// Allocate machine registers for one function's CFG.
pub fn allocate(cfg: &ControlFlowGraph, func: &FunctionCode) -> Result<AllocationResult> {
    let live = LiveVregs::execute(cfg);

    // Rank function variables by occurrence for callee-saved promotion.
    let mut occurrences: Map<VregNum, usize> = Map::new();
    for block in &cfg.blocks {
        for ins in &block.ins {
            for op in &ins.operands {
                if let Some(base) = op.base_vreg() {
                    if func.func_vars.contains(&base) {
                        *occurrences.entry(base).or_insert(0) += 1;
                    }
                }
                if let Some(index) = op.index_vreg() {
                    if func.func_vars.contains(&index) {
                        *occurrences.entry(index).or_insert(0) += 1;
                    }
                }
            }
        }
    }
    let mut ranked: Vec<(VregNum, usize)> =
        occurrences.iter().map(|(&v, &c)| (v, c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut promoted: Vec<(VregNum, MachineReg)> = ranked
        .iter()
        .take(CALLEE_SAVED.len())
        .enumerate()
        .map(|(i, &(v, _))| (v, CALLEE_SAVED[i]))
        .collect();
    // An even push count keeps the stack 16-aligned at inner calls.
    if promoted.len() % 2 == 1 {
        promoted.pop();
    }
    let promoted_set: Set<VregNum> = promoted.iter().map(|&(v, _)| v).collect();
    debug!("promoted function variables: {promoted:?}");

    // Class 2: boundary-live temporaries and unpromoted function
    // variables.
    let mut class2 = VregSet::new();
    for block in &cfg.blocks {
        let begin = live.at_block_start(block.id);
        let end = live.at_block_end(block.id);
        for vreg in (VREG_LAST_ARG + 1)..MAX_VREGS as VregNum {
            let boundary_live = begin.contains(vreg) || end.contains(vreg);
            let func_var = func.func_vars.contains(&vreg);
            if (boundary_live && !func_var)
                || (func_var && !promoted_set.contains(&vreg) && occurrences.contains_key(&vreg))
            {
                class2.insert(vreg);
            }
        }
    }
    let base16 = func.local_bytes.div_ceil(16) * 16;
    let mut class2_addr: Map<VregNum, i64> = Map::new();
    for (i, vreg) in class2.iter().enumerate() {
        class2_addr.insert(vreg, -((base16 + 8 * (i as u32 + 1)) as i64));
    }
    let class2_slots = class2_addr.len() as u32;
    let spill_base = base16 + 8 * class2_slots;

    let mut alloc = Allocator {
        live: &live,
        class2_addr: &class2_addr,
        promoted_set: &promoted_set,
        spill_base,
        max_spill_slots: 0,
    };

    let mut result = cfg.clone();
    for block in &mut result.blocks {
        if block.kind != BlockKind::Interior || block.ins.is_empty() {
            continue;
        }
        block.ins = alloc.transform_block(cfg, block.id)?;
    }

    Ok(AllocationResult {
        cfg: result,
        plan: FramePlan {
            class2_slots,
            spill_slots: alloc.max_spill_slots,
            promoted,
        },
    })
}

struct Allocator<'a> {
    live: &'a LiveVregs,
    class2_addr: &'a Map<VregNum, i64>,
    promoted_set: &'a Set<VregNum>,
    spill_base: u32,
    max_spill_slots: u32,
}

struct BlockState {
    free: Vec<MachineReg>,
    bound: Map<VregNum, (MachineReg, OpSize)>,
    spilled: Map<VregNum, u32>,
    free_slots: Vec<u32>,
    next_slot: u32,
    /// Vregs the allocator gave up on for this block; they keep their
    /// default frame homes for every occurrence.
    homeless: Set<VregNum>,
}

impl Allocator<'_> {
    fn spill_slot_addr(&self, slot: u32) -> i64 {
        -((self.spill_base + 8 * (slot + 1)) as i64)
    }

    fn transform_block(
        &mut self,
        cfg: &ControlFlowGraph,
        block_id: usize,
    ) -> Result<Vec<HlInstruction>> {
        let block = &cfg.blocks[block_id];
        let facts = self.live.per_instruction(cfg, block_id);

        // Exclude the ABI registers this block loads call arguments
        // into.
        let mut excluded: Set<MachineReg> = Set::new();
        for ins in &block.ins {
            // division clobbers %rdx in the low-level expansion
            if matches!(ins.opcode, HlOpcode::Div(_) | HlOpcode::Mod(_)) {
                excluded.insert(MachineReg::Rdx);
            }
            if !ins.opcode.has_dest() || ins.num_operands() == 0 {
                continue;
            }
            let dest = ins.operand(0);
            if dest.is_memref() {
                continue;
            }
            if let Some(v) = dest.base_vreg() {
                if (1..=6).contains(&v) {
                    excluded.insert(CALLER_POOL[(v - 1) as usize]);
                }
            }
        }
        let pool: Vec<MachineReg> = CALLER_POOL
            .iter()
            .rev()
            .copied()
            .filter(|r| !excluded.contains(r))
            .collect();

        let mut state = BlockState {
            free: pool,
            bound: Map::new(),
            spilled: Map::new(),
            free_slots: Vec::new(),
            next_slot: 0,
            homeless: Set::new(),
        };
        let mut out: Vec<HlInstruction> = Vec::with_capacity(block.ins.len());

        for (i, ins) in block.ins.iter().enumerate() {
            let (before, after) = facts[i];

            // Free any binding whose virtual register is dead here.
            let dead: Vec<VregNum> = state
                .bound
                .keys()
                .copied()
                .filter(|v| !before.contains(*v))
                .collect();
            for v in dead {
                let (reg, _) = state.bound.remove(&v).expect("bound vreg");
                state.free.push(reg);
            }
            let dead_spills: Vec<VregNum> = state
                .spilled
                .keys()
                .copied()
                .filter(|v| !before.contains(*v))
                .collect();
            for v in dead_spills {
                let slot = state.spilled.remove(&v).expect("spilled vreg");
                state.free_slots.push(slot);
            }

            if matches!(ins.opcode, HlOpcode::Call) {
                // The pool is caller-saved; nothing survives the call.
                let bound: Vec<(VregNum, (MachineReg, OpSize))> =
                    state.bound.iter().map(|(&v, &b)| (v, b)).collect();
                for (v, (reg, _)) in bound {
                    state.bound.remove(&v);
                    if after.contains(v) {
                        let slot = self.take_slot(&mut state);
                        out.push(spill_store(v, reg, self.spill_slot_addr(slot)));
                        state.spilled.insert(v, slot);
                    }
                    state.free.push(reg);
                }
                out.push(ins.clone());
                continue;
            }

            let mut rewritten = ins.clone();
            for j in 0..ins.num_operands() {
                let op = *ins.operand(j);
                let Some(base) = op.base_vreg() else { continue };
                if base <= VREG_LAST_ARG {
                    continue;
                }
                if let Some(&addr) = self.class2_addr.get(&base) {
                    rewritten.operand_mut(j).binding = Some(Binding::Frame(addr));
                    continue;
                }
                if self.promoted_set.contains(&base) {
                    // mapped by the low-level translator
                    continue;
                }
                if state.homeless.contains(&base) {
                    continue;
                }
                let size = if op.is_memref() {
                    OpSize::Q
                } else {
                    ins.opcode.operand_size(j).unwrap_or(OpSize::Q)
                };
                let binding = self.bind(&mut state, ins, base, size, &mut out)?;
                if let Some((reg, bound_size)) = binding {
                    rewritten.operand_mut(j).binding =
                        Some(Binding::Mreg(reg, bound_size));
                }
            }
            out.push(rewritten);
        }
        Ok(out)
    }

    fn take_slot(&mut self, state: &mut BlockState) -> u32 {
        let slot = state.free_slots.pop().unwrap_or_else(|| {
            let s = state.next_slot;
            state.next_slot += 1;
            s
        });
        self.max_spill_slots = self.max_spill_slots.max(state.next_slot);
        slot
    }

    /// Ensure `vreg` is in a machine register, emitting spill and reload
    /// code as needed.  Returns `None` when the block offers no register
    /// at all, in which case the vreg keeps its frame home everywhere.
    fn bind(
        &mut self,
        state: &mut BlockState,
        ins: &HlInstruction,
        vreg: VregNum,
        size: OpSize,
        out: &mut Vec<HlInstruction>,
    ) -> Result<Option<(MachineReg, OpSize)>> {
        if let Some(&(reg, bound_size)) = state.bound.get(&vreg) {
            let merged = bound_size.max(size);
            state.bound.insert(vreg, (reg, merged));
            return Ok(Some((reg, merged)));
        }

        let was_spilled = state.spilled.get(&vreg).copied();
        let reg = match self.acquire(state, ins, out) {
            Some(reg) => reg,
            None => {
                if was_spilled.is_some() {
                    // a spilled value with no register to reload into
                    return Err(CompileError::runtime(
                        "local register allocation failed to reload a spilled value",
                    ));
                }
                state.homeless.insert(vreg);
                debug!("vr{vreg} left in its frame home (no registers available)");
                return Ok(None);
            }
        };
        if let Some(slot) = was_spilled {
            state.spilled.remove(&vreg);
            state.free_slots.push(slot);
            out.push(reload_load(vreg, reg, self.spill_slot_addr(slot)));
        }
        state.bound.insert(vreg, (reg, size));
        Ok(Some((reg, size)))
    }

    /// Take a free pool register, spilling a victim not referenced by
    /// the current instruction when none is free.
    fn acquire(
        &mut self,
        state: &mut BlockState,
        ins: &HlInstruction,
        out: &mut Vec<HlInstruction>,
    ) -> Option<MachineReg> {
        if let Some(reg) = state.free.pop() {
            return Some(reg);
        }
        let in_use: Set<VregNum> = ins
            .operands
            .iter()
            .filter_map(|op| op.base_vreg())
            .chain(ins.operands.iter().filter_map(|op| op.index_vreg()))
            .collect();
        let victim = state
            .bound
            .keys()
            .copied()
            .find(|v| !in_use.contains(v))?;
        let (reg, _) = state.bound.remove(&victim).expect("victim is bound");
        let slot = self.take_slot(state);
        out.push(spill_store(victim, reg, self.spill_slot_addr(slot)));
        state.spilled.insert(victim, slot);
        debug!("spilled vr{victim} to make room");
        Some(reg)
    }
}

fn spill_store(vreg: VregNum, reg: MachineReg, addr: i64) -> HlInstruction {
    let mut dest = Operand::vreg(vreg);
    dest.binding = Some(Binding::Frame(addr));
    let mut src = Operand::vreg(vreg);
    src.binding = Some(Binding::Mreg(reg, OpSize::Q));
    HlInstruction::new(HlOpcode::Mov(OpSize::Q), &[dest, src])
}

fn reload_load(vreg: VregNum, reg: MachineReg, addr: i64) -> HlInstruction {
    let mut dest = Operand::vreg(vreg);
    dest.binding = Some(Binding::Mreg(reg, OpSize::Q));
    let mut src = Operand::vreg(vreg);
    src.binding = Some(Binding::Frame(addr));
    HlInstruction::new(HlOpcode::Mov(OpSize::Q), &[dest, src])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Context;
    use crate::front::parse::parse;
    use crate::front::sema::analyze;
    use crate::middle::codegen::generate_unit;
    use crate::middle::storage::allocate_storage;

    fn alloc_first(src: &str) -> (AllocationResult, FunctionCode) {
        let mut unit = parse(src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        let cfg = ControlFlowGraph::build(&funcs[0].iseq).unwrap();
        let result = allocate(&cfg, &funcs[0]).unwrap();
        (result, funcs[0].clone())
    }

    #[test]
    fn block_local_temps_get_pool_registers() {
        let (result, _) = alloc_first("int f(int x, int y) { return (x + y) * (y - x); }");
        let mut bound_regs = Set::new();
        for block in &result.cfg.blocks {
            for ins in &block.ins {
                for op in &ins.operands {
                    if let Some(Binding::Mreg(reg, _)) = op.binding {
                        bound_regs.insert(reg);
                        assert!(
                            CALLER_POOL.contains(&reg),
                            "class-3 temps must use the caller-saved pool"
                        );
                    }
                }
            }
        }
        assert!(!bound_regs.is_empty());
    }

    #[test]
    fn pool_is_never_oversubscribed() {
        let (result, _) = alloc_first("int f(int x, int y) { return (x + y) * (y - x); }");
        // at most six distinct registers can ever be bound
        let mut regs = Set::new();
        for block in &result.cfg.blocks {
            for ins in &block.ins {
                for op in &ins.operands {
                    if let Some(Binding::Mreg(reg, _)) = op.binding {
                        regs.insert(reg);
                    }
                }
            }
        }
        assert!(regs.len() <= CALLER_POOL.len());
    }

    #[test]
    fn loop_variables_are_promoted() {
        let (result, func) = alloc_first(
            "int f(int n) { int i; int s; s = 0; i = 0; while (i < n) { s = s + i; i = i + 1; } return s; }",
        );
        assert!(!result.plan.promoted.is_empty());
        for &(vreg, reg) in &result.plan.promoted {
            assert!(func.func_vars.contains(&vreg));
            assert!(CALLEE_SAVED.contains(&reg));
        }
    }

    #[test]
    fn cross_block_temporaries_get_frame_slots() {
        // the short-circuit result temp is written in several blocks
        let (result, _) = alloc_first(
            "int f(int a, int b) { int r; r = a && b; return r; }",
        );
        let has_frame_binding = result.cfg.blocks.iter().any(|block| {
            block.ins.iter().any(|ins| {
                ins.operands
                    .iter()
                    .any(|op| matches!(op.binding, Some(Binding::Frame(_))))
            })
        });
        assert!(result.plan.class2_slots >= 1);
        assert!(has_frame_binding);
    }

    #[test]
    fn high_pressure_forces_spills() {
        fn expr(depth: usize) -> String {
            if depth == 0 {
                "x".to_owned()
            } else {
                format!("({} + {})", expr(depth - 1), expr(depth - 1))
            }
        }
        let src = format!("int f(int x) {{ return {}; }}", expr(7));
        let mut unit = parse(&src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        let cfg = ControlFlowGraph::build(&funcs[0].iseq).unwrap();
        let result = allocate(&cfg, &funcs[0]).unwrap();
        assert!(
            result.plan.spill_slots > 0,
            "a depth-7 expression tree must spill with a six-register pool"
        );
    }

    #[test]
    fn bindings_do_not_survive_calls() {
        let src = "int g(int v); int f(int a, int b) { return g(a) + g(b); }";
        let mut unit = parse(src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        let cfg = ControlFlowGraph::build(&funcs[0].iseq).unwrap();
        let result = allocate(&cfg, &funcs[0]).unwrap();
        // the temp holding g(a)'s result lives across the second call;
        // it must be spilled, not left in a pool register
        assert!(result.plan.spill_slots > 0, "g(a)'s result must spill across g(b)");
    }
}
