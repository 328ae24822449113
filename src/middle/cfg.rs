//! Control-flow graph construction and liveness analysis.
//!
//! The builder splits a high-level instruction sequence into basic
//! blocks at label targets and after control transfers (`call` does not
//! end a block; the graph is per-procedure).  Liveness is a backward
//! may-analysis over fixed-width bitsets of virtual register numbers,
//! iterated to a fixed point.

use log::trace;
use smallvec::SmallVec;

use crate::common::{CompileError, Id, Map, Result, VregNum};
use crate::middle::ir::{
    HlInstruction, HlOpcode, HlSequence, VREG_FIRST_ARG, VREG_LAST_ARG, VREG_RETVAL,
};

/// Upper bound on the number of virtual registers the pipeline may
/// produce; the allocators enforce it.
pub const MAX_VREGS: usize = 256;

const WORDS: usize = MAX_VREGS / 64;

/// A fixed-width set of virtual register numbers.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct VregSet {
    bits: [u64; WORDS],
}

impl VregSet {
    pub fn new() -> Self {
        VregSet::default()
    }

    pub fn insert(&mut self, vreg: VregNum) {
        let i = vreg as usize;
        debug_assert!(i < MAX_VREGS);
        self.bits[i / 64] |= 1 << (i % 64);
    }

    pub fn remove(&mut self, vreg: VregNum) {
        let i = vreg as usize;
        self.bits[i / 64] &= !(1 << (i % 64));
    }

    pub fn contains(&self, vreg: VregNum) -> bool {
        let i = vreg as usize;
        i < MAX_VREGS && self.bits[i / 64] & (1 << (i % 64)) != 0
    }

    /// Union `other` into `self`, reporting whether anything changed.
    pub fn union_with(&mut self, other: &VregSet) -> bool {
        let mut changed = false;
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            let merged = *a | *b;
            changed |= merged != *a;
            *a = merged;
        }
        changed
    }

    pub fn remove_all(&mut self, other: &VregSet) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a &= !*b;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = VregNum> + '_ {
        (0..MAX_VREGS as VregNum).filter(move |&v| self.contains(v))
    }

    /// `self ⊆ other`
    pub fn is_subset_of(&self, other: &VregSet) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .all(|(a, b)| a & !b == 0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockKind {
    Entry,
    Interior,
    Exit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EdgeKind {
    /// Execution falls through to the next block in code order.
    FallThrough,
    /// The taken side of a conditional jump.
    Branch,
    /// An unconditional transfer.
    Jump,
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: usize,
    pub kind: BlockKind,
    /// Position of the block in the original code order.
    pub code_order: usize,
    pub labels: SmallVec<[Id; 1]>,
    pub ins: Vec<HlInstruction>,
}

#[derive(Clone, Copy, Debug)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
}

#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<Edge>,
}

impl ControlFlowGraph {
    pub fn entry(&self) -> usize {
        0
    }

    pub fn exit(&self) -> usize {
        self.blocks.len() - 1
    }

    pub fn successors(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.from == block)
            .map(|e| e.to)
    }

    /// Split a sequence into basic blocks and connect them.
    pub fn build(seq: &HlSequence) -> Result<ControlFlowGraph> {
        let mut blocks = vec![BasicBlock {
            id: 0,
            kind: BlockKind::Entry,
            code_order: 0,
            labels: SmallVec::new(),
            ins: Vec::new(),
        }];
        let mut open = false;
        for slot in seq.iter() {
            let starts_new = !slot.labels.is_empty();
            if !open || starts_new {
                let id = blocks.len();
                blocks.push(BasicBlock {
                    id,
                    kind: BlockKind::Interior,
                    code_order: id,
                    labels: slot.labels.clone(),
                    ins: Vec::new(),
                });
                open = true;
            }
            let cur = blocks.last_mut().expect("open block");
            cur.ins.push(slot.ins.clone());
            if slot.ins.opcode.is_control_transfer() {
                open = false;
            }
        }
        let exit_id = blocks.len();
        blocks.push(BasicBlock {
            id: exit_id,
            kind: BlockKind::Exit,
            code_order: exit_id,
            labels: SmallVec::new(),
            ins: Vec::new(),
        });

        let mut by_label: Map<Id, usize> = Map::new();
        for b in &blocks {
            for label in &b.labels {
                by_label.insert(*label, b.id);
            }
        }

        let mut edges = Vec::new();
        let first_interior = if exit_id > 1 { 1 } else { exit_id };
        edges.push(Edge {
            from: 0,
            to: first_interior,
            kind: EdgeKind::FallThrough,
        });
        for b in &blocks[1..exit_id] {
            let next = if b.id + 1 < exit_id { b.id + 1 } else { exit_id };
            let last = b.ins.last().expect("interior blocks are non-empty");
            match last.opcode {
                HlOpcode::Jmp => {
                    let target = branch_target(&by_label, last)?;
                    edges.push(Edge {
                        from: b.id,
                        to: target,
                        kind: EdgeKind::Jump,
                    });
                }
                HlOpcode::CjmpT | HlOpcode::CjmpF => {
                    let target = branch_target(&by_label, last)?;
                    edges.push(Edge {
                        from: b.id,
                        to: target,
                        kind: EdgeKind::Branch,
                    });
                    edges.push(Edge {
                        from: b.id,
                        to: next,
                        kind: EdgeKind::FallThrough,
                    });
                }
                HlOpcode::Ret => {
                    edges.push(Edge {
                        from: b.id,
                        to: exit_id,
                        kind: EdgeKind::Jump,
                    });
                }
                _ => {
                    edges.push(Edge {
                        from: b.id,
                        to: next,
                        kind: EdgeKind::FallThrough,
                    });
                }
            }
        }

        Ok(ControlFlowGraph { blocks, edges })
    }

    /// Reassemble the blocks, in code order, into a flat sequence.
    pub fn create_instruction_sequence(&self) -> HlSequence {
        let mut order: Vec<&BasicBlock> = self.blocks.iter().collect();
        order.sort_by_key(|b| b.code_order);
        let mut seq = HlSequence::new();
        for block in order {
            for label in &block.labels {
                seq.define_label(*label);
            }
            for ins in &block.ins {
                seq.append(ins.clone());
            }
        }
        seq
    }
}

fn branch_target(by_label: &Map<Id, usize>, ins: &HlInstruction) -> Result<usize> {
    let idx = ins
        .opcode
        .branch_target()
        .expect("branch instruction without target index");
    let label = ins
        .operand(idx)
        .label_value()
        .ok_or_else(|| CompileError::runtime("branch without a label operand"))?;
    by_label
        .get(&label)
        .copied()
        .ok_or_else(|| CompileError::runtime(format!("undefined label {label}")))
}

/// Virtual registers read by an instruction.
pub fn instruction_uses(ins: &HlInstruction) -> VregSet {
    let mut uses = VregSet::new();
    let has_dest = ins.opcode.has_dest();
    for (i, op) in ins.operands.iter().enumerate() {
        if let Some(base) = op.base_vreg() {
            // a memref reads its base (and index) even in the
            // destination position
            if op.is_memref() || i > 0 || !has_dest {
                uses.insert(base);
            }
        }
        if let Some(index) = op.index_vreg() {
            uses.insert(index);
        }
    }
    match ins.opcode {
        // arity is invisible here; assume all argument vregs matter
        HlOpcode::Call => {
            for v in VREG_FIRST_ARG..=VREG_LAST_ARG {
                uses.insert(v);
            }
        }
        HlOpcode::Ret => uses.insert(VREG_RETVAL),
        _ => {}
    }
    uses
}

/// Virtual registers written by an instruction.
pub fn instruction_defs(ins: &HlInstruction) -> VregSet {
    let mut defs = VregSet::new();
    match ins.opcode {
        // the callee owns the argument registers and the return value
        HlOpcode::Call => {
            defs.insert(VREG_RETVAL);
            for v in VREG_FIRST_ARG..=VREG_LAST_ARG {
                defs.insert(v);
            }
        }
        // parameters are live on entry
        HlOpcode::Enter => {
            for v in VREG_FIRST_ARG..=VREG_LAST_ARG {
                defs.insert(v);
            }
        }
        opcode if opcode.has_dest() => {
            let dest = ins.operand(0);
            if !dest.is_memref() {
                if let Some(base) = dest.base_vreg() {
                    defs.insert(base);
                }
            }
        }
        _ => {}
    }
    defs
}

/// Per-block liveness facts.
#[derive(Clone, Debug)]
pub struct LiveVregs {
    live_in: Vec<VregSet>,
    live_out: Vec<VregSet>,
}

impl LiveVregs {
    /// Run the backward dataflow to a fixed point.
    pub fn execute(cfg: &ControlFlowGraph) -> LiveVregs {
        let n = cfg.blocks.len();
        let mut live_in = vec![VregSet::new(); n];
        let mut live_out = vec![VregSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for b in (0..n).rev() {
                let mut out = VregSet::new();
                for s in cfg.successors(b) {
                    out.union_with(&live_in[s]);
                }
                let mut live = out;
                for ins in cfg.blocks[b].ins.iter().rev() {
                    live.remove_all(&instruction_defs(ins));
                    live.union_with(&instruction_uses(ins));
                }
                changed |= live_out[b] != out || live_in[b] != live;
                live_out[b] = out;
                live_in[b] = live;
            }
        }
        trace!("liveness converged over {n} blocks");
        LiveVregs { live_in, live_out }
    }

    pub fn at_block_start(&self, block: usize) -> &VregSet {
        &self.live_in[block]
    }

    pub fn at_block_end(&self, block: usize) -> &VregSet {
        &self.live_out[block]
    }

    /// The (before, after) fact pair for every instruction of a block.
    pub fn per_instruction(
        &self,
        cfg: &ControlFlowGraph,
        block: usize,
    ) -> Vec<(VregSet, VregSet)> {
        let ins = &cfg.blocks[block].ins;
        let mut facts = vec![(VregSet::new(), VregSet::new()); ins.len()];
        let mut live = self.live_out[block];
        for (i, instruction) in ins.iter().enumerate().rev() {
            facts[i].1 = live;
            live.remove_all(&instruction_defs(instruction));
            live.union_with(&instruction_uses(instruction));
            facts[i].0 = live;
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Context;
    use crate::front::parse::parse;
    use crate::front::sema::analyze;
    use crate::middle::codegen::generate_unit;
    use crate::middle::ir::format_hl_sequence;
    use crate::middle::storage::allocate_storage;

    fn build_cfg(src: &str) -> ControlFlowGraph {
        let mut unit = parse(src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        ControlFlowGraph::build(&funcs[0].iseq).unwrap()
    }

    #[test]
    fn vregset_basics() {
        let mut s = VregSet::new();
        s.insert(3);
        s.insert(100);
        assert!(s.contains(3));
        assert!(s.contains(100));
        assert!(!s.contains(4));
        assert_eq!(s.len(), 2);
        let mut t = VregSet::new();
        t.insert(4);
        assert!(t.union_with(&s));
        assert!(!t.union_with(&s));
        s.remove(3);
        assert!(!s.contains(3));
        assert!(s.is_subset_of(&t));
    }

    #[test]
    fn straight_line_is_one_interior_block() {
        let cfg = build_cfg("int main(void) { int a; a = 1; return a; }");
        // entry + body + return-label block + exit
        let interiors = cfg
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Interior)
            .count();
        assert_eq!(interiors, 2);
    }

    #[test]
    fn branches_split_blocks_and_edges() {
        let cfg = build_cfg(
            "int main(void) { int a; a = 1; if (a) { a = 2; } return a; }",
        );
        // a conditional jump block has a branch and a fall-through edge
        let cjmp_block = cfg
            .blocks
            .iter()
            .find(|b| {
                b.ins
                    .last()
                    .is_some_and(|i| matches!(i.opcode, HlOpcode::CjmpF))
            })
            .expect("expected a conditional jump block");
        let kinds: Vec<EdgeKind> = cfg
            .edges
            .iter()
            .filter(|e| e.from == cjmp_block.id)
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&EdgeKind::Branch));
        assert!(kinds.contains(&EdgeKind::FallThrough));
    }

    #[test]
    fn call_does_not_split_blocks() {
        let cfg = build_cfg(
            "int f(void) { return 1; } int main(void) { int a; a = f(); a = a + 1; return a; }",
        );
        // f(): single-procedure graphs only; main is index 1 in the unit
        // but build_cfg builds funcs[0], which is f -- rebuild for main
        let _ = cfg;
        let mut unit = parse(
            "int f(void) { return 1; } int main(void) { int a; a = f(); a = a + 1; return a; }",
            "test.c",
        )
        .unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        let cfg = ControlFlowGraph::build(&funcs[1].iseq).unwrap();
        let has_call_mid_block = cfg.blocks.iter().any(|b| {
            b.ins
                .iter()
                .enumerate()
                .any(|(i, ins)| matches!(ins.opcode, HlOpcode::Call) && i + 1 < b.ins.len())
        });
        assert!(has_call_mid_block, "call should not terminate a block");
    }

    #[test]
    fn round_trip_preserves_instructions() {
        let src = "int main(void) { int i; i = 0; while (i < 3) { i = i + 1; } return i; }";
        let mut unit = parse(src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        let cfg = ControlFlowGraph::build(&funcs[0].iseq).unwrap();
        let rebuilt = cfg.create_instruction_sequence();
        assert_eq!(
            format_hl_sequence(&funcs[0].iseq),
            format_hl_sequence(&rebuilt)
        );
    }

    #[test]
    fn liveness_invariant_in_subset_use_out() {
        let cfg = build_cfg(
            "int main(void) { int i; int s; s = 0; i = 0; while (i < 10) { s = s + i; i = i + 1; } return s; }",
        );
        let live = LiveVregs::execute(&cfg);
        for b in &cfg.blocks {
            if b.kind != BlockKind::Interior {
                continue;
            }
            // in(b) ⊆ use(b) ∪ out(b)
            let mut allowed = *live.at_block_end(b.id);
            for ins in &b.ins {
                allowed.union_with(&instruction_uses(ins));
            }
            assert!(
                live.at_block_start(b.id).is_subset_of(&allowed),
                "block {} violates in ⊆ use ∪ out",
                b.id
            );
        }
    }

    #[test]
    fn loop_variable_is_live_across_blocks() {
        let cfg = build_cfg(
            "int main(void) { int i; i = 0; while (i < 10) { i = i + 1; } return i; }",
        );
        let live = LiveVregs::execute(&cfg);
        // vr10 holds i; it must be live at the start of the loop body
        let body = cfg
            .blocks
            .iter()
            .find(|b| {
                b.kind == BlockKind::Interior
                    && b.ins
                        .iter()
                        .any(|i| matches!(i.opcode, HlOpcode::Add(_)))
            })
            .unwrap();
        assert!(live.at_block_start(body.id).contains(10));
    }

    #[test]
    fn per_instruction_facts_shrink_at_death() {
        let cfg = build_cfg("int main(void) { int a; a = 1; return a; }");
        let live = LiveVregs::execute(&cfg);
        for b in &cfg.blocks {
            if b.kind != BlockKind::Interior || b.ins.is_empty() {
                continue;
            }
            let facts = live.per_instruction(&cfg, b.id);
            assert_eq!(facts.len(), b.ins.len());
        }
    }
}
