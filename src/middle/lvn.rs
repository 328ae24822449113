//! Local value numbering.
//!
//! Within each interior block, definitions of purely block-local virtual
//! registers are keyed by `(opcode, canonical operand members)`; a key
//! member is either the value number of a previously numbered register
//! or the raw operand.  Keys built entirely from immediates fold to a
//! known constant.  A second pass drops duplicate and constant
//! definitions, rewrites uses of duplicates to the first register that
//! computed the value, and replaces uses of known constants with
//! immediates.  `vr0..vr9` and anything live across a block boundary are
//! left untouched.

use std::cmp::Ordering;
use std::rc::Rc;

use log::debug;
use smallvec::SmallVec;

use crate::common::{Map, VregNum};
use crate::middle::cfg::{BlockKind, ControlFlowGraph, LiveVregs, VregSet};
use crate::middle::ir::{
    HlInstruction, HlOpcode, OpSize, Operand, OperandKind, VREG_LAST_ARG,
};

/// Run local value numbering over every interior block, producing the
/// transformed graph.
pub fn optimize(cfg: &ControlFlowGraph) -> ControlFlowGraph {
    let live = LiveVregs::execute(cfg);
    let mut result = cfg.clone();
    for block in &mut result.blocks {
        if block.kind != BlockKind::Interior || block.ins.is_empty() {
            continue;
        }
        let numbering = number_block(
            &block.ins,
            live.at_block_start(block.id),
            live.at_block_end(block.id),
        );
        block.ins = rewrite_block(&block.ins, &numbering);
    }
    result
}

#[derive(Clone, Debug)]
struct ValueNumber {
    num: u32,
    /// The first virtual register observed computing this value.
    orig_vreg: VregNum,
    constant: Option<i64>,
}

#[derive(Clone, Debug)]
enum KeyMember {
    Val(Rc<ValueNumber>),
    Opnd(Operand),
}

impl KeyMember {
    fn constant(&self) -> Option<i64> {
        match self {
            KeyMember::Val(v) => v.constant,
            KeyMember::Opnd(op) => op.imm_value(),
        }
    }
}

impl PartialEq for KeyMember {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyMember::Val(a), KeyMember::Val(b)) => a.num == b.num,
            (KeyMember::Opnd(a), KeyMember::Opnd(b)) => operand_key_eq(a, b),
            _ => false,
        }
    }
}

/// Operand equality for key purposes: only plain registers, immediates,
/// and label addresses compare equal; everything else is conservatively
/// distinct.
fn operand_key_eq(a: &Operand, b: &Operand) -> bool {
    match (a.kind, b.kind) {
        (OperandKind::Vreg(x), OperandKind::Vreg(y)) => x == y,
        (OperandKind::Imm(x), OperandKind::Imm(y)) => x == y,
        (OperandKind::ImmLabel(x), OperandKind::ImmLabel(y)) => x == y,
        _ => false,
    }
}

#[derive(Clone, Debug, PartialEq)]
struct LvnKey {
    opcode: HlOpcode,
    members: SmallVec<[KeyMember; 2]>,
}

impl LvnKey {
    fn new(opcode: HlOpcode, mut members: SmallVec<[KeyMember; 2]>) -> LvnKey {
        if members.len() == 2 && opcode.is_commutative() {
            members.sort_by(member_order);
        }
        LvnKey { opcode, members }
    }

    /// Fold the key to a constant when all members are known.
    fn fold(&self) -> Option<i64> {
        match self.members.len() {
            1 => {
                let v = self.members[0].constant()?;
                match self.opcode {
                    HlOpcode::Mov(_) => Some(v),
                    HlOpcode::Neg(_) => Some(v.wrapping_neg()),
                    HlOpcode::SConv(from, _) => Some(sign_extend(v, from)),
                    HlOpcode::UConv(from, _) => Some(zero_extend(v, from)),
                    _ => None,
                }
            }
            2 => {
                let a = self.members[0].constant()?;
                let b = self.members[1].constant()?;
                match self.opcode {
                    HlOpcode::Add(_) => Some(a.wrapping_add(b)),
                    HlOpcode::Sub(_) => Some(a.wrapping_sub(b)),
                    HlOpcode::Mul(_) => Some(a.wrapping_mul(b)),
                    // a zero divisor is left for the ISA to trap on
                    HlOpcode::Div(_) => a.checked_div(b),
                    HlOpcode::Mod(_) => a.checked_rem(b),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Canonical member order: value numbers before raw operands, lower
/// value numbers first, register-bearing operands before immediates and
/// labels.
fn member_order(a: &KeyMember, b: &KeyMember) -> Ordering {
    fn rank(m: &KeyMember) -> (u8, i64) {
        match m {
            KeyMember::Val(v) => (0, v.num as i64),
            KeyMember::Opnd(op) => match op.base_vreg() {
                Some(base) => (1, base as i64),
                None => (2, 0),
            },
        }
    }
    rank(a).cmp(&rank(b))
}

fn sign_extend(v: i64, size: OpSize) -> i64 {
    match size {
        OpSize::B => v as i8 as i64,
        OpSize::W => v as i16 as i64,
        OpSize::L => v as i32 as i64,
        OpSize::Q => v,
    }
}

fn zero_extend(v: i64, size: OpSize) -> i64 {
    match size {
        OpSize::B => v as u8 as i64,
        OpSize::W => v as u16 as i64,
        OpSize::L => v as u32 as i64,
        OpSize::Q => v,
    }
}

struct Numbering {
    vreg_val: Map<VregNum, Rc<ValueNumber>>,
}

impl Numbering {
    fn is_duplicate(&self, vreg: VregNum) -> bool {
        self.vreg_val
            .get(&vreg)
            .is_some_and(|v| v.orig_vreg != vreg)
    }

    fn constant_of(&self, vreg: VregNum) -> Option<i64> {
        self.vreg_val.get(&vreg).and_then(|v| v.constant)
    }
}

/// Is the destination a numbering candidate: a plain vreg above the ABI
/// range that is not live across the block boundary?
fn numbered_dest(
    ins: &HlInstruction,
    live_in: &VregSet,
    live_out: &VregSet,
) -> Option<VregNum> {
    if ins.num_operands() <= 1 || !ins.opcode.has_dest() {
        return None;
    }
    let dest = ins.operand(0);
    if dest.is_memref() {
        return None;
    }
    let vreg = dest.base_vreg()?;
    if vreg <= VREG_LAST_ARG || live_in.contains(vreg) || live_out.contains(vreg) {
        return None;
    }
    Some(vreg)
}

fn number_block(
    ins_list: &[HlInstruction],
    live_in: &VregSet,
    live_out: &VregSet,
) -> Numbering {
    let mut vreg_val: Map<VregNum, Rc<ValueNumber>> = Map::new();
    let mut key_val: Vec<(LvnKey, Rc<ValueNumber>)> = Vec::new();
    let mut next_num = 0;

    for ins in ins_list {
        let Some(dest_vreg) = numbered_dest(ins, live_in, live_out) else {
            continue;
        };
        let members = ins.operands[1..]
            .iter()
            .map(|op| match op.kind {
                OperandKind::Vreg(n) => match vreg_val.get(&n) {
                    Some(v) => KeyMember::Val(v.clone()),
                    None => KeyMember::Opnd(*op),
                },
                _ => KeyMember::Opnd(*op),
            })
            .collect();
        let key = LvnKey::new(ins.opcode, members);

        if let Some((_, existing)) = key_val.iter().find(|(k, _)| *k == key) {
            vreg_val.insert(dest_vreg, existing.clone());
        } else {
            let constant = key.fold();
            let value = Rc::new(ValueNumber {
                num: next_num,
                orig_vreg: dest_vreg,
                constant,
            });
            next_num += 1;
            vreg_val.insert(dest_vreg, value.clone());
            key_val.push((key, value));
        }
    }
    Numbering { vreg_val }
}

fn rewrite_block(ins_list: &[HlInstruction], numbering: &Numbering) -> Vec<HlInstruction> {
    let mut out = Vec::with_capacity(ins_list.len());
    let mut dropped = 0usize;
    for ins in ins_list {
        if ins.num_operands() <= 1 {
            out.push(ins.clone());
            continue;
        }
        // drop duplicate and compile-time-constant definitions
        if ins.opcode.has_dest() {
            let dest = ins.operand(0);
            if !dest.is_memref() {
                if let Some(vreg) = dest.base_vreg() {
                    if numbering.is_duplicate(vreg)
                        || numbering.constant_of(vreg).is_some()
                    {
                        dropped += 1;
                        continue;
                    }
                }
            }
        }

        let mut rewritten = ins.clone();
        let has_dest = ins.opcode.has_dest();
        for j in 0..ins.num_operands() {
            let op = *ins.operand(j);
            let is_use = op.is_memref() || j > 0 || !has_dest;
            if !is_use {
                continue;
            }
            let Some(base) = op.base_vreg() else { continue };
            if let Some(value) = numbering.constant_of(base) {
                if matches!(op.kind, OperandKind::Vreg(_)) {
                    *rewritten.operand_mut(j) = Operand::imm(value);
                    continue;
                }
            }
            if numbering.is_duplicate(base) {
                let orig = numbering.vreg_val[&base].orig_vreg;
                *rewritten.operand_mut(j) = op.with_base_vreg(orig);
            }
        }
        out.push(rewritten);
    }
    if dropped > 0 {
        debug!("LVN dropped {dropped} definitions");
    }
    out
}
