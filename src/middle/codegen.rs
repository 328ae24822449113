//! High-level code generation.
//!
//! Lowers the attributed AST of each function definition to a flat
//! high-level instruction sequence.  Expressions evaluate bottom-up into
//! operands; ephemeral temporaries are numbered from the function's vreg
//! high-water mark and the counter resets to the enclosing statement
//! list's mark after every statement, so statements reuse temp numbers.

use log::debug;

use crate::common::{
    intern, CompileError, Context, Id, Result, Set, VregNum,
};
use crate::front::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::front::literal::LiteralValue;
use crate::front::symtab::{Storage, SymbolId};
use crate::front::types::Type;
use crate::middle::cfg::MAX_VREGS;
use crate::middle::ir::{
    Cond, HlInstruction, HlOpcode, HlSequence, OpSize, Operand, VREG_FIRST_ARG,
    VREG_RETVAL,
};

/// The high-level code produced for one function definition.
#[derive(Clone, Debug)]
pub struct FunctionCode {
    pub name: Id,
    pub iseq: HlSequence,
    /// Bytes of memory-resident local storage (storage class 1).
    pub local_bytes: u32,
    /// Vregs holding named variables (locals and parameter homes); the
    /// register allocator treats these as function variables.
    pub func_vars: Set<VregNum>,
    pub return_label: Id,
}

/// Generate high-level code for every function definition in the unit.
pub fn generate_unit(unit: &Node, ctx: &mut Context) -> Result<Vec<FunctionCode>> {
    let items = match &unit.kind {
        NodeKind::Unit(items) => items,
        _ => return Err(CompileError::runtime("expected a translation unit")),
    };
    let mut funcs = Vec::new();
    for item in items {
        if let NodeKind::FunctionDef { .. } = item.kind {
            funcs.push(generate_function(item, ctx)?);
        }
    }
    Ok(funcs)
}

fn generate_function(n: &Node, ctx: &mut Context) -> Result<FunctionCode> {
    let (name, params, body) = match &n.kind {
        NodeKind::FunctionDef {
            name, params, body, ..
        } => (*name, params, body),
        _ => return Err(CompileError::runtime("expected a function definition")),
    };
    let local_bytes = n
        .attrs
        .local_bytes
        .ok_or_else(|| CompileError::runtime("function without storage totals"))?;
    let high_water = n
        .attrs
        .next_vreg
        .ok_or_else(|| CompileError::runtime("function without vreg high water"))?;

    let mut gen = HighLevelCodegen {
        ctx,
        iseq: HlSequence::new(),
        return_label: intern(&format!(".L{name}_return")),
        next_temp: high_water,
        reset_point: high_water,
        temp_floor: high_water,
        func_vars: Set::new(),
    };

    gen.iseq.append(HlInstruction::new(
        HlOpcode::Enter,
        &[Operand::imm(local_bytes as i64)],
    ));

    // Copy each parameter out of its argument vreg into a fresh
    // temporary, so the argument registers stay single-assignment.  The
    // parameter's symbol is re-homed to the copy.
    for p in params {
        let sym_id = p
            .attrs
            .symbol
            .ok_or_else(|| CompileError::runtime("parameter without symbol"))?;
        let (ty, storage) = {
            let sym = gen.ctx.symtab.symbol(sym_id);
            (sym.ty.clone(), sym.storage.clone())
        };
        let arg_vreg = match storage {
            Some(Storage::Vreg(v)) => v,
            _ => return Err(CompileError::runtime("parameter without argument vreg")),
        };
        let home = gen.alloc_temp()?;
        let size = OpSize::for_type(&ty)?;
        gen.iseq.append(HlInstruction::new(
            HlOpcode::Mov(size),
            &[Operand::vreg(home), Operand::vreg(arg_vreg)],
        ));
        gen.ctx.symtab.symbol_mut(sym_id).storage = Some(Storage::Vreg(home));
        gen.func_vars.insert(home);
    }
    gen.temp_floor = gen.next_temp;
    gen.reset_point = gen.next_temp;

    gen.gen_stmt(body)?;

    gen.iseq.define_label(gen.return_label);
    gen.iseq.append(HlInstruction::new(
        HlOpcode::Leave,
        &[Operand::imm(local_bytes as i64)],
    ));
    gen.iseq.append(HlInstruction::new(HlOpcode::Ret, &[]));

    debug!("generated {} instructions for {name}", gen.iseq.len());
    Ok(FunctionCode {
        name,
        iseq: gen.iseq,
        local_bytes,
        func_vars: gen.func_vars,
        return_label: gen.return_label,
    })
}

struct HighLevelCodegen<'a> {
    ctx: &'a mut Context,
    iseq: HlSequence,
    return_label: Id,
    next_temp: VregNum,
    reset_point: VregNum,
    temp_floor: VregNum,
    func_vars: Set<VregNum>,
}

impl HighLevelCodegen<'_> {
    fn alloc_temp(&mut self) -> Result<VregNum> {
        let vreg = self.next_temp;
        if vreg as usize >= MAX_VREGS {
            return Err(CompileError::runtime("virtual register limit exceeded"));
        }
        self.next_temp += 1;
        Ok(vreg)
    }

    fn temp_operand(&mut self) -> Result<Operand> {
        Ok(Operand::vreg(self.alloc_temp()?))
    }

    fn emit(&mut self, opcode: HlOpcode, operands: &[Operand]) {
        self.iseq.append(HlInstruction::new(opcode, operands));
    }

    fn gen_stmt(&mut self, n: &Node) -> Result<()> {
        match &n.kind {
            NodeKind::StatementList(stmts) => {
                let saved_reset = self.reset_point;
                let saved_next = self.next_temp;
                let list_mark = n
                    .attrs
                    .next_vreg
                    .unwrap_or(self.temp_floor)
                    .max(self.temp_floor);
                self.reset_point = list_mark;
                self.next_temp = list_mark;
                for s in stmts {
                    self.gen_stmt(s)?;
                    self.next_temp = self.reset_point;
                }
                self.reset_point = saved_reset;
                self.next_temp = saved_next;
                Ok(())
            }
            NodeKind::VarDecl { declarators, .. } => {
                for d in declarators {
                    if let NodeKind::InitDeclarator { decl, init } = &d.kind {
                        self.gen_local_init(decl, init)?;
                    }
                }
                Ok(())
            }
            NodeKind::ExpressionStatement(e) => {
                self.gen_expr(e)?;
                Ok(())
            }
            NodeKind::EmptyStatement => Ok(()),
            NodeKind::Return => {
                self.emit(HlOpcode::Jmp, &[Operand::label(self.return_label)]);
                Ok(())
            }
            NodeKind::ReturnExpr(e) => {
                let value = self.gen_expr(e)?;
                let size = OpSize::for_type(expr_ty(e)?.as_ref())?;
                self.emit(
                    HlOpcode::Mov(size),
                    &[Operand::vreg(VREG_RETVAL), value],
                );
                self.emit(HlOpcode::Jmp, &[Operand::label(self.return_label)]);
                Ok(())
            }
            NodeKind::If { cond, then } => {
                let after = self.ctx.next_label();
                let c = self.gen_expr(cond)?;
                self.emit(HlOpcode::CjmpF, &[c, Operand::label(after)]);
                self.gen_stmt(then)?;
                self.iseq.define_label(after);
                Ok(())
            }
            NodeKind::IfElse { cond, then, els } => {
                let else_label = self.ctx.next_label();
                let after = self.ctx.next_label();
                let c = self.gen_expr(cond)?;
                self.emit(HlOpcode::CjmpF, &[c, Operand::label(else_label)]);
                self.gen_stmt(then)?;
                self.emit(HlOpcode::Jmp, &[Operand::label(after)]);
                self.iseq.define_label(else_label);
                self.gen_stmt(els)?;
                self.iseq.define_label(after);
                Ok(())
            }
            NodeKind::While { cond, body } => {
                let body_label = self.ctx.next_label();
                let cond_label = self.ctx.next_label();
                self.emit(HlOpcode::Jmp, &[Operand::label(cond_label)]);
                self.iseq.define_label(body_label);
                self.gen_stmt(body)?;
                self.iseq.define_label(cond_label);
                let c = self.gen_expr(cond)?;
                self.emit(HlOpcode::CjmpT, &[c, Operand::label(body_label)]);
                Ok(())
            }
            NodeKind::DoWhile { body, cond } => {
                let body_label = self.ctx.next_label();
                self.iseq.define_label(body_label);
                self.gen_stmt(body)?;
                let c = self.gen_expr(cond)?;
                self.emit(HlOpcode::CjmpT, &[c, Operand::label(body_label)]);
                Ok(())
            }
            NodeKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let body_label = self.ctx.next_label();
                let cond_label = self.ctx.next_label();
                if let Some(e) = init {
                    self.gen_expr(e)?;
                }
                self.emit(HlOpcode::Jmp, &[Operand::label(cond_label)]);
                self.iseq.define_label(body_label);
                self.gen_stmt(body)?;
                if let Some(e) = update {
                    self.gen_expr(e)?;
                }
                self.iseq.define_label(cond_label);
                match cond {
                    Some(e) => {
                        let c = self.gen_expr(e)?;
                        self.emit(HlOpcode::CjmpT, &[c, Operand::label(body_label)]);
                    }
                    None => {
                        self.emit(HlOpcode::Jmp, &[Operand::label(body_label)]);
                    }
                }
                Ok(())
            }
            _ => Err(CompileError::runtime(format!(
                "unexpected node in statement position at {}",
                n.loc
            ))),
        }
    }

    fn gen_local_init(&mut self, decl: &Node, init: &Node) -> Result<()> {
        let sym_id = decl
            .attrs
            .symbol
            .ok_or_else(|| CompileError::runtime("declarator without symbol"))?;
        let ty = self.ctx.symtab.symbol(sym_id).ty.clone();
        let target = self.symbol_operand(sym_id, false)?;
        let value = self.gen_expr(init)?;
        let size = OpSize::for_type(&ty)?;
        self.emit(HlOpcode::Mov(size), &[target, value]);
        Ok(())
    }

    /// The operand referring to a symbol's storage.  Memory- and
    /// global-resident symbols materialize their address into a fresh
    /// temporary; arrays keep the address (decay), scalars dereference.
    fn symbol_operand(&mut self, sym_id: SymbolId, is_array: bool) -> Result<Operand> {
        let storage = self
            .ctx
            .symtab
            .symbol(sym_id)
            .storage
            .clone()
            .ok_or_else(|| CompileError::runtime("symbol without storage"))?;
        match storage {
            Storage::Vreg(v) => {
                self.func_vars.insert(v);
                Ok(Operand::vreg(v))
            }
            Storage::Memory(offset) => {
                let addr = self.temp_operand()?;
                self.emit(
                    HlOpcode::LocalAddr,
                    &[addr, Operand::imm(offset as i64)],
                );
                Ok(if is_array { addr } else { addr.to_memref() })
            }
            Storage::Global(name) => {
                let addr = self.temp_operand()?;
                self.emit(
                    HlOpcode::Mov(OpSize::Q),
                    &[addr, Operand::imm_label(name)],
                );
                Ok(if is_array { addr } else { addr.to_memref() })
            }
        }
    }

    fn gen_expr(&mut self, n: &Node) -> Result<Operand> {
        match &n.kind {
            NodeKind::VarRef(_) => {
                let sym_id = n
                    .attrs
                    .symbol
                    .ok_or_else(|| CompileError::runtime("unresolved variable reference"))?;
                self.symbol_operand(sym_id, n.attrs.is_array)
            }
            NodeKind::Literal { .. } => self.gen_literal(n),
            NodeKind::Unary { op, operand } => self.gen_unary(n, *op, operand),
            NodeKind::Binary { op, lhs, rhs } => self.gen_binary(n, *op, lhs, rhs),
            NodeKind::ArrayElementRef { base, index } => {
                self.gen_array_element(n, base, index)
            }
            NodeKind::FieldRef { base, field } => {
                let base_op = self.gen_expr(base)?;
                let def = expr_ty(base)?
                    .struct_def()
                    .cloned()
                    .ok_or_else(|| CompileError::runtime("field access on non-struct"))?;
                let addr = if base_op.is_memref() {
                    base_op.memref_to()
                } else {
                    base_op
                };
                self.gen_field_access(n, addr, &def, *field)
            }
            NodeKind::IndirectFieldRef { base, field } => {
                let base_op = self.gen_expr(base)?;
                let def = expr_ty(base)?
                    .base_type()
                    .and_then(|t| t.struct_def())
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::runtime("indirect field access on non-struct")
                    })?;
                self.gen_field_access(n, base_op, &def, *field)
            }
            NodeKind::Call { callee, args } => self.gen_call(n, callee, args),
            NodeKind::ImplicitConversion(inner) => self.gen_conversion(n, inner),
            _ => Err(CompileError::runtime(format!(
                "unexpected node in expression position at {}",
                n.loc
            ))),
        }
    }

    fn gen_literal(&mut self, n: &Node) -> Result<Operand> {
        let value = n
            .attrs
            .literal
            .as_ref()
            .ok_or_else(|| CompileError::runtime("literal without a value"))?;
        let size = OpSize::for_type(expr_ty(n)?.as_ref())?;
        let dest = self.temp_operand()?;
        match value {
            LiteralValue::Integer { value, .. } => {
                let value = *value;
                self.emit(HlOpcode::Mov(size), &[dest, Operand::imm(value)]);
            }
            LiteralValue::Character(c) => {
                let value = *c as i64;
                self.emit(HlOpcode::Mov(size), &[dest, Operand::imm(value)]);
            }
            LiteralValue::String { .. } => {
                let label_op = n.attrs.operand.ok_or_else(|| {
                    CompileError::runtime("string literal without a label")
                })?;
                self.emit(HlOpcode::Mov(size), &[dest, label_op]);
            }
        }
        Ok(dest)
    }

    fn gen_unary(&mut self, n: &Node, op: UnaryOp, operand: &Node) -> Result<Operand> {
        let value = self.gen_expr(operand)?;
        match op {
            UnaryOp::AddrOf => Ok(if value.is_memref() {
                value.memref_to()
            } else {
                value
            }),
            UnaryOp::Deref => {
                if !value.is_memref() {
                    Ok(value.to_memref())
                } else {
                    // multi-level pointer: load the pointer value first
                    let size = OpSize::for_type(expr_ty(operand)?.as_ref())?;
                    let temp = self.temp_operand()?;
                    self.emit(HlOpcode::Mov(size), &[temp, value]);
                    Ok(temp.to_memref())
                }
            }
            UnaryOp::Neg => {
                let size = OpSize::for_type(expr_ty(n)?.as_ref())?;
                let dest = self.temp_operand()?;
                self.emit(HlOpcode::Neg(size), &[dest, value]);
                Ok(dest)
            }
            UnaryOp::Not => {
                let size = OpSize::for_type(expr_ty(n)?.as_ref())?;
                let dest = self.temp_operand()?;
                self.emit(
                    HlOpcode::Cmp(Cond::Eq, size),
                    &[dest, value, Operand::imm(0)],
                );
                Ok(dest)
            }
        }
    }

    fn gen_binary(
        &mut self,
        n: &Node,
        op: BinaryOp,
        lhs: &Node,
        rhs: &Node,
    ) -> Result<Operand> {
        match op {
            BinaryOp::Assign => {
                let target = self.gen_expr(lhs)?;
                let value = self.gen_expr(rhs)?;
                let size = OpSize::for_type(expr_ty(lhs)?.as_ref())?;
                self.emit(HlOpcode::Mov(size), &[target, value]);
                Ok(target)
            }
            BinaryOp::LogAnd | BinaryOp::LogOr => self.gen_short_circuit(op, lhs, rhs),
            _ => {
                let lop = self.gen_expr(lhs)?;
                let rop = self.gen_expr(rhs)?;
                // arithmetic runs at the width of the result (pointer
                // arithmetic is quad-sized); comparisons at the width of
                // the compared operands
                let arith = OpSize::for_type(expr_ty(n)?.as_ref())?;
                let cmp = OpSize::for_type(expr_ty(lhs)?.as_ref())?;
                let opcode = match op {
                    BinaryOp::Plus => HlOpcode::Add(arith),
                    BinaryOp::Minus => HlOpcode::Sub(arith),
                    BinaryOp::Mul => HlOpcode::Mul(arith),
                    BinaryOp::Div => HlOpcode::Div(arith),
                    BinaryOp::Mod => HlOpcode::Mod(arith),
                    BinaryOp::Lt => HlOpcode::Cmp(Cond::Lt, cmp),
                    BinaryOp::Lte => HlOpcode::Cmp(Cond::Lte, cmp),
                    BinaryOp::Gt => HlOpcode::Cmp(Cond::Gt, cmp),
                    BinaryOp::Gte => HlOpcode::Cmp(Cond::Gte, cmp),
                    BinaryOp::Eq => HlOpcode::Cmp(Cond::Eq, cmp),
                    BinaryOp::Neq => HlOpcode::Cmp(Cond::Neq, cmp),
                    BinaryOp::Assign | BinaryOp::LogAnd | BinaryOp::LogOr => {
                        unreachable!()
                    }
                };
                let dest = self.temp_operand()?;
                self.emit(opcode, &[dest, lop, rop]);
                Ok(dest)
            }
        }
    }

    /// Short-circuit lowering for `&&` and `||`, producing 0/1 in a
    /// temporary.
    fn gen_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: &Node,
        rhs: &Node,
    ) -> Result<Operand> {
        let out = self.ctx.next_label();
        let dest = self.temp_operand()?;
        let (early, late): (i64, i64) = if op == BinaryOp::LogAnd {
            (0, 1)
        } else {
            (1, 0)
        };
        let skip = if op == BinaryOp::LogAnd {
            HlOpcode::CjmpF
        } else {
            HlOpcode::CjmpT
        };
        self.emit(HlOpcode::Mov(OpSize::L), &[dest, Operand::imm(early)]);
        let lop = self.gen_expr(lhs)?;
        self.emit(skip, &[lop, Operand::label(out)]);
        let rop = self.gen_expr(rhs)?;
        self.emit(skip, &[rop, Operand::label(out)]);
        self.emit(HlOpcode::Mov(OpSize::L), &[dest, Operand::imm(late)]);
        self.iseq.define_label(out);
        Ok(dest)
    }

    fn gen_array_element(
        &mut self,
        n: &Node,
        base: &Node,
        index: &Node,
    ) -> Result<Operand> {
        let base_op = self.gen_expr(base)?;
        let index_op = self.gen_expr(index)?;
        // element stride comes from the pointed-to type, which for a
        // multi-dimensional access is itself an array
        let elem_ty = expr_ty(base)?
            .base_type()
            .ok_or_else(|| CompileError::runtime("subscript of non-pointer"))?
            .clone();
        let stride = elem_ty.storage_size()?;

        let scaled = self.temp_operand()?;
        self.emit(
            HlOpcode::Mul(OpSize::Q),
            &[scaled, index_op, Operand::imm(stride as i64)],
        );
        let addr = self.temp_operand()?;
        self.emit(HlOpcode::Add(OpSize::Q), &[addr, scaled, base_op]);
        Ok(if n.attrs.is_array {
            addr
        } else {
            addr.to_memref()
        })
    }

    fn gen_field_access(
        &mut self,
        n: &Node,
        base_addr: Operand,
        def: &std::rc::Rc<crate::front::types::StructDef>,
        field: Id,
    ) -> Result<Operand> {
        let member = def.find_member(field).ok_or_else(|| {
            CompileError::runtime(format!("struct {} has no member {field}", def.tag))
        })?;
        let offset = self.temp_operand()?;
        self.emit(
            HlOpcode::Mov(OpSize::Q),
            &[offset, Operand::imm(member.offset as i64)],
        );
        let addr = self.temp_operand()?;
        self.emit(HlOpcode::Add(OpSize::Q), &[addr, base_addr, offset]);
        Ok(if n.attrs.is_array {
            addr
        } else {
            addr.to_memref()
        })
    }

    fn gen_call(&mut self, n: &Node, callee: &Node, args: &[Node]) -> Result<Operand> {
        let name = match &callee.kind {
            NodeKind::VarRef(name) => *name,
            _ => return Err(CompileError::runtime("call of a non-name")),
        };
        for (i, arg) in args.iter().enumerate() {
            let value = self.gen_expr(arg)?;
            let size = OpSize::for_type(expr_ty(arg)?.as_ref())?;
            self.emit(
                HlOpcode::Mov(size),
                &[Operand::vreg(VREG_FIRST_ARG + i as VregNum), value],
            );
        }
        self.emit(HlOpcode::Call, &[Operand::label(name)]);
        let ret_ty = expr_ty(n)?;
        if ret_ty.is_void() {
            return Ok(Operand::vreg(VREG_RETVAL));
        }
        // Copy the return value out of vr0 immediately; another call in
        // the same expression would clobber it there.
        let size = OpSize::for_type(&ret_ty)?;
        let dest = self.temp_operand()?;
        self.emit(HlOpcode::Mov(size), &[dest, Operand::vreg(VREG_RETVAL)]);
        Ok(dest)
    }

    fn gen_conversion(&mut self, n: &Node, inner: &Node) -> Result<Operand> {
        let value = self.gen_expr(inner)?;
        let from = expr_ty(inner)?;
        let to = expr_ty(n)?;
        let from_kind = from
            .basic_kind()
            .ok_or_else(|| CompileError::runtime("conversion of non-integral value"))?;
        let to_kind = to
            .basic_kind()
            .ok_or_else(|| CompileError::runtime("conversion to non-integral type"))?;
        // Same or lower rank: a signedness reinterpretation, no code.
        if to_kind <= from_kind {
            return Ok(value);
        }
        let from_size = OpSize::for_type(&from)?;
        let to_size = OpSize::for_type(&to)?;
        // widening preserves the source's value: sign-extend signed
        // sources, zero-extend unsigned ones
        let opcode = if from.is_signed() {
            HlOpcode::SConv(from_size, to_size)
        } else {
            HlOpcode::UConv(from_size, to_size)
        };
        let dest = self.temp_operand()?;
        self.emit(opcode, &[dest, value]);
        Ok(dest)
    }
}

fn expr_ty(n: &Node) -> Result<std::rc::Rc<Type>> {
    n.attrs
        .ty
        .clone()
        .ok_or_else(|| CompileError::runtime(format!("node at {} has no type", n.loc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse::parse;
    use crate::front::sema::analyze;
    use crate::middle::ir::format_hl_sequence;
    use crate::middle::storage::allocate_storage;

    fn compile(src: &str) -> (Vec<FunctionCode>, Context) {
        let mut unit = parse(src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        let funcs = generate_unit(&unit, &mut ctx).unwrap();
        (funcs, ctx)
    }

    fn hl_text(src: &str) -> String {
        let (funcs, _) = compile(src);
        funcs
            .iter()
            .map(|f| format_hl_sequence(&f.iseq))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn squish(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn return_constant() {
        let text = squish(&hl_text("int main(void) { return 42; }"));
        assert!(text.contains("enter $0"));
        assert!(text.contains("mov_l vr10, $42"));
        assert!(text.contains("mov_l vr0, vr10"));
        assert!(text.contains("jmp .Lmain_return"));
        assert!(text.contains(".Lmain_return: leave $0"));
        assert!(text.ends_with("ret"));
    }

    #[test]
    fn parameters_are_rehomed() {
        let text = squish(&hl_text("int f(int x) { return x + 1; }"));
        assert!(text.contains("mov_l vr10, vr1"));
        assert!(text.contains("add_l vr12, vr10, vr11"));
        assert!(text.contains("mov_l vr0, vr12"));
        assert!(text.contains("jmp .Lf_return"));
    }

    #[test]
    fn array_store_scales_index() {
        let text = squish(&hl_text(
            "int main(void) { int a[4]; a[2] = 7; return a[2]; }",
        ));
        assert!(text.contains("localaddr vr10, $0"));
        assert!(text.contains("mul_q"));
        assert!(text.contains("$4"));
        assert!(text.contains("mov_l (vr"), "store through a memref: {text}");
    }

    #[test]
    fn struct_field_uses_offset() {
        let text = squish(&hl_text(
            "struct P { int x; int y; }; int main(void) { struct P p; p.y = 3; return p.y; }",
        ));
        assert!(text.contains("localaddr"));
        assert!(text.contains("mov_q vr11, $4"), "field offset of y: {text}");
        assert!(text.contains("add_q"));
    }

    #[test]
    fn conversion_selects_widening_opcode() {
        let text = squish(&hl_text(
            "int main(void) { char c; int i; c = 'a'; i = c; return i; }",
        ));
        assert!(text.contains("sconv_bl"), "expected sconv_bl in: {text}");
    }

    #[test]
    fn while_loop_shape() {
        let text = hl_text("int main(void) { int i; i = 0; while (i < 10) { i = i + 1; } return i; }");
        let jmp_at = text.find("jmp      .L1").unwrap();
        let body_at = text.find(".L0:").unwrap();
        let cond_at = text.find(".L1:").unwrap();
        assert!(jmp_at < body_at && body_at < cond_at);
        assert!(text.contains("cjmp_t"));
    }

    #[test]
    fn call_moves_arguments_into_arg_vregs() {
        let text = squish(&hl_text(
            "int add(int a, int b) { return a + b; } int main(void) { return add(1, 2); }",
        ));
        assert!(text.contains("mov_l vr1,"));
        assert!(text.contains("mov_l vr2,"));
        assert!(text.contains("call add"));
        // the return value is copied out of vr0 before being consumed
        assert!(text.contains("mov_l vr12, vr0"), "got: {text}");
        assert!(text.contains("mov_l vr0, vr12"));
    }

    #[test]
    fn string_literal_moves_label() {
        let (funcs, ctx) = compile(
            "int puts(char *s); int main(void) { puts(\"hi\"); return 0; }",
        );
        let text = squish(&format_hl_sequence(&funcs[0].iseq));
        assert!(text.contains("mov_q vr10, $_str0"), "got: {text}");
        assert_eq!(ctx.strings[0].raw, "hi");
    }

    #[test]
    fn short_circuit_and() {
        let text = squish(&hl_text(
            "int main(void) { int a; int b; a = 1; b = 0; return a && b; }",
        ));
        assert!(text.contains("cjmp_f"));
        assert!(text.contains("mov_l vr12, $0"), "got: {text}");
        assert!(text.contains("mov_l vr12, $1"));
    }

    #[test]
    fn global_reference_uses_label_address() {
        let text = squish(&hl_text("int g; int main(void) { g = 5; return g; }"));
        assert!(text.contains("mov_q vr10, $g"), "got: {text}");
        assert!(text.contains("mov_l (vr10),"), "store through address: {text}");
    }

    #[test]
    fn temporaries_reset_between_statements() {
        let text = hl_text(
            "int main(void) { int a; a = 1 + 2; a = 3 + 4; return a; }",
        );
        // both statements use the same temp numbers
        let count = text.matches("add_l    vr13, vr11, vr12").count();
        assert_eq!(count, 2, "temps should reset, got:\n{text}");
    }

    #[test]
    fn function_vars_collected() {
        let (funcs, _) = compile("int f(int x) { int y; y = x; return y; }");
        // y lives in vr10, the parameter home in vr11
        assert!(funcs[0].func_vars.contains(&10));
        assert!(funcs[0].func_vars.contains(&11));
    }
}
