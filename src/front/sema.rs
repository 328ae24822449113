//! Semantic analysis.
//!
//! A single pass over the AST that resolves names against the scoped
//! symbol table, constructs types, checks the expression typing rules,
//! and materializes the usual arithmetic conversions as explicit
//! `ImplicitConversion` nodes.  The first violation aborts the
//! compilation; there is no recovery.

use std::rc::Rc;

use crate::common::{intern, CompileError, Context, Id, Location, Result};
use crate::front::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::front::literal::{LiteralValue, LiteralValueKind};
use crate::front::symtab::{ScopeId, SymbolId, SymbolKind, SymbolTable};
use crate::front::types::{
    decode_basic_type, BasicTypeKind, Member, StructDef, Type,
};
use crate::middle::storage::StorageCalculator;

/// Analyze a translation unit, attributing the AST in place.
pub fn analyze(unit: &mut Node, ctx: &mut Context) -> Result<()> {
    let mut sema = SemanticAnalyzer {
        ctx,
        cur: SymbolTable::GLOBAL_SCOPE,
        cur_fn: None,
    };
    match &mut unit.kind {
        NodeKind::Unit(items) => {
            for item in items {
                sema.visit_stmt(item)?;
            }
            Ok(())
        }
        _ => Err(CompileError::runtime("expected a translation unit")),
    }
}

struct SemanticAnalyzer<'a> {
    ctx: &'a mut Context,
    cur: ScopeId,
    cur_fn: Option<SymbolId>,
}

impl SemanticAnalyzer<'_> {
    fn enter_scope(&mut self) {
        self.cur = self.ctx.symtab.enter_scope(self.cur);
    }

    fn leave_scope(&mut self) {
        self.cur = self
            .ctx
            .symtab
            .parent_of(self.cur)
            .expect("left the global scope");
    }

    fn visit_stmt(&mut self, n: &mut Node) -> Result<()> {
        match &mut n.kind {
            NodeKind::StructDef { .. } => self.visit_struct_def(n),
            NodeKind::VarDecl { .. } => self.visit_var_decl(n, None),
            NodeKind::FunctionDef { .. } => self.visit_function_def(n),
            NodeKind::FunctionDecl { .. } => self.visit_function_decl(n),
            NodeKind::StatementList(stmts) => {
                self.enter_scope();
                for s in stmts {
                    self.visit_stmt(s)?;
                }
                self.leave_scope();
                Ok(())
            }
            NodeKind::ExpressionStatement(e) => self.visit_expr(e),
            NodeKind::EmptyStatement => Ok(()),
            NodeKind::Return => {
                let ret = self.current_return_type(n.loc)?;
                if !ret.is_void() {
                    return Err(CompileError::semantic(
                        n.loc,
                        "non-void function must return a value",
                    ));
                }
                Ok(())
            }
            NodeKind::ReturnExpr(e) => {
                let ret = self.current_return_type(n.loc)?;
                self.visit_expr(e)?;
                let ety = ty_of(e)?;
                if ret.is_void() {
                    return Err(CompileError::semantic(
                        n.loc,
                        "void function may not return a value",
                    ));
                }
                analyze_assign_ref(&ret, &ety, n.loc)?;
                if ret.is_integral() && ety.is_integral() && !ety.is_same(&ret) {
                    wrap_conversion(e, ret);
                }
                Ok(())
            }
            NodeKind::If { cond, then } => {
                self.visit_expr(cond)?;
                self.visit_stmt(then)
            }
            NodeKind::IfElse { cond, then, els } => {
                self.visit_expr(cond)?;
                self.visit_stmt(then)?;
                self.visit_stmt(els)
            }
            NodeKind::While { cond, body } => {
                self.visit_expr(cond)?;
                self.visit_stmt(body)
            }
            NodeKind::DoWhile { body, cond } => {
                self.visit_stmt(body)?;
                self.visit_expr(cond)
            }
            NodeKind::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(e) = init {
                    self.visit_expr(e)?;
                }
                if let Some(e) = cond {
                    self.visit_expr(e)?;
                }
                if let Some(e) = update {
                    self.visit_expr(e)?;
                }
                self.visit_stmt(body)
            }
            _ => Err(CompileError::runtime(format!(
                "unexpected node in statement position at {}",
                n.loc
            ))),
        }
    }

    fn current_return_type(&self, loc: Location) -> Result<Rc<Type>> {
        let sym = self.cur_fn.ok_or_else(|| {
            CompileError::semantic(loc, "return statement outside of a function")
        })?;
        let fn_ty = &self.ctx.symtab.symbol(sym).ty;
        Ok(fn_ty
            .return_type()
            .expect("function symbol with non-function type")
            .clone())
    }

    /// Evaluate a type expression node.
    fn eval_type(&mut self, n: &mut Node) -> Result<Rc<Type>> {
        let ty = match &mut n.kind {
            NodeKind::BasicType(keywords) => decode_basic_type(keywords, n.loc)?,
            NodeKind::StructTypeRef(tag) => {
                let key = intern(&format!("struct {tag}"));
                let sym = self
                    .ctx
                    .symtab
                    .lookup_recursive(self.cur, key)
                    .ok_or_else(|| {
                        CompileError::semantic(
                            n.loc,
                            format!("struct {tag} is not defined"),
                        )
                    })?;
                self.ctx.symtab.symbol(sym).ty.clone()
            }
            NodeKind::UnionTypeRef(_) => {
                return Err(CompileError::runtime("union types aren't supported"))
            }
            NodeKind::PointerType(inner) => Type::pointer(self.eval_type(inner)?),
            _ => {
                return Err(CompileError::runtime(format!(
                    "expected a type at {}",
                    n.loc
                )))
            }
        };
        n.attrs.ty = Some(ty.clone());
        Ok(ty)
    }

    fn visit_var_decl(
        &mut self,
        n: &mut Node,
        owner: Option<&Rc<StructDef>>,
    ) -> Result<()> {
        match &mut n.kind {
            NodeKind::VarDecl { base, declarators } => {
                let base_ty = self.eval_type(base)?;
                for d in declarators {
                    self.visit_declarator(d, base_ty.clone(), owner)?;
                }
                Ok(())
            }
            _ => Err(CompileError::runtime("expected a declaration")),
        }
    }

    /// Fold a declarator over the current type, binding the name when the
    /// named declarator is reached.
    fn visit_declarator(
        &mut self,
        d: &mut Node,
        cur_ty: Rc<Type>,
        owner: Option<&Rc<StructDef>>,
    ) -> Result<()> {
        let loc = d.loc;
        match &mut d.kind {
            NodeKind::NamedDeclarator(name) => {
                let name = *name;
                if self.ctx.symtab.lookup_local(self.cur, name).is_some() {
                    return Err(CompileError::semantic(
                        loc,
                        format!("'{name}' is already defined in this scope"),
                    ));
                }
                let sym = self.ctx.symtab.define(
                    self.cur,
                    SymbolKind::Variable,
                    name,
                    cur_ty.clone(),
                );
                d.attrs.symbol = Some(sym);
                d.attrs.ty = Some(cur_ty.clone());
                if let Some(def) = owner {
                    def.add_member(Member::new(name, cur_ty));
                }
                Ok(())
            }
            NodeKind::PointerDeclarator(child) => {
                let wrapped = Type::pointer(cur_ty);
                self.visit_declarator(child, wrapped.clone(), owner)?;
                d.attrs.ty = Some(wrapped);
                d.attrs.symbol = child.attrs.symbol;
                Ok(())
            }
            NodeKind::ArrayDeclarator { decl, size } => {
                let wrapped = Type::array(cur_ty, *size);
                self.visit_declarator(decl, wrapped.clone(), owner)?;
                d.attrs.ty = Some(wrapped);
                d.attrs.symbol = decl.attrs.symbol;
                Ok(())
            }
            NodeKind::InitDeclarator { decl, init } => {
                if owner.is_some() {
                    return Err(CompileError::semantic(
                        loc,
                        "initializers are not allowed in struct fields",
                    ));
                }
                self.visit_declarator(decl, cur_ty, owner)?;
                let lty = ty_of(decl)?;
                self.visit_expr(init)?;
                let rty = ty_of(init)?;
                analyze_assign_ref(&lty, &rty, loc)?;
                if lty.is_integral() && rty.is_integral() && !rty.is_same(&lty) {
                    wrap_conversion(init, lty.clone());
                }
                d.attrs.symbol = decl.attrs.symbol;
                d.attrs.ty = Some(lty);
                Ok(())
            }
            _ => Err(CompileError::runtime("expected a declarator")),
        }
    }

    fn visit_struct_def(&mut self, n: &mut Node) -> Result<()> {
        let loc = n.loc;
        match &mut n.kind {
            NodeKind::StructDef { tag, fields } => {
                let tag = *tag;
                let key = intern(&format!("struct {tag}"));
                if self.ctx.symtab.lookup_local(self.cur, key).is_some() {
                    return Err(CompileError::semantic(
                        loc,
                        format!("struct {tag} is already defined in this scope"),
                    ));
                }
                let def = StructDef::new(tag);
                let ty = Type::structure(def.clone());
                self.ctx
                    .symtab
                    .define(self.cur, SymbolKind::Type, key, ty.clone());
                n.attrs.ty = Some(ty);

                self.enter_scope();
                for field in fields.iter_mut() {
                    self.visit_var_decl(field, Some(&def))?;
                }
                self.leave_scope();

                // Lay out the fields now that the definition is complete.
                let mut calc = StorageCalculator::new();
                for i in 0..def.num_members() {
                    let member_ty = def.members()[i].ty.clone();
                    let offset = calc
                        .add_field(&member_ty)
                        .map_err(|_| {
                            CompileError::semantic(
                                loc,
                                format!("struct {tag} has a field of incomplete type"),
                            )
                        })?;
                    def.set_member_offset(i, offset);
                }
                calc.finish();
                def.set_layout(calc.size(), calc.align());
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn visit_param(&mut self, p: &mut Node) -> Result<Member> {
        match &mut p.kind {
            NodeKind::Parameter { base, decl } => {
                let base_ty = self.eval_type(base)?;
                self.visit_declarator(decl, base_ty, None)?;
                let sym = decl
                    .attrs
                    .symbol
                    .expect("parameter declarator without a symbol");
                p.attrs.symbol = Some(sym);
                let symbol = self.ctx.symtab.symbol(sym);
                p.attrs.ty = Some(symbol.ty.clone());
                Ok(Member::new(symbol.name, symbol.ty.clone()))
            }
            _ => Err(CompileError::runtime("expected a parameter")),
        }
    }

    fn visit_function_def(&mut self, n: &mut Node) -> Result<()> {
        let loc = n.loc;
        match &mut n.kind {
            NodeKind::FunctionDef {
                ret,
                name,
                params,
                body,
            } => {
                let name = *name;
                let ret_ty = self.eval_type(ret)?;

                if let Some(existing) = self.ctx.symtab.lookup_local(self.cur, name) {
                    let sym = self.ctx.symtab.symbol(existing);
                    if sym.kind != SymbolKind::Function || sym.is_defined {
                        return Err(CompileError::semantic(
                            loc,
                            format!("'{name}' is already defined in this scope"),
                        ));
                    }
                    // A body for a previously declared prototype.
                    self.ctx.symtab.symbol_mut(existing).is_defined = true;
                    n.attrs.symbol = Some(existing);
                    n.attrs.ty = Some(self.ctx.symtab.symbol(existing).ty.clone());

                    self.enter_scope();
                    for p in params.iter_mut() {
                        self.visit_param(p)?;
                    }
                    let saved = self.cur_fn.replace(existing);
                    self.visit_stmt(body)?;
                    self.cur_fn = saved;
                    self.leave_scope();
                    return Ok(());
                }

                let outer = self.cur;
                self.enter_scope();
                let mut members = Vec::new();
                for p in params.iter_mut() {
                    members.push(self.visit_param(p)?);
                }
                let fn_ty = Type::function(ret_ty, members);
                let sym =
                    self.ctx
                        .symtab
                        .define(outer, SymbolKind::Function, name, fn_ty.clone());
                n.attrs.symbol = Some(sym);
                n.attrs.ty = Some(fn_ty);

                let saved = self.cur_fn.replace(sym);
                self.visit_stmt(body)?;
                self.cur_fn = saved;
                self.leave_scope();
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn visit_function_decl(&mut self, n: &mut Node) -> Result<()> {
        let loc = n.loc;
        match &mut n.kind {
            NodeKind::FunctionDecl { ret, name, params } => {
                let name = *name;
                let ret_ty = self.eval_type(ret)?;
                if self.ctx.symtab.lookup_local(self.cur, name).is_some() {
                    return Err(CompileError::semantic(
                        loc,
                        format!("'{name}' is already defined in this scope"),
                    ));
                }
                let outer = self.cur;
                self.enter_scope();
                let mut members = Vec::new();
                for p in params.iter_mut() {
                    members.push(self.visit_param(p)?);
                }
                self.leave_scope();
                let fn_ty = Type::function(ret_ty, members);
                let sym =
                    self.ctx
                        .symtab
                        .declare(outer, SymbolKind::Function, name, fn_ty.clone());
                n.attrs.symbol = Some(sym);
                n.attrs.ty = Some(fn_ty);
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn visit_expr(&mut self, n: &mut Node) -> Result<()> {
        let loc = n.loc;
        match &mut n.kind {
            NodeKind::VarRef(name) => {
                let name = *name;
                let sym_id = self
                    .ctx
                    .symtab
                    .lookup_recursive(self.cur, name)
                    .ok_or_else(|| {
                        CompileError::semantic(loc, format!("'{name}' is not declared"))
                    })?;
                n.attrs.symbol = Some(sym_id);
                let sym_ty = self.ctx.symtab.symbol(sym_id).ty.clone();
                if sym_ty.is_array() {
                    let base = sym_ty
                        .base_type()
                        .expect("array type without a base")
                        .clone();
                    n.attrs.ty = Some(Type::pointer(base));
                    n.attrs.is_array = true;
                } else {
                    n.attrs.ty = Some(sym_ty);
                }
                Ok(())
            }
            NodeKind::Literal { kind, text } => {
                let value = match kind {
                    LiteralValueKind::Integer => LiteralValue::from_int_literal(text, loc)?,
                    LiteralValueKind::Character => {
                        LiteralValue::from_char_literal(text, loc)?
                    }
                    LiteralValueKind::String => LiteralValue::from_str_literal(text, loc)?,
                };
                let ty = match &value {
                    LiteralValue::Integer {
                        value,
                        is_long,
                        is_unsigned,
                    } => {
                        let fits_int =
                            *value >= i32::MIN as i64 && *value <= i32::MAX as i64;
                        let kind = if *is_long || !fits_int {
                            BasicTypeKind::Long
                        } else {
                            BasicTypeKind::Int
                        };
                        Type::basic(kind, !*is_unsigned)
                    }
                    LiteralValue::Character(_) => Type::basic(BasicTypeKind::Char, true),
                    LiteralValue::String { .. } => {
                        Type::pointer(Type::basic(BasicTypeKind::Char, true))
                    }
                };
                n.attrs.literal = Some(value);
                n.attrs.ty = Some(ty);
                Ok(())
            }
            NodeKind::Unary { op, operand } => {
                let op = *op;
                self.visit_expr(operand)?;
                let vty = ty_of(operand)?;
                match op {
                    UnaryOp::Deref => {
                        if !vty.is_pointer() {
                            return Err(CompileError::semantic(
                                loc,
                                "cannot dereference a non-pointer",
                            ));
                        }
                        n.attrs.ty =
                            Some(vty.base_type().expect("pointer without base").clone());
                    }
                    UnaryOp::AddrOf => {
                        if !is_addressable(operand) {
                            return Err(CompileError::semantic(
                                loc,
                                "cannot take the address of a non-lvalue",
                            ));
                        }
                        if let Some(sym) = operand.attrs.symbol {
                            self.ctx.symtab.symbol_mut(sym).wants_memory = true;
                        }
                        n.attrs.ty = Some(Type::pointer(vty));
                    }
                    UnaryOp::Neg | UnaryOp::Not => {
                        if !vty.is_integral() {
                            return Err(CompileError::semantic(
                                loc,
                                format!("operand of unary '{op}' must be integral"),
                            ));
                        }
                        let promoted = promote_to_int(operand, &vty);
                        n.attrs.ty = Some(promoted);
                    }
                }
                Ok(())
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let op = *op;
                self.visit_expr(lhs)?;
                self.visit_expr(rhs)?;
                if op == BinaryOp::Assign {
                    return self.visit_assign(n);
                }
                let lty = ty_of(lhs)?;
                let rty = ty_of(rhs)?;
                if lty.is_integral() && rty.is_integral() {
                    usual_arithmetic_conversions(lhs, rhs);
                    n.attrs.ty = Some(ty_of(lhs)?);
                } else if lty.is_pointer() && rty.is_pointer() {
                    return Err(CompileError::semantic(
                        loc,
                        "invalid operands: both are pointers",
                    ));
                } else if matches!(op, BinaryOp::Plus | BinaryOp::Minus)
                    && ((lty.is_pointer() && rty.is_integral())
                        || (rty.is_pointer() && lty.is_integral()))
                {
                    n.attrs.ty = Some(if lty.is_pointer() { lty } else { rty });
                } else if matches!(op, BinaryOp::Eq | BinaryOp::LogAnd | BinaryOp::LogOr)
                    && lty.is_same(&rty)
                {
                    n.attrs.ty = Some(Type::int());
                } else {
                    return Err(CompileError::semantic(
                        loc,
                        format!("invalid operands to binary '{op}'"),
                    ));
                }
                Ok(())
            }
            NodeKind::ArrayElementRef { base, index } => {
                self.visit_expr(base)?;
                self.visit_expr(index)?;
                let bty = ty_of(base)?;
                let ity = ty_of(index)?;
                if !(bty.is_pointer() && ity.is_integral()) {
                    return Err(CompileError::semantic(
                        loc,
                        "subscript requires a pointer and an integral index",
                    ));
                }
                let elem = bty.base_type().expect("pointer without base").clone();
                if elem.is_array() {
                    let inner = elem
                        .base_type()
                        .expect("array type without a base")
                        .clone();
                    n.attrs.ty = Some(Type::pointer(inner));
                    n.attrs.is_array = true;
                } else {
                    n.attrs.ty = Some(elem);
                }
                n.attrs.symbol = base.attrs.symbol;
                Ok(())
            }
            NodeKind::FieldRef { base, field } => {
                let field = *field;
                self.visit_expr(base)?;
                let bty = ty_of(base)?;
                let def = bty.struct_def().cloned().ok_or_else(|| {
                    CompileError::semantic(loc, "field access on a non-struct value")
                })?;
                self.type_field_access(n, &def, field, loc)
            }
            NodeKind::IndirectFieldRef { base, field } => {
                let field = *field;
                self.visit_expr(base)?;
                let bty = ty_of(base)?;
                let def = bty
                    .base_type()
                    .and_then(|b| b.struct_def())
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::semantic(
                            loc,
                            "indirect field access requires a pointer to a struct",
                        )
                    })?;
                self.type_field_access(n, &def, field, loc)
            }
            NodeKind::Call { callee, args } => {
                let callee_name = match &callee.kind {
                    NodeKind::VarRef(name) => *name,
                    _ => {
                        return Err(CompileError::semantic(
                            loc,
                            "called object is not a function name",
                        ))
                    }
                };
                let sym_id = self
                    .ctx
                    .symtab
                    .lookup_recursive(self.cur, callee_name)
                    .ok_or_else(|| {
                        CompileError::semantic(
                            loc,
                            format!("function '{callee_name}' is not declared"),
                        )
                    })?;
                let fn_ty = self.ctx.symtab.symbol(sym_id).ty.clone();
                if !fn_ty.is_function() {
                    return Err(CompileError::semantic(
                        loc,
                        format!("'{callee_name}' is not a function"),
                    ));
                }
                callee.attrs.symbol = Some(sym_id);
                callee.attrs.ty = Some(fn_ty.clone());
                let params: Vec<Member> =
                    fn_ty.params().expect("function type").to_vec();
                if params.len() != args.len() {
                    return Err(CompileError::semantic(
                        loc,
                        format!(
                            "'{callee_name}' expects {} argument(s), got {}",
                            params.len(),
                            args.len()
                        ),
                    ));
                }
                for (arg, param) in args.iter_mut().zip(params.iter()) {
                    self.visit_expr(arg)?;
                    let aty = ty_of(arg)?;
                    analyze_assign_ref(&param.ty, &aty, loc)?;
                    if param.ty.is_integral()
                        && aty.is_integral()
                        && !aty.is_same(&param.ty)
                    {
                        let target = param.ty.clone();
                        wrap_boxed_conversion(arg, target);
                    }
                }
                n.attrs.symbol = Some(sym_id);
                n.attrs.ty = Some(
                    fn_ty
                        .return_type()
                        .expect("function type without return")
                        .clone(),
                );
                Ok(())
            }
            NodeKind::ImplicitConversion(_) => Ok(()),
            _ => Err(CompileError::runtime(format!(
                "unexpected node in expression position at {loc}"
            ))),
        }
    }

    fn type_field_access(
        &mut self,
        n: &mut Node,
        def: &Rc<StructDef>,
        field: Id,
        loc: Location,
    ) -> Result<()> {
        let member = def.find_member(field).ok_or_else(|| {
            CompileError::semantic(
                loc,
                format!("struct {} has no member named '{field}'", def.tag),
            )
        })?;
        if member.ty.is_array() {
            let inner = member
                .ty
                .base_type()
                .expect("array type without a base")
                .clone();
            n.attrs.ty = Some(Type::pointer(inner));
            n.attrs.is_array = true;
        } else {
            n.attrs.ty = Some(member.ty);
        }
        Ok(())
    }

    fn visit_assign(&mut self, n: &mut Node) -> Result<()> {
        let loc = n.loc;
        match &mut n.kind {
            NodeKind::Binary { lhs, rhs, .. } => {
                check_lvalue(lhs)?;
                let lty = ty_of(lhs)?;
                let rty = ty_of(rhs)?;
                analyze_assign_ref(&lty, &rty, loc)?;
                if lty.is_integral() && rty.is_integral() && !rty.is_same(&lty) {
                    wrap_conversion(rhs, lty.clone());
                }
                n.attrs.ty = Some(lty);
                Ok(())
            }
            _ => unreachable!(),
        }
    }
}

fn ty_of(n: &Node) -> Result<Rc<Type>> {
    n.attrs.ty.clone().ok_or_else(|| {
        CompileError::runtime(format!("node at {} has no type", n.loc))
    })
}

/// Replace `node` with an `ImplicitConversion` wrapper whose type is the
/// conversion target.
fn wrap_conversion(node: &mut Box<Node>, ty: Rc<Type>) {
    wrap_boxed_conversion(node, ty);
}

fn wrap_boxed_conversion(node: &mut Node, ty: Rc<Type>) {
    let loc = node.loc;
    let inner = std::mem::replace(node, Node::new(NodeKind::EmptyStatement, loc));
    let mut conv = Node::new(NodeKind::ImplicitConversion(Box::new(inner)), loc);
    conv.attrs.ty = Some(ty);
    *node = conv;
}

/// Promote an operand narrower than `int` to `int`, preserving
/// signedness.  Returns the (possibly promoted) type.
fn promote_to_int(operand: &mut Box<Node>, ty: &Rc<Type>) -> Rc<Type> {
    match ty.basic_kind() {
        Some(kind) if kind < BasicTypeKind::Int => {
            let promoted = Type::basic(BasicTypeKind::Int, ty.is_signed());
            wrap_conversion(operand, promoted.clone());
            promoted
        }
        _ => ty.clone(),
    }
}

/// The usual arithmetic conversions over the two integral operands of a
/// binary expression: promote anything narrower than `int` to `int`,
/// convert the lower-ranked operand to the higher rank, and resolve a
/// signedness mismatch toward unsigned.
fn usual_arithmetic_conversions(lhs: &mut Box<Node>, rhs: &mut Box<Node>) {
    let lty = lhs.attrs.ty.clone().expect("typed operand");
    let rty = rhs.attrs.ty.clone().expect("typed operand");
    let (lkind, rkind) = (
        lty.basic_kind().expect("integral operand"),
        rty.basic_kind().expect("integral operand"),
    );
    let result_signed = lty.is_signed() && rty.is_signed();

    if lkind < BasicTypeKind::Int && rkind < BasicTypeKind::Int {
        let common = Type::basic(BasicTypeKind::Int, result_signed);
        wrap_conversion(lhs, common.clone());
        wrap_conversion(rhs, common);
    } else if lkind < rkind {
        if !rty.is_signed() || (lty.is_signed() && rty.is_signed()) {
            wrap_conversion(lhs, rty);
        } else {
            // narrower unsigned against wider signed: both become the
            // unsigned version of the wider rank
            let common = Type::basic(rkind, false);
            wrap_conversion(lhs, common.clone());
            wrap_conversion(rhs, common);
        }
    } else if rkind < lkind {
        if !lty.is_signed() || (lty.is_signed() && rty.is_signed()) {
            wrap_conversion(rhs, lty);
        } else {
            let common = Type::basic(lkind, false);
            wrap_conversion(lhs, common.clone());
            wrap_conversion(rhs, common);
        }
    } else if lty.is_signed() && !rty.is_signed() {
        wrap_conversion(lhs, rty);
    } else if rty.is_signed() && !lty.is_signed() {
        wrap_conversion(rhs, lty);
    }
}

/// May the expression be assigned to?
fn check_lvalue(n: &Node) -> Result<()> {
    if n.attrs.is_array {
        return Err(CompileError::semantic(n.loc, "cannot assign to an array"));
    }
    let ok = match &n.kind {
        NodeKind::VarRef(_)
        | NodeKind::FieldRef { .. }
        | NodeKind::IndirectFieldRef { .. }
        | NodeKind::ArrayElementRef { .. } => true,
        NodeKind::Unary { op, .. } => *op == UnaryOp::Deref,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CompileError::semantic(
            n.loc,
            "assignment target is not an lvalue",
        ))
    }
}

/// May the expression's address be taken?
fn is_addressable(n: &Node) -> bool {
    matches!(
        &n.kind,
        NodeKind::VarRef(_)
            | NodeKind::FieldRef { .. }
            | NodeKind::IndirectFieldRef { .. }
            | NodeKind::ArrayElementRef { .. }
    ) || matches!(&n.kind, NodeKind::Unary { op, .. } if *op == UnaryOp::Deref)
}

/// The assignment-compatibility rules, shared by assignments, argument
/// passing, initializers, and returns.
fn analyze_assign_ref(lty: &Type, rty: &Type, loc: Location) -> Result<()> {
    if lty.is_const() {
        return Err(CompileError::semantic(
            loc,
            "cannot assign to a const-qualified value",
        ));
    }
    if lty.is_array() && rty.is_pointer() {
        let lbase = lty.base_type().expect("array type without a base");
        let rbase = rty.base_type().expect("pointer without base");
        if lbase.is_same(rbase) {
            // parameter-style: an array accepts a pointer to its element type
            return Ok(());
        }
    }
    if lty.is_pointer() != rty.is_pointer() {
        return Err(CompileError::semantic(
            loc,
            "cannot mix pointer and non-pointer values",
        ));
    }
    if lty.is_struct() {
        if !lty.is_same(rty) {
            return Err(CompileError::semantic(
                loc,
                "struct assignment requires identical types",
            ));
        }
        return Ok(());
    }
    if lty.is_basic() && !lty.is_void() {
        if rty.is_basic() && !rty.is_void() {
            return Ok(());
        }
        return Err(CompileError::semantic(
            loc,
            "incompatible types in assignment",
        ));
    }
    if lty.is_pointer() && rty.is_pointer() {
        let lbase = lty.base_type().expect("pointer without base");
        let rbase = rty.base_type().expect("pointer without base");
        if !lbase.unqualified().is_same(rbase.unqualified()) {
            return Err(CompileError::semantic(
                loc,
                "pointer assignment requires matching base types",
            ));
        }
        if (rbase.is_const() && !lbase.is_const())
            || (rbase.is_volatile() && !lbase.is_volatile())
        {
            return Err(CompileError::semantic(
                loc,
                "pointer assignment discards qualifiers",
            ));
        }
        return Ok(());
    }
    Err(CompileError::semantic(
        loc,
        "incompatible types in assignment",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse::parse;

    fn analyze_src(src: &str) -> Result<(Node, Context)> {
        let mut unit = parse(src, "test.c")?;
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx)?;
        Ok((unit, ctx))
    }

    #[test]
    fn attributes_simple_function() {
        let (unit, ctx) = analyze_src("int main(void) { return 42; }").unwrap();
        assert!(ctx.symtab.dump().contains("0|main|function|function () returning int"));
        match &unit.kind {
            NodeKind::Unit(items) => assert!(items[0].attrs.symbol.is_some()),
            _ => panic!(),
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        assert!(analyze_src("int main(void) { int a; int a; return 0; }").is_err());
        assert!(analyze_src("int a; long a;").is_err());
    }

    #[test]
    fn undeclared_variable_rejected() {
        assert!(analyze_src("int main(void) { return x; }").is_err());
    }

    #[test]
    fn prototype_then_definition() {
        let (_, ctx) =
            analyze_src("int f(int x); int f(int x) { return x; } int main(void) { return f(1); }")
                .unwrap();
        assert!(ctx.symtab.dump().contains("f|function"));
    }

    #[test]
    fn call_arity_checked() {
        assert!(analyze_src("int f(int x) { return x; } int main(void) { return f(); }").is_err());
        assert!(
            analyze_src("int f(int x) { return x; } int main(void) { return f(1, 2); }").is_err()
        );
    }

    #[test]
    fn narrow_assignment_inserts_conversion() {
        let (unit, _) =
            analyze_src("int main(void) { char c; int i; c = 'a'; i = c; return i; }").unwrap();
        assert!(unit.tree_string().contains("implicit_conversion"));
    }

    #[test]
    fn mixed_width_operands_converted() {
        let (unit, _) =
            analyze_src("int main(void) { short s; long l; s = 1; l = 2; return s + l; }")
                .unwrap();
        let tree = unit.tree_string();
        assert!(tree.contains("implicit_conversion"));
    }

    #[test]
    fn char_plus_char_promotes_both() {
        let (unit, _) =
            analyze_src("int main(void) { char a; char b; a = 'x'; b = 'y'; return a + b; }")
                .unwrap();
        let tree = unit.tree_string();
        let count = tree.matches("implicit_conversion").count();
        assert!(count >= 2, "expected both operands promoted, tree:\n{tree}");
    }

    #[test]
    fn assignment_to_array_rejected() {
        assert!(analyze_src("int main(void) { int a[4]; int *p; p = a; a = p; return 0; }").is_err());
    }

    #[test]
    fn array_decays_to_pointer() {
        let (_, _) = analyze_src(
            "int main(void) { int a[4]; int *p; p = a; return a[2]; }",
        )
        .unwrap();
    }

    #[test]
    fn const_assignment_rejected() {
        assert!(analyze_src("int main(void) { const int c; c = 1; return 0; }").is_err());
    }

    #[test]
    fn pointer_qualifier_rules() {
        // dropping const from the pointee is an error
        assert!(analyze_src(
            "int main(void) { const int *p; int *q; p = q; q = p; return 0; }"
        )
        .is_err());
    }

    #[test]
    fn two_pointer_addition_rejected() {
        assert!(analyze_src("int main(void) { int *p; int *q; return p + q; }").is_err());
    }

    #[test]
    fn struct_fields_resolve() {
        let (_, _) = analyze_src(
            "struct P { int x; int y; }; int main(void) { struct P p; p.y = 3; return p.y; }",
        )
        .unwrap();
        assert!(analyze_src(
            "struct P { int x; }; int main(void) { struct P p; return p.z; }"
        )
        .is_err());
    }

    #[test]
    fn struct_offsets_follow_natural_alignment() {
        let (_, ctx) = analyze_src(
            "struct Q { char c; long l; int i; }; struct Q q; int main(void) { return 0; }",
        )
        .unwrap();
        let key = intern("struct Q");
        let sym = ctx
            .symtab
            .lookup_recursive(SymbolTable::GLOBAL_SCOPE, key)
            .unwrap();
        let ty = ctx.symtab.symbol(sym).ty.clone();
        let def = ty.struct_def().unwrap().clone();
        let members = def.members();
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 8);
        assert_eq!(members[2].offset, 16);
        drop(members);
        assert_eq!(ty.storage_size().unwrap(), 24);
    }

    #[test]
    fn self_referential_struct() {
        let (_, _) = analyze_src(
            "struct N { int v; struct N *next; }; int main(void) { struct N n; n.v = 1; return n.v; }",
        )
        .unwrap();
    }

    #[test]
    fn address_of_forces_memory() {
        let (_, ctx) =
            analyze_src("int main(void) { int x; int *p; p = &x; return *p; }").unwrap();
        let x = ctx
            .symtab
            .symbols()
            .find(|s| s.name.as_ref() == "x")
            .unwrap();
        assert!(x.wants_memory);
        let p = ctx
            .symtab
            .symbols()
            .find(|s| s.name.as_ref() == "p")
            .unwrap();
        assert!(!p.wants_memory);
    }

    #[test]
    fn unions_are_unsupported() {
        let err = analyze_src("union U u; int main(void) { return 0; }").unwrap_err();
        match err {
            CompileError::Runtime { msg } => assert!(msg.contains("union")),
            other => panic!("expected runtime error, got {other}"),
        }
    }

    #[test]
    fn return_type_checked() {
        assert!(analyze_src("struct P { int x; }; int main(void) { struct P p; return p; }")
            .is_err());
        assert!(analyze_src("void f(void) { return 1; }").is_err());
        assert!(analyze_src("int f(void) { return; }").is_err());
    }
}
