//! Storage allocation.
//!
//! Assigns a storage record to every symbol: parameters to the argument
//! vregs `vr1..vr9`, register-eligible locals to fresh vregs from `vr10`,
//! everything else (arrays, structs, address-taken scalars) to naturally
//! aligned slots in the function's local storage area, and file-scope
//! variables to module-level labels.  Statement lists save and restore
//! the vreg counter so sibling scopes reuse numbers; the first free vreg
//! is recorded on each list for the code generator.  String literals are
//! assigned their `_str<N>` labels here.

use log::debug;

use crate::common::{CompileError, Context, GlobalVar, Result, VregNum};
use crate::front::ast::{Node, NodeKind};
use crate::front::literal::LiteralValue;
use crate::front::symtab::Storage;
use crate::front::types::Type;
use crate::middle::cfg::MAX_VREGS;
use crate::middle::ir::{Operand, VREG_FIRST_ARG, VREG_FIRST_LOCAL, VREG_LAST_ARG};

/// Natural-alignment layout of a sequence of fields, used both for
/// struct layout and for a function's local storage area.  Fields are
/// laid out in declaration order, each padded to its natural alignment;
/// `finish` rounds the total up to the overall alignment.
#[derive(Debug, Default)]
pub struct StorageCalculator {
    size: u32,
    align: u32,
}

impl StorageCalculator {
    pub fn new() -> Self {
        StorageCalculator { size: 0, align: 0 }
    }

    pub fn add_field(&mut self, ty: &Type) -> Result<u32> {
        let align = ty.alignment()?;
        let size = ty.storage_size()?;
        self.size = round_up(self.size, align);
        let offset = self.size;
        self.size += size;
        self.align = self.align.max(align);
        Ok(offset)
    }

    pub fn finish(&mut self) {
        if self.align > 0 {
            self.size = round_up(self.size, self.align);
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn align(&self) -> u32 {
        self.align
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

/// Run storage allocation over an analyzed translation unit.
pub fn allocate_storage(unit: &mut Node, ctx: &mut Context) -> Result<()> {
    let mut alloc = StorageAlloc {
        ctx,
        next_vreg: VREG_FIRST_LOCAL,
        high_water: VREG_FIRST_LOCAL,
        calc: StorageCalculator::new(),
    };
    match &mut unit.kind {
        NodeKind::Unit(items) => {
            for item in items {
                match &item.kind {
                    NodeKind::FunctionDef { .. } => alloc.visit_function_def(item)?,
                    NodeKind::VarDecl { .. } => alloc.visit_global_decl(item)?,
                    _ => {}
                }
            }
            Ok(())
        }
        _ => Err(CompileError::runtime("expected a translation unit")),
    }
}

struct StorageAlloc<'a> {
    ctx: &'a mut Context,
    next_vreg: VregNum,
    high_water: VregNum,
    calc: StorageCalculator,
}

impl StorageAlloc<'_> {
    fn alloc_vreg(&mut self) -> Result<VregNum> {
        let vreg = self.next_vreg;
        if vreg as usize >= MAX_VREGS {
            return Err(CompileError::runtime("virtual register limit exceeded"));
        }
        self.next_vreg += 1;
        self.high_water = self.high_water.max(self.next_vreg);
        Ok(vreg)
    }

    fn visit_global_decl(&mut self, n: &mut Node) -> Result<()> {
        match &mut n.kind {
            NodeKind::VarDecl { declarators, .. } => {
                for d in declarators {
                    if matches!(d.kind, NodeKind::InitDeclarator { .. }) {
                        return Err(CompileError::semantic(
                            d.loc,
                            "global variable initializers are not supported",
                        ));
                    }
                    let sym_id = d
                        .attrs
                        .symbol
                        .ok_or_else(|| CompileError::runtime("declarator without symbol"))?;
                    let (name, ty) = {
                        let sym = self.ctx.symtab.symbol(sym_id);
                        (sym.name, sym.ty.clone())
                    };
                    self.ctx.symtab.symbol_mut(sym_id).storage =
                        Some(Storage::Global(name));
                    self.ctx.globals.push(GlobalVar {
                        name,
                        size: ty.storage_size()?,
                        align: ty.alignment()?,
                    });
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn visit_function_def(&mut self, n: &mut Node) -> Result<()> {
        match &mut n.kind {
            NodeKind::FunctionDef { params, body, .. } => {
                if params.len() > (VREG_LAST_ARG - VREG_FIRST_ARG + 1) as usize {
                    return Err(CompileError::runtime("more than nine parameters"));
                }
                for (i, p) in params.iter().enumerate() {
                    let sym_id = p
                        .attrs
                        .symbol
                        .ok_or_else(|| CompileError::runtime("parameter without symbol"))?;
                    self.ctx.symtab.symbol_mut(sym_id).storage =
                        Some(Storage::Vreg(VREG_FIRST_ARG + i as VregNum));
                }

                self.next_vreg = VREG_FIRST_LOCAL;
                self.high_water = VREG_FIRST_LOCAL;
                self.calc = StorageCalculator::new();
                self.visit_stmt(body)?;
                self.calc.finish();
                n.attrs.local_bytes = Some(self.calc.size());
                n.attrs.next_vreg = Some(self.high_water);
                debug!(
                    "function locals: {} bytes, vreg high water vr{}",
                    self.calc.size(),
                    self.high_water
                );
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn visit_stmt(&mut self, n: &mut Node) -> Result<()> {
        match &mut n.kind {
            NodeKind::StatementList(stmts) => {
                let saved = self.next_vreg;
                for s in stmts.iter_mut() {
                    self.visit_stmt(s)?;
                }
                n.attrs.next_vreg = Some(self.next_vreg);
                self.next_vreg = saved;
                Ok(())
            }
            NodeKind::VarDecl { declarators, .. } => {
                for d in declarators.iter_mut() {
                    self.visit_local_declarator(d)?;
                }
                Ok(())
            }
            NodeKind::ExpressionStatement(e) => self.visit_expr(e),
            NodeKind::EmptyStatement | NodeKind::Return => Ok(()),
            NodeKind::ReturnExpr(e) => self.visit_expr(e),
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

    fn visit_local_declarator(&mut self, d: &mut Node) -> Result<()> {
        // An init-declarator allocates for its inner declarator, then the
        // initializer expression is scanned like any other.
        if let NodeKind::InitDeclarator { decl, init } = &mut d.kind {
            self.assign_local_storage(decl)?;
            let sym = decl.attrs.symbol;
            self.visit_expr(init)?;
            d.attrs.symbol = sym;
            return Ok(());
        }
        self.assign_local_storage(d)
    }

    fn assign_local_storage(&mut self, d: &mut Node) -> Result<()> {
        let sym_id = d
            .attrs
            .symbol
            .ok_or_else(|| CompileError::runtime("declarator without symbol"))?;
        let (ty, wants_memory) = {
            let sym = self.ctx.symtab.symbol(sym_id);
            (sym.ty.clone(), sym.wants_memory)
        };
        let storage = if (ty.is_pointer() || ty.is_integral()) && !wants_memory {
            let vreg = self.alloc_vreg()?;
            debug!("local in vr{vreg}");
            Storage::Vreg(vreg)
        } else {
            let offset = self.calc.add_field(&ty)?;
            debug!("local at frame offset {offset}");
            Storage::Memory(offset)
        };
        self.ctx.symtab.symbol_mut(sym_id).storage = Some(storage);
        Ok(())
    }

    /// Scan an expression tree for string literals, assigning each its
    /// rodata label and address-of-label operand.
    fn visit_expr(&mut self, n: &mut Node) -> Result<()> {
        if let Some(LiteralValue::String { raw, .. }) = &n.attrs.literal {
            let label = self.ctx.add_string(raw.clone());
            n.attrs.operand = Some(Operand::imm_label(label));
            return Ok(());
        }
        match &mut n.kind {
            NodeKind::Binary { lhs, rhs, .. } => {
                self.visit_expr(lhs)?;
                self.visit_expr(rhs)
            }
            NodeKind::Unary { operand, .. } => self.visit_expr(operand),
            NodeKind::Call { args, .. } => {
                for a in args.iter_mut() {
                    self.visit_expr(a)?;
                }
                Ok(())
            }
            NodeKind::ArrayElementRef { base, index } => {
                self.visit_expr(base)?;
                self.visit_expr(index)
            }
            NodeKind::FieldRef { base, .. } | NodeKind::IndirectFieldRef { base, .. } => {
                self.visit_expr(base)
            }
            NodeKind::ImplicitConversion(inner) => self.visit_expr(inner),
            NodeKind::VarRef(_) | NodeKind::Literal { .. } => Ok(()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Context;
    use crate::front::parse::parse;
    use crate::front::sema::analyze;

    fn run(src: &str) -> (Node, Context) {
        let mut unit = parse(src, "test.c").unwrap();
        let mut ctx = Context::new();
        analyze(&mut unit, &mut ctx).unwrap();
        allocate_storage(&mut unit, &mut ctx).unwrap();
        (unit, ctx)
    }

    fn storage_of(ctx: &Context, name: &str) -> Storage {
        ctx.symtab
            .symbols()
            .find(|s| s.name.as_ref() == name)
            .and_then(|s| s.storage.clone())
            .unwrap()
    }

    #[test]
    fn parameters_take_argument_vregs() {
        let (_, ctx) = run("int f(int a, int b) { return a + b; } int main(void) { return f(1, 2); }");
        assert_eq!(storage_of(&ctx, "a"), Storage::Vreg(1));
        assert_eq!(storage_of(&ctx, "b"), Storage::Vreg(2));
    }

    #[test]
    fn scalar_locals_get_vregs_from_ten() {
        let (_, ctx) = run("int main(void) { int a; int *p; return 0; }");
        assert_eq!(storage_of(&ctx, "a"), Storage::Vreg(10));
        assert_eq!(storage_of(&ctx, "p"), Storage::Vreg(11));
    }

    #[test]
    fn sibling_scopes_reuse_vregs() {
        let (unit, ctx) = run(
            "int main(void) { int a; { int b; b = 1; } { int c; c = 2; } return a; }",
        );
        assert_eq!(storage_of(&ctx, "a"), Storage::Vreg(10));
        assert_eq!(storage_of(&ctx, "b"), Storage::Vreg(11));
        assert_eq!(storage_of(&ctx, "c"), Storage::Vreg(11));
        // the function records the high-water mark for temp allocation
        match &unit.kind {
            NodeKind::Unit(items) => {
                assert_eq!(items[0].attrs.next_vreg, Some(12));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn arrays_and_address_taken_scalars_get_memory() {
        let (unit, ctx) = run(
            "int main(void) { int a[4]; int x; int *p; p = &x; return a[0]; }",
        );
        assert_eq!(storage_of(&ctx, "a"), Storage::Memory(0));
        assert_eq!(storage_of(&ctx, "x"), Storage::Memory(16));
        match &unit.kind {
            NodeKind::Unit(items) => {
                assert_eq!(items[0].attrs.local_bytes, Some(20));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn globals_get_labels() {
        let (_, ctx) = run("int g; int a[8]; int main(void) { g = 1; return g; }");
        match storage_of(&ctx, "g") {
            Storage::Global(name) => assert_eq!(name.as_ref(), "g"),
            other => panic!("expected global storage, got {other:?}"),
        }
        assert_eq!(ctx.globals.len(), 2);
        assert_eq!(ctx.globals[1].size, 32);
    }

    #[test]
    fn string_literals_collect_labels() {
        let (_, ctx) = run(
            "int puts(char *s); int main(void) { puts(\"hi\"); puts(\"there\"); return 0; }",
        );
        assert_eq!(ctx.strings.len(), 2);
        assert_eq!(ctx.strings[0].label.as_ref(), "_str0");
        assert_eq!(ctx.strings[1].raw, "there");
    }

    #[test]
    fn struct_locals_are_memory_with_layout_size() {
        let (unit, ctx) = run(
            "struct P { int x; int y; }; int main(void) { struct P p; p.x = 1; return p.x; }",
        );
        assert_eq!(storage_of(&ctx, "p"), Storage::Memory(0));
        match &unit.kind {
            NodeKind::Unit(items) => {
                assert_eq!(items[1].attrs.local_bytes, Some(8));
            }
            _ => unreachable!(),
        }
    }
}
