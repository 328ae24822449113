//! Symbols and the scoped symbol table.
//!
//! Scopes form a parent-linked tree rooted at the global scope.  The table
//! owns every symbol in an arena and hands out ids; AST nodes refer to
//! symbols by id, never by ownership.  Struct tags share the namespace
//! under the prefixed key `struct <tag>`.

use std::fmt::Write as _;
use std::rc::Rc;

use derive_more::Display;

use crate::common::{Id, Map, VregNum};
use crate::front::types::Type;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum SymbolKind {
    #[display("variable")]
    Variable,
    #[display("function")]
    Function,
    #[display("type")]
    Type,
}

/// Where a symbol's value lives at runtime.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Storage {
    /// A virtual register.
    Vreg(VregNum),
    /// An offset into the function's local storage area.
    Memory(u32),
    /// A module-level label.
    Global(Id),
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct ScopeId(u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SymbolId(u32);

#[derive(Debug)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: Id,
    pub ty: Rc<Type>,
    pub scope: ScopeId,
    /// Distinguishes a definition from a prototype.
    pub is_defined: bool,
    pub storage: Option<Storage>,
    /// Set when the symbol's address is taken; forces memory placement.
    pub wants_memory: bool,
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    by_name: Map<Id, SymbolId>,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub const GLOBAL_SCOPE: ScopeId = ScopeId(0);

    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope {
                parent: None,
                by_name: Map::new(),
            }],
            symbols: Vec::new(),
        }
    }

    pub fn enter_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            by_name: Map::new(),
        });
        id
    }

    pub fn parent_of(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0 as usize].parent
    }

    pub fn lookup_local(&self, scope: ScopeId, name: Id) -> Option<SymbolId> {
        self.scopes[scope.0 as usize].by_name.get(&name).copied()
    }

    pub fn lookup_recursive(&self, scope: ScopeId, name: Id) -> Option<SymbolId> {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if let Some(sym) = self.lookup_local(s, name) {
                return Some(sym);
            }
            cur = self.parent_of(s);
        }
        None
    }

    /// Add a symbol that is declared but not yet defined (a prototype).
    pub fn declare(
        &mut self,
        scope: ScopeId,
        kind: SymbolKind,
        name: Id,
        ty: Rc<Type>,
    ) -> SymbolId {
        self.add(scope, kind, name, ty, false)
    }

    /// Add a defined symbol.
    pub fn define(
        &mut self,
        scope: ScopeId,
        kind: SymbolKind,
        name: Id,
        ty: Rc<Type>,
    ) -> SymbolId {
        self.add(scope, kind, name, ty, true)
    }

    fn add(
        &mut self,
        scope: ScopeId,
        kind: SymbolKind,
        name: Id,
        ty: Rc<Type>,
        is_defined: bool,
    ) -> SymbolId {
        debug_assert!(self.lookup_local(scope, name).is_none());
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            kind,
            name,
            ty,
            scope,
            is_defined,
            storage: None,
            wants_memory: false,
        });
        self.scopes[scope.0 as usize].by_name.insert(name, id);
        id
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn is_global(&self, id: SymbolId) -> bool {
        self.symbol(id).scope == Self::GLOBAL_SCOPE
    }

    pub fn depth(&self, scope: ScopeId) -> u32 {
        let mut depth = 0;
        let mut cur = self.parent_of(scope);
        while let Some(s) = cur {
            depth += 1;
            cur = self.parent_of(s);
        }
        depth
    }

    /// All symbols in insertion order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Render the table in insertion order, one `depth|name|kind|type`
    /// line per symbol.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for sym in &self.symbols {
            let _ = writeln!(
                out,
                "{}|{}|{}|{}",
                self.depth(sym.scope),
                sym.name,
                sym.kind,
                sym.ty
            );
        }
        out
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern;

    #[test]
    fn local_and_recursive_lookup() {
        let mut tab = SymbolTable::new();
        let global = SymbolTable::GLOBAL_SCOPE;
        let x = intern("x");
        let outer = tab.define(global, SymbolKind::Variable, x, Type::int());
        let inner_scope = tab.enter_scope(global);
        assert_eq!(tab.lookup_local(inner_scope, x), None);
        assert_eq!(tab.lookup_recursive(inner_scope, x), Some(outer));
    }

    #[test]
    fn shadowing_resolves_to_innermost() {
        let mut tab = SymbolTable::new();
        let global = SymbolTable::GLOBAL_SCOPE;
        let x = intern("x");
        tab.define(global, SymbolKind::Variable, x, Type::int());
        let inner = tab.enter_scope(global);
        let shadow = tab.define(inner, SymbolKind::Variable, x, Type::pointer(Type::int()));
        assert_eq!(tab.lookup_recursive(inner, x), Some(shadow));
    }

    #[test]
    fn struct_tags_use_prefixed_keys() {
        let mut tab = SymbolTable::new();
        let global = SymbolTable::GLOBAL_SCOPE;
        tab.define(global, SymbolKind::Variable, intern("p"), Type::int());
        // A struct tag named p does not collide with the variable.
        assert!(tab.lookup_local(global, intern("struct p")).is_none());
        tab.define(global, SymbolKind::Type, intern("struct p"), Type::int());
        assert!(tab.lookup_local(global, intern("struct p")).is_some());
        assert!(tab.lookup_local(global, intern("p")).is_some());
    }

    #[test]
    fn depth_counts_parent_links() {
        let mut tab = SymbolTable::new();
        let s1 = tab.enter_scope(SymbolTable::GLOBAL_SCOPE);
        let s2 = tab.enter_scope(s1);
        assert_eq!(tab.depth(SymbolTable::GLOBAL_SCOPE), 0);
        assert_eq!(tab.depth(s2), 2);
    }
}
