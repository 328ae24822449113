//! The abstract syntax tree.
//!
//! Every node carries its source location plus an attribute record filled
//! in by the analysis and code-generation passes: the node's type, its
//! resolved symbol, a decoded literal value, the operand computed for it,
//! and the bookkeeping counters the storage allocator records on statement
//! lists and function definitions.

use std::fmt::Write as _;
use std::rc::Rc;

use derive_more::Display;

use crate::common::{Id, Location, VregNum};
use crate::front::literal::{LiteralValue, LiteralValueKind};
use crate::front::symtab::SymbolId;
use crate::front::types::{Type, TypeKeyword};
use crate::middle::ir::Operand;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum BinaryOp {
    #[display("=")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("<")]
    Lt,
    #[display("<=")]
    Lte,
    #[display(">")]
    Gt,
    #[display(">=")]
    Gte,
    #[display("==")]
    Eq,
    #[display("!=")]
    Neq,
    #[display("&&")]
    LogAnd,
    #[display("||")]
    LogOr,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum UnaryOp {
    #[display("-")]
    Neg,
    #[display("!")]
    Not,
    #[display("*")]
    Deref,
    #[display("&")]
    AddrOf,
}

/// Attributes recorded on a node by the analysis passes.
#[derive(Clone, Debug, Default)]
pub struct Attrs {
    pub ty: Option<Rc<Type>>,
    pub symbol: Option<SymbolId>,
    pub literal: Option<LiteralValue>,
    pub operand: Option<Operand>,
    /// Set on references that underwent array-to-pointer decay; such a
    /// reference denotes an address and may not be assigned to.
    pub is_array: bool,
    /// On statement lists: the first free virtual register after the
    /// list's own locals.
    pub next_vreg: Option<VregNum>,
    /// On function definitions: total bytes of memory-resident locals.
    pub local_bytes: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub loc: Location,
    pub attrs: Attrs,
}

impl Node {
    pub fn new(kind: NodeKind, loc: Location) -> Self {
        Node {
            kind,
            loc,
            attrs: Attrs::default(),
        }
    }

    /// The node's type as established by semantic analysis.
    pub fn ty(&self) -> Option<&Rc<Type>> {
        self.attrs.ty.as_ref()
    }

    /// Render the tree for the `-p` output.
    pub fn tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = writeln!(out, "{}", self.kind.describe());
        for child in self.kind.children() {
            child.write_tree(out, depth + 1);
        }
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A translation unit: the list of top-level declarations.
    Unit(Vec<Node>),
    /// `struct <tag> { fields };`
    StructDef { tag: Id, fields: Vec<Node> },
    /// A declaration: a base type node and one or more declarators.
    VarDecl {
        base: Box<Node>,
        declarators: Vec<Node>,
    },
    /// The keyword multiset of a basic declaration specifier.
    BasicType(Vec<TypeKeyword>),
    /// `struct <tag>` used as a type.
    StructTypeRef(Id),
    /// `union <tag>` used as a type; rejected during analysis.
    UnionTypeRef(Id),
    /// A pointer-returning function's return type.
    PointerType(Box<Node>),
    NamedDeclarator(Id),
    PointerDeclarator(Box<Node>),
    ArrayDeclarator { decl: Box<Node>, size: u64 },
    InitDeclarator { decl: Box<Node>, init: Box<Node> },
    FunctionDef {
        ret: Box<Node>,
        name: Id,
        params: Vec<Node>,
        body: Box<Node>,
    },
    FunctionDecl {
        ret: Box<Node>,
        name: Id,
        params: Vec<Node>,
    },
    Parameter { base: Box<Node>, decl: Box<Node> },
    StatementList(Vec<Node>),
    ExpressionStatement(Box<Node>),
    EmptyStatement,
    Return,
    ReturnExpr(Box<Node>),
    If { cond: Box<Node>, then: Box<Node> },
    IfElse {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    While { cond: Box<Node>, body: Box<Node> },
    DoWhile { body: Box<Node>, cond: Box<Node> },
    For {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        update: Option<Box<Node>>,
        body: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Unary { op: UnaryOp, operand: Box<Node> },
    Call { callee: Box<Node>, args: Vec<Node> },
    FieldRef { base: Box<Node>, field: Id },
    IndirectFieldRef { base: Box<Node>, field: Id },
    ArrayElementRef { base: Box<Node>, index: Box<Node> },
    VarRef(Id),
    /// A literal token; decoded into [LiteralValue] during analysis.
    Literal {
        kind: LiteralValueKind,
        text: String,
    },
    /// Inserted by semantic analysis; the node's type attribute is the
    /// conversion target.
    ImplicitConversion(Box<Node>),
}

impl NodeKind {
    fn describe(&self) -> String {
        match self {
            NodeKind::Unit(_) => "unit".into(),
            NodeKind::StructDef { tag, .. } => format!("struct_def[{tag}]"),
            NodeKind::VarDecl { .. } => "var_decl".into(),
            NodeKind::BasicType(kws) => {
                let words: Vec<String> = kws.iter().map(|k| k.to_string()).collect();
                format!("basic_type[{}]", words.join(" "))
            }
            NodeKind::StructTypeRef(tag) => format!("struct_type[{tag}]"),
            NodeKind::UnionTypeRef(tag) => format!("union_type[{tag}]"),
            NodeKind::PointerType(_) => "pointer_type".into(),
            NodeKind::NamedDeclarator(name) => format!("named_declarator[{name}]"),
            NodeKind::PointerDeclarator(_) => "pointer_declarator".into(),
            NodeKind::ArrayDeclarator { size, .. } => {
                format!("array_declarator[{size}]")
            }
            NodeKind::InitDeclarator { .. } => "init_declarator".into(),
            NodeKind::FunctionDef { name, .. } => format!("function_def[{name}]"),
            NodeKind::FunctionDecl { name, .. } => format!("function_decl[{name}]"),
            NodeKind::Parameter { .. } => "parameter".into(),
            NodeKind::StatementList(_) => "statement_list".into(),
            NodeKind::ExpressionStatement(_) => "expression_statement".into(),
            NodeKind::EmptyStatement => "empty_statement".into(),
            NodeKind::Return => "return".into(),
            NodeKind::ReturnExpr(_) => "return_expression".into(),
            NodeKind::If { .. } => "if".into(),
            NodeKind::IfElse { .. } => "if_else".into(),
            NodeKind::While { .. } => "while".into(),
            NodeKind::DoWhile { .. } => "do_while".into(),
            NodeKind::For { .. } => "for".into(),
            NodeKind::Binary { op, .. } => format!("binary_expression[{op}]"),
            NodeKind::Unary { op, .. } => format!("unary_expression[{op}]"),
            NodeKind::Call { .. } => "function_call".into(),
            NodeKind::FieldRef { field, .. } => format!("field_ref[{field}]"),
            NodeKind::IndirectFieldRef { field, .. } => {
                format!("indirect_field_ref[{field}]")
            }
            NodeKind::ArrayElementRef { .. } => "array_element_ref".into(),
            NodeKind::VarRef(name) => format!("var_ref[{name}]"),
            NodeKind::Literal { kind, text } => format!("literal[{kind} {text}]"),
            NodeKind::ImplicitConversion(_) => "implicit_conversion".into(),
        }
    }

    /// Children in source order, for tree printing and generic walks.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            NodeKind::Unit(items) => items.iter().collect(),
            NodeKind::StructDef { fields, .. } => fields.iter().collect(),
            NodeKind::VarDecl { base, declarators } => {
                let mut v = vec![base.as_ref()];
                v.extend(declarators.iter());
                v
            }
            NodeKind::BasicType(_)
            | NodeKind::StructTypeRef(_)
            | NodeKind::UnionTypeRef(_)
            | NodeKind::NamedDeclarator(_)
            | NodeKind::EmptyStatement
            | NodeKind::Return
            | NodeKind::VarRef(_)
            | NodeKind::Literal { .. } => Vec::new(),
            NodeKind::PointerType(inner) => vec![inner.as_ref()],
            NodeKind::PointerDeclarator(decl) => vec![decl.as_ref()],
            NodeKind::ArrayDeclarator { decl, .. } => vec![decl.as_ref()],
            NodeKind::InitDeclarator { decl, init } => {
                vec![decl.as_ref(), init.as_ref()]
            }
            NodeKind::FunctionDef {
                ret, params, body, ..
            } => {
                let mut v = vec![ret.as_ref()];
                v.extend(params.iter());
                v.push(body.as_ref());
                v
            }
            NodeKind::FunctionDecl { ret, params, .. } => {
                let mut v = vec![ret.as_ref()];
                v.extend(params.iter());
                v
            }
            NodeKind::Parameter { base, decl } => vec![base.as_ref(), decl.as_ref()],
            NodeKind::StatementList(stmts) => stmts.iter().collect(),
            NodeKind::ExpressionStatement(e) => vec![e.as_ref()],
            NodeKind::ReturnExpr(e) => vec![e.as_ref()],
            NodeKind::If { cond, then } => vec![cond.as_ref(), then.as_ref()],
            NodeKind::IfElse { cond, then, els } => {
                vec![cond.as_ref(), then.as_ref(), els.as_ref()]
            }
            NodeKind::While { cond, body } => vec![cond.as_ref(), body.as_ref()],
            NodeKind::DoWhile { body, cond } => vec![body.as_ref(), cond.as_ref()],
            NodeKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let mut v = Vec::new();
                if let Some(n) = init {
                    v.push(n.as_ref());
                }
                if let Some(n) = cond {
                    v.push(n.as_ref());
                }
                if let Some(n) = update {
                    v.push(n.as_ref());
                }
                v.push(body.as_ref());
                v
            }
            NodeKind::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            NodeKind::Unary { operand, .. } => vec![operand.as_ref()],
            NodeKind::Call { callee, args } => {
                let mut v = vec![callee.as_ref()];
                v.extend(args.iter());
                v
            }
            NodeKind::FieldRef { base, .. } => vec![base.as_ref()],
            NodeKind::IndirectFieldRef { base, .. } => vec![base.as_ref()],
            NodeKind::ArrayElementRef { base, index } => {
                vec![base.as_ref(), index.as_ref()]
            }
            NodeKind::ImplicitConversion(inner) => vec![inner.as_ref()],
        }
    }
}
