//! Type descriptors.
//!
//! Types are shared immutable values: the same `Rc<Type>` may be referenced
//! by many AST nodes and symbols.  A type is never mutated after
//! construction; adding a qualifier produces a new wrapped value.  The one
//! exception is a struct definition, whose member list is appended to while
//! the definition is being analyzed (a struct may contain a pointer to
//! itself, so the descriptor has to exist before its fields are visited).

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use derive_more::Display;

use crate::common::{CompileError, Id, Location, Result};

/// The basic (non-derived) type kinds.  The ordering is the conversion
/// rank used by the usual arithmetic conversions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub enum BasicTypeKind {
    #[display("char")]
    Char,
    #[display("short")]
    Short,
    #[display("int")]
    Int,
    #[display("long")]
    Long,
    #[display("void")]
    Void,
}

impl BasicTypeKind {
    /// Storage size in bytes.  `void` has no storage.
    pub fn size(self) -> Option<u32> {
        match self {
            BasicTypeKind::Char => Some(1),
            BasicTypeKind::Short => Some(2),
            BasicTypeKind::Int => Some(4),
            BasicTypeKind::Long => Some(8),
            BasicTypeKind::Void => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub enum TypeQualifier {
    #[display("const")]
    Const,
    #[display("volatile")]
    Volatile,
}

/// A named member of a struct or function type.  For struct fields the
/// byte offset is filled in when the definition's layout is computed; for
/// function parameters it stays zero.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: Id,
    pub ty: Rc<Type>,
    pub offset: u32,
}

impl Member {
    pub fn new(name: Id, ty: Rc<Type>) -> Self {
        Member {
            name,
            ty,
            offset: 0,
        }
    }
}

/// A struct definition.  Identity is the allocation itself: two struct
/// types are the same type exactly when they share the definition.
#[derive(Debug)]
pub struct StructDef {
    pub tag: Id,
    members: RefCell<Vec<Member>>,
    layout: Cell<Option<(u32, u32)>>,
}

impl StructDef {
    pub fn new(tag: Id) -> Rc<Self> {
        Rc::new(StructDef {
            tag,
            members: RefCell::new(Vec::new()),
            layout: Cell::new(None),
        })
    }

    pub fn add_member(&self, member: Member) {
        self.members.borrow_mut().push(member);
    }

    pub fn members(&self) -> Ref<'_, Vec<Member>> {
        self.members.borrow()
    }

    pub fn num_members(&self) -> usize {
        self.members.borrow().len()
    }

    pub fn find_member(&self, name: Id) -> Option<Member> {
        self.members
            .borrow()
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    pub fn set_member_offset(&self, index: usize, offset: u32) {
        self.members.borrow_mut()[index].offset = offset;
    }

    /// Record the computed (size, alignment) once all fields are known.
    pub fn set_layout(&self, size: u32, align: u32) {
        self.layout.set(Some((size, align)));
    }

    /// `None` while the definition is still incomplete.
    pub fn layout(&self) -> Option<(u32, u32)> {
        self.layout.get()
    }
}

/// A type descriptor.
#[derive(Debug)]
pub enum Type {
    Basic {
        kind: BasicTypeKind,
        is_signed: bool,
    },
    Pointer(Rc<Type>),
    Array {
        base: Rc<Type>,
        size: u64,
    },
    Function {
        ret: Rc<Type>,
        params: Vec<Member>,
    },
    Struct(Rc<StructDef>),
    Qualified {
        base: Rc<Type>,
        qualifier: TypeQualifier,
    },
}

impl Type {
    pub fn basic(kind: BasicTypeKind, is_signed: bool) -> Rc<Type> {
        Rc::new(Type::Basic { kind, is_signed })
    }

    pub fn int() -> Rc<Type> {
        Type::basic(BasicTypeKind::Int, true)
    }

    pub fn pointer(base: Rc<Type>) -> Rc<Type> {
        Rc::new(Type::Pointer(base))
    }

    pub fn array(base: Rc<Type>, size: u64) -> Rc<Type> {
        Rc::new(Type::Array { base, size })
    }

    pub fn function(ret: Rc<Type>, params: Vec<Member>) -> Rc<Type> {
        Rc::new(Type::Function { ret, params })
    }

    pub fn structure(def: Rc<StructDef>) -> Rc<Type> {
        Rc::new(Type::Struct(def))
    }

    pub fn qualified(base: Rc<Type>, qualifier: TypeQualifier) -> Rc<Type> {
        Rc::new(Type::Qualified { base, qualifier })
    }

    /// Strip any top-level qualifiers.
    pub fn unqualified(&self) -> &Type {
        let mut t = self;
        while let Type::Qualified { base, .. } = t {
            t = base;
        }
        t
    }

    pub fn is_basic(&self) -> bool {
        matches!(self.unqualified(), Type::Basic { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(
            self.unqualified(),
            Type::Basic {
                kind: BasicTypeKind::Void,
                ..
            }
        )
    }

    /// Integral types are the basic types other than `void`.
    pub fn is_integral(&self) -> bool {
        match self.unqualified() {
            Type::Basic { kind, .. } => *kind != BasicTypeKind::Void,
            _ => false,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.unqualified(), Type::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.unqualified(), Type::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.unqualified(), Type::Struct(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.unqualified(), Type::Function { .. })
    }

    pub fn is_signed(&self) -> bool {
        match self.unqualified() {
            Type::Basic { is_signed, .. } => *is_signed,
            _ => false,
        }
    }

    pub fn basic_kind(&self) -> Option<BasicTypeKind> {
        match self.unqualified() {
            Type::Basic { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The pointed-to or element type of a pointer or array.
    pub fn base_type(&self) -> Option<&Rc<Type>> {
        match self.unqualified() {
            Type::Pointer(base) => Some(base),
            Type::Array { base, .. } => Some(base),
            _ => None,
        }
    }

    pub fn return_type(&self) -> Option<&Rc<Type>> {
        match self.unqualified() {
            Type::Function { ret, .. } => Some(ret),
            _ => None,
        }
    }

    pub fn params(&self) -> Option<&[Member]> {
        match self.unqualified() {
            Type::Function { params, .. } => Some(params),
            _ => None,
        }
    }

    pub fn struct_def(&self) -> Option<&Rc<StructDef>> {
        match self.unqualified() {
            Type::Struct(def) => Some(def),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        self.has_qualifier(TypeQualifier::Const)
    }

    pub fn is_volatile(&self) -> bool {
        self.has_qualifier(TypeQualifier::Volatile)
    }

    fn has_qualifier(&self, q: TypeQualifier) -> bool {
        let mut t = self;
        while let Type::Qualified { base, qualifier } = t {
            if *qualifier == q {
                return true;
            }
            t = base;
        }
        false
    }

    /// Storage size in bytes.  Fails for types without storage (`void`,
    /// functions, incomplete structs).
    pub fn storage_size(&self) -> Result<u32> {
        match self.unqualified() {
            Type::Basic { kind, .. } => kind.size().ok_or_else(|| {
                CompileError::runtime("void type has no storage size")
            }),
            Type::Pointer(_) => Ok(8),
            Type::Array { base, size } => {
                let elem = base.storage_size()? as u64;
                Ok((elem * size) as u32)
            }
            Type::Struct(def) => def.layout().map(|(size, _)| size).ok_or_else(|| {
                CompileError::runtime(format!(
                    "struct {} is incomplete",
                    def.tag
                ))
            }),
            Type::Function { .. } => {
                Err(CompileError::runtime("function type has no storage size"))
            }
            Type::Qualified { .. } => unreachable!(),
        }
    }

    /// Natural alignment in bytes.
    pub fn alignment(&self) -> Result<u32> {
        match self.unqualified() {
            Type::Basic { .. } | Type::Pointer(_) => self.storage_size(),
            Type::Array { base, .. } => base.alignment(),
            Type::Struct(def) => def.layout().map(|(_, align)| align).ok_or_else(|| {
                CompileError::runtime(format!(
                    "struct {} is incomplete",
                    def.tag
                ))
            }),
            Type::Function { .. } => {
                Err(CompileError::runtime("function type has no alignment"))
            }
            Type::Qualified { .. } => unreachable!(),
        }
    }

    /// Structural equality.  Qualifiers are ignored at the top level, but
    /// pointer base types must carry identical qualifier sets.  Struct
    /// equality is identity of the definition.
    pub fn is_same(&self, other: &Type) -> bool {
        match (self.unqualified(), other.unqualified()) {
            (
                Type::Basic { kind: k1, is_signed: s1 },
                Type::Basic { kind: k2, is_signed: s2 },
            ) => k1 == k2 && s1 == s2,
            (Type::Pointer(b1), Type::Pointer(b2)) => {
                b1.is_const() == b2.is_const()
                    && b1.is_volatile() == b2.is_volatile()
                    && b1.is_same(b2)
            }
            (
                Type::Array { base: b1, size: n1 },
                Type::Array { base: b2, size: n2 },
            ) => n1 == n2 && b1.is_same(b2),
            (Type::Struct(d1), Type::Struct(d2)) => Rc::ptr_eq(d1, d2),
            (
                Type::Function { ret: r1, params: p1 },
                Type::Function { ret: r2, params: p2 },
            ) => {
                r1.is_same(r2)
                    && p1.len() == p2.len()
                    && p1.iter().zip(p2.iter()).all(|(a, b)| a.ty.is_same(&b.ty))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Basic { kind, is_signed } => {
                if !is_signed {
                    write!(f, "unsigned {kind}")
                } else {
                    write!(f, "{kind}")
                }
            }
            Type::Pointer(base) => write!(f, "pointer to {base}"),
            Type::Array { base, size } => write!(f, "array of {size} x {base}"),
            Type::Function { ret, params } => {
                write!(f, "function (")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p.ty)?;
                }
                write!(f, ") returning {ret}")
            }
            Type::Struct(def) => write!(f, "struct {}", def.tag),
            Type::Qualified { base, qualifier } => write!(f, "{qualifier} {base}"),
        }
    }
}

/// The declaration-specifier keywords a basic declarator may carry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum TypeKeyword {
    #[display("void")]
    Void,
    #[display("char")]
    Char,
    #[display("int")]
    Int,
    #[display("long")]
    Long,
    #[display("short")]
    Short,
    #[display("signed")]
    Signed,
    #[display("unsigned")]
    Unsigned,
    #[display("const")]
    Const,
    #[display("volatile")]
    Volatile,
}

/// Fold a multiset of declaration-specifier keywords into a basic type,
/// possibly wrapped with qualifiers.
pub fn decode_basic_type(keywords: &[TypeKeyword], loc: Location) -> Result<Rc<Type>> {
    use TypeKeyword::*;

    let count = |k: TypeKeyword| keywords.iter().filter(|&&x| x == k).count();
    let (n_void, n_char, n_int) = (count(Void), count(Char), count(Int));
    let (n_long, n_short) = (count(Long), count(Short));
    let (n_signed, n_unsigned) = (count(Signed), count(Unsigned));
    let (n_const, n_volatile) = (count(Const), count(Volatile));

    if n_void + n_char + n_int > 1 {
        return Err(CompileError::semantic(
            loc,
            "only one of char, int, or void may be used",
        ));
    }
    if n_signed > 0 && n_unsigned > 0 {
        return Err(CompileError::semantic(
            loc,
            "signed and unsigned are mutually exclusive",
        ));
    }
    if n_void > 0 && keywords.len() > n_void {
        return Err(CompileError::semantic(
            loc,
            "void cannot be combined with any other keywords",
        ));
    }
    if n_long > 0 && n_short > 0 {
        return Err(CompileError::semantic(
            loc,
            "long and short are mutually exclusive",
        ));
    }
    if (n_long > 0 || n_short > 0) && n_char > 0 {
        return Err(CompileError::semantic(
            loc,
            "long and short may only be used with int",
        ));
    }
    if keywords.is_empty()
        || (n_void + n_char + n_int + n_long + n_short + n_signed + n_unsigned) == 0
    {
        return Err(CompileError::semantic(loc, "declaration has no type"));
    }

    let kind = if n_void > 0 {
        BasicTypeKind::Void
    } else if n_char > 0 {
        BasicTypeKind::Char
    } else if n_long > 0 {
        BasicTypeKind::Long
    } else if n_short > 0 {
        BasicTypeKind::Short
    } else {
        BasicTypeKind::Int
    };

    let mut ty = Type::basic(kind, n_unsigned == 0);
    if n_volatile > 0 {
        ty = Type::qualified(ty, TypeQualifier::Volatile);
    }
    if n_const > 0 {
        ty = Type::qualified(ty, TypeQualifier::Const);
    }
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern;

    fn loc() -> Location {
        Location::new(intern("test.c"), 1, 1)
    }

    #[test]
    fn basic_sizes() {
        assert_eq!(Type::basic(BasicTypeKind::Char, true).storage_size().unwrap(), 1);
        assert_eq!(Type::basic(BasicTypeKind::Short, true).storage_size().unwrap(), 2);
        assert_eq!(Type::int().storage_size().unwrap(), 4);
        assert_eq!(Type::basic(BasicTypeKind::Long, true).storage_size().unwrap(), 8);
        assert_eq!(Type::pointer(Type::int()).storage_size().unwrap(), 8);
        assert_eq!(Type::array(Type::int(), 4).storage_size().unwrap(), 16);
    }

    #[test]
    fn void_has_no_storage() {
        assert!(Type::basic(BasicTypeKind::Void, true).storage_size().is_err());
    }

    #[test]
    fn decode_plain_int() {
        let ty = decode_basic_type(&[TypeKeyword::Int], loc()).unwrap();
        assert!(ty.is_same(&Type::int()));
    }

    #[test]
    fn decode_unsigned_defaults_to_int() {
        let ty = decode_basic_type(&[TypeKeyword::Unsigned], loc()).unwrap();
        assert_eq!(ty.basic_kind(), Some(BasicTypeKind::Int));
        assert!(!ty.is_signed());
    }

    #[test]
    fn decode_rejects_void_combinations() {
        assert!(decode_basic_type(&[TypeKeyword::Void, TypeKeyword::Int], loc()).is_err());
        assert!(decode_basic_type(&[TypeKeyword::Void, TypeKeyword::Const], loc()).is_err());
    }

    #[test]
    fn decode_rejects_long_short() {
        assert!(decode_basic_type(&[TypeKeyword::Long, TypeKeyword::Short], loc()).is_err());
        assert!(decode_basic_type(&[TypeKeyword::Long, TypeKeyword::Char], loc()).is_err());
    }

    #[test]
    fn decode_qualifiers_wrap() {
        let ty = decode_basic_type(&[TypeKeyword::Const, TypeKeyword::Int], loc()).unwrap();
        assert!(ty.is_const());
        assert!(ty.is_integral());
    }

    #[test]
    fn same_ignores_top_level_qualifiers() {
        let a = Type::qualified(Type::int(), TypeQualifier::Const);
        assert!(a.is_same(&Type::int()));
    }

    #[test]
    fn pointer_bases_require_matching_qualifiers() {
        let p1 = Type::pointer(Type::qualified(Type::int(), TypeQualifier::Const));
        let p2 = Type::pointer(Type::int());
        assert!(!p1.is_same(&p2));
        assert!(p1.is_same(&p1));
    }

    #[test]
    fn struct_identity() {
        let d1 = StructDef::new(intern("p"));
        let d2 = StructDef::new(intern("p"));
        let t1 = Type::structure(d1.clone());
        let t1b = Type::structure(d1);
        let t2 = Type::structure(d2);
        assert!(t1.is_same(&t1b));
        assert!(!t1.is_same(&t2));
    }

    #[test]
    fn struct_layout_queries() {
        let d = StructDef::new(intern("p"));
        d.add_member(Member::new(intern("x"), Type::int()));
        d.add_member(Member::new(intern("y"), Type::int()));
        let ty = Type::structure(d.clone());
        assert!(ty.storage_size().is_err());
        d.set_layout(8, 4);
        assert_eq!(ty.storage_size().unwrap(), 8);
        assert_eq!(ty.alignment().unwrap(), 4);
    }
}
