//! Core IR for the Mica compiler.
//!
//! This crate holds everything the semantic phases agree on without having to
//! know about each other: interned names, source spans, the resolved and
//! desugared AST (expressions, statements, declarations), opaque handles for
//! interned types and synthesized static objects, and the primitive-operation
//! table.
//!
//! Surface syntax never reaches this crate; the parser and desugarer produce
//! the core forms directly (`for`/`switch`/`catch` arrive pre-lowered).

mod ast;
mod interner;
mod name;
mod ops;
mod span;

pub use ast::{
    Ast, BindingKind, BindingName, CallingConv, Code, CodeBody, EnumDecl, Expr, ExprId,
    ExternalArg, ExternalProcedure, FormalArg, GlobalAlias, GlobalVariable, InlineKind,
    InstanceDecl, Item, Module, NewTypeDecl, ObjectId, Overload, PatternVar, Procedure,
    RecordBody, RecordDecl, RecordField, ReturnKind, ReturnSpec, Stmt, StmtId, Tempness,
    VariantDecl,
};
pub use interner::{SharedInterner, StringInterner};
pub use name::Name;
pub use ops::PrimOpCode;
pub use span::Span;

/// Opaque handle for an interned type descriptor.
///
/// The interner lives in `mica_types`; this crate only defines the handle so
/// that AST nodes and module attributes can refer to types without a
/// dependency on the type system.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    /// Construct a handle from a raw index. Only the type interner should
    /// call this.
    #[inline]
    pub fn from_raw(raw: u32) -> TypeId {
        TypeId(raw)
    }

    /// The raw index into the type interner.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ty{}", self.0)
    }
}
