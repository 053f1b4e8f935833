//! Static objects and compile-time value holders.
//!
//! [`Object`] is the grand union everything name-shaped resolves to: types,
//! compile-time values, declarations, analysis values, lowered values, and
//! alias expressions. Equality and hashing implement static-object identity:
//! value holders compare by type plus bytes, identifiers by name, everything
//! else by node identity. That relation keys record/variant parameter
//! interning and the invoke table.

use std::rc::Rc;

use mica_ir::{
    EnumDecl, ExprId, ExternalProcedure, GlobalAlias, GlobalVariable, Module, Name, NewTypeDecl,
    PrimOpCode, Procedure, RecordDecl, TypeId, VariantDecl,
};

use crate::env::Env;
use crate::value::{CValue, MultiCValue, MultiPValue, PValue};

/// A compile-time constant: a type plus its raw bytes.
///
/// Integer holders store little-endian bytes at the type's width; bool is one
/// byte; floats store their IEEE bit pattern. Statics and tuples of statics
/// are zero-sized-ish and store the bytes their layout demands (all zero).
#[derive(Clone, Debug)]
pub struct ValueHolder {
    pub ty: TypeId,
    pub bytes: Vec<u8>,
}

impl ValueHolder {
    pub fn new(ty: TypeId, bytes: Vec<u8>) -> ValueHolder {
        ValueHolder { ty, bytes }
    }

    /// Read the holder as a sign-extended integer.
    pub fn as_i128(&self, signed: bool) -> i128 {
        let mut bytes = [0u8; 16];
        let n = self.bytes.len().min(16);
        bytes[..n].copy_from_slice(&self.bytes[..n]);
        let raw = u128::from_le_bytes(bytes);
        if signed && n < 16 && n > 0 {
            let sign_bit = 1u128 << (n * 8 - 1);
            if raw & sign_bit != 0 {
                return (raw | (u128::MAX << (n * 8))) as i128;
            }
        }
        raw as i128
    }

    pub fn as_bool(&self) -> bool {
        self.bytes.first().copied().unwrap_or(0) != 0
    }

    pub fn as_f64(&self) -> f64 {
        match self.bytes.len() {
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&self.bytes);
                f64::from(f32::from_le_bytes(b))
            }
            _ => {
                let mut b = [0u8; 8];
                let n = self.bytes.len().min(8);
                b[..n].copy_from_slice(&self.bytes[..n]);
                f64::from_le_bytes(b)
            }
        }
    }
}

impl PartialEq for ValueHolder {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.bytes == other.bytes
    }
}

impl Eq for ValueHolder {}

impl std::hash::Hash for ValueHolder {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        // Byte-sum keeps the hash stable across holder widths.
        let sum: u64 = self.bytes.iter().map(|&b| u64::from(b)).sum();
        sum.hash(state);
    }
}

/// Everything a name can resolve to.
#[derive(Clone, Debug)]
pub enum Object {
    // -- statics --
    Type(TypeId),
    Holder(Rc<ValueHolder>),
    Ident(Name),
    Proc(Rc<Procedure>),
    Record(Rc<RecordDecl>),
    Variant(Rc<VariantDecl>),
    Enum(Rc<EnumDecl>),
    NewType(Rc<NewTypeDecl>),
    Global(Rc<GlobalVariable>),
    Alias(Rc<GlobalAlias>),
    External(Rc<ExternalProcedure>),
    Module(Rc<Module>),
    PrimOp(PrimOpCode),
    /// A sequence of statics (variadic parameter bindings).
    Multi(Rc<Vec<Object>>),

    // -- analysis/lowering values bound in environments --
    PValue(PValue),
    MultiPValue(MultiPValue),
    CValue(CValue),
    MultiCValue(MultiCValue),

    // -- alias bindings: expression plus capture environment --
    AliasExpr(ExprId, Env),
    AliasExprList(Rc<Vec<ExprId>>, Env),
}

impl Object {
    /// True for the variants that may appear as static values (record
    /// parameters, static types, invoke keys).
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            Object::Type(_)
                | Object::Holder(_)
                | Object::Ident(_)
                | Object::Proc(_)
                | Object::Record(_)
                | Object::Variant(_)
                | Object::Enum(_)
                | Object::NewType(_)
                | Object::External(_)
                | Object::Module(_)
                | Object::PrimOp(_)
        )
    }

    /// Short description for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::Type(_) => "type",
            Object::Holder(_) => "value",
            Object::Ident(_) => "identifier",
            Object::Proc(_) => "procedure",
            Object::Record(_) => "record",
            Object::Variant(_) => "variant",
            Object::Enum(_) => "enum",
            Object::NewType(_) => "newtype",
            Object::Global(_) => "global variable",
            Object::Alias(_) => "global alias",
            Object::External(_) => "external procedure",
            Object::Module(_) => "module",
            Object::PrimOp(_) => "primitive",
            Object::Multi(_) => "multiple statics",
            Object::PValue(_) => "analysis value",
            Object::MultiPValue(_) => "analysis values",
            Object::CValue(_) => "lowered value",
            Object::MultiCValue(_) => "lowered values",
            Object::AliasExpr(..) => "alias",
            Object::AliasExprList(..) => "alias list",
        }
    }
}

fn rc_addr<T>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as usize
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        use Object::*;
        match (self, other) {
            (Type(a), Type(b)) => a == b,
            (Holder(a), Holder(b)) => a == b,
            (Ident(a), Ident(b)) => a == b,
            (Proc(a), Proc(b)) => Rc::ptr_eq(a, b),
            (Record(a), Record(b)) => Rc::ptr_eq(a, b),
            (Variant(a), Variant(b)) => Rc::ptr_eq(a, b),
            (Enum(a), Enum(b)) => Rc::ptr_eq(a, b),
            (NewType(a), NewType(b)) => Rc::ptr_eq(a, b),
            (Global(a), Global(b)) => Rc::ptr_eq(a, b),
            (Alias(a), Alias(b)) => Rc::ptr_eq(a, b),
            (External(a), External(b)) => Rc::ptr_eq(a, b),
            (Module(a), Module(b)) => Rc::ptr_eq(a, b),
            (PrimOp(a), PrimOp(b)) => a == b,
            (Multi(a), Multi(b)) => a == b,
            (PValue(a), PValue(b)) => a == b,
            (MultiPValue(a), MultiPValue(b)) => a == b,
            (CValue(a), CValue(b)) => a == b,
            (MultiCValue(a), MultiCValue(b)) => a == b,
            (AliasExpr(ea, va), AliasExpr(eb, vb)) => ea == eb && va.identity() == vb.identity(),
            (AliasExprList(ea, va), AliasExprList(eb, vb)) => {
                ea == eb && va.identity() == vb.identity()
            }
            _ => false,
        }
    }
}

impl Eq for Object {}

impl std::hash::Hash for Object {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use Object::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Type(t) => t.hash(state),
            Holder(h) => h.hash(state),
            Ident(n) => n.hash(state),
            Proc(p) => rc_addr(p).hash(state),
            Record(r) => rc_addr(r).hash(state),
            Variant(v) => rc_addr(v).hash(state),
            Enum(e) => rc_addr(e).hash(state),
            NewType(n) => rc_addr(n).hash(state),
            Global(g) => rc_addr(g).hash(state),
            Alias(a) => rc_addr(a).hash(state),
            External(e) => rc_addr(e).hash(state),
            Module(m) => rc_addr(m).hash(state),
            PrimOp(p) => p.hash(state),
            Multi(v) => {
                for obj in v.iter() {
                    obj.hash(state);
                }
            }
            PValue(pv) => pv.hash(state),
            MultiPValue(mpv) => mpv.hash(state),
            CValue(cv) => cv.hash(state),
            MultiCValue(mcv) => mcv.hash(state),
            AliasExpr(e, env) => {
                e.hash(state);
                env.identity().hash(state);
            }
            AliasExprList(e, env) => {
                e.hash(state);
                env.identity().hash(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_ir::TypeId;
    use pretty_assertions::assert_eq;

    #[test]
    fn holder_equality_is_type_plus_bytes() {
        let t = TypeId::from_raw(3);
        let a = ValueHolder::new(t, vec![1, 0, 0, 0]);
        let b = ValueHolder::new(t, vec![1, 0, 0, 0]);
        let c = ValueHolder::new(t, vec![2, 0, 0, 0]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, ValueHolder::new(TypeId::from_raw(4), vec![1, 0, 0, 0]));
    }

    #[test]
    fn holder_sign_extension() {
        let t = TypeId::from_raw(0);
        let h = ValueHolder::new(t, vec![0xFF]);
        assert_eq!(h.as_i128(true), -1);
        assert_eq!(h.as_i128(false), 255);
    }

    #[test]
    fn procedure_objects_compare_by_identity() {
        let interner = mica_ir::StringInterner::new();
        let p1 = Rc::new(Procedure::new(interner.intern("f")));
        let p2 = Rc::new(Procedure::new(interner.intern("f")));
        assert_eq!(Object::Proc(p1.clone()), Object::Proc(p1.clone()));
        assert_ne!(Object::Proc(p1), Object::Proc(p2));
    }
}
