//! Structural type descriptors.
//!
//! `TypeData` is the interning key: two types with equal kind and equal
//! structural parameters intern to the same `TypeId`, so type equality is an
//! id compare everywhere else in the compiler. Record and variant descriptors
//! key on declaration identity plus static-object equality of their
//! parameters.

use std::rc::Rc;

use mica_ir::{CallingConv, EnumDecl, NewTypeDecl, RecordDecl, TypeId, VariantDecl};

use crate::object::Object;

/// Declaration pointer keyed by node identity.
#[derive(Debug)]
pub struct DeclPtr<T>(pub Rc<T>);

impl<T> Clone for DeclPtr<T> {
    fn clone(&self) -> Self {
        DeclPtr(self.0.clone())
    }
}

impl<T> PartialEq for DeclPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for DeclPtr<T> {}

impl<T> std::hash::Hash for DeclPtr<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Structural description of a type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeData {
    Bool,
    Integer {
        bits: u16,
        signed: bool,
    },
    Float {
        bits: u16,
        imaginary: bool,
    },
    Complex {
        bits: u16,
    },
    Pointer(TypeId),
    CodePointer {
        arg_types: Vec<TypeId>,
        return_is_ref: Vec<bool>,
        return_types: Vec<TypeId>,
    },
    CCodePointer {
        calling_conv: CallingConv,
        arg_types: Vec<TypeId>,
        has_var_args: bool,
        return_type: Option<TypeId>,
    },
    Array {
        elem: TypeId,
        size: u32,
    },
    Vec {
        elem: TypeId,
        size: u32,
    },
    Tuple(Vec<TypeId>),
    Union(Vec<TypeId>),
    Record {
        decl: DeclPtr<RecordDecl>,
        params: Vec<Object>,
    },
    Variant {
        decl: DeclPtr<VariantDecl>,
        params: Vec<Object>,
    },
    Static(Box<Object>),
    Enum(DeclPtr<EnumDecl>),
    NewType(DeclPtr<NewTypeDecl>),
}

impl TypeData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeData::Bool => "Bool",
            TypeData::Integer { .. } => "Integer",
            TypeData::Float { .. } => "Float",
            TypeData::Complex { .. } => "Complex",
            TypeData::Pointer(_) => "Pointer",
            TypeData::CodePointer { .. } => "CodePointer",
            TypeData::CCodePointer { .. } => "CCodePointer",
            TypeData::Array { .. } => "Array",
            TypeData::Vec { .. } => "Vec",
            TypeData::Tuple(_) => "Tuple",
            TypeData::Union(_) => "Union",
            TypeData::Record { .. } => "Record",
            TypeData::Variant { .. } => "Variant",
            TypeData::Static(_) => "Static",
            TypeData::Enum(_) => "Enum",
            TypeData::NewType(_) => "NewType",
        }
    }
}
