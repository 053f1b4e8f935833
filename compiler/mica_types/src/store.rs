//! The type interner.
//!
//! All type descriptors are constructed here and hash-consed: equal
//! structural data yields the same `TypeId`. Per-type property flags are
//! computed once at interning time; layout, backend types, and record/variant
//! member lists are materialized lazily in sibling modules and cached in the
//! per-type metadata table.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use mica_backend::BType;
use mica_diagnostic::ErrorCode;
use mica_ir::{
    CallingConv, EnumDecl, NewTypeDecl, RecordDecl, Span, TypeId, VariantDecl,
};
use rustc_hash::FxHashMap;

use crate::error::{SemaError, SemaResult};
use crate::fields::RecordFields;
use crate::layout::Layout;
use crate::object::Object;
use crate::types::{DeclPtr, TypeData};

bitflags! {
    /// Type properties computed at interning time.
    ///
    /// Tuple/array element types are interned before their parent, so the
    /// recursive classifications fold over child flags in O(children).
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct TypeFlags: u8 {
        /// Bool, numeric, pointer-shaped, static, enum, or new-type.
        const PRIMITIVE = 1 << 0;
        /// Primitive, or tuple/array of primitive aggregates.
        const PRIMITIVE_AGGREGATE = 1 << 1;
        /// Contains an array longer than 8 somewhere by value; vetoes
        /// copy-by-load.
        const AGGREGATE_TOO_LARGE = 1 << 2;
        /// Pointer, code pointer, or C code pointer.
        const POINTER_LIKE = 1 << 3;
        /// Static, or tuple of statics all the way down.
        const STATIC_OR_TUPLE_OF_STATICS = 1 << 4;
    }
}

/// Per-type lazily filled metadata.
#[derive(Default)]
pub(crate) struct TypeMeta {
    pub flags: TypeFlags,
    pub layout: Option<Layout>,
    pub backend_type: Option<BType>,
    /// Field offsets for tuple/complex/record types.
    pub offsets: Option<Rc<Vec<u64>>>,
    pub record_fields: Option<Rc<RecordFields>>,
    pub variant_members: Option<Rc<Vec<TypeId>>>,
    pub variant_repr: Option<TypeId>,
    pub recursion_checked: bool,
    /// Guards against re-entrant materialization.
    pub materializing: bool,
}

impl Default for TypeFlags {
    fn default() -> Self {
        TypeFlags::empty()
    }
}

/// The hash-consing type interner plus pre-interned primitives.
pub struct TypeStore {
    data: RefCell<Vec<TypeData>>,
    map: RefCell<FxHashMap<TypeData, TypeId>>,
    meta: RefCell<Vec<TypeMeta>>,

    pub bool_type: TypeId,
    pub int8_type: TypeId,
    pub int16_type: TypeId,
    pub int32_type: TypeId,
    pub int64_type: TypeId,
    pub int128_type: TypeId,
    pub uint8_type: TypeId,
    pub uint16_type: TypeId,
    pub uint32_type: TypeId,
    pub uint64_type: TypeId,
    pub uint128_type: TypeId,
    pub float32_type: TypeId,
    pub float64_type: TypeId,
    pub float80_type: TypeId,
    pub imag32_type: TypeId,
    pub imag64_type: TypeId,
    pub imag80_type: TypeId,
    pub complex32_type: TypeId,
    pub complex64_type: TypeId,
    pub complex80_type: TypeId,

    /// `int` at the C ABI.
    pub c_int_type: TypeId,
    /// `size_t` at the C ABI (pointer-sized unsigned).
    pub c_size_t_type: TypeId,
    /// `ptrdiff_t` at the C ABI (pointer-sized signed).
    pub c_ptrdiff_t_type: TypeId,
}

impl TypeStore {
    /// Build the store and install the primitive types for the given pointer
    /// width.
    pub fn new(pointer_size_bits: u32) -> TypeStore {
        let mut store = TypeStore {
            data: RefCell::new(Vec::with_capacity(64)),
            map: RefCell::new(FxHashMap::default()),
            meta: RefCell::new(Vec::with_capacity(64)),
            bool_type: TypeId::from_raw(0),
            int8_type: TypeId::from_raw(0),
            int16_type: TypeId::from_raw(0),
            int32_type: TypeId::from_raw(0),
            int64_type: TypeId::from_raw(0),
            int128_type: TypeId::from_raw(0),
            uint8_type: TypeId::from_raw(0),
            uint16_type: TypeId::from_raw(0),
            uint32_type: TypeId::from_raw(0),
            uint64_type: TypeId::from_raw(0),
            uint128_type: TypeId::from_raw(0),
            float32_type: TypeId::from_raw(0),
            float64_type: TypeId::from_raw(0),
            float80_type: TypeId::from_raw(0),
            imag32_type: TypeId::from_raw(0),
            imag64_type: TypeId::from_raw(0),
            imag80_type: TypeId::from_raw(0),
            complex32_type: TypeId::from_raw(0),
            complex64_type: TypeId::from_raw(0),
            complex80_type: TypeId::from_raw(0),
            c_int_type: TypeId::from_raw(0),
            c_size_t_type: TypeId::from_raw(0),
            c_ptrdiff_t_type: TypeId::from_raw(0),
        };

        store.bool_type = store.intern(TypeData::Bool);
        store.int8_type = store.intern(TypeData::Integer { bits: 8, signed: true });
        store.int16_type = store.intern(TypeData::Integer { bits: 16, signed: true });
        store.int32_type = store.intern(TypeData::Integer { bits: 32, signed: true });
        store.int64_type = store.intern(TypeData::Integer { bits: 64, signed: true });
        store.int128_type = store.intern(TypeData::Integer { bits: 128, signed: true });
        store.uint8_type = store.intern(TypeData::Integer { bits: 8, signed: false });
        store.uint16_type = store.intern(TypeData::Integer { bits: 16, signed: false });
        store.uint32_type = store.intern(TypeData::Integer { bits: 32, signed: false });
        store.uint64_type = store.intern(TypeData::Integer { bits: 64, signed: false });
        store.uint128_type = store.intern(TypeData::Integer { bits: 128, signed: false });
        store.float32_type = store.intern(TypeData::Float { bits: 32, imaginary: false });
        store.float64_type = store.intern(TypeData::Float { bits: 64, imaginary: false });
        store.float80_type = store.intern(TypeData::Float { bits: 80, imaginary: false });
        store.imag32_type = store.intern(TypeData::Float { bits: 32, imaginary: true });
        store.imag64_type = store.intern(TypeData::Float { bits: 64, imaginary: true });
        store.imag80_type = store.intern(TypeData::Float { bits: 80, imaginary: true });
        store.complex32_type = store.intern(TypeData::Complex { bits: 32 });
        store.complex64_type = store.intern(TypeData::Complex { bits: 64 });
        store.complex80_type = store.intern(TypeData::Complex { bits: 80 });

        store.c_int_type = store.int32_type;
        match pointer_size_bits {
            32 => {
                store.c_size_t_type = store.uint32_type;
                store.c_ptrdiff_t_type = store.int32_type;
            }
            64 => {
                store.c_size_t_type = store.uint64_type;
                store.c_ptrdiff_t_type = store.int64_type;
            }
            other => panic!("unsupported pointer width: {other} bits"),
        }

        store
    }

    /// Intern a descriptor, returning the canonical id.
    pub fn intern(&self, data: TypeData) -> TypeId {
        if let Some(&id) = self.map.borrow().get(&data) {
            return id;
        }
        let flags = self.compute_flags(&data);
        let mut vec = self.data.borrow_mut();
        let id = TypeId::from_raw(
            u32::try_from(vec.len()).unwrap_or_else(|_| panic!("type interner overflow")),
        );
        vec.push(data.clone());
        self.meta.borrow_mut().push(TypeMeta {
            flags,
            ..TypeMeta::default()
        });
        self.map.borrow_mut().insert(data, id);
        id
    }

    /// Structural data of an interned type.
    pub fn data(&self, ty: TypeId) -> TypeData {
        self.data.borrow()[ty.raw() as usize].clone()
    }

    pub fn count(&self) -> usize {
        self.data.borrow().len()
    }

    pub(crate) fn with_meta<R>(&self, ty: TypeId, f: impl FnOnce(&TypeMeta) -> R) -> R {
        f(&self.meta.borrow()[ty.raw() as usize])
    }

    pub(crate) fn with_meta_mut<R>(&self, ty: TypeId, f: impl FnOnce(&mut TypeMeta) -> R) -> R {
        f(&mut self.meta.borrow_mut()[ty.raw() as usize])
    }

    fn child_flags(&self, ty: TypeId) -> TypeFlags {
        self.meta.borrow()[ty.raw() as usize].flags
    }

    fn compute_flags(&self, data: &TypeData) -> TypeFlags {
        let mut flags = TypeFlags::empty();
        match data {
            TypeData::Bool
            | TypeData::Integer { .. }
            | TypeData::Float { .. }
            | TypeData::Complex { .. }
            | TypeData::Enum(_)
            | TypeData::NewType(_) => {
                flags |= TypeFlags::PRIMITIVE | TypeFlags::PRIMITIVE_AGGREGATE;
            }
            TypeData::Pointer(_) | TypeData::CodePointer { .. } | TypeData::CCodePointer { .. } => {
                flags |= TypeFlags::PRIMITIVE
                    | TypeFlags::PRIMITIVE_AGGREGATE
                    | TypeFlags::POINTER_LIKE;
            }
            TypeData::Static(_) => {
                flags |= TypeFlags::PRIMITIVE
                    | TypeFlags::PRIMITIVE_AGGREGATE
                    | TypeFlags::STATIC_OR_TUPLE_OF_STATICS;
            }
            TypeData::Tuple(elems) => {
                let mut aggregate = true;
                let mut statics = true;
                let mut too_large = false;
                for &elem in elems {
                    let child = self.child_flags(elem);
                    aggregate &= child.contains(TypeFlags::PRIMITIVE_AGGREGATE);
                    statics &= child.contains(TypeFlags::STATIC_OR_TUPLE_OF_STATICS);
                    too_large |= child.contains(TypeFlags::AGGREGATE_TOO_LARGE);
                }
                if aggregate {
                    flags |= TypeFlags::PRIMITIVE_AGGREGATE;
                }
                if statics {
                    flags |= TypeFlags::STATIC_OR_TUPLE_OF_STATICS;
                }
                if too_large {
                    flags |= TypeFlags::AGGREGATE_TOO_LARGE;
                }
            }
            TypeData::Array { elem, size } => {
                let child = self.child_flags(*elem);
                if child.contains(TypeFlags::PRIMITIVE_AGGREGATE) {
                    flags |= TypeFlags::PRIMITIVE_AGGREGATE;
                }
                if *size > 8 || child.contains(TypeFlags::AGGREGATE_TOO_LARGE) {
                    flags |= TypeFlags::AGGREGATE_TOO_LARGE;
                }
            }
            TypeData::Vec { .. }
            | TypeData::Union(_)
            | TypeData::Record { .. }
            | TypeData::Variant { .. } => {}
        }
        flags
    }

    pub fn flags(&self, ty: TypeId) -> TypeFlags {
        self.child_flags(ty)
    }

    pub fn is_primitive(&self, ty: TypeId) -> bool {
        self.flags(ty).contains(TypeFlags::PRIMITIVE)
    }

    pub fn is_primitive_aggregate(&self, ty: TypeId) -> bool {
        self.flags(ty).contains(TypeFlags::PRIMITIVE_AGGREGATE)
    }

    pub fn is_primitive_aggregate_too_large(&self, ty: TypeId) -> bool {
        self.flags(ty).contains(TypeFlags::AGGREGATE_TOO_LARGE)
    }

    pub fn is_pointer_like(&self, ty: TypeId) -> bool {
        self.flags(ty).contains(TypeFlags::POINTER_LIKE)
    }

    pub fn is_static_or_tuple_of_statics(&self, ty: TypeId) -> bool {
        self.flags(ty).contains(TypeFlags::STATIC_OR_TUPLE_OF_STATICS)
    }

    // -- kind constructors --

    pub fn integer_type(&self, bits: u16, signed: bool) -> TypeId {
        if signed {
            self.int_type(bits)
        } else {
            self.uint_type(bits)
        }
    }

    pub fn int_type(&self, bits: u16) -> TypeId {
        match bits {
            8 => self.int8_type,
            16 => self.int16_type,
            32 => self.int32_type,
            64 => self.int64_type,
            128 => self.int128_type,
            other => panic!("invalid signed integer width: {other}"),
        }
    }

    pub fn uint_type(&self, bits: u16) -> TypeId {
        match bits {
            8 => self.uint8_type,
            16 => self.uint16_type,
            32 => self.uint32_type,
            64 => self.uint64_type,
            128 => self.uint128_type,
            other => panic!("invalid unsigned integer width: {other}"),
        }
    }

    pub fn float_type(&self, bits: u16) -> TypeId {
        match bits {
            32 => self.float32_type,
            64 => self.float64_type,
            80 => self.float80_type,
            other => panic!("invalid float width: {other}"),
        }
    }

    pub fn imag_type(&self, bits: u16) -> TypeId {
        match bits {
            32 => self.imag32_type,
            64 => self.imag64_type,
            80 => self.imag80_type,
            other => panic!("invalid imaginary width: {other}"),
        }
    }

    pub fn complex_type(&self, bits: u16) -> TypeId {
        match bits {
            32 => self.complex32_type,
            64 => self.complex64_type,
            80 => self.complex80_type,
            other => panic!("invalid complex width: {other}"),
        }
    }

    pub fn pointer_type(&self, pointee: TypeId) -> TypeId {
        self.intern(TypeData::Pointer(pointee))
    }

    pub fn code_pointer_type(
        &self,
        arg_types: Vec<TypeId>,
        return_is_ref: Vec<bool>,
        return_types: Vec<TypeId>,
    ) -> TypeId {
        assert_eq!(return_is_ref.len(), return_types.len());
        self.intern(TypeData::CodePointer {
            arg_types,
            return_is_ref,
            return_types,
        })
    }

    pub fn c_code_pointer_type(
        &self,
        calling_conv: CallingConv,
        arg_types: Vec<TypeId>,
        has_var_args: bool,
        return_type: Option<TypeId>,
    ) -> TypeId {
        self.intern(TypeData::CCodePointer {
            calling_conv,
            arg_types,
            has_var_args,
            return_type,
        })
    }

    pub fn array_type(&self, elem: TypeId, size: u32) -> TypeId {
        self.intern(TypeData::Array { elem, size })
    }

    pub fn vec_type(&self, elem: TypeId, size: u32, span: Span) -> SemaResult<TypeId> {
        match self.data(elem) {
            TypeData::Integer { .. } | TypeData::Float { .. } => {
                Ok(self.intern(TypeData::Vec { elem, size }))
            }
            _ => Err(SemaError::new(
                ErrorCode::E2002,
                span,
                "Vec element type must be an integer or float type",
            )),
        }
    }

    pub fn tuple_type(&self, elems: Vec<TypeId>) -> TypeId {
        self.intern(TypeData::Tuple(elems))
    }

    pub fn union_type(&self, members: Vec<TypeId>) -> TypeId {
        self.intern(TypeData::Union(members))
    }

    pub fn record_type(
        &self,
        decl: &Rc<RecordDecl>,
        params: Vec<Object>,
        span: Span,
    ) -> SemaResult<TypeId> {
        check_params_arity(
            decl.params.len(),
            decl.var_param.is_some(),
            params.len(),
            span,
        )?;
        debug_assert!(params.iter().all(Object::is_static));
        Ok(self.intern(TypeData::Record {
            decl: DeclPtr(decl.clone()),
            params,
        }))
    }

    pub fn variant_type(
        &self,
        decl: &Rc<VariantDecl>,
        params: Vec<Object>,
        span: Span,
    ) -> SemaResult<TypeId> {
        check_params_arity(
            decl.params.len(),
            decl.var_param.is_some(),
            params.len(),
            span,
        )?;
        Ok(self.intern(TypeData::Variant {
            decl: DeclPtr(decl.clone()),
            params,
        }))
    }

    pub fn static_type(&self, obj: Object) -> TypeId {
        debug_assert!(obj.is_static(), "non-static object in Static type");
        self.intern(TypeData::Static(Box::new(obj)))
    }

    pub fn enum_type(&self, decl: &Rc<EnumDecl>) -> TypeId {
        self.intern(TypeData::Enum(DeclPtr(decl.clone())))
    }

    pub fn new_type(&self, decl: &Rc<NewTypeDecl>) -> TypeId {
        self.intern(TypeData::NewType(DeclPtr(decl.clone())))
    }
}

fn check_params_arity(
    declared: usize,
    has_var_param: bool,
    given: usize,
    span: Span,
) -> SemaResult<()> {
    let ok = if has_var_param {
        given >= declared
    } else {
        given == declared
    };
    if ok {
        Ok(())
    } else {
        Err(SemaError::new(
            ErrorCode::E2005,
            span,
            format!("expected {declared} type parameter(s), got {given}"),
        ))
    }
}

#[cfg(test)]
mod tests;
