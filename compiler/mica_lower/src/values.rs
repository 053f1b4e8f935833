//! Value semantics at the lowering level.
//!
//! Init, destroy, copy, move, and assign route through the prelude operators
//! so user overloads apply, except for the primitive-aggregate shortcut:
//! matching types that are not too large copy with a plain load/store, and
//! statics lower to nothing at all.

use mica_backend::{CastOp, ValueId};
use mica_diagnostic::ErrorCode;
use mica_ir::{PrimOpCode, Span, TypeId};
use mica_types::{
    CValue, MultiCValue, MultiPValue, Object, PValue, SemaError, SemaResult, TypeData, ValueHolder,
};

use crate::context::FnCx;

impl FnCx<'_> {
    /// Whether the copy-by-load shortcut applies between these values.
    fn plain_copy(&self, dest: TypeId, src: TypeId) -> bool {
        let types = &self.comp().types;
        types.is_primitive_aggregate(dest)
            && dest == src
            && !types.is_primitive_aggregate_too_large(dest)
    }

    fn is_static_shaped(&self, ty: TypeId) -> bool {
        self.comp().types.is_static_or_tuple_of_statics(ty)
    }

    /// Load/store the whole value.
    fn load_store(&self, dest: CValue, src: CValue) -> SemaResult<()> {
        if self.is_static_shaped(dest.ty) {
            return Ok(());
        }
        let bty = self.comp().backend_type(dest.ty)?;
        let value = self.bx.load(bty, src.ptr);
        self.bx.store(value, dest.ptr);
        Ok(())
    }

    /// Default initialization. Primitive aggregates are left as-is; other
    /// types run their constructor overloads when the user installed any.
    pub fn value_init(&self, dest: CValue) -> SemaResult<()> {
        if self.comp().types.is_primitive_aggregate(dest.ty) {
            return Ok(());
        }
        self.lower_call_object(
            &Object::Type(dest.ty),
            &MultiCValue::new(),
            &MultiPValue::new(),
            &MultiCValue::one(dest),
            Span::DUMMY,
        )
    }

    /// Destroy a value; runs with exception checking disabled.
    pub fn value_destroy(&self, dest: CValue) -> SemaResult<()> {
        if self.comp().types.is_primitive_aggregate(dest.ty) {
            return Ok(());
        }
        let saved = self.check_exceptions.get();
        self.check_exceptions.set(false);
        let result = self.lower_call_object(
            &self.comp().operator(PrimOpCode::Destroy),
            &MultiCValue::one(dest),
            &MultiPValue::one(PValue::lvalue(dest.ty)),
            &MultiCValue::new(),
            Span::DUMMY,
        );
        self.check_exceptions.set(saved);
        result
    }

    pub fn value_copy(&self, dest: CValue, src: CValue) -> SemaResult<()> {
        if self.plain_copy(dest.ty, src.ty) {
            return self.load_store(dest, src);
        }
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::Copy),
            &MultiCValue::one(src),
            &MultiPValue::one(PValue::lvalue(src.ty)),
            &MultiCValue::one(dest),
            Span::DUMMY,
        )
    }

    pub fn value_move(&self, dest: CValue, src: CValue) -> SemaResult<()> {
        if self.plain_copy(dest.ty, src.ty) {
            return self.load_store(dest, src);
        }
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::Move),
            &MultiCValue::one(src),
            &MultiPValue::one(PValue::lvalue(src.ty)),
            &MultiCValue::one(dest),
            Span::DUMMY,
        )
    }

    /// Forward a value into a slot: matching types move; a pointer slot takes
    /// the address.
    pub fn value_forward(&self, dest: CValue, src: CValue) -> SemaResult<()> {
        if dest.ty == src.ty {
            return self.value_move(dest, src);
        }
        debug_assert_eq!(dest.ty, self.comp().types.pointer_type(src.ty));
        self.bx.store(src.ptr, dest.ptr);
        Ok(())
    }

    pub fn value_assign(
        &self,
        dest: CValue,
        dest_pv: PValue,
        src: CValue,
        src_pv: PValue,
    ) -> SemaResult<()> {
        if self.plain_copy(dest.ty, src.ty) && !dest_pv.is_temp {
            return self.load_store(dest, src);
        }
        let mut args = MultiCValue::one(dest);
        args.push(src);
        let mut pv_args = MultiPValue::one(dest_pv);
        pv_args.push(src_pv);
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::Assign),
            &args,
            &pv_args,
            &MultiCValue::new(),
            Span::DUMMY,
        )
    }

    /// Byte-level copy used by the default `copy`/`move`/`assign` lowering.
    pub fn copy_bytes(&self, dest: CValue, src: CValue) -> SemaResult<()> {
        if self.is_static_shaped(dest.ty) {
            return Ok(());
        }
        let types = &self.comp().types;
        if types.is_primitive_aggregate(dest.ty)
            && !types.is_primitive_aggregate_too_large(dest.ty)
        {
            return self.load_store(dest, src);
        }
        let size = self.comp().type_size(dest.ty)?;
        let size_ty = self.comp().backend_type(self.comp().types.c_size_t_type)?;
        let bytes = self.bx.const_int(size_ty, i128::from(size));
        self.bx.memcpy(dest.ptr, src.ptr, bytes);
        Ok(())
    }

    /// Load a value as an `i1` flag; the type must be Bool.
    pub fn to_bool_flag(&self, cv: CValue, span: Span) -> SemaResult<ValueId> {
        if cv.ty != self.comp().types.bool_type {
            return Err(SemaError::new(
                ErrorCode::E3001,
                span,
                format!("expected Bool, got {}", self.comp().type_name(cv.ty)),
            ));
        }
        let bty = self.comp().backend_type(cv.ty)?;
        Ok(self.bx.load(bty, cv.ptr))
    }

    /// Backend constant for a value holder, when the type has one.
    pub fn holder_constant(&self, holder: &ValueHolder) -> SemaResult<Option<ValueId>> {
        let comp = self.comp();
        match comp.types.data(holder.ty) {
            TypeData::Bool => Ok(Some(self.bx.const_bool(holder.as_bool()))),
            TypeData::Integer { signed, .. } => {
                let bty = comp.backend_type(holder.ty)?;
                Ok(Some(self.bx.const_int(bty, holder.as_i128(signed))))
            }
            TypeData::Enum(_) => {
                let bty = comp.backend_type(holder.ty)?;
                Ok(Some(self.bx.const_int(bty, holder.as_i128(true))))
            }
            TypeData::Float { bits, .. } => {
                let width = match bits {
                    32 => mica_backend::FloatWidth::F32,
                    64 => mica_backend::FloatWidth::F64,
                    _ => {
                        return Err(SemaError::new(
                            ErrorCode::E4006,
                            Span::DUMMY,
                            "float constants wider than 64 bits are not supported",
                        ));
                    }
                };
                let bits_value = match width {
                    mica_backend::FloatWidth::F32 => {
                        let mut b = [0u8; 4];
                        b.copy_from_slice(&holder.bytes[..4]);
                        u64::from(u32::from_le_bytes(b))
                    }
                    _ => {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(&holder.bytes[..8]);
                        u64::from_le_bytes(b)
                    }
                };
                Ok(Some(self.bx.const_float_bits(width, bits_value)))
            }
            _ => Ok(None),
        }
    }

    /// Materialize a value holder into temp storage.
    pub fn lower_value_holder(&self, holder: &ValueHolder) -> SemaResult<CValue> {
        let cv = self.alloc_value(holder.ty)?;
        if let Some(constant) = self.holder_constant(holder)? {
            self.bx.store(constant, cv.ptr);
        } else if !self.is_static_shaped(holder.ty) {
            return Err(SemaError::new(
                ErrorCode::E4006,
                Span::DUMMY,
                format!(
                    "no constant representation for {}",
                    self.comp().type_name(holder.ty)
                ),
            ));
        }
        Ok(cv)
    }

    /// A value carrying a static object: storage exists (one token byte) but
    /// nothing is stored.
    pub fn static_cvalue(&self, obj: Object) -> SemaResult<CValue> {
        let ty = self.comp().types.static_type(obj);
        self.alloc_value(ty)
    }

    /// Integer cast helper used by several prim ops.
    pub fn cast_int(&self, value: ValueId, to: mica_backend::BType, signed: bool) -> ValueId {
        let from_bits = match self.bx.value_ty(value) {
            mica_backend::BType::Int(bits) => bits,
            other => panic!("cast_int on non-integer {other}"),
        };
        let to_bits = match to {
            mica_backend::BType::Int(bits) => bits,
            ref other => panic!("cast_int to non-integer {other}"),
        };
        if from_bits == to_bits {
            value
        } else if from_bits > to_bits {
            self.bx.cast(CastOp::Trunc, value, to)
        } else if signed {
            self.bx.cast(CastOp::SExt, value, to)
        } else {
            self.bx.cast(CastOp::ZExt, value, to)
        }
    }
}
