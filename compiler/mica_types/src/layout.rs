//! Type layout queries.
//!
//! The first layout query for a type runs the recursion check, materializes
//! fields if needed, builds the backend's equivalent scalar/struct/array
//! type, and caches size, alignment, and (for tuple/complex/record types)
//! field offsets. Nothing is cached when any step fails, so a type that by
//! value contains itself never partially installs.

use std::rc::Rc;

use mica_backend::{BType, FloatWidth};
use mica_diagnostic::ErrorCode;
use mica_ir::{Span, TypeId};
use rustc_hash::FxHashSet;

use crate::context::Compilation;
use crate::error::{SemaError, SemaResult};
use crate::types::TypeData;

/// Cached size and alignment of a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
}

impl Compilation {
    /// Size of a type in bytes.
    pub fn type_size(&self, ty: TypeId) -> SemaResult<u64> {
        Ok(self.type_layout(ty)?.size)
    }

    /// Alignment of a type in bytes.
    pub fn type_alignment(&self, ty: TypeId) -> SemaResult<u64> {
        Ok(self.type_layout(ty)?.align)
    }

    /// Size and alignment, computed and cached on first query.
    pub fn type_layout(&self, ty: TypeId) -> SemaResult<Layout> {
        if let Some(layout) = self.types.with_meta(ty, |m| m.layout) {
            return Ok(layout);
        }
        let bty = self.backend_type(ty)?;
        let layout = Layout {
            size: self.data_layout.size_of(&bty),
            align: self.data_layout.align_of(&bty),
        };
        self.types.with_meta_mut(ty, |m| m.layout = Some(layout));
        Ok(layout)
    }

    /// Byte offsets of the fields of a tuple, complex, or record type.
    pub fn field_offsets(&self, ty: TypeId) -> SemaResult<Rc<Vec<u64>>> {
        if let Some(offsets) = self.types.with_meta(ty, |m| m.offsets.clone()) {
            return Ok(offsets);
        }
        // Materializes the backend struct, which fills the offsets cache.
        self.backend_type(ty)?;
        self.types
            .with_meta(ty, |m| m.offsets.clone())
            .ok_or_else(|| {
                panic!(
                    "field offsets queried on non-aggregate {}",
                    self.type_name(ty)
                )
            })
    }

    /// The backend's equivalent of `ty`, checked for by-value recursion on
    /// first materialization.
    pub fn backend_type(&self, ty: TypeId) -> SemaResult<BType> {
        if let Some(bty) = self.types.with_meta(ty, |m| m.backend_type.clone()) {
            return Ok(bty);
        }
        if !self.types.with_meta(ty, |m| m.recursion_checked) {
            let mut visited = FxHashSet::default();
            self.verify_recursion(ty, &mut visited)?;
            self.types.with_meta_mut(ty, |m| m.recursion_checked = true);
        }
        let bty = self.build_backend_type(ty)?;
        self.types
            .with_meta_mut(ty, |m| m.backend_type = Some(bty.clone()));
        Ok(bty)
    }

    /// Depth-first check that `ty` does not contain itself by value through
    /// arrays, vectors, tuples, unions, records, variants, or new-types.
    fn verify_recursion(&self, ty: TypeId, visited: &mut FxHashSet<TypeId>) -> SemaResult<()> {
        if !visited.insert(ty) {
            return Err(SemaError::new(
                ErrorCode::E2001,
                Span::DUMMY,
                format!("invalid recursion in type: {}", self.type_name(ty)),
            ));
        }
        match self.types.data(ty) {
            TypeData::Array { elem, .. } | TypeData::Vec { elem, .. } => {
                self.verify_recursion(elem, visited)?;
            }
            TypeData::Tuple(elems) => {
                for elem in elems {
                    self.verify_recursion(elem, visited)?;
                }
            }
            TypeData::Union(members) => {
                for member in members {
                    self.verify_recursion(member, visited)?;
                }
            }
            TypeData::Record { .. } => {
                let fields = self.record_fields(ty)?;
                for &field in &fields.types {
                    self.verify_recursion(field, visited)?;
                }
            }
            TypeData::Variant { .. } => {
                for &member in self.variant_members(ty)?.iter() {
                    self.verify_recursion(member, visited)?;
                }
            }
            TypeData::NewType(_) => {
                let repr = self.newtype_repr(ty)?;
                self.verify_recursion(repr, visited)?;
            }
            _ => {}
        }
        visited.remove(&ty);
        Ok(())
    }

    fn build_backend_type(&self, ty: TypeId) -> SemaResult<BType> {
        let dl = &self.data_layout;
        match self.types.data(ty) {
            TypeData::Bool => Ok(BType::Int(1)),
            TypeData::Integer { bits, .. } => Ok(BType::Int(bits)),
            TypeData::Float { bits, .. } => Ok(BType::Float(float_width(bits))),
            TypeData::Complex { bits } => {
                let part = BType::Float(float_width(bits));
                let fields = vec![part.clone(), part];
                let layout = dl.struct_layout(&fields);
                self.types
                    .with_meta_mut(ty, |m| m.offsets = Some(Rc::new(layout.offsets)));
                Ok(BType::struct_of(fields))
            }
            TypeData::Pointer(_) | TypeData::CodePointer { .. } | TypeData::CCodePointer { .. } => {
                Ok(BType::Ptr)
            }
            TypeData::Array { elem, size } => {
                let elem = self.backend_type(elem)?;
                Ok(BType::array_of(elem, u64::from(size)))
            }
            TypeData::Vec { elem, size } => {
                let elem = self.backend_type(elem)?;
                Ok(BType::vector_of(elem, u64::from(size)))
            }
            TypeData::Tuple(elems) => {
                let fields = elems
                    .iter()
                    .map(|&e| self.backend_type(e))
                    .collect::<SemaResult<Vec<_>>>()?;
                let layout = dl.struct_layout(&fields);
                self.types
                    .with_meta_mut(ty, |m| m.offsets = Some(Rc::new(layout.offsets)));
                Ok(BType::struct_of(fields))
            }
            TypeData::Union(members) => {
                // No first-class unions in the backend: use an array of
                // alignment-sized chunks covering the largest member.
                let mut size = 0u64;
                let mut align = 1u64;
                for member in members {
                    let bty = self.backend_type(member)?;
                    size = size.max(dl.size_of(&bty));
                    align = align.max(dl.align_of(&bty));
                }
                let size = size.max(align).div_ceil(align) * align;
                let bits = u16::try_from(align * 8).unwrap_or(64);
                Ok(BType::array_of(BType::Int(bits), size / align))
            }
            TypeData::Record { .. } => {
                let record_fields = self.record_fields(ty)?;
                let fields = record_fields
                    .types
                    .iter()
                    .map(|&f| self.backend_type(f))
                    .collect::<SemaResult<Vec<_>>>()?;
                let layout = dl.struct_layout(&fields);
                self.types
                    .with_meta_mut(ty, |m| m.offsets = Some(Rc::new(layout.offsets)));
                Ok(BType::struct_of(fields))
            }
            TypeData::Variant { .. } => {
                let repr = self.variant_repr_type(ty)?;
                self.backend_type(repr)
            }
            TypeData::Static(_) => Ok(BType::struct_of(vec![BType::I8])),
            TypeData::Enum(_) => Ok(BType::I32),
            TypeData::NewType(_) => {
                let repr = self.newtype_repr(ty)?;
                self.backend_type(repr)
            }
        }
    }
}

fn float_width(bits: u16) -> FloatWidth {
    match bits {
        32 => FloatWidth::F32,
        64 => FloatWidth::F64,
        80 => FloatWidth::F80,
        other => panic!("invalid float width: {other}"),
    }
}

#[cfg(test)]
mod tests;
