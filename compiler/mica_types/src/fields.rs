//! Lazy materialization of record fields and variant members.
//!
//! Both happen at most once per interned descriptor, on the first field or
//! layout query. Record bodies may be *computed*: an expression list analyzed
//! (with caching disabled) to `(name, type)` pairs, optionally wrapped in
//! `RecordWithProperties` to attach property overloads. Variant member lists
//! combine declared default instances with every `instance` declaration whose
//! target pattern unifies with the variant type and whose predicate holds.

use std::rc::Rc;

use mica_diagnostic::ErrorCode;
use mica_ir::{Name, PrimOpCode, RecordBody, Span, TypeId};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::analyzer::safe_analyze_multi;
use crate::context::{property_code, Compilation};
use crate::env::Env;
use crate::error::{SemaError, SemaResult};
use crate::eval::{static_tuple_elements, unwrap_static_type};
use crate::object::Object;
use crate::pattern;
use crate::types::TypeData;
use crate::value::MultiPValue;

/// Materialized record fields.
#[derive(Debug)]
pub struct RecordFields {
    pub names: Vec<Name>,
    pub types: Vec<TypeId>,
    pub index_map: FxHashMap<Name, usize>,
    /// Declaration position of the var field, if the record has one.
    pub var_field_position: Option<usize>,
    /// Number of types the var field expanded to.
    pub var_field_len: usize,
}

impl RecordFields {
    pub fn field_count(&self) -> usize {
        self.types.len()
    }
}

impl Compilation {
    /// Fields of a record type, materializing on first query.
    pub fn record_fields(&self, ty: TypeId) -> SemaResult<Rc<RecordFields>> {
        if let Some(fields) = self.types.with_meta(ty, |m| m.record_fields.clone()) {
            return Ok(fields);
        }
        let TypeData::Record { decl, params } = self.types.data(ty) else {
            panic!("record_fields on non-record {}", self.type_name(ty));
        };
        self.begin_materializing(ty)?;
        let result = self.materialize_record_fields(ty, &decl.0, &params);
        self.end_materializing(ty);
        let fields = result?;
        self.types
            .with_meta_mut(ty, |m| m.record_fields = Some(fields.clone()));
        Ok(fields)
    }

    fn begin_materializing(&self, ty: TypeId) -> SemaResult<()> {
        let already = self.types.with_meta_mut(ty, |m| {
            let already = m.materializing;
            m.materializing = true;
            already
        });
        if already {
            return Err(SemaError::new(
                ErrorCode::E2001,
                Span::DUMMY,
                format!("invalid recursion in type: {}", self.type_name(ty)),
            ));
        }
        Ok(())
    }

    fn end_materializing(&self, ty: TypeId) {
        self.types.with_meta_mut(ty, |m| m.materializing = false);
    }

    fn record_param_env(
        &self,
        decl: &Rc<mica_ir::RecordDecl>,
        params: &[Object],
    ) -> SemaResult<Env> {
        let env = self.decl_env(&decl.module).child();
        for (i, name) in decl.params.iter().enumerate() {
            env.add_local(*name, params[i].clone());
        }
        if let Some(var_param) = decl.var_param {
            let rest: Vec<Object> = params.iter().skip(decl.params.len()).cloned().collect();
            env.add_local(var_param, Object::Multi(Rc::new(rest)));
        }
        if let Some(predicate) = decl.predicate {
            if !self.evaluate_bool(predicate, &env)? {
                return Err(SemaError::new(
                    ErrorCode::E3005,
                    self.expr_span(predicate),
                    format!("record predicate failed for {}", self.str(decl.name)),
                ));
            }
        }
        Ok(env)
    }

    fn materialize_record_fields(
        &self,
        ty: TypeId,
        decl: &Rc<mica_ir::RecordDecl>,
        params: &[Object],
    ) -> SemaResult<Rc<RecordFields>> {
        trace!(record = self.str(decl.name), "materializing record fields");
        let env = self.record_param_env(decl, params)?;

        let mut names = Vec::new();
        let mut types = Vec::new();
        let mut var_field_position = None;
        let mut var_field_len = 0;

        match &decl.body {
            RecordBody::Fields(fields) => {
                for (i, field) in fields.iter().enumerate() {
                    if field.var_field {
                        let expanded = {
                            let mut out = Vec::new();
                            self.evaluate_multi_type(&[field.ty], &env, &mut out)?;
                            out
                        };
                        var_field_position = Some(i);
                        var_field_len = expanded.len();
                        types.extend(expanded);
                    } else {
                        types.push(self.evaluate_type(field.ty, &env)?);
                    }
                    names.push(field.name);
                }
            }
            RecordBody::Computed(exprs) => {
                let mpv = {
                    let _disabler = self.disable_caching();
                    safe_analyze_multi(self, exprs, &env, 0)?
                };
                let field_info = self.computed_field_info(ty, &mpv)?;
                for (i, info_ty) in field_info.iter().enumerate() {
                    let (name, field_ty) = self.unpack_field(*info_ty).ok_or_else(|| {
                        SemaError::new(
                            ErrorCode::E2004,
                            Span::DUMMY,
                            format!("field {i} is not a (name, type) pair"),
                        )
                    })?;
                    names.push(name);
                    types.push(field_ty);
                }
            }
        }

        let mut index_map = FxHashMap::default();
        for (i, &name) in names.iter().enumerate() {
            index_map.insert(name, i);
        }

        Ok(Rc::new(RecordFields {
            names,
            types,
            index_map,
            var_field_position,
            var_field_len,
        }))
    }

    /// Extract the field-info types from a computed body, attaching
    /// properties when the body evaluated to `RecordWithProperties`.
    fn computed_field_info(&self, ty: TypeId, mpv: &MultiPValue) -> SemaResult<Vec<TypeId>> {
        if mpv.len() == 1 {
            if let TypeData::Record { decl, params } = self.types.data(mpv.values[0].ty) {
                if Rc::ptr_eq(&decl.0, &self.record_with_properties_decl()) {
                    let props = self.param_tuple_elements(&params[0], 0)?;
                    let fields = self.param_tuple_elements(&params[1], 1)?;
                    self.install_properties(ty, &props)?;
                    return Ok(fields);
                }
            }
        }
        Ok(mpv.values.iter().map(|pv| pv.ty).collect())
    }

    /// A `RecordWithProperties` parameter is a static tuple; its elements are
    /// the *types* describing each property or field pair. Accepts both a
    /// tuple type and a static tuple value.
    fn param_tuple_elements(&self, param: &Object, index: usize) -> SemaResult<Vec<TypeId>> {
        let err = || {
            SemaError::new(
                ErrorCode::E2004,
                Span::DUMMY,
                format!("expecting a tuple in RecordWithProperties position {index}"),
            )
        };
        match param {
            // Tuple type: the elements are the entry types directly.
            Object::Type(ty) => match self.types.data(*ty) {
                TypeData::Tuple(elems) => Ok(elems),
                _ => Err(err()),
            },
            // Static tuple value: each element is a static wrapping either a
            // nested static tuple (use its type) or a type.
            Object::Holder(holder) => {
                let TypeData::Tuple(elems) = self.types.data(holder.ty) else {
                    return Err(err());
                };
                elems
                    .into_iter()
                    .map(|elem| match unwrap_static_type(self, elem) {
                        Some(Object::Holder(inner)) => Ok(inner.ty),
                        Some(Object::Type(ty)) => Ok(ty),
                        Some(_) | None => Err(err()),
                    })
                    .collect()
            }
            _ => Err(err()),
        }
    }

    /// Each property is a tuple `[procedure, statics…]`; install an overload
    /// `proc(x: Static[R]) = statics…` on the procedure.
    fn install_properties(&self, ty: TypeId, props: &[TypeId]) -> SemaResult<()> {
        let static_ty = self.types.static_type(Object::Type(ty));
        for &prop in props {
            let parts = self.static_tuple_types(prop)?;
            let Some(Object::Proc(proc)) = parts.first() else {
                return Err(SemaError::new(
                    ErrorCode::E2004,
                    Span::DUMMY,
                    "each property should be a tuple [procedure, ...static values]",
                ));
            };
            let code = property_code(self, static_ty, &parts[1..]);
            proc.add_overload(Rc::new(mica_ir::Overload::new(code)));
        }
        Ok(())
    }

    /// The element objects of a tuple-of-statics type.
    fn static_tuple_types(&self, ty: TypeId) -> SemaResult<Vec<Object>> {
        let TypeData::Tuple(elems) = self.types.data(ty) else {
            return Err(SemaError::new(
                ErrorCode::E2004,
                Span::DUMMY,
                "each property should be a tuple [procedure, ...static values]",
            ));
        };
        elems
            .iter()
            .map(|&e| {
                unwrap_static_type(self, e).ok_or_else(|| {
                    SemaError::new(
                        ErrorCode::E2004,
                        Span::DUMMY,
                        "non-static value found in object property",
                    )
                })
            })
            .collect()
    }

    /// Deconstruct `Tuple[Static[#name], Static[T]]`.
    fn unpack_field(&self, info: TypeId) -> Option<(Name, TypeId)> {
        let TypeData::Tuple(elems) = self.types.data(info) else {
            return None;
        };
        if elems.len() != 2 {
            return None;
        }
        let Object::Ident(name) = unwrap_static_type(self, elems[0])? else {
            return None;
        };
        let Object::Type(field_ty) = unwrap_static_type(self, elems[1])? else {
            return None;
        };
        Some((name, field_ty))
    }

    /// Field index by name.
    pub fn record_field_index(&self, ty: TypeId, name: Name, span: Span) -> SemaResult<usize> {
        let fields = self.record_fields(ty)?;
        fields.index_map.get(&name).copied().ok_or_else(|| {
            SemaError::new(
                ErrorCode::E3008,
                span,
                format!(
                    "{} has no field named {}",
                    self.type_name(ty),
                    self.str(name)
                ),
            )
        })
    }

    /// Member types of a variant type, materializing on first query.
    pub fn variant_members(&self, ty: TypeId) -> SemaResult<Rc<Vec<TypeId>>> {
        if let Some(members) = self.types.with_meta(ty, |m| m.variant_members.clone()) {
            return Ok(members);
        }
        let TypeData::Variant { decl, params } = self.types.data(ty) else {
            panic!("variant_members on non-variant {}", self.type_name(ty));
        };
        self.begin_materializing(ty)?;
        let result = self.materialize_variant_members(ty, &decl.0, &params);
        self.end_materializing(ty);
        let members = result?;
        self.types
            .with_meta_mut(ty, |m| m.variant_members = Some(members.clone()));
        Ok(members)
    }

    fn materialize_variant_members(
        &self,
        ty: TypeId,
        decl: &Rc<mica_ir::VariantDecl>,
        params: &[Object],
    ) -> SemaResult<Rc<Vec<TypeId>>> {
        trace!(variant = self.str(decl.name), "materializing variant members");
        let env = self.decl_env(&decl.module).child();
        for (i, name) in decl.params.iter().enumerate() {
            env.add_local(*name, params[i].clone());
        }
        if let Some(var_param) = decl.var_param {
            let rest: Vec<Object> = params.iter().skip(decl.params.len()).cloned().collect();
            env.add_local(var_param, Object::Multi(Rc::new(rest)));
        }

        let mut members = Vec::new();
        self.evaluate_multi_type(&decl.default_instances, &env, &mut members)?;

        for instance in decl.instances.borrow().iter() {
            let instance_env = self.decl_env(&instance.module);
            let vars: FxHashMap<Name, bool> = instance
                .pattern_vars
                .iter()
                .map(|pv| (pv.name, pv.multi))
                .collect();
            let target = {
                let _disabler = self.disable_caching();
                pattern::evaluate_pattern(self, instance.target, &instance_env, &vars)?
            };
            let mut bindings = pattern::Bindings::default();
            if !pattern::unify(self, &target, &Object::Type(ty), &mut bindings)? {
                continue;
            }
            let static_env = instance_env.child();
            for pv in &instance.pattern_vars {
                let bound = bindings.get(&pv.name).cloned().ok_or_else(|| {
                    SemaError::new(
                        ErrorCode::E3006,
                        self.expr_span(instance.target),
                        format!("unbound pattern variable: {}", self.str(pv.name)),
                    )
                })?;
                static_env.add_local(pv.name, bound);
            }
            if let Some(predicate) = instance.predicate {
                if !self.evaluate_bool(predicate, &static_env)? {
                    continue;
                }
            }
            self.evaluate_multi_type(&instance.members, &static_env, &mut members)?;
        }

        if members.is_empty() {
            return Err(SemaError::new(
                ErrorCode::E2003,
                Span::DUMMY,
                format!(
                    "variant type must have at least one member: {}",
                    self.type_name(ty)
                ),
            ));
        }
        Ok(Rc::new(members))
    }

    /// Representation type of a variant: tag plus payload union, unless a
    /// user overload of `variantReprType` says otherwise.
    pub fn variant_repr_type(&self, ty: TypeId) -> SemaResult<TypeId> {
        if let Some(repr) = self.types.with_meta(ty, |m| m.variant_repr) {
            return Ok(repr);
        }
        let repr = match self.operator_overloads(PrimOpCode::VariantReprType) {
            Some(_) => self.evaluate_type_operator(PrimOpCode::VariantReprType, ty)?,
            None => {
                let members = self.variant_members(ty)?;
                self.types.tuple_type(vec![
                    self.types.c_int_type,
                    self.types.union_type((*members).clone()),
                ])
            }
        };
        self.types.with_meta_mut(ty, |m| m.variant_repr = Some(repr));
        Ok(repr)
    }

    /// Run an overloadable type-level operator (`variantReprType`,
    /// `DispatchTagCount`) through analysis and unwrap the static result.
    fn evaluate_type_operator(&self, code: PrimOpCode, ty: TypeId) -> SemaResult<TypeId> {
        let env = Env::empty();
        let callee = self.object_expr(self.operator(code), Span::DUMMY);
        let arg = self.object_expr(Object::Type(ty), Span::DUMMY);
        let call = self.add_expr(
            mica_ir::Expr::Call {
                callee,
                args: vec![arg],
            },
            Span::DUMMY,
        );
        self.evaluate_type(call, &env)
    }

    /// Number of runtime dispatch tags for a dispatched type.
    pub fn dispatch_tag_count(&self, ty: TypeId, span: Span) -> SemaResult<u32> {
        if self.operator_overloads(PrimOpCode::DispatchTagCount).is_some() {
            let env = Env::empty();
            let callee = self.object_expr(self.operator(PrimOpCode::DispatchTagCount), span);
            let arg = self.object_expr(Object::Type(ty), span);
            let call = self.add_expr(
                mica_ir::Expr::Call {
                    callee,
                    args: vec![arg],
                },
                span,
            );
            let obj = self.evaluate_one_static(call, &env)?;
            let count = self.static_u32(&obj, span)?;
            if count == 0 {
                return Err(SemaError::new(
                    ErrorCode::E3006,
                    span,
                    "DispatchTagCount must return a value greater than zero",
                ));
            }
            return Ok(count);
        }
        let members = self.variant_members(ty)?;
        let count =
            u32::try_from(members.len()).unwrap_or_else(|_| panic!("variant member overflow"));
        Ok(count)
    }

    /// Member index with the variant's tag numbering.
    pub fn variant_member_index(&self, ty: TypeId, member: TypeId, span: Span) -> SemaResult<usize> {
        let members = self.variant_members(ty)?;
        members.iter().position(|&m| m == member).ok_or_else(|| {
            SemaError::new(
                ErrorCode::E3001,
                span,
                format!(
                    "{} is not a member of {}",
                    self.type_name(member),
                    self.type_name(ty)
                ),
            )
        })
    }

    /// Underlying type of a new-type, resolved once.
    pub fn newtype_repr(&self, ty: TypeId) -> SemaResult<TypeId> {
        let TypeData::NewType(decl) = self.types.data(ty) else {
            panic!("newtype_repr on non-newtype {}", self.type_name(ty));
        };
        if let Some(base) = decl.0.base_type.get() {
            return Ok(base);
        }
        let env = self.decl_env(&decl.0.module);
        let base = self.evaluate_type(decl.0.base, &env)?;
        decl.0.base_type.set(Some(base));
        Ok(base)
    }

    /// Enum types are represented as `Int32` values indexing the member list.
    pub fn enum_member_count(&self, ty: TypeId) -> usize {
        let TypeData::Enum(decl) = self.types.data(ty) else {
            panic!("enum_member_count on non-enum {}", self.type_name(ty));
        };
        decl.0.members.len()
    }
}

#[cfg(test)]
mod tests;
