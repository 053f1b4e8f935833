//! The compile-time evaluator.
//!
//! Evaluates static expressions to objects: typed value holders, identifiers,
//! types, and procedure references. Anything it cannot reduce directly it
//! routes through the analyzer and unwraps from a `Static` type, which keeps
//! the evaluator and analyzer consistent by construction.

use std::rc::Rc;

use mica_diagnostic::ErrorCode;
use mica_ir::{Expr, ExprId, PrimOpCode, Span, TypeId};

use crate::analyzer::safe_analyze_one;
use crate::context::Compilation;
use crate::env::Env;
use crate::error::{SemaError, SemaResult};
use crate::object::{Object, ValueHolder};
use crate::types::TypeData;

/// Compile-time classification of a boolean condition type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BoolKind {
    /// Runtime boolean expression.
    Expr,
    /// Statically true; only the then-branch is emitted.
    StaticTrue,
    /// Statically false; only the else-branch is emitted.
    StaticFalse,
}

/// Classify a condition by its analyzed type.
pub fn type_bool_kind(comp: &Compilation, ty: TypeId) -> BoolKind {
    if let TypeData::Static(obj) = comp.types.data(ty) {
        if let Object::Holder(holder) = obj.as_ref() {
            if holder.ty == comp.types.bool_type {
                return if holder.as_bool() {
                    BoolKind::StaticTrue
                } else {
                    BoolKind::StaticFalse
                };
            }
        }
    }
    BoolKind::Expr
}

/// If `ty` is `Static[x]`, the wrapped object.
pub fn unwrap_static_type(comp: &Compilation, ty: TypeId) -> Option<Object> {
    match comp.types.data(ty) {
        TypeData::Static(obj) => Some(*obj),
        _ => None,
    }
}

/// Element objects of a static tuple value (`[a, b]` in a static position).
pub fn static_tuple_elements(comp: &Compilation, obj: &Object) -> Option<Vec<Object>> {
    let Object::Holder(holder) = obj else {
        return None;
    };
    let TypeData::Tuple(elems) = comp.types.data(holder.ty) else {
        return None;
    };
    elems
        .into_iter()
        .map(|e| unwrap_static_type(comp, e))
        .collect()
}

impl Compilation {
    /// Evaluate an expression to a single static object.
    pub fn evaluate_one_static(&self, expr: ExprId, env: &Env) -> SemaResult<Object> {
        let span = self.expr_span(expr);
        match self.expr(expr) {
            Expr::BoolLit(b) => Ok(Object::Holder(self.bool_holder(b))),
            Expr::IntLit { digits, suffix } => {
                let holder = crate::literals::decode_int_literal(
                    self,
                    env.module().as_ref(),
                    self.str(digits),
                    self.str(suffix),
                    span,
                )?;
                Ok(Object::Holder(holder))
            }
            Expr::FloatLit { digits, suffix } => {
                let holder = crate::literals::decode_float_literal(
                    self,
                    env.module().as_ref(),
                    self.str(digits),
                    self.str(suffix),
                    span,
                )?;
                Ok(Object::Holder(holder))
            }
            Expr::StringLit(name) => Ok(Object::Ident(name)),
            Expr::NameRef(name) => {
                // The prelude's operator exports back up lexical lookup.
                let obj = env
                    .lookup(name)
                    .or_else(|| self.operator_by_name(name))
                    .ok_or_else(|| {
                        SemaError::new(
                            ErrorCode::E3008,
                            span,
                            format!("unknown identifier: {}", self.str(name)),
                        )
                    })?;
                self.deref_static_entry(obj, span)
            }
            Expr::ObjectRef(id) => self.deref_static_entry(self.object(id), span),
            Expr::StaticExpr(inner) => self.evaluate_one_static(inner, env),
            Expr::Tuple(elems) => {
                let mut types = Vec::with_capacity(elems.len());
                for obj in self.evaluate_multi_static(&elems, env)? {
                    types.push(self.types.static_type(obj));
                }
                let ty = self.types.tuple_type(types);
                Ok(Object::Holder(Rc::new(ValueHolder::new(ty, Vec::new()))))
            }
            Expr::Paren(elems) if elems.len() == 1 => self.evaluate_one_static(elems[0], env),
            Expr::Indexing { base, args } => {
                let ctor = self.evaluate_one_static(base, env)?;
                if let Object::Alias(alias) = &ctor {
                    let params = self.evaluate_multi_static(&args, env)?;
                    return self.evaluate_alias_indexing(alias, &params, span);
                }
                let params = self.evaluate_multi_static(&args, env)?;
                let ty = self.construct_type(&ctor, &params, span)?;
                Ok(Object::Type(ty))
            }
            Expr::FieldRef { base, field } => {
                let base_obj = self.evaluate_one_static(base, env)?;
                if let Object::Module(module) = &base_obj {
                    let item = module.lookup(field).ok_or_else(|| {
                        SemaError::new(
                            ErrorCode::E3008,
                            span,
                            format!("module has no member {}", self.str(field)),
                        )
                    })?;
                    let member_env = Env::module_root(module.clone());
                    return self.deref_static_entry(
                        member_env.lookup(field).unwrap_or_else(|| {
                            panic!("module item vanished: {}", self.str(item.name()))
                        }),
                        span,
                    );
                }
                self.evaluate_via_analysis(expr, env, span)
            }
            Expr::And(lhs, rhs) => {
                let value = self.evaluate_bool(lhs, env)? && self.evaluate_bool(rhs, env)?;
                Ok(Object::Holder(self.bool_holder(value)))
            }
            Expr::Or(lhs, rhs) => {
                let value = self.evaluate_bool(lhs, env)? || self.evaluate_bool(rhs, env)?;
                Ok(Object::Holder(self.bool_holder(value)))
            }
            _ => self.evaluate_via_analysis(expr, env, span),
        }
    }

    /// Fallback: analyze the expression and unwrap a `Static` result type.
    fn evaluate_via_analysis(&self, expr: ExprId, env: &Env, span: Span) -> SemaResult<Object> {
        let pv = safe_analyze_one(self, expr, env)?;
        unwrap_static_type(self, pv.ty).ok_or_else(|| {
            SemaError::new(
                ErrorCode::E3006,
                span,
                format!(
                    "expression of type {} is not a static value",
                    self.type_name(pv.ty)
                ),
            )
        })
    }

    /// Resolve an environment entry as a static object.
    fn deref_static_entry(&self, obj: Object, span: Span) -> SemaResult<Object> {
        match obj {
            Object::AliasExpr(expr, captured) => self.evaluate_one_static(expr, &captured),
            Object::AliasExprList(exprs, captured) => {
                if exprs.len() == 1 {
                    self.evaluate_one_static(exprs[0], &captured)
                } else {
                    let values = self.evaluate_multi_static(&exprs, &captured)?;
                    Ok(Object::Multi(Rc::new(values)))
                }
            }
            Object::Multi(values) if values.len() == 1 => Ok(values[0].clone()),
            Object::PValue(_)
            | Object::MultiPValue(_)
            | Object::CValue(_)
            | Object::MultiCValue(_) => Err(SemaError::new(
                ErrorCode::E3006,
                span,
                "runtime value used in a static context",
            )),
            other => Ok(other),
        }
    }

    /// Evaluate an expression list to statics, splicing unpacks and
    /// multi-valued entries.
    pub fn evaluate_multi_static(&self, exprs: &[ExprId], env: &Env) -> SemaResult<Vec<Object>> {
        let mut out = Vec::with_capacity(exprs.len());
        for &expr in exprs {
            let target = match self.expr(expr) {
                Expr::Unpack(inner) => inner,
                _ => expr,
            };
            match self.evaluate_one_static(target, env)? {
                Object::Multi(values) => out.extend(values.iter().cloned()),
                obj => out.push(obj),
            }
        }
        Ok(out)
    }

    /// Evaluate an expression required to denote a type.
    pub fn evaluate_type(&self, expr: ExprId, env: &Env) -> SemaResult<TypeId> {
        let span = self.expr_span(expr);
        let obj = self.evaluate_one_static(expr, env)?;
        self.static_object_as_type(&obj, span)
    }

    /// Evaluate an expression list to types, splicing multi values.
    pub fn evaluate_multi_type(
        &self,
        exprs: &[ExprId],
        env: &Env,
        out: &mut Vec<TypeId>,
    ) -> SemaResult<()> {
        for obj in self.evaluate_multi_static(exprs, env)? {
            out.push(self.static_object_as_type(&obj, Span::DUMMY)?);
        }
        Ok(())
    }

    /// Coerce a static object to a type, normalizing parameterless
    /// declarations.
    pub fn static_object_as_type(&self, obj: &Object, span: Span) -> SemaResult<TypeId> {
        match obj {
            Object::Type(t) => Ok(*t),
            Object::Record(decl) if decl.params.is_empty() && decl.var_param.is_none() => {
                self.types.record_type(decl, Vec::new(), span)
            }
            Object::Variant(decl) if decl.params.is_empty() && decl.var_param.is_none() => {
                self.types.variant_type(decl, Vec::new(), span)
            }
            Object::Enum(decl) => Ok(self.types.enum_type(decl)),
            Object::NewType(decl) => Ok(self.types.new_type(decl)),
            other => Err(SemaError::new(
                ErrorCode::E3006,
                span,
                format!("expected a type, got {}", self.object_name(other)),
            )),
        }
    }

    /// Evaluate an expression to a compile-time boolean.
    pub fn evaluate_bool(&self, expr: ExprId, env: &Env) -> SemaResult<bool> {
        let span = self.expr_span(expr);
        match self.evaluate_one_static(expr, env)? {
            Object::Holder(holder) if holder.ty == self.types.bool_type => Ok(holder.as_bool()),
            other => Err(SemaError::new(
                ErrorCode::E3001,
                span,
                format!("expected a static Bool, got {}", self.object_name(&other)),
            )),
        }
    }

    /// `static assert` evaluation: condition and message are both static.
    pub fn evaluate_static_assert(
        &self,
        span: Span,
        condition: ExprId,
        message: &[ExprId],
        env: &Env,
    ) -> SemaResult<()> {
        if self.evaluate_bool(condition, env)? {
            return Ok(());
        }
        let rendered = self
            .evaluate_multi_static(message, env)?
            .iter()
            .map(|obj| self.object_name(obj))
            .collect::<Vec<_>>()
            .join(" ");
        let message = if rendered.is_empty() {
            "static assertion failed".to_owned()
        } else {
            format!("static assertion failed: {rendered}")
        };
        Err(SemaError::new(ErrorCode::E3010, span, message))
    }

    /// Alias indexing: bind the alias parameters and evaluate its body with
    /// caching disabled (the same body yields different results per binding).
    fn evaluate_alias_indexing(
        &self,
        alias: &Rc<mica_ir::GlobalAlias>,
        params: &[Object],
        span: Span,
    ) -> SemaResult<Object> {
        check_alias_arity(alias, params.len(), span)?;
        let env = self.decl_env(&alias.module).child();
        for (i, name) in alias.params.iter().enumerate() {
            env.add_local(*name, params[i].clone());
        }
        if let Some(var_param) = alias.var_param {
            let rest: Vec<Object> = params.iter().skip(alias.params.len()).cloned().collect();
            env.add_local(var_param, Object::Multi(Rc::new(rest)));
        }
        let _disabler = self.disable_caching();
        self.evaluate_one_static(alias.expr, &env)
    }

    /// Apply a type constructor to evaluated static arguments.
    pub fn construct_type(
        &self,
        ctor: &Object,
        args: &[Object],
        span: Span,
    ) -> SemaResult<TypeId> {
        match ctor {
            Object::Record(decl) => self.types.record_type(decl, args.to_vec(), span),
            Object::Variant(decl) => self.types.variant_type(decl, args.to_vec(), span),
            Object::PrimOp(code) => self.construct_prim_type(*code, args, span),
            other => Err(SemaError::new(
                ErrorCode::E3003,
                span,
                format!("{} is not indexable", self.object_name(other)),
            )),
        }
    }

    fn construct_prim_type(
        &self,
        code: PrimOpCode,
        args: &[Object],
        span: Span,
    ) -> SemaResult<TypeId> {
        let arity = |n: usize| -> SemaResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(SemaError::new(
                    ErrorCode::E3002,
                    span,
                    format!("{} expects {n} argument(s), got {}", code.name(), args.len()),
                ))
            }
        };
        match code {
            PrimOpCode::PointerT => {
                arity(1)?;
                let pointee = self.static_object_as_type(&args[0], span)?;
                Ok(self.types.pointer_type(pointee))
            }
            PrimOpCode::ArrayT => {
                arity(2)?;
                let elem = self.static_object_as_type(&args[0], span)?;
                let size = self.static_u32(&args[1], span)?;
                Ok(self.types.array_type(elem, size))
            }
            PrimOpCode::VecT => {
                arity(2)?;
                let elem = self.static_object_as_type(&args[0], span)?;
                let size = self.static_u32(&args[1], span)?;
                self.types.vec_type(elem, size, span)
            }
            PrimOpCode::TupleT => {
                let elems = args
                    .iter()
                    .map(|a| self.static_object_as_type(a, span))
                    .collect::<SemaResult<Vec<_>>>()?;
                Ok(self.types.tuple_type(elems))
            }
            PrimOpCode::UnionT => {
                let members = args
                    .iter()
                    .map(|a| self.static_object_as_type(a, span))
                    .collect::<SemaResult<Vec<_>>>()?;
                Ok(self.types.union_type(members))
            }
            PrimOpCode::StaticT => {
                arity(1)?;
                Ok(self.types.static_type(args[0].clone()))
            }
            PrimOpCode::RecordWithPropertiesT => {
                arity(2)?;
                let decl = self.record_with_properties_decl();
                self.types.record_type(&decl, args.to_vec(), span)
            }
            PrimOpCode::CodePointerT => {
                arity(2)?;
                let arg_types = self.static_type_list(&args[0], span)?;
                let return_types = self.static_type_list(&args[1], span)?;
                let return_is_ref = vec![false; return_types.len()];
                Ok(self
                    .types
                    .code_pointer_type(arg_types, return_is_ref, return_types))
            }
            PrimOpCode::ExternalCodePointerT => {
                arity(2)?;
                let arg_types = self.static_type_list(&args[0], span)?;
                let return_types = self.static_type_list(&args[1], span)?;
                if return_types.len() > 1 {
                    return Err(SemaError::new(
                        ErrorCode::E3002,
                        span,
                        "external code pointers return at most one value",
                    ));
                }
                Ok(self.types.c_code_pointer_type(
                    mica_ir::CallingConv::CDecl,
                    arg_types,
                    false,
                    return_types.first().copied(),
                ))
            }
            other => Err(SemaError::new(
                ErrorCode::E3003,
                span,
                format!("{} is not a type constructor", other.name()),
            )),
        }
    }

    /// A static tuple of types, or a single type, as a type list.
    fn static_type_list(&self, obj: &Object, span: Span) -> SemaResult<Vec<TypeId>> {
        if let Some(elems) = static_tuple_elements(self, obj) {
            return elems
                .iter()
                .map(|o| self.static_object_as_type(o, span))
                .collect();
        }
        Ok(vec![self.static_object_as_type(obj, span)?])
    }

    pub fn static_u32(&self, obj: &Object, span: Span) -> SemaResult<u32> {
        match obj {
            Object::Holder(holder) => match self.types.data(holder.ty) {
                TypeData::Integer { signed, .. } => {
                    let value = holder.as_i128(signed);
                    u32::try_from(value).map_err(|_| {
                        SemaError::new(ErrorCode::E1002, span, "size out of range")
                    })
                }
                _ => Err(SemaError::new(
                    ErrorCode::E3001,
                    span,
                    "expected a static integer",
                )),
            },
            _ => Err(SemaError::new(
                ErrorCode::E3001,
                span,
                "expected a static integer",
            )),
        }
    }
}

fn check_alias_arity(
    alias: &mica_ir::GlobalAlias,
    given: usize,
    span: Span,
) -> SemaResult<()> {
    let declared = alias.params.len();
    let ok = if alias.var_param.is_some() {
        given >= declared
    } else {
        given == declared
    };
    if ok {
        Ok(())
    } else {
        Err(SemaError::new(
            ErrorCode::E3002,
            span,
            format!("alias expects {declared} argument(s), got {given}"),
        ))
    }
}
