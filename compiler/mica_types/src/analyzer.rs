//! The expression and statement analyzer.
//!
//! Analysis computes, for every expression, a `MultiPValue`: one type plus
//! rvalue/lvalue flag per value position, without emitting any code. Results
//! are memoized per `(expression, environment)` unless a caching disabler is
//! active. Recursive self-calls surface as `Ok(None)`; the fixed point in
//! [`analyze_callable_body`] retries with tentative return types until they
//! stabilize or a declared return type resolves them.

use std::rc::Rc;

use mica_diagnostic::ErrorCode;
use mica_ir::{
    BindingKind, CodeBody, Expr, ExprId, Module, PrimOpCode, ReturnKind, Span, Stmt, StmtId,
    Tempness, TypeId,
};
use tracing::trace;

use crate::context::{Compilation, GVarInstance};
use crate::env::Env;
use crate::error::{SemaError, SemaResult};
use crate::eval::unwrap_static_type;
use crate::invoke::{analyze_callable, safe_analyze_callable, InvokeEntry};
use crate::object::Object;
use crate::primops::analyze_prim_op;
use crate::types::TypeData;
use crate::value::{MultiPValue, PValue};

/// `Ok(None)` propagates an unresolved recursive call.
pub(crate) type ARes<T> = SemaResult<Option<T>>;

macro_rules! try_opt {
    ($e:expr) => {
        match $e? {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

/// Per-body analysis state for return inference.
#[derive(Default, Debug)]
pub struct AnalysisContext {
    pub return_initialized: bool,
    pub return_is_ref: Vec<bool>,
    pub return_types: Vec<TypeId>,
    pub has_recursive_propagation: bool,
}

/// What statement analysis concluded about fallthrough.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatementAnalysis {
    Fallthrough,
    Recursive,
    Terminated,
}

/// Map a return kind and value to the by-ref flag of the return position.
pub fn return_kind_to_by_ref(kind: ReturnKind, pv: PValue) -> bool {
    match kind {
        ReturnKind::Value => false,
        ReturnKind::Ref => true,
        ReturnKind::Forward => !pv.is_temp,
    }
}

/// Argument key of an analyzed argument list: types plus tempness.
pub fn compute_args_key(args: &MultiPValue) -> (Vec<TypeId>, Vec<Tempness>) {
    let types = args.values.iter().map(|pv| pv.ty).collect();
    let temps = args
        .values
        .iter()
        .map(|pv| {
            if pv.is_temp {
                Tempness::Rvalue
            } else {
                Tempness::Lvalue
            }
        })
        .collect();
    (types, temps)
}

/// The caller-visible values of an entry's returns.
pub fn analyze_return(is_ref: &[bool], types: &[TypeId]) -> MultiPValue {
    MultiPValue::from_values(
        is_ref
            .iter()
            .zip(types)
            .map(|(&by_ref, &ty)| PValue {
                ty,
                is_temp: !by_ref,
            }),
    )
}

// -- single/multi wrappers --

pub fn analyze_one(comp: &Compilation, expr: ExprId, env: &Env) -> ARes<PValue> {
    let mpv = try_opt!(analyze_expr(comp, expr, env));
    if mpv.len() != 1 {
        return Err(arity_error(comp, expr, 1, mpv.len()));
    }
    Ok(Some(mpv.values[0]))
}

/// Analysis that treats unresolved recursion as a user error.
pub fn safe_analyze_one(comp: &Compilation, expr: ExprId, env: &Env) -> SemaResult<PValue> {
    analyze_one(comp, expr, env)?.ok_or_else(|| recursion_error(comp.expr_span(expr)))
}

pub fn safe_analyze_multi(
    comp: &Compilation,
    exprs: &[ExprId],
    env: &Env,
    want: usize,
) -> SemaResult<MultiPValue> {
    analyze_multi(comp, exprs, env, want)?.ok_or_else(|| recursion_error(Span::DUMMY))
}

fn recursion_error(span: Span) -> SemaError {
    SemaError::new(
        ErrorCode::E3007,
        span,
        "unresolved recursion while inferring types",
    )
}

fn arity_error(comp: &Compilation, expr: ExprId, want: usize, got: usize) -> SemaError {
    SemaError::new(
        ErrorCode::E3002,
        comp.expr_span(expr),
        format!("expected {want} value(s), got {got}"),
    )
}

/// Analyze an expression list with implicit unpack: a single expression may
/// satisfy a multi-position context when its arity is at least `want`.
pub fn analyze_multi(
    comp: &Compilation,
    exprs: &[ExprId],
    env: &Env,
    want: usize,
) -> ARes<MultiPValue> {
    if want >= 1 && exprs.len() == 1 && !matches!(comp.expr(exprs[0]), Expr::Unpack(_)) {
        let mpv = try_opt!(analyze_expr(comp, exprs[0], env));
        if mpv.len() >= want {
            return Ok(Some(mpv));
        }
        return Err(arity_error(comp, exprs[0], want, mpv.len()));
    }
    let mut out = MultiPValue::new();
    for &expr in exprs {
        match comp.expr(expr) {
            Expr::Unpack(inner) => {
                out.extend(&try_opt!(analyze_expr(comp, inner, env)));
            }
            Expr::Paren(inner) => {
                out.extend(&try_opt!(analyze_multi(comp, &inner, env, 0)));
            }
            _ => out.extend(&try_opt!(analyze_expr(comp, expr, env))),
        }
    }
    Ok(Some(out))
}

/// Analyze a call argument list, recording the positions carrying a
/// `dispatch(…)` marker.
pub fn analyze_multi_args(
    comp: &Compilation,
    exprs: &[ExprId],
    env: &Env,
    dispatch_indices: &mut Vec<usize>,
) -> ARes<MultiPValue> {
    let mut out = MultiPValue::new();
    for &expr in exprs {
        match comp.expr(expr) {
            Expr::Dispatch(inner) => {
                dispatch_indices.push(out.len());
                out.push(try_opt!(analyze_one(comp, inner, env)));
            }
            Expr::Unpack(inner) => {
                out.extend(&try_opt!(analyze_expr(comp, inner, env)));
            }
            Expr::Paren(inner) => {
                out.extend(&try_opt!(analyze_multi(comp, &inner, env, 0)));
            }
            _ => out.extend(&try_opt!(analyze_expr(comp, expr, env))),
        }
    }
    Ok(Some(out))
}

/// Analyze one expression to its multi-value, with caching.
pub fn analyze_expr(comp: &Compilation, expr: ExprId, env: &Env) -> ARes<MultiPValue> {
    let cache_key = (expr, env.identity());
    if comp.caching_enabled() {
        if let Some(hit) = comp.analysis_cache.borrow().get(&cache_key) {
            return Ok(Some(hit.clone()));
        }
    }
    let result = analyze_expr_uncached(comp, expr, env)?;
    if let (true, Some(mpv)) = (comp.caching_enabled(), &result) {
        comp.analysis_cache
            .borrow_mut()
            .insert(cache_key, mpv.clone());
    }
    Ok(result)
}

fn analyze_expr_uncached(comp: &Compilation, expr: ExprId, env: &Env) -> ARes<MultiPValue> {
    let span = comp.expr_span(expr);
    match comp.expr(expr) {
        Expr::BoolLit(_) => Ok(Some(MultiPValue::one(PValue::rvalue(comp.types.bool_type)))),
        Expr::IntLit { digits, suffix } => {
            let holder = crate::literals::decode_int_literal(
                comp,
                env.module().as_ref(),
                comp.str(digits),
                comp.str(suffix),
                span,
            )?;
            Ok(Some(MultiPValue::one(PValue::rvalue(holder.ty))))
        }
        Expr::FloatLit { digits, suffix } => {
            let holder = crate::literals::decode_float_literal(
                comp,
                env.module().as_ref(),
                comp.str(digits),
                comp.str(suffix),
                span,
            )?;
            Ok(Some(MultiPValue::one(PValue::rvalue(holder.ty))))
        }
        Expr::StringLit(name) => {
            let ty = comp.types.static_type(Object::Ident(name));
            Ok(Some(MultiPValue::one(PValue::rvalue(ty))))
        }
        Expr::NameRef(name) => {
            let obj = env
                .lookup(name)
                .or_else(|| comp.operator_by_name(name))
                .ok_or_else(|| {
                    SemaError::new(
                        ErrorCode::E3008,
                        span,
                        format!("unknown identifier: {}", comp.str(name)),
                    )
                })?;
            analyze_name_entry(comp, obj, span)
        }
        Expr::ObjectRef(id) => analyze_name_entry(comp, comp.object(id), span),
        Expr::StaticExpr(inner) => {
            let obj = comp.evaluate_one_static(inner, env)?;
            analyze_static_object(comp, &obj, span)
        }
        Expr::Tuple(elems) => {
            let args = try_opt!(analyze_multi(comp, &elems, env, 0));
            analyze_call_object(comp, &comp.operator(PrimOpCode::TupleLiteral), &args, span)
        }
        Expr::Paren(elems) => analyze_multi(comp, &elems, env, 0),
        Expr::Indexing { base, args } => analyze_indexing(comp, base, &args, env, span),
        Expr::Call { callee, args } => analyze_call_expr(comp, callee, &args, env, span),
        Expr::FieldRef { base, field } => {
            let base_pv = try_opt!(analyze_one(comp, base, env));
            if let Some(Object::Module(module)) = unwrap_static_type(comp, base_pv.ty) {
                let member_env = Env::module_root(module.clone());
                let obj = member_env.lookup(field).ok_or_else(|| {
                    SemaError::new(
                        ErrorCode::E3008,
                        span,
                        format!("module has no member {}", comp.str(field)),
                    )
                })?;
                return analyze_name_entry(comp, obj, span);
            }
            let ident_pv = PValue::rvalue(comp.types.static_type(Object::Ident(field)));
            let mut args = MultiPValue::one(base_pv);
            args.push(ident_pv);
            analyze_call_object(comp, &comp.operator(PrimOpCode::FieldRefOp), &args, span)
        }
        Expr::StaticIndexing { base, index } => {
            let base_pv = try_opt!(analyze_one(comp, base, env));
            analyze_static_indexing(comp, base_pv, index, span).map(|pv| Some(MultiPValue::one(pv)))
        }
        Expr::Unpack(_) => Err(SemaError::new(
            ErrorCode::E3006,
            span,
            "unpack is not allowed in this context",
        )),
        Expr::Dispatch(_) => Err(SemaError::new(
            ErrorCode::E3006,
            span,
            "dispatch markers are only allowed in call arguments",
        )),
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            let l = try_opt!(analyze_one(comp, lhs, env));
            let r = try_opt!(analyze_one(comp, rhs, env));
            for side in [l, r] {
                ensure_bool_shaped(comp, side.ty, span)?;
            }
            Ok(Some(MultiPValue::one(PValue::rvalue(comp.types.bool_type))))
        }
    }
}

fn ensure_bool_shaped(comp: &Compilation, ty: TypeId, span: Span) -> SemaResult<()> {
    let ok = ty == comp.types.bool_type
        || matches!(
            crate::eval::type_bool_kind(comp, ty),
            crate::eval::BoolKind::StaticTrue | crate::eval::BoolKind::StaticFalse
        );
    if ok {
        Ok(())
    } else {
        Err(SemaError::new(
            ErrorCode::E3001,
            span,
            format!("expected Bool, got {}", comp.type_name(ty)),
        ))
    }
}

/// Analyze an environment entry (possibly an alias) as a value.
fn analyze_name_entry(comp: &Compilation, obj: Object, span: Span) -> ARes<MultiPValue> {
    match obj {
        Object::AliasExpr(inner, captured) => analyze_expr(comp, inner, &captured),
        Object::AliasExprList(exprs, captured) => analyze_multi(comp, &exprs, &captured, 0),
        other => analyze_static_object(comp, &other, span),
    }
}

/// The analyzed value of a static object.
pub fn analyze_static_object(comp: &Compilation, obj: &Object, span: Span) -> ARes<MultiPValue> {
    let pv = match obj {
        Object::Holder(holder) => PValue::rvalue(holder.ty),
        Object::Type(_)
        | Object::Ident(_)
        | Object::Proc(_)
        | Object::NewType(_)
        | Object::External(_)
        | Object::Module(_)
        | Object::PrimOp(_) => PValue::rvalue(comp.types.static_type(obj.clone())),
        Object::Record(decl) => {
            // A parameterless record name denotes the type itself.
            if decl.params.is_empty() && decl.var_param.is_none() {
                let ty = comp.types.record_type(decl, Vec::new(), span)?;
                PValue::rvalue(comp.types.static_type(Object::Type(ty)))
            } else {
                PValue::rvalue(comp.types.static_type(obj.clone()))
            }
        }
        Object::Variant(decl) => {
            if decl.params.is_empty() && decl.var_param.is_none() {
                let ty = comp.types.variant_type(decl, Vec::new(), span)?;
                PValue::rvalue(comp.types.static_type(Object::Type(ty)))
            } else {
                PValue::rvalue(comp.types.static_type(obj.clone()))
            }
        }
        Object::Enum(decl) => {
            let ty = comp.types.enum_type(decl);
            PValue::rvalue(comp.types.static_type(Object::Type(ty)))
        }
        Object::Alias(alias) if alias.params.is_empty() && alias.var_param.is_none() => {
            let env = comp.decl_env(&alias.module);
            return analyze_expr(comp, alias.expr, &env);
        }
        Object::Alias(_) => PValue::rvalue(comp.types.static_type(obj.clone())),
        Object::Global(gvar) => {
            let inst = comp.gvar_instance(gvar, Vec::new());
            return Ok(analyze_gvar_instance(comp, &inst)?.map(MultiPValue::one));
        }
        Object::Multi(objs) => {
            let mut out = MultiPValue::new();
            for obj in objs.iter() {
                out.extend(&try_opt!(analyze_static_object(comp, obj, span)));
            }
            return Ok(Some(out));
        }
        Object::PValue(pv) => *pv,
        Object::MultiPValue(mpv) => return Ok(Some(mpv.clone())),
        Object::CValue(cv) => PValue {
            ty: cv.ty,
            is_temp: cv.forwarded_rvalue,
        },
        Object::MultiCValue(mcv) => {
            return Ok(Some(MultiPValue::from_values(mcv.values.iter().map(
                |cv| PValue {
                    ty: cv.ty,
                    is_temp: cv.forwarded_rvalue,
                },
            ))));
        }
        Object::AliasExpr(..) | Object::AliasExprList(..) => {
            return analyze_name_entry(comp, obj.clone(), span);
        }
    };
    Ok(Some(MultiPValue::one(pv)))
}

/// Global variable instance analysis: one lvalue of the initializer's type.
pub fn analyze_gvar_instance(comp: &Compilation, inst: &Rc<GVarInstance>) -> ARes<PValue> {
    if let Some(ty) = inst.ty.get() {
        return Ok(Some(PValue::lvalue(ty)));
    }
    if inst.analyzing.get() {
        return Ok(None);
    }
    inst.analyzing.set(true);
    let result = analyze_one(comp, inst.gvar.init, &inst.env);
    inst.analyzing.set(false);
    let pv = try_opt!(result);
    inst.ty.set(Some(pv.ty));
    Ok(Some(PValue::lvalue(pv.ty)))
}

/// `base[args…]`: type construction, global/alias indexing, or the `index`
/// operator.
pub fn analyze_indexing(
    comp: &Compilation,
    base: ExprId,
    args: &[ExprId],
    env: &Env,
    span: Span,
) -> ARes<MultiPValue> {
    let base_pv = try_opt!(analyze_one(comp, base, env));
    if let Some(obj) = unwrap_static_type(comp, base_pv.ty) {
        match obj {
            Object::Global(gvar) => {
                let params = comp.evaluate_multi_static(args, env)?;
                let inst = comp.gvar_instance(&gvar, params);
                return Ok(analyze_gvar_instance(comp, &inst)?.map(MultiPValue::one));
            }
            Object::Alias(alias) => {
                let params = comp.evaluate_multi_static(args, env)?;
                let alias_env = comp.decl_env(&alias.module).child();
                for (i, name) in alias.params.iter().enumerate() {
                    if i < params.len() {
                        alias_env.add_local(*name, params[i].clone());
                    }
                }
                if let Some(var_param) = alias.var_param {
                    let rest: Vec<Object> =
                        params.iter().skip(alias.params.len()).cloned().collect();
                    alias_env.add_local(var_param, Object::Multi(Rc::new(rest)));
                }
                let _disabler = comp.disable_caching();
                return analyze_expr(comp, alias.expr, &alias_env);
            }
            Object::Record(_) | Object::Variant(_) | Object::PrimOp(_) => {
                let params = comp.evaluate_multi_static(args, env)?;
                let ty = comp.construct_type(&obj, &params, span)?;
                let static_ty = comp.types.static_type(Object::Type(ty));
                return Ok(Some(MultiPValue::one(PValue::rvalue(static_ty))));
            }
            _ => {}
        }
    }
    let mut op_args = MultiPValue::one(base_pv);
    op_args.extend(&try_opt!(analyze_multi(comp, args, env, 0)));
    analyze_call_object(comp, &comp.operator(PrimOpCode::Index), &op_args, span)
}

fn analyze_static_indexing(
    comp: &Compilation,
    base: PValue,
    index: u32,
    span: Span,
) -> SemaResult<PValue> {
    match comp.types.data(base.ty) {
        TypeData::Tuple(elems) => {
            let i = index as usize;
            if i >= elems.len() {
                return Err(SemaError::new(
                    ErrorCode::E3002,
                    span,
                    format!("tuple index {index} out of range for {}", comp.type_name(base.ty)),
                ));
            }
            // Element references are lvalues into the tuple's storage.
            Ok(PValue::lvalue(elems[i]))
        }
        _ => Err(SemaError::new(
            ErrorCode::E3001,
            span,
            format!("{} is not statically indexable", comp.type_name(base.ty)),
        )),
    }
}

/// `callee(args…)`.
pub fn analyze_call_expr(
    comp: &Compilation,
    callee: ExprId,
    args: &[ExprId],
    env: &Env,
    span: Span,
) -> ARes<MultiPValue> {
    let callee_pv = try_opt!(analyze_one(comp, callee, env));

    if let Some(obj) = unwrap_static_type(comp, callee_pv.ty) {
        let mut dispatch_indices = Vec::new();
        let arg_values = try_opt!(analyze_multi_args(comp, args, env, &mut dispatch_indices));
        if !dispatch_indices.is_empty() {
            return analyze_dispatch(comp, &obj, &arg_values, &dispatch_indices, span);
        }
        // Call-by-name overloads need the caller's argument expressions.
        let (args_key, temp_key) = compute_args_key(&arg_values);
        if let Some(entry) = analyze_callable(comp, &obj, &args_key, &temp_key)? {
            if entry.call_by_name.get() {
                return analyze_call_by_name(comp, &entry, args, env, span);
            }
            return finish_entry_call(&entry);
        }
        return analyze_call_fallback(comp, &obj, &arg_values, span);
    }

    match comp.types.data(callee_pv.ty) {
        TypeData::CodePointer {
            arg_types,
            return_is_ref,
            return_types,
        } => {
            let arg_values = try_opt!(analyze_multi(comp, args, env, 0));
            check_arg_types(comp, &arg_types, &arg_values, span)?;
            Ok(Some(analyze_return(&return_is_ref, &return_types)))
        }
        TypeData::CCodePointer { return_type, .. } => {
            try_opt!(analyze_multi(comp, args, env, 0));
            Ok(Some(match return_type {
                Some(ty) => MultiPValue::one(PValue::rvalue(ty)),
                None => MultiPValue::new(),
            }))
        }
        _ => {
            // Not a static callable: route through the `call` operator.
            let mut op_args = MultiPValue::one(callee_pv);
            op_args.extend(&try_opt!(analyze_multi(comp, args, env, 0)));
            analyze_call_object(comp, &comp.operator(PrimOpCode::Call), &op_args, span)
        }
    }
}

fn check_arg_types(
    comp: &Compilation,
    expected: &[TypeId],
    got: &MultiPValue,
    span: Span,
) -> SemaResult<()> {
    if expected.len() != got.len() {
        return Err(SemaError::new(
            ErrorCode::E3002,
            span,
            format!("expected {} argument(s), got {}", expected.len(), got.len()),
        ));
    }
    for (i, (&want, pv)) in expected.iter().zip(&got.values).enumerate() {
        if want != pv.ty {
            return Err(SemaError::new(
                ErrorCode::E3001,
                span,
                format!(
                    "argument {i}: expected {}, got {}",
                    comp.type_name(want),
                    comp.type_name(pv.ty)
                ),
            ));
        }
    }
    Ok(())
}

/// Resolve a call with already-analyzed argument values.
pub fn analyze_call_object(
    comp: &Compilation,
    callable: &Object,
    args: &MultiPValue,
    span: Span,
) -> ARes<MultiPValue> {
    let (args_key, temp_key) = compute_args_key(args);
    if let Some(entry) = analyze_callable(comp, callable, &args_key, &temp_key)? {
        if entry.call_by_name.get() {
            // Wrap the values as synthesized expressions for the per-site
            // body analysis.
            let exprs: Vec<ExprId> = args
                .values
                .iter()
                .map(|pv| comp.object_expr(Object::PValue(*pv), span))
                .collect();
            return analyze_call_by_name(comp, &entry, &exprs, &Env::empty(), span);
        }
        return finish_entry_call(&entry);
    }
    analyze_call_fallback(comp, callable, args, span)
}

/// Builtins that apply when no user overload matched.
fn analyze_call_fallback(
    comp: &Compilation,
    callable: &Object,
    args: &MultiPValue,
    span: Span,
) -> ARes<MultiPValue> {
    match callable {
        Object::PrimOp(code) => analyze_prim_op(comp, *code, args, span),
        Object::Type(ty) => analyze_type_call(comp, *ty, args, span).map(Some),
        Object::Record(decl) if decl.params.is_empty() && decl.var_param.is_none() => {
            let ty = comp.types.record_type(decl, Vec::new(), span)?;
            analyze_type_call(comp, ty, args, span).map(Some)
        }
        Object::External(ext) => {
            let (arg_types, ret) = external_signature(comp, ext)?;
            let given = args.len();
            let ok = if ext.has_var_args {
                given >= arg_types.len()
            } else {
                given == arg_types.len()
            };
            if !ok {
                return Err(SemaError::new(
                    ErrorCode::E3002,
                    span,
                    format!("expected {} argument(s), got {given}", arg_types.len()),
                ));
            }
            for (i, (&want, pv)) in arg_types.iter().zip(&args.values).enumerate() {
                if want != pv.ty {
                    return Err(SemaError::new(
                        ErrorCode::E3001,
                        span,
                        format!(
                            "argument {i}: expected {}, got {}",
                            comp.type_name(want),
                            comp.type_name(pv.ty)
                        ),
                    ));
                }
            }
            Ok(Some(match ret {
                Some(ty) => MultiPValue::one(PValue::rvalue(ty)),
                None => MultiPValue::new(),
            }))
        }
        Object::Proc(proc) => Err(SemaError::new(
            ErrorCode::E3005,
            span,
            format!("no matching overload for {}", comp.str(proc.name)),
        )),
        other => Err(SemaError::new(
            ErrorCode::E3003,
            span,
            format!("{} is not callable", comp.object_name(other)),
        )),
    }
}

fn finish_entry_call(entry: &Rc<InvokeEntry>) -> ARes<MultiPValue> {
    if !entry.returns_initialized.get() {
        // A recursive call whose returns are not known yet.
        return Ok(None);
    }
    Ok(Some(analyze_return(
        &entry.return_is_ref.borrow(),
        &entry.return_types.borrow(),
    )))
}

/// Builtin construction/copy/conversion calls on a type value.
fn analyze_type_call(
    comp: &Compilation,
    ty: TypeId,
    args: &MultiPValue,
    span: Span,
) -> SemaResult<MultiPValue> {
    let result = MultiPValue::one(PValue::rvalue(ty));
    if args.is_empty() {
        return Ok(result);
    }
    if args.len() == 1 {
        let arg = args.values[0];
        if arg.ty == ty {
            return Ok(result);
        }
        if is_numeric(comp, ty) && is_numeric(comp, arg.ty) {
            return Ok(result);
        }
        if let TypeData::Variant { .. } = comp.types.data(ty) {
            if comp.variant_member_index(ty, arg.ty, span).is_ok() {
                return Ok(result);
            }
        }
    }
    if let TypeData::Record { .. } = comp.types.data(ty) {
        let fields = comp.record_fields(ty)?;
        if fields.types.len() == args.len()
            && fields
                .types
                .iter()
                .zip(&args.values)
                .all(|(&f, pv)| f == pv.ty)
        {
            return Ok(result);
        }
    }
    Err(SemaError::new(
        ErrorCode::E3005,
        span,
        format!("no matching constructor for {}", comp.type_name(ty)),
    ))
}

pub(crate) fn is_numeric(comp: &Compilation, ty: TypeId) -> bool {
    matches!(
        comp.types.data(ty),
        TypeData::Integer { .. } | TypeData::Float { .. }
    )
}

/// Dispatch-index reinterpretation: the value seen by one branch of a
/// dispatch cascade.
pub fn analyze_dispatch_index(
    comp: &Compilation,
    pv: PValue,
    tag: u32,
    span: Span,
) -> SemaResult<PValue> {
    let members = comp.variant_members(pv.ty)?;
    let index = tag as usize;
    if index >= members.len() {
        return Err(SemaError::new(
            ErrorCode::E3002,
            span,
            format!("dispatch tag {tag} out of range for {}", comp.type_name(pv.ty)),
        ));
    }
    Ok(PValue {
        ty: members[index],
        is_temp: pv.is_temp,
    })
}

/// Expand a call over the runtime tags of its dispatched positions; every
/// branch must agree on the result shape.
pub fn analyze_dispatch(
    comp: &Compilation,
    callable: &Object,
    args: &MultiPValue,
    dispatch_indices: &[usize],
    span: Span,
) -> ARes<MultiPValue> {
    let Some((&index, rest)) = dispatch_indices.split_first() else {
        return analyze_call_object(comp, callable, args, span);
    };
    let dispatched = args.values[index];
    let count = comp.dispatch_tag_count(dispatched.ty, span)?;
    let mut result: Option<MultiPValue> = None;
    for tag in 0..count {
        let member = analyze_dispatch_index(comp, dispatched, tag, span)?;
        let mut branch_args = args.clone();
        branch_args.values[index] = member;
        let branch = try_opt!(analyze_dispatch(comp, callable, &branch_args, rest, span));
        match &result {
            None => result = Some(branch),
            Some(prev) if *prev == branch => {}
            Some(_) => {
                return Err(SemaError::new(
                    ErrorCode::E3004,
                    span,
                    "dispatch branches disagree on result types",
                ));
            }
        }
    }
    Ok(result)
}

/// Analyze a call-by-name entry at one call site: bind formal names to the
/// caller's argument expressions and analyze the body.
pub fn analyze_call_by_name(
    comp: &Compilation,
    entry: &Rc<InvokeEntry>,
    args: &[ExprId],
    env: &Env,
    span: Span,
) -> ARes<MultiPValue> {
    let depth = comp.call_by_name_depth.get();
    if depth >= comp.call_by_name_limit.get() {
        return Err(SemaError::new(
            ErrorCode::E3009,
            span,
            "alias-function recursion limit exceeded",
        ));
    }
    comp.call_by_name_depth.set(depth + 1);
    let result = analyze_call_by_name_inner(comp, entry, args, env);
    comp.call_by_name_depth.set(depth);
    result
}

fn analyze_call_by_name_inner(
    comp: &Compilation,
    entry: &Rc<InvokeEntry>,
    args: &[ExprId],
    env: &Env,
) -> ARes<MultiPValue> {
    let body_env = bind_call_by_name_args(entry, args, env);
    let code = entry
        .code
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("call-by-name entry has no code"));
    let CodeBody::Stmt(body) = code.body else {
        panic!("call-by-name entry has a textual body");
    };
    let mut ctx = AnalysisContext::default();
    let _disabler = comp.disable_caching();
    match analyze_statement(comp, body, &body_env, &mut ctx)? {
        StatementAnalysis::Recursive => Ok(None),
        _ => Ok(Some(analyze_return(&ctx.return_is_ref, &ctx.return_types))),
    }
}

/// Bind call-by-name formals to argument expressions in the caller's env.
/// Arguments follow formal declaration order, with the variadic slot in the
/// middle absorbing the surplus.
pub fn bind_call_by_name_args(entry: &Rc<InvokeEntry>, args: &[ExprId], env: &Env) -> Env {
    let body_env = entry
        .env
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("entry has no match environment"))
        .child();
    let names = entry.fixed_arg_names.borrow();
    let var_name = *entry.var_arg_name.borrow();
    let var_position = entry.var_arg_position.get();
    let var_count = args.len().saturating_sub(names.len());

    let total = names.len() + usize::from(var_name.is_some());
    let mut arg_index = 0usize;
    let mut fixed_index = 0usize;
    for slot in 0..total {
        if slot == var_position {
            let rest: Vec<ExprId> = args[arg_index..arg_index + var_count].to_vec();
            arg_index += var_count;
            if let Some(var_name) = var_name {
                body_env.add_local(var_name, Object::AliasExprList(Rc::new(rest), env.clone()));
            }
        } else {
            body_env.add_local(
                names[fixed_index],
                Object::AliasExpr(args[arg_index], env.clone()),
            );
            fixed_index += 1;
            arg_index += 1;
        }
    }
    body_env
}

// -- body analysis --

/// Analyze an entry's body, inferring return types with a recursion fixed
/// point.
pub fn analyze_callable_body(comp: &Compilation, entry: &Rc<InvokeEntry>) -> SemaResult<()> {
    const MAX_FIXED_POINT_ITERATIONS: usize = 10;

    let code = entry
        .code
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("entry has no code"));

    if let CodeBody::Asm(_) = code.body {
        // Textual bodies require declared return specs; nothing to infer.
        let env = entry_body_env(entry);
        let (is_ref, types) = declared_returns(comp, &code, &env)?;
        entry.set_returns(is_ref, types);
        return Ok(());
    }

    let mut iterations = 0;
    loop {
        let env = entry_body_env(entry);
        let mut ctx = AnalysisContext::default();
        if code.has_return_specs() {
            let (is_ref, types) = declared_returns(comp, &code, &env)?;
            bind_named_returns(&code, &env, &types);
            ctx.return_is_ref.clone_from(&is_ref);
            ctx.return_types.clone_from(&types);
            ctx.return_initialized = true;
            entry.set_returns(is_ref, types);
        }

        let CodeBody::Stmt(body) = code.body else {
            panic!("statement body expected");
        };
        let sa = analyze_statement(comp, body, &env, &mut ctx)?;

        if !ctx.return_initialized {
            if sa == StatementAnalysis::Recursive {
                return Err(SemaError::new(
                    ErrorCode::E3007,
                    Span::DUMMY,
                    "recursion does not resolve to any return type",
                ));
            }
            ctx.return_initialized = true;
        }

        let changed = *entry.return_types.borrow() != ctx.return_types
            || *entry.return_is_ref.borrow() != ctx.return_is_ref
            || !entry.returns_initialized.get();
        entry.set_returns(ctx.return_is_ref.clone(), ctx.return_types.clone());

        let recursive = ctx.has_recursive_propagation || sa == StatementAnalysis::Recursive;
        if !recursive || !changed {
            return Ok(());
        }
        iterations += 1;
        if iterations >= MAX_FIXED_POINT_ITERATIONS {
            return Err(SemaError::new(
                ErrorCode::E3007,
                Span::DUMMY,
                "return type inference did not converge",
            ));
        }
        trace!(iterations, "retrying recursive return inference");
    }
}

/// Fresh body environment with argument names bound to their analyzed
/// values.
pub(crate) fn entry_body_env(entry: &Rc<InvokeEntry>) -> Env {
    let env = entry
        .env
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("entry has no match environment"))
        .child();
    let names = entry.fixed_arg_names.borrow();
    let types = entry.fixed_arg_types.borrow();
    let temp = &entry.temp_key;
    let var_position = entry.var_arg_position.get();

    let mut key_index = 0usize;
    let mut fixed_index = 0usize;
    let total = names.len() + usize::from(entry.var_arg_name.borrow().is_some());
    for slot in 0..total {
        if slot == var_position {
            let var_types = entry.var_arg_types.borrow();
            let mut mpv = MultiPValue::new();
            for &ty in var_types.iter() {
                mpv.push(PValue {
                    ty,
                    is_temp: temp[key_index] == Tempness::Rvalue,
                });
                key_index += 1;
            }
            if let Some(var_name) = *entry.var_arg_name.borrow() {
                env.add_local(var_name, Object::MultiPValue(mpv));
            }
        } else {
            let name = names[fixed_index];
            let ty = types[fixed_index];
            env.add_local(
                name,
                Object::PValue(PValue {
                    ty,
                    is_temp: temp[key_index] == Tempness::Rvalue,
                }),
            );
            fixed_index += 1;
            key_index += 1;
        }
    }
    env
}

fn declared_returns(
    comp: &Compilation,
    code: &Rc<mica_ir::Code>,
    env: &Env,
) -> SemaResult<(Vec<bool>, Vec<TypeId>)> {
    let mut is_ref = Vec::new();
    let mut types = Vec::new();
    if let Some(specs) = &code.return_specs {
        for spec in specs {
            is_ref.push(spec.by_ref);
            types.push(comp.evaluate_type(spec.ty, env)?);
        }
    }
    if let Some(var_spec) = &code.var_return_spec {
        let mut expanded = Vec::new();
        comp.evaluate_multi_type(&[var_spec.ty], env, &mut expanded)?;
        for ty in expanded {
            is_ref.push(var_spec.by_ref);
            types.push(ty);
        }
    }
    Ok((is_ref, types))
}

fn bind_named_returns(code: &Rc<mica_ir::Code>, env: &Env, types: &[TypeId]) {
    if let Some(specs) = &code.return_specs {
        for (i, spec) in specs.iter().enumerate() {
            if let Some(name) = spec.name {
                env.add_local(name, Object::PValue(PValue::lvalue(types[i])));
            }
        }
        if let Some(var_spec) = &code.var_return_spec {
            if let Some(name) = var_spec.name {
                let rest = MultiPValue::from_values(
                    types[specs.len()..].iter().map(|&ty| PValue::lvalue(ty)),
                );
                env.add_local(name, Object::MultiPValue(rest));
            }
        }
    }
}

fn initialize_return(
    comp: &Compilation,
    ctx: &mut AnalysisContext,
    is_ref: Vec<bool>,
    types: Vec<TypeId>,
    span: Span,
) -> SemaResult<()> {
    if ctx.return_initialized {
        if ctx.return_types != types || ctx.return_is_ref != is_ref {
            return Err(SemaError::new(
                ErrorCode::E3001,
                span,
                format!(
                    "return types disagree: [{}] vs [{}]",
                    types
                        .iter()
                        .map(|&t| comp.type_name(t))
                        .collect::<Vec<_>>()
                        .join(", "),
                    ctx.return_types
                        .iter()
                        .map(|&t| comp.type_name(t))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
        return Ok(());
    }
    ctx.return_is_ref = is_ref;
    ctx.return_types = types;
    ctx.return_initialized = true;
    Ok(())
}

/// Statement analysis: computes bindings and return contributions without
/// emitting code.
pub(crate) fn analyze_statement(
    comp: &Compilation,
    stmt: StmtId,
    env: &Env,
    ctx: &mut AnalysisContext,
) -> SemaResult<StatementAnalysis> {
    use StatementAnalysis as SA;
    let span = comp.stmt_span(stmt);
    match comp.stmt(stmt) {
        Stmt::Block(stmts) => {
            let mut block_env = env.child();
            let mut result = SA::Fallthrough;
            for stmt in stmts {
                match comp.stmt(stmt) {
                    Stmt::Binding {
                        kind,
                        names,
                        values,
                    } => match analyze_binding(comp, kind, &names, &values, &block_env)? {
                        Some(new_env) => block_env = new_env,
                        None => result = SA::Recursive,
                    },
                    _ => match analyze_statement(comp, stmt, &block_env, ctx)? {
                        SA::Fallthrough => {}
                        SA::Recursive => result = SA::Recursive,
                        SA::Terminated => return Ok(SA::Terminated),
                    },
                }
            }
            Ok(result)
        }
        Stmt::Label(_) | Stmt::Binding { .. } => Ok(SA::Fallthrough),
        Stmt::Assign { left, right } | Stmt::InitAssign { left, right } => {
            let l = analyze_multi(comp, &left, env, 0)?;
            let r = analyze_multi(comp, &right, env, 0)?;
            if l.is_none() || r.is_none() {
                return Ok(SA::Recursive);
            }
            Ok(SA::Fallthrough)
        }
        Stmt::UpdateAssign { exprs, .. } => {
            if analyze_multi(comp, &exprs, env, 0)?.is_none() {
                return Ok(SA::Recursive);
            }
            Ok(SA::Fallthrough)
        }
        Stmt::Goto(_) => Ok(SA::Terminated),
        Stmt::Return { kind, values } => {
            let Some(mpv) = analyze_multi(comp, &values, env, 1)? else {
                ctx.has_recursive_propagation = true;
                return Ok(SA::Recursive);
            };
            let mut is_ref = Vec::with_capacity(mpv.len());
            let mut types = Vec::with_capacity(mpv.len());
            for pv in &mpv.values {
                let by_ref = return_kind_to_by_ref(kind, *pv);
                if by_ref && pv.is_temp {
                    return Err(SemaError::new(
                        ErrorCode::E3011,
                        span,
                        "cannot return a temporary by reference",
                    ));
                }
                is_ref.push(by_ref);
                types.push(pv.ty);
            }
            initialize_return(comp, ctx, is_ref, types, span)?;
            Ok(SA::Terminated)
        }
        Stmt::If {
            condition_statements,
            condition,
            then_part,
            else_part,
        } => {
            let mut env2 = env.child();
            for cs in condition_statements {
                analyze_statement(comp, cs, &env2, ctx)?;
                if let Stmt::Binding {
                    kind,
                    names,
                    values,
                } = comp.stmt(cs)
                {
                    if let Some(new_env) = analyze_binding(comp, kind, &names, &values, &env2)? {
                        env2 = new_env;
                    }
                }
            }
            if analyze_one(comp, condition, &env2)?.is_none() {
                return Ok(SA::Recursive);
            }
            let t = analyze_statement(comp, then_part, &env2, ctx)?;
            let e = match else_part {
                Some(else_part) => analyze_statement(comp, else_part, &env2, ctx)?,
                None => SA::Fallthrough,
            };
            Ok(match (t, e) {
                (SA::Terminated, SA::Terminated) => SA::Terminated,
                (SA::Recursive, _) | (_, SA::Recursive) => SA::Recursive,
                _ => SA::Fallthrough,
            })
        }
        Stmt::ExprStmt(expr) => {
            if analyze_expr(comp, expr, env)?.is_none() {
                return Ok(SA::Recursive);
            }
            Ok(SA::Fallthrough)
        }
        Stmt::While {
            condition_statements,
            condition,
            body,
        } => {
            let env2 = env.child();
            for cs in condition_statements {
                analyze_statement(comp, cs, &env2, ctx)?;
            }
            if analyze_one(comp, condition, &env2)?.is_none() {
                return Ok(SA::Recursive);
            }
            analyze_statement(comp, body, &env2, ctx)?;
            Ok(SA::Fallthrough)
        }
        Stmt::Break | Stmt::Continue => Ok(SA::Terminated),
        Stmt::Try { body, catch } => {
            let t = analyze_statement(comp, body, env, ctx)?;
            let catch_env = env.exception_scope();
            let c = analyze_statement(comp, catch, &catch_env, ctx)?;
            Ok(match (t, c) {
                (SA::Terminated, SA::Terminated) => SA::Terminated,
                (SA::Recursive, _) | (_, SA::Recursive) => SA::Recursive,
                _ => SA::Fallthrough,
            })
        }
        Stmt::Throw { value } => {
            if let Some(value) = value {
                if analyze_one(comp, value, env)?.is_none() {
                    return Ok(SA::Recursive);
                }
            } else if !env.exception_available() {
                return Err(SemaError::new(
                    ErrorCode::E4003,
                    span,
                    "rethrow is only valid inside a catch block",
                ));
            }
            Ok(SA::Terminated)
        }
        Stmt::StaticFor {
            variable,
            values,
            body,
        } => {
            let Some(mpv) = analyze_multi(comp, &values, env, 0)? else {
                return Ok(SA::Recursive);
            };
            let mut result = SA::Fallthrough;
            let _disabler = comp.disable_caching();
            for pv in &mpv.values {
                let iter_env = env.child();
                iter_env.add_local(variable, Object::PValue(*pv));
                match analyze_statement(comp, body, &iter_env, ctx)? {
                    SA::Fallthrough => {}
                    SA::Recursive => result = SA::Recursive,
                    SA::Terminated => return Ok(SA::Terminated),
                }
            }
            Ok(result)
        }
        Stmt::Finally(body) | Stmt::OnError(body) => {
            analyze_statement(comp, body, env, ctx)?;
            Ok(SA::Fallthrough)
        }
        Stmt::Unreachable => Ok(SA::Terminated),
        Stmt::StaticAssert { condition, message } => {
            comp.evaluate_static_assert(span, condition, &message, env)?;
            Ok(SA::Fallthrough)
        }
    }
}

/// Binding analysis: returns the extended environment, or `None` on
/// unresolved recursion.
fn analyze_binding(
    comp: &Compilation,
    kind: BindingKind,
    names: &[mica_ir::BindingName],
    values: &[ExprId],
    env: &Env,
) -> ARes<Env> {
    let span = values
        .first()
        .map_or(Span::DUMMY, |&expr| comp.expr_span(expr));
    if kind == BindingKind::Alias {
        if names.len() != 1 || values.len() != 1 {
            return Err(SemaError::new(
                ErrorCode::E3002,
                span,
                "alias bindings take exactly one name and one value",
            ));
        }
        let new_env = env.child();
        new_env.add_local(names[0].name, Object::AliasExpr(values[0], env.clone()));
        return Ok(Some(new_env));
    }

    let want = names.len();
    let Some(mpv) = analyze_multi(comp, values, env, want.max(1))? else {
        return Ok(None);
    };
    check_binding_arity(names, &mpv, span)?;

    let new_env = env.child();
    let has_var = names.iter().any(|n| n.var_arg);
    let var_len = mpv.len() + 1 - names.len();
    let mut value_index = 0usize;
    for binding in names {
        if binding.var_arg {
            let mut multi = MultiPValue::new();
            for _ in 0..var_len {
                multi.push(bound_pvalue(kind, mpv.values[value_index], span)?);
                value_index += 1;
            }
            new_env.add_local(binding.name, Object::MultiPValue(multi));
        } else {
            let pv = bound_pvalue(kind, mpv.values[value_index], span)?;
            value_index += 1;
            new_env.add_local(binding.name, Object::PValue(pv));
        }
    }
    debug_assert!(has_var || value_index == mpv.len());
    Ok(Some(new_env))
}

fn check_binding_arity(
    names: &[mica_ir::BindingName],
    mpv: &MultiPValue,
    span: Span,
) -> SemaResult<()> {
    let has_var = names.iter().any(|n| n.var_arg);
    let fixed = names.len() - usize::from(has_var);
    let ok = if has_var {
        mpv.len() >= fixed
    } else {
        mpv.len() == names.len()
    };
    if ok {
        Ok(())
    } else {
        Err(SemaError::new(
            ErrorCode::E3002,
            span,
            format!("expected {} value(s), got {}", names.len(), mpv.len()),
        ))
    }
}

fn bound_pvalue(kind: BindingKind, pv: PValue, span: Span) -> SemaResult<PValue> {
    match kind {
        // `var` gives the value a home; uses see an lvalue.
        BindingKind::Var => Ok(PValue::lvalue(pv.ty)),
        BindingKind::Ref => {
            if pv.is_temp {
                return Err(SemaError::new(
                    ErrorCode::E3011,
                    span,
                    "ref can only bind to an lvalue",
                ));
            }
            Ok(PValue::lvalue(pv.ty))
        }
        BindingKind::Forward => Ok(pv),
        BindingKind::Alias => panic!("alias handled by caller"),
    }
}

/// Analyze everything reachable from a module's entry points: its `main`
/// procedure (if any) and every external procedure with a body.
pub fn analyze_entry(comp: &Compilation, module: &Rc<Module>) -> SemaResult<()> {
    comp.set_main_module(module.clone());
    if let Some(mica_ir::Item::Proc(main)) = module.lookup(comp.name("main")) {
        safe_analyze_callable(comp, &Object::Proc(main), &[], &[])?;
    }
    for item in module.top_level.borrow().iter() {
        if let mica_ir::Item::External(ext) = item {
            if ext.body.is_some() {
                analyze_external_procedure(comp, ext)?;
            }
        }
    }
    Ok(())
}

/// Signature of an external procedure: argument types and return type.
pub fn external_signature(
    comp: &Compilation,
    ext: &Rc<mica_ir::ExternalProcedure>,
) -> SemaResult<(Vec<TypeId>, Option<TypeId>)> {
    let env = comp.decl_env(&ext.module);
    let mut args = Vec::with_capacity(ext.args.len());
    for arg in &ext.args {
        args.push(comp.evaluate_type(arg.ty, &env)?);
    }
    let ret = match ext.return_type {
        Some(expr) => Some(comp.evaluate_type(expr, &env)?),
        None => None,
    };
    Ok((args, ret))
}

fn analyze_external_procedure(
    comp: &Compilation,
    ext: &Rc<mica_ir::ExternalProcedure>,
) -> SemaResult<()> {
    let (arg_types, ret) = external_signature(comp, ext)?;
    let env = comp.decl_env(&ext.module).child();
    for (arg, &ty) in ext.args.iter().zip(&arg_types) {
        env.add_local(arg.name, Object::PValue(PValue::lvalue(ty)));
    }
    let Some(body) = ext.body else {
        return Ok(());
    };
    let mut ctx = AnalysisContext::default();
    if let Some(ret) = ret {
        ctx.return_is_ref = vec![false];
        ctx.return_types = vec![ret];
        ctx.return_initialized = true;
    } else {
        ctx.return_initialized = true;
    }
    match analyze_statement(comp, body, &env, &mut ctx)? {
        StatementAnalysis::Recursive => Err(recursion_error(comp.stmt_span(body))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests;
