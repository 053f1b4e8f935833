//! Type patterns and unification.
//!
//! Overload formal arguments, variant instance targets, and record parameter
//! lists are *patterns*: static expressions that may contain declared pattern
//! variables. A pattern is evaluated once in its declaration environment and
//! then unified against candidate static objects, producing bindings for its
//! variables.

use mica_diagnostic::ErrorCode;
use mica_ir::{Expr, ExprId, Name, PrimOpCode, TypeId};
use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::context::Compilation;
use crate::env::Env;
use crate::error::{SemaError, SemaResult};
use crate::object::Object;
use crate::types::TypeData;

/// An evaluated pattern.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Matches exactly this static object.
    Const(Object),
    /// Binds (or checks against an existing binding of) a pattern variable.
    Var { name: Name, multi: bool },
    /// Matches a constructed type and recurses into its parameters.
    Ctor { head: Object, args: Vec<Pattern> },
}

/// Variable bindings produced by unification.
pub type Bindings = FxHashMap<Name, Object>;

/// Evaluate a pattern expression. `vars` maps declared pattern-variable
/// names to their multi-ness.
pub fn evaluate_pattern(
    comp: &Compilation,
    expr: ExprId,
    env: &Env,
    vars: &FxHashMap<Name, bool>,
) -> SemaResult<Pattern> {
    match comp.expr(expr) {
        Expr::NameRef(name) => {
            if let Some(&multi) = vars.get(&name) {
                return Ok(Pattern::Var { name, multi });
            }
            Ok(Pattern::Const(comp.evaluate_one_static(expr, env)?))
        }
        Expr::Indexing { base, args } => {
            let head = comp.evaluate_one_static(base, env)?;
            let args = args
                .iter()
                .map(|&arg| evaluate_pattern(comp, arg, env, vars))
                .collect::<SemaResult<Vec<_>>>()?;
            Ok(Pattern::Ctor { head, args })
        }
        Expr::StaticExpr(inner) | Expr::Unpack(inner) => evaluate_pattern(comp, inner, env, vars),
        _ => Ok(Pattern::Const(comp.evaluate_one_static(expr, env)?)),
    }
}

/// Unify `pattern` against `obj`, extending `bindings`. Returns `false` (with
/// `bindings` in an unspecified state) when they do not match.
pub fn unify(
    comp: &Compilation,
    pattern: &Pattern,
    obj: &Object,
    bindings: &mut Bindings,
) -> SemaResult<bool> {
    match pattern {
        Pattern::Const(expected) => {
            Ok(expected == obj || const_matches_normalized(comp, expected, obj))
        }
        Pattern::Var { name, multi } => {
            if *multi {
                return Err(SemaError::new(
                    ErrorCode::E3006,
                    mica_ir::Span::DUMMY,
                    "multi pattern variable used in single-value position",
                ));
            }
            match bindings.get(name) {
                Some(existing) => Ok(existing == obj),
                None => {
                    bindings.insert(*name, obj.clone());
                    Ok(true)
                }
            }
        }
        Pattern::Ctor { head, args } => unify_ctor(comp, head, args, obj, bindings),
    }
}

/// A bare parameterless declaration in a pattern matches its own type.
fn const_matches_normalized(comp: &Compilation, expected: &Object, obj: &Object) -> bool {
    let Object::Type(ty) = obj else {
        return false;
    };
    match (expected, comp.types.data(*ty)) {
        (Object::Record(decl), TypeData::Record { decl: d, params }) => {
            decl.params.is_empty() && params.is_empty() && Rc::ptr_eq(decl, &d.0)
        }
        (Object::Variant(decl), TypeData::Variant { decl: d, params }) => {
            decl.params.is_empty() && params.is_empty() && Rc::ptr_eq(decl, &d.0)
        }
        (Object::Enum(decl), TypeData::Enum(d)) => Rc::ptr_eq(decl, &d.0),
        (Object::NewType(decl), TypeData::NewType(d)) => Rc::ptr_eq(decl, &d.0),
        _ => false,
    }
}

fn unify_ctor(
    comp: &Compilation,
    head: &Object,
    args: &[Pattern],
    obj: &Object,
    bindings: &mut Bindings,
) -> SemaResult<bool> {
    let Object::Type(ty) = obj else {
        return Ok(false);
    };
    let data = comp.types.data(*ty);
    match (head, data) {
        (Object::Record(decl), TypeData::Record { decl: d, params }) => {
            if !Rc::ptr_eq(decl, &d.0) {
                return Ok(false);
            }
            unify_params(comp, args, &params, bindings)
        }
        (Object::Variant(decl), TypeData::Variant { decl: d, params }) => {
            if !Rc::ptr_eq(decl, &d.0) {
                return Ok(false);
            }
            unify_params(comp, args, &params, bindings)
        }
        (Object::PrimOp(PrimOpCode::PointerT), TypeData::Pointer(pointee)) => {
            unify_params(comp, args, &[Object::Type(pointee)], bindings)
        }
        (Object::PrimOp(PrimOpCode::ArrayT), TypeData::Array { elem, size }) => {
            let params = [
                Object::Type(elem),
                Object::Holder(comp.c_int_holder(i32::try_from(size).unwrap_or(i32::MAX))),
            ];
            unify_params(comp, args, &params, bindings)
        }
        (Object::PrimOp(PrimOpCode::VecT), TypeData::Vec { elem, size }) => {
            let params = [
                Object::Type(elem),
                Object::Holder(comp.c_int_holder(i32::try_from(size).unwrap_or(i32::MAX))),
            ];
            unify_params(comp, args, &params, bindings)
        }
        (Object::PrimOp(PrimOpCode::TupleT), TypeData::Tuple(elems)) => {
            let params: Vec<Object> = elems.into_iter().map(Object::Type).collect();
            unify_params(comp, args, &params, bindings)
        }
        (Object::PrimOp(PrimOpCode::UnionT), TypeData::Union(members)) => {
            let params: Vec<Object> = members.into_iter().map(Object::Type).collect();
            unify_params(comp, args, &params, bindings)
        }
        (Object::PrimOp(PrimOpCode::StaticT), TypeData::Static(inner)) => {
            unify_params(comp, args, &[*inner], bindings)
        }
        _ => Ok(false),
    }
}

/// Element-wise unification; a trailing multi variable absorbs the remaining
/// parameters.
fn unify_params(
    comp: &Compilation,
    patterns: &[Pattern],
    params: &[Object],
    bindings: &mut Bindings,
) -> SemaResult<bool> {
    let multi_tail = matches!(patterns.last(), Some(Pattern::Var { multi: true, .. }));
    let fixed = if multi_tail {
        patterns.len() - 1
    } else {
        patterns.len()
    };

    if multi_tail {
        if params.len() < fixed {
            return Ok(false);
        }
    } else if params.len() != fixed {
        return Ok(false);
    }

    for (pattern, param) in patterns[..fixed].iter().zip(params) {
        if !unify(comp, pattern, param, bindings)? {
            return Ok(false);
        }
    }

    if multi_tail {
        let Some(Pattern::Var { name, .. }) = patterns.last() else {
            return Ok(false);
        };
        let rest: Vec<Object> = params[fixed..].to_vec();
        let rest = Object::Multi(Rc::new(rest));
        match bindings.get(name) {
            Some(existing) => return Ok(*existing == rest),
            None => {
                bindings.insert(*name, rest);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn var_binds_and_stays_consistent() {
        let comp = Compilation::new();
        let t_name = comp.name("T");
        let pattern = Pattern::Var {
            name: t_name,
            multi: false,
        };
        let mut bindings = Bindings::default();
        let int32 = Object::Type(comp.types.int32_type);
        assert!(unify(&comp, &pattern, &int32, &mut bindings).unwrap_or(false));
        assert_eq!(bindings.get(&t_name), Some(&int32));
        // Re-unifying against a different type fails.
        let int64 = Object::Type(comp.types.int64_type);
        assert!(!unify(&comp, &pattern, &int64, &mut bindings).unwrap_or(true));
    }

    #[test]
    fn pointer_ctor_pattern_destructures() {
        let comp = Compilation::new();
        let t_name = comp.name("T");
        let pattern = Pattern::Ctor {
            head: Object::PrimOp(PrimOpCode::PointerT),
            args: vec![Pattern::Var {
                name: t_name,
                multi: false,
            }],
        };
        let ptr = comp.types.pointer_type(comp.types.float64_type);
        let mut bindings = Bindings::default();
        assert!(unify(&comp, &pattern, &Object::Type(ptr), &mut bindings).unwrap_or(false));
        assert_eq!(
            bindings.get(&t_name),
            Some(&Object::Type(comp.types.float64_type))
        );
        // A non-pointer does not match.
        let mut bindings = Bindings::default();
        assert!(!unify(
            &comp,
            &pattern,
            &Object::Type(comp.types.int32_type),
            &mut bindings
        )
        .unwrap_or(true));
    }

    #[test]
    fn tuple_ctor_with_multi_tail() {
        let comp = Compilation::new();
        let head_name = comp.name("A");
        let rest_name = comp.name("Rest");
        let pattern = Pattern::Ctor {
            head: Object::PrimOp(PrimOpCode::TupleT),
            args: vec![
                Pattern::Var {
                    name: head_name,
                    multi: false,
                },
                Pattern::Var {
                    name: rest_name,
                    multi: true,
                },
            ],
        };
        let tuple = comp.types.tuple_type(vec![
            comp.types.int32_type,
            comp.types.float64_type,
            comp.types.bool_type,
        ]);
        let mut bindings = Bindings::default();
        assert!(unify(&comp, &pattern, &Object::Type(tuple), &mut bindings).unwrap_or(false));
        assert_eq!(
            bindings.get(&head_name),
            Some(&Object::Type(comp.types.int32_type))
        );
        let Some(Object::Multi(rest)) = bindings.get(&rest_name) else {
            panic!("multi variable not bound");
        };
        assert_eq!(rest.len(), 2);
    }
}
