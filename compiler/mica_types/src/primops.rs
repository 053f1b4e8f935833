//! Analysis of the primitive operations.
//!
//! One table covers the whole built-in algebra. Introspection operations
//! (sizes, counts, names, member indexes) yield *static* results, so the
//! evaluator and analyzer agree by construction; runtime algebra yields
//! plain typed rvalues. The lowering driver implements the same table at the
//! emission level and the two must stay in sync.

use std::rc::Rc;

use mica_diagnostic::ErrorCode;
use mica_ir::{Name, PrimOpCode, Span, TypeId};

use crate::analyzer::{analyze_call_object, compute_args_key, is_numeric};
use crate::context::Compilation;
use crate::error::{SemaError, SemaResult};
use crate::eval::unwrap_static_type;
use crate::invoke::safe_analyze_callable;
use crate::object::Object;
use crate::types::TypeData;
use crate::value::{MultiPValue, PValue};

type ARes<T> = SemaResult<Option<T>>;

fn err(code: ErrorCode, span: Span, message: impl Into<String>) -> SemaError {
    SemaError::new(code, span, message)
}

fn arity(op: PrimOpCode, args: &MultiPValue, n: usize, span: Span) -> SemaResult<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(err(
            ErrorCode::E3002,
            span,
            format!("{} expects {n} argument(s), got {}", op.name(), args.len()),
        ))
    }
}

fn at_least(op: PrimOpCode, args: &MultiPValue, n: usize, span: Span) -> SemaResult<()> {
    if args.len() >= n {
        Ok(())
    } else {
        Err(err(
            ErrorCode::E3002,
            span,
            format!(
                "{} expects at least {n} argument(s), got {}",
                op.name(),
                args.len()
            ),
        ))
    }
}

fn static_arg(comp: &Compilation, args: &MultiPValue, i: usize, span: Span) -> SemaResult<Object> {
    unwrap_static_type(comp, args.values[i].ty).ok_or_else(|| {
        err(
            ErrorCode::E3006,
            span,
            format!("argument {i} must be a static value"),
        )
    })
}

fn static_type_arg(
    comp: &Compilation,
    args: &MultiPValue,
    i: usize,
    span: Span,
) -> SemaResult<TypeId> {
    let obj = static_arg(comp, args, i, span)?;
    comp.static_object_as_type(&obj, span)
}

fn static_index_arg(
    comp: &Compilation,
    args: &MultiPValue,
    i: usize,
    span: Span,
) -> SemaResult<usize> {
    let obj = static_arg(comp, args, i, span)?;
    Ok(comp.static_u32(&obj, span)? as usize)
}

fn static_ident_arg(
    comp: &Compilation,
    args: &MultiPValue,
    i: usize,
    span: Span,
) -> SemaResult<Name> {
    match static_arg(comp, args, i, span)? {
        Object::Ident(name) => Ok(name),
        other => Err(err(
            ErrorCode::E3006,
            span,
            format!("argument {i} must be a static identifier, got {}", comp.object_name(&other)),
        )),
    }
}

fn rvalue(ty: TypeId) -> ARes<MultiPValue> {
    Ok(Some(MultiPValue::one(PValue::rvalue(ty))))
}

fn with_base_tempness(ty: TypeId, base: PValue) -> ARes<MultiPValue> {
    Ok(Some(MultiPValue::one(PValue {
        ty,
        is_temp: base.is_temp,
    })))
}

/// Element references are lvalues regardless of the base: the out slot is a
/// pointer into the aggregate's storage.
fn lvalue_ref(ty: TypeId) -> ARes<MultiPValue> {
    Ok(Some(MultiPValue::one(PValue::lvalue(ty))))
}

fn lvalue_refs(types: impl IntoIterator<Item = TypeId>) -> ARes<MultiPValue> {
    Ok(Some(MultiPValue::from_values(
        types.into_iter().map(PValue::lvalue),
    )))
}

fn static_result(comp: &Compilation, obj: Object) -> ARes<MultiPValue> {
    rvalue(comp.types.static_type(obj))
}

fn static_bool(comp: &Compilation, value: bool) -> ARes<MultiPValue> {
    static_result(comp, Object::Holder(comp.bool_holder(value)))
}

fn static_size(comp: &Compilation, value: u64) -> ARes<MultiPValue> {
    static_result(comp, Object::Holder(comp.size_t_holder(value)))
}

fn empty() -> ARes<MultiPValue> {
    Ok(Some(MultiPValue::new()))
}

fn check_same_type(comp: &Compilation, a: TypeId, b: TypeId, span: Span) -> SemaResult<()> {
    if a == b {
        Ok(())
    } else {
        Err(err(
            ErrorCode::E3001,
            span,
            format!(
                "operand types must match: {} vs {}",
                comp.type_name(a),
                comp.type_name(b)
            ),
        ))
    }
}

fn check_integer(comp: &Compilation, ty: TypeId, span: Span) -> SemaResult<()> {
    match comp.types.data(ty) {
        TypeData::Integer { .. } => Ok(()),
        _ => Err(err(
            ErrorCode::E3001,
            span,
            format!("expected an integer type, got {}", comp.type_name(ty)),
        )),
    }
}

fn check_float(comp: &Compilation, ty: TypeId, span: Span) -> SemaResult<()> {
    match comp.types.data(ty) {
        TypeData::Float { .. } => Ok(()),
        _ => Err(err(
            ErrorCode::E3001,
            span,
            format!("expected a float type, got {}", comp.type_name(ty)),
        )),
    }
}

fn check_numeric(comp: &Compilation, ty: TypeId, span: Span) -> SemaResult<()> {
    if is_numeric(comp, ty) {
        Ok(())
    } else {
        Err(err(
            ErrorCode::E3001,
            span,
            format!("expected a numeric type, got {}", comp.type_name(ty)),
        ))
    }
}

fn pointee(comp: &Compilation, ty: TypeId, span: Span) -> SemaResult<TypeId> {
    match comp.types.data(ty) {
        TypeData::Pointer(p) => Ok(p),
        _ => Err(err(
            ErrorCode::E3001,
            span,
            format!("expected a pointer, got {}", comp.type_name(ty)),
        )),
    }
}

/// Checked arithmetic routes to library procedures bound under the same
/// operator names.
fn route_to_named(
    comp: &Compilation,
    code: PrimOpCode,
    args: &MultiPValue,
    span: Span,
) -> ARes<MultiPValue> {
    let name = comp.name(code.name());
    match comp.operator_by_name(name) {
        Some(Object::Proc(proc)) => analyze_call_object(comp, &Object::Proc(proc), args, span),
        _ => Err(err(
            ErrorCode::E3005,
            span,
            format!("{} requires a library procedure", code.name()),
        )),
    }
}

/// Analysis of a primitive operation applied to analyzed arguments.
pub fn analyze_prim_op(
    comp: &Compilation,
    code: PrimOpCode,
    args: &MultiPValue,
    span: Span,
) -> ARes<MultiPValue> {
    use PrimOpCode::*;
    let ts = &comp.types;
    match code {
        // -- type introspection --
        TypeP => {
            arity(code, args, 1, span)?;
            let is_type = matches!(static_arg(comp, args, 0, span), Ok(Object::Type(_)));
            static_bool(comp, is_type)
        }
        TypeSize => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            static_size(comp, comp.type_size(ty)?)
        }
        TypeAlignment => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            static_size(comp, comp.type_alignment(ty)?)
        }

        // -- bit level --
        Bitcopy => {
            arity(code, args, 2, span)?;
            check_same_type(comp, args.values[0].ty, args.values[1].ty, span)?;
            empty()
        }
        Bitcast => {
            arity(code, args, 2, span)?;
            let dest = static_type_arg(comp, args, 0, span)?;
            let src = args.values[1];
            if src.is_temp {
                return Err(err(
                    ErrorCode::E3011,
                    span,
                    "cannot bitcast a temporary",
                ));
            }
            if comp.type_size(dest)? > comp.type_size(src.ty)?
                || comp.type_alignment(dest)? > comp.type_alignment(src.ty)?
            {
                return Err(err(
                    ErrorCode::E4006,
                    span,
                    "bitcast requires a destination no larger and no more aligned than the source",
                ));
            }
            Ok(Some(MultiPValue::one(PValue::lvalue(dest))))
        }

        // -- bool --
        BoolNot => {
            arity(code, args, 1, span)?;
            check_same_type(comp, args.values[0].ty, ts.bool_type, span)?;
            rvalue(ts.bool_type)
        }

        // -- comparisons --
        IntegerEqualsP | IntegerLesserP => {
            arity(code, args, 2, span)?;
            check_integer(comp, args.values[0].ty, span)?;
            check_same_type(comp, args.values[0].ty, args.values[1].ty, span)?;
            rvalue(ts.bool_type)
        }
        FloatOrderedEqualsP | FloatOrderedLesserP | FloatOrderedLesserEqualsP
        | FloatOrderedGreaterP | FloatOrderedGreaterEqualsP | FloatOrderedNotEqualsP
        | FloatOrderedP | FloatUnorderedEqualsP | FloatUnorderedLesserP
        | FloatUnorderedLesserEqualsP | FloatUnorderedGreaterP | FloatUnorderedGreaterEqualsP
        | FloatUnorderedNotEqualsP | FloatUnorderedP => {
            arity(code, args, 2, span)?;
            check_float(comp, args.values[0].ty, span)?;
            check_same_type(comp, args.values[0].ty, args.values[1].ty, span)?;
            rvalue(ts.bool_type)
        }

        // -- numeric algebra --
        NumericAdd | NumericSubtract | NumericMultiply => {
            arity(code, args, 2, span)?;
            check_numeric(comp, args.values[0].ty, span)?;
            check_same_type(comp, args.values[0].ty, args.values[1].ty, span)?;
            rvalue(args.values[0].ty)
        }
        FloatDivide => {
            arity(code, args, 2, span)?;
            check_float(comp, args.values[0].ty, span)?;
            check_same_type(comp, args.values[0].ty, args.values[1].ty, span)?;
            rvalue(args.values[0].ty)
        }
        NumericNegate => {
            arity(code, args, 1, span)?;
            check_numeric(comp, args.values[0].ty, span)?;
            rvalue(args.values[0].ty)
        }
        IntegerQuotient | IntegerRemainder | IntegerShiftLeft | IntegerShiftRight
        | IntegerBitwiseAnd | IntegerBitwiseOr | IntegerBitwiseXor => {
            arity(code, args, 2, span)?;
            check_integer(comp, args.values[0].ty, span)?;
            check_same_type(comp, args.values[0].ty, args.values[1].ty, span)?;
            rvalue(args.values[0].ty)
        }
        IntegerBitwiseNot => {
            arity(code, args, 1, span)?;
            check_integer(comp, args.values[0].ty, span)?;
            rvalue(args.values[0].ty)
        }
        NumericConvert => {
            arity(code, args, 2, span)?;
            let dest = static_type_arg(comp, args, 0, span)?;
            check_numeric(comp, dest, span)?;
            check_numeric(comp, args.values[1].ty, span)?;
            rvalue(dest)
        }

        // -- checked arithmetic --
        IntegerAddChecked | IntegerSubtractChecked | IntegerMultiplyChecked
        | IntegerQuotientChecked | IntegerRemainderChecked | IntegerShiftLeftChecked
        | IntegerNegateChecked | IntegerConvertChecked => {
            route_to_named(comp, code, args, span)
        }

        // -- pointers --
        AddressOf => {
            arity(code, args, 1, span)?;
            if args.values[0].is_temp {
                return Err(err(
                    ErrorCode::E3011,
                    span,
                    "cannot take the address of a temporary",
                ));
            }
            rvalue(ts.pointer_type(args.values[0].ty))
        }
        PointerDereference => {
            arity(code, args, 1, span)?;
            let p = pointee(comp, args.values[0].ty, span)?;
            Ok(Some(MultiPValue::one(PValue::lvalue(p))))
        }
        PointerOffset => {
            arity(code, args, 2, span)?;
            pointee(comp, args.values[0].ty, span)?;
            check_integer(comp, args.values[1].ty, span)?;
            rvalue(args.values[0].ty)
        }
        PointerToInt => {
            arity(code, args, 2, span)?;
            let dest = static_type_arg(comp, args, 0, span)?;
            check_integer(comp, dest, span)?;
            pointee(comp, args.values[1].ty, span)?;
            rvalue(dest)
        }
        IntToPointer => {
            arity(code, args, 2, span)?;
            let dest = static_type_arg(comp, args, 0, span)?;
            check_integer(comp, args.values[1].ty, span)?;
            rvalue(ts.pointer_type(dest))
        }
        NullPointer => {
            arity(code, args, 1, span)?;
            let dest = static_type_arg(comp, args, 0, span)?;
            rvalue(ts.pointer_type(dest))
        }

        // -- code pointers --
        MakeCodePointer => {
            at_least(code, args, 1, span)?;
            let callable = static_arg(comp, args, 0, span)?;
            let mut arg_types = Vec::with_capacity(args.len() - 1);
            for i in 1..args.len() {
                arg_types.push(static_type_arg(comp, args, i, span)?);
            }
            let temp_key = vec![mica_ir::Tempness::Lvalue; arg_types.len()];
            let entry = safe_analyze_callable(comp, &callable, &arg_types, &temp_key)?;
            let ty = ts.code_pointer_type(
                arg_types,
                entry.return_is_ref.borrow().clone(),
                entry.return_types.borrow().clone(),
            );
            rvalue(ty)
        }
        MakeExternalCodePointer => {
            at_least(code, args, 1, span)?;
            match static_arg(comp, args, 0, span)? {
                Object::External(ext) => {
                    arity(code, args, 1, span)?;
                    let (arg_types, ret) = crate::analyzer::external_signature(comp, &ext)?;
                    rvalue(ts.c_code_pointer_type(
                        ext.calling_conv,
                        arg_types,
                        ext.has_var_args,
                        ret,
                    ))
                }
                // A procedure gains a C wrapper for the given argument types.
                callable @ (Object::Proc(_) | Object::PrimOp(_)) => {
                    let mut arg_types = Vec::with_capacity(args.len() - 1);
                    for i in 1..args.len() {
                        arg_types.push(static_type_arg(comp, args, i, span)?);
                    }
                    let temp_key = vec![mica_ir::Tempness::Lvalue; arg_types.len()];
                    let entry = safe_analyze_callable(comp, &callable, &arg_types, &temp_key)?;
                    let return_types = entry.return_types.borrow();
                    if return_types.len() > 1 {
                        return Err(err(
                            ErrorCode::E3002,
                            span,
                            "external code pointers return at most one value",
                        ));
                    }
                    rvalue(ts.c_code_pointer_type(
                        mica_ir::CallingConv::CDecl,
                        arg_types,
                        false,
                        return_types.first().copied(),
                    ))
                }
                other => Err(err(
                    ErrorCode::E3006,
                    span,
                    format!(
                        "expected an external procedure or callable, got {}",
                        comp.object_name(&other)
                    ),
                )),
            }
        }
        CallExternalCodePointer => {
            at_least(code, args, 1, span)?;
            let TypeData::CCodePointer {
                arg_types,
                has_var_args,
                return_type,
                ..
            } = comp.types.data(args.values[0].ty)
            else {
                return Err(err(
                    ErrorCode::E3001,
                    span,
                    "expected an external code pointer",
                ));
            };
            let given = args.len() - 1;
            let ok = if has_var_args {
                given >= arg_types.len()
            } else {
                given == arg_types.len()
            };
            if !ok {
                return Err(err(
                    ErrorCode::E3002,
                    span,
                    format!("expected {} argument(s), got {given}", arg_types.len()),
                ));
            }
            match return_type {
                Some(ty) => rvalue(ty),
                None => empty(),
            }
        }

        // -- arrays --
        ArrayRef => {
            arity(code, args, 2, span)?;
            let TypeData::Array { elem, .. } = comp.types.data(args.values[0].ty) else {
                return Err(err(
                    ErrorCode::E3001,
                    span,
                    format!("expected an array, got {}", comp.type_name(args.values[0].ty)),
                ));
            };
            check_integer(comp, args.values[1].ty, span)?;
            lvalue_ref(elem)
        }
        ArrayElements => {
            arity(code, args, 1, span)?;
            let TypeData::Array { elem, size } = comp.types.data(args.values[0].ty) else {
                return Err(err(ErrorCode::E3001, span, "expected an array"));
            };
            lvalue_refs((0..size).map(|_| elem))
        }

        // -- tuples --
        TupleElementCount => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let TypeData::Tuple(elems) = comp.types.data(ty) else {
                return Err(err(ErrorCode::E3001, span, "expected a tuple type"));
            };
            static_size(comp, elems.len() as u64)
        }
        TupleRef => {
            arity(code, args, 2, span)?;
            let TypeData::Tuple(elems) = comp.types.data(args.values[0].ty) else {
                return Err(err(ErrorCode::E3001, span, "expected a tuple"));
            };
            let index = static_index_arg(comp, args, 1, span)?;
            let elem = *elems.get(index).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("tuple index {index} out of range"))
            })?;
            lvalue_ref(elem)
        }
        TupleElements => {
            arity(code, args, 1, span)?;
            let TypeData::Tuple(elems) = comp.types.data(args.values[0].ty) else {
                return Err(err(ErrorCode::E3001, span, "expected a tuple"));
            };
            lvalue_refs(elems.iter().copied())
        }

        // -- unions --
        UnionMemberCount => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let TypeData::Union(members) = comp.types.data(ty) else {
                return Err(err(ErrorCode::E3001, span, "expected a union type"));
            };
            static_size(comp, members.len() as u64)
        }

        // -- records --
        RecordP => {
            arity(code, args, 1, span)?;
            let is_record = match static_arg(comp, args, 0, span) {
                Ok(Object::Type(t)) => matches!(comp.types.data(t), TypeData::Record { .. }),
                _ => false,
            };
            static_bool(comp, is_record)
        }
        RecordFieldCount => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let fields = comp.record_fields(ty)?;
            static_size(comp, fields.field_count() as u64)
        }
        RecordFieldName => {
            arity(code, args, 2, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let index = static_index_arg(comp, args, 1, span)?;
            let fields = comp.record_fields(ty)?;
            let name = *fields.names.get(index).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("field index {index} out of range"))
            })?;
            static_result(comp, Object::Ident(name))
        }
        RecordWithFieldP => {
            arity(code, args, 2, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let name = static_ident_arg(comp, args, 1, span)?;
            let fields = comp.record_fields(ty)?;
            static_bool(comp, fields.index_map.contains_key(&name))
        }
        RecordFieldRef => {
            arity(code, args, 2, span)?;
            let fields = comp.record_fields(args.values[0].ty)?;
            let index = static_index_arg(comp, args, 1, span)?;
            let field = *fields.types.get(index).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("field index {index} out of range"))
            })?;
            lvalue_ref(field)
        }
        RecordFieldRefByName => {
            arity(code, args, 2, span)?;
            let name = static_ident_arg(comp, args, 1, span)?;
            let index = comp.record_field_index(args.values[0].ty, name, span)?;
            let fields = comp.record_fields(args.values[0].ty)?;
            lvalue_ref(fields.types[index])
        }
        RecordFields => {
            arity(code, args, 1, span)?;
            let fields = comp.record_fields(args.values[0].ty)?;
            lvalue_refs(fields.types.iter().copied())
        }
        RecordVariadicField => {
            arity(code, args, 1, span)?;
            let fields = comp.record_fields(args.values[0].ty)?;
            let Some(position) = fields.var_field_position else {
                return Err(err(ErrorCode::E3001, span, "record has no variadic field"));
            };
            let group = &fields.types[position..position + fields.var_field_len];
            lvalue_refs(group.iter().copied())
        }

        // -- variants --
        VariantP => {
            arity(code, args, 1, span)?;
            let is_variant = match static_arg(comp, args, 0, span) {
                Ok(Object::Type(t)) => matches!(comp.types.data(t), TypeData::Variant { .. }),
                _ => false,
            };
            static_bool(comp, is_variant)
        }
        VariantMemberIndex => {
            arity(code, args, 2, span)?;
            let variant = static_type_arg(comp, args, 0, span)?;
            let member = static_type_arg(comp, args, 1, span)?;
            let index = comp.variant_member_index(variant, member, span)?;
            static_size(comp, index as u64)
        }
        VariantMemberCount => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            static_size(comp, comp.variant_members(ty)?.len() as u64)
        }
        VariantMembers => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let members = comp.variant_members(ty)?;
            let mut out = MultiPValue::new();
            for &member in members.iter() {
                out.push(PValue::rvalue(ts.static_type(Object::Type(member))));
            }
            Ok(Some(out))
        }

        // -- new-types --
        BaseType => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let repr = comp.newtype_repr(ty)?;
            static_result(comp, Object::Type(repr))
        }

        // -- statics and modules --
        StaticName => {
            arity(code, args, 1, span)?;
            let obj = static_arg(comp, args, 0, span)?;
            let name = comp.name(&comp.object_name(&obj));
            static_result(comp, Object::Ident(name))
        }
        MainModule => {
            arity(code, args, 0, span)?;
            let module = comp.main_module().ok_or_else(|| {
                err(ErrorCode::E3006, span, "no main module installed")
            })?;
            static_result(comp, Object::Module(module))
        }
        StaticModule => {
            arity(code, args, 1, span)?;
            let obj = static_arg(comp, args, 0, span)?;
            let module = decl_module(&obj).ok_or_else(|| {
                err(
                    ErrorCode::E3006,
                    span,
                    format!("{} has no defining module", comp.object_name(&obj)),
                )
            })?;
            static_result(comp, Object::Module(module))
        }
        ModuleName => {
            arity(code, args, 1, span)?;
            let Object::Module(module) = static_arg(comp, args, 0, span)? else {
                return Err(err(ErrorCode::E3006, span, "expected a module"));
            };
            static_result(comp, Object::Ident(module.name))
        }
        ModuleMemberNames => {
            arity(code, args, 1, span)?;
            let Object::Module(module) = static_arg(comp, args, 0, span)? else {
                return Err(err(ErrorCode::E3006, span, "expected a module"));
            };
            let mut names: Vec<Name> = module.items.borrow().keys().copied().collect();
            names.sort_by_key(|n| comp.str(*n));
            let mut out = MultiPValue::new();
            for name in names {
                out.push(PValue::rvalue(ts.static_type(Object::Ident(name))));
            }
            Ok(Some(out))
        }
        StaticIntegers => {
            arity(code, args, 1, span)?;
            let n = static_index_arg(comp, args, 0, span)?;
            let mut out = MultiPValue::new();
            for i in 0..n {
                let holder = comp.int_holder(ts.int32_type, i as i128);
                out.push(PValue::rvalue(ts.static_type(Object::Holder(holder))));
            }
            Ok(Some(out))
        }
        Integers => {
            arity(code, args, 1, span)?;
            let n = static_index_arg(comp, args, 0, span)?;
            Ok(Some(MultiPValue::from_values(
                (0..n).map(|_| PValue::rvalue(ts.int32_type)),
            )))
        }
        StaticFieldRef => {
            arity(code, args, 2, span)?;
            let Object::Module(module) = static_arg(comp, args, 0, span)? else {
                return Err(err(ErrorCode::E3006, span, "expected a module"));
            };
            let name = static_ident_arg(comp, args, 1, span)?;
            let env = crate::env::Env::module_root(module);
            let obj = env.lookup(name).ok_or_else(|| {
                err(
                    ErrorCode::E3008,
                    span,
                    format!("module has no member {}", comp.str(name)),
                )
            })?;
            crate::analyzer::analyze_static_object(comp, &obj, span)
        }

        // -- enums --
        EnumP => {
            arity(code, args, 1, span)?;
            let is_enum = match static_arg(comp, args, 0, span) {
                Ok(Object::Type(t)) => matches!(comp.types.data(t), TypeData::Enum(_)),
                _ => false,
            };
            static_bool(comp, is_enum)
        }
        EnumMemberCount => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            static_size(comp, comp.enum_member_count(ty) as u64)
        }
        EnumMemberName => {
            arity(code, args, 2, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let index = static_index_arg(comp, args, 1, span)?;
            let TypeData::Enum(decl) = comp.types.data(ty) else {
                return Err(err(ErrorCode::E3001, span, "expected an enum type"));
            };
            let name = *decl.0.members.get(index).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("enum member {index} out of range"))
            })?;
            static_result(comp, Object::Ident(name))
        }
        EnumToInt => {
            arity(code, args, 1, span)?;
            let TypeData::Enum(_) = comp.types.data(args.values[0].ty) else {
                return Err(err(ErrorCode::E3001, span, "expected an enum value"));
            };
            rvalue(ts.int32_type)
        }
        IntToEnum => {
            arity(code, args, 2, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let TypeData::Enum(_) = comp.types.data(ty) else {
                return Err(err(ErrorCode::E3001, span, "expected an enum type"));
            };
            check_integer(comp, args.values[1].ty, span)?;
            rvalue(ty)
        }

        // -- string literals --
        StringLiteralP => {
            arity(code, args, 1, span)?;
            let is_ident = matches!(static_arg(comp, args, 0, span), Ok(Object::Ident(_)));
            static_bool(comp, is_ident)
        }
        StringLiteralByteIndex => {
            arity(code, args, 2, span)?;
            let name = static_ident_arg(comp, args, 0, span)?;
            let index = static_index_arg(comp, args, 1, span)?;
            let byte = *comp.str(name).as_bytes().get(index).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("byte index {index} out of range"))
            })?;
            static_result(
                comp,
                Object::Holder(comp.int_holder(ts.uint8_type, i128::from(byte))),
            )
        }
        StringLiteralBytes => {
            arity(code, args, 1, span)?;
            let name = static_ident_arg(comp, args, 0, span)?;
            let mut out = MultiPValue::new();
            for &byte in comp.str(name).as_bytes() {
                let holder = comp.int_holder(ts.uint8_type, i128::from(byte));
                out.push(PValue::rvalue(ts.static_type(Object::Holder(holder))));
            }
            Ok(Some(out))
        }
        StringLiteralByteSize => {
            arity(code, args, 1, span)?;
            let name = static_ident_arg(comp, args, 0, span)?;
            static_size(comp, comp.str(name).len() as u64)
        }
        StringLiteralByteSlice => {
            arity(code, args, 3, span)?;
            let name = static_ident_arg(comp, args, 0, span)?;
            let begin = static_index_arg(comp, args, 1, span)?;
            let end = static_index_arg(comp, args, 2, span)?;
            let text = comp.str(name);
            let slice = text.get(begin..end).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("slice {begin}..{end} out of range"))
            })?;
            static_result(comp, Object::Ident(comp.name(slice)))
        }
        StringLiteralConcat => {
            let mut text = String::new();
            for i in 0..args.len() {
                text.push_str(comp.str(static_ident_arg(comp, args, i, span)?));
            }
            static_result(comp, Object::Ident(comp.name(&text)))
        }
        StringLiteralFromBytes => {
            let mut bytes = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                let obj = static_arg(comp, args, i, span)?;
                bytes.push(u8::try_from(comp.static_u32(&obj, span)?).map_err(|_| {
                    err(ErrorCode::E1002, span, "byte value out of range")
                })?);
            }
            let text = String::from_utf8(bytes)
                .map_err(|_| err(ErrorCode::E1001, span, "bytes are not valid UTF-8"))?;
            static_result(comp, Object::Ident(comp.name(&text)))
        }

        // -- atomic orderings and RMW selectors: statics naming themselves --
        OrderUnordered | OrderMonotonic | OrderAcquire | OrderRelease | OrderAcqRel
        | OrderSeqCst | RMWXchg | RMWAdd | RMWSubtract | RMWAnd | RMWNAnd | RMWOr | RMWXor
        | RMWMin | RMWMax | RMWUMin | RMWUMax => Err(err(
            ErrorCode::E3003,
            span,
            format!("{} is a selector, not a callable", code.name()),
        )),

        // -- atomics --
        AtomicFence => {
            arity(code, args, 1, span)?;
            ordering_selector(comp, args, 0, span)?;
            empty()
        }
        AtomicRMW => {
            arity(code, args, 4, span)?;
            ordering_selector(comp, args, 0, span)?;
            rmw_selector(comp, args, 1, span)?;
            let p = pointee(comp, args.values[2].ty, span)?;
            check_same_type(comp, p, args.values[3].ty, span)?;
            rvalue(p)
        }
        AtomicLoad => {
            arity(code, args, 2, span)?;
            ordering_selector(comp, args, 0, span)?;
            let p = pointee(comp, args.values[1].ty, span)?;
            rvalue(p)
        }
        AtomicStore => {
            arity(code, args, 3, span)?;
            ordering_selector(comp, args, 0, span)?;
            let p = pointee(comp, args.values[1].ty, span)?;
            check_same_type(comp, p, args.values[2].ty, span)?;
            empty()
        }
        AtomicCompareExchange => {
            arity(code, args, 4, span)?;
            ordering_selector(comp, args, 0, span)?;
            let p = pointee(comp, args.values[1].ty, span)?;
            check_same_type(comp, p, args.values[2].ty, span)?;
            check_same_type(comp, p, args.values[3].ty, span)?;
            rvalue(p)
        }

        // -- exceptions --
        ActiveException => {
            arity(code, args, 0, span)?;
            rvalue(ts.pointer_type(ts.int8_type))
        }

        // -- memory movement --
        Memcpy | Memmove => {
            arity(code, args, 3, span)?;
            pointee(comp, args.values[0].ty, span)?;
            pointee(comp, args.values[1].ty, span)?;
            check_integer(comp, args.values[2].ty, span)?;
            empty()
        }

        // -- value packs --
        CountValues => static_size(comp, args.len() as u64),
        NthValue => {
            at_least(code, args, 1, span)?;
            let index = static_index_arg(comp, args, 0, span)?;
            let rest = &args.values[1..];
            let pv = *rest.get(index).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("value index {index} out of range"))
            })?;
            Ok(Some(MultiPValue::one(pv)))
        }
        WithoutNthValue => {
            at_least(code, args, 1, span)?;
            let index = static_index_arg(comp, args, 0, span)?;
            let rest = &args.values[1..];
            if index >= rest.len() {
                return Err(err(ErrorCode::E3002, span, format!("value index {index} out of range")));
            }
            Ok(Some(MultiPValue::from_values(
                rest.iter()
                    .enumerate()
                    .filter(|&(i, _)| i != index)
                    .map(|(_, pv)| *pv),
            )))
        }
        TakeValues => {
            at_least(code, args, 1, span)?;
            let n = static_index_arg(comp, args, 0, span)?;
            let rest = &args.values[1..];
            let n = n.min(rest.len());
            Ok(Some(MultiPValue::from_values(rest[..n].iter().copied())))
        }
        DropValues => {
            at_least(code, args, 1, span)?;
            let n = static_index_arg(comp, args, 0, span)?;
            let rest = &args.values[1..];
            let n = n.min(rest.len());
            Ok(Some(MultiPValue::from_values(rest[n..].iter().copied())))
        }

        // -- hints --
        UsuallyEquals => {
            arity(code, args, 2, span)?;
            check_integer(comp, args.values[0].ty, span)?;
            static_arg(comp, args, 1, span)?;
            rvalue(args.values[0].ty)
        }

        // -- prelude operator defaults --
        TupleLiteral => {
            let ty = ts.tuple_type(args.values.iter().map(|pv| pv.ty).collect());
            rvalue(ty)
        }
        Index => {
            arity(code, args, 2, span)?;
            match comp.types.data(args.values[0].ty) {
                TypeData::Array { elem, .. } | TypeData::Vec { elem, .. } => {
                    check_integer(comp, args.values[1].ty, span)?;
                    lvalue_ref(elem)
                }
                _ => Err(err(
                    ErrorCode::E3005,
                    span,
                    format!("{} is not indexable", comp.type_name(args.values[0].ty)),
                )),
            }
        }
        Call => Err(err(ErrorCode::E3003, span, "value is not callable")),
        FieldRefOp => {
            arity(code, args, 2, span)?;
            let name = static_ident_arg(comp, args, 1, span)?;
            match comp.types.data(args.values[0].ty) {
                TypeData::Record { .. } => {
                    let index = comp.record_field_index(args.values[0].ty, name, span)?;
                    let fields = comp.record_fields(args.values[0].ty)?;
                    lvalue_ref(fields.types[index])
                }
                _ => Err(err(
                    ErrorCode::E3005,
                    span,
                    format!("{} has no fields", comp.type_name(args.values[0].ty)),
                )),
            }
        }
        Destroy => {
            arity(code, args, 1, span)?;
            empty()
        }
        Copy | Move => {
            arity(code, args, 1, span)?;
            rvalue(args.values[0].ty)
        }
        Assign => {
            arity(code, args, 2, span)?;
            if args.values[0].is_temp {
                return Err(err(ErrorCode::E3011, span, "cannot assign to a temporary"));
            }
            check_same_type(comp, args.values[0].ty, args.values[1].ty, span)?;
            empty()
        }
        UpdateAssign | PrefixUpdateAssign => {
            at_least(code, args, 2, span)?;
            let op = static_arg(comp, args, 0, span)?;
            let operands = MultiPValue::from_values(args.values[1..].iter().copied());
            let result = analyze_call_object(comp, &op, &operands, span)?;
            let Some(result) = result else {
                return Ok(None);
            };
            if result.len() != 1 || result.values[0].ty != args.values[1].ty {
                return Err(err(
                    ErrorCode::E3001,
                    span,
                    "update operation must produce one value of the destination type",
                ));
            }
            empty()
        }
        IndexAssign => {
            arity(code, args, 3, span)?;
            let elem_args = MultiPValue::from_values(args.values[..2].iter().copied());
            let elem = analyze_prim_op(comp, Index, &elem_args, span)?;
            let Some(elem) = elem else { return Ok(None) };
            check_same_type(comp, elem.values[0].ty, args.values[2].ty, span)?;
            empty()
        }
        StaticIndexAssign => {
            arity(code, args, 3, span)?;
            let elem_args = MultiPValue::from_values(args.values[..2].iter().copied());
            let elem = analyze_prim_op(comp, TupleRef, &elem_args, span)?;
            let Some(elem) = elem else { return Ok(None) };
            check_same_type(comp, elem.values[0].ty, args.values[2].ty, span)?;
            empty()
        }
        FieldRefAssign => {
            arity(code, args, 3, span)?;
            let elem_args = MultiPValue::from_values(args.values[..2].iter().copied());
            let elem = analyze_prim_op(comp, FieldRefOp, &elem_args, span)?;
            let Some(elem) = elem else { return Ok(None) };
            check_same_type(comp, elem.values[0].ty, args.values[2].ty, span)?;
            empty()
        }
        IndexUpdateAssign | StaticIndexUpdateAssign | FieldRefUpdateAssign => {
            at_least(code, args, 3, span)?;
            let ref_code = match code {
                IndexUpdateAssign => Index,
                StaticIndexUpdateAssign => TupleRef,
                _ => FieldRefOp,
            };
            let elem_args = MultiPValue::from_values(args.values[1..3].iter().copied());
            let elem = analyze_prim_op(comp, ref_code, &elem_args, span)?;
            let Some(elem) = elem else { return Ok(None) };
            let op = static_arg(comp, args, 0, span)?;
            let mut operands = MultiPValue::one(elem.values[0]);
            operands.extend(&MultiPValue::from_values(args.values[3..].iter().copied()));
            if analyze_call_object(comp, &op, &operands, span)?.is_none() {
                return Ok(None);
            }
            empty()
        }
        ThrowValue => {
            at_least(code, args, 1, span)?;
            empty()
        }
        DispatchTag => {
            arity(code, args, 1, span)?;
            comp.variant_members(args.values[0].ty)?;
            rvalue(ts.c_int_type)
        }
        DispatchIndex => {
            arity(code, args, 2, span)?;
            let index = static_index_arg(comp, args, 1, span)?;
            let members = comp.variant_members(args.values[0].ty)?;
            let member = *members.get(index).ok_or_else(|| {
                err(ErrorCode::E3002, span, format!("dispatch index {index} out of range"))
            })?;
            with_base_tempness(member, args.values[0])
        }
        DispatchTagCount => {
            // Builtin default: one tag per variant member. (Computed directly
            // so a non-matching user overload cannot re-enter this table.)
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let count = comp.variant_members(ty)?.len();
            static_result(
                comp,
                Object::Holder(comp.c_int_holder(i32::try_from(count).unwrap_or(i32::MAX))),
            )
        }
        InvalidDispatch => {
            arity(code, args, 1, span)?;
            empty()
        }
        VariantReprType => {
            arity(code, args, 1, span)?;
            let ty = static_type_arg(comp, args, 0, span)?;
            let repr = comp.variant_repr_type(ty)?;
            static_result(comp, Object::Type(repr))
        }
        CallMain => {
            arity(code, args, 3, span)?;
            let callable = static_arg(comp, args, 0, span)?;
            let (args_key, temp_key) = compute_args_key(&MultiPValue::new());
            safe_analyze_callable(comp, &callable, &args_key, &temp_key)?;
            rvalue(ts.c_int_type)
        }
        ExceptionInInitializer | ExceptionInFinalizer => {
            arity(code, args, 0, span)?;
            empty()
        }

        // Type constructors are applied with indexing, not calls.
        PointerT | CodePointerT | ExternalCodePointerT | ArrayT | VecT | TupleT | UnionT
        | StaticT | RecordWithPropertiesT => Err(err(
            ErrorCode::E3003,
            span,
            format!("{} is applied with [] indexing, not a call", code.name()),
        )),
    }
}

/// An atomic ordering selector passed as a static argument.
pub fn ordering_selector(
    comp: &Compilation,
    args: &MultiPValue,
    i: usize,
    span: Span,
) -> SemaResult<mica_backend::MemoryOrdering> {
    use mica_backend::MemoryOrdering as MO;
    match static_arg(comp, args, i, span)? {
        Object::PrimOp(PrimOpCode::OrderUnordered) => Ok(MO::Unordered),
        Object::PrimOp(PrimOpCode::OrderMonotonic) => Ok(MO::Monotonic),
        Object::PrimOp(PrimOpCode::OrderAcquire) => Ok(MO::Acquire),
        Object::PrimOp(PrimOpCode::OrderRelease) => Ok(MO::Release),
        Object::PrimOp(PrimOpCode::OrderAcqRel) => Ok(MO::AcqRel),
        Object::PrimOp(PrimOpCode::OrderSeqCst) => Ok(MO::SeqCst),
        other => Err(err(
            ErrorCode::E3006,
            span,
            format!("expected a memory ordering, got {}", comp.object_name(&other)),
        )),
    }
}

/// An atomic read-modify-write selector passed as a static argument.
pub fn rmw_selector(
    comp: &Compilation,
    args: &MultiPValue,
    i: usize,
    span: Span,
) -> SemaResult<mica_backend::RmwOp> {
    use mica_backend::RmwOp;
    match static_arg(comp, args, i, span)? {
        Object::PrimOp(PrimOpCode::RMWXchg) => Ok(RmwOp::Xchg),
        Object::PrimOp(PrimOpCode::RMWAdd) => Ok(RmwOp::Add),
        Object::PrimOp(PrimOpCode::RMWSubtract) => Ok(RmwOp::Sub),
        Object::PrimOp(PrimOpCode::RMWAnd) => Ok(RmwOp::And),
        Object::PrimOp(PrimOpCode::RMWNAnd) => Ok(RmwOp::Nand),
        Object::PrimOp(PrimOpCode::RMWOr) => Ok(RmwOp::Or),
        Object::PrimOp(PrimOpCode::RMWXor) => Ok(RmwOp::Xor),
        Object::PrimOp(PrimOpCode::RMWMin) => Ok(RmwOp::Min),
        Object::PrimOp(PrimOpCode::RMWMax) => Ok(RmwOp::Max),
        Object::PrimOp(PrimOpCode::RMWUMin) => Ok(RmwOp::UMin),
        Object::PrimOp(PrimOpCode::RMWUMax) => Ok(RmwOp::UMax),
        other => Err(err(
            ErrorCode::E3006,
            span,
            format!("expected an RMW selector, got {}", comp.object_name(&other)),
        )),
    }
}

/// Extract the static object of argument `i`; shared with the lowering
/// driver's prim-op table.
pub fn prim_static_arg(
    comp: &Compilation,
    args: &MultiPValue,
    i: usize,
    span: Span,
) -> SemaResult<Object> {
    static_arg(comp, args, i, span)
}

fn decl_module(obj: &Object) -> Option<Rc<mica_ir::Module>> {
    match obj {
        Object::Record(decl) => decl.module.borrow().clone(),
        Object::Variant(decl) => decl.module.borrow().clone(),
        Object::Enum(decl) => decl.module.borrow().clone(),
        Object::NewType(decl) => decl.module.borrow().clone(),
        Object::Global(decl) => decl.module.borrow().clone(),
        Object::Alias(decl) => decl.module.borrow().clone(),
        Object::External(decl) => decl.module.borrow().clone(),
        Object::Module(module) => Some(module.clone()),
        _ => None,
    }
}
