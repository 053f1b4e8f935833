//! Lowering of the primitive operations.
//!
//! Mirrors the analysis table in `mica_types::analyze_prim_op`: static
//! results emit nothing (their storage is a token byte), element references
//! store a pointer into the aggregate, and the algebra loads operands, emits
//! one instruction, and stores the result.

use mica_backend::{BType, BinOp, Callee, CastOp, FloatPredicate, IntPredicate, ValueId};
use mica_diagnostic::ErrorCode;
use mica_ir::{PrimOpCode, Span, TypeId};
use mica_types::{
    analyze_prim_op, ordering_selector, prim_static_arg, rmw_selector, CValue, MultiCValue,
    MultiPValue, Object, SemaError, SemaResult, TypeData,
};

use crate::context::FnCx;

impl FnCx<'_> {
    fn load_value(&self, cv: CValue) -> SemaResult<ValueId> {
        let bty = self.comp().backend_type(cv.ty)?;
        Ok(self.bx.load(bty, cv.ptr))
    }

    fn store_result(&self, value: ValueId, out: &MultiCValue) {
        self.bx.store(value, out.values[0].ptr);
    }

    /// Store a pointer into the lvalue out-slot.
    fn store_ref(&self, ptr: ValueId, out: CValue) {
        self.bx.store(ptr, out.ptr);
    }

    fn signed_int(&self, ty: TypeId) -> bool {
        matches!(self.comp().types.data(ty), TypeData::Integer { signed: true, .. })
    }

    fn is_float(&self, ty: TypeId) -> bool {
        matches!(self.comp().types.data(ty), TypeData::Float { .. })
    }

    /// Emit one primitive operation.
    pub fn lower_prim_op(
        &self,
        code: PrimOpCode,
        args: &MultiCValue,
        pv_args: &MultiPValue,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        use PrimOpCode::*;
        let comp = self.comp();

        // Re-run the analysis table: it validates the arguments and tells us
        // which ops are static-only (no emission).
        let analyzed = analyze_prim_op(comp, code, pv_args, span)?.ok_or_else(|| {
            SemaError::new(ErrorCode::E3007, span, "unresolved recursion in primitive")
        })?;
        debug_assert_eq!(analyzed.len(), out.len());

        match code {
            // Static-only results: storage exists, nothing to emit.
            TypeP | TypeSize | TypeAlignment | TupleElementCount | UnionMemberCount | RecordP
            | RecordFieldCount | RecordFieldName | RecordWithFieldP | VariantP
            | VariantMemberIndex | VariantMemberCount | VariantMembers | BaseType | StaticName
            | MainModule | StaticModule | ModuleName | ModuleMemberNames | StaticIntegers
            | EnumP | EnumMemberCount | EnumMemberName | StringLiteralP
            | StringLiteralByteIndex | StringLiteralBytes | StringLiteralByteSize
            | StringLiteralByteSlice | StringLiteralConcat | StringLiteralFromBytes
            | CountValues | DispatchTagCount | VariantReprType => Ok(()),

            StaticFieldRef => {
                // The member may be value-shaped (a global); forward it.
                let obj = prim_static_arg(comp, pv_args, 0, span)?;
                let Object::Module(module) = obj else {
                    return Ok(());
                };
                let name = match prim_static_arg(comp, pv_args, 1, span)? {
                    Object::Ident(name) => name,
                    _ => return Ok(()),
                };
                let env = mica_types::Env::module_root(module);
                let member = env.lookup(name).unwrap_or_else(|| panic!("member vanished"));
                self.lower_static_object(&member, out, &analyzed, span)
            }

            Bitcopy => {
                let value = self.load_value(args.values[1])?;
                self.bx.store(value, args.values[0].ptr);
                Ok(())
            }
            Bitcast => {
                // Reinterpret the source storage at the destination type.
                self.store_ref(args.values[1].ptr, out.values[0]);
                Ok(())
            }

            BoolNot => {
                let value = self.load_value(args.values[0])?;
                let zero = self.bx.const_bool(false);
                let flag = self.bx.icmp(IntPredicate::Eq, value, zero);
                self.store_result(flag, out);
                Ok(())
            }

            IntegerEqualsP | IntegerLesserP => {
                let lhs = self.load_value(args.values[0])?;
                let rhs = self.load_value(args.values[1])?;
                let signed = self.signed_int(args.values[0].ty);
                let pred = match code {
                    IntegerEqualsP => IntPredicate::Eq,
                    _ if signed => IntPredicate::SLt,
                    _ => IntPredicate::ULt,
                };
                let flag = self.bx.icmp(pred, lhs, rhs);
                self.store_result(flag, out);
                Ok(())
            }

            FloatOrderedEqualsP | FloatOrderedLesserP | FloatOrderedLesserEqualsP
            | FloatOrderedGreaterP | FloatOrderedGreaterEqualsP | FloatOrderedNotEqualsP
            | FloatOrderedP | FloatUnorderedEqualsP | FloatUnorderedLesserP
            | FloatUnorderedLesserEqualsP | FloatUnorderedGreaterP
            | FloatUnorderedGreaterEqualsP | FloatUnorderedNotEqualsP | FloatUnorderedP => {
                let lhs = self.load_value(args.values[0])?;
                let rhs = self.load_value(args.values[1])?;
                let pred = float_predicate(code);
                let flag = self.bx.fcmp(pred, lhs, rhs);
                self.store_result(flag, out);
                Ok(())
            }

            NumericAdd | NumericSubtract | NumericMultiply | FloatDivide | IntegerQuotient
            | IntegerRemainder | IntegerShiftLeft | IntegerShiftRight | IntegerBitwiseAnd
            | IntegerBitwiseOr | IntegerBitwiseXor => {
                let ty = args.values[0].ty;
                let lhs = self.load_value(args.values[0])?;
                let rhs = self.load_value(args.values[1])?;
                let op = binop_for(code, self.is_float(ty), self.signed_int(ty));
                let result = self.bx.binop(op, lhs, rhs);
                self.store_result(result, out);
                Ok(())
            }
            NumericNegate => {
                let ty = args.values[0].ty;
                let value = self.load_value(args.values[0])?;
                let result = if self.is_float(ty) {
                    self.bx.fneg(value)
                } else {
                    let bty = comp.backend_type(ty)?;
                    let zero = self.bx.const_int(bty, 0);
                    self.bx.binop(BinOp::Sub, zero, value)
                };
                self.store_result(result, out);
                Ok(())
            }
            IntegerBitwiseNot => {
                let ty = args.values[0].ty;
                let value = self.load_value(args.values[0])?;
                let bty = comp.backend_type(ty)?;
                let ones = self.bx.const_int(bty, -1);
                let result = self.bx.binop(BinOp::Xor, value, ones);
                self.store_result(result, out);
                Ok(())
            }
            NumericConvert => {
                let dest_ty = analyzed.values[0].ty;
                let converted = self.emit_numeric_convert(dest_ty, args.values[1])?;
                self.store_result(converted, out);
                Ok(())
            }

            IntegerAddChecked | IntegerSubtractChecked | IntegerMultiplyChecked
            | IntegerQuotientChecked | IntegerRemainderChecked | IntegerShiftLeftChecked
            | IntegerNegateChecked | IntegerConvertChecked => {
                let name = comp.name(code.name());
                match comp.operator_by_name(name) {
                    Some(Object::Proc(proc)) => self.lower_call_object(
                        &Object::Proc(proc),
                        args,
                        pv_args,
                        out,
                        span,
                    ),
                    _ => Err(SemaError::new(
                        ErrorCode::E3005,
                        span,
                        format!("{} requires a library procedure", code.name()),
                    )),
                }
            }

            AddressOf => {
                self.store_result(args.values[0].ptr, out);
                Ok(())
            }
            PointerDereference => {
                let loaded = self.bx.load(BType::Ptr, args.values[0].ptr);
                self.store_ref(loaded, out.values[0]);
                Ok(())
            }
            PointerOffset => {
                let TypeData::Pointer(pointee) = comp.types.data(args.values[0].ty) else {
                    panic!("pointer expected");
                };
                let base = self.bx.load(BType::Ptr, args.values[0].ptr);
                let offset = self.load_value(args.values[1])?;
                let elem_bty = comp.backend_type(pointee)?;
                let result = self.bx.gep(elem_bty, base, vec![offset]);
                self.store_result(result, out);
                Ok(())
            }
            PointerToInt => {
                let dest_bty = comp.backend_type(analyzed.values[0].ty)?;
                let ptr = self.bx.load(BType::Ptr, args.values[1].ptr);
                let result = self.bx.cast(CastOp::PtrToInt, ptr, dest_bty);
                self.store_result(result, out);
                Ok(())
            }
            IntToPointer => {
                let value = self.load_value(args.values[1])?;
                let result = self.bx.cast(CastOp::IntToPtr, value, BType::Ptr);
                self.store_result(result, out);
                Ok(())
            }
            NullPointer => {
                let null = self.bx.const_null();
                self.store_result(null, out);
                Ok(())
            }

            MakeCodePointer => {
                let callable = prim_static_arg(comp, pv_args, 0, span)?;
                let arg_types: Vec<TypeId> = pv_args.values[1..]
                    .iter()
                    .map(|pv| {
                        mica_types::unwrap_static_type(comp, pv.ty)
                            .and_then(|obj| comp.static_object_as_type(&obj, span).ok())
                            .unwrap_or_else(|| panic!("non-static code pointer argument"))
                    })
                    .collect();
                let temp_key = vec![mica_ir::Tempness::Lvalue; arg_types.len()];
                let entry = mica_types::invoke::safe_analyze_callable(
                    comp,
                    &callable,
                    &arg_types,
                    &temp_key,
                )?;
                let func = match entry.lowered_fn.get() {
                    Some(func) => func,
                    None => crate::entry::lower_code_body(self.lx, &entry)?,
                };
                let fn_ref = self.bx.func_ref(func);
                self.store_result(fn_ref, out);
                Ok(())
            }
            MakeExternalCodePointer => {
                let func = match prim_static_arg(comp, pv_args, 0, span)? {
                    Object::External(ext) => self.lx.lower_external_procedure(&ext, false)?,
                    callable => {
                        // A regular callable gets a C wrapper.
                        let arg_types: Vec<TypeId> = pv_args.values[1..]
                            .iter()
                            .map(|pv| {
                                mica_types::unwrap_static_type(comp, pv.ty)
                                    .and_then(|obj| comp.static_object_as_type(&obj, span).ok())
                                    .unwrap_or_else(|| panic!("non-static wrapper argument"))
                            })
                            .collect();
                        let temp_key = vec![mica_ir::Tempness::Lvalue; arg_types.len()];
                        let entry = mica_types::invoke::safe_analyze_callable(
                            comp,
                            &callable,
                            &arg_types,
                            &temp_key,
                        )?;
                        self.lower_c_wrapper(&entry, mica_ir::CallingConv::CDecl)?
                    }
                };
                let fn_ref = self.bx.func_ref(func);
                self.store_result(fn_ref, out);
                Ok(())
            }
            CallExternalCodePointer => {
                let callee = args.values[0];
                let rest = MultiCValue::from_slice(&args.values[1..]);
                self.lower_c_call(callee, &rest, out, span)
            }

            ArrayRef => {
                assert!(
                    matches!(
                        comp.types.data(args.values[0].ty),
                        TypeData::Array { .. } | TypeData::Vec { .. }
                    ),
                    "array expected"
                );
                let index = self.index_value(args.values[1])?;
                let array_bty = comp.backend_type(args.values[0].ty)?;
                let zero = self.bx.const_int(BType::I32, 0);
                let ptr = self.bx.gep(array_bty, args.values[0].ptr, vec![zero, index]);
                self.store_ref(ptr, out.values[0]);
                Ok(())
            }
            ArrayElements => {
                let TypeData::Array { size, .. } = comp.types.data(args.values[0].ty) else {
                    panic!("array expected");
                };
                let array_bty = comp.backend_type(args.values[0].ty)?;
                for i in 0..size {
                    let zero = self.bx.const_int(BType::I32, 0);
                    let index = self.bx.const_int(BType::I32, i128::from(i));
                    let ptr = self.bx.gep(
                        array_bty.clone(),
                        args.values[0].ptr,
                        vec![zero, index],
                    );
                    self.store_ref(ptr, out.values[i as usize]);
                }
                Ok(())
            }

            TupleRef => {
                let index = static_index(comp, pv_args, 1, span)?;
                let element = self.tuple_element_ref(args.values[0], index, span)?;
                self.store_ref(element.ptr, out.values[0]);
                Ok(())
            }
            TupleElements => {
                let TypeData::Tuple(elems) = comp.types.data(args.values[0].ty) else {
                    panic!("tuple expected");
                };
                for i in 0..elems.len() {
                    let element = self.tuple_element_ref(args.values[0], i, span)?;
                    self.store_ref(element.ptr, out.values[i]);
                }
                Ok(())
            }

            RecordFieldRef | RecordFieldRefByName => {
                let fields = comp.record_fields(args.values[0].ty)?;
                let index = if code == RecordFieldRef {
                    static_index(comp, pv_args, 1, span)?
                } else {
                    let Object::Ident(name) = prim_static_arg(comp, pv_args, 1, span)? else {
                        panic!("identifier expected");
                    };
                    comp.record_field_index(args.values[0].ty, name, span)?
                };
                let ptr = self.record_field_ptr(args.values[0], index)?;
                self.store_ref(ptr, out.values[0]);
                Ok(())
            }
            RecordFields => {
                let fields = comp.record_fields(args.values[0].ty)?;
                for i in 0..fields.types.len() {
                    let ptr = self.record_field_ptr(args.values[0], i)?;
                    self.store_ref(ptr, out.values[i]);
                }
                Ok(())
            }
            RecordVariadicField => {
                let fields = comp.record_fields(args.values[0].ty)?;
                let position = fields
                    .var_field_position
                    .unwrap_or_else(|| panic!("no variadic field"));
                for (slot, i) in (position..position + fields.var_field_len).enumerate() {
                    let ptr = self.record_field_ptr(args.values[0], i)?;
                    self.store_ref(ptr, out.values[slot]);
                }
                Ok(())
            }

            EnumToInt => {
                let value = self.load_value(args.values[0])?;
                self.store_result(value, out);
                Ok(())
            }
            IntToEnum => {
                let value = self.load_value(args.values[1])?;
                let dest_bty = comp.backend_type(analyzed.values[0].ty)?;
                let converted = self.cast_int(value, dest_bty, true);
                self.store_result(converted, out);
                Ok(())
            }

            Integers => {
                let bty = comp.backend_type(comp.types.int32_type)?;
                for (i, slot) in out.values.iter().enumerate() {
                    let value = self
                        .bx
                        .const_int(bty.clone(), i128::try_from(i).unwrap_or(0));
                    self.bx.store(value, slot.ptr);
                }
                Ok(())
            }

            AtomicFence => {
                let ordering = ordering_selector(comp, pv_args, 0, span)?;
                self.bx.fence(ordering);
                Ok(())
            }
            AtomicRMW => {
                let ordering = ordering_selector(comp, pv_args, 0, span)?;
                let op = rmw_selector(comp, pv_args, 1, span)?;
                let ptr = self.bx.load(BType::Ptr, args.values[2].ptr);
                let value = self.load_value(args.values[3])?;
                let old = self.bx.atomic_rmw(op, ptr, value, ordering);
                self.store_result(old, out);
                Ok(())
            }
            AtomicLoad => {
                let ordering = ordering_selector(comp, pv_args, 0, span)?;
                let ptr = self.bx.load(BType::Ptr, args.values[1].ptr);
                let bty = comp.backend_type(analyzed.values[0].ty)?;
                let value = self.bx.atomic_load(bty, ptr, ordering);
                self.store_result(value, out);
                Ok(())
            }
            AtomicStore => {
                let ordering = ordering_selector(comp, pv_args, 0, span)?;
                let ptr = self.bx.load(BType::Ptr, args.values[1].ptr);
                let value = self.load_value(args.values[2])?;
                self.bx.atomic_store(value, ptr, ordering);
                Ok(())
            }
            AtomicCompareExchange => {
                let ordering = ordering_selector(comp, pv_args, 0, span)?;
                let ptr = self.bx.load(BType::Ptr, args.values[1].ptr);
                let expected = self.load_value(args.values[2])?;
                let replacement = self.load_value(args.values[3])?;
                let pair = self
                    .bx
                    .atomic_cmpxchg(ptr, expected, replacement, ordering, ordering);
                // The old value is the first member of the result pair.
                let pair_ty = self.bx.value_ty(pair);
                let pair_slot = self.alloc_temp(&pair_ty);
                self.bx.store(pair, pair_slot);
                let old_ptr = self.bx.struct_gep(pair_ty, pair_slot, 0);
                let old_bty = comp.backend_type(analyzed.values[0].ty)?;
                let old = self.bx.load(old_bty, old_ptr);
                self.store_result(old, out);
                Ok(())
            }

            ActiveException => {
                let value = self.bx.load(BType::Ptr, self.exception_value);
                self.store_result(value, out);
                Ok(())
            }

            Memcpy | Memmove => {
                let dest = self.bx.load(BType::Ptr, args.values[0].ptr);
                let src = self.bx.load(BType::Ptr, args.values[1].ptr);
                let bytes = self.load_value(args.values[2])?;
                if code == Memcpy {
                    self.bx.memcpy(dest, src, bytes);
                } else {
                    self.bx.memmove(dest, src, bytes);
                }
                Ok(())
            }

            NthValue => {
                let index = static_index(comp, pv_args, 0, span)?;
                self.forward_value_to_slot(args.values[1 + index], pv_args.values[1 + index], out.values[0])
            }
            WithoutNthValue => {
                let skip = static_index(comp, pv_args, 0, span)?;
                let mut slot = 0usize;
                for (i, (cv, pv)) in args.values[1..]
                    .iter()
                    .zip(&pv_args.values[1..])
                    .enumerate()
                {
                    if i == skip {
                        continue;
                    }
                    self.forward_value_to_slot(*cv, *pv, out.values[slot])?;
                    slot += 1;
                }
                Ok(())
            }
            TakeValues | DropValues => {
                let n = static_index(comp, pv_args, 0, span)?;
                let rest = &args.values[1..];
                let rest_pvs = &pv_args.values[1..];
                let n = n.min(rest.len());
                let range = if code == TakeValues { 0..n } else { n..rest.len() };
                for (slot, i) in range.enumerate() {
                    self.forward_value_to_slot(rest[i], rest_pvs[i], out.values[slot])?;
                }
                Ok(())
            }

            UsuallyEquals => {
                let value = self.load_value(args.values[0])?;
                let expected_obj = prim_static_arg(comp, pv_args, 1, span)?;
                let Object::Holder(holder) = expected_obj else {
                    panic!("static expected value required");
                };
                let bty = comp.backend_type(args.values[0].ty)?;
                let expected = self.bx.const_int(bty, holder.as_i128(true));
                let hinted = self.bx.expect(value, expected);
                self.store_result(hinted, out);
                Ok(())
            }

            // -- prelude operator defaults --
            TupleLiteral => {
                let tuple_ty = analyzed.values[0].ty;
                let struct_ty = comp.backend_type(tuple_ty)?;
                let TypeData::Tuple(elems) = comp.types.data(tuple_ty) else {
                    panic!("tuple expected");
                };
                for (i, cv) in args.values.iter().enumerate() {
                    let field_ptr = self.bx.struct_gep(
                        struct_ty.clone(),
                        out.values[0].ptr,
                        u32::try_from(i).unwrap_or(u32::MAX),
                    );
                    self.value_copy(CValue::new(elems[i], field_ptr), *cv)?;
                }
                Ok(())
            }
            Index => {
                // Default indexing covers arrays and vectors.
                self.lower_prim_op(ArrayRef, args, pv_args, out, span)
            }
            Call => Err(SemaError::new(ErrorCode::E3003, span, "value is not callable")),
            FieldRefOp => {
                let Object::Ident(name) = prim_static_arg(comp, pv_args, 1, span)? else {
                    panic!("identifier expected");
                };
                let index = comp.record_field_index(args.values[0].ty, name, span)?;
                let ptr = self.record_field_ptr(args.values[0], index)?;
                self.store_ref(ptr, out.values[0]);
                Ok(())
            }
            Destroy | ExceptionInInitializer | ExceptionInFinalizer => Ok(()),
            Copy | Move => self.copy_bytes(out.values[0], args.values[0]),
            Assign => self.copy_bytes(args.values[0], args.values[1]),
            UpdateAssign | PrefixUpdateAssign => {
                // dest op= operands → dest = op(dest, operands…)
                let op = prim_static_arg(comp, pv_args, 0, span)?;
                let dest = args.values[0];
                let dest_pv = pv_args.values[0];
                let operand_values = MultiCValue::from_slice(&args.values[1..]);
                let operand_pvs = MultiPValue::from_values(pv_args.values[1..].iter().copied());
                let result = self.alloc_value(dest.ty)?;
                self.lower_call_object(
                    &op,
                    &operand_values,
                    &operand_pvs,
                    &MultiCValue::one(result),
                    span,
                )?;
                self.value_assign(
                    dest,
                    dest_pv,
                    result,
                    mica_types::PValue::rvalue(dest.ty),
                )
            }
            IndexAssign | StaticIndexAssign | FieldRefAssign => {
                let ref_code = match code {
                    IndexAssign => Index,
                    StaticIndexAssign => TupleRef,
                    _ => FieldRefOp,
                };
                let elem_args = MultiCValue::from_slice(&args.values[..2]);
                let elem_pvs = MultiPValue::from_values(pv_args.values[..2].iter().copied());
                let elem_analysis = analyze_prim_op(comp, ref_code, &elem_pvs, span)?
                    .unwrap_or_else(|| panic!("element analysis failed"));
                let elem_slot = self.alloc_value_for(elem_analysis.values[0])?;
                self.lower_prim_op(ref_code, &elem_args, &elem_pvs, &MultiCValue::one(elem_slot), span)?;
                let element = self.deref_pointer_slot(elem_slot)?;
                self.value_assign(
                    element,
                    elem_analysis.values[0],
                    args.values[2],
                    pv_args.values[2],
                )
            }
            IndexUpdateAssign | StaticIndexUpdateAssign | FieldRefUpdateAssign => {
                let ref_code = match code {
                    IndexUpdateAssign => Index,
                    StaticIndexUpdateAssign => TupleRef,
                    _ => FieldRefOp,
                };
                let elem_args = MultiCValue::from_slice(&args.values[1..3]);
                let elem_pvs = MultiPValue::from_values(pv_args.values[1..3].iter().copied());
                let elem_analysis = analyze_prim_op(comp, ref_code, &elem_pvs, span)?
                    .unwrap_or_else(|| panic!("element analysis failed"));
                let elem_slot = self.alloc_value_for(elem_analysis.values[0])?;
                self.lower_prim_op(ref_code, &elem_args, &elem_pvs, &MultiCValue::one(elem_slot), span)?;
                let element = self.deref_pointer_slot(elem_slot)?;

                let op = prim_static_arg(comp, pv_args, 0, span)?;
                let mut operand_values = MultiCValue::one(element);
                operand_values.extend(&MultiCValue::from_slice(&args.values[3..]));
                let mut operand_pvs = MultiPValue::one(elem_analysis.values[0]);
                operand_pvs.extend(&MultiPValue::from_values(
                    pv_args.values[3..].iter().copied(),
                ));
                let result = self.alloc_value(element.ty)?;
                self.lower_call_object(
                    &op,
                    &operand_values,
                    &operand_pvs,
                    &MultiCValue::one(result),
                    span,
                )?;
                self.value_assign(
                    element,
                    elem_analysis.values[0],
                    result,
                    mica_types::PValue::rvalue(element.ty),
                )
            }

            ThrowValue => {
                // Store the value's address as the exception sentinel and
                // unwind to the nearest exception target.
                self.bx.store(args.values[0].ptr, self.exception_value);
                let (marker, block) = {
                    let targets = self.exception_targets.borrow();
                    let target = targets
                        .last()
                        .unwrap_or_else(|| panic!("no exception target"));
                    target.use_count.set(target.use_count.get() + 1);
                    (target.stack_marker, target.block)
                };
                self.destroy_stack(marker, true)?;
                self.bx.br(block);
                let resume = self.new_block("afterThrow");
                self.bx.position_at_end(resume);
                Ok(())
            }
            DispatchTag => {
                // Default representation: the tag is the first field.
                let repr = comp.variant_repr_type(args.values[0].ty)?;
                let repr_bty = comp.backend_type(repr)?;
                let tag_ptr = self.bx.struct_gep(repr_bty, args.values[0].ptr, 0);
                let tag_bty = comp.backend_type(comp.types.c_int_type)?;
                let tag = self.bx.load(tag_bty, tag_ptr);
                self.store_result(tag, out);
                Ok(())
            }
            DispatchIndex => {
                let index = static_index(comp, pv_args, 1, span)?;
                let members = comp.variant_members(args.values[0].ty)?;
                let member_ty = members[index];
                let repr = comp.variant_repr_type(args.values[0].ty)?;
                let repr_bty = comp.backend_type(repr)?;
                let payload_ptr = self.bx.struct_gep(repr_bty, args.values[0].ptr, 1);
                let member = CValue::new(member_ty, payload_ptr);
                self.forward_value_to_slot(member, analyzed.values[0], out.values[0])
            }
            InvalidDispatch => {
                self.bx.unreachable();
                let resume = self.new_block("afterInvalidDispatch");
                self.bx.position_at_end(resume);
                Ok(())
            }
            CallMain => {
                let callable = prim_static_arg(comp, pv_args, 0, span)?;
                let entry = mica_types::invoke::safe_analyze_callable(comp, &callable, &[], &[])?;
                let func = match entry.lowered_fn.get() {
                    Some(func) => func,
                    None => crate::entry::lower_code_body(self.lx, &entry)?,
                };
                // main returns one value; wire it through as CInt.
                let return_types = entry.return_types.borrow().clone();
                match return_types.as_slice() {
                    [] => {
                        if !entry.runtime_nop.get() {
                            self.lowlevel_call(Callee::Func(func), vec![])?;
                        }
                        let bty = comp.backend_type(comp.types.c_int_type)?;
                        let zero = self.bx.const_int(bty, 0);
                        self.store_result(zero, out);
                        Ok(())
                    }
                    [ret] => {
                        let slot = self.alloc_value(*ret)?;
                        self.lowlevel_call(Callee::Func(func), vec![slot.ptr])?;
                        let converted =
                            self.emit_numeric_convert(comp.types.c_int_type, slot)?;
                        self.store_result(converted, out);
                        Ok(())
                    }
                    _ => Err(SemaError::new(
                        ErrorCode::E3002,
                        span,
                        "main must return at most one value",
                    )),
                }
            }

            // Selectors and type constructors have no call lowering.
            OrderUnordered | OrderMonotonic | OrderAcquire | OrderRelease | OrderAcqRel
            | OrderSeqCst | RMWXchg | RMWAdd | RMWSubtract | RMWAnd | RMWNAnd | RMWOr | RMWXor
            | RMWMin | RMWMax | RMWUMin | RMWUMax | PointerT | CodePointerT
            | ExternalCodePointerT | ArrayT | VecT | TupleT | UnionT | StaticT
            | RecordWithPropertiesT => Err(SemaError::new(
                ErrorCode::E3003,
                span,
                format!("{} is not callable", code.name()),
            )),
        }
    }

    /// Move or reference a value into a forwarding slot per its analysis.
    fn forward_value_to_slot(
        &self,
        cv: CValue,
        pv: mica_types::PValue,
        slot: CValue,
    ) -> SemaResult<()> {
        if pv.is_temp {
            self.value_move(slot, cv)
        } else {
            self.store_ref(cv.ptr, slot);
            Ok(())
        }
    }

    /// Field pointer into a record value.
    fn record_field_ptr(&self, base: CValue, index: usize) -> SemaResult<ValueId> {
        let struct_ty = self.comp().backend_type(base.ty)?;
        Ok(self
            .bx
            .struct_gep(struct_ty, base.ptr, u32::try_from(index).unwrap_or(u32::MAX)))
    }

    /// Load an index operand zero-extended to `size_t` width.
    fn index_value(&self, cv: CValue) -> SemaResult<ValueId> {
        let value = self.load_value(cv)?;
        let size_bty = self.comp().backend_type(self.comp().types.c_size_t_type)?;
        Ok(self.cast_int(value, size_bty, self.signed_int(cv.ty)))
    }
}

fn static_index(
    comp: &mica_types::Compilation,
    pv_args: &MultiPValue,
    i: usize,
    span: Span,
) -> SemaResult<usize> {
    let obj = prim_static_arg(comp, pv_args, i, span)?;
    Ok(comp.static_u32(&obj, span)? as usize)
}

fn float_predicate(code: PrimOpCode) -> FloatPredicate {
    use PrimOpCode::*;
    match code {
        FloatOrderedEqualsP => FloatPredicate::OEq,
        FloatOrderedLesserP => FloatPredicate::OLt,
        FloatOrderedLesserEqualsP => FloatPredicate::OLe,
        FloatOrderedGreaterP => FloatPredicate::OGt,
        FloatOrderedGreaterEqualsP => FloatPredicate::OGe,
        FloatOrderedNotEqualsP => FloatPredicate::ONe,
        FloatOrderedP => FloatPredicate::Ord,
        FloatUnorderedEqualsP => FloatPredicate::UEq,
        FloatUnorderedLesserP => FloatPredicate::ULt,
        FloatUnorderedLesserEqualsP => FloatPredicate::ULe,
        FloatUnorderedGreaterP => FloatPredicate::UGt,
        FloatUnorderedGreaterEqualsP => FloatPredicate::UGe,
        FloatUnorderedNotEqualsP => FloatPredicate::UNe,
        FloatUnorderedP => FloatPredicate::Uno,
        _ => panic!("not a float comparison"),
    }
}

fn binop_for(code: PrimOpCode, is_float: bool, signed: bool) -> BinOp {
    use PrimOpCode::*;
    match code {
        NumericAdd if is_float => BinOp::FAdd,
        NumericAdd => BinOp::Add,
        NumericSubtract if is_float => BinOp::FSub,
        NumericSubtract => BinOp::Sub,
        NumericMultiply if is_float => BinOp::FMul,
        NumericMultiply => BinOp::Mul,
        FloatDivide => BinOp::FDiv,
        IntegerQuotient if signed => BinOp::SDiv,
        IntegerQuotient => BinOp::UDiv,
        IntegerRemainder if signed => BinOp::SRem,
        IntegerRemainder => BinOp::URem,
        IntegerShiftLeft => BinOp::Shl,
        IntegerShiftRight if signed => BinOp::AShr,
        IntegerShiftRight => BinOp::LShr,
        IntegerBitwiseAnd => BinOp::And,
        IntegerBitwiseOr => BinOp::Or,
        IntegerBitwiseXor => BinOp::Xor,
        _ => panic!("not a binary numeric op"),
    }
}
