//! Call lowering.
//!
//! Direct calls pass input pointers then output pointers and check the
//! returned sentinel. Dispatched positions expand into a compare cascade
//! over the runtime tag. Force-inline entries clone their body into the
//! caller; call-by-name entries are lowered per call site with the caller's
//! argument expressions.

use mica_backend::{Callee, IntPredicate, ValueId};
use mica_diagnostic::ErrorCode;
use mica_ir::{ExprId, InlineKind, PrimOpCode, Span};
use mica_types::invoke::{analyze_callable, InvokeEntry};
use mica_types::{
    analyze_call_by_name, analyze_dispatch_index, bind_call_by_name_args, compute_args_key,
    safe_analyze_one, unwrap_static_type, CValue, Env, MultiCValue, MultiPValue, Object, PValue,
    SemaError, SemaResult, TypeData,
};
use std::rc::Rc;

use crate::context::{CReturn, FnCx, JumpTarget};

impl FnCx<'_> {
    /// `callee(args…)` with output slots already allocated.
    pub fn lower_call_expr(
        &self,
        callee: ExprId,
        args: &[ExprId],
        env: &Env,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let callee_pv = safe_analyze_one(self.comp(), callee, env)?;

        if let Some(obj) = unwrap_static_type(self.comp(), callee_pv.ty) {
            // Decide call-by-name from the analysis alone, before any
            // argument value is emitted: those sites re-lower the caller's
            // expressions.
            let mut analyzed_indices = Vec::new();
            let arg_mpv = mica_types::analyze_multi_args(
                self.comp(),
                args,
                env,
                &mut analyzed_indices,
            )?
            .ok_or_else(|| {
                SemaError::new(ErrorCode::E3007, span, "unresolved recursion in call")
            })?;
            if analyzed_indices.is_empty() {
                let (args_key, temp_key) = compute_args_key(&arg_mpv);
                if let Some(entry) = analyze_callable(self.comp(), &obj, &args_key, &temp_key)? {
                    if entry.call_by_name.get() {
                        return self.lower_call_by_name(&entry, args, env, out, span);
                    }
                }
            }

            let (arg_values, pv_args, dispatch_indices) =
                self.lower_multi_args_as_ref(args, env)?;
            if !dispatch_indices.is_empty() {
                return self.lower_dispatch(&obj, &arg_values, &pv_args, &dispatch_indices, out, span);
            }
            return self.lower_call_object(&obj, &arg_values, &pv_args, out, span);
        }

        match self.comp().types.data(callee_pv.ty) {
            TypeData::CodePointer {
                arg_types,
                return_is_ref,
                return_types,
            } => {
                let callee_cv = self.lower_one_as_ref(callee, env)?;
                let arg_values = self.lower_multi_as_ref(args, env)?;
                let mut ll_args = Vec::with_capacity(arg_values.len() + out.len());
                for (i, cv) in arg_values.values.iter().enumerate() {
                    if cv.ty != arg_types[i] {
                        return Err(arg_type_error(self, i, arg_types[i], cv.ty, span));
                    }
                    ll_args.push(cv.ptr);
                }
                debug_assert_eq!(out.len(), return_types.len());
                for cv in &out.values {
                    ll_args.push(cv.ptr);
                }
                let _ = return_is_ref;
                let fn_ptr = self.bx.load(mica_backend::BType::Ptr, callee_cv.ptr);
                self.lowlevel_call(
                    Callee::Value {
                        callee: fn_ptr,
                        params: vec![mica_backend::BType::Ptr; ll_args.len()],
                        ret: mica_backend::BType::Ptr,
                    },
                    ll_args,
                )?;
                Ok(())
            }
            TypeData::CCodePointer { .. } => {
                let callee_cv = self.lower_one_as_ref(callee, env)?;
                let arg_values = self.lower_multi_as_ref(args, env)?;
                self.lower_c_call(callee_cv, &arg_values, out, span)
            }
            _ => {
                let mut exprs = vec![callee];
                exprs.extend_from_slice(args);
                let (arg_values, pv_args) = self.lower_args_with_analysis(&exprs, env)?;
                self.lower_call_object(
                    &self.comp().operator(PrimOpCode::Call),
                    &arg_values,
                    &pv_args,
                    out,
                    span,
                )
            }
        }
    }

    /// Resolve a callable against lowered arguments and emit the call.
    pub fn lower_call_object(
        &self,
        callable: &Object,
        args: &MultiCValue,
        pv_args: &MultiPValue,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        debug_assert_eq!(args.len(), pv_args.len());
        if let Object::PrimOp(code) = callable {
            if !code.is_overloadable() {
                return self.lower_prim_op(*code, args, pv_args, out, span);
            }
        }

        let (args_key, temp_key) = compute_args_key(pv_args);
        match analyze_callable(self.comp(), callable, &args_key, &temp_key)? {
            Some(entry) => {
                if entry.call_by_name.get() {
                    // Wrap the lowered values as expressions for the per-site
                    // body lowering.
                    let exprs: Vec<ExprId> = args
                        .values
                        .iter()
                        .map(|cv| self.comp().object_expr(Object::CValue(*cv), span))
                        .collect();
                    return self.lower_call_by_name(&entry, &exprs, &Env::empty(), out, span);
                }
                self.lower_call_code(&entry, args, out, span)
            }
            None => self.lower_call_fallback(callable, args, pv_args, out, span),
        }
    }

    /// Builtin behavior when no user overload matched.
    fn lower_call_fallback(
        &self,
        callable: &Object,
        args: &MultiCValue,
        pv_args: &MultiPValue,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        match callable {
            Object::PrimOp(code) => self.lower_prim_op(*code, args, pv_args, out, span),
            Object::Type(ty) => self.lower_type_call(*ty, args, out, span),
            Object::Record(decl) if decl.params.is_empty() && decl.var_param.is_none() => {
                let ty = self.comp().types.record_type(decl, Vec::new(), span)?;
                self.lower_type_call(ty, args, out, span)
            }
            Object::External(ext) => self.lower_external_direct_call(ext, args, out, span),
            other => Err(SemaError::new(
                ErrorCode::E3005,
                span,
                format!("no matching overload for {}", self.comp().object_name(other)),
            )),
        }
    }

    /// Direct call of a named external procedure at the C ABI.
    fn lower_external_direct_call(
        &self,
        ext: &std::rc::Rc<mica_ir::ExternalProcedure>,
        args: &MultiCValue,
        out: &MultiCValue,
        _span: Span,
    ) -> SemaResult<()> {
        let func = self.lx.lower_external_procedure(ext, false)?;
        let (arg_types, return_type) = mica_types::external_signature(self.comp(), ext)?;
        let target = crate::externals::DefaultExternalTarget;
        let sig = crate::externals::ExternalTarget::lower_signature(
            &target,
            self.comp(),
            ext.calling_conv,
            return_type,
            &arg_types,
            ext.has_var_args,
        )?;
        self.emit_c_call(&sig, crate::externals::CCallee::Func(func), args, out)
    }

    /// Builtin construction/copy/conversion on a type value.
    fn lower_type_call(
        &self,
        ty: mica_ir::TypeId,
        args: &MultiCValue,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let comp = self.comp();
        if args.is_empty() {
            // Default construction leaves the slot zero-cost initialized.
            return Ok(());
        }
        let dest = out.values[0];
        if args.len() == 1 {
            let arg = args.values[0];
            if arg.ty == ty {
                return self.value_copy(dest, arg);
            }
            if is_numeric_type(comp, ty) && is_numeric_type(comp, arg.ty) {
                let converted = self.emit_numeric_convert(ty, arg)?;
                self.bx.store(converted, dest.ptr);
                return Ok(());
            }
            if let TypeData::Variant { .. } = comp.types.data(ty) {
                let tag = comp.variant_member_index(ty, arg.ty, span)?;
                return self.variant_construct(dest, arg, tag);
            }
        }
        if let TypeData::Record { .. } = comp.types.data(ty) {
            let fields = comp.record_fields(ty)?;
            if fields.types.len() == args.len() {
                let struct_ty = comp.backend_type(ty)?;
                for (i, cv) in args.values.iter().enumerate() {
                    let field_ptr = self.bx.struct_gep(
                        struct_ty.clone(),
                        dest.ptr,
                        u32::try_from(i).unwrap_or(u32::MAX),
                    );
                    self.value_copy(CValue::new(fields.types[i], field_ptr), *cv)?;
                }
                return Ok(());
            }
        }
        Err(SemaError::new(
            ErrorCode::E3005,
            span,
            format!("no matching constructor for {}", comp.type_name(ty)),
        ))
    }

    /// Store tag and payload of a variant value.
    pub fn variant_construct(
        &self,
        dest: CValue,
        member: CValue,
        tag: usize,
    ) -> SemaResult<()> {
        let comp = self.comp();
        let repr = comp.variant_repr_type(dest.ty)?;
        let repr_bty = comp.backend_type(repr)?;
        let tag_ptr = self.bx.struct_gep(repr_bty.clone(), dest.ptr, 0);
        let tag_bty = comp.backend_type(comp.types.c_int_type)?;
        let tag_value = self
            .bx
            .const_int(tag_bty, i128::try_from(tag).unwrap_or(0));
        self.bx.store(tag_value, tag_ptr);
        let payload_ptr = self.bx.struct_gep(repr_bty, dest.ptr, 1);
        self.value_copy(CValue::new(member.ty, payload_ptr), member)
    }

    /// Direct call of a lowered entry.
    pub fn lower_call_code(
        &self,
        entry: &Rc<InvokeEntry>,
        args: &MultiCValue,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        if self.comp().inline_enabled() && entry.is_inline.get() == InlineKind::ForceInline {
            return self.lower_call_inline(entry, args, out, span);
        }
        let func = match entry.lowered_fn.get() {
            Some(func) => func,
            None => crate::entry::lower_code_body(self.lx, entry)?,
        };
        debug_assert_eq!(args.len(), entry.args_key.len());
        for (i, cv) in args.values.iter().enumerate() {
            if cv.ty != entry.args_key[i] {
                return Err(arg_type_error(self, i, entry.args_key[i], cv.ty, span));
            }
        }
        debug_assert_eq!(out.len(), entry.return_types.borrow().len());
        let mut ll_args: Vec<ValueId> = args.values.iter().map(|cv| cv.ptr).collect();
        ll_args.extend(out.values.iter().map(|cv| cv.ptr));
        if !entry.runtime_nop.get() {
            self.lowlevel_call(Callee::Func(func), ll_args)?;
        }
        Ok(())
    }

    /// Exception-checked low-level call: compare the sentinel, unwind on a
    /// non-null result.
    pub fn lowlevel_call(&self, callee: Callee, args: Vec<ValueId>) -> SemaResult<()> {
        let result = self.bx.call(callee, args, mica_backend::BType::Ptr);
        if !self.comp().exceptions_enabled() || !self.check_exceptions.get() {
            return Ok(());
        }
        // Hint that the no-exception value is the expected one.
        let expected = self.bx.const_null();
        let hinted = self.bx.expect(result, expected);
        let no_exception = self.bx.const_null();
        let is_normal = self.bx.icmp(IntPredicate::Eq, hinted, no_exception);

        let landing = self.new_block("landing");
        let normal = self.new_block("normal");
        self.bx.cond_br(is_normal, normal, landing);

        self.bx.position_at_end(landing);
        self.bx.store(hinted, self.exception_value);
        let marker = {
            let targets = self.exception_targets.borrow();
            let target = targets
                .last()
                .unwrap_or_else(|| panic!("no exception target"));
            target.use_count.set(target.use_count.get() + 1);
            target.stack_marker
        };
        self.destroy_stack(marker, true)?;
        let block = self
            .exception_targets
            .borrow()
            .last()
            .map(|t| t.block)
            .unwrap_or_else(|| panic!("no exception target"));
        self.bx.br(block);

        self.bx.position_at_end(normal);
        Ok(())
    }

    /// Dispatch cascade: branch on the runtime tag of each dispatched
    /// position, reinterpreting the value per member arm.
    pub fn lower_dispatch(
        &self,
        callable: &Object,
        args: &MultiCValue,
        pv_args: &MultiPValue,
        dispatch_indices: &[usize],
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let Some((&index, rest)) = dispatch_indices.split_first() else {
            return self.lower_call_object(callable, args, pv_args, out, span);
        };
        let dispatched = args.values[index];
        let dispatched_pv = pv_args.values[index];
        let member_count = self.comp().dispatch_tag_count(dispatched_pv.ty, span)?;
        let tag = self.lower_dispatch_tag(dispatched, dispatched_pv, span)?;

        let final_block = self.new_block("dispatchFinal");
        let tag_bty = self.comp().backend_type(self.comp().types.c_int_type)?;
        for member_tag in 0..member_count {
            let case_block = self.new_block("dispatchCase");
            let next_block = self.new_block("dispatchNext");
            let expected = self.bx.const_int(tag_bty.clone(), i128::from(member_tag));
            let matches = self.bx.icmp(IntPredicate::Eq, tag, expected);
            self.bx.cond_br(matches, case_block, next_block);

            self.bx.position_at_end(case_block);
            let member_pv =
                analyze_dispatch_index(self.comp(), dispatched_pv, member_tag, span)?;
            let member_cv =
                self.lower_dispatch_index(dispatched, member_pv, member_tag, span)?;
            let mut branch_args = args.clone();
            branch_args.values[index] = member_cv;
            let mut branch_pvs = pv_args.clone();
            branch_pvs.values[index] = member_pv;
            self.lower_dispatch(callable, &branch_args, &branch_pvs, rest, out, span)?;
            self.bx.br(final_block);

            self.bx.position_at_end(next_block);
        }

        // Out-of-range tag: report and terminate.
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::InvalidDispatch),
            &MultiCValue::one(dispatched),
            &MultiPValue::one(dispatched_pv),
            &MultiCValue::new(),
            span,
        )?;
        self.bx.br(final_block);

        self.bx.position_at_end(final_block);
        Ok(())
    }

    /// Read the runtime tag of a dispatched value.
    pub fn lower_dispatch_tag(
        &self,
        cv: CValue,
        pv: PValue,
        span: Span,
    ) -> SemaResult<ValueId> {
        let tag_slot = self.alloc_value(self.comp().types.c_int_type)?;
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::DispatchTag),
            &MultiCValue::one(cv),
            &MultiPValue::one(pv),
            &MultiCValue::one(tag_slot),
            span,
        )?;
        let bty = self.comp().backend_type(self.comp().types.c_int_type)?;
        Ok(self.bx.load(bty, tag_slot.ptr))
    }

    /// Reinterpret a dispatched value as the member selected by `tag`.
    pub fn lower_dispatch_index(
        &self,
        cv: CValue,
        member_pv: PValue,
        tag: u32,
        span: Span,
    ) -> SemaResult<CValue> {
        let tag_static = self.static_cvalue(Object::Holder(
            self.comp()
                .c_int_holder(i32::try_from(tag).unwrap_or(i32::MAX)),
        ))?;
        let mut args = MultiCValue::one(cv);
        args.push(tag_static);
        let mut pv_args = MultiPValue::one(PValue::lvalue(cv.ty));
        pv_args.push(PValue::rvalue(tag_static.ty));

        let out_slot = self.alloc_value_for(member_pv)?;
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::DispatchIndex),
            &args,
            &pv_args,
            &MultiCValue::one(out_slot),
            span,
        )?;
        if member_pv.is_temp {
            Ok(out_slot)
        } else {
            self.deref_pointer_slot(out_slot)
        }
    }

    /// Clone a force-inline callee's body into the caller.
    fn lower_call_inline(
        &self,
        entry: &Rc<InvokeEntry>,
        args: &MultiCValue,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let depth = self.inline_depth.get();
        self.inline_depth.set(depth + 1);
        let result = self.lower_body_at_site(entry, args, out, span);
        self.inline_depth.set(depth);
        result
    }

    /// Lower an entry's body in the caller's function, with arguments bound
    /// to the given values and returns wired to `out`.
    fn lower_body_at_site(
        &self,
        entry: &Rc<InvokeEntry>,
        args: &MultiCValue,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let env = self.bind_entry_args(entry, args);
        let code = entry
            .code
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("entry has no code"));
        let mica_ir::CodeBody::Stmt(body) = code.body else {
            return Err(SemaError::new(
                ErrorCode::E4006,
                span,
                "textual bodies cannot be inlined",
            ));
        };

        let returns: Vec<CReturn> = entry
            .return_is_ref
            .borrow()
            .iter()
            .zip(entry.return_types.borrow().iter())
            .zip(&out.values)
            .map(|((&by_ref, &ty), &value)| CReturn { by_ref, ty, value })
            .collect();
        let return_block = self.new_block("inlineReturn");
        self.return_lists.borrow_mut().push(returns);
        self.return_targets
            .borrow_mut()
            .push(JumpTarget::new(return_block, self.mark_stack()));

        let terminated = self.lower_statement(body, &env)?;
        if !terminated {
            let marker = self
                .return_targets
                .borrow()
                .last()
                .map(|t| t.stack_marker)
                .unwrap_or(0);
            self.destroy_stack(marker, false)?;
            self.bx.br(return_block);
        }
        let marker = self
            .return_targets
            .borrow()
            .last()
            .map(|t| t.stack_marker)
            .unwrap_or(0);
        self.pop_stack(marker);
        self.return_targets.borrow_mut().pop();
        self.return_lists.borrow_mut().pop();

        self.bx.position_at_end(return_block);
        Ok(())
    }

    /// Bind an entry's argument names to lowered values in a fresh env.
    fn bind_entry_args(&self, entry: &Rc<InvokeEntry>, args: &MultiCValue) -> Env {
        let env = entry
            .env
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("entry has no match environment"))
            .child();
        let names = entry.fixed_arg_names.borrow();
        let var_position = entry.var_arg_position.get();
        let var_name = *entry.var_arg_name.borrow();
        let flags = entry.forwarded_rvalue_flags.borrow();
        let total = names.len() + usize::from(var_name.is_some());
        let var_count = args.len() - names.len();

        let mut arg_index = 0usize;
        let mut fixed_index = 0usize;
        for slot in 0..total {
            if slot == var_position {
                let mut values = MultiCValue::new();
                for _ in 0..var_count {
                    let mut cv = args.values[arg_index];
                    cv.forwarded_rvalue = flags.get(arg_index).copied().unwrap_or(false);
                    values.push(cv);
                    arg_index += 1;
                }
                if let Some(var_name) = var_name {
                    env.add_local(var_name, Object::MultiCValue(values));
                }
            } else {
                let mut cv = args.values[arg_index];
                cv.forwarded_rvalue = flags.get(arg_index).copied().unwrap_or(false);
                env.add_local(names[fixed_index], Object::CValue(cv));
                fixed_index += 1;
                arg_index += 1;
            }
        }
        env
    }

    /// Lower a call-by-name entry at this call site.
    pub fn lower_call_by_name(
        &self,
        entry: &Rc<InvokeEntry>,
        args: &[ExprId],
        env: &Env,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        // Per-site analysis pins the return shape for this site.
        let mpv = analyze_call_by_name(self.comp(), entry, args, env, span)?.ok_or_else(|| {
            SemaError::new(ErrorCode::E3007, span, "unresolved recursion in alias function")
        })?;
        debug_assert_eq!(mpv.len(), out.len());

        let body_env = bind_call_by_name_args(entry, args, env);
        let code = entry
            .code
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("call-by-name entry has no code"));
        let mica_ir::CodeBody::Stmt(body) = code.body else {
            panic!("call-by-name entry has a textual body");
        };

        let returns: Vec<CReturn> = mpv
            .values
            .iter()
            .zip(&out.values)
            .map(|(pv, &value)| CReturn {
                by_ref: !pv.is_temp,
                ty: pv.ty,
                value,
            })
            .collect();
        let return_block = self.new_block("bynameReturn");
        self.return_lists.borrow_mut().push(returns);
        self.return_targets
            .borrow_mut()
            .push(JumpTarget::new(return_block, self.mark_stack()));

        let _disabler = self.comp().disable_caching();
        let terminated = self.lower_statement(body, &body_env)?;
        if !terminated {
            let marker = self
                .return_targets
                .borrow()
                .last()
                .map(|t| t.stack_marker)
                .unwrap_or(0);
            self.destroy_stack(marker, false)?;
            self.bx.br(return_block);
        }
        let marker = self
            .return_targets
            .borrow()
            .last()
            .map(|t| t.stack_marker)
            .unwrap_or(0);
        self.pop_stack(marker);
        self.return_targets.borrow_mut().pop();
        self.return_lists.borrow_mut().pop();

        self.bx.position_at_end(return_block);
        Ok(())
    }
}

fn arg_type_error(
    cx: &FnCx<'_>,
    index: usize,
    expected: mica_ir::TypeId,
    got: mica_ir::TypeId,
    span: Span,
) -> SemaError {
    SemaError::new(
        ErrorCode::E3001,
        span,
        format!(
            "argument {index}: expected {}, got {}",
            cx.comp().type_name(expected),
            cx.comp().type_name(got)
        ),
    )
}

fn is_numeric_type(comp: &mica_types::Compilation, ty: mica_ir::TypeId) -> bool {
    matches!(
        comp.types.data(ty),
        TypeData::Integer { .. } | TypeData::Float { .. }
    )
}
