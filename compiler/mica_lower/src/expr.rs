//! Expression lowering.
//!
//! Every expression lowers either *as ref* (its natural place: a borrowed
//! pointer for lvalues, a fresh stack temp for rvalues) or *into* a
//! pre-allocated destination. The forwarding discipline: output slots for
//! temporary positions hold the value itself; slots for lvalue positions
//! hold a pointer to the existing storage.

use mica_backend::CastOp;
use mica_diagnostic::ErrorCode;
use mica_ir::{Expr, ExprId, PrimOpCode, Span};
use mica_types::{
    analyze_multi, safe_analyze_multi, safe_analyze_one, type_bool_kind,
    unwrap_static_type, BoolKind, CValue, Env, MultiCValue, MultiPValue, Object, PValue,
    SemaError, SemaResult,
};

use crate::context::FnCx;

impl FnCx<'_> {
    /// Lower one expression to a reference; temporaries are pushed on the
    /// value stack for destruction at scope exit.
    pub fn lower_one_as_ref(&self, expr: ExprId, env: &Env) -> SemaResult<CValue> {
        let mcv = self.lower_expr_as_ref(expr, env)?;
        if mcv.len() != 1 {
            return Err(SemaError::new(
                ErrorCode::E3002,
                self.comp().expr_span(expr),
                format!("expected 1 value, got {}", mcv.len()),
            ));
        }
        Ok(mcv.values[0])
    }

    /// Lower an expression list as references, splicing unpacks.
    pub fn lower_multi_as_ref(&self, exprs: &[ExprId], env: &Env) -> SemaResult<MultiCValue> {
        let mut out = MultiCValue::new();
        for &expr in exprs {
            match self.comp().expr(expr) {
                Expr::Unpack(inner) => out.extend(&self.lower_expr_as_ref(inner, env)?),
                Expr::Paren(inner) => out.extend(&self.lower_multi_as_ref(&inner, env)?),
                _ => out.extend(&self.lower_expr_as_ref(expr, env)?),
            }
        }
        Ok(out)
    }

    /// Lower one expression to its multi-value as references.
    pub fn lower_expr_as_ref(&self, expr: ExprId, env: &Env) -> SemaResult<MultiCValue> {
        // Names already bound to lowered values pass straight through.
        if let Some(direct) = self.lower_name_shortcut(expr, env)? {
            return Ok(direct);
        }

        let mpv = safe_analyze_multi(self.comp(), &[expr], env, 0)?;
        let mut slots = MultiCValue::new();
        for pv in &mpv.values {
            slots.push(self.alloc_value_for(*pv)?);
        }
        self.lower_expr_core(expr, env, &slots, &mpv)?;

        let mut out = MultiCValue::new();
        for (slot, pv) in slots.values.iter().zip(&mpv.values) {
            if pv.is_temp {
                self.push_stack_value(*slot);
                out.push(*slot);
            } else {
                out.push(self.deref_pointer_slot(*slot)?);
            }
        }
        Ok(out)
    }

    /// Forwarding variant: temporaries keep their `forwarded_rvalue` mark so
    /// re-analysis still sees rvalues.
    pub fn lower_forward_multi_as_ref(
        &self,
        exprs: &[ExprId],
        env: &Env,
    ) -> SemaResult<MultiCValue> {
        let mut out = MultiCValue::new();
        for &expr in exprs {
            let mcv = match self.comp().expr(expr) {
                Expr::Unpack(inner) => self.lower_expr_as_ref(inner, env)?,
                _ => self.lower_expr_as_ref(expr, env)?,
            };
            let mpv = safe_analyze_multi(self.comp(), &[expr], env, 0)?;
            for (cv, pv) in mcv.values.iter().zip(&mpv.values) {
                out.push(if pv.is_temp {
                    CValue::forwarded(cv.ty, cv.ptr)
                } else {
                    *cv
                });
            }
        }
        Ok(out)
    }

    /// Load a pointer slot back into a borrowed value.
    pub fn deref_pointer_slot(&self, slot: CValue) -> SemaResult<CValue> {
        let pointee = match self.comp().types.data(slot.ty) {
            mica_types::TypeData::Pointer(p) => p,
            _ => panic!(
                "pointer slot expected, got {}",
                self.comp().type_name(slot.ty)
            ),
        };
        let loaded = self.bx.load(mica_backend::BType::Ptr, slot.ptr);
        Ok(CValue::new(pointee, loaded))
    }

    /// Names bound to already-lowered values (locals, forwarded args).
    fn lower_name_shortcut(&self, expr: ExprId, env: &Env) -> SemaResult<Option<MultiCValue>> {
        let entry = match self.comp().expr(expr) {
            Expr::NameRef(name) => env
                .lookup(name)
                .or_else(|| self.comp().operator_by_name(name)),
            Expr::ObjectRef(id) => Some(self.comp().object(id)),
            _ => None,
        };
        match entry {
            Some(Object::CValue(cv)) => Ok(Some(MultiCValue::one(cv))),
            Some(Object::MultiCValue(mcv)) => Ok(Some(mcv)),
            Some(Object::AliasExpr(inner, captured)) => {
                self.lower_expr_as_ref(inner, &captured).map(Some)
            }
            Some(Object::AliasExprList(exprs, captured)) => {
                self.lower_multi_as_ref(&exprs, &captured).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Lower one expression into exactly one destination.
    pub fn lower_one_into(&self, expr: ExprId, env: &Env, out: CValue) -> SemaResult<()> {
        let pv = safe_analyze_one(self.comp(), expr, env)?;
        if pv.is_temp {
            let slots = MultiCValue::one(out);
            self.lower_expr_core(expr, env, &slots, &MultiPValue::one(pv))
        } else {
            // Borrow, then copy out of the existing storage.
            let source = self.lower_one_as_ref(expr, env)?;
            self.value_copy(out, source)
        }
    }

    /// Lower an expression list into destinations, with implicit unpack.
    pub fn lower_multi_into(
        &self,
        exprs: &[ExprId],
        env: &Env,
        out: &MultiCValue,
        want: usize,
    ) -> SemaResult<()> {
        if want >= 1 && exprs.len() == 1 && !matches!(self.comp().expr(exprs[0]), Expr::Unpack(_))
        {
            return self.lower_expr_into(exprs[0], env, out);
        }
        let mut position = 0usize;
        for &expr in exprs {
            let mpv = safe_analyze_multi(self.comp(), &[expr], env, 0)?;
            let slice =
                MultiCValue::from_slice(&out.values[position..position + mpv.len()]);
            self.lower_expr_into(expr, env, &slice)?;
            position += mpv.len();
        }
        debug_assert_eq!(position, out.len());
        Ok(())
    }

    /// Lower one (possibly multi-valued) expression into destinations.
    pub fn lower_expr_into(&self, expr: ExprId, env: &Env, out: &MultiCValue) -> SemaResult<()> {
        let expr_node = self.comp().expr(expr);
        if let Expr::Unpack(inner) = expr_node {
            return self.lower_expr_into(inner, env, out);
        }
        let mpv = safe_analyze_multi(self.comp(), &[expr], env, 0)?;
        if mpv.len() != out.len() {
            return Err(SemaError::new(
                ErrorCode::E3002,
                self.comp().expr_span(expr),
                format!("expected {} value(s), got {}", out.len(), mpv.len()),
            ));
        }
        // Split destinations: rvalue positions are written directly; lvalue
        // positions are borrowed and copied.
        if mpv.values.iter().all(|pv| pv.is_temp) {
            return self.lower_expr_core(expr, env, out, &mpv);
        }
        let refs = self.lower_expr_as_ref(expr, env)?;
        for (dest, source) in out.values.iter().zip(&refs.values) {
            self.value_copy(*dest, *source)?;
        }
        Ok(())
    }

    /// Forwarding multi lowering: destination slots were allocated per the
    /// analysis (value slots for rvalues, pointer slots for lvalues).
    pub fn lower_multi_forward(
        &self,
        exprs: &[ExprId],
        env: &Env,
        out: &MultiCValue,
        want: usize,
    ) -> SemaResult<()> {
        if want >= 1 && exprs.len() == 1 && !matches!(self.comp().expr(exprs[0]), Expr::Unpack(_))
        {
            let mpv = safe_analyze_multi(self.comp(), exprs, env, want)?;
            return self.lower_expr_core(exprs[0], env, out, &mpv);
        }
        let mut position = 0usize;
        for &expr in exprs {
            let target = match self.comp().expr(expr) {
                Expr::Unpack(inner) => inner,
                _ => expr,
            };
            let mpv = safe_analyze_multi(self.comp(), &[target], env, 0)?;
            let slice =
                MultiCValue::from_slice(&out.values[position..position + mpv.len()]);
            self.lower_expr_core(target, env, &slice, &mpv)?;
            position += mpv.len();
        }
        debug_assert_eq!(position, out.len());
        Ok(())
    }

    /// The expression driver: fill `out` slots following the forwarding
    /// discipline. `mpv` is the expression's analysis.
    pub fn lower_expr_core(
        &self,
        expr: ExprId,
        env: &Env,
        out: &MultiCValue,
        mpv: &MultiPValue,
    ) -> SemaResult<()> {
        let span = self.comp().expr_span(expr);
        match self.comp().expr(expr) {
            Expr::BoolLit(value) => {
                let flag = self.bx.const_bool(value);
                self.bx.store(flag, out.values[0].ptr);
                Ok(())
            }
            Expr::IntLit { digits, suffix } => {
                let holder = mica_types::decode_int_literal(
                    self.comp(),
                    env.module().as_ref(),
                    self.comp().str(digits),
                    self.comp().str(suffix),
                    span,
                )?;
                self.store_holder(&holder, out.values[0])
            }
            Expr::FloatLit { digits, suffix } => {
                let holder = mica_types::decode_float_literal(
                    self.comp(),
                    env.module().as_ref(),
                    self.comp().str(digits),
                    self.comp().str(suffix),
                    span,
                )?;
                self.store_holder(&holder, out.values[0])
            }
            Expr::StringLit(_) => Ok(()), // statics carry no runtime bytes
            Expr::NameRef(name) => {
                let obj = env
                    .lookup(name)
                    .or_else(|| self.comp().operator_by_name(name))
                    .ok_or_else(|| {
                        SemaError::new(
                            ErrorCode::E3008,
                            span,
                            format!("unknown identifier: {}", self.comp().str(name)),
                        )
                    })?;
                self.lower_name_entry(&obj, env, out, mpv, span)
            }
            Expr::ObjectRef(id) => {
                let obj = self.comp().object(id);
                self.lower_name_entry(&obj, env, out, mpv, span)
            }
            Expr::StaticExpr(inner) => {
                let obj = self.comp().evaluate_one_static(inner, env)?;
                self.lower_static_object(&obj, out, mpv, span)
            }
            Expr::Tuple(elems) => {
                let (args, pv_args) = self.lower_args_with_analysis(&elems, env)?;
                self.lower_call_object(
                    &self.comp().operator(PrimOpCode::TupleLiteral),
                    &args,
                    &pv_args,
                    out,
                    span,
                )
            }
            Expr::Paren(elems) => self.lower_multi_forward(&elems, env, out, 0),
            Expr::Indexing { base, args } => self.lower_indexing(base, &args, env, out, span),
            Expr::Call { callee, args } => self.lower_call_expr(callee, &args, env, out, span),
            Expr::FieldRef { base, field } => self.lower_field_ref(base, field, env, out, span),
            Expr::StaticIndexing { base, index } => {
                self.lower_static_indexing(base, index, env, out, span)
            }
            Expr::And(lhs, rhs) => self.lower_short_circuit(lhs, rhs, true, env, out),
            Expr::Or(lhs, rhs) => self.lower_short_circuit(lhs, rhs, false, env, out),
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
        }
    }

    fn store_holder(&self, holder: &mica_types::ValueHolder, out: CValue) -> SemaResult<()> {
        if let Some(constant) = self.holder_constant(holder)? {
            self.bx.store(constant, out.ptr);
        }
        Ok(())
    }

    /// Fill output slots from an environment entry.
    fn lower_name_entry(
        &self,
        obj: &Object,
        env: &Env,
        out: &MultiCValue,
        mpv: &MultiPValue,
        span: Span,
    ) -> SemaResult<()> {
        match obj {
            Object::CValue(cv) => {
                self.forward_into_slot(*cv, out.values[0], mpv.values[0])?;
                Ok(())
            }
            Object::MultiCValue(mcv) => {
                for ((cv, slot), pv) in mcv.values.iter().zip(&out.values).zip(&mpv.values) {
                    self.forward_into_slot(*cv, *slot, *pv)?;
                }
                Ok(())
            }
            Object::AliasExpr(inner, captured) => {
                let inner_mpv = safe_analyze_multi(self.comp(), &[*inner], captured, 0)?;
                self.lower_expr_core(*inner, captured, out, &inner_mpv)
            }
            Object::AliasExprList(exprs, captured) => {
                self.lower_multi_forward(exprs, captured, out, 0)
            }
            _ => {
                let _ = env;
                self.lower_static_object(obj, out, mpv, span)
            }
        }
    }

    /// Write a lowered value into a forwarding slot: lvalue slots take the
    /// address, rvalue slots take a copy of the value.
    fn forward_into_slot(&self, cv: CValue, slot: CValue, pv: PValue) -> SemaResult<()> {
        if pv.is_temp {
            self.value_copy(slot, cv)
        } else {
            self.bx.store(cv.ptr, slot.ptr);
            Ok(())
        }
    }

    /// Lower a static object into output slots.
    pub fn lower_static_object(
        &self,
        obj: &Object,
        out: &MultiCValue,
        mpv: &MultiPValue,
        span: Span,
    ) -> SemaResult<()> {
        match obj {
            Object::Holder(holder) => self.store_holder(holder, out.values[0]),
            Object::Global(gvar) => {
                let inst = self.comp().gvar_instance(gvar, Vec::new());
                let cv = self.lower_gvar_instance(&inst)?;
                self.bx.store(cv.ptr, out.values[0].ptr);
                Ok(())
            }
            Object::Multi(objs) => {
                let mut position = 0usize;
                for inner in objs.iter() {
                    let inner_mpv = mica_types::analyze_static_object(self.comp(), inner, span)?
                        .ok_or_else(|| {
                            SemaError::new(ErrorCode::E3007, span, "unresolved recursion")
                        })?;
                    let slice = MultiCValue::from_slice(
                        &out.values[position..position + inner_mpv.len()],
                    );
                    self.lower_static_object(inner, &slice, &inner_mpv, span)?;
                    position += inner_mpv.len();
                }
                Ok(())
            }
            Object::CValue(cv) => self.forward_into_slot(*cv, out.values[0], mpv.values[0]),
            Object::MultiCValue(mcv) => {
                for ((cv, slot), pv) in mcv.values.iter().zip(&out.values).zip(&mpv.values) {
                    self.forward_into_slot(*cv, *slot, *pv)?;
                }
                Ok(())
            }
            Object::PValue(_) | Object::MultiPValue(_) => Err(SemaError::new(
                ErrorCode::E3006,
                span,
                "analysis value reached lowering",
            )),
            // Every other static occupies storage but stores nothing.
            _ => Ok(()),
        }
    }

    /// `base[args…]` at the lowering level.
    fn lower_indexing(
        &self,
        base: ExprId,
        args: &[ExprId],
        env: &Env,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let base_pv = safe_analyze_one(self.comp(), base, env)?;
        if let Some(obj) = unwrap_static_type(self.comp(), base_pv.ty) {
            match obj {
                Object::Global(gvar) => {
                    let params = self.comp().evaluate_multi_static(args, env)?;
                    let inst = self.comp().gvar_instance(&gvar, params);
                    let cv = self.lower_gvar_instance(&inst)?;
                    self.bx.store(cv.ptr, out.values[0].ptr);
                    return Ok(());
                }
                Object::Alias(alias) => {
                    let params = self.comp().evaluate_multi_static(args, env)?;
                    let alias_env = self.bind_alias_params(&alias, &params);
                    let _disabler = self.comp().disable_caching();
                    let inner_mpv =
                        safe_analyze_multi(self.comp(), &[alias.expr], &alias_env, 0)?;
                    return self.lower_expr_core(alias.expr, &alias_env, out, &inner_mpv);
                }
                // A type-constructing indexing is a static; storage only.
                Object::Record(_) | Object::Variant(_) | Object::PrimOp(_) => return Ok(()),
                _ => {}
            }
        }
        let mut exprs = vec![base];
        exprs.extend_from_slice(args);
        let (arg_values, pv_args) = self.lower_args_with_analysis(&exprs, env)?;
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::Index),
            &arg_values,
            &pv_args,
            out,
            span,
        )
    }

    fn bind_alias_params(&self, alias: &std::rc::Rc<mica_ir::GlobalAlias>, params: &[Object]) -> Env {
        let env = match alias.module.borrow().as_ref() {
            Some(module) => self.comp().module_env(module).child(),
            None => Env::empty().child(),
        };
        for (i, name) in alias.params.iter().enumerate() {
            if i < params.len() {
                env.add_local(*name, params[i].clone());
            }
        }
        if let Some(var_param) = alias.var_param {
            let rest: Vec<Object> = params.iter().skip(alias.params.len()).cloned().collect();
            env.add_local(var_param, Object::Multi(std::rc::Rc::new(rest)));
        }
        env
    }

    fn lower_field_ref(
        &self,
        base: ExprId,
        field: mica_ir::Name,
        env: &Env,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let base_pv = safe_analyze_one(self.comp(), base, env)?;
        if let Some(Object::Module(module)) = unwrap_static_type(self.comp(), base_pv.ty) {
            let member_env = Env::module_root(module);
            let obj = member_env.lookup(field).ok_or_else(|| {
                SemaError::new(
                    ErrorCode::E3008,
                    span,
                    format!("module has no member {}", self.comp().str(field)),
                )
            })?;
            let member_mpv = mica_types::analyze_static_object(self.comp(), &obj, span)?
                .ok_or_else(|| SemaError::new(ErrorCode::E3007, span, "unresolved recursion"))?;
            return self.lower_static_object(&obj, out, &member_mpv, span);
        }
        let base_cv = self.lower_one_as_ref(base, env)?;
        let ident = self.static_cvalue(Object::Ident(field))?;
        let mut args = MultiCValue::one(base_cv);
        args.push(ident);
        let mut pv_args = MultiPValue::one(base_pv);
        pv_args.push(PValue::rvalue(
            self.comp().types.static_type(Object::Ident(field)),
        ));
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::FieldRefOp),
            &args,
            &pv_args,
            out,
            span,
        )
    }

    fn lower_static_indexing(
        &self,
        base: ExprId,
        index: u32,
        env: &Env,
        out: &MultiCValue,
        span: Span,
    ) -> SemaResult<()> {
        let base_cv = self.lower_one_as_ref(base, env)?;
        let element = self.tuple_element_ref(base_cv, index as usize, span)?;
        self.bx.store(element.ptr, out.values[0].ptr);
        Ok(())
    }

    /// GEP to a tuple element.
    pub fn tuple_element_ref(&self, base: CValue, index: usize, span: Span) -> SemaResult<CValue> {
        let mica_types::TypeData::Tuple(elems) = self.comp().types.data(base.ty) else {
            return Err(SemaError::new(
                ErrorCode::E3001,
                span,
                format!("{} is not a tuple", self.comp().type_name(base.ty)),
            ));
        };
        if index >= elems.len() {
            return Err(SemaError::new(
                ErrorCode::E3002,
                span,
                format!("tuple index {index} out of range"),
            ));
        }
        let struct_ty = self.comp().backend_type(base.ty)?;
        let ptr = self
            .bx
            .struct_gep(struct_ty, base.ptr, u32::try_from(index).unwrap_or(u32::MAX));
        Ok(CValue::new(elems[index], ptr))
    }

    /// Short-circuit `and`/`or`: the right operand only runs when the left
    /// does not decide, and its temporaries die before the merge.
    fn lower_short_circuit(
        &self,
        lhs: ExprId,
        rhs: ExprId,
        is_and: bool,
        env: &Env,
        out: &MultiCValue,
    ) -> SemaResult<()> {
        let dest = out.values[0];
        let lhs_pv = safe_analyze_one(self.comp(), lhs, env)?;
        // Literal operands decide statically, like static bools.
        let lhs_kind = match self.comp().expr(lhs) {
            Expr::BoolLit(true) => BoolKind::StaticTrue,
            Expr::BoolLit(false) => BoolKind::StaticFalse,
            _ => type_bool_kind(self.comp(), lhs_pv.ty),
        };
        match lhs_kind {
            BoolKind::StaticTrue if is_and => return self.lower_bool_operand(rhs, env, dest),
            BoolKind::StaticFalse if is_and => {
                let flag = self.bx.const_bool(false);
                self.bx.store(flag, dest.ptr);
                return Ok(());
            }
            BoolKind::StaticTrue => {
                let flag = self.bx.const_bool(true);
                self.bx.store(flag, dest.ptr);
                return Ok(());
            }
            BoolKind::StaticFalse => return self.lower_bool_operand(rhs, env, dest),
            BoolKind::Expr => {}
        }

        self.lower_bool_operand(lhs, env, dest)?;
        let bty = self.comp().backend_type(self.comp().types.bool_type)?;
        let flag = self.bx.load(bty, dest.ptr);
        let rhs_block = self.new_block(if is_and { "andRhs" } else { "orRhs" });
        let merge_block = self.new_block(if is_and { "andMerge" } else { "orMerge" });
        if is_and {
            self.bx.cond_br(flag, rhs_block, merge_block);
        } else {
            self.bx.cond_br(flag, merge_block, rhs_block);
        }

        self.bx.position_at_end(rhs_block);
        let temp_marker = self.mark_temps();
        let stack_marker = self.mark_stack();
        self.lower_bool_operand(rhs, env, dest)?;
        self.destroy_and_pop_stack(stack_marker, false)?;
        self.clear_temps(temp_marker);
        self.bx.br(merge_block);

        self.bx.position_at_end(merge_block);
        Ok(())
    }

    fn lower_bool_operand(&self, expr: ExprId, env: &Env, dest: CValue) -> SemaResult<()> {
        let span = self.comp().expr_span(expr);
        let pv = safe_analyze_one(self.comp(), expr, env)?;
        match type_bool_kind(self.comp(), pv.ty) {
            BoolKind::StaticTrue => {
                let flag = self.bx.const_bool(true);
                self.bx.store(flag, dest.ptr);
                Ok(())
            }
            BoolKind::StaticFalse => {
                let flag = self.bx.const_bool(false);
                self.bx.store(flag, dest.ptr);
                Ok(())
            }
            BoolKind::Expr => {
                let cv = self.lower_one_as_ref(expr, env)?;
                let flag = self.to_bool_flag(cv, span)?;
                self.bx.store(flag, dest.ptr);
                Ok(())
            }
        }
    }

    /// Lower argument expressions as refs together with their analysis.
    pub fn lower_args_with_analysis(
        &self,
        exprs: &[ExprId],
        env: &Env,
    ) -> SemaResult<(MultiCValue, MultiPValue)> {
        let mpv = safe_analyze_multi(self.comp(), exprs, env, 0)?;
        let mcv = self.lower_multi_as_ref(exprs, env)?;
        debug_assert_eq!(mpv.len(), mcv.len());
        Ok((mcv, mpv))
    }

    /// Argument lowering that also returns dispatch marker positions.
    pub fn lower_multi_args_as_ref(
        &self,
        exprs: &[ExprId],
        env: &Env,
    ) -> SemaResult<(MultiCValue, MultiPValue, Vec<usize>)> {
        let mut dispatch_indices = Vec::new();
        let mut mcv = MultiCValue::new();
        let mut mpv = MultiPValue::new();
        for &expr in exprs {
            match self.comp().expr(expr) {
                Expr::Dispatch(inner) => {
                    dispatch_indices.push(mcv.len());
                    let cv = self.lower_one_as_ref(inner, env)?;
                    let pv = safe_analyze_one(self.comp(), inner, env)?;
                    mcv.push(cv);
                    mpv.push(pv);
                }
                Expr::Unpack(inner) => {
                    mcv.extend(&self.lower_expr_as_ref(inner, env)?);
                    mpv.extend(
                        &analyze_multi(self.comp(), &[inner], env, 0)?.ok_or_else(|| {
                            SemaError::new(
                                ErrorCode::E3007,
                                self.comp().expr_span(inner),
                                "unresolved recursion",
                            )
                        })?,
                    );
                }
                _ => {
                    mcv.extend(&self.lower_expr_as_ref(expr, env)?);
                    mpv.extend(&safe_analyze_multi(self.comp(), &[expr], env, 0)?);
                }
            }
        }
        Ok((mcv, mpv, dispatch_indices))
    }

    /// Numeric conversion emission shared by `numericConvert` and type-call
    /// conversions.
    pub fn emit_numeric_convert(
        &self,
        dest_ty: mica_ir::TypeId,
        src: CValue,
    ) -> SemaResult<mica_backend::ValueId> {
        use mica_types::TypeData;
        let comp = self.comp();
        let src_bty = comp.backend_type(src.ty)?;
        let dest_bty = comp.backend_type(dest_ty)?;
        let value = self.bx.load(src_bty, src.ptr);
        let converted = match (comp.types.data(src.ty), comp.types.data(dest_ty)) {
            (TypeData::Integer { signed, .. }, TypeData::Integer { .. }) => {
                self.cast_int(value, dest_bty, signed)
            }
            (TypeData::Integer { signed: true, .. }, TypeData::Float { .. }) => {
                self.bx.cast(CastOp::SIToFP, value, dest_bty)
            }
            (TypeData::Integer { signed: false, .. }, TypeData::Float { .. }) => {
                self.bx.cast(CastOp::UIToFP, value, dest_bty)
            }
            (TypeData::Float { .. }, TypeData::Integer { signed: true, .. }) => {
                self.bx.cast(CastOp::FPToSI, value, dest_bty)
            }
            (TypeData::Float { .. }, TypeData::Integer { signed: false, .. }) => {
                self.bx.cast(CastOp::FPToUI, value, dest_bty)
            }
            (TypeData::Float { bits: from, .. }, TypeData::Float { bits: to, .. }) => {
                if from == to {
                    value
                } else if from < to {
                    self.bx.cast(CastOp::FPExt, value, dest_bty)
                } else {
                    self.bx.cast(CastOp::FPTrunc, value, dest_bty)
                }
            }
            _ => {
                return Err(SemaError::new(
                    ErrorCode::E3001,
                    Span::DUMMY,
                    "numeric conversion between non-numeric types",
                ));
            }
        };
        Ok(converted)
    }
}
