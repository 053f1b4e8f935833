//! Statement lowering.
//!
//! Returns `true` when the statement terminated the current block (so the
//! caller must not fall through). Scope exits destroy the value stack down
//! to the scope's marker on every path; loops get a dedicated continue block
//! that runs the loop scope's destructors.

use mica_backend::ValueId;
use mica_diagnostic::ErrorCode;
use mica_ir::{BindingKind, BindingName, Expr, ExprId, PrimOpCode, ReturnKind, Span, Stmt, StmtId};
use mica_types::{
    return_kind_to_by_ref, safe_analyze_multi, safe_analyze_one, type_bool_kind,
    unwrap_static_type, BoolKind, CValue, Env, MultiCValue, MultiPValue, Object, PValue,
    SemaError, SemaResult,
};

use crate::context::{FnCx, JumpTarget};

impl FnCx<'_> {
    /// Lower one statement; `true` means the path terminated.
    pub fn lower_statement(&self, stmt: StmtId, env: &Env) -> SemaResult<bool> {
        let span = self.comp().stmt_span(stmt);
        match self.comp().stmt(stmt) {
            Stmt::Block(stmts) => self.lower_block(&stmts, env, span),
            Stmt::Label(_) => Err(SemaError::new(
                ErrorCode::E4001,
                span,
                "labels can only appear directly within blocks",
            )),
            Stmt::Binding { .. } => Err(SemaError::new(
                ErrorCode::E4005,
                span,
                "bindings can only appear directly within blocks",
            )),
            Stmt::Assign { left, right } => self.lower_assign(&left, &right, env, span),
            Stmt::InitAssign { left, right } => self.lower_init_assign(&left, &right, env, span),
            Stmt::UpdateAssign { op, prefix, exprs } => {
                self.lower_update_assign(op, prefix, &exprs, env, span)
            }
            Stmt::Goto(label) => {
                let target = self.labels.borrow().get(&label).cloned();
                let Some(target) = target else {
                    return Err(SemaError::new(
                        ErrorCode::E4001,
                        span,
                        format!("goto label not found: {}", self.comp().str(label)),
                    ));
                };
                self.destroy_stack(target.stack_marker, false)?;
                target.use_count.set(target.use_count.get() + 1);
                self.bx.br(target.block);
                Ok(true)
            }
            Stmt::Return { kind, values } => self.lower_return(kind, &values, env, span),
            Stmt::If {
                condition_statements,
                condition,
                then_part,
                else_part,
            } => self.lower_if(&condition_statements, condition, then_part, else_part, env, span),
            Stmt::ExprStmt(expr) => {
                let temp_marker = self.mark_temps();
                let stack_marker = self.mark_stack();
                self.lower_expr_as_ref(expr, env)?;
                self.destroy_and_pop_stack(stack_marker, false)?;
                self.clear_temps(temp_marker);
                Ok(false)
            }
            Stmt::While {
                condition_statements,
                condition,
                body,
            } => self.lower_while(&condition_statements, condition, body, env),
            Stmt::Break => self.lower_break_or_continue(&self.break_targets, "break", span),
            Stmt::Continue => {
                self.lower_break_or_continue(&self.continue_targets, "continue", span)
            }
            Stmt::Try { body, catch } => self.lower_try(body, catch, env),
            Stmt::Throw { value } => self.lower_throw(value, env, span),
            Stmt::StaticFor {
                variable,
                values,
                body,
            } => self.lower_static_for(variable, &values, body, env),
            Stmt::Finally(body) => {
                self.push_stack_finally(body, env.clone());
                Ok(false)
            }
            Stmt::OnError(body) => {
                self.push_stack_on_error(body, env.clone());
                Ok(false)
            }
            Stmt::Unreachable => {
                self.bx.unreachable();
                Ok(true)
            }
            Stmt::StaticAssert { condition, message } => {
                self.comp()
                    .evaluate_static_assert(span, condition, &message, env)?;
                Ok(false)
            }
        }
    }

    /// Blocks collect labels first so forward gotos resolve, then lower
    /// statements in order; scope exit destroys everything above the marker.
    fn lower_block(&self, stmts: &[StmtId], env: &Env, span: Span) -> SemaResult<bool> {
        let marker = self.mark_stack();
        self.push_debug_scope(span);
        self.collect_labels(stmts)?;

        let mut block_env = env.child();
        let mut terminated = false;
        for &stmt in stmts {
            match self.comp().stmt(stmt) {
                // A label re-opens the path: forward gotos land here.
                Stmt::Label(name) => {
                    let target = self.labels.borrow().get(&name).cloned();
                    if let Some(target) = target {
                        if !terminated {
                            self.bx.br(target.block);
                        }
                        self.bx.position_at_end(target.block);
                        terminated = false;
                    }
                }
                _ if terminated => {
                    return Err(SemaError::new(
                        ErrorCode::E4002,
                        self.comp().stmt_span(stmt),
                        "unreachable code",
                    ));
                }
                Stmt::Binding {
                    kind,
                    names,
                    values,
                } => {
                    block_env = self.lower_binding(kind, &names, &values, &block_env)?;
                }
                _ => {
                    terminated = self.lower_statement(stmt, &block_env)?;
                }
            }
        }

        if !terminated {
            self.destroy_stack(marker, false)?;
        }
        self.pop_stack(marker);
        self.pop_debug_scope();
        Ok(terminated)
    }

    /// Pre-create a block per label so forward gotos can branch to it.
    fn collect_labels(&self, stmts: &[StmtId]) -> SemaResult<()> {
        for &stmt in stmts {
            if let Stmt::Label(name) = self.comp().stmt(stmt) {
                let block = self.new_block("label");
                self.labels
                    .borrow_mut()
                    .insert(name, JumpTarget::new(block, self.mark_stack()));
            }
        }
        Ok(())
    }

    fn lower_break_or_continue(
        &self,
        targets: &std::cell::RefCell<Vec<JumpTarget>>,
        what: &str,
        span: Span,
    ) -> SemaResult<bool> {
        let target = targets.borrow().last().cloned();
        let Some(target) = target else {
            return Err(SemaError::new(
                ErrorCode::E4005,
                span,
                format!("invalid {what} statement"),
            ));
        };
        self.destroy_stack(target.stack_marker, false)?;
        target.use_count.set(target.use_count.get() + 1);
        self.bx.br(target.block);
        Ok(true)
    }

    /// `var`/`ref`/`forward`/`alias` bindings extend the environment.
    pub fn lower_binding(
        &self,
        kind: BindingKind,
        names: &[BindingName],
        values: &[ExprId],
        env: &Env,
    ) -> SemaResult<Env> {
        let span = values
            .first()
            .map_or(Span::DUMMY, |&e| self.comp().expr_span(e));
        match kind {
            BindingKind::Var => {
                let mpv = safe_analyze_multi(self.comp(), values, env, names.len().max(1))?;
                check_binding_arity(names, mpv.len(), span)?;
                // Fresh storage per position; RHS evaluated into it.
                let mut slots = MultiCValue::new();
                for pv in &mpv.values {
                    slots.push(self.alloc_new_value(pv.ty)?);
                }
                let temp_marker = self.mark_temps();
                let stack_marker = self.mark_stack();
                self.lower_multi_into(values, env, &slots, names.len())?;
                self.destroy_and_pop_stack(stack_marker, false)?;
                self.clear_temps(temp_marker);
                Ok(self.bind_value_names(names, &slots, env, |cv| {
                    self.push_stack_value(cv);
                    cv
                }))
            }
            BindingKind::Ref => {
                let mpv = safe_analyze_multi(self.comp(), values, env, names.len())?;
                check_binding_arity(names, mpv.len(), span)?;
                for (i, pv) in mpv.values.iter().enumerate() {
                    if pv.is_temp {
                        return Err(SemaError::new(
                            ErrorCode::E3011,
                            span,
                            format!("ref binding {i} requires an lvalue"),
                        ));
                    }
                }
                let refs = self.lower_multi_as_ref(values, env)?;
                Ok(self.bind_value_names(names, &refs, env, |cv| cv))
            }
            BindingKind::Forward => {
                let mpv = safe_analyze_multi(self.comp(), values, env, names.len())?;
                check_binding_arity(names, mpv.len(), span)?;
                let forwarded = self.lower_forward_multi_as_ref(values, env)?;
                let _ = mpv;
                Ok(self.bind_value_names(names, &forwarded, env, |cv| cv))
            }
            BindingKind::Alias => {
                if names.len() != 1 || values.len() != 1 {
                    return Err(SemaError::new(
                        ErrorCode::E3002,
                        span,
                        "alias bindings take exactly one name and one value",
                    ));
                }
                let new_env = env.child();
                new_env.add_local(names[0].name, Object::AliasExpr(values[0], env.clone()));
                Ok(new_env)
            }
        }
    }

    /// Bind names to values, routing variadic groups to a multi entry.
    fn bind_value_names(
        &self,
        names: &[BindingName],
        values: &MultiCValue,
        env: &Env,
        mut each: impl FnMut(CValue) -> CValue,
    ) -> Env {
        let new_env = env.child();
        let var_len = values.len() + 1 - names.len();
        let mut index = 0usize;
        for binding in names {
            if binding.var_arg {
                let mut group = MultiCValue::new();
                for _ in 0..var_len {
                    group.push(each(values.values[index]));
                    index += 1;
                }
                new_env.add_local(binding.name, Object::MultiCValue(group));
            } else {
                new_env.add_local(binding.name, Object::CValue(each(values.values[index])));
                index += 1;
            }
        }
        new_env
    }

    /// `=` assignment, including the indexing/static-indexing/field routes.
    fn lower_assign(
        &self,
        left: &[ExprId],
        right: &[ExprId],
        env: &Env,
        span: Span,
    ) -> SemaResult<bool> {
        let left_mpv = safe_analyze_multi(self.comp(), left, env, 0)?;
        let right_mpv = safe_analyze_multi(self.comp(), right, env, left_mpv.len())?;
        if left_mpv.len() != right_mpv.len() {
            return Err(SemaError::new(
                ErrorCode::E3002,
                span,
                format!(
                    "cannot assign {} value(s) to {} location(s)",
                    right_mpv.len(),
                    left_mpv.len()
                ),
            ));
        }

        let temp_marker = self.mark_temps();
        let stack_marker = self.mark_stack();

        // Multi-assignments evaluate the RHS into temporaries first.
        let (right_values, right_pvs) = if right_mpv.len() == 1 {
            let values = self.lower_multi_as_ref(right, env)?;
            (values, right_mpv.clone())
        } else {
            let mut values = MultiCValue::new();
            let mut pvs = MultiPValue::new();
            for pv in &right_mpv.values {
                values.push(self.alloc_value(pv.ty)?);
                pvs.push(PValue::rvalue(pv.ty));
            }
            self.lower_multi_into(right, env, &values, left_mpv.len())?;
            for cv in &values.values {
                self.push_stack_value(*cv);
            }
            (values, pvs)
        };

        for (i, &left_expr) in left.iter().enumerate() {
            self.lower_expr_assign(
                left_expr,
                right_values.values[i],
                right_pvs.values[i],
                env,
                span,
            )?;
        }

        self.destroy_and_pop_stack(stack_marker, false)?;
        self.clear_temps(temp_marker);
        Ok(false)
    }

    /// One assignment target; indexing/field targets over non-static bases
    /// route to the dedicated operators.
    fn lower_expr_assign(
        &self,
        left: ExprId,
        right: CValue,
        right_pv: PValue,
        env: &Env,
        span: Span,
    ) -> SemaResult<()> {
        match self.comp().expr(left) {
            Expr::Indexing { base, args } => {
                let base_pv = safe_analyze_one(self.comp(), base, env)?;
                if unwrap_static_type(self.comp(), base_pv.ty).is_none() {
                    let mut exprs = vec![base];
                    exprs.extend_from_slice(&args);
                    let (mut arg_values, mut pv_args) =
                        self.lower_args_with_analysis(&exprs, env)?;
                    arg_values.push(right);
                    pv_args.push(right_pv);
                    return self.lower_call_object(
                        &self.comp().operator(PrimOpCode::IndexAssign),
                        &arg_values,
                        &pv_args,
                        &MultiCValue::new(),
                        span,
                    );
                }
            }
            Expr::StaticIndexing { base, index } => {
                let base_cv = self.lower_one_as_ref(base, env)?;
                let base_pv = safe_analyze_one(self.comp(), base, env)?;
                let index_static = self.static_cvalue(Object::Holder(
                    self.comp().size_t_holder(u64::from(index)),
                ))?;
                let mut arg_values = MultiCValue::one(base_cv);
                arg_values.push(index_static);
                arg_values.push(right);
                let mut pv_args = MultiPValue::one(base_pv);
                pv_args.push(PValue::rvalue(index_static.ty));
                pv_args.push(right_pv);
                return self.lower_call_object(
                    &self.comp().operator(PrimOpCode::StaticIndexAssign),
                    &arg_values,
                    &pv_args,
                    &MultiCValue::new(),
                    span,
                );
            }
            Expr::FieldRef { base, field } => {
                let base_pv = safe_analyze_one(self.comp(), base, env)?;
                if unwrap_static_type(self.comp(), base_pv.ty).is_none() {
                    let base_cv = self.lower_one_as_ref(base, env)?;
                    let ident = self.static_cvalue(Object::Ident(field))?;
                    let mut arg_values = MultiCValue::one(base_cv);
                    arg_values.push(ident);
                    arg_values.push(right);
                    let mut pv_args = MultiPValue::one(base_pv);
                    pv_args.push(PValue::rvalue(ident.ty));
                    pv_args.push(right_pv);
                    return self.lower_call_object(
                        &self.comp().operator(PrimOpCode::FieldRefAssign),
                        &arg_values,
                        &pv_args,
                        &MultiCValue::new(),
                        span,
                    );
                }
            }
            _ => {}
        }
        let left_pv = safe_analyze_one(self.comp(), left, env)?;
        let left_cv = self.lower_one_as_ref(left, env)?;
        self.value_assign(left_cv, left_pv, right, right_pv)
    }

    /// `:=` — exact arity and types, RHS evaluated directly into LHS storage.
    fn lower_init_assign(
        &self,
        left: &[ExprId],
        right: &[ExprId],
        env: &Env,
        span: Span,
    ) -> SemaResult<bool> {
        let left_mpv = safe_analyze_multi(self.comp(), left, env, 0)?;
        let right_mpv = safe_analyze_multi(self.comp(), right, env, left_mpv.len())?;
        if left_mpv.len() != right_mpv.len() {
            return Err(SemaError::new(
                ErrorCode::E3002,
                span,
                "initializing assignment arity mismatch",
            ));
        }
        for (i, (l, r)) in left_mpv.values.iter().zip(&right_mpv.values).enumerate() {
            if l.is_temp {
                return Err(SemaError::new(
                    ErrorCode::E3011,
                    span,
                    format!("cannot assign to temporary in position {i}"),
                ));
            }
            if l.ty != r.ty {
                return Err(SemaError::new(
                    ErrorCode::E3001,
                    span,
                    format!(
                        "position {i}: expected {}, got {}",
                        self.comp().type_name(l.ty),
                        self.comp().type_name(r.ty)
                    ),
                ));
            }
        }
        let temp_marker = self.mark_temps();
        let stack_marker = self.mark_stack();
        let left_values = self.lower_multi_as_ref(left, env)?;
        self.lower_multi_into(right, env, &left_values, left_mpv.len())?;
        self.destroy_and_pop_stack(stack_marker, false)?;
        self.clear_temps(temp_marker);
        Ok(false)
    }

    /// `op=` and its prefix form, routed through the update operators.
    fn lower_update_assign(
        &self,
        op: ExprId,
        prefix: bool,
        exprs: &[ExprId],
        env: &Env,
        span: Span,
    ) -> SemaResult<bool> {
        let dest = exprs[0];
        // Indexing/static-indexing/field destinations over non-static bases
        // use the element-update operators.
        let routed = match self.comp().expr(dest) {
            Expr::Indexing { base, .. } => {
                let base_pv = safe_analyze_one(self.comp(), base, env)?;
                if unwrap_static_type(self.comp(), base_pv.ty).is_none() {
                    Some(PrimOpCode::IndexUpdateAssign)
                } else {
                    None
                }
            }
            Expr::StaticIndexing { .. } => Some(PrimOpCode::StaticIndexUpdateAssign),
            Expr::FieldRef { base, .. } => {
                let base_pv = safe_analyze_one(self.comp(), base, env)?;
                if unwrap_static_type(self.comp(), base_pv.ty).is_none() {
                    Some(PrimOpCode::FieldRefUpdateAssign)
                } else {
                    None
                }
            }
            _ => None,
        };

        let temp_marker = self.mark_temps();
        let stack_marker = self.mark_stack();
        let op_obj = self.comp().evaluate_one_static(op, env)?;
        let op_static = self.static_cvalue(op_obj)?;

        let (code, dest_values, dest_pvs) = match routed {
            Some(code) => {
                let (dest_parts, dest_pvs) = self.lower_update_destination(dest, env)?;
                (code, dest_parts, dest_pvs)
            }
            None => {
                let dest_cv = self.lower_one_as_ref(dest, env)?;
                let dest_pv = safe_analyze_one(self.comp(), dest, env)?;
                (
                    if prefix {
                        PrimOpCode::PrefixUpdateAssign
                    } else {
                        PrimOpCode::UpdateAssign
                    },
                    MultiCValue::one(dest_cv),
                    MultiPValue::one(dest_pv),
                )
            }
        };

        let mut all_values = MultiCValue::one(op_static);
        all_values.extend(&dest_values);
        let mut all_pvs = MultiPValue::one(PValue::rvalue(op_static.ty));
        all_pvs.extend(&dest_pvs);
        for &operand in &exprs[1..] {
            let cv = self.lower_one_as_ref(operand, env)?;
            let pv = safe_analyze_one(self.comp(), operand, env)?;
            all_values.push(cv);
            all_pvs.push(pv);
        }

        self.lower_call_object(
            &self.comp().operator(code),
            &all_values,
            &all_pvs,
            &MultiCValue::new(),
            span,
        )?;
        self.destroy_and_pop_stack(stack_marker, false)?;
        self.clear_temps(temp_marker);
        Ok(false)
    }

    /// Base and key of an element-update destination.
    fn lower_update_destination(
        &self,
        dest: ExprId,
        env: &Env,
    ) -> SemaResult<(MultiCValue, MultiPValue)> {
        match self.comp().expr(dest) {
            Expr::Indexing { base, args } => {
                let mut exprs = vec![base];
                exprs.extend_from_slice(&args);
                self.lower_args_with_analysis(&exprs, env)
            }
            Expr::StaticIndexing { base, index } => {
                let base_cv = self.lower_one_as_ref(base, env)?;
                let base_pv = safe_analyze_one(self.comp(), base, env)?;
                let idx = self.static_cvalue(Object::Holder(
                    self.comp().size_t_holder(u64::from(index)),
                ))?;
                let mut values = MultiCValue::one(base_cv);
                values.push(idx);
                let mut pvs = MultiPValue::one(base_pv);
                pvs.push(PValue::rvalue(idx.ty));
                Ok((values, pvs))
            }
            Expr::FieldRef { base, field } => {
                let base_cv = self.lower_one_as_ref(base, env)?;
                let base_pv = safe_analyze_one(self.comp(), base, env)?;
                let ident = self.static_cvalue(Object::Ident(field))?;
                let mut values = MultiCValue::one(base_cv);
                values.push(ident);
                let mut pvs = MultiPValue::one(base_pv);
                pvs.push(PValue::rvalue(ident.ty));
                Ok((values, pvs))
            }
            _ => panic!("not an element-update destination"),
        }
    }

    /// `return` in its three flavors; unwinds to the return target.
    fn lower_return(
        &self,
        kind: ReturnKind,
        values: &[ExprId],
        env: &Env,
        span: Span,
    ) -> SemaResult<bool> {
        let mpv = safe_analyze_multi(self.comp(), values, env, 1)?;
        let returns = self
            .return_lists
            .borrow()
            .last()
            .cloned()
            .unwrap_or_default();
        if mpv.len() != returns.len() {
            return Err(SemaError::new(
                ErrorCode::E3002,
                span,
                format!("expected {} return value(s), got {}", returns.len(), mpv.len()),
            ));
        }
        let mut outs = MultiCValue::new();
        for (i, (pv, ret)) in mpv.values.iter().zip(&returns).enumerate() {
            let by_ref = return_kind_to_by_ref(kind, *pv);
            if ret.ty != pv.ty {
                return Err(SemaError::new(
                    ErrorCode::E3001,
                    span,
                    format!(
                        "return {i}: expected {}, got {}",
                        self.comp().type_name(ret.ty),
                        self.comp().type_name(pv.ty)
                    ),
                ));
            }
            if by_ref != ret.by_ref {
                return Err(SemaError::new(
                    ErrorCode::E3001,
                    span,
                    format!("return {i}: mismatching by-ref and by-value returns"),
                ));
            }
            if by_ref && pv.is_temp {
                return Err(SemaError::new(
                    ErrorCode::E3011,
                    span,
                    "cannot return a temporary by reference",
                ));
            }
            outs.push(ret.value);
        }

        match kind {
            ReturnKind::Value => self.lower_multi_into(values, env, &outs, 1)?,
            ReturnKind::Ref => {
                let refs = self.lower_multi_as_ref(values, env)?;
                for (slot, source) in outs.values.iter().zip(&refs.values) {
                    self.bx.store(source.ptr, slot.ptr);
                }
            }
            ReturnKind::Forward => self.lower_multi_forward(values, env, &outs, 1)?,
        }

        let (marker, block) = {
            let targets = self.return_targets.borrow();
            let target = targets.last().unwrap_or_else(|| panic!("no return target"));
            target.use_count.set(target.use_count.get() + 1);
            (target.stack_marker, target.block)
        };
        self.destroy_stack(marker, false)?;
        self.bx.br(block);
        Ok(true)
    }

    /// `if` with compile-time-true/false/runtime condition shapes.
    fn lower_if(
        &self,
        condition_statements: &[StmtId],
        condition: ExprId,
        then_part: StmtId,
        else_part: Option<StmtId>,
        env: &Env,
        span: Span,
    ) -> SemaResult<bool> {
        let scope_marker = self.mark_stack();
        let mut env2 = env.child();
        for &cs in condition_statements {
            if let Stmt::Binding {
                kind,
                names,
                values,
            } = self.comp().stmt(cs)
            {
                env2 = self.lower_binding(kind, &names, &values, &env2)?;
            } else {
                self.lower_statement(cs, &env2)?;
            }
        }

        let temp_marker = self.mark_temps();
        let cond_marker = self.mark_stack();
        let cond_cv = self.lower_one_as_ref(condition, &env2)?;
        let kind = type_bool_kind(self.comp(), cond_cv.ty);
        let flag = match kind {
            BoolKind::Expr => Some(self.to_bool_flag(cond_cv, span)?),
            _ => None,
        };
        self.destroy_and_pop_stack(cond_marker, false)?;
        self.clear_temps(temp_marker);

        let mut then_block = None;
        let mut else_block = None;
        if matches!(kind, BoolKind::Expr | BoolKind::StaticTrue) {
            then_block = Some(self.new_block("ifTrue"));
        }
        if matches!(kind, BoolKind::Expr | BoolKind::StaticFalse) {
            else_block = Some(self.new_block("ifFalse"));
        }

        match (kind, flag) {
            (BoolKind::Expr, Some(flag)) => {
                self.bx.cond_br(
                    flag,
                    then_block.unwrap_or_else(|| panic!("missing then block")),
                    else_block.unwrap_or_else(|| panic!("missing else block")),
                );
            }
            (BoolKind::StaticTrue, _) => {
                self.bx
                    .br(then_block.unwrap_or_else(|| panic!("missing then block")));
            }
            _ => {
                self.bx
                    .br(else_block.unwrap_or_else(|| panic!("missing else block")));
            }
        }

        let mut merge_block = None;
        let mut terminated_then = true;
        let mut terminated_else = true;

        if let Some(block) = then_block {
            self.bx.position_at_end(block);
            terminated_then = self.lower_statement(then_part, &env2)?;
            if !terminated_then {
                let merge = *merge_block.get_or_insert_with(|| self.new_block("ifMerge"));
                self.bx.br(merge);
            }
        }
        if let Some(block) = else_block {
            self.bx.position_at_end(block);
            terminated_else = match else_part {
                Some(else_part) => self.lower_statement(else_part, &env2)?,
                None => false,
            };
            if !terminated_else {
                let merge = *merge_block.get_or_insert_with(|| self.new_block("ifMerge"));
                self.bx.br(merge);
            }
        }

        let terminated = terminated_then && terminated_else;
        if let Some(merge) = merge_block {
            self.bx.position_at_end(merge);
        }
        if !terminated {
            self.destroy_stack(scope_marker, false)?;
        }
        self.pop_stack(scope_marker);
        Ok(terminated)
    }

    /// `while`, with a dedicated continue block that runs the loop scope's
    /// destructors before re-testing.
    fn lower_while(
        &self,
        condition_statements: &[StmtId],
        condition: ExprId,
        body: StmtId,
        env: &Env,
    ) -> SemaResult<bool> {
        let span = self.comp().expr_span(condition);
        let begin_block = self.new_block("whileBegin");
        let body_block = self.new_block("whileBody");
        let continue_block = self.new_block("whileContinue");
        let end_block = self.new_block("whileEnd");

        self.bx.br(begin_block);
        self.bx.position_at_end(begin_block);

        let scope_marker = self.mark_stack();
        let mut env2 = env.child();
        for &cs in condition_statements {
            if let Stmt::Binding {
                kind,
                names,
                values,
            } = self.comp().stmt(cs)
            {
                env2 = self.lower_binding(kind, &names, &values, &env2)?;
            } else {
                self.lower_statement(cs, &env2)?;
            }
        }

        let temp_marker = self.mark_temps();
        let cond_marker = self.mark_stack();
        let cond_cv = self.lower_one_as_ref(condition, &env2)?;
        let cond_is_static_true =
            matches!(type_bool_kind(self.comp(), cond_cv.ty), BoolKind::StaticTrue)
                || matches!(self.comp().expr(condition), Expr::BoolLit(true));
        let flag = if cond_is_static_true {
            self.bx.const_bool(true)
        } else {
            self.to_bool_flag(cond_cv, span)?
        };
        self.destroy_and_pop_stack(cond_marker, false)?;
        self.clear_temps(temp_marker);
        self.bx.cond_br(flag, body_block, end_block);

        self.break_targets
            .borrow_mut()
            .push(JumpTarget::new(end_block, self.mark_stack()));
        self.continue_targets
            .borrow_mut()
            .push(JumpTarget::new(continue_block, self.mark_stack()));

        self.bx.position_at_end(body_block);
        let terminated = self.lower_statement(body, &env2)?;
        if !terminated {
            self.bx.br(continue_block);
        }
        self.bx.position_at_end(continue_block);
        self.destroy_stack(scope_marker, false)?;
        self.bx.br(begin_block);

        let break_used = self
            .break_targets
            .borrow()
            .last()
            .map(|t| t.use_count.get() > 0)
            .unwrap_or(false);
        self.break_targets.borrow_mut().pop();
        self.continue_targets.borrow_mut().pop();

        self.bx.position_at_end(end_block);
        if cond_is_static_true && !break_used {
            // `while true` with no reachable break terminates the function.
            self.bx.unreachable();
            self.pop_stack(scope_marker);
            return Ok(true);
        }
        self.destroy_stack(scope_marker, false)?;
        self.pop_stack(scope_marker);
        Ok(false)
    }

    /// `try`/`catch`: push an exception target around the try block; the
    /// catch block runs with the exception available for rethrow.
    fn lower_try(&self, body: StmtId, catch: StmtId, env: &Env) -> SemaResult<bool> {
        if !self.comp().exceptions_enabled() {
            return self.lower_statement(body, env);
        }
        let catch_begin = self.new_block("catchBegin");
        self.exception_targets
            .borrow_mut()
            .push(JumpTarget::new(catch_begin, self.mark_stack()));
        let try_terminated = self.lower_statement(body, env)?;
        let mut catch_end = None;
        if !try_terminated {
            let end = self.new_block("catchEnd");
            catch_end = Some(end);
            self.bx.br(end);
        }
        self.exception_targets.borrow_mut().pop();

        self.bx.position_at_end(catch_begin);
        let catch_env = env.exception_scope();
        let catch_terminated = self.lower_statement(catch, &catch_env)?;
        if !catch_terminated {
            let end = catch_end.unwrap_or_else(|| self.new_block("catchEnd"));
            catch_end = Some(end);
            self.bx.br(end);
        }
        if let Some(end) = catch_end {
            self.bx.position_at_end(end);
        }
        Ok(try_terminated && catch_terminated)
    }

    /// `throw x;` reduces to `throwValue(x)` followed by unreachable;
    /// `throw;` rethrows the active exception.
    fn lower_throw(&self, value: Option<ExprId>, env: &Env, span: Span) -> SemaResult<bool> {
        if value.is_none() && !env.exception_available() {
            return Err(SemaError::new(
                ErrorCode::E4003,
                span,
                "rethrow is only valid inside a catch block",
            ));
        }
        let temp_marker = self.mark_temps();
        let stack_marker = self.mark_stack();
        let (cv, pv) = match value {
            Some(value) => {
                let cv = self.lower_one_as_ref(value, env)?;
                let pv = safe_analyze_one(self.comp(), value, env)?;
                (cv, pv)
            }
            None => {
                // Rethrow the active exception object.
                let ty = self
                    .comp()
                    .types
                    .pointer_type(self.comp().types.int8_type);
                let cv = self.alloc_value(ty)?;
                let active = self.bx.load(mica_backend::BType::Ptr, self.exception_value);
                self.bx.store(active, cv.ptr);
                (cv, PValue::rvalue(ty))
            }
        };
        self.lower_call_object(
            &self.comp().operator(PrimOpCode::ThrowValue),
            &MultiCValue::one(cv),
            &MultiPValue::one(pv),
            &MultiCValue::new(),
            span,
        )?;
        self.destroy_and_pop_stack(stack_marker, false)?;
        self.clear_temps(temp_marker);
        if !self.bx.is_terminated() {
            self.bx.unreachable();
        }
        Ok(true)
    }

    /// `static for`: the body is lowered once per compile-time value.
    fn lower_static_for(
        &self,
        variable: mica_ir::Name,
        values: &[ExprId],
        body: StmtId,
        env: &Env,
    ) -> SemaResult<bool> {
        let items = self.lower_forward_multi_as_ref(values, env)?;
        let mut terminated = false;
        let _disabler = self.comp().disable_caching();
        for (iteration, cv) in items.values.iter().enumerate() {
            if terminated {
                return Err(SemaError::new(
                    ErrorCode::E4002,
                    self.comp().stmt_span(body),
                    format!("unreachable code in iteration {}", iteration + 1),
                ));
            }
            let iter_env = env.child();
            iter_env.add_local(variable, Object::CValue(*cv));
            terminated = self.lower_statement(body, &iter_env)?;
        }
        Ok(terminated)
    }

    /// Store a flag into a fresh bool slot (used by tests and ops).
    pub fn store_bool_flag(&self, flag: ValueId) -> SemaResult<CValue> {
        let cv = self.alloc_value(self.comp().types.bool_type)?;
        self.bx.store(flag, cv.ptr);
        Ok(cv)
    }
}

fn check_binding_arity(names: &[BindingName], got: usize, span: Span) -> SemaResult<()> {
    let has_var = names.iter().any(|n| n.var_arg);
    let fixed = names.len() - usize::from(has_var);
    let ok = if has_var {
        got >= fixed
    } else {
        got == names.len()
    };
    if ok {
        Ok(())
    } else {
        Err(SemaError::new(
            ErrorCode::E3002,
            span,
            format!("expected {} value(s), got {got}", names.len()),
        ))
    }
}
