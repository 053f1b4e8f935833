//! Entry emission: function bodies, module constructors/destructors, and the
//! C `main` wrapper.
//!
//! A lowered function has four fixed blocks: `init` (allocas), `code`,
//! `return` (stores the null sentinel and returns), and `exception` (returns
//! the active exception). The init block branches to code once the body is
//! emitted, so every slot dominates its uses.

use std::rc::Rc;

use mica_backend::{BType, Callee, FnAttr, FuncId, Linkage, ParamAttr};
use mica_diagnostic::ErrorCode;
use mica_ir::{CallingConv, CodeBody, InlineKind, Item, Module, PrimOpCode, Span};
use mica_types::invoke::{safe_analyze_callable, InvokeEntry};
use mica_types::{
    CValue, Env, GVarInstance, MultiCValue, MultiPValue, Object, PValue, SemaError, SemaResult,
};
use tracing::debug;

use crate::context::{CReturn, FnCx, JumpTarget, LowerCx};

/// Readable, unique backend name for an entry.
fn entry_name(lx: LowerCx<'_>, entry: &Rc<InvokeEntry>) -> String {
    let comp = lx.comp;
    let args = entry
        .args_key
        .iter()
        .map(|&t| comp.type_name(t))
        .collect::<Vec<_>>()
        .join(", ");
    let base = format!("{}({args})", comp.object_name(&entry.callable));
    let mut name = base.clone();
    let mut counter = 1;
    while lx.bmod.func_by_name(&name).is_some() {
        counter += 1;
        name = format!("{base}.{counter}");
    }
    name
}

/// Emit the body of an invoke entry, returning its backend function.
pub fn lower_code_body(lx: LowerCx<'_>, entry: &Rc<InvokeEntry>) -> SemaResult<FuncId> {
    assert!(entry.analyzed.get(), "entry lowered before analysis");
    if let Some(func) = entry.lowered_fn.get() {
        return Ok(func);
    }
    let comp = lx.comp;
    let name = entry_name(lx, entry);
    debug!(name, "lowering entry");

    let code = entry
        .code
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("entry has no code"));

    if let CodeBody::Asm(text) = &code.body {
        return lower_asm_body(lx, entry, &name, text);
    }

    // Inputs as pointers-to-values, then pointers to the return slots
    // (pointer-to-pointer for by-ref returns), then the sentinel return.
    let mut params: Vec<BType> = vec![BType::Ptr; entry.args_key.len()];
    params.extend(std::iter::repeat(BType::Ptr).take(entry.return_types.borrow().len()));
    let func_id = lx
        .bmod
        .add_function(name, params.clone(), BType::Ptr, Linkage::Internal);
    entry.lowered_fn.set(Some(func_id));

    {
        let handle = lx.bmod.func(func_id);
        let mut data = handle.borrow_mut();
        match entry.is_inline.get() {
            InlineKind::Inline if comp.inline_enabled() => data.add_attr(FnAttr::InlineHint),
            InlineKind::NeverInline => data.add_attr(FnAttr::NoInline),
            _ => {}
        }
        for i in 0..params.len() {
            data.add_param_attr(i, ParamAttr::NoAlias);
        }
    }

    let handle = lx.bmod.func(func_id);
    let (init, code_block, return_block, exception_block) = {
        let mut data = handle.borrow_mut();
        (
            data.append_block("init"),
            data.append_block("code"),
            data.append_block("return"),
            data.append_block("exception"),
        )
    };
    let cx = FnCx::new(lx, func_id, init, code_block);

    // Bind arguments.
    let env = entry
        .env
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("entry has no match environment"))
        .child();
    bind_function_args(entry, &env, &handle);

    // Return slots arrive after the inputs.
    let mut returns = Vec::new();
    {
        let data = handle.borrow();
        for (i, (&by_ref, &ty)) in entry
            .return_is_ref
            .borrow()
            .iter()
            .zip(entry.return_types.borrow().iter())
            .enumerate()
        {
            let param = data.param(entry.args_key.len() + i);
            let value = if by_ref {
                CValue::new(comp.types.pointer_type(ty), param)
            } else {
                CValue::new(ty, param)
            };
            returns.push(CReturn { by_ref, ty, value });
        }
    }
    bind_named_returns(&code, &env, &returns);

    let has_named_return = code
        .return_specs
        .as_ref()
        .is_some_and(|specs| specs.iter().any(|s| s.name.is_some()))
        || code
            .var_return_spec
            .as_ref()
            .is_some_and(|s| s.name.is_some());

    cx.return_lists.borrow_mut().push(returns.clone());
    cx.return_targets
        .borrow_mut()
        .push(JumpTarget::new(return_block, cx.mark_stack()));
    cx.exception_targets
        .borrow_mut()
        .push(JumpTarget::new(exception_block, cx.mark_stack()));

    let CodeBody::Stmt(body) = code.body else {
        panic!("statement body expected");
    };
    let terminated = cx.lower_statement(body, &env)?;
    if !terminated {
        if !returns.is_empty() && !has_named_return {
            return Err(SemaError::new(
                ErrorCode::E4004,
                comp.stmt_span(body),
                "not all paths have a return statement",
            ));
        }
        cx.destroy_stack(0, false)?;
        cx.bx.br(return_block);
    }
    cx.pop_stack(0);

    entry
        .runtime_nop
        .set(handle.borrow().block_is_trivial_jump(code_block, return_block));

    cx.init_bx.br(code_block);

    // Normal path: store the null sentinel and return it.
    cx.bx.position_at_end(return_block);
    let no_exception = cx.bx.const_null();
    cx.bx.ret(Some(no_exception));

    // Exceptional path: return the active exception.
    cx.bx.position_at_end(exception_block);
    let active = cx.bx.load(BType::Ptr, cx.exception_value);
    cx.bx.ret(Some(active));

    Ok(func_id)
}

fn bind_function_args(
    entry: &Rc<InvokeEntry>,
    env: &Env,
    handle: &Rc<std::cell::RefCell<mica_backend::FunctionData>>,
) {
    let names = entry.fixed_arg_names.borrow();
    let types = entry.fixed_arg_types.borrow();
    let var_name = *entry.var_arg_name.borrow();
    let var_types = entry.var_arg_types.borrow();
    let flags = entry.forwarded_rvalue_flags.borrow();
    let var_position = entry.var_arg_position.get();
    let total = names.len() + usize::from(var_name.is_some());

    let data = handle.borrow();
    let mut param_index = 0usize;
    let mut fixed_index = 0usize;
    for slot in 0..total {
        if slot == var_position {
            let mut group = MultiCValue::new();
            for &ty in var_types.iter() {
                let mut cv = CValue::new(ty, data.param(param_index));
                cv.forwarded_rvalue = flags.get(param_index).copied().unwrap_or(false);
                group.push(cv);
                param_index += 1;
            }
            if let Some(var_name) = var_name {
                env.add_local(var_name, Object::MultiCValue(group));
            }
        } else {
            let mut cv = CValue::new(types[fixed_index], data.param(param_index));
            cv.forwarded_rvalue = flags.get(param_index).copied().unwrap_or(false);
            env.add_local(names[fixed_index], Object::CValue(cv));
            fixed_index += 1;
            param_index += 1;
        }
    }
}

fn bind_named_returns(code: &Rc<mica_ir::Code>, env: &Env, returns: &[CReturn]) {
    let Some(specs) = &code.return_specs else {
        return;
    };
    for (i, spec) in specs.iter().enumerate() {
        if let Some(name) = spec.name {
            env.add_local(name, Object::CValue(returns[i].value));
        }
    }
    if let Some(var_spec) = &code.var_return_spec {
        if let Some(name) = var_spec.name {
            let rest = MultiCValue::from_slice(
                &returns[specs.len()..]
                    .iter()
                    .map(|r| r.value)
                    .collect::<Vec<_>>(),
            );
            env.add_local(name, Object::MultiCValue(rest));
        }
    }
}

/// Textual backend body: interpolate and hand to the backend's parser.
fn lower_asm_body(
    lx: LowerCx<'_>,
    entry: &Rc<InvokeEntry>,
    name: &str,
    text: &str,
) -> SemaResult<FuncId> {
    let env = entry
        .env
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("entry has no match environment"));
    let interpolated = crate::interpolate::interpolate_asm(lx.comp, text, &env)?;
    lx.bmod
        .parse_function_text(name, &interpolated)
        .map_err(|e| {
            SemaError::new(ErrorCode::E4007, Span::DUMMY, format!("{name}: {e}"))
        })?;
    // The textual function still needs a callable declaration.
    let params: Vec<BType> =
        vec![BType::Ptr; entry.args_key.len() + entry.return_types.borrow().len()];
    let func_id = lx
        .bmod
        .add_function(name.to_owned(), params, BType::Ptr, Linkage::Internal);
    entry.lowered_fn.set(Some(func_id));
    Ok(func_id)
}

/// Emit a global variable instance: backend global plus constructor and
/// destructor registration.
impl<'c> LowerCx<'c> {
    pub fn lower_gvar_global(&self, inst: &Rc<GVarInstance>) -> SemaResult<mica_backend::GlobalId> {
        if let Some(global) = inst.lowered.get() {
            return Ok(global);
        }
        let comp = self.comp;
        let pv = mica_types::analyze_gvar_instance(comp, inst)?.ok_or_else(|| {
            SemaError::new(ErrorCode::E3007, Span::DUMMY, "unresolved global recursion")
        })?;
        let bty = comp.backend_type(pv.ty)?;
        let name = comp.str(inst.gvar.name).to_owned();
        let global = self.bmod.add_global(name, bty, Linkage::Internal);
        inst.lowered.set(Some(global));
        Ok(global)
    }
}

impl FnCx<'_> {
    /// Reference a global variable instance as an lvalue.
    pub fn lower_gvar_instance(&self, inst: &Rc<GVarInstance>) -> SemaResult<CValue> {
        let global = self.lx.lower_gvar_global(inst)?;
        let ty = inst
            .ty
            .get()
            .unwrap_or_else(|| panic!("global instance not analyzed"));
        let ptr = self.bx.global_ref(global);
        Ok(CValue::new(ty, ptr))
    }
}

/// Simple context (constructors/destructors function) wrapper.
struct SimpleCx<'c> {
    cx: FnCx<'c>,
    return_block: mica_backend::BlockId,
    exception_block: mica_backend::BlockId,
}

fn set_up_simple_context<'c>(lx: LowerCx<'c>, name: &str) -> SimpleCx<'c> {
    let func_id = lx
        .bmod
        .add_function(name, Vec::new(), BType::Void, Linkage::Internal);
    let handle = lx.bmod.func(func_id);
    let (init, code, return_block, exception_block) = {
        let mut data = handle.borrow_mut();
        (
            data.append_block("init"),
            data.append_block("code"),
            data.append_block("return"),
            data.append_block("exception"),
        )
    };
    let cx = FnCx::new(lx, func_id, init, code);
    cx.return_lists.borrow_mut().push(Vec::new());
    cx.return_targets
        .borrow_mut()
        .push(JumpTarget::new(return_block, 0));
    cx.exception_targets
        .borrow_mut()
        .push(JumpTarget::new(exception_block, 0));
    SimpleCx {
        cx,
        return_block,
        exception_block,
    }
}

fn finalize_simple_context(simple: &SimpleCx<'_>, error_op: PrimOpCode) -> SemaResult<()> {
    let cx = &simple.cx;
    cx.bx.br(simple.return_block);
    cx.bx.position_at_end(simple.return_block);
    cx.bx.ret(None);

    cx.bx.position_at_end(simple.exception_block);
    if cx.comp().exceptions_enabled() {
        cx.lower_call_object(
            &cx.comp().operator(error_op),
            &MultiCValue::new(),
            &MultiPValue::new(),
            &MultiCValue::new(),
            Span::DUMMY,
        )?;
    }
    cx.bx.unreachable();
    cx.init_bx.br(cx.code_block);
    Ok(())
}

/// Emit backend IR for a module's entry points: globals with their
/// constructors/destructors, externals with bodies, and `main` when present.
pub fn lower_entry_points(
    comp: &mica_types::Compilation,
    bmod: &mica_backend::Module,
    module: &Rc<Module>,
    include_imports: bool,
) -> SemaResult<()> {
    let _ = include_imports; // module graphs arrive pre-flattened
    comp.set_main_module(module.clone());
    let lx = LowerCx::new(comp, bmod);

    let ctors = set_up_simple_context(lx, "mica_globals_init");
    let dtors = set_up_simple_context(lx, "mica_globals_destroy");

    // Demand every parameterless global so initialization order is the
    // declaration order.
    let mut initialized: Vec<(Rc<GVarInstance>, CValue)> = Vec::new();
    for item in module.top_level.borrow().iter() {
        if let Item::Global(gvar) = item {
            let inst = comp.gvar_instance(gvar, Vec::new());
            let global = lx.lower_gvar_global(&inst)?;
            let ty = inst
                .ty
                .get()
                .unwrap_or_else(|| panic!("global instance not analyzed"));
            let ptr = ctors.cx.bx.global_ref(global);
            let dest = CValue::new(ty, ptr);
            ctors.cx.lower_one_into(inst.gvar.init, &inst.env, dest)?;
            initialized.push((inst, dest));
        }
    }

    // Destructors run in reverse initialization order.
    for (inst, dest) in initialized.iter().rev() {
        let global = inst
            .lowered
            .get()
            .unwrap_or_else(|| panic!("global not lowered"));
        let ptr = dtors.cx.bx.global_ref(global);
        dtors.cx.value_destroy(CValue::new(dest.ty, ptr))?;
    }

    finalize_simple_context(&ctors, PrimOpCode::ExceptionInInitializer)?;
    finalize_simple_context(&dtors, PrimOpCode::ExceptionInFinalizer)?;

    // Register both at standard priority; without a destructor array the
    // constructor registers the destructor via atexit.
    bmod.append_global_ctor(65535, ctors.cx.func_id);
    if bmod.supports_dtor_array {
        bmod.append_global_dtor(65535, dtors.cx.func_id);
    } else {
        let atexit = match bmod.func_by_name("atexit") {
            Some(func) => func,
            None => bmod.add_function(
                "atexit",
                vec![BType::Ptr],
                BType::I32,
                Linkage::External,
            ),
        };
        let dtor_ref = ctors.cx.bx.func_ref(dtors.cx.func_id);
        ctors
            .cx
            .bx
            .call(Callee::Func(atexit), vec![dtor_ref], BType::I32);
    }

    // External procedures with bodies are entry points.
    for item in module.top_level.borrow().iter() {
        if let Item::External(ext) = item {
            if ext.body.is_some() {
                lx.lower_external_procedure(ext, true)?;
            }
        }
    }

    if module.lookup(comp.name("main")).is_some() {
        codegen_main(comp, bmod, module)?;
    }
    Ok(())
}

/// Synthesize the C-ABI `main(argc, argv)` wrapper calling the user's `main`
/// through the `callMain` operator.
pub fn codegen_main(
    comp: &mica_types::Compilation,
    bmod: &mica_backend::Module,
    module: &Rc<Module>,
) -> SemaResult<FuncId> {
    let lx = LowerCx::new(comp, bmod);
    let Some(Item::Proc(main_proc)) = module.lookup(comp.name("main")) else {
        return Err(SemaError::new(
            ErrorCode::E3008,
            Span::DUMMY,
            "module has no main procedure",
        ));
    };
    safe_analyze_callable(comp, &Object::Proc(main_proc.clone()), &[], &[])?;

    let func_id = bmod.add_function(
        "main",
        vec![BType::I32, BType::Ptr],
        BType::I32,
        Linkage::External,
    );
    let handle = bmod.func(func_id);
    let (init, code, return_block, exception_block) = {
        let mut data = handle.borrow_mut();
        (
            data.append_block("init"),
            data.append_block("code"),
            data.append_block("return"),
            data.append_block("exception"),
        )
    };
    let cx = FnCx::new(lx, func_id, init, code);
    cx.return_targets
        .borrow_mut()
        .push(JumpTarget::new(return_block, 0));
    cx.exception_targets
        .borrow_mut()
        .push(JumpTarget::new(exception_block, 0));

    // argc/argv get homes so they are ordinary lvalues.
    let argc_ty = comp.types.c_int_type;
    let argv_ty = comp
        .types
        .pointer_type(comp.types.pointer_type(comp.types.int8_type));
    let argc_slot = cx.alloc_new_value(argc_ty)?;
    let argv_slot = cx.alloc_new_value(argv_ty)?;
    {
        let data = handle.borrow();
        cx.init_bx.store(data.param(0), argc_slot.ptr);
        cx.init_bx.store(data.param(1), argv_slot.ptr);
    }

    let main_static = cx.static_cvalue(Object::Proc(main_proc.clone()))?;
    let result = cx.alloc_value(comp.types.c_int_type)?;
    let mut args = MultiCValue::one(main_static);
    args.push(argc_slot);
    args.push(argv_slot);
    let mut pv_args = MultiPValue::one(PValue::rvalue(main_static.ty));
    pv_args.push(PValue::lvalue(argc_ty));
    pv_args.push(PValue::lvalue(argv_ty));
    cx.lower_call_object(
        &comp.operator(PrimOpCode::CallMain),
        &args,
        &pv_args,
        &MultiCValue::one(result),
        Span::DUMMY,
    )?;
    cx.bx.br(return_block);
    cx.init_bx.br(code);

    cx.bx.position_at_end(return_block);
    let ret_bty = comp.backend_type(comp.types.c_int_type)?;
    let value = cx.bx.load(ret_bty, result.ptr);
    cx.bx.ret(Some(value));

    cx.bx.position_at_end(exception_block);
    cx.bx.unreachable();
    Ok(func_id)
}

/// C wrapper body for an invoke entry at a calling convention.
pub fn lower_c_wrapper_body(
    lx: LowerCx<'_>,
    entry: &Rc<InvokeEntry>,
    calling_conv: CallingConv,
) -> SemaResult<FuncId> {
    let comp = lx.comp;
    let return_types = entry.return_types.borrow().clone();
    if return_types.len() > 1 {
        return Err(SemaError::new(
            ErrorCode::E4006,
            Span::DUMMY,
            "C wrappers support at most one return value",
        ));
    }
    let return_type = return_types.first().copied();
    let target = crate::externals::DefaultExternalTarget;
    let sig = crate::externals::ExternalTarget::lower_signature(
        &target,
        comp,
        calling_conv,
        return_type,
        &entry.args_key,
        false,
    )?;

    let inner = lower_code_body(lx, entry)?;
    let name = format!("{}.cwrap", lx.bmod.func(inner).borrow().name.clone());

    let mut params: Vec<BType> = Vec::new();
    if let crate::externals::ExternalReturn::SRet(_) = sig.ret {
        params.push(BType::Ptr);
    }
    params.extend(sig.params.iter().map(|p| p.bty.clone()));
    let ret = match &sig.ret {
        crate::externals::ExternalReturn::Direct(bty) => bty.clone(),
        _ => BType::Void,
    };
    let func_id = lx.bmod.add_function(name, params, ret, Linkage::Internal);
    let handle = lx.bmod.func(func_id);
    let (init, code, return_block, exception_block) = {
        let mut data = handle.borrow_mut();
        (
            data.append_block("init"),
            data.append_block("code"),
            data.append_block("return"),
            data.append_block("exception"),
        )
    };
    let cx = FnCx::new(lx, func_id, init, code);
    cx.exception_targets
        .borrow_mut()
        .push(JumpTarget::new(exception_block, 0));

    let sret_offset = usize::from(matches!(sig.ret, crate::externals::ExternalReturn::SRet(_)));
    // Marshal C parameters into value slots.
    let mut ll_args: Vec<mica_backend::ValueId> = Vec::new();
    {
        let data = handle.borrow();
        for (i, &ty) in entry.args_key.iter().enumerate() {
            let param = data.param(i + sret_offset);
            if sig.params[i].by_pointer {
                ll_args.push(param);
            } else {
                let slot = cx.alloc_new_value(ty)?;
                cx.init_bx.store(param, slot.ptr);
                ll_args.push(slot.ptr);
            }
        }
    }
    // Return slot.
    let ret_slot = match return_type {
        Some(ty) => Some(cx.alloc_new_value(ty)?),
        None => None,
    };
    if let Some(slot) = &ret_slot {
        ll_args.push(slot.ptr);
    }
    cx.lowlevel_call(Callee::Func(inner), ll_args)?;
    cx.bx.br(return_block);
    cx.init_bx.br(code);

    cx.bx.position_at_end(return_block);
    match (&sig.ret, &ret_slot) {
        (crate::externals::ExternalReturn::Void, _) => cx.bx.ret(None),
        (crate::externals::ExternalReturn::Direct(bty), Some(slot)) => {
            let value = cx.bx.load(bty.clone(), slot.ptr);
            cx.bx.ret(Some(value));
        }
        (crate::externals::ExternalReturn::SRet(_), Some(slot)) => {
            let sret = handle.borrow().param(0);
            cx.value_copy(CValue::new(slot.ty, sret), *slot)?;
            cx.bx.ret(None);
        }
        _ => cx.bx.ret(None),
    }
    cx.bx.position_at_end(exception_block);
    cx.bx.unreachable();
    Ok(func_id)
}
