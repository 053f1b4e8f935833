//! C-ABI lowering.
//!
//! The `ExternalTarget` abstraction answers, for a calling convention and
//! signature, how each parameter travels (directly or behind a pointer) and
//! how the return value leaves (directly, or through a hidden sret pointer).
//! The driver then emits definitions and call sites from that answer.

use mica_backend::{BType, Callee, FuncId, Linkage, ParamAttr, ValueId};
use mica_diagnostic::ErrorCode;
use mica_ir::{CallingConv, ExternalProcedure, Span, TypeId};
use mica_types::{
    external_signature, CValue, MultiCValue, Object, SemaError, SemaResult, TypeData,
};
use std::rc::Rc;

use crate::context::{CReturn, FnCx, JumpTarget, LowerCx};

/// One lowered C parameter.
#[derive(Clone, Debug)]
pub struct ExternalParam {
    pub bty: BType,
    pub attrs: Vec<ParamAttr>,
    /// Passed behind a pointer (aggregates).
    pub by_pointer: bool,
}

/// How the return value leaves a C function.
#[derive(Clone, Debug)]
pub enum ExternalReturn {
    Void,
    Direct(BType),
    /// Returned through a hidden first pointer parameter.
    SRet(BType),
}

/// ABI-lowered signature.
#[derive(Clone, Debug)]
pub struct ExternalSignature {
    pub params: Vec<ExternalParam>,
    pub ret: ExternalReturn,
}

/// Target-specific ABI rules.
pub trait ExternalTarget {
    fn lower_signature(
        &self,
        comp: &mica_types::Compilation,
        calling_conv: CallingConv,
        return_type: Option<TypeId>,
        arg_types: &[TypeId],
        has_var_args: bool,
    ) -> SemaResult<ExternalSignature>;
}

/// Default rules: primitives travel directly, aggregates go behind pointers
/// (`byval` in, `sret` out).
pub struct DefaultExternalTarget;

impl ExternalTarget for DefaultExternalTarget {
    fn lower_signature(
        &self,
        comp: &mica_types::Compilation,
        _calling_conv: CallingConv,
        return_type: Option<TypeId>,
        arg_types: &[TypeId],
        _has_var_args: bool,
    ) -> SemaResult<ExternalSignature> {
        let mut params = Vec::with_capacity(arg_types.len());
        for &ty in arg_types {
            let bty = comp.backend_type(ty)?;
            if bty.is_aggregate() {
                params.push(ExternalParam {
                    bty: BType::Ptr,
                    attrs: vec![ParamAttr::ByVal],
                    by_pointer: true,
                });
            } else {
                params.push(ExternalParam {
                    bty,
                    attrs: Vec::new(),
                    by_pointer: false,
                });
            }
        }
        let ret = match return_type {
            None => ExternalReturn::Void,
            Some(ty) => {
                let bty = comp.backend_type(ty)?;
                if bty.is_aggregate() {
                    ExternalReturn::SRet(bty)
                } else {
                    ExternalReturn::Direct(bty)
                }
            }
        };
        Ok(ExternalSignature { params, ret })
    }
}

impl<'c> LowerCx<'c> {
    /// Declare (and, when `with_body` and a body exists, define) an external
    /// procedure at the C ABI.
    pub fn lower_external_procedure(
        &self,
        ext: &Rc<ExternalProcedure>,
        with_body: bool,
    ) -> SemaResult<FuncId> {
        let comp = self.comp;
        let name = comp.str(ext.name).to_owned();
        if let Some(existing) = self.bmod.func_by_name(&name) {
            if !with_body || !self.bmod.func(existing).borrow().is_declaration {
                return Ok(existing);
            }
        }

        let (arg_types, return_type) = external_signature(comp, ext)?;
        if ext.has_var_args && ext.body.is_some() {
            return Err(SemaError::new(
                ErrorCode::E4006,
                Span::DUMMY,
                "variadic external functions cannot be defined here",
            ));
        }
        let target = DefaultExternalTarget;
        let sig = target.lower_signature(
            comp,
            ext.calling_conv,
            return_type,
            &arg_types,
            ext.has_var_args,
        )?;

        let func_id = match self.bmod.func_by_name(&name) {
            Some(func) => func,
            None => {
                let mut params: Vec<BType> = Vec::new();
                if let ExternalReturn::SRet(_) = sig.ret {
                    params.push(BType::Ptr);
                }
                params.extend(sig.params.iter().map(|p| p.bty.clone()));
                let ret = match &sig.ret {
                    ExternalReturn::Direct(bty) => bty.clone(),
                    _ => BType::Void,
                };
                let func = self.bmod.add_function(name, params, ret, Linkage::External);
                {
                    let handle = self.bmod.func(func);
                    let mut data = handle.borrow_mut();
                    let mut index = 0usize;
                    if let ExternalReturn::SRet(_) = sig.ret {
                        data.add_param_attr(0, ParamAttr::SRet);
                        index += 1;
                    }
                    for param in &sig.params {
                        for &attr in &param.attrs {
                            data.add_param_attr(index, attr);
                        }
                        index += 1;
                    }
                }
                func
            }
        };

        let Some(body) = ext.body else {
            return Ok(func_id);
        };
        if !with_body {
            return Ok(func_id);
        }

        self.define_external_body(ext, func_id, &sig, &arg_types, return_type, body)
    }

    fn define_external_body(
        &self,
        ext: &Rc<ExternalProcedure>,
        func_id: FuncId,
        sig: &ExternalSignature,
        arg_types: &[TypeId],
        return_type: Option<TypeId>,
        body: mica_ir::StmtId,
    ) -> SemaResult<FuncId> {
        let comp = self.comp;
        let handle = self.bmod.func(func_id);
        let (init, code, return_block, exception_block) = {
            let mut data = handle.borrow_mut();
            (
                data.append_block("init"),
                data.append_block("code"),
                data.append_block("return"),
                data.append_block("exception"),
            )
        };
        let cx = FnCx::new(*self, func_id, init, code);

        let sret_offset = usize::from(matches!(sig.ret, ExternalReturn::SRet(_)));
        let env = comp.decl_env(&ext.module).child();
        for (i, (arg, &ty)) in ext.args.iter().zip(arg_types).enumerate() {
            let param = handle.borrow().param(i + sret_offset);
            let cv = if sig.params[i].by_pointer {
                CValue::new(ty, param)
            } else {
                // Give the direct value a home so the body can borrow it.
                let slot = cx.alloc_new_value(ty)?;
                cx.init_bx.store(param, slot.ptr);
                slot
            };
            env.add_local(arg.name, Object::CValue(cv));
        }

        // Returns funnel through a slot read back in the return block.
        let ret_slot = match return_type {
            Some(ty) => Some(cx.alloc_new_value(ty)?),
            None => None,
        };
        let returns: Vec<CReturn> = match (&ret_slot, return_type) {
            (Some(slot), Some(ty)) => vec![CReturn {
                by_ref: false,
                ty,
                value: *slot,
            }],
            _ => Vec::new(),
        };
        cx.return_lists.borrow_mut().push(returns);
        cx.return_targets
            .borrow_mut()
            .push(JumpTarget::new(return_block, cx.mark_stack()));
        cx.exception_targets
            .borrow_mut()
            .push(JumpTarget::new(exception_block, cx.mark_stack()));

        let terminated = cx.lower_statement(body, &env)?;
        if !terminated {
            cx.destroy_stack(0, false)?;
            cx.bx.br(return_block);
        }
        cx.init_bx.br(code);

        cx.bx.position_at_end(return_block);
        match (&sig.ret, &ret_slot) {
            (ExternalReturn::Void, _) => cx.bx.ret(None),
            (ExternalReturn::Direct(bty), Some(slot)) => {
                let value = cx.bx.load(bty.clone(), slot.ptr);
                cx.bx.ret(Some(value));
            }
            (ExternalReturn::SRet(_), Some(slot)) => {
                let sret = handle.borrow().param(0);
                cx.value_copy(
                    CValue::new(slot.ty, sret),
                    *slot,
                )?;
                cx.bx.ret(None);
            }
            _ => cx.bx.ret(None),
        }

        // A C boundary cannot propagate the sentinel; an escaping exception
        // is a hard stop.
        cx.bx.position_at_end(exception_block);
        cx.bx.unreachable();
        Ok(func_id)
    }
}

/// What a C call targets.
pub(crate) enum CCallee {
    Func(FuncId),
    /// An already-loaded function pointer value.
    Ptr(ValueId),
}

impl FnCx<'_> {
    /// Call through a C code pointer.
    pub fn lower_c_call(
        &self,
        callee: CValue,
        args: &MultiCValue,
        out: &MultiCValue,
        _span: Span,
    ) -> SemaResult<()> {
        let comp = self.comp();
        let TypeData::CCodePointer {
            calling_conv,
            arg_types,
            has_var_args,
            return_type,
        } = comp.types.data(callee.ty)
        else {
            panic!("C code pointer expected");
        };
        let target = DefaultExternalTarget;
        let sig = target.lower_signature(comp, calling_conv, return_type, &arg_types, has_var_args)?;
        let fn_ptr = self.bx.load(BType::Ptr, callee.ptr);
        self.emit_c_call(&sig, CCallee::Ptr(fn_ptr), args, out)
    }

    /// Marshal arguments and emit one C-ABI call. C calls do not speak the
    /// sentinel protocol, so no exception check follows.
    pub(crate) fn emit_c_call(
        &self,
        sig: &ExternalSignature,
        callee: CCallee,
        args: &MultiCValue,
        out: &MultiCValue,
    ) -> SemaResult<()> {
        let comp = self.comp();
        let mut ll_args: Vec<ValueId> = Vec::with_capacity(args.len() + 1);
        let mut param_btys: Vec<BType> = Vec::new();
        if let ExternalReturn::SRet(_) = sig.ret {
            // The out slot doubles as the sret destination.
            ll_args.push(out.values[0].ptr);
            param_btys.push(BType::Ptr);
        }
        for (i, cv) in args.values.iter().enumerate() {
            match sig.params.get(i) {
                Some(param) if param.by_pointer => {
                    ll_args.push(cv.ptr);
                    param_btys.push(BType::Ptr);
                }
                Some(param) => {
                    let value = self.bx.load(param.bty.clone(), cv.ptr);
                    ll_args.push(value);
                    param_btys.push(param.bty.clone());
                }
                None => {
                    // Varargs tail: pass loaded values directly.
                    let bty = comp.backend_type(cv.ty)?;
                    let value = self.bx.load(bty.clone(), cv.ptr);
                    ll_args.push(value);
                    param_btys.push(bty);
                }
            }
        }

        let ret_bty = match &sig.ret {
            ExternalReturn::Direct(bty) => bty.clone(),
            _ => BType::Void,
        };
        let callee = match callee {
            CCallee::Func(func) => Callee::Func(func),
            CCallee::Ptr(ptr) => Callee::Value {
                callee: ptr,
                params: param_btys,
                ret: ret_bty.clone(),
            },
        };
        let result = self.bx.call(callee, ll_args, ret_bty);
        if let ExternalReturn::Direct(_) = sig.ret {
            if !out.is_empty() {
                self.bx.store(result, out.values[0].ptr);
            }
        }
        Ok(())
    }

    /// Emit (or fetch) the C-callable wrapper of an invoke entry for a
    /// calling convention.
    pub fn lower_c_wrapper(
        &self,
        entry: &Rc<mica_types::invoke::InvokeEntry>,
        calling_conv: CallingConv,
    ) -> SemaResult<FuncId> {
        if let Some(&func) = entry.c_wrappers.borrow().get(&calling_conv) {
            return Ok(func);
        }
        let func = crate::entry::lower_c_wrapper_body(self.lx, entry, calling_conv)?;
        entry.c_wrappers.borrow_mut().insert(calling_conv, func);
        Ok(func)
    }
}

/// Analysis-side view of an external's value: a C code pointer.
pub fn external_code_pointer_type(
    comp: &mica_types::Compilation,
    ext: &Rc<ExternalProcedure>,
) -> SemaResult<TypeId> {
    let (arg_types, ret) = external_signature(comp, ext)?;
    Ok(comp
        .types
        .c_code_pointer_type(ext.calling_conv, arg_types, ext.has_var_args, ret))
}
