//! The specialization (invoke) engine.
//!
//! A call site resolves to an [`InvokeEntry`]: one monomorphized callable per
//! `(callable, argument types, argument tempness)` key. Entries are created
//! on first demand, filled in phases (match → analyze → lower), and never
//! evicted within a compilation, so equal keys always return the same entry.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mica_backend::FuncId;
use mica_diagnostic::ErrorCode;
use mica_ir::{
    CallingConv, Code, CodeBody, InlineKind, Name, Overload, Procedure, Span, Tempness, TypeId,
};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::analyzer::analyze_callable_body;
use crate::context::Compilation;
use crate::env::Env;
use crate::error::{SemaError, SemaResult};
use crate::object::Object;
use crate::pattern::{self, Bindings};

/// Key of the invoke table.
pub type InvokeKey = (Object, Vec<TypeId>, Vec<Tempness>);

/// One monomorphized callable.
#[derive(Debug)]
pub struct InvokeEntry {
    pub callable: Object,
    pub args_key: Vec<TypeId>,
    pub temp_key: Vec<Tempness>,

    /// Set once body analysis finished.
    pub analyzed: Cell<bool>,
    /// Set while body analysis is running; a lookup during that window is a
    /// recursive call.
    pub analyzing: Cell<bool>,

    pub return_is_ref: RefCell<Vec<bool>>,
    pub return_types: RefCell<Vec<TypeId>>,
    /// Whether tentative returns have been recorded (used by the recursion
    /// fixed point before `analyzed` flips).
    pub returns_initialized: Cell<bool>,

    pub code: RefCell<Option<Rc<Code>>>,
    /// Match environment: overload declaration env plus pattern bindings.
    pub env: RefCell<Option<Env>>,
    pub fixed_arg_names: RefCell<Vec<Name>>,
    pub fixed_arg_types: RefCell<Vec<TypeId>>,
    pub var_arg_name: RefCell<Option<Name>>,
    pub var_arg_types: RefCell<Vec<TypeId>>,
    /// Index of the variadic argument among the formals.
    pub var_arg_position: Cell<usize>,
    pub forwarded_rvalue_flags: RefCell<Vec<bool>>,

    pub call_by_name: Cell<bool>,
    pub is_inline: Cell<InlineKind>,

    /// Backend function, filled by lowering.
    pub lowered_fn: Cell<Option<FuncId>>,
    /// Body lowered to a lone jump to the return block; calls are elided.
    pub runtime_nop: Cell<bool>,
    pub c_wrappers: RefCell<FxHashMap<CallingConv, FuncId>>,
}

impl InvokeEntry {
    fn new(callable: Object, args_key: Vec<TypeId>, temp_key: Vec<Tempness>) -> InvokeEntry {
        InvokeEntry {
            callable,
            args_key,
            temp_key,
            analyzed: Cell::new(false),
            analyzing: Cell::new(false),
            return_is_ref: RefCell::new(Vec::new()),
            return_types: RefCell::new(Vec::new()),
            returns_initialized: Cell::new(false),
            code: RefCell::new(None),
            env: RefCell::new(None),
            fixed_arg_names: RefCell::new(Vec::new()),
            fixed_arg_types: RefCell::new(Vec::new()),
            var_arg_name: RefCell::new(None),
            var_arg_types: RefCell::new(Vec::new()),
            var_arg_position: Cell::new(usize::MAX),
            forwarded_rvalue_flags: RefCell::new(Vec::new()),
            call_by_name: Cell::new(false),
            is_inline: Cell::new(InlineKind::Default),
            lowered_fn: Cell::new(None),
            runtime_nop: Cell::new(false),
            c_wrappers: RefCell::new(FxHashMap::default()),
        }
    }

    /// Record tentative return types (first `return` seen, or declared
    /// specs); recursive self-calls read these.
    pub fn set_returns(&self, is_ref: Vec<bool>, types: Vec<TypeId>) {
        *self.return_is_ref.borrow_mut() = is_ref;
        *self.return_types.borrow_mut() = types;
        self.returns_initialized.set(true);
    }
}

/// Look up or create the entry for a key. Monotonic: the same key always
/// yields the same entry object.
pub fn lookup_invoke(
    comp: &Compilation,
    callable: &Object,
    args_key: &[TypeId],
    temp_key: &[Tempness],
) -> Rc<InvokeEntry> {
    let key: InvokeKey = (callable.clone(), args_key.to_vec(), temp_key.to_vec());
    if let Some(entry) = comp.invoke_table.borrow().get(&key) {
        return entry.clone();
    }
    let entry = Rc::new(InvokeEntry::new(
        callable.clone(),
        args_key.to_vec(),
        temp_key.to_vec(),
    ));
    comp.invoke_table.borrow_mut().insert(key, entry.clone());
    entry
}

/// Resolve and analyze a callable; `Ok(None)` means no overload matched (the
/// caller may have a builtin fallback).
pub fn analyze_callable(
    comp: &Compilation,
    callable: &Object,
    args_key: &[TypeId],
    temp_key: &[Tempness],
) -> SemaResult<Option<Rc<InvokeEntry>>> {
    let entry = lookup_invoke(comp, callable, args_key, temp_key);
    if entry.analyzed.get() || entry.analyzing.get() {
        return Ok(Some(entry));
    }

    let overloads = callable_overloads(comp, callable);
    let Some(matched) = find_matching_overload(comp, &overloads, args_key, temp_key)? else {
        return Ok(None);
    };

    debug!(
        callable = comp.object_name(callable),
        args = args_key.len(),
        "specializing"
    );
    install_match(&entry, &matched)?;

    if entry.call_by_name.get() {
        // Call-by-name bodies are analyzed per call site.
        entry.analyzed.set(true);
        return Ok(Some(entry));
    }

    entry.analyzing.set(true);
    let result = analyze_callable_body(comp, &entry);
    entry.analyzing.set(false);
    result?;
    entry.analyzed.set(true);
    Ok(Some(entry))
}

/// Like [`analyze_callable`] but a missing overload is a user error.
pub fn safe_analyze_callable(
    comp: &Compilation,
    callable: &Object,
    args_key: &[TypeId],
    temp_key: &[Tempness],
) -> SemaResult<Rc<InvokeEntry>> {
    match analyze_callable(comp, callable, args_key, temp_key)? {
        Some(entry) => Ok(entry),
        None => {
            let args = args_key
                .iter()
                .map(|&t| comp.type_name(t))
                .collect::<Vec<_>>()
                .join(", ");
            Err(SemaError::new(
                ErrorCode::E3005,
                Span::DUMMY,
                format!(
                    "no matching overload for {}({args})",
                    comp.object_name(callable)
                ),
            ))
        }
    }
}

fn callable_overloads(comp: &Compilation, callable: &Object) -> Vec<Rc<Overload>> {
    match callable {
        Object::Proc(proc) => proc.overloads.borrow().clone(),
        Object::PrimOp(code) if code.is_overloadable() => comp
            .operator_overloads(*code)
            .map(|proc: Rc<Procedure>| proc.overloads.borrow().clone())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Result of matching one overload against an argument key.
struct MatchedOverload {
    overload: Rc<Overload>,
    env: Env,
    fixed_arg_names: Vec<Name>,
    fixed_arg_types: Vec<TypeId>,
    var_arg_name: Option<Name>,
    var_arg_types: Vec<TypeId>,
    var_arg_position: usize,
    forwarded_rvalue_flags: Vec<bool>,
}

/// Overloads are kept most-recent-first, so the first match implements the
/// declaration-shadowing rule.
fn find_matching_overload(
    comp: &Compilation,
    overloads: &[Rc<Overload>],
    args_key: &[TypeId],
    temp_key: &[Tempness],
) -> SemaResult<Option<MatchedOverload>> {
    for overload in overloads {
        if let Some(matched) = match_overload(comp, overload, args_key, temp_key)? {
            return Ok(Some(matched));
        }
    }
    Ok(None)
}

fn tempness_matches(declared: Tempness, actual: Tempness) -> bool {
    match declared {
        Tempness::Lvalue => actual == Tempness::Lvalue,
        Tempness::Rvalue => actual == Tempness::Rvalue,
        Tempness::DontCare | Tempness::Forward => true,
    }
}

fn match_overload(
    comp: &Compilation,
    overload: &Rc<Overload>,
    args_key: &[TypeId],
    temp_key: &[Tempness],
) -> SemaResult<Option<MatchedOverload>> {
    let code = &overload.code;
    let fixed_count = code.fixed_arg_count();
    let has_var_arg = code.var_arg_position.is_some();
    if has_var_arg {
        if args_key.len() < fixed_count {
            return Ok(None);
        }
    } else if args_key.len() != fixed_count {
        return Ok(None);
    }

    let decl_env = comp.decl_env(&overload.module);
    let vars: FxHashMap<Name, bool> = code
        .pattern_vars
        .iter()
        .map(|pv| (pv.name, pv.multi))
        .collect();

    let var_position = code.var_arg_position.unwrap_or(code.formal_args.len());
    let var_count = args_key.len() - fixed_count;

    // Unify each formal's type pattern against the keyed argument type.
    let mut bindings = Bindings::default();
    let mut fixed_arg_names = Vec::with_capacity(fixed_count);
    let mut fixed_arg_types = Vec::with_capacity(fixed_count);
    let mut var_arg_name = None;
    let mut var_arg_types = Vec::new();
    let mut forwarded_rvalue_flags = Vec::with_capacity(args_key.len());

    let mut key_index = 0usize;
    for (i, formal) in code.formal_args.iter().enumerate() {
        if Some(i) == code.var_arg_position {
            var_arg_name = Some(formal.name);
            for _ in 0..var_count {
                let arg_ty = args_key[key_index];
                let arg_temp = temp_key[key_index];
                if !tempness_matches(formal.tempness, arg_temp) {
                    return Ok(None);
                }
                if let Some(ty_expr) = formal.ty {
                    let _disabler = comp.disable_caching();
                    let pat = pattern::evaluate_pattern(comp, ty_expr, &decl_env, &vars)?;
                    if !pattern::unify(comp, &pat, &Object::Type(arg_ty), &mut bindings)? {
                        return Ok(None);
                    }
                }
                forwarded_rvalue_flags
                    .push(formal.tempness == Tempness::Forward && arg_temp == Tempness::Rvalue);
                var_arg_types.push(arg_ty);
                key_index += 1;
            }
        } else {
            let arg_ty = args_key[key_index];
            let arg_temp = temp_key[key_index];
            if !tempness_matches(formal.tempness, arg_temp) {
                return Ok(None);
            }
            if let Some(ty_expr) = formal.ty {
                let _disabler = comp.disable_caching();
                let pat = pattern::evaluate_pattern(comp, ty_expr, &decl_env, &vars)?;
                if !pattern::unify(comp, &pat, &Object::Type(arg_ty), &mut bindings)? {
                    return Ok(None);
                }
            }
            forwarded_rvalue_flags
                .push(formal.tempness == Tempness::Forward && arg_temp == Tempness::Rvalue);
            fixed_arg_names.push(formal.name);
            fixed_arg_types.push(arg_ty);
            key_index += 1;
        }
    }

    // Bind the pattern variables, then evaluate the predicate.
    let match_env = decl_env.child();
    for pv in &code.pattern_vars {
        if let Some(bound) = bindings.get(&pv.name) {
            match_env.add_local(pv.name, bound.clone());
        }
    }
    if let Some(predicate) = code.predicate {
        let _disabler = comp.disable_caching();
        if !comp.evaluate_bool(predicate, &match_env)? {
            return Ok(None);
        }
    }

    Ok(Some(MatchedOverload {
        overload: overload.clone(),
        env: match_env,
        fixed_arg_names,
        fixed_arg_types,
        var_arg_name,
        var_arg_types,
        var_arg_position: var_position,
        forwarded_rvalue_flags,
    }))
}

fn install_match(entry: &Rc<InvokeEntry>, matched: &MatchedOverload) -> SemaResult<()> {
    *entry.code.borrow_mut() = Some(matched.overload.code.clone());
    *entry.env.borrow_mut() = Some(matched.env.clone());
    *entry.fixed_arg_names.borrow_mut() = matched.fixed_arg_names.clone();
    *entry.fixed_arg_types.borrow_mut() = matched.fixed_arg_types.clone();
    *entry.var_arg_name.borrow_mut() = matched.var_arg_name;
    *entry.var_arg_types.borrow_mut() = matched.var_arg_types.clone();
    entry.var_arg_position.set(matched.var_arg_position);
    *entry.forwarded_rvalue_flags.borrow_mut() = matched.forwarded_rvalue_flags.clone();
    entry.call_by_name.set(matched.overload.call_by_name);
    entry.is_inline.set(matched.overload.is_inline);
    if matched.overload.call_by_name {
        if let CodeBody::Asm(_) = matched.overload.code.body {
            return Err(SemaError::new(
                ErrorCode::E3006,
                Span::DUMMY,
                "a textual body cannot be call-by-name",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
