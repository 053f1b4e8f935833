//! Driver-level tests: build small programs as core AST, lower them, and
//! inspect the emitted backend IR.

use std::cell::RefCell;
use std::rc::Rc;

use mica_backend::{BType, Callee, DataLayout, FuncId, Instr, Module as BackendModule, ValueKind};
use mica_ir::{
    BindingKind, BindingName, Code, CodeBody, Expr, ExprId, ExternalProcedure, FormalArg, Item,
    Module, Overload, PrimOpCode, Procedure, ReturnKind, Span, Stmt, StmtId, Tempness,
};
use mica_types::invoke::safe_analyze_callable;
use mica_types::{Compilation, Object};
use pretty_assertions::assert_eq;

use crate::entry::lower_code_body;
use crate::LowerCx;

struct Fixture {
    comp: Compilation,
    bmod: BackendModule,
    module: Rc<Module>,
}

impl Fixture {
    fn new() -> Fixture {
        let comp = Compilation::new();
        let bmod = BackendModule::new("test", DataLayout::default());
        let module = Module::new(comp.name("test"));
        comp.set_main_module(module.clone());
        Fixture { comp, bmod, module }
    }

    fn name_ref(&self, name: &str) -> ExprId {
        self.comp
            .add_expr(Expr::NameRef(self.comp.name(name)), Span::DUMMY)
    }

    fn int_lit(&self, text: &str) -> ExprId {
        self.comp.add_expr(
            Expr::IntLit {
                digits: self.comp.name(text),
                suffix: self.comp.name(""),
            },
            Span::DUMMY,
        )
    }

    fn call(&self, callee: ExprId, args: Vec<ExprId>) -> ExprId {
        self.comp.add_expr(Expr::Call { callee, args }, Span::DUMMY)
    }

    fn block(&self, stmts: Vec<StmtId>) -> StmtId {
        self.comp.add_stmt(Stmt::Block(stmts), Span::DUMMY)
    }

    fn expr_stmt(&self, expr: ExprId) -> StmtId {
        self.comp.add_stmt(Stmt::ExprStmt(expr), Span::DUMMY)
    }

    fn return_values(&self, values: Vec<ExprId>) -> StmtId {
        self.comp.add_stmt(
            Stmt::Return {
                kind: ReturnKind::Value,
                values,
            },
            Span::DUMMY,
        )
    }

    fn var_binding(&self, name: &str, value: ExprId) -> StmtId {
        self.comp.add_stmt(
            Stmt::Binding {
                kind: BindingKind::Var,
                names: vec![BindingName {
                    name: self.comp.name(name),
                    var_arg: false,
                }],
                values: vec![value],
            },
            Span::DUMMY,
        )
    }

    fn code(&self, args: Vec<(&str, Option<ExprId>, Tempness)>, body: StmtId) -> Rc<Code> {
        Rc::new(Code {
            pattern_vars: Vec::new(),
            predicate: None,
            formal_args: args
                .into_iter()
                .map(|(name, ty, tempness)| FormalArg {
                    name: self.comp.name(name),
                    ty,
                    tempness,
                })
                .collect(),
            var_arg_position: None,
            return_specs: None,
            var_return_spec: None,
            body: CodeBody::Stmt(body),
        })
    }

    fn install_proc(&self, name: &str, code: Rc<Code>) -> Rc<Procedure> {
        let proc = Rc::new(Procedure::new(self.comp.name(name)));
        self.add_proc_overload(&proc, code);
        self.module.add_item(Item::Proc(proc.clone()));
        proc
    }

    fn add_proc_overload(&self, proc: &Rc<Procedure>, code: Rc<Code>) {
        let overload = Overload {
            code,
            call_by_name: false,
            is_inline: mica_ir::InlineKind::Default,
            module: RefCell::new(Some(self.module.clone())),
        };
        proc.add_overload(Rc::new(overload));
    }

    fn install_external(&self, name: &str) -> Rc<ExternalProcedure> {
        let ext = Rc::new(ExternalProcedure {
            name: self.comp.name(name),
            args: Vec::new(),
            has_var_args: false,
            return_type: None,
            body: None,
            calling_conv: mica_ir::CallingConv::CDecl,
            module: RefCell::new(None),
        });
        self.module.add_item(Item::External(ext.clone()));
        ext
    }

    /// A record type named `name` with one Int32 field (so it is not a
    /// primitive aggregate and destroy overloads apply).
    fn install_record_type(&self, name: &str) -> mica_ir::TypeId {
        let field_ty = self
            .comp
            .object_expr(Object::Type(self.comp.types.int32_type), Span::DUMMY);
        let decl = Rc::new(mica_ir::RecordDecl {
            name: self.comp.name(name),
            params: Vec::new(),
            var_param: None,
            pattern_vars: Vec::new(),
            predicate: None,
            body: mica_ir::RecordBody::Fields(vec![mica_ir::RecordField {
                name: self.comp.name("value"),
                ty: field_ty,
                var_field: false,
            }]),
            module: RefCell::new(None),
        });
        self.module.add_item(Item::Record(decl.clone()));
        self.comp
            .types
            .record_type(&decl, Vec::new(), Span::DUMMY)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Install `destroy(x: T) { marker(); }` so destruction is observable.
    fn install_destroy_marker(&self, ty: mica_ir::TypeId, marker: &str) {
        self.install_external(marker);
        let marker_call = self.call(self.name_ref(marker), vec![]);
        let body = self.block(vec![self.expr_stmt(marker_call)]);
        let ty_expr = self.comp.object_expr(Object::Type(ty), Span::DUMMY);
        let code = self.code(vec![("x", Some(ty_expr), Tempness::DontCare)], body);
        let overload = Overload {
            code,
            call_by_name: false,
            is_inline: mica_ir::InlineKind::Default,
            module: RefCell::new(Some(self.module.clone())),
        };
        self.comp
            .add_operator_overload(PrimOpCode::Destroy, Rc::new(overload));
    }

    fn lower_proc(&self, proc: &Rc<Procedure>, args_key: &[mica_ir::TypeId]) -> FuncId {
        let temp_key = vec![Tempness::Rvalue; args_key.len()];
        let entry =
            safe_analyze_callable(&self.comp, &Object::Proc(proc.clone()), args_key, &temp_key)
                .unwrap_or_else(|e| panic!("{e}"));
        lower_code_body(LowerCx::new(&self.comp, &self.bmod), &entry)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Names of directly-called functions reachable from `func`, in the
    /// order their call instructions were created. Destroy-overload bodies
    /// are separate functions; one level of inlining-by-hand is enough for
    /// these tests, so callee bodies are followed one level deep.
    fn called_function_names(&self, func: FuncId) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_calls(func, 2, &mut out);
        out
    }

    fn collect_calls(&self, func: FuncId, depth: u32, out: &mut Vec<String>) {
        let handle = self.bmod.func(func);
        let data = handle.borrow();
        for value in data.value_ids() {
            if let ValueKind::Instr(Instr::Call {
                callee: Callee::Func(target),
                ..
            }) = &data.value(value).kind
            {
                let name = self.bmod.func(*target).borrow().name.clone();
                out.push(name);
                if depth > 0 {
                    self.collect_calls(*target, depth - 1, out);
                }
            }
        }
    }
}

#[test]
fn sentinel_protocol_on_every_lowered_function() {
    let fx = Fixture::new();
    let body = fx.block(vec![fx.return_values(vec![fx.int_lit("5")])]);
    let mut code = (*fx.code(vec![], body)).clone();
    let int32_expr = fx
        .comp
        .object_expr(Object::Type(fx.comp.types.int32_type), Span::DUMMY);
    code.return_specs = Some(vec![mica_ir::ReturnSpec {
        by_ref: false,
        ty: int32_expr,
        name: None,
    }]);
    let proc = fx.install_proc("five", Rc::new(code));
    let func = fx.lower_proc(&proc, &[]);

    let handle = fx.bmod.func(func);
    let data = handle.borrow();
    // One out-pointer parameter; the function returns the sentinel pointer.
    assert_eq!(data.params, vec![BType::Ptr]);
    assert_eq!(data.ret, BType::Ptr);
    assert!(data
        .param_attrs
        .iter()
        .all(|attrs| attrs.contains(&mica_backend::ParamAttr::NoAlias)));

    let mut saw_null_ret = false;
    let mut saw_loaded_ret = false;
    for value in data.value_ids() {
        if let ValueKind::Instr(Instr::Ret(Some(returned))) = &data.value(value).kind {
            match &data.value(*returned).kind {
                ValueKind::ConstNull => saw_null_ret = true,
                ValueKind::Instr(Instr::Load { .. }) => saw_loaded_ret = true,
                other => panic!("unexpected return payload: {other:?}"),
            }
        }
    }
    assert!(saw_null_ret, "normal path must return the null sentinel");
    assert!(saw_loaded_ret, "exceptional path must return the exception");
}

#[test]
fn lifo_destruction_under_exception() {
    let fx = Fixture::new();
    let a_ty = fx.install_record_type("A");
    let b_ty = fx.install_record_type("B");
    fx.install_destroy_marker(a_ty, "dtorA");
    fx.install_destroy_marker(b_ty, "dtorB");
    fx.install_external("fin");
    fx.install_external("onerr");

    // { finally fin(); onerror onerr(); var a = A(); var b = B(); throw 1; }
    let fin_body = fx.expr_stmt(fx.call(fx.name_ref("fin"), vec![]));
    let onerr_body = fx.expr_stmt(fx.call(fx.name_ref("onerr"), vec![]));
    let finally = fx.comp.add_stmt(Stmt::Finally(fin_body), Span::DUMMY);
    let onerror = fx.comp.add_stmt(Stmt::OnError(onerr_body), Span::DUMMY);
    let a_ctor = fx.call(fx.name_ref("A"), vec![]);
    let b_ctor = fx.call(fx.name_ref("B"), vec![]);
    let throw = fx.comp.add_stmt(
        Stmt::Throw {
            value: Some(fx.int_lit("1")),
        },
        Span::DUMMY,
    );
    let body = fx.block(vec![
        finally,
        onerror,
        fx.var_binding("a", a_ctor),
        fx.var_binding("b", b_ctor),
        throw,
    ]);
    let proc = fx.install_proc("boom", fx.code(vec![], body));
    let func = fx.lower_proc(&proc, &[]);

    let calls = fx.called_function_names(func);
    let position = |name: &str| {
        calls
            .iter()
            .position(|c| c == name)
            .unwrap_or_else(|| panic!("{name} not called; calls: {calls:?}"))
    };
    // Unwind runs newest-first: ~b, ~a, then onerror, then finally.
    assert!(position("dtorB") < position("dtorA"));
    assert!(position("dtorA") < position("onerr"));
    assert!(position("onerr") < position("fin"));
}

#[test]
fn short_circuit_false_and_never_lowers_the_right_side() {
    let fx = Fixture::new();
    // crash() is analyzable but must gain no call site and no body.
    let crash_body = fx.block(vec![fx.return_values(vec![fx
        .comp
        .add_expr(Expr::BoolLit(true), Span::DUMMY)])]);
    fx.install_proc("crash", fx.code(vec![], crash_body));

    let and_expr = fx.comp.add_expr(
        Expr::And(
            fx.comp.add_expr(Expr::BoolLit(false), Span::DUMMY),
            fx.call(fx.name_ref("crash"), vec![]),
        ),
        Span::DUMMY,
    );
    let body = fx.block(vec![fx.expr_stmt(and_expr), fx.return_values(vec![])]);
    let proc = fx.install_proc("guarded", fx.code(vec![], body));
    let func = fx.lower_proc(&proc, &[]);

    assert!(fx.called_function_names(func).is_empty());
    for i in 0..fx.bmod.func_count() {
        // No function for crash was ever emitted.
        let name = fx.bmod.func_by_name("crash()").is_some();
        assert!(!name, "crash must not be lowered");
        let _ = i;
    }
}

#[test]
fn dispatch_lowers_to_a_tag_cascade() {
    let fx = Fixture::new();
    // variant V = Int32 | Float64
    let int_expr = fx
        .comp
        .object_expr(Object::Type(fx.comp.types.int32_type), Span::DUMMY);
    let float_expr = fx
        .comp
        .object_expr(Object::Type(fx.comp.types.float64_type), Span::DUMMY);
    let decl = Rc::new(mica_ir::VariantDecl {
        name: fx.comp.name("V"),
        params: Vec::new(),
        var_param: None,
        default_instances: vec![int_expr, float_expr],
        instances: RefCell::new(Vec::new()),
        module: RefCell::new(None),
    });
    fx.module.add_item(Item::Variant(decl.clone()));
    let v_ty = fx
        .comp
        .types
        .variant_type(&decl, Vec::new(), Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));

    // f(x) = {} — one arm per member.
    let f_body = fx.block(vec![]);
    fx.install_proc("f", fx.code(vec![("x", None, Tempness::DontCare)], f_body));

    // g(v: V) { f(dispatch(v)); }
    let v_ty_expr = fx.comp.object_expr(Object::Type(v_ty), Span::DUMMY);
    let dispatch_arg = fx
        .comp
        .add_expr(Expr::Dispatch(fx.name_ref("v")), Span::DUMMY);
    let g_body = fx.block(vec![fx.expr_stmt(fx.call(fx.name_ref("f"), vec![dispatch_arg]))]);
    let proc = fx.install_proc(
        "g",
        fx.code(vec![("v", Some(v_ty_expr), Tempness::DontCare)], g_body),
    );
    let func = fx.lower_proc(&proc, &[v_ty]);

    // Both member arms were specialized and lowered.
    assert!(fx.bmod.func_by_name("f(Int32)").is_some());
    assert!(fx.bmod.func_by_name("f(Float64)").is_some());

    // The cascade compares the tag once per member.
    let handle = fx.bmod.func(func);
    let data = handle.borrow();
    let cond_branches = data
        .value_ids()
        .into_iter()
        .filter(|&v| matches!(data.value(v).kind, ValueKind::Instr(Instr::CondBr { .. })))
        .count();
    assert!(cond_branches >= 2, "expected a two-way dispatch cascade");
}

#[test]
fn temp_slots_are_reused_by_type() {
    let fx = Fixture::new();
    let body = fx.block(vec![
        fx.expr_stmt(fx.int_lit("1")),
        fx.expr_stmt(fx.int_lit("2")),
        fx.return_values(vec![]),
    ]);
    let proc = fx.install_proc("temps", fx.code(vec![], body));
    let func = fx.lower_proc(&proc, &[]);

    // Both statement temporaries share one recycled i32 slot.
    let handle = fx.bmod.func(func);
    let data = handle.borrow();
    let i32_allocas = data
        .value_ids()
        .into_iter()
        .filter(|&v| {
            matches!(
                &data.value(v).kind,
                ValueKind::Instr(Instr::Alloca(BType::Int(32)))
            )
        })
        .count();
    assert_eq!(i32_allocas, 1);
}

#[test]
fn while_true_without_break_terminates_the_function() {
    let fx = Fixture::new();
    let loop_body = fx.block(vec![]);
    let while_stmt = fx.comp.add_stmt(
        Stmt::While {
            condition_statements: Vec::new(),
            condition: fx.comp.add_expr(Expr::BoolLit(true), Span::DUMMY),
            body: loop_body,
        },
        Span::DUMMY,
    );
    let body = fx.block(vec![while_stmt]);
    let proc = fx.install_proc("forever", fx.code(vec![], body));
    let func = fx.lower_proc(&proc, &[]);

    let handle = fx.bmod.func(func);
    let data = handle.borrow();
    let unreachable_count = data
        .value_ids()
        .into_iter()
        .filter(|&v| matches!(data.value(v).kind, ValueKind::Instr(Instr::Unreachable)))
        .count();
    assert!(unreachable_count >= 1);
}

#[test]
fn runtime_nop_entries_are_elided_at_call_sites() {
    let fx = Fixture::new();
    // nop() {} lowers to a body that immediately jumps to the return block.
    let nop_body = fx.block(vec![]);
    fx.install_proc("nop", fx.code(vec![], nop_body));

    let caller_body = fx.block(vec![
        fx.expr_stmt(fx.call(fx.name_ref("nop"), vec![])),
        fx.return_values(vec![]),
    ]);
    let proc = fx.install_proc("caller", fx.code(vec![], caller_body));
    let func = fx.lower_proc(&proc, &[]);

    assert!(fx.called_function_names(func).is_empty());
}

#[test]
fn update_assign_routes_through_the_operator() {
    let fx = Fixture::new();
    // x += 1 via the numericAdd operator: { var x = 1; x add= 1; return x; }
    let var_x = fx.var_binding("x", fx.int_lit("1"));
    let update = fx.comp.add_stmt(
        Stmt::UpdateAssign {
            op: fx.name_ref("numericAdd"),
            prefix: false,
            exprs: vec![fx.name_ref("x"), fx.int_lit("1")],
        },
        Span::DUMMY,
    );
    let ret = fx.return_values(vec![fx.name_ref("x")]);
    let body = fx.block(vec![var_x, update, ret]);
    let mut code = (*fx.code(vec![], body)).clone();
    let int32_expr = fx
        .comp
        .object_expr(Object::Type(fx.comp.types.int32_type), Span::DUMMY);
    code.return_specs = Some(vec![mica_ir::ReturnSpec {
        by_ref: false,
        ty: int32_expr,
        name: None,
    }]);
    let proc = fx.install_proc("bump", Rc::new(code));
    let func = fx.lower_proc(&proc, &[]);

    // The add emits a BinOp::Add somewhere in the function.
    let handle = fx.bmod.func(func);
    let data = handle.borrow();
    let adds = data
        .value_ids()
        .into_iter()
        .filter(|&v| {
            matches!(
                data.value(v).kind,
                ValueKind::Instr(Instr::BinOp {
                    op: mica_backend::BinOp::Add,
                    ..
                })
            )
        })
        .count();
    assert_eq!(adds, 1);
}
