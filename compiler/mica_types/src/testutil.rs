//! Shared helpers for in-crate tests: build core AST without a parser.

use std::cell::RefCell;
use std::rc::Rc;

use mica_ir::{
    Code, CodeBody, Expr, ExprId, FormalArg, Item, Module, Overload, Procedure, ReturnKind, Span,
    Stmt, StmtId, Tempness,
};

use crate::context::Compilation;
use crate::env::Env;
use crate::object::Object;

pub(crate) struct TestBuilder<'c> {
    pub comp: &'c Compilation,
    pub module: Rc<Module>,
}

impl<'c> TestBuilder<'c> {
    pub fn new(comp: &'c Compilation) -> TestBuilder<'c> {
        let module = Module::new(comp.name("test"));
        comp.set_main_module(module.clone());
        TestBuilder { comp, module }
    }

    pub fn env(&self) -> Env {
        self.comp.module_env(&self.module)
    }

    pub fn int_lit(&self, text: &str) -> ExprId {
        self.comp.add_expr(
            Expr::IntLit {
                digits: self.comp.name(text),
                suffix: self.comp.name(""),
            },
            Span::DUMMY,
        )
    }

    pub fn bool_lit(&self, value: bool) -> ExprId {
        self.comp.add_expr(Expr::BoolLit(value), Span::DUMMY)
    }

    pub fn name_ref(&self, name: &str) -> ExprId {
        self.comp
            .add_expr(Expr::NameRef(self.comp.name(name)), Span::DUMMY)
    }

    pub fn obj_expr(&self, obj: Object) -> ExprId {
        self.comp.object_expr(obj, Span::DUMMY)
    }

    pub fn call(&self, callee: ExprId, args: Vec<ExprId>) -> ExprId {
        self.comp.add_expr(Expr::Call { callee, args }, Span::DUMMY)
    }

    pub fn return_stmt(&self, values: Vec<ExprId>) -> StmtId {
        self.comp.add_stmt(
            Stmt::Return {
                kind: ReturnKind::Value,
                values,
            },
            Span::DUMMY,
        )
    }

    /// A code body `(args…) { return values…; }`.
    pub fn code_returning(
        &self,
        args: Vec<(&str, Option<ExprId>, Tempness)>,
        values: Vec<ExprId>,
    ) -> Rc<Code> {
        let body = self.return_stmt(values);
        self.code_with_body(args, body)
    }

    pub fn code_with_body(
        &self,
        args: Vec<(&str, Option<ExprId>, Tempness)>,
        body: StmtId,
    ) -> Rc<Code> {
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

    /// Install a procedure with one overload into the module.
    pub fn install_proc(&self, name: &str, code: Rc<Code>) -> Rc<Procedure> {
        let proc = Rc::new(Procedure::new(self.comp.name(name)));
        let overload = Overload {
            code,
            call_by_name: false,
            is_inline: mica_ir::InlineKind::Default,
            module: RefCell::new(Some(self.module.clone())),
        };
        proc.add_overload(Rc::new(overload));
        self.module.add_item(Item::Proc(proc.clone()));
        proc
    }

    pub fn add_overload(&self, proc: &Rc<Procedure>, code: Rc<Code>, call_by_name: bool) {
        let overload = Overload {
            code,
            call_by_name,
            is_inline: mica_ir::InlineKind::Default,
            module: RefCell::new(Some(self.module.clone())),
        };
        proc.add_overload(Rc::new(overload));
    }
}
