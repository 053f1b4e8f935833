//! The compilation context.
//!
//! One `Compilation` owns every process-wide singleton of the original
//! design: the string interner, the AST arenas, the type store, the operator
//! table, the analysis cache, the invoke-entry registry, and the global
//! mode flags. All semantic operations take `&Compilation`; the core is
//! single-threaded, so interior mutability is `RefCell`/`Cell` throughout.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mica_backend::DataLayout;
use mica_ir::{
    Ast, Code, CodeBody, Expr, ExprId, GlobalVariable, Module, Name, ObjectId, Overload,
    PrimOpCode, Procedure, SharedInterner, Span, Stmt, StmtId, TypeId,
};
use rustc_hash::FxHashMap;

use crate::env::Env;
use crate::invoke::InvokeKey;
use crate::object::{Object, ValueHolder};
use crate::types::TypeData;
use crate::store::TypeStore;
use crate::value::MultiPValue;

/// One instance of a parameterized global variable.
pub struct GVarInstance {
    pub gvar: Rc<GlobalVariable>,
    pub params: Vec<Object>,
    /// Type of the initializer, filled by analysis.
    pub ty: Cell<Option<TypeId>>,
    pub analyzing: Cell<bool>,
    /// Backend global, filled by lowering.
    pub lowered: Cell<Option<mica_backend::GlobalId>>,
    pub env: Env,
}

/// Scoped guard that disables analysis caching while alive.
///
/// While at least one disabler is alive the analyzer neither consults nor
/// fills its cache; contexts that re-analyze the same expression under
/// different pattern bindings (variant instance resolution, alias indexing)
/// hold one.
pub struct CachingDisabler<'c> {
    comp: &'c Compilation,
}

impl Drop for CachingDisabler<'_> {
    fn drop(&mut self) {
        let n = self.comp.caching_disabled.get();
        debug_assert!(n > 0);
        self.comp.caching_disabled.set(n - 1);
    }
}

/// The compilation context.
pub struct Compilation {
    pub interner: SharedInterner,
    pub types: TypeStore,
    pub data_layout: DataLayout,

    ast: RefCell<Ast>,
    objects: RefCell<Vec<Object>>,

    /// Operator statics exported by the prelude (`tupleLiteral`, `assign`, …).
    operators: RefCell<FxHashMap<Name, Object>>,
    /// User overloads attached to overloadable primitives.
    operator_overloads: RefCell<FxHashMap<PrimOpCode, Rc<Procedure>>>,
    /// Builtin record backing `RecordWithProperties`.
    record_with_properties: RefCell<Option<Rc<mica_ir::RecordDecl>>>,

    pub(crate) analysis_cache: RefCell<FxHashMap<(ExprId, usize), MultiPValue>>,
    pub(crate) caching_disabled: Cell<u32>,
    pub(crate) invoke_table: RefCell<FxHashMap<InvokeKey, Rc<crate::invoke::InvokeEntry>>>,

    gvar_instances: RefCell<FxHashMap<(usize, Vec<Object>), Rc<GVarInstance>>>,

    inline_enabled: Cell<bool>,
    exceptions_enabled: Cell<bool>,
    /// Bound on call-by-name nesting; the original hard-codes 100.
    pub call_by_name_limit: Cell<u32>,
    pub(crate) call_by_name_depth: Cell<u32>,

    main_module: RefCell<Option<Rc<Module>>>,
}

impl Compilation {
    pub fn new() -> Compilation {
        Compilation::with_layout(DataLayout::default())
    }

    /// Install primitive types and the operator table for the given target
    /// layout.
    pub fn with_layout(data_layout: DataLayout) -> Compilation {
        let pointer_bits = u32::try_from(data_layout.pointer_size * 8).unwrap_or(64);
        let comp = Compilation {
            interner: SharedInterner::new(),
            types: TypeStore::new(pointer_bits),
            data_layout,
            ast: RefCell::new(Ast::new()),
            objects: RefCell::new(Vec::new()),
            operators: RefCell::new(FxHashMap::default()),
            operator_overloads: RefCell::new(FxHashMap::default()),
            record_with_properties: RefCell::new(None),
            analysis_cache: RefCell::new(FxHashMap::default()),
            caching_disabled: Cell::new(0),
            invoke_table: RefCell::new(FxHashMap::default()),
            gvar_instances: RefCell::new(FxHashMap::default()),
            inline_enabled: Cell::new(true),
            exceptions_enabled: Cell::new(true),
            call_by_name_limit: Cell::new(100),
            call_by_name_depth: Cell::new(0),
            main_module: RefCell::new(None),
        };
        comp.install_operators();
        comp
    }

    fn install_operators(&self) {
        let mut operators = self.operators.borrow_mut();
        for code in PrimOpCode::ALL {
            let name = self.interner.intern(code.name());
            operators.insert(name, Object::PrimOp(*code));
        }
        drop(operators);

        // `RecordWithProperties[Properties, Fields]` is a builtin record; a
        // computed record body may evaluate to it to attach properties.
        let decl = Rc::new(mica_ir::RecordDecl {
            name: self.interner.intern("RecordWithProperties"),
            params: vec![
                self.interner.intern("Properties"),
                self.interner.intern("Fields"),
            ],
            var_param: None,
            pattern_vars: Vec::new(),
            predicate: None,
            body: mica_ir::RecordBody::Fields(Vec::new()),
            module: RefCell::new(None),
        });
        *self.record_with_properties.borrow_mut() = Some(decl);
    }

    // -- names --

    pub fn name(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    pub fn str(&self, name: Name) -> &'static str {
        self.interner.lookup(name)
    }

    // -- AST arena --

    pub fn add_expr(&self, expr: Expr, span: Span) -> ExprId {
        self.ast.borrow_mut().add_expr(expr, span)
    }

    pub fn add_stmt(&self, stmt: Stmt, span: Span) -> StmtId {
        self.ast.borrow_mut().add_stmt(stmt, span)
    }

    pub fn expr(&self, id: ExprId) -> Expr {
        self.ast.borrow().expr(id).clone()
    }

    pub fn expr_span(&self, id: ExprId) -> Span {
        self.ast.borrow().expr_span(id)
    }

    pub fn stmt(&self, id: StmtId) -> Stmt {
        self.ast.borrow().stmt(id).clone()
    }

    pub fn stmt_span(&self, id: StmtId) -> Span {
        self.ast.borrow().stmt_span(id)
    }

    // -- object table --

    pub fn add_object(&self, obj: Object) -> ObjectId {
        let mut objects = self.objects.borrow_mut();
        let id = ObjectId::from_raw(
            u32::try_from(objects.len()).unwrap_or_else(|_| panic!("object table overflow")),
        );
        objects.push(obj);
        id
    }

    pub fn object(&self, id: ObjectId) -> Object {
        self.objects.borrow()[id.raw() as usize].clone()
    }

    /// Convenience: wrap an object as an expression.
    pub fn object_expr(&self, obj: Object, span: Span) -> ExprId {
        let id = self.add_object(obj);
        self.add_expr(Expr::ObjectRef(id), span)
    }

    // -- operators --

    /// The prelude export for `code`; user overloads shadow the builtin.
    pub fn operator(&self, code: PrimOpCode) -> Object {
        if let Some(proc) = self.operator_overloads.borrow().get(&code) {
            return Object::Proc(proc.clone());
        }
        Object::PrimOp(code)
    }

    /// Look an operator up by source name.
    pub fn operator_by_name(&self, name: Name) -> Option<Object> {
        self.operators.borrow().get(&name).cloned()
    }

    /// Rebind an operator name (library setup and tests).
    pub fn set_operator(&self, name: Name, obj: Object) {
        self.operators.borrow_mut().insert(name, obj);
    }

    /// Attach a user overload to an overloadable primitive.
    ///
    /// # Panics
    /// Panics if `code` is not overloadable; extending the direct primitives
    /// is a caller bug.
    pub fn add_operator_overload(&self, code: PrimOpCode, overload: Rc<Overload>) {
        assert!(code.is_overloadable(), "{} is not overloadable", code.name());
        let mut map = self.operator_overloads.borrow_mut();
        let proc = map
            .entry(code)
            .or_insert_with(|| Rc::new(Procedure::new(self.interner.intern(code.name()))));
        proc.add_overload(overload);
    }

    /// User overload list for an overloadable primitive, if any.
    pub fn operator_overloads(&self, code: PrimOpCode) -> Option<Rc<Procedure>> {
        self.operator_overloads.borrow().get(&code).cloned()
    }

    pub fn record_with_properties_decl(&self) -> Rc<mica_ir::RecordDecl> {
        self.record_with_properties
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("operator table not installed"))
    }

    // -- modes (process-wide per compilation) --

    pub fn inline_enabled(&self) -> bool {
        self.inline_enabled.get()
    }

    pub fn set_inline_enabled(&self, enabled: bool) {
        self.inline_enabled.set(enabled);
    }

    pub fn exceptions_enabled(&self) -> bool {
        self.exceptions_enabled.get()
    }

    pub fn set_exceptions_enabled(&self, enabled: bool) {
        self.exceptions_enabled.set(enabled);
    }

    pub fn set_main_module(&self, module: Rc<Module>) {
        *self.main_module.borrow_mut() = Some(module);
    }

    pub fn main_module(&self) -> Option<Rc<Module>> {
        self.main_module.borrow().clone()
    }

    // -- caching control --

    /// Disable analysis caching for the current scope.
    pub fn disable_caching(&self) -> CachingDisabler<'_> {
        self.caching_disabled.set(self.caching_disabled.get() + 1);
        CachingDisabler { comp: self }
    }

    pub(crate) fn caching_enabled(&self) -> bool {
        self.caching_disabled.get() == 0
    }

    // -- environments --

    pub fn module_env(&self, module: &Rc<Module>) -> Env {
        Env::module_root(module.clone())
    }

    /// Environment a declaration's body names resolve in.
    pub fn decl_env(&self, module: &RefCell<Option<Rc<Module>>>) -> Env {
        match module.borrow().as_ref() {
            Some(module) => self.module_env(module),
            None => Env::empty(),
        }
    }

    // -- global variable instances --

    pub fn gvar_instance(&self, gvar: &Rc<GlobalVariable>, params: Vec<Object>) -> Rc<GVarInstance> {
        let key = (Rc::as_ptr(gvar) as usize, params.clone());
        if let Some(inst) = self.gvar_instances.borrow().get(&key) {
            return inst.clone();
        }
        let env = self.decl_env(&gvar.module).child();
        for (i, param) in gvar.params.iter().enumerate() {
            env.add_local(*param, params[i].clone());
        }
        if let Some(var_param) = gvar.var_param {
            let rest: Vec<Object> = params.iter().skip(gvar.params.len()).cloned().collect();
            env.add_local(var_param, Object::Multi(Rc::new(rest)));
        }
        let inst = Rc::new(GVarInstance {
            gvar: gvar.clone(),
            params,
            ty: Cell::new(None),
            analyzing: Cell::new(false),
            lowered: Cell::new(None),
            env,
        });
        self.gvar_instances.borrow_mut().insert(key, inst.clone());
        inst
    }

    pub fn gvar_instances(&self) -> Vec<Rc<GVarInstance>> {
        self.gvar_instances.borrow().values().cloned().collect()
    }

    // -- value holders --

    fn int_width_bytes(&self, ty: TypeId) -> usize {
        match self.types.data(ty) {
            TypeData::Bool => 1,
            TypeData::Integer { bits, .. } => usize::from(bits / 8),
            TypeData::Enum(_) => 4,
            other => panic!("not an integer-shaped type: {}", other.kind_name()),
        }
    }

    pub fn int_holder(&self, ty: TypeId, value: i128) -> Rc<ValueHolder> {
        let width = self.int_width_bytes(ty);
        let bytes = value.to_le_bytes()[..width].to_vec();
        Rc::new(ValueHolder::new(ty, bytes))
    }

    pub fn bool_holder(&self, value: bool) -> Rc<ValueHolder> {
        Rc::new(ValueHolder::new(self.types.bool_type, vec![u8::from(value)]))
    }

    pub fn size_t_holder(&self, value: u64) -> Rc<ValueHolder> {
        self.int_holder(self.types.c_size_t_type, i128::from(value))
    }

    pub fn c_int_holder(&self, value: i32) -> Rc<ValueHolder> {
        self.int_holder(self.types.c_int_type, i128::from(value))
    }

    pub fn float_holder(&self, ty: TypeId, value: f64) -> Rc<ValueHolder> {
        let TypeData::Float { bits, .. } = self.types.data(ty) else {
            panic!("not a float type");
        };
        let bytes = match bits {
            32 => {
                #[allow(clippy::cast_possible_truncation)]
                let v = value as f32;
                v.to_le_bytes().to_vec()
            }
            64 => value.to_le_bytes().to_vec(),
            // Extended precision carries the f64 payload in the low 8 bytes.
            80 => {
                let mut bytes = value.to_le_bytes().to_vec();
                bytes.resize(16, 0);
                bytes
            }
            other => panic!("invalid float width: {other}"),
        };
        Rc::new(ValueHolder::new(ty, bytes))
    }

    // -- display --

    /// Render a type readably for diagnostics.
    pub fn type_name(&self, ty: TypeId) -> String {
        match self.types.data(ty) {
            TypeData::Bool => "Bool".into(),
            TypeData::Integer { bits, signed } => {
                format!("{}{}", if signed { "Int" } else { "UInt" }, bits)
            }
            TypeData::Float { bits, imaginary } => {
                format!("{}{}", if imaginary { "Imag" } else { "Float" }, bits)
            }
            TypeData::Complex { bits } => format!("Complex{bits}"),
            TypeData::Pointer(p) => format!("Pointer[{}]", self.type_name(p)),
            TypeData::CodePointer {
                arg_types,
                return_types,
                ..
            } => format!(
                "CodePointer[[{}],[{}]]",
                self.type_name_list(&arg_types),
                self.type_name_list(&return_types)
            ),
            TypeData::CCodePointer {
                arg_types,
                return_type,
                ..
            } => format!(
                "ExternalCodePointer[[{}],[{}]]",
                self.type_name_list(&arg_types),
                return_type.map_or_else(String::new, |t| self.type_name(t))
            ),
            TypeData::Array { elem, size } => {
                format!("Array[{},{}]", self.type_name(elem), size)
            }
            TypeData::Vec { elem, size } => format!("Vec[{},{}]", self.type_name(elem), size),
            TypeData::Tuple(elems) => format!("Tuple[{}]", self.type_name_list(&elems)),
            TypeData::Union(members) => format!("Union[{}]", self.type_name_list(&members)),
            TypeData::Record { decl, params } => {
                self.parameterized_name(self.str(decl.0.name), &params)
            }
            TypeData::Variant { decl, params } => {
                self.parameterized_name(self.str(decl.0.name), &params)
            }
            TypeData::Static(obj) => format!("Static[{}]", self.object_name(&obj)),
            TypeData::Enum(decl) => self.str(decl.0.name).to_owned(),
            TypeData::NewType(decl) => self.str(decl.0.name).to_owned(),
        }
    }

    fn type_name_list(&self, types: &[TypeId]) -> String {
        types
            .iter()
            .map(|&t| self.type_name(t))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn parameterized_name(&self, base: &str, params: &[Object]) -> String {
        if params.is_empty() {
            return base.to_owned();
        }
        let rendered = params
            .iter()
            .map(|p| self.object_name(p))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{base}[{rendered}]")
    }

    /// Render a static object readably for diagnostics.
    pub fn object_name(&self, obj: &Object) -> String {
        match obj {
            Object::Type(t) => self.type_name(*t),
            Object::Holder(h) => self.holder_name(h),
            Object::Ident(n) => format!("#{}", self.str(*n)),
            Object::Proc(p) => self.str(p.name).to_owned(),
            Object::Record(r) => self.str(r.name).to_owned(),
            Object::Variant(v) => self.str(v.name).to_owned(),
            Object::Enum(e) => self.str(e.name).to_owned(),
            Object::NewType(n) => self.str(n.name).to_owned(),
            Object::Global(g) => self.str(g.name).to_owned(),
            Object::Alias(a) => self.str(a.name).to_owned(),
            Object::External(e) => self.str(e.name).to_owned(),
            Object::Module(m) => self.str(m.name).to_owned(),
            Object::PrimOp(code) => code.name().to_owned(),
            Object::Multi(objs) => objs
                .iter()
                .map(|o| self.object_name(o))
                .collect::<Vec<_>>()
                .join(", "),
            other => other.kind_name().to_owned(),
        }
    }

    fn holder_name(&self, holder: &ValueHolder) -> String {
        match self.types.data(holder.ty) {
            TypeData::Bool => holder.as_bool().to_string(),
            TypeData::Integer { signed, .. } => holder.as_i128(signed).to_string(),
            TypeData::Float { .. } => holder.as_f64().to_string(),
            _ => format!("<{}>", self.type_name(holder.ty)),
        }
    }
}

impl Default for Compilation {
    fn default() -> Self {
        Compilation::new()
    }
}

/// Synthesize a `Code` with one `x: Static[T]` argument returning the given
/// static values; used to install record property overloads.
pub(crate) fn property_code(comp: &Compilation, static_ty: TypeId, values: &[Object]) -> Rc<Code> {
    let span = Span::DUMMY;
    let arg_ty_expr = comp.object_expr(Object::Type(static_ty), span);
    let value_exprs: Vec<ExprId> = values
        .iter()
        .map(|obj| comp.object_expr(obj.clone(), span))
        .collect();
    let ret = comp.add_stmt(
        Stmt::Return {
            kind: mica_ir::ReturnKind::Value,
            values: value_exprs,
        },
        span,
    );
    Rc::new(Code {
        pattern_vars: Vec::new(),
        predicate: None,
        formal_args: vec![mica_ir::FormalArg {
            name: comp.name("x"),
            ty: Some(arg_ty_expr),
            tempness: mica_ir::Tempness::DontCare,
        }],
        var_arg_position: None,
        return_specs: None,
        var_return_spec: None,
        body: CodeBody::Stmt(ret),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn operators_are_installed() {
        let comp = Compilation::new();
        let assign = comp.name("assign");
        assert!(matches!(
            comp.operator_by_name(assign),
            Some(Object::PrimOp(PrimOpCode::Assign))
        ));
    }

    #[test]
    fn caching_disabler_nests() {
        let comp = Compilation::new();
        assert!(comp.caching_enabled());
        {
            let _outer = comp.disable_caching();
            {
                let _inner = comp.disable_caching();
                assert!(!comp.caching_enabled());
            }
            assert!(!comp.caching_enabled());
        }
        assert!(comp.caching_enabled());
    }

    #[test]
    fn gvar_instances_are_unique_per_params() {
        let comp = Compilation::new();
        let module = Module::new(comp.name("m"));
        let init = comp.add_expr(Expr::BoolLit(true), Span::DUMMY);
        let gvar = Rc::new(GlobalVariable {
            name: comp.name("g"),
            params: Vec::new(),
            var_param: None,
            init,
            module: RefCell::new(Some(module)),
        });
        let a = comp.gvar_instance(&gvar, Vec::new());
        let b = comp.gvar_instance(&gvar, Vec::new());
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn type_names_render() {
        let comp = Compilation::new();
        let t = comp
            .types
            .tuple_type(vec![comp.types.int32_type, comp.types.float64_type]);
        assert_eq!(comp.type_name(t), "Tuple[Int32, Float64]");
        let p = comp.types.pointer_type(t);
        assert_eq!(comp.type_name(p), "Pointer[Tuple[Int32, Float64]]");
    }
}
