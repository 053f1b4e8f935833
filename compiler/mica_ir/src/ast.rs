//! The resolved, desugared AST.
//!
//! Expressions and statements are arena-allocated and referenced by `ExprId`
//! and `StmtId`; the analyzer keys its caches on those ids. Declarations are
//! reference-counted nodes that live for the whole compilation (module graphs
//! are cyclic by nature, so back-references are deliberately never dropped).
//!
//! Surface forms (`for`, `switch`, `catch` chains, operators, lambdas) are
//! desugared before they get here; only the core forms below exist.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::{Name, Span, TypeId};

/// Handle for an arena-allocated expression.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

/// Handle for an arena-allocated statement.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(u32);

/// Handle for a static object synthesized by the semantic phases.
///
/// The object table itself lives in the compilation context; this crate only
/// needs the handle so synthesized expressions can refer to already-resolved
/// objects (types, value holders, procedures) without re-resolution.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u32);

impl std::fmt::Debug for ExprId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl std::fmt::Debug for StmtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "o{}", self.0)
    }
}

impl ObjectId {
    pub fn from_raw(raw: u32) -> ObjectId {
        ObjectId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Core expression forms.
#[derive(Clone, Debug)]
pub enum Expr {
    BoolLit(bool),
    /// Integer literal: interned digit text (decimal or `0x…`) plus suffix.
    IntLit { digits: Name, suffix: Name },
    /// Float literal: decimal or hex-float digit text plus suffix.
    FloatLit { digits: Name, suffix: Name },
    StringLit(Name),
    NameRef(Name),
    /// `[a, b, …]` — normalizes to the `tupleLiteral` operator.
    Tuple(Vec<ExprId>),
    /// `(a, b, …)` — multiple-value grouping, no operator involved.
    Paren(Vec<ExprId>),
    /// `base[args…]` — type construction for static bases, else the `index`
    /// operator.
    Indexing { base: ExprId, args: Vec<ExprId> },
    Call { callee: ExprId, args: Vec<ExprId> },
    /// `base.field` — module member access for static module bases, else the
    /// field-reference operator.
    FieldRef { base: ExprId, field: Name },
    /// `base.N` — tuple element access.
    StaticIndexing { base: ExprId, index: u32 },
    /// `..x` — splice a multi-valued expression into an argument list.
    Unpack(ExprId),
    /// Dispatch marker on a call argument; expands over the runtime tag.
    Dispatch(ExprId),
    And(ExprId, ExprId),
    Or(ExprId, ExprId),
    /// `#expr` — force compile-time evaluation to a static.
    StaticExpr(ExprId),
    /// Reference to an already-resolved static object (synthesized only).
    ObjectRef(ObjectId),
}

/// Core statement forms.
#[derive(Clone, Debug)]
pub enum Stmt {
    Block(Vec<StmtId>),
    Label(Name),
    Binding {
        kind: BindingKind,
        names: Vec<BindingName>,
        values: Vec<ExprId>,
    },
    Assign {
        left: Vec<ExprId>,
        right: Vec<ExprId>,
    },
    /// `:=` — exact-arity, exact-type initializing assignment.
    InitAssign {
        left: Vec<ExprId>,
        right: Vec<ExprId>,
    },
    /// `dest op= args…` (or the prefix form). `op` is the operator name the
    /// update routes through.
    UpdateAssign {
        op: ExprId,
        prefix: bool,
        exprs: Vec<ExprId>,
    },
    Goto(Name),
    Return {
        kind: ReturnKind,
        values: Vec<ExprId>,
    },
    If {
        condition_statements: Vec<StmtId>,
        condition: ExprId,
        then_part: StmtId,
        else_part: Option<StmtId>,
    },
    ExprStmt(ExprId),
    While {
        condition_statements: Vec<StmtId>,
        condition: ExprId,
        body: StmtId,
    },
    Break,
    Continue,
    /// `try` with an already-desugared catch chain.
    Try { body: StmtId, catch: StmtId },
    /// `throw x;` — `throw;` (rethrow) has no value and is only valid inside
    /// a catch block.
    Throw { value: Option<ExprId> },
    /// Compile-time iteration: the body is lowered once per value.
    StaticFor {
        variable: Name,
        values: Vec<ExprId>,
        body: StmtId,
    },
    Finally(StmtId),
    OnError(StmtId),
    Unreachable,
    StaticAssert {
        condition: ExprId,
        message: Vec<ExprId>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BindingKind {
    /// Fresh storage per position, RHS evaluated into it.
    Var,
    /// Bind to existing storage; RHS must be lvalues.
    Ref,
    /// Per-position: lvalue binds by reference, rvalue moves into fresh
    /// storage.
    Forward,
    /// Bind the name to the expression itself, re-evaluated at each use.
    Alias,
}

#[derive(Clone, Copy, Debug)]
pub struct BindingName {
    pub name: Name,
    pub var_arg: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReturnKind {
    Value,
    Ref,
    Forward,
}

/// Rvalue/lvalue classification of a value position.
///
/// `Forward` only appears on formal arguments; argument keys are always
/// `Lvalue` or `Rvalue`, and `DontCare` appears in entry keys for arguments
/// whose overload accepts either.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Tempness {
    Lvalue,
    Rvalue,
    DontCare,
    Forward,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CallingConv {
    CDecl,
    StdCall,
    FastCall,
    ThisCall,
    /// Raw backend calling convention, used for intrinsic snippets.
    Llvm,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InlineKind {
    Default,
    Inline,
    ForceInline,
    NeverInline,
}

/// Pattern variable declared on an overload, instance, or binding.
#[derive(Clone, Copy, Debug)]
pub struct PatternVar {
    pub name: Name,
    pub multi: bool,
}

/// Formal argument of a code body.
#[derive(Clone, Debug)]
pub struct FormalArg {
    pub name: Name,
    /// Type pattern; `None` matches any type.
    pub ty: Option<ExprId>,
    pub tempness: Tempness,
}

/// Declared return position of a code body.
#[derive(Clone, Debug)]
pub struct ReturnSpec {
    pub by_ref: bool,
    pub ty: ExprId,
    /// Named returns are bound into the body environment.
    pub name: Option<Name>,
}

/// A code body: pattern variables, predicate, formal arguments, optional
/// declared returns, and either a statement body or a textual backend body.
#[derive(Clone, Debug)]
pub struct Code {
    pub pattern_vars: Vec<PatternVar>,
    pub predicate: Option<ExprId>,
    pub formal_args: Vec<FormalArg>,
    /// Position of the variadic argument within `formal_args`, if any.
    pub var_arg_position: Option<usize>,
    pub return_specs: Option<Vec<ReturnSpec>>,
    pub var_return_spec: Option<ReturnSpec>,
    pub body: CodeBody,
}

#[derive(Clone, Debug)]
pub enum CodeBody {
    Stmt(StmtId),
    /// Textual backend body with `$name` / `${expr}` interpolation.
    Asm(String),
}

impl Code {
    pub fn has_return_specs(&self) -> bool {
        self.return_specs.is_some() || self.var_return_spec.is_some()
    }

    /// Formal argument count not counting variadic expansion.
    pub fn fixed_arg_count(&self) -> usize {
        match self.var_arg_position {
            Some(_) => self.formal_args.len() - 1,
            None => self.formal_args.len(),
        }
    }
}

/// One overload of a procedure.
#[derive(Debug)]
pub struct Overload {
    pub code: Rc<Code>,
    pub call_by_name: bool,
    pub is_inline: InlineKind,
    /// Module the overload was declared in; body names resolve there.
    pub module: RefCell<Option<Rc<Module>>>,
}

impl Overload {
    pub fn new(code: Rc<Code>) -> Overload {
        Overload {
            code,
            call_by_name: false,
            is_inline: InlineKind::Default,
            module: RefCell::new(None),
        }
    }
}

/// A named procedure: an ordered list of overloads.
///
/// New overloads are inserted at the front so later declarations shadow
/// earlier ones during matching.
#[derive(Debug)]
pub struct Procedure {
    pub name: Name,
    pub overloads: RefCell<Vec<Rc<Overload>>>,
}

impl Procedure {
    pub fn new(name: Name) -> Procedure {
        Procedure {
            name,
            overloads: RefCell::new(Vec::new()),
        }
    }

    pub fn add_overload(&self, overload: Rc<Overload>) {
        self.overloads.borrow_mut().insert(0, overload);
    }
}

#[derive(Clone, Debug)]
pub struct RecordField {
    pub name: Name,
    pub ty: ExprId,
    /// A var field expands to a sequence of types.
    pub var_field: bool,
}

#[derive(Clone, Debug)]
pub enum RecordBody {
    Fields(Vec<RecordField>),
    /// Expression list evaluating to `(name, type)` pairs, optionally wrapped
    /// in `RecordWithProperties`.
    Computed(Vec<ExprId>),
}

#[derive(Debug)]
pub struct RecordDecl {
    pub name: Name,
    pub params: Vec<Name>,
    pub var_param: Option<Name>,
    pub pattern_vars: Vec<PatternVar>,
    pub predicate: Option<ExprId>,
    pub body: RecordBody,
    pub module: RefCell<Option<Rc<Module>>>,
}

/// An `instance` declaration extending a variant.
#[derive(Debug)]
pub struct InstanceDecl {
    pub pattern_vars: Vec<PatternVar>,
    /// Pattern unified against the variant type being materialized.
    pub target: ExprId,
    pub predicate: Option<ExprId>,
    pub members: Vec<ExprId>,
    pub module: RefCell<Option<Rc<Module>>>,
}

#[derive(Debug)]
pub struct VariantDecl {
    pub name: Name,
    pub params: Vec<Name>,
    pub var_param: Option<Name>,
    pub default_instances: Vec<ExprId>,
    pub instances: RefCell<Vec<Rc<InstanceDecl>>>,
    pub module: RefCell<Option<Rc<Module>>>,
}

#[derive(Debug)]
pub struct EnumDecl {
    pub name: Name,
    pub members: Vec<Name>,
    pub module: RefCell<Option<Rc<Module>>>,
}

#[derive(Debug)]
pub struct NewTypeDecl {
    pub name: Name,
    pub base: ExprId,
    /// Underlying type, resolved on first use.
    pub base_type: Cell<Option<TypeId>>,
    pub module: RefCell<Option<Rc<Module>>>,
}

/// A global variable template; each distinct parameterization gets its own
/// instance.
#[derive(Debug)]
pub struct GlobalVariable {
    pub name: Name,
    pub params: Vec<Name>,
    pub var_param: Option<Name>,
    pub init: ExprId,
    pub module: RefCell<Option<Rc<Module>>>,
}

/// A global alias: a named expression re-evaluated at each use site.
#[derive(Debug)]
pub struct GlobalAlias {
    pub name: Name,
    pub params: Vec<Name>,
    pub var_param: Option<Name>,
    pub expr: ExprId,
    pub module: RefCell<Option<Rc<Module>>>,
}

#[derive(Clone, Debug)]
pub struct ExternalArg {
    pub name: Name,
    pub ty: ExprId,
}

/// A C-ABI procedure, either imported (no body) or defined here.
#[derive(Debug)]
pub struct ExternalProcedure {
    pub name: Name,
    pub args: Vec<ExternalArg>,
    pub has_var_args: bool,
    pub return_type: Option<ExprId>,
    pub body: Option<StmtId>,
    pub calling_conv: CallingConv,
    pub module: RefCell<Option<Rc<Module>>>,
}

/// A top-level item of a module.
#[derive(Clone, Debug)]
pub enum Item {
    Proc(Rc<Procedure>),
    Record(Rc<RecordDecl>),
    Variant(Rc<VariantDecl>),
    Enum(Rc<EnumDecl>),
    NewType(Rc<NewTypeDecl>),
    Global(Rc<GlobalVariable>),
    Alias(Rc<GlobalAlias>),
    External(Rc<ExternalProcedure>),
}

impl Item {
    pub fn name(&self) -> Name {
        match self {
            Item::Proc(p) => p.name,
            Item::Record(r) => r.name,
            Item::Variant(v) => v.name,
            Item::Enum(e) => e.name,
            Item::NewType(n) => n.name,
            Item::Global(g) => g.name,
            Item::Alias(a) => a.name,
            Item::External(e) => e.name,
        }
    }
}

/// A resolved module: named items plus literal-type attributes.
#[derive(Debug)]
pub struct Module {
    pub name: Name,
    pub items: RefCell<FxHashMap<Name, Item>>,
    pub top_level: RefCell<Vec<Item>>,
    /// Module attribute overriding the type of unsuffixed integer literals.
    pub default_integer_type: Cell<Option<TypeId>>,
    /// Module attribute overriding the type of unsuffixed float literals.
    pub default_float_type: Cell<Option<TypeId>>,
}

impl Module {
    pub fn new(name: Name) -> Rc<Module> {
        Rc::new(Module {
            name,
            items: RefCell::new(FxHashMap::default()),
            top_level: RefCell::new(Vec::new()),
            default_integer_type: Cell::new(None),
            default_float_type: Cell::new(None),
        })
    }

    /// Add an item, making it visible under its name and wiring its module
    /// back-reference.
    pub fn add_item(self: &Rc<Module>, item: Item) {
        match &item {
            Item::Proc(_) => {}
            Item::Record(r) => *r.module.borrow_mut() = Some(self.clone()),
            Item::Variant(v) => *v.module.borrow_mut() = Some(self.clone()),
            Item::Enum(e) => *e.module.borrow_mut() = Some(self.clone()),
            Item::NewType(n) => *n.module.borrow_mut() = Some(self.clone()),
            Item::Global(g) => *g.module.borrow_mut() = Some(self.clone()),
            Item::Alias(a) => *a.module.borrow_mut() = Some(self.clone()),
            Item::External(e) => *e.module.borrow_mut() = Some(self.clone()),
        }
        self.items.borrow_mut().insert(item.name(), item.clone());
        self.top_level.borrow_mut().push(item);
    }

    pub fn lookup(&self, name: Name) -> Option<Item> {
        self.items.borrow().get(&name).cloned()
    }
}

/// Arena for expressions and statements.
///
/// Ids are stable for the lifetime of the arena; the analyzer uses them as
/// cache keys.
#[derive(Default)]
pub struct Ast {
    exprs: Vec<(Expr, Span)>,
    stmts: Vec<(Stmt, Span)>,
}

impl Ast {
    pub fn new() -> Ast {
        Ast::default()
    }

    pub fn add_expr(&mut self, expr: Expr, span: Span) -> ExprId {
        let id = u32::try_from(self.exprs.len()).unwrap_or_else(|_| panic!("expression arena overflow"));
        self.exprs.push((expr, span));
        ExprId(id)
    }

    pub fn add_stmt(&mut self, stmt: Stmt, span: Span) -> StmtId {
        let id = u32::try_from(self.stmts.len()).unwrap_or_else(|_| panic!("statement arena overflow"));
        self.stmts.push((stmt, span));
        StmtId(id)
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize].0
    }

    pub fn expr_span(&self, id: ExprId) -> Span {
        self.exprs[id.0 as usize].1
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize].0
    }

    pub fn stmt_span(&self, id: StmtId) -> Span {
        self.stmts[id.0 as usize].1
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StringInterner;

    #[test]
    fn arena_ids_are_stable() {
        let mut ast = Ast::new();
        let a = ast.add_expr(Expr::BoolLit(true), Span::DUMMY);
        let b = ast.add_expr(Expr::BoolLit(false), Span::DUMMY);
        assert_ne!(a, b);
        assert!(matches!(ast.expr(a), Expr::BoolLit(true)));
        assert!(matches!(ast.expr(b), Expr::BoolLit(false)));
    }

    #[test]
    fn overloads_are_inserted_head_first() {
        let interner = StringInterner::new();
        let proc = Procedure::new(interner.intern("f"));
        let code = Rc::new(Code {
            pattern_vars: Vec::new(),
            predicate: None,
            formal_args: Vec::new(),
            var_arg_position: None,
            return_specs: None,
            var_return_spec: None,
            body: CodeBody::Asm(String::new()),
        });
        let first = Rc::new(Overload::new(code.clone()));
        let second = Rc::new(Overload::new(code));
        proc.add_overload(first.clone());
        proc.add_overload(second.clone());
        let overloads = proc.overloads.borrow();
        assert!(Rc::ptr_eq(&overloads[0], &second));
        assert!(Rc::ptr_eq(&overloads[1], &first));
    }
}
