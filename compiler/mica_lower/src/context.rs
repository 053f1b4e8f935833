//! Lowering contexts.
//!
//! `LowerCx` pairs the compilation with the backend module. `FnCx` is the
//! per-function state: builders for the init and code blocks, the value
//! stack of cleanup entries, temp slot pools, and the jump-target stacks
//! whose markers pin how far the stack unwinds on each kind of exit.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mica_backend::{
    BType, BlockId, Builder, FuncId, FunctionData, Module as BackendModule, ValueId,
};
use mica_ir::{Name, Span, StmtId, TypeId};
use mica_types::{CValue, Compilation, Env, PValue, SemaResult};
use rustc_hash::FxHashMap;

/// Compilation plus backend module; cheap to copy around.
#[derive(Clone, Copy)]
pub struct LowerCx<'c> {
    pub comp: &'c Compilation,
    pub bmod: &'c BackendModule,
}

impl<'c> LowerCx<'c> {
    pub fn new(comp: &'c Compilation, bmod: &'c BackendModule) -> LowerCx<'c> {
        LowerCx { comp, bmod }
    }
}

/// A branch target plus the stack depth control must unwind to before
/// jumping there.
#[derive(Clone)]
pub struct JumpTarget {
    pub block: BlockId,
    pub stack_marker: usize,
    pub use_count: Cell<u32>,
}

impl JumpTarget {
    pub fn new(block: BlockId, stack_marker: usize) -> JumpTarget {
        JumpTarget {
            block,
            stack_marker,
            use_count: Cell::new(0),
        }
    }
}

/// One return position of the function being lowered.
#[derive(Clone, Copy)]
pub struct CReturn {
    pub by_ref: bool,
    pub ty: TypeId,
    /// Out-parameter: points at the return slot (or at a pointer slot for
    /// by-ref returns).
    pub value: CValue,
}

/// Entry on the value stack: something to run when the scope unwinds.
pub enum StackEntry {
    /// A live local value; destroyed on unwind.
    Local(CValue),
    /// A pending `finally` body; runs on every unwind.
    Finally(StmtId, Env),
    /// A pending `onerror` body; runs only on exceptional unwind.
    OnError(StmtId, Env),
}

/// Per-function lowering state.
pub struct FnCx<'c> {
    pub lx: LowerCx<'c>,
    pub func_id: FuncId,
    pub func: Rc<RefCell<FunctionData>>,
    /// First code block; the init block branches here at finalization.
    pub code_block: BlockId,
    /// Allocas go to the init block so every slot dominates its uses.
    pub init_bx: Builder,
    /// Instructions go to the current code block.
    pub bx: Builder,

    pub value_stack: RefCell<Vec<StackEntry>>,
    allocated_slots: RefCell<Vec<(BType, ValueId)>>,
    discarded_slots: RefCell<Vec<(BType, ValueId)>>,

    pub return_lists: RefCell<Vec<Vec<CReturn>>>,
    pub return_targets: RefCell<Vec<JumpTarget>>,
    pub break_targets: RefCell<Vec<JumpTarget>>,
    pub continue_targets: RefCell<Vec<JumpTarget>>,
    pub exception_targets: RefCell<Vec<JumpTarget>>,
    pub labels: RefCell<FxHashMap<Name, JumpTarget>>,

    /// Slot holding the active exception sentinel during unwinding.
    pub exception_value: ValueId,
    pub check_exceptions: Cell<bool>,
    pub inline_depth: Cell<u32>,
    /// Debug scope stack; an opaque sink at this level.
    pub debug_scopes: RefCell<Vec<Span>>,
}

impl<'c> FnCx<'c> {
    /// Wrap a fresh function whose init block already exists. `code` is the
    /// block the code builder starts on.
    pub fn new(lx: LowerCx<'c>, func_id: FuncId, init: BlockId, code: BlockId) -> FnCx<'c> {
        let func = lx.bmod.func(func_id);
        let init_bx = Builder::new(func.clone(), init);
        let bx = Builder::new(func.clone(), code);
        let exception_value = init_bx.alloca(BType::Ptr);
        FnCx {
            lx,
            func_id,
            func,
            code_block: code,
            init_bx,
            bx,
            value_stack: RefCell::new(Vec::new()),
            allocated_slots: RefCell::new(Vec::new()),
            discarded_slots: RefCell::new(Vec::new()),
            return_lists: RefCell::new(Vec::new()),
            return_targets: RefCell::new(Vec::new()),
            break_targets: RefCell::new(Vec::new()),
            continue_targets: RefCell::new(Vec::new()),
            exception_targets: RefCell::new(Vec::new()),
            labels: RefCell::new(FxHashMap::default()),
            exception_value,
            check_exceptions: Cell::new(true),
            inline_depth: Cell::new(0),
            debug_scopes: RefCell::new(Vec::new()),
        }
    }

    pub fn comp(&self) -> &'c Compilation {
        self.lx.comp
    }

    pub fn new_block(&self, name: &str) -> BlockId {
        self.bx.append_block(name)
    }

    pub fn push_debug_scope(&self, span: Span) {
        self.debug_scopes.borrow_mut().push(span);
    }

    pub fn pop_debug_scope(&self) {
        self.debug_scopes.borrow_mut().pop();
    }

    // -- temp slot pool --

    /// Reuse a discarded slot of equal backend type, else allocate.
    pub fn alloc_temp(&self, bty: &BType) -> ValueId {
        let mut discarded = self.discarded_slots.borrow_mut();
        let found = discarded
            .iter()
            .rposition(|(ty, _)| ty == bty)
            .map(|i| discarded.remove(i).1);
        drop(discarded);
        let slot = found.unwrap_or_else(|| self.init_bx.alloca(bty.clone()));
        self.allocated_slots.borrow_mut().push((bty.clone(), slot));
        slot
    }

    pub fn mark_temps(&self) -> usize {
        self.allocated_slots.borrow().len()
    }

    /// Move slots allocated since `marker` into the reuse pool.
    pub fn clear_temps(&self, marker: usize) {
        let mut allocated = self.allocated_slots.borrow_mut();
        let mut discarded = self.discarded_slots.borrow_mut();
        while allocated.len() > marker {
            if let Some(slot) = allocated.pop() {
                discarded.push(slot);
            }
        }
    }

    /// Pooled temp storage for a value of `ty`.
    pub fn alloc_value(&self, ty: TypeId) -> SemaResult<CValue> {
        let bty = self.comp().backend_type(ty)?;
        Ok(CValue::new(ty, self.alloc_temp(&bty)))
    }

    /// Storage matching an analysis value: a value slot for temporaries, a
    /// pointer slot for lvalues.
    pub fn alloc_value_for(&self, pv: PValue) -> SemaResult<CValue> {
        if pv.is_temp {
            self.alloc_value(pv.ty)
        } else {
            self.alloc_value(self.comp().types.pointer_type(pv.ty))
        }
    }

    /// Fresh non-pooled storage (named bindings keep their slot).
    pub fn alloc_new_value(&self, ty: TypeId) -> SemaResult<CValue> {
        let bty = self.comp().backend_type(ty)?;
        Ok(CValue::new(ty, self.init_bx.alloca(bty)))
    }

    // -- value stack --

    pub fn mark_stack(&self) -> usize {
        self.value_stack.borrow().len()
    }

    pub fn push_stack_value(&self, cv: CValue) {
        self.value_stack.borrow_mut().push(StackEntry::Local(cv));
    }

    pub fn push_stack_finally(&self, stmt: StmtId, env: Env) {
        self.value_stack
            .borrow_mut()
            .push(StackEntry::Finally(stmt, env));
    }

    pub fn push_stack_on_error(&self, stmt: StmtId, env: Env) {
        self.value_stack
            .borrow_mut()
            .push(StackEntry::OnError(stmt, env));
    }

    /// Run destructors for everything above `marker`, newest first, without
    /// popping (the scope may be exited along several paths).
    pub fn destroy_stack(&self, marker: usize, exception: bool) -> SemaResult<()> {
        let len = self.value_stack.borrow().len();
        debug_assert!(marker <= len);
        for i in (marker..len).rev() {
            self.destroy_stack_entry(i, exception)?;
        }
        Ok(())
    }

    pub fn pop_stack(&self, marker: usize) {
        let mut stack = self.value_stack.borrow_mut();
        debug_assert!(marker <= stack.len());
        stack.truncate(marker);
    }

    pub fn destroy_and_pop_stack(&self, marker: usize, exception: bool) -> SemaResult<()> {
        self.destroy_stack(marker, exception)?;
        self.pop_stack(marker);
        Ok(())
    }

    fn destroy_stack_entry(&self, index: usize, exception: bool) -> SemaResult<()> {
        // Clone the entry out so destructor lowering may push/pop freely.
        enum Run {
            Value(CValue),
            Stmt(StmtId, Env),
            Skip,
        }
        let run = {
            let stack = self.value_stack.borrow();
            match &stack[index] {
                StackEntry::Local(cv) => Run::Value(*cv),
                StackEntry::Finally(stmt, env) => Run::Stmt(*stmt, env.clone()),
                StackEntry::OnError(stmt, env) => {
                    if exception {
                        Run::Stmt(*stmt, env.clone())
                    } else {
                        Run::Skip
                    }
                }
            }
        };
        match run {
            Run::Value(cv) => self.value_destroy(cv),
            Run::Stmt(stmt, env) => {
                // Pending statements run with exception checking off so a
                // panic inside a destructor does not re-enter the unwinder.
                let saved = self.check_exceptions.get();
                self.check_exceptions.set(false);
                let result = self.lower_statement(stmt, &env);
                self.check_exceptions.set(saved);
                result.map(|_| ())
            }
            Run::Skip => Ok(()),
        }
    }
}
