//! Backend modules.
//!
//! Functions are stored behind `Rc<RefCell<…>>` so the lowering driver can
//! emit into one function while lazily creating and filling others (callee
//! bodies are generated on first call). The backend is single-threaded; the
//! cells are never contended.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::function::{FunctionData, Linkage};
use crate::layout::DataLayout;
use crate::types::BType;

/// Handle for a function in a module.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);

/// Handle for a global variable in a module.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(u32);

impl std::fmt::Debug for FuncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

impl std::fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A module-level global variable.
#[derive(Debug)]
pub struct GlobalData {
    pub name: String,
    pub ty: BType,
    pub linkage: Linkage,
    /// Zero-initialized unless a constant initializer is attached.
    pub zero_init: bool,
}

/// A textual function body accepted verbatim from an interpolated snippet.
#[derive(Debug, Clone)]
pub struct AsmFunction {
    pub name: String,
    pub text: String,
}

/// Errors from [`Module::parse_function_text`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("textual function body must start with `define`")]
    MissingDefine,
    #[error("unbalanced braces in textual function body")]
    UnbalancedBraces,
    #[error("textual function body has no body block")]
    MissingBody,
}

/// A backend module: functions, globals, constructor/destructor lists, and
/// textual snippet functions.
pub struct Module {
    pub name: String,
    pub layout: DataLayout,
    /// Whether the target supports a global-destructor array; when false the
    /// lowering driver registers destructors via `atexit`.
    pub supports_dtor_array: bool,
    funcs: RefCell<Vec<Rc<RefCell<FunctionData>>>>,
    func_by_name: RefCell<FxHashMap<String, FuncId>>,
    globals: RefCell<Vec<GlobalData>>,
    ctors: RefCell<Vec<(u16, FuncId)>>,
    dtors: RefCell<Vec<(u16, FuncId)>>,
    asm_funcs: RefCell<Vec<AsmFunction>>,
}

impl Module {
    pub fn new(name: impl Into<String>, layout: DataLayout) -> Module {
        Module {
            name: name.into(),
            layout,
            supports_dtor_array: true,
            funcs: RefCell::new(Vec::new()),
            func_by_name: RefCell::new(FxHashMap::default()),
            globals: RefCell::new(Vec::new()),
            ctors: RefCell::new(Vec::new()),
            dtors: RefCell::new(Vec::new()),
            asm_funcs: RefCell::new(Vec::new()),
        }
    }

    /// Create a function with the given signature. The function starts as a
    /// declaration; appending a block makes it a definition.
    pub fn add_function(
        &self,
        name: impl Into<String>,
        params: Vec<BType>,
        ret: BType,
        linkage: Linkage,
    ) -> FuncId {
        let name = name.into();
        let mut funcs = self.funcs.borrow_mut();
        let id = FuncId(u32::try_from(funcs.len()).unwrap_or_else(|_| panic!("function overflow")));
        self.func_by_name.borrow_mut().insert(name.clone(), id);
        funcs.push(Rc::new(RefCell::new(FunctionData::new(
            name, params, ret, linkage,
        ))));
        id
    }

    /// Shared handle to a function's data.
    pub fn func(&self, id: FuncId) -> Rc<RefCell<FunctionData>> {
        self.funcs.borrow()[id.0 as usize].clone()
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.func_by_name.borrow().get(name).copied()
    }

    pub fn func_count(&self) -> usize {
        self.funcs.borrow().len()
    }

    pub fn add_global(&self, name: impl Into<String>, ty: BType, linkage: Linkage) -> GlobalId {
        let mut globals = self.globals.borrow_mut();
        let id = GlobalId(u32::try_from(globals.len()).unwrap_or_else(|_| panic!("global overflow")));
        globals.push(GlobalData {
            name: name.into(),
            ty,
            linkage,
            zero_init: true,
        });
        id
    }

    pub fn global(&self, id: GlobalId) -> std::cell::Ref<'_, GlobalData> {
        std::cell::Ref::map(self.globals.borrow(), |globals| &globals[id.0 as usize])
    }

    pub fn global_count(&self) -> usize {
        self.globals.borrow().len()
    }

    /// Register `func` in the global-constructor list.
    pub fn append_global_ctor(&self, priority: u16, func: FuncId) {
        self.ctors.borrow_mut().push((priority, func));
    }

    /// Register `func` in the global-destructor list.
    ///
    /// # Panics
    /// Panics if the target does not support a destructor array; callers must
    /// check [`Module::supports_dtor_array`] and fall back to `atexit`.
    pub fn append_global_dtor(&self, priority: u16, func: FuncId) {
        assert!(
            self.supports_dtor_array,
            "target has no global-destructor array"
        );
        self.dtors.borrow_mut().push((priority, func));
    }

    pub fn global_ctors(&self) -> Vec<(u16, FuncId)> {
        self.ctors.borrow().clone()
    }

    pub fn global_dtors(&self) -> Vec<(u16, FuncId)> {
        self.dtors.borrow().clone()
    }

    /// Accept a textual function body, validating its gross shape.
    ///
    /// The text is stored verbatim and handed to instruction selection later;
    /// only structural errors (no `define`, unbalanced braces) are rejected
    /// here.
    pub fn parse_function_text(&self, name: impl Into<String>, text: &str) -> Result<(), AsmError> {
        let trimmed = text.trim_start();
        if !trimmed.starts_with("define") {
            return Err(AsmError::MissingDefine);
        }
        let mut depth = 0i64;
        let mut seen_brace = false;
        for c in text.chars() {
            match c {
                '{' => {
                    depth += 1;
                    seen_brace = true;
                }
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(AsmError::UnbalancedBraces);
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(AsmError::UnbalancedBraces);
        }
        if !seen_brace {
            return Err(AsmError::MissingBody);
        }
        self.asm_funcs.borrow_mut().push(AsmFunction {
            name: name.into(),
            text: text.to_owned(),
        });
        Ok(())
    }

    pub fn asm_functions(&self) -> Vec<AsmFunction> {
        self.asm_funcs.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn function_lookup_by_name() {
        let module = Module::new("m", DataLayout::default());
        let f = module.add_function("f", vec![BType::Ptr], BType::Ptr, Linkage::Internal);
        assert_eq!(module.func_by_name("f"), Some(f));
        assert_eq!(module.func_by_name("g"), None);
    }

    #[test]
    fn asm_text_validation() {
        let module = Module::new("m", DataLayout::default());
        assert_eq!(
            module.parse_function_text("f", "ret void"),
            Err(AsmError::MissingDefine)
        );
        assert_eq!(
            module.parse_function_text("f", "define i8* @f() {"),
            Err(AsmError::UnbalancedBraces)
        );
        assert!(module
            .parse_function_text("f", "define i8* @f() {\nret i8* null\n}")
            .is_ok());
        assert_eq!(module.asm_functions().len(), 1);
    }

    #[test]
    fn ctor_and_dtor_registration() {
        let module = Module::new("m", DataLayout::default());
        let ctor = module.add_function("init", vec![], BType::Void, Linkage::Internal);
        let dtor = module.add_function("fini", vec![], BType::Void, Linkage::Internal);
        module.append_global_ctor(65535, ctor);
        module.append_global_dtor(65535, dtor);
        assert_eq!(module.global_ctors(), vec![(65535, ctor)]);
        assert_eq!(module.global_dtors(), vec![(65535, dtor)]);
    }
}
