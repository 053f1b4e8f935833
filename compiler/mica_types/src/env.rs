//! Lexically scoped environments.
//!
//! An `Env` is a chain of frames. Each frame maps names to objects (values,
//! alias expressions, statics, pattern bindings); the root frame of a module
//! falls through to the module's item table. Frames are reference-counted so
//! alias bindings and call-by-name sites can capture their environment.

use std::cell::RefCell;
use std::rc::Rc;

use mica_ir::{Item, Module, Name};
use rustc_hash::FxHashMap;

use crate::object::Object;

struct EnvFrame {
    entries: RefCell<FxHashMap<Name, Object>>,
    parent: Option<Env>,
    module: Option<Rc<Module>>,
    /// Marks a scope where a bare `throw;` may rethrow the active exception.
    exception_available: bool,
}

/// A chain of lexical scopes.
#[derive(Clone)]
pub struct Env(Rc<EnvFrame>);

impl Env {
    /// Root environment of a module; lookups fall through to its items.
    pub fn module_root(module: Rc<Module>) -> Env {
        Env(Rc::new(EnvFrame {
            entries: RefCell::new(FxHashMap::default()),
            parent: None,
            module: Some(module),
            exception_available: false,
        }))
    }

    /// Fresh empty environment with no module behind it.
    pub fn empty() -> Env {
        Env(Rc::new(EnvFrame {
            entries: RefCell::new(FxHashMap::default()),
            parent: None,
            module: None,
            exception_available: false,
        }))
    }

    /// Child scope.
    pub fn child(&self) -> Env {
        Env(Rc::new(EnvFrame {
            entries: RefCell::new(FxHashMap::default()),
            parent: Some(self.clone()),
            module: None,
            exception_available: false,
        }))
    }

    /// Child scope where `throw;` may rethrow.
    pub fn exception_scope(&self) -> Env {
        Env(Rc::new(EnvFrame {
            entries: RefCell::new(FxHashMap::default()),
            parent: Some(self.clone()),
            module: None,
            exception_available: true,
        }))
    }

    /// Bind `name` in this frame, shadowing outer bindings.
    pub fn add_local(&self, name: Name, obj: Object) {
        self.0.entries.borrow_mut().insert(name, obj);
    }

    /// Look `name` up through the chain, then in the root module.
    pub fn lookup(&self, name: Name) -> Option<Object> {
        if let Some(obj) = self.0.entries.borrow().get(&name) {
            return Some(obj.clone());
        }
        if let Some(module) = &self.0.module {
            if let Some(item) = module.lookup(name) {
                return Some(item_to_object(item));
            }
        }
        self.0.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// The module at the root of this chain, if any.
    pub fn module(&self) -> Option<Rc<Module>> {
        let mut env = self.clone();
        loop {
            if let Some(module) = &env.0.module {
                return Some(module.clone());
            }
            match &env.0.parent {
                Some(parent) => {
                    let next = parent.clone();
                    env = next;
                }
                None => return None,
            }
        }
    }

    /// True when some enclosing scope allows a bare `throw;`.
    pub fn exception_available(&self) -> bool {
        let mut env = self.clone();
        loop {
            if env.0.exception_available {
                return true;
            }
            match &env.0.parent {
                Some(parent) => {
                    let next = parent.clone();
                    env = next;
                }
                None => return false,
            }
        }
    }

    /// Frame identity, used as an analysis-cache key component.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Env({:#x})", self.identity())
    }
}

fn item_to_object(item: Item) -> Object {
    match item {
        Item::Proc(p) => Object::Proc(p),
        Item::Record(r) => Object::Record(r),
        Item::Variant(v) => Object::Variant(v),
        Item::Enum(e) => Object::Enum(e),
        Item::NewType(n) => Object::NewType(n),
        Item::Global(g) => Object::Global(g),
        Item::Alias(a) => Object::Alias(a),
        Item::External(e) => Object::External(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_ir::StringInterner;

    #[test]
    fn shadowing_and_fallthrough() {
        let interner = StringInterner::new();
        let x = interner.intern("x");
        let outer = Env::empty();
        outer.add_local(x, Object::Ident(interner.intern("outer")));
        let inner = outer.child();
        assert!(matches!(inner.lookup(x), Some(Object::Ident(_))));
        inner.add_local(x, Object::Ident(interner.intern("inner")));
        let Some(Object::Ident(found)) = inner.lookup(x) else {
            panic!("lookup failed");
        };
        assert_eq!(interner.lookup(found), "inner");
        // Outer binding is untouched.
        let Some(Object::Ident(found)) = outer.lookup(x) else {
            panic!("lookup failed");
        };
        assert_eq!(interner.lookup(found), "outer");
    }

    #[test]
    fn module_items_are_visible_from_nested_scopes() {
        let interner = StringInterner::new();
        let module = Module::new(interner.intern("m"));
        let f = interner.intern("f");
        module.add_item(Item::Proc(Rc::new(mica_ir::Procedure::new(f))));
        let env = Env::module_root(module).child().child();
        assert!(matches!(env.lookup(f), Some(Object::Proc(_))));
        assert!(env.lookup(interner.intern("missing")).is_none());
    }

    #[test]
    fn exception_scope_flag_propagates() {
        let env = Env::empty();
        assert!(!env.exception_available());
        let catch_env = env.exception_scope().child();
        assert!(catch_env.exception_available());
    }
}
