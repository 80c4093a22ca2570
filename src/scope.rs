use std::{
    cell::{Cell, RefCell},
    fmt,
    iter::successors,
    rc::Rc,
};

use rpds::RedBlackTreeMap;

use crate::{config::Config, error::*, value::Value};

/// A mutable storage cell shared by every scope and closure that holds it
#[derive(Clone)]
pub struct Binding(Rc<Slot>);

struct Slot {
    name: Option<Rc<str>>,
    value: RefCell<Value>,
}

impl Binding {
    pub fn new<N>(name: N, value: Value) -> Self
    where
        N: Into<Rc<str>>,
    {
        Binding(Rc::new(Slot {
            name: Some(name.into()),
            value: RefCell::new(value),
        }))
    }
    pub fn anonymous(value: Value) -> Self {
        Binding(Rc::new(Slot {
            name: None,
            value: RefCell::new(value),
        }))
    }
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }
    pub fn get(&self) -> Value {
        self.0.value.borrow().clone()
    }
    /// Replace the held value, returning the previous one
    pub fn set(&self, value: Value) -> Value {
        self.0.value.replace(value)
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} = {:?}", name, self.0.value.borrow()),
            None => write!(f, "_ = {:?}", self.0.value.borrow()),
        }
    }
}

/// State shared by a root scope and every scope derived from it
struct Runtime {
    depth: Cell<usize>,
    max_depth: usize,
    next_id: Cell<u64>,
}

impl Runtime {
    fn fresh_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

/// One level of a lexical scope chain.
///
/// Cloning a `Scope` shares the level; closures keep their defining scope alive
/// this way.
#[derive(Clone)]
pub struct Scope(Rc<Frame>);

struct Frame {
    id: u64,
    defs: RefCell<RedBlackTreeMap<Rc<str>, Binding>>,
    parent: Option<Scope>,
    runtime: Rc<Runtime>,
}

impl Scope {
    pub fn root() -> Self {
        Scope::with_config(&Config::default())
    }
    pub fn with_config(config: &Config) -> Self {
        let runtime = Rc::new(Runtime {
            depth: Cell::new(0),
            max_depth: config.max_depth,
            next_id: Cell::new(0),
        });
        Scope::new_frame(None, runtime)
    }
    fn new_frame(parent: Option<Scope>, runtime: Rc<Runtime>) -> Self {
        Scope(Rc::new(Frame {
            id: runtime.fresh_id(),
            defs: RefCell::new(RedBlackTreeMap::new()),
            parent,
            runtime,
        }))
    }
    pub fn child(&self) -> Self {
        Scope::new_frame(Some(self.clone()), self.0.runtime.clone())
    }
    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }
    /// Unique among all scopes sharing this scope's root
    pub fn id(&self) -> u64 {
        self.0.id
    }
    fn ancestors(&self) -> impl Iterator<Item = &Scope> {
        successors(Some(self), |scope| scope.parent())
    }
    pub fn lookup(&self, name: &str) -> Result<Binding> {
        self.ancestors()
            .find_map(|scope| scope.0.defs.borrow().get(name).cloned())
            .ok_or_else(|| Error::UnboundName(name.into()))
    }
    pub fn get(&self, name: &str) -> Result<Value> {
        self.lookup(name).map(|binding| binding.get())
    }
    /// Assign to the nearest existing binding. Never creates one.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let binding = self.lookup(name)?;
        binding.set(value);
        Ok(())
    }
    /// Introduce a fresh binding at this level, shadowing any binding of the
    /// same name here or further up the chain
    pub fn define<N>(&self, name: N, value: Value) -> Binding
    where
        N: Into<Rc<str>>,
    {
        let binding = Binding::new(name, value);
        self.define_binding(binding.clone());
        binding
    }
    /// Insert an existing binding at this level, sharing it with its other holders.
    ///
    /// Anonymous bindings cannot be looked up and are ignored.
    pub fn define_binding(&self, binding: Binding) {
        let name: Rc<str> = match &binding.0.name {
            Some(name) => name.clone(),
            None => return,
        };
        tracing::trace!(scope = self.id(), name = &*name, "define");
        let mut defs = self.0.defs.borrow_mut();
        let updated = defs.insert(name, binding);
        *defs = updated;
    }
    pub fn contains_local(&self, name: &str) -> bool {
        self.0.defs.borrow().contains_key(name)
    }
    pub fn local_names(&self) -> Vec<Rc<str>> {
        self.0.defs.borrow().keys().cloned().collect()
    }
    /// Count one more nested call, failing once the configured depth is reached
    pub fn enter(&self) -> Result<DepthGuard> {
        let runtime = &self.0.runtime;
        let depth = runtime.depth.get();
        if depth >= runtime.max_depth {
            tracing::debug!(depth, "call depth limit reached");
            return Err(Error::StackOverflow(runtime.max_depth));
        }
        runtime.depth.set(depth + 1);
        Ok(DepthGuard(runtime.clone()))
    }
    pub fn depth(&self) -> usize {
        self.0.runtime.depth.get()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let defs = self.0.defs.borrow();
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("defs", &defs.values().collect::<Vec<_>>())
            .field("parent", &self.0.parent.as_ref().map(Scope::id))
            .finish()
    }
}

/// Releases one level of call depth when dropped
pub struct DepthGuard(Rc<Runtime>);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let depth = self.0.depth.get();
        self.0.depth.set(depth.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_until_shadowed() {
        let root = Scope::root();
        root.define("x", Value::Int(1));
        let child = root.child();
        assert_eq!(child.get("x"), Ok(Value::Int(1)));
        child.define("x", Value::Int(2));
        assert_eq!(child.get("x"), Ok(Value::Int(2)));
        assert_eq!(root.get("x"), Ok(Value::Int(1)));
    }

    #[test]
    fn set_is_visible_to_every_holder() {
        let root = Scope::root();
        let binding = root.define("x", Value::Int(1));
        let child = root.child();
        child.set("x", Value::Int(5)).unwrap();
        assert_eq!(binding.get(), Value::Int(5));
        assert_eq!(root.get("x"), Ok(Value::Int(5)));
    }

    #[test]
    fn redefinition_leaves_captured_binding_alone() {
        let root = Scope::root();
        let old = root.define("x", Value::Int(1));
        let new = root.define("x", Value::Int(2));
        assert!(!old.ptr_eq(&new));
        assert_eq!(old.get(), Value::Int(1));
        assert!(root.lookup("x").unwrap().ptr_eq(&new));
    }

    #[test]
    fn set_never_creates() {
        let root = Scope::root();
        let child = root.child();
        assert_eq!(
            child.set("missing", Value::Nil),
            Err(Error::UnboundName("missing".into()))
        );
        assert!(!child.contains_local("missing"));
        assert!(root.lookup("missing").is_err());
    }

    #[test]
    fn shared_binding_across_scopes() {
        let a = Scope::root();
        let b = Scope::root();
        let binding = a.define("shared", Value::Int(1));
        b.define_binding(binding.clone());
        b.set("shared", Value::Int(9)).unwrap();
        assert_eq!(a.get("shared"), Ok(Value::Int(9)));
        b.define_binding(Binding::anonymous(Value::Nil));
        assert_eq!(b.local_names(), vec![Rc::from("shared")]);
    }

    #[test]
    fn depth_guard_limits_and_releases() {
        let root = Scope::with_config(&Config {
            max_depth: 2,
            ..Config::default()
        });
        let first = root.enter().unwrap();
        let second = root.child().enter().unwrap();
        assert_eq!(root.enter().err(), Some(Error::StackOverflow(2)));
        drop(second);
        drop(first);
        assert_eq!(root.depth(), 0);
        assert!(root.enter().is_ok());
    }

    #[test]
    fn ids_are_unique_under_a_root() {
        let root = Scope::root();
        let child = root.child();
        assert_ne!(root.id(), child.id());
        assert_ne!(child.id(), child.child().id());
        assert_eq!(child.parent().map(Scope::id), Some(root.id()));
    }
}
