use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    mem,
    rc::Rc,
};

use derive_more::Display;
use itertools::Itertools;

use crate::{
    ast::{Expr, Expression, Ident},
    error::*,
    eval::eval_args,
    scope::Scope,
    value::Value,
};

/// Anything that can head a call.
///
/// Arguments arrive unevaluated. The function decides whether, when, how often
/// and in which scope each one gets evaluated.
pub trait Function {
    fn name(&self) -> &str;
    fn call(&self, scope: &Scope, args: &[Expr]) -> Result<Value>;
    /// The result depends only on the values of the arguments, each evaluated
    /// once in the calling scope, so calls with equal argument values may be
    /// cached
    fn is_pure(&self) -> bool {
        false
    }
    /// Binding strength in operator position. Higher binds tighter.
    fn precedence(&self) -> i32 {
        0
    }
}

/// A callable that rewrites its call into a new expression, which is then
/// evaluated in the calling scope
pub trait Template {
    fn name(&self) -> &str;
    fn transform(&self, args: &[Expr]) -> Result<Expr>;
    /// Expansion for templates that are not syntactically constant and may
    /// consult the calling scope
    fn transform_in(&self, _scope: &Scope, args: &[Expr]) -> Result<Expr> {
        self.transform(args)
    }
    /// The expansion depends only on the shape of the arguments
    fn is_constant(&self) -> bool {
        true
    }
    fn is_pure(&self) -> bool {
        false
    }
    fn precedence(&self) -> i32 {
        0
    }
}

#[derive(Clone)]
pub enum Callable {
    Function(Rc<dyn Function>),
    Template(Rc<dyn Template>),
}

fn data_ptr<T>(rc: &Rc<T>) -> *const ()
where
    T: ?Sized,
{
    Rc::as_ptr(rc) as *const ()
}

impl Callable {
    pub fn function<F>(function: F) -> Self
    where
        F: Function + 'static,
    {
        Callable::Function(Rc::new(function))
    }
    pub fn template<T>(template: T) -> Self
    where
        T: Template + 'static,
    {
        Callable::Template(Rc::new(template))
    }
    pub fn name(&self) -> &str {
        match self {
            Callable::Function(function) => function.name(),
            Callable::Template(template) => template.name(),
        }
    }
    pub fn is_pure(&self) -> bool {
        match self {
            Callable::Function(function) => function.is_pure(),
            Callable::Template(template) => template.is_pure(),
        }
    }
    pub fn precedence(&self) -> i32 {
        match self {
            Callable::Function(function) => function.precedence(),
            Callable::Template(template) => template.precedence(),
        }
    }
    pub fn is_template(&self) -> bool {
        matches!(self, Callable::Template(_))
    }
    fn addr(&self) -> *const () {
        match self {
            Callable::Function(function) => data_ptr(function),
            Callable::Template(template) => data_ptr(template),
        }
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.is_template() == other.is_template() && self.addr() == other.addr()
    }
    #[tracing::instrument(level = "trace", skip_all, fields(callable = self.name(), args = args.len()))]
    pub fn call(&self, scope: &Scope, args: &[Expr]) -> Result<Value> {
        match self {
            Callable::Function(function) => function.call(scope, args),
            Callable::Template(template) => expand(template.as_ref(), scope, args)?.evaluate(scope),
        }
    }
    /// Wrap a pure function in a result cache. Anything else is returned as is.
    pub fn memoize(self) -> Self {
        match self {
            Callable::Function(function) if function.is_pure() => {
                Callable::function(Memoized::new(function))
            }
            callable => callable,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Callable::Function(function) => write!(f, "Function({})", function.name()),
            Callable::Template(template) => write!(f, "Template({})", template.name()),
        }
    }
}

/// Run a template's rewrite step.
///
/// Whatever goes wrong is reported as a macro expansion failure so it can be
/// told apart from failures of the evaluation that follows.
pub fn expand(template: &dyn Template, scope: &Scope, args: &[Expr]) -> Result<Expr> {
    let expanded = if template.is_constant() {
        template.transform(args)
    } else {
        template.transform_in(scope, args)
    };
    match expanded {
        Ok(expr) => {
            tracing::trace!(template = template.name(), expansion = %expr, "expanded");
            Ok(expr)
        }
        Err(error @ Error::MacroExpansion { .. }) => Err(error),
        Err(error) => Err(Error::expansion(template.name(), error)),
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    #[display(fmt = "{}", _0)]
    Exact(usize),
    #[display(fmt = "at least {}", _0)]
    AtLeast(usize),
    #[display(fmt = "{} to {}", _0, _1)]
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&count),
        }
    }
    pub fn check(self, name: &str, found: usize) -> Result<()> {
        if self.accepts(found) {
            Ok(())
        } else {
            Err(Error::Arity {
                name: name.into(),
                expected: self,
                found,
            })
        }
    }
}

pub type BuiltinFn = fn(&Scope, &[Expr]) -> Result<Value>;

/// A host function with a fixed name, arity check, and declared properties
#[derive(Clone)]
pub struct Builtin {
    name: &'static str,
    arity: Arity,
    pure: bool,
    precedence: i32,
    func: BuiltinFn,
}

impl Builtin {
    pub fn new(name: &'static str, arity: Arity, func: BuiltinFn) -> Self {
        Builtin {
            name,
            arity,
            pure: false,
            precedence: 0,
            func,
        }
    }
    pub fn pure(self) -> Self {
        Builtin { pure: true, ..self }
    }
    pub fn with_precedence(self, precedence: i32) -> Self {
        Builtin { precedence, ..self }
    }
}

impl Function for Builtin {
    fn name(&self) -> &str {
        self.name
    }
    fn call(&self, scope: &Scope, args: &[Expr]) -> Result<Value> {
        self.arity.check(self.name, args.len())?;
        (self.func)(scope, args)
    }
    fn is_pure(&self) -> bool {
        self.pure
    }
    fn precedence(&self) -> i32 {
        self.precedence
    }
}

pub type RewriteFn = fn(&[Expr]) -> Result<Expr>;

/// A syntactically constant template defined by a rewrite function
#[derive(Clone)]
pub struct Rewrite {
    name: &'static str,
    arity: Arity,
    func: RewriteFn,
}

impl Rewrite {
    pub fn new(name: &'static str, arity: Arity, func: RewriteFn) -> Self {
        Rewrite { name, arity, func }
    }
}

impl Template for Rewrite {
    fn name(&self) -> &str {
        self.name
    }
    fn transform(&self, args: &[Expr]) -> Result<Expr> {
        self.arity
            .check(self.name, args.len())
            .map_err(|error| Error::expansion(self.name, error))?;
        (self.func)(args)
    }
}

/// Evaluated arguments compared by exact identity: an int never matches a
/// real, texts match by content, callables by instance
struct MemoKey(Vec<Value>);

impl PartialEq for MemoKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|pair| match pair {
                (Value::Nil, Value::Nil) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Int(a), Value::Int(b)) => a == b,
                (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
                (Value::Text(a), Value::Text(b)) => a == b,
                (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
                _ => false,
            })
    }
}

impl Eq for MemoKey {}

impl Hash for MemoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            mem::discriminant(value).hash(state);
            match value {
                Value::Nil => {}
                Value::Bool(b) => b.hash(state),
                Value::Int(i) => i.hash(state),
                Value::Real(r) => r.to_bits().hash(state),
                Value::Text(text) => text.hash(state),
                Value::Callable(callable) => callable.addr().hash(state),
            }
        }
    }
}

/// Caches the results of a pure function.
///
/// Arguments are evaluated in the calling scope on every call, so side effects
/// inside them always happen. Only the wrapped function's own work is skipped
/// on a hit, and it receives the evaluated arguments as literals.
pub struct Memoized {
    inner: Rc<dyn Function>,
    cache: RefCell<HashMap<MemoKey, Value>>,
}

impl Memoized {
    pub fn new(inner: Rc<dyn Function>) -> Self {
        Memoized {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl Function for Memoized {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn call(&self, scope: &Scope, args: &[Expr]) -> Result<Value> {
        let key = MemoKey(eval_args(scope, args)?);
        let hit = self.cache.borrow().get(&key).cloned();
        if let Some(value) = hit {
            tracing::trace!(function = self.name(), "memo hit");
            return Ok(value);
        }
        let literals = key.0.iter().cloned().map(Expr::Literal).collect_vec();
        let value = self.inner.call(scope, &literals)?;
        self.cache.borrow_mut().insert(key, value.clone());
        Ok(value)
    }
    fn is_pure(&self) -> bool {
        true
    }
    fn precedence(&self) -> i32 {
        self.inner.precedence()
    }
}

/// A user function: strict in its arguments, evaluated in a child of the scope
/// it was created in.
///
/// A closure stored into the scope it captures (as `def` does) forms an `Rc`
/// cycle with that scope, so the frame lives as long as the program.
pub struct Closure {
    name: Rc<str>,
    params: Vec<Ident>,
    body: Expr,
    scope: Scope,
}

impl Closure {
    pub fn new(params: Vec<Ident>, body: Expr, scope: Scope) -> Self {
        Closure {
            name: "fn".into(),
            params,
            body,
            scope,
        }
    }
    pub fn named<N>(self, name: N) -> Self
    where
        N: Into<Rc<str>>,
    {
        Closure {
            name: name.into(),
            ..self
        }
    }
    pub fn params(&self) -> &[Ident] {
        &self.params
    }
}

impl Function for Closure {
    fn name(&self) -> &str {
        &self.name
    }
    fn call(&self, scope: &Scope, args: &[Expr]) -> Result<Value> {
        Arity::Exact(self.params.len()).check(&self.name, args.len())?;
        let values = eval_args(scope, args)?;
        let frame = self.scope.child();
        for (param, value) in self.params.iter().zip(values) {
            frame.define(param.name.clone(), value);
        }
        self.body.evaluate(&frame)
    }
}
