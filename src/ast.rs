use std::{cell::RefCell, fmt, rc::Rc};

use derive_more::Display;
use itertools::Itertools;

use crate::{callable::Template, error::Result, scope::Scope, value::Value};

/// A node of an immutable program tree.
///
/// Host embeddings can supply their own node kinds through [`Expr::Native`].
pub trait Expression: fmt::Debug + fmt::Display {
    fn evaluate(&self, scope: &Scope) -> Result<Value>;
}

#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "{}", name)]
pub struct Ident {
    pub name: Rc<str>,
}

impl Ident {
    pub fn new<N>(name: N) -> Self
    where
        N: Into<Rc<str>>,
    {
        Ident { name: name.into() }
    }
    /// Whether this name is spelled with operator characters
    pub fn is_symbolic(&self) -> bool {
        !self.name.is_empty() && self.name.chars().all(|c| OPERATOR_CHARS.contains(c))
    }
}

pub const OPERATOR_CHARS: &str = "+-*/%=!<>&|:";

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Ident(Ident),
    Call(Rc<CallExpr>),
    Block(Rc<[Expr]>),
    Infix(Rc<InfixExpr>),
    Native(Rc<dyn Expression>),
}

impl Expr {
    pub fn literal<V>(value: V) -> Self
    where
        V: Into<Value>,
    {
        Expr::Literal(value.into())
    }
    pub fn ident<N>(name: N) -> Self
    where
        N: Into<Rc<str>>,
    {
        Expr::Ident(Ident::new(name))
    }
    pub fn call<I>(head: Expr, args: I) -> Self
    where
        I: IntoIterator<Item = Expr>,
    {
        Expr::Call(Rc::new(CallExpr::new(head, args.into_iter().collect())))
    }
    /// A call whose head is looked up by name
    pub fn named_call<N, I>(name: N, args: I) -> Self
    where
        N: Into<Rc<str>>,
        I: IntoIterator<Item = Expr>,
    {
        Expr::call(Expr::ident(name), args)
    }
    pub fn block<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Expr>,
    {
        Expr::Block(items.into_iter().collect())
    }
    pub fn native<E>(expr: E) -> Self
    where
        E: Expression + 'static,
    {
        Expr::Native(Rc::new(expr))
    }
    pub fn as_ident(&self) -> Option<&Ident> {
        match self {
            Expr::Ident(ident) => Some(ident),
            _ => None,
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Literal(a), Expr::Literal(b)) => a == b,
            (Expr::Ident(a), Expr::Ident(b)) => a == b,
            (Expr::Call(a), Expr::Call(b)) => a == b,
            (Expr::Block(a), Expr::Block(b)) => a == b,
            (Expr::Infix(a), Expr::Infix(b)) => a == b,
            (Expr::Native(a), Expr::Native(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<Ident> for Expr {
    fn from(ident: Ident) -> Self {
        Expr::Ident(ident)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{:?}", value),
            Expr::Ident(ident) => write!(f, "{}", ident),
            Expr::Call(call) => write!(f, "{}", call),
            Expr::Block(items) if items.is_empty() => write!(f, "{{}}"),
            Expr::Block(items) => write!(f, "{{ {} }}", items.iter().join("; ")),
            Expr::Infix(infix) => write!(f, "{}", infix),
            Expr::Native(native) => write!(f, "{}", native),
        }
    }
}

/// The replacement a constant template produced for a call node, remembered
/// together with the template that produced it
pub(crate) struct Expansion {
    pub template: Rc<dyn Template>,
    pub expr: Expr,
}

pub struct CallExpr {
    pub head: Expr,
    pub args: Vec<Expr>,
    pub(crate) expansion: RefCell<Option<Expansion>>,
}

impl CallExpr {
    pub fn new(head: Expr, args: Vec<Expr>) -> Self {
        CallExpr {
            head,
            args,
            expansion: RefCell::new(None),
        }
    }
    pub fn is_expanded(&self) -> bool {
        self.expansion.borrow().is_some()
    }
}

impl PartialEq for CallExpr {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head && self.args == other.args
    }
}

impl fmt::Debug for CallExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CallExpr")
            .field("head", &self.head)
            .field("args", &self.args)
            .finish()
    }
}

impl fmt::Display for CallExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.head {
            Expr::Infix(_) => write!(f, "({})", self.head)?,
            head => write!(f, "{}", head)?,
        }
        write!(f, "({})", self.args.iter().join(", "))
    }
}

/// A flat operator chain. How it groups is decided when it is evaluated, from
/// the precedence of whatever each operator name refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct InfixExpr {
    pub first: Expr,
    pub rights: Vec<Right>,
}

impl InfixExpr {
    pub fn new(first: Expr, rights: Vec<Right>) -> Self {
        InfixExpr { first, rights }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Right {
    pub op: Ident,
    pub expr: Expr,
}

impl Right {
    pub fn new(op: Ident, expr: Expr) -> Self {
        Right { op, expr }
    }
}

struct Operand<'a>(&'a Expr);

impl<'a> fmt::Display for Operand<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Expr::Infix(_) => write!(f, "({})", self.0),
            expr => write!(f, "{}", expr),
        }
    }
}

impl fmt::Display for InfixExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Operand(&self.first))?;
        for right in &self.rights {
            if right.op.is_symbolic() {
                write!(f, " {} {}", right.op, Operand(&right.expr))?;
            } else {
                write!(f, " `{}` {}", right.op, Operand(&right.expr))?;
            }
        }
        Ok(())
    }
}

/// A sequence of top-level expressions
#[derive(Debug, Display, Clone, PartialEq, Default)]
#[display(fmt = "{}", r#"items.iter().join(";\n")"#)]
pub struct Items {
    pub items: Vec<Expr>,
}
