use std::rc::Rc;

use crate::{
    ast::*,
    callable::{expand, Callable},
    error::*,
    scope::Scope,
    value::Value,
};

/// If less than this much stack remains when a call is dispatched, grow it
const RED_ZONE: usize = 100 * 1024;
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run one level of nested evaluation under the depth limit
fn nested<F>(scope: &Scope, f: F) -> Result<Value>
where
    F: FnOnce() -> Result<Value>,
{
    let _guard = scope.enter()?;
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

pub fn eval_args(scope: &Scope, args: &[Expr]) -> Result<Vec<Value>> {
    args.iter().map(|arg| arg.evaluate(scope)).collect()
}

/// Evaluate in order, producing the last value or nil
pub fn eval_items(scope: &Scope, items: &[Expr]) -> Result<Value> {
    let mut last = Value::Nil;
    for item in items {
        last = item.evaluate(scope)?;
    }
    Ok(last)
}

impl Items {
    pub fn evaluate(&self, scope: &Scope) -> Result<Value> {
        eval_items(scope, &self.items)
    }
}

impl Expression for Expr {
    fn evaluate(&self, scope: &Scope) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(ident) => scope.get(&ident.name),
            Expr::Call(call) => call.evaluate(scope),
            Expr::Block(items) => nested(scope, || eval_items(&scope.child(), items)),
            Expr::Infix(infix) => infix.evaluate(scope),
            Expr::Native(native) => native.evaluate(scope),
        }
    }
}

impl Expression for CallExpr {
    fn evaluate(&self, scope: &Scope) -> Result<Value> {
        nested(scope, || match self.head.evaluate(scope)? {
            Value::Callable(callable) => self.dispatch(&callable, scope),
            other => Err(Error::NotCallable {
                head: self.head.to_string(),
                found: other.type_name(),
            }),
        })
    }
}

impl CallExpr {
    fn dispatch(&self, callable: &Callable, scope: &Scope) -> Result<Value> {
        match callable {
            Callable::Template(template) if template.is_constant() => {
                let cached = self
                    .expansion
                    .borrow()
                    .as_ref()
                    .filter(|expansion| {
                        Rc::as_ptr(&expansion.template) as *const ()
                            == Rc::as_ptr(template) as *const ()
                    })
                    .map(|expansion| expansion.expr.clone());
                let expr = match cached {
                    Some(expr) => expr,
                    None => {
                        let expr = expand(template.as_ref(), scope, &self.args)?;
                        *self.expansion.borrow_mut() = Some(Expansion {
                            template: template.clone(),
                            expr: expr.clone(),
                        });
                        expr
                    }
                };
                expr.evaluate(scope)
            }
            callable => callable.call(scope, &self.args),
        }
    }
}

fn operator_precedence(scope: &Scope, op: &Ident) -> Result<i32> {
    match scope.get(&op.name)? {
        Value::Callable(callable) => Ok(callable.precedence()),
        other => Err(Error::NotCallable {
            head: op.to_string(),
            found: other.type_name(),
        }),
    }
}

fn reduce(operands: &mut Vec<Expr>, ops: &mut Vec<(&Ident, i32)>) {
    if let (Some((op, _)), Some(rhs), Some(lhs)) = (ops.pop(), operands.pop(), operands.pop()) {
        operands.push(Expr::call(Expr::Ident(op.clone()), vec![lhs, rhs]));
    }
}

impl InfixExpr {
    /// Group the chain into nested binary calls using the precedence of each
    /// operator as currently bound in `scope`. Equal precedence groups left.
    pub fn associate(&self, scope: &Scope) -> Result<Expr> {
        let mut operands = vec![self.first.clone()];
        let mut ops: Vec<(&Ident, i32)> = Vec::with_capacity(self.rights.len());
        for right in &self.rights {
            let precedence = operator_precedence(scope, &right.op)?;
            while let Some(&(_, top)) = ops.last() {
                if top < precedence {
                    break;
                }
                reduce(&mut operands, &mut ops);
            }
            ops.push((&right.op, precedence));
            operands.push(right.expr.clone());
        }
        while !ops.is_empty() {
            reduce(&mut operands, &mut ops);
        }
        Ok(operands.pop().unwrap_or(Expr::Literal(Value::Nil)))
    }
}

impl Expression for InfixExpr {
    fn evaluate(&self, scope: &Scope) -> Result<Value> {
        self.associate(scope)?.evaluate(scope)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        callable::{Arity, Builtin, Template},
        config::{Config, DEFAULT_MAX_DEPTH},
    };

    fn first(scope: &Scope, args: &[Expr]) -> Result<Value> {
        args[0].evaluate(scope)
    }

    fn ops_scope() -> Scope {
        let scope = Scope::root();
        for (name, precedence) in &[("lo", 1), ("hi", 2)] {
            let op = Builtin::new(*name, Arity::Exact(2), first).with_precedence(*precedence);
            scope.define(*name, Callable::function(op).into());
        }
        scope
    }

    fn chain(ops: &[&str]) -> InfixExpr {
        InfixExpr::new(
            Expr::ident("a"),
            ops.iter()
                .zip(&["b", "c", "d"])
                .map(|(op, operand)| Right::new(Ident::new(*op), Expr::ident(*operand)))
                .collect(),
        )
    }

    #[test]
    fn higher_precedence_binds_tighter() {
        let scope = ops_scope();
        let grouped = chain(&["lo", "hi"]).associate(&scope).unwrap();
        assert_eq!(grouped.to_string(), "lo(a, hi(b, c))");
        let grouped = chain(&["hi", "lo"]).associate(&scope).unwrap();
        assert_eq!(grouped.to_string(), "lo(hi(a, b), c)");
    }

    #[test]
    fn equal_precedence_groups_left() {
        let scope = ops_scope();
        let grouped = chain(&["lo", "lo", "lo"]).associate(&scope).unwrap();
        assert_eq!(grouped.to_string(), "lo(lo(lo(a, b), c), d)");
    }

    #[test]
    fn non_callable_head() {
        let scope = Scope::root();
        scope.define("x", Value::Int(3));
        let error = Expr::named_call("x", vec![]).evaluate(&scope).unwrap_err();
        assert_eq!(
            error,
            Error::NotCallable {
                head: "x".into(),
                found: "int"
            }
        );
        let error = chain(&["x"]).evaluate(&scope).unwrap_err();
        assert!(matches!(error, Error::NotCallable { .. }));
    }

    #[test]
    fn blocks_get_their_own_scope() {
        let scope = Scope::root();
        scope.define("x", Value::Int(1));
        let shadowing = Expr::native(Define("x", 2));
        let block = Expr::block(vec![shadowing, Expr::ident("x")]);
        assert_eq!(block.evaluate(&scope), Ok(Value::Int(2)));
        assert_eq!(scope.get("x"), Ok(Value::Int(1)));
        assert_eq!(Expr::block(vec![]).evaluate(&scope), Ok(Value::Nil));
    }

    #[derive(Debug)]
    struct Define(&'static str, i64);

    impl std::fmt::Display for Define {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "{} := {}", self.0, self.1)
        }
    }

    impl Expression for Define {
        fn evaluate(&self, scope: &Scope) -> Result<Value> {
            scope.define(self.0, Value::Int(self.1));
            Ok(Value::Nil)
        }
    }

    struct Counting {
        transforms: Rc<Cell<usize>>,
        constant: bool,
    }

    impl Template for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn transform(&self, args: &[Expr]) -> Result<Expr> {
            self.transforms.set(self.transforms.get() + 1);
            Ok(args[0].clone())
        }
        fn is_constant(&self) -> bool {
            self.constant
        }
    }

    fn counting(constant: bool) -> (Scope, Rc<Cell<usize>>) {
        let scope = Scope::root();
        let transforms = Rc::new(Cell::new(0));
        let template = Counting {
            transforms: transforms.clone(),
            constant,
        };
        scope.define("counting", Callable::template(template).into());
        (scope, transforms)
    }

    #[test]
    fn constant_expansions_are_reused() {
        let (scope, transforms) = counting(true);
        let call = Expr::named_call("counting", vec![Expr::Literal(Value::Int(7))]);
        assert_eq!(call.evaluate(&scope), Ok(Value::Int(7)));
        assert_eq!(call.evaluate(&scope), Ok(Value::Int(7)));
        assert_eq!(transforms.get(), 1);
    }

    #[test]
    fn rebinding_the_head_invalidates_the_expansion() {
        let (scope, transforms) = counting(true);
        let call = Expr::named_call("counting", vec![Expr::Literal(Value::Int(7))]);
        call.evaluate(&scope).unwrap();
        let (other, other_transforms) = counting(true);
        scope.define("counting", other.get("counting").unwrap());
        call.evaluate(&scope).unwrap();
        assert_eq!(transforms.get(), 1);
        assert_eq!(other_transforms.get(), 1);
    }

    #[test]
    fn non_constant_templates_expand_every_time() {
        let (scope, transforms) = counting(false);
        let call = Expr::named_call("counting", vec![Expr::Literal(Value::Int(7))]);
        call.evaluate(&scope).unwrap();
        call.evaluate(&scope).unwrap();
        assert_eq!(transforms.get(), 2);
    }

    fn nest_blocks(depth: usize) -> Expr {
        (0..depth).fold(Expr::literal("bottom"), |inner, _| Expr::block(vec![inner]))
    }

    #[test]
    fn nested_blocks_count_toward_the_depth_limit() {
        let scope = Scope::with_config(&Config {
            max_depth: 50,
            ..Config::default()
        });
        assert_eq!(nest_blocks(50).evaluate(&scope), Ok(Value::from("bottom")));
        assert_eq!(nest_blocks(51).evaluate(&scope), Err(Error::StackOverflow(50)));
        assert_eq!(scope.depth(), 0);
    }

    #[test]
    fn deep_block_nesting_fails_instead_of_aborting() {
        let scope = Scope::root();
        let error = nest_blocks(2_000).evaluate(&scope).unwrap_err();
        assert_eq!(error, Error::StackOverflow(DEFAULT_MAX_DEPTH));
        assert_eq!(scope.depth(), 0);
    }

    struct Recurse;

    impl crate::callable::Function for Recurse {
        fn name(&self) -> &str {
            "recurse"
        }
        fn call(&self, scope: &Scope, _: &[Expr]) -> Result<Value> {
            Expr::named_call("recurse", vec![]).evaluate(scope)
        }
    }

    #[test]
    fn runaway_recursion_is_reported() {
        let scope = Scope::with_config(&Config {
            max_depth: 300,
            ..Config::default()
        });
        scope.define("recurse", Callable::function(Recurse).into());
        let error = Expr::named_call("recurse", vec![]).evaluate(&scope).unwrap_err();
        assert_eq!(error, Error::StackOverflow(300));
        assert_eq!(scope.depth(), 0);
    }
}
