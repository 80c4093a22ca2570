use std::cmp::Ordering;

use itertools::Itertools;

use crate::{
    ast::{Expr, Expression, Ident},
    callable::{Arity, Builtin, Callable, Closure, Rewrite},
    config::Config,
    error::*,
    eval::{eval_args, eval_items},
    scope::Scope,
    value::Value,
};

pub const ASSIGN: i32 = 1;
pub const OR: i32 = 2;
pub const AND: i32 = 3;
pub const COMPARE: i32 = 4;
pub const SUM: i32 = 5;
pub const PRODUCT: i32 = 6;

/// A root scope holding every prelude callable
pub fn prelude(config: &Config) -> Scope {
    let scope = Scope::with_config(config);
    install(&scope, config.memoize_pure);
    scope
}

/// Define the prelude callables in `scope`, each under all of its names
pub fn install(scope: &Scope, memoize_pure: bool) {
    for (names, callable) in callables() {
        let callable = if memoize_pure {
            callable.memoize()
        } else {
            callable
        };
        for name in names {
            scope.define(*name, Value::Callable(callable.clone()));
        }
    }
}

type Entry = (&'static [&'static str], Callable);

fn function(names: &'static [&'static str], builtin: Builtin) -> Entry {
    (names, Callable::function(builtin))
}

fn template(names: &'static [&'static str], rewrite: Rewrite) -> Entry {
    (names, Callable::template(rewrite))
}

fn callables() -> Vec<Entry> {
    use Arity::*;
    vec![
        // Arithmetic
        function(&["+", "add"], Builtin::new("add", Exact(2), add).pure().with_precedence(SUM)),
        function(&["-", "sub"], Builtin::new("sub", Exact(2), sub).pure().with_precedence(SUM)),
        function(&["*", "mul"], Builtin::new("mul", Exact(2), mul).pure().with_precedence(PRODUCT)),
        function(&["/", "div"], Builtin::new("div", Exact(2), div).pure().with_precedence(PRODUCT)),
        function(&["%", "rem"], Builtin::new("rem", Exact(2), rem).pure().with_precedence(PRODUCT)),
        // Comparison
        function(&["=="], Builtin::new("==", Exact(2), equal).pure().with_precedence(COMPARE)),
        function(&["!="], Builtin::new("!=", Exact(2), not_equal).pure().with_precedence(COMPARE)),
        function(&["<"], Builtin::new("<", Exact(2), less).pure().with_precedence(COMPARE)),
        function(&[">"], Builtin::new(">", Exact(2), greater).pure().with_precedence(COMPARE)),
        function(&["<="], Builtin::new("<=", Exact(2), less_eq).pure().with_precedence(COMPARE)),
        function(&[">="], Builtin::new(">=", Exact(2), greater_eq).pure().with_precedence(COMPARE)),
        // Logic
        function(&["not"], Builtin::new("not", Exact(1), not).pure()),
        function(&["and", "&&"], Builtin::new("and", AtLeast(0), and).with_precedence(AND)),
        function(&["or", "||"], Builtin::new("or", AtLeast(0), or).with_precedence(OR)),
        // Control
        function(&["if"], Builtin::new("if", Between(2, 3), if_)),
        function(&["while"], Builtin::new("while", Exact(2), while_)),
        function(&["do"], Builtin::new("do", AtLeast(0), do_)),
        template(&["unless"], Rewrite::new("unless", Exact(2), unless)),
        template(&["when"], Rewrite::new("when", AtLeast(1), when)),
        // Bindings
        function(&["let", ":="], Builtin::new("let", Exact(2), let_).with_precedence(ASSIGN)),
        function(&["set", "="], Builtin::new("set", Exact(2), set).with_precedence(ASSIGN)),
        function(&["fn"], Builtin::new("fn", AtLeast(1), fn_)),
        function(&["def"], Builtin::new("def", AtLeast(2), def)),
        // Misc
        function(&["print"], Builtin::new("print", AtLeast(0), print)),
        function(&["type_of"], Builtin::new("type_of", Exact(1), type_of).pure()),
    ]
}

fn binary(scope: &Scope, args: &[Expr]) -> Result<(Value, Value)> {
    Ok((args[0].evaluate(scope)?, args[1].evaluate(scope)?))
}

fn mismatch(name: &str, left: &Value, right: &Value) -> Error {
    Error::type_error(format!(
        "cannot {} {} and {}",
        name,
        left.type_name(),
        right.type_name()
    ))
}

fn name_of<'a>(callable: &str, expr: &'a Expr) -> Result<&'a Ident> {
    expr.as_ident().ok_or_else(|| {
        Error::type_error(format!("{} expects a name, found {}", callable, expr))
    })
}

fn add(scope: &Scope, args: &[Expr]) -> Result<Value> {
    match binary(scope, args)? {
        (Value::Text(a), Value::Text(b)) => Ok(format!("{}{}", a, b).into()),
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| Error::type_error(format!("add of {} and {} overflowed", a, b))),
        (Value::Int(a), Value::Real(b)) => Ok(Value::Real(a as f64 + b)),
        (Value::Real(a), Value::Int(b)) => Ok(Value::Real(a + b as f64)),
        (Value::Real(a), Value::Real(b)) => Ok(Value::Real(a + b)),
        (a, b) => Err(mismatch("add", &a, &b)),
    }
}

macro_rules! arithmetic {
    ($($name:ident => $checked:ident, $op:tt);* $(;)?) => {
        $(fn $name(scope: &Scope, args: &[Expr]) -> Result<Value> {
            match binary(scope, args)? {
                (Value::Int(a), Value::Int(b)) => a.$checked(b).map(Value::Int).ok_or_else(|| {
                    Error::type_error(format!(
                        "{} of {} and {} overflowed or divided by zero",
                        stringify!($name),
                        a,
                        b
                    ))
                }),
                (Value::Int(a), Value::Real(b)) => Ok(Value::Real(a as f64 $op b)),
                (Value::Real(a), Value::Int(b)) => Ok(Value::Real(a $op b as f64)),
                (Value::Real(a), Value::Real(b)) => Ok(Value::Real(a $op b)),
                (a, b) => Err(mismatch(stringify!($name), &a, &b)),
            }
        })*
    };
}

arithmetic! {
    sub => checked_sub, -;
    mul => checked_mul, *;
    div => checked_div, /;
    rem => checked_rem, %;
}

fn ordering(left: &Value, right: &Value) -> Result<Ordering> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
        (Value::Real(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (a, b) => return Err(mismatch("compare", a, b)),
    };
    ordering.ok_or_else(|| Error::type_error("cannot order NaN"))
}

macro_rules! comparison {
    ($($name:ident => $ordering:pat),* $(,)?) => {
        $(fn $name(scope: &Scope, args: &[Expr]) -> Result<Value> {
            let (left, right) = binary(scope, args)?;
            Ok(Value::Bool(matches!(ordering(&left, &right)?, $ordering)))
        })*
    };
}

comparison! {
    less => Ordering::Less,
    greater => Ordering::Greater,
    less_eq => Ordering::Less | Ordering::Equal,
    greater_eq => Ordering::Greater | Ordering::Equal,
}

fn equal(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let (left, right) = binary(scope, args)?;
    Ok(Value::Bool(left == right))
}

fn not_equal(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let (left, right) = binary(scope, args)?;
    Ok(Value::Bool(left != right))
}

fn not(scope: &Scope, args: &[Expr]) -> Result<Value> {
    Ok(Value::Bool(!args[0].evaluate(scope)?.is_truthy()))
}

fn and(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let mut last = Value::Bool(true);
    for arg in args {
        last = arg.evaluate(scope)?;
        if !last.is_truthy() {
            break;
        }
    }
    Ok(last)
}

fn or(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let mut last = Value::Bool(false);
    for arg in args {
        last = arg.evaluate(scope)?;
        if last.is_truthy() {
            break;
        }
    }
    Ok(last)
}

fn if_(scope: &Scope, args: &[Expr]) -> Result<Value> {
    if args[0].evaluate(scope)?.is_truthy() {
        args[1].evaluate(scope)
    } else {
        args.get(2)
            .map_or(Ok(Value::Nil), |otherwise| otherwise.evaluate(scope))
    }
}

fn while_(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let mut last = Value::Nil;
    while args[0].evaluate(scope)?.is_truthy() {
        last = args[1].evaluate(scope)?;
    }
    Ok(last)
}

fn do_(scope: &Scope, args: &[Expr]) -> Result<Value> {
    eval_items(scope, args)
}

fn unless(args: &[Expr]) -> Result<Expr> {
    Ok(Expr::named_call(
        "if",
        vec![
            Expr::named_call("not", vec![args[0].clone()]),
            args[1].clone(),
        ],
    ))
}

fn when(args: &[Expr]) -> Result<Expr> {
    Ok(Expr::named_call(
        "if",
        vec![args[0].clone(), Expr::named_call("do", args[1..].to_vec())],
    ))
}

fn let_(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let name = name_of("let", &args[0])?;
    let value = args[1].evaluate(scope)?;
    scope.define(name.name.clone(), value.clone());
    Ok(value)
}

fn set(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let name = name_of("set", &args[0])?;
    let value = args[1].evaluate(scope)?;
    scope.set(&name.name, value.clone())?;
    Ok(value)
}

fn closure(callable: &str, scope: &Scope, args: &[Expr]) -> Result<Closure> {
    let (body, params) = match args.split_last() {
        Some(split) => split,
        None => return Err(Error::type_error(format!("{} needs a body", callable))),
    };
    let params = params
        .iter()
        .map(|param| name_of(callable, param).map(Ident::clone))
        .collect::<Result<Vec<_>>>()?;
    Ok(Closure::new(params, body.clone(), scope.clone()))
}

fn fn_(scope: &Scope, args: &[Expr]) -> Result<Value> {
    closure("fn", scope, args).map(|closure| Callable::function(closure).into())
}

fn def(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let name = name_of("def", &args[0])?;
    let closure = closure("def", scope, &args[1..])?.named(name.name.clone());
    let value = Value::Callable(Callable::function(closure));
    scope.define(name.name.clone(), value.clone());
    Ok(value)
}

fn print(scope: &Scope, args: &[Expr]) -> Result<Value> {
    let values = eval_args(scope, args)?;
    println!("{}", values.iter().join(" "));
    Ok(Value::Nil)
}

fn type_of(scope: &Scope, args: &[Expr]) -> Result<Value> {
    Ok(args[0].evaluate(scope)?.type_name().into())
}
