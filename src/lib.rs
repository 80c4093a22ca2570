//! Call dispatch and syntactic expansion for the kismet scripting language.
//!
//! Every callable receives its arguments as unevaluated [`Expr`]s together with
//! the caller's [`Scope`], and decides for itself what to evaluate. Templates
//! are callables that first rewrite the call into a new expression and then
//! evaluate that in the same scope.

pub mod ast;
pub mod builtins;
pub mod callable;
pub mod config;
pub mod error;
pub mod eval;
pub mod parse;
pub mod scope;
pub mod value;

use std::sync::Once;

pub use crate::{
    ast::{Expr, Expression, Ident, Items},
    callable::{Arity, Builtin, Callable, Closure, Function, Rewrite, Template},
    config::Config,
    error::{Error, Result, RunError},
    scope::{Binding, Scope},
    value::Value,
};

/// Parse `source` and evaluate its items in order directly in `scope`
pub fn run(source: &str, scope: &Scope) -> Result<Value, RunError> {
    let items = parse::parse(source)?;
    tracing::debug!(items = items.items.len(), "parsed");
    Ok(items.evaluate(scope)?)
}

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Does nothing unless `RUST_LOG` is set. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}
