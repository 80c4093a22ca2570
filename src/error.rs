use crate::callable::Arity;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unbound name {:?}", _0)]
    UnboundName(String),
    #[error("{} is a {}, which is not callable", head, found)]
    NotCallable { head: String, found: &'static str },
    #[error("{} expects {} arguments but got {}", name, expected, found)]
    Arity {
        name: String,
        expected: Arity,
        found: usize,
    },
    #[error("Expansion of {} failed: {}", template, reason)]
    MacroExpansion { template: String, reason: String },
    #[error("Stack overflow: evaluation exceeded depth {}", _0)]
    StackOverflow(usize),
    #[error("Type error: {}", _0)]
    Type(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn expansion<T, R>(template: T, reason: R) -> Self
    where
        T: Into<String>,
        R: ToString,
    {
        Error::MacroExpansion {
            template: template.into(),
            reason: reason.to_string(),
        }
    }
    pub fn type_error<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Error::Type(message.into())
    }
    /// Whether this failure happened while rewriting a template call rather than
    /// while evaluating one.
    pub fn is_expansion(&self) -> bool {
        matches!(self, Error::MacroExpansion { .. })
    }
}

/// Failure of [`run`](crate::run): either the source did not parse or its
/// evaluation failed
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{}", _0)]
    Parse(#[from] pest::error::Error<crate::parse::Rule>),
    #[error(transparent)]
    Eval(#[from] Error),
}
