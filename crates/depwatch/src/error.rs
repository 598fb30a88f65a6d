#![forbid(unsafe_code)]

//! Error types for depwatch.
//!
//! Two families exist and they never mix:
//!
//! - [`WatchError`] is raised synchronously while setting a watch up
//!   (analysis, registration, scope misuse). It is always a programmer error
//!   and fails the call that caused it.
//! - [`EvalError`] is produced when a compiled expression is re-run after a
//!   change. It is recovered locally and delivered through the watcher's
//!   callback channel, never propagated out of notification machinery.

use thiserror::Error;

/// Crate-level result alias for setup-time operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Setup-time failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("unsupported expression '{expression}': {reason}")]
    UnsupportedExpression { expression: String, reason: String },

    #[error("type '{type_name}' has no member named '{member}'")]
    UnknownMember { type_name: String, member: String },

    #[error("the property '{property}' already has an observer")]
    DuplicateProperty { property: String },

    #[error("the expression '{expression}' is already observed by '{property}'")]
    DuplicateExpression { property: String, expression: String },

    #[error("the scope has already been disposed")]
    ScopeDisposed,

    #[error("values of type '{type_name}' raise neither property nor collection notifications")]
    NotObservable { type_name: String },
}

impl WatchError {
    #[must_use]
    pub fn unsupported(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Evaluation-time failures of a compiled expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("null reference while evaluating '{expression}'")]
    NullReference { expression: String },

    #[error("type mismatch in '{expression}': expected {expected}, found {found}")]
    TypeMismatch {
        expression: String,
        expected: String,
        found: String,
    },

    #[error("division by zero in '{expression}'")]
    DivideByZero { expression: String },

    #[error("'{type_name}' does not expose a readable property '{property}'")]
    MissingProperty { type_name: String, property: String },

    #[error("call to '{function}' failed: {message}")]
    Call { function: String, message: String },
}

impl EvalError {
    #[must_use]
    pub fn call(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            function: function.into(),
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(
        expression: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            expression: expression.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_message_names_expression() {
        let err = WatchError::unsupported("o.Field", "writable field");
        assert_eq!(
            err.to_string(),
            "unsupported expression 'o.Field': writable field"
        );
    }

    #[test]
    fn eval_error_messages() {
        let err = EvalError::NullReference {
            expression: "root.Child.Number".into(),
        };
        assert!(err.to_string().contains("root.Child.Number"));

        let err = EvalError::call("Find", "not found");
        assert_eq!(err.to_string(), "call to 'Find' failed: not found");
    }
}
