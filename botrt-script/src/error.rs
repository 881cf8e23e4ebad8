use crate::value::{ErrorValue, Value};
use std::sync::Arc;
use thiserror::Error;

/// Failure raised while running a script
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// A thrown value. Catchable by `try`/`catch`.
    #[error("{value}")]
    Thrown {
        value: Value,
        line: Option<u32>,
        column: Option<u32>,
    },

    /// The step budget of the enclosing entry is exhausted. Never catchable.
    #[error("Ran out of energy")]
    OutOfEnergy,
}

impl ScriptError {
    pub fn thrown(value: Value) -> Self {
        ScriptError::Thrown {
            value,
            line: None,
            column: None,
        }
    }

    pub fn error(name: &str, message: impl Into<String>) -> Self {
        ScriptError::thrown(Value::Error(Arc::new(ErrorValue::new(name, message))))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::error("TypeError", message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        ScriptError::error("ReferenceError", message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        ScriptError::error("RangeError", message)
    }

    pub fn is_out_of_energy(&self) -> bool {
        matches!(self, ScriptError::OutOfEnergy)
    }

    /// Attach a source position if none is recorded yet
    pub fn at(self, line: u32, column: u32) -> Self {
        match self {
            ScriptError::Thrown {
                value,
                line: None,
                column: None,
            } => ScriptError::Thrown {
                value,
                line: Some(line),
                column: Some(column),
            },
            other => other,
        }
    }

    /// Error name as scripts would see it (`err.name`)
    pub fn name(&self) -> String {
        match self {
            ScriptError::Thrown {
                value: Value::Error(err),
                ..
            } => err.name.clone(),
            ScriptError::Thrown { .. } => "Error".to_string(),
            ScriptError::OutOfEnergy => "Error".to_string(),
        }
    }

    /// Convert into an error object suitable for storing as a tag value
    pub fn into_error_value(self) -> Value {
        match self {
            ScriptError::Thrown {
                value: value @ Value::Error(_),
                ..
            } => value,
            ScriptError::Thrown { value, .. } => Value::error("Error", value.to_string()),
            ScriptError::OutOfEnergy => Value::error("Error", "Ran out of energy"),
        }
    }
}

/// Syntax error reported by [`crate::ScriptHost::compile`]
#[derive(Debug, Clone, PartialEq, Error)]
#[error("SyntaxError: {message} ({line}:{column})")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_attached_once() {
        let err = ScriptError::error("Error", "boom").at(2, 5).at(9, 9);
        match err {
            ScriptError::Thrown { line, column, .. } => {
                assert_eq!(line, Some(2));
                assert_eq!(column, Some(5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_thrown_string_becomes_error_object() {
        let value = ScriptError::thrown(Value::from("bad")).into_error_value();
        assert_eq!(value.to_string(), "Error: bad");
    }
}
