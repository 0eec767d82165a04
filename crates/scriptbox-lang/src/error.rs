use std::fmt;

use thiserror::Error;

/// Rejection raised while compiling a script: malformed source or a denied
/// construct. No part of the script has run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Line {line}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Kind name reported for a runtime exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    ModuleNotFoundError,
    ImportError,
    ImportDenied,
    RecursionError,
    OverflowError,
    AssertionError,
    StopIteration,
    RuntimeError,
    SyntaxError,
    UnknownDataSource,
    UnknownQuery,
    NoResultsYet,
    QueryExecutionError,
}

impl ExcKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExcKind::NameError => "NameError",
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExcKind::ImportError => "ImportError",
            ExcKind::ImportDenied => "ImportDenied",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::SyntaxError => "SyntaxError",
            ExcKind::UnknownDataSource => "UnknownDataSource",
            ExcKind::UnknownQuery => "UnknownQuery",
            ExcKind::NoResultsYet => "NoResultsYet",
            ExcKind::QueryExecutionError => "QueryExecutionError",
        }
    }
}

impl fmt::Display for ExcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime exception raised by script code, a builtin, or a host accessor.
///
/// `line` is the 1-based line of the main script statement, at module
/// level, that was executing when the exception escaped. Failures inside
/// functions report the call site in the main script.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct Exception {
    pub kind: ExcKind,
    pub message: String,
    pub line: Option<usize>,
}

impl Exception {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ValueError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::AttributeError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::IndexError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::KeyError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ExcKind::OverflowError, "integer overflow")
    }

    /// Record the line if none is set yet.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl From<scriptbox_core::Error> for Exception {
    fn from(e: scriptbox_core::Error) -> Self {
        let kind = match &e {
            scriptbox_core::Error::Schema(msg) if msg.contains("not found") => ExcKind::KeyError,
            _ => ExcKind::ValueError,
        };
        Exception::new(kind, e.to_string())
    }
}

pub type ExecResult<T> = std::result::Result<T, Exception>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_display_is_kind_and_message() {
        let e = Exception::zero_division("division by zero");
        assert_eq!(e.to_string(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn at_line_keeps_innermost() {
        let e = Exception::type_error("x").at_line(7).at_line(3);
        assert_eq!(e.line, Some(7));
    }

    #[test]
    fn compile_error_names_line() {
        assert_eq!(CompileError::new(2, "bad").to_string(), "Line 2: bad");
    }
}
