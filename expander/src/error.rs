use std::fmt;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use mpl::document::{LineCol, Region, line_col};
use mpl::parser::ParseError;
use thiserror::Error;

use crate::submodel::SubmodelState;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("invalid symbol name '{0}'")]
    InvalidName(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("conflicting declarations of '{name}': {existing} != {new}")]
    DeclarationConflict {
        name: String,
        existing: String,
        new: String,
    },

    #[error("type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("{0}")]
    ArgumentError(String),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("'{type_name}' object has no attribute '{attribute}'")]
    AttributeError { type_name: String, attribute: String },

    #[error("index out of range: {0}")]
    IndexError(String),

    #[error("key error: {0}")]
    KeyError(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("unknown submodel '{0}'")]
    UnknownSubmodel(String),

    #[error("submodel '{name}' is not ready ({state})")]
    SubmodelNotReady { name: String, state: SubmodelState },

    #[error("I/O error: {0}")]
    IoError(String),
}

impl RuntimeError {
    pub fn type_error(expected: impl Into<String>, got: impl Into<String>) -> Self {
        RuntimeError::TypeError {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn argument(message: impl Into<String>) -> Self {
        RuntimeError::ArgumentError(message.into())
    }
}

impl From<ParseError> for RuntimeError {
    fn from(error: ParseError) -> Self {
        RuntimeError::Syntax(error.message)
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(error: std::io::Error) -> Self {
        RuntimeError::IoError(error.to_string())
    }
}

/// A runtime error enriched with the location of the `$` construct that raised it.
#[derive(Debug)]
pub struct DiagnosticError {
    pub error: RuntimeError,
    /// Short form of the failing construct, e.g. `$SET[A]{...}`.
    pub command: Option<String>,
    pub span: Option<Range<usize>>,
    pub location: Option<LineCol>,
    pub source_id: usize,
}

impl DiagnosticError {
    /// Attach the region that was being evaluated when `error` was raised.
    pub fn located(error: RuntimeError, source: &str, region: &Region, source_id: usize) -> Self {
        DiagnosticError {
            error,
            command: Some(region.describe(source)),
            span: Some(region.span.clone()),
            location: Some(line_col(source, region.span.start)),
            source_id,
        }
    }

    /// A document-level syntax error from the scanner.
    pub fn from_parse(error: ParseError, source: &str) -> Self {
        let location = line_col(source, error.span.start);
        DiagnosticError {
            span: Some(error.span.clone()),
            source_id: error.file_id,
            location: Some(location),
            command: None,
            error: RuntimeError::from(error),
        }
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        let mut diagnostic = Diagnostic::error().with_message(self.error.to_string());
        if let Some(span) = &self.span {
            let label = Label::primary(self.source_id, span.clone());
            let label = match &self.command {
                Some(command) => label.with_message(format!("while evaluating {}", command)),
                None => label,
            };
            diagnostic = diagnostic.with_labels(vec![label]);
        }
        diagnostic
    }
}

impl From<RuntimeError> for DiagnosticError {
    fn from(error: RuntimeError) -> Self {
        DiagnosticError {
            error,
            command: None,
            span: None,
            location: None,
            source_id: 0,
        }
    }
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.command, &self.location) {
            (Some(command), Some(location)) => write!(
                f,
                "{} (while evaluating {} at {})",
                self.error, command, location
            ),
            (None, Some(location)) => write!(f, "{} at {}", self.error, location),
            _ => self.error.fmt(f),
        }
    }
}

impl std::error::Error for DiagnosticError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
