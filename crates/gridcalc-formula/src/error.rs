//! Formula error types

use gridcalc_core::CellError;
use thiserror::Error;

/// Result type for parse-time operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Result type for evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Errors raised while turning formula text into an AST
///
/// Offsets are byte offsets into the formula body (the text after `=`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    /// Formula text does not start with `=`
    #[error("Formula must start with '='")]
    MissingMarker,

    /// The tokenizer met a character it cannot start a token with
    #[error("Lex error at offset {offset}: unexpected {found}")]
    Lex { offset: usize, found: String },

    /// The token stream does not form a valid expression
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
}

impl FormulaError {
    pub(crate) fn lex(offset: usize, found: impl Into<String>) -> Self {
        FormulaError::Lex {
            offset,
            found: found.into(),
        }
    }

    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        FormulaError::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Byte offset of the failure, if it has one
    pub fn offset(&self) -> Option<usize> {
        match self {
            FormulaError::MissingMarker => None,
            FormulaError::Lex { offset, .. } | FormulaError::Parse { offset, .. } => Some(*offset),
        }
    }
}

/// A runtime evaluation failure
///
/// Carries the stable [`CellError`] code the cell displays, plus the name of
/// the function that raised it when the failure happened at a call boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}{}: {message}", in_function_suffix(.function))]
pub struct EvalError {
    pub code: CellError,
    pub function: Option<String>,
    pub message: String,
}

impl EvalError {
    /// Create an error with a message
    pub fn new(code: CellError, message: impl Into<String>) -> Self {
        Self {
            code,
            function: None,
            message: message.into(),
        }
    }

    /// Tag this error with the function it came from, unless already tagged
    pub fn in_function(mut self, name: &str) -> Self {
        if self.function.is_none() {
            self.function = Some(name.to_string());
        }
        self
    }

    /// Wrong argument types or counts
    pub fn value(message: impl Into<String>) -> Self {
        Self::new(CellError::Value, message)
    }

    /// Invalid numeric domain
    pub fn num(message: impl Into<String>) -> Self {
        Self::new(CellError::Num, message)
    }

    /// A resource guard tripped
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::new(CellError::Calc, message)
    }
}

impl From<CellError> for EvalError {
    fn from(code: CellError) -> Self {
        Self::new(code, code.as_str())
    }
}

fn in_function_suffix(function: &Option<String>) -> String {
    function
        .as_ref()
        .map(|name| format!(" in {}", name))
        .unwrap_or_default()
}
