//! Error taxonomies for the `llt` engine: parse-time and render-time.

use thiserror::Error;

use crate::value::ValueKind;

/// A position in source text, captured by the parser for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Errors raised while parsing `.llt` source into templates.
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Position },

    #[error("{pos}: unterminated block comment")]
    UnterminatedBlockComment { pos: Position },

    #[error("{pos}: unexpected token, expected {expected}")]
    UnexpectedToken { pos: Position, expected: String },

    #[error("{pos}: unexpected end of input inside block, expected {expected}")]
    UnexpectedEof { pos: Position, expected: String },

    #[error("{pos}: unknown operator '{op}'")]
    UnknownOperator { pos: Position, op: String },

    #[error("{pos}: {message}")]
    Grammar { pos: Position, message: String },
}

/// Errors raised while rendering a parsed template against a context.
#[derive(Error, Debug, PartialEq)]
pub enum TemplateRuntimeError {
    #[error("cannot access property '{name}' on {on:?}")]
    CannotAccessProperty { name: String, on: ValueKind },

    #[error("index {index} out of range (length {length})")]
    IndexOutOfRange { index: i64, length: usize },

    #[error("index value is not an integer: {value}")]
    IndexNotInteger { value: String },

    #[error("indexing is not supported on {on:?}")]
    IndexingNotSupported { on: ValueKind },

    #[error("method '{name}' is not supported on {on:?}")]
    MethodNotSupported { name: String, on: ValueKind },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unary operator '{op}' is not applicable to {on:?}")]
    UnaryNotApplicable { op: &'static str, on: ValueKind },

    #[error("binary operator '{op}' is not applicable to ({left:?}, {right:?})")]
    BinaryNotApplicable {
        op: &'static str,
        left: ValueKind,
        right: ValueKind,
    },

    #[error("value of kind {0:?} is not iterable")]
    NotIterable(ValueKind),

    #[error("variable '{0}' not found in any frame")]
    VariableNotFound(String),

    #[error("frame stack overflow (limit exceeded)")]
    StackOverflow,

    #[error("frame stack underflow (pop without matching push)")]
    StackUnderflow,

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("template kind mismatch: expected {expected}, found {actual}")]
    TemplateKindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid message role '{0}'")]
    InvalidRole(String),

    #[error("the 'tool' role is reserved and not supported")]
    ToolNotSupported,

    #[error("invalid format '{format}' for {kind:?}")]
    FormatInvalid { kind: ValueKind, format: String },
}
