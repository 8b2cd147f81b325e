//! Error types for the tokenizer.

use std::fmt;

use crate::error::CompileError;

/// The kind of lexer error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    /// A `{` directive was never closed by `}`.
    UnterminatedDirective,
    /// A string literal is missing its closing quote.
    UnterminatedString,
    /// Invalid escape sequence in a string literal.
    InvalidEscapeSequence,
    /// A character that has no meaning inside a directive.
    InvalidCharacter,
    /// An integer literal that does not fit in 64 bits.
    IntegerOverflow,
    /// A malformed floating point literal (e.g. missing exponent digits).
    InvalidNumericLiteral,
}

impl LexErrorKind {
    /// Returns a human-readable description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnterminatedDirective => "unterminated directive",
            Self::UnterminatedString => "unterminated string literal",
            Self::InvalidEscapeSequence => "invalid escape sequence",
            Self::InvalidCharacter => "invalid character in directive",
            Self::IntegerOverflow => "integer literal out of range",
            Self::InvalidNumericLiteral => "invalid numeric literal",
        }
    }
}

/// A lexer error with the byte position it occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// The kind of error.
    pub kind: LexErrorKind,
    /// Byte position in the input where the error occurred.
    pub position: usize,
}

impl LexError {
    /// Creates a new lexer error.
    pub fn new(kind: LexErrorKind, position: usize) -> Self {
        Self { kind, position }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.description())
    }
}

impl std::error::Error for LexError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::at(e.position, e.kind.description())
    }
}

/// Result type for lexer operations.
pub type LexResult<T> = Result<T, LexError>;
