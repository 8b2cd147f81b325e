//! Error types for the parser.

use std::fmt;

use crate::error::CompileError;
use crate::lexer::TokenKind;

/// The kind of parse error that occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// Encountered a token that does not fit the grammar here.
    UnexpectedToken,
    /// Reached end of input while a construct was still open.
    UnexpectedEof,
    /// Expected the start of an expression.
    ExpectedExpression,
    /// Expected an identifier.
    ExpectedIdentifier,
    /// Expected the `}` closing a directive.
    ExpectedCloseBrace,
    /// A `{/if}`, `{else}`, `{foreachelse}` or similar without a matching
    /// open construct.
    UnmatchedBlockEnd,
    /// Comparison operators cannot be chained.
    NonAssociativeComparison,
    /// The loop variable of a foreach must be a plain `$name`.
    InvalidLoopVariable,
    /// Modifier arguments must be literals.
    InvalidModifierArgument,
}

impl ParseErrorKind {
    /// Returns a human-readable description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnexpectedToken => "unexpected token",
            Self::UnexpectedEof => "unexpected end of input",
            Self::ExpectedExpression => "expected an expression",
            Self::ExpectedIdentifier => "expected an identifier",
            Self::ExpectedCloseBrace => "expected '}' to close the directive",
            Self::UnmatchedBlockEnd => "block end without a matching open construct",
            Self::NonAssociativeComparison => "comparison operators cannot be chained",
            Self::InvalidLoopVariable => "loop variable must be a plain $name",
            Self::InvalidModifierArgument => "modifier arguments must be literals",
        }
    }
}

/// A parse error with position and context information.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// The kind of error.
    pub kind: ParseErrorKind,
    /// Byte position in the input where the error occurred.
    pub position: usize,
    /// What was actually found, when useful.
    pub found: Option<String>,
}

impl ParseError {
    /// Creates a new parse error.
    pub fn new(kind: ParseErrorKind, position: usize) -> Self {
        Self {
            kind,
            position,
            found: None,
        }
    }

    /// Creates an "unexpected token" error describing what was found.
    pub fn unexpected(position: usize, found: &TokenKind) -> Self {
        Self {
            kind: ParseErrorKind::UnexpectedToken,
            position,
            found: Some(format!("{:?}", found)),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.found {
            Some(found) => write!(f, "{} (found {})", self.kind.description(), found),
            None => write!(f, "{}", self.kind.description()),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::at(e.position, e.to_string())
    }
}

/// Result type for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;
