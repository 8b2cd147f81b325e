//! Error types for template compilation and rendering.
//!
//! Compilation problems (lexing, parsing, code emission) surface as
//! [`CompileError`] from the `Template` constructor; faults during a render
//! (division by zero, unknown modifier) surface as [`RuntimeError`] from
//! `Template::process`. Missing variables and members are never errors, they
//! resolve to the shared empty value.

use std::fmt;

/// Line and column information for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    /// 1-indexed line number.
    pub line: usize,
    /// 1-indexed column number in characters.
    pub column: usize,
    /// Byte offset in the source.
    pub offset: usize,
}

impl SourceLocation {
    /// Calculate line/column from source and byte offset.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];

        let line = before.chars().filter(|&c| c == '\n').count() + 1;
        let line_start = before.rfind('\n').map(|pos| pos + 1).unwrap_or(0);
        let column = source[line_start..offset].chars().count() + 1;

        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A failure while turning template source into an executor.
///
/// Carries the byte position of the offending input so callers can map it
/// back to a line and column with [`SourceLocation::from_offset`].
#[derive(Debug, Clone)]
pub struct CompileError {
    /// What went wrong.
    pub message: String,
    /// Byte position in the template source, when known. Emission errors
    /// (e.g. a comparison between incompatible static types) have none.
    pub position: Option<usize>,
}

impl CompileError {
    /// Creates a compile error at a known source position.
    pub fn at(position: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: Some(position),
        }
    }

    /// Creates a compile error without a source position.
    pub fn emit(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    /// Formats the error with line/column resolved against the source.
    pub fn format_with_source(&self, source: &str) -> String {
        match self.position {
            Some(pos) => {
                let loc = SourceLocation::from_offset(source, pos);
                format!("error: {} at {}", self.message, loc)
            }
            None => format!("error: {}", self.message),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{} (at byte {})", self.message, pos),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// A failure while rendering a compiled template.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    /// Human-readable description of the fault.
    pub message: String,
}

impl RuntimeError {
    /// Creates a runtime error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Any error the engine can produce.
#[derive(Debug)]
pub enum Error {
    /// Lexing, parsing or code-emission failure.
    Compile(CompileError),
    /// Fault during a render.
    Runtime(RuntimeError),
    /// I/O failure while reading a template file or shared object.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(e) => write!(f, "compile error: {}", e),
            Error::Runtime(e) => write!(f, "runtime error: {}", e),
            Error::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Compile(e) => Some(e),
            Error::Runtime(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl From<CompileError> for Error {
    fn from(e: CompileError) -> Self {
        Error::Compile(e)
    }
}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        Error::Runtime(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_from_offset() {
        let src = "first\nsecond line\nthird";
        let loc = SourceLocation::from_offset(src, 0);
        assert_eq!((loc.line, loc.column), (1, 1));

        let loc = SourceLocation::from_offset(src, src.find("second").unwrap());
        assert_eq!((loc.line, loc.column), (2, 1));

        let loc = SourceLocation::from_offset(src, src.find("line").unwrap());
        assert_eq!((loc.line, loc.column), (2, 8));
    }

    #[test]
    fn compile_error_formats_position() {
        let err = CompileError::at(8, "unexpected token");
        assert_eq!(
            err.format_with_source("{if true}"),
            "error: unexpected token at 1:9"
        );
    }
}
