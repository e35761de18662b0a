//! Structured compile diagnostics.
//!
//! Every user-facing error carries a stable numeric code, a position
//! and a human message, and renders in the classic
//! `file:line: error: [E21] message` shape. The codes are part of the
//! language's error contract: generated programs reuse the runtime
//! codes (43, 45, ...) as process exit codes, so they must not be
//! renumbered.

use std::fmt;

use crate::span::{SourceMap, Span};

/// Stable error codes for the Z compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    // File and I/O
    FileNotFound = 1,
    FileReadError = 2,
    FileWriteError = 3,
    InvalidFileFormat = 4,

    // Syntax and parsing
    SyntaxError = 11,
    UnknownOpcode = 15,
    MissingTerminator = 17,
    DuplicateLabel = 18,

    // Semantic analysis
    UndefinedSymbol = 21,
    Redeclaration = 22,
    TypeMismatch = 23,
    ImmutableAssignment = 24,
    MissingReturn = 28,

    // Module resolution
    ImportCycle = 33,
    ImportNotFound = 34,

    // Statically detected runtime conditions; the same numbers are
    // used as exit codes by guards in the generated C.
    DivisionByZero = 42,
    OutOfBounds = 43,
    Overflow = 45,

    // External toolchain
    CompilationError = 62,

    // `ERROR "msg"` in user programs
    CustomError = 99,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:02}", self.as_u32())
    }
}

/// A single compile-time diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(code: ErrorCode, message: impl Into<String>, span: Span) -> Diagnostic {
        Diagnostic {
            code,
            message: message.into(),
            span: Some(span),
        }
    }

    /// A diagnostic that is not tied to a source line, e.g. a missing
    /// import file reported against the import path itself.
    pub fn file_error(code: ErrorCode, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            code,
            message: message.into(),
            span: None,
        }
    }

    pub fn render(&self, sources: &SourceMap) -> String {
        match self.span {
            Some(span) => format!(
                "{}:{}: error: [{}] {}",
                sources.path(span.file).display(),
                span.line,
                self.code,
                self.message
            ),
            None => format!("error: [{}] {}", self.code, self.message),
        }
    }
}

/// All diagnostics produced by a rejected compilation, together with
/// the source map needed to render them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticBag {
    pub diagnostics: Vec<Diagnostic>,
    pub sources: SourceMap,
}

impl DiagnosticBag {
    pub fn new(diagnostics: Vec<Diagnostic>, sources: SourceMap) -> DiagnosticBag {
        DiagnosticBag {
            diagnostics,
            sources,
        }
    }

    pub fn codes(&self) -> Vec<ErrorCode> {
        self.diagnostics.iter().map(|d| d.code).collect()
    }

    pub fn has(&self, code: ErrorCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }
}

impl fmt::Display for DiagnosticBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diag) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diag.render(&self.sources))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceMap;

    #[test]
    fn renders_with_file_and_line() {
        let mut sources = SourceMap::new();
        let file = sources.add("prog.z");
        let diag = Diagnostic::error(
            ErrorCode::UndefinedSymbol,
            "variable 'x' is not declared",
            Span::new(file, 7),
        );
        assert_eq!(
            diag.render(&sources),
            "prog.z:7: error: [E21] variable 'x' is not declared"
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::UndefinedSymbol.as_u32(), 21);
        assert_eq!(ErrorCode::TypeMismatch.as_u32(), 23);
        assert_eq!(ErrorCode::OutOfBounds.as_u32(), 43);
        assert_eq!(ErrorCode::Overflow.as_u32(), 45);
    }
}
