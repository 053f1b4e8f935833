//! Semantic errors.
//!
//! User errors carry a source span and a stable code; the first one aborts
//! the compilation. Internal invariant violations are not errors, they panic.

use mica_diagnostic::{Diagnostic, ErrorCode};
use mica_ir::Span;

/// A user-facing semantic error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemaError {
    pub code: ErrorCode,
    pub span: Span,
    pub message: String,
}

pub type SemaResult<T> = Result<T, SemaError>;

impl SemaError {
    pub fn new(code: ErrorCode, span: Span, message: impl Into<String>) -> SemaError {
        SemaError {
            code,
            span,
            message: message.into(),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code)
            .with_message(self.message.clone())
            .with_span(self.span)
    }
}

impl std::fmt::Display for SemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SemaError {}
