//! Diagnostics for the Mica compiler.
//!
//! A [`Diagnostic`] carries an error code, a message, a primary span, and
//! optional labels and suggestions. The middle-end distinguishes user errors
//! (reported with a source span, first one aborts the compilation) from
//! internal invariant violations (which panic with a trace); only the former
//! go through this crate.

mod error_code;

pub use error_code::ErrorCode;

use mica_ir::Span;

/// How severe a diagnostic is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// A labeled span within a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// A structured diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
    pub primary_span: Option<Span>,
    pub labels: Vec<Label>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: ErrorCode) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            code,
            message: String::new(),
            primary_span: None,
            labels: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn warning(code: ErrorCode) -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(code)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Diagnostic {
        self.message = message.into();
        self
    }

    pub fn with_span(mut self, span: Span) -> Diagnostic {
        self.primary_span = Some(span);
        self
    }

    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Diagnostic {
        if self.primary_span.is_none() {
            self.primary_span = Some(span);
        }
        self.labels.push(Label {
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Diagnostic {
        self.suggestions.push(suggestion.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        write!(f, "{kind}[{}]: {}", self.code, self.message)?;
        if let Some(span) = self.primary_span {
            if !span.is_dummy() {
                write!(f, " at {span:?}")?;
            }
        }
        for label in &self.labels {
            write!(f, "\n  {:?}: {}", label.span, label.message)?;
        }
        for suggestion in &self.suggestions {
            write!(f, "\n  help: {suggestion}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_includes_code_and_labels() {
        let diag = Diagnostic::error(ErrorCode::E3001)
            .with_message("type mismatch")
            .with_label(Span::new(4, 9), "expected Int32");
        let rendered = diag.to_string();
        assert!(rendered.contains("E3001"));
        assert!(rendered.contains("type mismatch"));
        assert!(rendered.contains("expected Int32"));
        assert_eq!(diag.primary_span, Some(Span::new(4, 9)));
    }
}
