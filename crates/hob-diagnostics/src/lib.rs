//! Hob diagnostics.
//! Spans and parse-time diagnostics shared by the parser and the CLI.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Source span inside one template: byte offsets plus 1-based line/col for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    /// Template name as given to the parser (not necessarily a file path).
    pub name: String,
    pub start: usize,
    pub end: usize, // half-open
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(name: impl Into<String>, start: usize, end: usize, line: u32, col: u32) -> Self {
        Self { name: name.into(), start, end, line, col }
    }

    /// Zero-width span at a position.
    pub fn point(name: impl Into<String>, at: usize, line: u32, col: u32) -> Self {
        Self::new(name, at, at, line, col)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub category: &'static str, // stable slug, e.g. "unclosed-action"
    pub severity: Severity,
    pub message: String, // one-line summary, no trailing period
    pub span: Span,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        category: &'static str,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self { category, severity, message: message.into(), span, help: None }
    }

    pub fn error(category: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, category, message, span)
    }

    pub fn warning(category: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, category, message, span)
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}: {}", self.severity, self.category, self.message)?;
        write!(f, "  ┌─ {}:{}:{}", self.span.name, self.span.line, self.span.col)?;
        if let Some(h) = &self.help {
            write!(f, "\n  = help: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Join several diagnostics into one printable block (parser errors are
/// usually a single entry, but the type allows more).
pub fn join(diags: &[Diagnostic]) -> String {
    let mut out = String::new();
    for (i, d) in diags.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&d.to_string());
    }
    out
}
