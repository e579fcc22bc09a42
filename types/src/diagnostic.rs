//! Diagnostics as published by a language server, and the severities they map to.

use serde::{Deserialize, Serialize};

/// A zero-based line/column position. `character` counts UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Severity level for a diagnostic, as numbered by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    /// Callers (boundary code) decide the fallback policy.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// Severity understood by the editor's annotation store.
///
/// The store only knows three levels; the numeric values are the store's own
/// constants, not the protocol's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerSeverity {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl From<DiagnosticSeverity> for MarkerSeverity {
    fn from(severity: DiagnosticSeverity) -> Self {
        match severity {
            DiagnosticSeverity::Error => Self::Error,
            DiagnosticSeverity::Warning => Self::Warning,
            DiagnosticSeverity::Information | DiagnosticSeverity::Hint => Self::Info,
        }
    }
}

/// A single diagnostic from a language server.
///
/// Diagnostics carry no identity of their own; two publishes of "the same"
/// problem are only recognisable by position, source and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    range: Range,
    /// Project-relative path of the originating resource. Kept optional:
    /// a missing source must never compare equal to any resource path.
    source: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: String,
        range: Range,
        source: Option<String>,
    ) -> Self {
        Self {
            severity,
            message,
            range,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Format as `source:line:col: severity: message` (1-indexed for display).
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{}:{}:{}: {}: {}",
            self.source.as_deref().unwrap_or("<unknown>"),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.message,
        )
    }
}
