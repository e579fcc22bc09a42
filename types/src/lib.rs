//! Core domain types for lsbridge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the workspace.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod text;

pub use diagnostic::{Diagnostic, DiagnosticSeverity, MarkerSeverity, Position, Range};
pub use text::{document_offset, position_to_char_index};

/// Environment variable patterns stripped from spawned language server processes.
///
/// Patterns are case-insensitive globs: `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, or
/// an exact name.
pub const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_API_KEY",
    "*_KEY",
    "*_SECRET",
    "*_SECRET_*",
    "*_TOKEN",
    "*_PASSWORD",
    "*_CREDENTIAL*",
    "AWS_*",
    "AZURE_*",
    "GH_TOKEN",
    "GITHUB_TOKEN",
    "NPM_TOKEN",
];
