//! JSON-RPC envelopes and the LSP payloads exchanged with a server.
//!
//! Outgoing payloads are typed structs; the initialize capabilities stay an
//! opaque JSON value. Inbound diagnostics are converted to
//! [`lsbridge_types::Diagnostic`] at this boundary.

use std::path::{Path, PathBuf};

use lsbridge_types::{Diagnostic, DiagnosticSeverity, Range};
use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for a method the client does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Version carried by the open notification. Change notifications continue from 2.
pub const OPEN_VERSION: i32 = 1;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Error reply for a server-initiated request the client does not handle.
pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub process_id: u32,
    /// Absolute filesystem path of the project.
    pub root_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_uri: Option<String>,
    /// Host product name. Older servers read this field; newer ones read `clientInfo`.
    pub client_name: String,
    pub client_info: ClientInfo,
    pub capabilities: serde_json::Value,
}

impl InitializeParams {
    pub fn new(project_root: &Path, client_name: &str) -> Self {
        Self {
            process_id: std::process::id(),
            root_path: project_root.display().to_string(),
            root_uri: path_to_file_uri(project_root)
                .ok()
                .map(|uri| uri.to_string()),
            client_name: client_name.to_string(),
            client_info: ClientInfo {
                name: client_name.to_string(),
            },
            capabilities: client_capabilities(),
        }
    }
}

fn client_capabilities() -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": false,
                "willSave": false,
                "willSaveWaitUntil": false,
                "didSave": false
            },
            "publishDiagnostics": {
                "relatedInformation": false
            }
        }
    })
}

/// Result of a successful `initialize` request. Only the capabilities are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenTextDocumentParams {
    pub text_document: TextDocumentItem,
}

impl DidOpenTextDocumentParams {
    pub fn new(uri: String, language_id: String, text: String) -> Self {
        Self {
            text_document: TextDocumentItem {
                uri,
                language_id,
                version: OPEN_VERSION,
                text,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionedTextDocumentIdentifier {
    pub uri: String,
    pub version: i32,
}

/// A whole-document replacement; no range is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextDocumentContentChangeEvent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeTextDocumentParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<TextDocumentContentChangeEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    /// Missing or out-of-range severities become warnings.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.message.clone(),
            self.range,
            self.source.clone(),
        )
    }
}

/// A `textDocument/publishDiagnostics` event after boundary conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedDiagnostics {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<PublishDiagnosticsParams> for PublishedDiagnostics {
    fn from(params: PublishDiagnosticsParams) -> Self {
        Self {
            diagnostics: params
                .diagnostics
                .iter()
                .map(LspDiagnostic::to_diagnostic)
                .collect(),
            uri: params.uri,
        }
    }
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
