//! LSP client runtime binding editor documents to language servers.
//!
//! A [`ServerWrapper`] owns one server per project and content type: it starts
//! the server on the first connected document, streams edits as change
//! notifications, reconciles published diagnostics into the editor's
//! annotation store, and stops the server when the last document disconnects.
//! [`SessionRegistry`] keeps one wrapper per key.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod codec;
pub mod config;
pub mod host;
pub mod protocol;

mod reconcile;
mod registry;
mod session;
mod tracker;
mod transport;
mod wrapper;


pub use config::{ConfigError, LspConfig, ServerConfig};
pub use host::{
    AnnotationError, AnnotationStore, DocumentListener, EditorDocument, HostServices, Marker,
    MarkerAttribute, MarkerId, Resource, ResourceKind, SourceFile, Workspace,
};
pub use lsbridge_types::{Diagnostic, DiagnosticSeverity, MarkerSeverity, Position, Range};
pub use protocol::PublishedDiagnostics;
pub use reconcile::{DiagnosticsReconciler, ReconcileReport};
pub use registry::{SessionKey, SessionRegistry, TransportFactory};
pub use session::{
    DiagnosticsHandler, ErrorListener, MessageDirection, Notifier, ProtocolSession, SessionError,
    TraceListener,
};
pub use tracker::{DocumentSyncTracker, FIRST_CHANGE_VERSION};
pub use transport::{ProcessTransport, Transport, TransportStreams};
pub use wrapper::{LifecycleState, ServerWrapper, WrapperError};
