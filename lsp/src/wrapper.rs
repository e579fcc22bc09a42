//! `ServerWrapper`: one language server for one project and content type.
//!
//! The server is started by the first `connect` and stopped by the
//! `disconnect` that empties the connected-document registry. A stopped
//! wrapper stays stopped; the [`SessionRegistry`](crate::SessionRegistry)
//! replaces it with a fresh one on the next connect.
//!
//! Stopping is graceful: `shutdown` and `exit` are written out before the
//! transport is released. Dropping a live wrapper only queues them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LspConfig;
use crate::host::{DocumentListener, EditorDocument, HostServices, SourceFile};
use crate::protocol::{
    DidOpenTextDocumentParams, InitializeParams, PathToUriError, PublishedDiagnostics,
};
use crate::reconcile::DiagnosticsReconciler;
use crate::registry::SessionKey;
use crate::session::{MessageDirection, ProtocolSession, SessionError};
use crate::tracker::DocumentSyncTracker;
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    #[error("failed to start language server: {0}")]
    Transport(#[source] std::io::Error),
    #[error("language server has been stopped")]
    Stopped,
    #[error(transparent)]
    Uri(#[from] PathToUriError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Observable lifecycle state of a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Ready,
    Stopped,
}

enum Lifecycle {
    Uninitialized,
    Starting,
    Ready(ProtocolSession),
    Stopped,
}

struct ConnectedDocument {
    tracker: Arc<DocumentSyncTracker>,
    listener: Arc<dyn DocumentListener>,
    document: Arc<dyn EditorDocument>,
}

pub struct ServerWrapper {
    key: SessionKey,
    client_name: String,
    init_timeout: Duration,
    shutdown_timeout: Duration,
    marker_type: String,
    transport: Box<dyn Transport>,
    host: HostServices,
    lifecycle: Lifecycle,
    connected: HashMap<PathBuf, ConnectedDocument>,
    initialize_failed: bool,
}

impl ServerWrapper {
    pub fn new(
        key: SessionKey,
        config: &LspConfig,
        transport: Box<dyn Transport>,
        host: HostServices,
    ) -> Self {
        Self {
            key,
            client_name: config.client_name().to_string(),
            init_timeout: config.init_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            marker_type: config.marker_type().to_string(),
            transport,
            host,
            lifecycle: Lifecycle::Uninitialized,
            connected: HashMap::new(),
            initialize_failed: false,
        }
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        match self.lifecycle {
            Lifecycle::Uninitialized => LifecycleState::Uninitialized,
            Lifecycle::Starting => LifecycleState::Starting,
            Lifecycle::Ready(_) => LifecycleState::Ready,
            Lifecycle::Stopped => LifecycleState::Stopped,
        }
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    #[must_use]
    pub fn is_connected(&self, file: &SourceFile) -> bool {
        self.connected.contains_key(file.location())
    }

    /// Version the next change notification for `file` will carry.
    #[must_use]
    pub fn document_version(&self, file: &SourceFile) -> Option<i32> {
        self.connected
            .get(file.location())
            .map(|entry| entry.tracker.version())
    }

    /// Whether the last initialize handshake failed. The wrapper is usable
    /// either way.
    #[must_use]
    pub fn initialize_failed(&self) -> bool {
        self.initialize_failed
    }

    /// Open `file` on the server, starting the server first if needed.
    ///
    /// Connecting a file that is already connected does nothing.
    pub async fn connect(
        &mut self,
        file: &SourceFile,
        document: Arc<dyn EditorDocument>,
    ) -> Result<(), WrapperError> {
        if matches!(self.lifecycle, Lifecycle::Stopped) {
            return Err(WrapperError::Stopped);
        }
        if self.connected.contains_key(file.location()) {
            return Ok(());
        }
        let uri = file.uri()?.to_string();

        if !matches!(self.lifecycle, Lifecycle::Ready(_)) {
            // A start interrupted by a cancelled connect leaves Starting behind.
            if matches!(self.lifecycle, Lifecycle::Starting) {
                self.transport.stop();
            }
            self.start().await?;
        }
        let Lifecycle::Ready(session) = &self.lifecycle else {
            return Err(WrapperError::Stopped);
        };

        session.did_open(&DidOpenTextDocumentParams::new(
            uri.clone(),
            file.language_id(),
            document.text(),
        ))?;

        let tracker = Arc::new(DocumentSyncTracker::new(uri, session.notifier()));
        let listener: Arc<dyn DocumentListener> = tracker.clone();
        document.add_listener(listener.clone());
        tracing::debug!(server = %self.key, file = %file.location().display(), "Connected document");
        self.connected.insert(
            file.location().to_path_buf(),
            ConnectedDocument {
                tracker,
                listener,
                document,
            },
        );
        Ok(())
    }

    /// Detach `file` from the server. Stops the server once nothing is connected.
    pub async fn disconnect(&mut self, file: &SourceFile, document: &dyn EditorDocument) {
        if let Some(entry) = self.connected.remove(file.location()) {
            document.remove_listener(&entry.listener);
            tracing::debug!(server = %self.key, file = %file.location().display(), "Disconnected document");
        }
        if self.connected.is_empty()
            && matches!(self.lifecycle, Lifecycle::Starting | Lifecycle::Ready(_))
        {
            self.stop().await;
        }
    }

    /// Detach every connected document and stop the server for good.
    pub async fn shutdown(&mut self) {
        self.detach_all();
        match self.lifecycle {
            Lifecycle::Starting | Lifecycle::Ready(_) => self.stop().await,
            Lifecycle::Uninitialized => self.lifecycle = Lifecycle::Stopped,
            Lifecycle::Stopped => {}
        }
    }

    fn detach_all(&mut self) {
        for (_, entry) in self.connected.drain() {
            entry.document.remove_listener(&entry.listener);
        }
    }

    async fn start(&mut self) -> Result<(), WrapperError> {
        self.lifecycle = Lifecycle::Starting;
        tracing::info!(server = %self.key, "Starting language server");

        let streams = match self.transport.start() {
            Ok(streams) => streams,
            Err(e) => {
                self.lifecycle = Lifecycle::Uninitialized;
                return Err(WrapperError::Transport(e));
            }
        };
        let session = ProtocolSession::connect(self.key.to_string(), streams);
        install_default_listeners(&session);

        let params = InitializeParams::new(self.key.project(), &self.client_name);
        match session.initialize(&params, self.init_timeout).await {
            Ok(_) => {
                self.initialize_failed = false;
                tracing::info!(server = %self.key, "Language server initialized");
            }
            Err(e) => {
                self.initialize_failed = true;
                tracing::warn!(server = %self.key, "Initialize failed, continuing without capabilities: {e}");
            }
        }

        let reconciler = DiagnosticsReconciler::new(
            self.key.project(),
            self.marker_type.clone(),
            self.host.workspace.clone(),
            self.host.annotations.clone(),
        );
        session.on_publish_diagnostics(Arc::new(move |published: PublishedDiagnostics| {
            reconciler.reconcile(&published);
        }));

        self.lifecycle = Lifecycle::Ready(session);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Lifecycle::Ready(session) = std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped)
        {
            session.shutdown(self.shutdown_timeout).await;
        }
        self.transport.stop();
        tracing::info!(server = %self.key, "Language server stopped");
    }
}

impl Drop for ServerWrapper {
    fn drop(&mut self) {
        self.detach_all();
        if let Lifecycle::Ready(session) = std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped)
        {
            session.close();
            tracing::debug!(server = %self.key, "Dropped a running language server");
        }
        // A stop cancelled mid-shutdown leaves the transport running.
        self.transport.stop();
    }
}

fn install_default_listeners(session: &ProtocolSession) {
    let label = session.label().to_string();
    session.add_error_listener(Arc::new(move |message: &str| {
        tracing::warn!(server = %label, "{message}");
    }));
    let label = session.label().to_string();
    session.add_trace_listener(Arc::new(
        move |direction: MessageDirection, frame: &serde_json::Value| {
            tracing::trace!(server = %label, ?direction, %frame, "LSP message");
        },
    ));
}
