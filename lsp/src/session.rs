//! Protocol session: one JSON-RPC connection to a language server.
//!
//! A writer task drains an unbounded queue of outgoing messages, so
//! notifications can be sent from synchronous editor callbacks. A reader task
//! routes responses to waiting requests, answers server-initiated requests,
//! and hands `publishDiagnostics` to the registered subscriber.
//!
//! [`ProtocolSession::connect`] spawns both tasks and must be called from
//! within a tokio runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{MessageReader, MessageWriter};
use crate::protocol::{
    self, DidChangeTextDocumentParams, DidOpenTextDocumentParams, InitializeParams,
    InitializeResult, Notification, PublishDiagnosticsParams, PublishedDiagnostics, Request,
};
use crate::transport::TransportStreams;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("writer channel closed")]
    WriterClosed,
    #[error("request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("response channel dropped")]
    ResponseDropped,
    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("JSON-RPC payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

pub type ErrorListener = Arc<dyn Fn(&str) + Send + Sync>;
pub type TraceListener = Arc<dyn Fn(MessageDirection, &serde_json::Value) + Send + Sync>;
pub type DiagnosticsHandler = Arc<dyn Fn(PublishedDiagnostics) + Send + Sync>;

pub(crate) enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum Incoming {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn classify(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), None, true) => Some(Incoming::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method), _) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

#[derive(Default)]
struct Listeners {
    errors: RwLock<Vec<ErrorListener>>,
    traces: RwLock<Vec<TraceListener>>,
    diagnostics: RwLock<Option<DiagnosticsHandler>>,
}

impl Listeners {
    fn report_error(&self, message: &str) {
        let listeners = self
            .errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(message);
        }
    }

    fn trace(&self, direction: MessageDirection, frame: &serde_json::Value) {
        let listeners = self
            .traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(direction, frame);
        }
    }

    fn diagnostics_handler(&self) -> Option<DiagnosticsHandler> {
        self.diagnostics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Cheap handle for sending notifications into a session.
///
/// Trackers hold one of these; it stays valid until the session shuts down,
/// after which sends fail with [`SessionError::WriterClosed`].
#[derive(Clone)]
pub struct Notifier {
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    listeners: Arc<Listeners>,
}

impl Notifier {
    fn send(&self, frame: serde_json::Value) -> Result<(), SessionError> {
        self.listeners.trace(MessageDirection::Outgoing, &frame);
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .map_err(|_| SessionError::WriterClosed)
    }

    pub fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        let frame = serde_json::to_value(Notification::new(method, params))?;
        self.send(frame)
    }

    pub fn did_change(&self, params: &DidChangeTextDocumentParams) -> Result<(), SessionError> {
        self.notify("textDocument/didChange", Some(serde_json::to_value(params)?))
    }

    /// A notifier whose writer side is the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<WriterCommand>) {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let notifier = Self {
            writer_tx,
            listeners: Arc::new(Listeners::default()),
        };
        (notifier, writer_rx)
    }
}

pub struct ProtocolSession {
    label: String,
    notifier: Notifier,
    next_id: AtomicU64,
    pending: PendingMap,
    reader_handle: JoinHandle<()>,
    writer_handle: Option<JoinHandle<()>>,
}

impl ProtocolSession {
    /// Take ownership of the transport streams and start the I/O tasks.
    pub fn connect(label: impl Into<String>, streams: TransportStreams) -> Self {
        let label = label.into();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let notifier = Notifier {
            writer_tx,
            listeners: Arc::new(Listeners::default()),
        };
        let pending: PendingMap = Arc::default();

        let writer_handle = tokio::spawn(run_writer(
            streams.writer,
            writer_rx,
            notifier.listeners.clone(),
            label.clone(),
        ));
        let reader_handle = tokio::spawn(run_reader(
            streams.reader,
            pending.clone(),
            notifier.clone(),
            label.clone(),
        ));

        Self {
            label,
            notifier,
            next_id: AtomicU64::new(1),
            pending,
            reader_handle,
            writer_handle: Some(writer_handle),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn add_error_listener(&self, listener: ErrorListener) {
        self.notifier
            .listeners
            .errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_trace_listener(&self, listener: TraceListener) {
        self.notifier
            .listeners
            .traces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Subscribe to `textDocument/publishDiagnostics`. Replaces any earlier subscriber.
    pub fn on_publish_diagnostics(&self, handler: DiagnosticsHandler) {
        *self
            .notifier
            .listeners
            .diagnostics
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Perform the initialize handshake, waiting at most `timeout` for the reply.
    ///
    /// On success the `initialized` notification is sent before returning.
    pub async fn initialize(
        &self,
        params: &InitializeParams,
        timeout: Duration,
    ) -> Result<InitializeResult, SessionError> {
        let response = self
            .request("initialize", Some(serde_json::to_value(params)?), timeout)
            .await?;
        let result = match response.get("result") {
            Some(result) if !result.is_null() => serde_json::from_value(result.clone())?,
            _ => InitializeResult::default(),
        };
        self.notifier
            .notify("initialized", Some(serde_json::json!({})))?;
        Ok(result)
    }

    pub fn did_open(&self, params: &DidOpenTextDocumentParams) -> Result<(), SessionError> {
        self.notifier
            .notify("textDocument/didOpen", Some(serde_json::to_value(params)?))
    }

    pub fn did_change(&self, params: &DidChangeTextDocumentParams) -> Result<(), SessionError> {
        self.notifier.did_change(params)
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if let Err(e) = self.notifier.send(frame) {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(SessionError::ResponseDropped);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(SessionError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        if let Some(error) = response.get("error") {
            return Err(SessionError::Rpc {
                code: error["code"].as_i64().unwrap_or_default(),
                message: error["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response)
    }

    /// Send `shutdown`, wait at most `timeout` for its reply, then send `exit`
    /// and close the connection.
    ///
    /// Returns once every queued message has been written, or after a second
    /// `timeout` if the writer is stuck. `exit` is sent even when the server
    /// never answers the shutdown request.
    pub async fn shutdown(mut self, timeout: Duration) {
        if let Err(e) = self.request("shutdown", None, timeout).await {
            tracing::debug!(server = %self.label, "Shutdown request failed: {e}");
        }
        let _ = self.notifier.notify("exit", None);
        let _ = self.notifier.writer_tx.send(WriterCommand::Shutdown);

        if let Some(writer) = self.writer_handle.take()
            && tokio::time::timeout(timeout, writer).await.is_err()
        {
            tracing::debug!(server = %self.label, "Writer did not drain in time");
        }
        tracing::debug!(server = %self.label, "Protocol session shut down");
    }

    /// Queue `shutdown` and `exit` without waiting for anything.
    ///
    /// For teardown paths that cannot await. The writer task keeps running
    /// until the queue is drained.
    pub fn close(self) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(frame) = serde_json::to_value(Request::new(id, "shutdown", None)) {
            let _ = self.notifier.send(frame);
        }
        let _ = self.notifier.notify("exit", None);
        tracing::debug!(server = %self.label, "Protocol session closed");
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        let _ = self.notifier.writer_tx.send(WriterCommand::Shutdown);
        self.reader_handle.abort();
    }
}

async fn run_writer(
    writer: impl AsyncWrite + Unpin,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    listeners: Arc<Listeners>,
    label: String,
) {
    let mut writer = MessageWriter::new(writer);
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Send(frame) => {
                if let Err(e) = writer.write_message(&frame).await {
                    listeners.report_error(&format!("write to '{label}' failed: {e:#}"));
                    break;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
    commands.close();
}

async fn run_reader(
    reader: impl AsyncRead + Unpin,
    pending: PendingMap,
    notifier: Notifier,
    label: String,
) {
    let mut reader = MessageReader::new(reader);
    loop {
        match reader.read_message().await {
            Ok(Some(frame)) => {
                notifier.listeners.trace(MessageDirection::Incoming, &frame);
                dispatch(&frame, &pending, &notifier, &label).await;
            }
            Ok(None) => {
                tracing::info!(server = %label, "Language server closed its output");
                break;
            }
            Err(e) => {
                notifier
                    .listeners
                    .report_error(&format!("read from '{label}' failed: {e:#}"));
                break;
            }
        }
    }
    // Fail any request still waiting for a reply.
    pending.lock().await.clear();
}

async fn dispatch(frame: &serde_json::Value, pending: &PendingMap, notifier: &Notifier, label: &str) {
    let Some(incoming) = classify(frame) else {
        tracing::trace!(server = %label, "Ignoring malformed JSON-RPC frame");
        return;
    };

    match incoming {
        Incoming::Response { id, body } => {
            let waiter = pending.lock().await.remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(body);
                }
                None => tracing::debug!(server = %label, id, "Response for unknown request"),
            }
        }
        Incoming::ServerRequest { id, method } => {
            // Servers may block until client/registerCapability and friends are answered.
            tracing::debug!(server = %label, %method, "Replying method not found to server request");
            if let Err(e) = notifier.send(protocol::method_not_found(&id, &method)) {
                tracing::debug!(server = %label, "Cannot answer server request: {e}");
            }
        }
        Incoming::Notification { method, params } => {
            handle_notification(&method, params, notifier, label);
        }
    }
}

fn handle_notification(
    method: &str,
    params: Option<serde_json::Value>,
    notifier: &Notifier,
    label: &str,
) {
    match method {
        "textDocument/publishDiagnostics" => {
            let Some(params) = params else { return };
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(params) => match notifier.listeners.diagnostics_handler() {
                    Some(handler) => handler(PublishedDiagnostics::from(params)),
                    None => {
                        tracing::trace!(server = %label, uri = %params.uri, "No diagnostics subscriber");
                    }
                },
                Err(e) => {
                    tracing::debug!(server = %label, "Failed to parse publishDiagnostics: {e}");
                }
            }
        }
        "window/logMessage" | "window/showMessage" => {
            let message = params
                .as_ref()
                .and_then(|p| p.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            tracing::debug!(server = %label, "{method}: {message}");
        }
        _ => {
            tracing::trace!(server = %label, %method, "Ignoring notification");
        }
    }
}
