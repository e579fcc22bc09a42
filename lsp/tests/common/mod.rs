//! Shared test utilities and fixtures
//!
//! An in-memory editor host and a scripted language server connected over
//! `tokio::io::duplex` pipes.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lsbridge_lsp::codec::{MessageReader, MessageWriter};
use lsbridge_lsp::protocol::file_uri_to_path;
use lsbridge_lsp::{
    AnnotationError, AnnotationStore, DocumentListener, EditorDocument, HostServices, LspConfig,
    Marker, MarkerAttribute, MarkerId, Resource, ResourceKind, SessionKey, SessionRegistry,
    Transport, TransportFactory, TransportStreams, Workspace,
};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(windows)]
pub fn project_root() -> PathBuf {
    PathBuf::from(r"C:\work\demo")
}

#[cfg(not(windows))]
pub fn project_root() -> PathBuf {
    PathBuf::from("/work/demo")
}

pub fn file_uri(relative: &str) -> String {
    lsbridge_lsp::protocol::path_to_file_uri(&project_root().join(relative))
        .unwrap()
        .to_string()
}

/// Server end of one transport connection.
pub struct FakeServer {
    reader: MessageReader<DuplexStream>,
    writer: MessageWriter<DuplexStream>,
}

impl FakeServer {
    pub async fn next(&mut self) -> Option<serde_json::Value> {
        self.reader.read_message().await.ok().flatten()
    }

    pub async fn expect_method(&mut self, method: &str) -> serde_json::Value {
        loop {
            let message = self
                .next()
                .await
                .unwrap_or_else(|| panic!("client closed before sending {method}"));
            if message["method"] == method {
                return message;
            }
        }
    }

    /// Every remaining client message with `method`, until the client hangs up.
    pub async fn collect_until_closed(mut self, method: &str) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await {
            if message["method"] == method {
                messages.push(message);
            }
        }
        messages
    }

    pub async fn send(&mut self, message: serde_json::Value) {
        self.writer.write_message(&message).await.unwrap();
    }

    pub async fn respond(&mut self, id: &serde_json::Value, result: serde_json::Value) {
        self.send(serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    pub async fn notify(&mut self, method: &str, params: serde_json::Value) {
        self.send(serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await;
    }

    /// Wait until the client has processed everything sent so far.
    ///
    /// Server requests are answered by the client's reader in arrival order,
    /// so the reply proves earlier notifications were fully handled.
    pub async fn round_trip(&mut self) {
        self.send(serde_json::json!({ "jsonrpc": "2.0", "id": "barrier", "method": "test/barrier" }))
            .await;
        while let Some(message) = self.next().await {
            if message["id"] == "barrier" {
                return;
            }
        }
        panic!("client closed before answering the barrier request");
    }

    /// Answer the client's `shutdown` request and wait for its `exit`.
    pub async fn answer_shutdown(&mut self) {
        let request = self.expect_method("shutdown").await;
        self.respond(&request["id"], serde_json::Value::Null).await;
        self.expect_method("exit").await;
    }

    pub async fn publish_diagnostics(&mut self, uri: &str, diagnostics: serde_json::Value) {
        self.notify(
            "textDocument/publishDiagnostics",
            serde_json::json!({ "uri": uri, "diagnostics": diagnostics }),
        )
        .await;
    }
}

/// Accept the next server connection and complete its initialize handshake.
pub async fn accept_and_initialize(servers: &mut mpsc::UnboundedReceiver<FakeServer>) -> FakeServer {
    let mut server = servers.recv().await.expect("transport never started");
    let request = server.expect_method("initialize").await;
    server
        .respond(&request["id"], serde_json::json!({ "capabilities": {} }))
        .await;
    server.expect_method("initialized").await;
    server
}

/// Counts transport starts and stops across every wrapper of a registry.
#[derive(Clone, Default)]
pub struct TransportCounters {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl TransportCounters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct DuplexTransport {
    servers: mpsc::UnboundedSender<FakeServer>,
    counters: TransportCounters,
    running: bool,
}

impl Transport for DuplexTransport {
    fn start(&mut self) -> io::Result<TransportStreams> {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        self.servers
            .send(FakeServer {
                reader: MessageReader::new(server_in),
                writer: MessageWriter::new(server_out),
            })
            .map_err(|_| io::Error::other("test stopped accepting servers"))?;
        self.running = true;
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(TransportStreams::new(client_in, client_out))
    }

    fn stop(&mut self) {
        if std::mem::take(&mut self.running) {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct Harness {
    pub registry: SessionRegistry,
    pub servers: mpsc::UnboundedReceiver<FakeServer>,
    pub counters: TransportCounters,
    pub workspace: Arc<MemoryWorkspace>,
    pub store: Arc<MemoryAnnotationStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(
            LspConfig::default()
                .with_client_name("Test Host")
                .with_shutdown_timeout(Duration::from_millis(100)),
        )
    }

    pub fn with_config(config: LspConfig) -> Self {
        init_tracing();
        let (server_tx, servers) = mpsc::unbounded_channel();
        let counters = TransportCounters::default();
        let factory_counters = counters.clone();
        let factory: TransportFactory = Arc::new(move |_key: &SessionKey| {
            Ok(Box::new(DuplexTransport {
                servers: server_tx.clone(),
                counters: factory_counters.clone(),
                running: false,
            }) as Box<dyn Transport>)
        });

        let workspace = Arc::new(MemoryWorkspace::default());
        let store = Arc::new(MemoryAnnotationStore::default());
        let host = HostServices::new(workspace.clone(), store.clone());
        Self {
            registry: SessionRegistry::new(config, host, factory),
            servers,
            counters,
            workspace,
            store,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(project_root(), "java")
    }
}

/// Workspace of files under [`project_root`], each with an optional open buffer.
#[derive(Default)]
pub struct MemoryWorkspace {
    files: Mutex<HashMap<String, Option<String>>>,
}

impl MemoryWorkspace {
    pub fn add_file(&self, relative: &str, buffer: Option<&str>) {
        self.files
            .lock()
            .unwrap()
            .insert(relative.to_string(), buffer.map(String::from));
    }
}

impl Workspace for MemoryWorkspace {
    fn project(&self, root: &Path) -> Resource {
        Resource::project(root)
    }

    fn resolve(&self, uri: &str) -> Option<Resource> {
        let path = file_uri_to_path(uri)?;
        let relative = path.strip_prefix(project_root()).ok()?.to_str()?.replace('\\', "/");
        if !self.files.lock().unwrap().contains_key(&relative) {
            return None;
        }
        Some(Resource::new(ResourceKind::File, path, relative))
    }

    fn text_buffer(&self, resource: &Resource) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(resource.project_relative_path())
            .cloned()
            .flatten()
    }
}

#[derive(Default)]
pub struct MemoryAnnotationStore {
    next_id: AtomicU64,
    markers: Mutex<BTreeMap<MarkerId, Marker>>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryAnnotationStore {
    pub fn markers(&self) -> Vec<Marker> {
        self.markers.lock().unwrap().values().cloned().collect()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn find_markers(
        &self,
        resource: &Resource,
        _marker_type: &str,
        _recursive: bool,
    ) -> Result<Vec<Marker>, AnnotationError> {
        Ok(self
            .markers
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.resource_path == resource.project_relative_path())
            .cloned()
            .collect())
    }

    fn create_marker(
        &self,
        resource: &Resource,
        _marker_type: &str,
    ) -> Result<MarkerId, AnnotationError> {
        let id = MarkerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.markers.lock().unwrap().insert(
            id,
            Marker {
                id,
                resource_path: resource.project_relative_path().to_string(),
                message: None,
                severity: None,
                char_start: None,
                char_end: None,
                line_number: None,
            },
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn set_attribute(
        &self,
        id: MarkerId,
        attribute: MarkerAttribute,
    ) -> Result<(), AnnotationError> {
        let mut markers = self.markers.lock().unwrap();
        let marker = markers
            .get_mut(&id)
            .ok_or_else(|| AnnotationError::new("unknown marker"))?;
        match attribute {
            MarkerAttribute::Message(message) => marker.message = Some(message),
            MarkerAttribute::Severity(severity) => marker.severity = Some(severity),
            MarkerAttribute::CharStart(start) => marker.char_start = Some(start),
            MarkerAttribute::CharEnd(end) => marker.char_end = Some(end),
            MarkerAttribute::LineNumber(line) => marker.line_number = Some(line),
        }
        Ok(())
    }

    fn delete_marker(&self, id: MarkerId) -> Result<(), AnnotationError> {
        self.markers
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| AnnotationError::new("unknown marker"))?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An editor buffer that fires the two-phase listener protocol on each edit.
pub struct MemoryDocument {
    text: Mutex<String>,
    listeners: Mutex<Vec<Arc<dyn DocumentListener>>>,
}

impl MemoryDocument {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Mutex::new(text.to_string()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn edit(&self, text: &str) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in &listeners {
            listener.about_to_change();
        }
        *self.text.lock().unwrap() = text.to_string();
        for listener in &listeners {
            listener.changed(text);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl EditorDocument for MemoryDocument {
    fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }

    fn add_listener(&self, listener: Arc<dyn DocumentListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn DocumentListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}
