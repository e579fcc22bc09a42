//! Per-document change tracking.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::host::DocumentListener;
use crate::protocol::{
    DidChangeTextDocumentParams, TextDocumentContentChangeEvent, VersionedTextDocumentIdentifier,
};
use crate::session::Notifier;

/// Version of the first change notification; the open notification used 1.
pub const FIRST_CHANGE_VERSION: i32 = 2;

struct TrackerState {
    version: i32,
    pending: Option<DidChangeTextDocumentParams>,
}

/// Turns the edits of one open document into `textDocument/didChange`
/// notifications with strictly increasing versions.
///
/// Every edit arrives in two phases: [`before_change`](Self::before_change)
/// prepares the notification with the current version, and
/// [`after_change`](Self::after_change) fills in the full new text and sends
/// it. The whole document is resent on each edit.
pub struct DocumentSyncTracker {
    uri: String,
    notifier: Notifier,
    state: Mutex<TrackerState>,
}

impl DocumentSyncTracker {
    pub fn new(uri: impl Into<String>, notifier: Notifier) -> Self {
        Self {
            uri: uri.into(),
            notifier,
            state: Mutex::new(TrackerState {
                version: FIRST_CHANGE_VERSION,
                pending: None,
            }),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Version the next change notification will carry.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.lock_state().version
    }

    pub fn before_change(&self) {
        let mut state = self.lock_state();
        state.pending = Some(DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: self.uri.clone(),
                version: state.version,
            },
            content_changes: vec![TextDocumentContentChangeEvent::default()],
        });
    }

    /// Send the prepared notification carrying `text`.
    ///
    /// # Panics
    ///
    /// Panics if no [`before_change`](Self::before_change) preceded this call.
    pub fn after_change(&self, text: &str) {
        let mut state = self.lock_state();
        let mut params = state
            .pending
            .take()
            .expect("after_change called without a preceding before_change");
        if let Some(change) = params.content_changes.first_mut() {
            change.text = text.to_string();
        }
        if let Err(e) = self.notifier.did_change(&params) {
            tracing::warn!(uri = %self.uri, version = state.version, "Failed to send didChange: {e}");
        }
        state.version += 1;
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentListener for DocumentSyncTracker {
    fn about_to_change(&self) {
        self.before_change();
    }

    fn changed(&self, text: &str) {
        self.after_change(text);
    }
}
