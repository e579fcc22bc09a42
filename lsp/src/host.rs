//! Editor-side collaborators: documents, workspace resources, annotation store.
//!
//! The runtime never touches editor internals directly. Hosts implement these
//! traits; the wrapper and reconciler only call through them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsbridge_types::MarkerSeverity;

use crate::protocol::{self, PathToUriError};

/// A file being connected, identified by its absolute location on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    location: PathBuf,
}

impl SourceFile {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    /// Stable identity of the file; keys the connected-document registry.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn uri(&self) -> Result<url::Url, PathToUriError> {
        protocol::path_to_file_uri(&self.location)
    }

    /// Language identifier sent on open: the file extension, or empty.
    #[must_use]
    pub fn language_id(&self) -> String {
        self.location
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// Receives the two phases of every edit on a document.
pub trait DocumentListener: Send + Sync {
    /// Called before the edit is applied.
    fn about_to_change(&self);
    /// Called after the edit, with the full new text.
    fn changed(&self, text: &str);
}

/// A live editor buffer.
pub trait EditorDocument: Send + Sync {
    fn text(&self) -> String;
    fn add_listener(&self, listener: Arc<dyn DocumentListener>);
    /// Removes a listener previously added; identity is the `Arc` allocation.
    fn remove_listener(&self, listener: &Arc<dyn DocumentListener>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    File,
    Folder,
    Project,
}

/// A workspace resource that annotations can be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    kind: ResourceKind,
    full_path: PathBuf,
    project_relative_path: String,
}

impl Resource {
    pub fn new(
        kind: ResourceKind,
        full_path: impl Into<PathBuf>,
        project_relative_path: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            full_path: full_path.into(),
            project_relative_path: project_relative_path.into(),
        }
    }

    /// The project itself; its relative path is empty.
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(ResourceKind::Project, root, String::new())
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == ResourceKind::File
    }

    #[must_use]
    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    #[must_use]
    pub fn project_relative_path(&self) -> &str {
        &self.project_relative_path
    }
}

/// Resolution of protocol URIs to resources, and access to live text buffers.
pub trait Workspace: Send + Sync {
    /// The resource standing for the project rooted at `root`.
    fn project(&self, root: &Path) -> Resource;
    /// Resolve a document URI to an existing resource.
    fn resolve(&self, uri: &str) -> Option<Resource>;
    /// Text of the live buffer for `resource`, if the editor has one open.
    fn text_buffer(&self, resource: &Resource) -> Option<String>;
}

/// Handle to a marker in the annotation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerAttribute {
    Message(String),
    Severity(MarkerSeverity),
    /// Zero-based character offset of the first annotated character.
    CharStart(usize),
    /// Zero-based character offset one past the annotated range.
    CharEnd(usize),
    LineNumber(u32),
}

/// Snapshot of an existing marker as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub id: MarkerId,
    /// Project-relative path of the resource that owns the marker.
    pub resource_path: String,
    pub message: Option<String>,
    pub severity: Option<MarkerSeverity>,
    pub char_start: Option<usize>,
    pub char_end: Option<usize>,
    pub line_number: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
#[error("annotation store: {message}")]
pub struct AnnotationError {
    message: String,
}

impl AnnotationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The editor's problem-annotation store.
pub trait AnnotationStore: Send + Sync {
    /// Markers of `marker_type` on `resource`. Non-recursive lookups cover the
    /// resource and its direct children only.
    fn find_markers(
        &self,
        resource: &Resource,
        marker_type: &str,
        recursive: bool,
    ) -> Result<Vec<Marker>, AnnotationError>;

    fn create_marker(
        &self,
        resource: &Resource,
        marker_type: &str,
    ) -> Result<MarkerId, AnnotationError>;

    fn set_attribute(&self, id: MarkerId, attribute: MarkerAttribute)
    -> Result<(), AnnotationError>;

    fn delete_marker(&self, id: MarkerId) -> Result<(), AnnotationError>;
}

/// The host services every wrapper needs, shared across sessions.
#[derive(Clone)]
pub struct HostServices {
    pub workspace: Arc<dyn Workspace>,
    pub annotations: Arc<dyn AnnotationStore>,
}

impl HostServices {
    pub fn new(workspace: Arc<dyn Workspace>, annotations: Arc<dyn AnnotationStore>) -> Self {
        Self {
            workspace,
            annotations,
        }
    }
}
