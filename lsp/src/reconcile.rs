//! Reconciliation of published diagnostics against the annotation store.
//!
//! Each publish event replaces the server's view of one resource. Existing
//! markers that still correspond to a published diagnostic are kept, new
//! diagnostics get markers, and whatever is left over is deleted. Running the
//! same batch twice leaves the store unchanged.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsbridge_types::{Diagnostic, MarkerSeverity, document_offset};

use crate::host::{AnnotationStore, Marker, MarkerAttribute, MarkerId, Resource, Workspace};
use crate::protocol::PublishedDiagnostics;

/// Identity of a diagnostic annotation: owning resource, one-based document
/// span, and message.
///
/// The span is `None` for a range that does not fit the document; such
/// markers are stored without offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MarkerKey {
    resource_path: String,
    span: Option<(usize, usize)>,
    message: String,
}

impl MarkerKey {
    /// Key of a stored marker. Stored offsets are zero-based; a marker with
    /// only one of them has no key.
    fn of_marker(marker: &Marker) -> Option<Self> {
        let span = match (marker.char_start, marker.char_end) {
            (Some(start), Some(end)) => Some((start + 1, end + 1)),
            (None, None) => None,
            _ => return None,
        };
        Some(Self {
            resource_path: marker.resource_path.clone(),
            span,
            message: marker.message.clone()?,
        })
    }

    fn of_diagnostic(diagnostic: &Diagnostic, text: &str) -> Option<Self> {
        Some(Self {
            resource_path: diagnostic.source()?.to_string(),
            span: document_span(diagnostic, text),
            message: diagnostic.message().to_string(),
        })
    }
}

/// One-based start and end offsets, or `None` unless both resolve.
fn document_span(diagnostic: &Diagnostic, text: &str) -> Option<(usize, usize)> {
    let range = diagnostic.range();
    Some((
        document_offset(text, range.start)?,
        document_offset(text, range.end)?,
    ))
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kept: usize,
    pub created: usize,
    pub deleted: usize,
    /// Store operations that failed and were skipped.
    pub failures: usize,
}

pub struct DiagnosticsReconciler {
    project: PathBuf,
    marker_type: String,
    workspace: Arc<dyn Workspace>,
    annotations: Arc<dyn AnnotationStore>,
}

impl DiagnosticsReconciler {
    pub fn new(
        project: impl Into<PathBuf>,
        marker_type: impl Into<String>,
        workspace: Arc<dyn Workspace>,
        annotations: Arc<dyn AnnotationStore>,
    ) -> Self {
        Self {
            project: project.into(),
            marker_type: marker_type.into(),
            workspace,
            annotations,
        }
    }

    #[must_use]
    pub fn project(&self) -> &Path {
        &self.project
    }

    /// Bring the markers of the published resource in line with `published`.
    ///
    /// Store failures are logged and counted; they never abort the pass.
    pub fn reconcile(&self, published: &PublishedDiagnostics) -> ReconcileReport {
        let resource = self
            .workspace
            .resolve(&published.uri)
            .unwrap_or_else(|| {
                tracing::debug!(uri = %published.uri, "Unresolved diagnostics URI, using project");
                self.workspace.project(&self.project)
            });
        let text = self.workspace.text_buffer(&resource);
        let mut report = ReconcileReport::default();

        let existing = match self
            .annotations
            .find_markers(&resource, &self.marker_type, false)
        {
            Ok(markers) => markers,
            Err(e) => {
                tracing::warn!(uri = %published.uri, "Failed to list markers: {e}");
                report.failures += 1;
                Vec::new()
            }
        };

        let mut remaining: BTreeSet<MarkerId> = existing.iter().map(|m| m.id).collect();
        let mut index: HashMap<MarkerKey, Vec<MarkerId>> = HashMap::new();
        for marker in &existing {
            if let Some(key) = MarkerKey::of_marker(marker) {
                index.entry(key).or_default().push(marker.id);
            }
        }

        for diagnostic in &published.diagnostics {
            let matched = text
                .as_deref()
                .and_then(|text| MarkerKey::of_diagnostic(diagnostic, text))
                .and_then(|key| index.get_mut(&key))
                .and_then(|ids| {
                    let position = ids.iter().position(|id| remaining.contains(id))?;
                    Some(ids.swap_remove(position))
                });

            if let Some(id) = matched {
                remaining.remove(&id);
                report.kept += 1;
                continue;
            }

            match self.create_marker(&resource, diagnostic, text.as_deref()) {
                Ok(_) => report.created += 1,
                Err(e) => {
                    tracing::warn!(
                        uri = %published.uri,
                        diagnostic = %diagnostic.display(),
                        "Failed to create marker: {e}"
                    );
                    report.failures += 1;
                }
            }
        }

        for id in remaining {
            match self.annotations.delete_marker(id) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(uri = %published.uri, marker = id.0, "Failed to delete marker: {e}");
                    report.failures += 1;
                }
            }
        }

        tracing::debug!(
            uri = %published.uri,
            kept = report.kept,
            created = report.created,
            deleted = report.deleted,
            "Reconciled diagnostics"
        );
        report
    }

    fn create_marker(
        &self,
        resource: &Resource,
        diagnostic: &Diagnostic,
        text: Option<&str>,
    ) -> Result<MarkerId, crate::host::AnnotationError> {
        let id = self.annotations.create_marker(resource, &self.marker_type)?;
        self.annotations
            .set_attribute(id, MarkerAttribute::Message(diagnostic.message().to_string()))?;
        self.annotations.set_attribute(
            id,
            MarkerAttribute::Severity(MarkerSeverity::from(diagnostic.severity())),
        )?;

        if resource.is_file() {
            if let Some((start, end)) = text.and_then(|text| document_span(diagnostic, text)) {
                self.annotations
                    .set_attribute(id, MarkerAttribute::CharStart(start - 1))?;
                self.annotations
                    .set_attribute(id, MarkerAttribute::CharEnd(end - 1))?;
            }
            self.annotations.set_attribute(
                id,
                MarkerAttribute::LineNumber(diagnostic.range().start.line),
            )?;
        }
        Ok(id)
    }
}
