use lsbridge_lsp::{MarkerSeverity, SourceFile};
use serde_json::json;

use crate::common::{
    FakeServer, Harness, MemoryDocument, accept_and_initialize, file_uri, project_root,
};

// Line 1 starts at character index 21.
const FOO_JAVA: &str = "0123456789abcdefghij\nint x = 1;\n";

fn diagnostic(line: u32, start: u32, end: u32, severity: u8, message: &str) -> serde_json::Value {
    json!({
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        },
        "severity": severity,
        "source": "Foo.java",
        "message": message
    })
}

async fn connected_harness() -> (Harness, FakeServer) {
    let mut h = Harness::new();
    h.workspace.add_file("Foo.java", Some(FOO_JAVA));
    let key = h.key();
    let file = SourceFile::new(project_root().join("Foo.java"));
    let doc = MemoryDocument::new(FOO_JAVA);
    let (result, server) = tokio::join!(
        h.registry.connect(&key, &file, doc),
        accept_and_initialize(&mut h.servers)
    );
    result.unwrap();
    (h, server)
}

async fn publish(server: &mut FakeServer, diagnostics: serde_json::Value) {
    server
        .publish_diagnostics(&file_uri("Foo.java"), diagnostics)
        .await;
    server.round_trip().await;
}

#[tokio::test]
async fn error_severity_becomes_error_marker() {
    let (h, mut server) = connected_harness().await;
    publish(
        &mut server,
        json!([diagnostic(1, 4, 5, 1, "cannot find symbol")]),
    )
    .await;

    let markers = h.store.markers();
    assert_eq!(markers.len(), 1);
    let marker = &markers[0];
    assert_eq!(marker.resource_path, "Foo.java");
    assert_eq!(marker.severity, Some(MarkerSeverity::Error));
    assert_eq!(marker.message.as_deref(), Some("cannot find symbol"));
    assert_eq!(marker.char_start, Some(25));
    assert_eq!(marker.char_end, Some(26));
    assert_eq!(marker.line_number, Some(1));
}

#[tokio::test]
async fn republishing_the_same_batch_changes_nothing() {
    let (h, mut server) = connected_harness().await;
    let batch = json!([
        diagnostic(0, 10, 15, 1, "cannot find symbol"),
        diagnostic(1, 4, 5, 2, "unused variable"),
    ]);

    publish(&mut server, batch.clone()).await;
    let markers = h.store.markers();
    assert_eq!(markers.len(), 2);

    publish(&mut server, batch).await;
    assert_eq!(h.store.markers(), markers);
    assert_eq!(h.store.creates(), 2);
    assert_eq!(h.store.deletes(), 0);
}

#[tokio::test]
async fn only_the_delta_is_applied() {
    let (h, mut server) = connected_harness().await;
    publish(
        &mut server,
        json!([diagnostic(0, 0, 3, 1, "d1"), diagnostic(0, 10, 15, 1, "d2")]),
    )
    .await;
    let d2 = h
        .store
        .markers()
        .into_iter()
        .find(|m| m.message.as_deref() == Some("d2"))
        .unwrap();

    publish(
        &mut server,
        json!([diagnostic(0, 10, 15, 1, "d2"), diagnostic(1, 0, 3, 2, "d3")]),
    )
    .await;

    let markers = h.store.markers();
    assert_eq!(markers.len(), 2);
    assert!(markers.contains(&d2), "d2 must be left untouched");
    assert!(markers.iter().any(|m| m.message.as_deref() == Some("d3")));
    assert!(!markers.iter().any(|m| m.message.as_deref() == Some("d1")));
    assert_eq!(h.store.creates(), 3);
    assert_eq!(h.store.deletes(), 1);
}

#[tokio::test]
async fn stored_offsets_match_shifted_document_offsets() {
    let (h, mut server) = connected_harness().await;
    publish(
        &mut server,
        json!([diagnostic(0, 10, 15, 1, "cannot find symbol")]),
    )
    .await;
    let marker = h.store.markers()[0].clone();
    assert_eq!((marker.char_start, marker.char_end), (Some(10), Some(15)));

    // Document offsets 11 and 16 are the stored 10 and 15 plus one.
    publish(
        &mut server,
        json!([diagnostic(0, 10, 15, 1, "cannot find symbol")]),
    )
    .await;
    assert_eq!(h.store.markers(), [marker]);
    assert_eq!(h.store.creates(), 1);
}

#[tokio::test]
async fn empty_publish_clears_markers() {
    let (h, mut server) = connected_harness().await;
    publish(
        &mut server,
        json!([diagnostic(0, 0, 3, 1, "a"), diagnostic(1, 0, 3, 3, "b")]),
    )
    .await;
    assert_eq!(h.store.markers().len(), 2);

    publish(&mut server, json!([])).await;
    assert!(h.store.markers().is_empty());
}

#[tokio::test]
async fn information_and_hint_become_info_markers() {
    let (h, mut server) = connected_harness().await;
    publish(
        &mut server,
        json!([diagnostic(0, 0, 3, 3, "info"), diagnostic(0, 4, 6, 4, "hint")]),
    )
    .await;
    assert!(
        h.store
            .markers()
            .iter()
            .all(|m| m.severity == Some(MarkerSeverity::Info))
    );
}
