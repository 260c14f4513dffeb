//! Content editing, process markers and per-node signals.

use std::sync::Arc;
use std::time::Duration;

use stories_explorer::{
    Database, DocumentContent, Explorer, ExplorerConfig, MemoryBackend, NodeSignal,
    OperationKind, Process, ProcessKind,
};

fn database() -> Database {
    let mut db = Database::default();
    db.create_story("s1", "Story");
    db.add_document("s1", "root-s1", "a", "A");
    db.contents.insert(
        "a".to_string(),
        DocumentContent {
            html: "<p>hello</p>".to_string(),
            ..Default::default()
        },
    );
    db
}

async fn open(backend: &Arc<MemoryBackend>) -> Explorer {
    let explorer = Explorer::open("s1", backend.clone(), ExplorerConfig::default())
        .await
        .unwrap();
    explorer.expand("root-s1").await.unwrap();
    explorer
}

fn html(value: &str) -> DocumentContent {
    DocumentContent {
        html: value.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_content_is_loaded_once() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;

    let first = explorer.load_content("a").await?;
    let second = explorer.load_content("a").await?;

    assert_eq!(first.html, "<p>hello</p>");
    assert_eq!(first, second);
    assert_eq!(backend.calls_of(OperationKind::GetContent), vec!["a"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_edits_are_debounced() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;

    for value in ["v1", "v2", "v3"] {
        explorer.content_changed("a", html(value))?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(backend.calls_of(OperationKind::UpdateContent).is_empty());

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(backend.calls_of(OperationKind::UpdateContent), vec!["a"]);
    assert_eq!(backend.snapshot().contents["a"].html, "v3");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_save_signals_and_process() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    let mut subscription = explorer.subscribe_node("a")?;

    explorer.content_changed("a", html("draft"))?;
    explorer.save_content("a").await?;

    let mut signals = Vec::new();
    while let Ok(signal) = subscription.signals.try_recv() {
        signals.push(signal);
    }
    let saving = Process {
        id: "content-saving-1".to_string(),
        kind: ProcessKind::ContentSaving,
    };
    assert_eq!(
        signals,
        vec![
            NodeSignal::ContentChanged,
            NodeSignal::ProcessAdded { process: saving },
            NodeSignal::ContentSaving,
            NodeSignal::ProcessRemoved {
                id: "content-saving-1".to_string()
            },
            NodeSignal::ContentSaved,
        ]
    );
    assert!(explorer.processes("a").is_empty());

    // the pending debounced save finds nothing new to write
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.calls_of(OperationKind::UpdateContent).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_save_clears_process() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    let mut subscription = explorer.subscribe_node("a")?;
    backend.fail_next(OperationKind::UpdateContent);

    explorer.content_changed("a", html("draft"))?;
    assert!(explorer.save_content("a").await.is_err());

    assert!(explorer.processes("a").is_empty());
    let mut saved = false;
    while let Ok(signal) = subscription.signals.try_recv() {
        saved |= signal == NodeSignal::ContentSaved;
    }
    assert!(!saved);

    // unsaved edits are still written on the next attempt
    explorer.save_content("a").await?;
    assert_eq!(backend.snapshot().contents["a"].html, "draft");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_renaming_process_spans_round_trip() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()).with_latency(Duration::from_millis(50)));
    let explorer = open(&backend).await;

    let task = tokio::spawn({
        let explorer = explorer.clone();
        async move { explorer.rename("a", "Renamed").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(explorer.processes("a").contains_kind(ProcessKind::Renaming));

    task.await??;
    assert!(explorer.processes("a").is_empty());
    assert_eq!(explorer.node("a")?.name, "Renamed");
    Ok(())
}

#[tokio::test]
async fn test_failed_rename_clears_process() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    backend.fail_next(OperationKind::RenameDocument);

    assert!(explorer.rename("a", "Renamed").await.is_err());

    assert!(explorer.processes("a").is_empty());
    assert_eq!(explorer.node("a")?.name, "A");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_children_fetching_process_is_visible() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()).with_latency(Duration::from_millis(50)));
    let explorer = open(&backend).await;

    let task = tokio::spawn({
        let explorer = explorer.clone();
        async move { explorer.expand("a").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // late subscriber: process snapshot, but no past signals
    let mut subscription = explorer.subscribe_node("a")?;
    assert!(subscription
        .processes
        .borrow()
        .contains_kind(ProcessKind::ChildrenFetching));
    assert!(subscription.signals.try_recv().is_err());

    task.await??;
    assert!(explorer.processes("a").is_empty());
    assert_eq!(explorer.children("a")?.map(|c| c.len()), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_request_rename_signal() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    let mut subscription = explorer.subscribe_node("a")?;

    explorer.request_rename("a")?;

    assert_eq!(subscription.signals.recv().await?, NodeSignal::RenameRequested);
    assert!(explorer.request_rename("missing").is_err());
    Ok(())
}

#[tokio::test]
async fn test_signals_end_when_node_is_deleted() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    let mut subscription = explorer.subscribe_node("a")?;

    explorer.delete("a").await?;

    assert!(subscription.signals.recv().await.is_err());
    assert!(explorer.load_content("a").await.is_err());
    Ok(())
}
