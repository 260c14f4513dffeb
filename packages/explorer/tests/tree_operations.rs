//! End-to-end tree operations against the in-memory backend.
//!
//! Covers the ordering, identity and rollback guarantees of the explorer:
//! - children are fetched once per expansion and sorted client-side
//! - create / rename / delete only touch the tree once confirmed
//! - moves are optimistic and rolled back on failure
//! - operations on one node run in issuance order

use std::sync::Arc;
use std::time::Duration;

use stories_explorer::{
    Database, Destination, DocumentRecord, Explorer, ExplorerConfig, ExplorerError,
    MemoryBackend, NodeAction, NodeKind, OperationKind, RemoteError, StoryRecord, TreeEvent,
};

/// root-s1 -> [a(0), b(1), c(2)], a -> [a1(0)]
fn database() -> Database {
    let mut db = Database::default();
    db.create_story("s1", "Story");
    db.add_document("s1", "root-s1", "a", "A");
    db.add_document("s1", "root-s1", "b", "B");
    db.add_document("s1", "root-s1", "c", "C");
    db.add_document("s1", "a", "a1", "A1");
    db
}

async fn open(backend: &Arc<MemoryBackend>) -> Explorer {
    Explorer::open("s1", backend.clone(), ExplorerConfig::default())
        .await
        .unwrap()
}

fn child_ids(explorer: &Explorer, id: &str) -> Vec<String> {
    explorer
        .children(id)
        .unwrap()
        .expect("children should be resolved")
        .iter()
        .map(|node| node.id.clone())
        .collect()
}

#[tokio::test]
async fn test_expand_fetches_children_once() -> anyhow::Result<()> {
    let mut db = Database::default();
    db.stories.push(StoryRecord {
        story_id: "s1".to_string(),
        title: "Story".to_string(),
        root_document_id: "story-1".to_string(),
    });
    db.documents.push(DocumentRecord {
        document_id: "story-1".to_string(),
        story_id: "s1".to_string(),
        title: "Story".to_string(),
        position: 0.0,
        parent_document_id: Some("s1".to_string()),
    });
    db.add_document("s1", "story-1", "d1", "A");
    db.add_document("s1", "story-1", "d2", "B");

    // the backend lists children in reverse order
    let backend = Arc::new(MemoryBackend::new(db).unordered());
    let explorer = Explorer::open("s1", backend.clone(), ExplorerConfig::default()).await?;
    assert_eq!(explorer.root().id, "story-1");

    let (first, second) = tokio::join!(explorer.expand("story-1"), explorer.expand("story-1"));
    first?;
    second?;
    explorer.expand("story-1").await?;

    // one query to open the story, one for the expansion
    assert_eq!(
        backend.calls_of(OperationKind::QueryChildren),
        vec!["s1", "story-1"]
    );
    assert_eq!(child_ids(&explorer, "story-1"), vec!["d1", "d2"]);
    assert!(explorer.processes("story-1").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_locally_without_requery() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;
    let queries = backend.calls_of(OperationKind::QueryChildren).len();

    let removed = explorer.delete("a").await?;

    assert_eq!(removed, vec!["a"]);
    assert!(!explorer.contains("a"));
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["b", "c"]);
    assert_eq!(backend.calls_of(OperationKind::QueryChildren).len(), queries);
    assert!(backend.document("a1").is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rename_then_delete_ends_deleted() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()).with_latency(Duration::from_millis(20)));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let (renamed, deleted) = tokio::join!(explorer.rename("a", "New"), explorer.delete("a"));
    renamed?;
    deleted?;

    assert!(!explorer.contains("a"));
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["b", "c"]);

    let writes: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|call| !call.operation.is_read())
        .map(|call| call.operation)
        .collect();
    assert_eq!(
        writes,
        vec![OperationKind::RenameDocument, OperationKind::DeleteDocument]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_operation_queued_behind_delete_never_reaches_backend() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()).with_latency(Duration::from_millis(20)));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let (deleted, renamed) = tokio::join!(explorer.delete("a"), explorer.rename("a", "New"));
    deleted?;

    assert_eq!(
        renamed,
        Err(ExplorerError::InvalidNodeReference("a".to_string()))
    );
    assert!(backend.calls_of(OperationKind::RenameDocument).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_selection_falls_back_to_parent() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;
    explorer.expand("a").await?;

    let mut selection = explorer.subscribe_selection();
    explorer.select("a1")?;
    assert_eq!(selection.borrow_and_update().id, "a1");

    explorer.delete("a1").await?;
    assert_eq!(explorer.selected().id, "a");
    assert!(selection.has_changed()?);
    assert_eq!(selection.borrow_and_update().id, "a");

    assert_eq!(explorer.delete("root-s1").await, Err(ExplorerError::RootRemoval));
    Ok(())
}

#[tokio::test]
async fn test_selecting_unknown_node_fails() {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;

    assert_eq!(
        explorer.select("nope"),
        Err(ExplorerError::InvalidNodeReference("nope".to_string()))
    );
    assert_eq!(explorer.selected().id, "root-s1");
}

#[tokio::test]
async fn test_rename_preserves_identity_and_children() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;
    explorer.expand("a").await?;
    let queries = backend.calls_of(OperationKind::QueryChildren).len();

    let mut events = explorer.subscribe_events();
    let renamed = explorer.rename("a", "Chapter 1").await?;

    assert_eq!(renamed.id, "a");
    assert_eq!(renamed.name, "Chapter 1");
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["a", "b", "c"]);
    assert_eq!(child_ids(&explorer, "a"), vec!["a1"]);
    assert_eq!(backend.calls_of(OperationKind::QueryChildren).len(), queries);
    assert_eq!(
        events.recv().await?,
        TreeEvent::NodeReplaced {
            node_id: "a".to_string()
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_rename_root_renames_story() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;

    explorer.rename("root-s1", "Saga").await?;

    let root = explorer.root();
    assert_eq!(root.name, "Saga");
    match &root.kind {
        NodeKind::Story { story, .. } => assert_eq!(story.title, "Saga"),
        other => panic!("expected story root, got {:?}", other),
    }
    assert_eq!(backend.snapshot().story("s1").unwrap().title, "Saga");
    Ok(())
}

#[tokio::test]
async fn test_create_resolves_parent_first() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let mut events = explorer.subscribe_events();
    let page = explorer.create_document("b", "New page").await?;

    let calls: Vec<_> = backend
        .calls()
        .into_iter()
        .skip_while(|call| call.target != "b")
        .map(|call| call.operation)
        .collect();
    assert_eq!(
        calls,
        vec![OperationKind::QueryChildren, OperationKind::CreateDocument]
    );
    assert_eq!(child_ids(&explorer, "b"), vec![page.id.clone()]);
    assert_eq!(page.parent_id.as_deref(), Some("b"));
    assert!(explorer.is_expanded("b"));

    let mut added = false;
    while let Ok(event) = events.try_recv() {
        added |= event
            == TreeEvent::NodeAdded {
                parent_id: "b".to_string(),
                node_id: page.id.clone(),
            };
    }
    assert!(added);
    Ok(())
}

#[tokio::test]
async fn test_new_document_goes_last() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;

    let page = explorer.create_document("root-s1", "D").await?;

    assert_eq!(page.position, 3.0);
    assert_eq!(
        child_ids(&explorer, "root-s1"),
        vec!["a".to_string(), "b".to_string(), "c".to_string(), page.id.clone()]
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_create_leaves_tree_untouched() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;
    backend.fail_next(OperationKind::CreateDocument);

    let error = explorer
        .create_document("root-s1", "Lost")
        .await
        .unwrap_err();

    assert!(error.is_user_facing());
    assert!(matches!(
        error,
        ExplorerError::RemoteOperationFailed {
            operation: OperationKind::CreateDocument,
            ref node_id,
            source: RemoteError::Server { status: 500, .. },
        } if node_id == "root-s1"
    ));
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn test_fetch_failure_is_recovered() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    backend.fail_next(OperationKind::QueryChildren);

    let result = explorer.expand("root-s1").await;

    assert!(matches!(
        result,
        Err(ExplorerError::RemoteOperationFailed {
            operation: OperationKind::QueryChildren,
            ..
        })
    ));
    assert!(explorer.processes("root-s1").is_empty());
    assert!(!explorer.is_expanded("root-s1"));
    assert!(explorer.children("root-s1")?.is_none());

    explorer.expand("root-s1").await?;
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn test_paged_children_are_all_loaded() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let config = ExplorerConfig {
        page_size: Some(2),
        ..Default::default()
    };
    let explorer = Explorer::open("s1", backend.clone(), config).await?;

    explorer.expand("root-s1").await?;

    assert_eq!(child_ids(&explorer, "root-s1"), vec!["a", "b", "c"]);
    assert_eq!(
        backend.calls_of(OperationKind::QueryChildren),
        vec!["s1", "root-s1", "root-s1", "root-s1"]
    );
    assert!(explorer.validate().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_fetch_is_not_retried_by_waiters() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    backend.fail_next(OperationKind::QueryChildren);

    let (expanded, created) = tokio::join!(
        explorer.expand("root-s1"),
        explorer.create_document("root-s1", "New")
    );

    for result in [expanded.map(|_| ()), created.map(|_| ())] {
        assert!(matches!(
            result,
            Err(ExplorerError::RemoteOperationFailed {
                operation: OperationKind::QueryChildren,
                ..
            })
        ));
    }
    assert_eq!(
        backend.calls_of(OperationKind::QueryChildren),
        vec!["s1", "root-s1"]
    );
    assert!(backend.calls_of(OperationKind::CreateDocument).is_empty());
    assert!(explorer.children("root-s1")?.is_none());
    assert!(explorer.processes("root-s1").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_move_is_persisted() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let moved = explorer.move_node("c", Destination::above("a")).await?;

    assert!(moved.changed);
    assert_eq!(moved.position, -1.0);
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["c", "a", "b"]);
    assert_eq!(backend.document("c").unwrap().position, -1.0);
    assert_eq!(explorer.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_move_onto_unloaded_node_reparents() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let moved = explorer.move_node("c", Destination::onto("a")).await?;

    assert_eq!(moved.parent_id, "a");
    assert_eq!(child_ids(&explorer, "a"), vec!["a1", "c"]);
    assert_eq!(
        backend.document("c").unwrap().parent_document_id.as_deref(),
        Some("a")
    );
    assert!(explorer.validate().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_refused_move_is_rolled_back() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;
    explorer.expand("a").await?;
    backend.fail_next(OperationKind::MoveDocument);

    let mut events = explorer.subscribe_events();
    let result = explorer.move_node("c", Destination::below("a1")).await;

    assert!(matches!(
        result,
        Err(ExplorerError::RemoteOperationFailed {
            operation: OperationKind::MoveDocument,
            ..
        })
    ));
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["a", "b", "c"]);
    assert_eq!(child_ids(&explorer, "a"), vec!["a1"]);
    assert_eq!(explorer.node("c")?.position, 2.0);
    assert_eq!(explorer.pending_count(), 0);
    assert!(explorer.validate().is_empty());

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event);
    }
    assert!(matches!(kinds.first(), Some(TreeEvent::NodeMoved { .. })));
    assert_eq!(
        kinds.last(),
        Some(&TreeEvent::MoveRolledBack {
            node_id: "c".to_string()
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_move_into_descendant_is_rejected() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;
    explorer.expand("a").await?;

    let result = explorer.move_node("a", Destination::onto("a1")).await;

    assert_eq!(result, Err(ExplorerError::CycleDetected("a".to_string())));
    assert!(backend.calls_of(OperationKind::MoveDocument).is_empty());
    assert_eq!(explorer.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_root_cannot_move() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let result = explorer.move_node("root-s1", Destination::below("a")).await;
    assert_eq!(result, Err(ExplorerError::RootRemoval));
    Ok(())
}

/// root-s1 -> [x(1.0), y(next float after 1.0), z(5.0)]: no room between x and y
fn crowded_database() -> Database {
    let lower = 1.0_f64;
    let upper = f64::from_bits(lower.to_bits() + 1);

    let mut db = Database::default();
    db.create_story("s1", "Story");
    for (id, position) in [("x", lower), ("y", upper), ("z", 5.0)] {
        db.add_document("s1", "root-s1", id, id);
        if let Some(doc) = db.documents.iter_mut().find(|d| d.document_id == id) {
            doc.position = position;
        }
    }
    db
}

fn persisted_order(backend: &MemoryBackend, parent_id: &str) -> Vec<String> {
    backend
        .snapshot()
        .children(parent_id, Default::default())
        .into_iter()
        .map(|d| d.document_id)
        .collect()
}

#[tokio::test]
async fn test_renumbered_siblings_are_persisted() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(crowded_database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let moved = explorer.move_node("z", Destination::below("x")).await?;

    assert_eq!(moved.renumbered.len(), 2);
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["x", "z", "y"]);
    // siblings first, the moved node last
    assert_eq!(
        backend.calls_of(OperationKind::MoveDocument),
        vec!["x", "y", "z"]
    );
    assert_eq!(persisted_order(&backend, "root-s1"), vec!["x", "z", "y"]);
    Ok(())
}

#[tokio::test]
async fn test_refused_renumbering_restores_both_sides() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(crowded_database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;
    backend.fail_nth(OperationKind::MoveDocument, 2);

    let result = explorer.move_node("z", Destination::below("x")).await;

    assert!(matches!(
        result,
        Err(ExplorerError::RemoteOperationFailed {
            operation: OperationKind::MoveDocument,
            ..
        })
    ));
    // x was saved, y refused, then x put back
    assert_eq!(
        backend.calls_of(OperationKind::MoveDocument),
        vec!["x", "y", "x"]
    );
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["x", "y", "z"]);
    assert_eq!(persisted_order(&backend, "root-s1"), vec!["x", "y", "z"]);
    for id in ["x", "y", "z"] {
        let remote = backend.document(id).map(|d| d.position);
        assert_eq!(Some(explorer.node(id)?.position), remote, "position of {}", id);
    }
    assert_eq!(explorer.pending_count(), 0);
    assert!(explorer.validate().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_renumbering_waits_for_sibling_delete() -> anyhow::Result<()> {
    let backend = Arc::new(
        MemoryBackend::new(crowded_database()).with_latency(Duration::from_millis(20)),
    );
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    let (deleted, moved) = tokio::join!(
        explorer.delete("y"),
        explorer.move_node("z", Destination::below("x"))
    );
    deleted?;
    let moved = moved?;

    assert_eq!(moved.renumbered.len(), 2);
    // y was gone by the time the renumbering reached it
    assert_eq!(backend.calls_of(OperationKind::MoveDocument), vec!["x", "z"]);
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["x", "z"]);
    assert_eq!(persisted_order(&backend, "root-s1"), vec!["x", "z"]);
    assert!(explorer.validate().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invariants_hold_after_mixed_operations() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;

    explorer.expand_all("root-s1").await?;
    assert!(explorer.contains("a1"));

    let page = explorer.create_document("a1", "Deep").await?;
    explorer.move_node("b", Destination::onto(page.id.as_str())).await?;
    explorer.move_node("c", Destination::above("a")).await?;
    explorer.rename("a", "Renamed").await?;
    explorer.delete("a1").await?;

    assert!(!explorer.contains(&page.id));
    assert!(!explorer.contains("b"));
    assert_eq!(child_ids(&explorer, "root-s1"), vec!["c", "a"]);
    assert!(explorer.validate().is_empty(), "{:?}", explorer.validate());
    println!("✓ tree consistent after mixed operations");
    Ok(())
}

#[tokio::test]
async fn test_open_unknown_story() {
    let backend = Arc::new(MemoryBackend::new(database()));

    let result = Explorer::open("missing", backend, ExplorerConfig::default()).await;

    assert!(matches!(
        result,
        Err(ExplorerError::RemoteOperationFailed {
            operation: OperationKind::GetStory,
            source: RemoteError::NotFound(_),
            ..
        })
    ));
}

#[tokio::test]
async fn test_context_actions() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new(database()));
    let explorer = open(&backend).await;
    explorer.expand("root-s1").await?;

    assert_eq!(
        explorer.actions("root-s1")?,
        vec![NodeAction::NewPage, NodeAction::RenameStory]
    );
    assert!(explorer.actions("a")?.contains(&NodeAction::DeleteDocument));
    Ok(())
}
