//! # Explorer
//!
//! Drives the [`TreeState`] from user intents: it sequences the backend calls,
//! applies confirmed results through the mutation reducer and keeps the
//! process markers in sync on both success and failure paths.
//!
//! The tree sits behind a synchronous mutex that is never held across an
//! await point, so each tree update is atomic. Operations on the same node run
//! one after another in issuance order (see [`NodeQueues`]); operations on
//! different nodes interleave freely.
//!
//! ## Policies
//!
//! - create, rename, delete: the backend confirms first, then the tree changes
//! - move: applied optimistically, rolled back if the backend refuses it
//! - inserting under a node whose children are not loaded yet resolves them first

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch, OwnedMutexGuard};

use crate::config::ExplorerConfig;
use crate::errors::{ExplorerError, ExplorerResult};
use crate::mutations::{Mutation, MutationOutcome};
use crate::node::{Node, NodeAction, NodeId};
use crate::pending::{NodeQueues, PendingLedger};
use crate::process::{ProcessKind, ProcessList};
use crate::signals::{NodeSignal, NodeSubscription};
use crate::sync::{DocumentContent, DocumentRecord, RemoteSync, StoryRecord, SyncAdapter};
use crate::tree::{Destination, MoveOutcome, TreeEvent, TreeState};

#[derive(Debug, Clone, Default)]
struct ContentEntry {
    content: DocumentContent,
    /// Bumped on every edit
    generation: u64,
    /// Generation last persisted
    saved: u64,
}

struct Inner {
    tree: Mutex<TreeState>,
    sync: SyncAdapter,
    queues: NodeQueues,
    pending: Mutex<PendingLedger>,
    contents: Mutex<HashMap<NodeId, ContentEntry>>,
    /// Last failed children fetch per node, handed to callers that waited on it
    fetch_errors: Mutex<HashMap<NodeId, ExplorerError>>,
    config: ExplorerConfig,
}

/// Cloneable handle on one story's explorer
#[derive(Clone)]
pub struct Explorer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Explorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Explorer")
            .field("story_id", &self.inner.sync.story_id())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Explorer {
    pub fn new(
        story: StoryRecord,
        root_document: DocumentRecord,
        remote: Arc<dyn RemoteSync>,
        config: ExplorerConfig,
    ) -> Self {
        let sync = SyncAdapter::new(story.story_id.clone(), remote).with_page_size(config.page_size);
        let tree = TreeState::new(story, root_document, &config);

        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(tree),
                sync,
                queues: NodeQueues::new(),
                pending: Mutex::new(PendingLedger::new()),
                contents: Mutex::new(HashMap::new()),
                fetch_errors: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Loads the story and its root document from the backend
    pub async fn open(
        story_id: &str,
        remote: Arc<dyn RemoteSync>,
        config: ExplorerConfig,
    ) -> ExplorerResult<Self> {
        let sync = SyncAdapter::new(story_id, remote.clone());
        let story = sync.get_story().await?;
        let root_document = sync.get_root_document(&story).await?;
        tracing::info!(story_id, root = %root_document.document_id, "story opened");
        Ok(Self::new(story, root_document, remote, config))
    }

    pub fn story_id(&self) -> &str {
        self.inner.sync.story_id()
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.inner.config
    }

    // ---- reads & subscriptions ----

    pub fn root(&self) -> Arc<Node> {
        self.tree().root()
    }

    pub fn node(&self, id: &str) -> ExplorerResult<Arc<Node>> {
        self.tree().node(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tree().contains(id)
    }

    /// Resolved children, `None` while not loaded
    pub fn children(&self, id: &str) -> ExplorerResult<Option<Vec<Arc<Node>>>> {
        self.tree().children(id)
    }

    pub fn selected(&self) -> Arc<Node> {
        self.tree().selected()
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.tree().is_expanded(id)
    }

    pub fn processes(&self, id: &str) -> ProcessList {
        self.tree().processes(id)
    }

    pub fn actions(&self, id: &str) -> ExplorerResult<Vec<NodeAction>> {
        let node = self.node(id)?;
        Ok(NodeAction::available_for(&node))
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<Arc<Node>> {
        self.tree().subscribe_selection()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TreeEvent> {
        self.tree().subscribe_events()
    }

    pub fn subscribe_node(&self, id: &str) -> ExplorerResult<NodeSubscription> {
        self.tree().subscribe_node(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().pending_count()
    }

    /// Broken tree invariants, empty when consistent
    pub fn validate(&self) -> Vec<String> {
        self.tree().validate()
    }

    // ---- selection & expansion ----

    pub fn select(&self, id: &str) -> ExplorerResult<()> {
        self.tree().select_node(id)
    }

    pub fn collapse(&self, id: &str) -> ExplorerResult<()> {
        self.tree().collapse(id)
    }

    /// Expands a node, fetching its children unless loaded or already in flight
    pub async fn expand(&self, id: &str) -> ExplorerResult<()> {
        let must_fetch = self.tree().expand(id)?;
        if must_fetch {
            self.fetch_children(id).await?;
        }
        Ok(())
    }

    /// Expands a node and every loaded descendant, fetching as needed
    pub async fn expand_all(&self, id: &str) -> ExplorerResult<()> {
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            self.expand(&current).await?;
            self.ensure_resolved(&current).await?;
            if let Some(children) = self.children(&current)? {
                stack.extend(children.iter().rev().map(|child| child.id.clone()));
            }
        }
        Ok(())
    }

    /// Runs the children query of a node already marked as fetching
    async fn fetch_children(&self, id: &str) -> ExplorerResult<Vec<NodeId>> {
        let result = self.inner.sync.query_children(id).await;
        match result {
            Ok(records) => {
                self.fetch_errors().remove(id);
                self.tree().resolve_children(id, records)
            }
            Err(e) => {
                self.fetch_errors().insert(id.to_string(), e.clone());
                self.tree().fail_fetch(id);
                Err(e)
            }
        }
    }

    /// Resolves the children of `id`, waiting for a fetch already in flight.
    ///
    /// A failed fetch is never retried here: if the awaited fetch fails, its
    /// error is returned and the node stays unresolved until re-expanded.
    async fn ensure_resolved(&self, id: &str) -> ExplorerResult<()> {
        let subscription = {
            let mut tree = self.tree();
            let node = tree.node(id)?;
            if node.is_resolved() {
                return Ok(());
            }
            if tree.begin_fetch(id)? {
                None
            } else {
                Some(tree.subscribe_node(id)?)
            }
        };

        let Some(mut subscription) = subscription else {
            return self.fetch_children(id).await.map(|_| ());
        };
        while subscription
            .processes
            .borrow_and_update()
            .contains_kind(ProcessKind::ChildrenFetching)
        {
            if subscription.processes.changed().await.is_err() {
                break;
            }
        }

        if self.node(id)?.is_resolved() {
            return Ok(());
        }
        let error = self.fetch_errors().get(id).cloned();
        Err(error.unwrap_or_else(|| ExplorerError::ParentNotReady(id.to_string())))
    }

    // ---- structural operations ----

    /// Creates a document as last child of `parent_id`
    pub async fn create_document(&self, parent_id: &str, title: &str) -> ExplorerResult<Arc<Node>> {
        let _guard = self.inner.queues.acquire(parent_id).await;
        self.node(parent_id)?;
        self.ensure_resolved(parent_id).await?;

        let record = self.inner.sync.create_document(parent_id, title).await?;
        let document_id = record.document_id.clone();

        let mut tree = self.tree();
        let node = tree
            .apply(Mutation::AddChild {
                parent_id: parent_id.to_string(),
                document: record,
            })?
            .node()
            .ok_or(ExplorerError::InvalidNodeReference(document_id))?;
        tree.expand(parent_id)?;
        Ok(node)
    }

    /// Renames a document, or the story when `id` is the root
    pub async fn rename(&self, id: &str, title: &str) -> ExplorerResult<Arc<Node>> {
        let _guard = self.inner.queues.acquire(id).await;
        let process = self.tree().add_process(id, ProcessKind::Renaming, None)?;

        let result = self.inner.sync.rename_document(id, title).await;

        let mut tree = self.tree();
        tree.remove_process(id, &process);
        let record = result?;
        tree.apply(Mutation::ReplaceDocument {
            node_id: id.to_string(),
            document: record,
        })?
        .node()
        .ok_or_else(|| ExplorerError::InvalidNodeReference(id.to_string()))
    }

    /// Deletes a document and its subtree; returns the removed ids
    pub async fn delete(&self, id: &str) -> ExplorerResult<Vec<NodeId>> {
        let _guard = self.inner.queues.acquire(id).await;
        if self.node(id)?.is_root() {
            return Err(ExplorerError::RootRemoval);
        }

        self.inner.sync.delete_document(id).await?;

        let outcome = self.tree().apply(Mutation::RemoveNode {
            node_id: id.to_string(),
        })?;
        let removed = match outcome {
            MutationOutcome::Removed(removed) => removed,
            _ => vec![id.to_string()],
        };

        let mut contents = self.contents();
        let mut fetch_errors = self.fetch_errors();
        for node_id in &removed {
            self.inner.queues.forget(node_id);
            contents.remove(node_id);
            fetch_errors.remove(node_id);
        }
        Ok(removed)
    }

    /// Moves a node next to or into `destination`.
    ///
    /// The tree reflects the move before the backend answers. When the move
    /// renumbers the destination siblings, their new positions are saved first,
    /// each under its own node queue, then the node itself. If any of these
    /// writes is refused, the previous placement and sibling positions are
    /// restored locally and on the backend, and the error returned.
    pub async fn move_node(&self, id: &str, destination: Destination) -> ExplorerResult<MoveOutcome> {
        let _guard = self.inner.queues.acquire(id).await;
        let parent_id = {
            let tree = self.tree();
            tree.node(id)?;
            tree.resolve_destination(&destination)?.0
        };
        self.ensure_resolved(&parent_id).await?;

        let (mutation_id, outcome) = {
            let mut tree = self.tree();
            let mut pending = self.pending();
            pending.apply_optimistic(
                &mut tree,
                Mutation::MoveNode {
                    node_id: id.to_string(),
                    destination,
                },
            )?
        };
        let MutationOutcome::Moved(moved) = outcome else {
            self.pending().confirm(&mutation_id);
            return Err(ExplorerError::InvalidNodeReference(id.to_string()));
        };
        if !moved.changed {
            self.pending().confirm(&mutation_id);
            return Ok(moved);
        }

        let _sibling_guards = self
            .acquire_all(moved.renumbered.iter().map(|(sibling, _)| sibling))
            .await;
        let mut saved = Vec::new();
        if let Err(e) = self.persist_move(&moved, &mut saved).await {
            {
                let mut tree = self.tree();
                self.pending().reject(&mut tree, &mutation_id);
            }
            tracing::warn!(node_id = id, error = %e, "move refused by backend");
            self.restore_siblings(&moved, &saved).await;
            return Err(e);
        }
        self.pending().confirm(&mutation_id);
        Ok(moved)
    }

    /// Takes the queues of several nodes, in id order
    async fn acquire_all<'a>(&self, ids: impl Iterator<Item = &'a NodeId>) -> Vec<OwnedMutexGuard<()>> {
        let mut ids: Vec<&NodeId> = ids.collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.inner.queues.acquire(id).await);
        }
        guards
    }

    /// Saves the renumbered siblings, then the moved node.
    ///
    /// Siblings deleted meanwhile are skipped; `saved` collects the ones the
    /// backend accepted.
    async fn persist_move(&self, moved: &MoveOutcome, saved: &mut Vec<NodeId>) -> ExplorerResult<()> {
        for (sibling, position) in &moved.renumbered {
            if !self.contains(sibling) {
                tracing::debug!(node_id = %sibling, "renumbered sibling gone, skipped");
                continue;
            }
            self.inner
                .sync
                .move_document(sibling, &moved.parent_id, *position)
                .await?;
            saved.push(sibling.clone());
        }

        self.inner
            .sync
            .move_document(&moved.node_id, &moved.parent_id, moved.position)
            .await
    }

    /// Sends back the previous positions of siblings saved by a refused move
    async fn restore_siblings(&self, moved: &MoveOutcome, saved: &[NodeId]) {
        for (sibling, position) in &moved.undo.siblings {
            if !saved.contains(sibling) {
                continue;
            }
            if let Err(e) = self
                .inner
                .sync
                .move_document(sibling, &moved.parent_id, *position)
                .await
            {
                tracing::error!(node_id = %sibling, error = %e, "could not restore sibling position");
            }
        }
    }

    // ---- signals ----

    /// Opens the inline rename editor of the node's views
    pub fn request_rename(&self, id: &str) -> ExplorerResult<()> {
        self.tree().emit_signal(id, NodeSignal::RenameRequested)
    }

    // ---- content ----

    /// Content of the node's document, fetched once then served from cache
    pub async fn load_content(&self, id: &str) -> ExplorerResult<DocumentContent> {
        self.node(id)?;
        let cached = self.contents().get(id).map(|entry| entry.content.clone());
        if let Some(content) = cached {
            return Ok(content);
        }

        let content = self.inner.sync.get_content(id).await?;
        let mut contents = self.contents();
        let entry = contents.entry(id.to_string()).or_insert_with(|| ContentEntry {
            content: content.clone(),
            ..Default::default()
        });
        Ok(entry.content.clone())
    }

    /// Records an edit and schedules a save once edits stop for the debounce period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn content_changed(&self, id: &str, content: DocumentContent) -> ExplorerResult<()> {
        self.tree().emit_signal(id, NodeSignal::ContentChanged)?;

        let generation = {
            let mut contents = self.contents();
            let entry = contents.entry(id.to_string()).or_default();
            entry.content = content;
            entry.generation += 1;
            entry.generation
        };

        let explorer = self.clone();
        let id = id.to_string();
        let debounce = self.inner.config.save_debounce();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let latest = explorer.contents().get(&id).map(|entry| entry.generation);
            if latest != Some(generation) {
                return;
            }
            if let Err(e) = explorer.save_content(&id).await {
                tracing::warn!(node_id = %id, error = %e, "debounced save failed");
            }
        });
        Ok(())
    }

    /// Persists the edited content now; no-op when nothing changed since the last save
    pub async fn save_content(&self, id: &str) -> ExplorerResult<()> {
        let _guard = self.inner.queues.acquire(id).await;
        self.node(id)?;

        let Some((content, generation)) = self
            .contents()
            .get(id)
            .filter(|entry| entry.generation > entry.saved)
            .map(|entry| (entry.content.clone(), entry.generation))
        else {
            return Ok(());
        };

        let process = {
            let mut tree = self.tree();
            let process = tree.add_process(id, ProcessKind::ContentSaving, None)?;
            tree.emit_signal(id, NodeSignal::ContentSaving)?;
            process
        };

        let result = self.inner.sync.update_content(id, content).await;

        let mut tree = self.tree();
        tree.remove_process(id, &process);
        result?;

        if let Some(entry) = self.contents().get_mut(id) {
            entry.saved = entry.saved.max(generation);
        }
        tracing::debug!(node_id = id, generation, "content saved");
        // the node may have been removed while saving
        let _ = tree.emit_signal(id, NodeSignal::ContentSaved);
        Ok(())
    }

    // ---- internals ----

    fn tree(&self) -> MutexGuard<'_, TreeState> {
        self.inner.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, PendingLedger> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contents(&self) -> MutexGuard<'_, HashMap<NodeId, ContentEntry>> {
        self.inner.contents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fetch_errors(&self) -> MutexGuard<'_, HashMap<NodeId, ExplorerError>> {
        self.inner.fetch_errors.lock().unwrap_or_else(|e| e.into_inner())
    }
}
