//! # Tree State
//!
//! Single owner of the story's node graph: the id-map, the children index
//! (each node's resolved children list), the selection, the expanded set and
//! the per-node signal channels.
//!
//! Every operation here is synchronous. Network round-trips happen outside
//! (see [`Explorer`](crate::Explorer)), which only calls in here once a result
//! is known, so each mutation is atomic from the caller's point of view.
//!
//! ## Invariants
//!
//! - exactly one root; ids are unique across the tree
//! - every node's parent is in the id-map and lists the node among its children
//! - resolved children lists are ordered by ascending position
//! - the selection always refers to a node of the id-map (root at worst)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::config::ExplorerConfig;
use crate::errors::{ExplorerError, ExplorerResult};
use crate::node::{sort_records, Children, Node, NodeId};
use crate::position::{InsertionTarget, PositionAllocator};
use crate::process::{ProcessKind, ProcessList};
use crate::signals::{NodeSignal, NodeSubscription, SignalBus};
use crate::sync::{DocumentRecord, StoryRecord};

/// How a dragged node is dropped relative to the reference node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropDirection {
    /// Sibling right before the reference
    Above,
    /// Sibling right after the reference
    Below,
    /// No direction: last child of the reference
    Onto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub reference_id: NodeId,
    pub direction: DropDirection,
}

impl Destination {
    pub fn above(reference_id: impl Into<NodeId>) -> Self {
        Self {
            reference_id: reference_id.into(),
            direction: DropDirection::Above,
        }
    }

    pub fn below(reference_id: impl Into<NodeId>) -> Self {
        Self {
            reference_id: reference_id.into(),
            direction: DropDirection::Below,
        }
    }

    pub fn onto(reference_id: impl Into<NodeId>) -> Self {
        Self {
            reference_id: reference_id.into(),
            direction: DropDirection::Onto,
        }
    }
}

/// Structural change, published after the tree has been updated
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    /// `visible` is false when nobody is looking at the node anymore
    /// (collapsed and not selected while the fetch was in flight)
    ChildrenResolved { parent_id: NodeId, visible: bool },
    NodeAdded { parent_id: NodeId, node_id: NodeId },
    NodeRemoved {
        parent_id: NodeId,
        node_id: NodeId,
        removed: Vec<NodeId>,
    },
    NodeReplaced { node_id: NodeId },
    NodeMoved {
        node_id: NodeId,
        from_parent: NodeId,
        to_parent: NodeId,
    },
    MoveRolledBack { node_id: NodeId },
}

/// What it takes to put a moved node back where it was
#[derive(Debug, Clone, PartialEq)]
pub struct MoveUndo {
    pub node_id: NodeId,
    pub parent_id: NodeId,
    pub position: f64,
    /// Previous positions of siblings renumbered by the move
    pub siblings: Vec<(NodeId, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub node_id: NodeId,
    pub from_parent: NodeId,
    pub parent_id: NodeId,
    pub position: f64,
    pub renumbered: Vec<(NodeId, f64)>,
    /// False when the drop left the node where it was
    pub changed: bool,
    pub undo: MoveUndo,
}

#[derive(Debug)]
pub struct TreeState {
    story_id: String,
    root_id: NodeId,
    nodes: HashMap<NodeId, Arc<Node>>,
    expanded: HashSet<NodeId>,
    selection: watch::Sender<Arc<Node>>,
    events: broadcast::Sender<TreeEvent>,
    signals: SignalBus,
    allocator: PositionAllocator,
}

impl TreeState {
    /// Tree with only the story root, expanded and selected
    pub fn new(story: StoryRecord, root_document: DocumentRecord, config: &ExplorerConfig) -> Self {
        let story_id = story.story_id.clone();
        let root = Arc::new(Node::story(story, root_document));
        let root_id = root.id.clone();

        let mut signals = SignalBus::new(config.signal_capacity);
        signals.register(&root_id);

        let (selection, _) = watch::channel(root.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);

        Self {
            story_id,
            root_id: root_id.clone(),
            nodes,
            expanded: HashSet::from([root_id]),
            selection,
            events,
            signals,
            allocator: PositionAllocator::new(config.renumber_step),
        }
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> Arc<Node> {
        self.nodes[&self.root_id].clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get(id).cloned()
    }

    pub fn node(&self, id: &str) -> ExplorerResult<Arc<Node>> {
        self.get(id)
            .ok_or_else(|| ExplorerError::InvalidNodeReference(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolved children of `id`, `None` while unresolved
    pub fn children(&self, id: &str) -> ExplorerResult<Option<Vec<Arc<Node>>>> {
        let node = self.node(id)?;
        Ok(node
            .child_ids()
            .map(|ids| ids.iter().filter_map(|child| self.get(child)).collect()))
    }

    /// Ancestors of `id`, closest first
    pub fn ancestors(&self, id: &str) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent_id.clone());
        while let Some(parent_id) = current {
            current = self.get(&parent_id).and_then(|n| n.parent_id.clone());
            ancestors.push(parent_id);
        }
        ancestors
    }

    /// `id` and all its loaded descendants, parents first
    pub fn subtree(&self, id: &str) -> Vec<NodeId> {
        let mut collected = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get(&current) {
                if let Some(ids) = node.child_ids() {
                    stack.extend(ids.iter().rev().cloned());
                }
                collected.push(current);
            }
        }
        collected
    }

    // ---- selection ----

    pub fn selected(&self) -> Arc<Node> {
        self.selection.borrow().clone()
    }

    pub fn select_node(&mut self, id: &str) -> ExplorerResult<()> {
        let node = self.node(id)?;
        tracing::debug!(node_id = id, "select");
        self.selection.send_replace(node);
        Ok(())
    }

    /// New subscribers immediately see the current selection
    pub fn subscribe_selection(&self) -> watch::Receiver<Arc<Node>> {
        self.selection.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_node(&self, id: &str) -> ExplorerResult<NodeSubscription> {
        self.signals
            .subscribe(id)
            .ok_or_else(|| ExplorerError::InvalidNodeReference(id.to_string()))
    }

    // ---- expansion & children resolution ----

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    /// Marks the node expanded; returns true when a children fetch must be issued
    pub fn expand(&mut self, id: &str) -> ExplorerResult<bool> {
        self.node(id)?;
        self.expanded.insert(id.to_string());
        self.begin_fetch(id)
    }

    pub fn collapse(&mut self, id: &str) -> ExplorerResult<()> {
        self.node(id)?;
        self.expanded.remove(id);
        Ok(())
    }

    /// `Unresolved → Fetching`; false if resolved or a fetch is already in flight
    pub fn begin_fetch(&mut self, id: &str) -> ExplorerResult<bool> {
        let node = self.node(id)?;
        if !matches!(node.children, Children::Unresolved) {
            return Ok(false);
        }
        self.put(node.with_children(Children::Fetching));
        let kind = ProcessKind::ChildrenFetching;
        self.signals.add_process(id, kind, Some(kind.default_id()));
        self.signals.emit(id, NodeSignal::ChildrenFetching);
        tracing::debug!(node_id = id, "fetching children");
        Ok(true)
    }

    /// `Fetching → Resolved` with the fetched records, sorted by position
    pub fn resolve_children(
        &mut self,
        parent_id: &str,
        mut records: Vec<DocumentRecord>,
    ) -> ExplorerResult<Vec<NodeId>> {
        let fetching = ProcessKind::ChildrenFetching.default_id();
        self.signals.remove_process(parent_id, fetching);
        let parent = self.node(parent_id)?;

        if let Some(ids) = parent.child_ids() {
            tracing::debug!(node_id = parent_id, "children already resolved, dropping fetch result");
            return Ok(ids.to_vec());
        }

        sort_records(&mut records);
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = record.document_id.clone();
            if self.nodes.contains_key(&id) {
                tracing::warn!(node_id = %id, parent_id, "fetched document already in tree, skipped");
                continue;
            }
            self.signals.register(&id);
            self.nodes
                .insert(id.clone(), Arc::new(Node::document_under(record, parent_id)));
            ids.push(id);
        }

        self.put(parent.with_children(Children::Resolved(ids.clone())));

        let visible = self.is_expanded(parent_id) || self.selected().id == parent_id;
        tracing::debug!(node_id = parent_id, count = ids.len(), visible, "children resolved");
        self.publish(TreeEvent::ChildrenResolved {
            parent_id: parent_id.to_string(),
            visible,
        });
        Ok(ids)
    }

    /// `Fetching → Unresolved`; the subtree is collapsed so re-expanding retries
    pub fn fail_fetch(&mut self, parent_id: &str) {
        let fetching = ProcessKind::ChildrenFetching.default_id();
        self.signals.remove_process(parent_id, fetching);
        self.expanded.remove(parent_id);
        if let Some(parent) = self.get(parent_id) {
            if parent.is_fetching() {
                self.put(parent.with_children(Children::Unresolved));
            }
        }
    }

    // ---- structural mutations ----

    /// Inserts a confirmed document under a parent whose children are resolved
    pub fn add_child(&mut self, parent_id: &str, node: Node) -> ExplorerResult<Arc<Node>> {
        let parent = self.node(parent_id)?;
        if let Some(existing) = self.get(&node.id) {
            tracing::debug!(node_id = %node.id, "document already in tree");
            return Ok(existing);
        }
        let ids = parent
            .child_ids()
            .ok_or_else(|| ExplorerError::ParentNotReady(parent_id.to_string()))?;

        let node = node.with_placement(parent_id, node.position);
        let mut ids = ids.to_vec();
        let index = self.insert_index(&ids, node.position);
        ids.insert(index, node.id.clone());

        self.put(parent.with_children(Children::Resolved(ids)));
        self.signals.register(&node.id);
        let node_id = node.id.clone();
        let added = self.put(node);

        tracing::info!(node_id = %node_id, parent_id, "document added");
        self.publish(TreeEvent::NodeAdded {
            parent_id: parent_id.to_string(),
            node_id,
        });
        Ok(added)
    }

    /// Removes a node and its subtree; selection falls back to the former parent
    pub fn remove_node(&mut self, id: &str) -> ExplorerResult<Vec<NodeId>> {
        let node = self.node(id)?;
        let parent_id = match &node.parent_id {
            Some(parent_id) if !node.is_root() => parent_id.clone(),
            _ => return Err(ExplorerError::RootRemoval),
        };

        let removed = self.subtree(id);
        self.drop_nodes(&removed);

        if let Some(parent) = self.get(&parent_id) {
            if let Some(ids) = parent.child_ids() {
                let ids = ids.iter().filter(|child| *child != id).cloned().collect();
                self.put(parent.with_children(Children::Resolved(ids)));
            }
        }

        let selected = self.selected().id.clone();
        if removed.contains(&selected) {
            let fallback = self.get(&parent_id).unwrap_or_else(|| self.root());
            self.selection.send_replace(fallback);
        }

        tracing::info!(node_id = id, parent_id = %parent_id, count = removed.len(), "document removed");
        self.publish(TreeEvent::NodeRemoved {
            parent_id,
            node_id: id.to_string(),
            removed: removed.clone(),
        });
        Ok(removed)
    }

    /// Swaps in a new instance of the same node.
    ///
    /// The sibling index, position and resolved children of the old instance
    /// are kept.
    pub fn replace_node(&mut self, old_id: &str, new: Node) -> ExplorerResult<Arc<Node>> {
        let old = self.node(old_id)?;
        if new.id != old.id {
            return Err(ExplorerError::IdentityMismatch {
                expected: old.id.clone(),
                found: new.id,
            });
        }

        let mut node = new;
        node.children = old.children.clone();
        node.position = old.position;
        node.parent_id = old.parent_id.clone();
        let record = node.document_record_mut();
        record.position = old.position;
        record.parent_document_id = old.document_record().parent_document_id.clone();

        let replaced = self.put(node);
        tracing::info!(node_id = old_id, name = %replaced.name, "node replaced");
        self.publish(TreeEvent::NodeReplaced {
            node_id: old_id.to_string(),
        });
        Ok(replaced)
    }

    /// Replacement from a backend record (rename, content refresh)
    pub fn replace_document(&mut self, id: &str, record: DocumentRecord) -> ExplorerResult<Arc<Node>> {
        let old = self.node(id)?;
        self.replace_node(id, old.with_record(record))
    }

    /// Re-parents / re-positions a node relative to `destination`
    pub fn move_node(&mut self, id: &str, destination: &Destination) -> ExplorerResult<MoveOutcome> {
        let node = self.node(id)?;
        let from_parent = match &node.parent_id {
            Some(parent_id) if !node.is_root() => parent_id.clone(),
            _ => return Err(ExplorerError::RootRemoval),
        };
        let reference = self.node(&destination.reference_id)?;

        if reference.id == node.id {
            if destination.direction == DropDirection::Onto {
                return Err(ExplorerError::CycleDetected(id.to_string()));
            }
            return Ok(MoveOutcome {
                node_id: node.id.clone(),
                from_parent: from_parent.clone(),
                parent_id: from_parent.clone(),
                position: node.position,
                renumbered: Vec::new(),
                changed: false,
                undo: MoveUndo {
                    node_id: node.id.clone(),
                    parent_id: from_parent,
                    position: node.position,
                    siblings: Vec::new(),
                },
            });
        }

        let (parent_id, target) = self.resolve_destination(destination)?;

        if parent_id == node.id || self.ancestors(&parent_id).contains(&node.id) {
            return Err(ExplorerError::CycleDetected(id.to_string()));
        }

        let parent = self.node(&parent_id)?;
        let sibling_ids = parent
            .child_ids()
            .ok_or_else(|| ExplorerError::ParentNotReady(parent_id.clone()))?;
        let siblings: Vec<(NodeId, f64)> = sibling_ids
            .iter()
            .filter(|sibling| *sibling != id)
            .map(|sibling| (sibling.clone(), self.position_of(sibling)))
            .collect();

        let placement = self.allocator.place(&siblings, &target)?;
        let undo = MoveUndo {
            node_id: node.id.clone(),
            parent_id: from_parent.clone(),
            position: node.position,
            siblings: placement
                .renumbered
                .iter()
                .map(|(sibling, _)| (sibling.clone(), self.position_of(sibling)))
                .collect(),
        };

        self.detach(id, &from_parent);
        for (sibling, position) in &placement.renumbered {
            if let Some(sibling_node) = self.get(sibling) {
                self.put(sibling_node.with_position(*position));
            }
        }
        self.attach(node.with_placement(&parent_id, placement.position))?;

        tracing::info!(
            node_id = id,
            from_parent = %from_parent,
            to_parent = %parent_id,
            position = placement.position,
            renumbered = placement.renumbered.len(),
            "node moved"
        );
        self.publish(TreeEvent::NodeMoved {
            node_id: id.to_string(),
            from_parent: from_parent.clone(),
            to_parent: parent_id.clone(),
        });

        Ok(MoveOutcome {
            node_id: id.to_string(),
            from_parent,
            parent_id,
            position: placement.position,
            renumbered: placement.renumbered,
            changed: true,
            undo,
        })
    }

    /// Parent and sibling slot a drop lands in.
    ///
    /// Dropping above or below the root lands at the start or end of its children.
    pub fn resolve_destination(&self, destination: &Destination) -> ExplorerResult<(NodeId, InsertionTarget)> {
        let reference = self.node(&destination.reference_id)?;
        Ok(match (destination.direction, &reference.parent_id) {
            (DropDirection::Above, Some(parent_id)) => {
                (parent_id.clone(), InsertionTarget::Before(reference.id.clone()))
            }
            (DropDirection::Below, Some(parent_id)) => {
                (parent_id.clone(), InsertionTarget::After(reference.id.clone()))
            }
            (DropDirection::Above, None) => (reference.id.clone(), InsertionTarget::Start),
            (DropDirection::Below, None) | (DropDirection::Onto, _) => {
                (reference.id.clone(), InsertionTarget::End)
            }
        })
    }

    /// Puts a moved node back at its previous placement.
    ///
    /// If the previous parent disappeared meanwhile, the node follows it out
    /// of the tree.
    pub fn rollback_move(&mut self, undo: &MoveUndo) {
        let Some(node) = self.get(&undo.node_id) else {
            return;
        };
        if let Some(current_parent) = node.parent_id.clone() {
            self.detach(&undo.node_id, &current_parent);
        }

        let mut touched_parents = HashSet::new();
        for (sibling, position) in &undo.siblings {
            if let Some(sibling_node) = self.get(sibling) {
                if let Some(parent_id) = &sibling_node.parent_id {
                    touched_parents.insert(parent_id.clone());
                }
                self.put(sibling_node.with_position(*position));
            }
        }
        for parent_id in touched_parents {
            self.resort(&parent_id);
        }

        let restored = node.with_placement(&undo.parent_id, undo.position);
        if self.attach(restored).is_err() {
            tracing::warn!(node_id = %undo.node_id, parent_id = %undo.parent_id, "previous parent gone, dropping node");
            let removed = self.subtree(&undo.node_id);
            self.drop_nodes(&removed);
            let selected = self.selected().id.clone();
            if removed.contains(&selected) {
                self.selection.send_replace(self.root());
            }
        }

        tracing::warn!(node_id = %undo.node_id, "move rolled back");
        self.publish(TreeEvent::MoveRolledBack {
            node_id: undo.node_id.clone(),
        });
    }

    // ---- processes & signals ----

    pub fn add_process(&mut self, id: &str, kind: ProcessKind, process_id: Option<&str>) -> ExplorerResult<String> {
        self.node(id)?;
        self.signals
            .add_process(id, kind, process_id)
            .ok_or_else(|| ExplorerError::InvalidNodeReference(id.to_string()))
    }

    /// Never fails: the node may have left the tree while the process ran
    pub fn remove_process(&mut self, id: &str, process_id: &str) -> bool {
        self.signals.remove_process(id, process_id)
    }

    pub fn processes(&self, id: &str) -> ProcessList {
        self.signals.processes(id)
    }

    pub fn emit_signal(&self, id: &str, signal: NodeSignal) -> ExplorerResult<()> {
        self.node(id)?;
        self.signals.emit(id, signal);
        Ok(())
    }

    // ---- checks ----

    /// Lists every broken invariant; empty when the tree is consistent
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for (id, node) in &self.nodes {
            match &node.parent_id {
                None if id != &self.root_id => violations.push(format!("{} has no parent", id)),
                None => {}
                Some(parent_id) => match self.nodes.get(parent_id) {
                    None => violations.push(format!("{} is orphaned (parent {})", id, parent_id)),
                    Some(parent) => {
                        let listed = parent.child_ids().map_or(false, |ids| ids.contains(id));
                        if !listed {
                            violations.push(format!("{} is not listed by {}", id, parent_id));
                        }
                    }
                },
            }

            if let Some(ids) = node.child_ids() {
                // equal positions keep their insertion order
                for pair in ids.windows(2) {
                    if self.position_of(&pair[0]) > self.position_of(&pair[1]) {
                        violations.push(format!("children of {} are out of position order", id));
                    }
                }
                for child in ids {
                    match self.nodes.get(child) {
                        None => violations.push(format!("{} lists missing child {}", id, child)),
                        Some(c) if c.parent_id.as_deref() != Some(id.as_str()) => {
                            violations.push(format!("{} lists {} whose parent differs", id, child))
                        }
                        _ => {}
                    }
                }
            }
        }

        if self.subtree(&self.root_id).len() != self.nodes.len() {
            violations.push("some nodes are unreachable from the root".to_string());
        }
        if !self.nodes.contains_key(&self.selected().id) {
            violations.push(format!("selection {} is not in the tree", self.selected().id));
        }
        violations
    }

    // ---- internals ----

    fn publish(&self, event: TreeEvent) {
        let _ = self.events.send(event);
    }

    /// Stores a new instance, keeping the selection pointed at the latest one
    fn put(&mut self, node: Node) -> Arc<Node> {
        let node = Arc::new(node);
        self.nodes.insert(node.id.clone(), node.clone());
        if self.selection.borrow().id == node.id {
            self.selection.send_replace(node.clone());
        }
        node
    }

    fn position_of(&self, id: &str) -> f64 {
        self.nodes.get(id).map_or(f64::INFINITY, |n| n.position)
    }

    /// First index whose position is greater: equal positions keep insertion order
    fn insert_index(&self, ids: &[NodeId], position: f64) -> usize {
        ids.iter()
            .position(|id| self.position_of(id) > position)
            .unwrap_or(ids.len())
    }

    fn detach(&mut self, id: &str, parent_id: &str) {
        if let Some(parent) = self.get(parent_id) {
            if let Some(ids) = parent.child_ids() {
                let ids = ids.iter().filter(|child| *child != id).cloned().collect();
                self.put(parent.with_children(Children::Resolved(ids)));
            }
        }
    }

    fn attach(&mut self, node: Node) -> ExplorerResult<()> {
        let parent_id = node
            .parent_id
            .clone()
            .ok_or(ExplorerError::RootRemoval)?;
        let parent = self.node(&parent_id)?;
        let mut ids = parent
            .child_ids()
            .ok_or_else(|| ExplorerError::ParentNotReady(parent_id.clone()))?
            .to_vec();
        let index = self.insert_index(&ids, node.position);
        ids.insert(index, node.id.clone());
        self.put(parent.with_children(Children::Resolved(ids)));
        self.put(node);
        Ok(())
    }

    fn resort(&mut self, parent_id: &str) {
        let Some(parent) = self.get(parent_id) else {
            return;
        };
        if let Some(ids) = parent.child_ids() {
            let mut ids = ids.to_vec();
            ids.sort_by(|a, b| self.position_of(a).total_cmp(&self.position_of(b)));
            self.put(parent.with_children(Children::Resolved(ids)));
        }
    }

    fn drop_nodes(&mut self, ids: &[NodeId]) {
        for id in ids {
            self.nodes.remove(id);
            self.signals.unregister(id);
            self.expanded.remove(id);
        }
    }
}
