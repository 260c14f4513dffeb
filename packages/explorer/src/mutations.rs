//! # Tree Mutations
//!
//! Every structural change of the tree goes through [`TreeState::apply`].
//!
//! ## Mutation Semantics
//!
//! ### AddChild
//! - Inserts a backend-confirmed document, ordered by position
//! - Fails with `ParentNotReady` if the parent's children are not resolved
//! - Idempotent: a document already in the tree is returned as is
//!
//! ### RemoveNode
//! - Removes the node and all loaded descendants
//! - The selection falls back to the former parent
//!
//! ### ReplaceDocument
//! - Same identity, new record (rename)
//! - Sibling index and resolved children are kept
//!
//! ### MoveNode
//! - Relocates relative to a reference node (above, below, onto)
//! - Fails if it would create a cycle
//! - Renumbers the destination siblings when positions are exhausted

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::ExplorerResult;
use crate::node::{Node, NodeId};
use crate::sync::DocumentRecord;
use crate::tree::{Destination, MoveOutcome, TreeState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mutation {
    #[serde(rename_all = "camelCase")]
    AddChild {
        parent_id: NodeId,
        document: DocumentRecord,
    },

    #[serde(rename_all = "camelCase")]
    RemoveNode { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    ReplaceDocument {
        node_id: NodeId,
        document: DocumentRecord,
    },

    #[serde(rename_all = "camelCase")]
    MoveNode {
        node_id: NodeId,
        destination: Destination,
    },
}

impl Mutation {
    /// Node whose queue the mutation runs on
    pub fn target(&self) -> &str {
        match self {
            Mutation::AddChild { parent_id, .. } => parent_id,
            Mutation::RemoveNode { node_id }
            | Mutation::ReplaceDocument { node_id, .. }
            | Mutation::MoveNode { node_id, .. } => node_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Added(Arc<Node>),
    Removed(Vec<NodeId>),
    Replaced(Arc<Node>),
    Moved(MoveOutcome),
}

impl MutationOutcome {
    /// Node added or replaced by the mutation
    pub fn node(&self) -> Option<Arc<Node>> {
        match self {
            MutationOutcome::Added(node) | MutationOutcome::Replaced(node) => Some(node.clone()),
            _ => None,
        }
    }
}

impl TreeState {
    /// Applies a mutation atomically: on error the tree is left untouched
    pub fn apply(&mut self, mutation: Mutation) -> ExplorerResult<MutationOutcome> {
        tracing::trace!(?mutation, "apply");
        match mutation {
            Mutation::AddChild { parent_id, document } => self
                .add_child(&parent_id, Node::document(document))
                .map(MutationOutcome::Added),
            Mutation::RemoveNode { node_id } => {
                self.remove_node(&node_id).map(MutationOutcome::Removed)
            }
            Mutation::ReplaceDocument { node_id, document } => self
                .replace_document(&node_id, document)
                .map(MutationOutcome::Replaced),
            Mutation::MoveNode {
                node_id,
                destination,
            } => self
                .move_node(&node_id, &destination)
                .map(MutationOutcome::Moved),
        }
    }
}
