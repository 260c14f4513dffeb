//! # Explorer Nodes
//!
//! A node is either the story root or a document of the story. Both share the
//! same record shape, the variant only decides which backend record the node
//! stands for.
//!
//! Nodes are never mutated once published: the tree swaps in a new instance on
//! rename, move or children resolution. The children cache travels with the
//! replacement so a rename never triggers a refetch.

use serde::{Deserialize, Serialize};

use crate::sync::{DocumentRecord, StoryRecord};

pub type NodeId = String;

/// Variant-specific part of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Story {
        story: StoryRecord,
        root_document: DocumentRecord,
    },
    Document {
        document: DocumentRecord,
    },
}

/// Children aspect of a node: `Unresolved → Fetching → Resolved`
#[derive(Debug, Clone, PartialEq)]
pub enum Children {
    Unresolved,
    Fetching,
    /// Ordered by ascending position
    Resolved(Vec<NodeId>),
}

impl Children {
    pub fn ids(&self) -> Option<&[NodeId]> {
        match self {
            Children::Resolved(ids) => Some(ids),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub position: f64,
    pub parent_id: Option<NodeId>,
    pub kind: NodeKind,
    pub(crate) children: Children,
}

impl Node {
    /// Root node of a story; its id is the root document id
    pub fn story(story: StoryRecord, root_document: DocumentRecord) -> Self {
        Self {
            id: root_document.document_id.clone(),
            name: story.title.clone(),
            position: 0.0,
            parent_id: None,
            kind: NodeKind::Story {
                story,
                root_document,
            },
            children: Children::Unresolved,
        }
    }

    /// Document node built from a fetched or freshly created record
    pub fn document(document: DocumentRecord) -> Self {
        Self {
            id: document.document_id.clone(),
            name: document.title.clone(),
            position: document.position,
            parent_id: document.parent_document_id.clone(),
            kind: NodeKind::Document { document },
            children: Children::Unresolved,
        }
    }

    /// Document node whose parent is known from the query that produced it
    pub(crate) fn document_under(mut document: DocumentRecord, parent_id: &str) -> Self {
        document.parent_document_id = Some(parent_id.to_string());
        Self::document(document)
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    pub fn child_ids(&self) -> Option<&[NodeId]> {
        self.children.ids()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.children, Children::Resolved(_))
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.children, Children::Fetching)
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Story { .. })
    }

    /// Backend document this node stands for
    pub fn document_record(&self) -> &DocumentRecord {
        match &self.kind {
            NodeKind::Story { root_document, .. } => root_document,
            NodeKind::Document { document } => document,
        }
    }

    pub(crate) fn document_record_mut(&mut self) -> &mut DocumentRecord {
        match &mut self.kind {
            NodeKind::Story { root_document, .. } => root_document,
            NodeKind::Document { document } => document,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Story { .. } => "story",
            NodeKind::Document { .. } => "document",
        }
    }

    /// Replacement carrying a new backend record.
    ///
    /// Identity, placement and the children cache are kept; for the root the
    /// story title follows the document title.
    pub fn with_record(&self, record: DocumentRecord) -> Node {
        let mut record = record;
        record.position = self.position;
        record.parent_document_id = self.document_record().parent_document_id.clone();

        let kind = match &self.kind {
            NodeKind::Story { story, .. } => NodeKind::Story {
                story: StoryRecord {
                    title: record.title.clone(),
                    ..story.clone()
                },
                root_document: record.clone(),
            },
            NodeKind::Document { .. } => NodeKind::Document {
                document: record.clone(),
            },
        };

        Node {
            id: self.id.clone(),
            name: record.title,
            position: self.position,
            parent_id: self.parent_id.clone(),
            kind,
            children: self.children.clone(),
        }
    }

    pub(crate) fn with_children(&self, children: Children) -> Node {
        Node {
            children,
            ..self.clone()
        }
    }

    pub(crate) fn with_placement(&self, parent_id: &str, position: f64) -> Node {
        let mut node = self.clone();
        node.parent_id = Some(parent_id.to_string());
        node.position = position;
        if let NodeKind::Document { document } = &mut node.kind {
            document.parent_document_id = Some(parent_id.to_string());
            document.position = position;
        }
        node
    }

    pub(crate) fn with_position(&self, position: f64) -> Node {
        let mut node = self.clone();
        node.position = position;
        if let NodeKind::Document { document } = &mut node.kind {
            document.position = position;
        }
        node
    }
}

/// Orders fetched records by position; equal positions keep backend order
pub fn sort_records(records: &mut [DocumentRecord]) {
    records.sort_by(|a, b| a.position.total_cmp(&b.position));
}

/// Context actions offered on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeAction {
    NewPage,
    DeleteDocument,
    RenameStory,
    RenameDocument,
}

impl NodeAction {
    pub const ALL: [NodeAction; 4] = [
        NodeAction::NewPage,
        NodeAction::DeleteDocument,
        NodeAction::RenameStory,
        NodeAction::RenameDocument,
    ];

    pub fn applicable(&self, node: &Node) -> bool {
        match self {
            NodeAction::NewPage => true,
            NodeAction::DeleteDocument | NodeAction::RenameDocument => !node.is_root(),
            NodeAction::RenameStory => node.is_root(),
        }
    }

    pub fn available_for(node: &Node) -> Vec<NodeAction> {
        Self::ALL
            .into_iter()
            .filter(|action| action.applicable(node))
            .collect()
    }
}
