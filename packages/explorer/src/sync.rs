//! # Remote Sync
//!
//! Boundary between the explorer and the stories backend.
//!
//! [`RemoteSync`] is the backend contract (an HTTP client in production, the
//! in-memory [`MemoryBackend`](crate::MemoryBackend) in tests and in the CLI).
//! [`SyncAdapter`] wraps it for one story: every call is single-shot, failures
//! are translated into [`ExplorerError::RemoteOperationFailed`] and the adapter
//! never touches the tree.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{ExplorerError, ExplorerResult};

/// Story as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
    pub story_id: String,
    pub title: String,
    pub root_document_id: String,
}

/// Document as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub document_id: String,
    pub story_id: String,
    pub title: String,
    pub position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_document_id: Option<String>,
}

/// Page content of a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    pub html: String,
    pub css: String,
    pub components: String,
    pub styles: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDocumentsResponse {
    pub documents: Vec<DocumentRecord>,
}

/// Paging of a children query.
///
/// `from_index` keeps children whose position is `>= from_index`,
/// `count` caps the number of returned documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildrenQuery {
    pub from_index: Option<f64>,
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentBody {
    pub parent_document_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<DocumentContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameDocumentBody {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveDocumentBody {
    pub parent_id: String,
    pub position: f64,
}

/// Transport or server level failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Backend operation, carried by [`ExplorerError::RemoteOperationFailed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    GetStory,
    QueryChildren,
    CreateDocument,
    RenameDocument,
    DeleteDocument,
    MoveDocument,
    GetContent,
    UpdateContent,
}

impl OperationKind {
    /// Read operations are recovered locally, writes are surfaced to the user
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            OperationKind::GetStory | OperationKind::QueryChildren | OperationKind::GetContent
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::GetStory => "get-story",
            OperationKind::QueryChildren => "query-children",
            OperationKind::CreateDocument => "create-document",
            OperationKind::RenameDocument => "rename-document",
            OperationKind::DeleteDocument => "delete-document",
            OperationKind::MoveDocument => "move-document",
            OperationKind::GetContent => "get-content",
            OperationKind::UpdateContent => "update-content",
        };
        f.write_str(name)
    }
}

/// Stories backend contract
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn get_story(&self, story_id: &str) -> Result<StoryRecord, RemoteError>;

    async fn query_children(
        &self,
        story_id: &str,
        parent_document_id: &str,
        query: ChildrenQuery,
    ) -> Result<QueryDocumentsResponse, RemoteError>;

    async fn create_document(
        &self,
        story_id: &str,
        body: CreateDocumentBody,
    ) -> Result<DocumentRecord, RemoteError>;

    async fn rename_document(
        &self,
        story_id: &str,
        document_id: &str,
        body: RenameDocumentBody,
    ) -> Result<DocumentRecord, RemoteError>;

    async fn delete_document(&self, story_id: &str, document_id: &str) -> Result<(), RemoteError>;

    async fn move_document(
        &self,
        story_id: &str,
        document_id: &str,
        body: MoveDocumentBody,
    ) -> Result<(), RemoteError>;

    async fn get_content(
        &self,
        story_id: &str,
        document_id: &str,
    ) -> Result<DocumentContent, RemoteError>;

    async fn update_content(
        &self,
        story_id: &str,
        document_id: &str,
        content: DocumentContent,
    ) -> Result<(), RemoteError>;
}

/// Story-scoped wrapper translating backend failures into explorer errors
#[derive(Clone)]
pub struct SyncAdapter {
    story_id: String,
    remote: Arc<dyn RemoteSync>,
    page_size: Option<usize>,
}

impl fmt::Debug for SyncAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncAdapter")
            .field("story_id", &self.story_id)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl SyncAdapter {
    pub fn new(story_id: impl Into<String>, remote: Arc<dyn RemoteSync>) -> Self {
        Self {
            story_id: story_id.into(),
            remote,
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub async fn get_story(&self) -> ExplorerResult<StoryRecord> {
        self.remote
            .get_story(&self.story_id)
            .await
            .map_err(|e| failed(OperationKind::GetStory, &self.story_id, e))
    }

    /// Root document of the story, listed as the only child of the story id
    pub async fn get_root_document(&self, story: &StoryRecord) -> ExplorerResult<DocumentRecord> {
        let documents = self
            .remote
            .query_children(&self.story_id, &story.story_id, ChildrenQuery::default())
            .await
            .map_err(|e| failed(OperationKind::GetStory, &story.root_document_id, e))?;

        documents
            .documents
            .into_iter()
            .find(|doc| doc.document_id == story.root_document_id)
            .ok_or_else(|| {
                failed(
                    OperationKind::GetStory,
                    &story.root_document_id,
                    RemoteError::NotFound(story.root_document_id.clone()),
                )
            })
    }

    /// Every child of `parent_id`, in backend order.
    ///
    /// With a page size, pages are requested from the highest position seen so
    /// far until a short page comes back. `from_index` is inclusive, so records
    /// already collected are skipped by id.
    pub async fn query_children(&self, parent_id: &str) -> ExplorerResult<Vec<DocumentRecord>> {
        let Some(page_size) = self.page_size.filter(|size| *size > 0) else {
            return self.query_page(parent_id, ChildrenQuery::default()).await;
        };

        let mut documents: Vec<DocumentRecord> = Vec::new();
        let mut seen = HashSet::new();
        let mut query = ChildrenQuery {
            from_index: None,
            count: Some(page_size),
        };
        loop {
            let page = self.query_page(parent_id, query).await?;
            let full = query.count.map_or(false, |count| page.len() >= count);
            let highest = page.iter().map(|doc| doc.position).reduce(f64::max);

            let before = documents.len();
            for doc in page {
                if seen.insert(doc.document_id.clone()) {
                    documents.push(doc);
                }
            }

            if !full {
                break;
            }
            if documents.len() == before {
                // a full page of equal positions: fetch the rest unpaged
                query.count = None;
            }
            query.from_index = highest;
            tracing::debug!(parent_id, collected = documents.len(), "fetching next children page");
        }
        Ok(documents)
    }

    async fn query_page(
        &self,
        parent_id: &str,
        query: ChildrenQuery,
    ) -> ExplorerResult<Vec<DocumentRecord>> {
        self.remote
            .query_children(&self.story_id, parent_id, query)
            .await
            .map(|resp| resp.documents)
            .map_err(|e| failed(OperationKind::QueryChildren, parent_id, e))
    }

    pub async fn create_document(
        &self,
        parent_id: &str,
        title: &str,
    ) -> ExplorerResult<DocumentRecord> {
        let body = CreateDocumentBody {
            parent_document_id: parent_id.to_string(),
            title: title.to_string(),
            content: None,
        };
        self.remote
            .create_document(&self.story_id, body)
            .await
            .map_err(|e| failed(OperationKind::CreateDocument, parent_id, e))
    }

    pub async fn rename_document(
        &self,
        document_id: &str,
        title: &str,
    ) -> ExplorerResult<DocumentRecord> {
        let body = RenameDocumentBody {
            title: title.to_string(),
        };
        self.remote
            .rename_document(&self.story_id, document_id, body)
            .await
            .map_err(|e| failed(OperationKind::RenameDocument, document_id, e))
    }

    pub async fn delete_document(&self, document_id: &str) -> ExplorerResult<()> {
        self.remote
            .delete_document(&self.story_id, document_id)
            .await
            .map_err(|e| failed(OperationKind::DeleteDocument, document_id, e))
    }

    pub async fn move_document(
        &self,
        document_id: &str,
        parent_id: &str,
        position: f64,
    ) -> ExplorerResult<()> {
        let body = MoveDocumentBody {
            parent_id: parent_id.to_string(),
            position,
        };
        self.remote
            .move_document(&self.story_id, document_id, body)
            .await
            .map_err(|e| failed(OperationKind::MoveDocument, document_id, e))
    }

    pub async fn get_content(&self, document_id: &str) -> ExplorerResult<DocumentContent> {
        self.remote
            .get_content(&self.story_id, document_id)
            .await
            .map_err(|e| failed(OperationKind::GetContent, document_id, e))
    }

    pub async fn update_content(
        &self,
        document_id: &str,
        content: DocumentContent,
    ) -> ExplorerResult<()> {
        self.remote
            .update_content(&self.story_id, document_id, content)
            .await
            .map_err(|e| failed(OperationKind::UpdateContent, document_id, e))
    }
}

fn failed(operation: OperationKind, node_id: &str, source: RemoteError) -> ExplorerError {
    tracing::error!(%operation, node_id, error = %source, "remote operation failed");
    ExplorerError::RemoteOperationFailed {
        operation,
        node_id: node_id.to_string(),
        source,
    }
}
