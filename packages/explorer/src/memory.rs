//! In-memory stories backend.
//!
//! Implements [`RemoteSync`] over a [`Database`] held in memory. Used by the
//! CLI (the database is loaded from and saved to a JSON file) and by tests,
//! which can inspect the recorded calls, inject failures and slow calls down.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::node::sort_records;
use crate::sync::{
    ChildrenQuery, CreateDocumentBody, DocumentContent, DocumentRecord, MoveDocumentBody,
    OperationKind, QueryDocumentsResponse, RemoteError, RemoteSync, RenameDocumentBody,
    StoryRecord,
};

/// Persisted state of the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub stories: Vec<StoryRecord>,
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
    #[serde(default)]
    pub contents: HashMap<String, DocumentContent>,
}

impl Database {
    /// Adds a story and its root document (`root-<story id>`, child of the story id)
    pub fn create_story(&mut self, story_id: &str, title: &str) -> StoryRecord {
        let root_id = format!("root-{}", story_id);
        let story = StoryRecord {
            story_id: story_id.to_string(),
            title: title.to_string(),
            root_document_id: root_id.clone(),
        };
        self.stories.push(story.clone());
        self.documents.push(DocumentRecord {
            document_id: root_id.clone(),
            story_id: story_id.to_string(),
            title: title.to_string(),
            position: 0.0,
            parent_document_id: Some(story_id.to_string()),
        });
        self.contents.insert(root_id, DocumentContent::default());
        story
    }

    /// Adds a document as last child of `parent_id`
    pub fn add_document(&mut self, story_id: &str, parent_id: &str, document_id: &str, title: &str) -> DocumentRecord {
        let position = self
            .last_position(parent_id)
            .map_or(0.0, |last| last + 1.0);
        let record = DocumentRecord {
            document_id: document_id.to_string(),
            story_id: story_id.to_string(),
            title: title.to_string(),
            position,
            parent_document_id: Some(parent_id.to_string()),
        };
        self.documents.push(record.clone());
        record
    }

    pub fn story(&self, story_id: &str) -> Option<&StoryRecord> {
        self.stories.iter().find(|s| s.story_id == story_id)
    }

    pub fn document(&self, document_id: &str) -> Option<&DocumentRecord> {
        self.documents.iter().find(|d| d.document_id == document_id)
    }

    fn document_mut(&mut self, document_id: &str) -> Option<&mut DocumentRecord> {
        self.documents.iter_mut().find(|d| d.document_id == document_id)
    }

    /// Children ordered by position, then filtered by `from_index` and capped by `count`
    pub fn children(&self, parent_id: &str, query: ChildrenQuery) -> Vec<DocumentRecord> {
        let mut children: Vec<DocumentRecord> = self
            .documents
            .iter()
            .filter(|d| d.parent_document_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        sort_records(&mut children);

        children
            .into_iter()
            .filter(|d| query.from_index.map_or(true, |from| d.position >= from))
            .take(query.count.unwrap_or(usize::MAX))
            .collect()
    }

    fn last_position(&self, parent_id: &str) -> Option<f64> {
        self.documents
            .iter()
            .filter(|d| d.parent_document_id.as_deref() == Some(parent_id))
            .map(|d| d.position)
            .max_by(f64::total_cmp)
    }

    /// Next free `doc-<n>` id
    fn next_document_id(&self) -> String {
        let mut n = self.documents.len() + 1;
        loop {
            let id = format!("doc-{}", n);
            if self.document(&id).is_none() {
                return id;
            }
            n += 1;
        }
    }

    /// `document_id` and all its descendants
    fn descendants(&self, document_id: &str) -> Vec<String> {
        let mut collected = vec![document_id.to_string()];
        let mut index = 0;
        while index < collected.len() {
            let current = collected[index].clone();
            collected.extend(
                self.documents
                    .iter()
                    .filter(|d| d.parent_document_id.as_deref() == Some(current.as_str()))
                    .map(|d| d.document_id.clone()),
            );
            index += 1;
        }
        collected
    }
}

/// One call received by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub operation: OperationKind,
    pub target: String,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    db: Mutex<Database>,
    calls: Mutex<Vec<RemoteCall>>,
    /// Upcoming calls per operation, `true` for the ones that must fail
    failures: Mutex<HashMap<OperationKind, VecDeque<bool>>>,
    latency: Option<Duration>,
    unordered: bool,
}

impl MemoryBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            ..Default::default()
        }
    }

    /// Every call waits `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Children are listed in reverse position order
    pub fn unordered(mut self) -> Self {
        self.unordered = true;
        self
    }

    /// The next call of `operation` not already set to fail fails with a server error
    pub fn fail_next(&self, operation: OperationKind) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let schedule = failures.entry(operation).or_default();
        match schedule.iter_mut().find(|fails| !**fails) {
            Some(slot) => *slot = true,
            None => schedule.push_back(true),
        }
    }

    /// The `nth` upcoming call of `operation` (1-based) fails with a server error
    pub fn fail_nth(&self, operation: OperationKind, nth: usize) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let schedule = failures.entry(operation).or_default();
        if schedule.len() < nth {
            schedule.resize(nth, false);
        }
        if let Some(slot) = nth.checked_sub(1).and_then(|index| schedule.get_mut(index)) {
            *slot = true;
        }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_of(&self, operation: OperationKind) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.target)
            .collect()
    }

    pub fn snapshot(&self) -> Database {
        self.db().clone()
    }

    pub fn document(&self, document_id: &str) -> Option<DocumentRecord> {
        self.db().document(document_id).cloned()
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records the call, simulates latency and consumes an injected failure
    async fn enter(&self, operation: OperationKind, target: &str) -> Result<(), RemoteError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RemoteCall {
                operation,
                target: target.to_string(),
            });

        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }

        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let fails = failures
            .get_mut(&operation)
            .and_then(|schedule| schedule.pop_front())
            .unwrap_or(false);
        if fails {
            return Err(RemoteError::Server {
                status: 500,
                message: format!("injected {} failure", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSync for MemoryBackend {
    async fn get_story(&self, story_id: &str) -> Result<StoryRecord, RemoteError> {
        self.enter(OperationKind::GetStory, story_id).await?;
        self.db()
            .story(story_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(story_id.to_string()))
    }

    async fn query_children(
        &self,
        _story_id: &str,
        parent_document_id: &str,
        query: ChildrenQuery,
    ) -> Result<QueryDocumentsResponse, RemoteError> {
        self.enter(OperationKind::QueryChildren, parent_document_id).await?;
        let mut documents = self.db().children(parent_document_id, query);
        if self.unordered {
            documents.reverse();
        }
        Ok(QueryDocumentsResponse { documents })
    }

    async fn create_document(
        &self,
        story_id: &str,
        body: CreateDocumentBody,
    ) -> Result<DocumentRecord, RemoteError> {
        self.enter(OperationKind::CreateDocument, &body.parent_document_id).await?;
        let mut db = self.db();
        if db.document(&body.parent_document_id).is_none() {
            return Err(RemoteError::NotFound(body.parent_document_id));
        }
        let id = db.next_document_id();
        let record = db.add_document(story_id, &body.parent_document_id, &id, &body.title);
        db.contents.insert(id, body.content.unwrap_or_default());
        Ok(record)
    }

    async fn rename_document(
        &self,
        story_id: &str,
        document_id: &str,
        body: RenameDocumentBody,
    ) -> Result<DocumentRecord, RemoteError> {
        self.enter(OperationKind::RenameDocument, document_id).await?;
        let mut db = self.db();
        let record = {
            let document = db
                .document_mut(document_id)
                .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;
            document.title = body.title.clone();
            document.clone()
        };
        if let Some(story) = db
            .stories
            .iter_mut()
            .find(|s| s.story_id == story_id && s.root_document_id == document_id)
        {
            story.title = body.title;
        }
        Ok(record)
    }

    async fn delete_document(&self, _story_id: &str, document_id: &str) -> Result<(), RemoteError> {
        self.enter(OperationKind::DeleteDocument, document_id).await?;
        let mut db = self.db();
        if db.document(document_id).is_none() {
            return Err(RemoteError::NotFound(document_id.to_string()));
        }
        let removed = db.descendants(document_id);
        db.documents.retain(|d| !removed.contains(&d.document_id));
        for id in &removed {
            db.contents.remove(id);
        }
        Ok(())
    }

    async fn move_document(
        &self,
        _story_id: &str,
        document_id: &str,
        body: MoveDocumentBody,
    ) -> Result<(), RemoteError> {
        self.enter(OperationKind::MoveDocument, document_id).await?;
        let mut db = self.db();
        if db.document(&body.parent_id).is_none() {
            return Err(RemoteError::NotFound(body.parent_id));
        }
        let document = db
            .document_mut(document_id)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;
        document.parent_document_id = Some(body.parent_id);
        document.position = body.position;
        Ok(())
    }

    async fn get_content(
        &self,
        _story_id: &str,
        document_id: &str,
    ) -> Result<DocumentContent, RemoteError> {
        self.enter(OperationKind::GetContent, document_id).await?;
        let db = self.db();
        if db.document(document_id).is_none() {
            return Err(RemoteError::NotFound(document_id.to_string()));
        }
        Ok(db.contents.get(document_id).cloned().unwrap_or_default())
    }

    async fn update_content(
        &self,
        _story_id: &str,
        document_id: &str,
        content: DocumentContent,
    ) -> Result<(), RemoteError> {
        self.enter(OperationKind::UpdateContent, document_id).await?;
        let mut db = self.db();
        if db.document(document_id).is_none() {
            return Err(RemoteError::NotFound(document_id.to_string()));
        }
        db.contents.insert(document_id.to_string(), content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> Database {
        let mut db = Database::default();
        db.create_story("s1", "Story");
        db.add_document("s1", "root-s1", "a", "A");
        db.add_document("s1", "root-s1", "b", "B");
        db.add_document("s1", "a", "a1", "A1");
        db
    }

    #[test]
    fn test_new_documents_go_last() {
        let db = database();
        assert_eq!(db.document("a").unwrap().position, 0.0);
        assert_eq!(db.document("b").unwrap().position, 1.0);
        assert_eq!(db.document("a1").unwrap().position, 0.0);
    }

    #[test]
    fn test_children_paging() {
        let mut db = database();
        db.add_document("s1", "root-s1", "c", "C");

        let page = db.children(
            "root-s1",
            ChildrenQuery {
                from_index: Some(1.0),
                count: Some(1),
            },
        );
        let ids: Vec<_> = page.iter().map(|d| d.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let backend = MemoryBackend::new(database());
        backend.delete_document("s1", "a").await.unwrap();

        assert!(backend.document("a").is_none());
        assert!(backend.document("a1").is_none());
        assert!(backend.document("b").is_some());
    }

    #[tokio::test]
    async fn test_rename_root_renames_story() {
        let backend = MemoryBackend::new(database());
        backend
            .rename_document(
                "s1",
                "root-s1",
                RenameDocumentBody {
                    title: "Renamed".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(backend.get_story("s1").await.unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let backend = MemoryBackend::new(database());
        backend.fail_next(OperationKind::GetStory);

        assert!(matches!(
            backend.get_story("s1").await,
            Err(RemoteError::Server { status: 500, .. })
        ));
        assert!(backend.get_story("s1").await.is_ok());
        assert_eq!(backend.calls_of(OperationKind::GetStory), vec!["s1", "s1"]);
    }

    #[tokio::test]
    async fn test_nth_failure_skips_earlier_calls() {
        let backend = MemoryBackend::new(database());
        backend.fail_nth(OperationKind::GetStory, 2);

        assert!(backend.get_story("s1").await.is_ok());
        assert!(backend.get_story("s1").await.is_err());
        assert!(backend.get_story("s1").await.is_ok());
    }

    #[tokio::test]
    async fn test_create_assigns_fresh_id() {
        let backend = MemoryBackend::new(database());
        let record = backend
            .create_document(
                "s1",
                CreateDocumentBody {
                    parent_document_id: "root-s1".to_string(),
                    title: "New".to_string(),
                    content: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(record.position, 2.0);
        assert!(backend.document(&record.document_id).is_some());
    }
}
