//! # Stories Explorer
//!
//! Tree state of a story's documents: lazily loaded children, backend-confirmed
//! mutations and drag-and-drop positioning.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ views: tree renderer, content panel         │
//! └─────────────────────────────────────────────┘
//!          ↓ intents            ↑ selection / events / signals
//! ┌─────────────────────────────────────────────┐
//! │ explorer: per-node FIFO queues              │
//! │  - Resolve children before inserting        │
//! │  - Confirm create / rename / delete         │
//! │  - Optimistic move + rollback               │
//! │  - Debounced content saves                  │
//! └─────────────────────────────────────────────┘
//!          ↓ mutations          ↓ single-shot calls
//! ┌──────────────────────┐  ┌────────────────────┐
//! │ tree: id-map,        │  │ sync: RemoteSync   │
//! │ children, selection, │  │ adapter            │
//! │ processes, positions │  │                    │
//! └──────────────────────┘  └────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Backend is source of truth**: the tree only shows acknowledged documents
//! 2. **Immutable nodes**: a rename swaps in a new node with the same id
//! 3. **Atomic updates**: no await point inside a tree mutation
//! 4. **Issuance order per node**: a delete never races a rename of the same node
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stories_explorer::{Destination, Explorer, ExplorerConfig, MemoryBackend};
//!
//! let explorer = Explorer::open("story-1", backend, ExplorerConfig::default()).await?;
//! let root = explorer.root();
//!
//! explorer.expand(&root.id).await?;
//! let page = explorer.create_document(&root.id, "New page").await?;
//! explorer.rename(&page.id, "Introduction").await?;
//! explorer.move_node(&page.id, Destination::above("d1")).await?;
//! ```

mod config;
mod errors;
mod explorer;
mod memory;
mod mutations;
mod node;
mod pending;
mod position;
mod process;
mod signals;
mod sync;
mod tree;

pub use config::ExplorerConfig;
pub use errors::{ExplorerError, ExplorerResult};
pub use explorer::Explorer;
pub use memory::{Database, MemoryBackend, RemoteCall};
pub use mutations::{Mutation, MutationOutcome};
pub use node::{sort_records, Children, Node, NodeAction, NodeId, NodeKind};
pub use pending::{NodeQueues, PendingLedger, PendingMutation};
pub use position::{InsertionTarget, Placement, PositionAllocator, PositionError};
pub use process::{Process, ProcessKind, ProcessList};
pub use signals::{NodeSignal, NodeSubscription, SignalBus};
pub use sync::{
    ChildrenQuery, CreateDocumentBody, DocumentContent, DocumentRecord, MoveDocumentBody,
    OperationKind, QueryDocumentsResponse, RemoteError, RemoteSync, RenameDocumentBody,
    StoryRecord, SyncAdapter,
};
pub use tree::{Destination, DropDirection, MoveOutcome, MoveUndo, TreeEvent, TreeState};
