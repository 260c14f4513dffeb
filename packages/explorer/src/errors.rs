//! Error types for the explorer

use crate::position::PositionError;
use crate::sync::{OperationKind, RemoteError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExplorerError {
    /// The id is not in the id-map. Programming error, never user-facing.
    #[error("Invalid node reference: {0}")]
    InvalidNodeReference(String),

    /// Insert requested before the parent's children were resolved
    #[error("Children of {0} are not resolved yet")]
    ParentNotReady(String),

    #[error("Remote {operation} failed for {node_id}: {source}")]
    RemoteOperationFailed {
        operation: OperationKind,
        node_id: String,
        #[source]
        source: RemoteError,
    },

    #[error("The story root cannot be removed or moved")]
    RootRemoval,

    #[error("Moving {0} would create a cycle")]
    CycleDetected(String),

    #[error("Node {expected} cannot be replaced by {found}")]
    IdentityMismatch { expected: String, found: String },

    /// Allocation failed even after renumbering
    #[error("Position allocation failed: {0}")]
    Position(#[from] PositionError),
}

impl ExplorerError {
    /// Whether the error should be shown to the user (as opposed to logged only)
    pub fn is_user_facing(&self) -> bool {
        matches!(self, ExplorerError::RemoteOperationFailed { .. })
    }
}

pub type ExplorerResult<T> = Result<T, ExplorerError>;
