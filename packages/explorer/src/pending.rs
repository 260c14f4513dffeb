//! # Pending Mutations
//!
//! Bookkeeping for operations that are waiting on the backend.
//!
//! [`PendingLedger`] tracks optimistic moves until the backend confirms or
//! rejects them; a rejection rolls the tree back to the recorded placement.
//! [`NodeQueues`] serializes operations targeting the same node: each node has
//! its own FIFO lock, held for the whole local-check / network / apply cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::OwnedMutexGuard;

use crate::errors::ExplorerResult;
use crate::mutations::{Mutation, MutationOutcome};
use crate::node::NodeId;
use crate::tree::{MoveUndo, TreeState};

/// Mutation applied locally, waiting for backend acknowledgment
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: String,
    pub mutation: Mutation,
    /// Milliseconds since the epoch
    pub timestamp: u64,
    /// Present for moves, which are the only optimistic mutations
    pub undo: Option<MoveUndo>,
}

#[derive(Debug, Default)]
pub struct PendingLedger {
    pending: Vec<PendingMutation>,
    next_id: u64,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the mutation to the tree right away and records it as pending
    pub fn apply_optimistic(
        &mut self,
        tree: &mut TreeState,
        mutation: Mutation,
    ) -> ExplorerResult<(String, MutationOutcome)> {
        let outcome = tree.apply(mutation.clone())?;

        self.next_id += 1;
        let id = format!("{}-{}", mutation.target(), self.next_id);
        let undo = match &outcome {
            MutationOutcome::Moved(moved) if moved.changed => Some(moved.undo.clone()),
            _ => None,
        };

        self.pending.push(PendingMutation {
            id: id.clone(),
            mutation,
            timestamp: current_timestamp(),
            undo,
        });
        tracing::debug!(mutation_id = %id, pending = self.pending.len(), "optimistic mutation applied");
        Ok((id, outcome))
    }

    /// Backend accepted the mutation
    pub fn confirm(&mut self, mutation_id: &str) -> Option<PendingMutation> {
        let index = self.pending.iter().position(|m| m.id == mutation_id)?;
        Some(self.pending.remove(index))
    }

    /// Backend refused the mutation: forget it and undo its local effect
    pub fn reject(&mut self, tree: &mut TreeState, mutation_id: &str) -> Option<PendingMutation> {
        let rejected = self.confirm(mutation_id)?;
        if let Some(undo) = &rejected.undo {
            tree.rollback_move(undo);
        }
        Some(rejected)
    }

    pub fn get(&self, mutation_id: &str) -> Option<&PendingMutation> {
        self.pending.iter().find(|m| m.id == mutation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Per-node FIFO locks
#[derive(Debug, Default)]
pub struct NodeQueues {
    locks: Mutex<HashMap<NodeId, Arc<tokio::sync::Mutex<()>>>>,
}

impl NodeQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the operations queued before on `node_id`; tokio's mutex is fair
    pub async fn acquire(&self, node_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(node_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drops the lock of a removed node; holders keep their guard
    pub fn forget(&self, node_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(node_id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
