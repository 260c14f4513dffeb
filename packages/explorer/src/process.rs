//! In-flight operations attached to a node (children fetch, content save,
//! rename). Observers render one busy indicator per distinct kind.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessKind {
    ChildrenFetching,
    ContentSaving,
    Renaming,
}

impl ProcessKind {
    /// Fixed id used for the kinds that never run twice on one node
    pub fn default_id(&self) -> &'static str {
        match self {
            ProcessKind::ChildrenFetching => "children-fetching",
            ProcessKind::ContentSaving => "content-saving",
            ProcessKind::Renaming => "renaming",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub kind: ProcessKind,
}

/// Small set of processes keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessList {
    processes: Vec<Process>,
}

impl ProcessList {
    /// Adds or replaces the process with the same id
    pub fn upsert(&mut self, process: Process) {
        self.processes.retain(|p| p.id != process.id);
        self.processes.push(process);
    }

    /// Returns whether a process was removed
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.processes.len();
        self.processes.retain(|p| p.id != id);
        before != self.processes.len()
    }

    pub fn contains_kind(&self, kind: ProcessKind) -> bool {
        self.processes.iter().any(|p| p.kind == kind)
    }

    /// Distinct kinds, in order of first appearance
    pub fn kinds(&self) -> Vec<ProcessKind> {
        let mut kinds = Vec::new();
        for process in &self.processes {
            if !kinds.contains(&process.kind) {
                kinds.push(process.kind);
            }
        }
        kinds
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
