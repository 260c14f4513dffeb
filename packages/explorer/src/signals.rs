//! # Node Signals
//!
//! Each node owns a multicast channel for ephemeral UI signals (rename editor,
//! saving indicator, spinners). Signals are fire-and-forget: late subscribers
//! only get the latest process snapshot, never past signals.
//!
//! Channels are keyed by node id, so they survive node replacement and are
//! dropped when the node leaves the tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::node::NodeId;
use crate::process::{Process, ProcessKind, ProcessList};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum NodeSignal {
    RenameRequested,
    ContentChanged,
    ContentSaving,
    ContentSaved,
    ChildrenFetching,
    ProcessAdded { process: Process },
    ProcessRemoved { id: String },
}

/// Receiving side of one node's channel
#[derive(Debug)]
pub struct NodeSubscription {
    pub signals: broadcast::Receiver<NodeSignal>,
    /// Replays the current process list on subscribe
    pub processes: watch::Receiver<ProcessList>,
}

#[derive(Debug)]
struct NodeChannel {
    signals: broadcast::Sender<NodeSignal>,
    processes: watch::Sender<ProcessList>,
}

impl NodeChannel {
    fn new(capacity: usize) -> Self {
        let (signals, _) = broadcast::channel(capacity);
        let (processes, _) = watch::channel(ProcessList::default());
        Self { signals, processes }
    }
}

#[derive(Debug)]
pub struct SignalBus {
    channels: HashMap<NodeId, NodeChannel>,
    capacity: usize,
    next_process_id: u64,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: HashMap::new(),
            capacity: capacity.max(1),
            next_process_id: 0,
        }
    }

    pub fn register(&mut self, node_id: &str) {
        let capacity = self.capacity;
        self.channels
            .entry(node_id.to_string())
            .or_insert_with(|| NodeChannel::new(capacity));
    }

    /// Drops the node's channel; subscribers see the stream close
    pub fn unregister(&mut self, node_id: &str) {
        self.channels.remove(node_id);
    }

    pub fn subscribe(&self, node_id: &str) -> Option<NodeSubscription> {
        self.channels.get(node_id).map(|channel| NodeSubscription {
            signals: channel.signals.subscribe(),
            processes: channel.processes.subscribe(),
        })
    }

    /// Sends to current subscribers; no-op without subscribers
    pub fn emit(&self, node_id: &str, signal: NodeSignal) {
        if let Some(channel) = self.channels.get(node_id) {
            let _ = channel.signals.send(signal);
        }
    }

    /// Attaches a process, generating an id when none is given.
    ///
    /// A process with the same id is replaced, not duplicated.
    pub fn add_process(&mut self, node_id: &str, kind: ProcessKind, id: Option<&str>) -> Option<String> {
        let pid = match id {
            Some(id) => id.to_string(),
            None => {
                self.next_process_id += 1;
                format!("{}-{}", kind.default_id(), self.next_process_id)
            }
        };
        let channel = self.channels.get(node_id)?;
        let process = Process {
            id: pid.clone(),
            kind,
        };
        channel
            .processes
            .send_modify(|list| list.upsert(process.clone()));
        let _ = channel.signals.send(NodeSignal::ProcessAdded { process });
        Some(pid)
    }

    pub fn remove_process(&mut self, node_id: &str, id: &str) -> bool {
        let Some(channel) = self.channels.get(node_id) else {
            return false;
        };
        let removed = channel.processes.send_if_modified(|list| list.remove(id));
        if removed {
            let _ = channel.signals.send(NodeSignal::ProcessRemoved { id: id.to_string() });
        }
        removed
    }

    pub fn processes(&self, node_id: &str) -> ProcessList {
        self.channels
            .get(node_id)
            .map(|channel| channel.processes.borrow().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_process_twice_keeps_one_entry() {
        let mut bus = SignalBus::new(8);
        bus.register("n1");

        bus.add_process("n1", ProcessKind::ChildrenFetching, Some("x"));
        bus.add_process("n1", ProcessKind::ChildrenFetching, Some("x"));

        let processes = bus.processes("n1");
        assert_eq!(processes.len(), 1);
        assert_eq!(processes.iter().next().unwrap().id, "x");
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let mut bus = SignalBus::new(8);
        bus.register("n1");

        let a = bus.add_process("n1", ProcessKind::ContentSaving, None).unwrap();
        let b = bus.add_process("n1", ProcessKind::ContentSaving, None).unwrap();

        assert_ne!(a, b);
        assert_eq!(bus.processes("n1").len(), 2);
    }

    #[test]
    fn test_late_subscriber_sees_process_snapshot_only() {
        let mut bus = SignalBus::new(8);
        bus.register("n1");
        bus.emit("n1", NodeSignal::RenameRequested);
        bus.add_process("n1", ProcessKind::Renaming, None);

        let mut sub = bus.subscribe("n1").unwrap();
        assert!(sub.signals.try_recv().is_err());
        assert!(sub.processes.borrow().contains_kind(ProcessKind::Renaming));
    }

    #[test]
    fn test_remove_process_notifies() {
        let mut bus = SignalBus::new(8);
        bus.register("n1");
        let pid = bus.add_process("n1", ProcessKind::Renaming, None).unwrap();

        let mut sub = bus.subscribe("n1").unwrap();
        assert!(bus.remove_process("n1", &pid));
        assert_eq!(
            sub.signals.try_recv().unwrap(),
            NodeSignal::ProcessRemoved { id: pid.clone() }
        );
        assert!(!bus.remove_process("n1", &pid));
    }

    #[test]
    fn test_unknown_node() {
        let mut bus = SignalBus::new(8);
        assert!(bus.subscribe("missing").is_none());
        assert!(bus.add_process("missing", ProcessKind::Renaming, None).is_none());
        assert!(!bus.remove_process("missing", "x"));
    }
}
