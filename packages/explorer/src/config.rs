use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Explorer tuning, usually embedded in the application config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplorerConfig {
    /// Spacing used when a sibling list has to be renumbered
    pub renumber_step: f64,

    /// Children per query; every page is still fetched before a node counts as resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,

    /// Buffer of the structural-change stream
    pub event_capacity: usize,

    /// Buffer of each node's signal stream
    pub signal_capacity: usize,

    /// Quiet period before an edited content is saved
    pub save_debounce_ms: u64,
}

impl ExplorerConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            renumber_step: 1000.0,
            page_size: None,
            event_capacity: 256,
            signal_capacity: 16,
            save_debounce_ms: 1000,
        }
    }
}
