// Per-process record and top-N ranking

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// Package or process name as reported by the OS, including any `:suffix`.
    pub process_identifier: String,
    pub display_name: String,
    pub memory_usage_mb: u64,
    pub cpu_usage_percent: f32,
    pub os_process_id: u32,
}

/// Entries sorted by descending `memory_usage_mb`, at most the requested N.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRanking {
    pub processes: Vec<ProcessRecord>,
    /// Processes that passed the memory threshold before truncation.
    pub total_observed_count: usize,
}

impl ProcessRanking {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Same ranking cut down to `n` entries.
    pub fn truncated(&self, n: usize) -> Self {
        Self {
            processes: self.processes.iter().take(n).cloned().collect(),
            total_observed_count: self.total_observed_count,
        }
    }
}
