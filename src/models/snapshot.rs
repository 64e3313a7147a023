// Combined per-cycle snapshot

use serde::{Deserialize, Serialize};

use super::{CpuSnapshot, GpuSnapshot, ProcessRanking, RamSnapshot};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub cpu: CpuSnapshot,
    pub gpu: GpuSnapshot,
    pub ram: RamSnapshot,
    pub process_ranking: ProcessRanking,
    pub timestamp_ms: u64,
}
