// GPU snapshot model

use serde::{Deserialize, Serialize};

/// When `is_available` is false every numeric field is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuSnapshot {
    pub usage_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub temperature_c: Option<f32>,
    pub is_available: bool,
}

impl GpuSnapshot {
    pub fn unavailable() -> Self {
        Self::default()
    }
}
