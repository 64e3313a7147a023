// CPU snapshot model

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSnapshot {
    /// 0..=100, clamped.
    pub overall_usage_percent: f32,
    /// One entry per core; length is fixed once the core count is known.
    pub core_usage_percent: Vec<f32>,
    /// 0 when unknown.
    pub frequency_hz: u64,
    pub temperature_c: Option<f32>,
}
