// RAM snapshot model

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RamSnapshot {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl RamSnapshot {
    /// Builds a snapshot with `used = max(0, total - available)`.
    pub fn from_total_available(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            used_bytes: total_bytes.saturating_sub(available_bytes),
            total_bytes,
            available_bytes,
        }
    }

    pub fn usage_percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64 * 100.0) as f32
    }

    pub fn used_mb(&self) -> u64 {
        self.used_bytes / MIB
    }

    pub fn total_mb(&self) -> u64 {
        self.total_bytes / MIB
    }

    pub fn available_mb(&self) -> u64 {
        self.available_bytes / MIB
    }
}
