// Per-metric data sources. Each owns its baselines and caches behind one lock.

mod cpu;
mod gpu;
pub mod paths;
mod process;
mod ram;

pub use cpu::{CpuSettings, CpuSource};
pub use gpu::{GpuSettings, GpuSource, GpuVendor, parse_gpu_usage};
pub use process::{
    LabelResolver, ProcessSettings, ProcessSource, ProcessTable, ProcfsProcessTable,
    RunningProcess, StaticLabels, parse_process_ticks,
};
pub use ram::{RamSettings, RamSource, parse_meminfo};

use crate::error::{SourceError, SourceResult};
use std::sync::{Mutex, MutexGuard};

/// OS aggregate memory totals in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTotals {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryTotals {
    /// Fraction of memory in use, 0..=1.
    pub fn pressure(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.total_bytes.saturating_sub(self.available_bytes) as f32 / self.total_bytes as f32
    }
}

/// Coarse OS-level memory query, used when the detailed counters are unusable.
pub trait SystemMemory: Send + Sync {
    fn query(&self) -> SourceResult<MemoryTotals>;
}

/// `SystemMemory` backed by sysinfo.
pub struct SysinfoMemory {
    sys: Mutex<sysinfo::System>,
}

impl Default for SysinfoMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoMemory {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl SystemMemory for SysinfoMemory {
    fn query(&self) -> SourceResult<MemoryTotals> {
        let mut sys = lock(&self.sys);
        sys.refresh_memory();
        let total_bytes = sys.total_memory();
        if total_bytes == 0 {
            return Err(SourceError::Unavailable("os memory totals".into()));
        }
        Ok(MemoryTotals {
            total_bytes,
            available_bytes: sys.available_memory(),
        })
    }
}

/// Fixed totals; for tests and hosts without a usable OS query.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub Option<MemoryTotals>);

impl SystemMemory for FixedMemory {
    fn query(&self) -> SourceResult<MemoryTotals> {
        self.0
            .ok_or_else(|| SourceError::Unavailable("os memory totals".into()))
    }
}

/// Locks source state, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| {
        tracing::warn!(operation = "lock", "source lock poisoned; recovering state");
        e.into_inner()
    })
}

/// Logical processor count as reported by the OS.
pub(crate) fn logical_cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_is_fraction_in_use() {
        let m = MemoryTotals {
            total_bytes: 1000,
            available_bytes: 250,
        };
        assert!((m.pressure() - 0.75).abs() < f32::EPSILON);
        let zero = MemoryTotals {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(zero.pressure(), 0.0);
    }

    #[test]
    fn fixed_memory_none_is_unavailable() {
        assert!(FixedMemory(None).query().is_err());
    }

    #[test]
    fn poisoned_lock_recovers_state() {
        let m = std::sync::Arc::new(Mutex::new(7u32));
        let poisoner = m.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(m.is_poisoned());
        *lock(&m) += 1;
        assert_eq!(*lock(&m), 8);
    }
}
