// Shared test helpers

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use sysoverlay::clock::Clock;
use sysoverlay::config::AppConfig;
use sysoverlay::device::DeviceSignals;
use sysoverlay::error::{SourceError, SourceResult};
use sysoverlay::reader::FakeReader;
use sysoverlay::repo::Platform;
use sysoverlay::sources::paths::{ADRENO_LOAD_PATHS, PROC_MEMINFO, PROC_STAT};
use sysoverlay::sources::{
    FixedMemory, MemoryTotals, ProcessTable, RunningProcess, StaticLabels,
};

pub const MEMINFO: &str = "MemTotal:        8000000 kB\n\
                           MemFree:         1000000 kB\n\
                           Buffers:          200000 kB\n\
                           Cached:          1500000 kB\n\
                           SReclaimable:     300000 kB\n\
                           Shmem:            100000 kB\n";

pub const STAT_FIRST: &str = "cpu  100 0 100 700 0 0 0\ncpu0 50 0 50 350 0 0 0\ncpu1 50 0 50 350 0 0 0\n";
pub const STAT_SECOND: &str = "cpu  120 0 110 760 0 0 0\ncpu0 70 0 50 350 0 0 0\ncpu1 50 0 60 410 0 0 0\n";

/// Process table with fixed `(pid, name, pss_kb)` rows.
#[derive(Default)]
pub struct StaticTable {
    rows: Mutex<Vec<(u32, String, u64)>>,
}

impl StaticTable {
    pub fn new(rows: &[(u32, &str, u64)]) -> Self {
        let table = Self::default();
        table.set(rows);
        table
    }

    pub fn set(&self, rows: &[(u32, &str, u64)]) {
        *self.rows.lock().unwrap() = rows
            .iter()
            .map(|(pid, name, kb)| (*pid, name.to_string(), *kb))
            .collect();
    }
}

impl ProcessTable for StaticTable {
    fn running_processes(&self) -> SourceResult<Vec<RunningProcess>> {
        let rows = self.rows.lock().unwrap();
        if rows.is_empty() {
            return Err(SourceError::Enumeration("no rows".into()));
        }
        Ok(rows
            .iter()
            .map(|(pid, name, _)| RunningProcess {
                pid: *pid,
                name: name.clone(),
            })
            .collect())
    }

    fn proportional_memory_kb(&self, pids: &[u32]) -> Vec<Option<u64>> {
        let rows = self.rows.lock().unwrap();
        pids.iter()
            .map(|pid| rows.iter().find(|(p, _, _)| p == pid).map(|(_, _, kb)| *kb))
            .collect()
    }
}

/// Defaults with no settle delay, no adaptation and one package label.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.cpu.settle_delay_ms = 0;
    config.polling.adaptive = false;
    config
        .processes
        .labels
        .insert("com.example.mail".into(), "Mail".into());
    config
}

pub struct Fixture {
    pub reader: Arc<FakeReader>,
    pub table: Arc<StaticTable>,
    pub platform: Platform,
}

/// Fake counters for a two-core device with an Adreno GPU. `/proc/stat` is left
/// unscripted so tests control the reads.
pub fn fixture(config: &AppConfig, device: Arc<DeviceSignals>, clock: Arc<dyn Clock>) -> Fixture {
    let reader = Arc::new(FakeReader::new());
    reader.set(PROC_MEMINFO, MEMINFO);
    reader.set(ADRENO_LOAD_PATHS[1], "75 25");
    let table = Arc::new(StaticTable::new(&[
        (100, "com.example.mail", 300 * 1024),
        (200, "launcher", 120 * 1024),
        (300, "com.example.mail:push", 40 * 1024),
        (400, "tiny", 1024),
    ]));
    let platform = Platform {
        reader: reader.clone(),
        memory: Arc::new(FixedMemory(Some(MemoryTotals {
            total_bytes: 4 << 30,
            available_bytes: 1 << 30,
        }))),
        processes: table.clone(),
        labels: Arc::new(StaticLabels::new(config.processes.labels.clone())),
        device,
        clock,
    };
    Fixture {
        reader,
        table,
        platform,
    }
}

pub fn script_stat_pair(reader: &FakeReader) {
    reader.push(PROC_STAT, STAT_FIRST);
    reader.push(PROC_STAT, STAT_SECOND);
}
