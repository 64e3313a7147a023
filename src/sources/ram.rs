// Memory totals from /proc/meminfo, with the OS aggregate query as fallback
// (or as primary on TV-class devices, where meminfo is unreliable).

use super::paths::PROC_MEMINFO;
use super::{SystemMemory, lock};
use crate::cache::CacheEntry;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::device::{DeviceClass, DeviceSignals};
use crate::error::{SourceError, SourceResult};
use crate::models::RamSnapshot;
use crate::reader::CounterReader;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace};

#[derive(Debug, Clone)]
pub struct RamSettings {
    pub ttl: Duration,
    pub power_saving_ttl: Duration,
}

impl Default for RamSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RamSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.cache.ram_ttl_ms),
            power_saving_ttl: Duration::from_millis(config.cache.ram_power_saving_ttl_ms),
        }
    }
}

struct RamState {
    cache: CacheEntry<RamSnapshot>,
    total_logged: bool,
    last_error: Option<SourceError>,
}

pub struct RamSource {
    reader: Arc<dyn CounterReader>,
    memory: Arc<dyn SystemMemory>,
    device: Arc<DeviceSignals>,
    clock: Arc<dyn Clock>,
    settings: RamSettings,
    state: Mutex<RamState>,
}

impl RamSource {
    pub fn new(
        reader: Arc<dyn CounterReader>,
        memory: Arc<dyn SystemMemory>,
        device: Arc<DeviceSignals>,
        clock: Arc<dyn Clock>,
        settings: RamSettings,
    ) -> Self {
        let state = RamState {
            cache: CacheEntry::new(settings.ttl),
            total_logged: false,
            last_error: None,
        };
        Self {
            reader,
            memory,
            device,
            clock,
            settings,
            state: Mutex::new(state),
        }
    }

    pub fn sample(&self) -> RamSnapshot {
        let mut state = lock(&self.state);
        let now = self.clock.now_ms();
        let ttl = self.current_ttl();
        state.cache.set_ttl(ttl);
        if let Some(cached) = state.cache.fresh(now) {
            return *cached;
        }

        match self.read() {
            Ok(snapshot) => {
                if !state.total_logged {
                    info!(
                        operation = "ram_sample",
                        total_mb = snapshot.total_mb(),
                        "total memory detected"
                    );
                    state.total_logged = true;
                }
                state.cache.store(snapshot, now);
                snapshot
            }
            Err(e) => {
                debug!(error = %e, operation = "ram_sample", "memory totals unreadable");
                state.last_error = Some(e);
                // A zero-total reading is never served, stale or not.
                state
                    .cache
                    .stale()
                    .copied()
                    .filter(|s| s.total_bytes > 0)
                    .unwrap_or_default()
            }
        }
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.as_ref().map(|e| e.to_string())
    }

    /// TV and low-power classes always count as power saving.
    fn current_ttl(&self) -> Duration {
        if self.device.power_saving() {
            self.settings.power_saving_ttl
        } else {
            self.settings.ttl
        }
    }

    fn read(&self) -> SourceResult<RamSnapshot> {
        let from_meminfo = || -> SourceResult<RamSnapshot> {
            let text = self
                .reader
                .read_text(PROC_MEMINFO)
                .ok_or_else(|| SourceError::unreadable(PROC_MEMINFO))?;
            parse_meminfo(&text)
        };
        let from_os = || -> SourceResult<RamSnapshot> {
            let totals = self.memory.query()?;
            Ok(RamSnapshot::from_total_available(
                totals.total_bytes,
                totals.available_bytes,
            ))
        };

        let strategies: [(&str, &dyn Fn() -> SourceResult<RamSnapshot>); 2] =
            if self.device.class() == DeviceClass::Tv {
                [("os_query", &from_os), ("meminfo", &from_meminfo)]
            } else {
                [("meminfo", &from_meminfo), ("os_query", &from_os)]
            };

        let mut last = SourceError::Unavailable("memory totals".into());
        for (name, strategy) in strategies {
            match strategy() {
                Ok(snapshot) => {
                    trace!(strategy = name, used_mb = snapshot.used_mb(), "ram sampled");
                    return Ok(snapshot);
                }
                Err(e) => {
                    trace!(strategy = name, error = %e, "ram strategy failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

/// Parses meminfo (kB values) into bytes. A missing `MemAvailable` is derived
/// as free + buffers + cached + reclaimable slab − shmem.
pub fn parse_meminfo(text: &str) -> SourceResult<RamSnapshot> {
    let mut total = None;
    let mut free = 0u64;
    let mut available = None;
    let mut buffers = 0u64;
    let mut cached = 0u64;
    let mut reclaimable = 0u64;
    let mut shmem = 0u64;

    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kb) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        match key.trim() {
            "MemTotal" => total = Some(kb),
            "MemFree" => free = kb,
            "MemAvailable" => available = Some(kb),
            "Buffers" => buffers = kb,
            "Cached" => cached = kb,
            "SReclaimable" => reclaimable = kb,
            "Shmem" => shmem = kb,
            _ => {}
        }
    }

    let total = total
        .filter(|t| *t > 0)
        .ok_or_else(|| SourceError::parse(PROC_MEMINFO, "MemTotal missing or zero"))?;
    let available = available.unwrap_or_else(|| {
        free.saturating_add(buffers)
            .saturating_add(cached)
            .saturating_add(reclaimable)
            .saturating_sub(shmem)
    });
    Ok(RamSnapshot::from_total_available(
        total.saturating_mul(1024),
        available.saturating_mul(1024),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::device::PowerState;
    use crate::reader::FakeReader;
    use crate::sources::{FixedMemory, MemoryTotals};

    const DERIVED: &str = "MemTotal:        8000000 kB\n\
                           MemFree:         1000000 kB\n\
                           Buffers:          200000 kB\n\
                           Cached:          1500000 kB\n\
                           SReclaimable:     300000 kB\n\
                           Shmem:            100000 kB\n";

    fn os_totals() -> FixedMemory {
        FixedMemory(Some(MemoryTotals {
            total_bytes: 4_000,
            available_bytes: 1_000,
        }))
    }

    fn source(
        reader: Arc<FakeReader>,
        memory: FixedMemory,
        device: DeviceSignals,
    ) -> (RamSource, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let src = RamSource::new(
            reader,
            Arc::new(memory),
            Arc::new(device),
            clock.clone(),
            RamSettings::default(),
        );
        (src, clock)
    }

    #[test]
    fn derives_available_when_absent() {
        let snap = parse_meminfo(DERIVED).unwrap();
        assert_eq!(snap.total_bytes, 8_000_000 * 1024);
        assert_eq!(snap.available_bytes, 2_900_000 * 1024);
        assert_eq!(snap.used_bytes, (8_000_000 - 2_900_000) * 1024);
    }

    #[test]
    fn prefers_reported_available() {
        let text = format!("{DERIVED}MemAvailable:    3000000 kB\n");
        let snap = parse_meminfo(&text).unwrap();
        assert_eq!(snap.available_bytes, 3_000_000 * 1024);
    }

    #[test]
    fn shmem_larger_than_sum_does_not_underflow() {
        let snap = parse_meminfo("MemTotal: 100 kB\nMemFree: 10 kB\nShmem: 500 kB\n").unwrap();
        assert_eq!(snap.available_bytes, 0);
        assert_eq!(snap.used_bytes, 100 * 1024);
    }

    #[test]
    fn zero_or_missing_total_is_a_parse_error() {
        assert!(matches!(
            parse_meminfo("MemTotal: 0 kB\n"),
            Err(SourceError::Parse { .. })
        ));
        assert!(parse_meminfo("MemFree: 10 kB\n").is_err());
        assert!(parse_meminfo("").is_err());
    }

    #[test]
    fn falls_back_to_os_query() {
        let reader = Arc::new(FakeReader::new());
        let (src, _) = source(reader, os_totals(), DeviceSignals::new(DeviceClass::Mobile));
        let snap = src.sample();
        assert_eq!(snap.total_bytes, 4_000);
        assert_eq!(snap.used_bytes, 3_000);
    }

    #[test]
    fn tv_uses_os_query_first() {
        let reader = Arc::new(FakeReader::new());
        reader.set(PROC_MEMINFO, DERIVED);
        let (src, _) = source(reader.clone(), os_totals(), DeviceSignals::new(DeviceClass::Tv));
        assert_eq!(src.sample().total_bytes, 4_000);
        assert_eq!(reader.read_count(PROC_MEMINFO), 0);
    }

    #[test]
    fn ttl_depends_on_device_conditions() {
        let reader = Arc::new(FakeReader::new());
        reader.set(PROC_MEMINFO, "MemTotal: 100 kB\nMemAvailable: 50 kB\n");
        let (src, clock) = source(reader.clone(), FixedMemory(None), DeviceSignals::new(DeviceClass::Mobile));
        src.sample();
        clock.advance(499);
        src.sample();
        assert_eq!(reader.read_count(PROC_MEMINFO), 1);
        clock.advance(1);
        src.sample();
        assert_eq!(reader.read_count(PROC_MEMINFO), 2);

        let saving = PowerState {
            low_power_mode: true,
            on_battery: true,
            ..PowerState::default()
        };
        let (src, clock) = source(
            reader.clone(),
            FixedMemory(None),
            DeviceSignals::with_power(DeviceClass::Mobile, saving),
        );
        src.sample();
        clock.advance(1_999);
        src.sample();
        assert_eq!(reader.read_count(PROC_MEMINFO), 3);
    }

    #[test]
    fn tv_in_low_power_mode_uses_power_saving_ttl() {
        let reader = Arc::new(FakeReader::new());
        reader.set(PROC_MEMINFO, "MemTotal: 100 kB\nMemAvailable: 50 kB\n");
        let power = PowerState {
            on_battery: true,
            battery_percent: 5,
            low_power_mode: true,
            ..PowerState::default()
        };
        let device = DeviceSignals::with_power(DeviceClass::Tv, power);
        assert!(device.power_saving());
        let (src, clock) = source(reader.clone(), FixedMemory(None), device);
        src.sample();
        clock.advance(1_000);
        src.sample();
        assert_eq!(reader.read_count(PROC_MEMINFO), 1);
        clock.advance(1_000);
        src.sample();
        assert_eq!(reader.read_count(PROC_MEMINFO), 2);
    }

    #[test]
    fn tv_on_external_power_still_uses_power_saving_ttl() {
        let reader = Arc::new(FakeReader::new());
        let (src, clock) = source(reader, os_totals(), DeviceSignals::new(DeviceClass::Tv));
        let first = src.sample();
        clock.advance(1_999);
        assert_eq!(src.sample(), first);
        assert_eq!(src.current_ttl(), Duration::from_millis(2_000));
    }

    #[test]
    fn failure_serves_stale_then_default() {
        let reader = Arc::new(FakeReader::new());
        reader.set(PROC_MEMINFO, "MemTotal: 100 kB\nMemAvailable: 40 kB\n");
        let (src, clock) = source(reader.clone(), FixedMemory(None), DeviceSignals::new(DeviceClass::Mobile));
        let first = src.sample();
        reader.remove(PROC_MEMINFO);
        clock.advance(5_000);
        assert_eq!(src.sample(), first);
        assert!(src.last_error().is_some());

        let (empty, _) = source(
            Arc::new(FakeReader::new()),
            FixedMemory(None),
            DeviceSignals::new(DeviceClass::Mobile),
        );
        assert_eq!(empty.sample(), RamSnapshot::default());
    }
}
