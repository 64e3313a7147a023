// GPU utilisation from vendor sysfs nodes, discovered once per run.

use super::cpu::read_first_temperature;
use super::lock;
use super::paths::{
    ADRENO_LOAD_PATHS, GENERIC_GPU_LOAD_PATHS, GPU_MEMORY_PATHS, GPU_THERMAL_PATHS,
    MALI_LOAD_PATHS,
};
use crate::cache::CacheEntry;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::device::DeviceSignals;
use crate::error::{SourceError, SourceResult};
use crate::models::{GpuSnapshot, clamp_percent};
use crate::reader::CounterReader;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuVendor {
    Adreno,
    Mali,
    Generic,
    #[default]
    Unknown,
}

/// Candidate families in probe order.
const CANDIDATES: &[(GpuVendor, &[&str])] = &[
    (GpuVendor::Adreno, ADRENO_LOAD_PATHS),
    (GpuVendor::Mali, MALI_LOAD_PATHS),
    (GpuVendor::Generic, GENERIC_GPU_LOAD_PATHS),
];

#[derive(Debug, Clone)]
pub struct GpuSettings {
    pub availability_ttl: Duration,
    pub metrics_ttl: Duration,
    /// Metrics TTL while power saving or on TV/low-power hardware.
    pub power_saving_ttl: Duration,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl GpuSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            availability_ttl: Duration::from_millis(config.cache.gpu_availability_ttl_ms),
            metrics_ttl: Duration::from_millis(config.cache.gpu_metrics_ttl_ms),
            power_saving_ttl: Duration::from_millis(config.cache.gpu_power_saving_ttl_ms),
        }
    }
}

#[derive(Debug, Clone)]
struct Discovered {
    path: String,
    vendor: GpuVendor,
}

struct GpuState {
    discovered: Option<Discovered>,
    discovery_runs: usize,
    availability: CacheEntry<bool>,
    metrics: CacheEntry<GpuSnapshot>,
    last_error: Option<SourceError>,
}

pub struct GpuSource {
    reader: Arc<dyn CounterReader>,
    device: Arc<DeviceSignals>,
    clock: Arc<dyn Clock>,
    settings: GpuSettings,
    state: Mutex<GpuState>,
}

impl GpuSource {
    pub fn new(
        reader: Arc<dyn CounterReader>,
        device: Arc<DeviceSignals>,
        clock: Arc<dyn Clock>,
        settings: GpuSettings,
    ) -> Self {
        let state = GpuState {
            discovered: None,
            discovery_runs: 0,
            availability: CacheEntry::new(settings.availability_ttl),
            metrics: CacheEntry::new(settings.metrics_ttl),
            last_error: None,
        };
        Self {
            reader,
            device,
            clock,
            settings,
            state: Mutex::new(state),
        }
    }

    /// Cached capability probe; re-checked once the availability TTL lapses.
    pub fn is_available(&self) -> bool {
        let mut state = lock(&self.state);
        self.check_available(&mut state, self.clock.now_ms())
    }

    pub fn vendor(&self) -> GpuVendor {
        let mut state = lock(&self.state);
        self.check_available(&mut state, self.clock.now_ms());
        state
            .discovered
            .as_ref()
            .map(|d| d.vendor)
            .unwrap_or_default()
    }

    /// Number of times candidate discovery has run.
    pub fn discovery_runs(&self) -> usize {
        lock(&self.state).discovery_runs
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.as_ref().map(|e| e.to_string())
    }

    pub fn sample(&self) -> GpuSnapshot {
        let mut state = lock(&self.state);
        let now = self.clock.now_ms();
        if !self.check_available(&mut state, now) {
            return GpuSnapshot::unavailable();
        }

        let ttl = if self.device.power_saving() {
            self.settings.power_saving_ttl
        } else {
            self.settings.metrics_ttl
        };
        state.metrics.set_ttl(ttl);
        if let Some(cached) = state.metrics.fresh(now) {
            return cached.clone();
        }

        let Some(path) = state.discovered.as_ref().map(|d| d.path.clone()) else {
            return GpuSnapshot::unavailable();
        };
        let usage = match self.read_usage(&path) {
            Ok(usage) => usage,
            Err(e @ SourceError::Unreadable { .. }) => {
                warn!(error = %e, operation = "gpu_sample", "gpu load node became unreadable");
                state.availability.store(false, now);
                state.metrics.invalidate();
                state.last_error = Some(e);
                return GpuSnapshot::unavailable();
            }
            Err(e) => {
                debug!(error = %e, operation = "gpu_sample", "serving previous gpu snapshot");
                state.last_error = Some(e);
                return state.metrics.stale().cloned().unwrap_or(GpuSnapshot {
                    is_available: true,
                    ..GpuSnapshot::default()
                });
            }
        };

        let (memory_used_bytes, memory_total_bytes) = self.read_memory();
        let temperature_c = read_first_temperature(self.reader.as_ref(), GPU_THERMAL_PATHS).ok();
        let snapshot = GpuSnapshot {
            usage_percent: usage,
            memory_used_bytes,
            memory_total_bytes,
            temperature_c,
            is_available: true,
        };
        trace!(usage, memory_used_bytes, "gpu sampled");
        state.metrics.store(snapshot.clone(), now);
        snapshot
    }

    fn check_available(&self, state: &mut GpuState, now: u64) -> bool {
        if let Some(available) = state.availability.fresh(now) {
            return *available;
        }
        let known_path = state.discovered.as_ref().map(|d| d.path.clone());
        let available = match known_path {
            // A found path is kept for the run; only its readability is re-checked.
            Some(path) => self.reader.is_readable(&path),
            None => match self.discover(state) {
                Some(found) => {
                    info!(
                        operation = "gpu_discover",
                        vendor = ?found.vendor,
                        path = found.path.as_str(),
                        "gpu monitoring available"
                    );
                    state.discovered = Some(found);
                    true
                }
                None => {
                    info!(operation = "gpu_discover", "gpu monitoring not available");
                    false
                }
            },
        };
        state.availability.store(available, now);
        available
    }

    fn discover(&self, state: &mut GpuState) -> Option<Discovered> {
        state.discovery_runs += 1;
        CANDIDATES.iter().find_map(|(vendor, paths)| {
            paths
                .iter()
                .find(|p| self.reader.is_readable(p))
                .map(|p| Discovered {
                    path: (*p).to_string(),
                    vendor: *vendor,
                })
        })
    }

    fn read_usage(&self, path: &str) -> SourceResult<f32> {
        let text = self
            .reader
            .read_text(path)
            .ok_or_else(|| SourceError::unreadable(path))?;
        parse_gpu_usage(&text)
            .ok_or_else(|| SourceError::parse(path, format!("no usage in '{}'", text.trim())))
    }

    fn read_memory(&self) -> (u64, u64) {
        GPU_MEMORY_PATHS
            .iter()
            .find_map(|p| self.reader.read_text(p).and_then(|t| parse_gpu_memory(&t)))
            .unwrap_or((0, 0))
    }
}

/// Accepts `75`, `75%`, `busy: 75` and the `busy idle` tick pair. Non-numeric
/// characters are stripped as a last resort; `None` when nothing numeric is left.
pub fn parse_gpu_usage(value: &str) -> Option<f32> {
    let value = value.trim();
    if value.contains(char::is_whitespace) && !value.contains(':') {
        let mut parts = value.split_whitespace();
        if let (Some(Ok(busy)), Some(Ok(idle))) = (
            parts.next().map(str::parse::<u64>),
            parts.next().map(str::parse::<u64>),
        ) {
            let total = busy.saturating_add(idle);
            if total == 0 {
                return Some(0.0);
            }
            return Some(clamp_percent((busy as f64 / total as f64 * 100.0) as f32));
        }
    }
    let labeled = value.rsplit(':').next().unwrap_or(value);
    let numeric: String = labeled
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    numeric.parse::<f32>().ok().map(clamp_percent)
}

/// "used total" in bytes.
fn parse_gpu_memory(text: &str) -> Option<(u64, u64)> {
    let mut values = text.split_whitespace().map(str::parse::<u64>);
    match (values.next(), values.next()) {
        (Some(Ok(used)), Some(Ok(total))) => Some((used, total)),
        _ => None,
    }
}
