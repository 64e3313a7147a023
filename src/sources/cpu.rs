// CPU utilisation from /proc/stat tick deltas, with an estimation ladder for
// devices whose policy hides the statistics interface.

use super::paths::{
    CPU_THERMAL_PATHS, CPU0_CUR_FREQ_KHZ, PROC_LOADAVG, PROC_STAT, normalize_temperature,
};
use super::{SystemMemory, lock, logical_cpu_count};
use crate::cache::CacheEntry;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{SourceError, SourceResult};
use crate::models::{CpuSnapshot, clamp_percent};
use crate::reader::CounterReader;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// /proc/stat lines read at most; per-cpu lines always come first.
const STAT_MAX_LINES: usize = 512;

#[derive(Debug, Clone)]
pub struct CpuSettings {
    pub settle_delay: Duration,
    pub high_load_threshold: f32,
    pub high_load_cycles: u32,
    pub static_info_ttl: Duration,
}

impl Default for CpuSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl CpuSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.cpu.settle_delay_ms),
            high_load_threshold: config.cpu.high_load_threshold,
            high_load_cycles: config.cpu.high_load_cycles,
            static_info_ttl: Duration::from_millis(config.cache.static_info_ttl_ms),
        }
    }
}

/// Cumulative ticks from one /proc/stat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TickCounters {
    pub total: u64,
    pub idle: u64,
}

#[derive(Debug, Clone, Copy)]
struct CounterBaseline {
    counters: TickCounters,
    at_ms: u64,
}

/// Aggregate line plus `(core index, counters)` for each `cpuN` line.
#[derive(Debug, Clone, PartialEq)]
struct StatFrame {
    aggregate: TickCounters,
    cores: Vec<(usize, TickCounters)>,
}

struct CpuState {
    overall: Option<CounterBaseline>,
    cores: Vec<Option<CounterBaseline>>,
    core_count: Option<usize>,
    last_good: Option<CpuSnapshot>,
    high_load_streak: u32,
    frequency_khz: CacheEntry<u64>,
    temperature: CacheEntry<f32>,
    estimating: bool,
    last_error: Option<SourceError>,
}

pub struct CpuSource {
    reader: Arc<dyn CounterReader>,
    memory: Arc<dyn SystemMemory>,
    clock: Arc<dyn Clock>,
    settings: CpuSettings,
    state: Mutex<CpuState>,
}

impl CpuSource {
    pub fn new(
        reader: Arc<dyn CounterReader>,
        memory: Arc<dyn SystemMemory>,
        clock: Arc<dyn Clock>,
        settings: CpuSettings,
    ) -> Self {
        let state = CpuState {
            overall: None,
            cores: Vec::new(),
            core_count: None,
            last_good: None,
            high_load_streak: 0,
            frequency_khz: CacheEntry::new(settings.static_info_ttl),
            temperature: CacheEntry::new(settings.static_info_ttl),
            estimating: false,
            last_error: None,
        };
        Self {
            reader,
            memory,
            clock,
            settings,
            state: Mutex::new(state),
        }
    }

    /// Never fails. On an internal error the previous snapshot (or a zeroed one) is returned.
    pub fn sample(&self) -> CpuSnapshot {
        let mut state = lock(&self.state);
        let result = match self.read_stat() {
            Ok(frame) => self.sample_counters(&mut state, frame),
            // A malformed read keeps the last snapshot; only a missing interface estimates.
            Err(e) if !matches!(e, SourceError::Unreadable { .. }) => Err(e),
            Err(e) => {
                if !state.estimating {
                    warn!(error = %e, operation = "cpu_sample", "cpu statistics unreadable; estimating");
                    state.estimating = true;
                }
                state.last_error = Some(e);
                Ok(self.estimate(&mut state))
            }
        };

        match result {
            Ok(mut snapshot) => {
                let now = self.clock.now_ms();
                snapshot.frequency_hz = self.frequency_hz(&mut state, now);
                snapshot.temperature_c = self.temperature(&mut state, now);
                if snapshot.overall_usage_percent > self.settings.high_load_threshold {
                    state.high_load_streak = state.high_load_streak.saturating_add(1);
                } else {
                    state.high_load_streak = 0;
                }
                state.last_good = Some(snapshot.clone());
                snapshot
            }
            Err(e) => {
                debug!(error = %e, operation = "cpu_sample", "serving previous cpu snapshot");
                state.last_error = Some(e);
                state.last_good.clone().unwrap_or_default()
            }
        }
    }

    /// True once usage has exceeded the threshold for more than `high_load_cycles`
    /// consecutive samples; cleared by the first sample at or below it.
    pub fn is_sustained_high_load(&self) -> bool {
        lock(&self.state).high_load_streak > self.settings.high_load_cycles
    }

    pub fn core_count(&self) -> usize {
        lock(&self.state).core_count.unwrap_or_else(logical_cpu_count)
    }

    /// True while /proc/stat is unreadable and values are estimates.
    pub fn is_estimating(&self) -> bool {
        lock(&self.state).estimating
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.as_ref().map(|e| e.to_string())
    }

    fn sample_counters(&self, state: &mut CpuState, frame: StatFrame) -> SourceResult<CpuSnapshot> {
        if state.estimating {
            info!(operation = "cpu_sample", "cpu statistics readable again");
            state.estimating = false;
        }

        let frame = match state.overall {
            Some(_) => frame,
            None => {
                // No baseline yet: seed it and take a second reading so the first
                // snapshot is still a real delta.
                self.seed(state, &frame);
                if !self.settings.settle_delay.is_zero() {
                    std::thread::sleep(self.settings.settle_delay);
                }
                self.read_stat()?
            }
        };

        let now = self.clock.now_ms();
        let Some(prev) = state.overall else {
            return Err(SourceError::parse(PROC_STAT, "aggregate baseline missing"));
        };
        let overall = usage_between(prev.counters, frame.aggregate);
        trace!(
            elapsed_ms = now.saturating_sub(prev.at_ms),
            overall,
            "cpu delta"
        );
        state.overall = Some(CounterBaseline {
            counters: frame.aggregate,
            at_ms: now,
        });

        let core_count = *state
            .core_count
            .get_or_insert_with(|| detect_core_count(&frame));
        if state.cores.len() < core_count {
            state.cores.resize(core_count, None);
        }
        let mut cores = vec![0.0; core_count];
        for (index, counters) in frame.cores {
            if index >= core_count {
                continue;
            }
            if let Some(prev) = state.cores[index] {
                cores[index] = usage_between(prev.counters, counters);
            }
            state.cores[index] = Some(CounterBaseline {
                counters,
                at_ms: now,
            });
        }

        Ok(CpuSnapshot {
            overall_usage_percent: overall,
            core_usage_percent: cores,
            frequency_hz: 0,
            temperature_c: None,
        })
    }

    fn seed(&self, state: &mut CpuState, frame: &StatFrame) {
        let now = self.clock.now_ms();
        state.overall = Some(CounterBaseline {
            counters: frame.aggregate,
            at_ms: now,
        });
        let core_count = *state
            .core_count
            .get_or_insert_with(|| detect_core_count(frame));
        state.cores = vec![None; core_count];
        for (index, counters) in &frame.cores {
            if let Some(slot) = state.cores.get_mut(*index) {
                *slot = Some(CounterBaseline {
                    counters: *counters,
                    at_ms: now,
                });
            }
        }
        info!(
            operation = "cpu_baseline",
            cores = core_count,
            total = frame.aggregate.total,
            idle = frame.aggregate.idle,
            "cpu baseline initialized"
        );
    }

    /// Tries each read strategy in order and parses the first non-empty result.
    fn read_stat(&self) -> SourceResult<StatFrame> {
        let strategies: [(&str, StatReadFn); 3] = [
            ("direct", read_stat_direct),
            ("buffered", read_stat_buffered),
            ("lossy", read_stat_lossy),
        ];
        for (name, read) in strategies {
            match read(self.reader.as_ref()) {
                Some(lines) if !lines.is_empty() => {
                    trace!(strategy = name, lines = lines.len(), "cpu statistics read");
                    return parse_stat(&lines);
                }
                _ => trace!(strategy = name, "cpu statistics read failed"),
            }
        }
        Err(SourceError::unreadable(PROC_STAT))
    }

    fn estimate(&self, state: &mut CpuState) -> CpuSnapshot {
        let now = self.clock.now_ms();
        let cores = *state.core_count.get_or_insert_with(logical_cpu_count);
        let estimators: [(&str, &dyn Fn() -> SourceResult<f32>); 2] = [
            ("loadavg", &|| self.estimate_from_loadavg(cores)),
            ("memory_pressure", &|| -> SourceResult<f32> {
                let totals = self.memory.query()?;
                Ok(memory_pressure_estimate(totals.pressure(), now))
            }),
        ];

        let mut overall = None;
        for (name, estimator) in estimators {
            match estimator() {
                Ok(v) => {
                    debug!(estimator = name, usage = v, "cpu usage estimated");
                    overall = Some(v);
                    break;
                }
                Err(e) => trace!(estimator = name, error = %e, "cpu estimator failed"),
            }
        }
        let overall = overall.unwrap_or_else(|| idle_estimate(now));

        CpuSnapshot {
            overall_usage_percent: overall,
            core_usage_percent: synthesize_core_usage(overall, cores),
            frequency_hz: 0,
            temperature_c: None,
        }
    }

    fn estimate_from_loadavg(&self, cores: usize) -> SourceResult<f32> {
        let text = self
            .reader
            .read_text(PROC_LOADAVG)
            .ok_or_else(|| SourceError::unreadable(PROC_LOADAVG))?;
        let load = text
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| *v >= 0.0)
            .ok_or_else(|| SourceError::parse(PROC_LOADAVG, format!("bad load field in '{}'", text.trim())))?;
        Ok(loadavg_estimate(load, cores))
    }

    fn frequency_hz(&self, state: &mut CpuState, now: u64) -> u64 {
        let khz = state.frequency_khz.get_or_refresh(now, || {
            let text = self
                .reader
                .read_text(CPU0_CUR_FREQ_KHZ)
                .ok_or_else(|| SourceError::unreadable(CPU0_CUR_FREQ_KHZ))?;
            text.trim()
                .parse::<u64>()
                .map_err(|e| SourceError::parse(CPU0_CUR_FREQ_KHZ, e.to_string()))
        });
        match khz {
            Ok(khz) => khz.saturating_mul(1000),
            Err(e) => {
                trace!(error = %e, "cpu frequency unavailable");
                0
            }
        }
    }

    fn temperature(&self, state: &mut CpuState, now: u64) -> Option<f32> {
        state
            .temperature
            .get_or_refresh(now, || read_first_temperature(self.reader.as_ref(), CPU_THERMAL_PATHS))
            .ok()
    }
}

type StatReadFn = fn(&dyn CounterReader) -> Option<Vec<String>>;

fn read_stat_direct(reader: &dyn CounterReader) -> Option<Vec<String>> {
    reader.read_text(PROC_STAT).map(|t| non_blank_lines(&t))
}

fn read_stat_buffered(reader: &dyn CounterReader) -> Option<Vec<String>> {
    reader.read_lines(PROC_STAT, STAT_MAX_LINES)
}

fn read_stat_lossy(reader: &dyn CounterReader) -> Option<Vec<String>> {
    reader
        .read_raw(PROC_STAT)
        .map(|bytes| non_blank_lines(&String::from_utf8_lossy(&bytes)))
}

fn non_blank_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_owned)
        .collect()
}

/// First readable thermal node, normalized to degrees Celsius.
pub(crate) fn read_first_temperature(
    reader: &dyn CounterReader,
    paths: &[&str],
) -> SourceResult<f32> {
    for path in paths {
        if let Some(raw) = reader
            .read_text(path)
            .and_then(|t| t.trim().parse::<f32>().ok())
        {
            return Ok(normalize_temperature(raw));
        }
    }
    Err(SourceError::Unavailable("thermal zone".into()))
}

/// Parses `label n1 n2 n3 n4 ...`: idle is the 4th number, total the sum of all.
pub(crate) fn parse_stat_line(line: &str) -> Option<(&str, TickCounters)> {
    let mut fields = line.split_whitespace();
    let label = fields.next()?;
    let mut total = 0u64;
    let mut idle = None;
    for (i, field) in fields.enumerate() {
        let value: u64 = field.parse().ok()?;
        if i == 3 {
            idle = Some(value);
        }
        total = total.saturating_add(value);
    }
    Some((label, TickCounters { total, idle: idle? }))
}

fn core_index(label: &str) -> Option<usize> {
    let digits = label.strip_prefix("cpu")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_stat(lines: &[String]) -> SourceResult<StatFrame> {
    let mut aggregate = None;
    let mut cores = Vec::new();
    for line in lines {
        if !line.starts_with("cpu") {
            continue;
        }
        let Some((label, counters)) = parse_stat_line(line) else {
            trace!(line = line.as_str(), "skipping malformed cpu line");
            continue;
        };
        if label == "cpu" {
            aggregate = Some(counters);
        } else if let Some(index) = core_index(label) {
            cores.push((index, counters));
        }
    }
    let aggregate =
        aggregate.ok_or_else(|| SourceError::parse(PROC_STAT, "no aggregate cpu line"))?;
    Ok(StatFrame { aggregate, cores })
}

fn detect_core_count(frame: &StatFrame) -> usize {
    let highest = frame.cores.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
    let count = frame.cores.len().max(highest);
    if count == 0 { logical_cpu_count() } else { count }
}

/// (Δtotal − Δidle) / Δtotal × 100, clamped; Δtotal = 0 yields 0.
pub(crate) fn usage_between(prev: TickCounters, cur: TickCounters) -> f32 {
    let d_total = cur.total.saturating_sub(prev.total);
    if d_total == 0 {
        return 0.0;
    }
    let d_idle = cur.idle.saturating_sub(prev.idle).min(d_total);
    clamp_percent(((d_total - d_idle) as f64 / d_total as f64 * 100.0) as f32)
}

pub(crate) fn loadavg_estimate(load_1m: f64, cores: usize) -> f32 {
    let per_core = load_1m / cores.max(1) as f64;
    ((per_core * 100.0) as f32).clamp(5.0, 100.0)
}

/// Scales memory pressure (0..=1) into a CPU guess with a ±7.5 step that moves every 5 s.
pub(crate) fn memory_pressure_estimate(pressure: f32, now_ms: u64) -> f32 {
    let base = (pressure.clamp(0.0, 1.0) * 100.0 * 0.6).clamp(10.0, 60.0);
    let step = ((now_ms / 5000) % 10) as f32 / 10.0;
    let variance = step * 15.0 - 7.5;
    (base + variance).clamp(8.0, 85.0)
}

/// Last resort: a low value stepping every 3 s.
pub(crate) fn idle_estimate(now_ms: u64) -> f32 {
    (15.0 + ((now_ms / 3000) % 10) as f32).clamp(10.0, 30.0)
}

/// Per-core values for estimate mode: the scalar perturbed by a fixed per-index offset.
pub(crate) fn synthesize_core_usage(average: f32, cores: usize) -> Vec<f32> {
    (0..cores)
        .map(|i| {
            let offset = ((i * 13) % 20) as f32 - 10.0;
            clamp_percent(average + offset)
        })
        .collect()
}
