// Top processes by proportional memory, with per-process CPU from tick deltas.

use super::lock;
use super::paths::{proc_pid_cmdline, proc_pid_smaps_rollup, proc_pid_stat};
use crate::cache::CacheEntry;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{SourceError, SourceResult};
use crate::models::{ProcessRanking, ProcessRecord, clamp_percent};
use crate::reader::CounterReader;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub pid: u32,
    /// OS process name; Android app processes carry the package, maybe with `:suffix`.
    pub name: String,
}

/// Platform process listing and memory accounting.
pub trait ProcessTable: Send + Sync {
    fn running_processes(&self) -> SourceResult<Vec<RunningProcess>>;

    /// Proportional set size in kB for each pid, in the same order. `None` when unknown.
    fn proportional_memory_kb(&self, pids: &[u32]) -> Vec<Option<u64>>;
}

/// Package metadata lookup for human-readable names.
pub trait LabelResolver: Send + Sync {
    fn label(&self, package: &str) -> Option<String>;
}

/// Labels from a fixed package -> name map (the `[processes.labels]` table).
#[derive(Debug, Clone, Default)]
pub struct StaticLabels(HashMap<String, String>);

impl StaticLabels {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self(labels)
    }
}

impl LabelResolver for StaticLabels {
    fn label(&self, package: &str) -> Option<String> {
        self.0.get(package).cloned()
    }
}

/// `ProcessTable` over sysinfo enumeration and procfs `smaps_rollup`.
pub struct ProcfsProcessTable {
    reader: Arc<dyn CounterReader>,
    sys: Mutex<System>,
}

impl ProcfsProcessTable {
    pub fn new(reader: Arc<dyn CounterReader>) -> Self {
        Self {
            reader,
            sys: Mutex::new(System::new()),
        }
    }
}

impl ProcessTable for ProcfsProcessTable {
    fn running_processes(&self) -> SourceResult<Vec<RunningProcess>> {
        let mut listed: Vec<(u32, String)> = {
            let mut sys = lock(&self.sys);
            sys.refresh_processes(ProcessesToUpdate::All, true);
            sys.processes()
                .iter()
                .map(|(pid, p)| (pid.as_u32(), p.name().to_string_lossy().into_owned()))
                .collect()
        };
        if listed.is_empty() {
            return Err(SourceError::Enumeration("no processes listed".into()));
        }
        listed.sort_by_key(|(pid, _)| *pid);

        // cmdline holds the full process name; sysinfo truncates comm to 15 bytes.
        let cmdline_paths: Vec<String> = listed.iter().map(|(pid, _)| proc_pid_cmdline(*pid)).collect();
        let cmdlines = self.reader.read_batch(&cmdline_paths);
        Ok(listed
            .into_iter()
            .zip(cmdlines)
            .map(|((pid, comm), cmdline)| {
                let name = cmdline
                    .as_deref()
                    .and_then(|c| c.split('\0').next())
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_owned)
                    .unwrap_or(comm);
                RunningProcess { pid, name }
            })
            .collect())
    }

    fn proportional_memory_kb(&self, pids: &[u32]) -> Vec<Option<u64>> {
        let paths: Vec<String> = pids.iter().map(|p| proc_pid_smaps_rollup(*p)).collect();
        let rollups = self.reader.read_batch(&paths);
        let sys = lock(&self.sys);
        pids.iter()
            .zip(rollups)
            .map(|(pid, rollup)| {
                rollup.as_deref().and_then(parse_pss_kb).or_else(|| {
                    // resident size when smaps is denied
                    sys.process(Pid::from_u32(*pid)).map(|p| p.memory() / 1024)
                })
            })
            .collect()
    }
}

fn parse_pss_kb(rollup: &str) -> Option<u64> {
    rollup
        .lines()
        .find_map(|l| l.strip_prefix("Pss:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
}

/// utime + stime from `/proc/<pid>/stat`. Fields are counted after the last `)`
/// so process names containing spaces or parentheses do not shift them.
pub fn parse_process_ticks(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime.saturating_add(stime))
}

/// Kernel clock ticks per second (USER_HZ).
pub(crate) fn clock_ticks_per_sec() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions and only reads a constant.
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if hz > 0 {
            return hz as u64;
        }
    }
    100
}

#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub ttl: Duration,
    pub min_memory_mb: u64,
    pub max_tracked_baselines: usize,
    pub clock_ticks_per_sec: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ProcessSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.cache.process_ttl_ms),
            min_memory_mb: config.processes.min_memory_mb,
            max_tracked_baselines: config.processes.max_tracked_baselines,
            clock_ticks_per_sec: clock_ticks_per_sec(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TickBaseline {
    ticks: u64,
    at_ms: u64,
}

struct ProcessState {
    /// Full filtered ranking; callers get it truncated.
    ranking: CacheEntry<ProcessRanking>,
    baselines: HashMap<u32, TickBaseline>,
    last_error: Option<SourceError>,
}

pub struct ProcessSource {
    reader: Arc<dyn CounterReader>,
    table: Arc<dyn ProcessTable>,
    labels: Arc<dyn LabelResolver>,
    clock: Arc<dyn Clock>,
    settings: ProcessSettings,
    state: Mutex<ProcessState>,
}

impl ProcessSource {
    pub fn new(
        reader: Arc<dyn CounterReader>,
        table: Arc<dyn ProcessTable>,
        labels: Arc<dyn LabelResolver>,
        clock: Arc<dyn Clock>,
        settings: ProcessSettings,
    ) -> Self {
        let state = ProcessState {
            ranking: CacheEntry::new(settings.ttl),
            baselines: HashMap::new(),
            last_error: None,
        };
        Self {
            reader,
            table,
            labels,
            clock,
            settings,
            state: Mutex::new(state),
        }
    }

    /// Up to `n` processes, largest footprint first.
    pub fn top_by_memory(&self, n: usize) -> ProcessRanking {
        let mut state = lock(&self.state);
        let now = self.clock.now_ms();
        if let Some(cached) = state.ranking.fresh(now) {
            return cached.truncated(n);
        }

        match self.collect(&mut state, now) {
            Ok(ranking) => {
                debug!(
                    operation = "top_by_memory",
                    observed = ranking.total_observed_count,
                    requested = n,
                    "process ranking refreshed"
                );
                let top = ranking.truncated(n);
                state.ranking.store(ranking, now);
                top
            }
            Err(e) => {
                warn!(error = %e, operation = "top_by_memory", "process enumeration failed");
                state.last_error = Some(e);
                state
                    .ranking
                    .stale()
                    .filter(|r| !r.is_empty())
                    .map(|r| r.truncated(n))
                    .unwrap_or_default()
            }
        }
    }

    /// Drops the cached ranking and every CPU baseline.
    pub fn clear_cache(&self) {
        let mut state = lock(&self.state);
        state.ranking.invalidate();
        state.baselines.clear();
        info!(operation = "clear_cache", "process cache cleared");
    }

    pub fn tracked_baselines(&self) -> usize {
        lock(&self.state).baselines.len()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.as_ref().map(|e| e.to_string())
    }

    fn collect(&self, state: &mut ProcessState, now: u64) -> SourceResult<ProcessRanking> {
        let running = self.table.running_processes()?;
        if running.is_empty() {
            return Err(SourceError::Enumeration("empty process list".into()));
        }
        let pids: Vec<u32> = running.iter().map(|p| p.pid).collect();
        let memory = self.table.proportional_memory_kb(&pids);

        let qualifying: Vec<(RunningProcess, u64)> = running
            .into_iter()
            .zip(memory)
            .filter_map(|(p, kb)| {
                let mb = kb? / 1024;
                (mb >= self.settings.min_memory_mb).then_some((p, mb))
            })
            .collect();

        let stat_paths: Vec<String> = qualifying.iter().map(|(p, _)| proc_pid_stat(p.pid)).collect();
        let stats = self.reader.read_batch(&stat_paths);

        let mut processes: Vec<ProcessRecord> = qualifying
            .into_iter()
            .zip(stats)
            .map(|((p, mb), stat)| {
                let cpu = match stat.as_deref().and_then(parse_process_ticks) {
                    Some(ticks) => self.cpu_percent(&mut state.baselines, p.pid, ticks, now),
                    None => {
                        trace!(pid = p.pid, "process stat unreadable");
                        0.0
                    }
                };
                ProcessRecord {
                    display_name: self.display_name(&p.name),
                    process_identifier: p.name,
                    memory_usage_mb: mb,
                    cpu_usage_percent: cpu,
                    os_process_id: p.pid,
                }
            })
            .collect();
        processes.sort_by(|a, b| {
            b.memory_usage_mb
                .cmp(&a.memory_usage_mb)
                .then(a.os_process_id.cmp(&b.os_process_id))
        });

        if state.baselines.len() > self.settings.max_tracked_baselines {
            let live: HashSet<u32> = pids.into_iter().collect();
            let before = state.baselines.len();
            state.baselines.retain(|pid, _| live.contains(pid));
            debug!(
                operation = "evict_baselines",
                evicted = before - state.baselines.len(),
                "dropped baselines of exited processes"
            );
        }

        Ok(ProcessRanking {
            total_observed_count: processes.len(),
            processes,
        })
    }

    /// Δticks / USER_HZ over Δwall seconds. No baseline, or no elapsed time, reads 0.
    fn cpu_percent(
        &self,
        baselines: &mut HashMap<u32, TickBaseline>,
        pid: u32,
        ticks: u64,
        now: u64,
    ) -> f32 {
        let previous = baselines.insert(pid, TickBaseline { ticks, at_ms: now });
        let Some(prev) = previous else {
            return 0.0;
        };
        let elapsed_ms = now.saturating_sub(prev.at_ms);
        if elapsed_ms == 0 {
            baselines.insert(pid, prev);
            return 0.0;
        }
        let cpu_secs = ticks.saturating_sub(prev.ticks) as f64 / self.settings.clock_ticks_per_sec.max(1) as f64;
        clamp_percent((cpu_secs / (elapsed_ms as f64 / 1000.0) * 100.0) as f32)
    }

    fn display_name(&self, process_name: &str) -> String {
        let package = process_name.split(':').next().unwrap_or(process_name);
        self.labels
            .label(package)
            .unwrap_or_else(|| process_name.to_string())
    }
}
