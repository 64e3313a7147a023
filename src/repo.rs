// Aggregator: composes one SystemSnapshot from every source, once or on a cadence.

use crate::adaptive::{self, AdaptiveSettings};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::device::DeviceSignals;
use crate::models::SystemSnapshot;
use crate::reader::{CounterReader, ProcReader};
use crate::sources::{
    CpuSettings, CpuSource, GpuSettings, GpuSource, LabelResolver, ProcessSettings, ProcessSource,
    ProcessTable, ProcfsProcessTable, RamSettings, RamSource, StaticLabels, SysinfoMemory,
    SystemMemory,
};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{debug, instrument, warn};

/// Platform collaborators the sources read through.
#[derive(Clone)]
pub struct Platform {
    pub reader: Arc<dyn CounterReader>,
    pub memory: Arc<dyn SystemMemory>,
    pub processes: Arc<dyn ProcessTable>,
    pub labels: Arc<dyn LabelResolver>,
    pub device: Arc<DeviceSignals>,
    pub clock: Arc<dyn Clock>,
}

impl Platform {
    /// Real procfs/sysfs readers, sysinfo-backed queries and the wall clock.
    pub fn host(config: &AppConfig, device: Arc<DeviceSignals>) -> Self {
        let reader: Arc<dyn CounterReader> =
            Arc::new(ProcReader::detect(config.reader.native_fast_path));
        Self {
            processes: Arc::new(ProcfsProcessTable::new(reader.clone())),
            reader,
            memory: Arc::new(SysinfoMemory::new()),
            labels: Arc::new(StaticLabels::new(config.processes.labels.clone())),
            device,
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct SystemMetricsRepo {
    cpu: Arc<CpuSource>,
    gpu: Arc<GpuSource>,
    ram: Arc<RamSource>,
    processes: Arc<ProcessSource>,
    device: Arc<DeviceSignals>,
    clock: Arc<dyn Clock>,
    top_n: usize,
    adaptive: Option<AdaptiveSettings>,
}

impl SystemMetricsRepo {
    pub fn new(config: &AppConfig, platform: Platform) -> Self {
        let Platform {
            reader,
            memory,
            processes,
            labels,
            device,
            clock,
        } = platform;
        let cpu = CpuSource::new(
            reader.clone(),
            memory.clone(),
            clock.clone(),
            CpuSettings::from_config(config),
        );
        let gpu = GpuSource::new(
            reader.clone(),
            device.clone(),
            clock.clone(),
            GpuSettings::from_config(config),
        );
        let ram = RamSource::new(
            reader.clone(),
            memory,
            device.clone(),
            clock.clone(),
            RamSettings::from_config(config),
        );
        let processes = ProcessSource::new(
            reader,
            processes,
            labels,
            clock.clone(),
            ProcessSettings::from_config(config),
        );
        Self {
            cpu: Arc::new(cpu),
            gpu: Arc::new(gpu),
            ram: Arc::new(ram),
            processes: Arc::new(processes),
            device,
            clock,
            top_n: config.processes.top_n,
            adaptive: config
                .polling
                .adaptive
                .then(|| AdaptiveSettings::from_config(&config.polling)),
        }
    }

    pub fn from_config(config: &AppConfig, device: Arc<DeviceSignals>) -> Self {
        Self::new(config, Platform::host(config, device))
    }

    /// Replaces (or with `None` disables) interval adaptation for streams started afterwards.
    pub fn with_adaptive(mut self, settings: Option<AdaptiveSettings>) -> Self {
        self.adaptive = settings;
        self
    }

    pub fn device(&self) -> &Arc<DeviceSignals> {
        &self.device
    }

    pub fn cpu(&self) -> &CpuSource {
        &self.cpu
    }

    pub fn gpu(&self) -> &GpuSource {
        &self.gpu
    }

    pub fn ram(&self) -> &RamSource {
        &self.ram
    }

    pub fn processes(&self) -> &ProcessSource {
        &self.processes
    }

    /// Samples all four sources concurrently on the blocking pool. Never fails;
    /// a source whose task dies contributes its default snapshot.
    #[instrument(skip(self), fields(repo = "metrics", operation = "get_snapshot"))]
    pub async fn get_snapshot(&self) -> SystemSnapshot {
        let cpu = self.cpu.clone();
        let gpu = self.gpu.clone();
        let ram = self.ram.clone();
        let processes = self.processes.clone();
        let top_n = self.top_n;

        let (cpu, gpu, ram, process_ranking) = tokio::join!(
            run_blocking("cpu_sample", move || cpu.sample()),
            run_blocking("gpu_sample", move || gpu.sample()),
            run_blocking("ram_sample", move || ram.sample()),
            run_blocking("top_by_memory", move || processes.top_by_memory(top_n)),
        );
        SystemSnapshot {
            cpu,
            gpu,
            ram,
            process_ranking,
            timestamp_ms: self.clock.now_ms(),
        }
    }

    /// Cached GPU capability probe. Touches sysfs only when the availability TTL has lapsed.
    pub fn is_gpu_available(&self) -> bool {
        self.gpu.is_available()
    }

    pub fn cpu_sustained_high_load(&self) -> bool {
        self.cpu.is_sustained_high_load()
    }

    /// Snapshots every `interval_ms` until the stream is cancelled or dropped. With
    /// adaptation enabled `interval_ms` is the baseline the controller starts from.
    pub fn observe_snapshots(self: &Arc<Self>, interval_ms: u64) -> SnapshotStream {
        match &self.adaptive {
            Some(settings) => adaptive::spawn(self.clone(), interval_ms, settings.clone()),
            None => self.observe_fixed(interval_ms),
        }
    }

    /// Fixed cadence, no adaptation.
    pub fn observe_fixed(self: &Arc<Self>, interval_ms: u64) -> SnapshotStream {
        let period = Duration::from_millis(interval_ms.max(1));
        self.stream_with_delay(period, Duration::ZERO)
    }

    /// First emission after `first_delay`, then every `period`.
    pub(crate) fn stream_with_delay(
        self: &Arc<Self>,
        period: Duration,
        first_delay: Duration,
    ) -> SnapshotStream {
        let (tx, rx) = mpsc::channel(1);
        let interval_ms = Arc::new(AtomicU64::new(period.as_millis() as u64));
        let handle = spawn_poll_loop(self.clone(), tx, period, first_delay);
        SnapshotStream::new(rx, handle, interval_ms)
    }
}

async fn run_blocking<T, F>(operation: &'static str, f: F) -> T
where
    T: Default + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, operation, "source task failed; using default");
            T::default()
        }
    }
}

fn spawn_poll_loop(
    repo: Arc<SystemMetricsRepo>,
    tx: mpsc::Sender<SystemSnapshot>,
    period: Duration,
    first_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + first_delay, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let interval_ms = period.as_millis() as u64;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let snapshot = repo.get_snapshot().await;
                    if tx.send(snapshot).await.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
        }
        debug!(operation = "poll_loop", interval_ms, "snapshot poll loop stopped");
    })
}

/// Aborts the task when dropped.
pub(crate) struct AbortOnDrop(pub(crate) JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cancellable sequence of snapshots. Dropping it stops the background task(s)
/// behind it; after `cancel()` nothing more is yielded, even if already buffered.
pub struct SnapshotStream {
    rx: mpsc::Receiver<SystemSnapshot>,
    task: AbortOnDrop,
    interval_ms: Arc<AtomicU64>,
    cancelled: bool,
}

impl SnapshotStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<SystemSnapshot>,
        task: JoinHandle<()>,
        interval_ms: Arc<AtomicU64>,
    ) -> Self {
        Self {
            rx,
            task: AbortOnDrop(task),
            interval_ms,
            cancelled: false,
        }
    }

    pub async fn next_snapshot(&mut self) -> Option<SystemSnapshot> {
        if self.cancelled {
            return None;
        }
        self.rx.recv().await
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.rx.close();
        self.task.0.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Period currently driving emissions.
    pub fn current_interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }
}

impl Stream for SnapshotStream {
    type Item = SystemSnapshot;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}
