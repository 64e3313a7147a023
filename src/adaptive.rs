// Adaptive Poll Controller: picks the poll interval from device class, power
// state and recent snapshots, and restarts the snapshot stream when it changes.

use crate::config::PollingConfig;
use crate::device::{DeviceClass, DeviceSignals, PowerState, is_power_saving};
use crate::models::SystemSnapshot;
use crate::repo::{SnapshotStream, SystemMetricsRepo};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, info, warn};

pub const MOBILE_FAST_INTERVAL_MS: u64 = 600;
pub const TV_FAST_INTERVAL_MS: u64 = 800;
pub const SLOW_INTERVAL_MS: u64 = 2000;

/// Available memory below this widens the interval.
pub const MEMORY_FLOOR_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AdaptiveSettings {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub mobile_fast_ms: u64,
    pub tv_fast_ms: u64,
    pub slow_ms: u64,
    /// Delay before the first check.
    pub warmup: Duration,
    pub check_every: Duration,
    /// Retry delay after a failed check.
    pub error_backoff: Duration,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

impl AdaptiveSettings {
    pub fn from_config(polling: &PollingConfig) -> Self {
        Self {
            min_interval_ms: polling.min_interval_ms,
            max_interval_ms: polling.max_interval_ms,
            mobile_fast_ms: MOBILE_FAST_INTERVAL_MS,
            tv_fast_ms: TV_FAST_INTERVAL_MS,
            slow_ms: SLOW_INTERVAL_MS,
            warmup: polling.warmup(),
            check_every: polling.check_interval(),
            error_backoff: polling.error_backoff(),
        }
    }

    /// Never faster than the user's baseline, always inside [min, max].
    fn clamp(&self, interval_ms: u64, baseline_ms: u64) -> u64 {
        interval_ms
            .max(baseline_ms)
            .clamp(self.min_interval_ms, self.max_interval_ms)
    }

    fn fast_for(&self, class: DeviceClass) -> u64 {
        match class {
            DeviceClass::Mobile => self.mobile_fast_ms,
            DeviceClass::Tv => self.tv_fast_ms,
            DeviceClass::LowPower => self.slow_ms,
        }
    }
}

/// Interval a stream starts with, before any snapshot has been seen.
pub fn initial_interval_ms(
    class: DeviceClass,
    power: &PowerState,
    baseline_ms: u64,
    settings: &AdaptiveSettings,
) -> u64 {
    let raw = match class {
        DeviceClass::Tv if power.low_power_mode => settings.slow_ms,
        DeviceClass::Mobile if power.is_low_battery() => settings.slow_ms,
        other => settings.fast_for(other),
    };
    settings.clamp(raw, baseline_ms)
}

/// Slow when CPU load is sustained, memory is short, or the device is saving
/// power or throttling; otherwise the class's fast interval.
pub fn optimal_interval_ms(
    snapshot: &SystemSnapshot,
    sustained_high_load: bool,
    class: DeviceClass,
    power: &PowerState,
    baseline_ms: u64,
    settings: &AdaptiveSettings,
) -> u64 {
    let low_memory =
        snapshot.ram.total_bytes > 0 && snapshot.ram.available_bytes < MEMORY_FLOOR_BYTES;
    let raw = if sustained_high_load
        || low_memory
        || is_power_saving(class, power)
        || power.is_thermal_throttled()
    {
        settings.slow_ms
    } else {
        settings.fast_for(class)
    };
    settings.clamp(raw, baseline_ms)
}

/// Starts the controller task. The returned stream forwards snapshots from an
/// inner fixed-cadence stream that is replaced whenever the interval changes.
pub(crate) fn spawn(
    repo: Arc<SystemMetricsRepo>,
    baseline_ms: u64,
    settings: AdaptiveSettings,
) -> SnapshotStream {
    let device = repo.device().clone();
    let initial = initial_interval_ms(device.class(), &device.power(), baseline_ms, &settings);
    let interval_ms = Arc::new(AtomicU64::new(initial));
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(supervise(
        repo,
        device,
        tx,
        interval_ms.clone(),
        baseline_ms,
        settings,
    ));
    SnapshotStream::new(rx, handle, interval_ms)
}

async fn supervise(
    repo: Arc<SystemMetricsRepo>,
    device: Arc<DeviceSignals>,
    tx: mpsc::Sender<SystemSnapshot>,
    interval_ms: Arc<AtomicU64>,
    baseline_ms: u64,
    settings: AdaptiveSettings,
) {
    let mut current = interval_ms.load(Ordering::Relaxed);
    info!(
        operation = "adaptive_start",
        interval_ms = current,
        baseline_ms,
        class = ?device.class(),
        "adaptive polling started"
    );
    // Dropping `inner` aborts its poll loop, so cancelling this task stops both.
    let mut inner = repo.stream_with_delay(Duration::from_millis(current), Duration::ZERO);
    let mut latest: Option<SystemSnapshot> = None;
    let check = sleep(settings.warmup);
    tokio::pin!(check);

    loop {
        tokio::select! {
            item = inner.next_snapshot() => {
                let Some(snapshot) = item else { break };
                latest = Some(snapshot.clone());
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
            _ = &mut check => {
                match evaluate(&repo, &device, latest.as_ref(), baseline_ms, &settings).await {
                    Ok(next) => {
                        if next != current {
                            info!(
                                operation = "adaptive_check",
                                from_ms = current,
                                to_ms = next,
                                "poll interval adjusted"
                            );
                            inner.cancel();
                            // First tick one full period out so the seam never emits twice.
                            let period = Duration::from_millis(next);
                            inner = repo.stream_with_delay(period, period);
                            current = next;
                            interval_ms.store(next, Ordering::Relaxed);
                        } else {
                            debug!(operation = "adaptive_check", interval_ms = current, "interval unchanged");
                        }
                        check.as_mut().reset(Instant::now() + settings.check_every);
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            operation = "adaptive_check",
                            retry_secs = settings.error_backoff.as_secs(),
                            "adaptation check failed; backing off"
                        );
                        check.as_mut().reset(Instant::now() + settings.error_backoff);
                    }
                }
            }
            _ = tx.closed() => break,
        }
    }
    debug!(operation = "adaptive_stop", "adaptive polling stopped");
}

async fn evaluate(
    repo: &SystemMetricsRepo,
    device: &DeviceSignals,
    latest: Option<&SystemSnapshot>,
    baseline_ms: u64,
    settings: &AdaptiveSettings,
) -> anyhow::Result<u64> {
    let power = device.try_power()?;
    let fetched;
    let snapshot = match latest {
        Some(s) => s,
        None => {
            fetched = repo.get_snapshot().await;
            &fetched
        }
    };
    Ok(optimal_interval_ms(
        snapshot,
        repo.cpu_sustained_high_load(),
        device.class(),
        &power,
        baseline_ms,
        settings,
    ))
}
