// Adaptive Poll Controller tests: interval restarts driven by device signals

mod common;

use common::{fixture, test_config};
use std::sync::Arc;
use std::time::Duration;
use sysoverlay::adaptive::AdaptiveSettings;
use sysoverlay::clock::SystemClock;
use sysoverlay::device::{DeviceClass, DeviceSignals, PowerState};
use sysoverlay::repo::SystemMetricsRepo;
use sysoverlay::sources::paths::PROC_STAT;
use tokio::time::{Instant, timeout};

fn quick_settings() -> AdaptiveSettings {
    AdaptiveSettings {
        min_interval_ms: 5,
        max_interval_ms: 1_000,
        mobile_fast_ms: 10,
        tv_fast_ms: 15,
        slow_ms: 40,
        warmup: Duration::from_millis(100),
        check_every: Duration::from_millis(50),
        error_backoff: Duration::from_millis(200),
    }
}

fn low_battery() -> PowerState {
    PowerState {
        on_battery: true,
        battery_percent: 12,
        ..PowerState::default()
    }
}

fn build_repo(device: Arc<DeviceSignals>) -> (Arc<SystemMetricsRepo>, Arc<sysoverlay::reader::FakeReader>) {
    let config = test_config();
    let f = fixture(&config, device, Arc::new(SystemClock));
    f.reader.set(PROC_STAT, common::STAT_FIRST);
    let reader = f.reader.clone();
    let repo = SystemMetricsRepo::new(&config, f.platform).with_adaptive(Some(quick_settings()));
    (Arc::new(repo), reader)
}

#[tokio::test]
async fn starts_from_device_class_interval() {
    let (repo, _) = build_repo(Arc::new(DeviceSignals::new(DeviceClass::Tv)));
    let stream = repo.observe_snapshots(5);
    assert_eq!(stream.current_interval_ms(), 15);

    let (repo, _) = build_repo(Arc::new(DeviceSignals::with_power(
        DeviceClass::Mobile,
        low_battery(),
    )));
    let stream = repo.observe_snapshots(5);
    assert_eq!(stream.current_interval_ms(), 40);
}

#[tokio::test]
async fn narrows_after_warmup_when_battery_recovers() {
    let device = Arc::new(DeviceSignals::with_power(DeviceClass::Mobile, low_battery()));
    let (repo, _) = build_repo(device.clone());
    let mut stream = repo.observe_snapshots(5);
    assert_eq!(stream.current_interval_ms(), 40);

    timeout(Duration::from_secs(2), stream.next_snapshot())
        .await
        .expect("first snapshot in time")
        .expect("stream open");
    device.update_power(PowerState::default());

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut last_ts = 0;
    while stream.current_interval_ms() != 10 {
        assert!(Instant::now() < deadline, "interval never adapted");
        let snap = timeout(Duration::from_secs(2), stream.next_snapshot())
            .await
            .expect("snapshot in time")
            .expect("stream open");
        assert!(snap.timestamp_ms >= last_ts);
        last_ts = snap.timestamp_ms;
    }

    // emissions continue across the restart
    for _ in 0..3 {
        let snap = timeout(Duration::from_secs(2), stream.next_snapshot())
            .await
            .expect("snapshot after restart")
            .expect("stream open");
        assert!(snap.timestamp_ms >= last_ts);
        last_ts = snap.timestamp_ms;
    }
}

#[tokio::test]
async fn widens_when_device_starts_saving_power() {
    let device = Arc::new(DeviceSignals::new(DeviceClass::Mobile));
    let (repo, _) = build_repo(device.clone());
    let mut stream = repo.observe_snapshots(5);
    assert_eq!(stream.current_interval_ms(), 10);
    device.update_power(low_battery());

    let deadline = Instant::now() + Duration::from_secs(3);
    while stream.current_interval_ms() != 40 {
        assert!(Instant::now() < deadline, "interval never widened");
        timeout(Duration::from_secs(2), stream.next_snapshot())
            .await
            .expect("snapshot in time")
            .expect("stream open");
    }
}

#[tokio::test]
async fn cancel_stops_controller_and_inner_stream() {
    let (repo, reader) = build_repo(Arc::new(DeviceSignals::new(DeviceClass::Mobile)));
    let mut stream = repo.observe_snapshots(5);
    stream.next_snapshot().await.expect("first snapshot");
    stream.cancel();
    assert!(stream.next_snapshot().await.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reads = reader.read_count(PROC_STAT);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(reader.read_count(PROC_STAT), reads);
}
