use anyhow::Result;
use futures_util::StreamExt;
use std::sync::Arc;
use sysoverlay::config::AppConfig;
use sysoverlay::device::DeviceSignals;
use sysoverlay::models::SystemSnapshot;
use sysoverlay::repo::SystemMetricsRepo;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = AppConfig::load()?;
    tracing::info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        class = ?app_config.device.class,
        interval_ms = app_config.polling.interval_ms,
        adaptive = app_config.polling.adaptive,
        "Starting metrics agent"
    );

    let device = Arc::new(DeviceSignals::new(app_config.device.class));
    let repo = Arc::new(SystemMetricsRepo::from_config(&app_config, device));

    let probe = repo.clone();
    let (gpu_available, vendor) =
        tokio::task::spawn_blocking(move || (probe.is_gpu_available(), probe.gpu().vendor()))
            .await
            .map_err(|e| anyhow::anyhow!("gpu probe task join: {}", e))?;
    tracing::info!(gpu_available, vendor = ?vendor, "GPU capability");

    let mut stream = repo.observe_snapshots(app_config.polling.interval_ms);
    let collect = async {
        while let Some(snapshot) = stream.next().await {
            log_snapshot(&snapshot, stream.current_interval_ms());
        }
    };

    tokio::select! {
        _ = collect => {
            tracing::warn!("Snapshot stream ended");
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }
    stream.cancel();

    Ok(())
}

fn log_snapshot(snapshot: &SystemSnapshot, interval_ms: u64) {
    let top = snapshot
        .process_ranking
        .processes
        .first()
        .map(|p| p.display_name.as_str())
        .unwrap_or("-");
    tracing::info!(
        cpu_percent = snapshot.cpu.overall_usage_percent,
        ram_used_mb = snapshot.ram.used_mb(),
        ram_total_mb = snapshot.ram.total_mb(),
        gpu_percent = snapshot
            .gpu
            .is_available
            .then_some(snapshot.gpu.usage_percent),
        top_process = top,
        interval_ms,
        "snapshot"
    );
    match serde_json::to_string(snapshot) {
        Ok(json) => tracing::debug!(snapshot = %json, "snapshot json"),
        Err(e) => tracing::warn!(error = %e, operation = "serialize_snapshot", "snapshot serialization failed"),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
