use crate::device::DeviceClass;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub polling: PollingConfig,
    pub cpu: CpuConfig,
    pub cache: CacheConfig,
    pub processes: ProcessConfig,
    pub reader: ReaderConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hint only; picks default TTLs and intervals.
    pub class: DeviceClass,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// User baseline; the adaptive controller never polls faster than this.
    pub interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub adaptive: bool,
    /// Delay before the first adaptation check, to skip startup transients.
    pub warmup_secs: u64,
    pub check_interval_secs: u64,
    /// Retry delay after a failed adaptation check.
    pub error_backoff_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            min_interval_ms: 500,
            max_interval_ms: 10_000,
            adaptive: true,
            warmup_secs: 30,
            check_interval_secs: 10,
            error_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Pause between the two reads that seed the first delta.
    pub settle_delay_ms: u64,
    pub high_load_threshold: f32,
    /// Cycles above threshold that must be exceeded before load counts as sustained.
    pub high_load_cycles: u32,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
            high_load_threshold: 80.0,
            high_load_cycles: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Frequency and temperature.
    pub static_info_ttl_ms: u64,
    pub gpu_availability_ttl_ms: u64,
    pub gpu_metrics_ttl_ms: u64,
    pub gpu_power_saving_ttl_ms: u64,
    pub ram_ttl_ms: u64,
    pub ram_power_saving_ttl_ms: u64,
    pub process_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            static_info_ttl_ms: 30_000,
            gpu_availability_ttl_ms: 60_000,
            gpu_metrics_ttl_ms: 2_000,
            gpu_power_saving_ttl_ms: 5_000,
            ram_ttl_ms: 500,
            ram_power_saving_ttl_ms: 2_000,
            process_ttl_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub top_n: usize,
    /// Processes below this footprint are dropped before ranking.
    pub min_memory_mb: u64,
    /// Per-process CPU baselines kept before stale pids are evicted.
    pub max_tracked_baselines: usize,
    /// Package name -> human label.
    pub labels: HashMap<String, String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_memory_mb: 10,
            max_tracked_baselines: 4096,
            labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub native_fast_path: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            native_fast_path: true,
        }
    }
}

impl AppConfig {
    /// Reads `CONFIG_FILE` (default `config.toml`). A missing default file means all defaults;
    /// an explicitly named file must exist.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var("CONFIG_FILE") {
            Ok(path) => {
                let s = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("config file {}: {}", path, e))?;
                Self::load_from_str(&s)
            }
            Err(_) => match std::fs::read_to_string("config.toml") {
                Ok(s) => Self::load_from_str(&s),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!("config.toml not found; using defaults");
                    let config = Self::default();
                    config.validate()?;
                    Ok(config)
                }
                Err(e) => Err(anyhow::anyhow!("config file config.toml: {}", e)),
            },
        }
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let p = &self.polling;
        anyhow::ensure!(
            p.min_interval_ms > 0,
            "polling.min_interval_ms must be > 0, got {}",
            p.min_interval_ms
        );
        anyhow::ensure!(
            p.min_interval_ms <= p.max_interval_ms,
            "polling.min_interval_ms ({}) must be <= polling.max_interval_ms ({})",
            p.min_interval_ms,
            p.max_interval_ms
        );
        anyhow::ensure!(
            p.interval_ms > 0,
            "polling.interval_ms must be > 0, got {}",
            p.interval_ms
        );
        anyhow::ensure!(
            p.check_interval_secs > 0,
            "polling.check_interval_secs must be > 0, got {}",
            p.check_interval_secs
        );
        anyhow::ensure!(
            p.error_backoff_secs > 0,
            "polling.error_backoff_secs must be > 0, got {}",
            p.error_backoff_secs
        );
        anyhow::ensure!(
            self.cpu.high_load_threshold > 0.0 && self.cpu.high_load_threshold <= 100.0,
            "cpu.high_load_threshold must be in (0, 100], got {}",
            self.cpu.high_load_threshold
        );
        let c = &self.cache;
        for (name, value) in [
            ("cache.static_info_ttl_ms", c.static_info_ttl_ms),
            ("cache.gpu_availability_ttl_ms", c.gpu_availability_ttl_ms),
            ("cache.gpu_metrics_ttl_ms", c.gpu_metrics_ttl_ms),
            ("cache.gpu_power_saving_ttl_ms", c.gpu_power_saving_ttl_ms),
            ("cache.ram_ttl_ms", c.ram_ttl_ms),
            ("cache.ram_power_saving_ttl_ms", c.ram_power_saving_ttl_ms),
            ("cache.process_ttl_ms", c.process_ttl_ms),
        ] {
            anyhow::ensure!(value > 0, "{} must be > 0, got {}", name, value);
        }
        anyhow::ensure!(
            self.processes.top_n > 0,
            "processes.top_n must be > 0, got {}",
            self.processes.top_n
        );
        anyhow::ensure!(
            self.processes.max_tracked_baselines > 0,
            "processes.max_tracked_baselines must be > 0, got {}",
            self.processes.max_tracked_baselines
        );
        Ok(())
    }
}

impl PollingConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}
